//! Fehlertypen fuer Sternfunk
//!
//! Crate-uebergreifender Fehler-Enum. Audio, Session und Transport
//! definieren eigene Fehler und konvertieren bei Bedarf via `#[from]`.

use thiserror::Error;

/// Globaler Result-Alias fuer Sternfunk
pub type Result<T> = std::result::Result<T, SternfunkError>;

/// Fehlerzustaende die zwischen den Crates weitergereicht werden
#[derive(Debug, Error)]
pub enum SternfunkError {
    // --- Protokoll ---
    #[error("Protokollfehler: {0}")]
    Protokoll(String),

    // --- Konfiguration ---
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),
}

impl From<serde_json::Error> for SternfunkError {
    fn from(e: serde_json::Error) -> Self {
        Self::Protokoll(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehler_anzeige() {
        let e = SternfunkError::Konfiguration("API-Key fehlt".into());
        assert_eq!(e.to_string(), "Konfigurationsfehler: API-Key fehlt");
    }

    #[test]
    fn json_fehler_wird_protokollfehler() {
        let json_err = serde_json::from_str::<serde_json::Value>("{kaputt").unwrap_err();
        let e: SternfunkError = json_err.into();
        assert!(matches!(e, SternfunkError::Protokoll(_)));
    }
}
