//! Fehlertypen des Live-Transports

use sternfunk_core::SternfunkError;
use sternfunk_session::SessionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Verbindungsaufbau fehlgeschlagen: {0}")]
    Verbindung(String),

    #[error("Ungueltiger Endpunkt: {0}")]
    Endpunkt(String),

    #[error("Setup vom Dienst abgelehnt: {0}")]
    Setup(String),

    #[error("Verbindung vor setupComplete beendet: {0}")]
    VorzeitigBeendet(String),

    #[error("Kein Tokio-Runtime-Kontext")]
    KeineRuntime,

    #[error(transparent)]
    Kern(#[from] SternfunkError),
}

impl From<TransportError> for SessionError {
    fn from(e: TransportError) -> Self {
        SessionError::TransportOpen(e.to_string())
    }
}

pub type TransportResult<T> = Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transportfehler_sind_oeffnungsfehler() {
        let e: SessionError = TransportError::Setup("model not found".into()).into();
        assert!(matches!(e, SessionError::TransportOpen(m) if m.contains("model not found")));
    }

    #[test]
    fn kernfehler_bleiben_lesbar() {
        let e = TransportError::from(SternfunkError::Konfiguration("API-Key fehlt".into()));
        assert_eq!(e.to_string(), "Konfigurationsfehler: API-Key fehlt");
    }
}
