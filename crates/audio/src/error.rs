//! Fehlertypen fuer die Audio-Engine

use thiserror::Error;

/// Alle moeglichen Fehler der Audio-Engine
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Audio-Geraet nicht gefunden: {0}")]
    GeraetNichtGefunden(String),

    #[error("Kein Standard-Eingabegeraet verfuegbar")]
    KeinStandardEingabegeraet,

    #[error("Kein Standard-Ausgabegeraet verfuegbar")]
    KeinStandardAusgabegeraet,

    #[error("Mikrofon wird bereits von einer anderen Session gehalten")]
    GeraetBelegt,

    #[error("Stream-Fehler: {0}")]
    StreamFehler(String),

    #[error("Dekodierung fehlgeschlagen: {0}")]
    Dekodierung(String),

    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    #[error("Audio-Ausgabe geschlossen")]
    AusgabeGeschlossen,
}

pub type AudioResult<T> = Result<T, AudioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehler_meldungen() {
        assert_eq!(
            AudioError::GeraetBelegt.to_string(),
            "Mikrofon wird bereits von einer anderen Session gehalten"
        );
        assert_eq!(
            AudioError::Dekodierung("ungerade Laenge".into()).to_string(),
            "Dekodierung fehlgeschlagen: ungerade Laenge"
        );
    }
}
