//! Fehlertypen der Session-Schicht

use std::time::Duration;
use sternfunk_audio::AudioError;
use sternfunk_core::SternfunkError;
use thiserror::Error;

/// Fehler einer Live-Sitzung
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Audiogeraet nicht verfuegbar: {0}")]
    DeviceUnavailable(String),

    #[error("Verbindung konnte nicht geoeffnet werden: {0}")]
    TransportOpen(String),

    #[error("Verbindung waehrend der Sitzung abgebrochen: {0}")]
    TransportRuntime(String),

    #[error("Audio-Block nicht dekodierbar: {0}")]
    Decode(String),

    #[error("Verbindungsaufbau nach {0:?} abgebrochen")]
    ConnectTimeout(Duration),

    #[error("Ungueltiger Zustand: {0}")]
    InvalidState(String),
}

impl SessionError {
    /// Meldung fuer die Oberflaeche (ohne technische Details)
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::DeviceUnavailable(_) => {
                "Mikrofon oder Lautsprecher nicht verfuegbar. Bitte Geraete und Berechtigungen pruefen."
            }
            Self::TransportOpen(_) | Self::ConnectTimeout(_) => {
                "Verbindung zum Sprachdienst fehlgeschlagen. Bitte spaeter erneut versuchen."
            }
            Self::TransportRuntime(_) => "Verbindung zum Sprachdienst unterbrochen.",
            Self::Decode(_) => "Ein Teil der Antwort konnte nicht abgespielt werden.",
            Self::InvalidState(_) => "Interner Fehler in der Sitzung.",
        }
    }

    /// Beendet der Fehler die Sitzung?
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Decode(_))
    }
}

impl From<AudioError> for SessionError {
    fn from(e: AudioError) -> Self {
        match e {
            AudioError::Dekodierung(msg) => Self::Decode(msg),
            other => Self::DeviceUnavailable(other.to_string()),
        }
    }
}

impl From<SternfunkError> for SessionError {
    fn from(e: SternfunkError) -> Self {
        Self::TransportOpen(e.to_string())
    }
}

/// Result-Alias fuer die Session-Schicht
pub type SessionResult<T> = Result<T, SessionError>;
