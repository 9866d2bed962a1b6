//! Transport-Ereignisse
//!
//! Der Transport meldet seinen Zustand nicht ueber einzelne Callbacks,
//! sondern als getaggten Ereignis-Strom. Die Session-Zustandsmaschine
//! konsumiert diesen Strom in Empfangsreihenfolge.

use crate::types::EncodedChunk;
use serde::{Deserialize, Serialize};

/// Inhalt einer eingehenden Nachricht des Modells
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerMessage {
    /// Audio-Segment der Modell-Antwort (falls vorhanden)
    pub audio: Option<EncodedChunk>,
    /// Gegenseite meldet Barge-in: laufende Wiedergabe abbrechen
    pub interrupted: bool,
}

impl ServerMessage {
    /// Nachricht nur mit Audio
    pub fn audio(chunk: EncodedChunk) -> Self {
        Self {
            audio: Some(chunk),
            interrupted: false,
        }
    }

    /// Nachricht nur mit Unterbrechungs-Signal
    pub fn interrupted() -> Self {
        Self {
            audio: None,
            interrupted: true,
        }
    }

    /// Traegt die Nachricht nichts, was die Session interessiert?
    pub fn is_empty(&self) -> bool {
        self.audio.is_none() && !self.interrupted
    }
}

/// Ereignisse eines Session-Transports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportEvent {
    /// Verbindung steht, Senden ist ab jetzt moeglich
    Open,
    /// Eingehende Nachricht
    Message(ServerMessage),
    /// Fehler (vor oder nach `Open`)
    Error(String),
    /// Verbindung wurde geschlossen
    Close,
}
