//! sternfunk-core – Gemeinsame Typen, Ereignisse und Fehlertypen
//!
//! Dieses Crate stellt die Bausteine bereit, die Audio-Engine, Session und
//! Transport gemeinsam nutzen: das `EncodedChunk`-Datenmodell, die
//! Live-Konfiguration und die Transport-Ereignisse.

pub mod error;
pub mod event;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::{Result, SternfunkError};
pub use event::{ServerMessage, TransportEvent};
pub use types::{
    pcm_mime_type, rate_from_mime_type, EncodedChunk, LiveConfig, SessionId,
    INBOUND_SAMPLE_RATE, OUTBOUND_SAMPLE_RATE,
};
