//! sternfunk-protocol – Leitungsformat des Live-Dienstes
//!
//! Dieses Crate definiert die JSON-Nachrichten, die zwischen Client und
//! dem bidirektionalen Modell-Endpunkt ausgetauscht werden, und uebersetzt
//! eingehende Frames in `ServerMessage`s des Kern-Crates.

pub mod wire;

pub use wire::{
    build_audio_message, build_audio_stream_end_message, build_setup_message,
    parse_server_frame, ClientMessage, ServerFrame,
};
