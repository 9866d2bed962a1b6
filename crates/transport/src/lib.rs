//! sternfunk-transport – Live-Verbindung ueber WebSocket
//!
//! Implementiert [`sternfunk_session::SessionTransport`] fuer den
//! bidirektionalen Modell-Endpunkt.

pub mod error;
pub mod live;

pub use error::{TransportError, TransportResult};
pub use live::{live_url, LiveTransport};
