//! sternfunk-session – Live-Sitzung mit dem Sprachmodell
//!
//! Zustandsmaschine Idle -> Connecting -> Active -> Closed (bzw. ueber
//! Error), Capture-Pipeline vom Mikrofon zum Transport und die
//! Schnittstelle, die ein Transport implementieren muss.

pub mod controller;
pub mod error;
pub mod pipeline;
pub mod session;
pub mod stats;
pub mod transport;

pub use controller::{
    AudioDevices, ControllerConfig, SessionController, SessionStatus, TransportFactory,
    DEFAULT_CONNECT_TIMEOUT,
};
pub use error::{SessionError, SessionResult};
pub use pipeline::CapturePipeline;
pub use session::{LiveSession, SessionEvent, SessionEventKind, SessionState};
pub use stats::{SessionStats, StatsSnapshot};
pub use transport::{
    ChunkSender, SendRejected, SessionTransport, TransportEvents, SEND_QUEUE_CAPACITY,
};
