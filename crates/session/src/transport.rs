//! Schnittstelle zwischen Sitzung und Transport
//!
//! Ein Transport meldet alles ueber [`TransportEvents`]; die Ereignisse
//! tragen die Session-ID, damit Nachzuegler einer beendeten Sitzung
//! erkannt werden. Gesendet wird nur ueber einen [`ChunkSender`], den es
//! erst nach `Open` gibt.

use sternfunk_core::{EncodedChunk, LiveConfig, ServerMessage, SessionId, TransportEvent};
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::SessionResult;
use crate::session::SessionEvent;

/// Kapazitaet der Sendewarteschlange (Frames)
pub const SEND_QUEUE_CAPACITY: usize = 256;

/// Bidirektionaler Transport zum Modell
pub trait SessionTransport: Send {
    /// Startet den Verbindungsaufbau
    ///
    /// Sofortige Fehler (z.B. fehlender API-Key) kommen als `Err` zurueck,
    /// alles Weitere als Ereignis ueber `events`.
    fn open(&mut self, config: &LiveConfig, events: TransportEvents) -> SessionResult<()>;

    /// Sender fuer Mikrofon-Bloecke, erst nach `Open` verfuegbar
    fn sender(&self) -> Option<ChunkSender>;

    /// Schliesst die Verbindung. Mehrfacher Aufruf ist unschaedlich.
    fn close(&mut self);
}

/// Meldet Transport-Ereignisse getaggt mit der Session-ID
#[derive(Debug, Clone)]
pub struct TransportEvents {
    session: SessionId,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl TransportEvents {
    pub fn new(session: SessionId, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Liefert ein Ereignis aus. `false` wenn der Controller nicht mehr lauscht.
    pub fn emit(&self, event: TransportEvent) -> bool {
        trace!(session = %self.session, ?event, "Transport-Ereignis");
        self.tx
            .send(SessionEvent::transport(self.session, event))
            .is_ok()
    }

    pub fn opened(&self) -> bool {
        self.emit(TransportEvent::Open)
    }

    pub fn message(&self, message: ServerMessage) -> bool {
        self.emit(TransportEvent::Message(message))
    }

    pub fn error(&self, cause: impl Into<String>) -> bool {
        self.emit(TransportEvent::Error(cause.into()))
    }

    pub fn closed(&self) -> bool {
        self.emit(TransportEvent::Close)
    }
}

/// Warum ein Block nicht in die Warteschlange passte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendRejected {
    Full,
    Closed,
}

/// Nicht-blockierender Sender fuer Mikrofon-Bloecke
///
/// Darf aus dem Capture-Thread heraus benutzt werden.
#[derive(Debug, Clone)]
pub struct ChunkSender {
    tx: mpsc::Sender<EncodedChunk>,
}

impl ChunkSender {
    /// Neue Warteschlange; der Empfaenger gehoert der Sende-Schleife des Transports
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<EncodedChunk>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn send(&self, chunk: EncodedChunk) -> Result<(), SendRejected> {
        self.tx.try_send(chunk).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendRejected::Full,
            mpsc::error::TrySendError::Closed(_) => SendRejected::Closed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
