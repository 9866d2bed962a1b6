//! Eine Live-Sitzung und ihr Ereignis-Strom
//!
//! `LiveSession` buendelt alles, was zu genau einer Verbindung gehoert:
//! Transport, Capture-Pipeline, Playback-Scheduler und Zaehler. Sie wird
//! exklusiv vom [`SessionController`](crate::SessionController) besessen
//! und beim Ende komplett verworfen.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use sternfunk_audio::{AudioError, PlaybackScheduler};
use sternfunk_core::{ServerMessage, SessionId, TransportEvent};
use tracing::{debug, info, warn};

use crate::error::{SessionError, SessionResult};
use crate::pipeline::CapturePipeline;
use crate::stats::{SessionStats, StatsSnapshot};
use crate::transport::SessionTransport;

/// Lebenszyklus einer Sitzung
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Active,
    Closed,
    Error,
}

impl SessionState {
    /// Darf aus diesem Zustand neu gestartet werden?
    pub fn can_start(self) -> bool {
        matches!(self, Self::Idle | Self::Closed)
    }

    /// Laeuft eine Verbindung (oder wird aufgebaut)?
    pub fn is_live(self) -> bool {
        matches!(self, Self::Connecting | Self::Active)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Closed => "closed",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Art eines Sitzungs-Ereignisses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEventKind {
    Transport(TransportEvent),
    /// Ein Block wurde natuerlich zu Ende gespielt
    PlaybackEnded(u64),
}

/// Ereignis, getaggt mit der erzeugenden Sitzung
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub session: SessionId,
    pub kind: SessionEventKind,
}

impl SessionEvent {
    pub fn transport(session: SessionId, event: TransportEvent) -> Self {
        Self {
            session,
            kind: SessionEventKind::Transport(event),
        }
    }

    pub fn playback_ended(session: SessionId, handle: u64) -> Self {
        Self {
            session,
            kind: SessionEventKind::PlaybackEnded(handle),
        }
    }
}

pub struct LiveSession {
    id: SessionId,
    state: SessionState,
    started_at: DateTime<Utc>,
    transport: Box<dyn SessionTransport>,
    pipeline: CapturePipeline,
    scheduler: PlaybackScheduler,
    stats: Arc<SessionStats>,
    beendet: bool,
}

impl LiveSession {
    /// Neue Sitzung im Zustand `Connecting`
    ///
    /// Mikrofon und Transport sind zu diesem Zeitpunkt bereits angefordert.
    pub fn new(
        id: SessionId,
        transport: Box<dyn SessionTransport>,
        pipeline: CapturePipeline,
        scheduler: PlaybackScheduler,
        stats: Arc<SessionStats>,
    ) -> Self {
        Self {
            id,
            state: SessionState::Connecting,
            started_at: Utc::now(),
            transport,
            pipeline,
            scheduler,
            stats,
            beendet: false,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn scheduler(&self) -> &PlaybackScheduler {
        &self.scheduler
    }

    pub fn pipeline(&self) -> &CapturePipeline {
        &self.pipeline
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Transport ist offen: Capture mit dem aufgebauten Sender starten
    pub fn activate(&mut self) -> SessionResult<()> {
        if self.state != SessionState::Connecting {
            return Err(SessionError::InvalidState(format!(
                "Open im Zustand {}",
                self.state
            )));
        }
        let sender = self.transport.sender().ok_or_else(|| {
            SessionError::InvalidState("Transport meldet Open ohne Sender".into())
        })?;
        self.pipeline.start(sender)?;
        self.state = SessionState::Active;
        info!(session = %self.id, "Sitzung aktiv");
        Ok(())
    }

    /// Verarbeitet eine eingehende Nachricht
    ///
    /// Audio wird vor dem Unterbrechungs-Signal behandelt. Dekodierfehler
    /// verwerfen nur den Block; nur eine nicht mehr erreichbare Ausgabe
    /// ist ein Fehler.
    pub fn handle_message(&mut self, message: ServerMessage) -> SessionResult<()> {
        if self.state != SessionState::Active {
            debug!(session = %self.id, state = %self.state, "Nachricht ausserhalb von Active ignoriert");
            return Ok(());
        }

        if let Some(chunk) = message.audio {
            match self.scheduler.schedule_chunk(&chunk) {
                Ok(handle) => {
                    self.stats.chunk_scheduled();
                    debug!(
                        session = %self.id,
                        handle = handle.id(),
                        start = handle.start_time(),
                        dauer = handle.duration(),
                        "Antwort-Block geplant"
                    );
                }
                Err(AudioError::Dekodierung(e)) => {
                    self.stats.chunk_dropped();
                    warn!(session = %self.id, "Antwort-Block verworfen: {}", e);
                }
                Err(e) => return Err(e.into()),
            }
        }

        if message.interrupted {
            let gestoppt = self.scheduler.interrupt();
            self.stats.interruption();
            info!(session = %self.id, gestoppt, "Unterbrechung durch Gegenseite");
        }
        Ok(())
    }

    /// Natuerliches Ende eines Blocks
    pub fn playback_ended(&mut self, handle: u64) -> bool {
        self.scheduler.on_playback_ended(handle)
    }

    /// Baut alles ab: Wiedergabe stoppen, Mikrofon frei, Transport zu
    ///
    /// Mehrfacher Aufruf ist unschaedlich. Gibt die Zaehler zurueck.
    pub fn shutdown(&mut self, endzustand: SessionState) -> StatsSnapshot {
        if !self.beendet {
            self.scheduler.stop_all();
            self.pipeline.stop();
            self.transport.close();
            self.beendet = true;
        }
        self.state = endzustand;
        let stats = self.stats.snapshot();
        info!(
            session = %self.id,
            state = %self.state,
            dauer_s = (Utc::now() - self.started_at).num_seconds(),
            frames_sent = stats.frames_sent,
            frames_dropped = stats.frames_dropped,
            chunks_scheduled = stats.chunks_scheduled,
            chunks_dropped = stats.chunks_dropped,
            interruptions = stats.interruptions,
            "Sitzung beendet"
        );
        stats
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        if !self.beendet {
            self.shutdown(SessionState::Closed);
        }
    }
}
