//! Session-Controller: Start/Stop und die einzige Zustandsuebergangsfunktion
//!
//! Alle Uebergaenge passieren in [`SessionController::handle_event`], das
//! sequentiell aus einem Task aufgerufen wird:
//!
//! ```text
//! while let Some(ev) = controller.next_event().await {
//!     controller.handle_event(ev);
//! }
//! ```
//!
//! Geraete-Callbacks und Transport-Tasks schicken nur Ereignisse, sie
//! beruehren den Zustand nie direkt.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use sternfunk_audio::{AudioInput, OutputClock, PlaybackScheduler, PlaybackSink};
use sternfunk_core::{LiveConfig, SessionId, TransportEvent, INBOUND_SAMPLE_RATE};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, trace};

use crate::error::{SessionError, SessionResult};
use crate::pipeline::CapturePipeline;
use crate::session::{LiveSession, SessionEvent, SessionEventKind, SessionState};
use crate::stats::SessionStats;
use crate::transport::{SessionTransport, TransportEvents};

/// Standard-Zeitlimit fuer den Verbindungsaufbau
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Erzeugt pro Sitzung einen frischen Transport
pub type TransportFactory = Box<dyn Fn() -> Box<dyn SessionTransport> + Send + Sync>;

/// Einstellungen des Controllers
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub live: LiveConfig,
    pub connect_timeout: Duration,
    /// Abtastrate der eingehenden Antwort-Bloecke
    pub inbound_sample_rate: u32,
    pub inbound_channels: u16,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            live: LiveConfig::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            inbound_sample_rate: INBOUND_SAMPLE_RATE,
            inbound_channels: 1,
        }
    }
}

/// Von der Oberflaeche beobachtbarer Zustand
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub is_live: bool,
    pub loading: bool,
    pub session_id: Option<SessionId>,
    pub started_at: Option<DateTime<Utc>>,
    /// Letzte Fehlermeldung fuer die Oberflaeche
    pub last_error: Option<String>,
}

/// Prozessweite Audio-Ressourcen
#[derive(Clone)]
pub struct AudioDevices {
    pub input: Arc<dyn AudioInput>,
    pub output: Arc<dyn PlaybackSink>,
    pub clock: Arc<dyn OutputClock>,
}

pub struct SessionController {
    config: ControllerConfig,
    devices: AudioDevices,
    transports: TransportFactory,
    session: Option<LiveSession>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    connect_deadline: Option<Instant>,
    status_tx: watch::Sender<SessionStatus>,
}

impl SessionController {
    pub fn new(config: ControllerConfig, devices: AudioDevices, transports: TransportFactory) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = watch::channel(SessionStatus::default());
        Self {
            config,
            devices,
            transports,
            session: None,
            events_tx,
            events_rx,
            connect_deadline: None,
            status_tx,
        }
    }

    /// Beobachter fuer den Sitzungszustand
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    pub fn status(&self) -> SessionStatus {
        self.status_tx.borrow().clone()
    }

    pub fn state(&self) -> SessionState {
        self.status_tx.borrow().state
    }

    pub fn session(&self) -> Option<&LiveSession> {
        self.session.as_ref()
    }

    /// Startet eine neue Sitzung
    ///
    /// Eine laufende Sitzung wird vorher abgebaut. Schlaegt Mikrofon oder
    /// Verbindungsaufbau fehl, wird alles Angeforderte zurueckgerollt.
    pub fn start(&mut self) -> SessionResult<SessionId> {
        if self.session.is_some() {
            info!("Laufende Sitzung wird vor Neustart beendet");
            self.stop();
        }

        let id = SessionId::new();
        info!(session = %id, "Sitzung wird gestartet");
        self.publish(|s| {
            *s = SessionStatus {
                state: SessionState::Connecting,
                loading: true,
                session_id: Some(id),
                ..SessionStatus::default()
            };
        });

        let stats = Arc::new(SessionStats::default());
        let mut pipeline = CapturePipeline::new(Arc::clone(&self.devices.input), Arc::clone(&stats));
        if let Err(e) = pipeline.acquire() {
            self.fail(id, e.clone());
            return Err(e);
        }

        let mut transport = (self.transports)();
        let events = TransportEvents::new(id, self.events_tx.clone());
        if let Err(e) = transport.open(&self.config.live, events) {
            transport.close();
            pipeline.stop();
            self.fail(id, e.clone());
            return Err(e);
        }

        let tx = self.events_tx.clone();
        let scheduler = PlaybackScheduler::new(
            Arc::clone(&self.devices.output),
            Arc::clone(&self.devices.clock),
        )
        .with_format(self.config.inbound_sample_rate, self.config.inbound_channels)
        .with_ended_notifier(Arc::new(move |handle| {
            let _ = tx.send(SessionEvent::playback_ended(id, handle));
        }));

        let session = LiveSession::new(id, transport, pipeline, scheduler, stats);
        let started_at = session.started_at();
        self.session = Some(session);
        self.connect_deadline = Some(Instant::now() + self.config.connect_timeout);
        self.publish(|s| s.started_at = Some(started_at));
        Ok(id)
    }

    /// Beendet die laufende Sitzung. Ohne Sitzung ein No-op.
    pub fn stop(&mut self) {
        let Some(mut session) = self.session.take() else {
            trace!("stop() ohne laufende Sitzung");
            return;
        };
        self.connect_deadline = None;
        session.shutdown(SessionState::Closed);
        self.publish(|s| {
            s.state = SessionState::Closed;
            s.is_live = false;
            s.loading = false;
        });
    }

    /// Wartet auf das naechste Ereignis
    ///
    /// Laeuft dabei das Zeitlimit des Verbindungsaufbaus ab, wird der
    /// Versuch hier abgebrochen und weiter gewartet.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        loop {
            match self.connect_deadline {
                Some(deadline) => {
                    tokio::select! {
                        ev = self.events_rx.recv() => return ev,
                        _ = tokio::time::sleep_until(deadline) => self.connect_timed_out(),
                    }
                }
                None => return self.events_rx.recv().await,
            }
        }
    }

    /// Einzige Zustandsuebergangsfunktion
    pub fn handle_event(&mut self, event: SessionEvent) {
        let Some(session) = self.session.as_mut() else {
            trace!(session = %event.session, "Ereignis ohne laufende Sitzung ignoriert");
            return;
        };
        if event.session != session.id() {
            debug!(
                ereignis = %event.session,
                aktuell = %session.id(),
                "Ereignis einer alten Sitzung ignoriert"
            );
            return;
        }

        match event.kind {
            SessionEventKind::Transport(TransportEvent::Open) => {
                if session.state() != SessionState::Connecting {
                    debug!(state = %session.state(), "Open ausserhalb von Connecting ignoriert");
                    return;
                }
                self.connect_deadline = None;
                match session.activate() {
                    Ok(()) => self.publish(|s| {
                        s.state = SessionState::Active;
                        s.is_live = true;
                        s.loading = false;
                    }),
                    Err(e) => self.abort(e),
                }
            }
            SessionEventKind::Transport(TransportEvent::Message(message)) => {
                if let Err(e) = session.handle_message(message) {
                    self.abort(e);
                }
            }
            SessionEventKind::Transport(TransportEvent::Error(cause)) => {
                let e = if session.state() == SessionState::Connecting {
                    SessionError::TransportOpen(cause)
                } else {
                    SessionError::TransportRuntime(cause)
                };
                self.abort(e);
            }
            SessionEventKind::Transport(TransportEvent::Close) => {
                info!(session = %session.id(), "Verbindung von Gegenseite geschlossen");
                self.stop();
            }
            SessionEventKind::PlaybackEnded(handle) => {
                if !session.playback_ended(handle) {
                    trace!(handle, "Ende eines nicht mehr geplanten Blocks ignoriert");
                }
            }
        }
    }

    fn connect_timed_out(&mut self) {
        self.connect_deadline = None;
        let connecting = self
            .session
            .as_ref()
            .is_some_and(|s| s.state() == SessionState::Connecting);
        if connecting {
            self.abort(SessionError::ConnectTimeout(self.config.connect_timeout));
        }
    }

    /// Fataler Fehler in der laufenden Sitzung: Error -> Closed
    fn abort(&mut self, e: SessionError) {
        self.connect_deadline = None;
        let Some(mut session) = self.session.take() else {
            return;
        };
        let id = session.id();
        session.shutdown(SessionState::Error);
        drop(session);
        self.fail(id, e);
    }

    fn fail(&mut self, id: SessionId, e: SessionError) {
        error!(session = %id, "Sitzung fehlgeschlagen: {}", e);
        let meldung = e.user_message().to_string();
        self.publish(|s| {
            s.state = SessionState::Error;
            s.is_live = false;
            s.loading = false;
            s.last_error = Some(meldung);
        });
        self.publish(|s| s.state = SessionState::Closed);
    }

    fn publish(&self, f: impl FnOnce(&mut SessionStatus)) {
        self.status_tx.send_modify(f);
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.stop();
    }
}
