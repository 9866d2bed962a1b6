//! WebSocket-Client fuer den bidirektionalen Live-Endpunkt
//!
//! 1. Verbinden mit `<endpoint>?key=<api key>`
//! 2. Setup-Nachricht senden, auf `setupComplete` warten -> `Open`
//! 3. Sende-Schleife: Mikrofon-Bloecke als `realtimeInput.mediaChunks`
//! 4. Empfangs-Schleife: Audio, Unterbrechung, Fehler, Verbindungsende
//!
//! Beim Schliessen wird noch `audioStreamEnd` gesendet, dann ein
//! WebSocket-Close. Das Zeitlimit fuer den Aufbau setzt der Controller.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use sternfunk_core::{EncodedChunk, LiveConfig};
use sternfunk_protocol::{
    build_audio_message, build_audio_stream_end_message, build_setup_message, parse_server_frame,
};
use sternfunk_session::{
    ChunkSender, SessionResult, SessionTransport, TransportEvents, SEND_QUEUE_CAPACITY,
};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::{TransportError, TransportResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;
type WsSource = SplitStream<WsStream>;

/// Warum die Empfangs-Schleife endete
#[derive(Debug, PartialEq, Eq)]
enum Ende {
    /// Lokal geschlossen
    Lokal,
    /// Gegenseite hat geschlossen oder Fehler gemeldet
    Gegenseite,
}

/// Transport ueber tokio-tungstenite
#[derive(Default)]
pub struct LiveTransport {
    sender: Arc<Mutex<Option<ChunkSender>>>,
    shutdown: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl LiveTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Laeuft die Verbindungs-Task noch?
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn starten(&mut self, config: &LiveConfig, events: TransportEvents) -> TransportResult<()> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| TransportError::KeineRuntime)?;
        let url = live_url(&config.endpoint, &config.api_key()?)?;
        let setup = build_setup_message(config).to_json()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let slot = Arc::clone(&self.sender);

        info!(
            session = %events.session(),
            endpoint = %config.endpoint,
            model = %config.model,
            voice = %config.voice,
            "Verbinde mit Live-Dienst"
        );
        self.task = Some(runtime.spawn(verbindung(url, setup, events, slot, shutdown_rx)));
        self.shutdown = Some(shutdown_tx);
        Ok(())
    }
}

impl SessionTransport for LiveTransport {
    fn open(&mut self, config: &LiveConfig, events: TransportEvents) -> SessionResult<()> {
        if self.shutdown.is_some() {
            return Err(TransportError::Verbindung("Transport bereits geoeffnet".into()).into());
        }
        self.starten(config, events).map_err(Into::into)
    }

    fn sender(&self) -> Option<ChunkSender> {
        self.sender.lock().clone()
    }

    fn close(&mut self) {
        self.sender.lock().take();
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(true);
            debug!("Live-Transport wird geschlossen");
        }
    }
}

impl Drop for LiveTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Endpunkt-URL mit API-Schluessel als Query-Parameter
///
/// Der Schluessel wird prozentkodiert angehaengt, vorhandene Parameter
/// bleiben erhalten.
pub fn live_url(endpoint: &str, api_key: &str) -> TransportResult<String> {
    let mut url =
        Url::parse(endpoint).map_err(|e| TransportError::Endpunkt(format!("{endpoint}: {e}")))?;
    url.query_pairs_mut().append_pair("key", api_key);
    Ok(url.into())
}

/// Prueft einen Frame der Aufbauphase auf `setupComplete`
///
/// Fehlermeldungen des Dienstes brechen den Aufbau ab, unlesbare Frames
/// werden uebersprungen.
fn setup_bestaetigt(bytes: &[u8]) -> TransportResult<bool> {
    match parse_server_frame(bytes) {
        Ok(frame) => match frame.error {
            Some(meldung) => Err(TransportError::Setup(meldung)),
            None => Ok(frame.setup_complete),
        },
        Err(e) => {
            debug!("Frame in Aufbauphase nicht lesbar: {}", e);
            Ok(false)
        }
    }
}

async fn aufbauen(url: &str, setup: String) -> TransportResult<WsStream> {
    let (mut ws, _response) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| TransportError::Verbindung(e.to_string()))?;

    ws.send(WsMessage::Text(setup))
        .await
        .map_err(|e| TransportError::Verbindung(format!("Setup nicht gesendet: {e}")))?;

    while let Some(msg) = ws.next().await {
        let bestaetigt = match msg {
            Ok(WsMessage::Text(text)) => setup_bestaetigt(text.as_bytes())?,
            Ok(WsMessage::Binary(data)) => setup_bestaetigt(&data)?,
            Ok(WsMessage::Close(frame)) => {
                return Err(TransportError::VorzeitigBeendet(format!("{frame:?}")))
            }
            Ok(_) => false,
            Err(e) => return Err(TransportError::Verbindung(e.to_string())),
        };
        if bestaetigt {
            return Ok(ws);
        }
    }
    Err(TransportError::VorzeitigBeendet("Stream beendet".into()))
}

/// Lebenszyklus einer Verbindung (eigene Task)
async fn verbindung(
    url: String,
    setup: String,
    events: TransportEvents,
    slot: Arc<Mutex<Option<ChunkSender>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let session = events.session();
    let aufgebaut = tokio::select! {
        r = aufbauen(&url, setup) => r,
        _ = shutdown.changed() => {
            debug!(session = %session, "Aufbau lokal abgebrochen");
            return;
        }
    };
    let ws = match aufgebaut {
        Ok(ws) => ws,
        Err(e) => {
            warn!(session = %session, "Live-Dienst nicht erreichbar: {}", e);
            events.error(e.to_string());
            return;
        }
    };

    let (sender, rx) = ChunkSender::channel(SEND_QUEUE_CAPACITY);
    *slot.lock() = Some(sender);
    info!(session = %session, "Live-Verbindung bereit");
    events.opened();

    let (sink, source) = ws.split();
    let ausgang = tokio::spawn(sende_loop(sink, rx, shutdown.clone()));
    let ende = empfangs_loop(source, &events, shutdown).await;

    slot.lock().take();
    match ende {
        Ende::Lokal => {
            let _ = ausgang.await;
        }
        Ende::Gegenseite => ausgang.abort(),
    }
    debug!(session = %session, ?ende, "Live-Verbindung beendet");
}

async fn sende_loop(
    mut sink: WsSink,
    mut rx: mpsc::Receiver<EncodedChunk>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut gesendet: u64 = 0;
    loop {
        tokio::select! {
            chunk = rx.recv() => {
                let Some(chunk) = chunk else { break };
                let json = match build_audio_message(&chunk).to_json() {
                    Ok(j) => j,
                    Err(e) => {
                        warn!("Audio-Nachricht nicht serialisierbar: {}", e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(WsMessage::Text(json)).await {
                    warn!("Senden fehlgeschlagen, Sende-Schleife endet: {}", e);
                    break;
                }
                gesendet += 1;
                if gesendet == 1 || gesendet % 50 == 0 {
                    trace!(gesendet, bytes = chunk.len(), "Audio an Dienst gesendet");
                }
            }
            _ = shutdown.changed() => {
                if let Ok(json) = build_audio_stream_end_message().to_json() {
                    let _ = sink.send(WsMessage::Text(json)).await;
                }
                let _ = sink.close().await;
                break;
            }
        }
    }
    debug!(gesendet, "Sende-Schleife beendet");
}

async fn empfangs_loop(
    mut source: WsSource,
    events: &TransportEvents,
    mut shutdown: watch::Receiver<bool>,
) -> Ende {
    loop {
        let msg = tokio::select! {
            m = source.next() => m,
            _ = shutdown.changed() => return Ende::Lokal,
        };
        let bytes = match msg {
            Some(Ok(WsMessage::Text(text))) => text.into_bytes(),
            Some(Ok(WsMessage::Binary(data))) => data,
            Some(Ok(WsMessage::Close(frame))) => {
                info!(?frame, "Dienst hat die Verbindung geschlossen");
                events.closed();
                return Ende::Gegenseite;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                events.error(e.to_string());
                return Ende::Gegenseite;
            }
            None => {
                events.closed();
                return Ende::Gegenseite;
            }
        };

        let frame = match parse_server_frame(&bytes) {
            Ok(f) => f,
            Err(e) => {
                warn!("Frame des Dienstes nicht lesbar: {}", e);
                continue;
            }
        };
        if let Some(meldung) = frame.error.clone() {
            events.error(meldung);
            return Ende::Gegenseite;
        }
        if frame.go_away {
            info!("Dienst kuendigt Verbindungsende an");
        }
        if frame.turn_complete {
            trace!("Modell-Zug beendet");
        }
        for message in frame.into_messages() {
            if !events.message(message) {
                return Ende::Lokal;
            }
        }
    }
}
