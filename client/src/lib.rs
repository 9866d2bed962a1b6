//! sternfunk-client – Bibliotheks-Root
//!
//! Verdrahtet Mikrofon, Lautsprecher, Live-Transport und den
//! Session-Controller und bedient ihn ueber Befehle auf stdin.

pub mod config;
pub mod logging;

use anyhow::{Context, Result};
use std::sync::Arc;
use sternfunk_audio::{list_all_devices, CpalInput, CpalOutput};
use sternfunk_session::{
    AudioDevices, SessionController, SessionState, SessionStatus, SessionTransport,
};
use sternfunk_transport::LiveTransport;
use tokio::io::{AsyncBufReadExt, BufReader};

use config::ClientConfig;

/// Befehle auf stdin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Befehl {
    Start,
    Stop,
    Status,
    Geraete,
    Hilfe,
    Beenden,
}

impl Befehl {
    /// Parst eine Eingabezeile. Leere oder unbekannte Zeilen ergeben `None`.
    pub fn parsen(zeile: &str) -> Option<Self> {
        match zeile.trim().to_lowercase().as_str() {
            "start" | "s" => Some(Self::Start),
            "stop" | "x" => Some(Self::Stop),
            "status" => Some(Self::Status),
            "geraete" | "devices" => Some(Self::Geraete),
            "hilfe" | "help" | "?" => Some(Self::Hilfe),
            "quit" | "exit" | "q" => Some(Self::Beenden),
            _ => None,
        }
    }
}

const HILFE: &str = "Befehle: start, stop, status, geraete, hilfe, quit";

/// Statuszeile fuer das Terminal
pub fn status_zeile(status: &SessionStatus) -> String {
    let mut zeile = match status.state {
        SessionState::Idle => "Bereit".to_string(),
        SessionState::Connecting => "Verbinde...".to_string(),
        SessionState::Active => "Live, bitte sprechen".to_string(),
        SessionState::Closed => "Sitzung beendet".to_string(),
        SessionState::Error => "Fehler".to_string(),
    };
    if let Some(fehler) = &status.last_error {
        if !status.is_live && !status.loading {
            zeile.push_str(&format!(" ({fehler})"));
        }
    }
    zeile
}

/// Haelt den laufenden Client zusammen
pub struct Client {
    pub config: ClientConfig,
}

impl Client {
    /// Erstellt einen neuen Client aus der gegebenen Konfiguration
    pub fn neu(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Oeffnet die Audio-Geraete und bedient Befehle bis `quit`, EOF oder Ctrl-C
    pub async fn starten(self) -> Result<()> {
        let ausgabe = Arc::new(
            CpalOutput::open(self.config.playback_config())
                .context("Audio-Ausgabe konnte nicht geoeffnet werden")?,
        );
        let mikrofon = Arc::new(CpalInput::new(self.config.capture_config()));

        let mut controller = SessionController::new(
            self.config.controller_config(),
            AudioDevices {
                input: mikrofon,
                output: ausgabe.clone(),
                clock: ausgabe,
            },
            Box::new(|| Box::new(LiveTransport::new()) as Box<dyn SessionTransport>),
        );

        let mut status_rx = controller.subscribe();
        let anzeige = tokio::spawn(async move {
            while status_rx.changed().await.is_ok() {
                let status = status_rx.borrow_and_update().clone();
                println!("[sternfunk] {}", status_zeile(&status));
            }
        });

        tracing::info!(
            model = %self.config.live.dienst.model,
            voice = %self.config.live.dienst.voice,
            "Client bereit"
        );
        println!("{HILFE}");

        let mut zeilen = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                ereignis = controller.next_event() => match ereignis {
                    Some(ev) => controller.handle_event(ev),
                    None => break,
                },
                zeile = zeilen.next_line() => {
                    let Some(zeile) = zeile.context("stdin nicht lesbar")? else {
                        tracing::info!("stdin geschlossen");
                        break;
                    };
                    match Befehl::parsen(&zeile) {
                        Some(Befehl::Start) => {
                            // Fehler landen bereits im Status
                            if let Err(e) = controller.start() {
                                tracing::debug!("Start fehlgeschlagen: {}", e);
                            }
                        }
                        Some(Befehl::Stop) => controller.stop(),
                        Some(Befehl::Status) => {
                            println!("[sternfunk] {}", status_zeile(&controller.status()));
                            if let Some(session) = controller.session() {
                                println!("[sternfunk] {:?}", session.stats());
                            }
                        }
                        Some(Befehl::Geraete) => geraete_ausgeben(),
                        Some(Befehl::Hilfe) => println!("{HILFE}"),
                        Some(Befehl::Beenden) => break,
                        None if zeile.trim().is_empty() => {}
                        None => println!("Unbekannter Befehl. {HILFE}"),
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Ctrl-C empfangen, Client wird beendet");
                    break;
                }
            }
        }

        controller.stop();
        drop(controller);
        anzeige.abort();
        Ok(())
    }
}

fn geraete_ausgeben() {
    match list_all_devices() {
        Ok(geraete) if geraete.is_empty() => println!("Keine Audio-Geraete gefunden"),
        Ok(geraete) => {
            for g in geraete {
                println!("  {g}");
            }
        }
        Err(e) => println!("Geraete nicht abrufbar: {e}"),
    }
}
