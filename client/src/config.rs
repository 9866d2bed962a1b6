//! Client-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! Standardwerte, der Client laeuft also auch ohne Konfigurationsdatei.
//! Der API-Schluessel steht nie in der Datei, nur der Name der
//! Umgebungsvariable.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use sternfunk_audio::{CaptureConfig, PlaybackConfig, DEFAULT_FRAME_SIZE};
use sternfunk_core::{LiveConfig, OUTBOUND_SAMPLE_RATE};
use sternfunk_session::ControllerConfig;

use crate::logging::{log_format_gueltig, log_level_gueltig};

/// Vollstaendige Client-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Verbindung zum Live-Dienst
    pub live: LiveEinstellungen,
    /// Audio-Geraete
    pub audio: AudioEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
}

/// Verbindung zum Live-Dienst
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveEinstellungen {
    #[serde(flatten)]
    pub dienst: LiveConfig,
    /// Zeitlimit fuer den Verbindungsaufbau in Sekunden
    pub connect_timeout_sek: u64,
}

impl Default for LiveEinstellungen {
    fn default() -> Self {
        Self {
            dienst: LiveConfig::default(),
            connect_timeout_sek: 15,
        }
    }
}

/// Audio-Geraete
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioEinstellungen {
    /// Eingabegeraet (Namensteil, leer = Standard)
    pub eingabegeraet: Option<String>,
    /// Ausgabegeraet (Namensteil, leer = Standard)
    pub ausgabegeraet: Option<String>,
    /// Samples pro Mikrofon-Frame
    pub frame_groesse: usize,
    /// Abtastrate der Lautsprecher-Ausgabe (der Mixer passt Antworten an)
    pub ausgabe_rate: u32,
    /// Kanaele der Lautsprecher-Ausgabe
    pub ausgabe_kanaele: u16,
}

impl Default for AudioEinstellungen {
    fn default() -> Self {
        Self {
            eingabegeraet: None,
            ausgabegeraet: None,
            frame_groesse: DEFAULT_FRAME_SIZE,
            ausgabe_rate: 48_000,
            ausgabe_kanaele: 2,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level (trace, debug, info, warn, error)
    pub level: String,
    /// Log-Format (text, json)
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl ClientConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei
    ///
    /// Fehlt die Datei, werden Standardwerte verwendet.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                config.pruefen()?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Prueft Werte, die serde nicht abfangen kann
    pub fn pruefen(&self) -> anyhow::Result<()> {
        if self.audio.frame_groesse == 0 {
            anyhow::bail!("audio.frame_groesse muss groesser als 0 sein");
        }
        if self.audio.ausgabe_rate == 0 || self.audio.ausgabe_kanaele == 0 {
            anyhow::bail!("audio.ausgabe_rate und audio.ausgabe_kanaele muessen groesser als 0 sein");
        }
        if self.live.connect_timeout_sek == 0 {
            anyhow::bail!("live.connect_timeout_sek muss groesser als 0 sein");
        }
        if !log_level_gueltig(&self.logging.level) {
            anyhow::bail!(
                "logging.level '{}' ungueltig (trace, debug, info, warn, error)",
                self.logging.level
            );
        }
        if !log_format_gueltig(&self.logging.format) {
            anyhow::bail!("logging.format '{}' ungueltig (text, json)", self.logging.format);
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.live.connect_timeout_sek)
    }

    /// Einstellungen fuer den Session-Controller
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            live: self.live.dienst.clone(),
            connect_timeout: self.connect_timeout(),
            ..ControllerConfig::default()
        }
    }

    /// Mikrofon: Frames immer 16 kHz Mono, das Geraet darf anders liefern
    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            sample_rate: OUTBOUND_SAMPLE_RATE,
            frame_size: self.audio.frame_groesse,
            buffer_size: (self.audio.frame_groesse * 8).max(OUTBOUND_SAMPLE_RATE as usize * 2),
            device: self.audio.eingabegeraet.clone(),
        }
    }

    pub fn playback_config(&self) -> PlaybackConfig {
        PlaybackConfig {
            sample_rate: self.audio.ausgabe_rate,
            channels: self.audio.ausgabe_kanaele,
            device: self.audio.ausgabegeraet.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_config_ist_valide() {
        let cfg = ClientConfig::default();
        assert!(cfg.pruefen().is_ok());
        assert_eq!(cfg.live.connect_timeout_sek, 15);
        assert_eq!(cfg.live.dienst.voice, "Zephyr");
        assert_eq!(cfg.audio.frame_groesse, 4096);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn config_aus_toml_string() {
        let toml = r#"
            [live]
            voice = "Puck"
            connect_timeout_sek = 5

            [audio]
            eingabegeraet = "USB"
            frame_groesse = 2048

            [logging]
            format = "json"
        "#;
        let cfg: ClientConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.live.dienst.voice, "Puck");
        assert_eq!(cfg.connect_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.audio.eingabegeraet.as_deref(), Some("USB"));
        assert_eq!(cfg.logging.format, "json");
        // Nicht angegebene Felder behalten Standardwerte
        assert_eq!(cfg.live.dienst.api_key_env, "STERNFUNK_API_KEY");
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.audio.ausgabe_rate, 48_000);
    }

    #[test]
    fn fehlende_datei_ergibt_standardwerte() {
        let cfg = ClientConfig::laden("/nicht/vorhanden/sternfunk.toml").unwrap();
        assert_eq!(cfg.live.connect_timeout_sek, 15);
    }

    #[test]
    fn ungueltige_werte_werden_abgelehnt() {
        let mut cfg = ClientConfig::default();
        cfg.audio.frame_groesse = 0;
        assert!(cfg.pruefen().is_err());

        let mut cfg = ClientConfig::default();
        cfg.live.connect_timeout_sek = 0;
        assert!(cfg.pruefen().is_err());
    }

    #[test]
    fn ungueltige_logging_werte_abgelehnt() {
        let cfg: ClientConfig = toml::from_str("[logging]\nlevel = \"verbose\"").unwrap();
        let err = cfg.pruefen().unwrap_err();
        assert!(err.to_string().contains("logging.level"));

        let mut cfg = ClientConfig::default();
        cfg.logging.format = "xml".into();
        assert!(cfg.pruefen().is_err());
        cfg.logging.format = "json".into();
        cfg.logging.level = "debug".into();
        assert!(cfg.pruefen().is_ok());
    }

    #[test]
    fn abgeleitete_audio_konfiguration() {
        let cfg: ClientConfig = toml::from_str("[audio]\nframe_groesse = 1024").unwrap();
        let capture = cfg.capture_config();
        assert_eq!(capture.sample_rate, 16_000);
        assert_eq!(capture.frame_size, 1024);
        assert!(capture.buffer_size > capture.frame_size);
        let playback = cfg.playback_config();
        assert_eq!(playback.channels, 2);
        assert_eq!(cfg.controller_config().connect_timeout, Duration::from_secs(15));
    }
}
