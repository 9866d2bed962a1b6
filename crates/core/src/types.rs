//! Gemeinsame Datentypen fuer Sternfunk
//!
//! Die Session-ID nutzt das Newtype-Pattern, damit Ereignisse alter und
//! neuer Sessions zur Compilezeit nicht mit anderen UUIDs verwechselt werden.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Abtastrate des Mikrofon-Uploads (16 kHz Mono)
pub const OUTBOUND_SAMPLE_RATE: u32 = 16_000;

/// Abtastrate der Modell-Antworten (24 kHz Mono)
pub const INBOUND_SAMPLE_RATE: u32 = 24_000;

/// Eindeutige Session-ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Erstellt eine neue zufaellige SessionId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// EncodedChunk
// ---------------------------------------------------------------------------

/// Kodierter Audio-Block fuer die Leitung
///
/// `data` enthaelt 16-Bit-PCM (little-endian) in Base64. Wird fuer
/// ausgehende Mikrofon-Frames und eingehende Modell-Audio-Segmente genutzt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedChunk {
    /// Base64-kodierte PCM-Bytes
    pub data: String,
    /// Deklarierte Abtastrate in Hz
    pub sample_rate: u32,
    /// Deklarierte Kanalanzahl
    pub channels: u16,
}

impl EncodedChunk {
    pub fn new(data: impl Into<String>, sample_rate: u32, channels: u16) -> Self {
        Self {
            data: data.into(),
            sample_rate,
            channels,
        }
    }

    /// MIME-Typ fuer die Leitung, z.B. `audio/pcm;rate=16000`
    pub fn mime_type(&self) -> String {
        pcm_mime_type(self.sample_rate)
    }

    /// Laenge der Base64-Nutzlast in Zeichen
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Baut den PCM-MIME-Typ fuer eine Abtastrate
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={sample_rate}")
}

/// Liest die Abtastrate aus einem MIME-Typ wie `audio/pcm;rate=24000`
///
/// Gibt `None` zurueck wenn der Typ kein PCM ist oder keine Rate traegt.
pub fn rate_from_mime_type(mime: &str) -> Option<u32> {
    let mut teile = mime.split(';').map(str::trim);
    let basis = teile.next()?;
    if !basis.eq_ignore_ascii_case("audio/pcm") {
        return None;
    }
    teile
        .filter_map(|p| p.split_once('='))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("rate"))
        .and_then(|(_, v)| v.trim().parse().ok())
}

// ---------------------------------------------------------------------------
// LiveConfig
// ---------------------------------------------------------------------------

/// Standard-Endpunkt des bidirektionalen Live-Dienstes
pub const DEFAULT_LIVE_ENDPOINT: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Konfiguration einer Live-Verbindung (Modell, Stimme, Anweisung)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// WebSocket-Endpunkt
    pub endpoint: String,
    /// Modell-ID ohne `models/`-Praefix
    pub model: String,
    /// Name der vordefinierten Stimme
    pub voice: String,
    /// System-Anweisung fuer das Modell
    pub system_instruction: String,
    /// Name der Umgebungsvariable mit dem API-Schluessel
    pub api_key_env: String,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_LIVE_ENDPOINT.into(),
            model: "gemini-2.5-flash-native-audio-preview-09-2025".into(),
            voice: "Zephyr".into(),
            system_instruction: "You are a market expansion strategist for embedded \
                                 hardware and software. Support R&D colleagues with \
                                 market research. Keep a professional, concise tone."
                .into(),
            api_key_env: "STERNFUNK_API_KEY".into(),
        }
    }
}

impl LiveConfig {
    /// Liest den API-Schluessel aus der konfigurierten Umgebungsvariable
    pub fn api_key(&self) -> crate::Result<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                crate::SternfunkError::Konfiguration(format!(
                    "API-Schluessel fehlt (Umgebungsvariable {})",
                    self.api_key_env
                ))
            })
    }

    /// Modell-Name im Format des Dienstes (`models/<id>`)
    pub fn model_path(&self) -> String {
        if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        }
    }
}
