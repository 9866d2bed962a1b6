//! Wire-Format fuer die Live-Verbindung
//!
//! Jede Nachricht ist ein einzelnes JSON-Objekt in einem WebSocket-Frame.
//! Der Dienst schickt auch JSON-Steuernachrichten als Binary-Frames, daher
//! arbeitet der Parser auf Bytes.
//!
//! ## Ablauf
//!
//! ```text
//! Client                                   Dienst
//!   | -- {"setup": {...}} ------------------> |
//!   | <------------------ {"setupComplete":{}} |
//!   | -- {"realtimeInput":{"mediaChunks":..}}> |   (pro Mikrofon-Frame)
//!   | <--- {"serverContent":{"modelTurn":..}}  |   (Audio-Segmente)
//!   | <--- {"serverContent":{"interrupted":true}}
//!   | -- {"realtimeInput":{"audioStreamEnd":true}}
//! ```

use serde::{Deserialize, Serialize};
use sternfunk_core::{
    rate_from_mime_type, EncodedChunk, LiveConfig, Result, ServerMessage, INBOUND_SAMPLE_RATE,
};

// ---------------------------------------------------------------------------
// Ausgehende Nachrichten
// ---------------------------------------------------------------------------

/// Alle Nachrichten, die der Client an den Dienst sendet
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ClientMessage {
    Setup(SetupMessage),
    RealtimeInput(RealtimeInputMessage),
}

impl ClientMessage {
    /// Serialisiert die Nachricht zu einem JSON-String
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Erste Nachricht einer Verbindung
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetupMessage {
    pub setup: SetupPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupPayload {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextPart {
    pub text: String,
}

/// Echtzeit-Eingabe: Audio-Bloecke oder Stream-Ende
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub media_chunks: Vec<MediaChunk>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub audio_stream_end: bool,
}

/// Audio-Block mit MIME-Typ und Base64-Daten
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    pub mime_type: String,
    pub data: String,
}

/// Baut die Setup-Nachricht aus der Live-Konfiguration
pub fn build_setup_message(config: &LiveConfig) -> ClientMessage {
    let system_instruction = if config.system_instruction.trim().is_empty() {
        None
    } else {
        Some(Content {
            parts: vec![TextPart {
                text: config.system_instruction.clone(),
            }],
        })
    };

    ClientMessage::Setup(SetupMessage {
        setup: SetupPayload {
            model: config.model_path(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: config.voice.clone(),
                        },
                    },
                },
            },
            system_instruction,
        },
    })
}

/// Verpackt einen kodierten Mikrofon-Block als Echtzeit-Eingabe
pub fn build_audio_message(chunk: &EncodedChunk) -> ClientMessage {
    ClientMessage::RealtimeInput(RealtimeInputMessage {
        realtime_input: RealtimeInput {
            media_chunks: vec![MediaChunk {
                mime_type: chunk.mime_type(),
                data: chunk.data.clone(),
            }],
            audio_stream_end: false,
        },
    })
}

/// Signalisiert dem Dienst, dass das Mikrofon geschlossen wurde
pub fn build_audio_stream_end_message() -> ClientMessage {
    ClientMessage::RealtimeInput(RealtimeInputMessage {
        realtime_input: RealtimeInput {
            media_chunks: Vec::new(),
            audio_stream_end: true,
        },
    })
}

// ---------------------------------------------------------------------------
// Eingehende Nachrichten
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServerFrame {
    setup_complete: Option<serde_json::Value>,
    server_content: Option<RawServerContent>,
    error: Option<RawError>,
    go_away: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServerContent {
    model_turn: Option<RawModelTurn>,
    #[serde(default)]
    interrupted: bool,
    #[serde(default)]
    turn_complete: bool,
}

#[derive(Debug, Default, Deserialize)]
struct RawModelTurn {
    #[serde(default)]
    parts: Vec<RawPart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPart {
    inline_data: Option<RawInlineData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInlineData {
    mime_type: Option<String>,
    data: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawError {
    message: Option<String>,
}

/// Ausgewerteter Frame des Dienstes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerFrame {
    /// `setupComplete` empfangen – Verbindung ist bereit
    pub setup_complete: bool,
    /// Audio-Segmente in Empfangsreihenfolge
    pub audio: Vec<EncodedChunk>,
    /// Barge-in der Gegenseite
    pub interrupted: bool,
    /// Modell hat seinen Zug beendet
    pub turn_complete: bool,
    /// Fehlermeldung des Dienstes
    pub error: Option<String>,
    /// Dienst kuendigt das Verbindungsende an
    pub go_away: bool,
}

impl ServerFrame {
    /// Zerlegt den Frame in Session-Nachrichten
    ///
    /// Jedes Audio-Segment wird eine eigene Nachricht; das
    /// Unterbrechungs-Signal folgt nach dem Audio desselben Frames.
    pub fn into_messages(self) -> Vec<ServerMessage> {
        let mut messages: Vec<ServerMessage> =
            self.audio.into_iter().map(ServerMessage::audio).collect();
        if self.interrupted {
            match messages.last_mut() {
                Some(letzte) => letzte.interrupted = true,
                None => messages.push(ServerMessage::interrupted()),
            }
        }
        messages
    }
}

/// Parst einen Text- oder Binary-Frame des Dienstes
///
/// Audio-Segmente ohne Rate im MIME-Typ werden mit 24 kHz Mono angenommen.
pub fn parse_server_frame(bytes: &[u8]) -> Result<ServerFrame> {
    let raw: RawServerFrame = serde_json::from_slice(bytes)?;

    let mut frame = ServerFrame {
        setup_complete: raw.setup_complete.is_some(),
        go_away: raw.go_away.is_some(),
        ..Default::default()
    };

    if let Some(content) = raw.server_content {
        frame.interrupted = content.interrupted;
        frame.turn_complete = content.turn_complete;
        for part in content.model_turn.map(|t| t.parts).unwrap_or_default() {
            if let Some(inline) = part.inline_data {
                let rate = inline
                    .mime_type
                    .as_deref()
                    .and_then(rate_from_mime_type)
                    .unwrap_or(INBOUND_SAMPLE_RATE);
                if !inline.data.is_empty() {
                    frame.audio.push(EncodedChunk::new(inline.data, rate, 1));
                }
            }
        }
    }

    if let Some(err) = raw.error {
        frame.error = Some(
            err.message
                .unwrap_or_else(|| "Unbekannter Fehler des Dienstes".to_string()),
        );
    }

    Ok(frame)
}
