//! PCM-Framing-Codec
//!
//! Wandelt zwischen f32-Samples (-1.0..1.0) und 16-Bit-PCM (little-endian)
//! und zwischen Binaerdaten und der Base64-Transportkodierung.
//!
//! Quantisierung: Sample * 32768, auf den i16-Bereich begrenzt, dann
//! Richtung Null abgeschnitten. Werte ausserhalb von -1.0..1.0 werden also
//! geclippt statt umzubrechen; NaN wird zu Stille.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::{Buf, BufMut, BytesMut};
use sternfunk_core::{EncodedChunk, OUTBOUND_SAMPLE_RATE};

use crate::error::{AudioError, AudioResult};

/// Skalierungsfaktor zwischen f32 und i16
const PCM_SKALA: f32 = 32768.0;

/// Dekodierter, abspielbarer Audio-Puffer (ein Vec pro Kanal)
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl AudioBuffer {
    /// Erstellt einen Puffer aus bereits getrennten Kanaelen
    ///
    /// Alle Kanaele muessen gleich lang sein.
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> AudioResult<Self> {
        if sample_rate == 0 {
            return Err(AudioError::Konfiguration("Abtastrate 0".into()));
        }
        if channels.is_empty() {
            return Err(AudioError::Konfiguration("Puffer ohne Kanaele".into()));
        }
        let laenge = channels[0].len();
        if channels.iter().any(|c| c.len() != laenge) {
            return Err(AudioError::Konfiguration(
                "Kanaele haben unterschiedliche Laengen".into(),
            ));
        }
        Ok(Self {
            sample_rate,
            channels,
        })
    }

    /// Mono-Puffer
    pub fn mono(sample_rate: u32, samples: Vec<f32>) -> AudioResult<Self> {
        Self::new(sample_rate, vec![samples])
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Anzahl Frames (Samples pro Kanal)
    pub fn frames(&self) -> usize {
        self.channels[0].len()
    }

    /// Dauer in Sekunden
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Samples eines Kanals
    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// Mittelwert aller Kanaele an einer Frame-Position
    pub fn mono_sample(&self, frame: usize) -> f32 {
        let summe: f32 = self.channels.iter().map(|c| c[frame]).sum();
        summe / self.channels.len() as f32
    }
}

/// Quantisiert ein Sample auf i16 (geclippt, Richtung Null abgeschnitten)
fn quantisieren(sample: f32) -> i16 {
    let skaliert = sample * PCM_SKALA;
    if skaliert.is_nan() {
        return 0;
    }
    skaliert.clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Packt f32-Samples als 16-Bit-PCM little-endian
pub fn samples_to_pcm_bytes(samples: &[f32]) -> Vec<u8> {
    let mut pcm = BytesMut::with_capacity(samples.len() * 2);
    for &s in samples {
        pcm.put_i16_le(quantisieren(s));
    }
    pcm.to_vec()
}

/// Kodiert einen Mikrofon-Frame fuer den Upload (16 kHz Mono)
pub fn encode_outbound(samples: &[f32]) -> EncodedChunk {
    let pcm = samples_to_pcm_bytes(samples);
    EncodedChunk::new(BASE64.encode(pcm), OUTBOUND_SAMPLE_RATE, 1)
}

/// Dekodiert einen eingehenden Block in einen abspielbaren Puffer
///
/// Fehler wenn Base64 ungueltig ist, `channels == 0` oder die Bytelaenge
/// kein Vielfaches von `2 * channels` ist.
pub fn decode_inbound(
    chunk: &EncodedChunk,
    sample_rate: u32,
    channels: u16,
) -> AudioResult<AudioBuffer> {
    if channels == 0 {
        return Err(AudioError::Dekodierung("Kanalanzahl 0".into()));
    }
    let bytes = BASE64
        .decode(chunk.data.as_bytes())
        .map_err(|e| AudioError::Dekodierung(format!("Base64 ungueltig: {e}")))?;

    let block = 2 * channels as usize;
    if bytes.len() % block != 0 {
        return Err(AudioError::Dekodierung(format!(
            "{} Bytes sind kein Vielfaches von {} ({} Kanaele)",
            bytes.len(),
            block,
            channels
        )));
    }

    let frames = bytes.len() / block;
    let mut kanaele = vec![Vec::with_capacity(frames); channels as usize];
    let mut buf = bytes.as_slice();
    for _ in 0..frames {
        for kanal in kanaele.iter_mut() {
            kanal.push(buf.get_i16_le() as f32 / PCM_SKALA);
        }
    }

    AudioBuffer::new(sample_rate, kanaele)
        .map_err(|e| AudioError::Dekodierung(e.to_string()))
}
