//! Playback-Scheduler
//!
//! Dekodiert eingehende Audio-Bloecke und reiht sie lueckenlos auf der
//! gemeinsamen Ausgabe-Uhr aneinander. Jeder Block beginnt bei
//! `max(cursor, jetzt)`, danach rueckt der Cursor um genau die Blockdauer vor.
//! Eine Unterbrechung stoppt alle offenen Handles und setzt den Cursor auf 0.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace};

use sternfunk_core::{EncodedChunk, INBOUND_SAMPLE_RATE};

use crate::error::AudioResult;
use crate::pcm::decode_inbound;
use crate::playback::{OutputClock, PlaybackSink, ScheduledVoice, VoiceState};

/// Wird mit der Handle-ID aufgerufen, wenn ein Block natuerlich endet
pub type EndedNotifier = Arc<dyn Fn(u64) + Send + Sync>;

/// Ein geplanter (ausstehender oder laufender) Block
#[derive(Debug, Clone)]
pub struct PlaybackHandle {
    id: u64,
    start_time: f64,
    duration: f64,
    state: Arc<VoiceState>,
}

impl PlaybackHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Startzeit auf der Ausgabe-Uhr in Sekunden
    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    /// Bricht die Wiedergabe ab. Das Ende wird danach nie gemeldet.
    pub fn stop(&self) -> bool {
        self.state.stop()
    }

    pub fn is_stopped(&self) -> bool {
        self.state.is_stopped()
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }
}

/// Plant dekodierte Bloecke auf einer [`PlaybackSink`]
pub struct PlaybackScheduler {
    sink: Arc<dyn PlaybackSink>,
    clock: Arc<dyn OutputClock>,
    cursor: f64,
    handles: BTreeMap<u64, PlaybackHandle>,
    next_id: u64,
    sample_rate: u32,
    channels: u16,
    notifier: Option<EndedNotifier>,
}

impl PlaybackScheduler {
    /// Scheduler fuer 24 kHz Mono
    pub fn new(sink: Arc<dyn PlaybackSink>, clock: Arc<dyn OutputClock>) -> Self {
        Self {
            sink,
            clock,
            cursor: 0.0,
            handles: BTreeMap::new(),
            next_id: 1,
            sample_rate: INBOUND_SAMPLE_RATE,
            channels: 1,
            notifier: None,
        }
    }

    /// Setzt Abtastrate und Kanalzahl, mit denen eingehende Bloecke dekodiert werden
    pub fn with_format(mut self, sample_rate: u32, channels: u16) -> Self {
        self.sample_rate = sample_rate;
        self.channels = channels;
        self
    }

    /// Setzt den Rueckruf fuer natuerlich beendete Bloecke
    pub fn with_ended_notifier(mut self, notifier: EndedNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Dekodiert und plant einen Block
    ///
    /// Bei einem Dekodierfehler bleiben Cursor und Handle-Menge unveraendert.
    pub fn schedule_chunk(&mut self, chunk: &EncodedChunk) -> AudioResult<PlaybackHandle> {
        let buffer = decode_inbound(chunk, self.sample_rate, self.channels)?;
        let start = self.cursor.max(self.clock.now());
        let duration = buffer.duration();

        let id = self.next_id;
        self.next_id += 1;

        let state = Arc::new(VoiceState::new());
        let on_ended = self.notifier.as_ref().map(|n| {
            let n = Arc::clone(n);
            Box::new(move || n(id)) as Box<dyn FnOnce() + Send>
        });

        self.sink.play(ScheduledVoice {
            id,
            buffer,
            start_time: start,
            state: Arc::clone(&state),
            on_ended,
        })?;

        let handle = PlaybackHandle {
            id,
            start_time: start,
            duration,
            state,
        };
        self.handles.insert(id, handle.clone());
        self.cursor = start + duration;

        trace!(id, start, duration, cursor = self.cursor, "Block geplant");
        Ok(handle)
    }

    /// Unterbrechung: alle Handles stoppen, Menge leeren, Cursor auf 0
    ///
    /// Gibt die Anzahl gestoppter Handles zurueck.
    pub fn interrupt(&mut self) -> usize {
        let gestoppt = self.stop_all();
        self.cursor = 0.0;
        debug!(gestoppt, "Wiedergabe unterbrochen");
        gestoppt
    }

    /// Stoppt alle Handles ohne den Cursor zu veraendern
    pub fn stop_all(&mut self) -> usize {
        let anzahl = self.handles.len();
        for handle in self.handles.values() {
            handle.stop();
        }
        self.handles.clear();
        anzahl
    }

    /// Entfernt ein natuerlich beendetes Handle. Unbekannte IDs werden ignoriert.
    pub fn on_playback_ended(&mut self, id: u64) -> bool {
        self.handles.remove(&id).is_some()
    }

    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    pub fn active_handles(&self) -> usize {
        self.handles.len()
    }

    /// Alle offenen Handles in Planungsreihenfolge
    pub fn handles(&self) -> impl Iterator<Item = &PlaybackHandle> {
        self.handles.values()
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.stop_all();
    }
}
