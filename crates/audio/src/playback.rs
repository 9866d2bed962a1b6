//! Audio-Playback via cpal
//!
//! Geplante Puffer ("Voices") werden ueber einen crossbeam-Kanal an den
//! cpal-Callback uebergeben. Dort mischt der [`Mixer`] alle Voices, die den
//! aktuellen Block ueberlappen, sample-genau zu ihrem Startzeitpunkt. Der
//! Frame-Zaehler des Mixers ist gleichzeitig die Ausgabe-Uhr.
//!
//! Abbruch und natuerliches Ende konkurrieren ueber [`VoiceState`]: wer den
//! Zustand zuerst von `Ausstehend` wegbewegt, gewinnt. Eine gestoppte Voice
//! meldet nie ihr Ende.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, trace};

use crate::device::load_cpal_output_device;
use crate::error::{AudioError, AudioResult};
use crate::pcm::AudioBuffer;

/// Konfiguration fuer den Audio-Playback
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Abtastrate in Hz
    pub sample_rate: u32,
    /// Kanalanzahl
    pub channels: u16,
    /// Name des Ausgabegeraets (None = Standard)
    pub device: Option<String>,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: sternfunk_core::INBOUND_SAMPLE_RATE,
            channels: 1,
            device: None,
        }
    }
}

// ---------------------------------------------------------------------------
// VoiceState
// ---------------------------------------------------------------------------

const AUSSTEHEND: u8 = 0;
const BEENDET: u8 = 1;
const GESTOPPT: u8 = 2;

/// Lebenszyklus einer geplanten Voice: Ausstehend -> Beendet | Gestoppt
#[derive(Debug, Default)]
pub struct VoiceState(AtomicU8);

impl VoiceState {
    pub fn new() -> Self {
        Self(AtomicU8::new(AUSSTEHEND))
    }

    /// Bricht die Voice ab. `true` wenn dieser Aufruf den Abbruch bewirkt hat.
    pub fn stop(&self) -> bool {
        self.0
            .compare_exchange(AUSSTEHEND, GESTOPPT, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Markiert das natuerliche Ende. `false` wenn die Voice schon gestoppt war.
    pub fn finish(&self) -> bool {
        self.0
            .compare_exchange(AUSSTEHEND, BEENDET, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_pending(&self) -> bool {
        self.0.load(Ordering::Acquire) == AUSSTEHEND
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire) == GESTOPPT
    }

    pub fn is_finished(&self) -> bool {
        self.0.load(Ordering::Acquire) == BEENDET
    }
}

/// Rueckruf beim natuerlichen Ende einer Voice
pub type EndedCallback = Box<dyn FnOnce() + Send>;

/// Ein Puffer mit Startzeit auf der Ausgabe-Uhr
pub struct ScheduledVoice {
    pub id: u64,
    pub buffer: AudioBuffer,
    /// Startzeit in Sekunden auf der Ausgabe-Uhr
    pub start_time: f64,
    pub state: Arc<VoiceState>,
    pub on_ended: Option<EndedCallback>,
}

impl std::fmt::Debug for ScheduledVoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledVoice")
            .field("id", &self.id)
            .field("start_time", &self.start_time)
            .field("duration", &self.buffer.duration())
            .field("state", &self.state)
            .finish()
    }
}

/// Ziel fuer geplante Voices (prozessweite Audio-Ausgabe)
pub trait PlaybackSink: Send + Sync {
    fn play(&self, voice: ScheduledVoice) -> AudioResult<()>;
}

/// Gemeinsame Ausgabe-Uhr in Sekunden
pub trait OutputClock: Send + Sync {
    fn now(&self) -> f64;
}

/// Ausgabe-Uhr aus gerenderten Frames
#[derive(Debug)]
pub struct FrameClock {
    frames: AtomicU64,
    sample_rate: u32,
}

impl FrameClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            frames: AtomicU64::new(0),
            sample_rate: sample_rate.max(1),
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    fn set_frames(&self, frames: u64) {
        self.frames.store(frames, Ordering::Release);
    }
}

impl OutputClock for FrameClock {
    fn now(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}

// ---------------------------------------------------------------------------
// Mixer
// ---------------------------------------------------------------------------

struct MixerVoice {
    id: u64,
    /// Start in Ausgabe-Frames
    start_frame: u64,
    /// Laenge in Ausgabe-Frames (nach Ratenanpassung)
    length: u64,
    buffer: AudioBuffer,
    state: Arc<VoiceState>,
    on_ended: Option<EndedCallback>,
}

impl MixerVoice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.length
    }

    /// Sample der Voice fuer Ausgabe-Frame `frame` und Ausgabekanal `kanal`
    ///
    /// Mono-Ausgabe mischt alle Voice-Kanaele herunter; fehlt der Kanal in
    /// der Voice, wird ebenfalls der Mittelwert verwendet.
    fn sample_at(&self, frame: u64, kanal: usize, ausgabe_kanaele: usize, mixer_rate: u32) -> f32 {
        let offset = frame - self.start_frame;
        // Naechster-Nachbar-Ratenanpassung
        let quelle =
            (offset * self.buffer.sample_rate() as u64 / mixer_rate as u64) as usize;
        let quelle = quelle.min(self.buffer.frames().saturating_sub(1));
        match self.buffer.channel(kanal) {
            Some(samples) if ausgabe_kanaele > 1 => samples[quelle],
            _ => self.buffer.mono_sample(quelle),
        }
    }
}

/// Mischt geplante Voices in interleavte Ausgabe-Bloecke
pub struct Mixer {
    sample_rate: u32,
    channels: u16,
    position: u64,
    voices: Vec<MixerVoice>,
    /// Verschiebung der laufenden Kette durch verspaetet eingetroffene Voices
    versatz: u64,
    clock: Arc<FrameClock>,
}

impl Mixer {
    pub fn new(sample_rate: u32, channels: u16, clock: Arc<FrameClock>) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            channels: channels.max(1),
            position: clock.frames(),
            voices: Vec::new(),
            versatz: 0,
            clock,
        }
    }

    /// Uebernimmt eine Voice. Startzeiten in der Vergangenheit beginnen sofort.
    ///
    /// Muss eine Voice dabei nach hinten rutschen, rutschen alle spaeter
    /// geplanten Voices derselben Kette um denselben Betrag mit. Die Kette
    /// endet, sobald keine Voice mehr aktiv ist.
    pub fn add(&mut self, voice: ScheduledVoice) {
        self.voices.retain(|v| !v.state.is_stopped());
        if self.voices.is_empty() {
            self.versatz = 0;
        }

        let geplant = (voice.start_time.max(0.0) * self.sample_rate as f64).round() as u64
            + self.versatz;
        let start = geplant.max(self.position);
        self.versatz += start - geplant;

        let frames = voice.buffer.frames() as u64;
        let length = (frames * self.sample_rate as u64)
            .div_ceil(voice.buffer.sample_rate() as u64);
        self.voices.push(MixerVoice {
            id: voice.id,
            start_frame: start,
            length,
            buffer: voice.buffer,
            state: voice.state,
            on_ended: voice.on_ended,
        });
    }

    /// Anzahl noch nicht abgeschlossener Voices
    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    /// Aktuelle Position in Frames
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Rendert den naechsten Block (interleavt) und schiebt die Uhr weiter
    pub fn render(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        let kanaele = self.channels as usize;
        let frames = (out.len() / kanaele) as u64;
        let block_start = self.position;
        let block_end = block_start + frames;

        // Gestoppte Voices sofort entfernen, ohne Ende zu melden
        self.voices.retain(|v| !v.state.is_stopped());

        for voice in &self.voices {
            let von = voice.start_frame.max(block_start);
            let bis = voice.end_frame().min(block_end);
            for frame in von..bis {
                let basis = (frame - block_start) as usize * kanaele;
                for kanal in 0..kanaele {
                    out[basis + kanal] += voice.sample_at(frame, kanal, kanaele, self.sample_rate);
                }
            }
        }

        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }

        self.position = block_end;
        self.clock.set_frames(block_end);

        // Abgelaufene Voices abschliessen
        let mut i = 0;
        while i < self.voices.len() {
            if self.voices[i].end_frame() <= block_end {
                let mut voice = self.voices.swap_remove(i);
                if voice.state.finish() {
                    trace!(id = voice.id, "Voice beendet");
                    if let Some(cb) = voice.on_ended.take() {
                        cb();
                    }
                }
            } else {
                i += 1;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// cpal-Stream
// ---------------------------------------------------------------------------

/// Audio-Playback-Stream
pub struct PlaybackStream {
    _stream: Stream,
    config: PlaybackConfig,
}

impl PlaybackStream {
    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }
}

/// Oeffnet einen Playback-Stream auf dem gegebenen Geraet.
///
/// Der Mixer laeuft im cpal-Callback-Thread und uebernimmt neue Voices
/// aus `voice_rx`.
pub fn open_playback_stream(
    device: &Device,
    config: PlaybackConfig,
    mut mixer: Mixer,
    voice_rx: Receiver<ScheduledVoice>,
) -> AudioResult<PlaybackStream> {
    let stream_config = StreamConfig {
        channels: config.channels,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let err_fn = |err| error!("Playback-Fehler: {}", err);

    let supported = device
        .supported_output_configs()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?
        .find(|c| {
            c.min_sample_rate().0 <= config.sample_rate
                && c.max_sample_rate().0 >= config.sample_rate
                && c.channels() >= config.channels
        });

    let sample_format = supported
        .map(|c| c.sample_format())
        .unwrap_or(SampleFormat::F32);

    let stream = match sample_format {
        SampleFormat::F32 => device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _| {
                    for voice in voice_rx.try_iter() {
                        mixer.add(voice);
                    }
                    mixer.render(data);
                },
                err_fn,
                None,
            )
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?,
        SampleFormat::I16 => {
            let mut float_buf = Vec::new();
            device
                .build_output_stream(
                    &stream_config,
                    move |data: &mut [i16], _| {
                        for voice in voice_rx.try_iter() {
                            mixer.add(voice);
                        }
                        float_buf.resize(data.len(), 0.0);
                        mixer.render(&mut float_buf);
                        for (out, s) in data.iter_mut().zip(float_buf.iter()) {
                            *out = (*s * i16::MAX as f32)
                                .clamp(i16::MIN as f32, i16::MAX as f32)
                                as i16;
                        }
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| AudioError::StreamFehler(e.to_string()))?
        }
        _ => {
            return Err(AudioError::StreamFehler(format!(
                "Nicht unterstuetztes Sample-Format: {:?}",
                sample_format
            )))
        }
    };

    stream
        .play()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?;

    debug!(
        "Playback-Stream geoeffnet: {}Hz {}ch",
        config.sample_rate, config.channels
    );

    Ok(PlaybackStream {
        _stream: stream,
        config,
    })
}

// ---------------------------------------------------------------------------
// CpalOutput
// ---------------------------------------------------------------------------

/// Lautsprecher ueber cpal: `PlaybackSink` und `OutputClock` in einem
///
/// Der Stream lebt in einem eigenen Thread (cpal::Stream ist !Send).
pub struct CpalOutput {
    voice_tx: Sender<ScheduledVoice>,
    clock: Arc<FrameClock>,
    running: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl CpalOutput {
    /// Oeffnet das Ausgabegeraet und startet den Mixer
    pub fn open(config: PlaybackConfig) -> AudioResult<Self> {
        let (voice_tx, voice_rx) = unbounded::<ScheduledVoice>();
        let clock = Arc::new(FrameClock::new(config.sample_rate));
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<AudioResult<()>>(1);

        let thread_clock = Arc::clone(&clock);
        let thread_running = Arc::clone(&running);

        let thread = std::thread::Builder::new()
            .name("sternfunk-playback".to_string())
            .spawn(move || {
                let mixer = Mixer::new(config.sample_rate, config.channels, thread_clock);
                let geoeffnet = load_cpal_output_device(config.device.as_deref())
                    .and_then(|device| open_playback_stream(&device, config, mixer, voice_rx));
                let _stream = match geoeffnet {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if ready_tx.send(Ok(())).is_err() {
                    return;
                }
                while thread_running.load(Ordering::Relaxed) {
                    std::thread::sleep(std::time::Duration::from_millis(50));
                }
                debug!("Playback-Thread beendet, cpal-Stream wird gedroppt");
            })
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!("Audio-Ausgabe geoeffnet");
                Ok(Self {
                    voice_tx,
                    clock,
                    running,
                    thread: Mutex::new(Some(thread)),
                })
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(AudioError::StreamFehler(
                    "Playback-Thread ohne Rueckmeldung beendet".into(),
                ))
            }
        }
    }

    /// Schliesst die Ausgabe. Mehrfacher Aufruf ist unschaedlich.
    pub fn close(&self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
            info!("Audio-Ausgabe geschlossen");
        }
    }
}

impl PlaybackSink for CpalOutput {
    fn play(&self, voice: ScheduledVoice) -> AudioResult<()> {
        if !self.running.load(Ordering::Relaxed) {
            return Err(AudioError::AusgabeGeschlossen);
        }
        self.voice_tx
            .send(voice)
            .map_err(|_| AudioError::AusgabeGeschlossen)
    }
}

impl OutputClock for CpalOutput {
    fn now(&self) -> f64 {
        self.clock.now()
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn voice(id: u64, samples: Vec<f32>, rate: u32, start: f64) -> (ScheduledVoice, Arc<VoiceState>, Arc<AtomicUsize>) {
        let state = Arc::new(VoiceState::new());
        let zaehler = Arc::new(AtomicUsize::new(0));
        let z = Arc::clone(&zaehler);
        let v = ScheduledVoice {
            id,
            buffer: AudioBuffer::mono(rate, samples).unwrap(),
            start_time: start,
            state: Arc::clone(&state),
            on_ended: Some(Box::new(move || {
                z.fetch_add(1, Ordering::SeqCst);
            })),
        };
        (v, state, zaehler)
    }

    #[test]
    fn playback_config_default() {
        let config = PlaybackConfig::default();
        assert_eq!(config.sample_rate, 24_000);
        assert_eq!(config.channels, 1);
    }

    #[test]
    fn voice_state_abbruch_gewinnt() {
        let s = VoiceState::new();
        assert!(s.is_pending());
        assert!(s.stop());
        assert!(!s.finish(), "Gestoppte Voice darf nicht mehr enden");
        assert!(s.is_stopped());
        assert!(!s.stop());
    }

    #[test]
    fn voice_state_ende_vor_abbruch() {
        let s = VoiceState::new();
        assert!(s.finish());
        assert!(!s.stop());
        assert!(s.is_finished());
    }

    #[test]
    fn mixer_startet_sample_genau() {
        let clock = Arc::new(FrameClock::new(10));
        let mut mixer = Mixer::new(10, 1, Arc::clone(&clock));
        // Start bei 0.3 s = Frame 3
        let (v, _, _) = voice(1, vec![0.5; 2], 10, 0.3);
        mixer.add(v);
        let mut out = vec![0.0; 8];
        mixer.render(&mut out);
        assert_eq!(out, vec![0.0, 0.0, 0.0, 0.5, 0.5, 0.0, 0.0, 0.0]);
        assert_eq!(clock.frames(), 8);
        assert!((clock.now() - 0.8).abs() < 1e-9);
    }

    #[test]
    fn mixer_meldet_ende_genau_einmal() {
        let clock = Arc::new(FrameClock::new(10));
        let mut mixer = Mixer::new(10, 1, clock);
        let (v, state, zaehler) = voice(1, vec![0.1; 6], 10, 0.0);
        mixer.add(v);
        let mut out = vec![0.0; 4];
        mixer.render(&mut out);
        assert_eq!(zaehler.load(Ordering::SeqCst), 0);
        mixer.render(&mut out);
        assert_eq!(zaehler.load(Ordering::SeqCst), 1);
        assert!(state.is_finished());
        mixer.render(&mut out);
        assert_eq!(zaehler.load(Ordering::SeqCst), 1);
        assert_eq!(mixer.active_voices(), 0);
    }

    #[test]
    fn gestoppte_voice_schweigt_und_meldet_kein_ende() {
        let clock = Arc::new(FrameClock::new(10));
        let mut mixer = Mixer::new(10, 1, clock);
        let (v, state, zaehler) = voice(1, vec![0.5; 4], 10, 0.0);
        mixer.add(v);
        let mut out = vec![0.0; 2];
        mixer.render(&mut out);
        assert_eq!(out, vec![0.5, 0.5]);
        state.stop();
        mixer.render(&mut out);
        assert_eq!(out, vec![0.0, 0.0]);
        mixer.render(&mut out);
        assert_eq!(zaehler.load(Ordering::SeqCst), 0);
        assert_eq!(mixer.active_voices(), 0);
    }

    #[test]
    fn mixer_passt_rate_an() {
        // 5 Hz Voice in 10 Hz Mixer -> doppelte Laenge
        let clock = Arc::new(FrameClock::new(10));
        let mut mixer = Mixer::new(10, 1, clock);
        let (v, _, zaehler) = voice(1, vec![0.2, 0.4], 5, 0.0);
        mixer.add(v);
        let mut out = vec![0.0; 5];
        mixer.render(&mut out);
        assert_eq!(out, vec![0.2, 0.2, 0.4, 0.4, 0.0]);
        assert_eq!(zaehler.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn mono_voice_auf_stereo_ausgabe() {
        let clock = Arc::new(FrameClock::new(10));
        let mut mixer = Mixer::new(10, 2, clock);
        let (v, _, _) = voice(1, vec![0.25], 10, 0.0);
        mixer.add(v);
        let mut out = vec![0.0; 4];
        mixer.render(&mut out);
        assert_eq!(out, vec![0.25, 0.25, 0.0, 0.0]);
    }

    #[test]
    fn verspaetete_voice_startet_sofort() {
        let clock = Arc::new(FrameClock::new(10));
        let mut mixer = Mixer::new(10, 1, clock);
        let mut out = vec![0.0; 5];
        mixer.render(&mut out);
        let (v, _, _) = voice(1, vec![0.3; 2], 10, 0.1);
        mixer.add(v);
        mixer.render(&mut out);
        assert_eq!(out, vec![0.3, 0.3, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn verspaetete_kette_bleibt_lueckenlos_ohne_ueberlappung() {
        let clock = Arc::new(FrameClock::new(10));
        let mut mixer = Mixer::new(10, 1, clock);
        let mut out = vec![0.0; 5];
        mixer.render(&mut out);

        // A war fuer Frame 3 geplant, kommt aber erst bei Frame 5 an
        let (a, _, ende_a) = voice(1, vec![0.4; 4], 10, 0.3);
        // B direkt hinter A geplant (Frame 7)
        let (b, _, ende_b) = voice(2, vec![0.6; 2], 10, 0.7);
        mixer.add(a);
        mixer.add(b);

        let mut out = vec![0.0; 10];
        mixer.render(&mut out);
        assert_eq!(out, vec![0.4, 0.4, 0.4, 0.4, 0.6, 0.6, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(ende_a.load(Ordering::SeqCst), 1);
        assert_eq!(ende_b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn versatz_gilt_nicht_fuer_neue_kette() {
        let clock = Arc::new(FrameClock::new(10));
        let mut mixer = Mixer::new(10, 1, clock);
        let mut out = vec![0.0; 5];
        mixer.render(&mut out);
        let (a, _, _) = voice(1, vec![0.4; 2], 10, 0.3);
        mixer.add(a);
        mixer.render(&mut out);
        assert_eq!(mixer.active_voices(), 0);

        // Neue Kette nach Leerlauf: Start exakt wie geplant
        let (b, _, _) = voice(2, vec![0.6; 1], 10, 1.2);
        mixer.add(b);
        mixer.render(&mut out);
        assert_eq!(out, vec![0.0, 0.0, 0.6, 0.0, 0.0]);
    }

    #[test]
    fn ueberlappende_voices_werden_summiert_und_begrenzt() {
        let clock = Arc::new(FrameClock::new(10));
        let mut mixer = Mixer::new(10, 1, clock);
        let (a, _, _) = voice(1, vec![0.7; 2], 10, 0.0);
        let (b, _, _) = voice(2, vec![0.7; 2], 10, 0.1);
        mixer.add(a);
        mixer.add(b);
        let mut out = vec![0.0; 3];
        mixer.render(&mut out);
        assert_eq!(out, vec![0.7, 1.0, 0.7]);
    }

    #[test]
    #[ignore = "Benoetigt Audio-Hardware"]
    fn ausgabe_oeffnen() {
        let output = CpalOutput::open(PlaybackConfig::default());
        assert!(output.is_ok(), "Playback-Stream sollte oeffenbar sein");
    }
}
