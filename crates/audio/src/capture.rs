//! Mikrofon-Capture via cpal
//!
//! Oeffnet einen cpal InputStream im Format des Geraets, mischt auf Mono,
//! tastet auf die Zielrate um und schreibt die Samples in einen lock-free
//! Ring-Buffer. Ein eigener Capture-Thread sammelt daraus Frames fester
//! Groesse und reicht sie an die aktive Senke weiter.
//!
//! cpal::Stream ist !Send, daher lebt der Stream im Capture-Thread und
//! wird beim `release()` zusammen mit dem Thread beendet.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, SupportedStreamConfig};
use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::device::load_cpal_input_device;
use crate::error::{AudioError, AudioResult};

/// Standard-Frame-Groesse in Samples (256 ms bei 16 kHz)
pub const DEFAULT_FRAME_SIZE: usize = 4096;

/// Konfiguration fuer den Audio-Capture
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Abtastrate der ausgelieferten Mono-Frames in Hz
    pub sample_rate: u32,
    /// Ring-Buffer Kapazitaet in Samples
    pub buffer_size: usize,
    /// Samples pro ausgeliefertem Frame
    pub frame_size: usize,
    /// Name des Eingabegeraets (None = Standard)
    pub device: Option<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: sternfunk_core::OUTBOUND_SAMPLE_RATE,
            buffer_size: sternfunk_core::OUTBOUND_SAMPLE_RATE as usize * 2, // 2 Sekunden Puffer
            frame_size: DEFAULT_FRAME_SIZE,
            device: None,
        }
    }
}

/// Produziert Samples aus dem Mikrofon-Callback
pub type CaptureProducer = HeapProd<f32>;
/// Konsumiert Samples fuer die Frame-Bildung
pub type CaptureConsumer = HeapCons<f32>;

// ---------------------------------------------------------------------------
// AudioFrame + FrameAssembler
// ---------------------------------------------------------------------------

/// Unveraenderlicher Block von Mono-Samples fester Laenge
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Zerlegt einen kontinuierlichen Sample-Strom in Frames fester Groesse
///
/// Reihenfolge bleibt erhalten; Reste werden bis zum naechsten `push`
/// aufbewahrt.
#[derive(Debug)]
pub struct FrameAssembler {
    frame_size: usize,
    sample_rate: u32,
    puffer: Vec<f32>,
}

impl FrameAssembler {
    pub fn new(frame_size: usize, sample_rate: u32) -> Self {
        Self {
            frame_size: frame_size.max(1),
            sample_rate,
            puffer: Vec::with_capacity(frame_size.max(1) * 2),
        }
    }

    /// Haengt Samples an
    pub fn push(&mut self, samples: &[f32]) {
        self.puffer.extend_from_slice(samples);
    }

    /// Entnimmt den naechsten vollstaendigen Frame
    pub fn pop_frame(&mut self) -> Option<AudioFrame> {
        if self.puffer.len() < self.frame_size {
            return None;
        }
        let frame: Vec<f32> = self.puffer.drain(..self.frame_size).collect();
        Some(AudioFrame::new(frame, self.sample_rate))
    }

    /// Anzahl gepufferter Samples, die noch keinen Frame ergeben
    pub fn pending(&self) -> usize {
        self.puffer.len()
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Verwirft alle gepufferten Samples
    pub fn clear(&mut self) {
        self.puffer.clear();
    }
}

// ---------------------------------------------------------------------------
// AudioInput
// ---------------------------------------------------------------------------

/// Empfaenger fuer fertige Frames
pub type FrameSink = Box<dyn FnMut(AudioFrame) + Send>;

/// Prozessweites Mikrofon
///
/// Nur ein Halter gleichzeitig: ein zweites `acquire()` schlaegt fehl,
/// bis der erste Halter `release()` aufgerufen hat.
pub trait AudioInput: Send + Sync {
    /// Fordert exklusiven Zugriff auf das Eingabegeraet an
    fn acquire(&self) -> AudioResult<()>;

    /// Beginnt die Auslieferung von Frames an `sink`
    ///
    /// Frames vor dem Aufruf werden verworfen.
    fn start(&self, sink: FrameSink) -> AudioResult<()>;

    /// Gibt das Geraet frei. Mehrfacher Aufruf ist unschaedlich.
    fn release(&self);

    /// Wird das Geraet gerade gehalten?
    fn is_held(&self) -> bool;
}

// ---------------------------------------------------------------------------
// InputConverter
// ---------------------------------------------------------------------------

/// Wandelt den Geraete-Strom in Mono mit Zielrate
///
/// Kanaele werden gemittelt, die Rate linear interpoliert. Der Zustand
/// ueberlebt Blockgrenzen, der Ausgabestrom ist also unabhaengig davon,
/// wie der Treiber die Callbacks zuschneidet.
#[derive(Debug)]
pub struct InputConverter {
    channels: usize,
    from_rate: u32,
    to_rate: u32,
    schritt: f64,
    /// Position des naechsten Ausgabe-Samples, Index 0 = `letztes`
    pos: f64,
    letztes: Option<f32>,
    mono: Vec<f32>,
}

impl InputConverter {
    pub fn new(channels: u16, from_rate: u32, to_rate: u32) -> Self {
        Self {
            channels: channels.max(1) as usize,
            from_rate,
            to_rate,
            schritt: from_rate as f64 / to_rate.max(1) as f64,
            pos: 0.0,
            letztes: None,
            mono: Vec::new(),
        }
    }

    /// Muss ueberhaupt gewandelt werden?
    pub fn ist_durchreichend(&self) -> bool {
        self.channels == 1 && self.from_rate == self.to_rate
    }

    /// Wandelt einen Block verschraenkter Samples und haengt das Ergebnis an `out`
    pub fn process(&mut self, interleaved: &[f32], out: &mut Vec<f32>) {
        if self.ist_durchreichend() {
            out.extend_from_slice(interleaved);
            return;
        }

        self.mono.clear();
        if let Some(letztes) = self.letztes {
            self.mono.push(letztes);
        }
        let kanaele = self.channels;
        self.mono.extend(
            interleaved
                .chunks_exact(kanaele)
                .map(|frame| frame.iter().sum::<f32>() / kanaele as f32),
        );
        if self.mono.is_empty() {
            return;
        }

        let len = self.mono.len();
        while self.pos + 1.0 < len as f64 {
            let i0 = self.pos.floor() as usize;
            let frac = (self.pos - i0 as f64) as f32;
            let s0 = self.mono[i0];
            let s1 = self.mono[i0 + 1];
            out.push(s0 + frac * (s1 - s0));
            self.pos += self.schritt;
        }
        // Letztes Sample wird Index 0 des naechsten Blocks
        self.letztes = Some(self.mono[len - 1]);
        self.pos -= (len - 1) as f64;
    }
}

// ---------------------------------------------------------------------------
// cpal-Stream
// ---------------------------------------------------------------------------

/// Audio-Capture-Stream
///
/// Haelt den cpal-Stream am Leben. Wird der CaptureStream gedroppt,
/// stoppt die Aufnahme automatisch.
pub struct CaptureStream {
    _stream: Stream,
    config: CaptureConfig,
    geraet_rate: u32,
    geraet_kanaele: u16,
}

impl CaptureStream {
    /// Gibt die Konfiguration des Streams zurueck
    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Format, in dem das Geraet tatsaechlich liefert (Rate, Kanaele)
    pub fn geraete_format(&self) -> (u32, u16) {
        (self.geraet_rate, self.geraet_kanaele)
    }
}

fn format_nutzbar(format: SampleFormat) -> bool {
    matches!(format, SampleFormat::F32 | SampleFormat::I16)
}

/// Waehlt das Eingabeformat
///
/// Bevorzugt eine Konfiguration, die die Zielrate direkt anbietet (mit
/// moeglichst wenigen Kanaelen), sonst die Standardkonfiguration des
/// Geraets. Abweichungen gleicht der [`InputConverter`] aus.
fn eingabe_format_waehlen(device: &Device, sample_rate: u32) -> AudioResult<SupportedStreamConfig> {
    let direkt = device
        .supported_input_configs()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?
        .filter(|c| {
            format_nutzbar(c.sample_format())
                && c.min_sample_rate().0 <= sample_rate
                && c.max_sample_rate().0 >= sample_rate
        })
        .min_by_key(|c| c.channels());
    if let Some(c) = direkt {
        return Ok(c.with_sample_rate(cpal::SampleRate(sample_rate)));
    }
    device
        .default_input_config()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))
}

/// Oeffnet einen Capture-Stream auf dem gegebenen Geraet.
///
/// Gibt den Stream und den Ring-Buffer Consumer zurueck.
/// Der Producer laeuft im cpal-Callback-Thread und erhaelt bereits
/// gewandelte Mono-Samples mit `config.sample_rate`.
pub fn open_capture_stream(
    device: &Device,
    config: CaptureConfig,
) -> AudioResult<(CaptureStream, CaptureConsumer)> {
    let gewaehlt = eingabe_format_waehlen(device, config.sample_rate)?;
    let sample_format = gewaehlt.sample_format();
    let stream_config = gewaehlt.config();
    let geraet_rate = stream_config.sample_rate.0;
    let geraet_kanaele = stream_config.channels;

    let rb = HeapRb::<f32>::new(config.buffer_size);
    let (mut producer, consumer) = rb.split();
    let mut wandler = InputConverter::new(geraet_kanaele, geraet_rate, config.sample_rate);
    let mut ausgabe: Vec<f32> = Vec::with_capacity(config.frame_size);

    let err_fn = |err| error!("Capture-Fehler: {}", err);

    let mut schreiben = move |data: &[f32]| {
        ausgabe.clear();
        wandler.process(data, &mut ausgabe);
        let written = producer.push_slice(&ausgabe);
        if written < ausgabe.len() {
            warn!(
                "Capture Ring-Buffer voll, {} Samples verworfen",
                ausgabe.len() - written
            );
        }
    };

    let stream = match sample_format {
        SampleFormat::F32 => device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _| schreiben(data),
                err_fn,
                None,
            )
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?,
        SampleFormat::I16 => device
            .build_input_stream(
                &stream_config,
                move |data: &[i16], _| {
                    let floats: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                    schreiben(&floats);
                },
                err_fn,
                None,
            )
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?,
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
        geraet_rate,
        geraet_kanaele,
        ziel_rate = config.sample_rate,
        "Capture-Stream geoeffnet"
    );

    Ok((
        CaptureStream {
            _stream: stream,
            config,
            geraet_rate,
            geraet_kanaele,
        },
        consumer,
    ))
}

// ---------------------------------------------------------------------------
// CpalInput
// ---------------------------------------------------------------------------

/// Laufender Capture-Thread einer Session
struct CaptureWorker {
    running: Arc<AtomicBool>,
    sink: Arc<Mutex<Option<FrameSink>>>,
    thread: Option<JoinHandle<()>>,
}

/// Mikrofon ueber cpal
pub struct CpalInput {
    config: CaptureConfig,
    worker: Mutex<Option<CaptureWorker>>,
}

impl CpalInput {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            worker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Frame-Schleife im Capture-Thread
    fn capture_loop(
        mut consumer: CaptureConsumer,
        frame_size: usize,
        sample_rate: u32,
        running: Arc<AtomicBool>,
        sink: Arc<Mutex<Option<FrameSink>>>,
    ) {
        let mut assembler = FrameAssembler::new(frame_size, sample_rate);
        let mut temp_buf = vec![0.0f32; frame_size];

        debug!("Capture-Loop gestartet (frame_size={})", frame_size);

        while running.load(Ordering::Relaxed) {
            let available = consumer.pop_slice(&mut temp_buf);
            if available == 0 {
                std::thread::sleep(std::time::Duration::from_millis(5));
                continue;
            }
            assembler.push(&temp_buf[..available]);

            while let Some(frame) = assembler.pop_frame() {
                let mut guard = sink.lock();
                match guard.as_mut() {
                    Some(senke) => senke(frame),
                    // Noch nicht gestartet: Frame verwerfen
                    None => assembler.clear(),
                }
            }
        }

        debug!("Capture-Loop beendet");
    }
}

impl AudioInput for CpalInput {
    fn acquire(&self) -> AudioResult<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(AudioError::GeraetBelegt);
        }

        let running = Arc::new(AtomicBool::new(true));
        let sink: Arc<Mutex<Option<FrameSink>>> = Arc::new(Mutex::new(None));
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<AudioResult<()>>(1);

        let config = self.config.clone();
        let thread_running = Arc::clone(&running);
        let thread_sink = Arc::clone(&sink);

        let thread = std::thread::Builder::new()
            .name("sternfunk-capture".to_string())
            .spawn(move || {
                let geoeffnet = load_cpal_input_device(config.device.as_deref())
                    .and_then(|device| open_capture_stream(&device, config.clone()));
                let (_stream, consumer) = match geoeffnet {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if ready_tx.send(Ok(())).is_err() {
                    return;
                }
                Self::capture_loop(
                    consumer,
                    config.frame_size,
                    config.sample_rate,
                    thread_running,
                    thread_sink,
                );
                // _stream wird hier gedroppt -> Mikrofon frei
            })
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!("Mikrofon belegt");
                *worker = Some(CaptureWorker {
                    running,
                    sink,
                    thread: Some(thread),
                });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(AudioError::StreamFehler(
                    "Capture-Thread ohne Rueckmeldung beendet".into(),
                ))
            }
        }
    }

    fn start(&self, sink: FrameSink) -> AudioResult<()> {
        let worker = self.worker.lock();
        match worker.as_ref() {
            Some(w) => {
                *w.sink.lock() = Some(sink);
                debug!("Capture-Senke gesetzt");
                Ok(())
            }
            None => Err(AudioError::Konfiguration(
                "Mikrofon nicht belegt, start() ohne acquire()".into(),
            )),
        }
    }

    fn release(&self) {
        let Some(mut worker) = self.worker.lock().take() else {
            return;
        };
        worker.running.store(false, Ordering::Relaxed);
        worker.sink.lock().take();
        if let Some(handle) = worker.thread.take() {
            let _ = handle.join();
        }
        info!("Mikrofon freigegeben");
    }

    fn is_held(&self) -> bool {
        self.worker.lock().is_some()
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_config_default() {
        let config = CaptureConfig::default();
        assert_eq!(config.sample_rate, 16_000);
        assert_eq!(config.frame_size, 4096);
        assert!(config.buffer_size > config.frame_size);
    }

    #[test]
    fn assembler_liefert_feste_frames_in_reihenfolge() {
        let mut asm = FrameAssembler::new(4, 16_000);
        asm.push(&[1.0, 2.0, 3.0]);
        assert!(asm.pop_frame().is_none());
        asm.push(&[4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        assert_eq!(asm.pop_frame().unwrap().samples(), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(asm.pop_frame().unwrap().samples(), &[5.0, 6.0, 7.0, 8.0]);
        assert!(asm.pop_frame().is_none());
        assert_eq!(asm.pending(), 1);
    }

    #[test]
    fn assembler_frame_traegt_rate() {
        let mut asm = FrameAssembler::new(2, 16_000);
        asm.push(&[0.1, 0.2]);
        let frame = asm.pop_frame().unwrap();
        assert_eq!(frame.sample_rate(), 16_000);
        assert_eq!(frame.len(), 2);
    }

    #[test]
    fn assembler_frame_groesse_mindestens_eins() {
        let asm = FrameAssembler::new(0, 16_000);
        assert_eq!(asm.frame_size(), 1);
    }

    #[test]
    fn wandler_48k_stereo_zu_16k_mono_frames() {
        let mut wandler = InputConverter::new(2, 48_000, 16_000);
        let mut asm = FrameAssembler::new(4096, 16_000);
        let mut mono = Vec::new();

        // 1 s Stereo (L = 0.5, R = -0.1) in Treiber-Bloecken zu 480 Frames
        let block: Vec<f32> = std::iter::repeat([0.5f32, -0.1f32])
            .take(480)
            .flatten()
            .collect();
        for _ in 0..100 {
            mono.clear();
            wandler.process(&block, &mut mono);
            asm.push(&mono);
        }

        let mut frames = Vec::new();
        while let Some(frame) = asm.pop_frame() {
            frames.push(frame);
        }
        assert_eq!(frames.len(), 3);
        assert_eq!(asm.pending(), 16_000 - 3 * 4096);
        for frame in &frames {
            assert_eq!(frame.len(), 4096);
            assert_eq!(frame.sample_rate(), 16_000);
            assert!(frame.samples().iter().all(|s| (s - 0.2).abs() < 1e-6));
        }
    }

    #[test]
    fn wandler_interpoliert_ueber_blockgrenzen() {
        let mut wandler = InputConverter::new(1, 8_000, 16_000);
        let mut out = Vec::new();
        wandler.process(&[0.0, 1.0, 2.0, 3.0], &mut out);
        assert_eq!(out, vec![0.0, 0.5, 1.0, 1.5, 2.0, 2.5]);
        out.clear();
        wandler.process(&[4.0, 5.0], &mut out);
        assert_eq!(out, vec![3.0, 3.5, 4.0, 4.5]);
    }

    #[test]
    fn wandler_ohne_abweichung_reicht_durch() {
        let mut wandler = InputConverter::new(1, 16_000, 16_000);
        assert!(wandler.ist_durchreichend());
        let mut out = Vec::new();
        wandler.process(&[0.1, -0.2, 0.3], &mut out);
        assert_eq!(out, vec![0.1, -0.2, 0.3]);
        assert!(!InputConverter::new(2, 16_000, 16_000).ist_durchreichend());
    }

    #[test]
    fn start_ohne_acquire_ist_fehler() {
        let input = CpalInput::new(CaptureConfig::default());
        assert!(!input.is_held());
        assert!(input.start(Box::new(|_| {})).is_err());
        // release ohne acquire ist ein No-op
        input.release();
        input.release();
    }

    #[test]
    #[ignore = "Benoetigt Audio-Hardware"]
    fn mikrofon_belegen_und_freigeben() {
        let input = CpalInput::new(CaptureConfig::default());
        input.acquire().expect("Mikrofon sollte verfuegbar sein");
        assert!(input.is_held());
        assert!(matches!(input.acquire(), Err(AudioError::GeraetBelegt)));
        input.release();
        assert!(!input.is_held());
    }
}
