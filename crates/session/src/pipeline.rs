//! Capture-Pipeline: Mikrofon -> PCM-Codec -> Transport
//!
//! Die Pipeline haelt nur einen bereits aufgebauten [`ChunkSender`].
//! Senden ist fire-and-forget; bei voller Warteschlange wird der Frame
//! verworfen und gezaehlt, das Mikrofon wird nie blockiert.

use std::sync::Arc;
use sternfunk_audio::{encode_outbound, AudioFrame, AudioInput};
use tracing::{debug, info, warn};

use crate::error::{SessionError, SessionResult};
use crate::stats::SessionStats;
use crate::transport::{ChunkSender, SendRejected};

pub struct CapturePipeline {
    input: Arc<dyn AudioInput>,
    stats: Arc<SessionStats>,
    held: bool,
    running: bool,
}

impl CapturePipeline {
    pub fn new(input: Arc<dyn AudioInput>, stats: Arc<SessionStats>) -> Self {
        Self {
            input,
            stats,
            held: false,
            running: false,
        }
    }

    /// Belegt das Mikrofon
    pub fn acquire(&mut self) -> SessionResult<()> {
        if self.held {
            return Ok(());
        }
        self.input
            .acquire()
            .map_err(|e| SessionError::DeviceUnavailable(e.to_string()))?;
        self.held = true;
        debug!("Mikrofon fuer Sitzung belegt");
        Ok(())
    }

    /// Beginnt Frames zu kodieren und an `sender` zu uebergeben
    pub fn start(&mut self, sender: ChunkSender) -> SessionResult<()> {
        if !self.held {
            return Err(SessionError::InvalidState(
                "Capture-Start ohne belegtes Mikrofon".into(),
            ));
        }
        if self.running {
            return Ok(());
        }
        let stats = Arc::clone(&self.stats);
        let mut geschlossen_gemeldet = false;
        self.input.start(Box::new(move |frame: AudioFrame| {
            match sender.send(encode_outbound(frame.samples())) {
                Ok(()) => stats.frame_sent(),
                Err(SendRejected::Full) => stats.frame_dropped(),
                Err(SendRejected::Closed) => {
                    stats.frame_dropped();
                    if !geschlossen_gemeldet {
                        warn!("Sendewarteschlange geschlossen, Frames werden verworfen");
                        geschlossen_gemeldet = true;
                    }
                }
            }
        }))?;
        self.running = true;
        info!("Capture-Pipeline gestartet");
        Ok(())
    }

    /// Stoppt die Pipeline und gibt das Mikrofon frei. Mehrfacher Aufruf ist unschaedlich.
    pub fn stop(&mut self) {
        if !self.held {
            return;
        }
        self.input.release();
        self.held = false;
        self.running = false;
        debug!("Capture-Pipeline gestoppt");
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_held(&self) -> bool {
        self.held
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use sternfunk_audio::{AudioError, AudioResult, FrameSink};

    #[derive(Default)]
    struct TestMikrofon {
        gehalten: Mutex<bool>,
        senke: Mutex<Option<FrameSink>>,
        freigaben: AtomicUsize,
        nicht_vorhanden: bool,
    }

    impl TestMikrofon {
        fn frame(&self, samples: Vec<f32>) {
            if let Some(s) = self.senke.lock().as_mut() {
                s(AudioFrame::new(samples, 16_000));
            }
        }
    }

    impl AudioInput for TestMikrofon {
        fn acquire(&self) -> AudioResult<()> {
            if self.nicht_vorhanden {
                return Err(AudioError::KeinStandardEingabegeraet);
            }
            let mut g = self.gehalten.lock();
            if *g {
                return Err(AudioError::GeraetBelegt);
            }
            *g = true;
            Ok(())
        }

        fn start(&self, sink: FrameSink) -> AudioResult<()> {
            *self.senke.lock() = Some(sink);
            Ok(())
        }

        fn release(&self) {
            *self.gehalten.lock() = false;
            self.senke.lock().take();
            self.freigaben.fetch_add(1, Ordering::SeqCst);
        }

        fn is_held(&self) -> bool {
            *self.gehalten.lock()
        }
    }

    fn aufbau() -> (CapturePipeline, Arc<TestMikrofon>, Arc<SessionStats>) {
        let mic = Arc::new(TestMikrofon::default());
        let stats = Arc::new(SessionStats::default());
        let pipeline = CapturePipeline::new(mic.clone(), stats.clone());
        (pipeline, mic, stats)
    }

    #[test]
    fn frames_werden_kodiert_und_gesendet() {
        let (mut p, mic, stats) = aufbau();
        let (sender, mut rx) = ChunkSender::channel(4);
        p.acquire().unwrap();
        p.start(sender).unwrap();

        mic.frame(vec![0.0; 4]);
        let chunk = rx.try_recv().unwrap();
        assert_eq!(chunk.sample_rate, 16_000);
        assert_eq!(chunk.data, "AAAAAAAAAAA=");
        assert_eq!(stats.snapshot().frames_sent, 1);
    }

    #[test]
    fn volle_warteschlange_zaehlt_verworfene_frames() {
        let (mut p, mic, stats) = aufbau();
        let (sender, _rx) = ChunkSender::channel(1);
        p.acquire().unwrap();
        p.start(sender).unwrap();
        for _ in 0..3 {
            mic.frame(vec![0.1; 8]);
        }
        let s = stats.snapshot();
        assert_eq!(s.frames_sent, 1);
        assert_eq!(s.frames_dropped, 2);
    }

    #[test]
    fn start_ohne_mikrofon_ist_ungueltig() {
        let (mut p, _, _) = aufbau();
        let (sender, _rx) = ChunkSender::channel(1);
        assert!(matches!(p.start(sender), Err(SessionError::InvalidState(_))));
    }

    #[test]
    fn fehlendes_geraet_wird_gemeldet() {
        let mic = Arc::new(TestMikrofon {
            nicht_vorhanden: true,
            ..Default::default()
        });
        let mut p = CapturePipeline::new(mic, Arc::new(SessionStats::default()));
        assert!(matches!(
            p.acquire(),
            Err(SessionError::DeviceUnavailable(_))
        ));
        assert!(!p.is_held());
    }

    #[test]
    fn doppeltes_stop_gibt_einmal_frei() {
        let (mut p, mic, _) = aufbau();
        p.acquire().unwrap();
        p.stop();
        p.stop();
        drop(p);
        assert_eq!(mic.freigaben.load(Ordering::SeqCst), 1);
        assert!(!mic.is_held());
    }

    #[test]
    fn drop_gibt_mikrofon_frei() {
        let (mut p, mic, _) = aufbau();
        p.acquire().unwrap();
        drop(p);
        assert!(!mic.is_held());
        assert_eq!(mic.freigaben.load(Ordering::SeqCst), 1);
    }
}
