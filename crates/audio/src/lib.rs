//! sternfunk-audio – Audio-Schicht der Live-Sitzung
//!
//! - PCM-Framing-Codec (f32 <-> 16-Bit-PCM <-> Base64)
//! - Mikrofon-Capture via cpal mit fester Frame-Groesse
//! - Playback-Scheduler auf gemeinsamer Ausgabe-Uhr
//! - Mixer und Lautsprecher-Ausgabe via cpal

pub mod capture;
pub mod device;
pub mod error;
pub mod pcm;
pub mod playback;
pub mod scheduler;

// Bequeme Re-Exporte der wichtigsten Typen
pub use capture::{
    AudioFrame, AudioInput, CaptureConfig, CpalInput, FrameAssembler, FrameSink, InputConverter,
    DEFAULT_FRAME_SIZE,
};
pub use device::{list_all_devices, list_devices, AudioDevice, Richtung};
pub use error::{AudioError, AudioResult};
pub use pcm::{decode_inbound, encode_outbound, AudioBuffer};
pub use playback::{
    CpalOutput, EndedCallback, FrameClock, Mixer, OutputClock, PlaybackConfig, PlaybackSink,
    ScheduledVoice, VoiceState,
};
pub use scheduler::{EndedNotifier, PlaybackHandle, PlaybackScheduler};
