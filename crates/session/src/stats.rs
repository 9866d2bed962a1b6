//! Zaehler einer Live-Sitzung
//!
//! Werden aus dem Capture-Thread und dem Controller-Task beschrieben,
//! daher atomar. Beim Sitzungsende wird ein Schnappschuss geloggt.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct SessionStats {
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
    chunks_scheduled: AtomicU64,
    chunks_dropped: AtomicU64,
    interruptions: AtomicU64,
}

/// Unveraenderlicher Stand der Zaehler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// An den Transport uebergebene Mikrofon-Frames
    pub frames_sent: u64,
    /// Verworfene Frames (Sendewarteschlange voll oder geschlossen)
    pub frames_dropped: u64,
    pub chunks_scheduled: u64,
    /// Wegen Dekodierfehlern verworfene Antwort-Bloecke
    pub chunks_dropped: u64,
    pub interruptions: u64,
}

impl SessionStats {
    pub fn frame_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn chunk_scheduled(&self) {
        self.chunks_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn chunk_dropped(&self) {
        self.chunks_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn interruption(&self) {
        self.interruptions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            chunks_scheduled: self.chunks_scheduled.load(Ordering::Relaxed),
            chunks_dropped: self.chunks_dropped.load(Ordering::Relaxed),
            interruptions: self.interruptions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zaehler_im_schnappschuss() {
        let stats = SessionStats::default();
        stats.frame_sent();
        stats.frame_sent();
        stats.frame_dropped();
        stats.chunk_scheduled();
        stats.interruption();
        assert_eq!(
            stats.snapshot(),
            StatsSnapshot {
                frames_sent: 2,
                frames_dropped: 1,
                chunks_scheduled: 1,
                chunks_dropped: 0,
                interruptions: 1,
            }
        );
    }
}
