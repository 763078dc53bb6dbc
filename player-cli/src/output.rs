//! Headless outputs that count what the engine delivers.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use player_engine::{AudioFormat, AudioOutput, DecodedSample, VideoRenderer};
use tracing::trace;

#[derive(Debug, Default)]
struct Span {
    first: Option<f64>,
    last: Option<f64>,
}

/// Renderer that records frame count, presentation range and timestamp regressions.
#[derive(Debug, Default)]
pub struct StatsRenderer {
    frames: AtomicU64,
    bytes: AtomicU64,
    regressions: AtomicU64,
    span: Mutex<Span>,
}

impl VideoRenderer for StatsRenderer {
    fn render(&self, sample: &DecodedSample) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        self.bytes
            .fetch_add(sample.data.len() as u64, Ordering::Relaxed);
        let mut span = self.span.lock();
        if span.last.is_some_and(|last| sample.pts < last) {
            self.regressions.fetch_add(1, Ordering::Relaxed);
        }
        span.first.get_or_insert(sample.pts);
        span.last = Some(sample.pts);
        trace!(pts = sample.pts, bytes = sample.data.len(), "Frame rendered");
    }
}

impl StatsRenderer {
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Frames rendered with a timestamp before the previous one, as after a seek.
    pub fn regressions(&self) -> u64 {
        self.regressions.load(Ordering::Relaxed)
    }

    pub fn range(&self) -> Option<(f64, f64)> {
        let span = self.span.lock();
        span.first.zip(span.last)
    }
}

/// Audio sink without a device. It accepts the first format it sees and has no clock,
/// so scheduling falls back to the sync link's own clock.
#[derive(Debug, Default)]
pub struct NullAudioOutput {
    format: Mutex<Option<AudioFormat>>,
    buffers: AtomicU64,
    playing: AtomicBool,
}

impl NullAudioOutput {
    pub fn buffers(&self) -> u64 {
        self.buffers.load(Ordering::Relaxed)
    }

    pub fn connected_format(&self) -> Option<AudioFormat> {
        *self.format.lock()
    }
}

impl AudioOutput for NullAudioOutput {
    fn format(&self) -> Option<AudioFormat> {
        *self.format.lock()
    }

    fn enqueue(&self, sample: DecodedSample) {
        let mut format = self.format.lock();
        if format.is_none() {
            *format = sample.audio_format;
        }
        self.buffers.fetch_add(1, Ordering::Relaxed);
    }

    fn current_time(&self) -> Option<f64> {
        None
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }

    fn start(&self) {
        self.playing.store(true, Ordering::Relaxed);
    }

    fn pause(&self, reset: bool) {
        self.playing.store(false, Ordering::Relaxed);
        if reset {
            *self.format.lock() = None;
        }
    }

    fn seek(&self, _time: f64) {}
}
