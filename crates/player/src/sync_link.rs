//! Time-ordered delivery of decoded samples against the playback clock.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, trace};

use crate::clock::MediaClock;
use crate::config::SyncLinkConfig;
use crate::media::{AudioOutput, DecodedSample};
use crate::signal::Signal;

/// Heap entry ordered so that the smallest timestamp is popped first.
struct Pending(DecodedSample);

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.pts.total_cmp(&self.0.pts)
    }
}

#[derive(Default)]
struct LinkState {
    heap: BinaryHeap<Pending>,
    /// Audio whose format differs from the one the output is connected with.
    audio_fifo: VecDeque<DecodedSample>,
    clock: MediaClock,
    running: bool,
}

struct LinkInner {
    config: SyncLinkConfig,
    state: Mutex<LinkState>,
    audio: Option<Arc<dyn AudioOutput>>,
    output: Signal<DecodedSample>,
    garbage: mpsc::UnboundedSender<Vec<DecodedSample>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for LinkInner {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.get_mut().take() {
            ticker.abort();
        }
    }
}

/// Merges decoded samples into one schedule driven by a periodic tick.
///
/// Video samples wait in a min-heap until their timestamp is reached by the audio clock,
/// or by the link's own clock while audio is not anchored. Audio samples go straight to
/// the audio output unless their format differs from the connected one.
#[derive(Clone)]
pub struct SyncLink {
    inner: Arc<LinkInner>,
}

impl SyncLink {
    /// Must be called within a tokio runtime.
    pub fn new(config: SyncLinkConfig, audio: Option<Arc<dyn AudioOutput>>) -> Self {
        let (garbage, mut rx) = mpsc::unbounded_channel::<Vec<DecodedSample>>();
        // Large payloads are released off the tick path.
        tokio::spawn(async move {
            while let Some(batch) = rx.recv().await {
                drop(batch);
            }
        });

        Self {
            inner: Arc::new(LinkInner {
                config,
                state: Mutex::new(LinkState::default()),
                audio,
                output: Signal::new(),
                garbage,
                ticker: Mutex::new(None),
            }),
        }
    }

    /// Video samples whose time has come.
    pub fn output(&self) -> &Signal<DecodedSample> {
        &self.inner.output
    }

    pub fn pending(&self) -> usize {
        self.inner.state.lock().heap.len()
    }

    /// Whether upstream may keep reading; false once the heap reached its capacity.
    pub fn allows_to_read(&self) -> bool {
        self.pending() < self.inner.config.capacity
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().running
    }

    pub fn enqueue_video(&self, sample: DecodedSample) {
        self.inner.state.lock().heap.push(Pending(sample));
    }

    pub fn enqueue_audio(&self, sample: DecodedSample) {
        let Some(audio) = &self.inner.audio else {
            trace!(pts = sample.pts, "No audio output, dropping audio sample");
            return;
        };
        match audio.format() {
            Some(format) if sample.audio_format != Some(format) => {
                self.inner.state.lock().audio_fifo.push_back(sample);
            }
            _ => audio.enqueue(sample),
        }
        self.unload_queue_if_needed();
    }

    /// Hand queued audio to an idle output: every leading buffer sharing the head's format.
    /// A paused link keeps its queue.
    fn unload_queue_if_needed(&self) {
        let Some(audio) = &self.inner.audio else {
            return;
        };
        if audio.is_playing() {
            return;
        }
        let batch: Vec<DecodedSample> = {
            let mut state = self.inner.state.lock();
            if !state.running {
                return;
            }
            let Some(format) = state.audio_fifo.front().map(|s| s.audio_format) else {
                return;
            };
            let take = state
                .audio_fifo
                .iter()
                .take_while(|s| s.audio_format == format)
                .count();
            state.audio_fifo.drain(..take).collect()
        };
        debug!(buffers = batch.len(), "Flushing queued audio to idle output");
        for sample in batch {
            audio.enqueue(sample);
        }
    }

    /// Dispatch every pending sample whose timestamp is not in the future.
    pub fn tick(&self) {
        let due = self.take_due();
        if !due.is_empty() {
            trace!(count = due.len(), "Dispatching due samples");
            for sample in &due {
                self.inner.output.send(sample);
            }
            if self.inner.garbage.send(due).is_err() {
                debug!("Release task gone, dropping dispatched samples inline");
            }
        }
        self.unload_queue_if_needed();
    }

    fn take_due(&self) -> Vec<DecodedSample> {
        let mut state = self.inner.state.lock();
        if !state.running {
            return Vec::new();
        }
        let audio_time = self.inner.audio.as_ref().and_then(|a| a.current_time());
        let now = match audio_time {
            Some(time) => Some(time),
            None => {
                if !state.clock.is_anchored()
                    && let Some(first) = state.heap.peek().map(|p| p.0.pts)
                {
                    state.clock.anchor(first);
                }
                state.clock.now()
            }
        };
        let Some(now) = now else {
            return Vec::new();
        };

        let mut due = Vec::new();
        while state.heap.peek().is_some_and(|p| p.0.pts <= now) {
            if let Some(Pending(sample)) = state.heap.pop() {
                due.push(sample);
            }
        }
        due
    }

    pub fn start(&self) {
        {
            let mut state = self.inner.state.lock();
            state.running = true;
            state.clock.start();
        }
        let mut ticker = self.inner.ticker.lock();
        if ticker.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let weak: Weak<LinkInner> = Arc::downgrade(&self.inner);
        let period = self.inner.config.tick_interval;
        *ticker = Some(tokio::spawn(
            async move {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    interval.tick().await;
                    let Some(inner) = weak.upgrade() else {
                        break;
                    };
                    SyncLink { inner }.tick();
                }
            }
            .instrument(tracing::debug_span!("sync_link")),
        ));
    }

    pub fn pause(&self, reset: bool) {
        {
            let mut state = self.inner.state.lock();
            state.running = false;
            state.clock.pause();
        }
        if let Some(ticker) = self.inner.ticker.lock().take() {
            ticker.abort();
        }
        if reset {
            self.reset();
        }
    }

    /// Drop all pending samples and forget the clock anchor.
    pub fn reset(&self) {
        let (heap, fifo) = {
            let mut state = self.inner.state.lock();
            state.clock.reset();
            (
                std::mem::take(&mut state.heap),
                std::mem::take(&mut state.audio_fifo),
            )
        };
        let dropped: Vec<DecodedSample> = heap
            .into_vec()
            .into_iter()
            .map(|Pending(s)| s)
            .chain(fifo)
            .collect();
        if !dropped.is_empty() {
            debug!(dropped = dropped.len(), "Sync link reset");
            if self.inner.garbage.send(dropped).is_err() {
                debug!("Release task gone, dropping reset samples inline");
            }
        }
    }

    /// Restart delivery from `time`.
    pub fn seek(&self, time: f64) {
        self.reset();
        self.inner.state.lock().clock.anchor(time);
        self.start();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::AudioFormat;
    use media_types::StreamKind;
    use std::time::Duration;

    fn video(pts: f64) -> DecodedSample {
        DecodedSample {
            kind: StreamKind::Video,
            pts,
            duration: 0.033,
            audio_format: None,
            data: bytes::Bytes::new(),
        }
    }

    fn audio(pts: f64, sample_rate: u32) -> DecodedSample {
        DecodedSample {
            kind: StreamKind::Audio,
            pts,
            duration: 0.023,
            audio_format: Some(AudioFormat {
                sample_rate,
                channels: 2,
            }),
            data: bytes::Bytes::new(),
        }
    }

    #[derive(Default)]
    struct FakeAudio {
        format: Mutex<Option<AudioFormat>>,
        time: Mutex<Option<f64>>,
        playing: Mutex<bool>,
        received: Mutex<Vec<f64>>,
    }

    impl AudioOutput for FakeAudio {
        fn format(&self) -> Option<AudioFormat> {
            *self.format.lock()
        }
        fn enqueue(&self, sample: DecodedSample) {
            self.received.lock().push(sample.pts);
        }
        fn current_time(&self) -> Option<f64> {
            *self.time.lock()
        }
        fn is_playing(&self) -> bool {
            *self.playing.lock()
        }
        fn start(&self) {}
        fn pause(&self, _reset: bool) {}
        fn seek(&self, _time: f64) {}
    }

    fn record(link: &SyncLink) -> (Arc<Mutex<Vec<f64>>>, crate::Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = link
            .output()
            .subscribe(move |s: &DecodedSample| sink.lock().push(s.pts));
        (seen, sub)
    }

    #[tokio::test]
    async fn test_audio_clock_orders_delivery() {
        let fake = Arc::new(FakeAudio::default());
        let link = SyncLink::new(SyncLinkConfig::default(), Some(fake.clone()));
        let (seen, _sub) = record(&link);

        for pts in [0.3, 0.1, 0.2, 5.0] {
            link.enqueue_video(video(pts));
        }
        // Drive ticks by hand instead of spawning the ticker.
        link.inner.state.lock().running = true;

        *fake.time.lock() = Some(0.25);
        link.tick();
        assert_eq!(*seen.lock(), vec![0.1, 0.2]);

        *fake.time.lock() = Some(1.0);
        link.tick();
        assert_eq!(*seen.lock(), vec![0.1, 0.2, 0.3]);
        assert_eq!(link.pending(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_own_clock_anchors_to_first_sample() {
        let link = SyncLink::new(SyncLinkConfig::default(), None);
        let (seen, _sub) = record(&link);
        for pts in [10.0, 10.1, 10.5] {
            link.enqueue_video(video(pts));
        }
        link.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*seen.lock(), vec![10.0]);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(*seen.lock(), vec![10.0, 10.1]);
    }

    #[tokio::test]
    async fn test_capacity_gates_reading() {
        let config = SyncLinkConfig {
            capacity: 3,
            ..Default::default()
        };
        let link = SyncLink::new(config, None);
        for i in 0..2 {
            link.enqueue_video(video(i as f64));
        }
        assert!(link.allows_to_read());
        link.enqueue_video(video(2.0));
        assert!(!link.allows_to_read());
        link.reset();
        assert!(link.allows_to_read());
        assert_eq!(link.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_seek_drops_pending_and_reanchors() {
        let link = SyncLink::new(SyncLinkConfig::default(), None);
        let (seen, _sub) = record(&link);
        link.enqueue_video(video(1.0));
        link.seek(30.0);
        assert_eq!(link.pending(), 0);
        link.enqueue_video(video(30.0));
        link.enqueue_video(video(31.0));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(*seen.lock(), vec![30.0]);
    }

    #[tokio::test]
    async fn test_audio_with_new_format_waits_for_idle_output() {
        let fake = Arc::new(FakeAudio::default());
        *fake.format.lock() = Some(AudioFormat {
            sample_rate: 44100,
            channels: 2,
        });
        *fake.playing.lock() = true;
        let link = SyncLink::new(SyncLinkConfig::default(), Some(fake.clone()));
        link.inner.state.lock().running = true;

        link.enqueue_audio(audio(0.0, 44100));
        link.enqueue_audio(audio(0.1, 48000));
        link.enqueue_audio(audio(0.2, 48000));
        assert_eq!(*fake.received.lock(), vec![0.0]);

        *fake.playing.lock() = false;
        link.enqueue_audio(audio(0.3, 44100));
        assert_eq!(*fake.received.lock(), vec![0.0, 0.3, 0.1, 0.2]);
    }

    #[tokio::test]
    async fn test_paused_link_holds_queued_audio() {
        let fake = Arc::new(FakeAudio::default());
        *fake.format.lock() = Some(AudioFormat {
            sample_rate: 44100,
            channels: 2,
        });
        let link = SyncLink::new(SyncLinkConfig::default(), Some(fake.clone()));

        link.enqueue_audio(audio(0.1, 48000));
        link.enqueue_audio(audio(0.2, 48000));
        link.unload_queue_if_needed();
        assert!(fake.received.lock().is_empty());
        assert_eq!(link.inner.state.lock().audio_fifo.len(), 2);

        link.inner.state.lock().running = true;
        link.tick();
        assert_eq!(*fake.received.lock(), vec![0.1, 0.2]);
    }
}
