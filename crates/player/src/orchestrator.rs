// Orchestrated Stream Loader: a two-slot arena (current + candidate) of segment loaders
// with glitch-free migration between variants.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use hls::ResolvedVariant;
use media_types::StreamKind;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, info};

use crate::clock::PlaybackClock;
use crate::config::{DemuxConfig, LoaderConfig, MigrationConfig};
use crate::controller::LoadingStrategy;
use crate::error::{PlayerError, Result};
use crate::media::{CompressedSample, StreamId};
use crate::resolver::ChunkLoader;
use crate::segment_loader::{ReadGate, SegmentLoader};
use crate::signal::{Signal, Subscription};

/// Stream kind and timestamp of a sample, as far as the cut-over rule is concerned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplePoint {
    pub kind: StreamKind,
    pub pts: f64,
}

impl From<&CompressedSample> for SamplePoint {
    fn from(sample: &CompressedSample) -> Self {
        Self {
            kind: sample.kind(),
            pts: sample.pts(),
        }
    }
}

/// Whether the candidate stream may take over after `last` was delivered.
///
/// All must hold: same stream kind, the candidate strictly after `last` by less than
/// `max_gap`, and the candidate more than `min_lead` ahead of the playback clock.
pub fn should_cut_over(
    last: SamplePoint,
    candidate: SamplePoint,
    now: f64,
    config: &MigrationConfig,
) -> bool {
    let gap = candidate.pts - last.pts;
    candidate.kind == last.kind
        && gap > 0.0
        && gap < config.max_gap
        && candidate.pts > now + config.min_lead
}

struct Slot {
    loader: SegmentLoader,
    /// Latest sample produced and not yet forwarded.
    sample: Option<CompressedSample>,
    _subscription: Subscription,
}

impl Slot {
    fn holds(&self, variant: &ResolvedVariant) -> bool {
        let info = &self.loader.variant().info;
        info.bandwidth == variant.info.bandwidth && info.url == variant.info.url
    }
}

#[derive(Default)]
struct OrchestratorState {
    migrating: bool,
    current: Option<Slot>,
    candidate: Option<Slot>,
    last: Option<SamplePoint>,
}

struct OrchestratorInner {
    chunk_loader: Arc<dyn ChunkLoader>,
    clock: PlaybackClock,
    gate: Option<Arc<dyn ReadGate>>,
    loader_config: LoaderConfig,
    demux_config: DemuxConfig,
    migration: MigrationConfig,
    running: AtomicBool,
    state: Mutex<OrchestratorState>,
    /// Bumped by seek and reset; queued samples of older epochs are not delivered.
    epoch: Arc<AtomicU64>,
    forward: mpsc::UnboundedSender<(u64, CompressedSample)>,
}

/// Owns the current and candidate segment loaders and forwards exactly one stream.
///
/// Forwarded samples are delivered on a dedicated task, in the order they were chosen.
pub struct OrchestratedLoader {
    inner: Arc<OrchestratorInner>,
    output: Signal<CompressedSample>,
}

impl OrchestratedLoader {
    /// Must be called within a tokio runtime.
    pub fn new(
        chunk_loader: Arc<dyn ChunkLoader>,
        clock: PlaybackClock,
        gate: Option<Arc<dyn ReadGate>>,
        loader_config: LoaderConfig,
        demux_config: DemuxConfig,
        migration: MigrationConfig,
    ) -> Self {
        let output = Signal::new();
        let (forward, mut rx) = mpsc::unbounded_channel::<(u64, CompressedSample)>();
        let sink = output.clone();
        let epoch = Arc::new(AtomicU64::new(0));
        let current_epoch = Arc::clone(&epoch);
        tokio::spawn(
            async move {
                while let Some((epoch, sample)) = rx.recv().await {
                    if epoch == current_epoch.load(Ordering::Acquire) {
                        sink.send(&sample);
                    }
                }
                debug!("Forwarding task finished.");
            }
            .instrument(tracing::debug_span!("orchestrator")),
        );

        Self {
            inner: Arc::new(OrchestratorInner {
                chunk_loader,
                clock,
                gate,
                loader_config,
                demux_config,
                migration,
                running: AtomicBool::new(false),
                state: Mutex::new(OrchestratorState::default()),
                epoch,
                forward,
            }),
            output,
        }
    }

    pub fn output(&self) -> &Signal<CompressedSample> {
        &self.output
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn is_migrating(&self) -> bool {
        self.inner.state.lock().migrating
    }

    /// A new variant may be proposed: no migration underway, and either playback is
    /// running or nothing is loaded yet.
    pub fn migration_allowed(&self) -> bool {
        let state = self.inner.state.lock();
        !state.migrating && (self.is_running() || state.current.is_none())
    }

    pub fn current_variant(&self) -> Option<Arc<ResolvedVariant>> {
        let state = self.inner.state.lock();
        state.current.as_ref().map(|s| Arc::clone(s.loader.variant()))
    }

    pub fn candidate_variant(&self) -> Option<Arc<ResolvedVariant>> {
        let state = self.inner.state.lock();
        state.candidate.as_ref().map(|s| Arc::clone(s.loader.variant()))
    }

    pub fn current_stream(&self) -> Option<StreamId> {
        let state = self.inner.state.lock();
        state.current.as_ref().map(|s| s.loader.stream())
    }

    /// Switch to `variant`.
    ///
    /// With nothing loaded, or under a pinned strategy, the current loader is replaced
    /// outright. Otherwise the variant becomes the migration candidate.
    pub fn choose(&self, variant: Arc<ResolvedVariant>, strategy: LoadingStrategy) -> Result<()> {
        let mut state = self.inner.state.lock();
        let single_stream = strategy.is_pinned();
        if single_stream {
            Self::stop_migration(&mut state);
        }

        if state.current.as_ref().is_some_and(|s| s.holds(&variant)) {
            return Err(PlayerError::failed_to_choose(&variant.info.name, "already current"));
        }
        if state.candidate.as_ref().is_some_and(|s| s.holds(&variant)) {
            return Err(PlayerError::failed_to_choose(&variant.info.name, "already pending"));
        }
        if state.migrating {
            return Err(PlayerError::failed_to_choose(&variant.info.name, "migration in progress"));
        }

        let running = self.is_running();
        let slot = self.make_slot(Arc::clone(&variant));
        if state.current.is_none() || single_stream {
            info!(variant = %variant.info.name, bandwidth = variant.info.bandwidth, "Replacing current stream");
            if let Some(old) = state.current.replace(slot) {
                old.loader.pause(true);
            }
            state.last = None;
            if running
                && let Some(current) = &state.current
            {
                current.loader.start();
            }
        } else {
            info!(variant = %variant.info.name, bandwidth = variant.info.bandwidth, "Starting migration");
            state.candidate = Some(slot);
            if running {
                state.migrating = true;
                if let Some(candidate) = &state.candidate {
                    candidate.loader.start();
                }
            }
        }
        Ok(())
    }

    /// Loader positioned at the playback clock, reporting into this orchestrator.
    fn make_slot(&self, variant: Arc<ResolvedVariant>) -> Slot {
        let loader = SegmentLoader::spawn(
            variant,
            Arc::clone(&self.inner.chunk_loader),
            self.inner.clock.clone(),
            self.inner.gate.clone(),
            self.inner.loader_config.clone(),
            &self.inner.demux_config,
        );
        loader.seek(self.inner.clock.now().unwrap_or(0.0));

        let weak: Weak<OrchestratorInner> = Arc::downgrade(&self.inner);
        let stream = loader.stream();
        let subscription = loader.output().subscribe(move |sample: &CompressedSample| {
            if let Some(inner) = weak.upgrade() {
                inner.on_sample(stream, sample.clone());
            }
        });
        Slot {
            loader,
            sample: None,
            _subscription: subscription,
        }
    }

    fn stop_migration(state: &mut OrchestratorState) {
        state.migrating = false;
        if let Some(candidate) = state.candidate.take() {
            debug!(variant = %candidate.loader.variant().info.name, "Discarding migration candidate");
            candidate.loader.pause(true);
        }
    }

    /// Cancel any pending migration and move the current loader to `time`.
    pub fn seek(&self, time: f64) {
        let mut state = self.inner.state.lock();
        Self::stop_migration(&mut state);
        state.last = None;
        self.inner.epoch.fetch_add(1, Ordering::AcqRel);
        if let Some(current) = &mut state.current {
            current.sample = None;
            current.loader.seek(time);
        }
    }

    pub fn start(&self) {
        self.inner.running.store(true, Ordering::Release);
        let mut state = self.inner.state.lock();
        if let Some(current) = &state.current {
            current.loader.start();
        }
        if let Some(candidate) = &state.candidate {
            candidate.loader.start();
            state.migrating = true;
        }
    }

    pub fn pause(&self, reset: bool) {
        self.inner.running.store(false, Ordering::Release);
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        for slot in [&mut state.current, &mut state.candidate].into_iter().flatten() {
            slot.loader.pause(reset);
            if reset {
                slot.sample = None;
            }
        }
        if reset {
            state.last = None;
            self.inner.epoch.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Drop both loaders.
    pub fn clear(&self) {
        self.inner.running.store(false, Ordering::Release);
        let mut state = self.inner.state.lock();
        Self::stop_migration(&mut state);
        if let Some(current) = state.current.take() {
            current.loader.pause(true);
        }
        state.last = None;
        self.inner.epoch.fetch_add(1, Ordering::AcqRel);
    }
}

impl OrchestratorInner {
    fn on_sample(&self, stream: StreamId, sample: CompressedSample) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let slot = [&mut state.current, &mut state.candidate]
            .into_iter()
            .flatten()
            .find(|slot| slot.loader.stream() == stream);
        let Some(slot) = slot else {
            return;
        };
        slot.sample = Some(sample);
        self.update(state);
    }

    /// Forward exactly one sample: the candidate's when cut-over conditions hold,
    /// otherwise the current stream's pending one.
    fn update(&self, state: &mut OrchestratorState) {
        let cut_over = state.migrating
            && match (
                self.clock.now(),
                state.last,
                state.candidate.as_ref().and_then(|c| c.sample.as_ref()),
            ) {
                (Some(now), Some(last), Some(future)) => {
                    should_cut_over(last, future.into(), now, &self.migration)
                }
                _ => false,
            };

        if cut_over && let Some(candidate) = state.candidate.take() {
            state.migrating = false;
            if let Some(old) = state.current.replace(candidate) {
                old.loader.pause(true);
            }
            if let Some(current) = &state.current {
                info!(
                    variant = %current.loader.variant().info.name,
                    stream = %current.loader.stream(),
                    "Migration complete"
                );
            }
        }

        if let Some(sample) = state.current.as_mut().and_then(|s| s.sample.take()) {
            let point = SamplePoint::from(&sample);
            state.last = Some(point);
            if self.forward.send((self.epoch.load(Ordering::Acquire), sample)).is_err() {
                debug!(pts = point.pts, kind = ?point.kind, "Forwarding task gone, sample dropped");
            }
        }
    }
}
