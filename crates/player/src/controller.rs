// Loading Controller: manifest loading, variant choice and bandwidth-driven switching.

use std::sync::{Arc, Weak};

use hls::{Manifest, ResolvedVariant, Variant};
use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::config::AbrConfig;
use crate::error::{PlayerError, Result};
use crate::http::{NetworkMonitor, RequestRecord};
use crate::orchestrator::OrchestratedLoader;
use crate::resolver::VariantResolver;
use crate::signal::{Signal, Subscription};

/// Who picks the variant being played.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadingStrategy {
    /// The engine switches variants from observed throughput.
    #[default]
    Automatic,
    /// The variant with this bandwidth is played, whatever the network does.
    Pinned(u64),
}

impl LoadingStrategy {
    #[inline]
    pub fn is_pinned(&self) -> bool {
        matches!(self, LoadingStrategy::Pinned(_))
    }

    #[inline]
    pub fn is_automatic(&self) -> bool {
        matches!(self, LoadingStrategy::Automatic)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum LoadingState {
    #[default]
    Empty,
    Loading,
    Loaded(Arc<ResolvedVariant>),
}

/// Mean throughput in bytes per second over the most recent segment-like transfers.
///
/// A record is segment-like when its response exceeds `segment_min_bytes` or its URL path
/// ends with `segment_suffix`. Returns `None` without any such record.
pub fn mean_throughput(records: &[RequestRecord], config: &AbrConfig) -> Option<f64> {
    let mut segments: Vec<&RequestRecord> = records
        .iter()
        .filter(|r| {
            r.response_size > config.segment_min_bytes
                || r.url.path().ends_with(&config.segment_suffix)
        })
        .collect();
    if segments.is_empty() {
        return None;
    }
    segments.sort_by(|a, b| b.start_timestamp.cmp(&a.start_timestamp));
    let recent = &segments[..segments.len().min(config.sample_count.max(1))];
    let total: f64 = recent.iter().map(|r| r.throughput()).sum();
    Some((total / recent.len() as f64).trunc())
}

/// Index of the variant to play next.
///
/// The target is the highest bandwidth strictly below `mean`, or the lowest variant. Moving
/// up is limited to one step from `current`; moving down jumps straight to the target.
pub fn select_variant_index(bandwidths: &[u64], current: usize, mean: f64) -> Option<usize> {
    if bandwidths.is_empty() {
        return None;
    }
    let target = bandwidths
        .iter()
        .rposition(|&bandwidth| (bandwidth as f64) < mean)
        .unwrap_or(0);
    if target > current {
        Some((current + 1).min(bandwidths.len() - 1))
    } else {
        Some(target)
    }
}

#[derive(Default)]
struct ControllerState {
    loading: LoadingState,
    strategy: LoadingStrategy,
    manifest: Option<Manifest>,
    last_chosen: Option<Variant>,
    /// Variant being resolved and handed to the loader.
    last_expected: Option<Variant>,
    /// Bumped by every `start_loading` so stale manifest loads are ignored.
    generation: u64,
}

struct ControllerInner {
    resolver: Arc<VariantResolver>,
    loader: Arc<OrchestratedLoader>,
    config: AbrConfig,
    state: Mutex<ControllerState>,
    state_changed: Signal<LoadingState>,
}

/// Drives variant choice for one session.
#[derive(Clone)]
pub struct LoadingController {
    inner: Arc<ControllerInner>,
}

impl LoadingController {
    pub fn new(
        resolver: Arc<VariantResolver>,
        loader: Arc<OrchestratedLoader>,
        config: AbrConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                resolver,
                loader,
                config,
                state: Mutex::new(ControllerState::default()),
                state_changed: Signal::new(),
            }),
        }
    }

    pub fn state(&self) -> LoadingState {
        self.inner.state.lock().loading.clone()
    }

    /// Fires on every state transition.
    pub fn state_changed(&self) -> &Signal<LoadingState> {
        &self.inner.state_changed
    }

    pub fn strategy(&self) -> LoadingStrategy {
        self.inner.state.lock().strategy
    }

    /// Bandwidths a user can pin, empty for a single-variant manifest.
    pub fn loading_options(&self) -> Vec<u64> {
        self.inner
            .state
            .lock()
            .manifest
            .as_ref()
            .map(Manifest::bandwidths)
            .unwrap_or_default()
    }

    /// Feed completed-request batches of `monitor` into bandwidth estimation.
    pub fn watch(&self, monitor: &NetworkMonitor) -> Subscription {
        let weak: Weak<ControllerInner> = Arc::downgrade(&self.inner);
        monitor.batches().subscribe(move |records: &Vec<RequestRecord>| {
            if let Some(inner) = weak.upgrade() {
                LoadingController { inner }.records_updated(records);
            }
        })
    }

    /// Record a transition. The returned state is published once the lock is released.
    fn set_state(state: &mut ControllerState, loading: LoadingState) -> LoadingState {
        state.loading = loading.clone();
        loading
    }

    fn publish(&self, loading: Option<LoadingState>) {
        if let Some(loading) = loading {
            self.inner.state_changed.send(&loading);
        }
    }

    /// Load the manifest at `url` and choose its first variant: the pinned one when present,
    /// the lowest otherwise.
    pub async fn start_loading(&self, url: &Url) -> Result<()> {
        let (generation, loading) = {
            let mut state = self.inner.state.lock();
            state.generation += 1;
            state.manifest = None;
            state.last_chosen = None;
            state.last_expected = None;
            (state.generation, Self::set_state(&mut state, LoadingState::Loading))
        };
        self.publish(Some(loading));
        info!(url = %url, "Loading manifest");

        let manifest = match self.inner.resolver.load_manifest(url).await {
            Ok(manifest) => manifest,
            Err(e) => {
                error!(url = %url, error = %e, "Failed to load manifest");
                let emptied = {
                    let mut state = self.inner.state.lock();
                    (state.generation == generation && state.loading == LoadingState::Loading)
                        .then(|| Self::set_state(&mut state, LoadingState::Empty))
                };
                self.publish(emptied);
                return Err(e);
            }
        };

        let first = {
            let mut state = self.inner.state.lock();
            if state.generation != generation {
                debug!(url = %url, "Manifest superseded by a newer load");
                return Ok(());
            }
            let pinned = match state.strategy {
                LoadingStrategy::Pinned(bandwidth) => manifest.variant_with_bandwidth(bandwidth),
                LoadingStrategy::Automatic => None,
            };
            let first = pinned.or_else(|| manifest.lowest()).cloned();
            debug!(
                variants = manifest.variants.len(),
                master = manifest.is_master,
                "Manifest loaded"
            );
            state.manifest = Some(manifest);
            first
        };

        match first {
            Some(variant) => self.choose_variant(variant).await,
            None => {
                let emptied = Self::set_state(&mut self.inner.state.lock(), LoadingState::Empty);
                self.publish(Some(emptied));
                Err(PlayerError::MissingVariants)
            }
        }
    }

    /// Resolve `variant` and hand it to the loader, unless it repeats the last choice or
    /// the loader is mid-migration. A pinned strategy always dispatches.
    pub async fn choose_variant(&self, variant: Variant) -> Result<()> {
        let strategy = {
            let mut state = self.inner.state.lock();
            let fresh = state.last_chosen.as_ref() != Some(&variant)
                && state.last_expected.as_ref() != Some(&variant)
                && self.inner.loader.migration_allowed();
            if !fresh && state.strategy.is_automatic() {
                trace!(variant = %variant, "Skipping variant choice");
                return Ok(());
            }
            state.last_expected = Some(variant.clone());
            state.strategy
        };

        let chosen = match self.inner.resolver.resolve(&variant).await {
            Ok(resolved) => self
                .inner
                .loader
                .choose(Arc::clone(&resolved), strategy)
                .map(|()| resolved),
            Err(e) => Err(e),
        };

        match chosen {
            Ok(resolved) => {
                info!(
                    variant = %resolved.info.name,
                    bandwidth = resolved.info.bandwidth,
                    chunks = resolved.chunks.len(),
                    "Variant chosen"
                );
                let loaded = {
                    let mut state = self.inner.state.lock();
                    state.last_chosen = Some(Variant::Resolved(Arc::clone(&resolved)));
                    Self::set_state(&mut state, LoadingState::Loaded(resolved))
                };
                self.publish(Some(loaded));
                Ok(())
            }
            Err(e) => {
                let emptied = {
                    let mut state = self.inner.state.lock();
                    state.last_expected = None;
                    (state.loading == LoadingState::Loading)
                        .then(|| Self::set_state(&mut state, LoadingState::Empty))
                };
                self.publish(emptied);
                if e.is_choose_conflict() {
                    debug!(variant = %variant, error = %e, "Variant choice ignored");
                } else {
                    warn!(variant = %variant, error = %e, "Failed to choose variant");
                }
                Err(e)
            }
        }
    }

    /// Switch strategy. Pinning selects the variant with that bandwidth right away.
    pub async fn set_loading_strategy(&self, strategy: LoadingStrategy) -> Result<()> {
        let pinned = {
            let mut state = self.inner.state.lock();
            if state.strategy == strategy {
                return Ok(());
            }
            info!(?strategy, "Loading strategy changed");
            state.strategy = strategy;
            match strategy {
                LoadingStrategy::Pinned(bandwidth) => state
                    .manifest
                    .as_ref()
                    .and_then(|m| m.variant_with_bandwidth(bandwidth))
                    .cloned(),
                LoadingStrategy::Automatic => None,
            }
        };
        match pinned {
            Some(variant) => self.choose_variant(variant).await,
            None => Ok(()),
        }
    }

    /// Re-evaluate the variant from a batch of completed requests.
    pub fn records_updated(&self, records: &[RequestRecord]) {
        let next = {
            let state = self.inner.state.lock();
            if !state.strategy.is_automatic() {
                return;
            }
            let Some(manifest) = state.manifest.as_ref().filter(|m| m.is_master) else {
                return;
            };
            let Some(current) = self.inner.loader.current_variant() else {
                return;
            };
            let Some(current_index) = manifest
                .variants
                .iter()
                .position(|v| v.bandwidth() == current.info.bandwidth && v.url() == &current.info.url)
            else {
                return;
            };
            let Some(mean) = mean_throughput(records, &self.inner.config) else {
                return;
            };
            let Some(index) = select_variant_index(&manifest.bandwidths(), current_index, mean)
            else {
                return;
            };
            if index == current_index {
                trace!(mean, current = current_index, "Keeping variant");
                return;
            }
            debug!(mean, from = current_index, to = index, "Throughput suggests a new variant");
            manifest.variants[index].clone()
        };

        let controller = self.clone();
        tokio::spawn(async move {
            if let Err(e) = controller.choose_variant(next).await {
                debug!(error = %e, "Throughput-driven switch not applied");
            }
        });
    }
}
