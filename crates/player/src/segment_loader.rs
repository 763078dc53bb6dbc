// Segment Stream Loader: per-variant chunk scheduler feeding a demux worker.
//
// One task per loader walks the chunk list. Each pass picks a single step: wait, fetch
// the chunk at `position`, decode it from the ring cache, or flush the demuxer at the end
// of the list. Fetches are limited to chunks starting within the look-ahead window of
// the playback clock; decoding waits while the sync link refuses more samples.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use hls::ResolvedVariant;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, trace, warn};
use ts::{DemuxStats, ReadContext};

use crate::clock::PlaybackClock;
use crate::config::{DemuxConfig, LoaderConfig};
use crate::demux::DemuxWorker;
use crate::error::PlayerError;
use crate::media::{CompressedSample, StreamId};
use crate::resolver::ChunkLoader;
use crate::ring::RingBuffer;
use crate::signal::Signal;
use crate::sync_link::SyncLink;

/// Downstream backpressure: whether more samples may be produced right now.
pub trait ReadGate: Send + Sync {
    fn allows_to_read(&self) -> bool;
}

impl ReadGate for SyncLink {
    fn allows_to_read(&self) -> bool {
        SyncLink::allows_to_read(self)
    }
}

#[derive(Debug, Clone)]
struct LoadedChunk {
    index: usize,
    data: Bytes,
}

struct LoaderState {
    running: bool,
    /// Set by `start` until the next chunk is decoded: load without consulting the clock.
    kick: bool,
    position: usize,
    cache: RingBuffer<LoadedChunk>,
    last_loaded: Option<usize>,
    last_decoded: Option<usize>,
    consecutive_failures: u32,
    finished: bool,
    /// Bumped by pause, seek and reset so results of older steps are ignored.
    epoch: u64,
    request: CancellationToken,
}

enum Step {
    Stop,
    Wait(Duration),
    Fetch {
        epoch: u64,
        index: usize,
        token: CancellationToken,
    },
    Decode {
        epoch: u64,
        index: usize,
        data: Bytes,
    },
    Finish {
        epoch: u64,
    },
}

struct LoaderInner {
    stream: StreamId,
    variant: Arc<ResolvedVariant>,
    chunk_loader: Arc<dyn ChunkLoader>,
    clock: PlaybackClock,
    gate: Option<Arc<dyn ReadGate>>,
    config: LoaderConfig,
    demux: DemuxWorker,
    state: Mutex<LoaderState>,
    wake: Notify,
    shutdown: CancellationToken,
}

/// Loads and demuxes the chunks of one resolved variant.
///
/// The loader task stops when the handle is dropped.
pub struct SegmentLoader {
    inner: Arc<LoaderInner>,
}

impl SegmentLoader {
    /// Spawn the loader and its demux worker. Must be called within a tokio runtime.
    pub fn spawn(
        variant: Arc<ResolvedVariant>,
        chunk_loader: Arc<dyn ChunkLoader>,
        clock: PlaybackClock,
        gate: Option<Arc<dyn ReadGate>>,
        config: LoaderConfig,
        demux_config: &DemuxConfig,
    ) -> Self {
        let stream = StreamId::next();
        let shutdown = CancellationToken::new();
        let inner = Arc::new(LoaderInner {
            stream,
            demux: DemuxWorker::spawn(stream, demux_config),
            state: Mutex::new(LoaderState {
                running: false,
                kick: false,
                position: 0,
                cache: RingBuffer::new(config.cache_capacity),
                last_loaded: None,
                last_decoded: None,
                consecutive_failures: 0,
                finished: false,
                epoch: 0,
                request: shutdown.child_token(),
            }),
            variant,
            chunk_loader,
            clock,
            gate,
            config,
            wake: Notify::new(),
            shutdown,
        });

        let span = tracing::debug_span!(
            "segment_loader",
            stream = %stream,
            variant = %inner.variant.info.name
        );
        tokio::spawn(Arc::clone(&inner).run().instrument(span));
        Self { inner }
    }

    pub fn stream(&self) -> StreamId {
        self.inner.stream
    }

    pub fn variant(&self) -> &Arc<ResolvedVariant> {
        &self.inner.variant
    }

    pub fn output(&self) -> &Signal<CompressedSample> {
        self.inner.demux.output()
    }

    pub fn position(&self) -> usize {
        self.inner.state.lock().position
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().running
    }

    pub fn demux_stats(&self) -> DemuxStats {
        self.inner.demux.stats()
    }

    pub fn start(&self) {
        {
            let mut state = self.inner.state.lock();
            state.running = true;
            state.kick = true;
        }
        info!(stream = %self.inner.stream, variant = %self.inner.variant.info.name, "Loader started");
        self.inner.demux.start();
        self.inner.wake.notify_one();
    }

    pub fn pause(&self, reset: bool) {
        {
            let mut state = self.inner.state.lock();
            state.running = false;
            state.kick = false;
            Self::invalidate(&self.inner, &mut state);
            if reset {
                state.cache.clear();
                state.last_loaded = None;
                state.finished = false;
            }
        }
        debug!(stream = %self.inner.stream, reset, "Loader paused");
        self.inner.demux.pause();
        if reset {
            self.inner.demux.reset();
        }
        self.inner.wake.notify_one();
    }

    /// Move to the chunk with the greatest start time not after `time` and reset the
    /// demuxer. A running loader must be started again afterwards.
    pub fn seek(&self, time: f64) {
        let position = {
            let mut state = self.inner.state.lock();
            state.position = self.inner.variant.chunk_index_at(time);
            state.last_decoded = None;
            state.last_loaded = None;
            state.finished = false;
            state.cache.clear();
            Self::invalidate(&self.inner, &mut state);
            state.position
        };
        debug!(stream = %self.inner.stream, time, position, "Loader seeked");
        self.inner.demux.reset();
        self.inner.wake.notify_one();
    }

    fn invalidate(inner: &LoaderInner, state: &mut LoaderState) {
        state.epoch += 1;
        state.request.cancel();
        state.request = inner.shutdown.child_token();
    }
}

impl Drop for SegmentLoader {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl LoaderInner {
    async fn run(self: Arc<Self>) {
        loop {
            match self.next_step() {
                Step::Stop => break,
                Step::Wait(delay) => self.wait(delay).await,
                Step::Fetch {
                    epoch,
                    index,
                    token,
                } => self.fetch(epoch, index, token).await,
                Step::Decode { epoch, index, data } => {
                    if !self.decode(epoch, index, data).await {
                        self.wait(self.config.idle_interval).await;
                    }
                }
                Step::Finish { epoch } => self.finish(epoch).await,
            }
        }
        debug!("Loader task finished.");
    }

    async fn wait(&self, delay: Duration) {
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = self.wake.notified() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }

    /// Sit out the failure cooldown. Only pause, seek or shutdown end it early.
    async fn cool_down(&self, epoch: u64) {
        let deadline = tokio::time::Instant::now() + self.config.failure_cooldown;
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep_until(deadline) => return,
                _ = self.wake.notified() => {
                    if self.state.lock().epoch != epoch {
                        return;
                    }
                }
            }
        }
    }

    fn next_step(&self) -> Step {
        if self.shutdown.is_cancelled() {
            return Step::Stop;
        }
        let mut state = self.state.lock();
        if !state.running {
            return Step::Wait(self.config.idle_interval);
        }
        let kick = state.kick;
        let position = state.position;

        let Some(chunk) = self.variant.chunk(position) else {
            if state.finished {
                return Step::Wait(self.config.idle_interval);
            }
            return Step::Finish { epoch: state.epoch };
        };

        if !kick {
            let Some(now) = self.clock.now() else {
                return Step::Wait(self.config.idle_interval);
            };
            if chunk.start_time - now >= self.config.look_ahead.as_secs_f64() {
                return Step::Wait(self.config.idle_interval);
            }
        }

        if let Some(data) = Self::cached(&state.cache, position) {
            if self.gate.as_ref().is_some_and(|g| !g.allows_to_read()) {
                trace!(position, "Sync link full, holding cached chunk");
                return Step::Wait(self.config.backpressure_interval);
            }
            return Step::Decode {
                epoch: state.epoch,
                index: position,
                data,
            };
        }

        if !kick
            && (state.last_loaded == Some(position) || state.last_decoded == Some(position))
        {
            return Step::Wait(self.config.idle_interval);
        }

        Step::Fetch {
            epoch: state.epoch,
            index: position,
            token: state.request.clone(),
        }
    }

    /// Cached payload for chunk `index`, located relative to the cache head.
    fn cached(cache: &RingBuffer<LoadedChunk>, index: usize) -> Option<Bytes> {
        let head = cache.first()?;
        let location = index.checked_sub(head.index)?;
        cache
            .at(location)
            .filter(|loaded| loaded.index == index)
            .map(|loaded| loaded.data.clone())
    }

    async fn fetch(&self, epoch: u64, index: usize, token: CancellationToken) {
        let Some(chunk) = self.variant.chunk(index) else {
            return;
        };
        debug!(position = index, uri = %chunk.uri, "Loading chunk");
        let result = tokio::select! {
            _ = token.cancelled() => Err(PlayerError::Cancelled),
            result = self.chunk_loader.load_chunk(chunk, &token) => result,
        };

        match result {
            Ok(data) => {
                let mut state = self.state.lock();
                if state.epoch != epoch {
                    return;
                }
                trace!(position = index, bytes = data.len(), start = chunk.start_time, "Chunk received");
                state.cache.enqueue(LoadedChunk { index, data });
                state.last_loaded = Some(index);
                state.consecutive_failures = 0;
            }
            Err(PlayerError::Cancelled) => {
                trace!(position = index, "Chunk load cancelled");
            }
            Err(e) => {
                let failures = {
                    let mut state = self.state.lock();
                    state.consecutive_failures += 1;
                    state.consecutive_failures
                };
                warn!(
                    position = index,
                    uri = %chunk.uri,
                    failures,
                    error = %e,
                    "Failed to load chunk"
                );
                self.cool_down(epoch).await;
            }
        }
    }

    /// Feed a chunk to the demuxer. Returns false when the demuxer is not active.
    async fn decode(&self, epoch: u64, index: usize, data: Bytes) -> bool {
        if !self.demux.is_running() {
            return false;
        }
        let chunk_start = {
            let mut state = self.state.lock();
            if state.epoch != epoch || state.position != index {
                return true;
            }
            state.last_decoded = Some(index);
            state.position = index + 1;
            state.kick = false;
            self.variant.chunk(index).map_or(0.0, |c| c.start_time)
        };
        let ctx = ReadContext {
            chunk_start,
            read_from: self.clock.now().unwrap_or(0.0),
        };
        trace!(position = index, bytes = data.len(), read_from = ctx.read_from, "Decoding chunk");
        if let Err(e) = self.demux.read(data, ctx).await {
            warn!(position = index, error = %e, "Demux queue rejected chunk");
        }
        true
    }

    async fn finish(&self, epoch: u64) {
        {
            let mut state = self.state.lock();
            if state.epoch != epoch {
                return;
            }
            state.finished = true;
        }
        info!(chunks = self.variant.chunks.len(), "Reached end of variant");
        let ctx = ReadContext {
            chunk_start: self.variant.full_duration(),
            read_from: self.clock.now().unwrap_or(0.0),
        };
        if let Err(e) = self.demux.finish(ctx).await {
            warn!(error = %e, "Failed to flush demuxer");
        }
    }
}
