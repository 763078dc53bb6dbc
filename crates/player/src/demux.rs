// Serialized demux work queue: one task per segment loader drains chunk batches in order.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tracing::{Instrument, debug, trace};
use ts::{DemuxStats, Demuxer, Frame, ReadContext, split_batches};

use crate::config::DemuxConfig;
use crate::error::{PlayerError, Result};
use crate::media::{CompressedSample, StreamId};
use crate::signal::Signal;

enum DemuxJob {
    Data {
        generation: u64,
        data: Bytes,
        ctx: ReadContext,
    },
    Flush {
        generation: u64,
        ctx: ReadContext,
    },
}

impl DemuxJob {
    fn generation(&self) -> u64 {
        match self {
            DemuxJob::Data { generation, .. } | DemuxJob::Flush { generation, .. } => *generation,
        }
    }
}

struct Shared {
    stream: StreamId,
    demuxer: Mutex<Demuxer>,
    /// Bumped by every reset; queued work from older generations is discarded.
    generation: AtomicU64,
    running: AtomicBool,
    wake: Notify,
    output: Signal<CompressedSample>,
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    /// Wait until the queue is resumed. Returns false when the job went stale meanwhile.
    async fn wait_until_running(&self, generation: u64) -> bool {
        loop {
            let notified = self.wake.notified();
            if !self.is_current(generation) {
                return false;
            }
            if self.running.load(Ordering::Acquire) {
                return true;
            }
            notified.await;
        }
    }

    fn emit(&self, generation: u64, frames: Vec<Frame>) {
        for frame in frames {
            if !self.is_current(generation) {
                return;
            }
            self.output.send(&CompressedSample::new(self.stream, frame));
        }
    }
}

/// Handle to a demux task.
///
/// Chunks are split into batches of at most `batch_packets` packets and processed strictly
/// in submission order. Pausing holds queued work until [`DemuxWorker::start`];
/// [`DemuxWorker::reset`] discards queued work and clears all parser state. The task ends
/// when the handle is dropped.
pub struct DemuxWorker {
    shared: Arc<Shared>,
    tx: mpsc::Sender<DemuxJob>,
    batch_packets: usize,
}

impl DemuxWorker {
    /// Spawn the worker task. Must be called within a tokio runtime.
    pub fn spawn(stream: StreamId, config: &DemuxConfig) -> Self {
        let shared = Arc::new(Shared {
            stream,
            demuxer: Mutex::new(Demuxer::new(config.stale_threshold)),
            generation: AtomicU64::new(0),
            running: AtomicBool::new(false),
            wake: Notify::new(),
            output: Signal::new(),
        });
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));

        let span = tracing::debug_span!("demux", stream = %stream);
        tokio::spawn(Self::run(Arc::clone(&shared), rx).instrument(span));

        Self {
            shared,
            tx,
            batch_packets: config.batch_packets,
        }
    }

    async fn run(shared: Arc<Shared>, mut rx: mpsc::Receiver<DemuxJob>) {
        while let Some(job) = rx.recv().await {
            let generation = job.generation();
            if !shared.wait_until_running(generation).await {
                trace!(generation, "Discarding stale demux job");
                continue;
            }
            let frames = match job {
                DemuxJob::Data { data, ctx, .. } => shared.demuxer.lock().push(&data, ctx),
                DemuxJob::Flush { ctx, .. } => shared.demuxer.lock().flush(ctx),
            };
            shared.emit(generation, frames);
        }
        debug!("Demux task finished.");
    }

    pub fn stream(&self) -> StreamId {
        self.shared.stream
    }

    pub fn output(&self) -> &Signal<CompressedSample> {
        &self.shared.output
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn start(&self) {
        self.shared.running.store(true, Ordering::Release);
        self.shared.wake.notify_waiters();
    }

    pub fn pause(&self) {
        self.shared.running.store(false, Ordering::Release);
    }

    /// Pause, drop queued work and clear program tables, partial PES data, timestamp
    /// history, timeline anchor and the keyframe gate.
    pub fn reset(&self) {
        self.shared.running.store(false, Ordering::Release);
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        self.shared.demuxer.lock().reset();
        self.shared.wake.notify_waiters();
    }

    /// Queue a chunk for demuxing.
    pub async fn read(&self, data: Bytes, ctx: ReadContext) -> Result<()> {
        let generation = self.shared.generation.load(Ordering::Acquire);
        for batch in split_batches(data, self.batch_packets) {
            self.tx
                .send(DemuxJob::Data {
                    generation,
                    data: batch,
                    ctx,
                })
                .await
                .map_err(|_| PlayerError::QueueFull)?;
        }
        Ok(())
    }

    /// Queue completion of every partially assembled unit, used at end of stream.
    pub async fn finish(&self, ctx: ReadContext) -> Result<()> {
        let generation = self.shared.generation.load(Ordering::Acquire);
        self.tx
            .send(DemuxJob::Flush { generation, ctx })
            .await
            .map_err(|_| PlayerError::QueueFull)
    }

    pub fn stats(&self) -> DemuxStats {
        self.shared.demuxer.lock().stats()
    }
}
