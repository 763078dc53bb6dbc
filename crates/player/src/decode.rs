use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use media_types::StreamKind;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, warn};

use crate::media::{CompressedSample, Decoder};
use crate::sync_link::SyncLink;

struct StageState {
    running: AtomicBool,
    generation: AtomicU64,
}

/// Two decode workers, one per stream kind, feeding the sync link.
///
/// Video output goes to the link's heap, audio output to the link's audio path. Samples
/// submitted before a reset, or while the stage is stopped, are dropped.
pub struct DecodeStage {
    state: Arc<StageState>,
    video_tx: mpsc::UnboundedSender<(u64, CompressedSample)>,
    audio_tx: mpsc::UnboundedSender<(u64, CompressedSample)>,
    video_decoder: Arc<dyn Decoder>,
    audio_decoder: Arc<dyn Decoder>,
}

impl DecodeStage {
    /// Must be called within a tokio runtime.
    pub fn spawn(
        video_decoder: Arc<dyn Decoder>,
        audio_decoder: Arc<dyn Decoder>,
        link: SyncLink,
    ) -> Self {
        let state = Arc::new(StageState {
            running: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        });
        let (video_tx, video_rx) = mpsc::unbounded_channel();
        let (audio_tx, audio_rx) = mpsc::unbounded_channel();

        for (kind, rx, decoder) in [
            (StreamKind::Video, video_rx, Arc::clone(&video_decoder)),
            (StreamKind::Audio, audio_rx, Arc::clone(&audio_decoder)),
        ] {
            let span = tracing::debug_span!("decode", kind = %kind);
            tokio::spawn(
                Self::run(kind, rx, decoder, Arc::clone(&state), link.clone()).instrument(span),
            );
        }

        Self {
            state,
            video_tx,
            audio_tx,
            video_decoder,
            audio_decoder,
        }
    }

    async fn run(
        kind: StreamKind,
        mut rx: mpsc::UnboundedReceiver<(u64, CompressedSample)>,
        decoder: Arc<dyn Decoder>,
        state: Arc<StageState>,
        link: SyncLink,
    ) {
        while let Some((generation, sample)) = rx.recv().await {
            let current = || {
                state.running.load(Ordering::Acquire)
                    && state.generation.load(Ordering::Acquire) == generation
            };
            if !current() {
                continue;
            }
            let pts = sample.pts();
            match decoder.decode(sample).await {
                Ok(decoded) if current() => match kind {
                    StreamKind::Video => link.enqueue_video(decoded),
                    StreamKind::Audio => link.enqueue_audio(decoded),
                },
                Ok(_) => {}
                Err(e) => warn!(pts, error = %e, "Decode failed, skipping sample"),
            }
        }
        debug!("Decode task finished.");
    }

    pub fn submit(&self, sample: CompressedSample) {
        let generation = self.state.generation.load(Ordering::Acquire);
        let tx = match sample.kind() {
            StreamKind::Video => &self.video_tx,
            StreamKind::Audio => &self.audio_tx,
        };
        let pts = sample.pts();
        if tx.send((generation, sample)).is_err() {
            debug!(pts, "Decode task gone, dropping sample");
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::Acquire)
    }

    pub fn start(&self) {
        self.state.running.store(true, Ordering::Release);
    }

    /// A plain pause keeps decoding what is queued; a reset stops the workers and
    /// invalidates everything submitted so far.
    pub fn pause(&self, reset: bool) {
        if !reset {
            return;
        }
        self.state.running.store(false, Ordering::Release);
        self.state.generation.fetch_add(1, Ordering::AcqRel);
        self.video_decoder.reset();
        self.audio_decoder.reset();
    }

    /// Restart decoding at a new position.
    pub fn seek(&self) {
        self.pause(true);
        self.start();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncLinkConfig;
    use crate::media::{PassthroughDecoder, StreamId};
    use bytes::Bytes;
    use std::time::Duration;
    use ts::{CodecConfig, Frame, StreamType};

    fn sample(pts: f64) -> CompressedSample {
        CompressedSample::new(
            StreamId::next(),
            Frame {
                pid: 0x100,
                stream_type: StreamType::H264,
                kind: StreamKind::Video,
                pts,
                dts: pts,
                duration: 0.033,
                is_sync: true,
                data: Bytes::from_static(b"au"),
                codec_config: CodecConfig::None,
            },
        )
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_video_reaches_link() {
        let link = SyncLink::new(SyncLinkConfig::default(), None);
        let stage = DecodeStage::spawn(
            Arc::new(PassthroughDecoder),
            Arc::new(PassthroughDecoder),
            link.clone(),
        );
        stage.start();
        stage.submit(sample(1.0));
        stage.submit(sample(2.0));
        settle().await;
        assert_eq!(link.pending(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_running_drops_silently() {
        let link = SyncLink::new(SyncLinkConfig::default(), None);
        let stage = DecodeStage::spawn(
            Arc::new(PassthroughDecoder),
            Arc::new(PassthroughDecoder),
            link.clone(),
        );
        stage.submit(sample(1.0));
        settle().await;
        assert_eq!(link.pending(), 0);

        stage.start();
        stage.pause(false);
        stage.submit(sample(2.0));
        settle().await;
        assert_eq!(link.pending(), 1);

        stage.pause(true);
        stage.submit(sample(3.0));
        settle().await;
        assert_eq!(link.pending(), 1);
    }

    #[test]
    fn test_submit_after_runtime_shutdown_is_dropped() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (stage, link) = runtime.block_on(async {
            let link = SyncLink::new(SyncLinkConfig::default(), None);
            let stage = DecodeStage::spawn(
                Arc::new(PassthroughDecoder),
                Arc::new(PassthroughDecoder),
                link.clone(),
            );
            stage.start();
            (stage, link)
        });
        drop(runtime);

        stage.submit(sample(1.0));
        assert_eq!(link.pending(), 0);
    }
}
