//! Adaptive HLS playback engine.
//!
//! A [`Player`] loads a manifest, picks a variant with the [`LoadingController`], loads and
//! demuxes its chunks, and hands decoded samples to the renderer and audio output at the
//! right time. Quality switches run a second loader in parallel and cut over on a matching
//! sample, so playback does not jump.

pub mod clock;
pub mod config;
pub mod controller;
mod decode;
mod demux;
pub mod error;
pub mod http;
pub mod media;
pub mod orchestrator;
pub mod player;
pub mod resolver;
mod ring;
pub mod segment_loader;
pub mod signal;
pub mod sync_link;

#[cfg(test)]
mod test_support;

// Re-exports for easier access
pub use clock::PlaybackClock;
pub use config::{
    AbrConfig, DemuxConfig, HttpConfig, LoaderConfig, MigrationConfig, MonitorConfig,
    PlayerConfig, RetryMode, SyncLinkConfig,
};
pub use controller::{LoadingController, LoadingState, LoadingStrategy};
pub use decode::DecodeStage;
pub use demux::DemuxWorker;
pub use error::{DecodeError, PlayerError, Result};
pub use http::{
    BackoffRetryStrategy, Fetcher, HttpSession, NetworkMonitor, RequestRecord, RetryStrategy,
    SimpleRetryStrategy,
};
pub use media::{
    AudioFormat, AudioOutput, CompressedSample, DecodedSample, Decoder, PassthroughDecoder,
    StreamId, VideoRenderer,
};
pub use orchestrator::OrchestratedLoader;
pub use player::{MediaOutputs, PlaybackEvent, Player};
pub use resolver::{ChunkLoader, VariantResolver};
pub use ring::RingBuffer;
pub use segment_loader::{ReadGate, SegmentLoader};
pub use signal::{Signal, Subscription};
pub use sync_link::SyncLink;
