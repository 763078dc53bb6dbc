//! Sample types and the collaborator seams around the pipeline: decoding, video rendering
//! and audio output are provided by the embedding application.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use media_types::StreamKind;
use ts::{CodecConfig, Frame, StreamType};

use crate::error::DecodeError;

/// Identifies the segment loader a sample came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(u64);

impl StreamId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A demuxed, still compressed sample tagged with its source stream.
#[derive(Debug, Clone)]
pub struct CompressedSample {
    pub stream: StreamId,
    pub frame: Frame,
}

impl CompressedSample {
    pub fn new(stream: StreamId, frame: Frame) -> Self {
        Self { stream, frame }
    }

    #[inline]
    pub fn kind(&self) -> StreamKind {
        self.frame.kind
    }

    #[inline]
    pub fn pts(&self) -> f64 {
        self.frame.pts
    }

    #[inline]
    pub fn is_sync(&self) -> bool {
        self.frame.is_sync
    }

    #[inline]
    pub fn codec(&self) -> StreamType {
        self.frame.stream_type
    }

    #[inline]
    pub fn codec_config(&self) -> &CodecConfig {
        &self.frame.codec_config
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u8,
}

/// Renderer-ready sample produced by a [`Decoder`].
#[derive(Debug, Clone)]
pub struct DecodedSample {
    pub kind: StreamKind,
    pub pts: f64,
    pub duration: f64,
    /// Set for audio samples.
    pub audio_format: Option<AudioFormat>,
    pub data: Bytes,
}

/// Turns compressed samples of one kind into decoded ones.
#[async_trait]
pub trait Decoder: Send + Sync {
    async fn decode(&self, sample: CompressedSample) -> Result<DecodedSample, DecodeError>;

    /// Drop any decoder state tied to the previous position.
    fn reset(&self) {}
}

pub trait VideoRenderer: Send + Sync {
    fn render(&self, sample: &DecodedSample);
}

/// Audio device collaborator. Its clock, once anchored, drives A/V scheduling.
pub trait AudioOutput: Send + Sync {
    /// Format the output is currently connected with.
    fn format(&self) -> Option<AudioFormat>;
    fn enqueue(&self, sample: DecodedSample);
    /// Media time being played, when known.
    fn current_time(&self) -> Option<f64>;
    fn is_playing(&self) -> bool;
    fn start(&self);
    fn pause(&self, reset: bool);
    fn seek(&self, time: f64);
}

/// Decoder that hands compressed payloads through untouched.
///
/// Useful for tooling that only needs timing, and for tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughDecoder;

#[async_trait]
impl Decoder for PassthroughDecoder {
    async fn decode(&self, sample: CompressedSample) -> Result<DecodedSample, DecodeError> {
        let audio_format = match sample.codec_config() {
            CodecConfig::Adts(header) => Some(AudioFormat {
                sample_rate: header.sample_rate,
                channels: header.channel_configuration,
            }),
            _ => None,
        };
        if sample.kind().is_audio() && audio_format.is_none() {
            return Err(DecodeError::Convert { status: -1 });
        }
        Ok(DecodedSample {
            kind: sample.kind(),
            pts: sample.pts(),
            duration: sample.frame.duration,
            audio_format,
            data: sample.frame.data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ts::AdtsHeader;

    fn frame(kind: StreamKind, codec_config: CodecConfig) -> Frame {
        Frame {
            pid: 0x100,
            stream_type: if kind.is_video() {
                StreamType::H264
            } else {
                StreamType::AdtsAac
            },
            kind,
            pts: 1.5,
            dts: 1.5,
            duration: 0.0,
            is_sync: true,
            data: Bytes::from_static(b"payload"),
            codec_config,
        }
    }

    #[test]
    fn test_stream_ids_are_unique() {
        assert_ne!(StreamId::next(), StreamId::next());
    }

    #[tokio::test]
    async fn test_passthrough_audio_format() {
        let header = AdtsHeader {
            object_type: 2,
            sampling_frequency_index: 4,
            sample_rate: 44100,
            channel_configuration: 2,
            frame_length: 39,
            header_length: 7,
        };
        let sample = CompressedSample::new(
            StreamId::next(),
            frame(StreamKind::Audio, CodecConfig::Adts(header)),
        );
        let decoded = PassthroughDecoder.decode(sample).await.unwrap();
        assert_eq!(
            decoded.audio_format,
            Some(AudioFormat {
                sample_rate: 44100,
                channels: 2
            })
        );
        assert_eq!(decoded.pts, 1.5);
    }

    #[tokio::test]
    async fn test_passthrough_rejects_audio_without_config() {
        let sample =
            CompressedSample::new(StreamId::next(), frame(StreamKind::Audio, CodecConfig::None));
        assert_eq!(
            PassthroughDecoder.decode(sample).await.unwrap_err(),
            DecodeError::Convert { status: -1 }
        );
    }
}
