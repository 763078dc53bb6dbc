use std::fmt;
use std::sync::Arc;

use media_types::Resolution;
use url::Url;

use crate::chunk::Chunk;

/// Name given to the only variant of a media playlist loaded directly.
pub const SINGLE_VARIANT_NAME: &str = "single-variant";

/// Metadata known about a variant before its playlist is downloaded.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantInfo {
    pub name: String,
    /// Peak bandwidth in bits per second.
    pub bandwidth: u64,
    pub codecs: Vec<String>,
    pub resolution: Option<Resolution>,
    /// URL of the variant's media playlist.
    pub url: Url,
}

impl VariantInfo {
    /// Info for a media playlist that was not reached through a master playlist.
    pub fn single(url: Url) -> Self {
        Self {
            name: SINGLE_VARIANT_NAME.to_owned(),
            bandwidth: 0,
            codecs: Vec::new(),
            resolution: None,
            url,
        }
    }
}

/// A variant whose media playlist has been downloaded and parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedVariant {
    pub info: VariantInfo,
    pub version: Option<u32>,
    pub target_duration: f64,
    pub chunks: Vec<Chunk>,
}

impl ResolvedVariant {
    /// Total duration: end of the last chunk, or zero for an empty playlist.
    pub fn full_duration(&self) -> f64 {
        self.chunks.last().map_or(0.0, Chunk::end_time)
    }

    /// Index of the chunk with the greatest start time not after `time`.
    ///
    /// Times before the first chunk map to index 0.
    pub fn chunk_index_at(&self, time: f64) -> usize {
        self.chunks
            .partition_point(|chunk| chunk.start_time <= time)
            .saturating_sub(1)
    }

    pub fn chunk(&self, index: usize) -> Option<&Chunk> {
        self.chunks.get(index)
    }

    pub fn chunk_url(&self, index: usize) -> Option<&Url> {
        self.chunks.get(index).map(|chunk| &chunk.url)
    }
}

/// A quality rendition: either a reference from a master playlist or a fully parsed one.
///
/// Two variants are equal when they share bandwidth and playlist URL, whatever their state.
#[derive(Debug, Clone)]
pub enum Variant {
    Reference(VariantInfo),
    Resolved(Arc<ResolvedVariant>),
}

impl Variant {
    pub fn info(&self) -> &VariantInfo {
        match self {
            Variant::Reference(info) => info,
            Variant::Resolved(resolved) => &resolved.info,
        }
    }

    #[inline]
    pub fn bandwidth(&self) -> u64 {
        self.info().bandwidth
    }

    #[inline]
    pub fn url(&self) -> &Url {
        &self.info().url
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.info().name
    }

    pub fn resolved(&self) -> Option<&Arc<ResolvedVariant>> {
        match self {
            Variant::Reference(_) => None,
            Variant::Resolved(resolved) => Some(resolved),
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Variant::Resolved(_))
    }
}

impl PartialEq for Variant {
    fn eq(&self, other: &Self) -> bool {
        self.bandwidth() == other.bandwidth() && self.url() == other.url()
    }
}

impl Eq for Variant {}

impl From<ResolvedVariant> for Variant {
    fn from(resolved: ResolvedVariant) -> Self {
        Variant::Resolved(Arc::new(resolved))
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} bps)", self.name(), self.bandwidth())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(bandwidth: u64, path: &str) -> VariantInfo {
        VariantInfo {
            name: bandwidth.to_string(),
            bandwidth,
            codecs: vec!["avc1.4d401f".into()],
            resolution: None,
            url: Url::parse(&format!("https://cdn.example.com/{path}")).unwrap(),
        }
    }

    fn resolved(durations: &[f64]) -> ResolvedVariant {
        let base = Url::parse("https://cdn.example.com/v/index.m3u8").unwrap();
        let mut start = 0.0;
        let chunks = durations
            .iter()
            .enumerate()
            .map(|(i, &duration)| {
                let uri = format!("seg{i}.ts");
                let chunk = Chunk {
                    url: base.join(&uri).unwrap(),
                    uri,
                    duration,
                    start_time: start,
                    name: None,
                };
                start += duration;
                chunk
            })
            .collect();
        ResolvedVariant {
            info: info(800_000, "v/index.m3u8"),
            version: Some(3),
            target_duration: 4.0,
            chunks,
        }
    }

    #[test]
    fn test_equality_ignores_resolution_state() {
        let reference = Variant::Reference(info(800_000, "v/index.m3u8"));
        let full: Variant = resolved(&[4.0]).into();
        assert_eq!(reference, full);
        assert_ne!(reference, Variant::Reference(info(800_000, "w/index.m3u8")));
        assert_ne!(reference, Variant::Reference(info(900_000, "v/index.m3u8")));
    }

    #[test]
    fn test_full_duration() {
        assert_eq!(resolved(&[4.0, 4.0, 2.5]).full_duration(), 10.5);
        assert_eq!(resolved(&[]).full_duration(), 0.0);
    }

    #[test]
    fn test_chunk_index_at() {
        let variant = resolved(&[4.0, 4.0, 4.0]);
        assert_eq!(variant.chunk_index_at(-1.0), 0);
        assert_eq!(variant.chunk_index_at(0.0), 0);
        assert_eq!(variant.chunk_index_at(3.99), 0);
        assert_eq!(variant.chunk_index_at(4.0), 1);
        assert_eq!(variant.chunk_index_at(11.0), 2);
        assert_eq!(variant.chunk_index_at(100.0), 2);
        assert_eq!(
            variant.chunk_url(1).map(Url::as_str),
            Some("https://cdn.example.com/v/seg1.ts")
        );
    }
}
