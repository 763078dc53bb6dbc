//! Line-oriented playlist parsing.

use std::collections::HashMap;
use std::sync::LazyLock;

use media_types::Resolution;
use regex::Regex;
use tracing::{debug, trace};
use url::Url;

use crate::chunk::Chunk;
use crate::error::{PlaylistError, Result};
use crate::variant::{ResolvedVariant, Variant, VariantInfo};

const STREAM_INF: &str = "#EXT-X-STREAM-INF:";
const EXTINF: &str = "#EXTINF:";
const VERSION: &str = "#EXT-X-VERSION:";
const TARGET_DURATION: &str = "#EXT-X-TARGETDURATION:";

static MEDIA_PLAYLIST_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#EXT(?:INF|-X-TARGETDURATION):").unwrap());

static ATTRIBUTE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(.+?)=(".*?"|.*?)(?:,|$)"#).unwrap());

/// Media playlists are recognised by segment-info tags.
pub fn is_media_playlist(raw: &str) -> bool {
    MEDIA_PLAYLIST_REGEX.is_match(raw)
}

fn lines(raw: &str) -> impl Iterator<Item = &str> {
    raw.lines().map(str::trim).filter(|line| !line.is_empty())
}

fn resolve(base: &Url, uri: &str) -> Result<Url> {
    base.join(uri).map_err(|e| PlaylistError::InvalidUrl {
        uri: uri.to_owned(),
        reason: e.to_string(),
    })
}

/// Parse a `KEY=VALUE,KEY="VALUE"` attribute list. Quotes are stripped.
pub fn parse_attributes(raw: &str) -> HashMap<String, String> {
    ATTRIBUTE_REGEX
        .captures_iter(raw)
        .map(|caps| {
            let key = caps[1].trim().to_owned();
            let value = caps[2].replace('"', "");
            (key, value)
        })
        .collect()
}

/// Extract variant references from a master playlist, sorted ascending by bandwidth.
///
/// Variants sharing a bandwidth keep their playlist order.
pub fn parse_master_playlist(raw: &str, url: &Url) -> Result<Vec<Variant>> {
    let mut variants = Vec::new();
    let mut lines = lines(raw);

    while let Some(line) = lines.next() {
        let Some(attrs) = line.strip_prefix(STREAM_INF) else {
            continue;
        };
        let attrs = parse_attributes(attrs);

        let bandwidth = attrs
            .get("BANDWIDTH")
            .and_then(|b| b.parse::<u64>().ok())
            .ok_or_else(|| PlaylistError::missing_attribute("BANDWIDTH"))?;
        let codecs = attrs
            .get("CODECS")
            .ok_or_else(|| PlaylistError::missing_attribute("CODECS"))?
            .split(',')
            .map(|c| c.trim().to_owned())
            .collect();
        let resolution = match attrs.get("RESOLUTION") {
            Some(value) => Some(
                value
                    .parse::<Resolution>()
                    .map_err(|_| PlaylistError::malformed("RESOLUTION", line))?,
            ),
            None => None,
        };
        let name = attrs
            .get("NAME")
            .cloned()
            .unwrap_or_else(|| bandwidth.to_string());

        let uri = lines
            .by_ref()
            .find(|l| !l.starts_with('#'))
            .ok_or_else(|| PlaylistError::malformed("uri", line))?;

        variants.push(Variant::Reference(VariantInfo {
            name,
            bandwidth,
            codecs,
            resolution,
            url: resolve(url, uri)?,
        }));
    }

    if variants.is_empty() {
        return Err(PlaylistError::MissingVariants);
    }

    variants.sort_by_key(Variant::bandwidth);
    debug!(count = variants.len(), url = %url, "Parsed master playlist");
    Ok(variants)
}

struct PendingChunk<'a> {
    line: &'a str,
    duration: f64,
    name: Option<String>,
}

/// Walk segment-info/URI pairs of a media playlist in file order.
pub fn parse_media_playlist(raw: &str, url: &Url, info: VariantInfo) -> Result<ResolvedVariant> {
    let mut version = None;
    let mut target_duration = 0.0;
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut pending: Option<PendingChunk<'_>> = None;
    let mut start_time = 0.0;

    for line in lines(raw) {
        if let Some(chunk) = pending.take() {
            if line.starts_with(EXTINF) {
                return Err(PlaylistError::ChunkComponentCount {
                    line: chunk.line.to_owned(),
                });
            }
            if line.starts_with('#') {
                trace!(line, "Skipping tag between segment info and URI");
                pending = Some(chunk);
                continue;
            }
            chunks.push(Chunk {
                uri: line.to_owned(),
                url: resolve(url, line)?,
                duration: chunk.duration,
                start_time,
                name: chunk.name,
            });
            start_time += chunk.duration;
        } else if let Some(rest) = line.strip_prefix(EXTINF) {
            let components: Vec<&str> = rest.split(',').collect();
            if components.len() > 2 {
                return Err(PlaylistError::ChunkComponentCount {
                    line: line.to_owned(),
                });
            }
            let duration = components[0]
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|d| d.is_finite() && *d > 0.0)
                .ok_or_else(|| PlaylistError::malformed("EXTINF duration", line))?;
            let name = components
                .get(1)
                .map(|n| n.trim())
                .filter(|n| !n.is_empty())
                .map(str::to_owned);
            pending = Some(PendingChunk {
                line,
                duration,
                name,
            });
        } else if let Some(rest) = line.strip_prefix(VERSION) {
            version = rest.trim().parse().ok();
        } else if let Some(rest) = line.strip_prefix(TARGET_DURATION) {
            target_duration = rest
                .trim()
                .parse()
                .map_err(|_| PlaylistError::malformed("EXT-X-TARGETDURATION", line))?;
        }
    }

    if let Some(chunk) = pending {
        return Err(PlaylistError::ChunkComponentCount {
            line: chunk.line.to_owned(),
        });
    }

    debug!(
        chunks = chunks.len(),
        duration = start_time,
        url = %url,
        "Parsed media playlist"
    );
    Ok(ResolvedVariant {
        info,
        version,
        target_duration,
        chunks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Manifest;
    use proptest::prelude::*;

    fn base() -> Url {
        Url::parse("https://cdn.example.com/live/master.m3u8").unwrap()
    }

    #[test]
    fn test_detects_media_playlist() {
        assert!(is_media_playlist("#EXTM3U\n#EXTINF:4.0,\nseg.ts"));
        assert!(is_media_playlist("#EXTM3U\n#EXT-X-TARGETDURATION:4\n"));
        assert!(!is_media_playlist(
            "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1\nlow.m3u8"
        ));
    }

    #[test]
    fn test_parse_attributes() {
        let attrs = parse_attributes(
            r#"BANDWIDTH=1280000,CODECS="avc1.4d401f,mp4a.40.2",RESOLUTION=1280x720,NAME="720p""#,
        );
        assert_eq!(attrs["BANDWIDTH"], "1280000");
        assert_eq!(attrs["CODECS"], "avc1.4d401f,mp4a.40.2");
        assert_eq!(attrs["RESOLUTION"], "1280x720");
        assert_eq!(attrs["NAME"], "720p");
    }

    #[test]
    fn test_master_playlist_sorted() {
        let raw = "#EXTM3U\n\
            #EXT-X-STREAM-INF:BANDWIDTH=2500,CODECS=\"avc1.64001f,mp4a.40.2\",RESOLUTION=1280x720\n\
            hi/index.m3u8\n\
            #EXT-X-STREAM-INF:BANDWIDTH=500,CODECS=\"avc1.42e00a\",NAME=\"low\"\n\
            # a comment\n\
            lo/index.m3u8\n\
            #EXT-X-STREAM-INF:BANDWIDTH=1800,CODECS=\"avc1.4d401f\"\n\
            https://other.example.com/mid.m3u8\n";
        let manifest = Manifest::parse(raw, &base(), None).unwrap();
        assert!(manifest.is_master);
        assert_eq!(manifest.bandwidths(), vec![500, 1800, 2500]);

        let low = &manifest.variants[0];
        assert_eq!(low.name(), "low");
        assert_eq!(low.url().as_str(), "https://cdn.example.com/live/lo/index.m3u8");
        assert!(!low.is_resolved());

        let mid = &manifest.variants[1];
        assert_eq!(mid.name(), "1800");
        assert_eq!(mid.url().as_str(), "https://other.example.com/mid.m3u8");

        let high = manifest.variants[2].info();
        assert_eq!(high.codecs, vec!["avc1.64001f", "mp4a.40.2"]);
        assert_eq!(high.resolution, Some(Resolution::new(1280, 720)));
        assert_eq!(manifest.lowest().map(Variant::bandwidth), Some(500));
        assert_eq!(manifest.variant_with_bandwidth(1800), Some(mid));
    }

    #[test]
    fn test_master_missing_bandwidth() {
        let raw = "#EXTM3U\n#EXT-X-STREAM-INF:CODECS=\"avc1\"\nlow.m3u8\n";
        assert_eq!(
            Manifest::parse(raw, &base(), None).unwrap_err(),
            PlaylistError::missing_attribute("BANDWIDTH")
        );
    }

    #[test]
    fn test_master_missing_codecs() {
        let raw = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=100\nlow.m3u8\n";
        assert_eq!(
            Manifest::parse(raw, &base(), None).unwrap_err(),
            PlaylistError::missing_attribute("CODECS")
        );
    }

    #[test]
    fn test_master_without_variants() {
        assert_eq!(
            Manifest::parse("#EXTM3U\n", &base(), None).unwrap_err(),
            PlaylistError::MissingVariants
        );
    }

    #[test]
    fn test_media_playlist_two_chunks() {
        let raw = "#EXTINF:4.0,Title\nseg0.ts\n#EXTINF:4.0,\nseg1.ts";
        let manifest = Manifest::parse(raw, &base(), None).unwrap();
        assert!(!manifest.is_master);
        assert!(manifest.bandwidths().is_empty());

        let variant = manifest.single().unwrap();
        assert_eq!(variant.info.name, "single-variant");
        assert_eq!(variant.info.bandwidth, 0);
        assert_eq!(variant.chunks.len(), 2);
        assert_eq!(variant.chunks[0].start_time, 0.0);
        assert_eq!(variant.chunks[1].start_time, 4.0);
        assert_eq!(variant.chunks[0].name.as_deref(), Some("Title"));
        assert_eq!(variant.chunks[1].name, None);
        assert_eq!(
            variant.chunks[1].url.as_str(),
            "https://cdn.example.com/live/seg1.ts"
        );
    }

    #[test]
    fn test_media_playlist_scalar_tags() {
        let raw = "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:6\n\
            #EXTINF:6.006,\n#EXT-X-PROGRAM-DATE-TIME:2024-01-01T00:00:00Z\na.ts\n#EXT-X-ENDLIST\n";
        let info = VariantInfo::single(base());
        let variant = parse_media_playlist(raw, &base(), info).unwrap();
        assert_eq!(variant.version, Some(3));
        assert_eq!(variant.target_duration, 6.0);
        assert_eq!(variant.chunks.len(), 1);
        assert_eq!(variant.chunks[0].uri, "a.ts");
    }

    #[test]
    fn test_segment_info_without_uri() {
        let raw = "#EXTINF:4.0,\n#EXTINF:4.0,\nseg1.ts";
        assert!(matches!(
            Manifest::parse(raw, &base(), None),
            Err(PlaylistError::ChunkComponentCount { .. })
        ));
        let raw = "#EXTINF:4.0,\nseg0.ts\n#EXTINF:4.0,";
        assert!(matches!(
            Manifest::parse(raw, &base(), None),
            Err(PlaylistError::ChunkComponentCount { .. })
        ));
    }

    #[test]
    fn test_too_many_components() {
        let raw = "#EXTINF:4.0,a,b\nseg0.ts";
        assert!(matches!(
            Manifest::parse(raw, &base(), None),
            Err(PlaylistError::ChunkComponentCount { .. })
        ));
    }

    #[test]
    fn test_malformed_duration() {
        let raw = "#EXTINF:abc,\nseg0.ts";
        assert!(matches!(
            Manifest::parse(raw, &base(), None),
            Err(PlaylistError::MalformedMatch { key: "EXTINF duration", .. })
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_start_times_are_prefix_sums(durations in prop::collection::vec(1u32..20_000, 1..50)) {
            let mut raw = String::from("#EXTM3U\n#EXT-X-TARGETDURATION:20\n");
            for (i, d) in durations.iter().enumerate() {
                raw.push_str(&format!("#EXTINF:{:.3},\nseg{i}.ts\n", *d as f64 / 1000.0));
            }
            let manifest = Manifest::parse(&raw, &base(), None).unwrap();
            let variant = manifest.single().unwrap();
            prop_assert_eq!(variant.chunks.len(), durations.len());

            let mut sum = 0.0;
            for chunk in &variant.chunks {
                prop_assert!((chunk.start_time - sum).abs() < 1e-6);
                sum += chunk.duration;
            }
            let last = variant.chunks.last().unwrap();
            prop_assert!((variant.full_duration() - (last.start_time + last.duration)).abs() < 1e-9);
        }

        #[test]
        fn prop_master_sorted_and_stable(bandwidths in prop::collection::vec(1u64..10, 1..20)) {
            let mut raw = String::from("#EXTM3U\n");
            for (i, bw) in bandwidths.iter().enumerate() {
                raw.push_str(&format!("#EXT-X-STREAM-INF:BANDWIDTH={bw},CODECS=\"avc1\"\nv{i}.m3u8\n"));
            }
            let manifest = Manifest::parse(&raw, &base(), None).unwrap();
            prop_assert_eq!(manifest.variants.len(), bandwidths.len());

            let mut expected: Vec<(u64, usize)> =
                bandwidths.iter().copied().zip(0..).collect();
            expected.sort_by_key(|(bw, _)| *bw);
            for (variant, (bw, index)) in manifest.variants.iter().zip(expected) {
                prop_assert_eq!(variant.bandwidth(), bw);
                let expected_url = format!("https://cdn.example.com/live/v{index}.m3u8");
                prop_assert_eq!(variant.url().as_str(), expected_url.as_str());
            }
        }

        #[test]
        fn prop_seek_selects_greatest_start_not_after(
            durations in prop::collection::vec(1u32..10, 1..30),
            time in -5.0f64..400.0,
        ) {
            let mut raw = String::new();
            for (i, d) in durations.iter().enumerate() {
                raw.push_str(&format!("#EXTINF:{d},\nseg{i}.ts\n"));
            }
            let manifest = Manifest::parse(&raw, &base(), None).unwrap();
            let variant = manifest.single().unwrap();
            let index = variant.chunk_index_at(time);
            if time < 0.0 {
                prop_assert_eq!(index, 0);
            } else {
                prop_assert!(variant.chunks[index].start_time <= time);
                if let Some(next) = variant.chunks.get(index + 1) {
                    prop_assert!(next.start_time > time);
                }
            }
        }
    }
}
