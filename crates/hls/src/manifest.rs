use std::sync::Arc;

use url::Url;

use crate::error::Result;
use crate::parser;
use crate::variant::{ResolvedVariant, Variant, VariantInfo};

/// A parsed top-level playlist.
///
/// A master manifest holds variant references sorted ascending by bandwidth; a media
/// manifest holds exactly one resolved variant.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub url: Url,
    pub is_master: bool,
    pub variants: Vec<Variant>,
}

impl Manifest {
    /// Parse playlist text fetched from `url`.
    ///
    /// `info` describes the variant when `raw` is a media playlist reached through a
    /// master playlist; without it a single placeholder variant is created.
    pub fn parse(raw: &str, url: &Url, info: Option<VariantInfo>) -> Result<Self> {
        if parser::is_media_playlist(raw) {
            let info = info.unwrap_or_else(|| VariantInfo::single(url.clone()));
            let resolved = parser::parse_media_playlist(raw, url, info)?;
            Ok(Self {
                url: url.clone(),
                is_master: false,
                variants: vec![resolved.into()],
            })
        } else {
            Ok(Self {
                url: url.clone(),
                is_master: true,
                variants: parser::parse_master_playlist(raw, url)?,
            })
        }
    }

    /// Cheapest variant, used to start playback.
    pub fn lowest(&self) -> Option<&Variant> {
        self.variants.first()
    }

    pub fn variant_with_bandwidth(&self, bandwidth: u64) -> Option<&Variant> {
        self.variants.iter().find(|v| v.bandwidth() == bandwidth)
    }

    /// Selectable bandwidths; empty for a media manifest.
    pub fn bandwidths(&self) -> Vec<u64> {
        if !self.is_master {
            return Vec::new();
        }
        self.variants.iter().map(Variant::bandwidth).collect()
    }

    /// The resolved variant of a media manifest.
    pub fn single(&self) -> Option<&Arc<ResolvedVariant>> {
        if self.is_master {
            return None;
        }
        self.variants.first().and_then(Variant::resolved)
    }
}
