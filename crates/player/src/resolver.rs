use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use hls::{Chunk, Manifest, ResolvedVariant, Variant};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use crate::error::{PlayerError, Result};
use crate::http::{Fetcher, NetworkMonitor};

/// Downloads the raw bytes of one chunk.
#[async_trait]
pub trait ChunkLoader: Send + Sync {
    async fn load_chunk(&self, chunk: &Chunk, token: &CancellationToken) -> Result<Bytes>;
}

struct ResolverState {
    cache: HashMap<Url, Arc<ResolvedVariant>>,
    /// Cancelled when the host changes.
    session: CancellationToken,
}

/// Fetches manifests and turns variant references into resolved chunk lists.
///
/// Resolutions are memoized by playlist URL for as long as requests stay on the same
/// host. Moving to another host drops the cache and cancels every request still in
/// flight for the old one.
pub struct VariantResolver {
    fetcher: Arc<dyn Fetcher>,
    monitor: Arc<NetworkMonitor>,
    chunk_timeout: Duration,
    state: Mutex<ResolverState>,
}

impl VariantResolver {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        monitor: Arc<NetworkMonitor>,
        chunk_timeout: Duration,
    ) -> Self {
        Self {
            fetcher,
            monitor,
            chunk_timeout,
            state: Mutex::new(ResolverState {
                cache: HashMap::new(),
                session: CancellationToken::new(),
            }),
        }
    }

    /// Fetch and parse the top-level manifest at `url`.
    pub async fn load_manifest(&self, url: &Url) -> Result<Manifest> {
        self.enter_host(url);
        let token = self.session_token();
        let body = self.fetcher.get(url, None, &token).await?;
        let manifest = Manifest::parse(&String::from_utf8_lossy(&body), url, None)?;
        if manifest.variants.is_empty() {
            return Err(PlayerError::MissingVariants);
        }

        if let Some(single) = manifest.single() {
            self.remember(&token, single);
        }
        info!(
            url = %url,
            master = manifest.is_master,
            variants = manifest.variants.len(),
            "Manifest loaded"
        );
        Ok(manifest)
    }

    /// Resolved form of `variant`; a resolved variant is returned as is.
    ///
    /// Fetching a playlist moves the session to its host, like loading a manifest does.
    pub async fn resolve(&self, variant: &Variant) -> Result<Arc<ResolvedVariant>> {
        let info = match variant {
            Variant::Resolved(resolved) => return Ok(Arc::clone(resolved)),
            Variant::Reference(info) => info,
        };

        self.enter_host(&info.url);
        if let Some(hit) = self.state.lock().cache.get(&info.url) {
            debug!(variant = %variant, "Variant resolved from cache");
            return Ok(Arc::clone(hit));
        }

        let token = self.session_token();
        let body = self.fetcher.get(&info.url, None, &token).await?;
        let manifest = Manifest::parse(
            &String::from_utf8_lossy(&body),
            &info.url,
            Some(info.clone()),
        )?;
        let resolved = manifest
            .single()
            .cloned()
            .ok_or_else(|| PlayerError::MissingResolvedVariant {
                variant: variant.to_string(),
            })?;

        debug!(
            variant = %variant,
            chunks = resolved.chunks.len(),
            duration = resolved.full_duration(),
            "Variant resolved"
        );
        self.remember(&token, &resolved);
        Ok(resolved)
    }

    pub fn cached(&self, url: &Url) -> Option<Arc<ResolvedVariant>> {
        self.state.lock().cache.get(url).cloned()
    }

    fn enter_host(&self, url: &Url) {
        let Some(host) = url.host_str() else {
            return;
        };
        if self.monitor.switch_host(host) {
            let mut state = self.state.lock();
            state.cache.clear();
            state.session.cancel();
            state.session = CancellationToken::new();
        }
    }

    fn session_token(&self) -> CancellationToken {
        self.state.lock().session.clone()
    }

    fn remember(&self, token: &CancellationToken, resolved: &Arc<ResolvedVariant>) {
        // A host switch while the request was in flight invalidates its result.
        if token.is_cancelled() {
            return;
        }
        self.state
            .lock()
            .cache
            .insert(resolved.info.url.clone(), Arc::clone(resolved));
    }
}

#[async_trait]
impl ChunkLoader for VariantResolver {
    async fn load_chunk(&self, chunk: &Chunk, token: &CancellationToken) -> Result<Bytes> {
        let session = self.session_token();
        tokio::select! {
            _ = session.cancelled() => Err(PlayerError::Cancelled),
            result = self.fetcher.get(&chunk.url, Some(self.chunk_timeout), token) => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;
    use crate::test_support::MockFetcher;

    const MASTER: &str = "#EXTM3U\n\
        #EXT-X-STREAM-INF:BANDWIDTH=2500,CODECS=\"avc1.64001f\"\n\
        hi/index.m3u8\n\
        #EXT-X-STREAM-INF:BANDWIDTH=500,CODECS=\"avc1.42e01e\"\n\
        lo/index.m3u8\n";

    const MEDIA: &str = "#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXTINF:4.0,\ns0.ts\n#EXTINF:4.0,\ns1.ts\n";

    fn resolver(fetcher: Arc<MockFetcher>) -> VariantResolver {
        VariantResolver::new(
            fetcher,
            Arc::new(NetworkMonitor::new(MonitorConfig::default())),
            Duration::from_secs(25),
        )
    }

    #[tokio::test]
    async fn test_resolve_is_memoized() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.insert("http://a.test/master.m3u8", MASTER);
        fetcher.insert("http://a.test/lo/index.m3u8", MEDIA);
        let resolver = resolver(fetcher.clone());

        let manifest = resolver
            .load_manifest(&Url::parse("http://a.test/master.m3u8").unwrap())
            .await
            .unwrap();
        assert!(manifest.is_master);
        let low = manifest.lowest().unwrap().clone();
        assert_eq!(low.bandwidth(), 500);

        let first = resolver.resolve(&low).await.unwrap();
        let second = resolver.resolve(&low).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.chunks.len(), 2);
        assert_eq!(first.info.bandwidth, 500);
        assert_eq!(fetcher.hits("http://a.test/lo/index.m3u8"), 1);

        let resolved = Variant::Resolved(first.clone());
        assert!(Arc::ptr_eq(&resolver.resolve(&resolved).await.unwrap(), &first));
    }

    #[tokio::test]
    async fn test_host_switch_invalidates_cache() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.insert("http://a.test/master.m3u8", MASTER);
        fetcher.insert("http://a.test/lo/index.m3u8", MEDIA);
        fetcher.insert("http://b.test/index.m3u8", MEDIA);
        let resolver = resolver(fetcher.clone());

        let manifest = resolver
            .load_manifest(&Url::parse("http://a.test/master.m3u8").unwrap())
            .await
            .unwrap();
        let low = manifest.lowest().unwrap().clone();
        resolver.resolve(&low).await.unwrap();
        assert!(resolver.cached(low.url()).is_some());

        let single = resolver
            .load_manifest(&Url::parse("http://b.test/index.m3u8").unwrap())
            .await
            .unwrap();
        assert!(!single.is_master);
        assert!(resolver.cached(low.url()).is_none());
        assert!(resolver.cached(&single.url).is_some());
    }

    #[tokio::test]
    async fn test_variant_on_another_host_switches_monitor() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.insert(
            "http://a.test/master.m3u8",
            "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=800\nhttp://cdn.test/lo/index.m3u8\n",
        );
        fetcher.insert("http://cdn.test/lo/index.m3u8", MEDIA);
        let monitor = Arc::new(NetworkMonitor::new(MonitorConfig::default()));
        let resolver =
            VariantResolver::new(fetcher, Arc::clone(&monitor), Duration::from_secs(25));

        let manifest = resolver
            .load_manifest(&Url::parse("http://a.test/master.m3u8").unwrap())
            .await
            .unwrap();
        assert_eq!(monitor.host().as_deref(), Some("a.test"));

        let variant = manifest.lowest().unwrap().clone();
        let resolved = resolver.resolve(&variant).await.unwrap();
        assert_eq!(monitor.host().as_deref(), Some("cdn.test"));
        assert!(resolver.cached(&resolved.info.url).is_some());
    }

    #[tokio::test]
    async fn test_parse_error_surfaces() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.insert(
            "http://a.test/master.m3u8",
            "#EXTM3U\n#EXT-X-STREAM-INF:CODECS=\"avc1\"\nlo.m3u8\n",
        );
        let resolver = resolver(fetcher);
        let err = resolver
            .load_manifest(&Url::parse("http://a.test/master.m3u8").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, PlayerError::Playlist(_)));
    }

    #[tokio::test]
    async fn test_chunk_fetch_uses_chunk_url() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.insert("http://a.test/index.m3u8", MEDIA);
        fetcher.insert("http://a.test/s1.ts", "chunk-bytes");
        let resolver = resolver(fetcher);
        let manifest = resolver
            .load_manifest(&Url::parse("http://a.test/index.m3u8").unwrap())
            .await
            .unwrap();
        let variant = manifest.single().unwrap().clone();
        let data = resolver
            .load_chunk(&variant.chunks[1], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(&data[..], b"chunk-bytes");
    }
}
