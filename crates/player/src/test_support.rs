//! Fakes for the network and output collaborators, shared by the unit tests.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use url::Url;

use hls::{Manifest, ResolvedVariant};
use ts::testing::TsWriter;

use crate::error::{PlayerError, Result};
use crate::http::Fetcher;
use crate::media::{DecodedSample, VideoRenderer};

#[derive(Default)]
pub struct MockFetcher {
    bodies: Mutex<HashMap<String, Bytes>>,
    failing: Mutex<HashMap<String, StatusCode>>,
    hits: Mutex<HashMap<String, usize>>,
    latency: Mutex<Option<Duration>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: &str, body: impl Into<Bytes>) {
        self.bodies.lock().insert(url.to_owned(), body.into());
    }

    pub fn fail(&self, url: &str, status: StatusCode) {
        self.failing.lock().insert(url.to_owned(), status);
    }

    pub fn heal(&self, url: &str) {
        self.failing.lock().remove(url);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    pub fn hits(&self, url: &str) -> usize {
        self.hits.lock().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn get(
        &self,
        url: &Url,
        _timeout: Option<Duration>,
        token: &CancellationToken,
    ) -> Result<Bytes> {
        *self.hits.lock().entry(url.to_string()).or_default() += 1;
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::select! {
                _ = token.cancelled() => return Err(PlayerError::Cancelled),
                _ = tokio::time::sleep(latency) => {}
            }
        }
        if let Some(status) = self.failing.lock().get(url.as_str()) {
            return Err(PlayerError::http_status(*status, url.as_str(), "GET"));
        }
        self.bodies
            .lock()
            .get(url.as_str())
            .cloned()
            .ok_or_else(|| PlayerError::http_status(StatusCode::NOT_FOUND, url.as_str(), "GET"))
    }
}

/// Serve a media playlist `{dir}index.m3u8` with `chunks` synthetic TS chunks
/// `{dir}s{i}.ts` of `chunk_secs` each, and return it parsed.
///
/// Chunk timestamps continue across chunks; every chunk opens with a keyframe.
pub fn serve_media(
    fetcher: &MockFetcher,
    dir: &str,
    chunks: usize,
    chunk_secs: f64,
) -> ResolvedVariant {
    let frames = (chunk_secs * 30.0).round() as usize;
    let mut writer = TsWriter::new();
    let mut playlist = format!(
        "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:{}\n",
        chunk_secs.ceil()
    );
    for i in 0..chunks {
        let start_pts = i as u64 * frames as u64 * 3000;
        fetcher.insert(
            &format!("{dir}s{i}.ts"),
            writer.segment(start_pts, frames, 15),
        );
        playlist.push_str(&format!("#EXTINF:{chunk_secs:.3},\ns{i}.ts\n"));
    }
    let url = Url::parse(&format!("{dir}index.m3u8")).unwrap();
    fetcher.insert(url.as_str(), playlist.clone());
    let manifest = Manifest::parse(&playlist, &url, None).unwrap();
    manifest.single().unwrap().as_ref().clone()
}

/// Renderer that remembers what it was given.
#[derive(Default)]
pub struct RecordingRenderer {
    pub rendered: Mutex<Vec<f64>>,
}

impl VideoRenderer for RecordingRenderer {
    fn render(&self, sample: &DecodedSample) {
        self.rendered.lock().push(sample.pts);
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
