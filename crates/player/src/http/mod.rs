//! HTTP access for manifests and chunks: a reqwest session with pluggable retry and a
//! monitor feeding bandwidth estimation.

mod monitor;
mod retry;

pub use monitor::{NetworkMonitor, RequestRecord};
pub use retry::{BackoffRetryStrategy, RetryStrategy, SimpleRetryStrategy, retry_with_strategy};

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use url::Url;

use crate::config::{HttpConfig, RetryMode};
use crate::error::{PlayerError, Result};

/// Issues GET requests on behalf of the resolver and the segment loaders.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `url`, giving up after `timeout` per attempt when set.
    async fn get(
        &self,
        url: &Url,
        timeout: Option<Duration>,
        token: &CancellationToken,
    ) -> Result<Bytes>;
}

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Safe to ignore: can happen if another crate installed it first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

pub fn create_client(config: &HttpConfig) -> Result<Client> {
    install_rustls_provider();

    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .user_agent(&config.user_agent)
        .default_headers(config.headers.clone());

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    if !config.read_timeout.is_zero() {
        client_builder = client_builder.read_timeout(config.read_timeout);
    }

    client_builder.build().map_err(PlayerError::from)
}

/// The retry strategy selected by `config.retry_mode`.
pub fn retry_strategy(config: &HttpConfig) -> Arc<dyn RetryStrategy> {
    match config.retry_mode {
        RetryMode::Fixed => Arc::new(SimpleRetryStrategy {
            retries: config.retry_count,
            delay: config.retry_delay,
        }),
        RetryMode::Backoff => Arc::new(BackoffRetryStrategy {
            retries: config.retry_count,
            initial_delay: config.retry_delay,
            max_delay: config.retry_max_delay,
            jitter: true,
        }),
    }
}

/// reqwest-backed [`Fetcher`] that retries through a [`RetryStrategy`] and reports every
/// attempt to a [`NetworkMonitor`].
pub struct HttpSession {
    client: Client,
    retry: Arc<dyn RetryStrategy>,
    monitor: Arc<NetworkMonitor>,
}

impl HttpSession {
    pub fn new(config: &HttpConfig, monitor: Arc<NetworkMonitor>) -> Result<Self> {
        Ok(Self::with_client(
            create_client(config)?,
            retry_strategy(config),
            monitor,
        ))
    }

    pub fn with_client(
        client: Client,
        retry: Arc<dyn RetryStrategy>,
        monitor: Arc<NetworkMonitor>,
    ) -> Self {
        Self {
            client,
            retry,
            monitor,
        }
    }

    pub fn monitor(&self) -> &Arc<NetworkMonitor> {
        &self.monitor
    }

    async fn attempt(
        &self,
        url: &Url,
        timeout: Option<Duration>,
        token: &CancellationToken,
        attempt: u32,
    ) -> Result<Bytes> {
        trace!(url = %url, attempt, "GET");
        let started = Instant::now();
        let mut request = self.client.get(url.clone());
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let outcome = tokio::select! {
            _ = token.cancelled() => return Err(PlayerError::Cancelled),
            outcome = async {
                let response = request.send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(PlayerError::http_status(status, url.as_str(), "GET"));
                }
                Ok(response.bytes().await?)
            } => outcome,
        };

        let (response_size, load_duration) = match &outcome {
            Ok(body) => (body.len() as u64, Some(started.elapsed())),
            Err(_) => (0, None),
        };
        self.monitor.record(RequestRecord {
            url: url.clone(),
            response_size,
            start_timestamp: started,
            load_duration,
        });
        outcome
    }
}

#[async_trait]
impl Fetcher for HttpSession {
    async fn get(
        &self,
        url: &Url,
        timeout: Option<Duration>,
        token: &CancellationToken,
    ) -> Result<Bytes> {
        retry_with_strategy(self.retry.as_ref(), token, |attempt| {
            self.attempt(url, timeout, token, attempt)
        })
        .await
    }
}
