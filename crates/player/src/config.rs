use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

/// Top-level configuration of a playback session.
#[derive(Debug, Clone, Default)]
pub struct PlayerConfig {
    pub http: HttpConfig,
    pub monitor: MonitorConfig,
    pub abr: AbrConfig,
    pub loader: LoaderConfig,
    pub migration: MigrationConfig,
    pub demux: DemuxConfig,
    pub sync_link: SyncLinkConfig,
}

/// HTTP client and retry settings
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// Read timeout (maximum time between receiving data chunks)
    pub read_timeout: Duration,

    /// User agent string
    pub user_agent: String,

    /// Custom HTTP headers for requests
    pub headers: HeaderMap,

    /// Overall timeout for one chunk request
    pub chunk_timeout: Duration,

    /// Retries after the first failed attempt of a request
    pub retry_count: u32,

    /// How failed requests are retried
    pub retry_mode: RetryMode,

    /// Delay between retries; the first backoff delay in [`RetryMode::Backoff`]
    pub retry_delay: Duration,

    /// Upper bound of a backoff delay
    pub retry_max_delay: Duration,

    /// Maximum idle connections to keep per host
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: HttpConfig::get_default_headers(),
            chunk_timeout: Duration::from_secs(25),
            retry_count: 3,
            retry_mode: RetryMode::Fixed,
            retry_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(8),
            pool_max_idle_per_host: 10,
        }
    }
}

impl HttpConfig {
    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        default_headers.insert(
            reqwest::header::ACCEPT_ENCODING,
            HeaderValue::from_static("gzip, deflate"),
        );

        default_headers.insert(
            reqwest::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );

        default_headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("*/*"));
        default_headers
    }
}

/// Retry behaviour of the HTTP session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetryMode {
    /// Any failure is retried after the same delay.
    #[default]
    Fixed,
    /// Transient failures only, with doubling delays and jitter.
    Backoff,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Completed request records kept and published per batch
    pub history_size: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self { history_size: 32 }
    }
}

/// Bandwidth estimation parameters
#[derive(Debug, Clone)]
pub struct AbrConfig {
    /// Responses larger than this are treated as segment downloads
    pub segment_min_bytes: u64,
    /// URL suffix identifying a segment download regardless of size
    pub segment_suffix: String,
    /// Number of most recent segment downloads averaged
    pub sample_count: usize,
}

impl Default for AbrConfig {
    fn default() -> Self {
        Self {
            segment_min_bytes: 10_000,
            segment_suffix: ".ts".to_owned(),
            sample_count: 3,
        }
    }
}

/// Segment stream loader scheduling
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Raw chunk payloads kept for reuse
    pub cache_capacity: usize,
    /// Chunks starting further ahead of the playback clock are not fetched yet
    pub look_ahead: Duration,
    /// Re-evaluation interval while nothing can be loaded
    pub idle_interval: Duration,
    /// Pause after a failed chunk load before trying again
    pub failure_cooldown: Duration,
    /// Re-check interval while the sync link refuses more samples
    pub backpressure_interval: Duration,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 10,
            look_ahead: Duration::from_secs(20),
            idle_interval: Duration::from_secs(10),
            failure_cooldown: Duration::from_secs(1),
            backpressure_interval: Duration::from_millis(250),
        }
    }
}

/// Cut-over thresholds between the current and candidate streams
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// The candidate sample must follow the last delivered one by less than this (seconds)
    pub max_gap: f64,
    /// The candidate sample must be this far ahead of the playback clock (seconds)
    pub min_lead: f64,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            max_gap: 0.5,
            min_lead: 5.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DemuxConfig {
    /// Chunks are split into work items of at most this many TS packets
    pub batch_packets: usize,
    /// Frames older than the read-from time by more than this are dropped (seconds)
    pub stale_threshold: f64,
    /// Bound of the demux work queue
    pub queue_capacity: usize,
}

impl Default for DemuxConfig {
    fn default() -> Self {
        Self {
            batch_packets: 2000,
            stale_threshold: ts::demux::DEFAULT_STALE_THRESHOLD,
            queue_capacity: 64,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncLinkConfig {
    /// Pending video samples above which upstream should stop reading
    pub capacity: usize,
    /// Clock tick cadence
    pub tick_interval: Duration,
}

impl Default for SyncLinkConfig {
    fn default() -> Self {
        Self {
            capacity: 40,
            tick_interval: Duration::from_millis(16),
        }
    }
}
