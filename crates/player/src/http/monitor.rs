use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace};
use url::Url;

use crate::config::MonitorConfig;
use crate::signal::Signal;

/// One completed HTTP request as seen by the bandwidth observer.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestRecord {
    pub url: Url,
    pub response_size: u64,
    pub start_timestamp: Instant,
    /// `None` when the transfer did not complete normally.
    pub load_duration: Option<Duration>,
}

impl RequestRecord {
    /// Bytes per second, zero when the load time is unknown or zero.
    pub fn throughput(&self) -> f64 {
        match self.load_duration {
            Some(d) if !d.is_zero() => self.response_size as f64 / d.as_secs_f64(),
            _ => 0.0,
        }
    }
}

#[derive(Debug, Default)]
struct MonitorState {
    host: Option<String>,
    history: VecDeque<RequestRecord>,
}

/// Keeps a bounded history of completed requests for the current host and publishes it
/// after every completion.
#[derive(Debug)]
pub struct NetworkMonitor {
    config: MonitorConfig,
    state: Mutex<MonitorState>,
    batches: Signal<Vec<RequestRecord>>,
}

impl NetworkMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            state: Mutex::new(MonitorState::default()),
            batches: Signal::new(),
        }
    }

    /// Batches of the most recent records, oldest first.
    pub fn batches(&self) -> &Signal<Vec<RequestRecord>> {
        &self.batches
    }

    pub fn host(&self) -> Option<String> {
        self.state.lock().host.clone()
    }

    /// Start monitoring `host`. Returns true when the host changed, which clears history.
    pub fn switch_host(&self, host: &str) -> bool {
        let mut state = self.state.lock();
        if state.host.as_deref() == Some(host) {
            return false;
        }
        debug!(
            from = state.host.as_deref().unwrap_or("-"),
            to = host,
            "Switching monitored host"
        );
        state.host = Some(host.to_owned());
        state.history.clear();
        true
    }

    pub fn record(&self, record: RequestRecord) {
        trace!(
            url = %record.url,
            bytes = record.response_size,
            load_ms = record.load_duration.map(|d| d.as_millis() as u64),
            "Request completed"
        );
        let batch: Vec<RequestRecord> = {
            let mut state = self.state.lock();
            state.history.push_back(record);
            while state.history.len() > self.config.history_size.max(1) {
                state.history.pop_front();
            }
            state.history.iter().cloned().collect()
        };
        self.batches.send(&batch);
    }

    pub fn history(&self) -> Vec<RequestRecord> {
        self.state.lock().history.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn record(path: &str, size: u64, millis: Option<u64>) -> RequestRecord {
        RequestRecord {
            url: Url::parse("http://cdn.test/").unwrap().join(path).unwrap(),
            response_size: size,
            start_timestamp: Instant::now(),
            load_duration: millis.map(Duration::from_millis),
        }
    }

    #[test]
    fn test_throughput() {
        assert_eq!(record("a.ts", 2000, Some(1000)).throughput(), 2000.0);
        assert_eq!(record("a.ts", 2000, Some(500)).throughput(), 4000.0);
        assert_eq!(record("a.ts", 2000, None).throughput(), 0.0);
        assert_eq!(record("a.ts", 2000, Some(0)).throughput(), 0.0);
    }

    #[test]
    fn test_history_is_bounded_and_published() {
        let monitor = NetworkMonitor::new(MonitorConfig { history_size: 2 });
        let last = Arc::new(Mutex::new(Vec::new()));
        let sink = last.clone();
        let _sub = monitor.batches().subscribe(move |batch: &Vec<RequestRecord>| {
            *sink.lock() = batch.clone();
        });

        monitor.record(record("a.ts", 1, Some(1)));
        monitor.record(record("b.ts", 2, Some(1)));
        monitor.record(record("c.ts", 3, Some(1)));

        let sizes: Vec<u64> = last.lock().iter().map(|r| r.response_size).collect();
        assert_eq!(sizes, vec![2, 3]);
    }

    #[test]
    fn test_host_switch_clears_history() {
        let monitor = NetworkMonitor::new(MonitorConfig::default());
        assert!(monitor.switch_host("a.test"));
        monitor.record(record("a.ts", 1, Some(1)));
        assert!(!monitor.switch_host("a.test"));
        assert_eq!(monitor.history().len(), 1);
        assert!(monitor.switch_host("b.test"));
        assert!(monitor.history().is_empty());
        assert_eq!(monitor.host().as_deref(), Some("b.test"));
    }
}
