use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Shared playback position in seconds; `None` until a session is loaded.
///
/// Loaders read it to gate prefetching and migration reads it to judge how far a
/// candidate stream is ahead of what is on screen.
#[derive(Debug, Clone, Default)]
pub struct PlaybackClock {
    position: Arc<Mutex<Option<f64>>>,
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Option<f64> {
        *self.position.lock()
    }

    pub fn set(&self, time: f64) {
        *self.position.lock() = Some(time);
    }

    pub fn clear(&self) {
        *self.position.lock() = None;
    }
}

/// Free-running media clock used when no audio clock is available.
///
/// The clock stays unanchored until [`MediaClock::anchor`] gives it a media time; while
/// running it advances with the tokio clock.
#[derive(Debug, Default)]
pub struct MediaClock {
    base: Option<f64>,
    started_at: Option<Instant>,
}

impl MediaClock {
    pub fn is_anchored(&self) -> bool {
        self.base.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    /// Set the media time; keeps the running state.
    pub fn anchor(&mut self, time: f64) {
        self.base = Some(time);
        if self.started_at.is_some() {
            self.started_at = Some(Instant::now());
        }
    }

    pub fn start(&mut self) {
        if self.started_at.is_none() {
            self.started_at = Some(Instant::now());
        }
    }

    /// Freeze the clock at its current time.
    pub fn pause(&mut self) {
        self.base = self.now();
        self.started_at = None;
    }

    pub fn reset(&mut self) {
        self.base = None;
        self.started_at = None;
    }

    pub fn now(&self) -> Option<f64> {
        let base = self.base?;
        Some(match self.started_at {
            Some(started) => base + started.elapsed().as_secs_f64(),
            None => base,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_playback_clock_shared() {
        let clock = PlaybackClock::new();
        assert_eq!(clock.now(), None);
        let other = clock.clone();
        other.set(4.5);
        assert_eq!(clock.now(), Some(4.5));
        clock.clear();
        assert_eq!(other.now(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_media_clock_advances_only_while_running() {
        let mut clock = MediaClock::default();
        clock.start();
        assert_eq!(clock.now(), None);

        clock.anchor(10.0);
        tokio::time::advance(Duration::from_millis(500)).await;
        assert!((clock.now().unwrap() - 10.5).abs() < 1e-6);

        clock.pause();
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!((clock.now().unwrap() - 10.5).abs() < 1e-6);

        clock.reset();
        assert!(!clock.is_anchored());
    }
}
