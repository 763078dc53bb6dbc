use url::Url;

/// One media segment of a resolved variant.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// URI as written in the playlist.
    pub uri: String,
    /// `uri` resolved against the playlist URL.
    pub url: Url,
    /// Duration in seconds, always positive.
    pub duration: f64,
    /// Sum of the durations of all preceding chunks.
    pub start_time: f64,
    pub name: Option<String>,
}

impl Chunk {
    #[inline]
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    /// Whether `time` falls inside `[start_time, end_time)`.
    pub fn contains(&self, time: f64) -> bool {
        time >= self.start_time && time < self.end_time()
    }
}
