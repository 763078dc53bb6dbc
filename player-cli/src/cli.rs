use clap::Parser;

/// Play an HLS stream headlessly and report what was delivered.
#[derive(Parser, Debug)]
#[command(name = "player-cli", version, about, long_about = None)]
pub struct Args {
    /// Master or media playlist URL
    pub url: String,

    /// Pin the variant with this bandwidth instead of adapting automatically
    #[arg(short, long)]
    pub bandwidth: Option<u64>,

    /// How long to play, in seconds
    #[arg(short, long, default_value_t = 10.0)]
    pub seconds: f64,

    /// Seek to this position once the stream is loaded
    #[arg(long)]
    pub seek: Option<f64>,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,

    /// Retries per request before giving up
    #[arg(long, default_value_t = 3)]
    pub retries: u32,

    /// Retry only transient failures, with exponentially growing delays
    #[arg(long)]
    pub backoff: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}
