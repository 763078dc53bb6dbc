mod cli;
mod error;
mod output;

use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use player_engine::{
    LoadingState, LoadingStrategy, MediaOutputs, PassthroughDecoder, PlaybackEvent, Player,
    PlayerConfig, RetryMode,
};
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};
use url::Url;

use crate::cli::Args;
use crate::error::{AppError, Result};
use crate::output::{NullAudioOutput, StatsRenderer};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!("Application error: {}", e);
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    init_logging(args.verbose, args.quiet)?;

    let url = Url::parse(&args.url)?;
    if !(args.seconds.is_finite() && args.seconds > 0.0) {
        return Err(AppError::InvalidInput(format!(
            "--seconds must be positive, got {}",
            args.seconds
        )));
    }

    let mut config = PlayerConfig::default();
    config.http.connect_timeout = Duration::from_secs(args.timeout);
    config.http.read_timeout = Duration::from_secs(args.timeout);
    config.http.retry_count = args.retries;
    if args.backoff {
        config.http.retry_mode = RetryMode::Backoff;
    }

    let renderer = Arc::new(StatsRenderer::default());
    let audio = Arc::new(NullAudioOutput::default());
    let player = Player::new(
        config,
        MediaOutputs {
            video_decoder: Arc::new(PassthroughDecoder),
            audio_decoder: Arc::new(PassthroughDecoder),
            renderer: renderer.clone(),
            audio: Some(audio.clone()),
        },
    )?;

    let _events = player.events().subscribe(|event: &PlaybackEvent| {
        debug!(?event, "Playback event");
    });
    let _variants = player.loading_state_changed().subscribe(|state: &LoadingState| {
        if let LoadingState::Loaded(variant) = state {
            info!(
                variant = %variant.info.name,
                bandwidth = variant.info.bandwidth,
                resolution = ?variant.info.resolution,
                "Playing variant"
            );
        }
    });

    if let Some(bandwidth) = args.bandwidth {
        player
            .set_loading_strategy(LoadingStrategy::Pinned(bandwidth))
            .await?;
    }

    player.load(url.clone()).await?;
    let options = player.loading_options();
    if !options.is_empty() {
        info!(bandwidths = ?options, "Variants available");
    }
    if let Some(bandwidth) = args.bandwidth
        && !options.contains(&bandwidth)
    {
        warn!(bandwidth, "No variant with the requested bandwidth, playing the lowest one");
    }
    info!(duration = player.duration(), "Stream loaded");

    if let Some(time) = args.seek {
        player.seek(time);
    }

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs_f64(args.seconds)) => {}
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Interrupted");
        }
    }
    player.pause();

    print_summary(&player, &renderer, &audio);
    Ok(())
}

fn print_summary(player: &Player, renderer: &StatsRenderer, audio: &NullAudioOutput) {
    let history = player.monitor().history();
    let transferred: u64 = history.iter().map(|r| r.response_size).sum();
    let throughputs: Vec<f64> = history
        .iter()
        .map(|r| r.throughput())
        .filter(|t| *t > 0.0)
        .collect();

    println!("Delivery summary");
    if let Some(variant) = player.current_variant() {
        println!("  variant:        {} ({} bps)", variant.info.name, variant.info.bandwidth);
    }
    println!("  position:       {:.3} / {:.3} s", player.current_time(), player.duration());
    println!("  video frames:   {} ({} bytes)", renderer.frames(), renderer.bytes());
    if let Some((first, last)) = renderer.range() {
        println!("  video range:    {first:.3} .. {last:.3} s");
    }
    if renderer.regressions() > 0 {
        println!("  pts regressions: {}", renderer.regressions());
    }
    println!("  audio buffers:  {}", audio.buffers());
    if let Some(format) = audio.connected_format() {
        println!(
            "  audio format:   {} Hz, {} channel(s)",
            format.sample_rate, format.channels
        );
    }
    println!("  requests:       {} ({} bytes)", history.len(), transferred);
    if !throughputs.is_empty() {
        let mean = throughputs.iter().sum::<f64>() / throughputs.len() as f64;
        println!("  mean throughput: {:.0} B/s", mean);
    }
}

fn init_logging(verbose: bool, quiet: bool) -> Result<()> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_level(verbose))
        .try_init()
        .map_err(|e| AppError::Logging(e.to_string()))
}
