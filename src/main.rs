//! time-dynamic-stream demo player.
//!
//! Plays a timeline manifest against a simulated clock at a fixed render
//! rate, streaming frames through the cache and logging frame changes,
//! failures and memory use.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use time_dynamic_stream::config::{Cli, Config};
use time_dynamic_stream::render::points::PointCloudDecoder;
use time_dynamic_stream::render::RenderContext;
use time_dynamic_stream::timeline::{ClockRange, IntervalTimeline, SimulatedClock};
use time_dynamic_stream::transfer::fetcher::ResourceFetcher;
use time_dynamic_stream::{StreamEvent, TimeDynamicStream};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "time_dynamic_stream=debug"
    } else {
        "time_dynamic_stream=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("time-dynamic-stream v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let mut config = Config::load(&cli.config)?;
    config.apply_cli(&cli);

    let timeline = IntervalTimeline::from_json_file(&cli.manifest)
        .with_context(|| format!("loading manifest {}", cli.manifest.display()))?;
    let (start, stop) = timeline
        .span()
        .context("timeline manifest has no intervals")?;

    info!(
        intervals = timeline.len(),
        start,
        stop,
        budget_mb = config.stream.maximum_memory_usage_mb,
        "Timeline loaded"
    );

    // Relative frame paths resolve next to the manifest unless configured.
    if config.fetch.base_dir.is_none() {
        config.fetch.base_dir = cli.manifest.parent().map(|p| p.to_path_buf());
    }

    let range = if config.playback.loop_playback {
        ClockRange::LoopStop
    } else {
        ClockRange::Clamped
    };
    let mut clock = SimulatedClock::new(start, stop).with_range(range);
    clock.multiplier = config.playback.multiplier;
    if clock.multiplier < 0.0 {
        if let Some(last) = timeline.get(timeline.len() - 1) {
            clock.set_time(last.start);
        }
    }

    let fetcher = Arc::new(ResourceFetcher::new(&config.fetch)?);
    let decoder = Arc::new(PointCloudDecoder::new(config.decoder.upload_chunk_points));
    let mut stream = TimeDynamicStream::new(clock, timeline, fetcher, decoder, &config.stream)?;
    stream.shading = config.shading.clone();

    let mut events = stream.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(StreamEvent::FrameFailed { uri, message }) => {
                    warn!(uri = %uri, error = %message, "Frame failed");
                }
                Ok(StreamEvent::FrameChanged { index }) => {
                    debug!(index, "Frame changed");
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event listener lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let fps = config.playback.fps.max(1);
    let frame_dt = 1.0 / fps as f64;
    let total_frames = (config.playback.duration_secs * fps as f64).ceil() as u64;
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(frame_dt));
    let mut ctx = RenderContext::default();
    let started = Instant::now();

    info!(fps, total_frames, multiplier = config.playback.multiplier, "Starting playback");

    for frame in 0..total_frames {
        ticker.tick().await;
        stream.clock_mut().tick(frame_dt);
        ctx.begin_frame(started.elapsed().as_secs_f64());
        stream.update(&mut ctx)?;

        if frame % fps as u64 == 0 {
            info!(
                time = stream.clock().current_time,
                rendered = ?stream.rendered_interval(),
                bytes_used = stream.total_bytes_used(),
                avg_load_secs = stream.average_load_time(),
                draws = ctx.commands.len(),
                "Playback"
            );
        }
    }

    let stats = stream.stats();
    info!(
        requested = stats.frames_requested,
        ready = stats.frames_ready,
        failed = stats.frames_failed,
        evicted = stats.frames_evicted,
        stale = stats.stale_completions,
        bytes_used = stats.bytes_used,
        "Playback finished"
    );

    stream.destroy();
    Ok(())
}
