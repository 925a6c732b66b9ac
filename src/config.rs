//! Runtime configuration for time-dynamic-stream.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! Memory budget, load-time estimation, shading and fetch knobs all live here.

use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::render::ShadowMode;

/// Command-line arguments for the demo player.
#[derive(Parser, Debug, Clone)]
#[command(name = "time-dynamic-stream", about = "Time-dynamic frame stream player")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Path to the timeline manifest (JSON list of intervals).
    #[arg(short, long)]
    pub manifest: PathBuf,

    /// Override the render rate in frames per second.
    #[arg(long)]
    pub fps: Option<u32>,

    /// Override the clock multiplier (negative plays backward).
    #[arg(long, allow_hyphen_values = true)]
    pub multiplier: Option<f64>,

    /// Override how long to play, in wall-clock seconds.
    #[arg(long)]
    pub duration: Option<f64>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Frame cache and scheduling.
    pub stream: StreamConfig,

    /// Point attenuation settings pushed to every frame.
    pub shading: ShadingConfig,

    /// Resource fetch settings.
    pub fetch: FetchConfig,

    /// Reference decoder settings.
    pub decoder: DecoderConfig,

    /// Demo playback settings.
    pub playback: PlaybackConfig,
}

/// Frame cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Maximum memory in MiB that cached frames may use before eviction kicks in.
    pub maximum_memory_usage_mb: usize,

    /// Number of sequential load durations in the moving average.
    pub load_time_window: usize,

    /// Load time guess (seconds) used before any frame has loaded.
    pub initial_load_time_secs: f64,

    /// Whether frames are rendered at all.
    pub show: bool,

    /// Shadow casting / receiving mode.
    pub shadows: ShadowMode,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            maximum_memory_usage_mb: 256,
            load_time_window: 5,
            initial_load_time_secs: 0.05,
            show: true,
            shadows: ShadowMode::Enabled,
        }
    }
}

impl StreamConfig {
    /// The memory budget in bytes.
    pub fn memory_budget_bytes(&self) -> usize {
        self.maximum_memory_usage_mb * 1024 * 1024
    }
}

/// Point attenuation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadingConfig {
    /// Scale point size by geometric error.
    pub attenuation: bool,

    /// Multiplier applied to the geometric error.
    pub geometric_error_scale: f64,

    /// Maximum attenuated point size in pixels (10 when unset).
    pub maximum_attenuation: Option<f64>,

    /// Fixed geometric error; computed from point density when unset.
    pub base_resolution: Option<f64>,
}

impl Default for ShadingConfig {
    fn default() -> Self {
        Self {
            attenuation: false,
            geometric_error_scale: 1.0,
            maximum_attenuation: None,
            base_resolution: None,
        }
    }
}

/// Resource fetch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Directory that relative resource paths resolve against.
    pub base_dir: Option<PathBuf>,

    /// HTTP request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            base_dir: None,
            timeout_secs: 30,
        }
    }
}

/// Reference point cloud decoder settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Points uploaded per decoder update.
    pub upload_chunk_points: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            upload_chunk_points: 65536,
        }
    }
}

/// Demo player settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Render rate.
    pub fps: u32,

    /// Clock multiplier.
    pub multiplier: f64,

    /// Wall-clock playing time in seconds.
    pub duration_secs: f64,

    /// Loop back to the start of the timeline at the end.
    pub loop_playback: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            fps: 60,
            multiplier: 1.0,
            duration_secs: 10.0,
            loop_playback: true,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// Apply command-line overrides on top of the loaded file.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(fps) = cli.fps {
            self.playback.fps = fps;
        }
        if let Some(multiplier) = cli.multiplier {
            self.playback.multiplier = multiplier;
        }
        if let Some(duration) = cli.duration {
            self.playback.duration_secs = duration;
        }
    }
}
