use clap::Parser;
use image::ImageFormat;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use crate::errors::{Result, TileSegError};
use crate::traits::RuntimeOptions;

pub const DEFAULT_TILE_SIZE: u32 = 256;
pub const DEFAULT_THRESHOLD: f32 = 0.5;
pub const MAX_PARALLELISM: usize = 64;

fn default_parallelism() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(MAX_PARALLELISM)
}

#[derive(Parser, Clone, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Image file or directory of images
    pub input: PathBuf,

    #[arg(default_value = "output")]
    pub output_dir: PathBuf,

    #[arg(short, long)]
    pub model_path: PathBuf,

    #[arg(short, long, default_value = "png", value_parser = check_format)]
    pub format: String,

    #[arg(short, long, default_value_t = DEFAULT_TILE_SIZE)]
    pub tile_size: u32,

    /// Number of tiles inferred concurrently
    #[arg(short, long, default_value_t = default_parallelism())]
    pub parallelism: usize,

    /// Register GPU execution providers
    #[arg(short, long)]
    pub accelerate: bool,

    #[arg(short, long, default_value_t = 0)]
    pub device_id: i32,

    #[arg(long, default_value_t = 1)]
    pub threads_per_call: usize,

    #[arg(long, default_value_t = DEFAULT_THRESHOLD)]
    pub threshold: f32,

    /// Per-tile inference timeout in seconds, 0 disables it
    #[arg(long, default_value_t = 0)]
    pub task_timeout_secs: u64,

    /// Write `<stem>_stats.json` next to each result
    #[arg(long)]
    pub stats_json: bool,
}

impl Config {
    pub fn new() -> Self {
        Self::parse()
    }

    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        let config = PipelineConfig {
            model_path: self.model_path.clone(),
            tile_size: self.tile_size,
            parallelism: self.parallelism,
            acceleration: self.accelerate,
            device_id: self.device_id,
            threads_per_call: self.threads_per_call,
            threshold: self.threshold,
            task_timeout: (self.task_timeout_secs > 0)
                .then(|| Duration::from_secs(self.task_timeout_secs)),
        };
        config.validate()?;
        Ok(config)
    }
}

fn check_format(s: &str) -> std::result::Result<String, String> {
    let supported: Vec<_> = ImageFormat::all()
        .filter(|f| f.writing_enabled())
        .flat_map(|f| f.extensions_str())
        .map(|s| format!("`{}`", s))
        .collect();
    let supported_message = format!("Supported formats: {}", supported.join(", "));

    let format = ImageFormat::from_extension(s)
        .ok_or(format!("{} is not supported. {}", s, supported_message))?;
    if !format.writing_enabled() {
        return Err(format!("{} is not supported. {}", s, supported_message));
    }

    Ok(s.to_string())
}

/// Settings for one pipeline run. Never mutated while a run is in progress.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub model_path: PathBuf,
    pub tile_size: u32,
    /// Worker pool size, `1..=MAX_PARALLELISM`.
    pub parallelism: usize,
    pub acceleration: bool,
    pub device_id: i32,
    pub threads_per_call: usize,
    pub threshold: f32,
    pub task_timeout: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("model.onnx"),
            tile_size: DEFAULT_TILE_SIZE,
            parallelism: default_parallelism(),
            acceleration: false,
            device_id: 0,
            threads_per_call: 1,
            threshold: DEFAULT_THRESHOLD,
            task_timeout: None,
        }
    }
}

impl PipelineConfig {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            ..Self::default()
        }
    }

    pub const fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub const fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = tile_size;
        self
    }

    pub const fn with_acceleration(mut self, acceleration: bool) -> Self {
        self.acceleration = acceleration;
        self
    }

    pub const fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub const fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = Some(timeout);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.tile_size == 0 {
            return Err(invalid("tile_size", "must be positive"));
        }
        if self.parallelism == 0 || self.parallelism > MAX_PARALLELISM {
            return Err(invalid(
                "parallelism",
                &format!("must be between 1 and {MAX_PARALLELISM}"),
            ));
        }
        if self.threads_per_call == 0 {
            return Err(invalid("threads_per_call", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(invalid("threshold", "must be within 0.0..=1.0"));
        }
        if self.task_timeout.is_some_and(|t| t.is_zero()) {
            return Err(invalid("task_timeout", "must be non-zero"));
        }
        Ok(())
    }

    pub fn runtime_options(&self) -> RuntimeOptions {
        RuntimeOptions {
            acceleration: self.acceleration,
            device_id: self.device_id,
            threads_per_call: self.threads_per_call,
            sessions: self.parallelism,
            tile_size: self.tile_size,
        }
    }
}

fn invalid(field: &str, reason: &str) -> TileSegError {
    TileSegError::Validation {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
