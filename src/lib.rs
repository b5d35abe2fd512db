pub mod capture;
pub mod error;
pub mod pipeline;
pub mod sink;
pub mod transform;

use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;
use capture::frame::{PixelFormat, StreamFormat};
use serde::{Deserialize, Serialize};

pub use capture::Frame;
pub use error::{CaptureError, HandoffError, RenderError};
pub use pipeline::FrameHandoff;
pub use transform::CartoonModes;

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// Snapshot of the current global configuration.
pub fn config() -> Arc<Config> {
    CONFIG.load_full()
}

/// System configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub pipeline: PipelineConfig,
    pub cartoon: CartoonModes,
    pub run: RunConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    TestPattern,
    V4l2,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub source: SourceKind,
    /// Device path; empty means auto-detect.
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
    pub buffer_count: u32,
    pub max_consecutive_errors: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub poll_interval_ms: u64,
    /// Time a saved frame stays on screen before live output resumes.
    pub freeze_output_ms: u64,
    pub pin_render_core: Option<usize>,
    pub latency_window: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Stop after this long; run until Ctrl-C when unset.
    pub duration_secs: Option<u64>,
    /// Request a snapshot this often.
    pub snapshot_every_ms: Option<u64>,
    pub stats_interval_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::TestPattern,
            device: String::new(),
            width: 640,
            height: 480,
            fps: 30,
            format: PixelFormat::Nv21,
            buffer_count: 4,
            max_consecutive_errors: 10,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2,
            freeze_output_ms: 3000,
            pin_render_core: None,
            latency_window: 256,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            duration_secs: None,
            snapshot_every_ms: None,
            stats_interval_ms: 5000,
        }
    }
}

impl CaptureConfig {
    pub fn stream(&self) -> StreamFormat {
        StreamFormat::new(self.width, self.height, self.format)
    }
}

impl Config {
    /// Defaults, overridden by the optional TOML file, overridden by
    /// `CARTOON__<SECTION>__<KEY>` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder
            .add_source(
                config::Environment::with_prefix("CARTOON")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_android_preview() {
        let config = Config::default();
        assert_eq!(config.capture.format, PixelFormat::Nv21);
        assert!(config.capture.device.is_empty(), "device is auto-detected by default");
        assert_eq!(config.pipeline.freeze_output_ms, 3000);
        assert_eq!(config.cartoon, CartoonModes::default());
        assert_eq!(config.capture.stream().frame_len().unwrap(), 640 * 480 * 3 / 2);
    }

    #[test]
    fn global_config_swaps() {
        let mut changed = Config::default();
        changed.run.stats_interval_ms = 1234;
        CONFIG.store(Arc::new(changed));
        assert_eq!(config().run.stats_interval_ms, 1234);
        CONFIG.store(Arc::new(Config::default()));
    }
}
