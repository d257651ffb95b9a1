//! # Configuration Management Module
//!
//! Persistent settings stored in platform-appropriate locations.
//! Handles loading, saving, and providing defaults for every tuning knob of
//! the live view and the recorder.
//!
//! ## Storage Location
//! - macOS: ~/Library/Application Support/ppg-scope/config.toml
//! - Linux: ~/.config/ppg-scope/config.toml
//! - Windows: %APPDATA%\ppg-scope\config.toml
//!
//! Every field has a default, so a partial file only overrides what it names.

use crate::axis::AxisConfig;
use crate::error::ConfigError;
use crate::timeseries::{ChannelResolver, CollisionPolicy};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_WINDOW_CAPACITY: usize = 500;
pub const DEFAULT_FRAME_RATE: u32 = 10;
pub const DEFAULT_X_TICK_STEP: f64 = 2.0;
pub const DEFAULT_Y_PADDING_FRACTION: f64 = 0.06;
pub const DEFAULT_COMPOSITOR_PADDING: u32 = 12;
pub const DEFAULT_CHUNK_INTERVAL_MS: u64 = 1000;

/// Which unknown channels the live store accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelPolicy {
    /// Only IR, RED and GREEN
    Known,
    /// Any channel a producer names
    AcceptAll,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum samples retained per channel
    pub window_capacity: usize,
    /// Composite frames per second while recording
    pub frame_rate: u32,
    /// X axis tick step in seconds
    pub x_tick_step: f64,
    /// Fraction of the Y range added above and below
    pub y_padding_fraction: f64,
    /// Vertical gap between stacked charts in the composite, in pixels
    pub compositor_padding: u32,
    /// How often the encoder hands over encoded bytes
    pub chunk_interval_ms: u64,
    /// Preferred recording formats, most preferred first
    pub mime_preferences: Vec<String>,
    /// Where finished recordings are written
    pub output_dir: PathBuf,
    /// Telemetry source, `host:port`
    pub transport_addr: String,
    pub channel_policy: ChannelPolicy,
    pub collision_policy: CollisionPolicy,
    /// Size of each processed chart surface
    pub processed_width: u32,
    pub processed_height: u32,
    /// Exponential smoothing of processed chart Y limits, 0 disables
    pub processed_y_smooth: f64,
    /// Fixed processed chart Y limits, used only when both are set
    pub processed_y_min: Option<f64>,
    pub processed_y_max: Option<f64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            frame_rate: DEFAULT_FRAME_RATE,
            x_tick_step: DEFAULT_X_TICK_STEP,
            y_padding_fraction: DEFAULT_Y_PADDING_FRACTION,
            compositor_padding: DEFAULT_COMPOSITOR_PADDING,
            chunk_interval_ms: DEFAULT_CHUNK_INTERVAL_MS,
            mime_preferences: vec![
                "video/webm;codecs=vp9".to_string(),
                "video/webm;codecs=vp8".to_string(),
                "video/webm".to_string(),
                "image/gif".to_string(),
            ],
            output_dir: PathBuf::from("recordings"),
            transport_addr: "127.0.0.1:8000".to_string(),
            channel_policy: ChannelPolicy::Known,
            collision_policy: CollisionPolicy::Keep,
            processed_width: 800,
            processed_height: 240,
            processed_y_smooth: 0.2,
            processed_y_min: None,
            processed_y_max: None,
        }
    }
}

impl Config {
    /// Get the path to the config file
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ppg-scope")
            .join("config.toml")
    }

    /// Load config from the default location, or create default if it doesn't exist
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::config_path())
    }

    /// Load config from `path`, writing the defaults there if the file is missing
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(contents) => {
                let config: Config = toml::from_str(&contents)?;
                config.validate()?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.save_to(path)?;
                Ok(config)
            }
            Err(e) => Err(ConfigError::ReadFailed(e)),
        }
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(Self::config_path())
    }

    /// Save config to `path`
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::WriteFailed)?;
        }

        let toml_string = toml::to_string_pretty(self)?;
        fs::write(path, toml_string).map_err(ConfigError::WriteFailed)?;

        Ok(())
    }

    /// Reject values the pipeline cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "window_capacity",
                reason: "must be at least 1".into(),
            });
        }
        if self.frame_rate == 0 {
            return Err(ConfigError::Invalid {
                field: "frame_rate",
                reason: "must be at least 1".into(),
            });
        }
        if !(self.x_tick_step.is_finite() && self.x_tick_step > 0.0) {
            return Err(ConfigError::Invalid {
                field: "x_tick_step",
                reason: format!("{} is not a positive number", self.x_tick_step),
            });
        }
        if !(self.y_padding_fraction.is_finite() && self.y_padding_fraction >= 0.0) {
            return Err(ConfigError::Invalid {
                field: "y_padding_fraction",
                reason: format!("{} is negative or not finite", self.y_padding_fraction),
            });
        }
        if !(0.0..=1.0).contains(&self.processed_y_smooth) {
            return Err(ConfigError::Invalid {
                field: "processed_y_smooth",
                reason: format!("{} is outside [0, 1]", self.processed_y_smooth),
            });
        }
        if let (Some(min), Some(max)) = (self.processed_y_min, self.processed_y_max) {
            if min >= max {
                return Err(ConfigError::Invalid {
                    field: "processed_y_min",
                    reason: format!("{min} must be below processed_y_max {max}"),
                });
            }
        }
        Ok(())
    }

    pub fn axis(&self) -> AxisConfig {
        AxisConfig {
            x_tick_step: self.x_tick_step,
            y_padding_fraction: self.y_padding_fraction,
        }
    }

    pub fn channel_resolver(&self) -> ChannelResolver {
        match self.channel_policy {
            ChannelPolicy::Known => ChannelResolver::KnownChannels,
            ChannelPolicy::AcceptAll => ChannelResolver::AcceptAll,
        }
    }

    pub fn chunk_interval(&self) -> Duration {
        Duration::from_millis(self.chunk_interval_ms.max(1))
    }

    /// Fixed processed chart limits, if both ends are configured
    pub fn processed_y_limits(&self) -> Option<(f64, f64)> {
        match (self.processed_y_min, self.processed_y_max) {
            (Some(min), Some(max)) if min < max => Some((min, max)),
            _ => None,
        }
    }
}
