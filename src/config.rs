//! Capture configuration, loaded from TOML with `PREVIEW_*` environment overrides.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

use crate::traits::{FlashMode, Size};

/// Errors from loading or validating a [`CaptureConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("cannot read config {}: {source}", .path.display())]
    Io {
        /// File that failed to read.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this structure.
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Preview capture settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Camera to open (0 for /dev/video0 on V4L2).
    pub camera_index: u32,
    /// Requested preview width; the nearest supported size is used.
    pub preview_width: u32,
    /// Requested preview height.
    pub preview_height: u32,
    /// Number of preview buffers to register.
    pub buffer_count: usize,
    /// Flash mode to apply after opening, if any.
    pub flash_mode: Option<String>,
    /// Deliver frames into registered buffers when the device allows it.
    pub pooled_preview: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            camera_index: 0,
            preview_width: 640,
            preview_height: 480,
            buffer_count: 3,
            flash_mode: None,
            pooled_preview: true,
        }
    }
}

impl CaptureConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(src)?)
    }

    /// Read and parse the TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let src = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&src)
    }

    /// Apply `PREVIEW_*` environment variables on top of this config.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value.
    ///
    /// Values that fail to parse leave the field unchanged.
    #[must_use]
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(index) = parse_override(lookup("PREVIEW_CAMERA_INDEX")) {
            self.camera_index = index;
        }
        if let Some(width) = parse_override(lookup("PREVIEW_WIDTH")) {
            self.preview_width = width;
        }
        if let Some(height) = parse_override(lookup("PREVIEW_HEIGHT")) {
            self.preview_height = height;
        }
        if let Some(count) = parse_override(lookup("PREVIEW_BUFFER_COUNT")) {
            self.buffer_count = count;
        }
        if let Some(mode) = lookup("PREVIEW_FLASH_MODE") {
            let mode = mode.trim().to_owned();
            self.flash_mode = (!mode.is_empty()).then_some(mode);
        }
        if let Some(pooled) = lookup("PREVIEW_POOLED") {
            self.pooled_preview = pooled.trim() != "0";
        }
        self
    }

    /// Reject values no device can satisfy.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.preview_width == 0 || self.preview_height == 0 {
            return Err(ConfigError::Invalid(format!(
                "preview size {}x{} has a zero dimension",
                self.preview_width, self.preview_height
            )));
        }
        if self.buffer_count == 0 {
            return Err(ConfigError::Invalid(
                "buffer_count must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }

    /// Requested preview size.
    pub const fn target_preview_size(&self) -> Size {
        Size::new(self.preview_width, self.preview_height)
    }

    /// Requested flash mode.
    pub fn flash_mode(&self) -> Option<FlashMode> {
        self.flash_mode.as_deref().map(FlashMode::from)
    }
}

fn parse_override<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|value| value.trim().parse().ok())
}
