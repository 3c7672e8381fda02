//! Streaming configuration
//!
//! Loaded once per viewer session (usually from a TOML file) and handed to
//! the components that need it. Nothing in the cache reads global state.

use crate::error::{StreamingError, StreamingResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// How aggressively coarser data may stand in for missing fine data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadingStrategy {
    /// Only fall back one zoom step
    BestQualityFirst,
    /// Show whatever is there, up to three zoom steps coarser
    ProgressiveQuality,
}

impl LoadingStrategy {
    pub fn max_zoom_step_diff(self) -> u32 {
        match self {
            LoadingStrategy::BestQualityFirst => 1,
            LoadingStrategy::ProgressiveQuality => 3,
        }
    }
}

impl Default for LoadingStrategy {
    fn default() -> Self {
        LoadingStrategy::BestQualityFirst
    }
}

/// Flags which only matter while debugging the streaming
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebuggingFlags {
    /// Mark buckets as visualized while they live on the GPU
    pub visualize_buckets_on_gpu: bool,
    /// Ignore committed buckets themselves and resolve through fallbacks at
    /// most this many zoom steps coarser
    pub enforced_zoom_diff: Option<u32>,
}

/// Configuration of one streaming session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Edge length of the square look-up texture
    pub look_up_texture_width: u32,
    /// Bucket grid extent addressable through the look-up buffer
    pub address_space_dimensions: [u32; 3],
    /// Wall-clock budget per commit pass
    pub max_commit_time_ms: u64,
    pub loading_strategy: LoadingStrategy,
    /// Buckets the texture pool must be able to hold
    pub required_bucket_capacity: u32,
    /// Radius of the spherical cap the flight picker projects onto
    pub sphere_cap_radius: f64,
    pub debugging: DebuggingFlags,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            look_up_texture_width: 64,
            address_space_dimensions: [16, 16, 16],
            max_commit_time_ms: 16,
            loading_strategy: LoadingStrategy::default(),
            required_bucket_capacity: 4096,
            sphere_cap_radius: 140.0,
            debugging: DebuggingFlags::default(),
        }
    }
}

impl StreamingConfig {
    pub fn from_toml_str(source: &str) -> StreamingResult<Self> {
        let config: StreamingConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> StreamingResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| StreamingError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml_str(&source)?;
        log::info!(
            "[config::load] Loaded streaming config from {} ({:?}, capacity {})",
            path.display(),
            config.loading_strategy,
            config.required_bucket_capacity
        );
        Ok(config)
    }

    pub fn validate(&self) -> StreamingResult<()> {
        if self.look_up_texture_width == 0 {
            return Err(invalid("look_up_texture_width", "must be positive"));
        }
        if self.address_space_dimensions.iter().any(|&d| d == 0) {
            return Err(invalid("address_space_dimensions", "must be positive"));
        }
        if self.address_space_entry_count() > self.look_up_entry_count() {
            return Err(invalid(
                "address_space_dimensions",
                "address space does not fit into the look-up texture",
            ));
        }
        if self.max_commit_time_ms == 0 {
            return Err(invalid("max_commit_time_ms", "must be positive"));
        }
        if !(self.sphere_cap_radius > 0.0) {
            return Err(invalid("sphere_cap_radius", "must be positive"));
        }
        Ok(())
    }

    pub fn max_commit_time(&self) -> Duration {
        Duration::from_millis(self.max_commit_time_ms)
    }

    /// Zoom step difference a fallback may have, honoring the debugging override
    pub fn max_zoom_step_diff(&self) -> u32 {
        self.debugging
            .enforced_zoom_diff
            .unwrap_or_else(|| self.loading_strategy.max_zoom_step_diff())
    }

    pub fn look_up_entry_count(&self) -> usize {
        let width = self.look_up_texture_width as usize;
        width * width
    }

    pub fn address_space_entry_count(&self) -> usize {
        self.address_space_dimensions
            .iter()
            .map(|&d| d as usize)
            .product()
    }
}

fn invalid(field: &str, reason: &str) -> StreamingError {
    StreamingError::Config {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
