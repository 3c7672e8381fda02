//! Error handling for bucket streaming
//!
//! Every fatal condition of the streaming core is a `StreamingError`.
//! Degraded GPU capability is reported as data on
//! [`DataTexturesSetup`](crate::rendering::DataTexturesSetup) and never shows up here.

use thiserror::Error;

/// Main error type for volume streaming
#[derive(Debug, Error)]
pub enum StreamingError {
    // GPU capability errors
    #[error("GPU capabilities could not be queried: {reason}")]
    CapabilityQueryFailed { reason: String },

    #[error(
        "Minimum spec is not met: GPU supports texture size {texture_size} and {texture_count} textures (need {min_size} and {min_count})"
    )]
    MinimumSpecNotMet {
        texture_size: u32,
        texture_count: u32,
        min_size: u32,
        min_count: u32,
    },

    // Cache errors
    #[error("A new bucket should be stored but there is no space for it (capacity {capacity}, requested {requested})")]
    CapacityExhausted { capacity: usize, requested: usize },

    #[error("Zoom step {zoom_step} is not available ({available} resolutions)")]
    InvalidZoomStep { zoom_step: u32, available: usize },

    #[error("Invalid texture layout: {reason}")]
    InvalidTextureLayout { reason: String },

    #[error("Unsupported texel layout: {channels} channels")]
    UnsupportedTexelLayout { channels: u32 },

    #[error("Texture update failed: {reason}")]
    TextureUpdate { reason: String },

    // Configuration errors
    #[error("Invalid config: {field} ({reason})")]
    Config { field: String, reason: String },

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("IO error for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Type alias for Results in volume streaming
pub type StreamingResult<T> = Result<T, StreamingError>;

/// Convert Option to Result with context
pub trait OptionExt<T> {
    fn ok_or_streaming<F>(self, f: F) -> StreamingResult<T>
    where
        F: FnOnce() -> StreamingError;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_streaming<F>(self, f: F) -> StreamingResult<T>
    where
        F: FnOnce() -> StreamingError,
    {
        self.ok_or_else(f)
    }
}
