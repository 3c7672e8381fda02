//! Engine-wide constants for bucket streaming.
//!
//! Values that the shader and the CPU side must agree on live here.

/// Bucket geometry
pub mod bucket {
    /// Edge length of a bucket in voxels
    pub const BUCKET_WIDTH: u32 = 32;

    /// Voxels per bucket (BUCKET_WIDTH³)
    pub const BUCKET_SIZE: u32 = BUCKET_WIDTH * BUCKET_WIDTH * BUCKET_WIDTH;
}

/// View geometry used by the bucket pickers
pub mod view {
    /// Edge length of the rendered viewport in screen units
    pub const VIEWPORT_WIDTH: f64 = 376.0;

    /// Distance between two screen-space samples of the flight picker
    pub const FLIGHT_SAMPLE_STRIDE: f64 = 8.0;

    /// Distance (in voxels) to a bucket border below which the neighbour is picked too
    pub const NEIGHBOUR_THRESHOLD: f64 = 3.0;

    /// Extra fallback buckets added around the plane's bounding box
    pub const FALLBACK_TOLERANCE: i32 = 1;
}

/// Texture budget figures
pub mod textures {
    /// One look-up texture per data layer
    pub const LOOKUP_TEXTURES_PER_LAYER: u32 = 1;

    /// Mappings need one look-up, one data and one color texture
    pub const MAPPING_TEXTURE_COUNT: u32 = 3;

    /// Minimum texture edge length a GPU must support
    pub const MIN_TEXTURE_SIZE: u32 = 4096;

    /// Minimum number of combined texture units a GPU must support
    pub const MIN_TEXTURE_COUNT: u32 = 8;
}

/// Look-up buffer layout
pub mod look_up {
    /// Two floats per entry: slot index and zoom step
    pub const CHANNEL_COUNT: usize = 2;

    /// Entry is outside of the rendered volume
    pub const OUTSIDE: f32 = -2.0;

    /// Entry is reserved but nothing committed can represent it yet
    pub const UNCOMMITTED: f32 = -1.0;
}
