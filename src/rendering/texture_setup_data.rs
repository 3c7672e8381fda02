//! Texture Setup Data - Pure DOP
//!
//! NO METHODS. Just data.
//! All transformations happen in texture_setup_operations.rs

use serde::{Deserialize, Serialize};

/// Texture capabilities of the GPU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuSpecs {
    /// Maximum edge length of a 2D texture
    pub supported_texture_size: u32,
    /// Maximum number of textures a shader can sample at once
    pub max_texture_count: u32,
}

/// How one layer's bucket data is laid out in textures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataTextureSizeAndCount {
    pub texture_size: u32,
    pub texture_count: u32,
    /// Voxels per texel
    pub packing_degree: u32,
}

/// Result of planning the textures of all layers
#[derive(Debug, Clone, PartialEq)]
pub struct DataTexturesSetup<L> {
    pub is_basic_rendering_supported: bool,
    pub is_mapping_supported: bool,
    /// Plans in layer order
    pub texture_information_per_layer: Vec<(L, DataTextureSizeAndCount)>,
    /// Bucket capacity every layer can offer; `None` without layers
    pub smallest_common_bucket_capacity: Option<u32>,
}
