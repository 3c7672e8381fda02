//! Rendering boundary of the streaming core
//!
//! Sizing of the texture pool from GPU limits and the textures buckets are
//! uploaded into.

pub mod data_texture;
pub mod texture_setup_data;
pub mod texture_setup_operations;

pub use data_texture::{
    CpuDataTexture, CpuTextureFactory, CpuTextureStorage, DataTexture, TexelType, TextureFactory,
    WgpuDataTexture, WgpuTextureFactory,
};
pub use texture_setup_data::{DataTextureSizeAndCount, DataTexturesSetup, GpuSpecs};
pub use texture_setup_operations::{
    bucket_capacity, calculate_texture_size_and_count_for_layer, compute_data_textures_setup,
    gpu_specs_from_limits, packing_degree, query_gpu_specs, validate_minimum_requirements,
};
