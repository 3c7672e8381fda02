// Volume Streaming - GPU-resident cache for multi-resolution voxel buckets
//
// Data flows leaves first:
// - rendering::texture_setup_operations sizes the texture pool from GPU limits
// - bucket::flight_bucket_picker decides which buckets the camera needs
// - bucket::TextureBucketManager assigns slots, uploads payloads under a time
//   budget and keeps the look-up buffer the shader reads
// - session::StreamingSession drives all of it once per frame

// Constants module
pub mod constants;

// Core modules
pub mod config;
pub mod error;

// Streaming systems
pub mod bucket;
pub mod camera;
pub mod rendering;
pub mod session;

pub use bucket::{
    determine_buckets_for_flight, BucketPool, DataBucket, PullQueue, TextureBucketManager,
    TextureBucketManagerStats, ZoomedAddress,
};
pub use camera::FlycamData;
pub use config::{DebuggingFlags, LoadingStrategy, StreamingConfig};
pub use error::{OptionExt, StreamingError, StreamingResult};
pub use rendering::{
    compute_data_textures_setup, query_gpu_specs, DataTexture, DataTextureSizeAndCount,
    DataTexturesSetup, GpuSpecs, TextureFactory, WgpuTextureFactory,
};
pub use session::StreamingSession;

// Re-export wgpu for callers that create the device themselves
pub use wgpu;
