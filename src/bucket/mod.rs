//! Buckets and everything that moves them towards the GPU

pub mod address;
pub mod bucket_pool;
pub mod data_bucket;
pub mod flight_bucket_picker;
pub mod pull_queue;
pub mod texture_bucket_manager;

pub use address::{
    global_position_to_bucket_position, global_position_to_bucket_position_float,
    zoomed_address_to_another_zoom_step, ZoomedAddress,
};
pub use bucket_pool::BucketPool;
pub use data_bucket::{
    BucketEvent, BucketId, BucketInterest, BucketNotification, BucketState, DataBucket,
    SubscriptionId,
};
pub use flight_bucket_picker::{determine_buckets_for_flight, FLIGHT_BUCKET_PRIORITY};
pub use pull_queue::PullQueue;
pub use texture_bucket_manager::{TextureBucketManager, TextureBucketManagerStats};
