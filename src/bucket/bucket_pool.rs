//! Bucket pool
//!
//! Owns every bucket of one data layer. Buckets are created on first
//! reference and reclaimed once nobody but the pool holds them.

use super::address::{resolution_at, ZoomedAddress};
use super::data_bucket::{BucketId, BucketState, DataBucket};
use crate::error::StreamingResult;
use glam::DVec3;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;

pub struct BucketPool {
    resolutions: Vec<DVec3>,
    buckets: FxHashMap<ZoomedAddress, Arc<DataBucket>>,
    next_id: u64,
}

impl BucketPool {
    pub fn new(resolutions: Vec<DVec3>) -> Self {
        Self {
            resolutions,
            buckets: FxHashMap::default(),
            next_id: 0,
        }
    }

    pub fn resolutions(&self) -> &[DVec3] {
        &self.resolutions
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn get_bucket(&self, address: &ZoomedAddress) -> Option<Arc<DataBucket>> {
        self.buckets.get(address).cloned()
    }

    /// Look up a bucket, creating it (and its fallback chain) if necessary
    pub fn get_or_create_bucket(&mut self, address: ZoomedAddress) -> StreamingResult<Arc<DataBucket>> {
        if let Some(bucket) = self.buckets.get(&address) {
            return Ok(Arc::clone(bucket));
        }
        resolution_at(&self.resolutions, address.zoom_step)?;

        let fallback = match address.fallback_address(&self.resolutions) {
            Some(fallback_address) => Some(self.get_or_create_bucket(fallback_address)?),
            None => None,
        };

        let id = BucketId(self.next_id);
        self.next_id += 1;
        let bucket = Arc::new(DataBucket::new(id, address, fallback.as_ref()));
        self.buckets.insert(address, Arc::clone(&bucket));
        Ok(bucket)
    }

    /// Deliver a payload; returns false if the bucket is unknown
    pub fn receive_data(&self, address: &ZoomedAddress, data: Vec<u8>) -> bool {
        match self.buckets.get(address) {
            Some(bucket) => {
                bucket.receive_data(data);
                true
            }
            None => false,
        }
    }

    /// Reclaim one bucket regardless of who still references it
    pub fn collect(&mut self, address: &ZoomedAddress) -> bool {
        match self.buckets.remove(address) {
            Some(bucket) => {
                bucket.collect();
                true
            }
            None => false,
        }
    }

    /// Reclaim every bucket only the pool still holds
    ///
    /// Buckets that are loading, and the fallback chains of buckets that
    /// survive, are kept.
    pub fn collect_garbage(&mut self) -> usize {
        let mut retained: FxHashSet<BucketId> = FxHashSet::default();
        for bucket in self.buckets.values() {
            let referenced = Arc::strong_count(bucket) > 1;
            if !referenced && bucket.state() != BucketState::Loading {
                continue;
            }
            retained.insert(bucket.id());
            let mut fallback = bucket.fallback_bucket();
            while let Some(current) = fallback {
                if !retained.insert(current.id()) {
                    break;
                }
                fallback = current.fallback_bucket();
            }
        }

        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| {
            if retained.contains(&bucket.id()) {
                true
            } else {
                bucket.collect();
                false
            }
        });
        let collected = before - self.buckets.len();
        if collected > 0 {
            log::debug!(
                "[bucket_pool::collect_garbage] Collected {} buckets, {} remain",
                collected,
                self.buckets.len()
            );
        }
        collected
    }
}
