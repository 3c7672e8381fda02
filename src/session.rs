//! Streaming session
//!
//! Ties the flight picker, the bucket pool, the pull queue and the texture
//! bucket manager together for one viewer session. The session owns all of
//! them; dropping it releases every bucket and texture.

use crate::bucket::{
    determine_buckets_for_flight, global_position_to_bucket_position, BucketPool, BucketState,
    DataBucket, PullQueue, TextureBucketManager, TextureBucketManagerStats, ZoomedAddress,
};
use crate::camera::{build_query_matrix, request_log_zoom_step, FlycamData};
use crate::config::StreamingConfig;
use crate::error::StreamingResult;
use crate::rendering::{DataTextureSizeAndCount, TextureFactory};
use glam::DVec3;
use std::sync::Arc;

pub struct StreamingSession {
    config: StreamingConfig,
    pool: BucketPool,
    pull_queue: PullQueue,
    manager: TextureBucketManager,
    // Keeps the active buckets alive between frames
    active_buckets: Vec<Arc<DataBucket>>,
}

impl StreamingSession {
    pub fn new(
        config: StreamingConfig,
        resolutions: Vec<DVec3>,
        plan: &DataTextureSizeAndCount,
    ) -> StreamingResult<Self> {
        let manager = TextureBucketManager::new(
            plan.texture_size,
            plan.texture_count,
            plan.packing_degree,
            &config,
        )?;
        Ok(Self {
            config,
            pool: BucketPool::new(resolutions),
            pull_queue: PullQueue::new(),
            manager,
            active_buckets: Vec::new(),
        })
    }

    pub fn setup_textures(&mut self, factory: &dyn TextureFactory, bytes: u32) -> StreamingResult<()> {
        self.manager.setup_data_textures(factory, bytes)
    }

    pub fn manager(&self) -> &TextureBucketManager {
        &self.manager
    }

    pub fn pool(&self) -> &BucketPool {
        &self.pool
    }

    pub fn stats(&self) -> TextureBucketManagerStats {
        self.manager.stats()
    }

    pub fn pending_pull_count(&self) -> usize {
        self.pull_queue.len()
    }

    /// Pick the buckets for the current camera and make them the active set
    pub fn update(&mut self, flycam: &FlycamData) -> StreamingResult<()> {
        let zoom_step = request_log_zoom_step(flycam, self.pool.resolutions().len());
        let matrix = build_query_matrix(flycam);

        let mut picked: Vec<(ZoomedAddress, i32)> = Vec::new();
        determine_buckets_for_flight(
            self.pool.resolutions(),
            flycam.position,
            self.config.sphere_cap_radius,
            |address, priority| picked.push((address, priority)),
            &matrix,
            zoom_step,
            Some(self.manager.capacity() as usize),
        )?;

        // Pulls of the last frame are outdated by now
        self.pull_queue.clear();
        let mut buckets = Vec::with_capacity(picked.len());
        for (address, priority) in picked {
            let bucket = self.pool.get_or_create_bucket(address)?;
            if bucket.state() == BucketState::Unrequested {
                self.pull_queue.enqueue(address, priority);
            }
            buckets.push(bucket);
        }

        let anchor_point = self.anchor_point(flycam.position, zoom_step)?;
        self.manager.set_active_buckets(&buckets, anchor_point)?;
        self.active_buckets = buckets;

        log::debug!(
            "[session::update] {} active buckets at zoom step {}, {} pulls pending",
            self.active_buckets.len(),
            zoom_step,
            self.pull_queue.len()
        );
        Ok(())
    }

    /// Bucket at the camera minus half the address space
    fn anchor_point(&self, position: DVec3, zoom_step: u32) -> StreamingResult<ZoomedAddress> {
        let center = global_position_to_bucket_position(position, self.pool.resolutions(), zoom_step)?;
        let [sx, sy, sz] = self.config.address_space_dimensions.map(|d| (d / 2) as i32);
        Ok(ZoomedAddress::new(
            center.x - sx,
            center.y - sy,
            center.z - sz,
            zoom_step,
        ))
    }

    /// Hand at most `count` addresses to the loader and mark them as loading
    pub fn take_pull_requests(&mut self, count: usize) -> Vec<ZoomedAddress> {
        let mut requests = Vec::with_capacity(count.min(self.pull_queue.len()));
        while requests.len() < count {
            let batch = self.pull_queue.take(count - requests.len());
            if batch.is_empty() {
                break;
            }
            for address in batch {
                let pulled = self
                    .pool
                    .get_bucket(&address)
                    .is_some_and(|bucket| bucket.mark_as_pulled());
                if pulled {
                    requests.push(address);
                }
            }
        }
        requests
    }

    /// Deliver a loaded payload; returns false for unknown buckets
    pub fn receive_data(&self, address: &ZoomedAddress, data: Vec<u8>) -> bool {
        self.pool.receive_data(address, data)
    }

    /// One frame of uploads; returns the number of committed buckets
    pub fn tick(&mut self) -> StreamingResult<usize> {
        self.manager.tick()
    }

    pub fn collect_garbage(&mut self) -> usize {
        self.pool.collect_garbage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::create_flycam;
    use crate::constants::bucket::BUCKET_SIZE;
    use crate::rendering::CpuTextureFactory;

    // 2 textures of 512² texels with 4 voxels each hold 64 buckets
    const PLAN: DataTextureSizeAndCount = DataTextureSizeAndCount {
        texture_size: 512,
        texture_count: 2,
        packing_degree: 4,
    };

    fn session() -> (StreamingSession, CpuTextureFactory) {
        // Coarse enough that the whole view needs only a handful of buckets
        let resolutions = vec![DVec3::splat(16.0)];
        let mut session = StreamingSession::new(StreamingConfig::default(), resolutions, &PLAN).unwrap();
        let factory = CpuTextureFactory::new();
        session.setup_textures(&factory, 1).unwrap();
        (session, factory)
    }

    fn load_everything(session: &mut StreamingSession) {
        for address in session.take_pull_requests(usize::MAX) {
            assert!(session.receive_data(&address, vec![1; BUCKET_SIZE as usize]));
        }
    }

    #[test]
    fn test_update_activates_and_queues_buckets() {
        let (mut session, _factory) = session();
        session.update(&create_flycam(DVec3::ZERO, 1.0)).unwrap();

        let stats = session.stats();
        assert!(stats.active > 0);
        assert!(stats.active <= stats.capacity as usize);
        assert_eq!(session.pending_pull_count(), stats.active);
        assert_eq!(
            session.manager().current_anchor_point(),
            ZoomedAddress::new(-8, -8, -8, 0)
        );
    }

    #[test]
    fn test_pulled_buckets_are_not_requested_again() {
        let (mut session, _factory) = session();
        let flycam = create_flycam(DVec3::ZERO, 1.0);
        session.update(&flycam).unwrap();
        let active = session.stats().active;

        let pulled = session.take_pull_requests(2);
        assert_eq!(pulled.len(), 2);
        for address in &pulled {
            let bucket = session.pool().get_bucket(address).unwrap();
            assert_eq!(bucket.state(), BucketState::Loading);
        }

        session.update(&flycam).unwrap();
        assert_eq!(session.pending_pull_count(), active - 2);
    }

    #[test]
    fn test_loaded_buckets_reach_the_look_up_buffer() {
        let (mut session, _factory) = session();
        session.update(&create_flycam(DVec3::ZERO, 1.0)).unwrap();
        load_everything(&mut session);

        let committed = session.tick().unwrap();
        assert_eq!(committed, session.stats().active);
        assert!(session
            .manager()
            .get_look_up_buffer()
            .chunks(2)
            .any(|entry| entry[0] >= 0.0));
    }

    #[test]
    fn test_garbage_collection_after_flying_away() {
        let (mut session, _factory) = session();
        session.update(&create_flycam(DVec3::ZERO, 1.0)).unwrap();
        load_everything(&mut session);
        session.tick().unwrap();
        let before = session.pool().len();

        session
            .update(&create_flycam(DVec3::new(100_000.0, 0.0, 0.0), 1.0))
            .unwrap();
        let collected = session.collect_garbage();
        assert_eq!(collected, before);
        assert_eq!(session.pool().len(), session.stats().active);

        // The collected buckets are gone from the manager as well
        session.tick().unwrap();
        assert_eq!(session.stats().committed, 0);
    }
}
