//! Texture bucket manager
//!
//! Makes buckets available to the GPU. A bucket is *active* once it owns a
//! slot in the data textures and *committed* once its payload has actually
//! been written into that slot. Active buckets go through a write queue which
//! is worked off under a time budget every tick.
//!
//! The look-up buffer maps every cell of the address space around the anchor
//! to the slot (and zoom step) that currently represents it. Cells whose
//! bucket is not committed yet fall back to committed coarser buckets.

use super::address::ZoomedAddress;
use super::data_bucket::{
    BucketEvent, BucketId, BucketInterest, BucketNotification, DataBucket, SubscriptionId,
};
use crate::config::StreamingConfig;
use crate::constants::bucket::BUCKET_SIZE;
use crate::constants::look_up::{CHANNEL_COUNT, OUTSIDE, UNCOMMITTED};
use crate::error::{StreamingError, StreamingResult};
use crate::rendering::{DataTexture, TexelType, TextureFactory};
use crossbeam_channel::{unbounded, Receiver, Sender};
use rustc_hash::{FxHashMap, FxHashSet};
use static_assertions::const_assert;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

// Every packing degree has to divide a bucket evenly
const_assert!(BUCKET_SIZE % 4 == 0);

/// Request to write a bucket's payload into a slot
///
/// Holds the id only; the bucket is looked up among the active buckets when
/// the request is worked off, so evicted buckets are not kept alive.
#[derive(Debug, Clone, Copy)]
struct WriteRequest {
    bucket: BucketId,
    slot: u32,
}

struct ActiveBucket {
    bucket: Arc<DataBucket>,
    slot: u32,
    subscription: SubscriptionId,
}

/// Snapshot of the manager's bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureBucketManagerStats {
    pub capacity: u32,
    pub active: usize,
    pub committed: usize,
    pub free: usize,
    pub queued: usize,
}

pub struct TextureBucketManager {
    texture_width: u32,
    data_texture_count: u32,
    packing_degree: u32,
    bucket_height_in_texture: u32,
    buckets_per_texture: u32,
    capacity: u32,

    look_up_texture_width: u32,
    address_space_dimensions: [u32; 3],
    max_commit_time: Duration,
    max_zoom_step_diff: u32,
    enforced_zoom_diff: Option<u32>,
    visualize_buckets: bool,

    active_bucket_to_index_map: FxHashMap<BucketId, ActiveBucket>,
    committed_buckets: FxHashSet<BucketId>,
    free_indices: BTreeSet<u32>,
    // Filled at the front, worked off from the back
    writer_queue: VecDeque<WriteRequest>,

    look_up_buffer: Vec<f32>,
    current_anchor_point: ZoomedAddress,
    is_look_up_buffer_out_of_date: bool,
    is_look_up_upload_pending: bool,

    notification_sender: Sender<BucketNotification>,
    notification_receiver: Receiver<BucketNotification>,

    data_textures: Vec<Box<dyn DataTexture>>,
    look_up_texture: Option<Box<dyn DataTexture>>,
}

impl TextureBucketManager {
    /// Create a manager for `data_texture_count` textures of edge length `texture_width`
    pub fn new(
        texture_width: u32,
        data_texture_count: u32,
        packing_degree: u32,
        config: &StreamingConfig,
    ) -> StreamingResult<Self> {
        config.validate()?;
        let (bucket_height_in_texture, buckets_per_texture) =
            texture_layout(texture_width, packing_degree)?;
        let capacity = buckets_per_texture * data_texture_count;

        let look_up_entries = config.look_up_entry_count();
        let (notification_sender, notification_receiver) = unbounded();

        log::info!(
            "[texture_bucket_manager::new] {} textures of width {} (packing {}) hold {} buckets",
            data_texture_count,
            texture_width,
            packing_degree,
            capacity
        );

        Ok(Self {
            texture_width,
            data_texture_count,
            packing_degree,
            bucket_height_in_texture,
            buckets_per_texture,
            capacity,
            look_up_texture_width: config.look_up_texture_width,
            address_space_dimensions: config.address_space_dimensions,
            max_commit_time: config.max_commit_time(),
            max_zoom_step_diff: config.max_zoom_step_diff(),
            enforced_zoom_diff: config.debugging.enforced_zoom_diff,
            visualize_buckets: config.debugging.visualize_buckets_on_gpu,
            active_bucket_to_index_map: FxHashMap::default(),
            committed_buckets: FxHashSet::default(),
            free_indices: (0..capacity).collect(),
            writer_queue: VecDeque::new(),
            look_up_buffer: vec![OUTSIDE; look_up_entries * CHANNEL_COUNT],
            current_anchor_point: ZoomedAddress::new(0, 0, 0, 0),
            is_look_up_buffer_out_of_date: false,
            is_look_up_upload_pending: false,
            notification_sender,
            notification_receiver,
            data_textures: Vec::new(),
            look_up_texture: None,
        })
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn packing_degree(&self) -> u32 {
        self.packing_degree
    }

    pub fn current_anchor_point(&self) -> ZoomedAddress {
        self.current_anchor_point
    }

    /// Create the data textures and the look-up texture
    ///
    /// `bytes` is the byte width of one voxel. Nothing is committed until
    /// every texture reports itself initialized.
    pub fn setup_data_textures(
        &mut self,
        factory: &dyn TextureFactory,
        bytes: u32,
    ) -> StreamingResult<()> {
        let channel_count = bytes * self.packing_degree;
        let mut data_textures = Vec::with_capacity(self.data_texture_count as usize);
        for _ in 0..self.data_texture_count {
            data_textures.push(factory.create_texture(
                self.texture_width,
                channel_count,
                TexelType::UnsignedByte,
            )?);
        }
        let look_up_texture = factory.create_texture(
            self.look_up_texture_width,
            CHANNEL_COUNT as u32,
            TexelType::Float,
        )?;

        self.data_textures = data_textures;
        self.look_up_texture = Some(look_up_texture);
        self.is_look_up_upload_pending = true;

        log::info!(
            "[texture_bucket_manager::setup_data_textures] Created {} data textures with {} channels",
            self.data_texture_count,
            channel_count
        );
        Ok(())
    }

    /// Look-up texture first, then the data textures
    pub fn get_textures(&self) -> Vec<&dyn DataTexture> {
        self.look_up_texture
            .iter()
            .chain(self.data_textures.iter())
            .map(|texture| texture.as_ref())
            .collect()
    }

    pub fn get_look_up_buffer(&self) -> &[f32] {
        &self.look_up_buffer
    }

    pub fn stats(&self) -> TextureBucketManagerStats {
        TextureBucketManagerStats {
            capacity: self.capacity,
            active: self.active_bucket_to_index_map.len(),
            committed: self.committed_buckets.len(),
            free: self.free_indices.len(),
            queued: self.writer_queue.len(),
        }
    }

    pub fn clear(&mut self) -> StreamingResult<()> {
        self.set_active_buckets(&[], ZoomedAddress::new(0, 0, 0, 0))
    }

    /// Release the slot of a bucket; no-op if the bucket is not active
    pub fn free_bucket(&mut self, bucket: &DataBucket) {
        self.free_bucket_by_id(bucket.id());
    }

    fn free_bucket_by_id(&mut self, id: BucketId) {
        let Some(active) = self.active_bucket_to_index_map.remove(&id) else {
            return;
        };
        active.bucket.unsubscribe(active.subscription);
        if self.visualize_buckets {
            active.bucket.unvisualize();
        }
        if self.committed_buckets.remove(&id) {
            self.is_look_up_buffer_out_of_date = true;
        }
        self.free_indices.insert(active.slot);
    }

    /// Make `buckets` the active set
    ///
    /// Buckets that are already active keep their slot. Fails without
    /// touching any state if the new buckets do not fit into the free slots.
    pub fn set_active_buckets(
        &mut self,
        buckets: &[Arc<DataBucket>],
        anchor_point: ZoomedAddress,
    ) -> StreamingResult<()> {
        self.process_notifications();

        let mut requested: FxHashSet<BucketId> = FxHashSet::default();
        let mut to_reserve: Vec<&Arc<DataBucket>> = Vec::new();
        for bucket in buckets {
            if !requested.insert(bucket.id()) {
                continue;
            }
            if bucket.is_collected() {
                log::debug!(
                    "[texture_bucket_manager::set_active_buckets] Skipping collected bucket {}",
                    bucket.address()
                );
                continue;
            }
            if !self.active_bucket_to_index_map.contains_key(&bucket.id()) {
                to_reserve.push(bucket);
            }
        }
        let to_free: Vec<BucketId> = self
            .active_bucket_to_index_map
            .keys()
            .filter(|id| !requested.contains(id))
            .copied()
            .collect();

        if to_reserve.len() > self.free_indices.len() + to_free.len() {
            log::error!(
                "[texture_bucket_manager::set_active_buckets] {} buckets requested but only {} slots exist",
                requested.len(),
                self.capacity
            );
            return Err(StreamingError::CapacityExhausted {
                capacity: self.capacity as usize,
                requested: requested.len(),
            });
        }

        self.current_anchor_point = anchor_point;
        for id in to_free {
            self.free_bucket_by_id(id);
        }
        for bucket in to_reserve {
            let Some(slot) = self.free_indices.pop_first() else {
                return Err(StreamingError::CapacityExhausted {
                    capacity: self.capacity as usize,
                    requested: requested.len(),
                });
            };
            self.reserve_index_for_bucket(bucket, slot);
        }

        self.refresh_look_up_buffer()
    }

    fn reserve_index_for_bucket(&mut self, bucket: &Arc<DataBucket>, slot: u32) {
        let interest = BucketInterest {
            loaded: !bucket.has_data(),
            labeled: true,
            collected: true,
        };
        let subscription = bucket.subscribe(interest, self.notification_sender.clone());
        self.active_bucket_to_index_map.insert(
            bucket.id(),
            ActiveBucket {
                bucket: Arc::clone(bucket),
                slot,
                subscription,
            },
        );
        self.enqueue_write(bucket.id());
    }

    fn enqueue_write(&mut self, id: BucketId) {
        let Some(active) = self.active_bucket_to_index_map.get(&id) else {
            return;
        };
        if !active.bucket.has_data() {
            return;
        }
        self.writer_queue.push_front(WriteRequest {
            bucket: id,
            slot: active.slot,
        });
    }

    /// React to loaded, labeled and collected buckets
    pub fn process_notifications(&mut self) {
        while let Ok(notification) = self.notification_receiver.try_recv() {
            match notification.event {
                BucketEvent::Loaded | BucketEvent::Labeled => self.enqueue_write(notification.bucket),
                BucketEvent::Collected => self.free_bucket_by_id(notification.bucket),
            }
        }
    }

    fn are_textures_initialized(&self) -> bool {
        !self.data_textures.is_empty()
            && self.data_textures.iter().all(|texture| texture.is_initialized())
            && self
                .look_up_texture
                .as_ref()
                .is_some_and(|texture| texture.is_initialized())
    }

    /// Commit queued buckets until `budget` is used up; returns the number committed
    pub fn process_write_queue(&mut self, budget: Duration) -> StreamingResult<usize> {
        if !self.are_textures_initialized() {
            log::trace!("[texture_bucket_manager::process_write_queue] Waiting for textures");
            return Ok(0);
        }

        // Keep only the newest request per slot (the one closest to the front)
        let mut seen_slots: FxHashSet<u32> = FxHashSet::default();
        self.writer_queue.retain(|request| seen_slots.insert(request.slot));

        let started = Instant::now();
        let mut committed = 0;
        while started.elapsed() < budget {
            let Some(WriteRequest { bucket: id, slot }) = self.writer_queue.pop_back() else {
                break;
            };
            let bucket = match self.active_bucket_to_index_map.get(&id) {
                Some(active) if active.slot == slot => Arc::clone(&active.bucket),
                _ => {
                    log::debug!(
                        "[texture_bucket_manager::process_write_queue] Dropping write of evicted bucket {:?}",
                        id
                    );
                    continue;
                }
            };

            let texture_index = (slot / self.buckets_per_texture) as usize;
            let index_in_texture = slot % self.buckets_per_texture;
            let texture_width = self.texture_width;
            let bucket_height = self.bucket_height_in_texture;
            let texture = &mut self.data_textures[texture_index];
            let written = bucket.with_data(|data| {
                texture.update(
                    data,
                    0,
                    bucket_height * index_in_texture,
                    texture_width,
                    bucket_height,
                )
            });
            match written {
                Some(result) => result?,
                None => continue,
            }

            if self.visualize_buckets {
                bucket.visualize();
            }
            self.committed_buckets.insert(bucket.id());
            self.is_look_up_buffer_out_of_date = true;
            committed += 1;
        }

        if committed > 0 || !self.writer_queue.is_empty() {
            log::trace!(
                "[texture_bucket_manager::process_write_queue] Committed {} buckets, {} still queued",
                committed,
                self.writer_queue.len()
            );
        }
        Ok(committed)
    }

    /// One frame of work: notifications, commits and the look-up texture
    pub fn tick(&mut self) -> StreamingResult<usize> {
        self.process_notifications();
        let committed = self.process_write_queue(self.max_commit_time)?;
        if self.is_look_up_buffer_out_of_date {
            self.refresh_look_up_buffer()?;
        } else if self.is_look_up_upload_pending {
            self.upload_look_up_buffer()?;
        }
        Ok(committed)
    }

    /// Rewrite the whole look-up buffer and upload it
    pub fn refresh_look_up_buffer(&mut self) -> StreamingResult<()> {
        self.look_up_buffer.fill(OUTSIDE);

        let current_zoom_step = self.current_anchor_point.zoom_step;
        let max_allowed_zoom_step = current_zoom_step + self.max_zoom_step_diff;
        let mut outside_address_space = 0;

        for (id, active) in &self.active_bucket_to_index_map {
            let bucket = &active.bucket;
            // Coarser buckets only show up as fallbacks
            if bucket.zoom_step() > current_zoom_step {
                continue;
            }
            let Some(look_up_index) = self.look_up_index(bucket.address()) else {
                outside_address_space += 1;
                continue;
            };

            let mut slot = UNCOMMITTED;
            let mut zoom_step = bucket.zoom_step();
            if self.enforced_zoom_diff.is_none() && self.committed_buckets.contains(id) {
                slot = active.slot as f32;
            } else {
                let mut fallback = bucket.fallback_bucket();
                while let Some(candidate) = fallback {
                    if candidate.zoom_step() > max_allowed_zoom_step {
                        break;
                    }
                    let committed_slot = self
                        .committed_buckets
                        .contains(&candidate.id())
                        .then(|| self.active_bucket_to_index_map.get(&candidate.id()))
                        .flatten()
                        .map(|active| active.slot);
                    if let Some(committed_slot) = committed_slot {
                        slot = committed_slot as f32;
                        zoom_step = candidate.zoom_step();
                        break;
                    }
                    fallback = candidate.fallback_bucket();
                }
            }

            let position = look_up_index * CHANNEL_COUNT;
            self.look_up_buffer[position] = slot;
            self.look_up_buffer[position + 1] = zoom_step as f32;
        }

        if outside_address_space > 0 {
            log::warn!(
                "[texture_bucket_manager::refresh_look_up_buffer] {} buckets lie outside the address space around {}",
                outside_address_space,
                self.current_anchor_point
            );
        }

        self.is_look_up_buffer_out_of_date = false;
        self.is_look_up_upload_pending = true;
        self.upload_look_up_buffer()
    }

    fn upload_look_up_buffer(&mut self) -> StreamingResult<()> {
        let width = self.look_up_texture_width;
        let Some(texture) = self.look_up_texture.as_mut() else {
            return Ok(());
        };
        if !texture.is_initialized() {
            return Ok(());
        }
        texture.update(bytemuck::cast_slice(&self.look_up_buffer), 0, 0, width, width)?;
        self.is_look_up_upload_pending = false;
        Ok(())
    }

    /// Position of an address in the look-up grid, if it lies inside the address space
    fn look_up_index(&self, address: ZoomedAddress) -> Option<usize> {
        let anchor = self.current_anchor_point;
        let [sx, sy, sz] = self.address_space_dimensions.map(|d| d as i64);
        let x = address.x as i64 - anchor.x as i64;
        let y = address.y as i64 - anchor.y as i64;
        let z = address.z as i64 - anchor.z as i64;
        if x < 0 || y < 0 || z < 0 || x >= sx || y >= sy || z >= sz {
            return None;
        }
        Some((sx * sy * z + sx * y + x) as usize)
    }
}

/// Height of one bucket in texture rows and buckets per texture
fn texture_layout(texture_width: u32, packing_degree: u32) -> StreamingResult<(u32, u32)> {
    if !matches!(packing_degree, 1 | 2 | 4) {
        return Err(StreamingError::InvalidTextureLayout {
            reason: format!("packing degree {} is not 1, 2 or 4", packing_degree),
        });
    }
    let packed_bucket_size = BUCKET_SIZE / packing_degree;
    if texture_width == 0 || packed_bucket_size % texture_width != 0 {
        return Err(StreamingError::InvalidTextureLayout {
            reason: format!(
                "packed bucket size {} is not a multiple of texture width {}",
                packed_bucket_size, texture_width
            ),
        });
    }
    let bucket_height_in_texture = packed_bucket_size / texture_width;
    if bucket_height_in_texture > texture_width {
        return Err(StreamingError::InvalidTextureLayout {
            reason: format!(
                "a bucket needs {} rows but the texture only has {}",
                bucket_height_in_texture, texture_width
            ),
        });
    }
    let buckets_per_texture = texture_width / bucket_height_in_texture;
    Ok((bucket_height_in_texture, buckets_per_texture))
}
