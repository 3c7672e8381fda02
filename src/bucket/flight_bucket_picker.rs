//! Bucket picking for the free 3D flight camera
//!
//! The viewport is approximated by a spherical cap in front of the camera.
//! A regular grid of screen samples is projected onto that cap, moved into
//! world space with the camera matrix and converted into bucket addresses.
//! A box of buckets one zoom step coarser is added as a safety net, so
//! there is always something to fall back to where the fine scan was sparse.

use super::address::{
    global_position_to_bucket_position, global_position_to_bucket_position_float,
    resolution_at, zoomed_address_to_another_zoom_step, ZoomedAddress,
};
use crate::constants::bucket::BUCKET_WIDTH;
use crate::constants::view::{
    FALLBACK_TOLERANCE, FLIGHT_SAMPLE_STRIDE, NEIGHBOUR_THRESHOLD, VIEWPORT_WIDTH,
};
use crate::error::StreamingResult;
use glam::{DMat4, DVec3, IVec3};
use rustc_hash::FxHashSet;

/// Every flight bucket is requested with the same priority for now
pub const FLIGHT_BUCKET_PRIORITY: i32 = 0;

/// Collects addresses of one zoom step, each at most once
struct DistinctBucketAdder {
    seen: FxHashSet<(i32, i32, i32)>,
    buckets: Vec<ZoomedAddress>,
}

impl DistinctBucketAdder {
    fn new() -> Self {
        Self {
            seen: FxHashSet::default(),
            buckets: Vec::new(),
        }
    }

    fn maybe_add(&mut self, address: ZoomedAddress) {
        if self.seen.insert((address.x, address.y, address.z)) {
            self.buckets.push(address);
        }
    }
}

/// Determine the buckets needed to render the flight view
///
/// Every address is passed to `enqueue` together with its priority. At most
/// `abort_limit` addresses are emitted when a limit is given.
pub fn determine_buckets_for_flight<F>(
    resolutions: &[DVec3],
    center_position: DVec3,
    sphere_cap_radius: f64,
    mut enqueue: F,
    matrix: &DMat4,
    log_zoom_step: u32,
    abort_limit: Option<usize>,
) -> StreamingResult<()>
where
    F: FnMut(ZoomedAddress, i32),
{
    resolution_at(resolutions, log_zoom_step)?;

    let half_width = VIEWPORT_WIDTH / 2.0;
    let camera_vertex = DVec3::new(0.0, 0.0, -sphere_cap_radius);
    let fallback_zoom_step = log_zoom_step + 1;
    let is_fallback_available = (fallback_zoom_step as usize) < resolutions.len();

    let transform_to_sphere_cap = |point: DVec3| {
        let offset = point - camera_vertex;
        offset * (sphere_cap_radius / offset.length()) + camera_vertex
    };
    let transform_and_apply_matrix =
        |point: DVec3| matrix.transform_point3(transform_to_sphere_cap(point));

    if log::log_enabled!(log::Level::Trace) {
        let camera_position = matrix.transform_point3(camera_vertex);
        log::trace!(
            "[flight_bucket_picker::determine] Camera at {:?} looking towards {:?}",
            camera_position,
            (center_position - camera_position).normalize_or_zero()
        );
    }

    let mut traversed = DistinctBucketAdder::new();
    let bucket_width = BUCKET_WIDTH as f64;

    let mut y = -half_width;
    while y <= half_width {
        let x_offset = y % FLIGHT_SAMPLE_STRIDE;
        let mut x = -half_width - x_offset;
        while x <= half_width + x_offset {
            let transformed = transform_and_apply_matrix(DVec3::new(x, y, 0.0));
            let bucket_position =
                global_position_to_bucket_position_float(transformed, resolutions, log_zoom_step)?;
            let floored = bucket_position.floor().as_ivec3();
            traversed.maybe_add(to_address(floored, log_zoom_step));

            // Also pick neighbours the sample almost touches, otherwise seams show up
            for axis in 0..3 {
                let rest = (bucket_position[axis] % 1.0) * bucket_width;
                let mut neighbour = floored;
                if rest < NEIGHBOUR_THRESHOLD {
                    neighbour[axis] -= 1;
                } else if rest > bucket_width - NEIGHBOUR_THRESHOLD {
                    neighbour[axis] += 1;
                } else {
                    continue;
                }
                traversed.maybe_add(to_address(neighbour, log_zoom_step));
            }

            x += FLIGHT_SAMPLE_STRIDE;
        }
        y += FLIGHT_SAMPLE_STRIDE;
    }

    let mut buckets = traversed.buckets;

    if is_fallback_available {
        // Four corners and the center of the rendered plane
        let plane_points = [
            DVec3::new(-half_width, -half_width, 0.0),
            DVec3::new(half_width, -half_width, 0.0),
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(-half_width, half_width, 0.0),
            DVec3::new(half_width, half_width, 0.0),
        ];
        let mut corner_min = IVec3::MAX;
        let mut corner_max = IVec3::MIN;
        for point in plane_points {
            let address = global_position_to_bucket_position(
                transform_and_apply_matrix(point),
                resolutions,
                log_zoom_step,
            )?;
            let position = IVec3::new(address.x, address.y, address.z);
            corner_min = corner_min.min(position);
            corner_max = corner_max.max(position);
        }

        let min = zoomed_address_to_another_zoom_step(
            to_address(corner_min, log_zoom_step),
            resolutions,
            fallback_zoom_step,
        )?;
        let max = zoomed_address_to_another_zoom_step(
            to_address(corner_max, log_zoom_step),
            resolutions,
            fallback_zoom_step,
        )?;
        for x in (min.x - FALLBACK_TOLERANCE)..=(max.x + FALLBACK_TOLERANCE) {
            for y in (min.y - FALLBACK_TOLERANCE)..=(max.y + FALLBACK_TOLERANCE) {
                for z in (min.z - FALLBACK_TOLERANCE)..=(max.z + FALLBACK_TOLERANCE) {
                    buckets.push(ZoomedAddress::new(x, y, z, fallback_zoom_step));
                }
            }
        }
    }

    let limit = abort_limit.unwrap_or(usize::MAX);
    let emitted = buckets.len().min(limit);
    for address in buckets.into_iter().take(limit) {
        enqueue(address, FLIGHT_BUCKET_PRIORITY);
    }
    log::trace!(
        "[flight_bucket_picker::determine] Enqueued {} buckets at zoom step {}",
        emitted,
        log_zoom_step
    );

    Ok(())
}

fn to_address(position: IVec3, zoom_step: u32) -> ZoomedAddress {
    ZoomedAddress::new(position.x, position.y, position.z, zoom_step)
}
