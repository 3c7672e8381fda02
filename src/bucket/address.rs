//! Bucket addressing
//!
//! Conversions between global voxel positions and bucket-grid addresses at
//! a given resolution. Resolutions are per-axis downsampling factors, one
//! entry per zoom step (index 0 is the finest).

use crate::constants::bucket::BUCKET_WIDTH;
use crate::error::{OptionExt, StreamingError, StreamingResult};
use glam::DVec3;
use std::fmt;

/// Address of a bucket in bucket-grid coordinates at one zoom step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ZoomedAddress {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub zoom_step: u32,
}

impl ZoomedAddress {
    pub const fn new(x: i32, y: i32, z: i32, zoom_step: u32) -> Self {
        Self { x, y, z, zoom_step }
    }

    /// Address of the bucket covering the same region one zoom step coarser
    pub fn fallback_address(&self, resolutions: &[DVec3]) -> Option<ZoomedAddress> {
        let fallback_zoom_step = self.zoom_step + 1;
        if fallback_zoom_step as usize >= resolutions.len() {
            return None;
        }
        zoomed_address_to_another_zoom_step(*self, resolutions, fallback_zoom_step).ok()
    }
}

impl fmt::Display for ZoomedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}; {}]", self.x, self.y, self.z, self.zoom_step)
    }
}

pub(crate) fn resolution_at(resolutions: &[DVec3], zoom_step: u32) -> StreamingResult<DVec3> {
    resolutions
        .get(zoom_step as usize)
        .copied()
        .ok_or_streaming(|| StreamingError::InvalidZoomStep {
            zoom_step,
            available: resolutions.len(),
        })
}

/// Fractional bucket position of a global position
pub fn global_position_to_bucket_position_float(
    position: DVec3,
    resolutions: &[DVec3],
    zoom_step: u32,
) -> StreamingResult<DVec3> {
    let resolution = resolution_at(resolutions, zoom_step)?;
    Ok(position / (resolution * BUCKET_WIDTH as f64))
}

/// Address of the bucket containing a global position
pub fn global_position_to_bucket_position(
    position: DVec3,
    resolutions: &[DVec3],
    zoom_step: u32,
) -> StreamingResult<ZoomedAddress> {
    let bucket_position =
        global_position_to_bucket_position_float(position, resolutions, zoom_step)?.floor();
    Ok(ZoomedAddress::new(
        bucket_position.x as i32,
        bucket_position.y as i32,
        bucket_position.z as i32,
        zoom_step,
    ))
}

/// Address of the bucket containing `address` at another zoom step
pub fn zoomed_address_to_another_zoom_step(
    address: ZoomedAddress,
    resolutions: &[DVec3],
    target_zoom_step: u32,
) -> StreamingResult<ZoomedAddress> {
    let current = resolution_at(resolutions, address.zoom_step)?;
    let target = resolution_at(resolutions, target_zoom_step)?;
    let factors = target / current;

    Ok(ZoomedAddress::new(
        (address.x as f64 / factors.x).floor() as i32,
        (address.y as f64 / factors.y).floor() as i32,
        (address.z as f64 / factors.z).floor() as i32,
        target_zoom_step,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolutions() -> Vec<DVec3> {
        vec![
            DVec3::new(1.0, 1.0, 1.0),
            DVec3::new(2.0, 2.0, 1.0),
            DVec3::new(4.0, 4.0, 2.0),
        ]
    }

    #[test]
    fn test_global_position_to_bucket_position() {
        let res = resolutions();
        let address =
            global_position_to_bucket_position(DVec3::new(65.0, 31.9, -1.0), &res, 0).unwrap();
        assert_eq!(address, ZoomedAddress::new(2, 0, -1, 0));

        let address =
            global_position_to_bucket_position(DVec3::new(65.0, 130.0, 40.0), &res, 1).unwrap();
        assert_eq!(address, ZoomedAddress::new(1, 2, 1, 1));
    }

    #[test]
    fn test_anisotropic_fallback_address() {
        let res = resolutions();
        let address = ZoomedAddress::new(5, -3, 7, 1);
        assert_eq!(
            address.fallback_address(&res),
            Some(ZoomedAddress::new(2, -2, 3, 2))
        );
        assert_eq!(ZoomedAddress::new(0, 0, 0, 2).fallback_address(&res), None);
    }

    #[test]
    fn test_convert_to_finer_zoom_step() {
        let res = resolutions();
        let address =
            zoomed_address_to_another_zoom_step(ZoomedAddress::new(1, 1, 1, 2), &res, 0).unwrap();
        assert_eq!(address, ZoomedAddress::new(4, 4, 2, 0));
    }

    #[test]
    fn test_invalid_zoom_step() {
        let res = resolutions();
        let result = global_position_to_bucket_position(DVec3::ZERO, &res, 3);
        assert!(matches!(
            result,
            Err(StreamingError::InvalidZoomStep {
                zoom_step: 3,
                available: 3
            })
        ));
    }
}
