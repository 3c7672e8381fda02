//! Flight camera data - Pure DOP
//!
//! NO METHODS. Just data.
//! All transformations happen in flycam_operations.rs

use glam::{DQuat, DVec3};

/// Free 3D flight camera
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlycamData {
    /// Position in global voxel coordinates
    pub position: DVec3,

    /// Orientation; the camera looks along its local +Z axis
    pub rotation: DQuat,

    /// Continuous zoom factor (1.0 = one voxel per screen unit)
    pub zoom: f64,
}

impl Default for FlycamData {
    fn default() -> Self {
        Self {
            position: DVec3::ZERO,
            rotation: DQuat::IDENTITY,
            zoom: 1.0,
        }
    }
}
