//! Flight camera operations - Pure DOP functions
//!
//! All functions are pure: they take data, return new data, no side effects.

use super::flycam_data::FlycamData;
use glam::{DMat4, DQuat, DVec3};

// ============================================================================
// INITIALIZATION
// ============================================================================

pub fn create_flycam(position: DVec3, zoom: f64) -> FlycamData {
    FlycamData {
        position,
        zoom: zoom.max(f64::MIN_POSITIVE),
        ..Default::default()
    }
}

// ============================================================================
// MOVEMENT
// ============================================================================

/// Move along the viewing direction
pub fn move_forward(flycam: &FlycamData, distance: f64) -> FlycamData {
    let mut new_flycam = *flycam;
    new_flycam.position += forward_vector(flycam) * distance;
    new_flycam
}

/// Move along the camera's local axes
pub fn move_local(flycam: &FlycamData, offset: DVec3) -> FlycamData {
    let mut new_flycam = *flycam;
    new_flycam.position += flycam.rotation * offset;
    new_flycam
}

/// Rotate around the local up axis (radians)
pub fn yaw(flycam: &FlycamData, angle: f64) -> FlycamData {
    rotate_local(flycam, DQuat::from_rotation_y(angle))
}

/// Rotate around the local right axis (radians)
pub fn pitch(flycam: &FlycamData, angle: f64) -> FlycamData {
    rotate_local(flycam, DQuat::from_rotation_x(angle))
}

/// Rotate around the viewing direction (radians)
pub fn roll(flycam: &FlycamData, angle: f64) -> FlycamData {
    rotate_local(flycam, DQuat::from_rotation_z(angle))
}

fn rotate_local(flycam: &FlycamData, rotation: DQuat) -> FlycamData {
    let mut new_flycam = *flycam;
    new_flycam.rotation = (flycam.rotation * rotation).normalize();
    new_flycam
}

pub fn set_zoom(flycam: &FlycamData, zoom: f64) -> FlycamData {
    let mut new_flycam = *flycam;
    new_flycam.zoom = zoom.max(f64::MIN_POSITIVE);
    new_flycam
}

// ============================================================================
// QUERIES
// ============================================================================

pub fn forward_vector(flycam: &FlycamData) -> DVec3 {
    flycam.rotation * DVec3::Z
}

/// Camera space to global voxel space, scaled by the zoom factor
///
/// This is the matrix the flight bucket picker projects its samples with.
pub fn build_query_matrix(flycam: &FlycamData) -> DMat4 {
    DMat4::from_scale_rotation_translation(DVec3::splat(flycam.zoom), flycam.rotation, flycam.position)
}

/// Zoom step data should be requested at, clamped to the available resolutions
pub fn request_log_zoom_step(flycam: &FlycamData, resolution_count: usize) -> u32 {
    let max_zoom_step = resolution_count.saturating_sub(1) as f64;
    flycam.zoom.log2().ceil().clamp(0.0, max_zoom_step) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    fn assert_close(a: DVec3, b: DVec3) {
        assert!(a.abs_diff_eq(b, 1e-9), "{:?} != {:?}", a, b);
    }

    #[test]
    fn test_move_forward_follows_rotation() {
        let flycam = create_flycam(DVec3::new(10.0, 0.0, 0.0), 1.0);
        assert_close(move_forward(&flycam, 5.0).position, DVec3::new(10.0, 0.0, 5.0));

        // A quarter yaw turns +Z into +X
        let turned = yaw(&flycam, FRAC_PI_2);
        assert_close(forward_vector(&turned), DVec3::X);
        assert_close(move_forward(&turned, 5.0).position, DVec3::new(15.0, 0.0, 0.0));
    }

    #[test]
    fn test_pitch_and_roll() {
        let flycam = FlycamData::default();
        assert_close(forward_vector(&pitch(&flycam, FRAC_PI_2)), DVec3::NEG_Y);
        // Rolling keeps the viewing direction
        assert_close(forward_vector(&roll(&flycam, 1.0)), DVec3::Z);
    }

    #[test]
    fn test_query_matrix_scales_by_zoom() {
        let flycam = create_flycam(DVec3::new(1.0, 2.0, 3.0), 2.0);
        let matrix = build_query_matrix(&flycam);
        assert_close(matrix.transform_point3(DVec3::ZERO), DVec3::new(1.0, 2.0, 3.0));
        assert_close(matrix.transform_point3(DVec3::X), DVec3::new(3.0, 2.0, 3.0));
    }

    #[test]
    fn test_request_log_zoom_step() {
        let at = |zoom| request_log_zoom_step(&create_flycam(DVec3::ZERO, zoom), 4);
        assert_eq!(at(0.5), 0);
        assert_eq!(at(1.0), 0);
        assert_eq!(at(1.5), 1);
        assert_eq!(at(4.0), 2);
        assert_eq!(at(100.0), 3);
        assert_eq!(request_log_zoom_step(&FlycamData::default(), 0), 0);
    }
}
