//! Texture Setup Operations - Pure DOP Functions
//!
//! All functions are pure: take data, return results, no side effects.
//! Sizes the data textures of every layer from the GPU's limits.

use super::texture_setup_data::{DataTextureSizeAndCount, DataTexturesSetup, GpuSpecs};
use crate::constants::bucket::BUCKET_SIZE;
use crate::constants::textures::{
    LOOKUP_TEXTURES_PER_LAYER, MAPPING_TEXTURE_COUNT, MIN_TEXTURE_COUNT, MIN_TEXTURE_SIZE,
};
use crate::error::{StreamingError, StreamingResult};

/// Read the texture limits of a wgpu device
pub fn gpu_specs_from_limits(limits: &wgpu::Limits) -> GpuSpecs {
    GpuSpecs {
        supported_texture_size: limits.max_texture_dimension_2d,
        max_texture_count: limits.max_sampled_textures_per_shader_stage,
    }
}

/// Query the texture limits of an adapter
///
/// Without an adapter there is no rendering context at all, which is fatal.
pub fn query_gpu_specs(adapter: Option<&wgpu::Adapter>) -> StreamingResult<GpuSpecs> {
    let adapter = adapter.ok_or_else(|| StreamingError::CapabilityQueryFailed {
        reason: "no GPU adapter available".to_string(),
    })?;
    let specs = gpu_specs_from_limits(&adapter.limits());
    log::info!(
        "[texture_setup::query_gpu_specs] {} supports texture size {} and {} textures",
        adapter.get_info().name,
        specs.supported_texture_size,
        specs.max_texture_count
    );
    Ok(specs)
}

pub fn validate_minimum_requirements(specs: &GpuSpecs) -> StreamingResult<()> {
    if specs.supported_texture_size < MIN_TEXTURE_SIZE || specs.max_texture_count < MIN_TEXTURE_COUNT
    {
        log::error!(
            "[texture_setup::validate_minimum_requirements] GPU below minimum spec: {:?}",
            specs
        );
        return Err(StreamingError::MinimumSpecNotMet {
            texture_size: specs.supported_texture_size,
            texture_count: specs.max_texture_count,
            min_size: MIN_TEXTURE_SIZE,
            min_count: MIN_TEXTURE_COUNT,
        });
    }
    Ok(())
}

/// Voxels packed into one RGBA texel
pub fn packing_degree(byte_count: u32) -> u32 {
    match byte_count {
        1 => 4,
        2 => 2,
        _ => 1,
    }
}

/// Number of buckets the given textures can hold
pub fn bucket_capacity(texture_count: u32, texture_size: u32, packing_degree: u32) -> u32 {
    let voxels = packing_degree as u64 * texture_count as u64 * texture_size as u64 * texture_size as u64;
    (voxels / BUCKET_SIZE as u64) as u32
}

fn necessary_voxel_count(required_bucket_capacity: u32) -> u64 {
    required_bucket_capacity as u64 * BUCKET_SIZE as u64
}

fn available_voxel_count(texture_size: u32, packing_degree: u32) -> u64 {
    packing_degree as u64 * texture_size as u64 * texture_size as u64
}

fn texture_count(texture_size: u32, packing_degree: u32, required_bucket_capacity: u32) -> u32 {
    necessary_voxel_count(required_bucket_capacity)
        .div_ceil(available_voxel_count(texture_size, packing_degree)) as u32
}

/// Smallest texture size that does not need more textures than the largest one
pub fn calculate_texture_size_and_count_for_layer(
    specs: &GpuSpecs,
    byte_count: u32,
    required_bucket_capacity: u32,
) -> DataTextureSizeAndCount {
    let packing_degree = packing_degree(byte_count);
    let mut texture_size = specs.supported_texture_size.max(1);

    // Halve the texture size as long as that does not require more textures
    while texture_size > 1
        && texture_count(texture_size / 2, packing_degree, required_bucket_capacity)
            <= texture_count(texture_size, packing_degree, required_bucket_capacity)
    {
        texture_size /= 2;
    }

    DataTextureSizeAndCount {
        texture_size,
        texture_count: texture_count(texture_size, packing_degree, required_bucket_capacity),
        packing_degree,
    }
}

fn calculate_necessary_texture_count(plans: &[DataTextureSizeAndCount]) -> u32 {
    let data_texture_count: u32 = plans.iter().map(|plan| plan.texture_count).sum();
    plans.len() as u32 * LOOKUP_TEXTURES_PER_LAYER + data_texture_count
}

/// (is_basic_rendering_supported, is_mapping_supported)
fn derive_supported_features(
    specs: &GpuSpecs,
    plans: &[DataTextureSizeAndCount],
    has_segmentation: bool,
) -> (bool, bool) {
    let necessary_texture_count = calculate_necessary_texture_count(plans);
    let is_basic_rendering_supported = necessary_texture_count <= specs.max_texture_count;

    // Mappings are optional, so they are only counted on top
    let not_enough_textures_for_mapping =
        necessary_texture_count + MAPPING_TEXTURE_COUNT > specs.max_texture_count;
    let is_mapping_supported = !(has_segmentation && not_enough_textures_for_mapping);

    (is_basic_rendering_supported, is_mapping_supported)
}

/// Plan the data textures of all layers
pub fn compute_data_textures_setup<L, F>(
    specs: &GpuSpecs,
    layers: &[L],
    byte_count_for_layer: F,
    has_segmentation: bool,
    required_bucket_capacity: u32,
) -> DataTexturesSetup<L>
where
    L: Clone,
    F: Fn(&L) -> u32,
{
    let texture_information_per_layer: Vec<(L, DataTextureSizeAndCount)> = layers
        .iter()
        .map(|layer| {
            let plan = calculate_texture_size_and_count_for_layer(
                specs,
                byte_count_for_layer(layer),
                required_bucket_capacity,
            );
            (layer.clone(), plan)
        })
        .collect();
    let plans: Vec<DataTextureSizeAndCount> = texture_information_per_layer
        .iter()
        .map(|(_, plan)| *plan)
        .collect();

    let smallest_common_bucket_capacity = plans
        .iter()
        .map(|plan| bucket_capacity(plan.texture_count, plan.texture_size, plan.packing_degree))
        .min();

    let (is_basic_rendering_supported, is_mapping_supported) =
        derive_supported_features(specs, &plans, has_segmentation);

    if !is_basic_rendering_supported {
        log::warn!(
            "[texture_setup::compute] {} textures needed but GPU offers {}; basic rendering unsupported",
            calculate_necessary_texture_count(&plans),
            specs.max_texture_count
        );
    } else if !is_mapping_supported {
        log::warn!("[texture_setup::compute] Not enough textures left for mappings; disabling them");
    }
    log::info!(
        "[texture_setup::compute] Planned {} layers, smallest common bucket capacity {:?}",
        plans.len(),
        smallest_common_bucket_capacity
    );

    DataTexturesSetup {
        is_basic_rendering_supported,
        is_mapping_supported,
        texture_information_per_layer,
        smallest_common_bucket_capacity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPECS: GpuSpecs = GpuSpecs {
        supported_texture_size: 4096,
        max_texture_count: 8,
    };

    #[test]
    fn test_packing_degree() {
        assert_eq!(packing_degree(1), 4);
        assert_eq!(packing_degree(2), 2);
        assert_eq!(packing_degree(3), 1);
        assert_eq!(packing_degree(4), 1);
        assert_eq!(packing_degree(8), 1);
    }

    #[test]
    fn test_scenario_uint8_layer_with_512_buckets() {
        let plan = calculate_texture_size_and_count_for_layer(&SPECS, 1, 512);
        assert_eq!(plan.packing_degree, 4);
        assert_eq!(plan.texture_size, 2048);
        assert_eq!(plan.texture_count, 1);

        // Enumerate every power of two and check the chosen size is minimal
        // among sizes that don't need more textures
        let mut candidate = SPECS.supported_texture_size;
        let mut smallest = candidate;
        while candidate >= 1 {
            if texture_count(candidate, 4, 512) <= plan.texture_count {
                smallest = candidate;
            } else {
                break;
            }
            candidate /= 2;
        }
        assert_eq!(plan.texture_size, smallest);
        assert!(bucket_capacity(plan.texture_count, plan.texture_size, plan.packing_degree) >= 512);
    }

    #[test]
    fn test_wide_voxels_keep_max_size() {
        let plan = calculate_texture_size_and_count_for_layer(&SPECS, 4, 1024);
        assert_eq!(plan.packing_degree, 1);
        assert_eq!(plan.texture_size, 4096);
        assert_eq!(plan.texture_count, 2);
    }

    #[test]
    fn test_capacity_monotonicity() {
        for byte_count in [1, 2, 4] {
            let mut previous = 0u64;
            for capacity in (0..6000).step_by(7) {
                let plan = calculate_texture_size_and_count_for_layer(&SPECS, byte_count, capacity);
                let texels = plan.texture_count as u64 * plan.texture_size as u64 * plan.texture_size as u64;
                assert!(texels >= previous, "capacity {} shrank the pool", capacity);
                assert!(
                    bucket_capacity(plan.texture_count, plan.texture_size, plan.packing_degree)
                        >= capacity
                );
                previous = texels;
            }
        }
    }

    #[test]
    fn test_zero_capacity_terminates() {
        let plan = calculate_texture_size_and_count_for_layer(&SPECS, 1, 0);
        assert_eq!(plan.texture_count, 0);
        assert_eq!(plan.texture_size, 1);
    }

    #[test]
    fn test_setup_reports_capabilities() {
        let layers = vec!["color", "segmentation"];
        let bytes = |layer: &&str| if *layer == "color" { 1 } else { 4 };

        // 2 look-up textures plus 1 + 2 data textures, 3 more for mappings
        let setup = compute_data_textures_setup(&SPECS, &layers, bytes, true, 1024);
        assert!(setup.is_basic_rendering_supported);
        assert!(setup.is_mapping_supported);
        assert_eq!(setup.texture_information_per_layer.len(), 2);
        assert_eq!(setup.texture_information_per_layer[0].0, "color");
        assert_eq!(setup.texture_information_per_layer[1].1.texture_count, 2);
        assert_eq!(setup.smallest_common_bucket_capacity, Some(1024));

        let seven_units = GpuSpecs {
            supported_texture_size: 4096,
            max_texture_count: 7,
        };
        let setup = compute_data_textures_setup(&seven_units, &layers, bytes, true, 1024);
        assert!(setup.is_basic_rendering_supported);
        assert!(!setup.is_mapping_supported);

        // Mappings only matter with a segmentation layer
        let setup = compute_data_textures_setup(&seven_units, &layers, bytes, false, 1024);
        assert!(setup.is_mapping_supported);

        let four_units = GpuSpecs {
            supported_texture_size: 4096,
            max_texture_count: 4,
        };
        let setup = compute_data_textures_setup(&four_units, &layers, bytes, false, 1024);
        assert!(!setup.is_basic_rendering_supported);
    }

    #[test]
    fn test_setup_without_layers() {
        let setup = compute_data_textures_setup::<&str, _>(&SPECS, &[], |_| 1, false, 512);
        assert_eq!(setup.smallest_common_bucket_capacity, None);
        assert!(setup.is_basic_rendering_supported);
    }

    #[test]
    fn test_minimum_requirements() {
        assert!(validate_minimum_requirements(&SPECS).is_ok());
        let weak = GpuSpecs {
            supported_texture_size: 2048,
            max_texture_count: 16,
        };
        assert!(matches!(
            validate_minimum_requirements(&weak),
            Err(StreamingError::MinimumSpecNotMet { .. })
        ));
    }

    #[test]
    fn test_specs_from_limits() {
        let specs = gpu_specs_from_limits(&wgpu::Limits::downlevel_webgl2_defaults());
        assert_eq!(specs.supported_texture_size, 2048);
        assert_eq!(specs.max_texture_count, 16);
        assert!(matches!(
            query_gpu_specs(None),
            Err(StreamingError::CapabilityQueryFailed { .. })
        ));
    }
}
