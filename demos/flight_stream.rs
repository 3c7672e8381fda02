//! Fly through a synthetic volume
//!
//! Plans the texture pool from the adapter's limits, then runs a short
//! scripted flight. Payloads are generated on the fly instead of loaded.
//!
//! Usage: cargo run --example flight_stream [streaming.toml]

use anyhow::{bail, Context, Result};
use glam::DVec3;
use std::sync::Arc;
use volume_streaming::{
    bucket::ZoomedAddress,
    camera::{create_flycam, move_forward, pitch, yaw},
    constants::bucket::BUCKET_SIZE,
    rendering::{
        compute_data_textures_setup, query_gpu_specs, validate_minimum_requirements,
        WgpuDataTexture, WgpuTextureFactory,
    },
    StreamingConfig, StreamingSession,
};

const FRAME_COUNT: usize = 60;
const PULLS_PER_FRAME: usize = 64;
const BYTES_PER_VOXEL: u32 = 1;

fn main() -> Result<()> {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => StreamingConfig::load(&path).with_context(|| format!("loading {}", path))?,
        None => StreamingConfig::default(),
    };

    pollster::block_on(run(config))
}

async fn run(config: StreamingConfig) -> Result<()> {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });

    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        })
        .await;
    let specs = query_gpu_specs(adapter.as_ref())?;
    if let Err(error) = validate_minimum_requirements(&specs) {
        log::warn!("[flight_stream] {}; continuing anyway", error);
    }
    let adapter = adapter.context("adapter disappeared after querying it")?;

    let (device, queue) = adapter
        .request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Flight Stream Device"),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
            },
            None,
        )
        .await
        .context("Failed to create device")?;
    let device = Arc::new(device);
    let queue = Arc::new(queue);

    let setup = compute_data_textures_setup(
        &specs,
        &["color"],
        |_| BYTES_PER_VOXEL,
        false,
        config.required_bucket_capacity,
    );
    if !setup.is_basic_rendering_supported {
        bail!("GPU offers too few textures for even one layer");
    }
    let (_, plan) = setup.texture_information_per_layer[0];
    println!(
        "[OK] {} textures of {}² texels, packing degree {}",
        plan.texture_count, plan.texture_size, plan.packing_degree
    );

    let resolutions = vec![
        DVec3::ONE,
        DVec3::splat(2.0),
        DVec3::splat(4.0),
        DVec3::splat(8.0),
    ];
    let mut session = StreamingSession::new(config, resolutions, &plan)?;
    let factory = WgpuTextureFactory::new(Arc::clone(&device), Arc::clone(&queue));
    session.setup_textures(&factory, BYTES_PER_VOXEL)?;

    let has_look_up_view = session.manager().get_textures()[0]
        .as_any()
        .downcast_ref::<WgpuDataTexture>()
        .is_some();
    println!("[OK] Textures created (look-up view available: {})", has_look_up_view);

    let mut flycam = create_flycam(DVec3::new(1000.0, 1000.0, 1000.0), 1.0);
    for frame in 0..FRAME_COUNT {
        flycam = move_forward(&flycam, 24.0);
        flycam = yaw(&flycam, 0.02);
        flycam = pitch(&flycam, 0.005);

        session.update(&flycam)?;
        for address in session.take_pull_requests(PULLS_PER_FRAME) {
            session.receive_data(&address, synthetic_payload(&address));
        }
        let committed = session.tick()?;
        queue.submit(std::iter::empty());
        let _ = device.poll(wgpu::Maintain::Poll);

        if frame % 10 == 9 {
            let collected = session.collect_garbage();
            let stats = session.stats();
            println!(
                "frame {:>3}: committed {:>3}, active {}/{}, {} committed total, {} queued, {} pulls pending, {} collected",
                frame + 1,
                committed,
                stats.active,
                stats.capacity,
                stats.committed,
                stats.queued,
                session.pending_pull_count(),
                collected
            );
        }
    }

    println!("[OK] Flight finished");
    Ok(())
}

/// Stripes that change with the bucket position
fn synthetic_payload(address: &ZoomedAddress) -> Vec<u8> {
    let seed = (address.x ^ address.y ^ address.z) as u8;
    (0..BUCKET_SIZE * BYTES_PER_VOXEL)
        .map(|i| seed.wrapping_add((i / 32) as u8))
        .collect()
}
