//! Headless shadow capture walkthrough
//!
//! Captures two shadow slots against the software context, writing a
//! normalized depth TIFF per slot. Run with `RUST_LOG=info` to see the paths.
//!
//! ```text
//! UMBRA_DUMP_DIR=/tmp/shadows cargo run --bin shadow_dump
//! ```

use anyhow::{ensure, Context, Result};
use cgmath::{Matrix4, Point3, Vector2, Vector3};
use umbra::gfx::HeadlessContext;
use umbra::{DebugFlags, ShadowArrayConfig, ShadowMapArray};

/// Fake caster: depth increases left to right and bottom to top
fn gradient(size: Vector2<u32>) -> Vec<f32> {
    let (w, h) = (size.x as usize, size.y as usize);
    (0..w * h)
        .map(|i| {
            let (x, y) = (i % w, i / w);
            0.25 + 0.5 * (x + y) as f32 / (w + h).max(2) as f32
        })
        .collect()
}

fn main() -> Result<()> {
    env_logger::init();

    let config = ShadowArrayConfig::from_env().with_debug(DebugFlags::all());
    std::fs::create_dir_all(&config.dump_dir)
        .with_context(|| format!("creating {}", config.dump_dir.display()))?;
    let dump_dir = config.dump_dir.clone();

    let mut shadows = ShadowMapArray::with_config(HeadlessContext::new(), config);
    shadows.set_shadow_map_resolutions(&[Vector2::new(256, 256), Vector2::new(128, 64)]);

    let light_view = Matrix4::look_at_rh(
        Point3::new(10.0, 20.0, 10.0),
        Point3::new(0.0, 0.0, 0.0),
        Vector3::unit_y(),
    );
    let light_proj = cgmath::ortho(-25.0, 25.0, -25.0, 25.0, 5.0, 50.0);

    for slot in 0..shadows.num_shadow_map_passes() {
        shadows.set_view_matrix(slot, light_view);
        shadows.set_projection_matrix(slot, light_proj);

        let size = shadows.shadow_map_size(slot);
        shadows.begin_capture(slot, true);
        shadows.context_mut().draw_depth(&gradient(size));
        shadows.end_capture(slot);
    }

    for slot in 0..shadows.num_shadow_map_passes() {
        let path = umbra::gfx::rendering::depth_dump::dump_path(&dump_dir, slot);
        ensure!(path.exists(), "expected dump at {}", path.display());
        println!("slot {}: {}", slot, path.display());
        println!("  world_to_shadow = {:?}", shadows.world_to_shadow_matrix(slot));
    }

    let stats = shadows.context().stats();
    println!(
        "{} textures, {} samplers, {} framebuffer allocated",
        stats.texture_allocations, stats.sampler_allocations, stats.framebuffer_allocations
    );

    Ok(())
}
