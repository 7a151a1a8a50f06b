// tests/shadow_capture.rs
// End-to-end capture brackets against the headless context: teardown
// ownership rules, shared-context discipline and on-disk debug dumps.

use cgmath::{Matrix4, Vector2, Vector3, Vector4};
use umbra::gfx::context::{DepthRange, FramebufferTarget, RenderContext, Viewport};
use umbra::gfx::rendering::depth_dump::dump_path;
use umbra::gfx::{HeadlessContext, ShadowMapArray};
use umbra::{DebugFlags, ShadowArrayConfig};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn teardown_frees_self_managed_resources() {
    init_logger();
    let mut ctx = HeadlessContext::new();
    {
        let mut shadows = ShadowMapArray::new(&mut ctx);
        shadows.set_shadow_map_resolutions(&[Vector2::new(64, 64), Vector2::new(32, 32)]);
        for slot in 0..shadows.num_shadow_map_passes() {
            shadows.begin_capture(slot, true);
            shadows.end_capture(slot);
        }
    }

    let stats = ctx.stats();
    assert_eq!(stats.texture_allocations, 2);
    assert_eq!(stats.texture_deletions, 2);
    assert_eq!(stats.sampler_allocations, 2);
    assert_eq!(stats.sampler_deletions, 2);
    assert_eq!(stats.framebuffer_allocations, 1);
    assert_eq!(stats.framebuffer_deletions, 1);
    assert_eq!(stats.unshared_operations, 0);
    assert_eq!(ctx.live_textures(), 0);
    assert_eq!(ctx.live_samplers(), 0);
    assert_eq!(ctx.live_framebuffers(), 0);
    assert!(!ctx.is_shared_current());
    assert!(ctx.take_errors().is_empty());
}

#[test]
fn teardown_keeps_external_textures() {
    init_logger();
    let mut ctx = HeadlessContext::new();
    let external = vec![
        ctx.import_texture(Vector2::new(128, 128)),
        ctx.import_texture(Vector2::new(128, 128)),
    ];
    {
        let mut shadows = ShadowMapArray::new(&mut ctx);
        shadows.set_shadow_map_resolutions(&[Vector2::new(128, 128), Vector2::new(128, 128)]);
        shadows.set_textures(external.clone());
        shadows.begin_capture(0, true);
        shadows.end_capture(0);
        shadows.set_shadow_map_resolutions(&[Vector2::new(256, 256), Vector2::new(256, 256)]);
    }

    for id in &external {
        assert!(ctx.texture_exists(*id));
    }
    let stats = ctx.stats();
    assert_eq!(stats.texture_allocations, 0);
    assert_eq!(stats.texture_deletions, 0);
    assert_eq!(stats.sampler_deletions, 2);
    assert_eq!(stats.framebuffer_deletions, 1);
}

#[test]
fn shadow_frame_restores_state_for_each_light() {
    init_logger();
    let mut ctx = HeadlessContext::new();
    let main_fb = {
        let fb = ctx.create_framebuffer();
        ctx.bind_framebuffer(FramebufferTarget::Both, Some(fb));
        ctx.set_viewport(Viewport::new(0, 0, 1920, 1080));
        fb
    };

    let mut shadows = ShadowMapArray::new(&mut ctx);
    shadows.set_shadow_map_resolutions(&[
        Vector2::new(1024, 1024),
        Vector2::new(512, 512),
        Vector2::new(256, 128),
    ]);

    for slot in 0..shadows.num_shadow_map_passes() {
        shadows.begin_capture(slot, true);
        let size = shadows.shadow_map_size(slot);
        assert_eq!(shadows.context().viewport(), Viewport::from_size(size));
        assert_eq!(shadows.context().depth_range(), DepthRange::new(0.0, 0.99999));
        shadows.end_capture(slot);

        let bindings = shadows.context().framebuffer_bindings();
        assert_eq!(bindings.draw, Some(main_fb));
        assert_eq!(bindings.read, Some(main_fb));
        assert_eq!(shadows.context().viewport(), Viewport::new(0, 0, 1920, 1080));
        assert_eq!(shadows.context().depth_range(), DepthRange::DEFAULT);
        assert!(!shadows.context().depth_clamp());
    }

    assert_eq!(shadows.context().stats().texture_allocations, 3);
}

#[test]
fn world_to_shadow_maps_light_clip_space_into_texture_space() {
    let mut shadows = ShadowMapArray::new(HeadlessContext::new());
    shadows.set_shadow_map_resolutions(&[Vector2::new(512, 512)]);

    // Orthographic light looking down -Z from z = 10 over a 20x20 area
    let view = Matrix4::from_translation(Vector3::new(0.0, 0.0, -10.0));
    let proj = cgmath::ortho(-10.0, 10.0, -10.0, 10.0, 0.0, 20.0);
    shadows.set_view_matrix(0, view);
    shadows.set_projection_matrix(0, proj);

    let m = shadows.world_to_shadow_matrix(0);
    let corner = m * Vector4::new(-10.0, -10.0, 10.0, 1.0);
    assert!((corner.x - 0.0).abs() < 1e-6);
    assert!((corner.y - 0.0).abs() < 1e-6);
    assert!((corner.z - 0.0).abs() < 1e-6);

    let far_corner = m * Vector4::new(10.0, 10.0, -10.0, 1.0);
    assert!((far_corner.x - 1.0).abs() < 1e-6);
    assert!((far_corner.y - 1.0).abs() < 1e-6);
    assert!((far_corner.z - 1.0).abs() < 1e-6);
}

#[test]
fn debug_dump_writes_tiff_per_slot() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let config = ShadowArrayConfig::default()
        .with_debug(DebugFlags::DUMP_TEXTURES)
        .with_dump_dir(dir.path());

    let mut shadows = ShadowMapArray::with_config(HeadlessContext::new(), config);
    shadows.set_shadow_map_resolutions(&[Vector2::new(4, 4), Vector2::new(8, 2)]);

    for slot in 0..shadows.num_shadow_map_passes() {
        let size = shadows.shadow_map_size(slot);
        let pixels: Vec<f32> = (0..size.x * size.y).map(|i| 0.2 + i as f32 * 0.01).collect();
        shadows.begin_capture(slot, true);
        shadows.context_mut().draw_depth(&pixels);
        shadows.end_capture(slot);
    }

    for slot in 0..2 {
        let path = dump_path(dir.path(), slot);
        assert!(path.exists(), "missing {}", path.display());
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }
}
