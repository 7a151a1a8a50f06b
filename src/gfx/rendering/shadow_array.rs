//! Array of depth-only shadow map render targets
//!
//! [`ShadowMapArray`] owns one depth texture per shadow-casting light view,
//! the two samplers used to read them back, and a single framebuffer that is
//! re-targeted at whichever slot is being captured. Textures can be managed
//! by the array or supplied by the caller.
//!
//! A frame typically looks like:
//!
//! ```no_run
//! use cgmath::{Matrix4, Vector2};
//! use umbra::gfx::context::HeadlessContext;
//! use umbra::gfx::rendering::ShadowMapArray;
//!
//! let mut shadows = ShadowMapArray::new(HeadlessContext::new());
//! shadows.set_shadow_map_resolutions(&[Vector2::new(1024, 1024)]);
//! shadows.set_view_matrix(0, Matrix4::from_translation([0.0, -5.0, 0.0].into()));
//!
//! for slot in 0..shadows.num_shadow_map_passes() {
//!     shadows.begin_capture(slot, true);
//!     // draw shadow casters through shadows.context_mut()
//!     shadows.end_capture(slot);
//! }
//! ```

use cgmath::{Matrix4, SquareMatrix, Vector2, Vector3};

use crate::config::ShadowArrayConfig;
use crate::error::ShadowError;
use crate::gfx::context::{
    post_pending_errors, DepthRange, FramebufferBindings, FramebufferId, FramebufferTarget,
    RenderContext, SamplerDesc, SamplerId, SharedContextScope, TextureId, Viewport,
};
use crate::gfx::resources::{GpuSlot, ShadowTextures};
use crate::wgpu_utils::ShadowUniforms;

use super::depth_dump::{dump_path, normalize_depth, DepthImage, ImageWriter, TiffImageWriter};

/// Far end of the depth range used while capturing. Depth 1.0 is reserved
/// for "no occluder", which is also what the sampler border returns.
pub const SHADOW_DEPTH_FAR: f32 = 0.99999;

/// Caller state saved by `begin_capture` and restored by `end_capture`
#[derive(Debug, Clone, Copy, PartialEq)]
struct SavedState {
    bindings: FramebufferBindings,
    viewport: Viewport,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CaptureState {
    Idle,
    Capturing { slot: usize, saved: SavedState },
}

/// Manager for an array of shadow map depth targets
pub struct ShadowMapArray<C: RenderContext> {
    ctx: C,
    config: ShadowArrayConfig,
    image_writer: Box<dyn ImageWriter>,

    resolutions: Vec<Vector2<u32>>,
    view_matrices: Vec<Matrix4<f32>>,
    projection_matrices: Vec<Matrix4<f32>>,

    textures: ShadowTextures,
    depth_sampler: GpuSlot<SamplerId>,
    compare_sampler: GpuSlot<SamplerId>,
    framebuffer: GpuSlot<FramebufferId>,

    capture: CaptureState,
}

impl<C: RenderContext> ShadowMapArray<C> {
    pub fn new(ctx: C) -> Self {
        Self::with_config(ctx, ShadowArrayConfig::default())
    }

    pub fn with_config(ctx: C, config: ShadowArrayConfig) -> Self {
        Self {
            ctx,
            config,
            image_writer: Box::new(TiffImageWriter),
            resolutions: Vec::new(),
            view_matrices: Vec::new(),
            projection_matrices: Vec::new(),
            textures: ShadowTextures::default(),
            depth_sampler: GpuSlot::Unallocated,
            compare_sampler: GpuSlot::Unallocated,
            framebuffer: GpuSlot::Unallocated,
            capture: CaptureState::Idle,
        }
    }

    pub fn context(&self) -> &C {
        &self.ctx
    }

    /// The render context, for issuing draw calls while a capture is open
    pub fn context_mut(&mut self) -> &mut C {
        &mut self.ctx
    }

    pub fn config(&self) -> &ShadowArrayConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: ShadowArrayConfig) {
        self.config = config;
    }

    pub fn set_image_writer(&mut self, writer: Box<dyn ImageWriter>) {
        self.image_writer = writer;
    }

    // ----- configuration -----

    /// Replaces the per-slot resolutions
    ///
    /// Self-managed textures are released right away and reallocated on the
    /// next capture. Transform lists are resized; new slots get identity.
    pub fn set_shadow_map_resolutions(&mut self, resolutions: &[Vector2<u32>]) {
        if self.resolutions.as_slice() == resolutions {
            return;
        }

        self.resolutions = resolutions.to_vec();

        // Every texture is reallocated, even slots whose size did not change.
        self.free_textures();

        let count = self.resolutions.len();
        self.view_matrices.resize(count, Matrix4::identity());
        self.projection_matrices.resize(count, Matrix4::identity());
    }

    pub fn shadow_map_resolutions(&self) -> &[Vector2<u32>] {
        &self.resolutions
    }

    /// Hands the array caller-owned textures, one per slot
    ///
    /// A non-empty list switches to external ownership: the textures are
    /// attached during capture but never deleted. An empty list switches back
    /// to self-managed textures, allocated on the next capture.
    pub fn set_textures(&mut self, textures: Vec<TextureId>) {
        self.free_textures();
        if !textures.is_empty() && textures.len() != self.resolutions.len() {
            log::warn!(
                "Got {} shadow textures for {} shadow maps",
                textures.len(),
                self.resolutions.len()
            );
        }
        self.textures = ShadowTextures::from_external(textures);
    }

    pub fn textures_are_external(&self) -> bool {
        self.textures.is_external()
    }

    /// One capture pass is needed per shadow map
    pub fn num_shadow_map_passes(&self) -> usize {
        self.resolutions.len()
    }

    pub fn shadow_map_size(&self, index: usize) -> Vector2<u32> {
        match self.resolutions.get(index) {
            Some(size) => *size,
            None => {
                log::error!("{}", self.out_of_range("shadow map", index));
                Vector2::new(0, 0)
            }
        }
    }

    pub fn shadow_map_texture(&self, index: usize) -> Option<TextureId> {
        let texture = self.textures.get(index);
        if texture.is_none() && index >= self.resolutions.len() {
            log::error!("{}", self.out_of_range("shadow texture", index));
        }
        texture
    }

    pub fn view_matrix(&self, index: usize) -> Matrix4<f32> {
        match self.view_matrices.get(index) {
            Some(m) => *m,
            None => {
                log::error!("{}", self.out_of_range("view matrix", index));
                Matrix4::identity()
            }
        }
    }

    pub fn set_view_matrix(&mut self, index: usize, matrix: Matrix4<f32>) {
        match self.view_matrices.get_mut(index) {
            Some(m) => *m = matrix,
            None => log::error!(
                "{}",
                ShadowError::IndexOutOfRange {
                    what: "view matrix",
                    index,
                    len: self.view_matrices.len(),
                }
            ),
        }
    }

    pub fn projection_matrix(&self, index: usize) -> Matrix4<f32> {
        match self.projection_matrices.get(index) {
            Some(m) => *m,
            None => {
                log::error!("{}", self.out_of_range("projection matrix", index));
                Matrix4::identity()
            }
        }
    }

    pub fn set_projection_matrix(&mut self, index: usize, matrix: Matrix4<f32>) {
        match self.projection_matrices.get_mut(index) {
            Some(m) => *m = matrix,
            None => log::error!(
                "{}",
                ShadowError::IndexOutOfRange {
                    what: "projection matrix",
                    index,
                    len: self.projection_matrices.len(),
                }
            ),
        }
    }

    /// World space to shadow texture space
    ///
    /// After the homogeneous divide, XY is the texture coordinate and Z the
    /// compare depth, all in [0,1] instead of NDC [-1,1]. Column-vector form
    /// of view, then projection, then scale by 0.5, then translate by 0.5.
    pub fn world_to_shadow_matrix(&self, index: usize) -> Matrix4<f32> {
        let size = Matrix4::from_scale(0.5);
        let center = Matrix4::from_translation(Vector3::new(0.5, 0.5, 0.5));
        center * size * self.projection_matrix(index) * self.view_matrix(index)
    }

    /// Per-slot data for shadow sampling shaders
    pub fn shadow_uniforms(&self) -> Vec<ShadowUniforms> {
        (0..self.resolutions.len())
            .map(|i| ShadowUniforms::new(self.world_to_shadow_matrix(i), self.resolutions[i]))
            .collect()
    }

    // ----- samplers -----

    pub fn depth_sampler(&self) -> Option<SamplerId> {
        let sampler = self.depth_sampler.get();
        if sampler.is_none() {
            log::error!("{}", ShadowError::NotAllocated("Shadow depth sampler"));
        }
        sampler
    }

    pub fn compare_sampler(&self) -> Option<SamplerId> {
        let sampler = self.compare_sampler.get();
        if sampler.is_none() {
            log::error!("{}", ShadowError::NotAllocated("Shadow compare sampler"));
        }
        sampler
    }

    /// Creates both shadow samplers if they do not exist yet
    pub fn alloc_samplers(&mut self) {
        let mut scope = SharedContextScope::enter(&mut self.ctx);
        self.depth_sampler
            .get_or_create(|| scope.create_sampler(&SamplerDesc::shadow_depth()));
        self.compare_sampler
            .get_or_create(|| scope.create_sampler(&SamplerDesc::shadow_compare()));
        post_pending_errors(&mut *scope, "alloc_samplers");
    }

    // ----- capture -----

    /// Binds slot `index` as the depth target for the following draw calls
    pub fn begin_capture(&mut self, index: usize, clear: bool) {
        if let CaptureState::Capturing { slot, .. } = self.capture {
            log::error!(
                "begin_capture({}) while slot {} is still being captured",
                index,
                slot
            );
            return;
        }

        if !self.framebuffer.is_allocated() || self.textures.is_empty() {
            self.alloc_resources();
        }

        let saved = SavedState {
            bindings: self.ctx.framebuffer_bindings(),
            viewport: self.ctx.viewport(),
        };

        self.bind_framebuffer(index);

        if clear {
            self.ctx.clear_depth();
        }

        // An out-of-range slot was already reported by bind_framebuffer
        let resolution = self
            .resolutions
            .get(index)
            .copied()
            .unwrap_or(Vector2::new(0, 0));
        self.ctx.set_viewport(Viewport::from_size(resolution));

        self.ctx
            .set_depth_range(DepthRange::new(0.0, SHADOW_DEPTH_FAR));
        // Keep casters beyond the far plane instead of clipping them away
        self.ctx.set_depth_clamp(true);

        self.capture = CaptureState::Capturing { slot: index, saved };
        post_pending_errors(&mut self.ctx, "begin_capture");
    }

    /// Finishes the capture of slot `index` and restores the caller's state
    pub fn end_capture(&mut self, index: usize) {
        let (slot, saved) = match self.capture {
            CaptureState::Idle => {
                log::error!("end_capture({}) without a matching begin_capture", index);
                return;
            }
            CaptureState::Capturing { slot, saved } => {
                if slot != index {
                    log::warn!("end_capture({}) closes the capture of slot {}", index, slot);
                }
                (slot, saved)
            }
        };

        self.ctx.set_depth_range(DepthRange::DEFAULT);
        self.ctx.set_depth_clamp(false);

        if self.config.dump_textures() {
            self.dump_depth(slot);
        }

        self.ctx
            .bind_framebuffer(FramebufferTarget::Draw, saved.bindings.draw);
        self.ctx
            .bind_framebuffer(FramebufferTarget::Read, saved.bindings.read);
        self.ctx.set_viewport(saved.viewport);

        self.capture = CaptureState::Idle;
        post_pending_errors(&mut self.ctx, "end_capture");
    }

    pub fn is_capturing(&self) -> bool {
        matches!(self.capture, CaptureState::Capturing { .. })
    }

    // ----- private helpers -----

    fn alloc_resources(&mut self) {
        self.alloc_samplers();

        if self.textures.needs_allocation() {
            self.alloc_textures();
        }

        let mut scope = SharedContextScope::enter(&mut self.ctx);
        self.framebuffer.get_or_create(|| scope.create_framebuffer());
        post_pending_errors(&mut *scope, "alloc_resources");
    }

    fn alloc_textures(&mut self) {
        if !self.depth_sampler.is_allocated()
            || !self.compare_sampler.is_allocated()
            || !self.textures.needs_allocation()
        {
            log::error!("Unexpected entry state in alloc_textures");
            return;
        }

        let trace = self.config.trace_textures();
        let mut scope = SharedContextScope::enter(&mut self.ctx);

        let ids: Vec<TextureId> = self
            .resolutions
            .iter()
            .map(|size| {
                let id = scope.create_depth_texture(*size);
                if trace {
                    log::debug!(
                        "Created shadow map texture of size {}x{} (id {})",
                        size.x,
                        size.y,
                        id
                    );
                }
                id
            })
            .collect();
        post_pending_errors(&mut *scope, "alloc_textures");

        self.textures = ShadowTextures::SelfManaged(ids);
    }

    fn free_textures(&mut self) {
        let owned = self.textures.take_owned();
        if owned.is_empty() {
            return;
        }

        let mut scope = SharedContextScope::enter(&mut self.ctx);
        for id in owned {
            scope.delete_texture(id);
        }
        post_pending_errors(&mut *scope, "free_textures");
    }

    fn free_resources(&mut self) {
        self.free_textures();

        let mut scope = SharedContextScope::enter(&mut self.ctx);
        if let Some(fb) = self.framebuffer.free() {
            scope.delete_framebuffer(fb);
        }
        if let Some(sampler) = self.depth_sampler.free() {
            scope.delete_sampler(sampler);
        }
        if let Some(sampler) = self.compare_sampler.free() {
            scope.delete_sampler(sampler);
        }
        post_pending_errors(&mut *scope, "free_resources");
    }

    fn bind_framebuffer(&mut self, index: usize) {
        let Some(framebuffer) = self.framebuffer.get() else {
            log::error!("{}", ShadowError::NotAllocated("Shadow framebuffer"));
            return;
        };

        self.ctx
            .bind_framebuffer(FramebufferTarget::Both, Some(framebuffer));

        let texture = self.textures.get(index);
        if texture.is_none() {
            log::warn!(
                "{}",
                ShadowError::IndexOutOfRange {
                    what: "shadow texture",
                    index,
                    len: self.textures.len(),
                }
            );
        }
        self.ctx.attach_depth_texture(framebuffer, texture);

        post_pending_errors(&mut self.ctx, "bind_framebuffer");
    }

    fn out_of_range(&self, what: &'static str, index: usize) -> ShadowError {
        ShadowError::IndexOutOfRange {
            what,
            index,
            len: self.resolutions.len(),
        }
    }

    fn dump_depth(&mut self, index: usize) {
        let Some(&resolution) = self.resolutions.get(index) else {
            log::warn!(
                "Skipping shadow texture dump: {}",
                self.out_of_range("shadow map", index)
            );
            return;
        };
        let mut pixels = match self.ctx.read_depth_pixels(resolution.x, resolution.y) {
            Ok(pixels) => pixels,
            Err(err) => {
                log::warn!("Failed to read back shadow texture {}: {}", index, err);
                return;
            }
        };
        normalize_depth(&mut pixels);

        let image = DepthImage {
            width: resolution.x,
            height: resolution.y,
            pixels,
            // Readback starts at the bottom-left corner
            flipped: true,
        };

        let path = dump_path(&self.config.dump_dir, index);
        match self.image_writer.write(&path, &image) {
            Ok(()) => log::info!("Wrote shadow texture: {}", path.display()),
            Err(err) => log::warn!("Failed to write shadow texture {}: {}", path.display(), err),
        }
    }
}

impl<C: RenderContext> Drop for ShadowMapArray<C> {
    fn drop(&mut self) {
        self.free_resources();
    }
}
