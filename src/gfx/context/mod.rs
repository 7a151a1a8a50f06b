//! Render context abstraction
//!
//! [`ShadowMapArray`](crate::gfx::rendering::ShadowMapArray) never talks to a
//! graphics API directly. Everything it needs (object creation, framebuffer
//! binding, viewport and depth state, readback) goes through the
//! [`RenderContext`] trait, which is implemented by:
//!
//! - [`HeadlessContext`] - pure state tracking, no GPU required
//! - [`WgpuContext`] - backed by a `wgpu::Device` and `wgpu::Queue`
//!
//! GPU objects are referred to by small copyable handles so that externally
//! created textures can be handed to the array without transferring ownership.

pub mod headless;
pub mod wgpu_context;

use std::num::NonZeroU32;
use std::ops::{Deref, DerefMut};

use cgmath::Vector2;

use crate::error::{ShadowError, ShadowResult};

pub use headless::{HeadlessContext, HeadlessStats};
pub use wgpu_context::{CaptureTarget, WgpuContext};

macro_rules! gpu_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(NonZeroU32);

        impl $name {
            /// Wraps a raw id. Zero is the null handle and yields `None`.
            pub fn new(raw: u32) -> Option<Self> {
                NonZeroU32::new(raw).map(Self)
            }

            pub fn raw(self) -> u32 {
                self.0.get()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{:#x}", self.0.get())
            }
        }
    };
}

gpu_handle!(
    /// Opaque handle to a depth texture owned by a render context
    TextureId
);
gpu_handle!(
    /// Opaque handle to a sampler object
    SamplerId
);
gpu_handle!(
    /// Opaque handle to a framebuffer (a depth attachment point)
    FramebufferId
);

/// Pixel rectangle used for rasterization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Viewport covering a whole target of the given size
    pub fn from_size(size: Vector2<u32>) -> Self {
        Self::new(0, 0, size.x, size.y)
    }
}

/// Mapping of normalized device depth onto the depth buffer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthRange {
    pub near: f32,
    pub far: f32,
}

impl DepthRange {
    pub const DEFAULT: DepthRange = DepthRange {
        near: 0.0,
        far: 1.0,
    };

    pub fn new(near: f32, far: f32) -> Self {
        Self { near, far }
    }
}

impl Default for DepthRange {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Which framebuffer binding point an operation applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramebufferTarget {
    Draw,
    Read,
    Both,
}

/// Current framebuffer bindings. `None` is the default (window) framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FramebufferBindings {
    pub draw: Option<FramebufferId>,
    pub read: Option<FramebufferId>,
}

/// Sampler state for shadow lookups
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerDesc {
    pub label: &'static str,
    pub filter: wgpu::FilterMode,
    pub address_mode: wgpu::AddressMode,
    pub border_color: Option<wgpu::SamplerBorderColor>,
    pub compare: Option<wgpu::CompareFunction>,
}

impl SamplerDesc {
    /// Plain depth sampler. Lookups outside [0,1] read the white border,
    /// i.e. maximum depth, so they never count as occluded.
    pub fn shadow_depth() -> Self {
        Self {
            label: "Shadow Depth Sampler",
            filter: wgpu::FilterMode::Linear,
            address_mode: wgpu::AddressMode::ClampToBorder,
            border_color: Some(wgpu::SamplerBorderColor::OpaqueWhite),
            compare: None,
        }
    }

    /// Depth sampler with hardware comparison for shadow tests
    pub fn shadow_compare() -> Self {
        Self {
            label: "Shadow Compare Sampler",
            compare: Some(wgpu::CompareFunction::LessEqual),
            ..Self::shadow_depth()
        }
    }
}

/// Graphics device seam used by the shadow map array
///
/// All calls are issued from a single logical rendering thread. Object
/// creation and deletion must happen while the shared context is current,
/// see [`SharedContextScope`].
pub trait RenderContext {
    /// Whatever is needed to restore the previously current context
    type SharedToken;

    fn enter_shared_context(&mut self) -> Self::SharedToken;
    fn exit_shared_context(&mut self, token: Self::SharedToken);

    /// Creates a single channel 32-bit float depth texture of exactly `size`
    fn create_depth_texture(&mut self, size: Vector2<u32>) -> TextureId;
    fn delete_texture(&mut self, texture: TextureId);

    fn create_sampler(&mut self, desc: &SamplerDesc) -> SamplerId;
    fn delete_sampler(&mut self, sampler: SamplerId);

    fn create_framebuffer(&mut self) -> FramebufferId;
    fn delete_framebuffer(&mut self, framebuffer: FramebufferId);

    fn framebuffer_bindings(&self) -> FramebufferBindings;
    fn bind_framebuffer(&mut self, target: FramebufferTarget, framebuffer: Option<FramebufferId>);
    /// Replaces the depth attachment of `framebuffer`. `None` detaches.
    fn attach_depth_texture(&mut self, framebuffer: FramebufferId, texture: Option<TextureId>);

    fn viewport(&self) -> Viewport;
    fn set_viewport(&mut self, viewport: Viewport);

    fn depth_range(&self) -> DepthRange;
    fn set_depth_range(&mut self, range: DepthRange);

    fn depth_clamp(&self) -> bool;
    fn set_depth_clamp(&mut self, enabled: bool);

    /// Clears the depth attachment of the bound draw framebuffer to 1.0
    fn clear_depth(&mut self);

    /// Reads the depth attachment of the bound read framebuffer.
    /// Rows are returned bottom row first.
    fn read_depth_pixels(&mut self, width: u32, height: u32) -> ShadowResult<Vec<f32>>;

    /// Drains errors raised by the device since the last call
    fn take_errors(&mut self) -> Vec<ShadowError>;
}

/// Lets a shadow array borrow a context instead of owning it
impl<C: RenderContext + ?Sized> RenderContext for &mut C {
    type SharedToken = C::SharedToken;

    fn enter_shared_context(&mut self) -> Self::SharedToken {
        (**self).enter_shared_context()
    }

    fn exit_shared_context(&mut self, token: Self::SharedToken) {
        (**self).exit_shared_context(token)
    }

    fn create_depth_texture(&mut self, size: Vector2<u32>) -> TextureId {
        (**self).create_depth_texture(size)
    }

    fn delete_texture(&mut self, texture: TextureId) {
        (**self).delete_texture(texture)
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> SamplerId {
        (**self).create_sampler(desc)
    }

    fn delete_sampler(&mut self, sampler: SamplerId) {
        (**self).delete_sampler(sampler)
    }

    fn create_framebuffer(&mut self) -> FramebufferId {
        (**self).create_framebuffer()
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        (**self).delete_framebuffer(framebuffer)
    }

    fn framebuffer_bindings(&self) -> FramebufferBindings {
        (**self).framebuffer_bindings()
    }

    fn bind_framebuffer(&mut self, target: FramebufferTarget, framebuffer: Option<FramebufferId>) {
        (**self).bind_framebuffer(target, framebuffer)
    }

    fn attach_depth_texture(&mut self, framebuffer: FramebufferId, texture: Option<TextureId>) {
        (**self).attach_depth_texture(framebuffer, texture)
    }

    fn viewport(&self) -> Viewport {
        (**self).viewport()
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        (**self).set_viewport(viewport)
    }

    fn depth_range(&self) -> DepthRange {
        (**self).depth_range()
    }

    fn set_depth_range(&mut self, range: DepthRange) {
        (**self).set_depth_range(range)
    }

    fn depth_clamp(&self) -> bool {
        (**self).depth_clamp()
    }

    fn set_depth_clamp(&mut self, enabled: bool) {
        (**self).set_depth_clamp(enabled)
    }

    fn clear_depth(&mut self) {
        (**self).clear_depth()
    }

    fn read_depth_pixels(&mut self, width: u32, height: u32) -> ShadowResult<Vec<f32>> {
        (**self).read_depth_pixels(width, height)
    }

    fn take_errors(&mut self) -> Vec<ShadowError> {
        (**self).take_errors()
    }
}

/// Scoped acquisition of the shared context
///
/// Entering makes the shared context current; dropping the scope restores
/// whatever was current before, on every exit path. The scope derefs to the
/// context so calls can be issued through it directly.
pub struct SharedContextScope<'a, C: RenderContext + ?Sized> {
    ctx: &'a mut C,
    token: Option<C::SharedToken>,
}

impl<'a, C: RenderContext + ?Sized> SharedContextScope<'a, C> {
    pub fn enter(ctx: &'a mut C) -> Self {
        let token = ctx.enter_shared_context();
        Self {
            ctx,
            token: Some(token),
        }
    }
}

impl<C: RenderContext + ?Sized> Deref for SharedContextScope<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.ctx
    }
}

impl<C: RenderContext + ?Sized> DerefMut for SharedContextScope<'_, C> {
    fn deref_mut(&mut self) -> &mut C {
        self.ctx
    }
}

impl<C: RenderContext + ?Sized> Drop for SharedContextScope<'_, C> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.ctx.exit_shared_context(token);
        }
    }
}

/// Logs every pending device error without interrupting the caller
pub fn post_pending_errors<C: RenderContext + ?Sized>(ctx: &mut C, site: &str) {
    for err in ctx.take_errors() {
        log::warn!("GPU error in {}: {}", site, err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_handle() {
        assert!(TextureId::new(0).is_none());
        let id = TextureId::new(7).unwrap();
        assert_eq!(id.raw(), 7);
        assert_eq!(id.to_string(), "0x7");
    }

    #[test]
    fn test_compare_sampler_extends_depth_sampler() {
        let depth = SamplerDesc::shadow_depth();
        let compare = SamplerDesc::shadow_compare();
        assert_eq!(depth.compare, None);
        assert_eq!(compare.compare, Some(wgpu::CompareFunction::LessEqual));
        assert_eq!(compare.filter, depth.filter);
        assert_eq!(compare.address_mode, wgpu::AddressMode::ClampToBorder);
        assert_eq!(compare.border_color, Some(wgpu::SamplerBorderColor::OpaqueWhite));
    }

    #[test]
    fn test_scope_restores_on_early_return() {
        fn allocate_then_bail(ctx: &mut HeadlessContext) -> Option<TextureId> {
            let mut scope = SharedContextScope::enter(ctx);
            assert!(scope.is_shared_current());
            let _texture = scope.create_depth_texture(Vector2::new(4, 4));
            None
        }

        let mut ctx = HeadlessContext::new();
        assert!(!ctx.is_shared_current());
        assert!(allocate_then_bail(&mut ctx).is_none());
        assert!(!ctx.is_shared_current());
        assert_eq!(ctx.stats().unshared_operations, 0);
    }

    #[test]
    fn test_nested_scopes() {
        let mut ctx = HeadlessContext::new();
        {
            let mut outer = SharedContextScope::enter(&mut ctx);
            {
                let inner = SharedContextScope::enter(&mut *outer);
                assert!(inner.is_shared_current());
            }
            assert!(outer.is_shared_current());
        }
        assert!(!ctx.is_shared_current());
    }
}
