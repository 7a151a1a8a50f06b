//! State-tracking render context with no GPU behind it
//!
//! `HeadlessContext` behaves like a tiny software depth device: it hands out
//! handles, keeps per-texture depth storage, tracks bindings, viewport and
//! depth state, and counts every create/delete call. It is what the crate's
//! tests run against, and it is handy for exercising capture logic in CI
//! machines without an adapter.

use std::collections::HashMap;

use cgmath::Vector2;

use super::{
    DepthRange, FramebufferBindings, FramebufferId, FramebufferTarget, RenderContext, SamplerDesc,
    SamplerId, TextureId, Viewport,
};
use crate::error::{ShadowError, ShadowResult};

/// Call counters collected by a [`HeadlessContext`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    pub texture_allocations: usize,
    pub texture_deletions: usize,
    pub sampler_allocations: usize,
    pub sampler_deletions: usize,
    pub framebuffer_allocations: usize,
    pub framebuffer_deletions: usize,
    pub depth_clears: usize,
    /// Creates or deletes issued while the shared context was not current
    pub unshared_operations: usize,
}

#[derive(Debug, Clone)]
struct HeadlessTexture {
    size: Vector2<u32>,
    /// Row-major, bottom row first
    depth: Vec<f32>,
}

impl HeadlessTexture {
    fn new(size: Vector2<u32>) -> Self {
        Self {
            size,
            depth: vec![1.0; size.x as usize * size.y as usize],
        }
    }
}

/// Token restoring the previous shared-context nesting depth
#[derive(Debug)]
pub struct HeadlessSharedToken {
    previous_depth: u32,
}

/// Software render context used for tests and GPU-less tooling
#[derive(Debug)]
pub struct HeadlessContext {
    next_id: u32,
    textures: HashMap<TextureId, HeadlessTexture>,
    samplers: HashMap<SamplerId, SamplerDesc>,
    framebuffers: HashMap<FramebufferId, Option<TextureId>>,
    bindings: FramebufferBindings,
    viewport: Viewport,
    depth_range: DepthRange,
    depth_clamp: bool,
    shared_depth: u32,
    pending_errors: Vec<ShadowError>,
    stats: HeadlessStats,
}

impl Default for HeadlessContext {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessContext {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            textures: HashMap::new(),
            samplers: HashMap::new(),
            framebuffers: HashMap::new(),
            bindings: FramebufferBindings::default(),
            viewport: Viewport::default(),
            depth_range: DepthRange::DEFAULT,
            depth_clamp: false,
            shared_depth: 0,
            pending_errors: Vec::new(),
            stats: HeadlessStats::default(),
        }
    }

    pub fn stats(&self) -> HeadlessStats {
        self.stats
    }

    pub fn is_shared_current(&self) -> bool {
        self.shared_depth > 0
    }

    /// Registers a texture created outside the shadow array. Not counted as
    /// an allocation and not subject to the shared-context check.
    pub fn import_texture(&mut self, size: Vector2<u32>) -> TextureId {
        let id = self.alloc_id(TextureId::new);
        self.textures.insert(id, HeadlessTexture::new(size));
        id
    }

    pub fn texture_exists(&self, texture: TextureId) -> bool {
        self.textures.contains_key(&texture)
    }

    pub fn texture_size(&self, texture: TextureId) -> Option<Vector2<u32>> {
        self.textures.get(&texture).map(|t| t.size)
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_samplers(&self) -> usize {
        self.samplers.len()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn sampler_desc(&self, sampler: SamplerId) -> Option<&SamplerDesc> {
        self.samplers.get(&sampler)
    }

    /// Depth attachment of a framebuffer, if it exists and has one
    pub fn depth_attachment(&self, framebuffer: FramebufferId) -> Option<TextureId> {
        self.framebuffers.get(&framebuffer).copied().flatten()
    }

    /// Overwrites the depth attachment of the bound draw framebuffer, the way
    /// a draw pass would. `pixels` are row-major, bottom row first.
    pub fn draw_depth(&mut self, pixels: &[f32]) {
        let Some(texture) = self.bound_texture(self.bindings.draw) else {
            self.pending_errors
                .push(ShadowError::device("draw with no depth attachment bound"));
            return;
        };
        if let Some(target) = self.textures.get_mut(&texture) {
            let n = target.depth.len().min(pixels.len());
            target.depth[..n].copy_from_slice(&pixels[..n]);
        }
    }

    /// Current depth contents of a texture
    pub fn depth_contents(&self, texture: TextureId) -> Option<&[f32]> {
        self.textures.get(&texture).map(|t| t.depth.as_slice())
    }

    fn alloc_id<T>(&mut self, wrap: impl Fn(u32) -> Option<T>) -> T {
        loop {
            let raw = self.next_id;
            self.next_id = self.next_id.wrapping_add(1);
            if let Some(id) = wrap(raw) {
                return id;
            }
        }
    }

    fn check_shared(&mut self, op: &str) {
        if !self.is_shared_current() {
            self.stats.unshared_operations += 1;
            log::warn!("{} issued outside the shared context", op);
        }
    }

    fn bound_texture(&self, framebuffer: Option<FramebufferId>) -> Option<TextureId> {
        framebuffer.and_then(|fb| self.depth_attachment(fb))
    }
}

impl RenderContext for HeadlessContext {
    type SharedToken = HeadlessSharedToken;

    fn enter_shared_context(&mut self) -> HeadlessSharedToken {
        let token = HeadlessSharedToken {
            previous_depth: self.shared_depth,
        };
        self.shared_depth += 1;
        token
    }

    fn exit_shared_context(&mut self, token: HeadlessSharedToken) {
        self.shared_depth = token.previous_depth;
    }

    fn create_depth_texture(&mut self, size: Vector2<u32>) -> TextureId {
        self.check_shared("create_depth_texture");
        let id = self.alloc_id(TextureId::new);
        self.textures.insert(id, HeadlessTexture::new(size));
        self.stats.texture_allocations += 1;
        id
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.check_shared("delete_texture");
        if self.textures.remove(&texture).is_none() {
            self.pending_errors
                .push(ShadowError::device(format!("delete of unknown texture {}", texture)));
            return;
        }
        for attachment in self.framebuffers.values_mut() {
            if *attachment == Some(texture) {
                *attachment = None;
            }
        }
        self.stats.texture_deletions += 1;
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> SamplerId {
        self.check_shared("create_sampler");
        let id = self.alloc_id(SamplerId::new);
        self.samplers.insert(id, *desc);
        self.stats.sampler_allocations += 1;
        id
    }

    fn delete_sampler(&mut self, sampler: SamplerId) {
        self.check_shared("delete_sampler");
        if self.samplers.remove(&sampler).is_none() {
            self.pending_errors
                .push(ShadowError::device(format!("delete of unknown sampler {}", sampler)));
            return;
        }
        self.stats.sampler_deletions += 1;
    }

    fn create_framebuffer(&mut self) -> FramebufferId {
        self.check_shared("create_framebuffer");
        let id = self.alloc_id(FramebufferId::new);
        self.framebuffers.insert(id, None);
        self.stats.framebuffer_allocations += 1;
        id
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        self.check_shared("delete_framebuffer");
        if self.framebuffers.remove(&framebuffer).is_none() {
            self.pending_errors.push(ShadowError::device(format!(
                "delete of unknown framebuffer {}",
                framebuffer
            )));
            return;
        }
        if self.bindings.draw == Some(framebuffer) {
            self.bindings.draw = None;
        }
        if self.bindings.read == Some(framebuffer) {
            self.bindings.read = None;
        }
        self.stats.framebuffer_deletions += 1;
    }

    fn framebuffer_bindings(&self) -> FramebufferBindings {
        self.bindings
    }

    fn bind_framebuffer(&mut self, target: FramebufferTarget, framebuffer: Option<FramebufferId>) {
        if let Some(fb) = framebuffer {
            if !self.framebuffers.contains_key(&fb) {
                self.pending_errors
                    .push(ShadowError::device(format!("bind of unknown framebuffer {}", fb)));
                return;
            }
        }
        match target {
            FramebufferTarget::Draw => self.bindings.draw = framebuffer,
            FramebufferTarget::Read => self.bindings.read = framebuffer,
            FramebufferTarget::Both => {
                self.bindings.draw = framebuffer;
                self.bindings.read = framebuffer;
            }
        }
    }

    fn attach_depth_texture(&mut self, framebuffer: FramebufferId, texture: Option<TextureId>) {
        if let Some(tex) = texture {
            if !self.textures.contains_key(&tex) {
                self.pending_errors
                    .push(ShadowError::device(format!("attach of unknown texture {}", tex)));
                return;
            }
        }
        match self.framebuffers.get_mut(&framebuffer) {
            Some(attachment) => *attachment = texture,
            None => self.pending_errors.push(ShadowError::device(format!(
                "attach to unknown framebuffer {}",
                framebuffer
            ))),
        }
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    fn depth_range(&self) -> DepthRange {
        self.depth_range
    }

    fn set_depth_range(&mut self, range: DepthRange) {
        self.depth_range = range;
    }

    fn depth_clamp(&self) -> bool {
        self.depth_clamp
    }

    fn set_depth_clamp(&mut self, enabled: bool) {
        self.depth_clamp = enabled;
    }

    fn clear_depth(&mut self) {
        self.stats.depth_clears += 1;
        if let Some(texture) = self.bound_texture(self.bindings.draw) {
            if let Some(target) = self.textures.get_mut(&texture) {
                target.depth.fill(1.0);
            }
        }
    }

    fn read_depth_pixels(&mut self, width: u32, height: u32) -> ShadowResult<Vec<f32>> {
        let texture = self
            .bound_texture(self.bindings.read)
            .ok_or_else(|| ShadowError::readback("no depth attachment on the read framebuffer"))?;
        let source = self
            .textures
            .get(&texture)
            .ok_or_else(|| ShadowError::readback(format!("texture {} vanished", texture)))?;
        if width > source.size.x || height > source.size.y {
            return Err(ShadowError::readback(format!(
                "read of {}x{} exceeds texture size {}x{}",
                width, height, source.size.x, source.size.y
            )));
        }

        let stride = source.size.x as usize;
        let mut pixels = Vec::with_capacity(width as usize * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            pixels.extend_from_slice(&source.depth[start..start + width as usize]);
        }
        Ok(pixels)
    }

    fn take_errors(&mut self) -> Vec<ShadowError> {
        std::mem::take(&mut self.pending_errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::context::SharedContextScope;

    #[test]
    fn test_unshared_creation_is_counted() {
        let mut ctx = HeadlessContext::new();
        let tex = ctx.create_depth_texture(Vector2::new(2, 2));
        assert_eq!(ctx.stats().unshared_operations, 1);

        let mut scope = SharedContextScope::enter(&mut ctx);
        scope.delete_texture(tex);
        drop(scope);
        assert_eq!(ctx.stats().unshared_operations, 1);
        assert_eq!(ctx.stats().texture_deletions, 1);
    }

    #[test]
    fn test_unknown_delete_reports_error() {
        let mut ctx = HeadlessContext::new();
        ctx.delete_texture(TextureId::new(99).unwrap());
        let errors = ctx.take_errors();
        assert_eq!(errors.len(), 1);
        assert!(ctx.take_errors().is_empty());
    }

    #[test]
    fn test_draw_and_read_back() {
        let mut ctx = HeadlessContext::new();
        let fb = ctx.create_framebuffer();
        let tex = ctx.create_depth_texture(Vector2::new(2, 2));
        ctx.bind_framebuffer(FramebufferTarget::Both, Some(fb));
        ctx.attach_depth_texture(fb, Some(tex));

        ctx.draw_depth(&[0.1, 0.2, 0.3, 0.4]);
        assert_eq!(ctx.read_depth_pixels(2, 2).unwrap(), vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(ctx.read_depth_pixels(1, 2).unwrap(), vec![0.1, 0.3]);
        assert!(ctx.read_depth_pixels(3, 1).is_err());

        ctx.clear_depth();
        assert_eq!(ctx.depth_contents(tex).unwrap(), &[1.0; 4]);
    }

    #[test]
    fn test_read_from_default_framebuffer_fails() {
        let mut ctx = HeadlessContext::new();
        assert!(ctx.read_depth_pixels(1, 1).is_err());
    }

    #[test]
    fn test_deleting_texture_detaches_it() {
        let mut ctx = HeadlessContext::new();
        let fb = ctx.create_framebuffer();
        let tex = ctx.create_depth_texture(Vector2::new(1, 1));
        ctx.attach_depth_texture(fb, Some(tex));
        ctx.delete_texture(tex);
        assert_eq!(ctx.depth_attachment(fb), None);
    }
}
