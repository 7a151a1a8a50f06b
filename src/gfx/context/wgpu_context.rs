//! wgpu-backed render context
//!
//! wgpu has no global binding state, so the pieces a GL-style capture needs
//! (bound framebuffer, viewport, depth range, depth clamp, pending clear) are
//! tracked here and handed to the renderer as a [`CaptureTarget`] when it
//! builds the shadow render pass. Object creation is real: textures and
//! samplers live on the device and can be fetched by handle for bind groups.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use cgmath::Vector2;

use super::{
    DepthRange, FramebufferBindings, FramebufferId, FramebufferTarget, RenderContext, SamplerDesc,
    SamplerId, TextureId, Viewport,
};
use crate::error::{ShadowError, ShadowResult};

/// Format of every shadow map texture created by [`WgpuContext`]
pub const SHADOW_MAP_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

const DEPTH_BYTES_PER_PIXEL: usize = 4;

struct ShadowTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    /// Imported textures belong to the caller and are never destroyed here
    imported: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct FramebufferRecord {
    depth: Option<TextureId>,
    pending_clear: bool,
}

/// Token restoring the previous shared-context nesting depth
#[derive(Debug)]
pub struct WgpuSharedToken {
    previous_depth: u32,
}

/// Everything a renderer needs to record a shadow capture pass
#[derive(Clone)]
pub struct CaptureTarget {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub viewport: Viewport,
    pub depth_range: DepthRange,
    /// Feed into `wgpu::PrimitiveState::unclipped_depth` of the shadow pipeline
    pub unclipped_depth: bool,
    pub clear: bool,
}

impl CaptureTarget {
    pub fn depth_load_op(&self) -> wgpu::LoadOp<f32> {
        if self.clear {
            wgpu::LoadOp::Clear(1.0)
        } else {
            wgpu::LoadOp::Load
        }
    }

    pub fn depth_stencil_attachment(&self) -> wgpu::RenderPassDepthStencilAttachment<'_> {
        wgpu::RenderPassDepthStencilAttachment {
            view: &self.view,
            depth_ops: Some(wgpu::Operations {
                load: self.depth_load_op(),
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: None,
        }
    }

    /// Applies the capture viewport and narrowed depth range to a pass
    pub fn apply_viewport(&self, pass: &mut wgpu::RenderPass<'_>) {
        pass.set_viewport(
            self.viewport.x as f32,
            self.viewport.y as f32,
            self.viewport.width as f32,
            self.viewport.height as f32,
            self.depth_range.near,
            self.depth_range.far,
        );
    }
}

/// Render context over a wgpu device and queue
pub struct WgpuContext {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    next_id: u32,
    textures: HashMap<TextureId, ShadowTexture>,
    samplers: HashMap<SamplerId, wgpu::Sampler>,
    framebuffers: HashMap<FramebufferId, FramebufferRecord>,
    bindings: FramebufferBindings,
    viewport: Viewport,
    depth_range: DepthRange,
    depth_clamp: bool,
    shared_depth: u32,
    pending_errors: Vec<ShadowError>,
    /// Filled by the device's uncaptured-error handler
    uncaptured_errors: Arc<Mutex<Vec<ShadowError>>>,
    downlevel_flags: wgpu::DownlevelFlags,
}

impl WgpuContext {
    /// Wraps a device and queue.
    ///
    /// Installs an uncaptured-error handler on the device so validation
    /// errors outside an error scope are queued for `take_errors` instead of
    /// panicking. This replaces any handler the caller installed before.
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        let uncaptured_errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&uncaptured_errors);
        device.on_uncaptured_error(Box::new(move |err| {
            if let Ok(mut errors) = sink.lock() {
                errors.push(ShadowError::device(err));
            }
        }));

        Self {
            device,
            queue,
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
            uncaptured_errors,
            downlevel_flags: wgpu::DownlevelFlags::all(),
        }
    }

    /// Records the adapter's downlevel capabilities. Depth readback is
    /// refused up front when the adapter cannot copy depth textures.
    pub fn with_downlevel_flags(mut self, flags: wgpu::DownlevelFlags) -> Self {
        self.downlevel_flags = flags;
        self
    }

    pub fn supports_depth_readback(&self) -> bool {
        self.downlevel_flags
            .contains(wgpu::DownlevelFlags::DEPTH_TEXTURE_AND_BUFFER_COPIES)
    }

    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    pub fn queue(&self) -> &Arc<wgpu::Queue> {
        &self.queue
    }

    /// Features a device should request for full shadow capture fidelity
    pub fn preferred_features() -> wgpu::Features {
        wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER | wgpu::Features::DEPTH_CLIP_CONTROL
    }

    pub fn supports_depth_clamp(&self) -> bool {
        self.device
            .features()
            .contains(wgpu::Features::DEPTH_CLIP_CONTROL)
    }

    pub fn supports_border_sampling(&self) -> bool {
        self.device
            .features()
            .contains(wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER)
    }

    /// Registers a caller-owned depth texture so it can be passed to
    /// `ShadowMapArray::set_textures`
    pub fn import_texture(&mut self, texture: wgpu::Texture) -> TextureId {
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let id = self.alloc_id(TextureId::new);
        self.textures.insert(
            id,
            ShadowTexture {
                texture,
                view,
                imported: true,
            },
        );
        id
    }

    pub fn texture(&self, id: TextureId) -> Option<&wgpu::Texture> {
        self.textures.get(&id).map(|t| &t.texture)
    }

    pub fn texture_view(&self, id: TextureId) -> Option<&wgpu::TextureView> {
        self.textures.get(&id).map(|t| &t.view)
    }

    pub fn sampler(&self, id: SamplerId) -> Option<&wgpu::Sampler> {
        self.samplers.get(&id)
    }

    /// Describes the pass the caller should record while a capture is open.
    /// A requested depth clear is handed out once; later calls load instead.
    pub fn capture_target(&mut self) -> Option<CaptureTarget> {
        let framebuffer = self.bindings.draw?;
        let record = self.framebuffers.get_mut(&framebuffer)?;
        let texture = self.textures.get(&record.depth?)?;
        let clear = std::mem::take(&mut record.pending_clear);

        Some(CaptureTarget {
            texture: texture.texture.clone(),
            view: texture.view.clone(),
            viewport: self.viewport,
            depth_range: self.depth_range,
            unclipped_depth: self.depth_clamp && self.supports_depth_clamp(),
            clear,
        })
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

    fn bound_texture(&self, framebuffer: Option<FramebufferId>) -> Option<&ShadowTexture> {
        let record = self.framebuffers.get(&framebuffer?)?;
        self.textures.get(&record.depth?)
    }

    fn read_texture_depth(
        &self,
        texture: &wgpu::Texture,
        width: u32,
        height: u32,
    ) -> ShadowResult<Vec<f32>> {
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }
        if !self.supports_depth_readback() {
            return Err(ShadowError::readback(
                "adapter lacks DEPTH_TEXTURE_AND_BUFFER_COPIES",
            ));
        }
        if !texture.usage().contains(wgpu::TextureUsages::COPY_SRC) {
            return Err(ShadowError::readback(format!(
                "texture usage {:?} lacks COPY_SRC",
                texture.usage()
            )));
        }
        if width > texture.width() || height > texture.height() {
            return Err(ShadowError::readback(format!(
                "read of {}x{} exceeds texture size {}x{}",
                width,
                height,
                texture.width(),
                texture.height()
            )));
        }

        let tight_bpr = DEPTH_BYTES_PER_PIXEL * width as usize;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as usize;
        let padded_bpr = tight_bpr.div_ceil(align) * align;

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Shadow Depth Readback"),
            size: (padded_bpr * height as usize) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        // Anything the checks above missed surfaces here instead of reaching
        // the uncaptured-error handler.
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Shadow Depth Readback Encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::DepthOnly,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bpr as u32),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(ShadowError::readback(err));
        }

        let slice = staging.slice(..);
        let (tx, rx) = futures::channel::oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::PollType::Wait);

        match futures::executor::block_on(rx) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(ShadowError::readback(err)),
            Err(_) => return Err(ShadowError::readback("map_async callback dropped")),
        }

        let mapped = slice.get_mapped_range();
        let mut pixels = Vec::with_capacity(width as usize * height as usize);
        // wgpu rows start at the top; callers expect the bottom row first.
        for row in (0..height as usize).rev() {
            let start = row * padded_bpr;
            pixels.extend(
                mapped[start..start + tight_bpr]
                    .chunks_exact(DEPTH_BYTES_PER_PIXEL)
                    .map(bytemuck::pod_read_unaligned::<f32>),
            );
        }
        drop(mapped);
        staging.unmap();

        Ok(pixels)
    }
}

impl RenderContext for WgpuContext {
    type SharedToken = WgpuSharedToken;

    fn enter_shared_context(&mut self) -> WgpuSharedToken {
        // The device is shared by construction; the scope doubles as a
        // validation error scope around object creation.
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let token = WgpuSharedToken {
            previous_depth: self.shared_depth,
        };
        self.shared_depth += 1;
        token
    }

    fn exit_shared_context(&mut self, token: WgpuSharedToken) {
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            self.pending_errors.push(ShadowError::device(err));
        }
        self.shared_depth = token.previous_depth;
    }

    fn create_depth_texture(&mut self, size: Vector2<u32>) -> TextureId {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Shadow Map"),
            size: wgpu::Extent3d {
                width: size.x,
                height: size.y,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: SHADOW_MAP_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let id = self.alloc_id(TextureId::new);
        self.textures.insert(
            id,
            ShadowTexture {
                texture,
                view,
                imported: false,
            },
        );
        id
    }

    fn delete_texture(&mut self, texture: TextureId) {
        match self.textures.remove(&texture) {
            Some(entry) => {
                if !entry.imported {
                    entry.texture.destroy();
                }
                for record in self.framebuffers.values_mut() {
                    if record.depth == Some(texture) {
                        record.depth = None;
                    }
                }
            }
            None => self
                .pending_errors
                .push(ShadowError::device(format!("delete of unknown texture {}", texture))),
        }
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> SamplerId {
        let (address_mode, border_color) = if desc.address_mode
            == wgpu::AddressMode::ClampToBorder
            && !self.supports_border_sampling()
        {
            log::warn!(
                "{}: device lacks ADDRESS_MODE_CLAMP_TO_BORDER, falling back to ClampToEdge",
                desc.label
            );
            (wgpu::AddressMode::ClampToEdge, None)
        } else {
            (desc.address_mode, desc.border_color)
        };

        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(desc.label),
            address_mode_u: address_mode,
            address_mode_v: address_mode,
            address_mode_w: address_mode,
            mag_filter: desc.filter,
            min_filter: desc.filter,
            mipmap_filter: wgpu::FilterMode::Nearest,
            compare: desc.compare,
            border_color,
            ..Default::default()
        });

        let id = self.alloc_id(SamplerId::new);
        self.samplers.insert(id, sampler);
        id
    }

    fn delete_sampler(&mut self, sampler: SamplerId) {
        if self.samplers.remove(&sampler).is_none() {
            self.pending_errors
                .push(ShadowError::device(format!("delete of unknown sampler {}", sampler)));
        }
    }

    fn create_framebuffer(&mut self) -> FramebufferId {
        let id = self.alloc_id(FramebufferId::new);
        self.framebuffers.insert(id, FramebufferRecord::default());
        id
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
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
    }

    fn framebuffer_bindings(&self) -> FramebufferBindings {
        self.bindings
    }

    fn bind_framebuffer(&mut self, target: FramebufferTarget, framebuffer: Option<FramebufferId>) {
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
        match self.framebuffers.get_mut(&framebuffer) {
            Some(record) => {
                record.depth = texture;
                record.pending_clear = false;
            }
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
        if let Some(record) = self
            .bindings
            .draw
            .and_then(|fb| self.framebuffers.get_mut(&fb))
        {
            record.pending_clear = true;
        }
    }

    fn read_depth_pixels(&mut self, width: u32, height: u32) -> ShadowResult<Vec<f32>> {
        let texture = self
            .bound_texture(self.bindings.read)
            .map(|t| t.texture.clone())
            .ok_or_else(|| ShadowError::readback("no depth attachment on the read framebuffer"))?;
        self.read_texture_depth(&texture, width, height)
    }

    fn take_errors(&mut self) -> Vec<ShadowError> {
        let mut errors = std::mem::take(&mut self.pending_errors);
        match self.uncaptured_errors.lock() {
            Ok(mut uncaptured) => errors.append(&mut uncaptured),
            Err(poisoned) => errors.append(&mut poisoned.into_inner()),
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preferred_features_cover_capture_state() {
        let features = WgpuContext::preferred_features();
        assert!(features.contains(wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER));
        assert!(features.contains(wgpu::Features::DEPTH_CLIP_CONTROL));
    }

    #[test]
    fn test_shadow_maps_are_readable_depth() {
        assert!(SHADOW_MAP_FORMAT.has_depth_aspect());
        assert_eq!(
            SHADOW_MAP_FORMAT.block_copy_size(Some(wgpu::TextureAspect::DepthOnly)),
            Some(DEPTH_BYTES_PER_PIXEL as u32)
        );
    }
}
