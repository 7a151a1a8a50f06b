// src/wgpu_utils/shadow_uniforms.rs - Per-slot shadow data for sampling shaders
use cgmath::{Matrix4, Vector2};

/// GPU layout of one shadow slot, matching
///
/// ```wgsl
/// struct ShadowSlot {
///     world_to_shadow: mat4x4<f32>,
///     resolution: vec2<f32>,
///     _padding: vec2<f32>,
/// }
/// ```
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ShadowUniforms {
    pub world_to_shadow: [[f32; 4]; 4],
    pub resolution: [f32; 2],
    pub _padding: [f32; 2],
}

impl ShadowUniforms {
    pub fn new(world_to_shadow: Matrix4<f32>, resolution: Vector2<u32>) -> Self {
        Self {
            world_to_shadow: world_to_shadow.into(),
            resolution: [resolution.x as f32, resolution.y as f32],
            _padding: [0.0; 2],
        }
    }
}

/// Storage buffer holding one [`ShadowUniforms`] per shadow slot
pub struct ShadowUniformBuffer {
    buffer: wgpu::Buffer,
    capacity: usize,
    previous_content: Vec<u8>,
    upload_count: u64,
}

impl ShadowUniformBuffer {
    /// Create a buffer with room for `capacity` slots (at least one)
    pub fn new(device: &wgpu::Device, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: Self::create_buffer(device, capacity),
            capacity,
            previous_content: Vec::new(),
            upload_count: 0,
        }
    }

    fn create_buffer(device: &wgpu::Device, capacity: usize) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("StorageBuffer: ShadowUniforms"),
            size: (capacity * std::mem::size_of::<ShadowUniforms>()) as u64,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        })
    }

    /// Upload slot data, skipping the write when nothing changed.
    /// Returns true if the buffer was recreated and bind groups need rebuilding.
    pub fn update_content(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        slots: &[ShadowUniforms],
    ) -> bool {
        let mut recreated = false;
        if slots.len() > self.capacity {
            self.capacity = slots.len();
            self.buffer = Self::create_buffer(device, self.capacity);
            self.previous_content.clear();
            recreated = true;
        }

        let new_content: &[u8] = bytemuck::cast_slice(slots);
        if self.previous_content != new_content {
            queue.write_buffer(&self.buffer, 0, new_content);
            self.previous_content = new_content.to_vec();
            self.upload_count += 1;
        }
        recreated
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of `write_buffer` calls actually issued
    pub fn upload_count(&self) -> u64 {
        self.upload_count
    }

    /// Get binding resource
    pub fn binding_resource(&self) -> wgpu::BindingResource {
        self.buffer.as_entire_binding()
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }
}
