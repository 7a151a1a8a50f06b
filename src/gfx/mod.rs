//! # Graphics Module
//!
//! Shadow map management split into three layers:
//!
//! - **Render Context** ([`context`]) - the device seam, with a headless and a wgpu backend
//! - **Resources** ([`resources`]) - lazily allocated GPU objects and texture ownership
//! - **Rendering** ([`rendering`]) - the shadow map array and its capture protocol
//!
//! ## Usage
//!
//! ```no_run
//! use cgmath::Vector2;
//! use umbra::gfx::{HeadlessContext, ShadowMapArray};
//!
//! let mut shadows = ShadowMapArray::new(HeadlessContext::new());
//! shadows.set_shadow_map_resolutions(&[Vector2::new(2048, 2048), Vector2::new(512, 512)]);
//! shadows.begin_capture(0, true);
//! // render shadow casters
//! shadows.end_capture(0);
//! ```

pub mod context;
pub mod rendering;
pub mod resources;

// Re-export commonly used types
pub use context::{HeadlessContext, RenderContext, WgpuContext};
pub use rendering::shadow_array::ShadowMapArray;
