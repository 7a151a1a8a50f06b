// src/gfx/rendering/mod.rs
//! Shadow capture
//!
//! Owns the shadow map array and the debug depth dump path.

pub mod depth_dump;
pub mod shadow_array;

// Re-export main types
pub use depth_dump::{DepthImage, ImageWriter, TiffImageWriter};
pub use shadow_array::{ShadowMapArray, SHADOW_DEPTH_FAR};
