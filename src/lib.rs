// src/lib.rs
//! Umbra
//!
//! Shadow map array management for wgpu renderers. An array of depth-only
//! render targets is allocated lazily, captured one light view at a time with
//! the caller's viewport and framebuffer state saved and restored, and exposed
//! to sampling shaders through world-to-shadow transforms.

pub mod config;
pub mod error;
pub mod gfx;
pub mod wgpu_utils;

// Re-export main types for convenience
pub use config::{DebugFlags, ShadowArrayConfig};
pub use error::{ShadowError, ShadowResult};
pub use gfx::ShadowMapArray;
