// src/wgpu_utils/mod.rs
//! WGPU utility functions and helpers
//!
//! Provides GPU-side layouts for feeding shadow data to shaders.

pub mod shadow_uniforms;

// Re-export main types
pub use shadow_uniforms::{ShadowUniformBuffer, ShadowUniforms};
