// src/gfx/resources/mod.rs
//! GPU resource bookkeeping
//!
//! Lazy allocation state and texture ownership for the shadow map array.

pub mod gpu_slot;
pub mod shadow_textures;

// Re-export main types
pub use gpu_slot::GpuSlot;
pub use shadow_textures::ShadowTextures;
