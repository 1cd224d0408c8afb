//! wgpu backend for the grass culling pipeline.
//!
//! Runs the three compute kernels on a real device behind the
//! [`verdant_render::ComputeBackend`] contract. Output buffers stay on the
//! device for the renderer that issues the indirect draws.
//!
//! # Invariants
//! - Commands reach the queue in the order they were recorded.
//! - Every kernel guards its thread index against the bound array lengths.

mod gpu;
mod shaders;

pub use gpu::{GpuError, WgpuBackend};

pub fn crate_info() -> &'static str {
    "verdant-render-wgpu v0.1.0"
}
