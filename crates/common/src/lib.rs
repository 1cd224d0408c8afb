//! Shared types for the verdant grass streamer.
//!
//! # Invariants
//! - `GrassInstance` and `FrustumPlane` are plain-old-data with the exact byte
//!   layout used both on disk and on the GPU.
//! - A `ChunkId` is only meaningful relative to the grid that produced it.

mod camera;
mod cancel;
mod frustum;
mod types;

pub use camera::ViewerCamera;
pub use cancel::CancellationToken;
pub use frustum::{Frustum, FrustumPlane};
pub use types::{Aabb, ChunkId, ChunkState, CullSettings, GrassInstance, LodMesh};

/// Divisions along one side of a chunk. Each chunk holds `DIVISION_SIDE²` divisions.
pub const DIVISION_SIDE: u32 = 16;

/// Total divisions in a fully authored chunk.
pub const DIVISION_COUNT: u32 = DIVISION_SIDE * DIVISION_SIDE;

/// Frustum planes produced per frame.
pub const FRUSTUM_PLANE_COUNT: usize = 6;

/// Threads per compute workgroup for every culling kernel.
pub const WORKGROUP_SIZE: u32 = 64;

/// Number of workgroups needed to cover `count` items, one thread per item.
pub fn workgroups_for(count: u32) -> u32 {
    count.div_ceil(WORKGROUP_SIZE)
}

pub fn crate_info() -> &'static str {
    "verdant-common v0.1.0"
}
