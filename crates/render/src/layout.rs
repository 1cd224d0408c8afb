//! Byte layouts shared by every backend and the WGSL kernels.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use verdant_common::{CullSettings, FRUSTUM_PLANE_COUNT, Frustum, FrustumPlane, LodMesh};

/// Bytes per resolved transform (column-major 4×4 f32).
pub const TRANSFORM_SIZE: u64 = 64;

/// Bytes per packed division bound (`vec3` padded to 16 for storage arrays).
pub const PACKED_VEC3_SIZE: u64 = 16;

/// Bytes per division visibility result.
pub const RESULT_SIZE: u64 = 4;

/// Bytes of the live-length header in front of an append list.
pub const APPEND_HEADER_SIZE: u64 = 4;

/// Byte offset of `instance_count` inside [`DrawIndexedArgs`].
pub const INSTANCE_COUNT_OFFSET: u64 = 4;

/// Per-frame constants for the culling kernels (128 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FrameParams {
    pub planes: [FrustumPlane; FRUSTUM_PLANE_COUNT],
    /// xyz viewer position, w unused.
    pub viewer_position: [f32; 4],
    pub min_distance: f32,
    pub max_distance: f32,
    pub lod_threshold: f32,
    pub lod_blend: f32,
}

const _: () = assert!(std::mem::size_of::<FrameParams>() == 128);

impl FrameParams {
    pub fn new(frustum: &Frustum, viewer: Vec3, cull: &CullSettings) -> Self {
        Self {
            planes: frustum.planes,
            viewer_position: viewer.extend(1.0).to_array(),
            min_distance: cull.min_distance,
            max_distance: cull.max_distance,
            lod_threshold: cull.lod_threshold,
            lod_blend: cull.lod_blend,
        }
    }

    pub fn frustum(&self) -> Frustum {
        Frustum {
            planes: self.planes,
        }
    }

    pub fn viewer(&self) -> Vec3 {
        Vec3::new(
            self.viewer_position[0],
            self.viewer_position[1],
            self.viewer_position[2],
        )
    }

    pub fn cull(&self) -> CullSettings {
        CullSettings {
            min_distance: self.min_distance,
            max_distance: self.max_distance,
            lod_threshold: self.lod_threshold,
            lod_blend: self.lod_blend,
        }
    }
}

/// Indexed indirect draw record (20 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct DrawIndexedArgs {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
    pub first_instance: u32,
}

impl DrawIndexedArgs {
    /// Arguments for `mesh` with no instances yet.
    pub fn from_mesh(mesh: &LodMesh) -> Self {
        Self {
            index_count: mesh.index_count,
            instance_count: 0,
            first_index: mesh.first_index,
            base_vertex: mesh.base_vertex,
            first_instance: 0,
        }
    }
}

/// Size in bytes of an append list with room for `capacity` entries.
pub fn append_list_size(capacity: u32) -> u64 {
    APPEND_HEADER_SIZE + capacity as u64 * 4
}

/// Pad `vec3` bounds to the 16-byte storage stride.
pub fn pack_bounds(bounds: &[Vec3]) -> Vec<[f32; 4]> {
    bounds.iter().map(|v| v.extend(0.0).to_array()).collect()
}
