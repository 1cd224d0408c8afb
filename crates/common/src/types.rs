use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use serde::{Deserialize, Serialize};

/// A 2D chunk coordinate in the streaming grid.
///
/// Valid chunks live in `[0, count_x) × [0, count_y)`; coordinates outside that
/// range are still representable so a viewer can stand off the grid.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct ChunkId {
    pub x: i32,
    pub y: i32,
}

impl ChunkId {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Manhattan distance in grid cells.
    pub fn manhattan_distance(self, other: ChunkId) -> u32 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }
}

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Lifecycle state of a chunk id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChunkState {
    /// Never requested.
    #[default]
    None,
    /// Queued for load or load in flight.
    Loading,
    /// Resident; buffers allocated unless the chunk is empty.
    Loaded,
    /// Buffers being released.
    Disposing,
    /// Released, or a load attempt ended without data. Retryable.
    Disposed,
}

impl ChunkState {
    /// States from which a new load may be requested.
    pub fn is_retryable(self) -> bool {
        matches!(self, ChunkState::None | ChunkState::Disposed)
    }
}

/// Axis-aligned bounding box in world space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// An inverted box that contains nothing and grows to fit the first point.
    pub fn empty() -> Self {
        Self {
            min: Vec3::splat(f32::MAX),
            max: Vec3::splat(f32::MIN),
        }
    }

    /// True when `min <= max` on every axis.
    pub fn is_valid(&self) -> bool {
        self.min.cmple(self.max).all()
    }

    /// Grow to include `point` padded by `pad` on every axis.
    pub fn grow(&mut self, point: Vec3, pad: f32) {
        self.min = self.min.min(point - Vec3::splat(pad));
        self.max = self.max.max(point + Vec3::splat(pad));
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn contains(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::new(Vec3::ZERO, Vec3::ZERO)
    }
}

/// One grass blade, exactly as stored on disk and uploaded to the GPU (32 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct GrassInstance {
    /// World-space root position.
    pub position: [f32; 3],
    /// Rotation around +Y in degrees.
    pub angle_y: f32,
    /// Horizontal (X and Z) and vertical scale.
    pub scale: [f32; 2],
    /// Fraction of the cull band this blade survives, in (0, 1).
    pub fade_distance: f32,
    /// Index of the division this blade belongs to.
    pub division_id: u32,
}

const _: () = assert!(std::mem::size_of::<GrassInstance>() == 32);

impl GrassInstance {
    pub const BYTE_SIZE: usize = std::mem::size_of::<GrassInstance>();

    pub fn position(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }
}

/// Distance culling and LOD parameters handed to the per-instance kernel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CullSettings {
    /// Distance at which the nearest-fading blades disappear.
    pub min_distance: f32,
    /// Distance beyond which no blade is drawn.
    pub max_distance: f32,
    /// Distance where blades switch from the near mesh to the mid mesh.
    pub lod_threshold: f32,
    /// Width of the band around `lod_threshold` where a blade goes into both lists.
    pub lod_blend: f32,
}

impl Default for CullSettings {
    fn default() -> Self {
        Self {
            min_distance: 40.0,
            max_distance: 120.0,
            lod_threshold: 25.0,
            lod_blend: 2.0,
        }
    }
}

impl CullSettings {
    /// Per-blade cull distance: blades fade out somewhere between min and max.
    pub fn cutoff(&self, fade_distance: f32) -> f32 {
        self.min_distance + (self.max_distance - self.min_distance) * fade_distance
    }
}

/// Index metadata of one LOD mesh, used to seed its indirect draw arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LodMesh {
    pub index_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
}
