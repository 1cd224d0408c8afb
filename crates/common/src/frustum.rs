use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

use crate::FRUSTUM_PLANE_COUNT;
use crate::types::Aabb;

/// A plane as uploaded to the culling kernels (16 bytes).
///
/// A point `p` is on the inner side when `dot(normal, p) + distance >= 0`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct FrustumPlane {
    pub normal: [f32; 3],
    pub distance: f32,
}

impl FrustumPlane {
    /// Build from raw plane coefficients `(a, b, c, d)`, normalizing the normal.
    fn from_coefficients(v: Vec4) -> Self {
        let normal = v.truncate();
        let len = normal.length();
        let (normal, distance) = if len > f32::EPSILON {
            (normal / len, v.w / len)
        } else {
            (normal, v.w)
        };
        Self {
            normal: normal.to_array(),
            distance,
        }
    }

    pub fn signed_distance(&self, point: Vec3) -> f32 {
        Vec3::from_array(self.normal).dot(point) + self.distance
    }

    /// True when the box is entirely on the outer side of this plane.
    fn rejects(&self, bounds: &Aabb) -> bool {
        // Corner furthest along the normal.
        let n = Vec3::from_array(self.normal);
        let corner = Vec3::select(n.cmpge(Vec3::ZERO), bounds.max, bounds.min);
        self.signed_distance(corner) < 0.0
    }
}

/// The six clip planes of a view-projection matrix, normals pointing inward.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    pub planes: [FrustumPlane; FRUSTUM_PLANE_COUNT],
}

impl Frustum {
    /// Extract planes from a combined `projection * view` matrix with a
    /// `[0, 1]` clip-space depth range. Order: left, right, bottom, top, near, far.
    pub fn from_view_projection(view_projection: Mat4) -> Self {
        let r0 = view_projection.row(0);
        let r1 = view_projection.row(1);
        let r2 = view_projection.row(2);
        let r3 = view_projection.row(3);
        Self {
            planes: [
                FrustumPlane::from_coefficients(r3 + r0),
                FrustumPlane::from_coefficients(r3 - r0),
                FrustumPlane::from_coefficients(r3 + r1),
                FrustumPlane::from_coefficients(r3 - r1),
                FrustumPlane::from_coefficients(r2),
                FrustumPlane::from_coefficients(r3 - r2),
            ],
        }
    }

    /// Conservative box test: false only when some plane rejects the whole box.
    pub fn intersects_aabb(&self, bounds: &Aabb) -> bool {
        !self.planes.iter().any(|plane| plane.rejects(bounds))
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.signed_distance(point) >= 0.0)
    }
}
