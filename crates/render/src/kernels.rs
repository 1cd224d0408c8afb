//! CPU reference of the three culling kernels.
//!
//! The WGSL in `verdant-render-wgpu` computes exactly these functions; the
//! headless backend calls them directly.

use glam::{Mat4, Quat, Vec3};
use verdant_common::{Aabb, CullSettings, Frustum, GrassInstance};

/// World transform of one blade: translate, then rotate about +Y, then scale
/// with the horizontal factor on both X and Z.
pub fn instance_transform(blade: &GrassInstance) -> Mat4 {
    let [sx, sy] = blade.scale;
    Mat4::from_scale_rotation_translation(
        Vec3::new(sx, sy, sx),
        Quat::from_rotation_y(blade.angle_y.to_radians()),
        blade.position(),
    )
}

/// Frustum test of one division's bounds. Inverted (empty) bounds never pass.
pub fn division_visible(frustum: &Frustum, min: Vec3, max: Vec3) -> bool {
    frustum.intersects_aabb(&Aabb::new(min, max))
}

/// Which LOD lists a blade in a visible division goes into, as `(near, mid)`.
pub fn classify(blade: &GrassInstance, viewer: Vec3, cull: &CullSettings) -> (bool, bool) {
    let distance = blade.position().distance(viewer);
    if distance > cull.cutoff(blade.fade_distance) {
        return (false, false);
    }
    let half_blend = cull.lod_blend * 0.5;
    (
        distance < cull.lod_threshold + half_blend,
        distance >= cull.lod_threshold - half_blend,
    )
}
