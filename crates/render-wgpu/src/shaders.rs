//! WGSL compute kernels. One module per kernel so each pipeline's
//! automatic bind group layout only carries its own bindings.

/// Shared record declarations, prepended to every kernel.
const COMMON: &str = r#"
// 32-byte record; scalar fields keep the storage stride tight.
struct GrassInstance {
    position_x: f32,
    position_y: f32,
    position_z: f32,
    angle_y: f32,
    scale_x: f32,
    scale_y: f32,
    fade_distance: f32,
    division_id: u32,
};

struct FrustumPlane {
    normal: vec3<f32>,
    distance: f32,
};

struct FrameParams {
    planes: array<FrustumPlane, 6>,
    viewer_position: vec4<f32>,
    min_distance: f32,
    max_distance: f32,
    lod_threshold: f32,
    lod_blend: f32,
};

struct IndexList {
    count: atomic<u32>,
    indices: array<u32>,
};
"#;

const CONVERT_INSTANCES: &str = r#"
@group(0) @binding(0)
var<storage, read> instances: array<GrassInstance>;

@group(0) @binding(1)
var<storage, read_write> transforms: array<mat4x4<f32>>;

@compute @workgroup_size(64)
fn convert_instances(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if (i >= arrayLength(&instances) || i >= arrayLength(&transforms)) {
        return;
    }
    let blade = instances[i];
    let a = radians(blade.angle_y);
    let c = cos(a);
    let s = sin(a);
    let sx = blade.scale_x;
    let sy = blade.scale_y;
    transforms[i] = mat4x4<f32>(
        vec4<f32>(c * sx, 0.0, -s * sx, 0.0),
        vec4<f32>(0.0, sy, 0.0, 0.0),
        vec4<f32>(s * sx, 0.0, c * sx, 0.0),
        vec4<f32>(blade.position_x, blade.position_y, blade.position_z, 1.0),
    );
}
"#;

const CULL_DIVISIONS: &str = r#"
@group(0) @binding(0)
var<uniform> frame: FrameParams;

@group(0) @binding(1)
var<storage, read> bounds_min: array<vec4<f32>>;

@group(0) @binding(2)
var<storage, read> bounds_max: array<vec4<f32>>;

@group(0) @binding(3)
var<storage, read_write> results: array<u32>;

@compute @workgroup_size(64)
fn cull_divisions(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if (i >= arrayLength(&results) || i >= arrayLength(&bounds_min) || i >= arrayLength(&bounds_max)) {
        return;
    }
    let lo = bounds_min[i].xyz;
    let hi = bounds_max[i].xyz;
    var visible = 1u;
    for (var p = 0u; p < 6u; p = p + 1u) {
        let plane = frame.planes[p];
        // Corner furthest along the plane normal.
        let corner = select(lo, hi, plane.normal >= vec3<f32>(0.0));
        if (dot(plane.normal, corner) + plane.distance < 0.0) {
            visible = 0u;
        }
    }
    results[i] = visible;
}
"#;

const RESOLVE_INSTANCES: &str = r#"
@group(0) @binding(0)
var<uniform> frame: FrameParams;

@group(0) @binding(1)
var<storage, read> instances: array<GrassInstance>;

@group(0) @binding(2)
var<storage, read> division_results: array<u32>;

@group(0) @binding(3)
var<storage, read_write> near_list: IndexList;

@group(0) @binding(4)
var<storage, read_write> mid_list: IndexList;

fn push_near(index: u32) {
    let slot = atomicAdd(&near_list.count, 1u);
    if (slot < arrayLength(&near_list.indices)) {
        near_list.indices[slot] = index;
    }
}

fn push_mid(index: u32) {
    let slot = atomicAdd(&mid_list.count, 1u);
    if (slot < arrayLength(&mid_list.indices)) {
        mid_list.indices[slot] = index;
    }
}

@compute @workgroup_size(64)
fn resolve_instances(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if (i >= arrayLength(&instances)) {
        return;
    }
    let blade = instances[i];
    if (blade.division_id >= arrayLength(&division_results)) {
        return;
    }
    if (division_results[blade.division_id] == 0u) {
        return;
    }
    let position = vec3<f32>(blade.position_x, blade.position_y, blade.position_z);
    let d = distance(position, frame.viewer_position.xyz);
    let cutoff = frame.min_distance + (frame.max_distance - frame.min_distance) * blade.fade_distance;
    if (d > cutoff) {
        return;
    }
    let half_blend = frame.lod_blend * 0.5;
    if (d < frame.lod_threshold + half_blend) {
        push_near(i);
    }
    if (d >= frame.lod_threshold - half_blend) {
        push_mid(i);
    }
}
"#;

/// Full source of the instance conversion kernel.
pub fn convert_instances() -> String {
    format!("{COMMON}{CONVERT_INSTANCES}")
}

/// Full source of the division frustum-cull kernel.
pub fn cull_divisions() -> String {
    format!("{COMMON}{CULL_DIVISIONS}")
}

/// Full source of the per-instance distance and LOD kernel.
pub fn resolve_instances() -> String {
    format!("{COMMON}{RESOLVE_INSTANCES}")
}
