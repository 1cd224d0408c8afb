use glam::{Mat4, Vec3};

/// Perspective viewer that produces the matrices the streamer consumes each frame.
///
/// The streamer itself only needs `position` and `view_projection()`; the rest
/// is here so tools and tests can steer a viewer across the grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewerCamera {
    pub position: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for ViewerCamera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 2.0, 0.0),
            yaw: -90.0_f32.to_radians(),
            pitch: -10.0_f32.to_radians(),
            fov: 60.0_f32.to_radians(),
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 500.0,
        }
    }
}

impl ViewerCamera {
    /// Place the camera at `position` facing `target`.
    pub fn looking_at(position: Vec3, target: Vec3) -> Self {
        let mut camera = Self {
            position,
            ..Self::default()
        };
        camera.face(target);
        camera
    }

    /// Turn to face `target`. No-op when the target is the camera position.
    pub fn face(&mut self, target: Vec3) {
        let dir = target - self.position;
        if dir.length_squared() <= f32::EPSILON {
            return;
        }
        let dir = dir.normalize();
        self.yaw = dir.z.atan2(dir.x);
        self.pitch = dir
            .y
            .asin()
            .clamp(-89.0_f32.to_radians(), 89.0_f32.to_radians());
    }

    pub fn forward(&self) -> Vec3 {
        Vec3::new(
            self.yaw.cos() * self.pitch.cos(),
            self.pitch.sin(),
            self.yaw.sin() * self.pitch.cos(),
        )
        .normalize()
    }

    pub fn right(&self) -> Vec3 {
        self.forward().cross(Vec3::Y).normalize()
    }

    /// Move by a world-space offset without changing orientation.
    pub fn translate(&mut self, offset: Vec3) {
        self.position += offset;
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.position + self.forward(), Vec3::Y)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov, self.aspect, self.near, self.far)
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }
}
