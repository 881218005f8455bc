//! Look-at camera with a right-handed perspective projection

use glam::{Mat4, Vec3};

#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians
    pub fov_y: f32,
    /// Width over height
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    /// Above and behind the origin, looking at it with a 60 degree field of view
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 4.0, 15.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov_y: 60f32.to_radians(),
            aspect: 4.0 / 3.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Camera {
    /// Projection times view, mapping depth to 0..1
    pub fn view_projection_matrix(&self) -> Mat4 {
        let projection = Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far);
        projection * Mat4::look_at_rh(self.position, self.target, self.up)
    }

    /// Unit vector towards the target, zero when position and target coincide
    pub fn forward(&self) -> Vec3 {
        (self.target - self.position).normalize_or_zero()
    }

    /// Follow the display size. A zero height keeps the previous ratio.
    pub fn set_aspect(&mut self, width: f32, height: f32) {
        if height > 0.0 {
            self.aspect = width / height;
        }
    }
}
