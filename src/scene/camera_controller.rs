//! Viewer-style camera control
//!
//! - Left mouse drag: orbit the camera and its reference point around a fixed center
//! - Right mouse held + WASD: move in the view direction / sideways
//! - Right mouse held + T/G: move up/down
//! - Shift: double speed

use glam::{Mat4, Vec2, Vec3};

use super::Camera;

/// Keys and mouse state collected from window events
#[derive(Debug, Clone, Default)]
pub struct CameraInput {
    /// Movement keys (WASD, TG for up/down)
    pub forward: bool,
    pub backward: bool,
    pub left: bool,
    pub right: bool,
    pub up: bool,
    pub down: bool,

    /// Sprint modifier (shift)
    pub sprint: bool,

    /// Mouse delta since last frame (in pixels)
    pub mouse_delta: Vec2,

    /// Left mouse button held
    pub orbit_active: bool,
    /// Right mouse button held
    pub move_active: bool,
}

impl CameraInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the accumulated mouse motion once a frame has consumed it
    pub fn reset_deltas(&mut self) {
        self.mouse_delta = Vec2::ZERO;
    }
}

/// Orbit-and-move viewer
pub struct ViewerController {
    /// Point the left-drag orbit rotates around
    pub rotation_center: Vec3,
    /// Movement speed in units per second
    pub move_speed: f32,
    /// Speed multiplier when sprinting
    pub sprint_multiplier: f32,
    /// Radians per pixel per second of mouse drag
    pub orbit_sensitivity: f32,
}

impl Default for ViewerController {
    fn default() -> Self {
        Self {
            rotation_center: Vec3::new(0.0, 0.0, -3.5),
            move_speed: 10.0,
            sprint_multiplier: 2.0,
            orbit_sensitivity: 0.5,
        }
    }
}

impl ViewerController {
    pub fn new() -> Self {
        Self::default()
    }

    fn orbit(&self, camera: &mut Camera, delta: Vec2, dt: f32) {
        let yaw = Mat4::from_axis_angle(Vec3::Y, -delta.x * self.orbit_sensitivity * dt);
        let pitch = Mat4::from_axis_angle(Vec3::X, -delta.y * self.orbit_sensitivity * dt);
        let transform = Mat4::from_translation(self.rotation_center)
            * yaw
            * pitch
            * Mat4::from_translation(-self.rotation_center);

        camera.position = transform.transform_point3(camera.position);
        camera.target = transform.transform_point3(camera.target);
    }

    /// Apply one frame of input, `dt` in seconds
    pub fn update(&mut self, camera: &mut Camera, input: &CameraInput, dt: f32) {
        let speed = if input.sprint {
            self.move_speed * self.sprint_multiplier
        } else {
            self.move_speed
        } * dt;

        if input.orbit_active && input.mouse_delta != Vec2::ZERO {
            self.orbit(camera, input.mouse_delta, dt);
        }

        if input.move_active {
            let forward = camera.forward();
            // Sideways on the XZ plane
            let right = Vec3::new(-forward.z, 0.0, forward.x);

            let mut offset = Vec3::ZERO;
            if input.forward {
                offset += forward;
            }
            if input.backward {
                offset -= forward;
            }
            if input.right {
                offset += right;
            }
            if input.left {
                offset -= right;
            }
            if input.up {
                offset += Vec3::Y;
            }
            if input.down {
                offset -= Vec3::Y;
            }

            camera.position += offset * speed;
            camera.target += offset * speed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_ignored_without_right_mouse() {
        let mut camera = Camera::default();
        let mut controller = ViewerController::new();
        let input = CameraInput {
            forward: true,
            ..Default::default()
        };
        controller.update(&mut camera, &input, 0.1);
        assert_eq!(camera.position, Vec3::new(0.0, 4.0, 15.0));
    }

    #[test]
    fn test_move_keeps_view_direction() {
        let mut camera = Camera::default();
        let before = camera.forward();
        let mut controller = ViewerController::new();
        let input = CameraInput {
            forward: true,
            up: true,
            sprint: true,
            move_active: true,
            ..Default::default()
        };
        controller.update(&mut camera, &input, 0.1);

        // 20 units per second for 0.1 s along forward, plus the same upward
        let expected = Vec3::new(0.0, 4.0, 15.0) + (before + Vec3::Y) * 2.0;
        assert!((camera.position - expected).length() < 1e-4);
        assert!((camera.forward() - before).length() < 1e-5);
    }

    #[test]
    fn test_orbit_keeps_distance_to_center() {
        let mut camera = Camera::default();
        let mut controller = ViewerController::new();
        let center = controller.rotation_center;
        let distance = camera.position.distance(center);
        let input = CameraInput {
            orbit_active: true,
            mouse_delta: Vec2::new(40.0, 0.0),
            ..Default::default()
        };
        controller.update(&mut camera, &input, 0.016);
        assert!((camera.position.distance(center) - distance).abs() < 1e-4);
        assert_ne!(camera.position, Vec3::new(0.0, 4.0, 15.0));
    }
}
