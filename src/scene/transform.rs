use bevy_ecs::prelude::*;
use glam::{Mat4, Quat, Vec3};

/// Placement of a drawn entity. Applied as scale, then rotation, then translation.
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self::from_position_scale(Vec3::ZERO, Vec3::ONE)
    }
}

impl Transform {
    pub fn from_position(position: Vec3) -> Self {
        Self::from_position_scale(position, Vec3::ONE)
    }

    pub fn from_position_scale(position: Vec3, scale: Vec3) -> Self {
        Self {
            position,
            rotation: Quat::IDENTITY,
            scale,
        }
    }

    /// Model-to-world matrix
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }
}
