//! Light component

use bevy_ecs::prelude::*;
use glam::Vec3;

/// Light kind, written to the global uniform block as a `uint`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum LightKind {
    Directional = 0,
    Point = 1,
}

/// Light component. `direction` is only read for directional lights and
/// `position` only for point lights.
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct Light {
    pub kind: LightKind,
    pub color: Vec3,
    pub direction: Vec3,
    pub position: Vec3,
}

impl Light {
    /// Light arriving from `direction`, like the sun
    pub fn directional(direction: Vec3, color: Vec3) -> Self {
        Self {
            kind: LightKind::Directional,
            color,
            direction: direction.normalize_or_zero(),
            position: Vec3::ZERO,
        }
    }

    pub fn point(position: Vec3, color: Vec3) -> Self {
        Self {
            kind: LightKind::Point,
            color,
            direction: Vec3::ZERO,
            position,
        }
    }
}

/// Lights the lighting program can read from the global block
pub const MAX_LIGHTS: usize = 16;
