//! Scene management
//!
//! Entities are stored in a bevy_ecs [`World`]. A drawable entity carries a
//! [`Transform`] and a [`ModelRef`]; the renderer attaches a [`LocalBlock`] every
//! frame with the location of its uniform block. Lights are entities with a
//! [`Light`] component.

mod camera;
mod camera_controller;
mod light;
mod transform;

pub use camera::*;
pub use camera_controller::*;
pub use light::*;
pub use transform::*;

use crate::pipeline::UniformBlock;
use crate::resources::ModelId;
use bevy_ecs::prelude::*;
use glam::Vec3;

/// Model drawn for an entity
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelRef(pub ModelId);

/// Where the entity's per-object uniform block was written, stamped with the
/// uniform stream frame that wrote it. Frame 0 means never written.
#[derive(Component, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalBlock {
    pub block: UniformBlock,
    pub frame: u64,
}

impl LocalBlock {
    /// The block, if it was written during `frame`
    pub fn written_in(&self, frame: u64) -> Option<UniformBlock> {
        (frame != 0 && self.frame == frame).then_some(self.block)
    }
}

/// The scene containing all renderable content
pub struct Scene {
    pub world: World,
    pub camera: Camera,
}

impl Scene {
    pub fn new() -> Self {
        Self {
            world: World::new(),
            camera: Camera::default(),
        }
    }

    /// Spawn a drawable entity
    pub fn add_entity(&mut self, model: ModelId, transform: Transform) -> Entity {
        self.world
            .spawn((transform, ModelRef(model), LocalBlock::default()))
            .id()
    }

    pub fn add_light(&mut self, light: Light) -> Entity {
        self.world.spawn(light).id()
    }

    pub fn add_directional_light(&mut self, direction: Vec3, color: Vec3) -> Entity {
        self.add_light(Light::directional(direction, color))
    }

    pub fn add_point_light(&mut self, position: Vec3, color: Vec3) -> Entity {
        self.add_light(Light::point(position, color))
    }

    /// Lights in spawn order
    pub fn lights(&mut self) -> Vec<Light> {
        let mut query = self.world.query::<(Entity, &Light)>();
        let mut lights: Vec<(Entity, Light)> = query.iter(&self.world).map(|(e, l)| (e, *l)).collect();
        lights.sort_by_key(|(entity, _)| *entity);
        lights.into_iter().map(|(_, light)| light).collect()
    }

    /// Drawable entities in spawn order
    pub fn entities(&mut self) -> Vec<Entity> {
        let mut query = self
            .world
            .query_filtered::<Entity, (With<Transform>, With<ModelRef>)>();
        let mut entities: Vec<Entity> = query.iter(&self.world).collect();
        entities.sort();
        entities
    }

    pub fn entity_count(&mut self) -> usize {
        self.entities().len()
    }

    /// Uniform block last written for `entity`, `None` before its first update
    pub fn local_block(&self, entity: Entity) -> Option<UniformBlock> {
        self.world
            .get::<LocalBlock>(entity)
            .filter(|local| local.frame != 0)
            .map(|local| local.block)
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entities_and_lights_in_spawn_order() {
        let mut scene = Scene::new();
        let a = scene.add_entity(ModelId(0), Transform::from_position(Vec3::X));
        scene.add_point_light(Vec3::Y, Vec3::ONE);
        let b = scene.add_entity(ModelId(1), Transform::default());
        scene.add_directional_light(Vec3::Y, Vec3::ONE);

        assert_eq!(scene.entities(), vec![a, b]);
        let lights = scene.lights();
        assert_eq!(lights.len(), 2);
        assert_eq!(lights[0].kind, LightKind::Point);
        assert_eq!(lights[1].kind, LightKind::Directional);
        assert_eq!(scene.local_block(a), None);
    }

    #[test]
    fn test_local_block_only_valid_for_its_frame() {
        let local = LocalBlock {
            block: UniformBlock::new(256, 128),
            frame: 3,
        };
        assert_eq!(local.written_in(3), Some(UniformBlock::new(256, 128)));
        assert_eq!(local.written_in(4), None);
        assert_eq!(LocalBlock::default().written_in(0), None);
    }
}
