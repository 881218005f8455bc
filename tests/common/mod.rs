//! Shared setup for the renderer integration tests.
//!
//! Everything runs on the headless backend, so the recorded command stream and
//! host-side buffer contents can be inspected directly.

#![allow(dead_code)]

use deferred_engine::backend::{GraphicsBackend, HeadlessBackend, RecordedCommand};
use deferred_engine::pipeline::{DeferredRenderer, FrameStats, RenderConfig};
use deferred_engine::resources::{Geometry, Material, MeshBuilder, Model, ModelId, Registry};
use deferred_engine::scene::{Scene, Transform};
use glam::Vec3;
use std::path::{Path, PathBuf};

/// Shader source shipped with the crate
pub const SHADER_SOURCE: &str = include_str!("../../shaders/shaders.glsl");

pub fn shader_path() -> PathBuf {
    PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/shaders.glsl"))
}

/// Copy the shader source into `dir` so a test can edit it
pub fn copy_shaders(dir: &Path) -> PathBuf {
    let path = dir.join("shaders.glsl");
    std::fs::write(&path, SHADER_SOURCE).unwrap();
    path
}

/// Everything needed to drive the renderer without a window
pub struct TestRenderer {
    pub backend: HeadlessBackend,
    pub registry: Registry,
    pub scene: Scene,
    pub renderer: DeferredRenderer,
}

impl TestRenderer {
    pub fn new(width: u32, height: u32, config: RenderConfig) -> Self {
        Self::with_backend(HeadlessBackend::new(width, height), &shader_path(), config)
    }

    pub fn with_backend(backend: HeadlessBackend, shaders: &Path, config: RenderConfig) -> Self {
        let (width, height) = backend.surface_size();
        Self::sized(backend, shaders, width, height, config)
    }

    /// Renderer created while the window had no extent
    pub fn minimized(config: RenderConfig) -> Self {
        Self::sized(HeadlessBackend::new(800, 600), &shader_path(), 0, 0, config)
    }

    fn sized(mut backend: HeadlessBackend, shaders: &Path, width: u32, height: u32, config: RenderConfig) -> Self {
        let mut registry = Registry::new(&mut backend).unwrap();
        let scene = Scene::new();
        let renderer =
            DeferredRenderer::new(&mut backend, &mut registry, shaders, width, height, config).unwrap();
        Self {
            backend,
            registry,
            scene,
            renderer,
        }
    }

    /// Register a textured cube model
    pub fn add_cube_model(&mut self) -> ModelId {
        let albedo = self
            .registry
            .solid_color_texture(&mut self.backend, [200, 120, 40, 255])
            .unwrap();
        let mesh = MeshBuilder::new("cube")
            .add_geometry(&Geometry::cube())
            .build(&mut self.backend)
            .unwrap();
        let mesh = self.registry.add_mesh(mesh);
        let material = self.registry.add_material(Material::new("orange", albedo));
        self.registry.add_model(Model::new("cube", mesh, vec![material]))
    }

    /// One cube at the origin and one of each light kind
    pub fn populate(&mut self) {
        let cube = self.add_cube_model();
        self.scene.add_entity(cube, Transform::from_position(Vec3::ZERO));
        self.scene
            .add_directional_light(Vec3::new(-1.0, -1.0, 0.0), Vec3::ONE);
        self.scene
            .add_point_light(Vec3::new(0.0, 2.0, 2.0), Vec3::new(1.0, 0.5, 0.2));
    }

    pub fn update(&mut self) {
        self.renderer
            .update(&mut self.backend, &mut self.registry, &mut self.scene)
            .unwrap();
    }

    /// Update and render one frame, returning what it recorded
    pub fn frame(&mut self) -> (FrameStats, Vec<RecordedCommand>) {
        self.update();
        self.backend.take_commands();
        let frame = self.backend.begin_frame().unwrap();
        let stats = self
            .renderer
            .render(&mut self.backend, &mut self.registry, &mut self.scene, &frame)
            .unwrap();
        self.backend.end_frame().unwrap();
        (stats, self.backend.take_commands())
    }
}

/// Commands recorded inside the first render pass labelled `label`
pub fn pass_commands<'a>(commands: &'a [RecordedCommand], label: &str) -> &'a [RecordedCommand] {
    let begin = commands
        .iter()
        .position(|c| matches!(c, RecordedCommand::BeginRenderPass { label: Some(l), .. } if l == label))
        .unwrap_or_else(|| panic!("no render pass labelled {label}"));
    let end = commands[begin..]
        .iter()
        .position(|c| matches!(c, RecordedCommand::EndRenderPass))
        .map_or(commands.len(), |offset| begin + offset);
    &commands[begin + 1..end]
}

/// Labels of the render passes in recording order
pub fn pass_labels(commands: &[RecordedCommand]) -> Vec<String> {
    commands
        .iter()
        .filter_map(|command| match command {
            RecordedCommand::BeginRenderPass { label, .. } => label.clone(),
            _ => None,
        })
        .collect()
}
