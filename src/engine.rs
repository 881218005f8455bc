//! Main engine orchestrator
//!
//! Owns the backend, the registry, the scene and the renderer, loads the fixed
//! demo scene and turns window input into camera movement and render options.
//!
//! Controls:
//! - Left mouse drag: orbit
//! - Right mouse + W/S/A/D: move, T/G: up/down, Shift: double speed
//! - M: next render mode, B: toggle bloom, N: toggle normal maps

use crate::backend::wgpu_backend::WgpuBackend;
use crate::backend::GraphicsBackend;
use crate::error::RenderResult;
use crate::pipeline::renderer::FrameStats;
use crate::pipeline::DeferredRenderer;
use crate::resources::{
    checkerboard_image, solid_color_image, Geometry, Material, MeshBuilder, Model, ModelId, Registry, TextureId,
};
use crate::scene::{CameraInput, Scene, Transform, ViewerController};
use crate::EngineConfig;
use glam::{Mat4, Quat, Vec2, Vec3};
use image::RgbaImage;
use std::path::Path;
use std::sync::Arc;
use winit::event::{ElementState, MouseButton, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::Window as WinitWindow;

/// Models of the demo scene
#[derive(Debug, Clone, Copy)]
pub struct DemoModels {
    pub patrick: ModelId,
    pub ground: ModelId,
    pub crate_box: ModelId,
    pub light_marker: ModelId,
}

pub const PATRICK_POSITIONS: [Vec3; 3] = [
    Vec3::new(-5.0, 1.0, 5.0),
    Vec3::new(2.5, 1.0, 2.0),
    Vec3::new(2.0, 2.0, -2.0),
];

pub const POINT_LIGHT_POSITIONS: [Vec3; 3] = [
    Vec3::new(-1.0, 1.0, -5.0),
    Vec3::new(6.0, 1.0, 0.0),
    Vec3::new(0.0, 1.0, 7.0),
];

/// Load a texture from the asset directory, or register `fallback` under a
/// pseudo path when the file is missing or cannot be decoded
fn texture_or(
    backend: &mut dyn GraphicsBackend,
    registry: &mut Registry,
    asset_dir: &Path,
    file: &str,
    fallback: RgbaImage,
) -> RenderResult<TextureId> {
    let path = asset_dir.join(file);
    if path.exists() {
        if let Some(id) = registry.load_texture(backend, &path) {
            return Ok(id);
        }
    }
    log::debug!("Using a generated texture for {}", file);
    registry.add_texture(backend, &format!("generated:{}", file), &fallback)
}

/// Populate `scene` with the fixed demo content: three composite figures, a
/// ground plane, a box, three light markers and five lights
pub fn load_demo_scene(
    backend: &mut dyn GraphicsBackend,
    registry: &mut Registry,
    scene: &mut Scene,
    asset_dir: &Path,
) -> RenderResult<DemoModels> {
    // Figure: a stretched sphere body over a box of shorts, one material each
    let skin = texture_or(backend, registry, asset_dir, "patrick.png", solid_color_image([240, 150, 160, 255]))?;
    let shorts = texture_or(backend, registry, asset_dir, "shorts.png", solid_color_image([90, 170, 60, 255]))?;
    let body = Geometry::sphere(24, 16).transformed(Mat4::from_scale_rotation_translation(
        Vec3::new(1.4, 2.2, 1.2),
        Quat::IDENTITY,
        Vec3::new(0.0, 0.6, 0.0),
    ));
    let legs = Geometry::cube().transformed(Mat4::from_scale_rotation_translation(
        Vec3::new(1.3, 0.6, 1.0),
        Quat::IDENTITY,
        Vec3::new(0.0, -0.6, 0.0),
    ));
    let mesh = MeshBuilder::new("Patrick")
        .add_geometry(&body)
        .add_geometry(&legs)
        .build(backend)?;
    let mesh = registry.add_mesh(mesh);
    let skin = registry.add_material(Material::new("Skin", skin));
    let shorts = registry.add_material(Material::new("Shorts", shorts));
    let patrick = registry.add_model(Model::new("Patrick", mesh, vec![skin, shorts]));

    let ground_texture = texture_or(
        backend,
        registry,
        asset_dir,
        "ground.png",
        checkerboard_image(64, [200, 190, 150, 255], [160, 150, 110, 255]),
    )?;
    let mesh = MeshBuilder::new("Ground")
        .add_geometry(&Geometry::plane(20.0, 20.0, 8))
        .build(backend)?;
    let mesh = registry.add_mesh(mesh);
    let material = registry.add_material(Material::new("Ground", ground_texture));
    let ground = registry.add_model(Model::new("Ground", mesh, vec![material]));

    let crate_texture = texture_or(
        backend,
        registry,
        asset_dir,
        "crate.png",
        checkerboard_image(64, [150, 110, 60, 255], [120, 85, 45, 255]),
    )?;
    let crate_normals = texture_or(
        backend,
        registry,
        asset_dir,
        "crate_normal.png",
        solid_color_image([128, 128, 255, 255]),
    )?;
    let mesh = MeshBuilder::new("Crate")
        .add_geometry(&Geometry::cube())
        .build(backend)?;
    let mesh = registry.add_mesh(mesh);
    let material = registry.add_material(Material::new("Crate", crate_texture).with_normal_map(crate_normals));
    let crate_box = registry.add_model(Model::new("Crate", mesh, vec![material]));

    let white = registry.solid_color_texture(backend, [255, 255, 255, 255])?;
    let mesh = MeshBuilder::new("Light Marker")
        .add_geometry(&Geometry::sphere(12, 8))
        .build(backend)?;
    let mesh = registry.add_mesh(mesh);
    let material = registry.add_material(Material::new("Light Marker", white));
    let light_marker = registry.add_model(Model::new("Light Marker", mesh, vec![material]));

    for position in PATRICK_POSITIONS {
        scene.add_entity(patrick, Transform::from_position(position));
    }
    scene.add_entity(ground, Transform::from_position(Vec3::new(0.0, -2.5, 0.0)));
    scene.add_entity(crate_box, Transform::from_position_scale(Vec3::new(0.0, 5.0, 0.0), Vec3::splat(2.0)));
    for position in POINT_LIGHT_POSITIONS {
        scene.add_entity(light_marker, Transform::from_position_scale(position, Vec3::splat(0.3)));
    }

    scene.add_directional_light(Vec3::new(0.0, 1.0, 0.0), Vec3::ONE);
    scene.add_directional_light(Vec3::new(-1.0, 0.0, 1.0), Vec3::ONE);
    for position in POINT_LIGHT_POSITIONS {
        scene.add_point_light(position, Vec3::ONE);
    }

    Ok(DemoModels {
        patrick,
        ground,
        crate_box,
        light_marker,
    })
}

/// The main engine
pub struct Engine<B: GraphicsBackend = WgpuBackend> {
    backend: B,
    registry: Registry,
    scene: Scene,
    renderer: DeferredRenderer,
    models: DemoModels,
    controller: ViewerController,
    input: CameraInput,
    cursor: Option<Vec2>,
    width: u32,
    height: u32,
    config: EngineConfig,
    frames: u64,
}

impl Engine<WgpuBackend> {
    /// Create the engine on a wgpu surface of `window`
    pub fn new(window: Arc<WinitWindow>, config: EngineConfig) -> RenderResult<Self> {
        let backend = WgpuBackend::new(window, config.vsync)?;
        Self::with_backend(backend, config)
    }
}

impl<B: GraphicsBackend> Engine<B> {
    /// Create the engine on an initialized backend and load the demo scene
    pub fn with_backend(mut backend: B, config: EngineConfig) -> RenderResult<Self> {
        let (width, height) = backend.surface_size();
        let width = width.max(1);
        let height = height.max(1);

        let mut registry = Registry::new(&mut backend)?;
        let mut scene = Scene::new();
        scene.camera.set_aspect(width as f32, height as f32);
        let models = load_demo_scene(&mut backend, &mut registry, &mut scene, &config.asset_dir)?;
        let renderer = DeferredRenderer::new(
            &mut backend,
            &mut registry,
            &config.shader_path,
            width,
            height,
            config.render.clone(),
        )?;

        log::info!(
            "Scene loaded: {} entities, {} lights",
            scene.entity_count(),
            scene.lights().len()
        );

        Ok(Self {
            backend,
            registry,
            scene,
            renderer,
            models,
            controller: ViewerController::new(),
            input: CameraInput::new(),
            cursor: None,
            width,
            height,
            config,
            frames: 0,
        })
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn renderer(&self) -> &DeferredRenderer {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut DeferredRenderer {
        &mut self.renderer
    }

    pub fn models(&self) -> &DemoModels {
        &self.models
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Get current dimensions
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Frames rendered so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Apply a key press or release
    pub fn handle_key(&mut self, key: KeyCode, pressed: bool) {
        match key {
            KeyCode::KeyW => self.input.forward = pressed,
            KeyCode::KeyS => self.input.backward = pressed,
            KeyCode::KeyA => self.input.left = pressed,
            KeyCode::KeyD => self.input.right = pressed,
            KeyCode::KeyT => self.input.up = pressed,
            KeyCode::KeyG => self.input.down = pressed,
            KeyCode::ShiftLeft | KeyCode::ShiftRight => self.input.sprint = pressed,
            KeyCode::KeyM if pressed => {
                let config = self.renderer.config_mut();
                config.mode = config.mode.next();
                log::info!("Render mode: {}", config.mode);
            }
            KeyCode::KeyB if pressed => {
                let config = self.renderer.config_mut();
                config.bloom_enabled = !config.bloom_enabled;
                log::info!("Bloom: {}", config.bloom_enabled);
            }
            KeyCode::KeyN if pressed => {
                let config = self.renderer.config_mut();
                config.normal_map_enabled = !config.normal_map_enabled;
                log::info!("Normal maps: {}", config.normal_map_enabled);
            }
            _ => {}
        }
    }

    pub fn handle_mouse_button(&mut self, button: MouseButton, pressed: bool) {
        match button {
            MouseButton::Left => self.input.orbit_active = pressed,
            MouseButton::Right => self.input.move_active = pressed,
            _ => {}
        }
    }

    /// Accumulate the cursor movement since the last position
    pub fn handle_cursor(&mut self, position: Vec2) {
        if let Some(last) = self.cursor {
            self.input.mouse_delta += position - last;
        }
        self.cursor = Some(position);
    }

    /// Translate a winit window event into input state
    pub fn handle_window_event(&mut self, event: &WindowEvent) -> RenderResult<()> {
        match event {
            WindowEvent::KeyboardInput { event, .. } if !event.repeat => {
                if let PhysicalKey::Code(key) = event.physical_key {
                    self.handle_key(key, event.state == ElementState::Pressed);
                }
            }
            WindowEvent::MouseInput { state, button, .. } => {
                self.handle_mouse_button(*button, *state == ElementState::Pressed);
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.handle_cursor(Vec2::new(position.x as f32, position.y as f32));
            }
            WindowEvent::CursorLeft { .. } => self.cursor = None,
            WindowEvent::Resized(size) => self.resize(size.width, size.height)?,
            _ => {}
        }
        Ok(())
    }

    /// Handle window resize
    pub fn resize(&mut self, width: u32, height: u32) -> RenderResult<()> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        self.backend.resize(width, height);

        // The surface may be clamped by device limits
        let (actual_width, actual_height) = self.backend.surface_size();
        if (actual_width, actual_height) == (self.width, self.height) {
            return Ok(());
        }
        self.width = actual_width;
        self.height = actual_height;
        self.scene
            .camera
            .set_aspect(actual_width as f32, actual_height as f32);
        self.renderer
            .resize(&mut self.backend, actual_width, actual_height)
    }

    /// Move the camera, reload changed programs and write this frame's uniforms
    pub fn update(&mut self, dt: f32) -> RenderResult<()> {
        self.controller.update(&mut self.scene.camera, &self.input, dt);
        self.input.reset_deltas();
        self.renderer
            .update(&mut self.backend, &mut self.registry, &mut self.scene)
    }

    /// Render and present one frame
    pub fn render(&mut self) -> RenderResult<FrameStats> {
        let frame = self.backend.begin_frame()?;
        let result = self
            .renderer
            .render(&mut self.backend, &mut self.registry, &mut self.scene, &frame);
        self.backend.end_frame()?;
        self.frames += 1;
        result
    }
}
