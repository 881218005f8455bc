//! A deferred renderer with a mip-chain bloom.
//!
//! Each frame draws the scene into a five-attachment G-buffer, lights it with one
//! full-screen pass, optionally adds bloom built from five downsampled levels and
//! finally copies the attachment selected by the [`RenderMode`] to the window.
//! The forward mode shades the geometry directly and skips the lighting and bloom.
//!
//! All GPU work goes through [`backend::GraphicsBackend`]. [`WgpuBackend`] renders
//! to a winit window; [`backend::HeadlessBackend`] only records, which is what the
//! tests run against.
//!
//! Programs are compiled from one shared GLSL source and are rebuilt when that file
//! changes on disk, see [`DeferredRenderer::update`].

pub mod backend;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod resources;
pub mod scene;
pub mod window;

/// Scene entities live in a bevy_ecs world
pub use bevy_ecs;

pub use backend::wgpu_backend::WgpuBackend;
pub use engine::Engine;
pub use error::{RenderError, RenderResult};
pub use pipeline::{DeferredRenderer, RenderConfig, RenderMode};
pub use window::Window;

use std::path::PathBuf;

/// Startup options of the on-screen [`Engine`]
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub vsync: bool,
    /// Shared source of every program, watched for hot reload
    pub shader_path: PathBuf,
    /// Where scene textures are looked up. Missing files get generated stand-ins.
    pub asset_dir: PathBuf,
    pub render: RenderConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            title: "Deferred Renderer".to_string(),
            width: 800,
            height: 600,
            vsync: true,
            shader_path: PathBuf::from("shaders/shaders.glsl"),
            asset_dir: PathBuf::from("assets"),
            render: RenderConfig::default(),
        }
    }
}
