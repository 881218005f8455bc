//! Deferred rendering pipeline
//!
//! One frame runs these passes:
//! 1. Geometry pass - entities rasterized into the G-buffer (or forward shaded)
//! 2. Lighting pass - fullscreen pass shading the G-buffer into the model attachment
//! 3. Bloom - bright pass, separable blur over a mip chain, additive recombination
//! 4. Present - the attachment selected by the render mode blitted to the swapchain

pub mod bindings;
pub mod framebuffer;
pub mod geometry_pass;
pub mod lighting_pass;
pub mod pipeline_cache;
pub mod postprocess;
pub mod renderer;
pub mod screen_quad;
pub mod uniform_stream;
pub mod vertex_binding;

pub use framebuffer::{slot, Attachment, Framebuffer, FramebufferStatus, GBuffer};
pub use geometry_pass::GeometryPass;
pub use lighting_pass::LightingPass;
pub use postprocess::{BloomChain, PresentPass, BLOOM_LEVELS};
pub use renderer::{DeferredRenderer, FrameBlocks, FrameStats, Programs};
pub use uniform_stream::{UniformBlock, UniformStream};
pub use vertex_binding::VertexBinding;

use std::fmt;

/// Which geometry path runs and which G-buffer attachment is presented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RenderMode {
    /// Single-pass forward shading into the model attachment
    ForwardRender,
    /// Deferred lighting result
    #[default]
    Model,
    Normals,
    Albedo,
    Depth,
    Position,
}

impl RenderMode {
    pub const ALL: [RenderMode; 6] = [
        RenderMode::ForwardRender,
        RenderMode::Model,
        RenderMode::Normals,
        RenderMode::Albedo,
        RenderMode::Depth,
        RenderMode::Position,
    ];

    /// The following mode, wrapping around after the last one
    pub fn next(self) -> Self {
        let index = Self::ALL.iter().position(|m| *m == self).unwrap_or(0);
        Self::ALL[(index + 1) % Self::ALL.len()]
    }

    /// G-buffer attachment presented in this mode
    pub fn slot(self) -> usize {
        match self {
            RenderMode::ForwardRender | RenderMode::Model => slot::MODEL,
            RenderMode::Normals => slot::NORMALS,
            RenderMode::Albedo => slot::ALBEDO,
            RenderMode::Depth => slot::DEPTH,
            RenderMode::Position => slot::POSITION,
        }
    }

    pub fn is_forward(self) -> bool {
        self == RenderMode::ForwardRender
    }

    /// Parse a mode from its display name, ignoring case
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.to_string().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for RenderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RenderMode::ForwardRender => "ForwardRender",
            RenderMode::Model => "Model",
            RenderMode::Normals => "Normals",
            RenderMode::Albedo => "Albedo",
            RenderMode::Depth => "Depth",
            RenderMode::Position => "Position",
        };
        f.write_str(name)
    }
}

/// Render options read by the renderer every frame
#[derive(Debug, Clone, PartialEq)]
pub struct RenderConfig {
    pub mode: RenderMode,
    /// Sample the material normal maps in the geometry pass
    pub normal_map_enabled: bool,
    pub bloom_enabled: bool,
    /// Blur samples on each side of the center texel
    pub kernel_radius: u32,
    /// Luminance a lit pixel must exceed to bloom
    pub bloom_threshold: f32,
    /// Recombination weight of each bloom level
    pub lod_intensity: [f32; BLOOM_LEVELS as usize],
    pub clear_color: [f32; 4],
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            mode: RenderMode::Model,
            normal_map_enabled: false,
            bloom_enabled: true,
            kernel_radius: 24,
            bloom_threshold: 0.8,
            lod_intensity: [1.0; BLOOM_LEVELS as usize],
            clear_color: [0.1, 0.1, 0.15, 1.0],
        }
    }
}

impl RenderConfig {
    /// Whether the bloom chain runs for the current mode
    pub fn bloom_active(&self) -> bool {
        self.bloom_enabled && !self.mode.is_forward()
    }
}
