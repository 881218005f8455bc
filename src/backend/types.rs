//! Resource and fixed-function descriptions shared by every backend.
//!
//! These only cover what the deferred renderer asks of a device: 2D textures with a
//! mip chain, three kinds of buffers, interleaved float vertex data and a couple of
//! blend and depth configurations.

/// Pixel formats of textures and render targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgba16Float,
    Depth24Plus,
}

impl TextureFormat {
    pub fn is_depth(self) -> bool {
        self == TextureFormat::Depth24Plus
    }
}

/// What a texture is created for, which decides how the device may use it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureRole {
    /// Written by render passes, sampled by later ones
    RenderTarget,
    /// Uploaded from the host. Still renderable so its mip chain can be filled on the GPU.
    Asset,
}

#[derive(Debug, Clone)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub format: TextureFormat,
    pub role: TextureRole,
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            width: 1,
            height: 1,
            mip_levels: 1,
            format: TextureFormat::Rgba8Unorm,
            role: TextureRole::Asset,
        }
    }
}

impl TextureDescriptor {
    /// Extent of `level`, halved per level and never below one texel
    pub fn mip_size(&self, level: u32) -> (u32, u32) {
        ((self.width >> level).max(1), (self.height >> level).max(1))
    }
}

/// Mip levels exposed by a texture view
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MipRange {
    pub base: u32,
    /// `None` runs to the last level
    pub count: Option<u32>,
}

impl MipRange {
    pub const ALL: Self = Self { base: 0, count: None };

    pub fn level(level: u32) -> Self {
        Self {
            base: level,
            count: Some(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    Vertex,
    /// 32-bit indices
    Index,
    /// Rewritten from the host every frame
    Uniform,
}

#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    pub label: Option<String>,
    pub size: u64,
    pub kind: BufferKind,
}

/// Float vertex attribute with one to four components
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Float32,
    Float32x2,
    Float32x3,
    Float32x4,
}

impl VertexFormat {
    pub fn from_component_count(count: u8) -> Option<Self> {
        Some(match count {
            1 => VertexFormat::Float32,
            2 => VertexFormat::Float32x2,
            3 => VertexFormat::Float32x3,
            4 => VertexFormat::Float32x4,
            _ => return None,
        })
    }

    pub fn component_count(self) -> u8 {
        match self {
            VertexFormat::Float32 => 1,
            VertexFormat::Float32x2 => 2,
            VertexFormat::Float32x3 => 3,
            VertexFormat::Float32x4 => 4,
        }
    }

    /// Size in bytes
    pub fn size(self) -> u64 {
        u64::from(self.component_count()) * 4
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: VertexFormat,
    /// Byte offset from the start of the bound buffer range
    pub offset: u64,
}

/// Interleaved per-vertex data read from a single buffer
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexLayout {
    pub stride: u64,
    pub attributes: Vec<VertexAttribute>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareFunction {
    Less,
    LessEqual,
    Greater,
    Always,
}

/// Depth test of a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthState {
    pub format: TextureFormat,
    pub write: bool,
    pub compare: CompareFunction,
}

/// How a pipeline's output combines with what the target already holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Blend {
    /// Source over destination by source alpha
    Alpha,
    /// Color summed, destination alpha untouched
    Additive,
}

/// Samplers filter linearly across texels and mips and clamp to the edge
#[derive(Debug, Clone, Default)]
pub struct SamplerDescriptor {
    pub label: Option<String>,
}

/// Device limits the uniform stream is sized from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Dynamic uniform offsets must be multiples of this
    pub min_uniform_buffer_offset_alignment: u32,
    pub max_uniform_buffer_binding_size: u32,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            min_uniform_buffer_offset_alignment: 256,
            max_uniform_buffer_binding_size: 64 << 10,
        }
    }
}
