//! The device interface the renderer is written against.
//!
//! [`GraphicsBackend`] is implemented by the wgpu backend for on-screen rendering and
//! by the headless backend, which records what it is asked to do.

use crate::backend::types::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("no suitable GPU adapter")]
    NoAdapter,
    #[error("surface: {0}")]
    Surface(String),
    #[error("device request failed: {0}")]
    Device(String),
    #[error("surface lost")]
    SurfaceLost,
    #[error("out of GPU memory")]
    OutOfMemory,
    #[error("could not acquire swapchain image: {0}")]
    Acquire(String),
    #[error("texture: {0}")]
    Texture(String),
    #[error("shader: {0}")]
    Shader(String),
    #[error("pipeline: {0}")]
    Pipeline(String),
    #[error("no live {kind} with id {id}")]
    Missing { kind: &'static str, id: u64 },
}

pub type BackendResult<T> = Result<T, BackendError>;

macro_rules! handles {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            pub struct $name(pub(crate) u64);
        )*
    };
}

handles! {
    BufferHandle,
    TextureHandle,
    /// A mip range of a texture, or the swapchain image of the current frame
    TextureViewHandle,
    SamplerHandle,
    /// Linked vertex and fragment stages
    ProgramHandle,
    RenderPipelineHandle,
    BindGroupHandle,
    BindGroupLayoutHandle,
}

/// Resource bound at one binding of a bind group
#[derive(Debug, Clone, PartialEq)]
pub enum BindGroupEntry {
    /// `size: None` binds to the end of the buffer
    Buffer {
        buffer: BufferHandle,
        offset: u64,
        size: Option<u64>,
    },
    Texture(TextureViewHandle),
    Sampler(SamplerHandle),
}

/// Stages a binding is visible to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Vertex,
    Fragment,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingType {
    /// Uniform block whose sub-range is picked by an offset at bind time
    DynamicUniform,
    /// Filterable float texture
    Texture,
    Sampler,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindGroupLayoutEntry {
    pub binding: u32,
    pub visibility: Visibility,
    pub ty: BindingType,
}

/// Vertex and fragment GLSL, already composed for their stage
#[derive(Debug, Clone)]
pub struct ProgramDescriptor {
    pub label: Option<String>,
    pub vertex_source: String,
    pub fragment_source: String,
}

/// Triangle-list pipeline without culling
#[derive(Debug, Clone)]
pub struct RenderPipelineDescriptor {
    pub label: Option<String>,
    pub program: ProgramHandle,
    pub vertex_layout: VertexLayout,
    pub bind_group_layouts: Vec<BindGroupLayoutHandle>,
    pub color_formats: Vec<TextureFormat>,
    /// Applied to every color target
    pub blend: Option<Blend>,
    pub depth: Option<DepthState>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadOp {
    Clear([f32; 4]),
    Load,
}

#[derive(Debug, Clone)]
pub struct ColorAttachment {
    pub view: TextureViewHandle,
    pub load: LoadOp,
}

#[derive(Debug, Clone)]
pub struct DepthAttachment {
    pub view: TextureViewHandle,
    /// Depth to clear to; `None` keeps what the attachment holds
    pub clear: Option<f32>,
}

/// Attachments are always stored at the end of the pass
#[derive(Debug, Clone)]
pub struct RenderPassDescriptor {
    pub label: Option<String>,
    pub color_attachments: Vec<ColorAttachment>,
    pub depth_attachment: Option<DepthAttachment>,
}

/// The swapchain image acquired by [`GraphicsBackend::begin_frame`]
#[derive(Debug, Clone, Copy)]
pub struct FrameContext {
    pub swapchain_view: TextureViewHandle,
    pub width: u32,
    pub height: u32,
}

pub trait GraphicsBackend {
    /// Reconfigure the swapchain. Zero extents are ignored.
    fn resize(&mut self, width: u32, height: u32);

    /// Swapchain extent after clamping to device limits
    fn surface_size(&self) -> (u32, u32);

    fn begin_frame(&mut self) -> BackendResult<FrameContext>;

    /// Submit everything recorded since [`GraphicsBackend::begin_frame`] and present
    fn end_frame(&mut self) -> BackendResult<()>;

    fn swapchain_format(&self) -> TextureFormat;

    fn limits(&self) -> DeviceLimits;

    // Resources

    /// Zero-filled buffer
    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle>;

    /// Buffer sized to and filled with `data`; `desc.size` is ignored
    fn create_buffer_init(&mut self, desc: &BufferDescriptor, data: &[u8]) -> BackendResult<BufferHandle>;

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]);

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;

    fn create_texture_view(&mut self, texture: TextureHandle, mips: MipRange) -> BackendResult<TextureViewHandle>;

    /// Upload tightly packed RGBA8 texels to level 0
    fn write_texture(&mut self, texture: TextureHandle, data: &[u8], width: u32, height: u32);

    /// Fill levels 1.. by repeatedly downsampling the level above.
    /// Must not be called inside a render pass.
    fn generate_mipmaps(&mut self, texture: TextureHandle);

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle>;

    fn destroy_texture(&mut self, texture: TextureHandle);

    // Programs and pipelines

    fn create_bind_group_layout(&mut self, entries: &[BindGroupLayoutEntry]) -> BackendResult<BindGroupLayoutHandle>;

    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle>;

    /// Compile both stages. Compile errors come back as [`BackendError::Shader`].
    fn create_program(&mut self, desc: &ProgramDescriptor) -> BackendResult<ProgramHandle>;

    fn destroy_program(&mut self, program: ProgramHandle);

    fn create_render_pipeline(&mut self, desc: &RenderPipelineDescriptor) -> BackendResult<RenderPipelineHandle>;

    // Recording. Everything below is only valid between begin and end of a pass.

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor);

    fn end_render_pass(&mut self);

    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle);

    /// Bind a group, with one offset per dynamic uniform in it
    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle, dynamic_offsets: &[u32]);

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64);

    /// Bind 32-bit indices starting at byte `offset`
    fn set_index_buffer(&mut self, buffer: BufferHandle, offset: u64);

    /// Viewport in pixels, covering the full depth range
    fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32);

    /// One instance of `indices`, each offset by `base_vertex`
    fn draw_indexed(&mut self, indices: std::ops::Range<u32>, base_vertex: i32);
}
