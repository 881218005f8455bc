//! Headless recording backend
//!
//! Performs no GPU work. Handles are allocated from counters, buffer writes land in
//! host memory and every command is recorded so tests and tools can inspect exactly
//! what the renderer issued for a frame.

use crate::backend::traits::*;
use crate::backend::types::*;
use std::collections::{HashMap, HashSet};

/// A command recorded by [`HeadlessBackend`]
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    BeginRenderPass {
        label: Option<String>,
        color_views: Vec<TextureViewHandle>,
        color_loads: Vec<LoadOp>,
        depth_view: Option<TextureViewHandle>,
    },
    EndRenderPass,
    SetPipeline(RenderPipelineHandle),
    SetBindGroup {
        index: u32,
        bind_group: BindGroupHandle,
        dynamic_offsets: Vec<u32>,
    },
    SetVertexBuffer {
        slot: u32,
        buffer: BufferHandle,
        offset: u64,
    },
    SetIndexBuffer {
        buffer: BufferHandle,
        offset: u64,
    },
    SetViewport {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
    DrawIndexed {
        indices: std::ops::Range<u32>,
        base_vertex: i32,
    },
    GenerateMipmaps(TextureHandle),
}

/// Creation counters, useful for asserting that work was not repeated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreationStats {
    pub buffers: u32,
    pub textures: u32,
    pub texture_writes: u32,
    pub programs: u32,
    pub pipelines: u32,
    pub bind_groups: u32,
}

/// Backend that records instead of rendering
pub struct HeadlessBackend {
    width: u32,
    height: u32,
    limits: DeviceLimits,
    swapchain_format: TextureFormat,

    buffers: HashMap<u64, Vec<u8>>,
    textures: HashMap<u64, TextureDescriptor>,
    views: HashMap<u64, (TextureHandle, MipRange)>,
    programs: HashSet<u64>,
    pipelines: HashMap<u64, RenderPipelineDescriptor>,
    bind_groups: HashMap<u64, Vec<(u32, BindGroupEntry)>>,

    /// Texture creations left before they start failing, unlimited when `None`
    texture_budget: Option<u32>,
    next_id: u64,
    in_render_pass: bool,
    commands: Vec<RecordedCommand>,
    stats: CreationStats,
}

impl HeadlessBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_limits(width, height, DeviceLimits::default())
    }

    pub fn with_limits(width: u32, height: u32, limits: DeviceLimits) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            limits,
            swapchain_format: TextureFormat::Bgra8UnormSrgb,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            views: HashMap::new(),
            programs: HashSet::new(),
            pipelines: HashMap::new(),
            bind_groups: HashMap::new(),
            texture_budget: None,
            next_id: 1,
            in_render_pass: false,
            commands: Vec::new(),
            stats: CreationStats::default(),
        }
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn record(&mut self, command: RecordedCommand) {
        if self.in_render_pass {
            self.commands.push(command);
        } else {
            log::trace!("HeadlessBackend: dropping {:?} outside of a render pass", command);
        }
    }

    /// Commands recorded since the last [`HeadlessBackend::take_commands`]
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<RecordedCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn stats(&self) -> CreationStats {
        self.stats
    }

    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer.0).map(|b| b.as_slice())
    }

    /// Let the next `count` texture creations succeed and fail every one after
    pub fn fail_textures_after(&mut self, count: u32) {
        self.texture_budget = Some(count);
    }

    /// Textures created and not yet destroyed
    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn texture_descriptor(&self, texture: TextureHandle) -> Option<&TextureDescriptor> {
        self.textures.get(&texture.0)
    }

    /// Texture and mip range a view was created for
    pub fn view_target(&self, view: TextureViewHandle) -> Option<(TextureHandle, MipRange)> {
        self.views.get(&view.0).copied()
    }

    pub fn pipeline_descriptor(&self, pipeline: RenderPipelineHandle) -> Option<&RenderPipelineDescriptor> {
        self.pipelines.get(&pipeline.0)
    }

    pub fn bind_group_entries(&self, bind_group: BindGroupHandle) -> Option<&[(u32, BindGroupEntry)]> {
        self.bind_groups.get(&bind_group.0).map(|e| e.as_slice())
    }

    pub fn is_program_alive(&self, program: ProgramHandle) -> bool {
        self.programs.contains(&program.0)
    }
}

impl GraphicsBackend for HeadlessBackend {
    fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.width = width;
            self.height = height;
        }
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn begin_frame(&mut self) -> BackendResult<FrameContext> {
        let view = TextureViewHandle(self.allocate_id());
        Ok(FrameContext {
            swapchain_view: view,
            width: self.width,
            height: self.height,
        })
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        Ok(())
    }

    fn swapchain_format(&self) -> TextureFormat {
        self.swapchain_format
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        log::trace!("HeadlessBackend: creating buffer {:?} (size: {})", desc.label, desc.size);
        let id = self.allocate_id();
        self.buffers.insert(id, vec![0; desc.size as usize]);
        self.stats.buffers += 1;
        Ok(BufferHandle(id))
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        let handle = self.create_buffer(&BufferDescriptor {
            size: data.len() as u64,
            ..desc.clone()
        })?;
        self.write_buffer(handle, 0, data);
        Ok(handle)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        let Some(contents) = self.buffers.get_mut(&buffer.0) else {
            return;
        };
        let start = offset as usize;
        let end = start + data.len();
        if end > contents.len() {
            log::warn!("HeadlessBackend: write of {} bytes at {} overflows buffer", data.len(), offset);
            return;
        }
        contents[start..end].copy_from_slice(data);
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        log::trace!(
            "HeadlessBackend: creating texture {:?} ({}x{}, {} mips)",
            desc.label,
            desc.width,
            desc.height,
            desc.mip_levels
        );
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::Texture(format!("{:?} has a zero extent", desc.label)));
        }
        match &mut self.texture_budget {
            Some(0) => return Err(BackendError::OutOfMemory),
            Some(left) => *left -= 1,
            None => {}
        }
        let id = self.allocate_id();
        self.textures.insert(id, desc.clone());
        self.stats.textures += 1;
        Ok(TextureHandle(id))
    }

    fn create_texture_view(&mut self, texture: TextureHandle, mips: MipRange) -> BackendResult<TextureViewHandle> {
        let Some(desc) = self.textures.get(&texture.0) else {
            return Err(BackendError::Missing {
                kind: "texture",
                id: texture.0,
            });
        };
        if mips.base >= desc.mip_levels {
            return Err(BackendError::Texture(format!(
                "mip {} of {:?}, which has {}",
                mips.base, desc.label, desc.mip_levels
            )));
        }
        let id = self.allocate_id();
        self.views.insert(id, (texture, mips));
        Ok(TextureViewHandle(id))
    }

    fn write_texture(&mut self, texture: TextureHandle, _data: &[u8], _width: u32, _height: u32) {
        if self.textures.contains_key(&texture.0) {
            self.stats.texture_writes += 1;
        }
    }

    fn generate_mipmaps(&mut self, texture: TextureHandle) {
        if self.in_render_pass {
            log::warn!("HeadlessBackend: mipmap generation requested inside a render pass");
        }
        self.commands.push(RecordedCommand::GenerateMipmaps(texture));
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        log::trace!("HeadlessBackend: creating sampler {:?}", desc.label);
        Ok(SamplerHandle(self.allocate_id()))
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture.0);
        self.views.retain(|_, (t, _)| *t != texture);
    }

    fn create_bind_group_layout(
        &mut self,
        _entries: &[BindGroupLayoutEntry],
    ) -> BackendResult<BindGroupLayoutHandle> {
        Ok(BindGroupLayoutHandle(self.allocate_id()))
    }

    fn create_bind_group(
        &mut self,
        _layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle> {
        let id = self.allocate_id();
        self.bind_groups.insert(id, entries.to_vec());
        self.stats.bind_groups += 1;
        Ok(BindGroupHandle(id))
    }

    fn create_program(&mut self, desc: &ProgramDescriptor) -> BackendResult<ProgramHandle> {
        log::trace!("HeadlessBackend: creating program {:?}", desc.label);
        let id = self.allocate_id();
        self.programs.insert(id);
        self.stats.programs += 1;
        Ok(ProgramHandle(id))
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        self.programs.remove(&program.0);
    }

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle> {
        if !self.programs.contains(&desc.program.0) {
            return Err(BackendError::Missing {
                kind: "program",
                id: desc.program.0,
            });
        }
        let id = self.allocate_id();
        self.pipelines.insert(id, desc.clone());
        self.stats.pipelines += 1;
        Ok(RenderPipelineHandle(id))
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) {
        self.in_render_pass = true;
        self.commands.push(RecordedCommand::BeginRenderPass {
            label: desc.label.clone(),
            color_views: desc.color_attachments.iter().map(|a| a.view).collect(),
            color_loads: desc.color_attachments.iter().map(|a| a.load.clone()).collect(),
            depth_view: desc.depth_attachment.as_ref().map(|d| d.view),
        });
    }

    fn end_render_pass(&mut self) {
        if self.in_render_pass {
            self.commands.push(RecordedCommand::EndRenderPass);
        }
        self.in_render_pass = false;
    }

    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        self.record(RecordedCommand::SetPipeline(pipeline));
    }

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle, dynamic_offsets: &[u32]) {
        self.record(RecordedCommand::SetBindGroup {
            index,
            bind_group,
            dynamic_offsets: dynamic_offsets.to_vec(),
        });
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64) {
        self.record(RecordedCommand::SetVertexBuffer { slot, buffer, offset });
    }

    fn set_index_buffer(&mut self, buffer: BufferHandle, offset: u64) {
        self.record(RecordedCommand::SetIndexBuffer { buffer, offset });
    }

    fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32) {
        self.record(RecordedCommand::SetViewport { x, y, width, height });
    }

    fn draw_indexed(&mut self, indices: std::ops::Range<u32>, base_vertex: i32) {
        self.record(RecordedCommand::DrawIndexed { indices, base_vertex });
    }
}
