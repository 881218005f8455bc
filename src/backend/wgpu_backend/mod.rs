//! On-screen backend on top of wgpu.
//!
//! Programs are GLSL compiled through naga. Validation errors from shader and pipeline
//! creation are caught with error scopes and returned, since a broken shader is an
//! expected state while editing with hot reload.

mod convert;
mod mipmap;
mod pass;

use crate::backend::traits::*;
use crate::backend::types::*;
use mipmap::MipGenerator;
use pass::{PassCommand, RecordedPass};
use std::collections::HashMap;
use std::sync::Arc;
use wgpu::util::DeviceExt;

struct Program {
    vertex: wgpu::ShaderModule,
    fragment: wgpu::ShaderModule,
}

/// Every object handed out as a handle, keyed by the handle's id
#[derive(Default)]
pub(super) struct DeviceObjects {
    next_id: u64,
    buffers: HashMap<u64, wgpu::Buffer>,
    textures: HashMap<u64, wgpu::Texture>,
    views: HashMap<u64, wgpu::TextureView>,
    /// Views to drop along with their texture
    texture_views: HashMap<u64, Vec<u64>>,
    samplers: HashMap<u64, wgpu::Sampler>,
    layouts: HashMap<u64, wgpu::BindGroupLayout>,
    bind_groups: HashMap<u64, wgpu::BindGroup>,
    programs: HashMap<u64, Program>,
    pipelines: HashMap<u64, wgpu::RenderPipeline>,
}

impl DeviceObjects {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// The acquired swapchain image and the encoder collecting the frame's work
struct Frame {
    surface_texture: wgpu::SurfaceTexture,
    view_id: u64,
    encoder: wgpu::CommandEncoder,
}

pub struct WgpuBackend {
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    swapchain_format: TextureFormat,
    objects: DeviceObjects,
    mips: MipGenerator,
    frame: Option<Frame>,
    pass: Option<RecordedPass>,
}

/// Largest extent with the same aspect ratio that fits in `max` on both axes
fn fit_to_limit(width: u32, height: u32, max: u32) -> (u32, u32) {
    if width <= max && height <= max {
        return (width.max(1), height.max(1));
    }
    let scale = (max as f32 / width as f32).min(max as f32 / height as f32);
    (
        ((width as f32 * scale) as u32).clamp(1, max),
        ((height as f32 * scale) as u32).clamp(1, max),
    )
}

impl WgpuBackend {
    /// Blocks on adapter and device creation
    pub fn new(window: Arc<winit::window::Window>, vsync: bool) -> BackendResult<Self> {
        pollster::block_on(Self::new_async(window, vsync))
    }

    /// `WGPU_BACKEND` and `WGPU_ADAPTER_NAME` override the adapter choice
    pub async fn new_async(window: Arc<winit::window::Window>, vsync: bool) -> BackendResult<Self> {
        let size = window.inner_size();
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::util::backend_bits_from_env().unwrap_or(wgpu::Backends::PRIMARY),
            ..Default::default()
        });
        let surface = instance
            .create_surface(window)
            .map_err(|e| BackendError::Surface(e.to_string()))?;
        let adapter = wgpu::util::initialize_adapter_from_env_or_default(&instance, Some(&surface))
            .await
            .ok_or(BackendError::NoAdapter)?;

        let info = adapter.get_info();
        log::info!("Selected GPU: {} ({:?} backend)", info.name, info.backend);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Deferred Renderer Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .map_err(|e| BackendError::Device(e.to_string()))?;

        let caps = surface.get_capabilities(&adapter);
        let (format, swapchain_format) = caps
            .formats
            .iter()
            .filter_map(|format| convert::surface_format(*format).map(|ours| (*format, ours)))
            .max_by_key(|(format, _)| format.is_srgb())
            .ok_or_else(|| BackendError::Surface(format!("no supported format among {:?}", caps.formats)))?;

        let (width, height) = fit_to_limit(size.width, size.height, device.limits().max_texture_dimension_2d);
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width,
            height,
            present_mode: if vsync {
                wgpu::PresentMode::AutoVsync
            } else {
                wgpu::PresentMode::AutoNoVsync
            },
            alpha_mode: caps.alpha_modes.first().copied().unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: Vec::new(),
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);
        log::debug!("Configured {}x{} {:?} swapchain", width, height, format);

        let mips = MipGenerator::new(&device);
        Ok(Self {
            surface,
            device,
            queue,
            config,
            swapchain_format,
            objects: DeviceObjects::default(),
            mips,
            frame: None,
            pass: None,
        })
    }

    fn compile(&self, label: Option<&str>, source: &str, stage: wgpu::naga::ShaderStage) -> wgpu::ShaderModule {
        self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label,
            source: wgpu::ShaderSource::Glsl {
                shader: source.into(),
                stage,
                defines: Default::default(),
            },
        })
    }

    /// Run `create` inside a validation error scope
    fn validated<T>(&self, create: impl FnOnce(&Self) -> T) -> Result<T, wgpu::Error> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = create(self);
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(error) => Err(error),
            None => Ok(value),
        }
    }

    fn record(&mut self, command: PassCommand) {
        match self.pass.as_mut() {
            Some(pass) => pass.commands.push(command),
            None => log::warn!("Dropping {:?} recorded outside a render pass", command),
        }
    }

    fn insert_buffer(&mut self, buffer: wgpu::Buffer) -> BufferHandle {
        let id = self.objects.allocate_id();
        self.objects.buffers.insert(id, buffer);
        BufferHandle(id)
    }
}

impl GraphicsBackend for WgpuBackend {
    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        let (width, height) = fit_to_limit(width, height, self.device.limits().max_texture_dimension_2d);
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(&self.device, &self.config);
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    fn begin_frame(&mut self) -> BackendResult<FrameContext> {
        let surface_texture = self.surface.get_current_texture().map_err(|e| match e {
            wgpu::SurfaceError::Lost => BackendError::SurfaceLost,
            wgpu::SurfaceError::OutOfMemory => BackendError::OutOfMemory,
            other => BackendError::Acquire(other.to_string()),
        })?;

        let view_id = self.objects.allocate_id();
        let view = surface_texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        self.objects.views.insert(view_id, view);

        let encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Frame Encoder"),
        });
        self.frame = Some(Frame {
            surface_texture,
            view_id,
            encoder,
        });

        Ok(FrameContext {
            swapchain_view: TextureViewHandle(view_id),
            width: self.config.width,
            height: self.config.height,
        })
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        if self.pass.is_some() {
            log::warn!("Frame ended inside a render pass, closing it");
            self.end_render_pass();
        }
        if let Some(frame) = self.frame.take() {
            self.queue.submit(std::iter::once(frame.encoder.finish()));
            self.objects.views.remove(&frame.view_id);
            frame.surface_texture.present();
        }
        Ok(())
    }

    fn swapchain_format(&self) -> TextureFormat {
        self.swapchain_format
    }

    fn limits(&self) -> DeviceLimits {
        let limits = self.device.limits();
        DeviceLimits {
            min_uniform_buffer_offset_alignment: limits.min_uniform_buffer_offset_alignment,
            max_uniform_buffer_binding_size: limits.max_uniform_buffer_binding_size,
        }
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: desc.label.as_deref(),
            size: desc.size,
            usage: desc.kind.into(),
            mapped_at_creation: false,
        });
        Ok(self.insert_buffer(buffer))
    }

    fn create_buffer_init(&mut self, desc: &BufferDescriptor, data: &[u8]) -> BackendResult<BufferHandle> {
        let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: desc.label.as_deref(),
            contents: data,
            usage: desc.kind.into(),
        });
        Ok(self.insert_buffer(buffer))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        match self.objects.buffers.get(&buffer.0) {
            Some(target) => self.queue.write_buffer(target, offset, data),
            None => log::warn!("Write to destroyed buffer {}", buffer.0),
        }
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        let texture = self
            .validated(|backend| {
                backend.device.create_texture(&wgpu::TextureDescriptor {
                    label: desc.label.as_deref(),
                    size: wgpu::Extent3d {
                        width: desc.width,
                        height: desc.height,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: desc.mip_levels,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: desc.format.into(),
                    usage: desc.role.into(),
                    view_formats: &[],
                })
            })
            .map_err(|e| BackendError::Texture(e.to_string()))?;

        let id = self.objects.allocate_id();
        self.objects.textures.insert(id, texture);
        Ok(TextureHandle(id))
    }

    fn create_texture_view(&mut self, texture: TextureHandle, mips: MipRange) -> BackendResult<TextureViewHandle> {
        let source = self.objects.textures.get(&texture.0).ok_or(BackendError::Missing {
            kind: "texture",
            id: texture.0,
        })?;
        if mips.base >= source.mip_level_count() {
            return Err(BackendError::Texture(format!(
                "mip {} of a texture with {} levels",
                mips.base,
                source.mip_level_count()
            )));
        }
        let view = source.create_view(&wgpu::TextureViewDescriptor {
            base_mip_level: mips.base,
            mip_level_count: mips.count,
            ..Default::default()
        });

        let id = self.objects.allocate_id();
        self.objects.views.insert(id, view);
        self.objects.texture_views.entry(texture.0).or_default().push(id);
        Ok(TextureViewHandle(id))
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8], width: u32, height: u32) {
        let Some(target) = self.objects.textures.get(&texture.0) else {
            log::warn!("Upload to destroyed texture {}", texture.0);
            return;
        };
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: target,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn generate_mipmaps(&mut self, texture: TextureHandle) {
        let Some(target) = self.objects.textures.get(&texture.0) else {
            return;
        };
        // Within a frame the downsample passes are ordered with the frame's other work
        match self.frame.as_mut() {
            Some(frame) => self.mips.generate(&self.device, &mut frame.encoder, target),
            None => {
                let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Mip Encoder"),
                });
                self.mips.generate(&self.device, &mut encoder, target);
                self.queue.submit(std::iter::once(encoder.finish()));
            }
        }
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        let sampler = self.device.create_sampler(&convert::sampler_descriptor(desc));
        let id = self.objects.allocate_id();
        self.objects.samplers.insert(id, sampler);
        Ok(SamplerHandle(id))
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        for view in self.objects.texture_views.remove(&texture.0).unwrap_or_default() {
            self.objects.views.remove(&view);
        }
        if let Some(texture) = self.objects.textures.remove(&texture.0) {
            texture.destroy();
        }
    }

    fn create_bind_group_layout(&mut self, entries: &[BindGroupLayoutEntry]) -> BackendResult<BindGroupLayoutHandle> {
        let entries: Vec<wgpu::BindGroupLayoutEntry> = entries
            .iter()
            .map(|entry| wgpu::BindGroupLayoutEntry {
                binding: entry.binding,
                visibility: entry.visibility.into(),
                ty: entry.ty.into(),
                count: None,
            })
            .collect();
        let layout = self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: None,
            entries: &entries,
        });

        let id = self.objects.allocate_id();
        self.objects.layouts.insert(id, layout);
        Ok(BindGroupLayoutHandle(id))
    }

    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle> {
        let objects = &self.objects;
        let missing = |kind: &'static str, id: u64| BackendError::Missing { kind, id };

        let layout = objects
            .layouts
            .get(&layout.0)
            .ok_or_else(|| missing("bind group layout", layout.0))?;
        let entries = entries
            .iter()
            .map(|(binding, entry)| {
                let resource = match entry {
                    BindGroupEntry::Buffer { buffer, offset, size } => {
                        wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                            buffer: objects.buffers.get(&buffer.0).ok_or_else(|| missing("buffer", buffer.0))?,
                            offset: *offset,
                            size: size.and_then(wgpu::BufferSize::new),
                        })
                    }
                    BindGroupEntry::Texture(view) => wgpu::BindingResource::TextureView(
                        objects.views.get(&view.0).ok_or_else(|| missing("texture view", view.0))?,
                    ),
                    BindGroupEntry::Sampler(sampler) => wgpu::BindingResource::Sampler(
                        objects.samplers.get(&sampler.0).ok_or_else(|| missing("sampler", sampler.0))?,
                    ),
                };
                Ok(wgpu::BindGroupEntry {
                    binding: *binding,
                    resource,
                })
            })
            .collect::<BackendResult<Vec<_>>>()?;

        let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout,
            entries: &entries,
        });
        let id = self.objects.allocate_id();
        self.objects.bind_groups.insert(id, group);
        Ok(BindGroupHandle(id))
    }

    fn create_program(&mut self, desc: &ProgramDescriptor) -> BackendResult<ProgramHandle> {
        let label = desc.label.as_deref();
        let program = self
            .validated(|backend| Program {
                vertex: backend.compile(label, &desc.vertex_source, wgpu::naga::ShaderStage::Vertex),
                fragment: backend.compile(label, &desc.fragment_source, wgpu::naga::ShaderStage::Fragment),
            })
            .map_err(|e| BackendError::Shader(e.to_string()))?;

        let id = self.objects.allocate_id();
        self.objects.programs.insert(id, program);
        Ok(ProgramHandle(id))
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        self.objects.programs.remove(&program.0);
    }

    fn create_render_pipeline(&mut self, desc: &RenderPipelineDescriptor) -> BackendResult<RenderPipelineHandle> {
        let objects = &self.objects;
        let program = objects.programs.get(&desc.program.0).ok_or(BackendError::Missing {
            kind: "program",
            id: desc.program.0,
        })?;
        let layouts = desc
            .bind_group_layouts
            .iter()
            .map(|handle| {
                objects.layouts.get(&handle.0).ok_or(BackendError::Missing {
                    kind: "bind group layout",
                    id: handle.0,
                })
            })
            .collect::<BackendResult<Vec<_>>>()?;

        let attributes = convert::vertex_attributes(&desc.vertex_layout);
        let buffers = [wgpu::VertexBufferLayout {
            array_stride: desc.vertex_layout.stride,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &attributes,
        }];
        let targets: Vec<Option<wgpu::ColorTargetState>> = desc
            .color_formats
            .iter()
            .map(|format| {
                Some(wgpu::ColorTargetState {
                    format: (*format).into(),
                    blend: desc.blend.map(Into::into),
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect();

        let pipeline = self
            .validated(|backend| {
                let layout = backend.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: desc.label.as_deref(),
                    bind_group_layouts: &layouts,
                    push_constant_ranges: &[],
                });
                backend.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: desc.label.as_deref(),
                    layout: Some(&layout),
                    vertex: wgpu::VertexState {
                        module: &program.vertex,
                        entry_point: "main",
                        buffers: &buffers,
                        compilation_options: Default::default(),
                    },
                    fragment: Some(wgpu::FragmentState {
                        module: &program.fragment,
                        entry_point: "main",
                        targets: &targets,
                        compilation_options: Default::default(),
                    }),
                    primitive: wgpu::PrimitiveState::default(),
                    depth_stencil: desc.depth.map(Into::into),
                    multisample: wgpu::MultisampleState::default(),
                    multiview: None,
                })
            })
            .map_err(|e| BackendError::Pipeline(e.to_string()))?;

        let id = self.objects.allocate_id();
        self.objects.pipelines.insert(id, pipeline);
        Ok(RenderPipelineHandle(id))
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) {
        if self.pass.is_some() {
            log::warn!("Render pass {:?} began inside another, closing the open one", desc.label);
            self.end_render_pass();
        }
        self.pass = Some(RecordedPass::new(desc));
    }

    fn end_render_pass(&mut self) {
        let Some(pass) = self.pass.take() else {
            return;
        };
        match self.frame.as_mut() {
            Some(frame) => pass.replay(&mut frame.encoder, &self.objects),
            None => log::warn!("Render pass {:?} ended outside a frame, dropping it", pass.desc.label),
        }
    }

    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        self.record(PassCommand::Pipeline(pipeline));
    }

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle, dynamic_offsets: &[u32]) {
        self.record(PassCommand::BindGroup {
            index,
            group: bind_group,
            offsets: dynamic_offsets.to_vec(),
        });
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64) {
        self.record(PassCommand::VertexBuffer { slot, buffer, offset });
    }

    fn set_index_buffer(&mut self, buffer: BufferHandle, offset: u64) {
        self.record(PassCommand::IndexBuffer { buffer, offset });
    }

    fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32) {
        self.record(PassCommand::Viewport { x, y, width, height });
    }

    fn draw_indexed(&mut self, indices: std::ops::Range<u32>, base_vertex: i32) {
        self.record(PassCommand::DrawIndexed { indices, base_vertex });
    }
}

#[cfg(test)]
mod tests {
    use super::fit_to_limit;

    #[test]
    fn test_fit_to_limit_keeps_aspect() {
        assert_eq!(fit_to_limit(800, 600, 8192), (800, 600));
        assert_eq!(fit_to_limit(0, 0, 8192), (1, 1));
        assert_eq!(fit_to_limit(16384, 8192, 8192), (8192, 4096));
        assert_eq!(fit_to_limit(1000, 4000, 2000), (500, 2000));
    }
}
