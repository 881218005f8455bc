//! Frame orchestration
//!
//! [`DeferredRenderer`] owns the uniform stream, the G-buffer, the bloom chain and
//! the caches shared by the passes. Each frame is driven in two steps:
//!
//! - [`DeferredRenderer::update`] reloads changed programs and writes every uniform
//!   block of the frame into the stream.
//! - [`DeferredRenderer::render`] records the passes selected by the [`RenderConfig`].

use crate::backend::*;
use crate::error::RenderResult;
use crate::pipeline::bindings::Bindings;
use crate::pipeline::framebuffer::GBuffer;
use crate::pipeline::geometry_pass::{GeometryInputs, GeometryPass};
use crate::pipeline::lighting_pass::LightingPass;
use crate::pipeline::pipeline_cache::PipelineCache;
use crate::pipeline::postprocess::{BloomChain, BloomParams, BloomPrograms, PresentPass};
use crate::pipeline::screen_quad::{PassContext, ScreenQuad};
use crate::pipeline::{RenderConfig, UniformBlock, UniformStream};
use crate::resources::{ProgramId, Registry};
use crate::scene::{LocalBlock, Scene, Transform, MAX_LIGHTS};
use glam::{Vec2, Vec4};
use std::path::Path;

/// Logical program names in the shared shader source
pub mod program_names {
    pub const TEXTURED_GEOMETRY: &str = "TEXTURED_GEOMETRY";
    pub const GEOMETRY_PASS: &str = "GEOMETRY_PASS";
    pub const LIGHTING_PASS: &str = "LIGHTING_PASS";
    pub const BLOOM_BRIGHTEST: &str = "BLOOM_BRIGHTEST";
    pub const BLOOM_BLUR: &str = "BLOOM_BLUR";
    pub const BLOOM: &str = "BLOOM";
    pub const SHOW_TEXTURED_MESH: &str = "SHOW_TEXTURED_MESH";
}

/// Every program the renderer draws with
#[derive(Debug, Clone, Copy)]
pub struct Programs {
    /// Forward shading in a single pass
    pub textured_geometry: ProgramId,
    pub geometry_pass: ProgramId,
    pub lighting_pass: ProgramId,
    pub bloom: BloomPrograms,
    pub show_textured_mesh: ProgramId,
}

impl Programs {
    pub fn load(backend: &mut dyn GraphicsBackend, registry: &mut Registry, path: &Path) -> Self {
        let mut load = |name| registry.load_program(backend, path, name);
        Self {
            textured_geometry: load(program_names::TEXTURED_GEOMETRY),
            geometry_pass: load(program_names::GEOMETRY_PASS),
            lighting_pass: load(program_names::LIGHTING_PASS),
            bloom: BloomPrograms {
                brightest: load(program_names::BLOOM_BRIGHTEST),
                blur: load(program_names::BLOOM_BLUR),
                combine: load(program_names::BLOOM),
            },
            show_textured_mesh: load(program_names::SHOW_TEXTURED_MESH),
        }
    }
}

/// Uniform blocks written for the current frame
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameBlocks {
    /// Uniform stream frame the blocks belong to
    pub frame: u64,
    /// Camera position, light count and the light array
    pub global: UniformBlock,
    pub geometry: UniformBlock,
    pub bloom: BloomParams,
    /// Entities whose local block was written
    pub entities: usize,
    pub lights: usize,
}

/// What the last frame did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub geometry_draws: u32,
    pub lighting: bool,
    pub bloom: bool,
    /// The present pass was recorded, even if its program could not draw
    pub presented: bool,
}

pub struct DeferredRenderer {
    config: RenderConfig,
    programs: Programs,
    stream: UniformStream,
    bindings: Bindings,
    pipelines: PipelineCache,
    quad: ScreenQuad,
    gbuffer: GBuffer,
    bloom: BloomChain,
    geometry: GeometryPass,
    lighting: LightingPass,
    present: PresentPass,
    blocks: FrameBlocks,
}

impl DeferredRenderer {
    /// Load every program from `shader_path` and allocate the targets for a
    /// `width` x `height` display
    pub fn new(
        backend: &mut dyn GraphicsBackend,
        registry: &mut Registry,
        shader_path: &Path,
        width: u32,
        height: u32,
        config: RenderConfig,
    ) -> RenderResult<Self> {
        let programs = Programs::load(backend, registry, shader_path);
        let stream = UniformStream::from_limits(backend)?;
        let bindings = Bindings::new(backend, &stream, registry.sampler())?;
        let quad = ScreenQuad::new(backend, registry)?;
        let gbuffer = GBuffer::create(backend, width, height)?;
        let bloom = BloomChain::create(backend, width, height)?;
        let geometry = GeometryPass::new(backend, registry)?;

        log::info!(
            "Deferred renderer ready at {}x{} (uniform stream {} bytes, alignment {})",
            width,
            height,
            stream.capacity(),
            stream.alignment()
        );

        Ok(Self {
            config,
            lighting: LightingPass::new(programs.lighting_pass),
            present: PresentPass::new(programs.show_textured_mesh),
            programs,
            stream,
            bindings,
            pipelines: PipelineCache::new(),
            quad,
            gbuffer,
            bloom,
            geometry,
            blocks: FrameBlocks::default(),
        })
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut RenderConfig {
        &mut self.config
    }

    pub fn programs(&self) -> &Programs {
        &self.programs
    }

    pub fn gbuffer(&self) -> &GBuffer {
        &self.gbuffer
    }

    pub fn bloom(&self) -> &BloomChain {
        &self.bloom
    }

    pub fn stream(&self) -> &UniformStream {
        &self.stream
    }

    pub fn pipelines(&self) -> &PipelineCache {
        &self.pipelines
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    /// Blocks written by the last [`update`](Self::update)
    pub fn blocks(&self) -> &FrameBlocks {
        &self.blocks
    }

    /// Recompile programs whose source changed and drop everything built from
    /// their old handles. Returns how many programs were rebuilt.
    pub fn reload_programs(&mut self, backend: &mut dyn GraphicsBackend, registry: &mut Registry) -> usize {
        let stale = registry.reload_changed_programs(backend);
        for handle in &stale {
            let evicted = self.pipelines.evict(*handle);
            log::debug!("Evicted {} pipelines of program {:?}", evicted, handle);
        }
        stale.len()
    }

    /// Per-frame update: hot reload, then every uniform block of the frame
    pub fn update(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        registry: &mut Registry,
        scene: &mut Scene,
    ) -> RenderResult<()> {
        self.reload_programs(backend, registry);
        self.blocks = self.write_frame_uniforms(backend, scene)?;
        Ok(())
    }

    /// Fill the uniform stream for this frame and record each entity's local block
    /// on the entity.
    ///
    /// Layout: the global block at offset 0, then one block per entity, then the
    /// pass parameter blocks. Every block starts at the stream alignment; light
    /// records inside the global block start at 16-byte boundaries.
    pub fn write_frame_uniforms(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        scene: &mut Scene,
    ) -> RenderResult<FrameBlocks> {
        let stream = &mut self.stream;
        stream.begin();
        let result = Self::write_blocks(stream, &self.config, scene);
        stream.end(backend);
        result
    }

    fn write_blocks(stream: &mut UniformStream, config: &RenderConfig, scene: &mut Scene) -> RenderResult<FrameBlocks> {
        let mut lights = scene.lights();
        if lights.len() > MAX_LIGHTS {
            log::warn!("Only the first {} of {} lights are shaded", MAX_LIGHTS, lights.len());
            lights.truncate(MAX_LIGHTS);
        }

        let start = stream.head();
        stream.push_vec3(scene.camera.position)?;
        stream.push_u32(lights.len() as u32)?;
        for light in &lights {
            stream.align(16)?;
            stream.push_u32(light.kind as u32)?;
            stream.push_vec3(light.color)?;
            stream.push_vec3(light.direction)?;
            stream.push_vec3(light.position)?;
        }
        let global = stream.block_since(start);

        let view_projection = scene.camera.view_projection_matrix();
        let entities = scene.entities();
        for entity in &entities {
            let world = scene
                .world
                .get::<Transform>(*entity)
                .map(|t| t.matrix())
                .unwrap_or_default();
            stream.align(stream.alignment())?;
            let start = stream.head();
            stream.push_mat4(&world)?;
            stream.push_mat4(&(view_projection * world))?;
            let block = stream.block_since(start);
            scene.world.entity_mut(*entity).insert(LocalBlock {
                block,
                frame: stream.frame(),
            });
        }

        let geometry = push_block(stream, |s| s.push_u32(config.normal_map_enabled as u32))?;
        let bright = push_block(stream, |s| s.push_f32(config.bloom_threshold))?;
        let blur = |direction: Vec2| {
            move |s: &mut UniformStream| {
                s.push_f32(direction.x)?;
                s.push_f32(direction.y)?;
                s.push_i32(config.kernel_radius as i32)
            }
        };
        let blur_horizontal = push_block(stream, blur(Vec2::X))?;
        let blur_vertical = push_block(stream, blur(Vec2::Y))?;
        let [l0, l1, l2, l3, l4] = config.lod_intensity;
        let combine = push_block(stream, |s| {
            s.push_vec4(Vec4::new(l0, l1, l2, l3))?;
            s.push_f32(l4)
        })?;

        log::trace!(
            "Frame uniforms: {} lights, {} entities, {} bytes",
            lights.len(),
            entities.len(),
            stream.head()
        );

        Ok(FrameBlocks {
            frame: stream.frame(),
            global,
            geometry,
            bloom: BloomParams {
                bright,
                blur_horizontal,
                blur_vertical,
                combine,
            },
            entities: entities.len(),
            lights: lights.len(),
        })
    }

    /// Recreate the size dependent targets. Bound texture groups refer to the old
    /// views and are dropped too.
    pub fn resize(&mut self, backend: &mut dyn GraphicsBackend, width: u32, height: u32) -> RenderResult<()> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        let resized_gbuffer = self.gbuffer.resize(backend, width, height)?;
        let resized_bloom = self.bloom.resize(backend, width, height)?;
        if resized_gbuffer || resized_bloom {
            self.bindings.invalidate_textures();
            log::info!("Renderer resized to {}x{}", width, height);
        }
        Ok(())
    }

    /// Record one frame into the swapchain image of `frame`
    pub fn render(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        registry: &mut Registry,
        scene: &mut Scene,
        frame: &FrameContext,
    ) -> RenderResult<FrameStats> {
        self.resize(backend, frame.width, frame.height)?;

        let mode = self.config.mode;
        let mut stats = FrameStats::default();

        // Clear the default target and the first bloom level
        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("Clear Swapchain".into()),
            color_attachments: vec![ColorAttachment {
                view: frame.swapchain_view,
                load: LoadOp::Clear([0.0, 0.0, 0.0, 1.0]),
            }],
            depth_attachment: None,
        });
        backend.end_render_pass();
        self.bloom.reset(backend);

        let mut ctx = PassContext {
            backend,
            registry,
            bindings: &mut self.bindings,
            pipelines: &mut self.pipelines,
            quad: &self.quad,
        };

        if self.gbuffer.status().is_complete() {
            let program = if mode.is_forward() {
                self.programs.textured_geometry
            } else {
                self.programs.geometry_pass
            };
            stats.geometry_draws = self.geometry.execute(
                &mut ctx,
                &self.gbuffer,
                scene,
                &GeometryInputs {
                    program,
                    frame: self.blocks.frame,
                    global: self.blocks.global,
                    params: self.blocks.geometry,
                    clear_color: self.config.clear_color,
                },
            )?;

            if !mode.is_forward() {
                self.lighting.execute(&mut ctx, &self.gbuffer, self.blocks.global)?;
                stats.lighting = true;
            }

            if self.config.bloom_active() {
                self.bloom
                    .execute(&mut ctx, &self.gbuffer, &self.programs.bloom, &self.blocks.bloom)?;
                stats.bloom = true;
            }
        } else {
            log::warn!(
                "Skipping G-buffer passes: G-buffer is {}",
                self.gbuffer.status()
            );
        }

        stats.presented = self.present.execute(
            &mut ctx,
            &self.gbuffer,
            mode,
            frame.swapchain_view,
            (frame.width, frame.height),
        )?;

        Ok(stats)
    }

    /// Release the render targets
    pub fn destroy(&self, backend: &mut dyn GraphicsBackend) {
        self.gbuffer.destroy(backend);
        self.bloom.destroy(backend);
    }
}

/// Write one bindable block at the next aligned offset
fn push_block(
    stream: &mut UniformStream,
    write: impl FnOnce(&mut UniformStream) -> RenderResult<()>,
) -> RenderResult<UniformBlock> {
    stream.align(stream.alignment())?;
    let start = stream.head();
    write(stream)?;
    Ok(stream.block_since(start))
}
