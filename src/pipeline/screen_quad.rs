//! Full-screen quad draws shared by the lighting, bloom and present passes

use crate::backend::*;
use crate::error::{RenderError, RenderResult};
use crate::pipeline::bindings::{set, Bindings};
use crate::pipeline::pipeline_cache::{PipelineCache, PipelineKey};
use crate::pipeline::UniformBlock;
use crate::resources::{screen_quad, MeshBuilder, MeshId, ProgramId, Registry, SubmeshLayout};

/// Target state and inputs of one full-screen draw
pub struct ScreenDraw<'a> {
    pub label: &'a str,
    pub program: ProgramId,
    pub color_formats: &'a [TextureFormat],
    pub depth: Option<DepthState>,
    pub blend: Option<Blend>,
    pub textures: &'a [TextureViewHandle],
    pub global: Option<UniformBlock>,
    pub params: Option<UniformBlock>,
    pub viewport: (u32, u32),
}

/// The screen quad mesh, registered like any other mesh so hot reload reaches its bindings
pub struct ScreenQuad {
    mesh: MeshId,
    index_count: u32,
}

impl ScreenQuad {
    pub fn new(backend: &mut dyn GraphicsBackend, registry: &mut Registry) -> RenderResult<Self> {
        let (vertices, indices) = screen_quad();
        let mesh = MeshBuilder::new("Screen Quad")
            .add_raw(SubmeshLayout::screen(), bytemuck::cast_slice(&vertices), &indices)
            .build(backend)?;
        Ok(Self {
            mesh: registry.add_mesh(mesh),
            index_count: indices.len() as u32,
        })
    }

    pub fn mesh(&self) -> MeshId {
        self.mesh
    }
}

/// Everything a pass needs to record its draws, borrowed from the renderer for one frame
pub struct PassContext<'a> {
    pub backend: &'a mut dyn GraphicsBackend,
    pub registry: &'a mut Registry,
    pub bindings: &'a mut Bindings,
    pub pipelines: &'a mut PipelineCache,
    pub quad: &'a ScreenQuad,
}

impl PassContext<'_> {
    /// Record a full-screen draw into the open render pass.
    ///
    /// Returns `Ok(false)` when the program has no valid handle and the draw was skipped.
    pub fn draw_screen(&mut self, draw: &ScreenDraw) -> RenderResult<bool> {
        let backend = &mut *self.backend;
        let bindings = &mut *self.bindings;
        let quad = self.quad;
        let program = self
            .registry
            .program(draw.program)
            .ok_or(RenderError::InvalidIndex {
                kind: "program",
                index: draw.program.0,
            })?;
        let Some(handle) = program.handle else {
            log::warn!("Skipping {}: program '{}' is not built", draw.label, program.name);
            return Ok(false);
        };
        let declared = |group: u32| program.reflection.uniform_block(group).map_or(0, |b| b.min_size);
        let global_size = declared(set::GLOBAL);
        let params_size = declared(set::PASS);

        let binding = self.registry.resolve_vertex_binding(quad.mesh, 0, draw.program)?;
        let key = PipelineKey {
            program: handle,
            vertex_layout: binding.buffer_layout(),
            color_formats: draw.color_formats.to_vec(),
            depth: draw.depth,
            blend: draw.blend,
            texture_count: draw.textures.len(),
        };
        let pipeline = self.pipelines.get_or_create(backend, bindings, &key, draw.label)?;

        let (width, height) = draw.viewport;
        backend.set_viewport(0.0, 0.0, width as f32, height as f32);
        backend.set_render_pipeline(pipeline);
        // Every set must be bound; unused ones get a block at the start of the stream
        let unused = UniformBlock::default();
        bindings.bind_uniform(backend, set::GLOBAL, draw.global.unwrap_or(unused), global_size)?;
        bindings.bind_uniform(backend, set::LOCAL, unused, 0)?;
        bindings.bind_uniform(backend, set::PASS, draw.params.unwrap_or(unused), params_size)?;
        bindings.bind_textures(backend, draw.textures)?;
        backend.set_vertex_buffer(0, binding.vertex_buffer, binding.base_offset);
        backend.set_index_buffer(binding.index_buffer, 0);
        backend.draw_indexed(0..quad.index_count, 0);
        Ok(true)
    }
}
