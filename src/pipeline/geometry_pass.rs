//! Geometry pass
//!
//! Rasterizes every drawable entity into the five G-buffer color attachments
//! (model, normals, albedo, depth visualization, position) and the depth
//! attachment. In forward mode the same pass runs the single-pass textured program
//! and the model attachment already holds the final lit color.

use crate::backend::*;
use crate::error::{RenderError, RenderResult};
use crate::pipeline::bindings::set;
use crate::pipeline::framebuffer::{slot, GBuffer, DEPTH_FORMAT, GBUFFER_FORMATS};
use crate::pipeline::pipeline_cache::PipelineKey;
use crate::pipeline::screen_quad::PassContext;
use crate::pipeline::UniformBlock;
use crate::resources::{MaterialId, MeshId, ModelId, ProgramId, Registry, TextureId};
use crate::scene::{LocalBlock, ModelRef, Scene};

/// Texture units of the geometry programs: albedo, then the normal map
pub const GEOMETRY_TEXTURES: usize = 2;

/// Color written to a normal map slot when a material has none: +Z in tangent space
pub const FLAT_NORMAL: [u8; 4] = [128, 128, 255, 255];

/// Per-frame inputs of the geometry pass
#[derive(Debug, Clone, Copy)]
pub struct GeometryInputs {
    pub program: ProgramId,
    /// Uniform stream frame of the blocks. Entities stamped with another frame are skipped.
    pub frame: u64,
    pub global: UniformBlock,
    pub params: UniformBlock,
    pub clear_color: [f32; 4],
}

pub struct GeometryPass {
    flat_normal: TextureId,
}

impl GeometryPass {
    pub fn new(backend: &mut dyn GraphicsBackend, registry: &mut Registry) -> RenderResult<Self> {
        Ok(Self {
            flat_normal: registry.solid_color_texture(backend, FLAT_NORMAL)?,
        })
    }

    /// Clear the G-buffer and draw every entity. Returns the number of indexed draws.
    pub fn execute(
        &self,
        ctx: &mut PassContext,
        gbuffer: &GBuffer,
        scene: &mut Scene,
        inputs: &GeometryInputs,
    ) -> RenderResult<u32> {
        let Some(depth_view) = gbuffer.depth_view() else {
            log::warn!("Skipping geometry pass: G-buffer has no depth attachment");
            return Ok(0);
        };
        let clear_values = |slot: usize| {
            if slot == slot::MODEL {
                inputs.clear_color
            } else {
                [0.0, 0.0, 0.0, 0.0]
            }
        };
        let framebuffer = gbuffer.framebuffer();
        ctx.backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("Geometry Pass".into()),
            color_attachments: framebuffer
                .draw_buffers
                .iter()
                .filter_map(|&slot| {
                    framebuffer.color(slot).map(|attachment| ColorAttachment {
                        view: attachment.view,
                        load: LoadOp::Clear(clear_values(slot)),
                    })
                })
                .collect(),
            depth_attachment: Some(DepthAttachment {
                view: depth_view,
                clear: Some(1.0),
            }),
        });

        let (width, height) = gbuffer.size();
        ctx.backend.set_viewport(0.0, 0.0, width as f32, height as f32);

        let result = self.draw_entities(ctx, scene, inputs);
        ctx.backend.end_render_pass();
        result
    }

    fn draw_entities(
        &self,
        ctx: &mut PassContext,
        scene: &mut Scene,
        inputs: &GeometryInputs,
    ) -> RenderResult<u32> {
        let program = ctx.registry.program(inputs.program).ok_or(RenderError::InvalidIndex {
            kind: "program",
            index: inputs.program.0,
        })?;
        let Some(handle) = program.handle else {
            log::warn!("Skipping geometry draws: program '{}' is not built", program.name);
            return Ok(0);
        };
        let global_size = program.reflection.uniform_block(set::GLOBAL).map_or(0, |b| b.min_size);
        let local_size = program.reflection.uniform_block(set::LOCAL).map_or(0, |b| b.min_size);
        let params_size = program.reflection.uniform_block(set::PASS).map_or(0, |b| b.min_size);

        let mut draws = 0;
        for entity in scene.entities() {
            let (Some(model), Some(local)) = (
                scene.world.get::<ModelRef>(entity).map(|m| m.0),
                scene.world.get::<LocalBlock>(entity).copied(),
            ) else {
                continue;
            };
            let Some(local) = local.written_in(inputs.frame) else {
                log::warn!("Skipping entity {:?}: no uniform block written this frame", entity);
                continue;
            };
            let Some((mesh, materials)) = self.model_parts(ctx.registry, model) else {
                log::warn!("Skipping entity {:?}: unknown model {:?}", entity, model);
                continue;
            };
            let submeshes: Vec<(u32, u32)> = match ctx.registry.mesh(mesh) {
                Some(mesh) => mesh
                    .submeshes
                    .iter()
                    .map(|s| (s.index_offset, s.index_count))
                    .collect(),
                None => continue,
            };

            for (index, (index_offset, index_count)) in submeshes.into_iter().enumerate() {
                let binding = match ctx.registry.resolve_vertex_binding(mesh, index, inputs.program) {
                    Ok(binding) => binding,
                    Err(err) if err.is_fatal() => return Err(err),
                    Err(err) => {
                        log::warn!("Skipping submesh {} of entity {:?}: {}", index, entity, err);
                        continue;
                    }
                };
                let Some(textures) = self.material_views(ctx.registry, materials.get(index).copied().flatten()) else {
                    log::warn!("Skipping submesh {} of entity {:?}: material has no texture", index, entity);
                    continue;
                };

                let key = PipelineKey {
                    program: handle,
                    vertex_layout: binding.buffer_layout(),
                    color_formats: GBUFFER_FORMATS.to_vec(),
                    depth: Some(DepthState {
                        format: DEPTH_FORMAT,
                        write: true,
                        compare: CompareFunction::Less,
                    }),
                    blend: None,
                    texture_count: GEOMETRY_TEXTURES,
                };
                let pipeline = ctx
                    .pipelines
                    .get_or_create(ctx.backend, ctx.bindings, &key, "Geometry Pass")?;

                ctx.backend.set_render_pipeline(pipeline);
                ctx.bindings
                    .bind_uniform(ctx.backend, set::GLOBAL, inputs.global, global_size)?;
                ctx.bindings.bind_uniform(ctx.backend, set::LOCAL, local, local_size)?;
                ctx.bindings
                    .bind_uniform(ctx.backend, set::PASS, inputs.params, params_size)?;
                ctx.bindings.bind_textures(ctx.backend, &textures)?;
                ctx.backend
                    .set_vertex_buffer(0, binding.vertex_buffer, binding.base_offset);
                ctx.backend.set_index_buffer(binding.index_buffer, 0);
                ctx.backend
                    .draw_indexed(index_offset..index_offset + index_count, 0);
                draws += 1;
            }
        }

        log::trace!("Geometry pass issued {} draws", draws);
        Ok(draws)
    }

    /// Mesh of a model and the material of each of its submeshes
    fn model_parts(&self, registry: &Registry, model: ModelId) -> Option<(MeshId, Vec<Option<MaterialId>>)> {
        let model = registry.model(model)?;
        let materials = (0..registry.mesh(model.mesh)?.submeshes.len())
            .map(|submesh| model.material_for(submesh))
            .collect();
        Some((model.mesh, materials))
    }

    /// Albedo and normal map views of a material, in texture unit order
    fn material_views(&self, registry: &Registry, material: Option<MaterialId>) -> Option<[TextureViewHandle; 2]> {
        let material = registry.material(material?)?;
        let albedo = registry.texture(material.albedo)?.view;
        let normal_map = material
            .normal_map
            .and_then(|id| registry.texture(id))
            .or_else(|| registry.texture(self.flat_normal))?
            .view;
        Some([albedo, normal_map])
    }
}
