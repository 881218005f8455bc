//! Render pipelines built on demand and keyed by everything that shapes them

use crate::backend::*;
use crate::error::RenderResult;
use crate::pipeline::bindings::Bindings;
use std::collections::HashMap;

/// Everything a render pipeline is built from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub program: ProgramHandle,
    pub vertex_layout: VertexLayout,
    pub color_formats: Vec<TextureFormat>,
    pub depth: Option<DepthState>,
    pub blend: Option<Blend>,
    /// Texture/sampler pairs in set 3
    pub texture_count: usize,
}

#[derive(Default)]
pub struct PipelineCache {
    pipelines: HashMap<PipelineKey, RenderPipelineHandle>,
}

impl PipelineCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        bindings: &mut Bindings,
        key: &PipelineKey,
        label: &str,
    ) -> RenderResult<RenderPipelineHandle> {
        if let Some(pipeline) = self.pipelines.get(key) {
            return Ok(*pipeline);
        }

        let bind_group_layouts = bindings.pipeline_layouts(backend, key.texture_count)?;
        let pipeline = backend.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some(label.to_string()),
            program: key.program,
            vertex_layout: key.vertex_layout.clone(),
            bind_group_layouts,
            color_formats: key.color_formats.clone(),
            blend: key.blend,
            depth: key.depth,
        })?;

        log::debug!("Created pipeline '{}' for program {:?}", label, key.program);
        self.pipelines.insert(key.clone(), pipeline);
        Ok(pipeline)
    }

    /// Drop every pipeline built from `program`. Returns how many were dropped.
    pub fn evict(&mut self, program: ProgramHandle) -> usize {
        let before = self.pipelines.len();
        self.pipelines.retain(|key, _| key.program != program);
        before - self.pipelines.len()
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}
