//! Render passes are recorded as plain commands and replayed into the frame encoder
//! once the pass ends, so a pass can borrow every resource it touches at once.

use super::convert;
use super::DeviceObjects;
use crate::backend::traits::*;
use std::ops::Range;

#[derive(Debug, Clone)]
pub(super) enum PassCommand {
    Pipeline(RenderPipelineHandle),
    BindGroup {
        index: u32,
        group: BindGroupHandle,
        offsets: Vec<u32>,
    },
    VertexBuffer {
        slot: u32,
        buffer: BufferHandle,
        offset: u64,
    },
    IndexBuffer {
        buffer: BufferHandle,
        offset: u64,
    },
    Viewport {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
    DrawIndexed {
        indices: Range<u32>,
        base_vertex: i32,
    },
}

pub(super) struct RecordedPass {
    pub desc: RenderPassDescriptor,
    pub commands: Vec<PassCommand>,
}

impl RecordedPass {
    pub fn new(desc: &RenderPassDescriptor) -> Self {
        Self {
            desc: desc.clone(),
            commands: Vec::new(),
        }
    }

    /// Encode the pass. Commands naming resources that no longer exist are skipped.
    pub fn replay(&self, encoder: &mut wgpu::CommandEncoder, objects: &DeviceObjects) {
        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = self
            .desc
            .color_attachments
            .iter()
            .map(|attachment| {
                let view = objects.views.get(&attachment.view.0)?;
                Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: convert::color_load(&attachment.load),
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect();

        let depth_stencil_attachment = self.desc.depth_attachment.as_ref().and_then(|attachment| {
            let view = objects.views.get(&attachment.view.0)?;
            Some(wgpu::RenderPassDepthStencilAttachment {
                view,
                depth_ops: Some(wgpu::Operations {
                    load: attachment.clear.map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            })
        });

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: self.desc.label.as_deref(),
            color_attachments: &color_attachments,
            depth_stencil_attachment,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        for command in &self.commands {
            match command {
                PassCommand::Pipeline(handle) => {
                    if let Some(pipeline) = objects.pipelines.get(&handle.0) {
                        pass.set_pipeline(pipeline);
                    }
                }
                PassCommand::BindGroup { index, group, offsets } => {
                    if let Some(group) = objects.bind_groups.get(&group.0) {
                        pass.set_bind_group(*index, group, offsets);
                    }
                }
                PassCommand::VertexBuffer { slot, buffer, offset } => {
                    if let Some(buffer) = objects.buffers.get(&buffer.0) {
                        pass.set_vertex_buffer(*slot, buffer.slice(*offset..));
                    }
                }
                PassCommand::IndexBuffer { buffer, offset } => {
                    if let Some(buffer) = objects.buffers.get(&buffer.0) {
                        pass.set_index_buffer(buffer.slice(*offset..), wgpu::IndexFormat::Uint32);
                    }
                }
                PassCommand::Viewport { x, y, width, height } => {
                    pass.set_viewport(*x, *y, *width, *height, 0.0, 1.0);
                }
                PassCommand::DrawIndexed { indices, base_vertex } => {
                    pass.draw_indexed(indices.clone(), *base_vertex, 0..1);
                }
            }
        }
    }
}
