//! Deferred lighting pass
//!
//! Shades the G-buffer with every light and writes the result into the model
//! attachment. The quad is drawn on the far plane with a `Greater` depth test
//! against the geometry depth, so only pixels covered by geometry are lit and
//! the background keeps its clear color. Depth writes stay off.

use crate::backend::*;
use crate::error::RenderResult;
use crate::pipeline::framebuffer::{slot, GBuffer, DEPTH_FORMAT, GBUFFER_FORMATS};
use crate::pipeline::screen_quad::{PassContext, ScreenDraw};
use crate::pipeline::UniformBlock;
use crate::resources::ProgramId;

/// G-buffer slots sampled by the lighting program, in texture unit order
pub const LIGHTING_INPUTS: [usize; 4] = [slot::NORMALS, slot::ALBEDO, slot::DEPTH, slot::POSITION];

pub struct LightingPass {
    program: ProgramId,
}

impl LightingPass {
    pub fn new(program: ProgramId) -> Self {
        Self { program }
    }

    pub fn program(&self) -> ProgramId {
        self.program
    }

    pub fn execute(&self, ctx: &mut PassContext, gbuffer: &GBuffer, global: UniformBlock) -> RenderResult<()> {
        let (Some(target), Some(depth_view)) = (gbuffer.view(slot::MODEL), gbuffer.depth_view()) else {
            log::warn!("Skipping lighting pass: G-buffer has no model or depth attachment");
            return Ok(());
        };
        let textures: Vec<TextureViewHandle> = LIGHTING_INPUTS
            .iter()
            .filter_map(|&slot| gbuffer.view(slot))
            .collect();
        if textures.len() != LIGHTING_INPUTS.len() {
            log::warn!("Skipping lighting pass: G-buffer is missing an input attachment");
            return Ok(());
        }

        ctx.backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("Lighting Pass".into()),
            color_attachments: vec![ColorAttachment {
                view: target,
                load: LoadOp::Load,
            }],
            depth_attachment: Some(DepthAttachment {
                view: depth_view,
                clear: None,
            }),
        });

        let result = ctx.draw_screen(&ScreenDraw {
            label: "Lighting Pass",
            program: self.program,
            color_formats: &[GBUFFER_FORMATS[slot::MODEL]],
            depth: Some(DepthState {
                format: DEPTH_FORMAT,
                write: false,
                compare: CompareFunction::Greater,
            }),
            blend: None,
            textures: &textures,
            global: Some(global),
            params: None,
            viewport: gbuffer.size(),
        });

        ctx.backend.end_render_pass();
        result.map(|_| ())
    }
}
