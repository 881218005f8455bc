//! Final blit of one G-buffer attachment to the swapchain

use crate::backend::*;
use crate::error::RenderResult;
use crate::pipeline::framebuffer::GBuffer;
use crate::pipeline::screen_quad::{PassContext, ScreenDraw};
use crate::pipeline::RenderMode;
use crate::resources::ProgramId;

/// Draws the attachment selected by the render mode over the cleared swapchain
/// image with standard alpha blending
pub struct PresentPass {
    program: ProgramId,
}

impl PresentPass {
    pub fn new(program: ProgramId) -> Self {
        Self { program }
    }

    pub fn program(&self) -> ProgramId {
        self.program
    }

    /// Record the present pass. Returns `false` when the G-buffer has nothing to show.
    pub fn execute(
        &self,
        ctx: &mut PassContext,
        gbuffer: &GBuffer,
        mode: RenderMode,
        output: TextureViewHandle,
        output_size: (u32, u32),
    ) -> RenderResult<bool> {
        let Some(source) = gbuffer.view(mode.slot()) else {
            log::warn!("Skipping present: G-buffer has no attachment for {}", mode);
            return Ok(false);
        };
        let format = ctx.backend.swapchain_format();

        ctx.backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("Present".into()),
            color_attachments: vec![ColorAttachment {
                view: output,
                load: LoadOp::Load,
            }],
            depth_attachment: None,
        });

        let result = ctx.draw_screen(&ScreenDraw {
            label: "Present",
            program: self.program,
            color_formats: &[format],
            depth: None,
            blend: Some(Blend::Alpha),
            textures: &[source],
            global: None,
            params: None,
            viewport: output_size,
        });

        ctx.backend.end_render_pass();
        result.map(|_| true)
    }
}
