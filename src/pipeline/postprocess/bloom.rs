//! Bloom over a five level mip chain
//!
//! Two half-resolution textures with five mip levels each: `bright` holds the
//! extracted highlights and the final blurred result, `blur` holds the horizontal
//! blur in between. Level i of both is attached to framebuffer i at slots 0 and 1.
//!
//! Per frame:
//! 1. bright pass from the lit color into bright level 0, then mip generation
//! 2. horizontal blur of every bright level into the same blur level
//! 3. vertical blur of every blur level back into the same bright level
//! 4. additive recombination of all bright levels into the lit color

use crate::backend::*;
use crate::error::RenderResult;
use crate::pipeline::framebuffer::{slot, Attachment, Framebuffer, GBuffer, GBUFFER_FORMATS};
use crate::pipeline::screen_quad::{PassContext, ScreenDraw};
use crate::pipeline::UniformBlock;
use crate::resources::{mip_level_count, ProgramId};

/// Mip levels in the bloom chain
pub const BLOOM_LEVELS: u32 = 5;

/// Format of both chain textures
pub const BLOOM_FORMAT: TextureFormat = TextureFormat::Rgba16Float;

/// Attachment slot of the bright texture in every level framebuffer
pub const BRIGHT_SLOT: usize = 0;
/// Attachment slot of the horizontal blur texture in every level framebuffer
pub const BLUR_SLOT: usize = 1;

/// Programs of the bloom passes
#[derive(Debug, Clone, Copy)]
pub struct BloomPrograms {
    pub brightest: ProgramId,
    pub blur: ProgramId,
    pub combine: ProgramId,
}

/// Uniform blocks of the bloom passes written for the current frame
#[derive(Debug, Clone, Copy, Default)]
pub struct BloomParams {
    pub bright: UniformBlock,
    pub blur_horizontal: UniformBlock,
    pub blur_vertical: UniformBlock,
    pub combine: UniformBlock,
}

/// The two chain textures and one framebuffer per level
#[derive(Debug)]
pub struct BloomChain {
    width: u32,
    height: u32,
    bright: TextureHandle,
    blur: TextureHandle,
    /// View over every level of `bright`, sampled by the recombination
    bright_all_levels: TextureViewHandle,
    framebuffers: Vec<Framebuffer>,
}

impl BloomChain {
    /// Allocate the chain for a display of `width` x `height`
    pub fn create(backend: &mut dyn GraphicsBackend, width: u32, height: u32) -> RenderResult<Self> {
        let base_width = (width / 2).max(1);
        let base_height = (height / 2).max(1);
        let levels = BLOOM_LEVELS.min(mip_level_count(base_width, base_height));

        let desc = |label: &str| TextureDescriptor {
            label: Some(label.to_string()),
            width: base_width,
            height: base_height,
            mip_levels: levels,
            format: BLOOM_FORMAT,
            role: TextureRole::RenderTarget,
            ..Default::default()
        };
        let bright_desc = desc("Bloom Bright");
        let blur_desc = desc("Bloom Blur");
        let bright = backend.create_texture(&bright_desc)?;
        let blur = match backend.create_texture(&blur_desc) {
            Ok(blur) => blur,
            Err(err) => {
                backend.destroy_texture(bright);
                return Err(err.into());
            }
        };
        let (bright_all_levels, framebuffers) =
            match Self::level_targets(backend, (bright, &bright_desc), (blur, &blur_desc)) {
                Ok(targets) => targets,
                Err(err) => {
                    backend.destroy_texture(bright);
                    backend.destroy_texture(blur);
                    return Err(err);
                }
            };

        log::debug!(
            "Bloom chain created at {}x{} with {} levels",
            base_width,
            base_height,
            levels
        );

        Ok(Self {
            width,
            height,
            bright,
            blur,
            bright_all_levels,
            framebuffers,
        })
    }

    /// The view over every bright level and one framebuffer per level
    fn level_targets(
        backend: &mut dyn GraphicsBackend,
        (bright, bright_desc): (TextureHandle, &TextureDescriptor),
        (blur, blur_desc): (TextureHandle, &TextureDescriptor),
    ) -> RenderResult<(TextureViewHandle, Vec<Framebuffer>)> {
        let bright_all_levels = backend.create_texture_view(bright, MipRange::ALL)?;
        let mut framebuffers = Vec::with_capacity(bright_desc.mip_levels as usize);
        for level in 0..bright_desc.mip_levels {
            let framebuffer = Framebuffer::new(&format!("Bloom Level {}", level))
                .with_color(BRIGHT_SLOT, Attachment::mip_of(backend, bright, bright_desc, level)?)
                .with_color(BLUR_SLOT, Attachment::mip_of(backend, blur, blur_desc, level)?);
            framebuffer.check_status();
            framebuffers.push(framebuffer);
        }
        Ok((bright_all_levels, framebuffers))
    }

    /// Recreate the chain when the display size changed. Returns whether it did.
    pub fn resize(&mut self, backend: &mut dyn GraphicsBackend, width: u32, height: u32) -> RenderResult<bool> {
        if (width, height) == (self.width, self.height) {
            return Ok(false);
        }
        let replacement = Self::create(backend, width, height)?;
        self.destroy(backend);
        *self = replacement;
        Ok(true)
    }

    pub fn destroy(&self, backend: &mut dyn GraphicsBackend) {
        backend.destroy_texture(self.bright);
        backend.destroy_texture(self.blur);
    }

    pub fn framebuffers(&self) -> &[Framebuffer] {
        &self.framebuffers
    }

    pub fn bright_texture(&self) -> TextureHandle {
        self.bright
    }

    /// Viewport of each level framebuffer, largest first
    pub fn viewport_sizes(&self) -> Vec<(u32, u32)> {
        self.framebuffers.iter().filter_map(|fb| fb.size()).collect()
    }

    fn level_view(&self, level: usize, slot: usize) -> Option<TextureViewHandle> {
        self.framebuffers.get(level)?.color(slot).map(|a| a.view)
    }

    /// Clear both attachments of the first level framebuffer
    pub fn reset(&self, backend: &mut dyn GraphicsBackend) {
        let Some(first) = self.framebuffers.first() else {
            return;
        };
        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("Bloom Reset".into()),
            color_attachments: first
                .draw_views()
                .into_iter()
                .map(|view| ColorAttachment {
                    view,
                    load: LoadOp::Clear([0.0, 0.0, 0.0, 1.0]),
                })
                .collect(),
            depth_attachment: None,
        });
        backend.end_render_pass();
    }

    /// Run the whole effect against the model attachment of `gbuffer`
    pub fn execute(
        &self,
        ctx: &mut PassContext,
        gbuffer: &GBuffer,
        programs: &BloomPrograms,
        params: &BloomParams,
    ) -> RenderResult<()> {
        let Some(lit) = gbuffer.view(slot::MODEL) else {
            log::warn!("Skipping bloom: G-buffer has no model attachment");
            return Ok(());
        };
        let sizes = self.viewport_sizes();

        // Bright pass
        if let Some(target) = self.level_view(0, BRIGHT_SLOT) {
            self.draw_into(ctx, target, LoadOp::Load, &ScreenDraw {
                label: "Bloom Bright Pass",
                program: programs.brightest,
                color_formats: &[BLOOM_FORMAT],
                depth: None,
                blend: None,
                textures: &[lit],
                global: None,
                params: Some(params.bright),
                viewport: sizes[0],
            })?;
        }
        ctx.backend.generate_mipmaps(self.bright);

        // Horizontal blur, bright level i into blur level i
        for (level, size) in sizes.iter().enumerate() {
            let (Some(source), Some(target)) =
                (self.level_view(level, BRIGHT_SLOT), self.level_view(level, BLUR_SLOT))
            else {
                continue;
            };
            self.draw_into(ctx, target, LoadOp::Clear([0.0, 0.0, 0.0, 1.0]), &ScreenDraw {
                label: "Bloom Horizontal Blur",
                program: programs.blur,
                color_formats: &[BLOOM_FORMAT],
                depth: None,
                blend: None,
                textures: &[source],
                global: None,
                params: Some(params.blur_horizontal),
                viewport: *size,
            })?;
        }

        // Vertical blur, blur level i back into bright level i
        for (level, size) in sizes.iter().enumerate() {
            let (Some(source), Some(target)) =
                (self.level_view(level, BLUR_SLOT), self.level_view(level, BRIGHT_SLOT))
            else {
                continue;
            };
            self.draw_into(ctx, target, LoadOp::Clear([0.0, 0.0, 0.0, 1.0]), &ScreenDraw {
                label: "Bloom Vertical Blur",
                program: programs.blur,
                color_formats: &[BLOOM_FORMAT],
                depth: None,
                blend: None,
                textures: &[source],
                global: None,
                params: Some(params.blur_vertical),
                viewport: *size,
            })?;
        }

        // Recombination into the lit color
        self.draw_into(ctx, lit, LoadOp::Load, &ScreenDraw {
            label: "Bloom Combine",
            program: programs.combine,
            color_formats: &[GBUFFER_FORMATS[slot::MODEL]],
            depth: None,
            blend: Some(Blend::Additive),
            textures: &[self.bright_all_levels],
            global: None,
            params: Some(params.combine),
            viewport: gbuffer.size(),
        })?;

        Ok(())
    }

    fn draw_into(
        &self,
        ctx: &mut PassContext,
        target: TextureViewHandle,
        load: LoadOp,
        draw: &ScreenDraw,
    ) -> RenderResult<()> {
        ctx.backend.begin_render_pass(&RenderPassDescriptor {
            label: Some(draw.label.to_string()),
            color_attachments: vec![ColorAttachment { view: target, load }],
            depth_attachment: None,
        });
        let result = ctx.draw_screen(draw);
        ctx.backend.end_render_pass();
        result.map(|_| ())
    }
}
