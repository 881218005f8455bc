//! Framebuffers and the G-buffer
//!
//! A [`Framebuffer`] is a set of attachments at fixed slots plus the slots drawn
//! into. It is validated before use and classified by [`FramebufferStatus`] when it
//! is not usable. The [`GBuffer`] owns the five color attachments and the depth
//! attachment of the geometry pass and recreates them together on resize.

use crate::backend::{
    GraphicsBackend, MipRange, TextureDescriptor, TextureFormat, TextureHandle, TextureRole, TextureViewHandle,
};
use crate::error::{RenderError, RenderResult};
use std::fmt;

/// G-buffer attachment slots
pub mod slot {
    /// Lit color of the deferred path, or the forward color
    pub const MODEL: usize = 0;
    pub const NORMALS: usize = 1;
    pub const ALBEDO: usize = 2;
    /// Depth visualization
    pub const DEPTH: usize = 3;
    /// World-space position
    pub const POSITION: usize = 4;

    pub const COUNT: usize = 5;
}

/// Color formats of the G-buffer slots. Position is floating point so lighting can
/// reconstruct world positions without banding.
pub const GBUFFER_FORMATS: [TextureFormat; slot::COUNT] = [
    TextureFormat::Rgba8Unorm,
    TextureFormat::Rgba8Unorm,
    TextureFormat::Rgba8Unorm,
    TextureFormat::Rgba8Unorm,
    TextureFormat::Rgba16Float,
];

pub const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth24Plus;

/// Result of validating a framebuffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramebufferStatus {
    Complete,
    /// No attachment at all
    Undefined,
    /// An attachment has no extent, or attachments differ in size
    IncompleteAttachment,
    /// A draw buffer refers to an empty slot
    MissingAttachment,
    /// An attachment's format cannot be used in its slot
    Unsupported,
    MultisampleMismatch,
    LayerMismatch,
    /// An attachment refers to a mip level its texture does not have
    Unknown,
}

impl FramebufferStatus {
    pub fn is_complete(&self) -> bool {
        *self == FramebufferStatus::Complete
    }
}

impl fmt::Display for FramebufferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FramebufferStatus::Complete => "complete",
            FramebufferStatus::Undefined => "undefined",
            FramebufferStatus::IncompleteAttachment => "incomplete attachment",
            FramebufferStatus::MissingAttachment => "missing attachment",
            FramebufferStatus::Unsupported => "unsupported",
            FramebufferStatus::MultisampleMismatch => "incomplete multisample",
            FramebufferStatus::LayerMismatch => "incomplete layer targets",
            FramebufferStatus::Unknown => "unknown error",
        };
        f.write_str(name)
    }
}

/// One mip level of a texture used as a render target
#[derive(Debug, Clone)]
pub struct Attachment {
    pub texture: TextureHandle,
    pub view: TextureViewHandle,
    pub desc: TextureDescriptor,
    pub mip_level: u32,
    pub samples: u32,
    /// Array layers the view spans
    pub layers: u32,
}

impl Attachment {
    /// Create a single-level texture and a view over it
    pub fn create(
        backend: &mut dyn GraphicsBackend,
        label: &str,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> RenderResult<Self> {
        let desc = TextureDescriptor {
            label: Some(label.to_string()),
            width,
            height,
            format,
            role: TextureRole::RenderTarget,
            ..Default::default()
        };
        let texture = backend.create_texture(&desc)?;
        match Self::mip_of(backend, texture, &desc, 0) {
            Ok(attachment) => Ok(attachment),
            Err(err) => {
                backend.destroy_texture(texture);
                Err(err)
            }
        }
    }

    /// Attach one mip level of an existing texture
    pub fn mip_of(
        backend: &mut dyn GraphicsBackend,
        texture: TextureHandle,
        desc: &TextureDescriptor,
        level: u32,
    ) -> RenderResult<Self> {
        let view = backend.create_texture_view(texture, MipRange::level(level))?;
        Ok(Self {
            texture,
            view,
            desc: desc.clone(),
            mip_level: level,
            samples: 1,
            layers: 1,
        })
    }

    /// Size of the attached mip level
    pub fn size(&self) -> (u32, u32) {
        self.desc.mip_size(self.mip_level)
    }
}

/// Attachments bound at fixed slots
#[derive(Debug, Clone)]
pub struct Framebuffer {
    pub label: String,
    pub color_attachments: Vec<Option<Attachment>>,
    pub depth_attachment: Option<Attachment>,
    /// Color slots written by draws, in output order
    pub draw_buffers: Vec<usize>,
}

impl Framebuffer {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            color_attachments: Vec::new(),
            depth_attachment: None,
            draw_buffers: Vec::new(),
        }
    }

    /// Attach at `slot` and add the slot to the draw buffers
    pub fn with_color(mut self, slot: usize, attachment: Attachment) -> Self {
        if self.color_attachments.len() <= slot {
            self.color_attachments.resize(slot + 1, None);
        }
        self.color_attachments[slot] = Some(attachment);
        if !self.draw_buffers.contains(&slot) {
            self.draw_buffers.push(slot);
        }
        self
    }

    pub fn with_depth(mut self, attachment: Attachment) -> Self {
        self.depth_attachment = Some(attachment);
        self
    }

    pub fn color(&self, slot: usize) -> Option<&Attachment> {
        self.color_attachments.get(slot).and_then(|a| a.as_ref())
    }

    /// Views of the draw buffers, in output order. Empty slots are skipped.
    pub fn draw_views(&self) -> Vec<TextureViewHandle> {
        self.draw_buffers
            .iter()
            .filter_map(|&slot| self.color(slot).map(|a| a.view))
            .collect()
    }

    /// Size shared by the attachments, taken from the first one present
    pub fn size(&self) -> Option<(u32, u32)> {
        self.attachments().next().map(|a| a.size())
    }

    fn attachments(&self) -> impl Iterator<Item = &Attachment> {
        self.color_attachments
            .iter()
            .flatten()
            .chain(self.depth_attachment.iter())
    }

    pub fn validate(&self) -> FramebufferStatus {
        if self.attachments().next().is_none() {
            return FramebufferStatus::Undefined;
        }

        if self.draw_buffers.iter().any(|&slot| self.color(slot).is_none()) {
            return FramebufferStatus::MissingAttachment;
        }

        for attachment in self.attachments() {
            if attachment.mip_level >= attachment.desc.mip_levels {
                return FramebufferStatus::Unknown;
            }
            let (width, height) = attachment.size();
            if attachment.desc.width == 0 || attachment.desc.height == 0 || width == 0 || height == 0 {
                return FramebufferStatus::IncompleteAttachment;
            }
            if attachment.desc.role != TextureRole::RenderTarget {
                return FramebufferStatus::Unsupported;
            }
        }

        if self.color_attachments.iter().flatten().any(|a| a.desc.format.is_depth())
            || self.depth_attachment.as_ref().is_some_and(|a| !a.desc.format.is_depth())
        {
            return FramebufferStatus::Unsupported;
        }

        let mut attachments = self.attachments();
        let Some(first) = attachments.next() else {
            return FramebufferStatus::Undefined;
        };
        let rest: Vec<&Attachment> = attachments.collect();

        if rest.iter().any(|a| a.samples != first.samples) {
            return FramebufferStatus::MultisampleMismatch;
        }
        if rest.iter().any(|a| a.layers != first.layers) {
            return FramebufferStatus::LayerMismatch;
        }
        if rest.iter().any(|a| a.size() != first.size()) {
            return FramebufferStatus::IncompleteAttachment;
        }

        FramebufferStatus::Complete
    }

    /// Validate and log the classified failure. Returns the status either way.
    pub fn check_status(&self) -> FramebufferStatus {
        let status = self.validate();
        if !status.is_complete() {
            log::error!("Framebuffer '{}' is not complete: {}", self.label, status);
        }
        status
    }

    /// Validate, turning an incomplete framebuffer into an error
    pub fn ensure_complete(&self) -> RenderResult<()> {
        match self.validate() {
            FramebufferStatus::Complete => Ok(()),
            status => Err(RenderError::IncompleteFramebuffer {
                label: self.label.clone(),
                status,
            }),
        }
    }
}

/// Render targets of the geometry pass
#[derive(Debug)]
pub struct GBuffer {
    width: u32,
    height: u32,
    framebuffer: Framebuffer,
    status: FramebufferStatus,
}

impl GBuffer {
    /// Allocate every attachment at the display size and validate the result.
    /// An incomplete G-buffer is logged and kept. A zero extent, such as a minimized
    /// window, gives an incomplete G-buffer without attachments.
    ///
    /// If an allocation fails, the attachments created before it are destroyed.
    pub fn create(backend: &mut dyn GraphicsBackend, width: u32, height: u32) -> RenderResult<Self> {
        if width == 0 || height == 0 {
            log::warn!("G-Buffer has a zero extent ({}x{}), no attachments created", width, height);
            return Ok(Self {
                width,
                height,
                framebuffer: Framebuffer::new("G-Buffer"),
                status: FramebufferStatus::IncompleteAttachment,
            });
        }

        let names = ["Model", "Normals", "Albedo", "Depth View", "Position"];
        let mut colors = Vec::with_capacity(slot::COUNT);
        for (name, format) in names.iter().zip(GBUFFER_FORMATS) {
            let attachment = Attachment::create(backend, &format!("G-Buffer {}", name), width, height, format);
            let attachment = release_on_error(backend, &colors, attachment)?;
            colors.push(attachment);
        }
        let depth = Attachment::create(backend, "G-Buffer Depth", width, height, DEPTH_FORMAT);
        let depth = release_on_error(backend, &colors, depth)?;

        let gbuffer = Self::assemble(width, height, colors, depth);
        log::info!(
            "G-Buffer created at {}x{}: {}",
            width,
            height,
            gbuffer.status
        );
        Ok(gbuffer)
    }

    /// Bind attachments at slots 0.. and the depth slot, then validate
    pub fn assemble(width: u32, height: u32, colors: Vec<Attachment>, depth: Attachment) -> Self {
        let mut framebuffer = Framebuffer::new("G-Buffer");
        for (slot, attachment) in colors.into_iter().enumerate() {
            framebuffer = framebuffer.with_color(slot, attachment);
        }
        let framebuffer = framebuffer.with_depth(depth);
        let status = framebuffer.check_status();

        Self {
            width,
            height,
            framebuffer,
            status,
        }
    }

    /// Recreate every attachment when the display size changed. Returns whether it did.
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
        for attachment in self.framebuffer.attachments() {
            backend.destroy_texture(attachment.texture);
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn status(&self) -> FramebufferStatus {
        self.status
    }

    pub fn framebuffer(&self) -> &Framebuffer {
        &self.framebuffer
    }

    /// View of a color slot
    pub fn view(&self, slot: usize) -> Option<TextureViewHandle> {
        self.framebuffer.color(slot).map(|a| a.view)
    }

    pub fn depth_view(&self) -> Option<TextureViewHandle> {
        self.framebuffer.depth_attachment.as_ref().map(|a| a.view)
    }
}

/// Pass `result` through, destroying the textures of `created` if it failed
fn release_on_error<T>(
    backend: &mut dyn GraphicsBackend,
    created: &[Attachment],
    result: RenderResult<T>,
) -> RenderResult<T> {
    if result.is_err() {
        for attachment in created {
            backend.destroy_texture(attachment.texture);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, HeadlessBackend};

    fn create_test_backend() -> HeadlessBackend {
        HeadlessBackend::new(800, 600)
    }

    #[test]
    fn test_gbuffer_is_complete() {
        let mut backend = create_test_backend();
        let gbuffer = GBuffer::create(&mut backend, 800, 600).unwrap();
        assert_eq!(gbuffer.status(), FramebufferStatus::Complete);
        assert_eq!(gbuffer.framebuffer().draw_views().len(), 5);
        assert!(gbuffer.depth_view().is_some());

        let position = gbuffer.framebuffer().color(slot::POSITION).unwrap();
        assert_eq!(position.desc.format, TextureFormat::Rgba16Float);
    }

    #[test]
    fn test_empty_framebuffer_is_undefined() {
        assert_eq!(Framebuffer::new("empty").validate(), FramebufferStatus::Undefined);
    }

    #[test]
    fn test_draw_buffer_without_attachment() {
        let mut backend = create_test_backend();
        let color = Attachment::create(&mut backend, "c", 16, 16, TextureFormat::Rgba8Unorm).unwrap();
        let mut framebuffer = Framebuffer::new("fb").with_color(0, color);
        framebuffer.draw_buffers.push(3);
        assert_eq!(framebuffer.validate(), FramebufferStatus::MissingAttachment);
    }

    #[test]
    fn test_depth_format_in_color_slot() {
        let mut backend = create_test_backend();
        let depth = Attachment::create(&mut backend, "d", 16, 16, DEPTH_FORMAT).unwrap();
        let framebuffer = Framebuffer::new("fb").with_color(0, depth);
        assert_eq!(framebuffer.validate(), FramebufferStatus::Unsupported);
    }

    #[test]
    fn test_sample_count_mismatch() {
        let mut backend = create_test_backend();
        let a = Attachment::create(&mut backend, "a", 16, 16, TextureFormat::Rgba8Unorm).unwrap();
        let mut b = Attachment::create(&mut backend, "b", 16, 16, TextureFormat::Rgba8Unorm).unwrap();
        b.samples = 4;
        let framebuffer = Framebuffer::new("fb").with_color(0, a).with_color(1, b);
        assert_eq!(framebuffer.validate(), FramebufferStatus::MultisampleMismatch);
    }

    #[test]
    fn test_layer_mismatch() {
        let mut backend = create_test_backend();
        let color = Attachment::create(&mut backend, "c", 16, 16, TextureFormat::Rgba8Unorm).unwrap();
        let mut depth = Attachment::create(&mut backend, "d", 16, 16, DEPTH_FORMAT).unwrap();
        depth.layers = 6;
        let framebuffer = Framebuffer::new("fb").with_color(0, color).with_depth(depth);
        assert_eq!(framebuffer.validate(), FramebufferStatus::LayerMismatch);
    }

    #[test]
    fn test_sampled_asset_cannot_be_attached() {
        let mut backend = create_test_backend();
        let mut a = Attachment::create(&mut backend, "a", 16, 16, TextureFormat::Rgba8Unorm).unwrap();
        a.desc.role = TextureRole::Asset;
        assert_eq!(Framebuffer::new("fb").with_color(0, a).validate(), FramebufferStatus::Unsupported);
    }

    #[test]
    fn test_mip_level_out_of_range() {
        let mut backend = create_test_backend();
        let mut a = Attachment::create(&mut backend, "a", 16, 16, TextureFormat::Rgba8Unorm).unwrap();
        a.mip_level = 2;
        let framebuffer = Framebuffer::new("fb").with_color(0, a);
        assert_eq!(framebuffer.validate(), FramebufferStatus::Unknown);
        assert!(matches!(
            framebuffer.ensure_complete(),
            Err(RenderError::IncompleteFramebuffer {
                status: FramebufferStatus::Unknown,
                ..
            })
        ));
    }

    #[test]
    fn test_resize_recreates_all_attachments() {
        let mut backend = create_test_backend();
        let mut gbuffer = GBuffer::create(&mut backend, 800, 600).unwrap();
        let old_normals = gbuffer.view(slot::NORMALS).unwrap();

        assert!(!gbuffer.resize(&mut backend, 800, 600).unwrap());
        assert!(gbuffer.resize(&mut backend, 1024, 768).unwrap());
        assert_eq!(gbuffer.size(), (1024, 768));
        assert_ne!(gbuffer.view(slot::NORMALS).unwrap(), old_normals);
        assert_eq!(gbuffer.framebuffer().size(), Some((1024, 768)));
        assert!(gbuffer.status().is_complete());
        // 6 textures per G-buffer, old ones destroyed
        assert_eq!(backend.stats().textures, 12);
        assert!(backend.view_target(old_normals).is_none());
    }

    #[test]
    fn test_zero_extent_gbuffer_is_incomplete() {
        let mut backend = create_test_backend();
        let mut gbuffer = GBuffer::create(&mut backend, 0, 600).unwrap();
        assert_eq!(gbuffer.status(), FramebufferStatus::IncompleteAttachment);
        assert!(gbuffer.view(slot::MODEL).is_none());
        assert!(gbuffer.depth_view().is_none());
        assert_eq!(backend.live_textures(), 0);

        assert!(gbuffer.resize(&mut backend, 800, 600).unwrap());
        assert!(gbuffer.status().is_complete());
    }

    #[test]
    fn test_failed_allocation_releases_created_attachments() {
        let mut backend = create_test_backend();
        backend.fail_textures_after(3);
        let err = GBuffer::create(&mut backend, 800, 600).unwrap_err();
        assert!(matches!(err, RenderError::Backend(BackendError::OutOfMemory)));
        assert_eq!(backend.stats().textures, 3);
        assert_eq!(backend.live_textures(), 0);
    }
}
