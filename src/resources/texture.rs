//! Sampled textures: decoding, generated fallbacks and upload with a full mip chain

use crate::backend::traits::*;
use crate::backend::types::*;
use image::{Rgba, RgbaImage};
use std::path::Path;

/// Decode an image file into RGBA8, flipped so texel row 0 is the bottom of the
/// image, where the generated meshes put v = 0
pub fn decode_image(path: &Path) -> image::ImageResult<RgbaImage> {
    Ok(image::open(path)?.flipv().into_rgba8())
}

pub fn solid_color_image(rgba: [u8; 4]) -> RgbaImage {
    RgbaImage::from_pixel(1, 1, Rgba(rgba))
}

/// `size` x `size` checkerboard of 8-texel squares
pub fn checkerboard_image(size: u32, even: [u8; 4], odd: [u8; 4]) -> RgbaImage {
    RgbaImage::from_fn(size, size, |x, y| {
        if (x / 8 + y / 8) % 2 == 0 {
            Rgba(even)
        } else {
            Rgba(odd)
        }
    })
}

/// Levels of a full mip chain down to 1x1
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

#[derive(Debug, Clone)]
pub struct Texture {
    /// File path, or a pseudo path such as `color:ffffffff` for generated images
    pub path: String,
    pub handle: TextureHandle,
    /// Covers every mip level
    pub view: TextureViewHandle,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
}

impl Texture {
    /// Upload `image` as level 0 and let the device fill the rest of the chain.
    /// Nothing keeps the pixels after this returns.
    pub fn upload(backend: &mut dyn GraphicsBackend, path: &str, image: &RgbaImage) -> BackendResult<Self> {
        let (width, height) = image.dimensions();
        let mip_levels = mip_level_count(width, height);
        let handle = backend.create_texture(&TextureDescriptor {
            label: Some(path.to_string()),
            width,
            height,
            mip_levels,
            format: TextureFormat::Rgba8UnormSrgb,
            role: TextureRole::Asset,
        })?;
        let view = backend.create_texture_view(handle, MipRange::ALL)?;

        backend.write_texture(handle, image.as_raw(), width, height);
        if mip_levels > 1 {
            backend.generate_mipmaps(handle);
        }

        Ok(Self {
            path: path.to_string(),
            handle,
            view,
            width,
            height,
            mip_levels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{HeadlessBackend, RecordedCommand};

    #[test]
    fn test_mip_level_count() {
        assert_eq!(mip_level_count(1, 1), 1);
        assert_eq!(mip_level_count(256, 256), 9);
        assert_eq!(mip_level_count(800, 600), 10);
        assert_eq!(mip_level_count(3, 1), 2);
    }

    #[test]
    fn test_checkerboard_squares() {
        let image = checkerboard_image(16, [255; 4], [0, 0, 0, 255]);
        assert_eq!(image.get_pixel(0, 0), &Rgba([255; 4]));
        assert_eq!(image.get_pixel(8, 0), &Rgba([0, 0, 0, 255]));
        assert_eq!(image.get_pixel(8, 8), &Rgba([255; 4]));
    }

    #[test]
    fn test_upload_generates_mips() {
        let mut backend = HeadlessBackend::new(64, 64);
        let image = checkerboard_image(64, [255; 4], [0, 0, 0, 255]);
        let texture = Texture::upload(&mut backend, "checker", &image).unwrap();

        assert_eq!(texture.mip_levels, 7);
        let desc = backend.texture_descriptor(texture.handle).unwrap();
        assert_eq!(desc.mip_levels, 7);
        assert_eq!(desc.format, TextureFormat::Rgba8UnormSrgb);
        assert_eq!(backend.stats().texture_writes, 1);
        assert_eq!(backend.commands(), &[RecordedCommand::GenerateMipmaps(texture.handle)]);
    }

    #[test]
    fn test_solid_color_has_single_level() {
        let mut backend = HeadlessBackend::new(64, 64);
        let texture = Texture::upload(&mut backend, "color:ff0000ff", &solid_color_image([255, 0, 0, 255])).unwrap();
        assert_eq!(texture.mip_levels, 1);
        assert!(backend.commands().is_empty());
    }

    #[test]
    fn test_decode_flips_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gradient.png");
        let mut source = RgbaImage::new(2, 2);
        source.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        source.save(&path).unwrap();

        let decoded = decode_image(&path).unwrap();
        assert_eq!(decoded.get_pixel(0, 1), &Rgba([255, 0, 0, 255]));
        assert_eq!(decoded.get_pixel(0, 0), &Rgba([0, 0, 0, 0]));
    }
}
