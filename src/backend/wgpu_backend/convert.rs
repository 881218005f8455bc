//! Backend descriptions expressed as wgpu types

use crate::backend::traits::{BindingType, LoadOp, Visibility};
use crate::backend::types::*;

impl From<TextureFormat> for wgpu::TextureFormat {
    fn from(format: TextureFormat) -> Self {
        match format {
            TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
            TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
            TextureFormat::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
            TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            TextureFormat::Depth24Plus => wgpu::TextureFormat::Depth24Plus,
        }
    }
}

/// Swapchain formats the renderer can target
pub(super) fn surface_format(format: wgpu::TextureFormat) -> Option<TextureFormat> {
    Some(match format {
        wgpu::TextureFormat::Rgba8Unorm => TextureFormat::Rgba8Unorm,
        wgpu::TextureFormat::Rgba8UnormSrgb => TextureFormat::Rgba8UnormSrgb,
        wgpu::TextureFormat::Bgra8Unorm => TextureFormat::Bgra8Unorm,
        wgpu::TextureFormat::Bgra8UnormSrgb => TextureFormat::Bgra8UnormSrgb,
        wgpu::TextureFormat::Rgba16Float => TextureFormat::Rgba16Float,
        _ => return None,
    })
}

impl From<TextureRole> for wgpu::TextureUsages {
    fn from(role: TextureRole) -> Self {
        match role {
            TextureRole::RenderTarget => {
                wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING
            }
            TextureRole::Asset => {
                wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_DST
                    | wgpu::TextureUsages::RENDER_ATTACHMENT
            }
        }
    }
}

impl From<BufferKind> for wgpu::BufferUsages {
    fn from(kind: BufferKind) -> Self {
        match kind {
            BufferKind::Vertex => wgpu::BufferUsages::VERTEX,
            BufferKind::Index => wgpu::BufferUsages::INDEX,
            BufferKind::Uniform => wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        }
    }
}

impl From<VertexFormat> for wgpu::VertexFormat {
    fn from(format: VertexFormat) -> Self {
        match format {
            VertexFormat::Float32 => wgpu::VertexFormat::Float32,
            VertexFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
            VertexFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
            VertexFormat::Float32x4 => wgpu::VertexFormat::Float32x4,
        }
    }
}

pub(super) fn vertex_attributes(layout: &VertexLayout) -> Vec<wgpu::VertexAttribute> {
    layout
        .attributes
        .iter()
        .map(|attribute| wgpu::VertexAttribute {
            format: attribute.format.into(),
            offset: attribute.offset,
            shader_location: attribute.location,
        })
        .collect()
}

impl From<CompareFunction> for wgpu::CompareFunction {
    fn from(compare: CompareFunction) -> Self {
        match compare {
            CompareFunction::Less => wgpu::CompareFunction::Less,
            CompareFunction::LessEqual => wgpu::CompareFunction::LessEqual,
            CompareFunction::Greater => wgpu::CompareFunction::Greater,
            CompareFunction::Always => wgpu::CompareFunction::Always,
        }
    }
}

impl From<DepthState> for wgpu::DepthStencilState {
    fn from(depth: DepthState) -> Self {
        wgpu::DepthStencilState {
            format: depth.format.into(),
            depth_write_enabled: depth.write,
            depth_compare: depth.compare.into(),
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }
    }
}

impl From<Blend> for wgpu::BlendState {
    fn from(blend: Blend) -> Self {
        match blend {
            Blend::Alpha => wgpu::BlendState::ALPHA_BLENDING,
            Blend::Additive => wgpu::BlendState {
                color: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::One,
                    dst_factor: wgpu::BlendFactor::One,
                    operation: wgpu::BlendOperation::Add,
                },
                alpha: wgpu::BlendComponent {
                    src_factor: wgpu::BlendFactor::Zero,
                    dst_factor: wgpu::BlendFactor::One,
                    operation: wgpu::BlendOperation::Add,
                },
            },
        }
    }
}

pub(super) fn sampler_descriptor(desc: &SamplerDescriptor) -> wgpu::SamplerDescriptor<'_> {
    wgpu::SamplerDescriptor {
        label: desc.label.as_deref(),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        mipmap_filter: wgpu::FilterMode::Linear,
        ..Default::default()
    }
}

impl From<Visibility> for wgpu::ShaderStages {
    fn from(visibility: Visibility) -> Self {
        match visibility {
            Visibility::Vertex => wgpu::ShaderStages::VERTEX,
            Visibility::Fragment => wgpu::ShaderStages::FRAGMENT,
            Visibility::Both => wgpu::ShaderStages::VERTEX_FRAGMENT,
        }
    }
}

impl From<BindingType> for wgpu::BindingType {
    fn from(ty: BindingType) -> Self {
        match ty {
            BindingType::DynamicUniform => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: true,
                min_binding_size: None,
            },
            BindingType::Texture => wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            BindingType::Sampler => wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        }
    }
}

pub(super) fn color_load(load: &LoadOp) -> wgpu::LoadOp<wgpu::Color> {
    match load {
        LoadOp::Load => wgpu::LoadOp::Load,
        LoadOp::Clear([r, g, b, a]) => wgpu::LoadOp::Clear(wgpu::Color {
            r: f64::from(*r),
            g: f64::from(*g),
            b: f64::from(*b),
            a: f64::from(*a),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surface_formats_round_trip() {
        for format in [
            TextureFormat::Rgba8Unorm,
            TextureFormat::Bgra8UnormSrgb,
            TextureFormat::Rgba16Float,
        ] {
            assert_eq!(surface_format(format.into()), Some(format));
        }
        assert_eq!(surface_format(wgpu::TextureFormat::Rgb10a2Unorm), None);
    }

    #[test]
    fn test_uniform_buffers_are_writable() {
        let usages = wgpu::BufferUsages::from(BufferKind::Uniform);
        assert!(usages.contains(wgpu::BufferUsages::COPY_DST));
    }
}
