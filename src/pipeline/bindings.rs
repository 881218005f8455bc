//! Bind group layouts and cached bind groups shared by every pass
//!
//! Every pipeline uses the same four groups:
//! - set 0: global block (dynamic uniform)
//! - set 1: local block (dynamic uniform)
//! - set 2: pass parameters (dynamic uniform)
//! - set 3: textures, texture i at binding 2i and its sampler at 2i + 1
//!
//! Uniform blocks all live in the [`UniformStream`] buffer, so one bind group per
//! bound size serves every block of that size; the block is picked with a dynamic offset.

use crate::backend::*;
use crate::error::{RenderError, RenderResult};
use crate::pipeline::{UniformBlock, UniformStream};
use std::collections::HashMap;

/// Bind group indices
pub mod set {
    pub const GLOBAL: u32 = 0;
    pub const LOCAL: u32 = 1;
    pub const PASS: u32 = 2;
    pub const TEXTURES: u32 = 3;
}

/// Bound uniform ranges are rounded to this many bytes
const UNIFORM_SIZE_GRANULARITY: u64 = 16;

/// Layouts and bind group caches for the four binding sets
pub struct Bindings {
    uniform_layout: BindGroupLayoutHandle,
    texture_layouts: HashMap<usize, BindGroupLayoutHandle>,
    stream_buffer: BufferHandle,
    stream_capacity: u64,
    sampler: SamplerHandle,
    uniform_groups: HashMap<u64, BindGroupHandle>,
    texture_groups: HashMap<Vec<TextureViewHandle>, BindGroupHandle>,
}

impl Bindings {
    pub fn new(
        backend: &mut dyn GraphicsBackend,
        stream: &UniformStream,
        sampler: SamplerHandle,
    ) -> RenderResult<Self> {
        let uniform_layout = backend.create_bind_group_layout(&[BindGroupLayoutEntry {
            binding: 0,
            visibility: Visibility::Both,
            ty: BindingType::DynamicUniform,
        }])?;

        let mut bindings = Self {
            uniform_layout,
            texture_layouts: HashMap::new(),
            stream_buffer: stream.buffer(),
            stream_capacity: stream.capacity() as u64,
            sampler,
            uniform_groups: HashMap::new(),
            texture_groups: HashMap::new(),
        };
        for count in [1, 2, 4] {
            bindings.texture_layout(backend, count)?;
        }
        Ok(bindings)
    }

    /// Layout of set 3 for `count` texture/sampler pairs
    pub fn texture_layout(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        count: usize,
    ) -> RenderResult<BindGroupLayoutHandle> {
        if let Some(layout) = self.texture_layouts.get(&count) {
            return Ok(*layout);
        }

        let entries: Vec<BindGroupLayoutEntry> = (0..count as u32)
            .flat_map(|unit| {
                [
                    BindGroupLayoutEntry {
                        binding: 2 * unit,
                        visibility: Visibility::Fragment,
                        ty: BindingType::Texture,
                    },
                    BindGroupLayoutEntry {
                        binding: 2 * unit + 1,
                        visibility: Visibility::Fragment,
                        ty: BindingType::Sampler,
                    },
                ]
            })
            .collect();

        let layout = backend.create_bind_group_layout(&entries)?;
        self.texture_layouts.insert(count, layout);
        Ok(layout)
    }

    /// The four group layouts of a pipeline whose program samples `texture_count` textures
    pub fn pipeline_layouts(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        texture_count: usize,
    ) -> RenderResult<Vec<BindGroupLayoutHandle>> {
        let textures = self.texture_layout(backend, texture_count)?;
        Ok(vec![
            self.uniform_layout,
            self.uniform_layout,
            self.uniform_layout,
            textures,
        ])
    }

    /// Bind `block` of the uniform stream to `set`.
    ///
    /// The bound range covers at least `min_size` bytes, the size the program
    /// declares for the block, even when fewer bytes were written.
    pub fn bind_uniform(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        set: u32,
        block: UniformBlock,
        min_size: u64,
    ) -> RenderResult<()> {
        let size = bound_size(block.size, min_size);
        if block.offset + size > self.stream_capacity {
            return Err(RenderError::UniformOverflow {
                requested: (block.offset + size) as usize,
                capacity: self.stream_capacity as usize,
            });
        }

        let group = match self.uniform_groups.get(&size) {
            Some(group) => *group,
            None => {
                let group = backend.create_bind_group(
                    self.uniform_layout,
                    &[(
                        0,
                        BindGroupEntry::Buffer {
                            buffer: self.stream_buffer,
                            offset: 0,
                            size: Some(size),
                        },
                    )],
                )?;
                self.uniform_groups.insert(size, group);
                group
            }
        };

        backend.set_bind_group(set, group, &[block.offset as u32]);
        Ok(())
    }

    /// Bind `views` to set 3, each with the shared sampler
    pub fn bind_textures(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        views: &[TextureViewHandle],
    ) -> RenderResult<()> {
        let group = match self.texture_groups.get(views) {
            Some(group) => *group,
            None => {
                let layout = self.texture_layout(backend, views.len())?;
                let entries: Vec<(u32, BindGroupEntry)> = views
                    .iter()
                    .enumerate()
                    .flat_map(|(unit, view)| {
                        [
                            (2 * unit as u32, BindGroupEntry::Texture(*view)),
                            (2 * unit as u32 + 1, BindGroupEntry::Sampler(self.sampler)),
                        ]
                    })
                    .collect();
                let group = backend.create_bind_group(layout, &entries)?;
                self.texture_groups.insert(views.to_vec(), group);
                group
            }
        };

        backend.set_bind_group(set::TEXTURES, group, &[]);
        Ok(())
    }

    /// Forget texture bind groups, which reference views that are about to be destroyed
    pub fn invalidate_textures(&mut self) {
        self.texture_groups.clear();
    }

    pub fn cached_uniform_groups(&self) -> usize {
        self.uniform_groups.len()
    }

    pub fn cached_texture_groups(&self) -> usize {
        self.texture_groups.len()
    }
}

/// Size of the range bound for a block: written or declared size, whichever is
/// larger, rounded up to 16 bytes
pub fn bound_size(written: u64, declared: u64) -> u64 {
    let size = written.max(declared).max(UNIFORM_SIZE_GRANULARITY);
    size.div_ceil(UNIFORM_SIZE_GRANULARITY) * UNIFORM_SIZE_GRANULARITY
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_bindings() -> (HeadlessBackend, UniformStream, Bindings) {
        let mut backend = HeadlessBackend::new(64, 64);
        let stream = UniformStream::new(&mut backend, 4096, 256).unwrap();
        let sampler = backend.create_sampler(&SamplerDescriptor::default()).unwrap();
        let bindings = Bindings::new(&mut backend, &stream, sampler).unwrap();
        (backend, stream, bindings)
    }

    #[test]
    fn test_bound_size() {
        assert_eq!(bound_size(0, 0), 16);
        assert_eq!(bound_size(12, 0), 16);
        assert_eq!(bound_size(12, 1040), 1040);
        assert_eq!(bound_size(128, 128), 128);
        assert_eq!(bound_size(140, 16), 144);
    }

    #[test]
    fn test_uniform_groups_shared_per_size() {
        let (mut backend, _stream, mut bindings) = create_test_bindings();
        bindings
            .bind_uniform(&mut backend, set::LOCAL, UniformBlock::new(256, 128), 128)
            .unwrap();
        bindings
            .bind_uniform(&mut backend, set::LOCAL, UniformBlock::new(512, 128), 128)
            .unwrap();
        bindings
            .bind_uniform(&mut backend, set::GLOBAL, UniformBlock::new(0, 12), 1040)
            .unwrap();
        assert_eq!(bindings.cached_uniform_groups(), 2);
    }

    #[test]
    fn test_uniform_range_past_capacity_is_rejected() {
        let (mut backend, _stream, mut bindings) = create_test_bindings();
        let result = bindings.bind_uniform(&mut backend, set::PASS, UniformBlock::new(3840, 4), 1040);
        assert!(matches!(result, Err(RenderError::UniformOverflow { .. })));
    }

    #[test]
    fn test_texture_pairs_use_even_and_odd_bindings() {
        let (mut backend, _stream, mut bindings) = create_test_bindings();
        let texture = backend.create_texture(&TextureDescriptor::default()).unwrap();
        let a = backend.create_texture_view(texture, MipRange::ALL).unwrap();
        let b = backend.create_texture_view(texture, MipRange::ALL).unwrap();

        bindings.bind_textures(&mut backend, &[a, b]).unwrap();
        bindings.bind_textures(&mut backend, &[a, b]).unwrap();
        assert_eq!(bindings.cached_texture_groups(), 1);

        let group = *bindings.texture_groups.values().next().unwrap();
        let entries = backend.bind_group_entries(group).unwrap();
        let slots: Vec<u32> = entries.iter().map(|(binding, _)| *binding).collect();
        assert_eq!(slots, vec![0, 1, 2, 3]);
        assert!(matches!(entries[2].1, BindGroupEntry::Texture(view) if view == b));
    }
}
