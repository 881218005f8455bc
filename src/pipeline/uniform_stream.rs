//! Linear uniform stream for per-frame and per-object uniform blocks.
//!
//! A single GPU uniform buffer holds every uniform block of a frame. The stream is
//! reset with [`UniformStream::begin`], filled front to back with alignment-aware
//! pushes, and uploaded in one write by [`UniformStream::end`]. The offsets recorded
//! while writing are later bound as sub-ranges, never the whole buffer.
//!
//! Push alignment follows std140 for the types we write: scalars align to 4 bytes,
//! 3-vectors, 4-vectors and 4x4 matrices align to 16 bytes.
//!
//! # Example
//!
//! ```ignore
//! stream.begin();
//! let start = stream.head();
//! stream.push_vec3(camera_position)?;
//! stream.push_u32(light_count)?;
//! let global = stream.block_since(start);
//!
//! stream.align(stream.alignment())?;
//! // ... per-object blocks ...
//! stream.end(backend);
//! ```

use crate::backend::{BufferDescriptor, BufferHandle, BufferKind, GraphicsBackend};
use crate::error::{RenderError, RenderResult};
use glam::{Mat4, Vec3, Vec4};

/// A block written into the stream during the current frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct UniformBlock {
    /// Byte offset into the stream buffer.
    pub offset: u64,
    /// Size of the block in bytes.
    pub size: u64,
}

impl UniformBlock {
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Frame-reset linear allocator backed by one uniform buffer
pub struct UniformStream {
    buffer: BufferHandle,
    staging: Vec<u8>,
    head: usize,
    alignment: u32,
    mapped: bool,
    frame: u64,
}

impl UniformStream {
    /// Create a stream of `capacity` bytes whose blocks start at multiples of `alignment`.
    ///
    /// The capacity should be the device's maximum uniform block size and the
    /// alignment its minimum uniform buffer offset alignment.
    pub fn new(
        backend: &mut dyn GraphicsBackend,
        capacity: u32,
        alignment: u32,
    ) -> RenderResult<Self> {
        let alignment = alignment.max(1);
        let buffer = backend.create_buffer(&BufferDescriptor {
            label: Some("Uniform Stream".into()),
            size: capacity as u64,
            kind: BufferKind::Uniform,
        })?;

        Ok(Self {
            buffer,
            staging: vec![0; capacity as usize],
            head: 0,
            alignment,
            mapped: false,
            frame: 0,
        })
    }

    /// Create a stream sized and aligned from the backend's reported limits
    pub fn from_limits(backend: &mut dyn GraphicsBackend) -> RenderResult<Self> {
        let limits = backend.limits();
        Self::new(
            backend,
            limits.max_uniform_buffer_binding_size,
            limits.min_uniform_buffer_offset_alignment,
        )
    }

    pub fn buffer(&self) -> BufferHandle {
        self.buffer
    }

    pub fn capacity(&self) -> usize {
        self.staging.len()
    }

    /// Alignment every bindable block must start at
    pub fn alignment(&self) -> u32 {
        self.alignment
    }

    /// Current write cursor
    pub fn head(&self) -> usize {
        self.head
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped
    }

    /// Number of the frame being written, or last written. Starts at 1 with the
    /// first [`begin`](Self::begin); blocks from any other frame are stale.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Reset the cursor and open the stream for writing
    pub fn begin(&mut self) {
        self.staging[..self.head].fill(0);
        self.head = 0;
        self.mapped = true;
        self.frame += 1;
    }

    /// Advance the cursor to the next multiple of `n`
    pub fn align(&mut self, n: u32) -> RenderResult<()> {
        let aligned = align_up(self.head, n.max(1) as usize);
        if aligned > self.capacity() {
            return Err(RenderError::UniformOverflow {
                requested: aligned,
                capacity: self.capacity(),
            });
        }
        self.head = aligned;
        Ok(())
    }

    /// Align to `align`, then copy `bytes` at the cursor
    pub fn push_bytes(&mut self, bytes: &[u8], align: u32) -> RenderResult<()> {
        debug_assert!(self.mapped, "uniform stream written outside begin/end");
        let start = align_up(self.head, align.max(1) as usize);
        let end = start + bytes.len();
        if end > self.capacity() {
            return Err(RenderError::UniformOverflow {
                requested: end,
                capacity: self.capacity(),
            });
        }
        self.staging[start..end].copy_from_slice(bytes);
        self.head = end;
        Ok(())
    }

    pub fn push_u32(&mut self, value: u32) -> RenderResult<()> {
        self.push_bytes(&value.to_ne_bytes(), 4)
    }

    pub fn push_i32(&mut self, value: i32) -> RenderResult<()> {
        self.push_bytes(&value.to_ne_bytes(), 4)
    }

    pub fn push_f32(&mut self, value: f32) -> RenderResult<()> {
        self.push_bytes(&value.to_ne_bytes(), 4)
    }

    pub fn push_vec3(&mut self, value: Vec3) -> RenderResult<()> {
        self.push_bytes(bytemuck::cast_slice(&value.to_array()), 16)
    }

    pub fn push_vec4(&mut self, value: Vec4) -> RenderResult<()> {
        self.push_bytes(bytemuck::cast_slice(&value.to_array()), 16)
    }

    /// Column-major, matching GLSL `mat4` in std140
    pub fn push_mat4(&mut self, value: &Mat4) -> RenderResult<()> {
        self.push_bytes(bytemuck::cast_slice(&value.to_cols_array()), 16)
    }

    /// The block written between `start` and the current cursor
    pub fn block_since(&self, start: usize) -> UniformBlock {
        UniformBlock::new(start as u64, (self.head - start) as u64)
    }

    /// Bytes written so far this frame
    pub fn written(&self) -> &[u8] {
        &self.staging[..self.head]
    }

    /// Upload everything written this frame and close the stream
    pub fn end(&mut self, backend: &mut dyn GraphicsBackend) {
        if self.head > 0 {
            backend.write_buffer(self.buffer, 0, &self.staging[..self.head]);
        }
        self.mapped = false;
        log::trace!("Uniform stream: {} of {} bytes used", self.head, self.capacity());
    }
}

impl std::fmt::Debug for UniformStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UniformStream")
            .field("capacity", &self.capacity())
            .field("head", &self.head)
            .field("alignment", &self.alignment)
            .field("mapped", &self.mapped)
            .finish()
    }
}

/// Round `value` up to a multiple of `alignment` (not necessarily a power of two)
#[inline]
fn align_up(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment) * alignment
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;

    fn create_test_stream(capacity: u32, alignment: u32) -> (HeadlessBackend, UniformStream) {
        let mut backend = HeadlessBackend::new(64, 64);
        let stream = UniformStream::new(&mut backend, capacity, alignment).unwrap();
        (backend, stream)
    }

    #[test]
    fn test_push_alignment() {
        let (_backend, mut stream) = create_test_stream(1024, 256);
        stream.begin();

        stream.push_vec3(Vec3::new(1.0, 2.0, 3.0)).unwrap();
        assert_eq!(stream.head(), 12);

        // Scalars pack right after a vec3
        stream.push_u32(7).unwrap();
        assert_eq!(stream.head(), 16);

        stream.push_u32(1).unwrap();
        stream.push_vec3(Vec3::ONE).unwrap();
        assert_eq!(stream.head(), 44);

        stream.push_mat4(&Mat4::IDENTITY).unwrap();
        assert_eq!(stream.head(), 48 + 64);
    }

    #[test]
    fn test_align_to_block_alignment() {
        let (_backend, mut stream) = create_test_stream(1024, 256);
        stream.begin();
        stream.push_f32(1.0).unwrap();
        stream.align(stream.alignment()).unwrap();
        assert_eq!(stream.head(), 256);

        // Already aligned stays put
        stream.align(256).unwrap();
        assert_eq!(stream.head(), 256);
    }

    #[test]
    fn test_non_power_of_two_alignment() {
        let (_backend, mut stream) = create_test_stream(1024, 48);
        stream.begin();
        stream.push_u32(1).unwrap();
        stream.align(stream.alignment()).unwrap();
        assert_eq!(stream.head(), 48);
    }

    #[test]
    fn test_overflow_is_reported() {
        let (_backend, mut stream) = create_test_stream(128, 64);
        stream.begin();
        stream.push_mat4(&Mat4::IDENTITY).unwrap();
        stream.push_mat4(&Mat4::IDENTITY).unwrap();
        let err = stream.push_u32(1).unwrap_err();
        assert!(matches!(
            err,
            RenderError::UniformOverflow {
                requested: 132,
                capacity: 128
            }
        ));
        // A failed push leaves the cursor untouched
        assert_eq!(stream.head(), 128);
    }

    #[test]
    fn test_begin_resets_and_end_uploads() {
        let (mut backend, mut stream) = create_test_stream(256, 64);

        stream.begin();
        stream.push_u32(0xdead_beef).unwrap();
        stream.end(&mut backend);
        assert!(!stream.is_mapped());
        assert_eq!(stream.frame(), 1);
        let contents = backend.buffer_contents(stream.buffer()).unwrap();
        assert_eq!(&contents[..4], &0xdead_beef_u32.to_ne_bytes());

        stream.begin();
        assert_eq!(stream.head(), 0);
        assert_eq!(stream.frame(), 2);
        let start = stream.head();
        stream.push_vec4(Vec4::ONE).unwrap();
        let block = stream.block_since(start);
        assert_eq!(block, UniformBlock::new(0, 16));
        assert_eq!(block.end(), 16);
    }

    #[test]
    fn test_matrices_are_column_major() {
        let (_backend, mut stream) = create_test_stream(256, 64);
        let m = Mat4::from_translation(Vec3::new(2.0, 3.0, 4.0));
        stream.begin();
        stream.push_mat4(&m).unwrap();
        let floats: Vec<f32> = bytemuck::pod_collect_to_vec(stream.written());
        assert_eq!(&floats[12..15], &[2.0, 3.0, 4.0]);
    }
}
