//! Mesh data structures and generation
//!
//! A [`Mesh`] owns one vertex buffer and one index buffer shared by all of its
//! submeshes. Each [`Submesh`] knows where its vertices start in the shared buffer,
//! which index range it draws, and its own attribute layout. It also caches the
//! vertex bindings built for each program it was drawn with.

use crate::backend::{BufferDescriptor, BufferHandle, BufferKind, GraphicsBackend, ProgramHandle};
use crate::error::RenderResult;
use crate::pipeline::VertexBinding;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3};
use std::collections::HashMap;
use std::sync::Arc;

/// Attribute locations of the standard vertex
pub mod location {
    pub const POSITION: u32 = 0;
    pub const NORMAL: u32 = 1;
    pub const TEX_COORD: u32 = 2;
    pub const TANGENT: u32 = 3;
    pub const BITANGENT: u32 = 4;
}

/// Start of every submesh in the shared vertex buffer is a multiple of this
const SUBMESH_ALIGNMENT: usize = 16;

/// Standard vertex with position, normal, UV, tangent and bitangent
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
    pub tangent: Vec3,
    pub bitangent: Vec3,
}

impl Vertex {
    pub fn new(position: Vec3, normal: Vec3, uv: Vec2, tangent: Vec3) -> Self {
        Self {
            position,
            normal,
            uv,
            tangent,
            bitangent: normal.cross(tangent),
        }
    }
}

/// Vertex of the full-screen quad
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ScreenVertex {
    pub position: Vec3,
    pub uv: Vec2,
}

/// One attribute a submesh provides
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmeshAttribute {
    pub location: u32,
    pub component_count: u8,
    /// Byte offset inside one vertex
    pub offset: u64,
}

/// Attribute layout of a submesh's vertices
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmeshLayout {
    pub stride: u64,
    pub attributes: Vec<SubmeshAttribute>,
}

impl SubmeshLayout {
    /// Layout of [`Vertex`]
    pub fn standard() -> Self {
        Self {
            stride: std::mem::size_of::<Vertex>() as u64,
            attributes: vec![
                SubmeshAttribute { location: location::POSITION, component_count: 3, offset: 0 },
                SubmeshAttribute { location: location::NORMAL, component_count: 3, offset: 12 },
                SubmeshAttribute { location: location::TEX_COORD, component_count: 2, offset: 24 },
                SubmeshAttribute { location: location::TANGENT, component_count: 3, offset: 32 },
                SubmeshAttribute { location: location::BITANGENT, component_count: 3, offset: 44 },
            ],
        }
    }

    /// Layout of [`ScreenVertex`]: position at 0, texture coordinates at 1
    pub fn screen() -> Self {
        Self {
            stride: std::mem::size_of::<ScreenVertex>() as u64,
            attributes: vec![
                SubmeshAttribute { location: 0, component_count: 3, offset: 0 },
                SubmeshAttribute { location: 1, component_count: 2, offset: 12 },
            ],
        }
    }

    pub fn attribute(&self, location: u32) -> Option<&SubmeshAttribute> {
        self.attributes.iter().find(|a| a.location == location)
    }
}

/// A drawable range of a mesh
#[derive(Debug, Clone)]
pub struct Submesh {
    pub layout: SubmeshLayout,
    /// Byte offset of the first vertex in the shared vertex buffer
    pub vertex_offset: u64,
    /// First index in the shared index buffer
    pub index_offset: u32,
    pub index_count: u32,
    pub(crate) bindings: HashMap<ProgramHandle, Arc<VertexBinding>>,
}

impl Submesh {
    /// Number of programs with a cached binding for this submesh
    pub fn cached_bindings(&self) -> usize {
        self.bindings.len()
    }

    pub fn has_binding_for(&self, program: ProgramHandle) -> bool {
        self.bindings.contains_key(&program)
    }
}

/// GPU mesh: shared buffers plus submeshes
#[derive(Debug, Clone)]
pub struct Mesh {
    pub name: String,
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub submeshes: Vec<Submesh>,
}

impl Mesh {
    /// Drop every cached binding built for `program`
    pub fn invalidate_program(&mut self, program: ProgramHandle) {
        for submesh in &mut self.submeshes {
            submesh.bindings.remove(&program);
        }
    }
}

/// CPU-side geometry with standard vertices
#[derive(Debug, Clone)]
pub struct Geometry {
    pub name: String,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl Geometry {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            vertices: Vec::new(),
            indices: Vec::new(),
        }
    }

    /// Calculate triangle count
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Copy with every vertex moved by `matrix`, used to pose the parts of a composite model
    pub fn transformed(&self, matrix: Mat4) -> Self {
        let normal_matrix = matrix.inverse().transpose();
        let direction = |m: &Mat4, v: Vec3| m.transform_vector3(v).normalize_or_zero();
        Self {
            name: self.name.clone(),
            vertices: self
                .vertices
                .iter()
                .map(|v| Vertex {
                    position: matrix.transform_point3(v.position),
                    normal: direction(&normal_matrix, v.normal),
                    uv: v.uv,
                    tangent: direction(&matrix, v.tangent),
                    bitangent: direction(&matrix, v.bitangent),
                })
                .collect(),
            indices: self.indices.clone(),
        }
    }

    /// Create a unit cube centered at origin
    pub fn cube() -> Self {
        let mut geometry = Geometry::new("cube");

        let faces = [
            (Vec3::Z, Vec3::X),
            (-Vec3::Z, -Vec3::X),
            (Vec3::X, -Vec3::Z),
            (-Vec3::X, Vec3::Z),
            (Vec3::Y, Vec3::X),
            (-Vec3::Y, Vec3::X),
        ];

        for (normal, tangent) in faces {
            let bitangent = normal.cross(tangent);
            let base = geometry.vertices.len() as u32;
            let corners = [
                (-0.5, -0.5, Vec2::new(0.0, 0.0)),
                (0.5, -0.5, Vec2::new(1.0, 0.0)),
                (0.5, 0.5, Vec2::new(1.0, 1.0)),
                (-0.5, 0.5, Vec2::new(0.0, 1.0)),
            ];
            for (u, v, uv) in corners {
                let position = normal * 0.5 + tangent * u + bitangent * v;
                geometry.vertices.push(Vertex::new(position, normal, uv, tangent));
            }
            geometry
                .indices
                .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }

        geometry
    }

    /// Create a UV sphere of radius 0.5
    pub fn sphere(segments: u32, rings: u32) -> Self {
        let mut geometry = Geometry::new("sphere");

        let segment_angle = 2.0 * std::f32::consts::PI / segments as f32;
        let ring_angle = std::f32::consts::PI / rings as f32;

        for ring in 0..=rings {
            let phi = ring as f32 * ring_angle;
            let y = phi.cos();
            let ring_radius = phi.sin();

            for segment in 0..=segments {
                let theta = segment as f32 * segment_angle;
                let x = ring_radius * theta.cos();
                let z = ring_radius * theta.sin();

                let normal = Vec3::new(x, y, z).normalize_or_zero();
                let uv = Vec2::new(
                    segment as f32 / segments as f32,
                    1.0 - ring as f32 / rings as f32,
                );
                // Tangent along theta direction
                let tangent = Vec3::new(-theta.sin(), 0.0, theta.cos());

                geometry
                    .vertices
                    .push(Vertex::new(Vec3::new(x, y, z) * 0.5, normal, uv, tangent));
            }
        }

        for ring in 0..rings {
            for segment in 0..segments {
                let current = ring * (segments + 1) + segment;
                let next = current + segments + 1;

                geometry.indices.extend_from_slice(&[
                    current,
                    current + 1,
                    next,
                    current + 1,
                    next + 1,
                    next,
                ]);
            }
        }

        geometry
    }

    /// Create a plane on the XZ axis facing +Y
    pub fn plane(width: f32, depth: f32, subdivisions: u32) -> Self {
        let mut geometry = Geometry::new("plane");
        let subdivisions = subdivisions.max(1);

        let half_width = width / 2.0;
        let half_depth = depth / 2.0;
        let step_x = width / subdivisions as f32;
        let step_z = depth / subdivisions as f32;

        for z in 0..=subdivisions {
            for x in 0..=subdivisions {
                let px = -half_width + x as f32 * step_x;
                let pz = -half_depth + z as f32 * step_z;

                geometry.vertices.push(Vertex::new(
                    Vec3::new(px, 0.0, pz),
                    Vec3::Y,
                    Vec2::new(x as f32 / subdivisions as f32, z as f32 / subdivisions as f32),
                    Vec3::X,
                ));
            }
        }

        for z in 0..subdivisions {
            for x in 0..subdivisions {
                let current = z * (subdivisions + 1) + x;
                let next = current + subdivisions + 1;

                geometry.indices.extend_from_slice(&[
                    current,
                    next,
                    current + 1,
                    current + 1,
                    next,
                    next + 1,
                ]);
            }
        }

        geometry
    }

    /// Create an open cylinder along Y
    pub fn cylinder(radius: f32, height: f32, segments: u32) -> Self {
        let mut geometry = Geometry::new("cylinder");

        let half_height = height / 2.0;
        let angle_step = 2.0 * std::f32::consts::PI / segments as f32;

        for i in 0..=segments {
            let angle = i as f32 * angle_step;
            let normal = Vec3::new(angle.cos(), 0.0, angle.sin());
            let tangent = Vec3::new(-angle.sin(), 0.0, angle.cos());
            let u = i as f32 / segments as f32;

            geometry.vertices.push(Vertex::new(
                Vec3::new(normal.x * radius, -half_height, normal.z * radius),
                normal,
                Vec2::new(u, 0.0),
                tangent,
            ));
            geometry.vertices.push(Vertex::new(
                Vec3::new(normal.x * radius, half_height, normal.z * radius),
                normal,
                Vec2::new(u, 1.0),
                tangent,
            ));
        }

        for i in 0..segments {
            let base = i * 2;
            geometry
                .indices
                .extend_from_slice(&[base, base + 1, base + 2, base + 1, base + 3, base + 2]);
        }

        geometry
    }
}

/// Packs several submeshes into one shared vertex buffer and one shared index buffer
#[derive(Debug, Default)]
pub struct MeshBuilder {
    name: String,
    vertex_data: Vec<u8>,
    indices: Vec<u32>,
    submeshes: Vec<Submesh>,
}

impl MeshBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Append raw vertex bytes with their layout; indices are relative to the submesh
    pub fn add_raw(mut self, layout: SubmeshLayout, vertex_bytes: &[u8], indices: &[u32]) -> Self {
        let padded = self.vertex_data.len().next_multiple_of(SUBMESH_ALIGNMENT);
        self.vertex_data.resize(padded, 0);

        self.submeshes.push(Submesh {
            layout,
            vertex_offset: padded as u64,
            index_offset: self.indices.len() as u32,
            index_count: indices.len() as u32,
            bindings: HashMap::new(),
        });
        self.vertex_data.extend_from_slice(vertex_bytes);
        self.indices.extend_from_slice(indices);
        self
    }

    pub fn add_geometry(self, geometry: &Geometry) -> Self {
        self.add_raw(
            SubmeshLayout::standard(),
            bytemuck::cast_slice(&geometry.vertices),
            &geometry.indices,
        )
    }

    pub fn submesh_count(&self) -> usize {
        self.submeshes.len()
    }

    /// Upload the shared buffers
    pub fn build(self, backend: &mut dyn GraphicsBackend) -> RenderResult<Mesh> {
        let vertex_buffer = backend.create_buffer_init(
            &BufferDescriptor {
                label: Some(format!("{} Vertex Buffer", self.name)),
                size: self.vertex_data.len() as u64,
                kind: BufferKind::Vertex,
            },
            &self.vertex_data,
        )?;

        let index_buffer = backend.create_buffer_init(
            &BufferDescriptor {
                label: Some(format!("{} Index Buffer", self.name)),
                size: (self.indices.len() * 4) as u64,
                kind: BufferKind::Index,
            },
            bytemuck::cast_slice(&self.indices),
        )?;

        Ok(Mesh {
            name: self.name,
            vertex_buffer,
            index_buffer,
            submeshes: self.submeshes,
        })
    }
}

/// Two triangles covering clip space. Render targets store their top row first,
/// so V grows downwards.
pub fn screen_quad() -> (Vec<ScreenVertex>, Vec<u32>) {
    let vertices = vec![
        ScreenVertex { position: Vec3::new(-1.0, -1.0, 0.0), uv: Vec2::new(0.0, 1.0) },
        ScreenVertex { position: Vec3::new(1.0, -1.0, 0.0), uv: Vec2::new(1.0, 1.0) },
        ScreenVertex { position: Vec3::new(1.0, 1.0, 0.0), uv: Vec2::new(1.0, 0.0) },
        ScreenVertex { position: Vec3::new(-1.0, 1.0, 0.0), uv: Vec2::new(0.0, 0.0) },
    ];
    (vertices, vec![0, 1, 2, 0, 2, 3])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;

    #[test]
    fn test_standard_layout_matches_vertex() {
        let layout = SubmeshLayout::standard();
        assert_eq!(layout.stride, 56);
        assert_eq!(layout.attribute(location::BITANGENT).unwrap().offset, 44);
        assert!(layout.attribute(7).is_none());
    }

    #[test]
    fn test_generated_geometry() {
        let cube = Geometry::cube();
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.triangle_count(), 12);
        for v in &cube.vertices {
            assert!((v.position.abs().max_element() - 0.5).abs() < 1e-6);
            assert!(v.bitangent.dot(v.normal).abs() < 1e-6);
        }

        let sphere = Geometry::sphere(16, 8);
        assert_eq!(sphere.vertices.len(), 17 * 9);
        assert_eq!(sphere.triangle_count(), 16 * 8 * 2);

        let plane = Geometry::plane(10.0, 10.0, 4);
        assert_eq!(plane.vertices.len(), 25);
        assert!(plane.vertices.iter().all(|v| v.normal == Vec3::Y));
    }

    #[test]
    fn test_transformed_keeps_normals_unit_length() {
        let cube = Geometry::cube();
        let moved = cube.transformed(Mat4::from_scale_rotation_translation(
            Vec3::new(2.0, 1.0, 1.0),
            glam::Quat::from_rotation_y(0.5),
            Vec3::new(0.0, 3.0, 0.0),
        ));
        assert_eq!(moved.indices, cube.indices);
        for (before, after) in cube.vertices.iter().zip(&moved.vertices) {
            assert!((after.normal.length() - 1.0).abs() < 1e-5);
            assert_eq!(after.uv, before.uv);
        }
        let top = moved.vertices.iter().map(|v| v.position.y).fold(f32::MIN, f32::max);
        assert!((top - 3.5).abs() < 1e-5);
    }

    #[test]
    fn test_builder_packs_submeshes() {
        let mut backend = HeadlessBackend::new(64, 64);
        let cube = Geometry::cube();
        let (quad_vertices, quad_indices) = screen_quad();
        let mesh = MeshBuilder::new("combined")
            .add_raw(
                SubmeshLayout::screen(),
                bytemuck::cast_slice(&quad_vertices),
                &quad_indices,
            )
            .add_geometry(&cube)
            .build(&mut backend)
            .unwrap();

        assert_eq!(mesh.submeshes.len(), 2);
        let quad = &mesh.submeshes[0];
        let cube_sub = &mesh.submeshes[1];
        assert_eq!(quad.vertex_offset, 0);
        assert_eq!(quad.index_count, 6);
        // 4 quad vertices of 20 bytes, padded to 16
        assert_eq!(cube_sub.vertex_offset, 80);
        assert_eq!(cube_sub.index_offset, 6);
        assert_eq!(cube_sub.index_count, 36);

        let vertex_bytes = backend.buffer_contents(mesh.vertex_buffer).unwrap();
        assert_eq!(vertex_bytes.len(), 80 + 24 * 56);
        let index_bytes = backend.buffer_contents(mesh.index_buffer).unwrap();
        assert_eq!(index_bytes.len(), 42 * 4);
    }
}
