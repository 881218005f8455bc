//! Vertex-layout binder
//!
//! Reconciles the vertex inputs a program declares with the attributes a submesh
//! provides, and memoizes the result on the submesh keyed by program handle.

use crate::backend::{BufferHandle, VertexAttribute, VertexFormat, VertexLayout};
use crate::error::{RenderError, RenderResult};
use crate::resources::{Mesh, Program};
use std::sync::Arc;

/// One program input bound to submesh data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundAttribute {
    pub location: u32,
    pub format: VertexFormat,
    /// Byte offset of the attribute for the first vertex, from the start of the shared buffer
    pub offset: u64,
}

/// Everything needed to feed one submesh to one program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexBinding {
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    /// Byte offset of the submesh's first vertex in the shared buffer
    pub base_offset: u64,
    pub stride: u64,
    pub attributes: Vec<BoundAttribute>,
}

impl VertexBinding {
    pub fn attribute(&self, location: u32) -> Option<&BoundAttribute> {
        self.attributes.iter().find(|a| a.location == location)
    }

    /// Layout relative to `base_offset`, which is where the vertex buffer gets bound
    pub fn buffer_layout(&self) -> VertexLayout {
        VertexLayout {
            stride: self.stride,
            attributes: self
                .attributes
                .iter()
                .map(|a| VertexAttribute {
                    location: a.location,
                    format: a.format,
                    offset: a.offset - self.base_offset,
                })
                .collect(),
        }
    }
}

/// Return the binding of `program` for a submesh, building and caching it on first use.
/// Later calls share the cached binding.
///
/// Fails with [`RenderError::IncompatibleVertexLayout`] as soon as one declared input
/// has no attribute at the same location. Nothing is cached in that case.
pub fn resolve(mesh: &mut Mesh, submesh_index: usize, program: &Program) -> RenderResult<Arc<VertexBinding>> {
    let Some(handle) = program.handle else {
        return Err(RenderError::ShaderCompilation {
            program: program.name.clone(),
            message: "program has no valid handle".into(),
        });
    };
    let vertex_buffer = mesh.vertex_buffer;
    let index_buffer = mesh.index_buffer;
    let submesh = mesh
        .submeshes
        .get_mut(submesh_index)
        .ok_or(RenderError::InvalidIndex {
            kind: "submesh",
            index: submesh_index,
        })?;

    if !submesh.bindings.contains_key(&handle) {
        let mut attributes = Vec::with_capacity(program.reflection.vertex_inputs.len());
        for input in &program.reflection.vertex_inputs {
            let provided = submesh.layout.attribute(input.location).ok_or_else(|| {
                RenderError::IncompatibleVertexLayout {
                    program: program.name.clone(),
                    location: input.location,
                }
            })?;
            let format = VertexFormat::from_component_count(provided.component_count).ok_or_else(
                || RenderError::IncompatibleVertexLayout {
                    program: program.name.clone(),
                    location: input.location,
                },
            )?;
            attributes.push(BoundAttribute {
                location: input.location,
                format,
                offset: submesh.vertex_offset + provided.offset,
            });
        }

        log::debug!(
            "Built vertex binding for program '{}' ({} attributes, stride {})",
            program.name,
            attributes.len(),
            submesh.layout.stride
        );
        submesh.bindings.insert(
            handle,
            Arc::new(VertexBinding {
                vertex_buffer,
                index_buffer,
                base_offset: submesh.vertex_offset,
                stride: submesh.layout.stride,
                attributes,
            }),
        );
    }

    submesh
        .bindings
        .get(&handle)
        .map(Arc::clone)
        .ok_or(RenderError::InvalidIndex {
            kind: "vertex binding",
            index: submesh_index,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{HeadlessBackend, ProgramHandle};
    use crate::resources::{Geometry, MeshBuilder, ProgramReflection, VertexInput};
    use std::path::PathBuf;

    fn program_with_inputs(handle: u64, locations: &[(u32, u8)]) -> Program {
        Program {
            name: "TEST".into(),
            path: PathBuf::from("test.glsl"),
            last_write: None,
            handle: Some(ProgramHandle(handle)),
            reflection: ProgramReflection {
                vertex_inputs: locations
                    .iter()
                    .map(|&(location, component_count)| VertexInput {
                        location,
                        component_count,
                    })
                    .collect(),
                ..Default::default()
            },
        }
    }

    fn create_test_mesh(backend: &mut HeadlessBackend) -> Mesh {
        MeshBuilder::new("test")
            .add_geometry(&Geometry::plane(1.0, 1.0, 1))
            .add_geometry(&Geometry::cube())
            .build(backend)
            .unwrap()
    }

    #[test]
    fn test_resolve_offsets_include_submesh_base() {
        let mut backend = HeadlessBackend::new(64, 64);
        let mut mesh = create_test_mesh(&mut backend);
        let program = program_with_inputs(100, &[(0, 3), (2, 2)]);

        let base = mesh.submeshes[1].vertex_offset;
        assert!(base > 0);
        let binding = resolve(&mut mesh, 1, &program).unwrap();
        assert_eq!(binding.stride, 56);
        assert_eq!(binding.attribute(0).unwrap().offset, base);
        assert_eq!(binding.attribute(2).unwrap().offset, base + 24);
        assert_eq!(binding.attribute(2).unwrap().format, VertexFormat::Float32x2);

        let layout = binding.buffer_layout();
        assert_eq!(layout.attributes[1].offset, 24);
        assert_eq!(mesh.submeshes[1].cached_bindings(), 1);
    }

    #[test]
    fn test_resolve_is_cached_per_program() {
        let mut backend = HeadlessBackend::new(64, 64);
        let mut mesh = create_test_mesh(&mut backend);
        let a = program_with_inputs(1, &[(0, 3)]);
        let b = program_with_inputs(2, &[(0, 3), (1, 3)]);

        let first = resolve(&mut mesh, 0, &a).unwrap();
        let again = resolve(&mut mesh, 0, &a).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(mesh.submeshes[0].cached_bindings(), 1);
        resolve(&mut mesh, 0, &b).unwrap();
        assert_eq!(mesh.submeshes[0].cached_bindings(), 2);

        mesh.invalidate_program(ProgramHandle(1));
        assert!(!mesh.submeshes[0].has_binding_for(ProgramHandle(1)));
        assert!(mesh.submeshes[0].has_binding_for(ProgramHandle(2)));
    }

    #[test]
    fn test_missing_attribute_is_fatal() {
        let mut backend = HeadlessBackend::new(64, 64);
        let mut mesh = create_test_mesh(&mut backend);
        let program = program_with_inputs(7, &[(0, 3), (6, 4)]);

        let err = resolve(&mut mesh, 0, &program).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(
            err,
            RenderError::IncompatibleVertexLayout { location: 6, .. }
        ));
        assert_eq!(mesh.submeshes[0].cached_bindings(), 0);
    }

    #[test]
    fn test_invalid_submesh_index() {
        let mut backend = HeadlessBackend::new(64, 64);
        let mut mesh = create_test_mesh(&mut backend);
        let program = program_with_inputs(7, &[(0, 3)]);
        let err = resolve(&mut mesh, 9, &program).unwrap_err();
        assert!(!err.is_fatal());
    }
}
