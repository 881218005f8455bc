//! Shader programs
//!
//! Every program lives in a shared source file next to other programs. A program is
//! selected by prepending a version directive, a define with the program's name and
//! a stage define (`VERTEX` or `FRAGMENT`) to the file body. Both stages are parsed
//! and validated with naga before anything reaches the GPU, and the parsed vertex
//! stage provides the program's active vertex inputs.

use crate::backend::{GraphicsBackend, ProgramDescriptor, ProgramHandle};
use naga::front::glsl::{Frontend, Options};
use naga::valid::{Capabilities, ValidationFlags, Validator};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Version directive every composed stage starts with
pub const GLSL_VERSION: &str = "#version 450";

/// Shader stage selected by the stage define
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Vertex,
    Fragment,
}

impl Stage {
    fn define(&self) -> &'static str {
        match self {
            Stage::Vertex => "VERTEX",
            Stage::Fragment => "FRAGMENT",
        }
    }

    fn naga_stage(&self) -> naga::ShaderStage {
        match self {
            Stage::Vertex => naga::ShaderStage::Vertex,
            Stage::Fragment => naga::ShaderStage::Fragment,
        }
    }
}

/// An active vertex input of a program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexInput {
    pub location: u32,
    pub component_count: u8,
}

/// A uniform block declared by either stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformBlockInfo {
    pub group: u32,
    pub binding: u32,
    /// Size of the declared block, the smallest range that may be bound to it
    pub min_size: u64,
}

/// What a program expects from the draw that uses it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramReflection {
    /// Vertex inputs ordered by location
    pub vertex_inputs: Vec<VertexInput>,
    pub uniform_blocks: Vec<UniformBlockInfo>,
    /// Number of fragment outputs
    pub color_outputs: u32,
}

impl ProgramReflection {
    pub fn uniform_block(&self, group: u32) -> Option<&UniformBlockInfo> {
        self.uniform_blocks.iter().find(|b| b.group == group)
    }
}

/// A loaded program and what is needed to rebuild it
#[derive(Debug, Clone)]
pub struct Program {
    /// Logical name, also the define that selects the program in its source file
    pub name: String,
    pub path: PathBuf,
    /// Modification time of `path` when the program was last built
    pub last_write: Option<SystemTime>,
    /// `None` while the source fails to compile
    pub handle: Option<ProgramHandle>,
    pub reflection: ProgramReflection,
}

impl Program {
    /// Build a program from the file at `path`. Failures are logged and leave `handle` empty.
    pub fn load(backend: &mut dyn GraphicsBackend, path: &Path, name: &str) -> Self {
        let last_write = modified_time(path);
        let mut program = Self {
            name: name.to_string(),
            path: path.to_path_buf(),
            last_write,
            handle: None,
            reflection: ProgramReflection::default(),
        };
        program.rebuild(backend);
        program
    }

    /// Whether the backing file has been written since the program was built
    pub fn is_stale(&self) -> bool {
        match (modified_time(&self.path), self.last_write) {
            (Some(current), Some(last)) => current > last,
            (Some(_), None) => true,
            _ => false,
        }
    }

    /// Destroy the current handle and compile again from disk.
    ///
    /// Returns the handle that was destroyed, if any. The new handle may be `None`
    /// when the source no longer compiles.
    pub fn rebuild(&mut self, backend: &mut dyn GraphicsBackend) -> Option<ProgramHandle> {
        let stale = self.handle.take();
        if let Some(handle) = stale {
            backend.destroy_program(handle);
        }
        self.last_write = modified_time(&self.path);

        let source = match std::fs::read_to_string(&self.path) {
            Ok(source) => source,
            Err(err) => {
                log::error!("Could not read shader file {}: {}", self.path.display(), err);
                return stale;
            }
        };

        match compile(backend, &source, &self.name) {
            Ok((handle, reflection)) => {
                log::info!(
                    "Program '{}' built from {} ({} vertex inputs)",
                    self.name,
                    self.path.display(),
                    reflection.vertex_inputs.len()
                );
                self.handle = Some(handle);
                self.reflection = reflection;
            }
            Err(message) => {
                log::error!("Program '{}' failed to build:\n{}", self.name, message);
            }
        }
        stale
    }
}

/// Compose the source of one stage of the program `name`
pub fn compose_source(body: &str, name: &str, stage: Stage) -> String {
    format!(
        "{}\n#define {}\n#define {}\n{}",
        GLSL_VERSION,
        name,
        stage.define(),
        body
    )
}

/// Parse and validate both stages, reflect them, then create the program on the backend
pub fn compile(
    backend: &mut dyn GraphicsBackend,
    body: &str,
    name: &str,
) -> Result<(ProgramHandle, ProgramReflection), String> {
    let vertex_source = compose_source(body, name, Stage::Vertex);
    let fragment_source = compose_source(body, name, Stage::Fragment);

    let vertex = parse_stage(&vertex_source, Stage::Vertex)?;
    let fragment = parse_stage(&fragment_source, Stage::Fragment)?;
    let reflection = reflect(&vertex, &fragment);

    let handle = backend
        .create_program(&ProgramDescriptor {
            label: Some(name.to_string()),
            vertex_source,
            fragment_source,
        })
        .map_err(|err| err.to_string())?;

    Ok((handle, reflection))
}

fn parse_stage(source: &str, stage: Stage) -> Result<naga::Module, String> {
    let mut frontend = Frontend::default();
    let module = frontend
        .parse(&Options::from(stage.naga_stage()), source)
        .map_err(|err| format!("{} stage: {:?}", stage.define(), err))?;

    Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .map_err(|err| format!("{} stage validation: {:?}", stage.define(), err))?;

    Ok(module)
}

/// Collect vertex inputs, uniform blocks and fragment outputs of a parsed program
fn reflect(vertex: &naga::Module, fragment: &naga::Module) -> ProgramReflection {
    let mut vertex_inputs: Vec<VertexInput> = vertex
        .entry_points
        .iter()
        .filter(|ep| ep.stage == naga::ShaderStage::Vertex)
        .flat_map(|ep| ep.function.arguments.iter())
        .filter_map(|arg| match arg.binding {
            Some(naga::Binding::Location { location, .. }) => {
                component_count(&vertex.types[arg.ty].inner).map(|component_count| VertexInput {
                    location,
                    component_count,
                })
            }
            _ => None,
        })
        .collect();
    vertex_inputs.sort_by_key(|input| input.location);
    vertex_inputs.dedup_by_key(|input| input.location);

    let mut blocks: BTreeMap<(u32, u32), u64> = BTreeMap::new();
    for module in [vertex, fragment] {
        for (_, var) in module.global_variables.iter() {
            if var.space != naga::AddressSpace::Uniform {
                continue;
            }
            let Some(binding) = &var.binding else {
                continue;
            };
            let size = module.types[var.ty].inner.size(module.to_ctx()) as u64;
            let entry = blocks.entry((binding.group, binding.binding)).or_insert(0);
            *entry = (*entry).max(size);
        }
    }

    let color_outputs = fragment
        .entry_points
        .iter()
        .filter(|ep| ep.stage == naga::ShaderStage::Fragment)
        .filter_map(|ep| ep.function.result.as_ref())
        .map(|result| count_locations(fragment, result.ty, result.binding.as_ref()))
        .sum();

    ProgramReflection {
        vertex_inputs,
        uniform_blocks: blocks
            .into_iter()
            .map(|((group, binding), min_size)| UniformBlockInfo {
                group,
                binding,
                min_size,
            })
            .collect(),
        color_outputs,
    }
}

fn component_count(inner: &naga::TypeInner) -> Option<u8> {
    match inner {
        naga::TypeInner::Scalar(_) => Some(1),
        naga::TypeInner::Vector { size, .. } => Some(*size as u8),
        _ => None,
    }
}

fn count_locations(
    module: &naga::Module,
    ty: naga::Handle<naga::Type>,
    binding: Option<&naga::Binding>,
) -> u32 {
    match binding {
        Some(naga::Binding::Location { .. }) => 1,
        Some(naga::Binding::BuiltIn(_)) => 0,
        None => match &module.types[ty].inner {
            naga::TypeInner::Struct { members, .. } => members
                .iter()
                .map(|m| count_locations(module, m.ty, m.binding.as_ref()))
                .sum(),
            _ => 0,
        },
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;

    const SIMPLE_PROGRAM: &str = r#"
#ifdef SIMPLE
layout(set = 1, binding = 0) uniform LocalParams {
    mat4 uWorldMatrix;
    mat4 uWorldViewProjectionMatrix;
};

#ifdef VERTEX
layout(location = 0) in vec3 aPosition;
layout(location = 2) in vec2 aTexCoord;
layout(location = 0) out vec2 vTexCoord;

void main() {
    vTexCoord = aTexCoord;
    gl_Position = uWorldViewProjectionMatrix * vec4(aPosition, 1.0);
}
#endif

#ifdef FRAGMENT
layout(location = 0) in vec2 vTexCoord;
layout(location = 0) out vec4 oColor;

void main() {
    oColor = vec4(vTexCoord, 0.0, 1.0);
}
#endif
#endif
"#;

    #[test]
    fn test_compose_source_prepends_defines() {
        let composed = compose_source("void main() {}", "LIGHTING_PASS", Stage::Fragment);
        assert_eq!(
            composed,
            "#version 450\n#define LIGHTING_PASS\n#define FRAGMENT\nvoid main() {}"
        );
    }

    #[test]
    fn test_compile_reflects_vertex_inputs() {
        let mut backend = HeadlessBackend::new(64, 64);
        let (handle, reflection) = compile(&mut backend, SIMPLE_PROGRAM, "SIMPLE").unwrap();

        assert!(backend.is_program_alive(handle));
        assert_eq!(
            reflection.vertex_inputs,
            vec![
                VertexInput {
                    location: 0,
                    component_count: 3
                },
                VertexInput {
                    location: 2,
                    component_count: 2
                },
            ]
        );
        let local = reflection.uniform_block(1).unwrap();
        assert_eq!(local.min_size, 128);
        assert_eq!(reflection.color_outputs, 1);
    }

    #[test]
    fn test_compile_error_is_reported() {
        let mut backend = HeadlessBackend::new(64, 64);
        let broken = SIMPLE_PROGRAM.replace("vec4(aPosition, 1.0)", "vec4(aPosition, 1.0");
        assert!(compile(&mut backend, &broken, "SIMPLE").is_err());
        assert_eq!(backend.stats().programs, 0);
    }

    #[test]
    fn test_unknown_program_name_fails() {
        // Without its define the file has no main for either stage
        let mut backend = HeadlessBackend::new(64, 64);
        assert!(compile(&mut backend, SIMPLE_PROGRAM, "MISSING").is_err());
    }
}
