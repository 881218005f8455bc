//! Renderer error types

use crate::backend::BackendError;
use crate::pipeline::FramebufferStatus;
use thiserror::Error;

/// Errors raised by the registry and the renderer
#[derive(Error, Debug)]
pub enum RenderError {
    /// A program declares a vertex input the submesh does not provide.
    /// Drawing would read garbage, so this is never skipped.
    #[error("program '{program}' expects vertex attribute at location {location}, which the submesh does not provide")]
    IncompatibleVertexLayout { program: String, location: u32 },
    #[error("uniform stream overflow: {requested} bytes requested, capacity is {capacity}")]
    UniformOverflow { requested: usize, capacity: usize },
    #[error("framebuffer '{label}' is incomplete: {status}")]
    IncompleteFramebuffer {
        label: String,
        status: FramebufferStatus,
    },
    #[error("shader compilation failed for '{program}': {message}")]
    ShaderCompilation { program: String, message: String },
    #[error("unknown {kind} index {index}")]
    InvalidIndex { kind: &'static str, index: usize },
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl RenderError {
    /// Content errors that must abort rendering rather than be logged and skipped
    pub fn is_fatal(&self) -> bool {
        matches!(self, RenderError::IncompatibleVertexLayout { .. })
    }
}

pub type RenderResult<T> = Result<T, RenderError>;
