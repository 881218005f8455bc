//! Resource management
//!
//! The [`Registry`] owns every loaded program, texture, mesh, material and model.
//! Each collection only grows, so the ids handed out stay valid for the lifetime
//! of the registry.

mod material;
mod mesh;
mod program;
mod texture;

pub use material::*;
pub use mesh::*;
pub use program::*;
pub use texture::*;

use crate::backend::{GraphicsBackend, ProgramHandle, SamplerDescriptor, SamplerHandle};
use crate::error::{RenderError, RenderResult};
use crate::pipeline::{vertex_binding, VertexBinding};
use image::RgbaImage;
use std::path::Path;
use std::sync::Arc;

/// Index of a program in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramId(pub usize);

/// Index of a texture in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub usize);

/// Index of a mesh in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshId(pub usize);

/// Index of a material in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MaterialId(pub usize);

/// Index of a model in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModelId(pub usize);

/// Owner of all GPU-side assets
pub struct Registry {
    programs: Vec<Program>,
    textures: Vec<Texture>,
    meshes: Vec<Mesh>,
    materials: Vec<Material>,
    models: Vec<Model>,
    sampler: SamplerHandle,
    texture_loads: usize,
}

impl Registry {
    pub fn new(backend: &mut dyn GraphicsBackend) -> RenderResult<Self> {
        let sampler = backend.create_sampler(&SamplerDescriptor {
            label: Some("Material Sampler".into()),
        })?;

        Ok(Self {
            programs: Vec::new(),
            textures: Vec::new(),
            meshes: Vec::new(),
            materials: Vec::new(),
            models: Vec::new(),
            sampler,
            texture_loads: 0,
        })
    }

    /// Compile the program `name` from the shared source at `path`.
    ///
    /// Always appends a new entry, even for a name that is already loaded. A program
    /// that fails to compile is still registered, with no handle.
    pub fn load_program(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        path: &Path,
        name: &str,
    ) -> ProgramId {
        let program = Program::load(backend, path, name);
        self.programs.push(program);
        ProgramId(self.programs.len() - 1)
    }

    pub fn program(&self, id: ProgramId) -> Option<&Program> {
        self.programs.get(id.0)
    }

    pub fn programs(&self) -> &[Program] {
        &self.programs
    }

    /// Rebuild every program whose source file changed since it was built.
    ///
    /// Cached vertex bindings of the old handles are dropped. The old handles are
    /// returned so other caches keyed by them can be purged too.
    pub fn reload_changed_programs(&mut self, backend: &mut dyn GraphicsBackend) -> Vec<ProgramHandle> {
        let mut stale_handles = Vec::new();
        for program in self.programs.iter_mut().filter(|p| p.is_stale()) {
            log::info!("Reloading program '{}'", program.name);
            if let Some(stale) = program.rebuild(backend) {
                stale_handles.push(stale);
            }
        }

        for handle in &stale_handles {
            for mesh in &mut self.meshes {
                mesh.invalidate_program(*handle);
            }
        }
        stale_handles
    }

    /// Load an image file, or return the id it was already loaded under.
    ///
    /// Returns `None` when the file cannot be decoded or uploaded.
    pub fn load_texture(&mut self, backend: &mut dyn GraphicsBackend, path: &Path) -> Option<TextureId> {
        let key = path.to_string_lossy();
        if let Some(id) = self.find_texture(&key) {
            return Some(id);
        }

        let image = match decode_image(path) {
            Ok(image) => image,
            Err(err) => {
                log::error!("Could not open file {}: {}", path.display(), err);
                return None;
            }
        };
        match self.upload_texture(backend, &key, &image) {
            Ok(id) => Some(id),
            Err(err) => {
                log::error!("Could not upload texture {}: {}", path.display(), err);
                None
            }
        }
    }

    /// A deduplicated 1x1 texture of the given color
    pub fn solid_color_texture(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        rgba: [u8; 4],
    ) -> RenderResult<TextureId> {
        let key = format!(
            "color:{:02x}{:02x}{:02x}{:02x}",
            rgba[0], rgba[1], rgba[2], rgba[3]
        );
        if let Some(id) = self.find_texture(&key) {
            return Ok(id);
        }
        self.upload_texture(backend, &key, &solid_color_image(rgba))
    }

    /// Register generated pixels under `key`, or return the texture already registered there
    pub fn add_texture(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        key: &str,
        image: &RgbaImage,
    ) -> RenderResult<TextureId> {
        if let Some(id) = self.find_texture(key) {
            return Ok(id);
        }
        self.upload_texture(backend, key, image)
    }

    fn find_texture(&self, key: &str) -> Option<TextureId> {
        self.textures
            .iter()
            .position(|t| t.path == key)
            .map(TextureId)
    }

    fn upload_texture(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        key: &str,
        image: &RgbaImage,
    ) -> RenderResult<TextureId> {
        let texture = Texture::upload(backend, key, image)?;
        log::debug!(
            "Loaded texture {} ({}x{}, {} mips)",
            key,
            texture.width,
            texture.height,
            texture.mip_levels
        );
        self.textures.push(texture);
        self.texture_loads += 1;
        Ok(TextureId(self.textures.len() - 1))
    }

    pub fn texture(&self, id: TextureId) -> Option<&Texture> {
        self.textures.get(id.0)
    }

    /// Number of textures actually decoded or generated and uploaded
    pub fn texture_loads(&self) -> usize {
        self.texture_loads
    }

    /// Sampler shared by every material texture
    pub fn sampler(&self) -> SamplerHandle {
        self.sampler
    }

    pub fn add_mesh(&mut self, mesh: Mesh) -> MeshId {
        self.meshes.push(mesh);
        MeshId(self.meshes.len() - 1)
    }

    pub fn mesh(&self, id: MeshId) -> Option<&Mesh> {
        self.meshes.get(id.0)
    }

    pub fn add_material(&mut self, material: Material) -> MaterialId {
        self.materials.push(material);
        MaterialId(self.materials.len() - 1)
    }

    pub fn material(&self, id: MaterialId) -> Option<&Material> {
        self.materials.get(id.0)
    }

    pub fn add_model(&mut self, model: Model) -> ModelId {
        self.models.push(model);
        ModelId(self.models.len() - 1)
    }

    pub fn model(&self, id: ModelId) -> Option<&Model> {
        self.models.get(id.0)
    }

    /// Vertex binding of a program for one submesh, built on first use and shared after
    pub fn resolve_vertex_binding(
        &mut self,
        mesh: MeshId,
        submesh: usize,
        program: ProgramId,
    ) -> RenderResult<Arc<VertexBinding>> {
        let program = self.programs.get(program.0).ok_or(RenderError::InvalidIndex {
            kind: "program",
            index: program.0,
        })?;
        let mesh = self.meshes.get_mut(mesh.0).ok_or(RenderError::InvalidIndex {
            kind: "mesh",
            index: mesh.0,
        })?;
        vertex_binding::resolve(mesh, submesh, program)
    }
}
