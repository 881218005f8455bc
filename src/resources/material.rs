//! Materials and models

use super::{MaterialId, MeshId, TextureId};

/// Surface description sampled by the geometry programs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Material {
    pub name: String,
    pub albedo: TextureId,
    /// Only sampled while normal mapping is enabled
    pub normal_map: Option<TextureId>,
}

impl Material {
    pub fn new(name: &str, albedo: TextureId) -> Self {
        Self {
            name: name.to_string(),
            albedo,
            normal_map: None,
        }
    }

    pub fn with_normal_map(mut self, normal_map: TextureId) -> Self {
        self.normal_map = Some(normal_map);
        self
    }
}

/// A mesh plus the material of each of its submeshes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model {
    pub name: String,
    pub mesh: MeshId,
    /// Indexed by submesh
    pub materials: Vec<MaterialId>,
}

impl Model {
    pub fn new(name: &str, mesh: MeshId, materials: Vec<MaterialId>) -> Self {
        Self {
            name: name.to_string(),
            mesh,
            materials,
        }
    }

    /// Material of a submesh; submeshes past the end reuse the last material
    pub fn material_for(&self, submesh: usize) -> Option<MaterialId> {
        self.materials
            .get(submesh)
            .or_else(|| self.materials.last())
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_material_for_submesh() {
        let model = Model::new("crate", MeshId(0), vec![MaterialId(3), MaterialId(4)]);
        assert_eq!(model.material_for(0), Some(MaterialId(3)));
        assert_eq!(model.material_for(1), Some(MaterialId(4)));
        assert_eq!(model.material_for(5), Some(MaterialId(4)));

        let empty = Model::new("empty", MeshId(0), Vec::new());
        assert_eq!(empty.material_for(0), None);
    }
}
