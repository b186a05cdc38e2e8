use glam::Mat4;

use crate::resources::assets::{GeometryHandle, MaterialHandle};
use crate::scene::NodeHandle;

/// One material for the whole geometry, or one per geometry group.
#[derive(Debug, Clone, PartialEq)]
pub enum MaterialSlot {
    Single(MaterialHandle),
    PerGroup(Vec<MaterialHandle>),
}

impl MaterialSlot {
    #[must_use]
    pub fn get(&self, index: usize) -> Option<MaterialHandle> {
        match self {
            Self::Single(h) => Some(*h),
            Self::PerGroup(list) => list.get(index).copied(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = MaterialHandle> + '_ {
        let (single, list) = match self {
            Self::Single(h) => (Some(*h), &[][..]),
            Self::PerGroup(list) => (None, list.as_slice()),
        };
        single.into_iter().chain(list.iter().copied())
    }
}

impl From<MaterialHandle> for MaterialSlot {
    fn from(h: MaterialHandle) -> Self {
        Self::Single(h)
    }
}

/// Skeleton binding for a skinned mesh.
#[derive(Debug, Clone)]
pub struct Skin {
    /// Non-owning references to bone nodes.
    pub bones: Vec<NodeHandle>,
    pub inverse_bind_matrices: Vec<Mat4>,
    /// Mesh-space bone transforms, recomputed by `Scene::update_skins`.
    pub(crate) bone_matrices: Vec<Mat4>,
}

impl Skin {
    #[must_use]
    pub fn new(bones: Vec<NodeHandle>, inverse_bind_matrices: Vec<Mat4>) -> Self {
        let count = bones.len();
        Self {
            bones,
            inverse_bind_matrices,
            bone_matrices: vec![Mat4::IDENTITY; count],
        }
    }

    #[must_use]
    pub fn bone_matrices(&self) -> &[Mat4] {
        &self.bone_matrices
    }
}

/// Drawable component.
#[derive(Debug, Clone)]
pub struct Mesh {
    pub geometry: GeometryHandle,
    pub material: MaterialSlot,
    pub cast_shadow: bool,
    pub receive_shadow: bool,
    /// When false the mesh is drawn even outside the camera frustum.
    pub frustum_culled: bool,
    pub morph_influences: Vec<f32>,
    pub skin: Option<Skin>,
}

impl Mesh {
    #[must_use]
    pub fn new(geometry: GeometryHandle, material: impl Into<MaterialSlot>) -> Self {
        Self {
            geometry,
            material: material.into(),
            cast_shadow: false,
            receive_shadow: false,
            frustum_culled: true,
            morph_influences: Vec::new(),
            skin: None,
        }
    }

    #[must_use]
    pub fn with_shadows(mut self, cast: bool, receive: bool) -> Self {
        self.cast_shadow = cast;
        self.receive_shadow = receive;
        self
    }

    #[must_use]
    pub fn is_skinned(&self) -> bool {
        self.skin.is_some()
    }
}
