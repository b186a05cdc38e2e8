use glam::Affine3A;

use crate::scene::NodeHandle;
use crate::scene::layers::Layers;
use crate::scene::transform::Transform;

/// A scene node containing only hierarchy and transform data.
///
/// Components (mesh, light, camera) live in the scene's component maps keyed
/// by the node handle.
///
/// # Ordering
///
/// `render_order` sorts draws within a bucket. A node with `group` set
/// turns its own `render_order` into the group order of every drawable in
/// its subtree, keeping the subtree contiguous in the sorted list.
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    /// Non-owning; the parent's `children` list is the owning edge.
    pub(crate) parent: Option<NodeHandle>,
    pub(crate) children: Vec<NodeHandle>,

    pub transform: Transform,

    /// Hidden nodes skip their whole subtree.
    pub visible: bool,
    pub layers: Layers,
    pub render_order: i32,
    pub group: bool,
}

impl Node {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            children: Vec::new(),
            transform: Transform::new(),
            visible: true,
            layers: Layers::default(),
            render_order: 0,
            group: false,
        }
    }

    #[must_use]
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    #[inline]
    #[must_use]
    pub fn parent(&self) -> Option<NodeHandle> {
        self.parent
    }

    #[inline]
    #[must_use]
    pub fn children(&self) -> &[NodeHandle] {
        &self.children
    }

    #[inline]
    #[must_use]
    pub fn world_matrix(&self) -> &Affine3A {
        &self.transform.world_matrix
    }
}

impl Default for Node {
    fn default() -> Self {
        Self::new("")
    }
}
