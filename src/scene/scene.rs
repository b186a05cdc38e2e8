//! Scene container
//!
//! Owns the node arena, the component maps and the [`Assets`] store the
//! scene's meshes reference. The parent→children list is the only owning
//! edge of the hierarchy; `Node::parent`, light targets and skin bones are
//! plain handles that may dangle after removal and are checked on use.

use glam::{Affine3A, Mat4, Vec3};
use slotmap::{SlotMap, SparseSecondaryMap};

use crate::errors::{Result, StrataError};
use crate::resources::assets::{Assets, TextureHandle};
use crate::resources::color::Color;
use crate::scene::NodeHandle;
use crate::scene::camera::Camera;
use crate::scene::light::Light;
use crate::scene::mesh::Mesh;
use crate::scene::node::Node;
use crate::scene::transform_system;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fog {
    Linear { color: Color, near: f32, far: f32 },
    Exp2 { color: Color, density: f32 },
}

impl Fog {
    #[must_use]
    pub fn color(&self) -> Color {
        match self {
            Self::Linear { color, .. } | Self::Exp2 { color, .. } => *color,
        }
    }

    #[must_use]
    pub fn is_exp2(&self) -> bool {
        matches!(self, Self::Exp2 { .. })
    }
}

/// What happens to the children of a removed node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveMode {
    /// Remove the whole subtree.
    Recursive,
    /// Hand the children to the removed node's parent (or make them roots).
    ReparentChildren,
}

pub struct Scene {
    nodes: SlotMap<NodeHandle, Node>,
    roots: Vec<NodeHandle>,

    meshes: SparseSecondaryMap<NodeHandle, Mesh>,
    lights: SparseSecondaryMap<NodeHandle, Light>,
    cameras: SparseSecondaryMap<NodeHandle, Camera>,

    pub fog: Option<Fog>,
    /// Clear color when the renderer's auto-clear runs; `None` keeps the
    /// renderer's own clear color.
    pub background: Option<Color>,
    /// Fallback environment map for lit materials without their own.
    pub environment: Option<TextureHandle>,
    pub assets: Assets,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: SlotMap::with_key(),
            roots: Vec::new(),
            meshes: SparseSecondaryMap::new(),
            lights: SparseSecondaryMap::new(),
            cameras: SparseSecondaryMap::new(),
            fog: None,
            background: None,
            environment: None,
            assets: Assets::new(),
        }
    }

    // ========================================================================
    // Hierarchy
    // ========================================================================

    /// Inserts a node as a new root.
    pub fn add_node(&mut self, node: Node) -> NodeHandle {
        let handle = self.nodes.insert(node);
        self.nodes[handle].parent = None;
        self.nodes[handle].children.clear();
        self.roots.push(handle);
        handle
    }

    /// Inserts a node beneath `parent`.
    pub fn add_child(&mut self, parent: NodeHandle, node: Node) -> Result<NodeHandle> {
        if !self.nodes.contains_key(parent) {
            return Err(StrataError::NodeNotFound(format!("{parent:?}")));
        }
        let handle = self.add_node(node);
        self.attach(handle, parent)?;
        Ok(handle)
    }

    pub fn add_mesh(&mut self, name: &str, mesh: Mesh) -> NodeHandle {
        let handle = self.add_node(Node::new(name));
        self.meshes.insert(handle, mesh);
        handle
    }

    pub fn add_light(&mut self, name: &str, light: Light) -> NodeHandle {
        let handle = self.add_node(Node::new(name));
        self.lights.insert(handle, light);
        handle
    }

    pub fn add_camera(&mut self, name: &str, camera: Camera) -> NodeHandle {
        let handle = self.add_node(Node::new(name));
        self.cameras.insert(handle, camera);
        handle
    }

    /// Moves `child` beneath `parent`, keeping its local transform.
    pub fn attach(&mut self, child: NodeHandle, parent: NodeHandle) -> Result<()> {
        self.require(child)?;
        self.require(parent)?;
        if child == parent || self.is_ancestor(child, parent) {
            return Err(StrataError::CyclicHierarchy);
        }
        self.unlink(child);
        self.nodes[parent].children.push(child);
        let node = &mut self.nodes[child];
        node.parent = Some(parent);
        node.transform.mark_dirty();
        Ok(())
    }

    /// Makes `child` a root, keeping its local transform.
    pub fn detach(&mut self, child: NodeHandle) -> Result<()> {
        self.require(child)?;
        self.unlink(child);
        self.roots.push(child);
        self.nodes[child].transform.mark_dirty();
        Ok(())
    }

    /// Removes a node and its components.
    pub fn remove(&mut self, handle: NodeHandle, mode: RemoveMode) -> Result<()> {
        self.require(handle)?;
        let parent = self.nodes[handle].parent;
        self.unlink(handle);
        let children = std::mem::take(&mut self.nodes[handle].children);

        match mode {
            RemoveMode::Recursive => {
                let mut stack = children;
                while let Some(h) = stack.pop() {
                    if let Some(node) = self.nodes.get_mut(h) {
                        stack.append(&mut node.children);
                    }
                    self.drop_node(h);
                }
            }
            RemoveMode::ReparentChildren => {
                for child in children {
                    let node = &mut self.nodes[child];
                    node.parent = parent;
                    node.transform.mark_dirty();
                    match parent {
                        Some(p) => self.nodes[p].children.push(child),
                        None => self.roots.push(child),
                    }
                }
            }
        }
        self.drop_node(handle);
        Ok(())
    }

    fn drop_node(&mut self, handle: NodeHandle) {
        self.meshes.remove(handle);
        self.lights.remove(handle);
        self.cameras.remove(handle);
        self.nodes.remove(handle);
    }

    /// Removes `handle` from its parent's child list or from the roots.
    fn unlink(&mut self, handle: NodeHandle) {
        match self.nodes[handle].parent.take() {
            Some(p) => {
                if let Some(parent) = self.nodes.get_mut(p) {
                    parent.children.retain(|&c| c != handle);
                }
            }
            None => self.roots.retain(|&r| r != handle),
        }
    }

    fn is_ancestor(&self, ancestor: NodeHandle, mut node: NodeHandle) -> bool {
        while let Some(p) = self.nodes.get(node).and_then(|n| n.parent) {
            if p == ancestor {
                return true;
            }
            node = p;
        }
        false
    }

    fn require(&self, handle: NodeHandle) -> Result<()> {
        if self.nodes.contains_key(handle) {
            Ok(())
        } else {
            Err(StrataError::NodeNotFound(format!("{handle:?}")))
        }
    }

    // ========================================================================
    // Access
    // ========================================================================

    #[must_use]
    pub fn roots(&self) -> &[NodeHandle] {
        &self.roots
    }

    #[must_use]
    pub fn node(&self, handle: NodeHandle) -> Option<&Node> {
        self.nodes.get(handle)
    }

    pub fn node_mut(&mut self, handle: NodeHandle) -> Option<&mut Node> {
        self.nodes.get_mut(handle)
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeHandle, &Node)> {
        self.nodes.iter()
    }

    #[must_use]
    pub fn mesh(&self, handle: NodeHandle) -> Option<&Mesh> {
        self.meshes.get(handle)
    }

    pub fn mesh_mut(&mut self, handle: NodeHandle) -> Option<&mut Mesh> {
        self.meshes.get_mut(handle)
    }

    #[must_use]
    pub fn light(&self, handle: NodeHandle) -> Option<&Light> {
        self.lights.get(handle)
    }

    pub fn light_mut(&mut self, handle: NodeHandle) -> Option<&mut Light> {
        self.lights.get_mut(handle)
    }

    #[must_use]
    pub fn camera(&self, handle: NodeHandle) -> Option<&Camera> {
        self.cameras.get(handle)
    }

    pub fn camera_mut(&mut self, handle: NodeHandle) -> Option<&mut Camera> {
        self.cameras.get_mut(handle)
    }

    pub fn set_mesh(&mut self, handle: NodeHandle, mesh: Mesh) -> Result<()> {
        self.require(handle)?;
        self.meshes.insert(handle, mesh);
        Ok(())
    }

    pub fn set_light(&mut self, handle: NodeHandle, light: Light) -> Result<()> {
        self.require(handle)?;
        self.lights.insert(handle, light);
        Ok(())
    }

    pub fn set_camera(&mut self, handle: NodeHandle, camera: Camera) -> Result<()> {
        self.require(handle)?;
        self.cameras.insert(handle, camera);
        Ok(())
    }

    pub fn lights_mut(&mut self) -> impl Iterator<Item = (NodeHandle, &mut Light)> {
        self.lights.iter_mut()
    }

    #[must_use]
    pub fn world_matrix(&self, handle: NodeHandle) -> Option<&Affine3A> {
        self.nodes.get(handle).map(|n| &n.transform.world_matrix)
    }

    #[must_use]
    pub fn world_position(&self, handle: NodeHandle) -> Option<Vec3> {
        self.nodes.get(handle).map(|n| n.transform.world_position())
    }

    // ========================================================================
    // Per-frame update
    // ========================================================================

    /// Recomputes world matrices parent-before-child and refreshes camera
    /// views. Returns the number of nodes whose world matrix changed.
    pub fn update_world_matrices(&mut self) -> usize {
        transform_system::update_hierarchy(&mut self.nodes, &mut self.cameras, &self.roots)
    }

    /// Recomputes mesh-space bone matrices for every skinned mesh.
    pub fn update_skins(&mut self) {
        let nodes = &self.nodes;
        for (handle, mesh) in &mut self.meshes {
            let Some(skin) = mesh.skin.as_mut() else {
                continue;
            };
            let Some(mesh_node) = nodes.get(handle) else {
                continue;
            };
            let mesh_inverse = Mat4::from(mesh_node.transform.world_matrix.inverse());
            skin.bone_matrices.resize(skin.bones.len(), Mat4::IDENTITY);
            for (i, bone) in skin.bones.iter().enumerate() {
                let bone_world = nodes
                    .get(*bone)
                    .map_or(Mat4::IDENTITY, |b| Mat4::from(b.transform.world_matrix));
                let inverse_bind = skin.inverse_bind_matrices.get(i).copied().unwrap_or(Mat4::IDENTITY);
                skin.bone_matrices[i] = mesh_inverse * bone_world * inverse_bind;
            }
        }
    }

    /// Applies `f` to every camera with `auto_aspect` set.
    pub(crate) fn for_each_auto_aspect_camera(&mut self, mut f: impl FnMut(&mut Camera)) {
        for (_, camera) in &mut self.cameras {
            if camera.auto_aspect {
                f(camera);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(scene: &mut Scene) -> (NodeHandle, NodeHandle, NodeHandle) {
        let a = scene.add_node(Node::new("a"));
        let b = scene.add_child(a, Node::new("b")).unwrap();
        let c = scene.add_child(b, Node::new("c")).unwrap();
        (a, b, c)
    }

    #[test]
    fn attach_rejects_cycles() {
        let mut scene = Scene::new();
        let (a, _, c) = chain(&mut scene);
        assert!(matches!(scene.attach(a, c), Err(StrataError::CyclicHierarchy)));
        assert!(matches!(scene.attach(a, a), Err(StrataError::CyclicHierarchy)));
    }

    #[test]
    fn remove_reparents_children() {
        let mut scene = Scene::new();
        let (a, b, c) = chain(&mut scene);
        scene.remove(b, RemoveMode::ReparentChildren).unwrap();
        assert!(scene.node(b).is_none());
        assert_eq!(scene.node(c).unwrap().parent(), Some(a));
        assert_eq!(scene.node(a).unwrap().children(), &[c]);
    }

    #[test]
    fn remove_recursive_drops_subtree() {
        let mut scene = Scene::new();
        let (a, _, c) = chain(&mut scene);
        scene.remove(a, RemoveMode::Recursive).unwrap();
        assert_eq!(scene.node_count(), 0);
        assert!(scene.roots().is_empty());
        assert!(matches!(scene.detach(c), Err(StrataError::NodeNotFound(_))));
    }

    #[test]
    fn detach_makes_root() {
        let mut scene = Scene::new();
        let (a, b, _) = chain(&mut scene);
        scene.detach(b).unwrap();
        assert_eq!(scene.roots(), &[a, b]);
        assert!(scene.node(a).unwrap().children().is_empty());
    }
}
