//! Transform System
//!
//! Propagates world matrices through the hierarchy, parent before child.
//! Borrows only the node arena and camera map, not the whole scene.
//!
//! A node's world matrix is recomputed when its local TRS changed or when
//! any ancestor's world matrix was recomputed this pass; untouched subtrees
//! cost one comparison per node.

use glam::Affine3A;
use slotmap::{SlotMap, SparseSecondaryMap};

use crate::scene::NodeHandle;
use crate::scene::camera::Camera;
use crate::scene::node::Node;

/// Updates every tree below `roots`, returning how many world matrices were
/// recomputed.
///
/// Uses an explicit stack so deep hierarchies cannot overflow.
pub fn update_hierarchy(
    nodes: &mut SlotMap<NodeHandle, Node>,
    cameras: &mut SparseSecondaryMap<NodeHandle, Camera>,
    roots: &[NodeHandle],
) -> usize {
    let mut stack: Vec<(NodeHandle, Affine3A, bool)> = Vec::with_capacity(64);
    for &root in roots.iter().rev() {
        stack.push((root, Affine3A::IDENTITY, false));
    }
    propagate(nodes, cameras, &mut stack)
}

fn propagate(
    nodes: &mut SlotMap<NodeHandle, Node>,
    cameras: &mut SparseSecondaryMap<NodeHandle, Camera>,
    stack: &mut Vec<(NodeHandle, Affine3A, bool)>,
) -> usize {
    let mut updated = 0;
    while let Some((handle, parent_world, parent_changed)) = stack.pop() {
        let Some(node) = nodes.get_mut(handle) else {
            continue;
        };

        let world_dirty = node.transform.needs_world_update();
        node.transform.update_local_matrix();
        let recompute = world_dirty || parent_changed;

        if recompute {
            let world = parent_world * node.transform.local_matrix;
            node.transform.set_world_matrix(world);
            updated += 1;
            if let Some(camera) = cameras.get_mut(handle) {
                camera.update_view(&world);
            }
        }

        let world = node.transform.world_matrix;
        for &child in node.children.iter().rev() {
            stack.push((child, world, recompute));
        }
    }
    updated
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn child_inherits_parent_translation() {
        let mut nodes: SlotMap<NodeHandle, Node> = SlotMap::with_key();
        let mut cameras: SparseSecondaryMap<NodeHandle, Camera> = SparseSecondaryMap::new();

        let mut parent = Node::new("parent");
        parent.transform.position = Vec3::new(1.0, 0.0, 0.0);
        let parent_handle = nodes.insert(parent);

        let mut child = Node::new("child");
        child.transform.position = Vec3::new(0.0, 1.0, 0.0);
        child.parent = Some(parent_handle);
        let child_handle = nodes.insert(child);
        nodes[parent_handle].children.push(child_handle);

        assert_eq!(update_hierarchy(&mut nodes, &mut cameras, &[parent_handle]), 2);
        let pos = nodes[child_handle].transform.world_position();
        assert!((pos - Vec3::new(1.0, 1.0, 0.0)).length() < 1e-5);

        // nothing moved
        assert_eq!(update_hierarchy(&mut nodes, &mut cameras, &[parent_handle]), 0);

        nodes[parent_handle].transform.position.z = 3.0;
        assert_eq!(update_hierarchy(&mut nodes, &mut cameras, &[parent_handle]), 2);
        assert!((nodes[child_handle].transform.world_position().z - 3.0).abs() < 1e-5);
    }
}
