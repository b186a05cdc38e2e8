//! Render list
//!
//! Per-frame collection of draw records. [`RenderList::collect`] walks the
//! scene depth-first, gathers lights and shadow casters, culls drawables
//! against the camera and sorts the survivors into three buckets:
//!
//! | Bucket         | Membership                              | Order                                              |
//! |----------------|-----------------------------------------|----------------------------------------------------|
//! | `opaque`       | not transparent, no transmission        | group, render order, material, near→far, sequence  |
//! | `transmissive` | transmission > 0                        | group, render order, far→near, sequence            |
//! | `transparent`  | transparent, no transmission            | group, render order, far→near, sequence            |
//!
//! Buckets keep their allocations between frames.

use std::cmp::Ordering;

use glam::{Affine3A, Mat4, Vec3};

use crate::resources::assets::{Assets, GeometryHandle, MaterialHandle};
use crate::resources::geometry::Geometry;
use crate::resources::material::Material;
use crate::scene::{Camera, MaterialSlot, Mesh, NodeHandle, Scene};
use crate::utils::WarnOnce;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Opaque,
    Transmissive,
    Transparent,
}

impl Bucket {
    /// Transmission takes precedence over alpha blending.
    #[must_use]
    pub fn of(material: &Material) -> Self {
        if material.transmission() > 0.0 {
            Self::Transmissive
        } else if material.is_transparent() {
            Self::Transparent
        } else {
            Self::Opaque
        }
    }
}

/// One draw: a mesh node, its geometry and one of its materials.
#[derive(Debug, Clone, Copy)]
pub struct RenderItem {
    /// Insertion sequence within the frame; the final tie-break.
    pub sequence: u32,
    pub node: NodeHandle,
    pub geometry: GeometryHandle,
    pub material: MaterialHandle,
    pub material_id: u64,
    pub group_order: i32,
    pub render_order: i32,
    /// View-space depth of the bounding-sphere center; grows away from the camera.
    pub z: f32,
    /// `(start, count)` of a geometry group, `None` for the whole draw range.
    pub range: Option<(usize, usize)>,
    pub model: Mat4,
    /// World-space bounding sphere.
    pub bounds: Option<(Vec3, f32)>,
    /// Mirroring world transform; front faces wind clockwise.
    pub front_face_cw: bool,
}

#[derive(Debug, Default)]
pub struct RenderList {
    opaque: Vec<RenderItem>,
    transmissive: Vec<RenderItem>,
    transparent: Vec<RenderItem>,
    casters: Vec<RenderItem>,
    lights: Vec<NodeHandle>,
    stack: Vec<(NodeHandle, i32)>,
    sequence: u32,
    warnings: WarnOnce,
}

fn world_sphere(world: &Affine3A, geometry: &Geometry) -> Option<(Vec3, f32)> {
    let sphere = geometry.bounding_sphere_or_compute()?;
    let scale = world
        .matrix3
        .x_axis
        .length()
        .max(world.matrix3.y_axis.length())
        .max(world.matrix3.z_axis.length());
    Some((world.transform_point3(sphere.center), sphere.radius * scale))
}

fn opaque_order(a: &RenderItem, b: &RenderItem) -> Ordering {
    a.group_order
        .cmp(&b.group_order)
        .then(a.render_order.cmp(&b.render_order))
        .then(a.material_id.cmp(&b.material_id))
        .then(a.z.total_cmp(&b.z))
        .then(a.sequence.cmp(&b.sequence))
}

fn blended_order(a: &RenderItem, b: &RenderItem) -> Ordering {
    a.group_order
        .cmp(&b.group_order)
        .then(a.render_order.cmp(&b.render_order))
        .then(b.z.total_cmp(&a.z))
        .then(a.sequence.cmp(&b.sequence))
}

impl RenderList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.opaque.clear();
        self.transmissive.clear();
        self.transparent.clear();
        self.casters.clear();
        self.lights.clear();
        self.sequence = 0;
    }

    #[must_use]
    pub fn opaque(&self) -> &[RenderItem] {
        &self.opaque
    }

    #[must_use]
    pub fn transmissive(&self) -> &[RenderItem] {
        &self.transmissive
    }

    #[must_use]
    pub fn transparent(&self) -> &[RenderItem] {
        &self.transparent
    }

    /// Shadow-casting draws, collected without camera culling.
    #[must_use]
    pub fn casters(&self) -> &[RenderItem] {
        &self.casters
    }

    /// Visible lights in traversal order.
    #[must_use]
    pub fn lights(&self) -> &[NodeHandle] {
        &self.lights
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.opaque.len() + self.transmissive.len() + self.transparent.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rebuilds the list for `camera`. World matrices must be current.
    pub fn collect(&mut self, scene: &Scene, camera: &Camera) {
        self.clear();
        let view = *camera.view_matrix();
        let frustum = *camera.frustum();

        self.stack.clear();
        self.stack.extend(scene.roots().iter().rev().map(|&r| (r, 0)));

        while let Some((handle, group_order)) = self.stack.pop() {
            let Some(node) = scene.node(handle) else { continue };
            if !node.visible {
                continue;
            }
            let group_order = if node.group { node.render_order } else { group_order };
            self.stack.extend(node.children().iter().rev().map(|&c| (c, group_order)));

            let in_layer = camera.layers.test(node.layers);
            if in_layer && scene.light(handle).is_some() {
                self.lights.push(handle);
            }
            let Some(mesh) = scene.mesh(handle) else { continue };

            let Some(geometry) = scene.assets.geometry(mesh.geometry) else {
                self.warnings.warn(&format!("Mesh '{}' references a missing geometry; skipped", node.name));
                continue;
            };
            if !geometry.is_valid() {
                self.warnings.warn(&format!(
                    "Mesh '{}' has invalid geometry '{}'; skipped",
                    node.name, geometry.name
                ));
                continue;
            }

            let world = node.world_matrix();
            let bounds = world_sphere(world, geometry);
            let base = RenderItem {
                sequence: 0,
                node: handle,
                geometry: mesh.geometry,
                material: Default::default(),
                material_id: 0,
                group_order,
                render_order: node.render_order,
                z: 0.0,
                range: None,
                model: Mat4::from(*world),
                bounds,
                front_face_cw: world.matrix3.determinant() < 0.0,
            };

            if mesh.cast_shadow {
                self.push_materials(&scene.assets, geometry, mesh, base, &node.name, true);
            }
            if !in_layer {
                continue;
            }
            if mesh.frustum_culled
                && !mesh.is_skinned()
                && let Some((center, radius)) = bounds
                && !frustum.intersects_sphere(center, radius)
            {
                continue;
            }

            let center = bounds.map_or(Vec3::from(world.translation), |(c, _)| c);
            let z = -view.transform_point3(center).z;
            self.push_materials(&scene.assets, geometry, mesh, RenderItem { z, ..base }, &node.name, false);
        }
    }

    fn push_materials(
        &mut self,
        assets: &Assets,
        geometry: &Geometry,
        mesh: &Mesh,
        base: RenderItem,
        name: &str,
        casters: bool,
    ) {
        let groups = geometry.groups();
        let per_group = matches!(mesh.material, MaterialSlot::PerGroup(_)) && !groups.is_empty();

        let push = |list: &mut Self, handle: MaterialHandle, range: Option<(usize, usize)>| {
            let Some(material) = assets.material(handle) else {
                list.warnings.warn(&format!("Mesh '{name}' references a missing material; skipped"));
                return;
            };
            if !material.is_visible() {
                return;
            }
            let item = RenderItem {
                sequence: list.sequence,
                material: handle,
                material_id: material.id(),
                range,
                ..base
            };
            list.sequence += 1;
            if casters {
                list.casters.push(item);
                return;
            }
            match Bucket::of(material) {
                Bucket::Opaque => list.opaque.push(item),
                Bucket::Transmissive => list.transmissive.push(item),
                Bucket::Transparent => list.transparent.push(item),
            }
        };

        if per_group {
            for group in groups {
                if let Some(handle) = mesh.material.get(group.material_index) {
                    push(self, handle, Some((group.start, group.count)));
                }
            }
        } else if let Some(handle) = mesh.material.get(0) {
            push(self, handle, None);
        }
    }

    /// Sorts every bucket by its policy.
    pub fn sort(&mut self) {
        self.opaque.sort_unstable_by(opaque_order);
        self.transmissive.sort_unstable_by(blended_order);
        self.transparent.sort_unstable_by(blended_order);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::color::Color;
    use crate::resources::primitives;
    use crate::scene::{Node, Transform};

    fn scene_with(materials: &[Material]) -> (Scene, NodeHandle, Vec<NodeHandle>) {
        let mut scene = Scene::new();
        let geometry = scene.assets.add_geometry(primitives::create_box(1.0, 1.0, 1.0));
        let mut meshes = Vec::new();
        for (i, material) in materials.iter().enumerate() {
            let material = scene.assets.add_material(material.clone());
            let node = scene.add_mesh(&format!("m{i}"), Mesh::new(geometry, material));
            scene.node_mut(node).unwrap().transform.position = Vec3::new(0.0, 0.0, -(i as f32 + 1.0) * 3.0);
            meshes.push(node);
        }
        let camera = scene.add_node(Node::new("camera").with_transform(Transform::from_position(Vec3::new(0.0, 0.0, 5.0))));
        scene.set_camera(camera, Camera::new_perspective(60.0, 1.0, 0.1, 100.0)).unwrap();
        scene.update_world_matrices();
        (scene, camera, meshes)
    }

    #[test]
    fn hidden_subtrees_and_other_layers_are_skipped() {
        let (mut scene, camera, meshes) = scene_with(&[Material::basic(Color::WHITE), Material::basic(Color::WHITE)]);
        scene.node_mut(meshes[0]).unwrap().visible = false;
        scene.node_mut(meshes[1]).unwrap().layers = crate::scene::Layers::only(2);

        let mut list = RenderList::new();
        list.collect(&scene, scene.camera(camera).unwrap());
        assert!(list.is_empty());
    }

    #[test]
    fn opaque_front_to_back_within_material() {
        let material = Material::lambert(Color::WHITE);
        let (scene, camera, meshes) = scene_with(&[material.clone(), material.clone(), material]);
        let mut list = RenderList::new();
        list.collect(&scene, scene.camera(camera).unwrap());
        list.sort();
        let order: Vec<_> = list.opaque().iter().map(|i| i.node).collect();
        assert_eq!(order, meshes);
    }

    #[test]
    fn culled_mesh_still_casts() {
        let (mut scene, camera, meshes) = scene_with(&[Material::basic(Color::WHITE)]);
        scene.mesh_mut(meshes[0]).unwrap().cast_shadow = true;
        scene.node_mut(meshes[0]).unwrap().transform.position = Vec3::new(0.0, 0.0, 50.0);
        scene.update_world_matrices();

        let mut list = RenderList::new();
        list.collect(&scene, scene.camera(camera).unwrap());
        assert!(list.opaque().is_empty());
        assert_eq!(list.casters().len(), 1);
    }
}
