//! Render List Integration Tests
//!
//! Tests for:
//! - Bucket partition (opaque / transmissive / transparent)
//! - Sort policies per bucket
//! - Render order and group order overrides

use glam::Vec3;
use strata::renderer::RenderList;
use strata::resources::MaterialKind;
use strata::scene::{Camera, Mesh, Node, NodeHandle, Scene, Transform};
use strata::{Color, Material, create_box};

struct Fixture {
    scene: Scene,
    camera: NodeHandle,
}

impl Fixture {
    fn new() -> Self {
        let mut scene = Scene::new();
        let camera = scene.add_node(Node::new("camera").with_transform(Transform::from_position(Vec3::new(0.0, 0.0, 10.0))));
        scene.set_camera(camera, Camera::new_perspective(50.0, 1.0, 0.1, 100.0)).unwrap();
        Self { scene, camera }
    }

    fn add(&mut self, name: &str, material: Material, z: f32) -> NodeHandle {
        let geometry = self.scene.assets.add_geometry(create_box(1.0, 1.0, 1.0));
        let material = self.scene.assets.add_material(material);
        let node = self.scene.add_mesh(name, Mesh::new(geometry, material));
        self.scene.node_mut(node).unwrap().transform.position = Vec3::new(0.0, 0.0, z);
        node
    }

    fn collect(&mut self) -> RenderList {
        self.scene.update_world_matrices();
        let mut list = RenderList::new();
        list.collect(&self.scene, self.scene.camera(self.camera).unwrap());
        list.sort();
        list
    }
}

fn transmissive() -> Material {
    let mut material = Material::physical(Color::WHITE).with_transparent(0.5);
    if let MaterialKind::Physical(cfg) = &mut *material.kind_mut() {
        cfg.transmission = 1.0;
    }
    material
}

fn nodes(items: &[strata::renderer::RenderItem]) -> Vec<NodeHandle> {
    items.iter().map(|i| i.node).collect()
}

#[test]
fn buckets_partition_by_material() {
    let mut f = Fixture::new();
    let opaque = f.add("opaque", Material::standard(Color::WHITE), 0.0);
    let glass = f.add("glass", transmissive(), 0.0);
    let smoke = f.add("smoke", Material::basic(Color::WHITE).with_transparent(0.3), 0.0);

    let list = f.collect();
    assert_eq!(nodes(list.opaque()), [opaque]);
    // Transmission wins over alpha blending.
    assert_eq!(nodes(list.transmissive()), [glass]);
    assert_eq!(nodes(list.transparent()), [smoke]);
    assert_eq!(list.len(), 3);
}

#[test]
fn transparent_draws_back_to_front() {
    let mut f = Fixture::new();
    let material = Material::basic(Color::WHITE).with_transparent(0.5);
    let near = f.add("near", material.clone(), 2.0);
    let far = f.add("far", material.clone(), -5.0);
    let mid = f.add("mid", material, -1.0);

    let list = f.collect();
    assert_eq!(nodes(list.transparent()), [far, mid, near]);
}

#[test]
fn equal_depth_keeps_insertion_order() {
    let mut f = Fixture::new();
    let material = Material::basic(Color::WHITE).with_transparent(0.5);
    let first = f.add("first", material.clone(), 0.0);
    let second = f.add("second", material, 0.0);

    let list = f.collect();
    assert_eq!(nodes(list.transparent()), [first, second]);
}

#[test]
fn render_order_beats_depth() {
    let mut f = Fixture::new();
    let material = Material::basic(Color::WHITE).with_transparent(0.5);
    let near = f.add("near", material.clone(), 2.0);
    let far = f.add("far", material, -5.0);
    f.scene.node_mut(far).unwrap().render_order = 1;

    let list = f.collect();
    assert_eq!(nodes(list.transparent()), [near, far]);
}

#[test]
fn group_order_applies_to_descendants() {
    let mut f = Fixture::new();
    let group = f.scene.add_node(Node::new("group"));
    {
        let node = f.scene.node_mut(group).unwrap();
        node.group = true;
        node.render_order = -1;
    }
    let material = Material::basic(Color::WHITE);
    let loose = f.add("loose", material.clone(), 0.0);
    let grouped = f.add("grouped", material, 0.0);
    f.scene.attach(grouped, group).unwrap();

    let list = f.collect();
    assert_eq!(nodes(list.opaque()), [grouped, loose]);
}

#[test]
fn off_screen_meshes_are_culled() {
    let mut f = Fixture::new();
    let visible = f.add("visible", Material::basic(Color::WHITE), 0.0);
    let behind = f.add("behind", Material::basic(Color::WHITE), 50.0);
    let unculled = f.add("unculled", Material::basic(Color::WHITE), 50.0);
    f.scene.mesh_mut(unculled).unwrap().frustum_culled = false;

    let list = f.collect();
    let drawn = nodes(list.opaque());
    assert!(drawn.contains(&visible));
    assert!(drawn.contains(&unculled));
    assert!(!drawn.contains(&behind));
}
