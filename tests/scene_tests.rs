//! Scene Integration Tests
//!
//! Tests for:
//! - Hierarchy: world matrix propagation, reparenting, cycle rejection
//! - Removal modes
//! - Asset disposal notifications

use glam::{Quat, Vec3};
use strata::errors::StrataError;
use strata::resources::DisposeEvent;
use strata::scene::{Node, RemoveMode, Scene, Transform};
use strata::{Color, Material, create_box};

fn approx(a: Vec3, b: Vec3) -> bool {
    (a - b).length() < 1e-5
}

// ============================================================================
// Hierarchy
// ============================================================================

#[test]
fn world_matrix_composes_parent_first() {
    let mut scene = Scene::new();
    let mut parent = Transform::from_position(Vec3::new(1.0, 0.0, 0.0));
    parent.scale = Vec3::splat(2.0);
    let parent = scene.add_node(Node::new("parent").with_transform(parent));
    let child = scene
        .add_child(parent, Node::new("child").with_transform(Transform::from_position(Vec3::new(0.0, 2.0, 0.0))))
        .unwrap();

    scene.update_world_matrices();
    assert!(approx(scene.world_position(child).unwrap(), Vec3::new(1.0, 4.0, 0.0)));

    // Moving the parent moves the child on the next update.
    scene.node_mut(parent).unwrap().transform.rotation = Quat::from_rotation_z(std::f32::consts::FRAC_PI_2);
    scene.update_world_matrices();
    assert!(approx(scene.world_position(child).unwrap(), Vec3::new(-3.0, 0.0, 0.0)));
}

#[test]
fn attaching_under_a_descendant_is_rejected() {
    let mut scene = Scene::new();
    let a = scene.add_node(Node::new("a"));
    let b = scene.add_child(a, Node::new("b")).unwrap();
    let c = scene.add_child(b, Node::new("c")).unwrap();

    assert!(matches!(scene.attach(a, c), Err(StrataError::CyclicHierarchy)));
    assert_eq!(scene.node(c).unwrap().parent(), Some(b));
    assert_eq!(scene.roots(), &[a]);
}

#[test]
fn reparenting_keeps_local_transform() {
    let mut scene = Scene::new();
    let a = scene.add_node(Node::new("a").with_transform(Transform::from_position(Vec3::X * 5.0)));
    let b = scene.add_node(Node::new("b").with_transform(Transform::from_position(Vec3::Y)));
    scene.attach(b, a).unwrap();
    scene.update_world_matrices();
    assert!(approx(scene.world_position(b).unwrap(), Vec3::new(5.0, 1.0, 0.0)));

    scene.detach(b).unwrap();
    scene.update_world_matrices();
    assert!(approx(scene.world_position(b).unwrap(), Vec3::Y));
    assert!(scene.roots().contains(&b));
}

#[test]
fn remove_modes() {
    let mut scene = Scene::new();
    let root = scene.add_node(Node::new("root"));
    let mid = scene.add_child(root, Node::new("mid")).unwrap();
    let leaf = scene.add_child(mid, Node::new("leaf")).unwrap();

    scene.remove(mid, RemoveMode::ReparentChildren).unwrap();
    assert!(scene.node(mid).is_none());
    assert_eq!(scene.node(leaf).unwrap().parent(), Some(root));

    scene.remove(root, RemoveMode::Recursive).unwrap();
    assert_eq!(scene.node_count(), 0);
    assert!(matches!(
        scene.remove(root, RemoveMode::Recursive),
        Err(StrataError::NodeNotFound(_))
    ));
}

// ============================================================================
// Assets
// ============================================================================

#[test]
fn disposal_emits_one_event_per_resource() {
    let mut scene = Scene::new();
    let events = scene.assets.dispose_events();
    let material = scene.assets.add_material(Material::basic(Color::WHITE));
    let geometry = scene.assets.add_geometry(create_box(1.0, 1.0, 1.0));
    let material_id = scene.assets.material(material).unwrap().id();
    let geometry_id = scene.assets.geometry(geometry).unwrap().id();

    assert!(scene.assets.dispose_material(material).is_some());
    assert!(scene.assets.dispose_material(material).is_none());
    assert!(scene.assets.dispose_geometry(geometry).is_some());

    let received: Vec<_> = events.try_iter().collect();
    assert_eq!(
        received,
        [DisposeEvent::Material(material_id), DisposeEvent::Geometry(geometry_id)]
    );
    assert_eq!(scene.assets.counts(), (0, 0, 0));
}
