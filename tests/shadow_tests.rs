//! Shadow Integration Tests
//!
//! Tests for:
//! - Directional shadow map rendered before the main pass
//! - Static maps reused across frames
//! - Disabling shadows globally

use glam::Vec3;
use strata::renderer::device::{ClearFlags, Command};
use strata::renderer::shadow::ShadowMapState;
use strata::renderer::{RecordingDevice, Renderer, RendererSettings};
use strata::resources::primitives::{PlaneOptions, create_plane};
use strata::scene::{Camera, Light, Mesh, Node, NodeHandle, Scene, Transform};
use strata::{Color, Material, create_box};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct ShadowScene {
    scene: Scene,
    camera: NodeHandle,
    light: NodeHandle,
}

fn shadow_scene() -> ShadowScene {
    let mut scene = Scene::new();
    let camera = scene.add_node(Node::new("camera").with_transform(Transform::from_position(Vec3::new(0.0, 0.0, 8.0))));
    scene.set_camera(camera, Camera::new_perspective(50.0, 1.0, 0.1, 100.0)).unwrap();

    let cube = scene.assets.add_geometry(create_box(1.0, 1.0, 1.0));
    let lambert = scene.assets.add_material(Material::lambert(Color::WHITE));
    let caster = scene.add_mesh("caster", Mesh::new(cube, lambert).with_shadows(true, false));
    scene.node_mut(caster).unwrap().transform.position = Vec3::new(0.0, 0.0, 1.0);

    let plane = scene.assets.add_geometry(create_plane(&PlaneOptions { width: 10.0, height: 10.0, ..PlaneOptions::default() }));
    let floor = scene.assets.add_material(Material::lambert(Color::from_hex(0x888888)));
    let receiver = scene.add_mesh("receiver", Mesh::new(plane, floor).with_shadows(false, true));
    scene.node_mut(receiver).unwrap().transform.position = Vec3::new(0.0, 0.0, -1.0);

    let light = scene.add_light("sun", Light::directional(Color::WHITE, 1.0).with_shadow(512));
    scene.node_mut(light).unwrap().transform.position = Vec3::new(2.0, 3.0, 6.0);

    ShadowScene { scene, camera, light }
}

#[test]
fn directional_shadow_renders_before_main_pass() {
    init_logger();
    let mut s = shadow_scene();
    let mut renderer = Renderer::new(RecordingDevice::new(), RendererSettings::default());
    renderer.render(&mut s.scene, s.camera).unwrap();

    let shadows = renderer.context().shadow_maps();
    assert_eq!(shadows.state(s.light), ShadowMapState::Rendered);
    assert!(shadows.map_texture(s.light).is_some());
    assert_eq!(renderer.context().lights().counts().directional_shadows, 1);

    let log = renderer.device().log();
    let draws: Vec<_> = log.draws().collect();
    let shadow_draws: Vec<_> = draws.iter().filter(|(_, fb, _)| fb.is_some()).collect();
    let main_draws: Vec<_> = draws.iter().filter(|(_, fb, _)| fb.is_none()).collect();

    // Only the caster lands in the depth map; both meshes reach the screen.
    assert_eq!(shadow_draws.len(), 1);
    assert_eq!(main_draws.len(), 2);
    let first_main = draws.iter().position(|(_, fb, _)| fb.is_none()).unwrap();
    assert!(draws[..first_main].iter().all(|(_, fb, _)| fb.is_some()));

    // The depth program is not the material's program.
    let depth_program = shadow_draws[0].0;
    assert!(main_draws.iter().all(|(program, ..)| *program != depth_program));

    // The map was cleared before it was drawn into.
    let shadow_fb = shadow_draws[0].1;
    assert!(log.commands().iter().any(|c| matches!(
        c,
        Command::Clear { flags, framebuffer } if flags.contains(ClearFlags::DEPTH) && *framebuffer == shadow_fb
    )));
}

#[test]
fn static_light_reuses_its_map() {
    init_logger();
    let mut s = shadow_scene();
    s.scene.light_mut(s.light).unwrap().shadow.auto_update = false;
    let mut renderer = Renderer::new(RecordingDevice::new(), RendererSettings::default());

    renderer.render(&mut s.scene, s.camera).unwrap();
    let mark = renderer.device().log().len();
    renderer.render(&mut s.scene, s.camera).unwrap();
    let second_frame_shadow_draws = renderer
        .device()
        .log()
        .since(mark)
        .iter()
        .filter(|c| matches!(c, Command::Draw { framebuffer: Some(_), .. }))
        .count();
    assert_eq!(second_frame_shadow_draws, 0);

    // Requesting an update renders the map once more.
    s.scene.light_mut(s.light).unwrap().shadow.needs_update = true;
    let mark = renderer.device().log().len();
    renderer.render(&mut s.scene, s.camera).unwrap();
    let shadow_draws = renderer
        .device()
        .log()
        .since(mark)
        .iter()
        .filter(|c| matches!(c, Command::Draw { framebuffer: Some(_), .. }))
        .count();
    assert_eq!(shadow_draws, 1);
    assert!(!s.scene.light(s.light).unwrap().shadow.needs_update);
}

#[test]
fn disabled_shadows_skip_the_sub_pass() {
    init_logger();
    let mut s = shadow_scene();
    let settings = RendererSettings {
        shadows: strata::renderer::ShadowSettings { enabled: false, ..Default::default() },
        ..RendererSettings::default()
    };
    let mut renderer = Renderer::new(RecordingDevice::new(), settings);
    renderer.render(&mut s.scene, s.camera).unwrap();

    assert!(renderer.device().log().draws().all(|(_, fb, _)| fb.is_none()));
    assert_eq!(renderer.context().shadow_maps().state(s.light), ShadowMapState::Idle);
    assert_eq!(renderer.info().calls, 2);
}

#[test]
fn single_cube_draws_once_with_its_own_program() {
    init_logger();
    let mut scene = Scene::new();
    let camera = scene.add_node(Node::new("camera").with_transform(Transform::from_position(Vec3::new(0.0, 1.0, 6.0))));
    scene.set_camera(camera, Camera::new_perspective(50.0, 1.0, 0.1, 100.0)).unwrap();
    let cube = scene.assets.add_geometry(create_box(1.0, 1.0, 1.0));
    let material = scene.assets.add_material(Material::standard(Color::from_hex(0x44aa88)));
    scene.add_mesh("cube", Mesh::new(cube, material).with_shadows(true, true));
    let light = scene.add_light("sun", Light::directional(Color::WHITE, 1.0).with_shadow(1024));
    scene.node_mut(light).unwrap().transform.position = Vec3::new(3.0, 5.0, 2.0);

    let mut renderer = Renderer::new(RecordingDevice::new(), RendererSettings::default());
    renderer.render(&mut scene, camera).unwrap();

    let shadows = renderer.context().shadow_maps();
    assert_eq!(shadows.state(light), ShadowMapState::Rendered);
    assert!(shadows.map_texture(light).is_some());

    let log = renderer.device().log();
    assert!(log.draws().any(|(_, fb, _)| fb.is_some()));
    let main: Vec<_> = log.draws().filter(|(_, fb, _)| fb.is_none()).map(|(program, ..)| program).collect();
    assert_eq!(main.len(), 1);

    let material_id = scene.assets.material(material).unwrap().id();
    let handles = renderer.programs().programs_of(material_id);
    let own = handles
        .iter()
        .filter_map(|&h| renderer.programs().get(h).and_then(|e| e.program()))
        .collect::<Vec<_>>();
    assert!(own.contains(&main[0]));
}
