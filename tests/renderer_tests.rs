//! Renderer Integration Tests
//!
//! Drives full frames through the recording device:
//! - Program sharing and release on material disposal
//! - Redundant state elision across identical frames
//! - Resize, viewport and camera aspect
//! - Clear color encoding and pixel readback
//! - Context loss, compile failure fallback and asynchronous compiles

use glam::Vec3;
use strata::errors::StrataError;
use strata::renderer::device::{Command, DeviceCapabilities};
use strata::renderer::{Rect, RecordingDevice, RenderEvent, Renderer, RendererSettings};
use strata::resources::color::srgb_to_linear;
use strata::resources::{ColorSpace, MaterialKind, RenderTargetDescriptor, ShaderDefines, TextureFormat};
use strata::scene::{Camera, Mesh, Node, NodeHandle, Scene, Transform};
use strata::{Color, Material, MaterialHandle, Texture, create_box};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn scene_with_camera() -> (Scene, NodeHandle) {
    let mut scene = Scene::new();
    let camera = scene.add_node(Node::new("camera").with_transform(Transform::from_position(Vec3::new(0.0, 0.0, 5.0))));
    scene.set_camera(camera, Camera::new_perspective(60.0, 1.0, 0.1, 100.0)).unwrap();
    (scene, camera)
}

fn add_cube(scene: &mut Scene, material: Material, x: f32) -> (NodeHandle, MaterialHandle) {
    let geometry = scene.assets.add_geometry(create_box(1.0, 1.0, 1.0));
    let material = scene.assets.add_material(material);
    let node = scene.add_mesh("cube", Mesh::new(geometry, material));
    scene.node_mut(node).unwrap().transform.position = Vec3::new(x, 0.0, 0.0);
    (node, material)
}

fn renderer() -> Renderer<RecordingDevice> {
    Renderer::new(RecordingDevice::new(), RendererSettings::default())
}

fn screen_draws(renderer: &Renderer<RecordingDevice>, mark: usize) -> usize {
    renderer
        .device()
        .log()
        .since(mark)
        .iter()
        .filter(|c| matches!(c, Command::Draw { framebuffer: None, .. }))
        .count()
}

// ============================================================================
// Program cache
// ============================================================================

#[test]
fn define_order_does_not_change_the_key() {
    let mut a = ShaderDefines::new();
    a.flag("USE_MAP");
    a.set_count("NUM_DIR_LIGHTS", 2);
    let mut b = ShaderDefines::new();
    b.set_count("NUM_DIR_LIGHTS", 2);
    b.flag("USE_MAP");
    assert_eq!(a.canonical_key(), b.canonical_key());
    assert_eq!(a.key_hash(), b.key_hash());
}

#[test]
fn equivalent_materials_share_one_program() {
    init_logger();
    let (mut scene, camera) = scene_with_camera();
    let (_, red) = add_cube(&mut scene, Material::lambert(Color::from_hex(0xff0000)), -1.0);
    let (_, blue) = add_cube(&mut scene, Material::lambert(Color::from_hex(0x0000ff)), 1.0);

    let mut renderer = renderer();
    renderer.render(&mut scene, camera).unwrap();

    let red_id = scene.assets.material(red).unwrap().id();
    let blue_id = scene.assets.material(blue).unwrap().id();
    assert_eq!(renderer.programs().programs_of(red_id), renderer.programs().programs_of(blue_id));
    assert_eq!(renderer.info().programs, 1);
    assert_eq!(renderer.info().calls, 2);
}

#[test]
fn shared_program_survives_until_last_material_is_disposed() {
    init_logger();
    let (mut scene, camera) = scene_with_camera();
    let (a_node, a) = add_cube(&mut scene, Material::phong(Color::WHITE), -1.0);
    let (b_node, b) = add_cube(&mut scene, Material::phong(Color::from_hex(0x336699)), 1.0);

    let mut renderer = renderer();
    renderer.render(&mut scene, camera).unwrap();
    assert_eq!(renderer.device().live_programs(), 1);

    scene.remove(a_node, strata::scene::RemoveMode::Recursive).unwrap();
    scene.assets.dispose_material(a);
    renderer.render(&mut scene, camera).unwrap();
    assert_eq!(renderer.device().live_programs(), 1);

    scene.remove(b_node, strata::scene::RemoveMode::Recursive).unwrap();
    scene.assets.dispose_material(b);
    assert_eq!(renderer.process_disposals(&scene), 1);
    assert_eq!(renderer.device().live_programs(), 0);
}

#[test]
fn animated_material_keeps_one_fast_entry() {
    init_logger();
    let (mut scene, camera) = scene_with_camera();
    let (_, material) = add_cube(&mut scene, Material::standard(Color::WHITE), 0.0);
    let mut renderer = renderer();

    for frame in 0..200u32 {
        let t = frame as f32 / 200.0;
        scene.assets.material_mut(material).unwrap().set_color(Color::new(t, 1.0 - t, 0.5));
        renderer.render(&mut scene, camera).unwrap();
    }
    assert_eq!(renderer.programs().len(), 1);
    assert_eq!(renderer.programs().fast_len(), 1);
}

// ============================================================================
// State tracking
// ============================================================================

#[test]
fn identical_frames_issue_no_redundant_bindings() {
    init_logger();
    let (mut scene, camera) = scene_with_camera();
    add_cube(&mut scene, Material::standard(Color::WHITE), 0.0);

    let mut renderer = renderer();
    renderer.render(&mut scene, camera).unwrap();
    let mark = renderer.device().log().len();
    renderer.render(&mut scene, camera).unwrap();

    let second = renderer.device().log().since(mark);
    assert_eq!(screen_draws(&renderer, mark), 1);
    assert!(!second.iter().any(|c| matches!(
        c,
        Command::UseProgram(_)
            | Command::LinkProgram { .. }
            | Command::CreateTexture { .. }
            | Command::CreateBuffer { .. }
            | Command::SetCapability(..)
            | Command::BlendFunc(_)
            | Command::DepthFunc(_)
            | Command::CullFace(_)
    )));
}

// ============================================================================
// Resize
// ============================================================================

#[test]
fn resize_updates_viewport_and_camera_aspect() {
    init_logger();
    let (mut scene, camera) = scene_with_camera();
    add_cube(&mut scene, Material::basic(Color::WHITE), 0.0);
    let mut renderer = renderer();

    renderer.set_size(800, 600, 1.0);
    renderer.render(&mut scene, camera).unwrap();
    assert!((scene.camera(camera).unwrap().aspect() - 800.0 / 600.0).abs() < 1e-6);

    renderer.set_size(1920, 1080, 1.0);
    let mark = renderer.device().log().len();
    renderer.render(&mut scene, camera).unwrap();

    assert_eq!(renderer.viewport(), Rect::new(0, 0, 1920, 1080));
    assert_eq!(renderer.drawing_buffer_size(), (1920, 1080));
    assert!((scene.camera(camera).unwrap().aspect() - 1920.0 / 1080.0).abs() < 1e-6);
    let viewport = renderer
        .device()
        .log()
        .since(mark)
        .iter()
        .rev()
        .find_map(|c| match c {
            Command::Viewport(rect) => Some(*rect),
            _ => None,
        });
    assert_eq!(viewport, Some(Rect::new(0, 0, 1920, 1080)));
}

#[test]
fn pixel_ratio_scales_the_drawing_buffer() {
    let mut renderer = renderer();
    renderer.set_size(400, 300, 2.0);
    assert_eq!(renderer.size(), (400, 300));
    assert_eq!(renderer.drawing_buffer_size(), (800, 600));
    renderer.set_viewport(10, 10, 100, 50);
    assert_eq!(renderer.viewport(), Rect::new(20, 20, 200, 100));
}

// ============================================================================
// Color encoding & readback
// ============================================================================

#[test]
fn background_is_encoded_exactly_once() {
    init_logger();
    let (mut scene, camera) = scene_with_camera();
    scene.background = Some(Color::from_hex(0x808080));
    let mut renderer = renderer();
    renderer.render(&mut scene, camera).unwrap();

    // sRGB authored, sRGB output: the round trip is the identity.
    let mut pixel = [0u8; 4];
    renderer.read_pixels(Rect::new(0, 0, 1, 1), &mut pixel).unwrap();
    assert_eq!(pixel, [128, 128, 128, 255]);

    // A linear target receives the working-space value.
    let target = renderer.create_render_target(RenderTargetDescriptor {
        color_space: ColorSpace::Linear,
        ..RenderTargetDescriptor::new(16, 16)
    });
    renderer.set_render_target(Some(target), 0, 0).unwrap();
    renderer.render(&mut scene, camera).unwrap();
    renderer.read_pixels(Rect::new(0, 0, 1, 1), &mut pixel).unwrap();
    assert_eq!(pixel, [55, 55, 55, 255]);
}

#[test]
fn async_readback_completes_after_fence() {
    init_logger();
    let (mut scene, camera) = scene_with_camera();
    scene.background = Some(Color::WHITE);
    let mut renderer = renderer();
    renderer.device_mut().set_fence_latency(3);
    renderer.render(&mut scene, camera).unwrap();

    let handle = renderer.read_pixels_async(Rect::new(0, 0, 2, 2)).unwrap();
    assert_eq!(renderer.poll_readback(handle).unwrap(), None);

    let mut pixels = None;
    for _ in 0..5 {
        pixels = renderer.poll_readback(handle).unwrap();
        if pixels.is_some() {
            break;
        }
    }
    assert_eq!(pixels, Some([255u8; 16].to_vec()));
    assert!(matches!(renderer.poll_readback(handle), Err(StrataError::ResourceNotFound(_))));
}

#[test]
fn short_readback_buffer_is_rejected() {
    let mut renderer = renderer();
    let mut out = [0u8; 3];
    assert!(renderer.read_pixels(Rect::new(0, 0, 1, 1), &mut out).is_err());
}

#[test]
fn material_color_reaches_the_uniform_in_working_space() {
    init_logger();
    let (mut scene, camera) = scene_with_camera();
    add_cube(&mut scene, Material::basic(Color::from_hex(0x808080)), 0.0);
    let mut renderer = renderer();
    renderer.render(&mut scene, camera).unwrap();

    let (program, ..) = renderer.device().log().draws().next().unwrap();
    let diffuse = renderer
        .device()
        .uniform_value(program, "diffuse")
        .and_then(|u| u.as_floats())
        .unwrap()
        .to_vec();
    let expected = srgb_to_linear(128.0 / 255.0);
    assert_eq!(diffuse.len(), 3);
    assert!(diffuse.iter().all(|c| (c - expected).abs() < 1e-6));
}

// ============================================================================
// Render targets
// ============================================================================

#[test]
fn bound_target_cannot_be_disposed() {
    init_logger();
    let (mut scene, camera) = scene_with_camera();
    add_cube(&mut scene, Material::basic(Color::WHITE), 0.0);
    let mut renderer = renderer();
    let target = renderer.create_render_target(RenderTargetDescriptor::new(64, 32));
    renderer.set_render_target(Some(target), 0, 0).unwrap();
    renderer.render(&mut scene, camera).unwrap();

    // Offscreen draws use the target's aspect.
    assert!((scene.camera(camera).unwrap().aspect() - 2.0).abs() < 1e-6);
    assert!(renderer.render_target_texture(target).is_some());
    assert!(matches!(renderer.dispose_render_target(target), Err(StrataError::ResourceInUse(_))));

    renderer.set_render_target(None, 0, 0).unwrap();
    renderer.dispose_render_target(target).unwrap();
    assert!(renderer.render_target_descriptor(target).is_none());
}

// ============================================================================
// Failure handling
// ============================================================================

#[test]
fn context_loss_invalidates_and_recovers() {
    init_logger();
    let (mut scene, camera) = scene_with_camera();
    add_cube(&mut scene, Material::standard(Color::WHITE), 0.0);
    let mut renderer = renderer();
    let events = renderer.events();
    renderer.render(&mut scene, camera).unwrap();

    renderer.device_mut().lose_context();
    assert!(matches!(renderer.render(&mut scene, camera), Err(StrataError::ContextLost)));
    assert!(matches!(renderer.render(&mut scene, camera), Err(StrataError::ContextLost)));
    assert_eq!(events.try_iter().collect::<Vec<_>>(), [RenderEvent::ContextLost]);

    renderer.device_mut().restore_context();
    assert_eq!(renderer.device().live_programs(), 0);
    let mark = renderer.device().log().len();
    renderer.render(&mut scene, camera).unwrap();

    assert_eq!(events.try_iter().collect::<Vec<_>>(), [RenderEvent::ContextRestored]);
    assert_eq!(renderer.device().live_programs(), 1);
    assert_eq!(screen_draws(&renderer, mark), 1);
}

#[test]
fn compile_failure_falls_back_without_failing_the_frame() {
    init_logger();
    let (mut scene, camera) = scene_with_camera();
    add_cube(&mut scene, Material::toon(Color::WHITE), -1.0);
    add_cube(&mut scene, Material::lambert(Color::WHITE), 1.0);
    let mut renderer = renderer();
    renderer.device_mut().fail_compile_containing("SHADING_MODEL TOON");

    renderer.render(&mut scene, camera).unwrap();
    assert_eq!(renderer.info().calls, 2);

    let programs: Vec<_> = renderer.device().log().draws().map(|(program, ..)| program).collect();
    assert_eq!(programs.len(), 2);
    assert_ne!(programs[0], programs[1]);

    // The failed entry stays failed; later frames keep using the fallback.
    renderer.render(&mut scene, camera).unwrap();
    assert_eq!(renderer.info().calls, 2);
}

#[test]
fn async_compile_skips_draws_until_ready() {
    init_logger();
    let (mut scene, camera) = scene_with_camera();
    add_cube(&mut scene, Material::standard(Color::WHITE), 0.0);

    let caps = DeviceCapabilities { parallel_shader_compile: true, ..DeviceCapabilities::webgl2_baseline() };
    let mut device = RecordingDevice::with_capabilities(caps);
    device.set_compile_latency(3);
    let settings = RendererSettings { async_compile: true, ..RendererSettings::default() };
    let mut renderer = Renderer::new(device, settings);
    let events = renderer.events();

    renderer.render(&mut scene, camera).unwrap();
    assert_eq!(renderer.info().calls, 0);

    let mut ready = 0;
    for _ in 0..5 {
        ready += renderer.poll_programs().unwrap();
        if ready > 0 {
            break;
        }
    }
    assert_eq!(ready, 1);
    assert!(events.try_iter().any(|e| e == RenderEvent::ProgramsReady(1)));

    renderer.render(&mut scene, camera).unwrap();
    assert_eq!(renderer.info().calls, 1);
}

#[test]
fn failed_texture_reupload_still_draws() {
    init_logger();
    let (mut scene, camera) = scene_with_camera();
    let texture = scene
        .assets
        .add_texture(Texture::new_2d(2, 2, TextureFormat::Rgba8, Some(vec![200; 16])));
    let mut material = Material::basic(Color::WHITE);
    if let MaterialKind::Basic(cfg) = &mut *material.kind_mut() {
        cfg.map = Some(texture);
    }
    add_cube(&mut scene, material, 0.0);
    let mut renderer = renderer();
    renderer.render(&mut scene, camera).unwrap();
    assert_eq!(renderer.info().calls, 1);

    renderer.device_mut().limit_texture_uploads(Some(4));
    scene.assets.texture_mut(texture).unwrap().set_data(vec![10; 16]);
    let mark = renderer.device().log().len();
    renderer.render(&mut scene, camera).unwrap();

    assert_eq!(renderer.info().calls, 1);
    assert_eq!(screen_draws(&renderer, mark), 1);
}

#[test]
fn missing_camera_component_is_an_error() {
    let (mut scene, _) = scene_with_camera();
    let plain = scene.add_node(Node::new("plain"));
    let mut renderer = renderer();
    assert!(matches!(renderer.render(&mut scene, plain), Err(StrataError::NotACamera)));
}
