//! Uniform binding
//!
//! [`UniformBinder`] walks a program's reflected
//! [`UniformTable`](crate::renderer::program::UniformTable) and
//! feeds every slot from the value source its [`UniformGroup`] names:
//!
//! | Group      | Source                     | Refreshed when                          |
//! |------------|----------------------------|-----------------------------------------|
//! | `Camera`   | [`CameraUniforms`]         | first use this frame, camera version    |
//! | `Fog`      | scene fog                  | first use this frame, camera version    |
//! | `Global`   | exposure, transmission     | first use this frame, camera version    |
//! | `Lights`   | [`LightState`]             | light version                           |
//! | `Material` | [`Material::visit_uniforms`] | material id or version                |
//! | `Object`   | [`ObjectUniforms`]         | every draw                              |
//!
//! Samplers are assigned texture units on every draw because units are
//! reset per draw; the unit numbers themselves rarely change, so the
//! table's value cache usually absorbs the upload.
//!
//! Authored colors are converted to the working space here, exactly once,
//! on their way into the uniform.

pub mod block;

pub use block::LightBlock;

use glam::{Mat3, Mat4, Vec3, Vec4};

use crate::errors::{Result, StrataError};
use crate::renderer::device::{GpuDevice, TextureId, UniformData, UniformType};
use crate::renderer::lights::LightState;
use crate::renderer::program::cache::ProgramEntry;
use crate::renderer::program::UniformGroup;
use crate::renderer::state::StateTracker;
use crate::renderer::textures::TextureManager;
use crate::resources::assets::{Assets, TextureHandle};
use crate::resources::color::ColorManagement;
use crate::resources::material::{Material, MaterialValue};
use crate::scene::{Camera, Fog};
use crate::utils::WarnOnce;

/// View state of the camera a pass renders from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraUniforms {
    pub view: Mat4,
    pub projection: Mat4,
    pub position: Vec3,
    pub near: f32,
    pub far: f32,
    pub orthographic: bool,
    pub version: u64,
}

impl CameraUniforms {
    #[must_use]
    pub fn from_camera(camera: &Camera) -> Self {
        let (near, far) = camera.near_far();
        Self {
            view: *camera.view_matrix(),
            projection: *camera.projection_matrix(),
            position: camera.position(),
            near,
            far,
            orthographic: camera.is_orthographic(),
            version: camera.version(),
        }
    }
}

/// Values shared by every draw of one pass.
#[derive(Clone, Copy)]
pub struct FrameUniforms<'a> {
    pub frame: u64,
    pub camera: &'a CameraUniforms,
    pub lights: &'a LightState,
    pub fog: Option<&'a Fog>,
    pub exposure: f32,
    pub color_management: &'a ColorManagement,
    /// Scene environment, used by materials without their own `envMap`.
    pub environment: Option<TextureHandle>,
    /// Opaque-pass copy sampled by transmissive materials, with its size.
    pub transmission: Option<(TextureId, (u32, u32))>,
}

/// Per-draw values.
#[derive(Debug, Clone, Copy)]
pub struct ObjectUniforms<'a> {
    pub model: Mat4,
    pub receive_shadow: bool,
    pub bones: &'a [Mat4],
    pub morph_influences: &'a [f32],
    pub morph_relative: bool,
    /// View-space clipping planes, union planes first.
    pub clipping_planes: &'a [Vec4],
    /// `(position, near, far)` of the light a distance pass renders for.
    pub reference: Option<(Vec3, f32, f32)>,
}

impl Default for ObjectUniforms<'_> {
    fn default() -> Self {
        Self {
            model: Mat4::IDENTITY,
            receive_shadow: false,
            bones: &[],
            morph_influences: &[],
            morph_relative: true,
            clipping_planes: &[],
            reference: None,
        }
    }
}

/// Transforms a world-space plane `(normal, constant)` into view space.
#[must_use]
pub fn plane_to_view(plane: Vec4, view: &Mat4) -> Vec4 {
    let p = view.inverse().transpose() * plane;
    let len = p.truncate().length();
    if len > 0.0 { p / len } else { p }
}

/// Resources a sampler binding may need.
pub struct TextureContext<'a, D: GpuDevice + ?Sized> {
    pub device: &'a mut D,
    pub tracker: &'a mut StateTracker,
    pub textures: &'a mut TextureManager,
    pub assets: &'a Assets,
}

#[derive(Debug, Default)]
pub struct UniformBinder {
    floats: Vec<f32>,
    ints: Vec<i32>,
    material: Vec<(&'static str, MaterialValue)>,
    warnings: WarnOnce,
}

impl UniformBinder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uploads everything `entry`'s program reads. The program must be
    /// bound. Returns the number of uniform commands issued.
    pub fn bind<D: GpuDevice + ?Sized>(
        &mut self,
        ctx: &mut TextureContext<'_, D>,
        entry: &mut ProgramEntry,
        frame: &FrameUniforms<'_>,
        object: &ObjectUniforms<'_>,
        material: &Material,
    ) -> Result<usize> {
        ctx.tracker.reset_texture_units();

        let first_use = entry.bind.frame != Some(frame.frame);
        let refresh_frame = first_use || entry.bind.camera_version != Some(frame.camera.version);
        let refresh_lights = first_use || entry.bind.lights_version != Some(frame.lights.version());
        let material_key = (material.id(), material.version());
        let refresh_material = first_use || entry.bind.material != Some(material_key);

        self.material.clear();
        let values = &mut self.material;
        material.visit_uniforms(&mut |name, value| values.push((name, value)));

        let mut uploads = 0;
        for index in 0..entry.uniforms().len() {
            let slot = &entry.uniforms().slots()[index];
            let (group, ty) = (slot.group, slot.ty);
            let refresh = match group {
                UniformGroup::Camera | UniformGroup::Fog | UniformGroup::Global => refresh_frame,
                UniformGroup::Lights => refresh_lights,
                UniformGroup::Material => refresh_material,
                UniformGroup::Object => true,
            };
            if !refresh && !ty.is_sampler() {
                continue;
            }

            self.floats.clear();
            self.ints.clear();
            let filled = if ty.is_sampler() {
                self.bind_samplers(ctx, slot.name.as_str(), group, ty, slot.array_len.max(1), frame)?
            } else {
                self.fill(slot.name.as_str(), group, frame, object)
            };
            if !filled {
                if group == UniformGroup::Material {
                    self.warnings
                        .warn(&format!("No value for uniform '{}' on material '{}'", slot.name, material.name));
                }
                continue;
            }

            let len = slot.component_len();
            let data = if ty.is_integer() {
                if self.ints.is_empty() {
                    self.ints.extend(self.floats.iter().map(|&f| i32::from(f != 0.0)));
                }
                self.ints.resize(len, 0);
                UniformData::Ints(&self.ints)
            } else {
                self.floats.resize(len, 0.0);
                UniformData::Floats(&self.floats)
            };

            match entry.uniforms_mut().upload(&mut *ctx.device, index, data) {
                Ok(issued) => uploads += usize::from(issued),
                Err(StrataError::ContextLost) => return Err(StrataError::ContextLost),
                Err(err) => {
                    let name = &entry.uniforms().slots()[index].name;
                    self.warnings.warn(&format!("Uniform '{name}' rejected: {err}"));
                }
            }
        }

        entry.bind.frame = Some(frame.frame);
        entry.bind.camera_version = Some(frame.camera.version);
        entry.bind.lights_version = Some(frame.lights.version());
        entry.bind.material = Some(material_key);
        Ok(uploads)
    }

    fn fill(&mut self, name: &str, group: UniformGroup, frame: &FrameUniforms<'_>, object: &ObjectUniforms<'_>) -> bool {
        let out = &mut self.floats;
        let camera = frame.camera;
        match group {
            UniformGroup::Camera => match name {
                "projectionMatrix" => out.extend_from_slice(&camera.projection.to_cols_array()),
                "viewMatrix" => out.extend_from_slice(&camera.view.to_cols_array()),
                "cameraPosition" => out.extend_from_slice(&camera.position.to_array()),
                "isOrthographic" => out.push(if camera.orthographic { 1.0 } else { 0.0 }),
                "cameraNear" => out.push(camera.near),
                "cameraFar" => out.push(camera.far),
                _ => return false,
            },
            UniformGroup::Object => match name {
                "modelMatrix" => out.extend_from_slice(&object.model.to_cols_array()),
                "modelViewMatrix" => out.extend_from_slice(&(camera.view * object.model).to_cols_array()),
                "normalMatrix" => {
                    let normal = Mat3::from_mat4(camera.view * object.model).inverse().transpose();
                    out.extend_from_slice(&normal.to_cols_array());
                }
                "boneMatrices" => {
                    for bone in object.bones {
                        out.extend_from_slice(&bone.to_cols_array());
                    }
                }
                "morphTargetInfluences" => out.extend_from_slice(object.morph_influences),
                "morphTargetBaseInfluence" => {
                    let base = if object.morph_relative { 1.0 } else { 1.0 - object.morph_influences.iter().sum::<f32>() };
                    out.push(base);
                }
                "receiveShadow" => out.push(if object.receive_shadow { 1.0 } else { 0.0 }),
                "clippingPlanes" => {
                    for plane in object.clipping_planes {
                        out.extend_from_slice(&plane.to_array());
                    }
                }
                "referencePosition" => match object.reference {
                    Some((position, ..)) => out.extend_from_slice(&position.to_array()),
                    None => return false,
                },
                "nearDistance" => match object.reference {
                    Some((_, near, _)) => out.push(near),
                    None => return false,
                },
                "farDistance" => match object.reference {
                    Some((.., far)) => out.push(far),
                    None => return false,
                },
                _ => return false,
            },
            UniformGroup::Lights => match frame.lights.values(name) {
                Some(values) => out.extend_from_slice(values),
                None => return false,
            },
            UniformGroup::Fog => {
                let Some(fog) = frame.fog else { return false };
                match (name, fog) {
                    ("fogColor", _) => {
                        let color = frame.color_management.to_working(fog.color());
                        out.extend_from_slice(&color.to_array());
                    }
                    ("fogNear", Fog::Linear { near, .. }) => out.push(*near),
                    ("fogFar", Fog::Linear { far, .. }) => out.push(*far),
                    ("fogDensity", Fog::Exp2 { density, .. }) => out.push(*density),
                    _ => return false,
                }
            }
            UniformGroup::Global => match name {
                "toneMappingExposure" => out.push(frame.exposure),
                "transmissionSamplerSize" => {
                    let (w, h) = frame.transmission.map_or((1, 1), |(_, size)| size);
                    out.extend_from_slice(&[w as f32, h as f32]);
                }
                _ => return false,
            },
            UniformGroup::Material => {
                let Some(&(_, value)) = self.material.iter().find(|(n, _)| *n == name) else {
                    return false;
                };
                match value {
                    MaterialValue::Float(v) => out.push(v),
                    MaterialValue::Vec2(v) => out.extend_from_slice(&v.to_array()),
                    MaterialValue::Color(c) => {
                        out.extend_from_slice(&frame.color_management.to_working(c).to_array());
                    }
                    MaterialValue::Texture(_) => return false,
                }
            }
        }
        true
    }

    fn bind_samplers<D: GpuDevice + ?Sized>(
        &mut self,
        ctx: &mut TextureContext<'_, D>,
        name: &str,
        group: UniformGroup,
        ty: UniformType,
        array_len: u32,
        frame: &FrameUniforms<'_>,
    ) -> Result<bool> {
        let Some(kind) = ty.texture_kind() else {
            return Ok(false);
        };
        let handle = match group {
            UniformGroup::Material => {
                let Some(&(_, value)) = self.material.iter().find(|(n, _)| *n == name) else {
                    return Ok(false);
                };
                match value {
                    MaterialValue::Texture(h) if name == "envMap" => h.or(frame.environment),
                    MaterialValue::Texture(h) => h,
                    _ => return Ok(false),
                }
            }
            _ => None,
        };

        for element in 0..array_len as usize {
            let fixed = match group {
                UniformGroup::Lights => frame.lights.shadow_map(name, element),
                UniformGroup::Global if name == "transmissionSamplerMap" => frame.transmission.map(|(id, _)| id),
                _ => None,
            };
            let texture = match fixed {
                Some(id) => id,
                None => ctx.textures.resolve(&mut *ctx.device, ctx.assets, handle, kind)?,
            };
            let unit = ctx.tracker.allocate_texture_unit();
            ctx.tracker.bind_texture(&mut *ctx.device, unit, kind, Some(texture))?;
            self.ints.push(unit as i32);
        }
        Ok(true)
    }

    /// Forgets every logged warning.
    pub fn reset(&mut self) {
        self.warnings.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::device::{Command, DeviceCapabilities, RecordingDevice};
    use crate::renderer::lights::{LightCounts, light_uniform_declarations};
    use crate::renderer::program::ProgramCache;
    use crate::renderer::program::cache::ProgramHandle;
    use crate::renderer::program::parameters::{ProgramInputs, ProgramVariant, ShadowConfig, build_parameters};
    use crate::renderer::settings::{Precision, ShadowType, ToneMapping};
    use crate::resources::color::{Color, ColorSpace, srgb_to_linear};
    use crate::resources::geometry::GeometryFeatures;

    struct Harness {
        device: RecordingDevice,
        cache: ProgramCache,
        handle: ProgramHandle,
        tracker: StateTracker,
        textures: TextureManager,
        assets: Assets,
        lights: LightState,
        colors: ColorManagement,
        binder: UniformBinder,
    }

    impl Harness {
        fn new(material: &Material) -> Self {
            let mut device = RecordingDevice::new();
            let counts = LightCounts::default();
            let inputs = ProgramInputs {
                variant: ProgramVariant::Main,
                material,
                geometry: GeometryFeatures::HAS_NORMAL,
                morph_targets: 0,
                morph_relative: true,
                bones: 0,
                lights: &counts,
                shadows: ShadowConfig { enabled: false, kind: ShadowType::Pcf },
                fog: None,
                env_mapping: None,
                to_screen: true,
                output_color_space: ColorSpace::Srgb,
                tone_mapping: ToneMapping::None,
                clipping_planes: 0,
                clip_intersection: 0,
                precision: Precision::High,
                light_block: false,
                physically_correct_lights: true,
            };
            let params = build_parameters(&inputs, &DeviceCapabilities::webgl2_baseline()).unwrap();
            let mut cache = ProgramCache::new(false);
            let decl = light_uniform_declarations(&counts, false);
            let handle = cache.resolve(&mut device, material.id(), None, params, &decl).unwrap();
            let program = cache.get(handle).unwrap().program();
            device.use_program(program).unwrap();
            let tracker = StateTracker::new(device.capabilities());
            Self {
                device,
                cache,
                handle,
                tracker,
                textures: TextureManager::new(),
                assets: Assets::new(),
                lights: LightState::new(),
                colors: ColorManagement::default(),
                binder: UniformBinder::new(),
            }
        }

        fn bind(&mut self, frame: u64, camera: &CameraUniforms, material: &Material) -> usize {
            let frame = FrameUniforms {
                frame,
                camera,
                lights: &self.lights,
                fog: None,
                exposure: 1.0,
                color_management: &self.colors,
                environment: None,
                transmission: None,
            };
            let mut ctx = TextureContext {
                device: &mut self.device,
                tracker: &mut self.tracker,
                textures: &mut self.textures,
                assets: &self.assets,
            };
            let entry = self.cache.get_mut(self.handle).unwrap();
            self.binder
                .bind(&mut ctx, entry, &frame, &ObjectUniforms::default(), material)
                .unwrap()
        }

        fn uploaded_since(&self, mark: usize) -> Vec<String> {
            self.device
                .log()
                .since(mark)
                .iter()
                .filter_map(|c| match c {
                    Command::SetUniform { name, .. } => Some(name.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    fn camera(z: f32, version: u64) -> CameraUniforms {
        CameraUniforms {
            view: Mat4::from_translation(Vec3::new(0.0, 0.0, -z)),
            projection: Mat4::perspective_rh_gl(1.0, 1.0, 0.1, 100.0),
            position: Vec3::new(0.0, 0.0, z),
            near: 0.1,
            far: 100.0,
            orthographic: false,
            version,
        }
    }

    #[test]
    fn planes_transform_into_view_space() {
        // Camera 5 units up the z axis looking down -z.
        let view = Mat4::from_translation(Vec3::new(0.0, 0.0, -5.0));
        // World plane z = 0, clipping z < 0.
        let plane = plane_to_view(Vec4::new(0.0, 0.0, 1.0, 0.0), &view);
        // In view space the plane sits at z = -5.
        assert!((plane - Vec4::new(0.0, 0.0, 1.0, 5.0)).length() < 1e-5);
    }

    #[test]
    fn unchanged_inputs_issue_no_uploads() {
        let material = Material::basic(Color::WHITE);
        let mut h = Harness::new(&material);
        let cam = camera(5.0, 1);

        assert!(h.bind(1, &cam, &material) > 0);
        assert_eq!(h.bind(1, &cam, &material), 0);
        // A new frame re-checks every group; equal values are still absorbed.
        assert_eq!(h.bind(2, &cam, &material), 0);
    }

    #[test]
    fn camera_change_refreshes_camera_group_only() {
        let material = Material::basic(Color::WHITE);
        let mut h = Harness::new(&material);
        h.bind(1, &camera(5.0, 1), &material);

        let mark = h.device.log().len();
        assert!(h.bind(1, &camera(8.0, 2), &material) > 0);
        let names = h.uploaded_since(mark);
        assert!(names.iter().any(|n| n == "viewMatrix"));
        assert!(!names.iter().any(|n| n == "diffuse"));
    }

    #[test]
    fn material_edit_refreshes_material_group_once() {
        let mut material = Material::basic(Color::WHITE);
        let mut h = Harness::new(&material);
        let cam = camera(5.0, 1);
        h.bind(1, &cam, &material);

        material.set_color(Color::from_hex(0x80_80_80));
        let mark = h.device.log().len();
        h.bind(1, &cam, &material);
        let names = h.uploaded_since(mark);
        assert_eq!(names, ["diffuse"]);

        let program = h.cache.get(h.handle).unwrap().program().unwrap();
        let diffuse = h.device.uniform_value(program, "diffuse").unwrap().as_floats().unwrap();
        assert!((diffuse[0] - srgb_to_linear(128.0 / 255.0)).abs() < 1e-6);
    }
}
