//! Render context
//!
//! Every GPU-side cache a renderer needs, owned in one place: the state
//! tracker, program cache, uniform binder, texture and geometry residency,
//! the light aggregate and its uniform block, shadow maps and the render
//! list. Two renderers never share any of it.
//!
//! The per-draw sequence lives here:
//!
//! ```text
//! RenderItem ─▶ program (L1 fast key ─miss─▶ parameters ─▶ L2 cache)
//!            ─▶ tracker.set_material_state
//!            ─▶ geometries.bind
//!            ─▶ binder.bind
//!            ─▶ device.draw
//! ```
//!
//! Fields are split so a draw can borrow the cache entry mutably while the
//! tracker, binder and residency managers are borrowed alongside it.

use std::hash::BuildHasher;
use std::sync::Arc;

use glam::{Mat4, Vec3, Vec4};
use rustc_hash::FxBuildHasher;
use smallvec::SmallVec;

use crate::errors::{Result, StrataError};
use crate::renderer::device::{DeviceError, DrawCall, GpuDevice};
use crate::renderer::geometries::GeometryManager;
use crate::renderer::info::RenderInfo;
use crate::renderer::lights::{LightState, ShadowCaster, light_uniform_declarations};
use crate::renderer::program::{
    FastProgramKey, ProgramCache, ProgramHandle, ProgramInputs, ProgramState, ProgramVariant, ShadowConfig,
    build_parameters,
};
use crate::renderer::render_list::{RenderItem, RenderList};
use crate::renderer::settings::{RendererSettings, ToneMapping};
use crate::renderer::shadow::{ShadowJob, ShadowMapPass, ShadowPlan};
use crate::renderer::state::StateTracker;
use crate::renderer::textures::TextureManager;
use crate::renderer::uniforms::{FrameUniforms, LightBlock, ObjectUniforms, TextureContext, UniformBinder, plane_to_view};
use crate::resources::color::{Color, ColorSpace};
use crate::resources::geometry::Geometry;
use crate::resources::material::{CompareFunc, Material, ShadingModel};
use crate::resources::texture::TextureMapping;
use crate::scene::{Frustum, Scene};
use crate::utils::WarnOnce;

/// Pass-wide inputs of a draw.
#[derive(Clone, Copy)]
pub(crate) struct PassInputs<'a> {
    pub variant: ProgramVariant,
    pub uniforms: FrameUniforms<'a>,
    /// Output goes to the default framebuffer.
    pub to_screen: bool,
    /// Encoding of the bound target.
    pub output_color_space: ColorSpace,
    /// World-space planes applied to every material.
    pub global_planes: &'a [Vec4],
    /// `(position, near, far)` for the distance variant.
    pub reference: Option<(Vec3, f32, f32)>,
    /// Per-view culling for shadow renders.
    pub frustum: Option<&'a Frustum>,
    /// Hash of everything scene-wide that feeds program parameters.
    pub scene_state: u64,
}

enum Resolved {
    Program(ProgramHandle),
    Fallback(ProgramHandle),
    /// Still compiling or unusable; the draw is skipped this frame.
    Skip,
}

pub struct RenderContext {
    pub(crate) tracker: StateTracker,
    pub(crate) programs: ProgramCache,
    pub(crate) binder: UniformBinder,
    pub(crate) textures: TextureManager,
    pub(crate) geometries: GeometryManager,
    pub(crate) lights: LightState,
    pub(crate) light_block: LightBlock,
    pub(crate) shadows: ShadowMapPass,
    pub(crate) list: RenderList,
    pub(crate) info: RenderInfo,
    light_declarations: String,
    use_light_block: bool,
    fallback: Arc<Material>,
    planes: Vec<Vec4>,
    warnings: WarnOnce,
}

fn shading_env(material: &Material, scene: &Scene) -> Option<TextureMapping> {
    let own = material.kind().env_map();
    let handle = match material.shading_model() {
        ShadingModel::Basic => own,
        _ => own.or(scene.environment),
    };
    scene.assets.texture(handle?).map(|t| t.mapping)
}

impl RenderContext {
    #[must_use]
    pub fn new(settings: &RendererSettings, tracker: StateTracker) -> Self {
        Self {
            tracker,
            programs: ProgramCache::new(settings.async_compile),
            binder: UniformBinder::new(),
            textures: TextureManager::new(),
            geometries: GeometryManager::new(),
            lights: LightState::new(),
            light_block: LightBlock::new(),
            shadows: ShadowMapPass::new(),
            list: RenderList::new(),
            info: RenderInfo::default(),
            light_declarations: String::new(),
            use_light_block: false,
            fallback: Arc::new(Material::basic(Color::new(1.0, 0.0, 1.0)).with_name("fallback")),
            planes: Vec::new(),
            warnings: WarnOnce::new(),
        }
    }

    #[must_use]
    pub fn tracker(&self) -> &StateTracker {
        &self.tracker
    }

    #[must_use]
    pub fn shadow_maps(&self) -> &ShadowMapPass {
        &self.shadows
    }

    #[must_use]
    pub fn lights(&self) -> &LightState {
        &self.lights
    }

    #[must_use]
    pub fn render_list(&self) -> &RenderList {
        &self.list
    }

    /// Rebuilds the light aggregate for the collected list and refreshes the
    /// light declarations programs are generated with.
    pub(crate) fn setup_lights(&mut self, scene: &Scene, view: &Mat4, settings: &RendererSettings, block_supported: bool) {
        self.lights.setup(
            scene,
            self.list.lights(),
            view,
            &settings.color_management,
            settings.shadows.enabled,
        );
        self.use_light_block = settings.light_uniform_block && block_supported;
        self.light_declarations = light_uniform_declarations(self.lights.counts(), self.use_light_block);
    }

    /// Uploads the light block when it is in use.
    pub(crate) fn upload_light_block<D: GpuDevice + ?Sized>(&mut self, device: &mut D) -> Result<()> {
        if self.use_light_block {
            self.light_block.update(device, &mut self.tracker, &self.lights)?;
        }
        Ok(())
    }

    /// Hash of the scene-wide program inputs.
    #[must_use]
    pub(crate) fn scene_state(&self, scene: &Scene, settings: &RendererSettings, to_screen: bool, output: ColorSpace) -> u64 {
        let environment = scene
            .environment
            .and_then(|h| scene.assets.texture(h))
            .map(|t| t.mapping);
        FxBuildHasher.hash_one((
            *self.lights.counts(),
            scene.fog.as_ref().map(|f| f.is_exp2()),
            environment,
            to_screen,
            output,
            if to_screen { settings.tone_mapping } else { ToneMapping::None },
            (settings.shadows.enabled, settings.shadows.kind),
            settings.precision,
            self.use_light_block,
            settings.physically_correct_lights,
            (settings.clipping_planes.len(), settings.local_clipping_enabled),
        ))
    }

    // ------------------------------------------------------------------
    // Shadows
    // ------------------------------------------------------------------

    /// Renders every caster's map and stores the results in the light
    /// aggregate. Runs before any main-pass draw.
    pub(crate) fn render_shadows<D: GpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        scene: &mut Scene,
        settings: &RendererSettings,
        frame: u64,
    ) -> Result<usize> {
        let casters: SmallVec<[_; 8]> = self.lights.casters().iter().copied().collect();
        self.shadows.retain(device, &mut self.tracker, &casters);
        if !settings.shadows.enabled || casters.is_empty() {
            return Ok(0);
        }

        let items = std::mem::take(&mut self.list);
        let rendered = self.render_casters(device, scene, settings, frame, &casters, &items);
        self.list = items;
        rendered
    }

    fn render_casters<D: GpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        scene: &mut Scene,
        settings: &RendererSettings,
        frame: u64,
        casters: &[ShadowCaster],
        list: &RenderList,
    ) -> Result<usize> {
        let mut rendered = 0;
        for &caster in casters {
            let plan = self
                .shadows
                .plan(device, &mut self.tracker, scene, caster, list.casters())?;
            let result = match plan {
                ShadowPlan::Skip => continue,
                ShadowPlan::Reuse(result) => result,
                ShadowPlan::Render(job) => {
                    self.render_shadow_job(device, scene, settings, frame, &job, list.casters())?;
                    rendered += 1;
                    self.shadows.complete(&job)
                }
            };
            self.lights.apply_shadow(&caster, &result);
            if let Some(light) = scene.light_mut(caster.node) {
                light.shadow.needs_update = false;
            }
        }
        Ok(rendered)
    }

    fn render_shadow_job<D: GpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        scene: &Scene,
        settings: &RendererSettings,
        frame: u64,
        job: &ShadowJob,
        items: &[RenderItem],
    ) -> Result<()> {
        self.tracker.bind_framebuffer(device, Some(job.framebuffer))?;
        self.tracker.set_scissor(device, None)?;
        self.tracker.clear(device, job.clear_flags, job.clear_color, 1.0, 0)?;
        let scene_state = self.scene_state(scene, settings, false, ColorSpace::Linear);
        // Depth and distance programs read no light uniforms.
        let no_lights = LightState::new();

        for view in &job.views {
            self.tracker.set_viewport(device, view.viewport)?;
            let pass = PassInputs {
                variant: job.variant,
                uniforms: FrameUniforms {
                    frame,
                    camera: &view.camera,
                    lights: &no_lights,
                    fog: None,
                    exposure: 1.0,
                    color_management: &settings.color_management,
                    environment: None,
                    transmission: None,
                },
                to_screen: false,
                output_color_space: ColorSpace::Linear,
                global_planes: &[],
                reference: job.reference,
                frustum: Some(&view.frustum),
                scene_state,
            };
            for item in items {
                self.draw_item(device, scene, settings, &pass, item)?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Draws
    // ------------------------------------------------------------------

    /// Draws `items` in order. Returns the number of draw calls issued.
    pub(crate) fn draw_items<D: GpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        scene: &Scene,
        settings: &RendererSettings,
        pass: &PassInputs<'_>,
        items: &[RenderItem],
    ) -> Result<usize> {
        let mut drawn = 0;
        for item in items {
            drawn += usize::from(self.draw_item(device, scene, settings, pass, item)?);
        }
        Ok(drawn)
    }

    fn resolve_program<D: GpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        scene: &Scene,
        settings: &RendererSettings,
        pass: &PassInputs<'_>,
        material: &Material,
        geometry: &Geometry,
        bones: usize,
        clip: (usize, usize),
    ) -> Result<Option<ProgramHandle>> {
        let key = FastProgramKey {
            material_id: material.id(),
            material_layout: material.layout_key(),
            geometry_id: geometry.id(),
            geometry_layout: geometry.layout_version(),
            variant: pass.variant,
            scene_state: FxBuildHasher.hash_one((pass.scene_state, bones, clip)),
        };

        let handle = if let Some(handle) = self.programs.lookup_fast(&key) {
            handle
        } else {
            let inputs = ProgramInputs {
                variant: pass.variant,
                material,
                geometry: geometry.features(),
                morph_targets: geometry.morph_targets().len(),
                morph_relative: geometry.morph_relative,
                bones,
                lights: self.lights.counts(),
                shadows: ShadowConfig { enabled: settings.shadows.enabled, kind: settings.shadows.kind },
                fog: scene.fog.as_ref(),
                env_mapping: shading_env(material, scene),
                to_screen: pass.to_screen,
                output_color_space: pass.output_color_space,
                tone_mapping: settings.tone_mapping,
                clipping_planes: clip.0,
                clip_intersection: clip.1,
                precision: settings.precision,
                light_block: self.use_light_block,
                physically_correct_lights: settings.physically_correct_lights,
            };
            let params = match build_parameters(&inputs, device.capabilities()) {
                Ok(params) => params,
                Err(err) => {
                    self.warnings
                        .warn(&format!("Material '{}' cannot be rendered ({err}); using fallback", material.name));
                    return Ok(None);
                }
            };
            if let Some((requested, used)) = params.clamped_bones {
                self.warnings.warn(&format!(
                    "Skin needs {requested} bones but the device fits {used}; extra bones are ignored"
                ));
            }
            if let Some((requested, used)) = params.clamped_morphs {
                self.warnings.warn(&format!(
                    "Geometry '{}' has {requested} morph targets; the first {used} are used",
                    geometry.name
                ));
            }
            self.programs
                .resolve(device, material.id(), Some(key), params, &self.light_declarations)?
        };
        self.programs.ensure_compiled(device, handle)?;
        Ok(Some(handle))
    }

    fn program_for<D: GpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        scene: &Scene,
        settings: &RendererSettings,
        pass: &PassInputs<'_>,
        material: &Material,
        geometry: &Geometry,
        bones: usize,
        clip: (usize, usize),
    ) -> Result<Resolved> {
        let primary = match self.resolve_program(device, scene, settings, pass, material, geometry, bones, clip) {
            Err(StrataError::Program(err)) => {
                self.warnings
                    .warn(&format!("Material '{}' program failed ({err}); using fallback", material.name));
                None
            }
            other => other?,
        };
        if let Some(handle) = primary {
            match self.programs.poll(device, handle)? {
                ProgramState::Ready => return Ok(Resolved::Program(handle)),
                ProgramState::Compiling | ProgramState::Uncompiled => return Ok(Resolved::Skip),
                ProgramState::Failed(_) | ProgramState::Released => {}
            }
        }

        let fallback = Arc::clone(&self.fallback);
        let handle = match self.resolve_program(device, scene, settings, pass, &fallback, geometry, bones, (0, 0)) {
            Err(StrataError::Program(_)) => None,
            other => other?,
        };
        let Some(handle) = handle else {
            self.warnings.error("Fallback program is unavailable; draw skipped");
            return Ok(Resolved::Skip);
        };
        Ok(match self.programs.poll(device, handle)? {
            ProgramState::Ready => Resolved::Fallback(handle),
            _ => Resolved::Skip,
        })
    }

    /// Issues one draw. Returns whether a draw call reached the device.
    pub(crate) fn draw_item<D: GpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        scene: &Scene,
        settings: &RendererSettings,
        pass: &PassInputs<'_>,
        item: &RenderItem,
    ) -> Result<bool> {
        let (Some(material), Some(geometry), Some(mesh)) = (
            scene.assets.material(item.material),
            scene.assets.geometry(item.geometry),
            scene.mesh(item.node),
        ) else {
            return Ok(false);
        };

        if let Some(frustum) = pass.frustum
            && mesh.frustum_culled
            && !mesh.is_skinned()
            && let Some((center, radius)) = item.bounds
            && !frustum.intersects_sphere(center, radius)
        {
            return Ok(false);
        }

        // Clipping planes, union first, in this pass's view space.
        let common = material.common();
        let local_clipping = settings.local_clipping_enabled
            && (!pass.variant.is_shadow() || common.clip_shadows);
        let view = pass.uniforms.camera.view;
        self.planes.clear();
        self.planes
            .extend(pass.global_planes.iter().map(|p| plane_to_view(*p, &view)));
        let mut intersection = 0;
        if local_clipping {
            self.planes
                .extend(common.clipping_planes.iter().map(|p| plane_to_view(*p, &view)));
            if common.clip_intersection {
                intersection = common.clipping_planes.len();
            }
        }
        let clip = (self.planes.len(), intersection);

        let bones = mesh.skin.as_ref().map_or(0, |s| s.bone_matrices().len());
        let resolved = self.program_for(device, scene, settings, pass, material, geometry, bones, clip)?;
        let fallback;
        let (handle, material) = match resolved {
            Resolved::Program(handle) => (handle, material),
            Resolved::Fallback(handle) => {
                fallback = Arc::clone(&self.fallback);
                (handle, &*fallback)
            }
            Resolved::Skip => return Ok(false),
        };

        let Self { tracker, programs, binder, textures, geometries, planes, warnings, info, .. } = self;
        let Some(entry) = programs.get_mut(handle) else {
            return Ok(false);
        };
        let Some(program) = entry.program() else {
            return Ok(false);
        };
        tracker.use_program(device, Some(program))?;

        let common = material.common();
        tracker.set_material_state(device, common, item.front_face_cw)?;
        if pass.variant.is_shadow() {
            tracker.set_side(device, common.effective_shadow_side(), item.front_face_cw)?;
            tracker.set_blending(device, None, None)?;
            tracker.set_depth(device, true, true, CompareFunc::LessEqual)?;
            tracker.set_color_mask(device, [true; 4])?;
        }

        let indexed = geometries.bind(device, tracker, geometry, entry.params())?;

        let morph_count = entry.params().morph_count().min(mesh.morph_influences.len());
        let object = ObjectUniforms {
            model: item.model,
            receive_shadow: mesh.receive_shadow,
            bones: mesh.skin.as_ref().map_or(&[][..], |s| s.bone_matrices()),
            morph_influences: &mesh.morph_influences[..morph_count],
            morph_relative: geometry.morph_relative,
            clipping_planes: planes.as_slice(),
            reference: pass.reference,
        };
        let mut texture_ctx = TextureContext { device: &mut *device, tracker, textures, assets: &scene.assets };
        binder.bind(&mut texture_ctx, entry, &pass.uniforms, &object, material)?;

        let span = geometry.draw_span();
        let (first, count) = match item.range {
            Some((start, count)) => {
                let begin = start.max(span.0);
                let end = (start + count).min(span.0 + span.1);
                (begin, end.saturating_sub(begin))
            }
            None => span,
        };
        let instances = geometry.instance_count.unwrap_or(1);
        if count == 0 || instances == 0 {
            return Ok(false);
        }

        let call = DrawCall {
            mode: geometry.mode,
            first: first as u32,
            count: count as u32,
            instances,
            indexed,
        };
        match device.draw(&call) {
            Ok(()) => {
                info.record_draw(call.mode, call.count, call.instances);
                Ok(true)
            }
            Err(DeviceError::ContextLost) => Err(StrataError::ContextLost),
            Err(err) => {
                warnings.warn(&format!("Draw of '{}' rejected: {err}", material.name));
                Ok(false)
            }
        }
    }

    /// Context loss: every device object is gone. Caches keep their CPU
    /// state and recreate device objects lazily.
    pub(crate) fn invalidate(&mut self) {
        self.tracker.reset();
        self.programs.invalidate();
        self.textures.invalidate();
        self.geometries.invalidate();
        self.light_block.invalidate();
        self.shadows.invalidate();
        self.binder.reset();
        self.warnings.clear();
    }

    pub(crate) fn refresh_counts(&mut self) {
        self.info.programs = self.programs.len();
        self.info.textures = self.textures.len();
        self.info.geometries = self.geometries.len();
    }
}
