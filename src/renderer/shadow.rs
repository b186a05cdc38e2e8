//! Shadow map pass
//!
//! Plans the off-screen renders that fill each shadow-casting light's map.
//! The pass owns one map per light and decides, per frame, whether the map
//! is rendered, reused or skipped; the render context performs the draws.
//!
//! | Light       | Map                                   | Program variant |
//! |-------------|---------------------------------------|-----------------|
//! | directional | depth texture, orthographic fit       | `Depth`         |
//! | spot        | depth texture, perspective (2·angle)  | `Depth`         |
//! | point       | 4:2 RGBA atlas, six 90° views         | `Distance`      |
//!
//! ```text
//! Idle ──first caster frame──▶ Allocated ──rendered──▶ Rendered
//!   ▲                               ▲                      │
//!   └──────── light removed ────────┴──── size change ─────┘
//! ```

use std::collections::hash_map::Entry;
use std::f32::consts::FRAC_PI_2;

use glam::{Mat4, Vec3};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::renderer::device::{
    ClearFlags, DeviceError, FramebufferDesc, FramebufferId, GpuDevice, Rect, TextureAttachment, TextureDesc,
    TextureId,
};
use crate::renderer::lights::{ShadowCaster, ShadowCasterKind, ShadowResult};
use crate::renderer::program::ProgramVariant;
use crate::renderer::render_list::RenderItem;
use crate::renderer::state::StateTracker;
use crate::renderer::uniforms::CameraUniforms;
use crate::resources::texture::{FilterMode, Sampler, TextureFormat, TextureKind};
use crate::scene::{Frustum, LightKind, NodeHandle, Scene};
use crate::utils::WarnOnce;

/// Cube face look directions and up vectors, in atlas order.
const CUBE_FACES: [(Vec3, Vec3); 6] = [
    (Vec3::X, Vec3::Y),
    (Vec3::NEG_X, Vec3::Y),
    (Vec3::Z, Vec3::Y),
    (Vec3::NEG_Z, Vec3::Y),
    (Vec3::Y, Vec3::Z),
    (Vec3::NEG_Y, Vec3::NEG_Z),
];

/// Atlas cell of each cube face, in map-size units.
const CUBE_VIEWPORTS: [(i32, i32); 6] = [(2, 1), (0, 1), (3, 1), (1, 1), (3, 0), (1, 0)];

/// Camera versions handed to shadow views start here so they never match a
/// scene camera.
const VIEW_VERSION_BASE: u64 = 1 << 62;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowMapState {
    Idle,
    Allocated,
    Rendered,
}

#[derive(Debug)]
struct ShadowMap {
    kind: ShadowCasterKind,
    size: u32,
    /// Sampled map: depth texture, or the RGBA atlas for point lights.
    texture: TextureId,
    /// Depth attachment of the point atlas.
    depth: Option<TextureId>,
    framebuffer: FramebufferId,
    result: Option<ShadowResult>,
}

/// One viewport of a shadow render.
#[derive(Debug, Clone, Copy)]
pub struct ShadowView {
    pub viewport: Rect,
    pub camera: CameraUniforms,
    pub frustum: Frustum,
}

/// Everything the context needs to render one light's map.
#[derive(Debug, Clone)]
pub struct ShadowJob {
    pub caster: ShadowCaster,
    pub framebuffer: FramebufferId,
    pub variant: ProgramVariant,
    pub clear_flags: ClearFlags,
    pub clear_color: [f32; 4],
    pub views: SmallVec<[ShadowView; 6]>,
    /// `(position, near, far)` for the distance variant.
    pub reference: Option<(Vec3, f32, f32)>,
    result: ShadowResult,
}

#[derive(Debug)]
pub enum ShadowPlan {
    Render(ShadowJob),
    /// Map is current; hand the stored result to the lights.
    Reuse(ShadowResult),
    Skip,
}

#[derive(Debug, Default)]
pub struct ShadowMapPass {
    maps: FxHashMap<NodeHandle, ShadowMap>,
    next_version: u64,
    warnings: WarnOnce,
}

fn bias_matrix() -> Mat4 {
    Mat4::from_translation(Vec3::splat(0.5)) * Mat4::from_scale(Vec3::splat(0.5))
}

fn up_for(direction: Vec3) -> Vec3 {
    if direction.y.abs() > 0.99 { Vec3::Z } else { Vec3::Y }
}

fn depth_desc(size: (u32, u32)) -> TextureDesc {
    TextureDesc {
        kind: TextureKind::D2,
        width: size.0,
        height: size.1,
        format: TextureFormat::Depth24,
        mip_levels: 1,
        sampler: Sampler {
            mag_filter: FilterMode::Nearest,
            min_filter: FilterMode::Nearest,
            ..Sampler::default()
        },
        srgb: false,
    }
}

fn attachment(texture: TextureId) -> TextureAttachment {
    TextureAttachment { texture, kind: TextureKind::D2, face: 0, level: 0 }
}

impl ShadowMapPass {
    #[must_use]
    pub fn new() -> Self {
        Self { next_version: VIEW_VERSION_BASE, ..Self::default() }
    }

    #[must_use]
    pub fn state(&self, light: NodeHandle) -> ShadowMapState {
        match self.maps.get(&light) {
            None => ShadowMapState::Idle,
            Some(map) if map.result.is_some() => ShadowMapState::Rendered,
            Some(_) => ShadowMapState::Allocated,
        }
    }

    /// Sampled texture of `light`'s map.
    #[must_use]
    pub fn map_texture(&self, light: NodeHandle) -> Option<TextureId> {
        self.maps.get(&light).map(|m| m.texture)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.maps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    /// Decides what happens to `caster`'s map this frame. `items` are the
    /// frame's shadow-casting draws.
    pub fn plan<D: GpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        tracker: &mut StateTracker,
        scene: &Scene,
        caster: ShadowCaster,
        items: &[RenderItem],
    ) -> Result<ShadowPlan, DeviceError> {
        let Some(light) = scene.light(caster.node) else {
            return Ok(ShadowPlan::Skip);
        };
        let stored = self
            .maps
            .get(&caster.node)
            .filter(|m| m.kind == caster.kind)
            .and_then(|m| m.result);

        let shadow = &light.shadow;
        if !shadow.auto_update && !shadow.needs_update && let Some(result) = stored {
            return Ok(ShadowPlan::Reuse(result));
        }
        if items.is_empty() {
            return Ok(stored.map_or(ShadowPlan::Skip, ShadowPlan::Reuse));
        }

        let max = device.capabilities().max_texture_size;
        let limit = match caster.kind {
            ShadowCasterKind::Point => max / 4,
            _ => max,
        };
        let size = shadow.map_size.min(limit).max(1);
        if size < shadow.map_size {
            self.warnings.warn(&format!(
                "Shadow map size {} exceeds the device limit; clamped to {size}",
                shadow.map_size
            ));
        }

        let map = self.ensure_map(device, tracker, caster, size)?;
        let (texture, framebuffer) = (map.texture, map.framebuffer);

        let position = scene.world_position(caster.node).unwrap_or(Vec3::ZERO);
        let target = light
            .target
            .and_then(|t| scene.world_position(t))
            .unwrap_or(Vec3::ZERO);
        let base = ShadowResult {
            matrix: Mat4::IDENTITY,
            bias: shadow.bias,
            normal_bias: shadow.normal_bias,
            radius: shadow.radius,
            map_size: size as f32,
            near: shadow.near,
            far: shadow.far,
            map: texture,
        };
        let full = Rect::new(0, 0, size, size);

        let job = match (caster.kind, light.kind) {
            (ShadowCasterKind::Directional, _) => {
                let direction = (target - position).try_normalize().unwrap_or(Vec3::NEG_Z);
                let view = Mat4::look_at_rh(position, position + direction, up_for(direction));
                let projection = fit_orthographic(&view, items, shadow.camera_size);
                let (near, far) = ortho_near_far(&projection);
                let view_projection = projection * view;
                let camera = self.camera(view, projection, position, near, far, true);
                ShadowJob {
                    caster,
                    framebuffer,
                    variant: ProgramVariant::Depth,
                    clear_flags: ClearFlags::DEPTH,
                    clear_color: [1.0; 4],
                    views: SmallVec::from_elem(
                        ShadowView { viewport: full, camera, frustum: Frustum::from_matrix(view_projection) },
                        1,
                    ),
                    reference: None,
                    result: ShadowResult { matrix: bias_matrix() * view_projection, near, far, ..base },
                }
            }
            (ShadowCasterKind::Spot, LightKind::Spot { distance, angle, .. }) => {
                let far = if distance > 0.0 { distance } else { shadow.far };
                let direction = (target - position).try_normalize().unwrap_or(Vec3::NEG_Z);
                let view = Mat4::look_at_rh(position, position + direction, up_for(direction));
                let projection = Mat4::perspective_rh_gl((2.0 * angle).min(3.1), 1.0, shadow.near, far);
                let view_projection = projection * view;
                let camera = self.camera(view, projection, position, shadow.near, far, false);
                ShadowJob {
                    caster,
                    framebuffer,
                    variant: ProgramVariant::Depth,
                    clear_flags: ClearFlags::DEPTH,
                    clear_color: [1.0; 4],
                    views: SmallVec::from_elem(
                        ShadowView { viewport: full, camera, frustum: Frustum::from_matrix(view_projection) },
                        1,
                    ),
                    reference: None,
                    result: ShadowResult { matrix: bias_matrix() * view_projection, far, ..base },
                }
            }
            (ShadowCasterKind::Point, LightKind::Point { distance, .. }) => {
                let far = if distance > 0.0 { distance } else { shadow.far };
                let projection = Mat4::perspective_rh_gl(FRAC_PI_2, 1.0, shadow.near, far);
                let mut views = SmallVec::new();
                for ((direction, up), (cx, cy)) in CUBE_FACES.into_iter().zip(CUBE_VIEWPORTS) {
                    let view = Mat4::look_at_rh(position, position + direction, up);
                    let camera = self.camera(view, projection, position, shadow.near, far, false);
                    let s = size as i32;
                    views.push(ShadowView {
                        viewport: Rect::new(cx * s, cy * s, size, size),
                        camera,
                        frustum: Frustum::from_matrix(projection * view),
                    });
                }
                ShadowJob {
                    caster,
                    framebuffer,
                    variant: ProgramVariant::Distance,
                    clear_flags: ClearFlags::COLOR | ClearFlags::DEPTH,
                    clear_color: [1.0; 4],
                    views,
                    reference: Some((position, shadow.near, far)),
                    result: ShadowResult { matrix: Mat4::from_translation(-position), far, ..base },
                }
            }
            _ => return Ok(ShadowPlan::Skip),
        };
        Ok(ShadowPlan::Render(job))
    }

    /// Marks `job`'s map as rendered and returns the values for the lights.
    pub fn complete(&mut self, job: &ShadowJob) -> ShadowResult {
        if let Some(map) = self.maps.get_mut(&job.caster.node) {
            map.result = Some(job.result);
        }
        job.result
    }

    fn camera(&mut self, view: Mat4, projection: Mat4, position: Vec3, near: f32, far: f32, ortho: bool) -> CameraUniforms {
        self.next_version = self.next_version.wrapping_add(1).max(VIEW_VERSION_BASE);
        CameraUniforms { view, projection, position, near, far, orthographic: ortho, version: self.next_version }
    }

    fn ensure_map<D: GpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        tracker: &mut StateTracker,
        caster: ShadowCaster,
        size: u32,
    ) -> Result<&ShadowMap, DeviceError> {
        let stale = self
            .maps
            .get(&caster.node)
            .is_some_and(|m| m.kind != caster.kind || m.size != size);
        if stale && let Some(old) = self.maps.remove(&caster.node) {
            release(device, tracker, &old);
        }
        let map = match self.maps.entry(caster.node) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let map = allocate(device, caster.kind, size)?;
                log::debug!("Allocated {:?} shadow map {size}x{size}", caster.kind);
                entry.insert(map)
            }
        };
        Ok(map)
    }

    /// Releases maps of lights that no longer cast.
    pub fn retain<D: GpuDevice + ?Sized>(&mut self, device: &mut D, tracker: &mut StateTracker, casters: &[ShadowCaster]) {
        let gone: SmallVec<[NodeHandle; 4]> = self
            .maps
            .iter()
            .filter(|(node, map)| !casters.iter().any(|c| c.node == **node && c.kind == map.kind))
            .map(|(node, _)| *node)
            .collect();
        for node in gone {
            if let Some(map) = self.maps.remove(&node) {
                release(device, tracker, &map);
            }
        }
    }

    pub fn dispose<D: GpuDevice + ?Sized>(&mut self, device: &mut D, tracker: &mut StateTracker) {
        for (_, map) in self.maps.drain() {
            release(device, tracker, &map);
        }
    }

    /// Context loss: the device objects are already gone.
    pub fn invalidate(&mut self) {
        self.maps.clear();
        self.warnings.clear();
    }
}

fn allocate<D: GpuDevice + ?Sized>(device: &mut D, kind: ShadowCasterKind, size: u32) -> Result<ShadowMap, DeviceError> {
    match kind {
        ShadowCasterKind::Directional | ShadowCasterKind::Spot => {
            let desc = depth_desc((size, size));
            let texture = device.create_texture(&desc)?;
            device.upload_texture(texture, &desc, 0, 0, None)?;
            let framebuffer = device.create_framebuffer(&FramebufferDesc {
                color: None,
                depth: Some(attachment(texture)),
                stencil: false,
            })?;
            Ok(ShadowMap { kind, size, texture, depth: None, framebuffer, result: None })
        }
        ShadowCasterKind::Point => {
            let extent = (size * 4, size * 2);
            let color_desc = TextureDesc {
                format: TextureFormat::Rgba8,
                ..depth_desc(extent)
            };
            let texture = device.create_texture(&color_desc)?;
            device.upload_texture(texture, &color_desc, 0, 0, None)?;
            let depth_desc = depth_desc(extent);
            let depth = device.create_texture(&depth_desc)?;
            device.upload_texture(depth, &depth_desc, 0, 0, None)?;
            let framebuffer = device.create_framebuffer(&FramebufferDesc {
                color: Some(attachment(texture)),
                depth: Some(attachment(depth)),
                stencil: false,
            })?;
            Ok(ShadowMap { kind, size, texture, depth: Some(depth), framebuffer, result: None })
        }
    }
}

fn release<D: GpuDevice + ?Sized>(device: &mut D, tracker: &mut StateTracker, map: &ShadowMap) {
    tracker.forget_framebuffer(map.framebuffer);
    device.delete_framebuffer(map.framebuffer);
    for texture in std::iter::once(map.texture).chain(map.depth) {
        tracker.forget_texture(texture);
        device.delete_texture(texture);
    }
}

/// Orthographic projection enclosing every caster's bounding sphere as seen
/// from `view`, with a half extent of at least `min_half`.
fn fit_orthographic(view: &Mat4, items: &[RenderItem], min_half: f32) -> Mat4 {
    let mut lo = Vec3::splat(f32::MAX);
    let mut hi = Vec3::splat(f32::MIN);
    for (center, radius) in items.iter().filter_map(|i| i.bounds) {
        let p = view.transform_point3(center);
        lo = lo.min(p - radius);
        hi = hi.max(p + radius);
    }
    if lo.x > hi.x {
        lo = Vec3::new(-min_half, -min_half, -min_half * 100.0);
        hi = Vec3::new(min_half, min_half, min_half);
    }
    let center = (lo + hi) * 0.5;
    let half_x = ((hi.x - lo.x) * 0.5).max(min_half);
    let half_y = ((hi.y - lo.y) * 0.5).max(min_half);
    let near = -hi.z;
    let far = (-lo.z).max(near + 1e-3);
    Mat4::orthographic_rh_gl(
        center.x - half_x,
        center.x + half_x,
        center.y - half_y,
        center.y + half_y,
        near,
        far,
    )
}

/// Recovers `(near, far)` from an OpenGL-style orthographic projection.
fn ortho_near_far(projection: &Mat4) -> (f32, f32) {
    let a = projection.z_axis.z;
    let b = projection.w_axis.z;
    ((b + 1.0) / a, (b - 1.0) / a)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::device::RecordingDevice;
    use crate::resources::assets::GeometryHandle;
    use crate::scene::Light;
    use crate::resources::color::Color;

    fn item(center: Vec3, radius: f32) -> RenderItem {
        RenderItem {
            sequence: 0,
            node: NodeHandle::default(),
            geometry: GeometryHandle::default(),
            material: Default::default(),
            material_id: 0,
            group_order: 0,
            render_order: 0,
            z: 0.0,
            range: None,
            model: Mat4::from_translation(center),
            bounds: Some((center, radius)),
            front_face_cw: false,
        }
    }

    fn setup(light: Light) -> (Scene, ShadowCaster) {
        let mut scene = Scene::new();
        let node = scene.add_light("light", light.with_shadow(256));
        scene.node_mut(node).unwrap().transform.position = Vec3::new(0.0, 10.0, 0.0);
        scene.update_world_matrices();
        let kind = match scene.light(node).unwrap().kind {
            LightKind::Point { .. } => ShadowCasterKind::Point,
            LightKind::Spot { .. } => ShadowCasterKind::Spot,
            _ => ShadowCasterKind::Directional,
        };
        (scene, ShadowCaster { node, kind, index: 0 })
    }

    #[test]
    fn orthographic_fit_encloses_casters() {
        let (scene, caster) = setup(Light::directional(Color::WHITE, 1.0));
        let mut device = RecordingDevice::new();
        let mut tracker = StateTracker::new(device.capabilities());
        let mut pass = ShadowMapPass::new();
        let items = [item(Vec3::new(3.0, 0.0, 0.0), 1.0), item(Vec3::new(-3.0, 0.0, 2.0), 1.0)];

        let ShadowPlan::Render(job) = pass.plan(&mut device, &mut tracker, &scene, caster, &items).unwrap() else {
            panic!("expected a render");
        };
        assert_eq!(job.variant, ProgramVariant::Depth);
        assert_eq!(pass.state(caster.node), ShadowMapState::Allocated);
        for it in &items {
            let (c, r) = it.bounds.unwrap();
            assert!(job.views[0].frustum.intersects_sphere(c, r));
        }
        let result = pass.complete(&job);
        assert_eq!(pass.state(caster.node), ShadowMapState::Rendered);
        let uv = result.matrix.project_point3(Vec3::ZERO);
        assert!((0.0..=1.0).contains(&uv.x) && (0.0..=1.0).contains(&uv.y));
    }

    #[test]
    fn point_light_renders_six_atlas_cells() {
        let (scene, caster) = setup(Light::point(Color::WHITE, 1.0, 50.0));
        let mut device = RecordingDevice::new();
        let mut tracker = StateTracker::new(device.capabilities());
        let mut pass = ShadowMapPass::new();

        let ShadowPlan::Render(job) = pass
            .plan(&mut device, &mut tracker, &scene, caster, &[item(Vec3::ZERO, 1.0)])
            .unwrap()
        else {
            panic!("expected a render");
        };
        assert_eq!(job.variant, ProgramVariant::Distance);
        assert_eq!(job.views.len(), 6);
        assert_eq!(job.views[0].viewport, Rect::new(512, 256, 256, 256));
        assert_eq!(job.reference.map(|r| r.2), Some(50.0));
        let versions: FxHashMap<u64, ()> = job.views.iter().map(|v| (v.camera.version, ())).collect();
        assert_eq!(versions.len(), 6);
    }

    #[test]
    fn no_casters_keeps_last_map() {
        let (scene, caster) = setup(Light::directional(Color::WHITE, 1.0));
        let mut device = RecordingDevice::new();
        let mut tracker = StateTracker::new(device.capabilities());
        let mut pass = ShadowMapPass::new();

        assert!(matches!(
            pass.plan(&mut device, &mut tracker, &scene, caster, &[]).unwrap(),
            ShadowPlan::Skip
        ));
        let ShadowPlan::Render(job) = pass
            .plan(&mut device, &mut tracker, &scene, caster, &[item(Vec3::ZERO, 1.0)])
            .unwrap()
        else {
            panic!("expected a render");
        };
        let rendered = pass.complete(&job);
        let ShadowPlan::Reuse(kept) = pass.plan(&mut device, &mut tracker, &scene, caster, &[]).unwrap() else {
            panic!("expected reuse");
        };
        assert_eq!(kept.map, rendered.map);
    }

    #[test]
    fn oversized_maps_are_clamped_and_released() {
        let (mut scene, caster) = setup(Light::directional(Color::WHITE, 1.0));
        scene.light_mut(caster.node).unwrap().shadow.map_size = 1 << 20;
        let mut device = RecordingDevice::new();
        let mut tracker = StateTracker::new(device.capabilities());
        let mut pass = ShadowMapPass::new();
        let max = device.capabilities().max_texture_size;

        let ShadowPlan::Render(job) = pass
            .plan(&mut device, &mut tracker, &scene, caster, &[item(Vec3::ZERO, 1.0)])
            .unwrap()
        else {
            panic!("expected a render");
        };
        assert_eq!(job.views[0].viewport.width, max);

        let live = device.live_textures();
        pass.retain(&mut device, &mut tracker, &[]);
        assert_eq!(device.live_textures(), live - 1);
        assert_eq!(pass.state(caster.node), ShadowMapState::Idle);
    }
}
