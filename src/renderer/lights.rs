//! Light aggregate
//!
//! Once per frame the lights gathered during traversal are flattened into
//! parallel arrays (one array per property per light type) in view space.
//! The arrays keep their allocations across frames.
//!
//! The same member list drives three things, so they cannot drift apart:
//!
//! - the GLSL declarations injected into generated programs
//!   ([`light_uniform_declarations`]),
//! - the discrete uniform uploads of the binder,
//! - the std140 packing of the light uniform block.

use std::fmt::Write as _;

use glam::{Mat4, Vec3, Vec4};
use smallvec::SmallVec;
use xxhash_rust::xxh3::Xxh3;

use crate::renderer::device::{TextureId, UniformType};
use crate::resources::color::{Color, ColorManagement};
use crate::scene::{LightKind, NodeHandle, Scene};

/// Name of the std140 interface block.
pub const LIGHT_BLOCK_NAME: &str = "LightBlock";

/// Uniform buffer binding point of the light block.
pub const LIGHT_BLOCK_BINDING: u32 = 0;

/// Active light counts per type. Part of the program key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LightCounts {
    pub directional: usize,
    pub point: usize,
    pub spot: usize,
    pub rect_area: usize,
    pub directional_shadows: usize,
    pub point_shadows: usize,
    pub spot_shadows: usize,
}

impl LightCounts {
    #[must_use]
    pub fn has_shadows(&self) -> bool {
        self.directional_shadows + self.point_shadows + self.spot_shadows > 0
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.directional + self.point + self.spot + self.rect_area
    }
}

/// One uniform of the light interface. `len` 0 is a plain (non-array) uniform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightMember {
    pub name: &'static str,
    pub ty: UniformType,
    pub len: usize,
}

impl LightMember {
    const fn new(name: &'static str, ty: UniformType, len: usize) -> Self {
        Self { name, ty, len }
    }

    /// Float count of the member's data.
    #[must_use]
    pub fn float_len(&self) -> usize {
        self.ty.components() * self.len.max(1)
    }
}

/// Shadow map sampler arrays. Always declared outside the block.
pub const SHADOW_MAP_UNIFORMS: [(&str, ShadowCasterKind); 3] = [
    ("directionalShadowMap", ShadowCasterKind::Directional),
    ("pointShadowMap", ShadowCasterKind::Point),
    ("spotShadowMap", ShadowCasterKind::Spot),
];

/// Members present for `counts`, in declaration order.
#[must_use]
pub fn light_members(counts: &LightCounts) -> SmallVec<[LightMember; 32]> {
    use UniformType::{Float, Mat4 as M4, Vec2, Vec3 as V3, Vec4 as V4};

    let mut out = SmallVec::new();
    out.push(LightMember::new("ambientLightColor", V3, 0));

    let groups: [(usize, &[(&'static str, UniformType)]); 7] = [
        (
            counts.directional,
            &[("directionalLightDirection", V3), ("directionalLightColor", V3)],
        ),
        (
            counts.point,
            &[
                ("pointLightPosition", V3),
                ("pointLightColor", V3),
                ("pointLightDistance", Float),
                ("pointLightDecay", Float),
            ],
        ),
        (
            counts.spot,
            &[
                ("spotLightPosition", V3),
                ("spotLightDirection", V3),
                ("spotLightColor", V3),
                ("spotLightDistance", Float),
                ("spotLightDecay", Float),
                ("spotLightConeCos", Float),
                ("spotLightPenumbraCos", Float),
            ],
        ),
        (
            counts.rect_area,
            &[
                ("rectAreaLightPosition", V3),
                ("rectAreaLightColor", V3),
                ("rectAreaLightHalfWidth", V3),
                ("rectAreaLightHalfHeight", V3),
            ],
        ),
        (
            counts.directional_shadows,
            &[("directionalShadowMatrix", M4), ("directionalShadowParams", V4)],
        ),
        (counts.spot_shadows, &[("spotShadowMatrix", M4), ("spotShadowParams", V4)]),
        (
            counts.point_shadows,
            &[("pointShadowMatrix", M4), ("pointShadowParams", V4), ("pointShadowCamera", Vec2)],
        ),
    ];

    for (count, members) in groups {
        if count == 0 {
            continue;
        }
        for &(name, ty) in members {
            out.push(LightMember::new(name, ty, count));
        }
    }
    out
}

/// GLSL declarations of the light inputs, either as discrete uniforms or as
/// a std140 block. Shadow samplers are always discrete.
#[must_use]
pub fn light_uniform_declarations(counts: &LightCounts, block: bool) -> String {
    let mut out = String::new();
    let members = light_members(counts);

    let array_suffix = |len: usize| if len == 0 { String::new() } else { format!("[{len}]") };

    if block {
        let _ = writeln!(out, "layout(std140) uniform {LIGHT_BLOCK_NAME} {{");
        for m in &members {
            let _ = writeln!(out, "    {} {}{};", m.ty.glsl_name(), m.name, array_suffix(m.len));
        }
        out.push_str("};\n");
    } else {
        for m in &members {
            let _ = writeln!(out, "uniform {} {}{};", m.ty.glsl_name(), m.name, array_suffix(m.len));
        }
    }

    for (name, kind) in SHADOW_MAP_UNIFORMS {
        let n = kind.count(counts);
        if n > 0 {
            let _ = writeln!(out, "uniform sampler2D {name}[{n}];");
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShadowCasterKind {
    Directional,
    Point,
    Spot,
}

impl ShadowCasterKind {
    fn count(self, counts: &LightCounts) -> usize {
        match self {
            Self::Directional => counts.directional_shadows,
            Self::Point => counts.point_shadows,
            Self::Spot => counts.spot_shadows,
        }
    }
}

/// A shadow-casting light and its slot in the shadow arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowCaster {
    pub node: NodeHandle,
    pub kind: ShadowCasterKind,
    pub index: usize,
}

/// Values the shadow pass hands back for one caster.
#[derive(Debug, Clone, Copy)]
pub struct ShadowResult {
    /// World → shadow-map texture space (xy in 0..1, z depth).
    pub matrix: Mat4,
    pub bias: f32,
    pub normal_bias: f32,
    pub radius: f32,
    pub map_size: f32,
    pub near: f32,
    pub far: f32,
    pub map: TextureId,
}

/// Per-frame light snapshot.
#[derive(Debug, Clone, Default)]
pub struct LightState {
    counts: LightCounts,
    members: SmallVec<[LightMember; 32]>,
    data: Vec<Vec<f32>>,
    casters: Vec<ShadowCaster>,
    shadow_maps: [Vec<Option<TextureId>>; 3],
    hash: u64,
    version: u64,
}

fn push3(out: &mut Vec<f32>, v: Vec3) {
    out.extend_from_slice(&v.to_array());
}

impl LightState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn counts(&self) -> &LightCounts {
        &self.counts
    }

    #[must_use]
    pub fn members(&self) -> &[LightMember] {
        &self.members
    }

    /// Bumped whenever any uploaded value changes.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Shadow-casting lights in uniform order.
    #[must_use]
    pub fn casters(&self) -> &[ShadowCaster] {
        &self.casters
    }

    /// Flat values for the member called `name`.
    #[must_use]
    pub fn values(&self, name: &str) -> Option<&[f32]> {
        self.members
            .iter()
            .position(|m| m.name == name)
            .map(|i| self.data[i].as_slice())
    }

    /// Shadow map for slot `index` of the sampler array `name`.
    #[must_use]
    pub fn shadow_map(&self, name: &str, index: usize) -> Option<TextureId> {
        let (_, kind) = SHADOW_MAP_UNIFORMS.iter().find(|(n, _)| *n == name)?;
        self.shadow_maps[*kind as usize].get(index).copied().flatten()
    }

    /// Rebuilds the aggregate from `lights` (in traversal order).
    pub fn setup(
        &mut self,
        scene: &Scene,
        lights: &[NodeHandle],
        view: &Mat4,
        color_management: &ColorManagement,
        shadows_enabled: bool,
    ) {
        let mut ambient = Vec3::ZERO;
        // Shadow casters first within each type so that caster `i` is light `i`.
        let mut directional: SmallVec<[NodeHandle; 8]> = SmallVec::new();
        let mut point: SmallVec<[NodeHandle; 8]> = SmallVec::new();
        let mut spot: SmallVec<[NodeHandle; 8]> = SmallVec::new();
        let mut rect: SmallVec<[NodeHandle; 4]> = SmallVec::new();
        let mut counts = LightCounts::default();

        for pass in [true, false] {
            for &handle in lights {
                let Some(light) = scene.light(handle) else { continue };
                let casting = shadows_enabled && light.casts_shadow();
                match light.kind {
                    LightKind::Ambient if pass => {
                        ambient += color_management.to_working(light.color).to_vec3() * light.intensity;
                    }
                    LightKind::Directional if casting == pass => {
                        directional.push(handle);
                        counts.directional_shadows += usize::from(casting);
                    }
                    LightKind::Point { .. } if casting == pass => {
                        point.push(handle);
                        counts.point_shadows += usize::from(casting);
                    }
                    LightKind::Spot { .. } if casting == pass => {
                        spot.push(handle);
                        counts.spot_shadows += usize::from(casting);
                    }
                    LightKind::RectArea { .. } if pass => rect.push(handle),
                    _ => {}
                }
            }
        }
        counts.directional = directional.len();
        counts.point = point.len();
        counts.spot = spot.len();
        counts.rect_area = rect.len();

        if counts != self.counts || self.members.is_empty() {
            self.counts = counts;
            self.members = light_members(&counts);
            self.data.resize_with(self.members.len(), Vec::new);
        }
        for values in &mut self.data {
            values.clear();
        }

        self.casters.clear();
        for (kind, list, n) in [
            (ShadowCasterKind::Directional, &directional, counts.directional_shadows),
            (ShadowCasterKind::Point, &point, counts.point_shadows),
            (ShadowCasterKind::Spot, &spot, counts.spot_shadows),
        ] {
            for (index, &node) in list.iter().take(n).enumerate() {
                self.casters.push(ShadowCaster { node, kind, index });
            }
            let maps = &mut self.shadow_maps[kind as usize];
            maps.clear();
            maps.resize(n, None);
        }

        let target_of = |handle: NodeHandle| -> Vec3 {
            scene
                .light(handle)
                .and_then(|l| l.target)
                .and_then(|t| scene.world_position(t))
                .unwrap_or(Vec3::ZERO)
        };
        let color_of = |handle: NodeHandle| -> Vec3 {
            scene.light(handle).map_or(Vec3::ZERO, |l| {
                color_management.to_working(l.color).to_vec3() * l.intensity
            })
        };
        let view_dir = |from: Vec3, to: Vec3| view.transform_vector3(from - to).normalize_or_zero();

        let idx = |members: &[LightMember], name: &str| members.iter().position(|m| m.name == name);
        let members = self.members.clone();
        let data = &mut self.data;
        let mut write = |name: &str, f: &mut dyn FnMut(&mut Vec<f32>)| {
            if let Some(i) = idx(&members, name) {
                f(&mut data[i]);
            }
        };

        write("ambientLightColor", &mut |out| push3(out, ambient));

        for &h in &directional {
            let pos = scene.world_position(h).unwrap_or(Vec3::ZERO);
            write("directionalLightDirection", &mut |out| push3(out, view_dir(pos, target_of(h))));
            write("directionalLightColor", &mut |out| push3(out, color_of(h)));
        }

        for &h in &point {
            let pos = scene.world_position(h).unwrap_or(Vec3::ZERO);
            let (distance, decay) = match scene.light(h).map(|l| l.kind) {
                Some(LightKind::Point { distance, decay }) => (distance, decay),
                _ => (0.0, 2.0),
            };
            write("pointLightPosition", &mut |out| push3(out, view.transform_point3(pos)));
            write("pointLightColor", &mut |out| push3(out, color_of(h)));
            write("pointLightDistance", &mut |out| out.push(distance));
            write("pointLightDecay", &mut |out| out.push(decay));
        }

        for &h in &spot {
            let pos = scene.world_position(h).unwrap_or(Vec3::ZERO);
            let (distance, angle, penumbra, decay) = match scene.light(h).map(|l| l.kind) {
                Some(LightKind::Spot { distance, angle, penumbra, decay }) => (distance, angle, penumbra, decay),
                _ => (0.0, std::f32::consts::FRAC_PI_3, 0.0, 2.0),
            };
            write("spotLightPosition", &mut |out| push3(out, view.transform_point3(pos)));
            write("spotLightDirection", &mut |out| push3(out, view_dir(pos, target_of(h))));
            write("spotLightColor", &mut |out| push3(out, color_of(h)));
            write("spotLightDistance", &mut |out| out.push(distance));
            write("spotLightDecay", &mut |out| out.push(decay));
            write("spotLightConeCos", &mut |out| out.push(angle.cos()));
            write("spotLightPenumbraCos", &mut |out| out.push((angle * (1.0 - penumbra)).cos()));
        }

        for &h in &rect {
            let world = scene.world_matrix(h).copied().unwrap_or_default();
            let (width, height) = match scene.light(h).map(|l| l.kind) {
                Some(LightKind::RectArea { width, height }) => (width, height),
                _ => (1.0, 1.0),
            };
            let pos = Vec3::from(world.translation);
            let half_w = view.transform_vector3(Vec3::from(world.matrix3.x_axis) * (width * 0.5));
            let half_h = view.transform_vector3(Vec3::from(world.matrix3.y_axis) * (height * 0.5));
            write("rectAreaLightPosition", &mut |out| push3(out, view.transform_point3(pos)));
            write("rectAreaLightColor", &mut |out| push3(out, color_of(h)));
            write("rectAreaLightHalfWidth", &mut |out| push3(out, half_w));
            write("rectAreaLightHalfHeight", &mut |out| push3(out, half_h));
        }

        // Shadow arrays start zeroed; the shadow pass fills them.
        for (member, values) in self.members.iter().zip(&mut self.data) {
            if member.name.contains("Shadow") {
                values.resize(member.float_len(), 0.0);
            }
        }

        self.refresh_version();
    }

    /// Stores the shadow pass output for `caster`.
    pub fn apply_shadow(&mut self, caster: &ShadowCaster, result: &ShadowResult) {
        let prefix = match caster.kind {
            ShadowCasterKind::Directional => "directional",
            ShadowCasterKind::Point => "point",
            ShadowCasterKind::Spot => "spot",
        };
        let i = caster.index;
        let params = Vec4::new(result.bias, result.normal_bias, result.radius, result.map_size);

        let mut put = |suffix: &str, values: &[f32]| {
            let Some(slot) = self
                .members
                .iter()
                .position(|m| m.name.starts_with(prefix) && m.name.ends_with(suffix))
            else {
                return;
            };
            let stride = values.len();
            if let Some(dst) = self.data[slot].get_mut(i * stride..(i + 1) * stride) {
                dst.copy_from_slice(values);
            }
        };
        put("ShadowMatrix", &result.matrix.to_cols_array());
        put("ShadowParams", &params.to_array());
        put("ShadowCamera", &[result.near, result.far]);

        if let Some(slot) = self.shadow_maps[caster.kind as usize].get_mut(i) {
            *slot = Some(result.map);
        }
        self.refresh_version();
    }

    fn refresh_version(&mut self) {
        let mut hasher = Xxh3::new();
        for values in &self.data {
            hasher.update(bytemuck::cast_slice(values));
        }
        let hash = hasher.digest();
        if hash != self.hash {
            self.hash = hash;
            self.version = self.version.wrapping_add(1);
        }
    }

    /// Ambient term alone, for tests and debug overlays.
    #[must_use]
    pub fn ambient(&self) -> Color {
        self.values("ambientLightColor")
            .and_then(|v| v.get(..3))
            .map_or(Color::BLACK, |v| Color::new(v[0], v[1], v[2]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{Light, Node, Transform};

    #[test]
    fn declarations_follow_counts() {
        let counts = LightCounts { point: 2, directional_shadows: 0, ..LightCounts::default() };
        let decl = light_uniform_declarations(&counts, false);
        assert!(decl.contains("uniform vec3 pointLightPosition[2];"));
        assert!(decl.contains("uniform float pointLightDecay[2];"));
        assert!(!decl.contains("directional"));

        let block = light_uniform_declarations(&counts, true);
        assert!(block.starts_with("layout(std140) uniform LightBlock {"));
        assert!(block.contains("    vec3 pointLightColor[2];"));
    }

    #[test]
    fn shadow_casters_come_first() {
        let mut scene = Scene::new();
        let plain = scene.add_light("plain", Light::directional(Color::WHITE, 1.0));
        let caster = scene.add_light("caster", Light::directional(Color::WHITE, 1.0).with_shadow(256));

        let mut state = LightState::new();
        scene.update_world_matrices();
        state.setup(&scene, &[plain, caster], &Mat4::IDENTITY, &ColorManagement::default(), true);

        assert_eq!(state.counts().directional, 2);
        assert_eq!(state.counts().directional_shadows, 1);
        assert_eq!(state.casters()[0].node, caster);
        assert_eq!(state.values("directionalShadowMatrix").map(<[f32]>::len), Some(16));

        state.setup(&scene, &[plain, caster], &Mat4::IDENTITY, &ColorManagement::default(), false);
        assert_eq!(state.counts().directional_shadows, 0);
        assert!(state.casters().is_empty());
    }

    #[test]
    fn directions_are_view_space_and_target_defaults_to_origin() {
        let mut scene = Scene::new();
        let light = scene.add_node(Node::new("sun").with_transform(Transform::from_position(Vec3::new(0.0, 10.0, 0.0))));
        scene.set_light(light, Light::directional(Color::WHITE, 2.0)).unwrap();
        scene.update_world_matrices();

        let mut state = LightState::new();
        let cm = ColorManagement { enabled: false, ..ColorManagement::default() };
        state.setup(&scene, &[light], &Mat4::IDENTITY, &cm, true);

        let dir = state.values("directionalLightDirection").unwrap();
        assert!((dir[1] - 1.0).abs() < 1e-6);
        let color = state.values("directionalLightColor").unwrap();
        assert_eq!(color, &[2.0, 2.0, 2.0]);
    }

    #[test]
    fn version_moves_only_on_change() {
        let mut scene = Scene::new();
        let l = scene.add_light("p", Light::point(Color::WHITE, 1.0, 0.0));
        scene.update_world_matrices();

        let mut state = LightState::new();
        let cm = ColorManagement::default();
        state.setup(&scene, &[l], &Mat4::IDENTITY, &cm, true);
        let v = state.version();
        state.setup(&scene, &[l], &Mat4::IDENTITY, &cm, true);
        assert_eq!(state.version(), v);
        state.setup(&scene, &[l], &Mat4::from_translation(Vec3::X), &cm, true);
        assert_ne!(state.version(), v);
    }
}
