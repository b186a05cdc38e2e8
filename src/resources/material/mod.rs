//! Materials
//!
//! A [`Material`] pairs a closed [`MaterialKind`] (shading model plus the
//! parameters that model recognizes) with [`MaterialCommon`] render state.
//!
//! Materials own no GPU objects. The program cache derives shader variants
//! from [`Material::features`], and the uniform binder reads parameter
//! values through [`Material::visit_uniforms`], re-uploading only when
//! [`Material::version`] changes.
//!
//! # Mutation
//!
//! Every write goes through a setter or a [`MutGuard`] so the version always
//! moves:
//!
//! ```rust,ignore
//! let mut mat = Material::standard(Color::from_hex(0x808080));
//! mat.common_mut().transparent = true;
//! if let MaterialKind::Standard(cfg) = &mut *mat.kind_mut() {
//!     cfg.roughness = 0.3;
//! }
//! ```

mod basic;
mod lambert;
mod phong;
mod physical;
pub mod render_state;
mod standard;
mod toon;

pub use basic::BasicConfig;
pub use lambert::LambertConfig;
pub use phong::PhongConfig;
pub use physical::PhysicalConfig;
pub use render_state::{
    BlendEquation, BlendFactor, BlendState, Blending, CompareFunc, MaterialCommon, PolygonOffset,
    Side, StencilOp, StencilState,
};
pub use standard::StandardConfig;
pub use toon::ToonConfig;

use std::hash::BuildHasher;

use bitflags::bitflags;
use glam::Vec2;
use rustc_hash::FxBuildHasher;
use smallvec::SmallVec;

use crate::resources::assets::TextureHandle;
use crate::resources::color::Color;
use crate::resources::version_tracker::{ChangeTracker, MutGuard, next_resource_id};

bitflags! {
    /// Parameter-driven shader features. Flag names double as define names.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct MaterialFeatures: u32 {
        const USE_MAP              = 1 << 0;
        const USE_ALPHA_MAP        = 1 << 1;
        const USE_NORMAL_MAP       = 1 << 2;
        const USE_EMISSIVE_MAP     = 1 << 3;
        const USE_ROUGHNESS_MAP    = 1 << 4;
        const USE_METALNESS_MAP    = 1 << 5;
        const USE_AO_MAP           = 1 << 6;
        const USE_SPECULAR_MAP     = 1 << 7;
        const USE_GRADIENT_MAP     = 1 << 8;
        const USE_ENV_MAP          = 1 << 9;
        const USE_TRANSMISSION     = 1 << 10;
        const USE_TRANSMISSION_MAP = 1 << 11;
        const USE_CLEARCOAT        = 1 << 12;
        const USE_SHEEN            = 1 << 13;
        const ALPHA_TEST           = 1 << 14;
        const VERTEX_COLORS        = 1 << 15;
        const FLAT_SHADING         = 1 << 16;
        const DOUBLE_SIDED         = 1 << 17;
        const FLIP_SIDED           = 1 << 18;
        const PREMULTIPLIED_ALPHA  = 1 << 19;
        const ALPHA_TO_COVERAGE    = 1 << 20;
    }
}

/// Shading model tag, emitted as the `SHADING_MODEL` define.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShadingModel {
    Basic,
    Lambert,
    Phong,
    Standard,
    Physical,
    Toon,
}

impl ShadingModel {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Basic => "BASIC",
            Self::Lambert => "LAMBERT",
            Self::Phong => "PHONG",
            Self::Standard => "STANDARD",
            Self::Physical => "PHYSICAL",
            Self::Toon => "TOON",
        }
    }

    /// Whether the model reads the light aggregate.
    #[must_use]
    pub fn is_lit(self) -> bool {
        !matches!(self, Self::Basic)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MaterialKind {
    Basic(BasicConfig),
    Lambert(LambertConfig),
    Phong(PhongConfig),
    Standard(StandardConfig),
    Physical(PhysicalConfig),
    Toon(ToonConfig),
}

macro_rules! impl_from_config {
    ($($cfg:ident => $variant:ident),* $(,)?) => {
        $(impl From<$cfg> for MaterialKind {
            fn from(cfg: $cfg) -> Self {
                Self::$variant(cfg)
            }
        })*
    };
}

impl_from_config!(
    BasicConfig => Basic,
    LambertConfig => Lambert,
    PhongConfig => Phong,
    StandardConfig => Standard,
    PhysicalConfig => Physical,
    ToonConfig => Toon,
);

impl MaterialKind {
    #[must_use]
    pub fn shading_model(&self) -> ShadingModel {
        match self {
            Self::Basic(_) => ShadingModel::Basic,
            Self::Lambert(_) => ShadingModel::Lambert,
            Self::Phong(_) => ShadingModel::Phong,
            Self::Standard(_) => ShadingModel::Standard,
            Self::Physical(_) => ShadingModel::Physical,
            Self::Toon(_) => ShadingModel::Toon,
        }
    }

    #[must_use]
    pub fn features(&self) -> MaterialFeatures {
        match self {
            Self::Basic(c) => c.features(),
            Self::Lambert(c) => c.features(),
            Self::Phong(c) => c.features(),
            Self::Standard(c) => c.features(),
            Self::Physical(c) => c.features(),
            Self::Toon(c) => c.features(),
        }
    }

    fn visit(&self, v: &mut UniformVisitor<'_>) {
        match self {
            Self::Basic(c) => c.visit(v),
            Self::Lambert(c) => c.visit(v),
            Self::Phong(c) => c.visit(v),
            Self::Standard(c) => c.visit(v),
            Self::Physical(c) => c.visit(v),
            Self::Toon(c) => c.visit(v),
        }
    }

    #[must_use]
    pub fn color(&self) -> Color {
        match self {
            Self::Basic(c) => c.color,
            Self::Lambert(c) => c.color,
            Self::Phong(c) => c.color,
            Self::Standard(c) => c.color,
            Self::Physical(c) => c.base.color,
            Self::Toon(c) => c.color,
        }
    }

    fn color_mut(&mut self) -> &mut Color {
        match self {
            Self::Basic(c) => &mut c.color,
            Self::Lambert(c) => &mut c.color,
            Self::Phong(c) => &mut c.color,
            Self::Standard(c) => &mut c.color,
            Self::Physical(c) => &mut c.base.color,
            Self::Toon(c) => &mut c.color,
        }
    }

    #[must_use]
    pub fn env_map(&self) -> Option<TextureHandle> {
        match self {
            Self::Basic(c) => c.env_map,
            Self::Lambert(c) => c.env_map,
            Self::Phong(c) => c.env_map,
            Self::Standard(c) => c.env_map,
            Self::Physical(c) => c.base.env_map,
            Self::Toon(_) => None,
        }
    }

    #[must_use]
    pub fn transmission(&self) -> f32 {
        match self {
            Self::Physical(c) => c.transmission,
            _ => 0.0,
        }
    }
}

/// A parameter value as read by the uniform binder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MaterialValue {
    Float(f32),
    Vec2(Vec2),
    /// Authored color; converted to working space once, at upload.
    Color(Color),
    Texture(Option<TextureHandle>),
}

/// Callback receiving `(uniform name, value)` pairs.
pub type UniformVisitor<'a> = dyn FnMut(&'static str, MaterialValue) + 'a;

#[derive(Debug)]
pub struct Material {
    id: u64,
    pub name: String,
    kind: MaterialKind,
    common: MaterialCommon,
    version: ChangeTracker,
}

/// A clone is a new resource: fresh id, version reset.
impl Clone for Material {
    fn clone(&self) -> Self {
        Self {
            id: next_resource_id(),
            name: self.name.clone(),
            kind: self.kind.clone(),
            common: self.common.clone(),
            version: ChangeTracker::new(),
        }
    }
}

impl Material {
    #[must_use]
    pub fn new(kind: impl Into<MaterialKind>) -> Self {
        Self {
            id: next_resource_id(),
            name: String::new(),
            kind: kind.into(),
            common: MaterialCommon::default(),
            version: ChangeTracker::new(),
        }
    }

    #[must_use]
    pub fn basic(color: Color) -> Self {
        Self::new(BasicConfig {
            color,
            ..Default::default()
        })
    }

    #[must_use]
    pub fn lambert(color: Color) -> Self {
        Self::new(LambertConfig {
            color,
            ..Default::default()
        })
    }

    #[must_use]
    pub fn phong(color: Color) -> Self {
        Self::new(PhongConfig {
            color,
            ..Default::default()
        })
    }

    #[must_use]
    pub fn standard(color: Color) -> Self {
        Self::new(StandardConfig {
            color,
            ..Default::default()
        })
    }

    #[must_use]
    pub fn physical(color: Color) -> Self {
        Self::new(PhysicalConfig {
            base: StandardConfig {
                color,
                ..Default::default()
            },
            ..Default::default()
        })
    }

    #[must_use]
    pub fn toon(color: Color) -> Self {
        Self::new(ToonConfig {
            color,
            ..Default::default()
        })
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Builder-style access to the render state.
    #[must_use]
    pub fn with_common(mut self, f: impl FnOnce(&mut MaterialCommon)) -> Self {
        f(&mut self.common);
        self
    }

    #[must_use]
    pub fn with_transparent(self, opacity: f32) -> Self {
        self.with_common(|c| {
            c.transparent = true;
            c.opacity = opacity;
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Bumped on every parameter or state mutation.
    #[inline]
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version.version()
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> &MaterialKind {
        &self.kind
    }

    #[inline]
    #[must_use]
    pub fn common(&self) -> &MaterialCommon {
        &self.common
    }

    pub fn kind_mut(&mut self) -> MutGuard<'_, MaterialKind> {
        MutGuard::new(&mut self.kind, &mut self.version)
    }

    pub fn common_mut(&mut self) -> MutGuard<'_, MaterialCommon> {
        MutGuard::new(&mut self.common, &mut self.version)
    }

    pub fn set_color(&mut self, color: Color) {
        *self.kind.color_mut() = color;
        self.version.changed();
    }

    pub fn set_opacity(&mut self, opacity: f32) {
        self.common.opacity = opacity;
        self.version.changed();
    }

    pub fn set_transparent(&mut self, transparent: bool) {
        self.common.transparent = transparent;
        self.version.changed();
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.common.visible = visible;
        self.version.changed();
    }

    // ========================================================================
    // Capability queries
    // ========================================================================

    #[must_use]
    pub fn shading_model(&self) -> ShadingModel {
        self.kind.shading_model()
    }

    #[must_use]
    pub fn is_transparent(&self) -> bool {
        self.common.transparent
    }

    #[must_use]
    pub fn transmission(&self) -> f32 {
        self.kind.transmission()
    }

    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.common.visible
    }

    #[must_use]
    pub fn has_feature(&self, feature: MaterialFeatures) -> bool {
        self.features().contains(feature)
    }

    /// Kind-specific map flags plus flags derived from the render state.
    #[must_use]
    pub fn features(&self) -> MaterialFeatures {
        let c = &self.common;
        let mut f = self.kind.features();
        f.set(MaterialFeatures::ALPHA_TEST, c.alpha_test > 0.0);
        f.set(MaterialFeatures::VERTEX_COLORS, c.vertex_colors);
        f.set(MaterialFeatures::FLAT_SHADING, c.flat_shading);
        f.set(MaterialFeatures::DOUBLE_SIDED, c.side == Side::Double);
        f.set(MaterialFeatures::FLIP_SIDED, c.side == Side::Back);
        f.set(MaterialFeatures::PREMULTIPLIED_ALPHA, c.premultiplied_alpha);
        f.set(MaterialFeatures::ALPHA_TO_COVERAGE, c.alpha_to_coverage);
        f
    }

    /// Hash of everything that feeds program defines. Parameter edits such as
    /// [`set_color`](Self::set_color) move [`version`](Self::version) but leave
    /// this unchanged.
    #[must_use]
    pub fn layout_key(&self) -> u64 {
        let c = &self.common;
        FxBuildHasher.hash_one((
            self.shading_model(),
            self.features().bits(),
            self.kind.env_map(),
            c.fog,
            c.tone_mapped,
            c.clip_shadows,
        ))
    }

    /// Emits every uniform this material feeds, including shared ones.
    pub fn visit_uniforms(&self, v: &mut UniformVisitor<'_>) {
        v("opacity", MaterialValue::Float(self.common.opacity));
        v("alphaTest", MaterialValue::Float(self.common.alpha_test));
        self.kind.visit(v);
    }

    /// Every texture the material references.
    #[must_use]
    pub fn textures(&self) -> SmallVec<[TextureHandle; 8]> {
        let mut out = SmallVec::new();
        self.visit_uniforms(&mut |_, value| {
            if let MaterialValue::Texture(Some(handle)) = value {
                out.push(handle);
            }
        });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guards_bump_version() {
        let mut mat = Material::standard(Color::WHITE);
        assert_eq!(mat.version(), 0);
        mat.common_mut().opacity = 0.5;
        assert_eq!(mat.version(), 1);
        if let MaterialKind::Standard(cfg) = &mut *mat.kind_mut() {
            cfg.roughness = 0.25;
        }
        assert_eq!(mat.version(), 2);
        mat.set_color(Color::BLACK);
        assert_eq!(mat.version(), 3);
        assert_eq!(mat.kind().color(), Color::BLACK);
    }

    #[test]
    fn clone_is_a_new_resource() {
        let mut mat = Material::basic(Color::WHITE);
        mat.set_opacity(0.5);
        let copy = mat.clone();
        assert_ne!(copy.id(), mat.id());
        assert_eq!(copy.version(), 0);
        assert_eq!(copy.common().opacity, 0.5);
    }

    #[test]
    fn features_follow_state() {
        let mat = Material::basic(Color::WHITE).with_common(|c| {
            c.side = Side::Double;
            c.alpha_test = 0.5;
        });
        let f = mat.features();
        assert!(f.contains(MaterialFeatures::DOUBLE_SIDED | MaterialFeatures::ALPHA_TEST));
        assert!(!f.contains(MaterialFeatures::USE_MAP));
    }

    #[test]
    fn transmission_sets_flag() {
        let mut mat = Material::physical(Color::WHITE);
        assert_eq!(mat.transmission(), 0.0);
        if let MaterialKind::Physical(cfg) = &mut *mat.kind_mut() {
            cfg.transmission = 1.0;
        }
        assert!(mat.has_feature(MaterialFeatures::USE_TRANSMISSION));
    }

    #[test]
    fn flag_names_are_define_names() {
        let names: Vec<_> = (MaterialFeatures::USE_MAP | MaterialFeatures::FLIP_SIDED)
            .iter_names()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(names, ["USE_MAP", "FLIP_SIDED"]);
    }
}
