use glam::Vec2;

use crate::resources::assets::TextureHandle;
use crate::resources::color::Color;

use super::{MaterialFeatures, MaterialValue, UniformVisitor};

/// Cel-shaded material; `gradient_map` quantizes the diffuse term.
#[derive(Debug, Clone, PartialEq)]
pub struct ToonConfig {
    pub color: Color,
    pub gradient_map: Option<TextureHandle>,
    pub map: Option<TextureHandle>,
    pub normal_map: Option<TextureHandle>,
    pub normal_scale: Vec2,
    pub emissive: Color,
    pub emissive_intensity: f32,
    pub emissive_map: Option<TextureHandle>,
    pub alpha_map: Option<TextureHandle>,
}

impl Default for ToonConfig {
    fn default() -> Self {
        Self {
            color: Color::WHITE,
            gradient_map: None,
            map: None,
            normal_map: None,
            normal_scale: Vec2::ONE,
            emissive: Color::BLACK,
            emissive_intensity: 1.0,
            emissive_map: None,
            alpha_map: None,
        }
    }
}

impl ToonConfig {
    pub(super) fn features(&self) -> MaterialFeatures {
        let mut f = MaterialFeatures::empty();
        f.set(MaterialFeatures::USE_GRADIENT_MAP, self.gradient_map.is_some());
        f.set(MaterialFeatures::USE_MAP, self.map.is_some());
        f.set(MaterialFeatures::USE_NORMAL_MAP, self.normal_map.is_some());
        f.set(MaterialFeatures::USE_EMISSIVE_MAP, self.emissive_map.is_some());
        f.set(MaterialFeatures::USE_ALPHA_MAP, self.alpha_map.is_some());
        f
    }

    pub(super) fn visit(&self, v: &mut UniformVisitor<'_>) {
        v("diffuse", MaterialValue::Color(self.color));
        v("gradientMap", MaterialValue::Texture(self.gradient_map));
        v("map", MaterialValue::Texture(self.map));
        v("normalMap", MaterialValue::Texture(self.normal_map));
        v("normalScale", MaterialValue::Vec2(self.normal_scale));
        v("emissive", MaterialValue::Color(self.emissive));
        v("emissiveIntensity", MaterialValue::Float(self.emissive_intensity));
        v("emissiveMap", MaterialValue::Texture(self.emissive_map));
        v("alphaMap", MaterialValue::Texture(self.alpha_map));
    }
}
