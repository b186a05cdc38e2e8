use glam::Vec2;

use crate::resources::assets::TextureHandle;
use crate::resources::color::Color;

use super::{MaterialFeatures, MaterialValue, UniformVisitor};

/// Diffuse-only lit material.
#[derive(Debug, Clone, PartialEq)]
pub struct LambertConfig {
    pub color: Color,
    pub emissive: Color,
    pub emissive_intensity: f32,
    pub map: Option<TextureHandle>,
    pub emissive_map: Option<TextureHandle>,
    pub alpha_map: Option<TextureHandle>,
    pub ao_map: Option<TextureHandle>,
    pub ao_map_intensity: f32,
    pub normal_map: Option<TextureHandle>,
    pub normal_scale: Vec2,
    pub env_map: Option<TextureHandle>,
    pub reflectivity: f32,
}

impl Default for LambertConfig {
    fn default() -> Self {
        Self {
            color: Color::WHITE,
            emissive: Color::BLACK,
            emissive_intensity: 1.0,
            map: None,
            emissive_map: None,
            alpha_map: None,
            ao_map: None,
            ao_map_intensity: 1.0,
            normal_map: None,
            normal_scale: Vec2::ONE,
            env_map: None,
            reflectivity: 1.0,
        }
    }
}

impl LambertConfig {
    pub(super) fn features(&self) -> MaterialFeatures {
        let mut f = MaterialFeatures::empty();
        f.set(MaterialFeatures::USE_MAP, self.map.is_some());
        f.set(MaterialFeatures::USE_EMISSIVE_MAP, self.emissive_map.is_some());
        f.set(MaterialFeatures::USE_ALPHA_MAP, self.alpha_map.is_some());
        f.set(MaterialFeatures::USE_AO_MAP, self.ao_map.is_some());
        f.set(MaterialFeatures::USE_NORMAL_MAP, self.normal_map.is_some());
        f.set(MaterialFeatures::USE_ENV_MAP, self.env_map.is_some());
        f
    }

    pub(super) fn visit(&self, v: &mut UniformVisitor<'_>) {
        v("diffuse", MaterialValue::Color(self.color));
        v("emissive", MaterialValue::Color(self.emissive));
        v("emissiveIntensity", MaterialValue::Float(self.emissive_intensity));
        v("map", MaterialValue::Texture(self.map));
        v("emissiveMap", MaterialValue::Texture(self.emissive_map));
        v("alphaMap", MaterialValue::Texture(self.alpha_map));
        v("aoMap", MaterialValue::Texture(self.ao_map));
        v("aoMapIntensity", MaterialValue::Float(self.ao_map_intensity));
        v("normalMap", MaterialValue::Texture(self.normal_map));
        v("normalScale", MaterialValue::Vec2(self.normal_scale));
        v("envMap", MaterialValue::Texture(self.env_map));
        v("reflectivity", MaterialValue::Float(self.reflectivity));
    }
}
