use crate::resources::assets::TextureHandle;
use crate::resources::color::Color;

use super::{MaterialFeatures, MaterialValue, UniformVisitor};

/// Unlit material.
#[derive(Debug, Clone, PartialEq)]
pub struct BasicConfig {
    pub color: Color,
    pub map: Option<TextureHandle>,
    pub alpha_map: Option<TextureHandle>,
    pub ao_map: Option<TextureHandle>,
    pub ao_map_intensity: f32,
    pub specular_map: Option<TextureHandle>,
    pub env_map: Option<TextureHandle>,
    pub reflectivity: f32,
    pub refraction_ratio: f32,
}

impl Default for BasicConfig {
    fn default() -> Self {
        Self {
            color: Color::WHITE,
            map: None,
            alpha_map: None,
            ao_map: None,
            ao_map_intensity: 1.0,
            specular_map: None,
            env_map: None,
            reflectivity: 1.0,
            refraction_ratio: 0.98,
        }
    }
}

impl BasicConfig {
    pub(super) fn features(&self) -> MaterialFeatures {
        let mut f = MaterialFeatures::empty();
        f.set(MaterialFeatures::USE_MAP, self.map.is_some());
        f.set(MaterialFeatures::USE_ALPHA_MAP, self.alpha_map.is_some());
        f.set(MaterialFeatures::USE_AO_MAP, self.ao_map.is_some());
        f.set(MaterialFeatures::USE_SPECULAR_MAP, self.specular_map.is_some());
        f.set(MaterialFeatures::USE_ENV_MAP, self.env_map.is_some());
        f
    }

    pub(super) fn visit(&self, v: &mut UniformVisitor<'_>) {
        v("diffuse", MaterialValue::Color(self.color));
        v("map", MaterialValue::Texture(self.map));
        v("alphaMap", MaterialValue::Texture(self.alpha_map));
        v("aoMap", MaterialValue::Texture(self.ao_map));
        v("aoMapIntensity", MaterialValue::Float(self.ao_map_intensity));
        v("specularMap", MaterialValue::Texture(self.specular_map));
        v("envMap", MaterialValue::Texture(self.env_map));
        v("reflectivity", MaterialValue::Float(self.reflectivity));
        v("refractionRatio", MaterialValue::Float(self.refraction_ratio));
    }
}
