use glam::Vec2;

use crate::resources::assets::TextureHandle;
use crate::resources::color::Color;

use super::{MaterialFeatures, MaterialValue, UniformVisitor};

/// Metallic-roughness PBR material.
#[derive(Debug, Clone, PartialEq)]
pub struct StandardConfig {
    pub color: Color,
    pub roughness: f32,
    pub metalness: f32,
    pub emissive: Color,
    pub emissive_intensity: f32,
    pub map: Option<TextureHandle>,
    pub roughness_map: Option<TextureHandle>,
    pub metalness_map: Option<TextureHandle>,
    pub normal_map: Option<TextureHandle>,
    pub normal_scale: Vec2,
    pub emissive_map: Option<TextureHandle>,
    pub ao_map: Option<TextureHandle>,
    pub ao_map_intensity: f32,
    pub alpha_map: Option<TextureHandle>,
    pub env_map: Option<TextureHandle>,
    pub env_map_intensity: f32,
}

impl Default for StandardConfig {
    fn default() -> Self {
        Self {
            color: Color::WHITE,
            roughness: 1.0,
            metalness: 0.0,
            emissive: Color::BLACK,
            emissive_intensity: 1.0,
            map: None,
            roughness_map: None,
            metalness_map: None,
            normal_map: None,
            normal_scale: Vec2::ONE,
            emissive_map: None,
            ao_map: None,
            ao_map_intensity: 1.0,
            alpha_map: None,
            env_map: None,
            env_map_intensity: 1.0,
        }
    }
}

impl StandardConfig {
    pub(super) fn features(&self) -> MaterialFeatures {
        let mut f = MaterialFeatures::empty();
        f.set(MaterialFeatures::USE_MAP, self.map.is_some());
        f.set(MaterialFeatures::USE_ROUGHNESS_MAP, self.roughness_map.is_some());
        f.set(MaterialFeatures::USE_METALNESS_MAP, self.metalness_map.is_some());
        f.set(MaterialFeatures::USE_NORMAL_MAP, self.normal_map.is_some());
        f.set(MaterialFeatures::USE_EMISSIVE_MAP, self.emissive_map.is_some());
        f.set(MaterialFeatures::USE_AO_MAP, self.ao_map.is_some());
        f.set(MaterialFeatures::USE_ALPHA_MAP, self.alpha_map.is_some());
        f.set(MaterialFeatures::USE_ENV_MAP, self.env_map.is_some());
        f
    }

    pub(super) fn visit(&self, v: &mut UniformVisitor<'_>) {
        v("diffuse", MaterialValue::Color(self.color));
        v("roughness", MaterialValue::Float(self.roughness));
        v("metalness", MaterialValue::Float(self.metalness));
        v("emissive", MaterialValue::Color(self.emissive));
        v("emissiveIntensity", MaterialValue::Float(self.emissive_intensity));
        v("map", MaterialValue::Texture(self.map));
        v("roughnessMap", MaterialValue::Texture(self.roughness_map));
        v("metalnessMap", MaterialValue::Texture(self.metalness_map));
        v("normalMap", MaterialValue::Texture(self.normal_map));
        v("normalScale", MaterialValue::Vec2(self.normal_scale));
        v("emissiveMap", MaterialValue::Texture(self.emissive_map));
        v("aoMap", MaterialValue::Texture(self.ao_map));
        v("aoMapIntensity", MaterialValue::Float(self.ao_map_intensity));
        v("alphaMap", MaterialValue::Texture(self.alpha_map));
        v("envMap", MaterialValue::Texture(self.env_map));
        v("envMapIntensity", MaterialValue::Float(self.env_map_intensity));
    }
}
