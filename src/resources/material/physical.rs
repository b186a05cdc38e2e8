use crate::resources::assets::TextureHandle;
use crate::resources::color::Color;

use super::standard::StandardConfig;
use super::{MaterialFeatures, MaterialValue, UniformVisitor};

/// [`StandardConfig`] extended with clearcoat, sheen and transmission.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalConfig {
    pub base: StandardConfig,
    pub clearcoat: f32,
    pub clearcoat_roughness: f32,
    pub sheen: f32,
    pub sheen_color: Color,
    pub sheen_roughness: f32,
    /// Values above 0 route the material through the transmission pass.
    pub transmission: f32,
    pub transmission_map: Option<TextureHandle>,
    pub thickness: f32,
    pub attenuation_color: Color,
    pub attenuation_distance: f32,
    pub ior: f32,
    pub specular_intensity: f32,
    pub specular_color: Color,
}

impl Default for PhysicalConfig {
    fn default() -> Self {
        Self {
            base: StandardConfig::default(),
            clearcoat: 0.0,
            clearcoat_roughness: 0.0,
            sheen: 0.0,
            sheen_color: Color::BLACK,
            sheen_roughness: 1.0,
            transmission: 0.0,
            transmission_map: None,
            thickness: 0.0,
            attenuation_color: Color::WHITE,
            attenuation_distance: f32::INFINITY,
            ior: 1.5,
            specular_intensity: 1.0,
            specular_color: Color::WHITE,
        }
    }
}

impl PhysicalConfig {
    pub(super) fn features(&self) -> MaterialFeatures {
        let mut f = self.base.features();
        f.set(MaterialFeatures::USE_CLEARCOAT, self.clearcoat > 0.0);
        f.set(MaterialFeatures::USE_SHEEN, self.sheen > 0.0);
        f.set(MaterialFeatures::USE_TRANSMISSION, self.transmission > 0.0);
        f.set(
            MaterialFeatures::USE_TRANSMISSION_MAP,
            self.transmission > 0.0 && self.transmission_map.is_some(),
        );
        f
    }

    pub(super) fn visit(&self, v: &mut UniformVisitor<'_>) {
        self.base.visit(v);
        v("clearcoat", MaterialValue::Float(self.clearcoat));
        v("clearcoatRoughness", MaterialValue::Float(self.clearcoat_roughness));
        v("sheenColor", MaterialValue::Color(self.sheen_color.scaled(self.sheen)));
        v("sheenRoughness", MaterialValue::Float(self.sheen_roughness));
        v("transmission", MaterialValue::Float(self.transmission));
        v("transmissionMap", MaterialValue::Texture(self.transmission_map));
        v("thickness", MaterialValue::Float(self.thickness));
        v("attenuationColor", MaterialValue::Color(self.attenuation_color));
        // GLSL has no infinity literal; a large distance means no attenuation
        v("attenuationDistance", MaterialValue::Float(self.attenuation_distance.min(1e30)));
        v("ior", MaterialValue::Float(self.ior));
        v("specularIntensity", MaterialValue::Float(self.specular_intensity));
        v("specularColor", MaterialValue::Color(self.specular_color));
    }
}
