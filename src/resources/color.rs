//! Color values and the global color-management policy.
//!
//! Colors are authored in sRGB (hex codes, picker values). Shading happens in
//! linear space, so every color is converted exactly once, when the uniform
//! binder uploads it, according to [`ColorManagement`].

use glam::Vec3;

/// Encoding of color data (texture texels, authored colors, output target).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColorSpace {
    #[default]
    Srgb,
    Linear,
}

impl ColorSpace {
    /// Name used for the `OUTPUT_COLOR_SPACE` shader define.
    #[must_use]
    pub fn define_name(self) -> &'static str {
        match self {
            Self::Srgb => "SRGB",
            Self::Linear => "LINEAR",
        }
    }
}

#[inline]
#[must_use]
pub fn srgb_to_linear(value: f32) -> f32 {
    if value <= 0.040_45 {
        value / 12.92
    } else {
        ((value + 0.055) / 1.055).powf(2.4)
    }
}

#[inline]
#[must_use]
pub fn linear_to_srgb(value: f32) -> f32 {
    if value <= 0.003_130_8 {
        value * 12.92
    } else {
        1.055 * value.powf(1.0 / 2.4) - 0.055
    }
}

/// An RGB color in the space it was authored in.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub const WHITE: Self = Self::new(1.0, 1.0, 1.0);
    pub const BLACK: Self = Self::new(0.0, 0.0, 0.0);

    #[must_use]
    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    /// `0xRRGGBB`
    #[must_use]
    pub fn from_hex(hex: u32) -> Self {
        Self::new(
            ((hex >> 16) & 0xff) as f32 / 255.0,
            ((hex >> 8) & 0xff) as f32 / 255.0,
            (hex & 0xff) as f32 / 255.0,
        )
    }

    #[must_use]
    pub fn to_hex(self) -> u32 {
        let c = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u32;
        (c(self.r) << 16) | (c(self.g) << 8) | c(self.b)
    }

    #[must_use]
    pub fn srgb_to_linear(self) -> Self {
        Self::new(srgb_to_linear(self.r), srgb_to_linear(self.g), srgb_to_linear(self.b))
    }

    #[must_use]
    pub fn linear_to_srgb(self) -> Self {
        Self::new(linear_to_srgb(self.r), linear_to_srgb(self.g), linear_to_srgb(self.b))
    }

    #[must_use]
    pub fn scaled(self, factor: f32) -> Self {
        Self::new(self.r * factor, self.g * factor, self.b * factor)
    }

    #[must_use]
    pub fn to_array(self) -> [f32; 3] {
        [self.r, self.g, self.b]
    }

    #[must_use]
    pub fn to_vec3(self) -> Vec3 {
        Vec3::new(self.r, self.g, self.b)
    }
}

impl From<[f32; 3]> for Color {
    fn from(v: [f32; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

/// Global color-management policy applied at upload time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorManagement {
    /// When disabled, authored colors are uploaded untouched.
    pub enabled: bool,
    /// Space authored colors are expressed in.
    pub authoring_space: ColorSpace,
}

impl Default for ColorManagement {
    fn default() -> Self {
        Self {
            enabled: true,
            authoring_space: ColorSpace::Srgb,
        }
    }
}

impl ColorManagement {
    /// Converts an authored color into the linear working space.
    #[must_use]
    pub fn to_working(&self, color: Color) -> Color {
        if self.enabled && self.authoring_space == ColorSpace::Srgb {
            color.srgb_to_linear()
        } else {
            color
        }
    }

    /// Converts a working-space color into the output encoding (clear colors).
    #[must_use]
    pub fn to_output(&self, color: Color, output: ColorSpace) -> Color {
        if self.enabled && output == ColorSpace::Srgb {
            color.linear_to_srgb()
        } else {
            color
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn transfer_functions_round_trip() {
        for i in 0..=20 {
            let v = i as f32 / 20.0;
            assert!(approx(linear_to_srgb(srgb_to_linear(v)), v), "{v}");
        }
    }

    #[test]
    fn hex_round_trip() {
        let c = Color::from_hex(0x3366cc);
        assert_eq!(c.to_hex(), 0x3366cc);
    }

    #[test]
    fn disabled_policy_is_identity() {
        let cm = ColorManagement {
            enabled: false,
            ..Default::default()
        };
        let c = Color::new(0.5, 0.25, 0.75);
        assert_eq!(cm.to_working(c), c);
    }

    #[test]
    fn srgb_mid_grey_linearizes() {
        let cm = ColorManagement::default();
        let c = cm.to_working(Color::new(0.5, 0.5, 0.5));
        assert!(approx(c.r, 0.214_041_14));
    }
}
