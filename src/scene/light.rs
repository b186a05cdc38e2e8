use crate::resources::color::Color;
use crate::scene::NodeHandle;

/// Shadow-map request for a shadow-casting light.
#[derive(Debug, Clone, PartialEq)]
pub struct LightShadow {
    /// Requested square resolution; clamped to the device maximum.
    pub map_size: u32,
    pub bias: f32,
    pub normal_bias: f32,
    /// PCF kernel radius in texels.
    pub radius: f32,
    pub near: f32,
    pub far: f32,
    /// Minimum half extent of a directional light's orthographic frustum.
    pub camera_size: f32,
    /// Re-render every frame. When false, only `needs_update` triggers a pass.
    pub auto_update: bool,
    /// One-shot request; cleared after the next shadow pass.
    pub needs_update: bool,
}

impl Default for LightShadow {
    fn default() -> Self {
        Self {
            map_size: 512,
            bias: 0.0,
            normal_bias: 0.0,
            radius: 1.0,
            near: 0.5,
            far: 500.0,
            camera_size: 5.0,
            auto_update: true,
            needs_update: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightKind {
    Ambient,
    Directional,
    /// `distance` 0 means unbounded.
    Point { distance: f32, decay: f32 },
    /// `angle` is the half-angle of the cone, in radians.
    Spot {
        distance: f32,
        angle: f32,
        penumbra: f32,
        decay: f32,
    },
    RectArea { width: f32, height: f32 },
}

impl LightKind {
    #[must_use]
    pub fn can_cast_shadow(&self) -> bool {
        matches!(self, Self::Directional | Self::Point { .. } | Self::Spot { .. })
    }
}

#[derive(Debug, Clone)]
pub struct Light {
    pub kind: LightKind,
    pub color: Color,
    pub intensity: f32,
    pub cast_shadow: bool,
    pub shadow: LightShadow,
    /// Aim point for directional and spot lights. Non-owning; when unset or
    /// dangling the light aims at the world origin.
    pub target: Option<NodeHandle>,
}

impl Light {
    fn new(kind: LightKind, color: Color, intensity: f32) -> Self {
        Self {
            kind,
            color,
            intensity,
            cast_shadow: false,
            shadow: LightShadow::default(),
            target: None,
        }
    }

    #[must_use]
    pub fn ambient(color: Color, intensity: f32) -> Self {
        Self::new(LightKind::Ambient, color, intensity)
    }

    #[must_use]
    pub fn directional(color: Color, intensity: f32) -> Self {
        Self::new(LightKind::Directional, color, intensity)
    }

    #[must_use]
    pub fn point(color: Color, intensity: f32, distance: f32) -> Self {
        Self::new(LightKind::Point { distance, decay: 2.0 }, color, intensity)
    }

    #[must_use]
    pub fn spot(color: Color, intensity: f32, distance: f32, angle: f32, penumbra: f32) -> Self {
        Self::new(
            LightKind::Spot {
                distance,
                angle,
                penumbra,
                decay: 2.0,
            },
            color,
            intensity,
        )
    }

    #[must_use]
    pub fn rect_area(color: Color, intensity: f32, width: f32, height: f32) -> Self {
        Self::new(LightKind::RectArea { width, height }, color, intensity)
    }

    #[must_use]
    pub fn with_shadow(mut self, map_size: u32) -> Self {
        self.cast_shadow = true;
        self.shadow.map_size = map_size;
        self
    }

    /// Casting is requested and the kind supports it.
    #[must_use]
    pub fn casts_shadow(&self) -> bool {
        self.cast_shadow && self.kind.can_cast_shadow()
    }
}
