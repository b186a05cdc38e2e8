//! Renderer Settings
//!
//! Every knob that affects a frame lives in [`RendererSettings`]. Settings
//! that change generated shader source (tone mapping, output color space,
//! shadow filtering, precision, global clipping planes) feed the program key,
//! so changing them at runtime simply selects different cached programs.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use strata::renderer::{Renderer, RendererSettings, ToneMapping};
//!
//! let settings = RendererSettings {
//!     tone_mapping: ToneMapping::AcesFilmic,
//!     tone_mapping_exposure: 1.2,
//!     ..Default::default()
//! };
//! let mut renderer = Renderer::new(device, settings);
//! ```

use glam::Vec4;

use crate::resources::color::{ColorManagement, ColorSpace};

// ---------------------------------------------------------------------------
// Tone mapping
// ---------------------------------------------------------------------------

/// Tone-mapping operator applied when rendering to the default framebuffer.
///
/// Off-screen targets always receive linear, un-tone-mapped output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ToneMapping {
    #[default]
    None,
    Linear,
    Reinhard,
    Cineon,
    AcesFilmic,
    Agx,
    Neutral,
}

impl ToneMapping {
    /// Value of the `TONE_MAPPING` shader define.
    #[must_use]
    pub fn define_name(self) -> Option<&'static str> {
        Some(match self {
            Self::None => return None,
            Self::Linear => "LINEAR",
            Self::Reinhard => "REINHARD",
            Self::Cineon => "CINEON",
            Self::AcesFilmic => "ACES_FILMIC",
            Self::Agx => "AGX",
            Self::Neutral => "NEUTRAL",
        })
    }
}

// ---------------------------------------------------------------------------
// Shadows
// ---------------------------------------------------------------------------

/// Shadow filtering policy. Selects shader code only; the shadow pass itself
/// is the same for every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ShadowType {
    Basic,
    #[default]
    Pcf,
    PcfSoft,
    Vsm,
}

impl ShadowType {
    #[must_use]
    pub fn define_name(self) -> &'static str {
        match self {
            Self::Basic => "BASIC",
            Self::Pcf => "PCF",
            Self::PcfSoft => "PCF_SOFT",
            Self::Vsm => "VSM",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowSettings {
    pub enabled: bool,
    pub kind: ShadowType,
}

impl Default for ShadowSettings {
    fn default() -> Self {
        Self { enabled: true, kind: ShadowType::Pcf }
    }
}

// ---------------------------------------------------------------------------
// Precision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Precision {
    #[default]
    High,
    Medium,
    Low,
}

impl Precision {
    #[must_use]
    pub fn qualifier(self) -> &'static str {
        match self {
            Self::High => "highp",
            Self::Medium => "mediump",
            Self::Low => "lowp",
        }
    }
}

// ---------------------------------------------------------------------------
// RendererSettings
// ---------------------------------------------------------------------------

/// Global renderer configuration.
///
/// # Fields
///
/// | Field                        | Description                                   | Default    |
/// |------------------------------|-----------------------------------------------|------------|
/// | `output_color_space`         | Encoding of the default framebuffer           | `Srgb`     |
/// | `tone_mapping`               | Operator for on-screen output                 | `None`     |
/// | `tone_mapping_exposure`      | Exposure multiplier                           | `1.0`      |
/// | `color_management`           | Authoring → working space policy              | enabled    |
/// | `shadows`                    | Shadow pass toggle and filter                 | on, PCF    |
/// | `sort_objects`               | Sort render-list buckets                      | `true`     |
/// | `auto_clear_*`               | Clear buffers at frame start                  | `true`     |
/// | `clear_color` / `clear_alpha`| Clear value when the scene has no background  | black, 1   |
/// | `async_compile`              | Poll programs instead of blocking             | `false`    |
/// | `light_uniform_block`        | Pack lights into a std140 block when possible | `true`     |
/// | `physically_correct_lights`  | Inverse-square falloff for punctual lights    | `true`     |
/// | `clipping_planes`            | World-space planes applied to every material  | empty      |
/// | `local_clipping_enabled`     | Honour per-material clipping planes           | `false`    |
/// | `precision`                  | Default float precision in shaders            | `High`     |
/// | `pixel_ratio`                | Device pixel ratio used by `set_size`         | `1.0`      |
#[derive(Debug, Clone)]
pub struct RendererSettings {
    pub output_color_space: ColorSpace,
    pub tone_mapping: ToneMapping,
    pub tone_mapping_exposure: f32,
    pub color_management: ColorManagement,

    pub shadows: ShadowSettings,

    /// When `false`, opaque items keep scene order and blended items are
    /// still drawn after opaque ones, but neither bucket is sorted.
    pub sort_objects: bool,
    pub auto_clear_color: bool,
    pub auto_clear_depth: bool,
    pub auto_clear_stencil: bool,
    pub clear_color: [f32; 3],
    pub clear_alpha: f32,

    /// Programs compile without blocking; draws using a program that is not
    /// ready yet are skipped for that frame.
    pub async_compile: bool,
    pub light_uniform_block: bool,
    pub physically_correct_lights: bool,

    pub clipping_planes: Vec<Vec4>,
    pub local_clipping_enabled: bool,

    pub precision: Precision,
    pub pixel_ratio: f32,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            output_color_space: ColorSpace::Srgb,
            tone_mapping: ToneMapping::None,
            tone_mapping_exposure: 1.0,
            color_management: ColorManagement::default(),
            shadows: ShadowSettings::default(),
            sort_objects: true,
            auto_clear_color: true,
            auto_clear_depth: true,
            auto_clear_stencil: true,
            clear_color: [0.0, 0.0, 0.0],
            clear_alpha: 1.0,
            async_compile: false,
            light_uniform_block: true,
            physically_correct_lights: true,
            clipping_planes: Vec::new(),
            local_clipping_enabled: false,
            precision: Precision::High,
            pixel_ratio: 1.0,
        }
    }
}
