//! Fixed-function render state carried by every material.
//!
//! These enums are also the vocabulary of the GPU command interface, so the
//! state tracker can diff them directly.

use glam::Vec4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Side {
    #[default]
    Front,
    Back,
    Double,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompareFunc {
    Never,
    Less,
    Equal,
    #[default]
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendEquation {
    #[default]
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
    DstColor,
    OneMinusDstColor,
    SrcAlphaSaturate,
    ConstantColor,
    OneMinusConstantColor,
}

/// Separate RGB / alpha blend configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendState {
    pub equation: BlendEquation,
    pub equation_alpha: BlendEquation,
    pub src: BlendFactor,
    pub dst: BlendFactor,
    pub src_alpha: BlendFactor,
    pub dst_alpha: BlendFactor,
}

impl BlendState {
    #[must_use]
    pub const fn new(src: BlendFactor, dst: BlendFactor) -> Self {
        Self {
            equation: BlendEquation::Add,
            equation_alpha: BlendEquation::Add,
            src,
            dst,
            src_alpha: src,
            dst_alpha: dst,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Blending {
    None,
    #[default]
    Normal,
    Additive,
    Subtractive,
    Multiply,
    Custom {
        state: BlendState,
        /// Only read when a factor references the constant color.
        constant: [f32; 4],
    },
}

impl Blending {
    /// Resolves a preset into explicit factors. `None` disables blending.
    #[must_use]
    pub fn resolve(&self, premultiplied_alpha: bool) -> Option<BlendState> {
        use BlendFactor as F;
        let state = match *self {
            Self::None => return None,
            Self::Normal if premultiplied_alpha => BlendState {
                src_alpha: F::One,
                dst_alpha: F::OneMinusSrcAlpha,
                ..BlendState::new(F::One, F::OneMinusSrcAlpha)
            },
            Self::Normal => BlendState {
                src_alpha: F::One,
                dst_alpha: F::OneMinusSrcAlpha,
                ..BlendState::new(F::SrcAlpha, F::OneMinusSrcAlpha)
            },
            Self::Additive if premultiplied_alpha => BlendState::new(F::One, F::One),
            Self::Additive => BlendState {
                src_alpha: F::One,
                dst_alpha: F::One,
                ..BlendState::new(F::SrcAlpha, F::One)
            },
            Self::Subtractive => BlendState {
                src_alpha: F::Zero,
                dst_alpha: F::One,
                ..BlendState::new(F::Zero, F::OneMinusSrcColor)
            },
            Self::Multiply => BlendState {
                src_alpha: F::Zero,
                dst_alpha: F::SrcAlpha,
                ..BlendState::new(F::Zero, F::SrcColor)
            },
            Self::Custom { state, .. } => state,
        };
        Some(state)
    }

    #[must_use]
    pub fn constant_color(&self) -> Option<[f32; 4]> {
        match self {
            Self::Custom { constant, .. } => Some(*constant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StencilOp {
    #[default]
    Keep,
    Zero,
    Replace,
    Increment,
    IncrementWrap,
    Decrement,
    DecrementWrap,
    Invert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StencilState {
    pub enabled: bool,
    pub func: CompareFunc,
    pub reference: i32,
    pub func_mask: u32,
    pub write_mask: u32,
    pub fail: StencilOp,
    pub z_fail: StencilOp,
    pub z_pass: StencilOp,
}

impl Default for StencilState {
    fn default() -> Self {
        Self {
            enabled: false,
            func: CompareFunc::Always,
            reference: 0,
            func_mask: 0xff,
            write_mask: 0xff,
            fail: StencilOp::Keep,
            z_fail: StencilOp::Keep,
            z_pass: StencilOp::Keep,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolygonOffset {
    pub factor: f32,
    pub units: f32,
}

/// Render state shared by every material kind.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialCommon {
    pub side: Side,
    /// Face culled in the shadow pass; `None` mirrors `side`.
    pub shadow_side: Option<Side>,
    pub blending: Blending,
    pub transparent: bool,
    pub opacity: f32,
    /// Fragments with alpha below this are discarded; 0 disables the test.
    pub alpha_test: f32,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_func: CompareFunc,
    pub color_write: bool,
    pub stencil: StencilState,
    pub polygon_offset: Option<PolygonOffset>,
    pub alpha_to_coverage: bool,
    pub premultiplied_alpha: bool,
    pub vertex_colors: bool,
    pub flat_shading: bool,
    pub fog: bool,
    pub tone_mapped: bool,
    /// World-space planes `(normal, constant)`.
    pub clipping_planes: Vec<Vec4>,
    pub clip_intersection: bool,
    pub clip_shadows: bool,
    pub wireframe: bool,
    pub visible: bool,
}

impl Default for MaterialCommon {
    fn default() -> Self {
        Self {
            side: Side::Front,
            shadow_side: None,
            blending: Blending::Normal,
            transparent: false,
            opacity: 1.0,
            alpha_test: 0.0,
            depth_test: true,
            depth_write: true,
            depth_func: CompareFunc::LessEqual,
            color_write: true,
            stencil: StencilState::default(),
            polygon_offset: None,
            alpha_to_coverage: false,
            premultiplied_alpha: false,
            vertex_colors: false,
            flat_shading: false,
            fog: true,
            tone_mapped: true,
            clipping_planes: Vec::new(),
            clip_intersection: false,
            clip_shadows: false,
            wireframe: false,
            visible: true,
        }
    }
}

impl MaterialCommon {
    /// Blending only applies to transparent materials.
    #[must_use]
    pub fn effective_blend(&self) -> Option<BlendState> {
        if self.transparent {
            self.blending.resolve(self.premultiplied_alpha)
        } else {
            None
        }
    }

    #[must_use]
    pub fn effective_shadow_side(&self) -> Side {
        self.shadow_side.unwrap_or(self.side)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opaque_materials_never_blend() {
        let common = MaterialCommon::default();
        assert!(common.effective_blend().is_none());
        let transparent = MaterialCommon {
            transparent: true,
            ..Default::default()
        };
        let blend = transparent.effective_blend().unwrap();
        assert_eq!(blend.src, BlendFactor::SrcAlpha);
        assert_eq!(blend.dst, BlendFactor::OneMinusSrcAlpha);
    }

    #[test]
    fn premultiplied_normal_uses_one() {
        let blend = Blending::Normal.resolve(true).unwrap();
        assert_eq!(blend.src, BlendFactor::One);
    }
}
