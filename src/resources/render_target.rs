//! Offscreen render target descriptions.
//!
//! The renderer allocates the GPU side through
//! [`Renderer::create_render_target`](crate::renderer::Renderer::create_render_target).
//! A target owns its color attachment and, when requested, its depth texture;
//! nothing points back from the depth texture to the target.

use crate::resources::color::ColorSpace;
use crate::resources::texture::{Sampler, TextureFormat, TextureKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DepthAttachment {
    None,
    /// Renderbuffer, not sampleable.
    #[default]
    Depth,
    DepthStencil,
    /// Sampleable depth texture.
    DepthTexture,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderTargetDescriptor {
    pub width: u32,
    pub height: u32,
    pub kind: TextureKind,
    /// `None` makes a depth-only target.
    pub color_format: Option<TextureFormat>,
    pub depth: DepthAttachment,
    pub samples: u32,
    pub generate_mipmaps: bool,
    pub color_space: ColorSpace,
    pub sampler: Sampler,
}

impl RenderTargetDescriptor {
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            kind: TextureKind::D2,
            color_format: Some(TextureFormat::Rgba8),
            depth: DepthAttachment::Depth,
            samples: 0,
            generate_mipmaps: false,
            color_space: ColorSpace::Linear,
            sampler: Sampler {
                min_filter: crate::resources::texture::FilterMode::Linear,
                ..Sampler::default()
            },
        }
    }

    #[must_use]
    pub fn cube(size: u32) -> Self {
        Self {
            kind: TextureKind::Cube,
            ..Self::new(size, size)
        }
    }

    /// Depth-only 2D target, as used for shadow maps.
    #[must_use]
    pub fn depth_only(width: u32, height: u32) -> Self {
        Self {
            color_format: None,
            depth: DepthAttachment::DepthTexture,
            ..Self::new(width, height)
        }
    }

    #[must_use]
    pub fn face_count(&self) -> u32 {
        match self.kind {
            TextureKind::D2 => 1,
            TextureKind::Cube => 6,
        }
    }

    #[must_use]
    pub fn mip_count(&self) -> u32 {
        if self.generate_mipmaps {
            32 - self.width.max(self.height).max(1).leading_zeros()
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_count_follows_largest_side() {
        let mut desc = RenderTargetDescriptor::new(256, 64);
        assert_eq!(desc.mip_count(), 1);
        desc.generate_mipmaps = true;
        assert_eq!(desc.mip_count(), 9);
    }
}
