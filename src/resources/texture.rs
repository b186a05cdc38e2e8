//! CPU-side texture descriptions.
//!
//! A [`Texture`] owns its texel data and sampler settings. The renderer's
//! texture manager creates the GPU object lazily and re-uploads whenever
//! [`Texture::version`] moves.

use crate::resources::color::ColorSpace;
use crate::resources::version_tracker::{ChangeTracker, next_resource_id};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureKind {
    #[default]
    D2,
    Cube,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureFormat {
    #[default]
    Rgba8,
    Rgb8,
    R8,
    Rgba16Float,
    Rgba32Float,
    Depth24,
    Depth24Stencil8,
}

impl TextureFormat {
    #[must_use]
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::R8 => 1,
            Self::Rgb8 => 3,
            Self::Rgba8 | Self::Depth24 | Self::Depth24Stencil8 => 4,
            Self::Rgba16Float => 8,
            Self::Rgba32Float => 16,
        }
    }

    #[must_use]
    pub fn is_depth(self) -> bool {
        matches!(self, Self::Depth24 | Self::Depth24Stencil8)
    }

    #[must_use]
    pub fn is_float(self) -> bool {
        matches!(self, Self::Rgba16Float | Self::Rgba32Float)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    Nearest,
    #[default]
    Linear,
    NearestMipmapNearest,
    LinearMipmapLinear,
}

impl FilterMode {
    #[must_use]
    pub fn uses_mipmaps(self) -> bool {
        matches!(self, Self::NearestMipmapNearest | Self::LinearMipmapLinear)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WrapMode {
    Repeat,
    #[default]
    ClampToEdge,
    MirroredRepeat,
}

/// How a texture is sampled when used as an environment map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureMapping {
    #[default]
    Uv,
    CubeReflection,
    CubeRefraction,
    EquirectangularReflection,
    /// Prefiltered cube-UV atlas; needs explicit-LOD sampling in the shader.
    CubeUv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sampler {
    pub mag_filter: FilterMode,
    pub min_filter: FilterMode,
    pub wrap_s: WrapMode,
    pub wrap_t: WrapMode,
    pub anisotropy: u8,
}

impl Default for Sampler {
    fn default() -> Self {
        Self {
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::LinearMipmapLinear,
            wrap_s: WrapMode::ClampToEdge,
            wrap_t: WrapMode::ClampToEdge,
            anisotropy: 1,
        }
    }
}

#[derive(Debug)]
pub struct Texture {
    id: u64,
    pub name: String,
    pub kind: TextureKind,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub color_space: ColorSpace,
    pub sampler: Sampler,
    pub mapping: TextureMapping,
    pub generate_mipmaps: bool,
    pub flip_y: bool,
    /// Tightly packed texels; cube faces are stored +X, -X, +Y, -Y, +Z, -Z.
    data: Option<Vec<u8>>,
    version: ChangeTracker,
}

impl Clone for Texture {
    fn clone(&self) -> Self {
        Self {
            id: next_resource_id(),
            name: self.name.clone(),
            kind: self.kind,
            width: self.width,
            height: self.height,
            format: self.format,
            color_space: self.color_space,
            sampler: self.sampler,
            mapping: self.mapping,
            generate_mipmaps: self.generate_mipmaps,
            flip_y: self.flip_y,
            data: self.data.clone(),
            version: ChangeTracker::new(),
        }
    }
}

impl Texture {
    #[must_use]
    pub fn new_2d(width: u32, height: u32, format: TextureFormat, data: Option<Vec<u8>>) -> Self {
        Self {
            id: next_resource_id(),
            name: String::new(),
            kind: TextureKind::D2,
            width,
            height,
            format,
            color_space: ColorSpace::Srgb,
            sampler: Sampler::default(),
            mapping: TextureMapping::Uv,
            generate_mipmaps: true,
            flip_y: false,
            data,
            version: ChangeTracker::new(),
        }
    }

    #[must_use]
    pub fn new_cube(size: u32, format: TextureFormat, faces: Option<Vec<u8>>) -> Self {
        Self {
            kind: TextureKind::Cube,
            mapping: TextureMapping::CubeReflection,
            ..Self::new_2d(size, size, format, faces)
        }
    }

    /// A 1×1 texture holding a single RGBA value.
    #[must_use]
    pub fn solid(rgba: [u8; 4]) -> Self {
        let mut tex = Self::new_2d(1, 1, TextureFormat::Rgba8, Some(rgba.to_vec()));
        tex.color_space = ColorSpace::Linear;
        tex.generate_mipmaps = false;
        tex.sampler.min_filter = FilterMode::Nearest;
        tex.sampler.mag_filter = FilterMode::Nearest;
        tex.name = "solid".into();
        tex
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_color_space(mut self, color_space: ColorSpace) -> Self {
        self.color_space = color_space;
        self
    }

    #[must_use]
    pub fn with_mapping(mut self, mapping: TextureMapping) -> Self {
        self.mapping = mapping;
        self
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version.version()
    }

    #[must_use]
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    #[must_use]
    pub fn face_count(&self) -> usize {
        match self.kind {
            TextureKind::D2 => 1,
            TextureKind::Cube => 6,
        }
    }

    /// Expected byte length of the full texel payload.
    #[must_use]
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel() * self.face_count()
    }

    /// Replaces texel data and schedules a re-upload.
    pub fn set_data(&mut self, data: Vec<u8>) {
        self.data = Some(data);
        self.version.changed();
    }

    /// Schedules a re-upload after sampler or size changes.
    pub fn needs_update(&mut self) {
        self.version.changed();
    }

    /// Texel data is present and has the length its size and format imply.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.data.as_ref().is_some_and(|d| d.len() == self.expected_len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solid_texture_is_complete() {
        let tex = Texture::solid([255, 255, 255, 255]);
        assert!(tex.is_complete());
        assert_eq!(tex.expected_len(), 4);
    }

    #[test]
    fn cube_expects_six_faces() {
        let tex = Texture::new_cube(2, TextureFormat::Rgba8, Some(vec![0; 2 * 2 * 4 * 6]));
        assert!(tex.is_complete());
        assert_eq!(tex.mapping, TextureMapping::CubeReflection);
    }

    #[test]
    fn set_data_bumps_version() {
        let mut tex = Texture::new_2d(1, 1, TextureFormat::R8, None);
        assert!(!tex.is_complete());
        tex.set_data(vec![7]);
        assert_eq!(tex.version(), 1);
        assert!(tex.is_complete());
    }
}
