//! GPU texture residency
//!
//! Maps CPU [`Texture`] ids to device textures. A texture is uploaded the
//! first time a draw samples it and re-uploaded whenever its version moves.
//! Missing or incomplete textures resolve to a 1×1 placeholder of the
//! sampler's kind so a draw never samples an unbound unit.

use rustc_hash::FxHashMap;

use crate::renderer::device::{DeviceError, GpuDevice, TextureDesc, TextureId};
use crate::resources::assets::{Assets, TextureHandle};
use crate::resources::color::ColorSpace;
use crate::resources::texture::{Sampler, Texture, TextureFormat, TextureKind};
use crate::utils::WarnOnce;

#[derive(Debug, Clone, Copy)]
struct GpuTexture {
    id: TextureId,
    version: u64,
    kind: TextureKind,
    /// Cleared when the last upload failed; sampling uses the placeholder
    /// until the texture changes again.
    valid: bool,
}

#[derive(Debug, Default)]
pub struct TextureManager {
    textures: FxHashMap<u64, GpuTexture>,
    placeholder_2d: Option<TextureId>,
    placeholder_cube: Option<TextureId>,
    warnings: WarnOnce,
}

/// Device description of a CPU texture.
#[must_use]
pub fn texture_desc(texture: &Texture) -> TextureDesc {
    let mip_levels = if texture.generate_mipmaps && texture.sampler.min_filter.uses_mipmaps() {
        32 - texture.width.max(texture.height).max(1).leading_zeros()
    } else {
        1
    };
    TextureDesc {
        kind: texture.kind,
        width: texture.width,
        height: texture.height,
        format: texture.format,
        mip_levels,
        sampler: texture.sampler,
        srgb: texture.color_space == ColorSpace::Srgb && texture.format == TextureFormat::Rgba8,
    }
}

impl TextureManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of resident scene textures (placeholders excluded).
    #[must_use]
    pub fn len(&self) -> usize {
        self.textures.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    /// Device texture for `handle`, uploading it if needed. Anything that
    /// cannot be sampled as `kind` yields the placeholder.
    pub fn resolve<D: GpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        assets: &Assets,
        handle: Option<TextureHandle>,
        kind: TextureKind,
    ) -> Result<TextureId, DeviceError> {
        let Some(handle) = handle else {
            return self.placeholder(device, kind);
        };
        let Some(texture) = assets.texture(handle) else {
            self.warnings.warn(&format!("Texture {handle:?} is not in the asset store; using placeholder"));
            return self.placeholder(device, kind);
        };
        if texture.kind != kind {
            self.warnings.warn(&format!(
                "Texture '{}' is {:?} but sampled as {kind:?}; using placeholder",
                texture.name, texture.kind
            ));
            return self.placeholder(device, kind);
        }
        if !texture.is_complete() && !texture.format.is_depth() {
            self.warnings.warn(&format!(
                "Texture '{}' has no complete texel data ({} bytes expected); using placeholder",
                texture.name,
                texture.expected_len()
            ));
            return self.placeholder(device, kind);
        }

        match self.textures.get(&texture.id()).copied() {
            Some(gpu) if gpu.version == texture.version() => {
                if gpu.valid { Ok(gpu.id) } else { self.placeholder(device, kind) }
            }
            Some(gpu) => {
                let result = upload(device, gpu.id, texture);
                if let Some(entry) = self.textures.get_mut(&texture.id()) {
                    entry.version = texture.version();
                    entry.valid = result.is_ok();
                }
                match result {
                    Ok(()) => Ok(gpu.id),
                    Err(DeviceError::ContextLost) => Err(DeviceError::ContextLost),
                    Err(err) => {
                        self.warnings
                            .warn(&format!("Texture '{}' re-upload failed ({err}); using placeholder", texture.name));
                        self.placeholder(device, kind)
                    }
                }
            }
            None => match self.create(device, texture) {
                Ok(id) => Ok(id),
                Err(DeviceError::ContextLost) => Err(DeviceError::ContextLost),
                Err(err) => {
                    self.warnings.warn(&format!("Texture '{}' upload failed ({err}); using placeholder", texture.name));
                    self.placeholder(device, kind)
                }
            },
        }
    }

    fn create<D: GpuDevice + ?Sized>(&mut self, device: &mut D, texture: &Texture) -> Result<TextureId, DeviceError> {
        let id = device.create_texture(&texture_desc(texture))?;
        if let Err(err) = upload(device, id, texture) {
            device.delete_texture(id);
            return Err(err);
        }
        log::debug!("Uploaded texture '{}' ({}x{} {:?})", texture.name, texture.width, texture.height, texture.format);
        self.textures.insert(
            texture.id(),
            GpuTexture { id, version: texture.version(), kind: texture.kind, valid: true },
        );
        Ok(id)
    }

    /// 1×1 white 2D texture or cube, created on first use.
    pub fn placeholder<D: GpuDevice + ?Sized>(&mut self, device: &mut D, kind: TextureKind) -> Result<TextureId, DeviceError> {
        let slot = match kind {
            TextureKind::D2 => &mut self.placeholder_2d,
            TextureKind::Cube => &mut self.placeholder_cube,
        };
        if let Some(id) = *slot {
            return Ok(id);
        }
        let desc = TextureDesc {
            kind,
            width: 1,
            height: 1,
            format: TextureFormat::Rgba8,
            mip_levels: 1,
            sampler: Sampler::default(),
            srgb: false,
        };
        let id = device.create_texture(&desc)?;
        let faces = match kind {
            TextureKind::D2 => 1,
            TextureKind::Cube => 6,
        };
        for face in 0..faces {
            device.upload_texture(id, &desc, face, 0, Some(&[255, 255, 255, 255]))?;
        }
        *slot = Some(id);
        Ok(id)
    }

    /// Deletes the device texture of CPU texture `id`.
    pub fn dispose<D: GpuDevice + ?Sized>(&mut self, device: &mut D, id: u64) -> Option<TextureId> {
        let gpu = self.textures.remove(&id)?;
        device.delete_texture(gpu.id);
        log::debug!("Disposed {:?} texture {}", gpu.kind, gpu.id.0);
        Some(gpu.id)
    }

    /// Context loss: every device id is stale.
    pub fn invalidate(&mut self) {
        self.textures.clear();
        self.placeholder_2d = None;
        self.placeholder_cube = None;
        self.warnings.clear();
    }
}

fn upload<D: GpuDevice + ?Sized>(device: &mut D, id: TextureId, texture: &Texture) -> Result<(), DeviceError> {
    let desc = texture_desc(texture);
    let faces = texture.face_count();
    match texture.data() {
        Some(data) if texture.is_complete() => {
            let face_len = data.len() / faces;
            for (face, chunk) in data.chunks_exact(face_len.max(1)).enumerate().take(faces) {
                device.upload_texture(id, &desc, face as u32, 0, Some(chunk))?;
            }
        }
        _ => {
            for face in 0..faces {
                device.upload_texture(id, &desc, face as u32, 0, None)?;
            }
        }
    }
    if desc.mip_levels > 1 {
        device.generate_mipmaps(id, texture.kind)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::device::{Command, RecordingDevice};

    #[test]
    fn uploads_once_per_version() {
        let mut device = RecordingDevice::new();
        let mut assets = Assets::new();
        let handle = assets.add_texture(Texture::solid([10, 20, 30, 255]));
        let mut textures = TextureManager::new();

        let a = textures.resolve(&mut device, &assets, Some(handle), TextureKind::D2).unwrap();
        let b = textures.resolve(&mut device, &assets, Some(handle), TextureKind::D2).unwrap();
        assert_eq!(a, b);
        let uploads = |d: &RecordingDevice| {
            d.log().commands().iter().filter(|c| matches!(c, Command::UploadTexture { .. })).count()
        };
        assert_eq!(uploads(&device), 1);

        assets.texture_mut(handle).unwrap().set_data(vec![0, 0, 0, 255]);
        let c = textures.resolve(&mut device, &assets, Some(handle), TextureKind::D2).unwrap();
        assert_eq!(a, c);
        assert_eq!(uploads(&device), 2);
    }

    #[test]
    fn incomplete_and_mismatched_textures_fall_back() {
        let mut device = RecordingDevice::new();
        let mut assets = Assets::new();
        let empty = assets.add_texture(Texture::new_2d(4, 4, TextureFormat::Rgba8, None));
        let flat = assets.add_texture(Texture::solid([255; 4]));
        let mut textures = TextureManager::new();

        let placeholder = textures.placeholder(&mut device, TextureKind::D2).unwrap();
        assert_eq!(textures.resolve(&mut device, &assets, Some(empty), TextureKind::D2).unwrap(), placeholder);

        let cube = textures.resolve(&mut device, &assets, Some(flat), TextureKind::Cube).unwrap();
        assert_ne!(cube, placeholder);
        assert_eq!(textures.len(), 0);
    }

    #[test]
    fn dispose_deletes_device_texture() {
        let mut device = RecordingDevice::new();
        let mut assets = Assets::new();
        let handle = assets.add_texture(Texture::solid([1, 2, 3, 4]));
        let mut textures = TextureManager::new();
        textures.resolve(&mut device, &assets, Some(handle), TextureKind::D2).unwrap();
        let live = device.live_textures();

        let id = assets.texture(handle).unwrap().id();
        assert!(textures.dispose(&mut device, id).is_some());
        assert_eq!(device.live_textures(), live - 1);
        assert!(textures.dispose(&mut device, id).is_none());
    }

    #[test]
    fn failed_reupload_falls_back_until_next_change() {
        let mut device = RecordingDevice::new();
        let mut assets = Assets::new();
        let handle = assets.add_texture(Texture::new_2d(2, 2, TextureFormat::Rgba8, Some(vec![9; 16])));
        let mut textures = TextureManager::new();
        let resident = textures.resolve(&mut device, &assets, Some(handle), TextureKind::D2).unwrap();

        device.limit_texture_uploads(Some(4));
        assets.texture_mut(handle).unwrap().set_data(vec![7; 16]);
        let fallback = textures.resolve(&mut device, &assets, Some(handle), TextureKind::D2).unwrap();
        assert_ne!(fallback, resident);
        assert_eq!(fallback, textures.placeholder(&mut device, TextureKind::D2).unwrap());
        // No retry until the texture changes again.
        assert_eq!(textures.resolve(&mut device, &assets, Some(handle), TextureKind::D2).unwrap(), fallback);

        device.limit_texture_uploads(None);
        assets.texture_mut(handle).unwrap().set_data(vec![5; 16]);
        assert_eq!(textures.resolve(&mut device, &assets, Some(handle), TextureKind::D2).unwrap(), resident);
    }
}
