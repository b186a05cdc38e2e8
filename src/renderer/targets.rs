//! Offscreen render targets
//!
//! A target owns its color texture and, when requested, its depth texture.
//! Framebuffers are created per `(face, mip level)` on first bind. After a
//! context loss only the descriptors survive; device objects are recreated
//! the next time the target is bound.

use rustc_hash::FxHashMap;
use slotmap::{SlotMap, new_key_type};

use crate::renderer::device::{
    DeviceError, FramebufferDesc, FramebufferId, GpuDevice, TextureAttachment, TextureDesc, TextureId,
};
use crate::renderer::state::StateTracker;
use crate::resources::color::ColorSpace;
use crate::resources::render_target::{DepthAttachment, RenderTargetDescriptor};
use crate::resources::texture::{Sampler, TextureFormat, TextureKind};
use crate::utils::WarnOnce;

new_key_type! {
    pub struct RenderTargetHandle;
}

#[derive(Debug)]
struct GpuRenderTarget {
    desc: RenderTargetDescriptor,
    color: Option<TextureId>,
    depth: Option<TextureId>,
    framebuffers: FxHashMap<(u32, u32), FramebufferId>,
}

impl GpuRenderTarget {
    fn release<D: GpuDevice + ?Sized>(&mut self, device: &mut D, tracker: &mut StateTracker) {
        for (_, framebuffer) in self.framebuffers.drain() {
            tracker.forget_framebuffer(framebuffer);
            device.delete_framebuffer(framebuffer);
        }
        for texture in self.color.take().into_iter().chain(self.depth.take()) {
            tracker.forget_texture(texture);
            device.delete_texture(texture);
        }
    }
}

#[derive(Debug, Default)]
pub struct RenderTargets {
    targets: SlotMap<RenderTargetHandle, GpuRenderTarget>,
    warnings: WarnOnce,
}

impl RenderTargets {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    #[must_use]
    pub fn contains(&self, handle: RenderTargetHandle) -> bool {
        self.targets.contains_key(handle)
    }

    /// Registers a target. Device objects are created on first bind.
    pub fn create(&mut self, desc: RenderTargetDescriptor) -> RenderTargetHandle {
        if desc.samples > 0 {
            self.warnings
                .warn("Multisampled render targets are rendered single-sampled");
        }
        self.targets.insert(GpuRenderTarget {
            desc,
            color: None,
            depth: None,
            framebuffers: FxHashMap::default(),
        })
    }

    #[must_use]
    pub fn descriptor(&self, handle: RenderTargetHandle) -> Option<&RenderTargetDescriptor> {
        self.targets.get(handle).map(|t| &t.desc)
    }

    /// Pixel size of mip `level`.
    #[must_use]
    pub fn size(&self, handle: RenderTargetHandle, level: u32) -> Option<(u32, u32)> {
        let desc = self.descriptor(handle)?;
        Some(((desc.width >> level).max(1), (desc.height >> level).max(1)))
    }

    #[must_use]
    pub fn color_texture(&self, handle: RenderTargetHandle) -> Option<TextureId> {
        self.targets.get(handle).and_then(|t| t.color)
    }

    #[must_use]
    pub fn depth_texture(&self, handle: RenderTargetHandle) -> Option<TextureId> {
        self.targets.get(handle).and_then(|t| t.depth)
    }

    /// Framebuffer drawing into `face` / `level` of the target, allocating
    /// textures and the framebuffer on first use.
    pub fn framebuffer<D: GpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        handle: RenderTargetHandle,
        face: u32,
        level: u32,
    ) -> Result<Option<FramebufferId>, DeviceError> {
        let Some(target) = self.targets.get_mut(handle) else {
            return Ok(None);
        };
        let desc = &target.desc;
        let face = if desc.kind == TextureKind::Cube { face.min(5) } else { 0 };
        let level = level.min(desc.mip_count() - 1);
        if let Some(&framebuffer) = target.framebuffers.get(&(face, level)) {
            return Ok(Some(framebuffer));
        }

        if target.color.is_none()
            && let Some(format) = desc.color_format
        {
            let color = TextureDesc {
                kind: desc.kind,
                width: desc.width,
                height: desc.height,
                format,
                mip_levels: desc.mip_count(),
                sampler: desc.sampler,
                srgb: desc.color_space == ColorSpace::Srgb && format == TextureFormat::Rgba8,
            };
            let id = device.create_texture(&color)?;
            for f in 0..desc.face_count() {
                device.upload_texture(id, &color, f, 0, None)?;
            }
            target.color = Some(id);
        }

        if target.depth.is_none() && desc.depth != DepthAttachment::None {
            let format = match desc.depth {
                DepthAttachment::DepthStencil => TextureFormat::Depth24Stencil8,
                _ => TextureFormat::Depth24,
            };
            let depth = TextureDesc {
                kind: TextureKind::D2,
                width: desc.width,
                height: desc.height,
                format,
                mip_levels: 1,
                sampler: Sampler::default(),
                srgb: false,
            };
            let id = device.create_texture(&depth)?;
            device.upload_texture(id, &depth, 0, 0, None)?;
            target.depth = Some(id);
        }

        let framebuffer = device.create_framebuffer(&FramebufferDesc {
            color: target.color.map(|texture| TextureAttachment { texture, kind: desc.kind, face, level }),
            // Depth only matches the base level.
            depth: target
                .depth
                .filter(|_| level == 0)
                .map(|texture| TextureAttachment { texture, kind: TextureKind::D2, face: 0, level: 0 }),
            stencil: desc.depth == DepthAttachment::DepthStencil,
        })?;
        log::debug!(
            "Created framebuffer for {:?} target {}x{} (face {face}, level {level})",
            desc.kind,
            desc.width,
            desc.height
        );
        target.framebuffers.insert((face, level), framebuffer);
        Ok(Some(framebuffer))
    }

    /// Regenerates the mip chain of the color texture, if the target has one.
    pub fn generate_mipmaps<D: GpuDevice + ?Sized>(&mut self, device: &mut D, handle: RenderTargetHandle) -> Result<(), DeviceError> {
        let Some(target) = self.targets.get(handle) else {
            return Ok(());
        };
        if let Some(color) = target.color
            && target.desc.mip_count() > 1
        {
            device.generate_mipmaps(color, target.desc.kind)?;
        }
        Ok(())
    }

    pub fn dispose<D: GpuDevice + ?Sized>(&mut self, device: &mut D, tracker: &mut StateTracker, handle: RenderTargetHandle) -> bool {
        let Some(mut target) = self.targets.remove(handle) else {
            return false;
        };
        target.release(device, tracker);
        true
    }

    /// Context loss: keep descriptors, forget device ids.
    pub fn invalidate(&mut self) {
        for (_, target) in &mut self.targets {
            target.color = None;
            target.depth = None;
            target.framebuffers.clear();
        }
        self.warnings.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::device::RecordingDevice;

    #[test]
    fn framebuffers_are_created_per_face_once() {
        let mut device = RecordingDevice::new();
        let mut targets = RenderTargets::new();
        let cube = targets.create(RenderTargetDescriptor::cube(64));

        let a = targets.framebuffer(&mut device, cube, 2, 0).unwrap();
        let b = targets.framebuffer(&mut device, cube, 2, 0).unwrap();
        let c = targets.framebuffer(&mut device, cube, 3, 0).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        // One cube color texture plus one depth texture.
        assert_eq!(device.live_textures(), 2);
    }

    #[test]
    fn invalidated_targets_recreate_lazily() {
        let mut device = RecordingDevice::new();
        let mut tracker = StateTracker::new(device.capabilities());
        let mut targets = RenderTargets::new();
        let handle = targets.create(RenderTargetDescriptor::new(32, 16));
        targets.framebuffer(&mut device, handle, 0, 0).unwrap();

        device.lose_context();
        device.restore_context();
        targets.invalidate();
        assert!(targets.color_texture(handle).is_none());

        assert!(targets.framebuffer(&mut device, handle, 0, 0).unwrap().is_some());
        assert!(targets.color_texture(handle).is_some());
        assert_eq!(targets.size(handle, 1), Some((16, 8)));

        assert!(targets.dispose(&mut device, &mut tracker, handle));
        assert_eq!(device.live_textures(), 0);
    }
}
