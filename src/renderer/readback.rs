//! Asynchronous pixel readback.
//!
//! A request copies a rectangle of the bound framebuffer into a pixel-pack
//! buffer and drops a fence behind it. Polling never blocks: the data is
//! fetched only once the fence has signaled.

use slotmap::{SlotMap, new_key_type};

use crate::renderer::device::{
    BufferId, BufferKind, BufferUsageHint, DeviceError, FenceId, FenceStatus, GpuDevice, Rect,
};

new_key_type! {
    pub struct ReadbackHandle;
}

#[derive(Debug, Clone, Copy)]
struct PendingReadback {
    buffer: BufferId,
    fence: FenceId,
    len: usize,
}

#[derive(Debug, Default)]
pub struct Readbacks {
    pending: SlotMap<ReadbackHandle, PendingReadback>,
}

impl Readbacks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    #[must_use]
    pub fn contains(&self, handle: ReadbackHandle) -> bool {
        self.pending.contains_key(handle)
    }

    /// Queues an RGBA8 copy of `rect` from the bound framebuffer.
    pub fn request<D: GpuDevice + ?Sized>(&mut self, device: &mut D, rect: Rect) -> Result<ReadbackHandle, DeviceError> {
        let len = rect.width as usize * rect.height as usize * 4;
        let buffer = device.create_buffer(BufferKind::PixelPack)?;
        let queued = device
            .buffer_data(buffer, BufferKind::PixelPack, &vec![0; len], BufferUsageHint::StreamRead)
            .and_then(|()| device.read_pixels_to_buffer(rect, buffer))
            .and_then(|()| device.fence());
        let fence = match queued {
            Ok(fence) => fence,
            Err(err) => {
                device.delete_buffer(buffer);
                return Err(err);
            }
        };
        device.flush();
        log::debug!("Queued readback of {}x{} pixels", rect.width, rect.height);
        Ok(self.pending.insert(PendingReadback { buffer, fence, len }))
    }

    /// `Ok(None)` while the GPU is still working, the pixels once the fence
    /// has signaled. A finished request is forgotten.
    pub fn poll<D: GpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        handle: ReadbackHandle,
    ) -> Result<Option<Vec<u8>>, DeviceError> {
        let Some(&pending) = self.pending.get(handle) else {
            return Ok(None);
        };
        if device.fence_status(pending.fence) == FenceStatus::Pending {
            return Ok(None);
        }
        self.pending.remove(handle);
        let mut out = vec![0; pending.len];
        let fetched = device.get_buffer_data(pending.buffer, &mut out);
        device.delete_fence(pending.fence);
        device.delete_buffer(pending.buffer);
        fetched?;
        Ok(Some(out))
    }

    /// Drops every request without touching the device. Used after a
    /// context loss, when the buffers and fences no longer exist.
    pub fn invalidate(&mut self) {
        if !self.pending.is_empty() {
            log::warn!("Dropping {} pending readbacks after context loss", self.pending.len());
        }
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::device::RecordingDevice;

    #[test]
    fn data_arrives_after_the_fence() {
        let mut device = RecordingDevice::new();
        device.set_fence_latency(2);
        let mut readbacks = Readbacks::new();
        let handle = readbacks.request(&mut device, Rect::new(0, 0, 4, 2)).unwrap();

        assert_eq!(readbacks.poll(&mut device, handle).unwrap(), None);
        let mut pixels = None;
        for _ in 0..4 {
            pixels = readbacks.poll(&mut device, handle).unwrap();
            if pixels.is_some() {
                break;
            }
        }
        assert_eq!(pixels.map(|p| p.len()), Some(4 * 2 * 4));
        assert!(!readbacks.contains(handle));
        assert_eq!(device.live_buffers(), 0);
    }
}
