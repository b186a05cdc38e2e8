//! std140 light uniform block
//!
//! Packs the light aggregate into one uniform buffer bound at
//! [`LIGHT_BLOCK_BINDING`]. The CPU copy is kept between frames and only the
//! byte range that actually changed is re-uploaded.
//!
//! std140 rules used here:
//!
//! | Type    | Base alignment | Size | Array stride |
//! |---------|----------------|------|--------------|
//! | `float` | 4              | 4    | 16           |
//! | `vec2`  | 8              | 8    | 16           |
//! | `vec3`  | 16             | 12   | 16           |
//! | `vec4`  | 16             | 16   | 16           |
//! | `mat4`  | 16             | 64   | 64           |

use smallvec::SmallVec;

use crate::renderer::device::{BufferId, BufferKind, BufferUsageHint, DeviceError, GpuDevice, UniformType};
use crate::renderer::lights::{LIGHT_BLOCK_BINDING, LightCounts, LightMember, LightState, light_members};
use crate::renderer::state::StateTracker;

/// Placement of one member inside the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberLayout {
    pub offset: usize,
    /// Bytes between array elements; equals the padded size for non-arrays.
    pub stride: usize,
    /// Scalars written per element.
    pub components: usize,
    pub elements: usize,
}

fn align_up(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}

fn base_alignment(ty: UniformType) -> usize {
    match ty {
        UniformType::Vec2 => 8,
        UniformType::Vec3 | UniformType::Vec4 | UniformType::Mat3 | UniformType::Mat4 => 16,
        _ => 4,
    }
}

fn scalar_size(ty: UniformType) -> usize {
    match ty {
        UniformType::Vec2 => 8,
        UniformType::Vec3 => 12,
        UniformType::Vec4 => 16,
        UniformType::Mat3 => 48,
        UniformType::Mat4 => 64,
        _ => 4,
    }
}

/// Computes the std140 layout of `members`. Returns the member placements
/// and the total block size, rounded to 16 bytes.
#[must_use]
pub fn std140_layout(members: &[LightMember]) -> (SmallVec<[MemberLayout; 32]>, usize) {
    let mut out = SmallVec::new();
    let mut offset = 0;
    for m in members {
        let size = scalar_size(m.ty);
        let layout = if m.len == 0 {
            let offset_here = align_up(offset, base_alignment(m.ty));
            offset = offset_here + size;
            MemberLayout { offset: offset_here, stride: size, components: m.ty.components(), elements: 1 }
        } else {
            let stride = align_up(size, 16);
            let offset_here = align_up(offset, 16);
            offset = offset_here + stride * m.len;
            MemberLayout { offset: offset_here, stride, components: m.ty.components(), elements: m.len }
        };
        out.push(layout);
    }
    (out, align_up(offset.max(16), 16))
}

#[derive(Debug, Default)]
pub struct LightBlock {
    counts: Option<LightCounts>,
    layout: SmallVec<[MemberLayout; 32]>,
    bytes: Vec<u8>,
    uploaded: Vec<u8>,
    buffer: Option<BufferId>,
    version: Option<u64>,
}

impl LightBlock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn buffer(&self) -> Option<BufferId> {
        self.buffer
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Packs `lights` and uploads the changed range. Returns the number of
    /// bytes sent to the device.
    pub fn update<D: GpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        tracker: &mut StateTracker,
        lights: &LightState,
    ) -> Result<usize, DeviceError> {
        let relayout = self.counts != Some(*lights.counts());
        if relayout {
            let (layout, size) = std140_layout(&light_members(lights.counts()));
            self.layout = layout;
            self.bytes.clear();
            self.bytes.resize(size, 0);
            self.counts = Some(*lights.counts());
            self.version = None;
        }

        let mut sent = 0;
        if self.version != Some(lights.version()) || self.buffer.is_none() {
            self.pack(lights);
            sent = self.upload(device, relayout)?;
            self.version = Some(lights.version());
        }
        tracker.bind_uniform_buffer(device, LIGHT_BLOCK_BINDING, self.buffer)?;
        Ok(sent)
    }

    fn pack(&mut self, lights: &LightState) {
        for (member, layout) in lights.members().iter().zip(&self.layout) {
            let Some(values) = lights.values(member.name) else { continue };
            for element in 0..layout.elements {
                let src = values.get(element * layout.components..(element + 1) * layout.components);
                let Some(src) = src else { break };
                let at = layout.offset + element * layout.stride;
                let dst = &mut self.bytes[at..at + layout.components * 4];
                dst.copy_from_slice(bytemuck::cast_slice(src));
            }
        }
    }

    fn upload<D: GpuDevice + ?Sized>(&mut self, device: &mut D, full: bool) -> Result<usize, DeviceError> {
        let buffer = match self.buffer {
            Some(buffer) if !full && self.uploaded.len() == self.bytes.len() => buffer,
            existing => {
                let buffer = match existing {
                    Some(buffer) => buffer,
                    None => device.create_buffer(BufferKind::Uniform)?,
                };
                self.buffer = Some(buffer);
                device.buffer_data(buffer, BufferKind::Uniform, &self.bytes, BufferUsageHint::DynamicDraw)?;
                self.uploaded.clone_from(&self.bytes);
                return Ok(self.bytes.len());
            }
        };

        let first = self.bytes.iter().zip(&self.uploaded).position(|(a, b)| a != b);
        let last = self.bytes.iter().zip(&self.uploaded).rposition(|(a, b)| a != b);
        let (Some(first), Some(last)) = (first, last) else {
            return Ok(0);
        };
        let start = first & !15;
        let end = align_up(last + 1, 16).min(self.bytes.len());
        device.buffer_sub_data(buffer, BufferKind::Uniform, start, &self.bytes[start..end])?;
        self.uploaded[start..end].copy_from_slice(&self.bytes[start..end]);
        Ok(end - start)
    }

    pub fn dispose<D: GpuDevice + ?Sized>(&mut self, device: &mut D, tracker: &mut StateTracker) {
        if let Some(buffer) = self.buffer.take() {
            tracker.forget_buffer(buffer);
            device.delete_buffer(buffer);
        }
        self.invalidate();
    }

    /// Context loss: the buffer is gone and must be recreated in full.
    pub fn invalidate(&mut self) {
        self.buffer = None;
        self.counts = None;
        self.version = None;
        self.uploaded.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Mat4, Vec3};

    use crate::renderer::device::{Command, RecordingDevice};
    use crate::resources::color::{Color, ColorManagement};
    use crate::scene::{Light, Scene};

    #[test]
    fn layout_follows_std140() {
        let counts = LightCounts { point: 2, directional_shadows: 0, ..LightCounts::default() };
        let members = light_members(&counts);
        let (layout, size) = std140_layout(&members);

        // ambientLightColor: vec3 at 0
        assert_eq!(layout[0].offset, 0);
        // pointLightPosition[2]: arrays start on 16, stride 16
        assert_eq!(layout[1].offset, 16);
        assert_eq!(layout[1].stride, 16);
        // pointLightColor[2]
        assert_eq!(layout[2].offset, 48);
        // pointLightDistance[2]: float arrays still use 16-byte stride
        assert_eq!(layout[3].offset, 80);
        assert_eq!(layout[3].stride, 16);
        assert_eq!(layout[4].offset, 112);
        assert_eq!(size, 144);
    }

    #[test]
    fn only_changed_range_is_uploaded() {
        let mut scene = Scene::new();
        let a = scene.add_light("a", Light::point(Color::WHITE, 1.0, 0.0));
        let b = scene.add_light("b", Light::point(Color::WHITE, 1.0, 0.0));
        scene.update_world_matrices();

        let cm = ColorManagement::default();
        let mut lights = LightState::new();
        lights.setup(&scene, &[a, b], &Mat4::IDENTITY, &cm, false);

        let mut device = RecordingDevice::new();
        let mut tracker = StateTracker::new(device.capabilities());
        let mut block = LightBlock::new();

        let full = block.update(&mut device, &mut tracker, &lights).unwrap();
        assert_eq!(full, block.size());
        assert_eq!(block.update(&mut device, &mut tracker, &lights).unwrap(), 0);

        scene.light_mut(b).unwrap().intensity = 2.0;
        lights.setup(&scene, &[a, b], &Mat4::IDENTITY, &cm, false);
        let partial = block.update(&mut device, &mut tracker, &lights).unwrap();
        assert!(partial > 0 && partial < full);
        assert!(device.log().commands().iter().any(|c| matches!(c, Command::BufferSubData { .. })));

        let contents = device.buffer_contents(block.buffer().unwrap()).unwrap();
        // second pointLightColor element: offset 48 + 16
        let color: Vec<f32> = contents[64..76]
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(color, Vec3::splat(2.0).to_array());
    }
}
