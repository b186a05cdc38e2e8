//! GPU vertex and index buffers
//!
//! One entry per CPU geometry id. Each attribute gets its own buffer,
//! uploaded lazily and re-uploaded when the attribute's version moves. A
//! layout change (attribute added or replaced, new morph targets) rebuilds
//! every buffer of the geometry.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::renderer::device::{BufferId, BufferKind, BufferUsageHint, DeviceError, GpuDevice, VertexBinding};
use crate::renderer::program::{AttributeSource, ProgramParameters};
use crate::renderer::state::StateTracker;
use crate::resources::geometry::{BufferUsage, Geometry, VertexAttribute};

#[derive(Debug, Clone, Copy)]
struct GpuBuffer {
    id: BufferId,
    version: u64,
}

#[derive(Debug, Default)]
struct GpuGeometry {
    layout: Option<u64>,
    attributes: FxHashMap<VertexAttribute, GpuBuffer>,
    index: Option<GpuBuffer>,
    morph_positions: SmallVec<[BufferId; 8]>,
    morph_normals: SmallVec<[BufferId; 8]>,
}

impl GpuGeometry {
    fn buffers(&self) -> impl Iterator<Item = BufferId> + '_ {
        self.attributes
            .values()
            .map(|b| b.id)
            .chain(self.index.map(|b| b.id))
            .chain(self.morph_positions.iter().copied())
            .chain(self.morph_normals.iter().copied())
    }
}

#[derive(Debug, Default)]
pub struct GeometryManager {
    geometries: FxHashMap<u64, GpuGeometry>,
}

fn usage_hint(usage: BufferUsage) -> BufferUsageHint {
    match usage {
        BufferUsage::Static => BufferUsageHint::StaticDraw,
        BufferUsage::Dynamic => BufferUsageHint::DynamicDraw,
    }
}

fn upload_buffer<D: GpuDevice + ?Sized>(
    device: &mut D,
    existing: Option<BufferId>,
    kind: BufferKind,
    bytes: &[u8],
    usage: BufferUsageHint,
) -> Result<BufferId, DeviceError> {
    let id = match existing {
        Some(id) => id,
        None => device.create_buffer(kind)?,
    };
    device.buffer_data(id, kind, bytes, usage)?;
    Ok(id)
}

impl GeometryManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.geometries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.geometries.is_empty()
    }

    /// Brings every buffer of `geometry` up to date.
    pub fn update<D: GpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        tracker: &mut StateTracker,
        geometry: &Geometry,
    ) -> Result<(), DeviceError> {
        let layout = geometry.layout_version();
        let gpu = self.geometries.entry(geometry.id()).or_default();

        if gpu.layout != Some(layout) {
            for id in gpu.buffers() {
                tracker.forget_buffer(id);
                device.delete_buffer(id);
            }
            *gpu = GpuGeometry { layout: Some(layout), ..GpuGeometry::default() };

            for target in geometry.morph_targets() {
                let id = upload_buffer(
                    device,
                    None,
                    BufferKind::Vertex,
                    bytemuck::cast_slice(&target.position),
                    BufferUsageHint::StaticDraw,
                )?;
                gpu.morph_positions.push(id);
                if let Some(normal) = &target.normal {
                    let id = upload_buffer(
                        device,
                        None,
                        BufferKind::Vertex,
                        bytemuck::cast_slice(normal),
                        BufferUsageHint::StaticDraw,
                    )?;
                    gpu.morph_normals.push(id);
                }
            }
        }

        for data in geometry.attributes() {
            let current = gpu.attributes.get(&data.attribute).copied();
            if current.is_some_and(|b| b.version == data.version()) {
                continue;
            }
            let id = upload_buffer(
                device,
                current.map(|b| b.id),
                BufferKind::Vertex,
                bytemuck::cast_slice(data.data()),
                usage_hint(data.usage),
            )?;
            gpu.attributes.insert(data.attribute, GpuBuffer { id, version: data.version() });
        }

        if let Some(index) = geometry.index()
            && gpu.index.is_none_or(|b| b.version != index.version())
        {
            let id = upload_buffer(
                device,
                gpu.index.map(|b| b.id),
                BufferKind::Index,
                bytemuck::cast_slice(index.data()),
                BufferUsageHint::StaticDraw,
            )?;
            gpu.index = Some(GpuBuffer { id, version: index.version() });
        }
        Ok(())
    }

    /// Binds the inputs `params` declares. Inputs the geometry lacks are
    /// left disabled and read the attribute's constant default. Returns
    /// whether the draw is indexed.
    pub fn bind<D: GpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        tracker: &mut StateTracker,
        geometry: &Geometry,
        params: &ProgramParameters,
    ) -> Result<bool, DeviceError> {
        self.update(device, tracker, geometry)?;
        let Some(gpu) = self.geometries.get(&geometry.id()) else {
            return Ok(false);
        };

        for slot in &params.attributes {
            match slot.source {
                AttributeSource::Vertex(VertexAttribute::InstanceMatrix) => {
                    let buffer = gpu.attributes.get(&VertexAttribute::InstanceMatrix).map(|b| b.id);
                    for column in 0..4u32 {
                        let binding = buffer.map(|buffer| VertexBinding {
                            buffer,
                            components: 4,
                            stride: 64,
                            offset: column * 16,
                            divisor: 1,
                        });
                        tracker.set_vertex_attribute(device, slot.location + column, binding)?;
                    }
                }
                AttributeSource::Vertex(attribute) => {
                    let binding = gpu.attributes.get(&attribute).map(|b| VertexBinding {
                        buffer: b.id,
                        components: attribute.item_size() as u32,
                        stride: 0,
                        offset: 0,
                        divisor: u32::from(attribute.is_instanced()),
                    });
                    tracker.set_vertex_attribute(device, slot.location, binding)?;
                }
                AttributeSource::MorphPosition(i) => {
                    let binding = gpu.morph_positions.get(i).map(|&buffer| VertexBinding {
                        buffer,
                        components: 3,
                        stride: 0,
                        offset: 0,
                        divisor: 0,
                    });
                    tracker.set_vertex_attribute(device, slot.location, binding)?;
                }
                AttributeSource::MorphNormal(i) => {
                    let binding = gpu.morph_normals.get(i).map(|&buffer| VertexBinding {
                        buffer,
                        components: 3,
                        stride: 0,
                        offset: 0,
                        divisor: 0,
                    });
                    tracker.set_vertex_attribute(device, slot.location, binding)?;
                }
                AttributeSource::None => {}
            }
        }
        tracker.disable_unused_attributes(device)?;
        tracker.bind_index_buffer(device, gpu.index.map(|b| b.id))?;
        Ok(gpu.index.is_some())
    }

    pub fn dispose<D: GpuDevice + ?Sized>(&mut self, device: &mut D, tracker: &mut StateTracker, id: u64) -> bool {
        let Some(gpu) = self.geometries.remove(&id) else {
            return false;
        };
        for buffer in gpu.buffers() {
            tracker.forget_buffer(buffer);
            device.delete_buffer(buffer);
        }
        log::debug!("Disposed geometry buffers of {id}");
        true
    }

    pub fn invalidate(&mut self) {
        self.geometries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::device::{Command, RecordingDevice};
    use crate::resources::primitives;

    #[test]
    fn attribute_updates_reupload_only_that_buffer() {
        let mut device = RecordingDevice::new();
        let mut tracker = StateTracker::new(device.capabilities());
        let mut geometries = GeometryManager::new();
        let mut geometry = primitives::create_box(1.0, 1.0, 1.0);

        geometries.update(&mut device, &mut tracker, &geometry).unwrap();
        let uploads = |d: &RecordingDevice| d.log().commands().iter().filter(|c| matches!(c, Command::BufferData { .. })).count();
        let first = uploads(&device);
        assert!(first >= 2);

        geometries.update(&mut device, &mut tracker, &geometry).unwrap();
        assert_eq!(uploads(&device), first);

        let positions = geometry.attribute(VertexAttribute::Position).unwrap().data().to_vec();
        geometry.update_attribute(VertexAttribute::Position, &positions).unwrap();
        geometries.update(&mut device, &mut tracker, &geometry).unwrap();
        assert_eq!(uploads(&device), first + 1);
    }

    #[test]
    fn dispose_releases_all_buffers() {
        let mut device = RecordingDevice::new();
        let mut tracker = StateTracker::new(device.capabilities());
        let mut geometries = GeometryManager::new();
        let geometry = primitives::create_box(1.0, 1.0, 1.0);

        geometries.update(&mut device, &mut tracker, &geometry).unwrap();
        assert!(device.live_buffers() > 0);
        assert!(geometries.dispose(&mut device, &mut tracker, geometry.id()));
        assert_eq!(device.live_buffers(), 0);
        assert!(geometries.is_empty());
    }
}
