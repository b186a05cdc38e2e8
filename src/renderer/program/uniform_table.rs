//! Reflected uniform table
//!
//! Built once per linked program from the device's reflection. Each slot
//! remembers the last value uploaded into it, so repeated uploads of an
//! unchanged value never reach the device.

use smallvec::SmallVec;

use crate::errors::{Result, StrataError};
use crate::renderer::device::{ActiveUniform, GpuDevice, UniformData, UniformLocation, UniformType};
use crate::renderer::lights::{LightCounts, SHADOW_MAP_UNIFORMS, light_members};

/// Source of a uniform's value. Decides when the binder refreshes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformGroup {
    /// View/projection state; refreshed when the camera version moves.
    Camera,
    /// Per-draw transforms and skinning; checked every draw.
    Object,
    /// Light aggregate arrays and shadow maps.
    Lights,
    Fog,
    /// Frame-global values (exposure, transmission target).
    Global,
    /// Everything else is read from the material.
    Material,
}

const CAMERA_UNIFORMS: &[&str] = &[
    "projectionMatrix",
    "viewMatrix",
    "cameraPosition",
    "isOrthographic",
    "cameraNear",
    "cameraFar",
];

const OBJECT_UNIFORMS: &[&str] = &[
    "modelMatrix",
    "modelViewMatrix",
    "normalMatrix",
    "boneMatrices",
    "morphTargetInfluences",
    "morphTargetBaseInfluence",
    "receiveShadow",
    "clippingPlanes",
    "referencePosition",
    "nearDistance",
    "farDistance",
];

const FOG_UNIFORMS: &[&str] = &["fogColor", "fogNear", "fogFar", "fogDensity"];

const GLOBAL_UNIFORMS: &[&str] = &["toneMappingExposure", "transmissionSamplerMap", "transmissionSamplerSize"];

impl UniformGroup {
    #[must_use]
    pub fn classify(name: &str) -> Self {
        if CAMERA_UNIFORMS.contains(&name) {
            Self::Camera
        } else if OBJECT_UNIFORMS.contains(&name) {
            Self::Object
        } else if FOG_UNIFORMS.contains(&name) {
            Self::Fog
        } else if GLOBAL_UNIFORMS.contains(&name) {
            Self::Global
        } else if is_light_uniform(name) {
            Self::Lights
        } else {
            Self::Material
        }
    }
}

fn is_light_uniform(name: &str) -> bool {
    if SHADOW_MAP_UNIFORMS.iter().any(|(n, _)| *n == name) {
        return true;
    }
    // Every member name appears once all counts are non-zero.
    let all = LightCounts {
        directional: 1,
        point: 1,
        spot: 1,
        rect_area: 1,
        directional_shadows: 1,
        point_shadows: 1,
        spot_shadows: 1,
    };
    light_members(&all).iter().any(|m| m.name == name)
}

#[derive(Debug, Clone, PartialEq)]
enum CachedValue {
    Floats(SmallVec<[f32; 16]>),
    Ints(SmallVec<[i32; 4]>),
}

impl CachedValue {
    fn matches(&self, data: &UniformData<'_>) -> bool {
        match (self, data) {
            (Self::Floats(a), UniformData::Floats(b)) => a.as_slice() == *b,
            (Self::Ints(a), UniformData::Ints(b)) => a.as_slice() == *b,
            _ => false,
        }
    }

    fn from_data(data: &UniformData<'_>) -> Self {
        match data {
            UniformData::Floats(v) => Self::Floats(SmallVec::from_slice(v)),
            UniformData::Ints(v) => Self::Ints(SmallVec::from_slice(v)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UniformSlot {
    pub name: String,
    pub ty: UniformType,
    /// 1 for non-array uniforms.
    pub array_len: u32,
    pub location: UniformLocation,
    pub group: UniformGroup,
    cached: Option<CachedValue>,
}

impl UniformSlot {
    /// Total float/int components across the array.
    #[must_use]
    pub fn component_len(&self) -> usize {
        self.ty.components() * self.array_len.max(1) as usize
    }
}

#[derive(Debug, Clone, Default)]
pub struct UniformTable {
    slots: Vec<UniformSlot>,
}

impl UniformTable {
    #[must_use]
    pub fn from_reflection(active: Vec<ActiveUniform>) -> Self {
        let slots = active
            .into_iter()
            .map(|u| UniformSlot {
                group: UniformGroup::classify(&u.name),
                name: u.name,
                ty: u.ty,
                array_len: u.array_len,
                location: u.location,
                cached: None,
            })
            .collect();
        Self { slots }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[must_use]
    pub fn slots(&self) -> &[UniformSlot] {
        &self.slots
    }

    #[must_use]
    pub fn find(&self, name: &str) -> Option<usize> {
        self.slots.iter().position(|s| s.name == name)
    }

    pub fn slot(&self, index: usize) -> Result<&UniformSlot> {
        let len = self.slots.len();
        self.slots
            .get(index)
            .ok_or(StrataError::UniformIndexOutOfRange { index, len })
    }

    /// Uploads `data` into slot `index` unless it already holds that value.
    /// The owning program must be bound. Returns whether a command was issued.
    pub fn upload<D: GpuDevice + ?Sized>(&mut self, device: &mut D, index: usize, data: UniformData<'_>) -> Result<bool> {
        let len = self.slots.len();
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(StrataError::UniformIndexOutOfRange { index, len })?;

        if slot.cached.as_ref().is_some_and(|c| c.matches(&data)) {
            return Ok(false);
        }
        device.set_uniform(slot.location, slot.ty, data)?;
        slot.cached = Some(CachedValue::from_data(&data));
        Ok(true)
    }

    /// Forgets every cached value; the next upload of each slot is issued.
    pub fn invalidate(&mut self) {
        for slot in &mut self.slots {
            slot.cached = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::device::RecordingDevice;

    fn table() -> UniformTable {
        UniformTable::from_reflection(vec![
            ActiveUniform { name: "modelMatrix".into(), ty: UniformType::Mat4, array_len: 1, location: UniformLocation(0) },
            ActiveUniform { name: "diffuse".into(), ty: UniformType::Vec3, array_len: 1, location: UniformLocation(1) },
            ActiveUniform { name: "pointLightColor".into(), ty: UniformType::Vec3, array_len: 2, location: UniformLocation(2) },
            ActiveUniform { name: "projectionMatrix".into(), ty: UniformType::Mat4, array_len: 1, location: UniformLocation(3) },
        ])
    }

    #[test]
    fn groups_are_classified_by_name() {
        let t = table();
        let groups: Vec<_> = t.slots().iter().map(|s| s.group).collect();
        assert_eq!(
            groups,
            [UniformGroup::Object, UniformGroup::Material, UniformGroup::Lights, UniformGroup::Camera]
        );
        assert_eq!(t.slots()[2].component_len(), 6);
    }

    #[test]
    fn out_of_range_index_is_an_error() {
        let mut t = table();
        let mut device = RecordingDevice::new();
        let err = t.upload(&mut device, 9, UniformData::Floats(&[0.0])).unwrap_err();
        assert!(matches!(err, StrataError::UniformIndexOutOfRange { index: 9, len: 4 }));
    }
}
