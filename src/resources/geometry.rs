//! Geometry buffers: named vertex attributes, an optional index array and
//! draw groups.
//!
//! Attribute data is planar `f32`. The shape of each attribute (item size
//! and element count) is fixed at insertion; [`Geometry::update_attribute`]
//! replaces the contents in place and marks it for re-upload.

use bitflags::bitflags;
use glam::Vec3;

use crate::errors::{Result, StrataError};
use crate::resources::version_tracker::{ChangeTracker, next_resource_id};

/// Closed set of vertex inputs the shader templates understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VertexAttribute {
    Position,
    Normal,
    Tangent,
    Uv,
    Uv1,
    Color,
    SkinIndex,
    SkinWeight,
    /// Per-instance 4×4 transform, four consecutive locations.
    InstanceMatrix,
    InstanceColor,
}

impl VertexAttribute {
    pub const ALL: [Self; 10] = [
        Self::Position,
        Self::Normal,
        Self::Tangent,
        Self::Uv,
        Self::Uv1,
        Self::Color,
        Self::SkinIndex,
        Self::SkinWeight,
        Self::InstanceMatrix,
        Self::InstanceColor,
    ];

    /// GLSL input name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Position => "position",
            Self::Normal => "normal",
            Self::Tangent => "tangent",
            Self::Uv => "uv",
            Self::Uv1 => "uv1",
            Self::Color => "color",
            Self::SkinIndex => "skinIndex",
            Self::SkinWeight => "skinWeight",
            Self::InstanceMatrix => "instanceMatrix",
            Self::InstanceColor => "instanceColor",
        }
    }

    /// Components per vertex.
    #[must_use]
    pub fn item_size(self) -> usize {
        match self {
            Self::Uv | Self::Uv1 => 2,
            Self::Position | Self::Normal | Self::Color | Self::InstanceColor => 3,
            Self::Tangent | Self::SkinIndex | Self::SkinWeight => 4,
            Self::InstanceMatrix => 16,
        }
    }

    /// Fixed attribute location, bound before linking.
    #[must_use]
    pub fn location(self) -> u32 {
        match self {
            Self::Position => 0,
            Self::Normal => 1,
            Self::Tangent => 2,
            Self::Uv => 3,
            Self::Uv1 => 4,
            Self::Color => 5,
            Self::SkinIndex => 6,
            Self::SkinWeight => 7,
            Self::InstanceColor => 8,
            Self::InstanceMatrix => 9,
        }
    }

    #[must_use]
    pub fn is_instanced(self) -> bool {
        matches!(self, Self::InstanceMatrix | Self::InstanceColor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferUsage {
    #[default]
    Static,
    Dynamic,
}

#[derive(Debug, Clone)]
pub struct AttributeData {
    pub attribute: VertexAttribute,
    data: Vec<f32>,
    pub usage: BufferUsage,
    version: ChangeTracker,
}

impl AttributeData {
    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Number of elements (vertices or instances).
    #[must_use]
    pub fn count(&self) -> usize {
        self.data.len() / self.attribute.item_size()
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.version.version()
    }

    /// Marks the data for re-upload without replacing it.
    pub fn needs_update(&mut self) {
        self.version.changed();
    }
}

#[derive(Debug, Clone)]
pub struct IndexData {
    data: Vec<u32>,
    version: ChangeTracker,
}

impl IndexData {
    #[must_use]
    pub fn data(&self) -> &[u32] {
        &self.data
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.version.version()
    }
}

/// A sub-range of the geometry drawn with one entry of a material array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometryGroup {
    pub start: usize,
    pub count: usize,
    pub material_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrimitiveMode {
    #[default]
    Triangles,
    TriangleStrip,
    Lines,
    LineStrip,
    Points,
}

/// Morph target deltas (or absolute values when `morph_relative` is false).
#[derive(Debug, Clone, Default)]
pub struct MorphTarget {
    pub position: Vec<f32>,
    pub normal: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingSphere {
    pub center: Vec3,
    pub radius: f32,
}

bitflags! {
    /// Vertex-input features that select shader variants.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct GeometryFeatures: u32 {
        const HAS_NORMAL        = 1 << 0;
        const HAS_TANGENT       = 1 << 1;
        const HAS_UV            = 1 << 2;
        const HAS_UV1           = 1 << 3;
        const HAS_COLOR         = 1 << 4;
        const HAS_SKIN          = 1 << 5;
        const HAS_MORPH         = 1 << 6;
        const HAS_MORPH_NORMALS = 1 << 7;
        const INSTANCED         = 1 << 8;
        const INSTANCE_COLOR    = 1 << 9;
    }
}

#[derive(Debug)]
pub struct Geometry {
    id: u64,
    pub name: String,
    attributes: Vec<AttributeData>,
    index: Option<IndexData>,
    groups: Vec<GeometryGroup>,
    /// Start and optional count, in indices (or vertices when non-indexed).
    pub draw_range: (usize, Option<usize>),
    morph_targets: Vec<MorphTarget>,
    pub morph_relative: bool,
    pub mode: PrimitiveMode,
    pub instance_count: Option<u32>,
    bounding_sphere: Option<BoundingSphere>,
    version: ChangeTracker,
}

impl Clone for Geometry {
    fn clone(&self) -> Self {
        Self {
            id: next_resource_id(),
            name: self.name.clone(),
            attributes: self.attributes.clone(),
            index: self.index.clone(),
            groups: self.groups.clone(),
            draw_range: self.draw_range,
            morph_targets: self.morph_targets.clone(),
            morph_relative: self.morph_relative,
            mode: self.mode,
            instance_count: self.instance_count,
            bounding_sphere: self.bounding_sphere,
            version: ChangeTracker::new(),
        }
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self::new()
    }
}

impl Geometry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: next_resource_id(),
            name: String::new(),
            attributes: Vec::new(),
            index: None,
            groups: Vec::new(),
            draw_range: (0, None),
            morph_targets: Vec::new(),
            morph_relative: true,
            mode: PrimitiveMode::Triangles,
            instance_count: None,
            bounding_sphere: None,
            version: ChangeTracker::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Structural version: bumps when attributes or the index are added,
    /// not when their contents change.
    #[inline]
    #[must_use]
    pub fn layout_version(&self) -> u64 {
        self.version.version()
    }

    /// Adds (or replaces) an attribute. Replacing is a layout change.
    pub fn set_attribute(&mut self, attribute: VertexAttribute, data: Vec<f32>) {
        let entry = AttributeData {
            attribute,
            data,
            usage: BufferUsage::Static,
            version: ChangeTracker::new(),
        };
        match self.attributes.binary_search_by_key(&attribute, |a| a.attribute) {
            Ok(idx) => self.attributes[idx] = entry,
            Err(idx) => self.attributes.insert(idx, entry),
        }
        if attribute == VertexAttribute::Position {
            self.bounding_sphere = None;
        }
        self.version.changed();
    }

    #[must_use]
    pub fn with_attribute(mut self, attribute: VertexAttribute, data: Vec<f32>) -> Self {
        self.set_attribute(attribute, data);
        self
    }

    /// Replaces an attribute's contents keeping its shape.
    pub fn update_attribute(&mut self, attribute: VertexAttribute, data: &[f32]) -> Result<()> {
        let entry = self
            .attributes
            .iter_mut()
            .find(|a| a.attribute == attribute)
            .ok_or_else(|| StrataError::ResourceNotFound(format!("attribute {}", attribute.name())))?;
        if entry.data.len() != data.len() {
            return Err(StrataError::AttributeShapeMismatch {
                name: attribute.name(),
                expected: entry.data.len(),
                actual: data.len(),
            });
        }
        entry.data.copy_from_slice(data);
        entry.version.changed();
        if attribute == VertexAttribute::Position {
            self.bounding_sphere = None;
        }
        Ok(())
    }

    #[must_use]
    pub fn attribute(&self, attribute: VertexAttribute) -> Option<&AttributeData> {
        self.attributes.iter().find(|a| a.attribute == attribute)
    }

    pub fn attribute_mut(&mut self, attribute: VertexAttribute) -> Option<&mut AttributeData> {
        self.attributes.iter_mut().find(|a| a.attribute == attribute)
    }

    pub fn attributes(&self) -> impl Iterator<Item = &AttributeData> {
        self.attributes.iter()
    }

    pub fn set_index(&mut self, indices: Vec<u32>) {
        self.index = Some(IndexData {
            data: indices,
            version: ChangeTracker::new(),
        });
        self.version.changed();
    }

    #[must_use]
    pub fn with_index(mut self, indices: Vec<u32>) -> Self {
        self.set_index(indices);
        self
    }

    #[must_use]
    pub fn index(&self) -> Option<&IndexData> {
        self.index.as_ref()
    }

    pub fn add_group(&mut self, start: usize, count: usize, material_index: usize) {
        self.groups.push(GeometryGroup {
            start,
            count,
            material_index,
        });
    }

    pub fn clear_groups(&mut self) {
        self.groups.clear();
    }

    #[must_use]
    pub fn groups(&self) -> &[GeometryGroup] {
        &self.groups
    }

    pub fn set_morph_targets(&mut self, targets: Vec<MorphTarget>) {
        self.morph_targets = targets;
        self.version.changed();
    }

    #[must_use]
    pub fn morph_targets(&self) -> &[MorphTarget] {
        &self.morph_targets
    }

    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.attribute(VertexAttribute::Position).map_or(0, AttributeData::count)
    }

    /// Element count for a draw of the whole geometry, before draw range.
    #[must_use]
    pub fn element_count(&self) -> usize {
        self.index.as_ref().map_or_else(|| self.vertex_count(), |i| i.data.len())
    }

    /// `(start, count)` after applying the draw range.
    #[must_use]
    pub fn draw_span(&self) -> (usize, usize) {
        let total = self.element_count();
        let start = self.draw_range.0.min(total);
        let count = self.draw_range.1.unwrap_or(total).min(total - start);
        (start, count)
    }

    /// Has positions, consistent attribute lengths and in-range indices.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        let vertices = self.vertex_count();
        if vertices == 0 {
            return false;
        }
        let lengths_ok = self.attributes.iter().all(|a| {
            a.data.len() % a.attribute.item_size() == 0
                && (a.attribute.is_instanced() || a.count() == vertices)
        });
        let index_ok = self
            .index
            .as_ref()
            .is_none_or(|i| i.data.iter().all(|&v| (v as usize) < vertices));
        lengths_ok && index_ok
    }

    #[must_use]
    pub fn features(&self) -> GeometryFeatures {
        let mut f = GeometryFeatures::empty();
        for a in &self.attributes {
            f |= match a.attribute {
                VertexAttribute::Normal => GeometryFeatures::HAS_NORMAL,
                VertexAttribute::Tangent => GeometryFeatures::HAS_TANGENT,
                VertexAttribute::Uv => GeometryFeatures::HAS_UV,
                VertexAttribute::Uv1 => GeometryFeatures::HAS_UV1,
                VertexAttribute::Color => GeometryFeatures::HAS_COLOR,
                VertexAttribute::SkinIndex | VertexAttribute::SkinWeight => GeometryFeatures::HAS_SKIN,
                VertexAttribute::InstanceMatrix => GeometryFeatures::INSTANCED,
                VertexAttribute::InstanceColor => GeometryFeatures::INSTANCE_COLOR,
                VertexAttribute::Position => GeometryFeatures::empty(),
            };
        }
        if !self.morph_targets.is_empty() {
            f |= GeometryFeatures::HAS_MORPH;
            if self.morph_targets.iter().all(|t| t.normal.is_some()) {
                f |= GeometryFeatures::HAS_MORPH_NORMALS;
            }
        }
        f
    }

    /// Computes (and caches) a bounding sphere centered on the AABB center.
    pub fn compute_bounding_sphere(&mut self) -> Option<BoundingSphere> {
        let sphere = self.sphere_from_positions()?;
        self.bounding_sphere = Some(sphere);
        Some(sphere)
    }

    #[must_use]
    pub fn bounding_sphere(&self) -> Option<BoundingSphere> {
        self.bounding_sphere
    }

    /// Cached sphere, or a freshly computed one when nothing is cached.
    #[must_use]
    pub fn bounding_sphere_or_compute(&self) -> Option<BoundingSphere> {
        self.bounding_sphere.or_else(|| self.sphere_from_positions())
    }

    fn sphere_from_positions(&self) -> Option<BoundingSphere> {
        let positions = self.attribute(VertexAttribute::Position)?.data();
        if positions.len() < 3 {
            return None;
        }
        let mut min = Vec3::splat(f32::INFINITY);
        let mut max = Vec3::splat(f32::NEG_INFINITY);
        for p in positions.chunks_exact(3) {
            let v = Vec3::new(p[0], p[1], p[2]);
            min = min.min(v);
            max = max.max(v);
        }
        let center = (min + max) * 0.5;
        let radius_sq = positions
            .chunks_exact(3)
            .map(|p| center.distance_squared(Vec3::new(p[0], p[1], p[2])))
            .fold(0.0_f32, f32::max);
        Some(BoundingSphere { center, radius: radius_sq.sqrt() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> Geometry {
        Geometry::new().with_attribute(
            VertexAttribute::Position,
            vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
        )
    }

    #[test]
    fn update_rejects_shape_change() {
        let mut geo = triangle();
        let err = geo.update_attribute(VertexAttribute::Position, &[0.0; 6]).unwrap_err();
        assert!(matches!(
            err,
            StrataError::AttributeShapeMismatch { expected: 9, actual: 6, .. }
        ));
        geo.update_attribute(VertexAttribute::Position, &[1.0; 9]).unwrap();
        assert_eq!(geo.attribute(VertexAttribute::Position).unwrap().version(), 1);
    }

    #[test]
    fn validity_checks_indices() {
        let mut geo = triangle();
        assert!(geo.is_valid());
        geo.set_index(vec![0, 1, 5]);
        assert!(!geo.is_valid());
        assert!(!Geometry::new().is_valid());
    }

    #[test]
    fn draw_span_clamps() {
        let mut geo = triangle().with_index(vec![0, 1, 2, 2, 1, 0]);
        geo.draw_range = (3, Some(100));
        assert_eq!(geo.draw_span(), (3, 3));
    }

    #[test]
    fn bounding_sphere_contains_vertices() {
        let mut geo = triangle();
        let s = geo.compute_bounding_sphere().unwrap();
        assert!((s.center - Vec3::new(0.5, 0.5, 0.0)).length() < 1e-6);
        assert!((s.radius - 0.5_f32.sqrt()).abs() < 1e-6);
    }
}
