use glam::Vec3;

use crate::resources::geometry::{Geometry, VertexAttribute};

/// Axis-aligned box centered on the origin, 4 vertices per face, CCW winding.
#[must_use]
pub fn create_box(width: f32, height: f32, depth: f32) -> Geometry {
    let half = Vec3::new(width, height, depth) * 0.5;

    // (normal, u axis, v axis) per face
    let faces = [
        (Vec3::Z, Vec3::X, Vec3::Y),
        (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
        (Vec3::Y, Vec3::X, Vec3::NEG_Z),
        (Vec3::NEG_Y, Vec3::X, Vec3::Z),
        (Vec3::X, Vec3::NEG_Z, Vec3::Y),
        (Vec3::NEG_X, Vec3::Z, Vec3::Y),
    ];

    let mut positions = Vec::with_capacity(24 * 3);
    let mut normals = Vec::with_capacity(24 * 3);
    let mut uvs = Vec::with_capacity(24 * 2);
    let mut indices = Vec::with_capacity(36);

    for (face, (n, u, v)) in faces.iter().enumerate() {
        let base = (face * 4) as u32;
        for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            let p = (*n + *u * su + *v * sv) * half;
            positions.extend_from_slice(&p.to_array());
            normals.extend_from_slice(&n.to_array());
            uvs.extend_from_slice(&[(su + 1.0) * 0.5, (sv + 1.0) * 0.5]);
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    let mut geo = Geometry::new()
        .with_attribute(VertexAttribute::Position, positions)
        .with_attribute(VertexAttribute::Normal, normals)
        .with_attribute(VertexAttribute::Uv, uvs)
        .with_index(indices);
    geo.name = "box".into();
    geo.compute_bounding_sphere();
    geo
}
