use std::f32::consts::PI;

use crate::resources::geometry::{Geometry, VertexAttribute};

pub struct SphereOptions {
    pub radius: f32,
    pub width_segments: u32,
    pub height_segments: u32,
}

impl Default for SphereOptions {
    fn default() -> Self {
        Self {
            radius: 1.0,
            width_segments: 32,
            height_segments: 16,
        }
    }
}

/// UV sphere, Y-up.
#[must_use]
pub fn create_sphere(options: &SphereOptions) -> Geometry {
    let radius = options.radius;
    let width_segments = options.width_segments.max(3);
    let height_segments = options.height_segments.max(2);

    let mut positions = Vec::new();
    let mut normals = Vec::new();
    let mut uvs = Vec::new();
    let mut indices = Vec::new();

    for y in 0..=height_segments {
        let v = y as f32 / height_segments as f32;
        let theta = v * PI;
        for x in 0..=width_segments {
            let u = x as f32 / width_segments as f32;
            let phi = u * 2.0 * PI;
            let n = [-theta.sin() * phi.cos(), theta.cos(), theta.sin() * phi.sin()];
            positions.extend(n.iter().map(|c| c * radius));
            normals.extend_from_slice(&n);
            uvs.extend_from_slice(&[u, 1.0 - v]);
        }
    }

    let stride = width_segments + 1;
    for y in 0..height_segments {
        for x in 0..width_segments {
            let a = y * stride + x + 1;
            let b = y * stride + x;
            let c = (y + 1) * stride + x;
            let d = (y + 1) * stride + x + 1;
            // poles collapse to a single triangle per segment
            if y != 0 {
                indices.extend_from_slice(&[a, b, d]);
            }
            if y != height_segments - 1 {
                indices.extend_from_slice(&[b, c, d]);
            }
        }
    }

    let mut geo = Geometry::new()
        .with_attribute(VertexAttribute::Position, positions)
        .with_attribute(VertexAttribute::Normal, normals)
        .with_attribute(VertexAttribute::Uv, uvs)
        .with_index(indices);
    geo.name = "sphere".into();
    geo.compute_bounding_sphere();
    geo
}
