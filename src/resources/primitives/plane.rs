use crate::resources::geometry::{Geometry, VertexAttribute};

pub struct PlaneOptions {
    pub width: f32,
    pub height: f32,
    pub width_segments: u32,
    pub height_segments: u32,
}

impl Default for PlaneOptions {
    fn default() -> Self {
        Self {
            width: 1.0,
            height: 1.0,
            width_segments: 1,
            height_segments: 1,
        }
    }
}

/// XY plane facing +Z.
#[must_use]
pub fn create_plane(options: &PlaneOptions) -> Geometry {
    let grid_x = options.width_segments.max(1);
    let grid_y = options.height_segments.max(1);
    let cols = grid_x + 1;

    let mut positions = Vec::new();
    let mut normals = Vec::new();
    let mut uvs = Vec::new();
    let mut indices = Vec::new();

    for iy in 0..=grid_y {
        let fy = iy as f32 / grid_y as f32;
        for ix in 0..=grid_x {
            let fx = ix as f32 / grid_x as f32;
            positions.extend_from_slice(&[
                (fx - 0.5) * options.width,
                (0.5 - fy) * options.height,
                0.0,
            ]);
            normals.extend_from_slice(&[0.0, 0.0, 1.0]);
            uvs.extend_from_slice(&[fx, 1.0 - fy]);
        }
    }

    for iy in 0..grid_y {
        for ix in 0..grid_x {
            let a = ix + cols * iy;
            let b = ix + cols * (iy + 1);
            let c = ix + 1 + cols * (iy + 1);
            let d = ix + 1 + cols * iy;
            indices.extend_from_slice(&[a, b, d, b, c, d]);
        }
    }

    let mut geo = Geometry::new()
        .with_attribute(VertexAttribute::Position, positions)
        .with_attribute(VertexAttribute::Normal, normals)
        .with_attribute(VertexAttribute::Uv, uvs)
        .with_index(indices);
    geo.name = "plane".into();
    geo.compute_bounding_sphere();
    geo
}
