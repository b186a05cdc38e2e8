//! Procedural geometry builders.

pub mod box_shape;
pub mod plane;
pub mod sphere;

pub use box_shape::create_box;
pub use plane::{PlaneOptions, create_plane};
pub use sphere::{SphereOptions, create_sphere};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_produce_valid_geometry() {
        let cube = create_box(1.0, 2.0, 3.0);
        assert!(cube.is_valid());
        assert_eq!(cube.vertex_count(), 24);
        assert_eq!(cube.element_count(), 36);
        let s = cube.bounding_sphere().unwrap();
        assert!((s.radius - (0.25_f32 + 1.0 + 2.25).sqrt()).abs() < 1e-5);

        assert!(create_plane(&PlaneOptions::default()).is_valid());
        assert!(create_sphere(&SphereOptions::default()).is_valid());
    }
}
