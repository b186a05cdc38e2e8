use glam::{Affine3A, Mat4, Vec3, Vec4};

use crate::scene::layers::Layers;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    /// `fov_y` in radians.
    Perspective { fov_y: f32, near: f32, far: f32 },
    /// Vertical half extent; the horizontal one follows the aspect.
    Orthographic { half_height: f32, near: f32, far: f32 },
}

/// Camera component. Matrices follow the OpenGL clip convention (z in -1..1).
#[derive(Debug, Clone)]
pub struct Camera {
    pub projection: Projection,
    aspect: f32,
    pub zoom: f32,
    /// Follow the renderer's drawing-buffer aspect on resize.
    pub auto_aspect: bool,
    pub layers: Layers,

    pub(crate) world_matrix: Affine3A,
    pub(crate) view_matrix: Mat4,
    pub(crate) projection_matrix: Mat4,
    pub(crate) view_projection_matrix: Mat4,
    pub(crate) frustum: Frustum,
    version: u64,
}

impl Camera {
    /// `fov_y_degrees` is the vertical field of view.
    #[must_use]
    pub fn new_perspective(fov_y_degrees: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self::with_projection(
            Projection::Perspective {
                fov_y: fov_y_degrees.to_radians(),
                near,
                far,
            },
            aspect,
        )
    }

    #[must_use]
    pub fn new_orthographic(half_height: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self::with_projection(
            Projection::Orthographic {
                half_height,
                near,
                far,
            },
            aspect,
        )
    }

    fn with_projection(projection: Projection, aspect: f32) -> Self {
        let mut cam = Self {
            projection,
            aspect,
            zoom: 1.0,
            auto_aspect: true,
            layers: Layers::default(),
            world_matrix: Affine3A::IDENTITY,
            view_matrix: Mat4::IDENTITY,
            projection_matrix: Mat4::IDENTITY,
            view_projection_matrix: Mat4::IDENTITY,
            frustum: Frustum::default(),
            version: 0,
        };
        cam.update_projection_matrix();
        cam
    }

    #[must_use]
    pub fn aspect(&self) -> f32 {
        self.aspect
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        if (self.aspect - aspect).abs() > f32::EPSILON {
            self.aspect = aspect;
            self.update_projection_matrix();
        }
    }

    #[must_use]
    pub fn near_far(&self) -> (f32, f32) {
        match self.projection {
            Projection::Perspective { near, far, .. } | Projection::Orthographic { near, far, .. } => {
                (near, far)
            }
        }
    }

    #[must_use]
    pub fn is_orthographic(&self) -> bool {
        matches!(self.projection, Projection::Orthographic { .. })
    }

    /// Call after editing `projection` or `zoom`.
    pub fn update_projection_matrix(&mut self) {
        self.projection_matrix = match self.projection {
            Projection::Perspective { fov_y, near, far } => {
                let fov = 2.0 * ((fov_y * 0.5).tan() / self.zoom).atan();
                Mat4::perspective_rh_gl(fov, self.aspect, near, far)
            }
            Projection::Orthographic {
                half_height,
                near,
                far,
            } => {
                let h = half_height / self.zoom;
                let w = h * self.aspect;
                Mat4::orthographic_rh_gl(-w, w, -h, h, near, far)
            }
        };
        self.refresh();
    }

    pub(crate) fn update_view(&mut self, world: &Affine3A) {
        self.world_matrix = *world;
        self.view_matrix = Mat4::from(world.inverse());
        self.refresh();
    }

    fn refresh(&mut self) {
        self.view_projection_matrix = self.projection_matrix * self.view_matrix;
        self.frustum = Frustum::from_matrix(self.view_projection_matrix);
        self.version = self.version.wrapping_add(1);
    }

    /// Bumped whenever the view or projection changes.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    #[must_use]
    pub fn view_matrix(&self) -> &Mat4 {
        &self.view_matrix
    }

    #[must_use]
    pub fn projection_matrix(&self) -> &Mat4 {
        &self.projection_matrix
    }

    #[must_use]
    pub fn view_projection_matrix(&self) -> &Mat4 {
        &self.view_projection_matrix
    }

    #[must_use]
    pub fn frustum(&self) -> &Frustum {
        &self.frustum
    }

    #[must_use]
    pub fn position(&self) -> Vec3 {
        self.world_matrix.translation.into()
    }
}

/// Six clip planes (left, right, bottom, top, near, far), normals inward.
#[derive(Debug, Clone, Copy, Default)]
pub struct Frustum {
    planes: [Vec4; 6],
}

impl Frustum {
    /// Gribb-Hartmann extraction for an OpenGL-convention matrix.
    #[must_use]
    pub fn from_matrix(m: Mat4) -> Self {
        let rows = [m.row(0), m.row(1), m.row(2), m.row(3)];
        let mut planes = [
            rows[3] + rows[0],
            rows[3] - rows[0],
            rows[3] + rows[1],
            rows[3] - rows[1],
            rows[3] + rows[2],
            rows[3] - rows[2],
        ];
        for plane in &mut planes {
            let length = plane.truncate().length();
            if length > 0.0 {
                *plane /= length;
            }
        }
        Self { planes }
    }

    #[must_use]
    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.planes
            .iter()
            .all(|p| p.truncate().dot(center) + p.w >= -radius)
    }

    #[must_use]
    pub fn planes(&self) -> &[Vec4; 6] {
        &self.planes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frustum_culls_behind_camera() {
        let mut cam = Camera::new_perspective(60.0, 1.0, 0.1, 100.0);
        cam.update_view(&Affine3A::IDENTITY);
        assert!(cam.frustum().intersects_sphere(Vec3::new(0.0, 0.0, -10.0), 1.0));
        assert!(!cam.frustum().intersects_sphere(Vec3::new(0.0, 0.0, 10.0), 1.0));
        assert!(!cam.frustum().intersects_sphere(Vec3::new(0.0, 0.0, -200.0), 1.0));
    }

    #[test]
    fn aspect_change_bumps_version() {
        let mut cam = Camera::new_perspective(60.0, 4.0 / 3.0, 0.1, 100.0);
        let v = cam.version();
        cam.set_aspect(16.0 / 9.0);
        assert!(cam.version() > v);
        assert!((cam.projection_matrix().x_axis.x * cam.aspect() - cam.projection_matrix().y_axis.y).abs() < 1e-5);
    }
}
