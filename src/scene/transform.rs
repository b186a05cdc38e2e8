use glam::{Affine3A, Mat3, Quat, Vec3};

/// Local TRS plus cached local/world matrices. Local changes are detected by
/// comparing against a shadow copy of the last applied TRS, so plain field
/// writes (`transform.position.x += 1.0`) need no explicit dirty call.
#[derive(Debug, Clone)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,

    pub(crate) local_matrix: Affine3A,
    pub(crate) world_matrix: Affine3A,

    last_position: Vec3,
    last_rotation: Quat,
    last_scale: Vec3,
    force_update: bool,
    world_dirty: bool,
}

impl Transform {
    #[must_use]
    pub fn new() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,

            local_matrix: Affine3A::IDENTITY,
            world_matrix: Affine3A::IDENTITY,

            last_position: Vec3::ZERO,
            last_rotation: Quat::IDENTITY,
            last_scale: Vec3::ONE,
            force_update: true,
            world_dirty: true,
        }
    }

    #[must_use]
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::new()
        }
    }

    fn local_changed(&self) -> bool {
        self.position != self.last_position
            || self.rotation != self.last_rotation
            || self.scale != self.last_scale
            || self.force_update
    }

    /// Recomputes the local matrix if TRS moved. Returns whether it changed.
    pub fn update_local_matrix(&mut self) -> bool {
        let changed = self.local_changed();
        if changed {
            self.local_matrix =
                Affine3A::from_scale_rotation_translation(self.scale, self.rotation, self.position);
            self.last_position = self.position;
            self.last_rotation = self.rotation;
            self.last_scale = self.scale;
            self.force_update = false;
            self.world_dirty = true;
        }
        changed
    }

    /// True until the transform system has recomputed the world matrix from
    /// the current local state.
    #[must_use]
    pub fn needs_world_update(&self) -> bool {
        self.world_dirty || self.local_changed()
    }

    /// Forces local and world recomputation on the next update.
    pub fn mark_dirty(&mut self) {
        self.force_update = true;
        self.world_dirty = true;
    }

    pub(crate) fn set_world_matrix(&mut self, mat: Affine3A) {
        self.world_matrix = mat;
        self.world_dirty = false;
    }

    #[inline]
    #[must_use]
    pub fn local_matrix(&self) -> &Affine3A {
        &self.local_matrix
    }

    #[inline]
    #[must_use]
    pub fn world_matrix(&self) -> &Affine3A {
        &self.world_matrix
    }

    #[inline]
    #[must_use]
    pub fn world_position(&self) -> Vec3 {
        self.world_matrix.translation.into()
    }

    /// Rotates so that -Z points at `target` (parent space). Degenerate
    /// inputs leave the rotation unchanged.
    pub fn look_at(&mut self, target: Vec3, up: Vec3) {
        let forward = (target - self.position).normalize_or_zero();
        if forward == Vec3::ZERO || forward.cross(up).length_squared() < 1e-8 {
            return;
        }
        let right = forward.cross(up).normalize();
        let new_up = right.cross(forward).normalize();
        self.rotation = Quat::from_mat3(&Mat3::from_cols(right, new_up, -forward));
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_writes_are_detected() {
        let mut t = Transform::new();
        assert!(t.update_local_matrix());
        t.set_world_matrix(t.local_matrix);
        assert!(!t.needs_world_update());

        t.position.x = 2.0;
        assert!(t.needs_world_update());
        assert!(t.update_local_matrix());
        assert!(!t.update_local_matrix());
        assert_eq!(t.local_matrix.translation.x, 2.0);
    }

    #[test]
    fn look_at_points_negative_z() {
        let mut t = Transform::from_position(Vec3::new(0.0, 0.0, 5.0));
        t.look_at(Vec3::ZERO, Vec3::Y);
        let forward = t.rotation * Vec3::NEG_Z;
        assert!((forward - Vec3::NEG_Z).length() < 1e-5);
    }
}
