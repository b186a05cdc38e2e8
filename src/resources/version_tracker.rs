//! Version counters consumed by GPU-side dirty checks.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates a process-unique resource id (materials, geometries, textures).
///
/// Ids are never reused, so a cache keyed by id can never confuse a disposed
/// resource with a newly created one.
#[must_use]
pub fn next_resource_id() -> u64 {
    NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Monotonic edit counter. GPU caches compare it against the version they
/// last uploaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeTracker {
    version: u64,
}

impl ChangeTracker {
    #[must_use]
    pub fn new() -> Self {
        Self { version: 0 }
    }

    pub fn changed(&mut self) {
        self.version = self.version.wrapping_add(1);
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }
}

/// Mutable borrow that bumps the owner's version when dropped.
pub struct MutGuard<'a, T> {
    data: &'a mut T,
    tracker: &'a mut ChangeTracker,
}

impl<'a, T> MutGuard<'a, T> {
    pub fn new(data: &'a mut T, tracker: &'a mut ChangeTracker) -> Self {
        Self { data, tracker }
    }
}

impl<T> std::ops::Deref for MutGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.data
    }
}

impl<T> std::ops::DerefMut for MutGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data
    }
}

impl<T> Drop for MutGuard<'_, T> {
    fn drop(&mut self) {
        self.tracker.changed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_bumps_version_on_drop() {
        let mut value = 1.0_f32;
        let mut tracker = ChangeTracker::new();
        {
            let mut guard = MutGuard::new(&mut value, &mut tracker);
            *guard = 2.0;
        }
        assert_eq!(value, 2.0);
        assert_eq!(tracker.version(), 1);
    }

    #[test]
    fn resource_ids_are_unique() {
        let a = next_resource_id();
        let b = next_resource_id();
        assert_ne!(a, b);
    }
}
