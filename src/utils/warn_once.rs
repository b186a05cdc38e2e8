//! Deduplicated logging
//!
//! Conditions that repeat every frame (a missing texture, an invalid state
//! enum) must not flood the log. [`WarnOnce`] remembers a hash of each
//! message and only forwards the first occurrence.

use std::hash::BuildHasher;

use log::{Level, log};
use rustc_hash::{FxBuildHasher, FxHashSet};

#[derive(Debug, Default)]
pub struct WarnOnce {
    seen: FxHashSet<u64>,
}

impl WarnOnce {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Logs `message` at `level` unless the same message was already logged.
    /// Returns `true` when the message was emitted.
    pub fn log(&mut self, level: Level, message: &str) -> bool {
        let hash = FxBuildHasher.hash_one(message);
        if !self.seen.insert(hash) {
            return false;
        }
        log!(level, "{message}");
        true
    }

    pub fn warn(&mut self, message: &str) -> bool {
        self.log(Level::Warn, message)
    }

    pub fn error(&mut self, message: &str) -> bool {
        self.log(Level::Error, message)
    }

    /// Forgets every message, e.g. after a context restore.
    pub fn clear(&mut self) {
        self.seen.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_message_is_logged_once() {
        let mut once = WarnOnce::new();
        assert!(once.warn("texture missing"));
        assert!(!once.warn("texture missing"));
        assert!(once.warn("another"));
        assert_eq!(once.len(), 2);

        once.clear();
        assert!(once.warn("texture missing"));
    }
}
