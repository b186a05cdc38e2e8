//! Shader define sets
//!
//! Every input that changes generated shader source ends up as one entry in a
//! [`ShaderDefines`] set, and the program cache keys compiled programs by the
//! set's [`canonical_key`](ShaderDefines::canonical_key).
//!
//! Names and values are interned [`Symbol`]s kept sorted by symbol id, so
//! lookups are binary searches and equality is integer comparison. Symbol ids
//! depend on intern order; anything that must be stable across processes goes
//! through [`sorted`](ShaderDefines::sorted), which orders by name.
//!
//! ```rust,ignore
//! let mut defines = ShaderDefines::new();
//! defines.flag("USE_MAP");
//! defines.set_count("NUM_DIR_LIGHTS", 2);
//! assert_eq!(defines.canonical_key(), "NUM_DIR_LIGHTS=2;USE_MAP=1");
//! ```

use crate::utils::interner::{self, Symbol};

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ShaderDefines {
    entries: Vec<(Symbol, Symbol)>,
}

impl ShaderDefines {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a boolean flag (`"1"`).
    pub fn flag(&mut self, name: &str) {
        self.set(name, "1");
    }

    /// Sets a numeric define.
    pub fn set_count(&mut self, name: &str, value: usize) {
        self.set(name, &value.to_string());
    }

    /// Inserts or overwrites `name`.
    pub fn set(&mut self, name: &str, value: &str) {
        let name = interner::intern(name);
        let value = interner::intern(value);
        match self.position(name) {
            Ok(i) => self.entries[i].1 = value,
            Err(i) => self.entries.insert(i, (name, value)),
        }
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        interner::get(name).is_some_and(|sym| self.position(sym).is_ok())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<String> {
        let sym = interner::get(name)?;
        let i = self.position(sym).ok()?;
        Some(interner::resolve(self.entries[i].1).to_string())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(name, value)` pairs ordered by name.
    #[must_use]
    pub fn sorted(&self) -> Vec<(&'static str, &'static str)> {
        let mut out: Vec<_> = self
            .entries
            .iter()
            .map(|&(k, v)| (interner::resolve(k), interner::resolve(v)))
            .collect();
        out.sort_unstable_by(|a, b| a.0.cmp(b.0));
        out
    }

    /// `NAME=VALUE;NAME=VALUE`, ordered by name.
    ///
    /// Two sets holding the same entries produce the same key regardless of
    /// the order in which they were assembled.
    #[must_use]
    pub fn canonical_key(&self) -> String {
        let mut key = String::with_capacity(self.entries.len() * 16);
        for (i, (name, value)) in self.sorted().into_iter().enumerate() {
            if i > 0 {
                key.push(';');
            }
            key.push_str(name);
            key.push('=');
            key.push_str(value);
        }
        key
    }

    /// 128-bit hash of [`canonical_key`](Self::canonical_key).
    #[must_use]
    pub fn key_hash(&self) -> u128 {
        xxhash_rust::xxh3::xxh3_128(self.canonical_key().as_bytes())
    }

    fn position(&self, name: Symbol) -> Result<usize, usize> {
        self.entries.binary_search_by_key(&name, |&(k, _)| k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_overwrites() {
        let mut defines = ShaderDefines::new();
        defines.flag("USE_MAP");
        defines.set("USE_MAP", "0");
        defines.set_count("NUM_POINT_LIGHTS", 3);

        assert_eq!(defines.len(), 2);
        assert_eq!(defines.get("USE_MAP").as_deref(), Some("0"));
        assert_eq!(defines.get("NUM_POINT_LIGHTS").as_deref(), Some("3"));
        assert!(!defines.contains("USE_AO_MAP"));
    }

    #[test]
    fn canonical_key_ignores_insertion_order() {
        let mut d1 = ShaderDefines::new();
        d1.set("ZETA", "1");
        d1.set("ALPHA", "3");
        d1.set("MID", "2");

        let mut d2 = ShaderDefines::new();
        d2.set("MID", "2");
        d2.set("ZETA", "1");
        d2.set("ALPHA", "3");

        assert_eq!(d1, d2);
        assert_eq!(d1.canonical_key(), "ALPHA=3;MID=2;ZETA=1");
        assert_eq!(d1.key_hash(), d2.key_hash());
    }

    #[test]
    fn canonical_key_tracks_values() {
        let mut d1 = ShaderDefines::new();
        d1.set_count("NUM_POINT_LIGHTS", 1);
        let mut d2 = ShaderDefines::new();
        d2.set_count("NUM_POINT_LIGHTS", 2);
        assert_ne!(d1.key_hash(), d2.key_hash());
    }

    #[test]
    fn empty_set_has_empty_key() {
        assert_eq!(ShaderDefines::new().canonical_key(), "");
        assert!(ShaderDefines::new().is_empty());
    }
}
