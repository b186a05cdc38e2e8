//! Global string interner
//!
//! Converts shader define names and values into integer [`Symbol`]s so that
//! define sets can be compared and hashed without touching string data.

use std::sync::OnceLock;

use lasso::{Spur, ThreadedRodeo};

static INTERNER: OnceLock<ThreadedRodeo> = OnceLock::new();

fn interner() -> &'static ThreadedRodeo {
    INTERNER.get_or_init(ThreadedRodeo::new)
}

/// Compact integer identifier for an interned string.
pub type Symbol = Spur;

/// Interns a string, returning the existing symbol when already present.
#[inline]
pub fn intern(s: &str) -> Symbol {
    interner().get_or_intern(s)
}

/// Looks up a string without interning it.
#[inline]
pub fn get(s: &str) -> Option<Symbol> {
    interner().get(s)
}

/// Resolves a symbol back to its string.
#[inline]
pub fn resolve(sym: Symbol) -> &'static str {
    interner().resolve(&sym)
}

/// Pre-interns the define names produced for every program so the hot path
/// never allocates in the interner.
pub fn preload_common_defines() {
    let common = [
        "SHADING_MODEL",
        "USE_MAP",
        "USE_ALPHA_MAP",
        "USE_NORMAL_MAP",
        "USE_EMISSIVE_MAP",
        "USE_ROUGHNESS_MAP",
        "USE_METALNESS_MAP",
        "USE_AO_MAP",
        "USE_SPECULAR_MAP",
        "USE_GRADIENT_MAP",
        "USE_ENV_MAP",
        "USE_TRANSMISSION",
        "USE_CLEARCOAT",
        "USE_SKINNING",
        "USE_MORPH_TARGETS",
        "USE_INSTANCING",
        "USE_COLOR",
        "USE_FOG",
        "USE_SHADOW_MAP",
        "NUM_DIR_LIGHTS",
        "NUM_POINT_LIGHTS",
        "NUM_SPOT_LIGHTS",
        "NUM_RECT_AREA_LIGHTS",
        "NUM_CLIPPING_PLANES",
        "TONE_MAPPING",
        "OUTPUT_COLOR_SPACE",
        "1",
    ];

    for name in common {
        intern(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_and_resolve() {
        let s1 = intern("hello");
        let s2 = intern("hello");
        let s3 = intern("world");

        assert_eq!(s1, s2);
        assert_ne!(s1, s3);

        assert_eq!(resolve(s1), "hello");
        assert_eq!(resolve(s3), "world");
    }

    #[test]
    fn test_get() {
        let _ = intern("existing");

        assert!(get("existing").is_some());
        assert!(get("never_interned_anywhere").is_none());
    }
}
