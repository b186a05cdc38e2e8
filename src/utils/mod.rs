//! Utility Module
//!
//! This module provides small shared helpers:
//!
//! - [`interner`]: String interning for efficient symbol storage
//! - [`WarnOnce`]: Deduplicated warnings for per-frame conditions
//!
//! # String Interning
//!
//! The interner module provides efficient string storage for frequently
//! used identifiers like shader define names. Interned strings (Symbols)
//! can be compared in O(1) time.
//!
//! ```rust,ignore
//! use strata::utils::interner;
//!
//! let sym1 = interner::intern("USE_NORMAL_MAP");
//! let sym2 = interner::intern("USE_NORMAL_MAP");
//! assert_eq!(sym1, sym2); // O(1) comparison
//! ```

pub mod interner;
pub mod warn_once;

pub use interner::Symbol;
pub use warn_once::WarnOnce;
