//! Error Types
//!
//! This module defines the error types used throughout the renderer.
//!
//! # Overview
//!
//! Errors fall into four groups, and each group has a fixed propagation rule:
//!
//! | Group                   | Examples                                   | Handling                         |
//! |-------------------------|--------------------------------------------|----------------------------------|
//! | Recoverable-with-fallback | missing texture, unsupported material, compile failure | logged, placeholder substituted |
//! | Per-call swallowed      | invalid enum on a state-set call           | logged once at the state tracker |
//! | Fatal-to-frame          | context loss                               | [`StrataError::ContextLost`]     |
//! | Programmer error        | bad uniform index, disposing a bound target | returned to the caller unchanged |
//!
//! Only the last two ever reach application code.
//!
//! # Usage
//!
//! ```rust,ignore
//! use strata::errors::{StrataError, Result};
//!
//! fn frame(renderer: &mut Renderer<RecordingDevice>, scene: &mut Scene, camera: NodeHandle) -> Result<()> {
//!     match renderer.render(scene, camera) {
//!         Err(StrataError::ContextLost) => Ok(()), // pause the loop and wait for restore
//!         other => other,
//!     }
//! }
//! ```

use thiserror::Error;

use crate::renderer::device::DeviceError;
use crate::renderer::program::ProgramError;

/// The main error type for the Strata renderer.
#[derive(Error, Debug)]
pub enum StrataError {
    // ========================================================================
    // Fatal-to-frame
    // ========================================================================
    /// The GPU context was lost; the frame was abandoned and every
    /// GPU-resident cache entry has been invalidated.
    #[error("GPU context lost")]
    ContextLost,

    // ========================================================================
    // Programmer errors
    // ========================================================================
    /// A uniform slot index outside the reflected table was requested.
    #[error("Uniform index out of range: {index} (program has {len} uniforms)")]
    UniformIndexOutOfRange {
        /// The invalid index
        index: usize,
        /// Number of reflected uniforms
        len: usize,
    },

    /// A vertex attribute update changed the attribute's length.
    #[error("Attribute {name} shape mismatch: expected {expected} values, got {actual}")]
    AttributeShapeMismatch {
        /// Attribute name
        name: &'static str,
        /// Length fixed at creation
        expected: usize,
        /// Length of the rejected update
        actual: usize,
    },

    /// A resource was disposed while still bound for rendering.
    #[error("Resource still in use: {0}")]
    ResourceInUse(String),

    /// A handle did not resolve to a live resource.
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// A scene node handle did not resolve.
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// Attaching a node beneath its own descendant.
    #[error("Cannot attach node beneath its own descendant")]
    CyclicHierarchy,

    /// The node passed to `render` carries no camera component.
    #[error("Node is not a camera")]
    NotACamera,

    // ========================================================================
    // Device & program errors surfaced through explicit APIs
    // ========================================================================
    /// A device call failed outside the absorbing state-tracker boundary.
    #[error("Device error: {0}")]
    Device(DeviceError),

    /// Program generation or compilation failed.
    #[error("Program error: {0}")]
    Program(#[from] ProgramError),
}

// Context loss keeps its own variant so callers can match on it directly.
impl From<DeviceError> for StrataError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::ContextLost => Self::ContextLost,
            other => Self::Device(other),
        }
    }
}

/// Alias for `Result<T, StrataError>`.
pub type Result<T> = std::result::Result<T, StrataError>;
