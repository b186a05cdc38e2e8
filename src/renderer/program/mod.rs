//! Shader programs
//!
//! - [`parameters`]: material + scene state → canonical define set and vertex layout
//! - [`shader_gen`]: define set → GLSL source (minijinja templates)
//! - [`cache`]: reference-counted program cache with compile-state tracking
//! - [`uniform_table`]: reflected uniform slots with per-slot value caching

pub mod cache;
pub mod parameters;
pub mod shader_gen;
pub mod uniform_table;

pub use cache::{FastProgramKey, ProgramCache, ProgramHandle, ProgramState};
pub use parameters::{
    AttributeSlot, AttributeSource, ProgramInputs, ProgramParameters, ProgramVariant, ShadowConfig,
    build_parameters,
};
pub use uniform_table::{UniformGroup, UniformSlot, UniformTable};

use thiserror::Error;

use crate::renderer::device::ShaderStage;

/// Failures while building or compiling a program.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProgramError {
    #[error("{stage} shader failed to compile: {log}")]
    CompileFailed { stage: ShaderStage, log: String },

    #[error("Program failed to link: {0}")]
    LinkFailed(String),

    /// The requested feature combination cannot run on this device.
    #[error("Unsupported program configuration: {0}")]
    Unsupported(String),

    #[error("Shader template error: {0}")]
    Template(String),
}
