//! Core resource definitions
//!
//! CPU-side data the renderer turns into GPU objects. Nothing in this module
//! touches the device:
//! - [`Geometry`]: vertex attributes, index, groups, morph targets
//! - [`Material`]: shading model, parameters and render state
//! - [`Texture`]: texel data and sampler settings
//! - [`Assets`]: slotmap store with dispose notifications
//! - [`ShaderDefines`]: the define set that keys compiled programs

pub mod assets;
pub mod color;
pub mod geometry;
pub mod material;
pub mod primitives;
pub mod render_target;
pub mod shader_defines;
pub mod texture;
pub mod version_tracker;

pub use assets::{Assets, DisposeEvent, GeometryHandle, MaterialHandle, TextureHandle};
pub use color::{Color, ColorManagement, ColorSpace};
pub use geometry::{
    BoundingSphere, Geometry, GeometryFeatures, GeometryGroup, MorphTarget, PrimitiveMode,
    VertexAttribute,
};
pub use material::{
    Blending, CompareFunc, Material, MaterialCommon, MaterialFeatures, MaterialKind, MaterialValue,
    ShadingModel, Side,
};
pub use render_target::{DepthAttachment, RenderTargetDescriptor};
pub use shader_defines::ShaderDefines;
pub use texture::{FilterMode, Sampler, Texture, TextureFormat, TextureKind, TextureMapping, WrapMode};
pub use version_tracker::{ChangeTracker, MutGuard};
