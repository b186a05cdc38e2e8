#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::too_many_lines)]

pub mod errors;
pub mod renderer;
pub mod resources;
pub mod scene;
pub mod utils;

pub use errors::{Result, StrataError};
pub use renderer::{
    RecordingDevice, RenderEvent, RenderInfo, RenderTargetHandle, Renderer, RendererSettings, ToneMapping,
};
pub use resources::primitives::*;
pub use resources::{
    Assets, Color, ColorSpace, Geometry, GeometryHandle, Material, MaterialHandle, RenderTargetDescriptor, Side,
    Texture, TextureHandle,
};
pub use scene::{Camera, Light, Mesh, Node, NodeHandle, Scene, Transform};
pub use utils::interner;
