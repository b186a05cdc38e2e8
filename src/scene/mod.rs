//! Scene graph
//!
//! - [`Node`]: hierarchy and [`Transform`]
//! - [`Scene`]: node arena, component maps, fog, background and assets
//! - [`Camera`], [`Light`], [`Mesh`]: components keyed by node handle
//! - [`transform_system`]: parent-before-child world matrix propagation

pub mod camera;
pub mod layers;
pub mod light;
pub mod mesh;
pub mod node;
#[allow(clippy::module_inception)]
pub mod scene;
pub mod transform;
pub mod transform_system;

pub use camera::{Camera, Frustum, Projection};
pub use layers::Layers;
pub use light::{Light, LightKind, LightShadow};
pub use mesh::{MaterialSlot, Mesh, Skin};
pub use node::Node;
pub use scene::{Fog, RemoveMode, Scene};
pub use transform::Transform;

use slotmap::new_key_type;

new_key_type! {
    pub struct NodeHandle;
}
