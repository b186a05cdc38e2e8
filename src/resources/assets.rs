//! Resource store owned by a [`Scene`](crate::scene::Scene).
//!
//! Geometries, materials and textures live in slotmaps and are referenced by
//! `Copy` handles. Disposing a resource removes it and publishes a
//! [`DisposeEvent`] carrying the resource id; GPU-side caches (keyed by id,
//! never by handle) drain the channel and release what they hold.

use flume::{Receiver, Sender};
use slotmap::{SlotMap, new_key_type};

use crate::resources::geometry::Geometry;
use crate::resources::material::Material;
use crate::resources::texture::Texture;

new_key_type! {
    pub struct GeometryHandle;
    pub struct MaterialHandle;
    pub struct TextureHandle;
}

/// Published when a resource leaves its store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisposeEvent {
    Geometry(u64),
    Material(u64),
    Texture(u64),
}

pub struct Assets {
    geometries: SlotMap<GeometryHandle, Geometry>,
    materials: SlotMap<MaterialHandle, Material>,
    textures: SlotMap<TextureHandle, Texture>,
    dispose_tx: Sender<DisposeEvent>,
    dispose_rx: Receiver<DisposeEvent>,
}

impl Default for Assets {
    fn default() -> Self {
        Self::new()
    }
}

impl Assets {
    #[must_use]
    pub fn new() -> Self {
        let (dispose_tx, dispose_rx) = flume::unbounded();
        Self {
            geometries: SlotMap::with_key(),
            materials: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            dispose_tx,
            dispose_rx,
        }
    }

    /// Receiving side of the dispose channel.
    ///
    /// Receivers share one queue: each event is delivered to exactly one of
    /// them, so only the renderer drawing this scene should drain it.
    #[must_use]
    pub fn dispose_events(&self) -> Receiver<DisposeEvent> {
        self.dispose_rx.clone()
    }

    fn notify(&self, event: DisposeEvent) {
        // The store holds a receiver itself, so the channel is never disconnected.
        if self.dispose_tx.send(event).is_err() {
            log::error!("Dispose channel closed; {event:?} dropped");
        }
    }

    // === Geometry ===

    pub fn add_geometry(&mut self, geometry: Geometry) -> GeometryHandle {
        self.geometries.insert(geometry)
    }

    #[must_use]
    pub fn geometry(&self, handle: GeometryHandle) -> Option<&Geometry> {
        self.geometries.get(handle)
    }

    pub fn geometry_mut(&mut self, handle: GeometryHandle) -> Option<&mut Geometry> {
        self.geometries.get_mut(handle)
    }

    pub fn dispose_geometry(&mut self, handle: GeometryHandle) -> Option<Geometry> {
        let geometry = self.geometries.remove(handle)?;
        self.notify(DisposeEvent::Geometry(geometry.id()));
        Some(geometry)
    }

    // === Material ===

    pub fn add_material(&mut self, material: Material) -> MaterialHandle {
        self.materials.insert(material)
    }

    #[must_use]
    pub fn material(&self, handle: MaterialHandle) -> Option<&Material> {
        self.materials.get(handle)
    }

    pub fn material_mut(&mut self, handle: MaterialHandle) -> Option<&mut Material> {
        self.materials.get_mut(handle)
    }

    pub fn dispose_material(&mut self, handle: MaterialHandle) -> Option<Material> {
        let material = self.materials.remove(handle)?;
        self.notify(DisposeEvent::Material(material.id()));
        Some(material)
    }

    // === Texture ===

    pub fn add_texture(&mut self, texture: Texture) -> TextureHandle {
        self.textures.insert(texture)
    }

    #[must_use]
    pub fn texture(&self, handle: TextureHandle) -> Option<&Texture> {
        self.textures.get(handle)
    }

    pub fn texture_mut(&mut self, handle: TextureHandle) -> Option<&mut Texture> {
        self.textures.get_mut(handle)
    }

    pub fn dispose_texture(&mut self, handle: TextureHandle) -> Option<Texture> {
        let texture = self.textures.remove(handle)?;
        self.notify(DisposeEvent::Texture(texture.id()));
        Some(texture)
    }

    #[must_use]
    pub fn counts(&self) -> (usize, usize, usize) {
        (self.geometries.len(), self.materials.len(), self.textures.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::color::Color;

    #[test]
    fn dispose_publishes_resource_id() {
        let mut assets = Assets::new();
        let events = assets.dispose_events();
        let handle = assets.add_material(Material::basic(Color::WHITE));
        let id = assets.material(handle).unwrap().id();

        assert!(assets.dispose_material(handle).is_some());
        assert!(assets.dispose_material(handle).is_none());
        assert_eq!(events.try_recv().unwrap(), DisposeEvent::Material(id));
        assert!(events.try_recv().is_err());
    }
}
