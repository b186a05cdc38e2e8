/// 32-slot membership mask. A camera sees a node when they share a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Layers(u32);

impl Default for Layers {
    fn default() -> Self {
        Self(1)
    }
}

impl Layers {
    pub const ALL: Self = Self(u32::MAX);
    pub const NONE: Self = Self(0);

    #[must_use]
    pub fn only(layer: u32) -> Self {
        Self(1 << (layer & 31))
    }

    #[must_use]
    pub fn mask(self) -> u32 {
        self.0
    }

    pub fn set(&mut self, layer: u32) {
        self.0 = 1 << (layer & 31);
    }

    pub fn enable(&mut self, layer: u32) {
        self.0 |= 1 << (layer & 31);
    }

    pub fn disable(&mut self, layer: u32) {
        self.0 &= !(1 << (layer & 31));
    }

    #[must_use]
    pub fn is_enabled(self, layer: u32) -> bool {
        self.0 & (1 << (layer & 31)) != 0
    }

    #[must_use]
    pub fn test(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layer_zero() {
        let mut a = Layers::default();
        assert!(a.is_enabled(0));
        let b = Layers::only(3);
        assert!(!a.test(b));
        a.enable(3);
        assert!(a.test(b));
        a.disable(0);
        a.disable(3);
        assert_eq!(a, Layers::NONE);
    }
}
