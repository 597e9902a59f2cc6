use std::fmt;

use serde::{Deserialize, Serialize};

use crate::physics::handles::ParticleHandle;

/// Order independent key identifying a pair of particles: the smaller slot index in the high 32 bits,
/// the larger in the low 32 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParticlePairKey(pub u64);

impl ParticlePairKey {
    #[inline(always)]
    pub fn new(a: ParticleHandle, b: ParticleHandle) -> Self {
        Self::from_indices(a.index, b.index)
    }

    #[inline(always)]
    pub fn from_indices(a: u32, b: u32) -> Self {
        let (min, max) = if a <= b { (a, b) } else { (b, a) };
        Self(((min as u64) << 32) | max as u64)
    }

    /// Smaller particle index of the pair.
    #[inline(always)]
    pub fn first(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Larger particle index of the pair.
    #[inline(always)]
    pub fn second(&self) -> u32 {
        self.0 as u32
    }
}

impl fmt::Display for ParticlePairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}, {}>", self.first(), self.second())
    }
}

/// Identifies a shape (or union child) on one side of a pair. Union children carry their index,
/// every other shape uses `NO_CHILD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ShapeLocator {
    pub shape: u16,
    pub child: u16,
}

impl ShapeLocator {
    pub const NO_CHILD: u16 = u16::MAX;
    /// Most shapes a particle, or children a union, may have.
    pub const MAX_SHAPES: usize = Self::NO_CHILD as usize;

    #[inline(always)]
    pub fn shape(shape: usize) -> Self {
        debug_assert!(shape < Self::MAX_SHAPES, "shape index {} does not fit a locator", shape);
        Self {
            shape: shape as u16,
            child: Self::NO_CHILD,
        }
    }

    #[inline(always)]
    pub fn child(shape: usize, child: usize) -> Self {
        debug_assert!(
            shape < Self::MAX_SHAPES && child < Self::MAX_SHAPES,
            "shape index {}/{} does not fit a locator",
            shape,
            child
        );
        Self {
            shape: shape as u16,
            child: child as u16,
        }
    }

    #[inline(always)]
    pub fn has_child(&self) -> bool {
        self.child != Self::NO_CHILD
    }

    #[inline(always)]
    fn packed(&self) -> u64 {
        ((self.shape as u64) << 16) | self.child as u64
    }
}

/// Key of a shape pair within a particle pair. Unlike `ParticlePairKey` it keeps pair order, because
/// the particles of a mid-phase have a fixed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ShapePairKey(pub u64);

impl ShapePairKey {
    #[inline(always)]
    pub fn new(a: ShapeLocator, b: ShapeLocator) -> Self {
        Self((a.packed() << 32) | b.packed())
    }

    #[inline(always)]
    pub fn locator0(&self) -> ShapeLocator {
        ShapeLocator {
            shape: (self.0 >> 48) as u16,
            child: (self.0 >> 32) as u16,
        }
    }

    #[inline(always)]
    pub fn locator1(&self) -> ShapeLocator {
        ShapeLocator {
            shape: (self.0 >> 16) as u16,
            child: self.0 as u16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn particle_pair_key_is_symmetric() {
        let a = ParticleHandle::new(3, 0);
        let b = ParticleHandle::new(17, 4);
        assert_eq!(ParticlePairKey::new(a, b), ParticlePairKey::new(b, a));
        let key = ParticlePairKey::new(b, a);
        assert_eq!(key.first(), 3);
        assert_eq!(key.second(), 17);
        assert_ne!(
            ParticlePairKey::from_indices(1, 2),
            ParticlePairKey::from_indices(2, 3)
        );
    }

    #[test]
    fn shape_pair_key_round_trips_locators() {
        let a = ShapeLocator::child(2, 9);
        let b = ShapeLocator::shape(1);
        let key = ShapePairKey::new(a, b);
        assert_eq!(key.locator0(), a);
        assert_eq!(key.locator1(), b);
        assert!(!key.locator1().has_child());
        assert_ne!(key, ShapePairKey::new(b, a));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "does not fit a locator")]
    fn oversized_child_index_is_caught() {
        ShapeLocator::child(0, ShapeLocator::MAX_SHAPES);
    }
}
