use std::hash::Hash;

use serde::{Deserialize, Serialize};

/// Generation-checked reference to a particle slot. A handle whose generation no longer matches its
/// slot refers to a destroyed particle.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticleHandle {
    pub index: u32,
    pub generation: u32,
}

impl ParticleHandle {
    #[inline(always)]
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    #[inline(always)]
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

// Newtype Pattern for enhanced type safety
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JointHandle(pub u32);

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SuspensionHandle(pub u32);

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MaterialHandle(pub u32);

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClusterHandle(pub u32);

impl MaterialHandle {
    /// Material registered by every evolution at construction.
    pub const DEFAULT: Self = Self(0);
}

// Simple implementations for Display for user-friendliness
impl std::fmt::Display for ParticleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "ParticleHandle<{}:{}>", self.index, self.generation)
    }
}

impl std::fmt::Display for JointHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "JointHandle<{}>", self.0)
    }
}

impl std::fmt::Display for SuspensionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "SuspensionHandle<{}>", self.0)
    }
}

impl std::fmt::Display for MaterialHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "MaterialHandle<{}>", self.0)
    }
}

impl std::fmt::Display for ClusterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "ClusterHandle<{}>", self.0)
    }
}
