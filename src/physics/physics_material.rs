use serde::{Deserialize, Serialize};

use crate::physics::error::{EvolutionError, Result};
use crate::physics::handles::MaterialHandle;

/// Rule for combining a material property of two touching surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CombineRule {
    #[default]
    Average,
    Min,
    Max,
    Multiply,
}

impl CombineRule {
    /// Picks the rule that wins when two materials disagree. Average always yields.
    pub fn max_priority(self, other: Self) -> Self {
        use CombineRule::*;
        match (self, other) {
            (Average, _) => other,
            (_, Average) => self,
            (Min, _) | (_, Min) => Min,
            (Multiply, _) | (_, Multiply) => Multiply,
            (Max, Max) => Max,
        }
    }

    pub fn combine(self, a: f32, b: f32) -> f32 {
        match self {
            Self::Average => (a + b) * 0.5,
            Self::Min => a.min(b),
            Self::Max => a.max(b),
            Self::Multiply => a * b,
        }
    }
}

/// Surface and activity properties shared by particles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicsMaterial {
    /// Coulomb friction coefficient.
    pub friction: f32,
    /// Fraction of approaching normal speed reflected on impact.
    pub restitution: f32,
    pub friction_combine: CombineRule,
    pub restitution_combine: CombineRule,
    /// Linear speed under which a particle counts towards sleeping.
    pub sleeping_linear_threshold: f32,
    /// Angular speed under which a particle counts towards sleeping.
    pub sleeping_angular_threshold: f32,
    /// Consecutive ticks under both thresholds before a particle is ready to sleep.
    pub sleep_counter_threshold: u32,
}

impl Default for PhysicsMaterial {
    fn default() -> Self {
        Self {
            friction: 0.5,
            restitution: 0.0,
            friction_combine: CombineRule::Average,
            restitution_combine: CombineRule::Average,
            sleeping_linear_threshold: 0.05,
            sleeping_angular_threshold: 0.05,
            sleep_counter_threshold: 20,
        }
    }
}

impl PhysicsMaterial {
    pub fn new(friction: f32, restitution: f32) -> Self {
        Self {
            friction,
            restitution,
            ..Default::default()
        }
    }

    /// Bouncy material.
    pub fn rubber() -> Self {
        Self::new(0.8, 0.8)
    }

    /// Nearly frictionless material.
    pub fn ice() -> Self {
        Self::new(0.05, 0.0)
    }

    pub fn with_friction(mut self, friction: f32) -> Self {
        self.friction = friction.max(0.0);
        self
    }

    pub fn with_restitution(mut self, restitution: f32) -> Self {
        self.restitution = restitution.clamp(0.0, 1.0);
        self
    }

    pub fn with_sleep_thresholds(mut self, linear: f32, angular: f32, ticks: u32) -> Self {
        self.sleeping_linear_threshold = linear;
        self.sleeping_angular_threshold = angular;
        self.sleep_counter_threshold = ticks;
        self
    }

    pub fn combine_friction(&self, other: &PhysicsMaterial) -> f32 {
        let rule = self.friction_combine.max_priority(other.friction_combine);
        rule.combine(self.friction, other.friction)
    }

    pub fn combine_restitution(&self, other: &PhysicsMaterial) -> f32 {
        let rule = self.restitution_combine.max_priority(other.restitution_combine);
        rule.combine(self.restitution, other.restitution)
    }
}

/// Registry of materials referenced by handle from particles and shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Materials {
    materials: Vec<PhysicsMaterial>,
}

impl Default for Materials {
    fn default() -> Self {
        Self {
            materials: vec![PhysicsMaterial::default()],
        }
    }
}

impl Materials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a material and returns its handle.
    pub fn add(&mut self, material: PhysicsMaterial) -> MaterialHandle {
        self.materials.push(material);
        MaterialHandle((self.materials.len() - 1) as u32)
    }

    #[inline]
    pub fn contains(&self, handle: MaterialHandle) -> bool {
        (handle.0 as usize) < self.materials.len()
    }

    /// Gets a material, falling back to the default material for unknown handles.
    #[inline]
    pub fn get(&self, handle: MaterialHandle) -> &PhysicsMaterial {
        self.materials
            .get(handle.0 as usize)
            .unwrap_or(&self.materials[0])
    }

    pub fn set(&mut self, handle: MaterialHandle, material: PhysicsMaterial) -> Result<()> {
        let slot = self
            .materials
            .get_mut(handle.0 as usize)
            .ok_or(EvolutionError::InvalidMaterial(handle))?;
        *slot = material;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn combine_uses_highest_priority_rule() {
        let a = PhysicsMaterial::new(0.2, 0.4);
        let mut b = PhysicsMaterial::new(0.6, 0.8);
        assert_relative_eq!(a.combine_friction(&b), 0.4);
        b.friction_combine = CombineRule::Min;
        assert_relative_eq!(a.combine_friction(&b), 0.2);
        assert_relative_eq!(b.combine_friction(&a), 0.2);
    }

    #[test]
    fn registry_starts_with_default_material() {
        let mut materials = Materials::new();
        assert!(materials.contains(MaterialHandle::DEFAULT));
        let rubber = materials.add(PhysicsMaterial::rubber());
        assert_eq!(rubber, MaterialHandle(1));
        assert_relative_eq!(materials.get(rubber).restitution, 0.8);
        assert!(materials
            .set(MaterialHandle(7), PhysicsMaterial::ice())
            .is_err());
    }
}
