use crate::physics::collision_detection::{CollisionConstraintAllocator, ManifoldPoint, PbdCollisionConstraint};
use crate::physics::constraint_graph::ConstraintGraph;
use crate::physics::handles::ParticleHandle;
use crate::physics::island_solver::IslandSolveData;
use crate::physics::particles::{Particles, RigidParticle};

/// Hooks into the stages of a tick. Every method defaults to doing nothing.
///
/// `post_apply` and `post_apply_push_out` run on worker threads, once per island.
pub trait IEvolutionObserver: Send + Sync {
    /// After forces and kinematic targets were integrated.
    fn post_integrate(&self, _particles: &Particles) {}

    /// After the narrow phase produced this tick's contacts.
    fn post_detect_collisions(&self, _collisions: &CollisionConstraintAllocator) {}

    /// After islands were built, before any of them is solved.
    fn pre_apply(&self, _graph: &ConstraintGraph) {}

    /// After the position iterations of an island.
    fn post_apply(&self, _island: &IslandSolveData) {}

    /// After the push-out iterations of an island.
    fn post_apply_push_out(&self, _island: &IslandSolveData) {}

    /// After the evolution created a particle of its own, such as a cluster parent.
    fn internal_particle_initialized(&self, _particle: &RigidParticle) {}
}

/// Observer used when none is installed.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEvolutionObserver;

impl IEvolutionObserver for NoopEvolutionObserver {}

/// Mutable view of one collision handed to collision modifiers.
pub struct CollisionModifierContact<'a> {
    constraint: &'a mut PbdCollisionConstraint,
}

impl<'a> CollisionModifierContact<'a> {
    pub fn new(constraint: &'a mut PbdCollisionConstraint) -> Self {
        Self { constraint }
    }

    #[inline]
    pub fn particles(&self) -> [ParticleHandle; 2] {
        self.constraint.particles
    }

    #[inline]
    pub fn manifold_points(&self) -> &[ManifoldPoint] {
        &self.constraint.manifold_points
    }

    /// Smallest separation of the contact.
    #[inline]
    pub fn min_phi(&self) -> f32 {
        self.constraint.min_phi()
    }

    #[inline]
    pub fn is_disabled(&self) -> bool {
        self.constraint.disabled_by_modifier
    }

    /// Excludes the collision from this tick's solve.
    pub fn disable(&mut self) {
        self.constraint.disabled_by_modifier = true;
    }

    pub fn set_friction(&mut self, friction: f32) {
        self.constraint.material.friction = friction;
    }

    pub fn set_restitution(&mut self, restitution: f32) {
        self.constraint.material.restitution = restitution;
    }

    pub fn set_stiffness(&mut self, stiffness: f32) {
        self.constraint.material.stiffness = stiffness;
    }
}

/// Inspects and edits contacts after the narrow phase, before islands are built.
pub trait ICollisionModifier: Send + Sync {
    fn modify(&self, particles: &Particles, contact: &mut CollisionModifierContact);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::collision_detection::ShapePairKey;

    struct DisableAll;

    impl ICollisionModifier for DisableAll {
        fn modify(&self, _particles: &Particles, contact: &mut CollisionModifierContact) {
            contact.set_friction(0.0);
            contact.disable();
        }
    }

    #[test]
    fn modifiers_edit_the_constraint() {
        let mut constraint =
            PbdCollisionConstraint::new([ParticleHandle::new(0, 0), ParticleHandle::new(1, 0)], ShapePairKey(0));
        let particles = Particles::new();
        let mut contact = CollisionModifierContact::new(&mut constraint);
        DisableAll.modify(&particles, &mut contact);
        assert!(contact.is_disabled());
        assert_eq!(contact.particles()[1].index, 1);
        assert_eq!(constraint.material.friction, 0.0);
        assert!(constraint.disabled_by_modifier);
    }
}
