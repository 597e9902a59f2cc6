use glam::Vec3;

use crate::physics::collision_detection::CollisionConstraintAllocator;
use crate::physics::constraint_graph::{ConstraintGraph, Island};
use crate::physics::handles::ParticleHandle;
use crate::physics::particle_properties::{ObjectState, ParticleActivity};
use crate::physics::particles::Particles;
use crate::utilities::collections::IndexSet;

/// Moves whole islands between the awake and sleeping states. An island is never left partially
/// awake: waking any member wakes every member.
#[derive(Debug)]
pub struct IslandSleeper {
    members: IndexSet,
    slept: usize,
    woken: usize,
}

impl Default for IslandSleeper {
    fn default() -> Self {
        Self::new()
    }
}

impl IslandSleeper {
    pub fn new() -> Self {
        Self {
            members: IndexSet::new(64),
            slept: 0,
            woken: 0,
        }
    }

    /// Islands put to sleep since the last call to `reset_counters`.
    #[inline]
    pub fn slept_island_count(&self) -> usize {
        self.slept
    }

    /// Islands woken since the last call to `reset_counters`.
    #[inline]
    pub fn woken_island_count(&self) -> usize {
        self.woken
    }

    pub fn reset_counters(&mut self) {
        self.slept = 0;
        self.woken = 0;
    }

    fn collect_members(&mut self, island: &Island) {
        self.members.clear();
        for handle in &island.particles {
            self.members.add(handle.index());
        }
    }

    /// Wakes every awake island that still holds sleeping members, along with their mid-phases.
    pub fn wake_islands(
        &mut self,
        graph: &mut ConstraintGraph,
        particles: &mut Particles,
        collisions: &mut CollisionConstraintAllocator,
    ) -> usize {
        let mut woken = 0;
        for island in graph.islands_mut().iter_mut().filter(|island| island.needs_wake()) {
            for &handle in &island.particles {
                Self::wake_particle(particles, handle);
            }
            self.collect_members(island);
            let members = &self.members;
            collisions.set_mid_phases_sleeping(false, |mid_phase| {
                mid_phase
                    .particles()
                    .iter()
                    .any(|handle| members.contains(handle.index()))
            });
            island.has_sleeping_particles = false;
            log::debug!("island {} woke with {} particles", island.index, island.particles.len());
            woken += 1;
        }
        self.woken += woken;
        woken
    }

    /// Puts every member of an island to sleep and freezes its mid-phases.
    pub fn sleep_island(&mut self, island: &mut Island, particles: &mut Particles, collisions: &mut CollisionConstraintAllocator) {
        for &handle in &island.particles {
            if let Some(particle) = particles.get_mut(handle) {
                if particle.state == ObjectState::Dynamic {
                    particle.state = ObjectState::Sleeping;
                    particle.v = Vec3::ZERO;
                    particle.w = Vec3::ZERO;
                    particle.pre_v = Vec3::ZERO;
                    particle.pre_w = Vec3::ZERO;
                }
            }
        }
        self.collect_members(island);
        let members = &self.members;
        collisions.set_mid_phases_sleeping(true, |mid_phase| {
            mid_phase
                .particles()
                .iter()
                .any(|handle| members.contains(handle.index()))
        });
        island.is_sleeping = true;
        island.has_sleeping_particles = true;
        log::debug!("island {} went to sleep with {} particles", island.index, island.particles.len());
        self.slept += 1;
    }

    /// Returns a sleeping particle to the dynamic state with fresh activity counters.
    pub fn wake_particle(particles: &mut Particles, handle: ParticleHandle) -> bool {
        match particles.get_mut(handle) {
            Some(particle) if particle.state == ObjectState::Sleeping => {
                particle.state = ObjectState::Dynamic;
                particle.activity = ParticleActivity::default();
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::collidables::ImplicitShape;
    use crate::physics::constraints::{ConstraintRef, GraphConstraint};
    use crate::physics::handles::JointHandle;
    use crate::physics::particle_description::ParticleDescription;
    use crate::physics::particle_properties::RigidPose;
    use crate::physics::particles::RigidParticle;

    fn sphere(particles: &mut Particles, x: f32, asleep: bool) -> ParticleHandle {
        let mut description = ParticleDescription::dynamic(
            RigidPose::from_position(Vec3::new(x, 0.0, 0.0)),
            1.0,
            ImplicitShape::sphere(0.5),
        );
        if asleep {
            description = description.asleep();
        }
        particles.insert(|handle| RigidParticle::from_description(handle, &description))
    }

    fn linked_pair(
        particles: &mut Particles,
        collisions: &mut CollisionConstraintAllocator,
        a: ParticleHandle,
        b: ParticleHandle,
    ) -> ConstraintGraph {
        collisions.begin_detection(2);
        collisions.get_or_create_mid_phase(a, b);
        let mut graph = ConstraintGraph::new();
        graph.reset();
        graph.add_constraint(GraphConstraint::new(ConstraintRef::Joint(JointHandle(0)), [Some(a), Some(b)], (0, 0)));
        graph.build_islands(particles);
        graph
    }

    #[test]
    fn sleeping_then_waking_restores_dynamic_state() {
        let mut particles = Particles::new();
        let a = sphere(&mut particles, 0.0, false);
        let b = sphere(&mut particles, 0.9, false);
        let mut collisions = CollisionConstraintAllocator::new();
        let mut graph = linked_pair(&mut particles, &mut collisions, a, b);
        assert_eq!(graph.islands().len(), 1);
        let mut sleeper = IslandSleeper::new();

        let island = &mut graph.islands_mut()[0];
        sleeper.sleep_island(island, &mut particles, &mut collisions);
        assert!(particles.get(a).map_or(false, |particle| particle.is_sleeping()));
        assert!(particles.get(b).map_or(false, |particle| particle.is_sleeping()));
        assert!(collisions.mid_phases().iter().all(|mid_phase| mid_phase.is_sleeping()));

        island.is_sleeping = false;
        let woken = sleeper.wake_islands(&mut graph, &mut particles, &mut collisions);
        assert_eq!(woken, 1);
        for handle in [a, b] {
            let particle = particles.get(handle).map(|particle| particle.state);
            assert_eq!(particle, Some(ObjectState::Dynamic));
        }
        assert!(collisions.mid_phases().iter().all(|mid_phase| !mid_phase.is_sleeping()));
    }

    #[test]
    fn waking_ignores_awake_particles() {
        let mut particles = Particles::new();
        let awake = sphere(&mut particles, 0.0, false);
        let asleep = sphere(&mut particles, 5.0, true);
        assert!(!IslandSleeper::wake_particle(&mut particles, awake));
        assert!(IslandSleeper::wake_particle(&mut particles, asleep));
        assert!(!IslandSleeper::wake_particle(&mut particles, asleep));
    }
}
