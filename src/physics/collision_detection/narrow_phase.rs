use super::collision_constraint_allocator::CollisionConstraintAllocator;
use super::mid_phase::CollisionDetectionContext;
use crate::physics::handles::ParticleHandle;
use crate::physics::particles::RigidParticle;

/// Counters from the last narrow phase run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NarrowPhaseStats {
    pub pairs: usize,
    pub sleeping_pairs_skipped: usize,
    pub active_constraints: usize,
    pub pruned_mid_phases: usize,
}

/// Drives mid-phases for the pairs reported by the broad phase.
#[derive(Debug, Default)]
pub struct NarrowPhase {
    stats: NarrowPhaseStats,
}

impl NarrowPhase {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn stats(&self) -> NarrowPhaseStats {
        self.stats
    }

    /// Whether a pair can skip detection: its mid-phase is asleep and neither particle is awake.
    fn is_asleep(particle0: &RigidParticle, particle1: &RigidParticle) -> bool {
        let is_awake = |particle: &RigidParticle| {
            particle.state.is_awake_dynamic() || particle.is_moving_kinematic()
        };
        !is_awake(particle0) && !is_awake(particle1)
    }

    /// Runs restore or contact generation for every pair and rebuilds the allocator's active list.
    pub fn update(
        &mut self,
        allocator: &mut CollisionConstraintAllocator,
        pairs: &[(ParticleHandle, ParticleHandle)],
        context: &CollisionDetectionContext,
        grace_ticks: u64,
    ) {
        let mut stats = NarrowPhaseStats {
            pruned_mid_phases: allocator.begin_detection(grace_ticks),
            pairs: pairs.len(),
            ..Default::default()
        };
        for &(a, b) in pairs {
            let (Some(particle_a), Some(particle_b)) = (context.particles.get(a), context.particles.get(b)) else {
                continue;
            };
            let index = allocator.get_or_create_mid_phase(a, b);
            let mid_phase = allocator.mid_phase_mut(index);
            if mid_phase.is_sleeping() {
                if Self::is_asleep(particle_a, particle_b) {
                    stats.sleeping_pairs_skipped += 1;
                    allocator.add_active_constraints(index);
                    continue;
                }
                mid_phase.set_is_sleeping(false);
            }
            mid_phase.generate_collisions(context);
            allocator.add_active_constraints(index);
        }
        stats.active_constraints = allocator.active_constraints().len();
        log::trace!(
            "narrow phase: {} pairs, {} asleep, {} active constraints, {} mid-phases pruned",
            stats.pairs,
            stats.sleeping_pairs_skipped,
            stats.active_constraints,
            stats.pruned_mid_phases
        );
        self.stats = stats;
    }
}
