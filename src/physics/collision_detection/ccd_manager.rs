use super::collision_constraint_allocator::{CollisionConstraintAllocator, CollisionConstraintId};
use super::pair_key::ParticlePairKey;
use crate::physics::particles::Particles;
use crate::utilities::collections::IndexSet;

/// Rewinds fast moving particles to their earliest time of impact.
#[derive(Debug, Default)]
pub struct CcdManager {
    rewound: IndexSet,
    rewound_count: usize,
}

impl CcdManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Particles rewound by the last pass.
    #[inline]
    pub fn rewound_count(&self) -> usize {
        self.rewound_count
    }

    /// Processes CCD constraints in order of time of impact (ties broken by pair key) and moves each
    /// awake dynamic particle involved back along its sweep to the impact. A particle is rewound at
    /// most once, by its earliest impact.
    pub fn apply_constraint_phase_ccd(
        &mut self,
        allocator: &mut CollisionConstraintAllocator,
        particles: &mut Particles,
    ) -> usize {
        self.rewound.clear();
        self.rewound_count = 0;
        let mut ccd_constraints: Vec<(f32, ParticlePairKey, CollisionConstraintId)> = Vec::new();
        allocator.visit_collisions(|id, constraint| {
            if constraint.is_enabled() && constraint.is_ccd() {
                ccd_constraints.push((
                    constraint.time_of_impact,
                    ParticlePairKey::new(constraint.particles[0], constraint.particles[1]),
                    id,
                ));
            }
        });
        ccd_constraints.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

        for (time_of_impact, _, id) in ccd_constraints {
            let Some(constraint) = allocator.constraint(id) else {
                continue;
            };
            for handle in constraint.particles {
                let Some(particle) = particles.get_mut(handle) else {
                    continue;
                };
                if !particle.state.is_awake_dynamic() || particle.disabled {
                    continue;
                }
                if !self.rewound.add(handle.index()) {
                    continue;
                }
                let start = particle.pose();
                let impact = start.lerp(&particle.predicted_pose(), time_of_impact);
                particle.p = impact.position;
                particle.q = impact.orientation;
                self.rewound_count += 1;
            }
        }
        if self.rewound_count > 0 {
            log::trace!("ccd: rewound {} particles", self.rewound_count);
        }
        self.rewound_count
    }
}
