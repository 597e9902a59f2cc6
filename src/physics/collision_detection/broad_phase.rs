use crate::physics::handles::ParticleHandle;
use crate::physics::particles::Particles;
use crate::utilities::bounding_box::BoundingBox;

#[derive(Clone, Copy)]
struct Endpoint {
    min: f32,
    max: f32,
    slot: usize,
    dynamic: bool,
}

/// Deterministic sweep and prune over particle world bounds along the x axis.
#[derive(Debug, Default)]
pub struct BroadPhase {
    pair_count: usize,
}

impl BroadPhase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pairs reported by the last query.
    #[inline]
    pub fn pair_count(&self) -> usize {
        self.pair_count
    }

    /// Finds every pair of enabled particles whose world bounds overlap and of which at least one is
    /// dynamic (awake or asleep). Pairs are ordered by slot index, lower index first.
    pub fn find_overlapping_pairs(&mut self, particles: &Particles) -> Vec<(ParticleHandle, ParticleHandle)> {
        let mut bounds: Vec<BoundingBox> = Vec::with_capacity(particles.len());
        let mut handles: Vec<ParticleHandle> = Vec::with_capacity(particles.len());
        let mut endpoints: Vec<Endpoint> = Vec::with_capacity(particles.len());
        for particle in particles.iter() {
            let world = particle.world_bounds;
            // Skip invalid boxes deterministically.
            if particle.disabled || world.is_empty() || !world.min.x.is_finite() || !world.max.x.is_finite() {
                continue;
            }
            endpoints.push(Endpoint {
                min: world.min.x,
                max: world.max.x,
                slot: handles.len(),
                dynamic: particle.is_dynamic(),
            });
            bounds.push(world);
            handles.push(particle.handle);
        }

        endpoints.sort_by(|a, b| a.min.total_cmp(&b.min).then(a.slot.cmp(&b.slot)));

        let mut active: Vec<Endpoint> = Vec::new();
        let mut out: Vec<(usize, usize)> = Vec::new();
        for endpoint in endpoints {
            active.retain(|other| other.max >= endpoint.min);
            for other in &active {
                if !(endpoint.dynamic || other.dynamic) {
                    continue;
                }
                let (i, k) = if other.slot < endpoint.slot {
                    (other.slot, endpoint.slot)
                } else {
                    (endpoint.slot, other.slot)
                };
                if bounds[i].intersects(&bounds[k]) {
                    out.push((i, k));
                }
            }
            active.push(endpoint);
        }
        out.sort_unstable();
        self.pair_count = out.len();
        out.into_iter().map(|(i, k)| (handles[i], handles[k])).collect()
    }
}
