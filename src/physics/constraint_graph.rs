use std::collections::{HashMap, VecDeque};

use crate::physics::constraints::GraphConstraint;
use crate::physics::handles::ParticleHandle;
use crate::physics::particles::Particles;

const NO_ISLAND: u32 = u32::MAX;

/// Connected set of dynamic particles and the constraints between them. Rebuilt every tick.
#[derive(Debug, Clone, Default)]
pub struct Island {
    pub index: usize,
    /// Dynamic members in slot order.
    pub particles: Vec<ParticleHandle>,
    /// Constraints sorted by level, then by their stable key.
    pub constraints: Vec<GraphConstraint>,
    /// Every member is asleep and nothing is pushing the island awake.
    pub is_sleeping: bool,
    pub has_sleeping_particles: bool,
    pub touches_moving_kinematic: bool,
}

impl Island {
    fn new(index: usize) -> Self {
        Self {
            index,
            ..Default::default()
        }
    }

    /// An awake island still holding sleeping members must wake them all.
    #[inline]
    pub fn needs_wake(&self) -> bool {
        !self.is_sleeping && self.has_sleeping_particles
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct NodeSlot {
    epoch: u64,
    parent: u32,
    rank: u32,
    island: u32,
}

/// Partitions particles into islands through a union-find over particle slots. Slots are stamped with
/// the build epoch, so nothing needs clearing between builds and particles carry no graph markers.
#[derive(Debug, Default)]
pub struct ConstraintGraph {
    epoch: u64,
    nodes: Vec<NodeSlot>,
    constraints: Vec<GraphConstraint>,
    islands: Vec<Island>,
    excluded_constraint_count: usize,
}

impl ConstraintGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new build, dropping the previous edges and islands.
    pub fn reset(&mut self) {
        self.epoch += 1;
        self.constraints.clear();
        self.islands.clear();
        self.excluded_constraint_count = 0;
    }

    #[inline]
    pub fn add_constraint(&mut self, constraint: GraphConstraint) {
        self.constraints.push(constraint);
    }

    #[inline]
    pub fn islands(&self) -> &[Island] {
        &self.islands
    }

    #[inline]
    pub fn islands_mut(&mut self) -> &mut [Island] {
        &mut self.islands
    }

    /// Constraints dropped by the last build because they touched no dynamic particle.
    #[inline]
    pub fn excluded_constraint_count(&self) -> usize {
        self.excluded_constraint_count
    }

    /// Island the particle was placed in by the last build.
    pub fn island_of(&self, handle: ParticleHandle) -> Option<usize> {
        let index = handle.index as usize;
        if !self.is_node(index) {
            return None;
        }
        let mut root = index;
        while self.nodes[root].parent as usize != root {
            root = self.nodes[root].parent as usize;
        }
        let island = self.nodes[root].island;
        (island != NO_ISLAND).then_some(island as usize)
    }

    #[inline]
    fn is_node(&self, index: usize) -> bool {
        self.nodes.get(index).map_or(false, |node| node.epoch == self.epoch)
    }

    fn find(&mut self, index: usize) -> usize {
        let mut root = index;
        while self.nodes[root].parent as usize != root {
            root = self.nodes[root].parent as usize;
        }
        let mut current = index;
        while current != root {
            let next = self.nodes[current].parent as usize;
            self.nodes[current].parent = root as u32;
            current = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (root_a, root_b) = (self.find(a), self.find(b));
        if root_a == root_b {
            return;
        }
        let (rank_a, rank_b) = (self.nodes[root_a].rank, self.nodes[root_b].rank);
        if rank_a < rank_b {
            self.nodes[root_a].parent = root_b as u32;
        } else {
            self.nodes[root_b].parent = root_a as u32;
            if rank_a == rank_b {
                self.nodes[root_a].rank += 1;
            }
        }
    }

    /// Slot indices of the constraint's dynamic particles.
    fn dynamic_endpoints(constraint: &GraphConstraint, particles: &Particles) -> [Option<usize>; 2] {
        constraint.particles.map(|handle| {
            handle
                .filter(|&handle| particles.get(handle).map_or(false, |particle| particle.is_dynamic()))
                .map(|handle| handle.index())
        })
    }

    /// Builds islands from the constraints added since `reset`. Every enabled dynamic particle ends up
    /// in exactly one island; constraints go to the island of their dynamic particles.
    pub fn build_islands(&mut self, particles: &Particles) {
        let epoch = self.epoch;
        if self.nodes.len() < particles.slot_count() {
            self.nodes.resize(particles.slot_count(), NodeSlot::default());
        }
        for particle in particles.iter().filter(|particle| particle.is_dynamic()) {
            let index = particle.handle.index();
            self.nodes[index] = NodeSlot {
                epoch,
                parent: index as u32,
                rank: 0,
                island: NO_ISLAND,
            };
        }

        let constraints = std::mem::take(&mut self.constraints);
        let endpoints: Vec<[Option<usize>; 2]> = constraints
            .iter()
            .map(|constraint| Self::dynamic_endpoints(constraint, particles))
            .collect();
        for ends in &endpoints {
            if let [Some(a), Some(b)] = *ends {
                self.union(a, b);
            }
        }

        let mut awake_counts: Vec<usize> = Vec::new();
        for particle in particles.iter().filter(|particle| particle.is_dynamic()) {
            let root = self.find(particle.handle.index());
            if self.nodes[root].island == NO_ISLAND {
                self.nodes[root].island = self.islands.len() as u32;
                self.islands.push(Island::new(self.islands.len()));
                awake_counts.push(0);
            }
            let island_index = self.nodes[root].island as usize;
            let island = &mut self.islands[island_index];
            island.particles.push(particle.handle);
            if particle.is_sleeping() {
                island.has_sleeping_particles = true;
            } else {
                awake_counts[island_index] += 1;
            }
        }

        for (constraint, ends) in constraints.into_iter().zip(endpoints) {
            let Some(first) = ends[0].or(ends[1]) else {
                self.excluded_constraint_count += 1;
                continue;
            };
            let root = self.find(first);
            if let [Some(_), Some(second)] = ends {
                assert_eq!(root, self.find(second), "Constraints cannot span islands.");
            }
            let island = &mut self.islands[self.nodes[root].island as usize];
            let touches_moving_kinematic = constraint.particles.iter().flatten().any(|&handle| {
                particles
                    .get(handle)
                    .map_or(false, |particle| particle.is_moving_kinematic())
            });
            island.touches_moving_kinematic |= touches_moving_kinematic;
            island.constraints.push(constraint);
        }

        for (island, awake_count) in self.islands.iter_mut().zip(awake_counts) {
            island.is_sleeping = awake_count == 0 && !island.touches_moving_kinematic;
            assign_levels(island);
        }
        log::trace!(
            "constraint graph: {} islands, {} constraints excluded",
            self.islands.len(),
            self.excluded_constraint_count
        );
    }
}

/// Breadth-first levels from the constraints touching non-dynamic particles, then sorts the island's
/// constraints by (level, key). Islands that touch nothing static are all level 0.
fn assign_levels(island: &mut Island) {
    let local: HashMap<ParticleHandle, usize> = island
        .particles
        .iter()
        .enumerate()
        .map(|(index, &handle)| (handle, index))
        .collect();
    let ends: Vec<[Option<usize>; 2]> = island
        .constraints
        .iter()
        .map(|constraint| constraint.particles.map(|handle| handle.and_then(|handle| local.get(&handle).copied())))
        .collect();

    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); island.particles.len()];
    let mut levels = vec![u32::MAX; island.particles.len()];
    let mut queue = VecDeque::new();
    for (constraint_index, constraint_ends) in ends.iter().enumerate() {
        let grounded = constraint_ends.iter().any(Option::is_none);
        for &particle in constraint_ends.iter().flatten() {
            adjacency[particle].push(constraint_index);
            if grounded && levels[particle] == u32::MAX {
                levels[particle] = 0;
                queue.push_back(particle);
            }
        }
    }
    while let Some(particle) = queue.pop_front() {
        for &constraint_index in &adjacency[particle] {
            for &other in ends[constraint_index].iter().flatten() {
                if levels[other] == u32::MAX {
                    levels[other] = levels[particle] + 1;
                    queue.push_back(other);
                }
            }
        }
    }

    for (constraint, constraint_ends) in island.constraints.iter_mut().zip(&ends) {
        let level = constraint_ends
            .iter()
            .flatten()
            .map(|&particle| levels[particle])
            .min()
            .unwrap_or(0);
        constraint.level = if level == u32::MAX { 0 } else { level };
    }
    island
        .constraints
        .sort_by(|a, b| (a.level, a.sort_key, a.reference).cmp(&(b.level, b.sort_key, b.reference)));
}
