use std::collections::HashMap;

use super::collision_constraint::PbdCollisionConstraint;
use super::mid_phase::{DetectorId, ParticlePairMidPhase};
use super::pair_key::ParticlePairKey;
use crate::physics::handles::ParticleHandle;

/// Location of a collision constraint owned by the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CollisionConstraintId {
    /// Constraint cached in a mid-phase detector.
    MidPhase { mid_phase: u32, detector: DetectorId },
    /// Constraint created this tick by joint collision transfer.
    Transferred(u32),
}

/// Handed to visitors that may detach particles during a traversal.
#[derive(Debug, Default)]
pub struct CollisionVisitContext {
    detached: Vec<ParticleHandle>,
}

impl CollisionVisitContext {
    /// Requests that every mid-phase involving the particle be invalidated.
    pub fn detach_particle(&mut self, handle: ParticleHandle) {
        self.detached.push(handle);
    }
}

/// Owns every mid-phase and the list of collision constraints active this tick.
#[derive(Debug, Default)]
pub struct CollisionConstraintAllocator {
    mid_phases: Vec<ParticlePairMidPhase>,
    mid_phase_lookup: HashMap<ParticlePairKey, usize>,
    active_constraints: Vec<CollisionConstraintId>,
    transferred: Vec<PbdCollisionConstraint>,
    epoch: u64,
}

impl CollisionConstraintAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    #[inline]
    pub fn mid_phase_count(&self) -> usize {
        self.mid_phases.len()
    }

    #[inline]
    pub fn mid_phases(&self) -> &[ParticlePairMidPhase] {
        &self.mid_phases
    }

    #[inline]
    pub fn mid_phase_mut(&mut self, index: usize) -> &mut ParticlePairMidPhase {
        &mut self.mid_phases[index]
    }

    pub fn find_mid_phase(&self, key: ParticlePairKey) -> Option<&ParticlePairMidPhase> {
        self.mid_phase_lookup.get(&key).map(|&index| &self.mid_phases[index])
    }

    /// Starts a detection pass: advances the epoch, prunes mid-phases that were invalidated or went
    /// more than `grace_ticks` without overlap, and clears the active list and transferred constraints.
    /// Pruning keeps the relative order of the surviving mid-phases.
    pub fn begin_detection(&mut self, grace_ticks: u64) -> usize {
        self.epoch += 1;
        let epoch = self.epoch;
        let before = self.mid_phases.len();
        self.mid_phases.retain(|mid_phase| {
            mid_phase.is_valid() && epoch.saturating_sub(mid_phase.last_used_epoch()) <= grace_ticks
        });
        let pruned = before - self.mid_phases.len();
        if pruned > 0 {
            self.mid_phase_lookup = self
                .mid_phases
                .iter()
                .enumerate()
                .map(|(index, mid_phase)| (mid_phase.key(), index))
                .collect();
        }
        self.active_constraints.clear();
        self.transferred.clear();
        pruned
    }

    /// Finds the mid-phase of a pair, creating it on first overlap, and stamps it with the current
    /// epoch. A mid-phase left over from an earlier particle in the same slot is rebuilt.
    pub fn get_or_create_mid_phase(&mut self, a: ParticleHandle, b: ParticleHandle) -> usize {
        let key = ParticlePairKey::new(a, b);
        let epoch = self.epoch;
        match self.mid_phase_lookup.get(&key) {
            Some(&index) => {
                let mid_phase = &mut self.mid_phases[index];
                if !mid_phase.contains_particle(a) || !mid_phase.contains_particle(b) {
                    *mid_phase = ParticlePairMidPhase::new(a, b, epoch);
                }
                mid_phase.set_last_used_epoch(epoch);
                index
            }
            None => {
                self.mid_phases.push(ParticlePairMidPhase::new(a, b, epoch));
                let index = self.mid_phases.len() - 1;
                self.mid_phase_lookup.insert(key, index);
                index
            }
        }
    }

    /// Appends the active constraints of a mid-phase to the active list.
    pub fn add_active_constraints(&mut self, mid_phase_index: usize) {
        let mid_phase = &self.mid_phases[mid_phase_index];
        self.active_constraints.extend(mid_phase.active_detectors().into_iter().map(|detector| {
            CollisionConstraintId::MidPhase {
                mid_phase: mid_phase_index as u32,
                detector,
            }
        }));
    }

    /// Adds a constraint that lives only for this tick.
    pub fn add_transferred(&mut self, mut constraint: PbdCollisionConstraint) -> CollisionConstraintId {
        constraint.is_transferred = true;
        self.transferred.push(constraint);
        let id = CollisionConstraintId::Transferred((self.transferred.len() - 1) as u32);
        self.active_constraints.push(id);
        id
    }

    /// Marks every mid-phase involving the particle invalid. Nothing is freed until the next
    /// `begin_detection`.
    pub fn detach_particle(&mut self, handle: ParticleHandle) {
        for mid_phase in self.mid_phases.iter_mut() {
            if mid_phase.contains_particle(handle) {
                mid_phase.invalidate();
            }
        }
        let mid_phases = &self.mid_phases;
        let transferred = &self.transferred;
        self.active_constraints.retain(|id| match id {
            CollisionConstraintId::MidPhase { mid_phase, .. } => mid_phases[*mid_phase as usize].is_valid(),
            CollisionConstraintId::Transferred(index) => {
                !transferred[*index as usize].particles.contains(&handle)
            }
        });
    }

    /// Sets the sleeping flag on every valid mid-phase selected by `involves`.
    pub fn set_mid_phases_sleeping(&mut self, is_sleeping: bool, mut involves: impl FnMut(&ParticlePairMidPhase) -> bool) {
        for mid_phase in self.mid_phases.iter_mut() {
            if mid_phase.is_valid() && involves(mid_phase) {
                mid_phase.set_is_sleeping(is_sleeping);
            }
        }
    }

    #[inline]
    pub fn active_constraints(&self) -> &[CollisionConstraintId] {
        &self.active_constraints
    }

    pub fn constraint(&self, id: CollisionConstraintId) -> Option<&PbdCollisionConstraint> {
        match id {
            CollisionConstraintId::MidPhase { mid_phase, detector } => self
                .mid_phases
                .get(mid_phase as usize)
                .and_then(|mid_phase| mid_phase.constraint(detector)),
            CollisionConstraintId::Transferred(index) => self.transferred.get(index as usize),
        }
    }

    pub fn constraint_mut(&mut self, id: CollisionConstraintId) -> Option<&mut PbdCollisionConstraint> {
        match id {
            CollisionConstraintId::MidPhase { mid_phase, detector } => self
                .mid_phases
                .get_mut(mid_phase as usize)
                .and_then(|mid_phase| mid_phase.constraint_mut(detector)),
            CollisionConstraintId::Transferred(index) => self.transferred.get_mut(index as usize),
        }
    }

    /// Read-only traversal of the active constraints.
    pub fn visit_collisions(&self, mut visitor: impl FnMut(CollisionConstraintId, &PbdCollisionConstraint)) {
        for &id in &self.active_constraints {
            if let Some(constraint) = self.constraint(id) {
                visitor(id, constraint);
            }
        }
    }

    /// Mutable traversal of the active constraints.
    pub fn visit_collisions_mut(&mut self, mut visitor: impl FnMut(CollisionConstraintId, &mut PbdCollisionConstraint)) {
        for index in 0..self.active_constraints.len() {
            let id = self.active_constraints[index];
            if let Some(constraint) = self.constraint_mut(id) {
                visitor(id, constraint);
            }
        }
    }

    /// Traversal whose visitor may detach particles. Detaching only invalidates mid-phases; constraints
    /// of mid-phases invalidated during the traversal are skipped.
    pub fn visit_collisions_with_context(
        &mut self,
        mut visitor: impl FnMut(&PbdCollisionConstraint, &mut CollisionVisitContext),
    ) {
        let mut context = CollisionVisitContext::default();
        let active = self.active_constraints.clone();
        for id in active {
            if let CollisionConstraintId::MidPhase { mid_phase, .. } = id {
                if !self.mid_phases[mid_phase as usize].is_valid() {
                    continue;
                }
            }
            if let Some(constraint) = self.constraint(id) {
                visitor(constraint, &mut context);
            }
            for handle in context.detached.drain(..) {
                for mid_phase in self.mid_phases.iter_mut() {
                    if mid_phase.contains_particle(handle) {
                        mid_phase.invalidate();
                    }
                }
            }
        }
    }
}
