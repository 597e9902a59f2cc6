use std::collections::{BTreeMap, HashMap};

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::physics::handles::ParticleHandle;

/// Post-solve state of one particle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParticleSolveState {
    pub p: Vec3,
    pub q: Quat,
    pub v: Vec3,
    pub w: Vec3,
}

/// Records post-solve particle states per tick so a resimulation can replay islands whose inputs did
/// not change instead of solving them again.
pub trait IResimCache: Send + Sync {
    /// Whether the evolution is currently replaying ticks that were recorded before.
    fn is_resimming(&self) -> bool;

    fn set_resimming(&mut self, is_resimming: bool);

    fn saved_state(&self, tick: u64, handle: ParticleHandle) -> Option<ParticleSolveState>;

    fn save_state(&mut self, tick: u64, handle: ParticleHandle, state: ParticleSolveState);
}

/// In-memory resim cache keeping the most recent `capacity` ticks.
#[derive(Debug, Clone, Default)]
pub struct ResimCache {
    ticks: BTreeMap<u64, HashMap<ParticleHandle, ParticleSolveState>>,
    capacity: usize,
    is_resimming: bool,
}

impl ResimCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            ticks: BTreeMap::new(),
            capacity: capacity.max(1),
            is_resimming: false,
        }
    }

    /// Number of ticks currently recorded.
    pub fn tick_count(&self) -> usize {
        self.ticks.len()
    }

    /// Forgets every tick at or after `tick`.
    pub fn invalidate_from(&mut self, tick: u64) {
        self.ticks.split_off(&tick);
    }

    pub fn clear(&mut self) {
        self.ticks.clear();
    }
}

impl IResimCache for ResimCache {
    fn is_resimming(&self) -> bool {
        self.is_resimming
    }

    fn set_resimming(&mut self, is_resimming: bool) {
        self.is_resimming = is_resimming;
    }

    fn saved_state(&self, tick: u64, handle: ParticleHandle) -> Option<ParticleSolveState> {
        self.ticks.get(&tick).and_then(|states| states.get(&handle)).copied()
    }

    fn save_state(&mut self, tick: u64, handle: ParticleHandle, state: ParticleSolveState) {
        self.ticks.entry(tick).or_default().insert(handle, state);
        while self.ticks.len() > self.capacity {
            self.ticks.pop_first();
        }
    }
}
