use std::collections::HashMap;

use parking_lot::Mutex;

use crate::physics::constraint_graph::{ConstraintGraph, Island};
use crate::physics::constraints::{
    ConstraintContainers, GatherContext, IConstraintRule, SleepThresholds, SolverBody, SolverCollision,
    SolverContext, SolverJoint, SolverSuspension,
};
use crate::physics::evolution_observer::IEvolutionObserver;
use crate::physics::evolution_settings::EvolutionSettings;
use crate::physics::handles::ParticleHandle;
use crate::physics::particles::{Particles, RigidParticle};
use crate::physics::physics_material::Materials;
use crate::physics::resim_cache::IResimCache;
use crate::utilities::thread_dispatcher::{dispatch_jobs, IThreadDispatcher};

/// Outcome of solving one island, consumed by the sleep and disable pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IslandSolveResults {
    pub island_index: usize,
    /// Particles whose state became non-finite.
    pub nan_particles: Vec<ParticleHandle>,
    /// Particles that stayed under the disable thresholds for long enough.
    pub disabled_particles: Vec<ParticleHandle>,
    /// Every member stayed under its sleep thresholds for long enough.
    pub can_sleep: bool,
    /// The island was restored from the resim cache instead of solved.
    pub replayed: bool,
    pub position_iterations: u32,
    pub push_out_iterations: u32,
}

/// Solver inputs shared by every island of a tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IslandSolveSettings {
    pub dt: f32,
    pub num_position_iterations: u32,
    pub num_push_out_iterations: u32,
    pub tolerance: f32,
    pub sleeping_enabled: bool,
    pub disable_linear_threshold: f32,
    pub disable_angular_threshold: f32,
    pub disable_frame_count: u32,
}

impl IslandSolveSettings {
    pub fn new(settings: &EvolutionSettings, dt: f32) -> Self {
        Self {
            dt,
            num_position_iterations: settings.num_position_iterations,
            num_push_out_iterations: settings.num_push_out_iterations,
            tolerance: settings.solver_tolerance,
            sleeping_enabled: settings.sleeping_enabled,
            disable_linear_threshold: settings.disable_linear_threshold,
            disable_angular_threshold: settings.disable_angular_threshold,
            disable_frame_count: settings.disable_frame_count,
        }
    }
}

/// Everything a worker needs to solve one island without touching shared storage.
#[derive(Debug, Clone)]
pub struct IslandSolveData {
    pub island_index: usize,
    pub dt: f32,
    /// Island members first, then the non-dynamic particles its constraints reference.
    pub bodies: Vec<SolverBody>,
    pub dynamic_count: usize,
    body_lookup: HashMap<ParticleHandle, usize>,
    pub collisions: Vec<SolverCollision>,
    pub joints: Vec<SolverJoint>,
    pub suspensions: Vec<SolverSuspension>,
    pub touches_moving_kinematic: bool,
    pub has_desynced_particles: bool,
    pub results: IslandSolveResults,
}

impl IslandSolveData {
    pub fn new(island: &Island, particles: &Particles, materials: &Materials, dt: f32) -> Self {
        let mut data = Self {
            island_index: island.index,
            dt,
            bodies: Vec::with_capacity(island.particles.len()),
            dynamic_count: 0,
            body_lookup: HashMap::with_capacity(island.particles.len()),
            collisions: Vec::new(),
            joints: Vec::new(),
            suspensions: Vec::new(),
            touches_moving_kinematic: island.touches_moving_kinematic,
            has_desynced_particles: false,
            results: IslandSolveResults {
                island_index: island.index,
                ..Default::default()
            },
        };
        for particle in island.particles.iter().filter_map(|&handle| particles.get(handle)) {
            data.add_body(particle, materials);
        }
        data.dynamic_count = data.bodies.len();
        data
    }

    #[inline]
    pub fn body_index(&self, handle: ParticleHandle) -> Option<usize> {
        self.body_lookup.get(&handle).copied()
    }

    /// Finds the body of a particle, appending it on first use.
    pub fn add_body(&mut self, particle: &RigidParticle, materials: &Materials) -> usize {
        if let Some(index) = self.body_index(particle.handle) {
            return index;
        }
        self.has_desynced_particles |= particle.resim_desynced;
        let thresholds = SleepThresholds::from(materials.get(particle.material));
        self.bodies.push(SolverBody::from_particle(particle, thresholds));
        let index = self.bodies.len() - 1;
        self.body_lookup.insert(particle.handle, index);
        index
    }

    /// Bodies of both particles of a two-body constraint. `None` if either particle is gone.
    pub fn add_body_pair(
        &mut self,
        handles: [ParticleHandle; 2],
        particles: &Particles,
        materials: &Materials,
    ) -> Option<[usize; 2]> {
        let (Some(particle0), Some(particle1)) = (particles.get(handles[0]), particles.get(handles[1])) else {
            return None;
        };
        Some([self.add_body(particle0, materials), self.add_body(particle1, materials)])
    }

    #[inline]
    pub fn dynamic_bodies(&self) -> &[SolverBody] {
        &self.bodies[..self.dynamic_count]
    }

    #[inline]
    pub fn constraint_count(&self) -> usize {
        self.collisions.len() + self.joints.len() + self.suspensions.len()
    }

    /// Restores every member from the resim cache. Nothing changes unless all states are present.
    fn replay(&mut self, cache: &dyn IResimCache, tick: u64) -> bool {
        let mut states = Vec::with_capacity(self.dynamic_count);
        for body in self.dynamic_bodies() {
            match cache.saved_state(tick, body.handle) {
                Some(state) => states.push(state),
                None => return false,
            }
        }
        for (body, state) in self.bodies.iter_mut().zip(states) {
            body.p = state.p;
            body.q = state.q;
            body.v = state.v;
            body.w = state.w;
        }
        true
    }

    /// Updates sleep and disable counters and flags non-finite members.
    fn update_activity(&mut self, settings: &IslandSolveSettings) {
        let mut can_sleep = settings.sleeping_enabled && !self.touches_moving_kinematic && self.dynamic_count > 0;
        for body in &mut self.bodies[..self.dynamic_count] {
            if !body.is_finite() {
                self.results.nan_particles.push(body.handle);
                can_sleep = false;
                continue;
            }
            let linear = body.v.length();
            let angular = body.w.length();
            let thresholds = body.sleep_thresholds;
            if linear < thresholds.linear && angular < thresholds.angular {
                body.activity.sleep_counter = body.activity.sleep_counter.saturating_add(1);
            } else {
                body.activity.sleep_counter = 0;
            }
            can_sleep &= body.activity.sleep_counter >= thresholds.counter;

            if body.auto_disable {
                if linear < settings.disable_linear_threshold && angular < settings.disable_angular_threshold {
                    body.activity.disable_counter = body.activity.disable_counter.saturating_add(1);
                } else {
                    body.activity.disable_counter = 0;
                }
                if body.activity.disable_counter >= settings.disable_frame_count {
                    self.results.disabled_particles.push(body.handle);
                }
            }
        }
        self.results.can_sleep = can_sleep;
    }
}

/// Solves one island: two position-based phases separated by the implicit velocity update.
pub fn solve_island(
    data: &mut IslandSolveData,
    rules: &[Box<dyn IConstraintRule>],
    settings: &IslandSolveSettings,
    observer: &dyn IEvolutionObserver,
    resim_cache: Option<&dyn IResimCache>,
    tick: u64,
) {
    if let Some(cache) = resim_cache {
        if cache.is_resimming() && !data.has_desynced_particles && data.replay(cache, tick) {
            data.results.replayed = true;
            data.update_activity(settings);
            return;
        }
    }

    for iteration in 0..settings.num_position_iterations {
        let context = SolverContext {
            dt: settings.dt,
            iteration,
            num_iterations: settings.num_position_iterations,
            tolerance: settings.tolerance,
        };
        let mut needs_more = false;
        for rule in rules {
            needs_more |= rule.apply_constraints(data, &context);
        }
        data.results.position_iterations = iteration + 1;
        if !needs_more {
            break;
        }
    }
    observer.post_apply(data);

    if data.constraint_count() > 0 {
        let dt = settings.dt;
        for body in &mut data.bodies[..data.dynamic_count] {
            body.update_implicit_velocity(dt);
        }
    }

    for iteration in 0..settings.num_push_out_iterations {
        let context = SolverContext {
            dt: settings.dt,
            iteration,
            num_iterations: settings.num_push_out_iterations,
            tolerance: settings.tolerance,
        };
        let mut needs_more = false;
        for rule in rules {
            needs_more |= rule.apply_push_out(data, &context);
        }
        data.results.push_out_iterations = iteration + 1;
        if !needs_more {
            break;
        }
    }
    observer.post_apply_push_out(data);

    data.update_activity(settings);
}

/// Counters from the last solve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IslandSolverStats {
    pub islands: usize,
    pub replayed_islands: usize,
    pub bodies: usize,
    pub constraints: usize,
}

/// Gathers awake islands on the calling thread, solves them on the dispatcher's workers, then scatters
/// the results back.
#[derive(Debug, Default)]
pub struct IslandSolver {
    islands: Vec<Mutex<IslandSolveData>>,
    stats: IslandSolverStats,
}

impl IslandSolver {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn stats(&self) -> IslandSolverStats {
        self.stats
    }

    /// Copies every awake island into island-local data.
    pub fn gather(
        &mut self,
        graph: &ConstraintGraph,
        rules: &[Box<dyn IConstraintRule>],
        context: &GatherContext,
        dt: f32,
    ) {
        self.islands.clear();
        self.stats = IslandSolverStats::default();
        for island in graph.islands().iter().filter(|island| !island.is_sleeping) {
            let mut data = IslandSolveData::new(island, context.particles, context.materials, dt);
            for rule in rules {
                rule.gather(island, context, &mut data);
            }
            self.stats.bodies += data.bodies.len();
            self.stats.constraints += data.constraint_count();
            self.islands.push(Mutex::new(data));
        }
        self.stats.islands = self.islands.len();
    }

    /// Solves every gathered island, one island per job.
    pub fn solve(
        &self,
        dispatcher: &dyn IThreadDispatcher,
        rules: &[Box<dyn IConstraintRule>],
        settings: &IslandSolveSettings,
        observer: &dyn IEvolutionObserver,
        resim_cache: Option<&dyn IResimCache>,
        tick: u64,
    ) {
        dispatch_jobs(dispatcher, self.islands.len(), |_, job| {
            let mut data = self.islands[job].lock();
            solve_island(&mut data, rules, settings, observer, resim_cache, tick);
        });
    }

    /// Writes solved state back to the particles and constraint storage.
    pub fn scatter(
        &mut self,
        particles: &mut Particles,
        containers: &mut ConstraintContainers,
        rules: &[Box<dyn IConstraintRule>],
        cull_distance: f32,
    ) -> Vec<IslandSolveResults> {
        let mut results = Vec::with_capacity(self.islands.len());
        for island in self.islands.drain(..) {
            let data = island.into_inner();
            for body in data.dynamic_bodies() {
                let Some(particle) = particles.get_mut(body.handle) else {
                    continue;
                };
                particle.p = body.p;
                particle.q = body.q;
                particle.v = body.v;
                particle.w = body.w;
                particle.activity = body.activity;
                particle.resim_desynced |= data.has_desynced_particles;
                particle.update_world_bounds(cull_distance, false);
            }
            for rule in rules {
                rule.scatter(&data, containers);
            }
            if data.results.replayed {
                self.stats.replayed_islands += 1;
            }
            results.push(data.results);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::collidables::ImplicitShape;
    use crate::physics::evolution_observer::NoopEvolutionObserver;
    use crate::physics::particle_description::ParticleDescription;
    use crate::physics::particle_properties::RigidPose;
    use crate::physics::resim_cache::{ParticleSolveState, ResimCache};
    use glam::{Quat, Vec3};

    fn island_with_one_particle(velocity: Vec3) -> (Particles, Island) {
        let mut particles = Particles::new();
        let description = ParticleDescription::dynamic(RigidPose::IDENTITY, 1.0, ImplicitShape::sphere(0.5))
            .with_velocity(velocity, Vec3::ZERO)
            .with_auto_disable(true);
        let handle = particles.insert(|handle| RigidParticle::from_description(handle, &description));
        let island = Island {
            index: 0,
            particles: vec![handle],
            ..Default::default()
        };
        (particles, island)
    }

    fn settings() -> IslandSolveSettings {
        IslandSolveSettings::new(&EvolutionSettings::default(), 1.0 / 60.0)
    }

    #[test]
    fn resting_particles_count_towards_sleep_and_disable() {
        let (particles, island) = island_with_one_particle(Vec3::ZERO);
        let materials = Materials::new();
        let mut settings = settings();
        settings.disable_frame_count = 2;
        let mut data = IslandSolveData::new(&island, &particles, &materials, settings.dt);
        data.bodies[0].activity.sleep_counter = 100;
        solve_island(&mut data, &[], &settings, &NoopEvolutionObserver, None, 0);
        assert!(data.results.can_sleep);
        assert!(data.results.disabled_particles.is_empty());
        solve_island(&mut data, &[], &settings, &NoopEvolutionObserver, None, 0);
        assert_eq!(data.results.disabled_particles, vec![island.particles[0]]);
    }

    #[test]
    fn moving_particles_reset_counters() {
        let (particles, island) = island_with_one_particle(Vec3::new(5.0, 0.0, 0.0));
        let materials = Materials::new();
        let settings = settings();
        let mut data = IslandSolveData::new(&island, &particles, &materials, settings.dt);
        data.bodies[0].activity.sleep_counter = 100;
        solve_island(&mut data, &[], &settings, &NoopEvolutionObserver, None, 0);
        assert!(!data.results.can_sleep);
        assert_eq!(data.bodies[0].activity.sleep_counter, 0);
    }

    #[test]
    fn non_finite_state_is_reported() {
        let (particles, island) = island_with_one_particle(Vec3::ZERO);
        let materials = Materials::new();
        let settings = settings();
        let mut data = IslandSolveData::new(&island, &particles, &materials, settings.dt);
        data.bodies[0].v.x = f32::NAN;
        solve_island(&mut data, &[], &settings, &NoopEvolutionObserver, None, 0);
        assert_eq!(data.results.nan_particles, vec![island.particles[0]]);
        assert!(!data.results.can_sleep);
    }

    #[test]
    fn resimming_replays_saved_states() {
        let (particles, island) = island_with_one_particle(Vec3::ZERO);
        let materials = Materials::new();
        let settings = settings();
        let saved = ParticleSolveState {
            p: Vec3::new(1.0, 2.0, 3.0),
            q: Quat::IDENTITY,
            v: Vec3::X,
            w: Vec3::ZERO,
        };
        let mut cache = ResimCache::new(4);
        cache.save_state(7, island.particles[0], saved);
        cache.set_resimming(true);

        let mut data = IslandSolveData::new(&island, &particles, &materials, settings.dt);
        solve_island(&mut data, &[], &settings, &NoopEvolutionObserver, Some(&cache), 7);
        assert!(data.results.replayed);
        assert_eq!(data.bodies[0].p, saved.p);

        let mut missing = IslandSolveData::new(&island, &particles, &materials, settings.dt);
        solve_island(&mut missing, &[], &settings, &NoopEvolutionObserver, Some(&cache), 8);
        assert!(!missing.results.replayed);
    }

    #[test]
    fn desynced_members_force_a_real_solve() {
        let (mut particles, island) = island_with_one_particle(Vec3::X);
        let handle = island.particles[0];
        let materials = Materials::new();
        let settings = settings();
        let mut cache = ResimCache::new(4);
        cache.save_state(
            3,
            handle,
            ParticleSolveState {
                p: Vec3::new(9.0, 0.0, 0.0),
                q: Quat::IDENTITY,
                v: Vec3::ZERO,
                w: Vec3::ZERO,
            },
        );
        cache.set_resimming(true);
        particles.get_mut(handle).unwrap().resim_desynced = true;

        let mut data = IslandSolveData::new(&island, &particles, &materials, settings.dt);
        assert!(data.has_desynced_particles);
        solve_island(&mut data, &[], &settings, &NoopEvolutionObserver, Some(&cache), 3);
        assert!(!data.results.replayed);
        assert_ne!(data.bodies[0].p.x, 9.0);
    }
}
