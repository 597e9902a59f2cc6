use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::physics::collision_detection::{
    BroadPhase, CcdManager, CollisionConstraintAllocator, CollisionDetectionContext, NarrowPhase, RestoreThreshold,
};
use crate::physics::constraint_graph::ConstraintGraph;
use crate::physics::constraints::{
    transfer_collisions_to_parents, CollisionConstraintRule, ConstraintContainers, ConstraintRuleType,
    GatherContext, IConstraintRule, JointBreakEvent, JointConstraint, JointConstraintRule, JointConstraints,
    SuspensionConstraint, SuspensionConstraintRule, SuspensionConstraints,
};
use crate::physics::error::{EvolutionError, Result};
use crate::physics::evolution_observer::{
    CollisionModifierContact, ICollisionModifier, IEvolutionObserver, NoopEvolutionObserver,
};
use crate::physics::evolution_settings::EvolutionSettings;
use crate::physics::handles::{ClusterHandle, JointHandle, MaterialHandle, ParticleHandle, SuspensionHandle};
use crate::physics::island_sleeper::IslandSleeper;
use crate::physics::island_solver::{IslandSolveResults, IslandSolveSettings, IslandSolver};
use crate::physics::particle_description::ParticleDescription;
use crate::physics::particle_properties::{KinematicTarget, ObjectState, ParticleActivity};
use crate::physics::particles::{Particles, RigidParticle};
use crate::physics::physics_material::{Materials, PhysicsMaterial};
use crate::physics::pose_integrator::PoseIntegrator;
use crate::physics::resim_cache::{IResimCache, ParticleSolveState};
use crate::physics::rigid_clustering::{RigidCluster, RigidClustering};
use crate::physics::simulation_profiler::SimulationProfiler;
use crate::physics::timestepper::{SubStepInfo, SubStepSchedule};
use crate::utilities::thread_dispatcher::{IThreadDispatcher, InlineDispatcher};

/// Version written at the start of every state archive.
pub const EVOLUTION_ARCHIVE_VERSION: u32 = 1;

/// Counters from the last tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvolutionStats {
    pub particles: usize,
    pub integrated_particles: usize,
    pub overlapping_pairs: usize,
    pub active_collisions: usize,
    pub transferred_collisions: usize,
    pub ccd_rewound_particles: usize,
    pub islands: usize,
    pub solved_islands: usize,
    pub replayed_islands: usize,
    pub woken_islands: usize,
    pub slept_islands: usize,
    pub disabled_particles: usize,
    pub broken_clusters: usize,
}

#[derive(Serialize)]
struct EvolutionArchiveRef<'a> {
    version: u32,
    tick: u64,
    settings: &'a EvolutionSettings,
    materials: &'a Materials,
    particles: &'a Particles,
    joints: &'a JointConstraints,
    suspensions: &'a SuspensionConstraints,
    clustering: &'a RigidClustering,
}

#[derive(Deserialize)]
struct EvolutionArchive {
    version: u32,
    tick: u64,
    settings: EvolutionSettings,
    materials: Materials,
    particles: Particles,
    joints: JointConstraints,
    suspensions: SuspensionConstraints,
    clustering: RigidClustering,
}

fn create_rules(settings: &EvolutionSettings) -> Vec<Box<dyn IConstraintRule>> {
    let mut rules: Vec<Box<dyn IConstraintRule>> = vec![
        Box::new(SuspensionConstraintRule::new(settings.suspension_rule_priority)),
        Box::new(JointConstraintRule::new(settings.joint_rule_priority)),
        Box::new(CollisionConstraintRule::new(settings.collision_rule_priority)),
    ];
    sort_rules(&mut rules);
    rules
}

fn sort_rules(rules: &mut [Box<dyn IConstraintRule>]) {
    rules.sort_by_key(|rule| (rule.priority(), rule.rule_type()));
}

/// Advances rigid particles through time: integration, collision detection, island partitioning,
/// the per-island position based solve, sleeping and disabling.
pub struct Evolution {
    settings: EvolutionSettings,
    particles: Particles,
    materials: Materials,
    containers: ConstraintContainers,
    /// Solved in this order.
    rules: Vec<Box<dyn IConstraintRule>>,
    broad_phase: BroadPhase,
    narrow_phase: NarrowPhase,
    ccd_manager: CcdManager,
    graph: ConstraintGraph,
    island_solver: IslandSolver,
    island_sleeper: IslandSleeper,
    clustering: RigidClustering,
    observer: Box<dyn IEvolutionObserver>,
    collision_modifiers: Vec<Box<dyn ICollisionModifier>>,
    resim_cache: Option<Box<dyn IResimCache>>,
    thread_dispatcher: Box<dyn IThreadDispatcher>,
    profiler: SimulationProfiler,
    tick: u64,
    stats: EvolutionStats,
}

impl Evolution {
    /// Creates an empty evolution. Islands are solved on the calling thread until a dispatcher is set.
    pub fn new(settings: EvolutionSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            rules: create_rules(&settings),
            settings,
            particles: Particles::new(),
            materials: Materials::new(),
            containers: ConstraintContainers::default(),
            broad_phase: BroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            ccd_manager: CcdManager::new(),
            graph: ConstraintGraph::new(),
            island_solver: IslandSolver::new(),
            island_sleeper: IslandSleeper::new(),
            clustering: RigidClustering::new(),
            observer: Box::new(NoopEvolutionObserver),
            collision_modifiers: Vec::new(),
            resim_cache: None,
            thread_dispatcher: Box::new(InlineDispatcher),
            profiler: SimulationProfiler::new(),
            tick: 0,
            stats: EvolutionStats::default(),
        })
    }

    pub fn with_thread_dispatcher(mut self, dispatcher: Box<dyn IThreadDispatcher>) -> Self {
        self.thread_dispatcher = dispatcher;
        self
    }

    pub fn with_observer(mut self, observer: Box<dyn IEvolutionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_resim_cache(mut self, cache: Box<dyn IResimCache>) -> Self {
        self.resim_cache = Some(cache);
        self
    }

    #[inline(always)]
    pub fn settings(&self) -> &EvolutionSettings {
        &self.settings
    }

    /// Replaces the settings between ticks. Rule priorities are re-applied.
    pub fn set_settings(&mut self, settings: EvolutionSettings) -> Result<()> {
        settings.validate()?;
        for rule in &mut self.rules {
            let priority = match rule.rule_type() {
                ConstraintRuleType::Collision => settings.collision_rule_priority,
                ConstraintRuleType::Joint => settings.joint_rule_priority,
                ConstraintRuleType::Suspension => settings.suspension_rule_priority,
            };
            rule.set_priority(priority);
        }
        sort_rules(&mut self.rules);
        self.settings = settings;
        Ok(())
    }

    pub fn set_thread_dispatcher(&mut self, dispatcher: Box<dyn IThreadDispatcher>) {
        self.thread_dispatcher = dispatcher;
    }

    pub fn set_observer(&mut self, observer: Box<dyn IEvolutionObserver>) {
        self.observer = observer;
    }

    pub fn set_resim_cache(&mut self, cache: Option<Box<dyn IResimCache>>) {
        self.resim_cache = cache;
    }

    pub fn resim_cache_mut(&mut self) -> Option<&mut (dyn IResimCache + 'static)> {
        self.resim_cache.as_deref_mut()
    }

    /// Whether the resim cache is replaying recorded ticks.
    pub fn is_resimming(&self) -> bool {
        self.resim_cache.as_deref().map_or(false, |cache| cache.is_resimming())
    }

    /// Flags a particle whose inputs changed during a resim. Its island is solved instead of replayed
    /// and every particle solved with it inherits the flag until the resim ends.
    fn mark_resim_desynced(&mut self, handle: ParticleHandle) {
        if !self.is_resimming() {
            return;
        }
        if let Some(particle) = self.particles.get_mut(handle) {
            particle.resim_desynced = true;
        }
    }

    pub fn add_collision_modifier(&mut self, modifier: Box<dyn ICollisionModifier>) {
        self.collision_modifiers.push(modifier);
    }

    pub fn clear_collision_modifiers(&mut self) {
        self.collision_modifiers.clear();
    }

    /// Number of ticks advanced so far.
    #[inline(always)]
    pub fn tick(&self) -> u64 {
        self.tick
    }

    #[inline(always)]
    pub fn stats(&self) -> EvolutionStats {
        self.stats
    }

    #[inline(always)]
    pub fn profiler(&self) -> &SimulationProfiler {
        &self.profiler
    }

    #[inline(always)]
    pub fn particles(&self) -> &Particles {
        &self.particles
    }

    #[inline]
    pub fn particle(&self, handle: ParticleHandle) -> Option<&RigidParticle> {
        self.particles.get(handle)
    }

    #[inline(always)]
    pub fn collisions(&self) -> &CollisionConstraintAllocator {
        &self.containers.collisions
    }

    /// Graph and islands of the last tick.
    #[inline(always)]
    pub fn constraint_graph(&self) -> &ConstraintGraph {
        &self.graph
    }

    #[inline(always)]
    pub fn materials(&self) -> &Materials {
        &self.materials
    }

    pub fn add_material(&mut self, material: PhysicsMaterial) -> MaterialHandle {
        self.materials.add(material)
    }

    pub fn set_material(&mut self, handle: MaterialHandle, material: PhysicsMaterial) -> Result<()> {
        self.materials.set(handle, material)
    }

    fn particle_mut(&mut self, handle: ParticleHandle) -> Result<&mut RigidParticle> {
        self.particles
            .get_mut(handle)
            .ok_or(EvolutionError::InvalidParticle(handle))
    }

    pub fn create_particle(&mut self, description: ParticleDescription) -> Result<ParticleHandle> {
        description.validate()?;
        let materials = std::iter::once(description.material)
            .chain(description.shapes.iter().filter_map(|shape| shape.material));
        for material in materials {
            if !self.materials.contains(material) {
                return Err(EvolutionError::InvalidMaterial(material));
            }
        }
        let cull_distance = self.settings.collision_cull_distance;
        let handle = self.particles.insert(|handle| {
            let mut particle = RigidParticle::from_description(handle, &description);
            particle.update_world_bounds(cull_distance, false);
            particle
        });
        Ok(handle)
    }

    /// Wakes every particle sharing a mid-phase with `handle`.
    fn wake_touching(&mut self, handle: ParticleHandle) {
        let touching: Vec<ParticleHandle> = self
            .containers
            .collisions
            .mid_phases()
            .iter()
            .filter(|mid_phase| mid_phase.is_valid() && mid_phase.contains_particle(handle))
            .flat_map(|mid_phase| mid_phase.particles())
            .filter(|&other| other != handle)
            .collect();
        for other in touching {
            IslandSleeper::wake_particle(&mut self.particles, other);
            self.mark_resim_desynced(other);
        }
    }

    /// Destroys a particle. Particles resting on it are woken. Destroying a cluster member dissolves its
    /// cluster first.
    pub fn destroy_particle(&mut self, handle: ParticleHandle) -> Result<()> {
        let particle = self.particles.get(handle).ok_or(EvolutionError::InvalidParticle(handle))?;
        if let Some(cluster) = particle.cluster {
            let is_parent = particle.is_internal;
            self.dissolve_cluster(cluster);
            if is_parent {
                return Ok(());
            }
        }
        self.wake_touching(handle);
        self.containers.collisions.detach_particle(handle);
        self.particles.remove(handle, self.tick);
        Ok(())
    }

    /// Removes a particle from simulation without destroying it. Disabling twice is a no-op.
    pub fn disable_particle(&mut self, handle: ParticleHandle) -> Result<()> {
        if self.particle_mut(handle)?.disabled {
            return Ok(());
        }
        self.disable_particle_internal(handle);
        Ok(())
    }

    fn disable_particle_internal(&mut self, handle: ParticleHandle) {
        self.wake_touching(handle);
        self.mark_resim_desynced(handle);
        if let Some(particle) = self.particles.get_mut(handle) {
            particle.disabled = true;
            particle.v = Vec3::ZERO;
            particle.w = Vec3::ZERO;
            particle.p = particle.x;
            particle.q = particle.r;
        }
        self.containers.collisions.detach_particle(handle);
    }

    /// Returns a disabled particle to simulation. Cluster children stay disabled while their cluster
    /// exists.
    pub fn enable_particle(&mut self, handle: ParticleHandle) -> Result<()> {
        let cull_distance = self.settings.collision_cull_distance;
        let particle = self.particle_mut(handle)?;
        if !particle.disabled {
            return Ok(());
        }
        if particle.cluster.is_some() {
            return Err(EvolutionError::InvalidParticleState {
                handle,
                reason: "clustered particles stay disabled until their cluster dissolves",
            });
        }
        particle.disabled = false;
        particle.activity = ParticleActivity::default();
        particle.p = particle.x;
        particle.q = particle.r;
        if particle.state == ObjectState::Sleeping {
            particle.state = ObjectState::Dynamic;
        }
        particle.update_world_bounds(cull_distance, false);
        self.mark_resim_desynced(handle);
        Ok(())
    }

    /// Wakes a sleeping particle; its island follows on the next tick. Returns whether it was asleep.
    pub fn wake_particle(&mut self, handle: ParticleHandle) -> Result<bool> {
        if !self.particles.contains(handle) {
            return Err(EvolutionError::InvalidParticle(handle));
        }
        let woken = IslandSleeper::wake_particle(&mut self.particles, handle);
        if woken {
            self.mark_resim_desynced(handle);
        }
        Ok(woken)
    }

    pub fn set_kinematic_target(&mut self, handle: ParticleHandle, target: KinematicTarget) -> Result<()> {
        let particle = self.particle_mut(handle)?;
        if particle.state != ObjectState::Kinematic {
            return Err(EvolutionError::InvalidParticleState {
                handle,
                reason: "kinematic targets need a kinematic particle",
            });
        }
        particle.kinematic_target = target;
        self.mark_resim_desynced(handle);
        Ok(())
    }

    pub fn add_force(&mut self, handle: ParticleHandle, force: Vec3) -> Result<()> {
        IslandSleeper::wake_particle(&mut self.particles, handle);
        self.particle_mut(handle)?.force += force;
        self.mark_resim_desynced(handle);
        Ok(())
    }

    pub fn add_torque(&mut self, handle: ParticleHandle, torque: Vec3) -> Result<()> {
        IslandSleeper::wake_particle(&mut self.particles, handle);
        self.particle_mut(handle)?.torque += torque;
        self.mark_resim_desynced(handle);
        Ok(())
    }

    pub fn set_velocity(&mut self, handle: ParticleHandle, linear: Vec3, angular: Vec3) -> Result<()> {
        IslandSleeper::wake_particle(&mut self.particles, handle);
        let particle = self.particle_mut(handle)?;
        particle.v = linear;
        particle.w = angular;
        particle.pre_v = linear;
        particle.pre_w = angular;
        self.mark_resim_desynced(handle);
        Ok(())
    }

    pub fn add_joint(&mut self, joint: JointConstraint) -> Result<JointHandle> {
        for handle in joint.particles {
            if !self.particles.contains(handle) {
                return Err(EvolutionError::InvalidParticle(handle));
            }
            IslandSleeper::wake_particle(&mut self.particles, handle);
            self.mark_resim_desynced(handle);
        }
        Ok(self.containers.joints.add(joint))
    }

    pub fn joint(&self, handle: JointHandle) -> Option<&JointConstraint> {
        self.containers.joints.get(handle)
    }

    pub fn remove_joint(&mut self, handle: JointHandle) -> Result<JointConstraint> {
        let joint = self
            .containers
            .joints
            .remove(handle)
            .ok_or(EvolutionError::InvalidJoint(handle))?;
        for particle in joint.particles {
            IslandSleeper::wake_particle(&mut self.particles, particle);
            self.mark_resim_desynced(particle);
        }
        Ok(joint)
    }

    /// Joints broken since the last call.
    pub fn take_joint_break_events(&mut self) -> Vec<JointBreakEvent> {
        self.containers.joints.take_break_events()
    }

    pub fn add_suspension(&mut self, suspension: SuspensionConstraint) -> Result<SuspensionHandle> {
        if !self.particles.contains(suspension.particle) {
            return Err(EvolutionError::InvalidParticle(suspension.particle));
        }
        IslandSleeper::wake_particle(&mut self.particles, suspension.particle);
        self.mark_resim_desynced(suspension.particle);
        Ok(self.containers.suspensions.add(suspension))
    }

    pub fn suspension(&self, handle: SuspensionHandle) -> Option<&SuspensionConstraint> {
        self.containers.suspensions.get(handle)
    }

    /// Moves the ground point of a suspension and wakes its particle.
    pub fn set_suspension_target(&mut self, handle: SuspensionHandle, target: Vec3) -> Result<()> {
        let suspension = self
            .containers
            .suspensions
            .get_mut(handle)
            .ok_or(EvolutionError::InvalidSuspension(handle))?;
        suspension.target = target;
        let particle = suspension.particle;
        IslandSleeper::wake_particle(&mut self.particles, particle);
        self.mark_resim_desynced(particle);
        Ok(())
    }

    pub fn remove_suspension(&mut self, handle: SuspensionHandle) -> Result<SuspensionConstraint> {
        let suspension = self
            .containers
            .suspensions
            .remove(handle)
            .ok_or(EvolutionError::InvalidSuspension(handle))?;
        IslandSleeper::wake_particle(&mut self.particles, suspension.particle);
        self.mark_resim_desynced(suspension.particle);
        Ok(suspension)
    }

    /// Welds particles into a cluster simulated as one internal parent particle.
    pub fn create_cluster(&mut self, children: &[ParticleHandle], strain_threshold: f32) -> Result<ClusterHandle> {
        let (cluster, parent) = self
            .clustering
            .create_cluster(&mut self.particles, children, strain_threshold)?;
        for &child in children {
            self.containers.collisions.detach_particle(child);
        }
        let cull_distance = self.settings.collision_cull_distance;
        if let Some(parent) = self.particles.get_mut(parent) {
            parent.update_world_bounds(cull_distance, false);
        }
        if let Some(parent) = self.particles.get(parent) {
            self.observer.internal_particle_initialized(parent);
        }
        Ok(cluster)
    }

    /// Queues a cluster to dissolve at the start of the next tick.
    pub fn release_cluster(&mut self, handle: ClusterHandle) -> Result<()> {
        self.clustering.release_cluster(handle)
    }

    pub fn cluster(&self, handle: ClusterHandle) -> Option<&RigidCluster> {
        self.clustering.get(handle)
    }

    fn dissolve_cluster(&mut self, handle: ClusterHandle) -> bool {
        let cull_distance = self.settings.collision_cull_distance;
        let Some(cluster) = self.clustering.dissolve(handle, &mut self.particles, self.tick) else {
            return false;
        };
        self.containers.collisions.detach_particle(cluster.parent);
        for &child in &cluster.children {
            if let Some(child) = self.particles.get_mut(child) {
                child.update_world_bounds(cull_distance, false);
            }
        }
        true
    }

    /// Advances by `dt`, split into sub-steps of at most `max_step_dt`. At most `max_steps` sub-steps
    /// run; beyond that the simulation falls behind real time.
    pub fn advance(&mut self, dt: f32, max_step_dt: f32, max_steps: u32) -> SubStepSchedule {
        let schedule = SubStepSchedule::new(dt, max_step_dt, max_steps);
        for sub_step in schedule.steps() {
            self.advance_one_time_step(schedule.step_dt, sub_step);
        }
        schedule
    }

    /// Runs one tick of length `dt`.
    pub fn advance_one_time_step(&mut self, dt: f32, sub_step: SubStepInfo) {
        assert!(dt > 0.0 && dt.is_finite(), "Time steps must be positive and finite.");
        self.profiler.clear();
        self.profiler.start("tick");
        self.advance_one_time_step_impl(dt, sub_step);
        self.profiler.end("tick");
        self.profiler.log_stages(self.tick);
        self.tick += 1;
    }

    fn advance_one_time_step_impl(&mut self, dt: f32, sub_step: SubStepInfo) {
        let mut stats = EvolutionStats::default();
        self.island_sleeper.reset_counters();
        self.particles.release_deferred(self.tick);
        if !self.is_resimming() {
            for particle in self.particles.iter_mut() {
                particle.resim_desynced = false;
            }
        }

        for cluster in self.clustering.take_pending_releases() {
            self.dissolve_cluster(cluster);
        }

        self.profiler.start("integrate");
        let integrator = PoseIntegrator::new(&self.settings);
        stats.integrated_particles = integrator.integrate(&mut self.particles, dt);
        integrator.apply_kinematic_targets(&mut self.particles, dt, sub_step);
        self.profiler.end("integrate");
        self.observer.post_integrate(&self.particles);

        for rule in &self.rules {
            rule.update_position_based_state(&self.particles, &mut self.containers, dt);
        }

        self.profiler.start("collision_detection");
        let pairs = self.broad_phase.find_overlapping_pairs(&self.particles);
        stats.overlapping_pairs = pairs.len();
        let context = CollisionDetectionContext {
            particles: &self.particles,
            materials: &self.materials,
            cull_distance: self.settings.collision_cull_distance,
            restitution_threshold: self.settings.restitution_threshold,
            dt,
            restore_threshold: RestoreThreshold {
                position: self.settings.restore_position_threshold,
                rotation: self.settings.restore_rotation_threshold,
            },
        };
        self.narrow_phase.update(
            &mut self.containers.collisions,
            &pairs,
            &context,
            self.settings.mid_phase_grace_ticks,
        );
        self.profiler.end("collision_detection");

        self.observer.post_detect_collisions(&self.containers.collisions);
        stats.transferred_collisions =
            transfer_collisions_to_parents(&self.containers.joints, &mut self.containers.collisions, &self.particles);

        if !self.collision_modifiers.is_empty() {
            let particles = &self.particles;
            let modifiers = &self.collision_modifiers;
            self.containers.collisions.visit_collisions_mut(|_, constraint| {
                if !constraint.is_enabled() {
                    return;
                }
                let mut contact = CollisionModifierContact::new(constraint);
                for modifier in modifiers {
                    modifier.modify(particles, &mut contact);
                }
            });
        }
        stats.active_collisions = self.containers.collisions.active_constraints().len();

        if self.settings.ccd_enabled {
            self.profiler.start("ccd");
            stats.ccd_rewound_particles = self
                .ccd_manager
                .apply_constraint_phase_ccd(&mut self.containers.collisions, &mut self.particles);
            self.profiler.end("ccd");
        }

        self.profiler.start("islands");
        self.graph.reset();
        for rule in &self.rules {
            rule.add_to_graph(&self.particles, &self.containers, &mut self.graph);
        }
        self.graph.build_islands(&self.particles);
        self.island_sleeper
            .wake_islands(&mut self.graph, &mut self.particles, &mut self.containers.collisions);
        stats.islands = self.graph.islands().len();
        self.profiler.end("islands");
        self.observer.pre_apply(&self.graph);

        self.profiler.start("solve");
        let gather_context = GatherContext {
            particles: &self.particles,
            materials: &self.materials,
            containers: &self.containers,
        };
        self.island_solver.gather(&self.graph, &self.rules, &gather_context, dt);
        self.island_solver.solve(
            self.thread_dispatcher.as_ref(),
            &self.rules,
            &IslandSolveSettings::new(&self.settings, dt),
            self.observer.as_ref(),
            self.resim_cache.as_deref(),
            self.tick,
        );
        let results = self.island_solver.scatter(
            &mut self.particles,
            &mut self.containers,
            &self.rules,
            self.settings.collision_cull_distance,
        );
        let solver_stats = self.island_solver.stats();
        stats.solved_islands = solver_stats.islands;
        stats.replayed_islands = solver_stats.replayed_islands;
        self.profiler.end("solve");

        stats.disabled_particles = self.apply_island_results(&results);

        let breaking = self.clustering.find_breaking_clusters(&self.containers.collisions);
        for cluster in breaking {
            log::debug!("cluster {} broke under contact strain", cluster);
            if self.dissolve_cluster(cluster) {
                stats.broken_clusters += 1;
            }
        }

        if let Some(cache) = self.resim_cache.as_deref_mut() {
            for particle in self.particles.iter().filter(|particle| particle.is_dynamic()) {
                let state = ParticleSolveState {
                    p: particle.p,
                    q: particle.q,
                    v: particle.v,
                    w: particle.w,
                };
                cache.save_state(self.tick, particle.handle, state);
            }
        }

        integrator.commit(&mut self.particles);

        stats.particles = self.particles.len();
        stats.woken_islands = self.island_sleeper.woken_island_count();
        stats.slept_islands = self.island_sleeper.slept_island_count();
        log::trace!(
            "tick {}: {} particles, {} pairs, {} collisions, {} islands ({} solved, {} replayed)",
            self.tick,
            stats.particles,
            stats.overlapping_pairs,
            stats.active_collisions,
            stats.islands,
            stats.solved_islands,
            stats.replayed_islands
        );
        self.stats = stats;
    }

    /// Disables non-finite and resting particles, then puts eligible islands to sleep.
    fn apply_island_results(&mut self, results: &[IslandSolveResults]) -> usize {
        let mut disabled = 0;
        for result in results {
            for &handle in &result.nan_particles {
                log::warn!("particle {} has a non-finite state and was disabled", handle);
                self.disable_particle_internal(handle);
                disabled += 1;
            }
            for &handle in &result.disabled_particles {
                if self.particles.get(handle).map_or(true, |particle| particle.disabled) {
                    continue;
                }
                log::debug!("particle {} came to rest and was disabled", handle);
                self.disable_particle_internal(handle);
                disabled += 1;
            }
            if result.can_sleep && result.disabled_particles.is_empty() {
                if let Some(island) = self.graph.islands_mut().get_mut(result.island_index) {
                    self.island_sleeper
                        .sleep_island(island, &mut self.particles, &mut self.containers.collisions);
                }
            }
        }
        disabled
    }

    /// Archives particles, materials, joints, suspensions, clusters and settings. Contact caches are
    /// not archived and are rebuilt by the next tick.
    pub fn serialize_state(&self) -> Result<Vec<u8>> {
        let archive = EvolutionArchiveRef {
            version: EVOLUTION_ARCHIVE_VERSION,
            tick: self.tick,
            settings: &self.settings,
            materials: &self.materials,
            particles: &self.particles,
            joints: &self.containers.joints,
            suspensions: &self.containers.suspensions,
            clustering: &self.clustering,
        };
        Ok(bincode::serialize(&archive)?)
    }

    /// Replaces the simulated state with an archive written by `serialize_state`.
    pub fn deserialize_state(&mut self, bytes: &[u8]) -> Result<()> {
        let version: u32 = bincode::deserialize(bytes)?;
        if version != EVOLUTION_ARCHIVE_VERSION {
            return Err(EvolutionError::ArchiveVersion {
                found: version,
                expected: EVOLUTION_ARCHIVE_VERSION,
            });
        }
        let archive: EvolutionArchive = bincode::deserialize(bytes)?;
        debug_assert_eq!(archive.version, EVOLUTION_ARCHIVE_VERSION);
        self.set_settings(archive.settings)?;
        self.tick = archive.tick;
        self.materials = archive.materials;
        self.particles = archive.particles;
        self.containers = ConstraintContainers {
            collisions: CollisionConstraintAllocator::new(),
            joints: archive.joints,
            suspensions: archive.suspensions,
        };
        self.clustering = archive.clustering;
        self.graph = ConstraintGraph::new();
        self.island_solver = IslandSolver::new();
        self.stats = EvolutionStats::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::collidables::ImplicitShape;
    use crate::physics::constraints::JointSettings;
    use crate::physics::particle_properties::RigidPose;
    use crate::physics::resim_cache::ResimCache;
    use approx::assert_relative_eq;
    use glam::Quat;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const DT: f32 = 1.0 / 60.0;

    fn evolution() -> Evolution {
        Evolution::new(EvolutionSettings::default()).unwrap()
    }

    fn ground(evolution: &mut Evolution) -> ParticleHandle {
        evolution
            .create_particle(ParticleDescription::fixed(RigidPose::IDENTITY, ImplicitShape::plane(Vec3::Y)))
            .unwrap()
    }

    fn ball(evolution: &mut Evolution, position: Vec3) -> ParticleHandle {
        evolution
            .create_particle(ParticleDescription::dynamic(
                RigidPose::from_position(position),
                1.0,
                ImplicitShape::sphere(0.5),
            ))
            .unwrap()
    }

    #[test]
    fn rules_are_ordered_by_priority() {
        let mut evolution = evolution();
        let order: Vec<ConstraintRuleType> = evolution.rules.iter().map(|rule| rule.rule_type()).collect();
        assert_eq!(
            order,
            vec![ConstraintRuleType::Suspension, ConstraintRuleType::Joint, ConstraintRuleType::Collision]
        );
        let mut settings = EvolutionSettings::default();
        settings.collision_rule_priority = 0;
        settings.suspension_rule_priority = 5;
        evolution.set_settings(settings).unwrap();
        assert_eq!(evolution.rules[0].rule_type(), ConstraintRuleType::Collision);
        assert_eq!(evolution.rules[2].rule_type(), ConstraintRuleType::Suspension);
    }

    #[test]
    fn free_fall_follows_gravity() {
        let mut evolution = evolution();
        let handle = ball(&mut evolution, Vec3::new(0.0, 10.0, 0.0));
        evolution.advance_one_time_step(DT, SubStepInfo::SINGLE);
        let particle = evolution.particle(handle).unwrap();
        assert_relative_eq!(particle.v.y, -9.8 * DT, epsilon = 1e-5);
        assert_relative_eq!(particle.x.y, 10.0 - 9.8 * DT * DT, epsilon = 1e-5);
        assert_eq!(particle.x, particle.p);
    }

    #[test]
    fn ball_comes_to_rest_on_the_ground() {
        let mut evolution = evolution();
        ground(&mut evolution);
        let handle = ball(&mut evolution, Vec3::new(0.0, 0.6, 0.0));
        for _ in 0..120 {
            evolution.advance_one_time_step(DT, SubStepInfo::SINGLE);
        }
        let particle = evolution.particle(handle).unwrap();
        assert!(particle.x.y > 0.45, "ball sank to {}", particle.x.y);
        assert!(particle.x.y < 0.6);
        assert!(particle.v.length() < 0.1);
    }

    #[test]
    fn invalid_handles_are_reported() {
        let mut evolution = evolution();
        let handle = ball(&mut evolution, Vec3::ZERO);
        evolution.destroy_particle(handle).unwrap();
        assert!(matches!(
            evolution.destroy_particle(handle),
            Err(EvolutionError::InvalidParticle(_))
        ));
        assert!(evolution.set_velocity(handle, Vec3::X, Vec3::ZERO).is_err());
        assert!(matches!(
            evolution.remove_joint(JointHandle(3)),
            Err(EvolutionError::InvalidJoint(_))
        ));
        let description = ParticleDescription::dynamic(RigidPose::IDENTITY, 1.0, ImplicitShape::sphere(0.5))
            .with_material(MaterialHandle(9));
        assert!(matches!(
            evolution.create_particle(description),
            Err(EvolutionError::InvalidMaterial(_))
        ));
    }

    #[test]
    fn changed_inputs_are_solved_again_during_a_resim() {
        let settings = EvolutionSettings::default().with_gravity(Vec3::ZERO);
        let mut evolution = Evolution::new(settings)
            .unwrap()
            .with_resim_cache(Box::new(ResimCache::new(8)));
        let handle = evolution
            .create_particle(
                ParticleDescription::dynamic(RigidPose::IDENTITY, 1.0, ImplicitShape::sphere(0.5))
                    .with_velocity(Vec3::X, Vec3::ZERO),
            )
            .unwrap();
        let snapshot = evolution.serialize_state().unwrap();
        evolution.advance_one_time_step(DT, SubStepInfo::SINGLE);
        let recorded = evolution.particle(handle).unwrap().x;

        evolution.deserialize_state(&snapshot).unwrap();
        evolution.resim_cache_mut().unwrap().set_resimming(true);
        assert!(evolution.is_resimming());
        evolution.advance_one_time_step(DT, SubStepInfo::SINGLE);
        assert_eq!(evolution.stats().replayed_islands, 1);
        assert_eq!(evolution.particle(handle).unwrap().x, recorded);

        evolution.deserialize_state(&snapshot).unwrap();
        evolution.set_velocity(handle, Vec3::new(-5.0, 0.0, 0.0), Vec3::ZERO).unwrap();
        assert!(evolution.particle(handle).unwrap().resim_desynced);
        evolution.advance_one_time_step(DT, SubStepInfo::SINGLE);
        assert_eq!(evolution.stats().replayed_islands, 0);
        let particle = evolution.particle(handle).unwrap();
        assert_relative_eq!(particle.x.x, -5.0 * DT, epsilon = 1e-5);
        assert_relative_eq!(particle.v.x, -5.0, epsilon = 1e-5);
        assert!(particle.resim_desynced);

        evolution.resim_cache_mut().unwrap().set_resimming(false);
        evolution.advance_one_time_step(DT, SubStepInfo::SINGLE);
        assert!(!evolution.particle(handle).unwrap().resim_desynced);
    }

    #[test]
    fn desync_spreads_to_the_whole_island() {
        let mut evolution = evolution().with_resim_cache(Box::new(ResimCache::new(8)));
        ground(&mut evolution);
        let lower = ball(&mut evolution, Vec3::new(0.0, 0.5, 0.0));
        let upper = ball(&mut evolution, Vec3::new(0.0, 1.5, 0.0));
        evolution.advance_one_time_step(DT, SubStepInfo::SINGLE);

        evolution.resim_cache_mut().unwrap().set_resimming(true);
        evolution.add_force(upper, Vec3::new(0.0, -10.0, 0.0)).unwrap();
        assert!(!evolution.particle(lower).unwrap().resim_desynced);
        evolution.advance_one_time_step(DT, SubStepInfo::SINGLE);
        assert!(evolution.particle(lower).unwrap().resim_desynced);
        assert!(evolution.particle(upper).unwrap().resim_desynced);
    }

    #[test]
    fn destroyed_slots_are_reused_after_two_ticks() {
        let mut evolution = evolution();
        let first = ball(&mut evolution, Vec3::ZERO);
        evolution.destroy_particle(first).unwrap();
        let second = ball(&mut evolution, Vec3::new(5.0, 0.0, 0.0));
        assert_ne!(second.index, first.index);
        evolution.destroy_particle(second).unwrap();
        for _ in 0..3 {
            evolution.advance_one_time_step(DT, SubStepInfo::SINGLE);
        }
        let third = ball(&mut evolution, Vec3::ZERO);
        assert!(third.index == first.index || third.index == second.index);
        assert!(evolution.particle(first).is_none());
    }

    #[test]
    fn joints_hold_a_pendulum() {
        let mut evolution = evolution();
        let anchor = evolution
            .create_particle(ParticleDescription::fixed(RigidPose::IDENTITY, ImplicitShape::sphere(0.1)))
            .unwrap();
        let bob = ball(&mut evolution, Vec3::new(2.0, 0.0, 0.0));
        let joint = JointConstraint::from_world_anchor(
            evolution.particle(anchor).unwrap(),
            evolution.particle(bob).unwrap(),
            Vec3::ZERO,
            JointSettings::default(),
        );
        let handle = evolution.add_joint(joint).unwrap();
        for _ in 0..60 {
            evolution.advance_one_time_step(DT, SubStepInfo::SINGLE);
        }
        let distance = evolution.particle(bob).unwrap().x.length();
        assert_relative_eq!(distance, 2.0, epsilon = 0.05);
        assert!(evolution.joint(handle).is_some());
        evolution.remove_joint(handle).unwrap();
        assert!(evolution.joint(handle).is_none());
    }

    #[test]
    fn suspensions_hold_a_body_above_the_target() {
        let mut evolution = evolution();
        let body = ball(&mut evolution, Vec3::new(0.0, 1.0, 0.0));
        let suspension = SuspensionConstraint::new(body, Vec3::ZERO, Vec3::Y, 1.0, 1.0).with_target(Vec3::ZERO);
        let handle = evolution.add_suspension(suspension).unwrap();
        for _ in 0..30 {
            evolution.advance_one_time_step(DT, SubStepInfo::SINGLE);
        }
        assert!(evolution.particle(body).unwrap().x.y > 0.99);

        evolution.set_suspension_target(handle, Vec3::new(0.0, 0.25, 0.0)).unwrap();
        assert!(!evolution.particle(body).unwrap().is_sleeping());
        evolution.advance_one_time_step(DT, SubStepInfo::SINGLE);
        assert_relative_eq!(evolution.particle(body).unwrap().x.y, 1.25, epsilon = 1e-4);
        assert!(evolution.suspension(handle).map_or(false, |suspension| suspension.net_impulse > 0.0));
    }

    #[test]
    fn kinematic_targets_move_the_particle() {
        let mut evolution = evolution();
        let handle = evolution
            .create_particle(ParticleDescription::kinematic(RigidPose::IDENTITY, ImplicitShape::sphere(0.5)))
            .unwrap();
        let target = RigidPose::new(Vec3::new(1.0, 0.0, 0.0), Quat::IDENTITY);
        evolution
            .set_kinematic_target(handle, KinematicTarget::position(target))
            .unwrap();
        evolution.advance(2.0 * DT, DT, 4);
        assert_relative_eq!(evolution.particle(handle).unwrap().x.x, 1.0, epsilon = 1e-5);

        let dynamic = ball(&mut evolution, Vec3::new(5.0, 0.0, 0.0));
        assert!(matches!(
            evolution.set_kinematic_target(dynamic, KinematicTarget::position(target)),
            Err(EvolutionError::InvalidParticleState { handle, .. }) if handle == dynamic
        ));
    }

    #[test]
    fn clustered_children_cannot_be_enabled() {
        let mut evolution = evolution();
        let a = ball(&mut evolution, Vec3::ZERO);
        let b = ball(&mut evolution, Vec3::new(1.0, 0.0, 0.0));
        evolution.create_cluster(&[a, b], 1.0).unwrap();
        assert!(evolution.particle(a).unwrap().disabled);
        assert!(matches!(
            evolution.enable_particle(a),
            Err(EvolutionError::InvalidParticleState { handle, .. }) if handle == a
        ));
        assert!(evolution.particle(a).unwrap().disabled);
    }

    struct CountingObserver {
        integrations: Arc<AtomicUsize>,
        solved_islands: Arc<AtomicUsize>,
    }

    impl IEvolutionObserver for CountingObserver {
        fn post_integrate(&self, _particles: &Particles) {
            self.integrations.fetch_add(1, Ordering::Relaxed);
        }

        fn post_apply_push_out(&self, _island: &crate::physics::island_solver::IslandSolveData) {
            self.solved_islands.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn observers_see_every_stage() {
        let integrations = Arc::new(AtomicUsize::new(0));
        let solved_islands = Arc::new(AtomicUsize::new(0));
        let mut evolution = evolution().with_observer(Box::new(CountingObserver {
            integrations: integrations.clone(),
            solved_islands: solved_islands.clone(),
        }));
        ball(&mut evolution, Vec3::ZERO);
        ball(&mut evolution, Vec3::new(10.0, 0.0, 0.0));
        evolution.advance(3.0 * DT, DT, 4);
        assert_eq!(integrations.load(Ordering::Relaxed), 3);
        assert_eq!(solved_islands.load(Ordering::Relaxed), 6);
    }

    struct Frictionless;

    impl ICollisionModifier for Frictionless {
        fn modify(&self, _particles: &Particles, contact: &mut CollisionModifierContact) {
            contact.disable();
        }
    }

    #[test]
    fn disabled_contacts_let_particles_fall_through() {
        let mut evolution = evolution();
        ground(&mut evolution);
        let handle = ball(&mut evolution, Vec3::new(0.0, 0.5, 0.0));
        evolution.add_collision_modifier(Box::new(Frictionless));
        for _ in 0..30 {
            evolution.advance_one_time_step(DT, SubStepInfo::SINGLE);
        }
        assert!(evolution.particle(handle).unwrap().x.y < 0.0);
    }

    #[test]
    fn clusters_move_as_one_and_release() {
        let mut evolution = evolution();
        let a = ball(&mut evolution, Vec3::new(-0.5, 5.0, 0.0));
        let b = ball(&mut evolution, Vec3::new(0.5, 5.0, 0.0));
        let cluster = evolution.create_cluster(&[a, b], f32::MAX).unwrap();
        let parent = evolution.cluster(cluster).unwrap().parent;
        for _ in 0..10 {
            evolution.advance_one_time_step(DT, SubStepInfo::SINGLE);
        }
        let parent_height = evolution.particle(parent).unwrap().x.y;
        assert!(parent_height < 5.0);
        assert_eq!(evolution.particle(a).unwrap().x.y, 5.0);

        evolution.release_cluster(cluster).unwrap();
        evolution.advance_one_time_step(DT, SubStepInfo::SINGLE);
        assert!(evolution.cluster(cluster).is_none());
        assert!(evolution.particle(parent).is_none());
        let child = evolution.particle(a).unwrap();
        assert!(!child.disabled);
        assert!(child.x.y < parent_height);
        assert_relative_eq!(child.x.x, -0.5, epsilon = 1e-4);
    }

    #[test]
    fn state_archives_round_trip() {
        let mut evolution = evolution();
        ground(&mut evolution);
        let handle = ball(&mut evolution, Vec3::new(0.0, 3.0, 0.0));
        for _ in 0..5 {
            evolution.advance_one_time_step(DT, SubStepInfo::SINGLE);
        }
        let bytes = evolution.serialize_state().unwrap();

        let mut restored = Evolution::new(EvolutionSettings::fast()).unwrap();
        restored.deserialize_state(&bytes).unwrap();
        assert_eq!(restored.tick(), evolution.tick());
        assert_eq!(restored.particle(handle), evolution.particle(handle));
        assert_eq!(restored.settings(), evolution.settings());

        let mut stale = bytes.clone();
        stale[..4].copy_from_slice(&(EVOLUTION_ARCHIVE_VERSION + 1).to_le_bytes());
        assert!(matches!(
            restored.deserialize_state(&stale),
            Err(EvolutionError::ArchiveVersion { .. })
        ));
        assert!(matches!(
            restored.deserialize_state(&bytes[..3]),
            Err(EvolutionError::Archive(_))
        ));
    }
}
