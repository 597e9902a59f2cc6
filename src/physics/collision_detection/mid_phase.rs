use std::collections::BTreeMap;

use glam::Vec3;

use super::collision_constraint::{CcdType, CollisionMaterial, PbdCollisionConstraint};
use super::contact_generation::generate_contacts;
use super::pair_key::{ParticlePairKey, ShapeLocator, ShapePairKey};
use crate::physics::collidables::ImplicitShape;
use crate::physics::handles::ParticleHandle;
use crate::physics::particle_properties::RigidPose;
use crate::physics::particles::{Particles, RigidParticle};
use crate::physics::physics_material::Materials;
use crate::utilities::bounding_box::BoundingBox;
use crate::utilities::math_helper;

/// Largest motion since the last narrow phase for which a manifold is reused unchanged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RestoreThreshold {
    pub position: f32,
    /// Radians.
    pub rotation: f32,
}

impl Default for RestoreThreshold {
    fn default() -> Self {
        Self {
            position: 0.002,
            rotation: 0.002,
        }
    }
}

/// Everything collision detection reads besides the mid-phase itself.
pub struct CollisionDetectionContext<'a> {
    pub particles: &'a Particles,
    pub materials: &'a Materials,
    pub cull_distance: f32,
    pub restitution_threshold: f32,
    pub dt: f32,
    pub restore_threshold: RestoreThreshold,
}

/// Whether a particle moves far enough this tick to need continuous detection: its displacement
/// exceeds `bounds_scale` times its smallest local extent.
pub fn should_enable_ccd(particle: &RigidParticle, bounds_scale: f32) -> bool {
    if !particle.ccd_enabled || particle.local_bounds.is_empty() {
        return false;
    }
    let displacement = (particle.p - particle.x).length();
    displacement > bounds_scale * particle.local_bounds.min_extent()
}

/// Finds the shape (or union child) a locator points at, and its pose for the given particle pose.
fn locate_shape<'p>(
    particle: &'p RigidParticle,
    locator: ShapeLocator,
    particle_pose: &RigidPose,
) -> Option<(&'p ImplicitShape, RigidPose)> {
    let instance = particle.shapes.get(locator.shape as usize)?;
    let shape_pose = instance.world_pose(particle_pose);
    if locator.has_child() {
        let child = instance.shape.children().get(locator.child as usize)?;
        Some((&child.shape, shape_pose.compose(&child.local_pose)))
    } else {
        Some((&instance.shape, shape_pose))
    }
}

fn combined_material(
    particles: [&RigidParticle; 2],
    locators: [ShapeLocator; 2],
    context: &CollisionDetectionContext,
) -> CollisionMaterial {
    let material_of = |particle: &RigidParticle, locator: ShapeLocator| {
        let handle = particle
            .shapes
            .get(locator.shape as usize)
            .and_then(|shape| shape.material)
            .unwrap_or(particle.material);
        context.materials.get(handle)
    };
    let material0 = material_of(particles[0], locators[0]);
    let material1 = material_of(particles[1], locators[1]);
    CollisionMaterial {
        friction: material0.combine_friction(material1),
        restitution: material0.combine_restitution(material1),
        restitution_threshold: context.restitution_threshold,
        stiffness: 1.0,
    }
}

/// Cached detector for one convex shape pair.
#[derive(Debug, Clone)]
pub struct SingleShapePairCollisionDetector {
    locators: [ShapeLocator; 2],
    constraint: PbdCollisionConstraint,
}

impl SingleShapePairCollisionDetector {
    pub fn new(particles: [ParticleHandle; 2], locators: [ShapeLocator; 2]) -> Self {
        Self {
            locators,
            constraint: PbdCollisionConstraint::new(particles, ShapePairKey::new(locators[0], locators[1])),
        }
    }

    #[inline]
    pub fn constraint(&self) -> &PbdCollisionConstraint {
        &self.constraint
    }

    #[inline]
    pub fn constraint_mut(&mut self) -> &mut PbdCollisionConstraint {
        &mut self.constraint
    }

    #[inline]
    pub fn shape_pair_key(&self) -> ShapePairKey {
        self.constraint.shape_pair_key
    }

    /// Neither particle moved or rotated past the thresholds since the last narrow phase, which
    /// produced at least one contact.
    pub fn should_restore_constraint(
        &self,
        particles: [&RigidParticle; 2],
        threshold: RestoreThreshold,
    ) -> bool {
        let constraint = &self.constraint;
        if !constraint.has_run_narrow_phase || constraint.manifold_points.is_empty() {
            return false;
        }
        particles.iter().zip(constraint.last_transforms.iter()).all(|(particle, last)| {
            (particle.p - last.position).length_squared() <= threshold.position * threshold.position
                && math_helper::angle_between(particle.q, last.orientation) <= threshold.rotation
        })
    }

    /// Runs restore or narrow phase for this shape pair. Returns true if the constraint is active.
    pub fn generate_collision(
        &mut self,
        particles: [&RigidParticle; 2],
        is_ccd: bool,
        context: &CollisionDetectionContext,
    ) -> bool {
        self.constraint.reset_solver_state();
        self.constraint.material = combined_material(particles, self.locators, context);
        self.constraint.cull_distance = context.cull_distance;

        if !is_ccd && self.should_restore_constraint(particles, context.restore_threshold) {
            self.constraint.is_active = true;
            self.constraint.was_restored = true;
            self.constraint.ccd_type = CcdType::Disabled;
            self.constraint.time_of_impact = 1.0;
            // The world contacts were last written from solved poses; rebuild them from the kept
            // local contacts.
            self.constraint
                .update_world_contacts([particles[0].predicted_pose(), particles[1].predicted_pose()]);
            return true;
        }
        self.constraint.was_restored = false;

        let end_poses = [particles[0].predicted_pose(), particles[1].predicted_pose()];
        let start_poses = [particles[0].pose(), particles[1].pose()];
        let shapes = (
            locate_shape(particles[0], self.locators[0], &end_poses[0]),
            locate_shape(particles[1], self.locators[1], &end_poses[1]),
        );
        let ((shape0, end0), (shape1, end1)) = match shapes {
            (Some(a), Some(b)) => (a, b),
            // Shape list changed under the detector; nothing to collide.
            _ => {
                self.constraint.deactivate();
                return false;
            }
        };

        let mut bounds0 = shape0.world_bounds(&end0).expanded(context.cull_distance);
        let mut bounds1 = shape1.world_bounds(&end1);
        if is_ccd {
            if let (Some((_, start0)), Some((_, start1))) = (
                locate_shape(particles[0], self.locators[0], &start_poses[0]),
                locate_shape(particles[1], self.locators[1], &start_poses[1]),
            ) {
                bounds0 = bounds0.merged(&shape0.world_bounds(&start0).expanded(context.cull_distance));
                bounds1 = bounds1.merged(&shape1.world_bounds(&start1));
            }
        }
        if !bounds0.intersects(&bounds1) {
            self.constraint.deactivate();
            return false;
        }

        if is_ccd && self.generate_ccd_collision(particles, shape0, shape1, context) {
            return true;
        }

        let contacts = generate_contacts(shape0, &end0, shape1, &end1, context.cull_distance);
        self.constraint.ccd_type = CcdType::Disabled;
        self.constraint.time_of_impact = 1.0;
        self.constraint.set_contacts_from_world(&contacts, end_poses);
        self.constraint.is_active
    }

    /// Sweeps the pair linearly from the committed to the predicted poses. If a contact separating at
    /// the start crosses zero during the sweep, contacts are generated at the earliest crossing and the
    /// constraint is flagged for the CCD pass. Returns false when no impact was found.
    fn generate_ccd_collision(
        &mut self,
        particles: [&RigidParticle; 2],
        shape0: &ImplicitShape,
        shape1: &ImplicitShape,
        context: &CollisionDetectionContext,
    ) -> bool {
        let start_poses = [particles[0].pose(), particles[1].pose()];
        let (Some((_, start0)), Some((_, start1))) = (
            locate_shape(particles[0], self.locators[0], &start_poses[0]),
            locate_shape(particles[1], self.locators[1], &start_poses[1]),
        ) else {
            return false;
        };
        let displacement = relative_displacement(particles[0], particles[1]);
        let sweep_cull = context.cull_distance + displacement.length();
        let start_contacts = generate_contacts(shape0, &start0, shape1, &start1, sweep_cull);

        let mut time_of_impact: Option<f32> = None;
        for contact in &start_contacts {
            let phi_start = contact.phi;
            let phi_end = phi_start + displacement.dot(contact.shape_contact_normal);
            if phi_start > 0.0 && phi_end < 0.0 {
                let toi = phi_start / (phi_start - phi_end);
                time_of_impact = Some(time_of_impact.map_or(toi, |best: f32| best.min(toi)));
            }
        }
        let Some(toi) = time_of_impact else {
            return false;
        };

        let impact_poses = [
            start_poses[0].lerp(&particles[0].predicted_pose(), toi),
            start_poses[1].lerp(&particles[1].predicted_pose(), toi),
        ];
        let (Some((_, impact0)), Some((_, impact1))) = (
            locate_shape(particles[0], self.locators[0], &impact_poses[0]),
            locate_shape(particles[1], self.locators[1], &impact_poses[1]),
        ) else {
            return false;
        };
        let contacts = generate_contacts(shape0, &impact0, shape1, &impact1, context.cull_distance);
        if contacts.is_empty() {
            return false;
        }
        self.constraint.set_contacts_from_world(&contacts, impact_poses);
        self.constraint.ccd_type = CcdType::Enabled;
        self.constraint.time_of_impact = toi;
        true
    }
}

/// Detector for shape pairs involving a union. Child pairs are re-queried every tick and each
/// overlapping child pair gets its own cached single detector.
#[derive(Debug, Clone)]
pub struct MultiShapePairCollisionDetector {
    particles: [ParticleHandle; 2],
    shapes: [usize; 2],
    detectors: BTreeMap<ShapePairKey, SingleShapePairCollisionDetector>,
}

impl MultiShapePairCollisionDetector {
    pub fn new(particles: [ParticleHandle; 2], shapes: [usize; 2]) -> Self {
        Self {
            particles,
            shapes,
            detectors: BTreeMap::new(),
        }
    }

    /// Locators of the convex leaves of one side: the union's children, or the shape itself.
    fn leaves(particle: &RigidParticle, shape: usize) -> Vec<ShapeLocator> {
        match particle.shapes.get(shape) {
            Some(instance) if instance.shape.is_union() => (0..instance.shape.children().len())
                .filter(|&child| !instance.shape.children()[child].shape.is_union())
                .map(|child| ShapeLocator::child(shape, child))
                .collect(),
            Some(_) => vec![ShapeLocator::shape(shape)],
            None => Vec::new(),
        }
    }

    fn leaf_bounds(particle: &RigidParticle, locator: ShapeLocator, swept: bool) -> BoundingBox {
        let end = locate_shape(particle, locator, &particle.predicted_pose())
            .map(|(shape, pose)| shape.world_bounds(&pose))
            .unwrap_or(BoundingBox::EMPTY);
        if !swept {
            return end;
        }
        let start = locate_shape(particle, locator, &particle.pose())
            .map(|(shape, pose)| shape.world_bounds(&pose))
            .unwrap_or(BoundingBox::EMPTY);
        end.merged(&start)
    }

    /// Returns the number of active child constraints.
    pub fn generate_collisions(
        &mut self,
        particles: [&RigidParticle; 2],
        is_ccd: bool,
        context: &CollisionDetectionContext,
    ) -> usize {
        let leaves0 = Self::leaves(particles[0], self.shapes[0]);
        let leaves1 = Self::leaves(particles[1], self.shapes[1]);
        let bounds1: Vec<BoundingBox> = leaves1
            .iter()
            .map(|&locator| Self::leaf_bounds(particles[1], locator, is_ccd))
            .collect();

        for detector in self.detectors.values_mut() {
            detector.constraint_mut().deactivate();
        }
        let mut active = 0;
        for &locator0 in &leaves0 {
            let bounds0 = Self::leaf_bounds(particles[0], locator0, is_ccd).expanded(context.cull_distance);
            for (&locator1, b1) in leaves1.iter().zip(bounds1.iter()) {
                if !bounds0.intersects(b1) {
                    continue;
                }
                let key = ShapePairKey::new(locator0, locator1);
                let pair_particles = self.particles;
                let detector = self
                    .detectors
                    .entry(key)
                    .or_insert_with(|| SingleShapePairCollisionDetector::new(pair_particles, [locator0, locator1]));
                if detector.generate_collision(particles, is_ccd, context) {
                    active += 1;
                }
            }
        }
        active
    }

    pub fn detectors(&self) -> impl Iterator<Item = (&ShapePairKey, &SingleShapePairCollisionDetector)> {
        self.detectors.iter()
    }

    pub fn detector(&self, key: ShapePairKey) -> Option<&SingleShapePairCollisionDetector> {
        self.detectors.get(&key)
    }

    pub fn detector_mut(&mut self, key: ShapePairKey) -> Option<&mut SingleShapePairCollisionDetector> {
        self.detectors.get_mut(&key)
    }
}

/// Identifies a detector within a mid-phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DetectorId {
    Single(u32),
    Multi(u32, ShapePairKey),
}

/// Collision state of one overlapping particle pair.
#[derive(Debug, Clone)]
pub struct ParticlePairMidPhase {
    key: ParticlePairKey,
    particles: [ParticleHandle; 2],
    single_detectors: Vec<SingleShapePairCollisionDetector>,
    multi_detectors: Vec<MultiShapePairCollisionDetector>,
    is_initialized: bool,
    is_sleeping: bool,
    is_ccd: bool,
    is_valid: bool,
    last_used_epoch: u64,
    restore_threshold: RestoreThreshold,
}

impl ParticlePairMidPhase {
    /// Creates a mid-phase for the pair. Particles are stored in ascending index order.
    pub fn new(a: ParticleHandle, b: ParticleHandle, epoch: u64) -> Self {
        let particles = if a.index <= b.index { [a, b] } else { [b, a] };
        Self {
            key: ParticlePairKey::new(a, b),
            particles,
            single_detectors: Vec::new(),
            multi_detectors: Vec::new(),
            is_initialized: false,
            is_sleeping: false,
            is_ccd: false,
            is_valid: true,
            last_used_epoch: epoch,
            restore_threshold: RestoreThreshold::default(),
        }
    }

    #[inline]
    pub fn key(&self) -> ParticlePairKey {
        self.key
    }

    #[inline]
    pub fn particles(&self) -> [ParticleHandle; 2] {
        self.particles
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    #[inline]
    pub fn is_sleeping(&self) -> bool {
        self.is_sleeping
    }

    #[inline]
    pub fn is_ccd(&self) -> bool {
        self.is_ccd
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.is_initialized
    }

    #[inline]
    pub fn last_used_epoch(&self) -> u64 {
        self.last_used_epoch
    }

    #[inline]
    pub fn set_last_used_epoch(&mut self, epoch: u64) {
        self.last_used_epoch = epoch;
    }

    #[inline]
    pub fn restore_threshold(&self) -> RestoreThreshold {
        self.restore_threshold
    }

    pub fn contains_particle(&self, handle: ParticleHandle) -> bool {
        self.particles[0] == handle || self.particles[1] == handle
    }

    /// Marks the mid-phase for removal on the allocator's next sweep.
    pub fn invalidate(&mut self) {
        self.is_valid = false;
    }

    /// Rebuilds the detectors for every shape pair passing collision filtering.
    pub fn init(&mut self, particle0: &RigidParticle, particle1: &RigidParticle) {
        self.single_detectors.clear();
        self.multi_detectors.clear();
        for (i, shape0) in particle0.shapes.iter().enumerate() {
            for (j, shape1) in particle1.shapes.iter().enumerate() {
                if !shape0.can_collide(shape1) {
                    continue;
                }
                if shape0.shape.is_union() || shape1.shape.is_union() {
                    self.multi_detectors
                        .push(MultiShapePairCollisionDetector::new(self.particles, [i, j]));
                } else {
                    self.single_detectors.push(SingleShapePairCollisionDetector::new(
                        self.particles,
                        [ShapeLocator::shape(i), ShapeLocator::shape(j)],
                    ));
                }
            }
        }
        self.is_initialized = true;
    }

    /// Runs every detector of the pair. Returns the number of active constraints, or zero if either
    /// particle no longer exists, in which case the mid-phase is invalidated.
    pub fn generate_collisions(&mut self, context: &CollisionDetectionContext) -> usize {
        let (Some(particle0), Some(particle1)) = (
            context.particles.get(self.particles[0]),
            context.particles.get(self.particles[1]),
        ) else {
            self.invalidate();
            return 0;
        };
        if !self.is_initialized {
            self.init(particle0, particle1);
        }
        self.restore_threshold = context.restore_threshold;
        self.is_ccd = particle0.ccd_active || particle1.ccd_active;
        let particles = [particle0, particle1];
        let mut active = 0;
        for detector in &mut self.single_detectors {
            if detector.generate_collision(particles, self.is_ccd, context) {
                active += 1;
            }
        }
        for detector in &mut self.multi_detectors {
            active += detector.generate_collisions(particles, self.is_ccd, context);
        }
        active
    }

    /// Going to sleep leaves constraints untouched. Waking only clears the flag; the restore path
    /// reactivates the previous manifolds on the next detection.
    pub fn set_is_sleeping(&mut self, is_sleeping: bool) {
        self.is_sleeping = is_sleeping;
    }

    /// Identifiers of every detector currently holding an active constraint, in deterministic order.
    pub fn active_detectors(&self) -> Vec<DetectorId> {
        let mut ids: Vec<DetectorId> = self
            .single_detectors
            .iter()
            .enumerate()
            .filter(|(_, detector)| detector.constraint().is_active)
            .map(|(index, _)| DetectorId::Single(index as u32))
            .collect();
        for (index, multi) in self.multi_detectors.iter().enumerate() {
            ids.extend(
                multi
                    .detectors()
                    .filter(|(_, detector)| detector.constraint().is_active)
                    .map(|(key, _)| DetectorId::Multi(index as u32, *key)),
            );
        }
        ids
    }

    pub fn constraint(&self, id: DetectorId) -> Option<&PbdCollisionConstraint> {
        match id {
            DetectorId::Single(index) => self
                .single_detectors
                .get(index as usize)
                .map(SingleShapePairCollisionDetector::constraint),
            DetectorId::Multi(index, key) => self
                .multi_detectors
                .get(index as usize)
                .and_then(|multi| multi.detector(key))
                .map(SingleShapePairCollisionDetector::constraint),
        }
    }

    pub fn constraint_mut(&mut self, id: DetectorId) -> Option<&mut PbdCollisionConstraint> {
        match id {
            DetectorId::Single(index) => self
                .single_detectors
                .get_mut(index as usize)
                .map(SingleShapePairCollisionDetector::constraint_mut),
            DetectorId::Multi(index, key) => self
                .multi_detectors
                .get_mut(index as usize)
                .and_then(|multi| multi.detector_mut(key))
                .map(SingleShapePairCollisionDetector::constraint_mut),
        }
    }

    /// Read-only traversal of every constraint of the pair, active or not.
    pub fn visit_collisions(&self, mut visitor: impl FnMut(&PbdCollisionConstraint)) {
        for detector in &self.single_detectors {
            visitor(detector.constraint());
        }
        for multi in &self.multi_detectors {
            for (_, detector) in multi.detectors() {
                visitor(detector.constraint());
            }
        }
    }

    /// Mutable traversal of every constraint of the pair.
    pub fn visit_collisions_mut(&mut self, mut visitor: impl FnMut(&mut PbdCollisionConstraint)) {
        for detector in &mut self.single_detectors {
            visitor(detector.constraint_mut());
        }
        for multi in &mut self.multi_detectors {
            for detector in multi.detectors.values_mut() {
                visitor(detector.constraint_mut());
            }
        }
    }
}

/// Motion of particle 0 relative to particle 1 over the tick.
#[inline]
fn relative_displacement(particle0: &RigidParticle, particle1: &RigidParticle) -> Vec3 {
    (particle0.p - particle0.x) - (particle1.p - particle1.x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::collidables::{CollisionFilter, ShapeInstance, UnionChild};
    use crate::physics::particle_description::ParticleDescription;

    fn context<'a>(particles: &'a Particles, materials: &'a Materials) -> CollisionDetectionContext<'a> {
        CollisionDetectionContext {
            particles,
            materials,
            cull_distance: 0.05,
            restitution_threshold: 1.0,
            dt: 1.0 / 60.0,
            restore_threshold: RestoreThreshold::default(),
        }
    }

    fn add(particles: &mut Particles, desc: ParticleDescription) -> ParticleHandle {
        particles.insert(|h| RigidParticle::from_description(h, &desc))
    }

    fn sphere_on_ground(particles: &mut Particles) -> (ParticleHandle, ParticleHandle) {
        let ground = add(
            particles,
            ParticleDescription::fixed(RigidPose::IDENTITY, ImplicitShape::plane(Vec3::Y)),
        );
        let ball = add(
            particles,
            ParticleDescription::dynamic(
                RigidPose::from_position(Vec3::new(0.0, 0.49, 0.0)),
                1.0,
                ImplicitShape::sphere(0.5),
            ),
        );
        (ground, ball)
    }

    #[test]
    fn restore_reuses_manifold_when_still() {
        let mut particles = Particles::new();
        let materials = Materials::new();
        let (ground, ball) = sphere_on_ground(&mut particles);
        let mut mid_phase = ParticlePairMidPhase::new(ball, ground, 0);
        assert_eq!(mid_phase.generate_collisions(&context(&particles, &materials)), 1);
        let first = mid_phase.constraint(DetectorId::Single(0)).cloned().unwrap();
        assert!(!first.was_restored);

        // Tiny motion under the threshold: the local contacts are reused and re-evaluated.
        particles.get_mut(ball).unwrap().p.y += 0.0005;
        assert_eq!(mid_phase.generate_collisions(&context(&particles, &materials)), 1);
        let second = mid_phase.constraint(DetectorId::Single(0)).unwrap();
        assert!(second.was_restored);
        assert_eq!(second.manifold_points.len(), first.manifold_points.len());
        assert_eq!(
            second.manifold_points[0].local_contact_points,
            first.manifold_points[0].local_contact_points
        );
        let drift = second.manifold_points[0].contact.phi - first.manifold_points[0].contact.phi;
        assert!((drift - 0.0005).abs() < 1e-5);

        // Larger motion regenerates.
        particles.get_mut(ball).unwrap().p.y += 0.01;
        mid_phase.generate_collisions(&context(&particles, &materials));
        let third = mid_phase.constraint(DetectorId::Single(0)).unwrap();
        assert!(!third.was_restored);
        assert!(third.manifold_points[0].contact.phi > first.manifold_points[0].contact.phi);
    }

    #[test]
    fn restored_manifold_matches_a_fresh_narrow_phase() {
        let mut particles = Particles::new();
        let materials = Materials::new();
        let (ground, ball) = sphere_on_ground(&mut particles);
        let mut restored = ParticlePairMidPhase::new(ball, ground, 0);
        restored.generate_collisions(&context(&particles, &materials));
        // World contacts written back from a pose the solve moved the ball to.
        let moved = RigidPose::from_position(Vec3::new(0.3, 0.6, 0.0));
        restored.visit_collisions_mut(|constraint| constraint.update_world_contacts([moved, RigidPose::IDENTITY]));

        assert_eq!(restored.generate_collisions(&context(&particles, &materials)), 1);
        let restored = restored.constraint(DetectorId::Single(0)).unwrap();
        assert!(restored.was_restored);

        let mut fresh = ParticlePairMidPhase::new(ball, ground, 0);
        fresh.generate_collisions(&context(&particles, &materials));
        let fresh = fresh.constraint(DetectorId::Single(0)).unwrap();
        assert!(!fresh.was_restored);

        assert_eq!(restored.manifold_points.len(), fresh.manifold_points.len());
        for (a, b) in restored.manifold_points.iter().zip(&fresh.manifold_points) {
            for shape in 0..2 {
                assert!((a.contact.shape_contact_points[shape] - b.contact.shape_contact_points[shape]).length() < 1e-5);
            }
            assert!((a.contact.shape_contact_normal - b.contact.shape_contact_normal).length() < 1e-5);
            assert!((a.contact.phi - b.contact.phi).abs() < 1e-5);
        }
    }

    #[test]
    fn separated_pair_deactivates_but_keeps_constraint() {
        let mut particles = Particles::new();
        let materials = Materials::new();
        let (ground, ball) = sphere_on_ground(&mut particles);
        let mut mid_phase = ParticlePairMidPhase::new(ground, ball, 0);
        mid_phase.generate_collisions(&context(&particles, &materials));
        particles.get_mut(ball).unwrap().p.y = 3.0;
        assert_eq!(mid_phase.generate_collisions(&context(&particles, &materials)), 0);
        let constraint = mid_phase.constraint(DetectorId::Single(0)).unwrap();
        assert!(!constraint.is_active);
        assert!(mid_phase.active_detectors().is_empty());
    }

    #[test]
    fn filtered_shapes_get_no_detector() {
        let mut particles = Particles::new();
        let materials = Materials::new();
        let a = add(
            &mut particles,
            ParticleDescription::dynamic_without_shapes(RigidPose::IDENTITY, 1.0).with_shape(
                ShapeInstance::new(ImplicitShape::sphere(1.0)).with_filter(CollisionFilter::new(1, 1)),
            ),
        );
        let b = add(
            &mut particles,
            ParticleDescription::dynamic_without_shapes(RigidPose::from_position(Vec3::X), 1.0).with_shape(
                ShapeInstance::new(ImplicitShape::sphere(1.0)).with_filter(CollisionFilter::new(2, 2)),
            ),
        );
        let mut mid_phase = ParticlePairMidPhase::new(a, b, 0);
        assert_eq!(mid_phase.generate_collisions(&context(&particles, &materials)), 0);
        assert!(mid_phase.is_initialized());
        let mut count = 0;
        mid_phase.visit_collisions(|_| count += 1);
        assert_eq!(count, 0);
    }

    #[test]
    fn union_children_get_their_own_constraints() {
        let mut particles = Particles::new();
        let materials = Materials::new();
        let ground = add(
            &mut particles,
            ParticleDescription::fixed(RigidPose::IDENTITY, ImplicitShape::plane(Vec3::Y)),
        );
        let dumbbell = ImplicitShape::Union(vec![
            UnionChild {
                local_pose: RigidPose::from_position(Vec3::new(-1.0, 0.0, 0.0)),
                shape: ImplicitShape::sphere(0.5),
            },
            UnionChild {
                local_pose: RigidPose::from_position(Vec3::new(1.0, 0.0, 0.0)),
                shape: ImplicitShape::sphere(0.5),
            },
        ]);
        let body = add(
            &mut particles,
            ParticleDescription::dynamic(RigidPose::from_position(Vec3::new(0.0, 0.5, 0.0)), 1.0, dumbbell),
        );
        let mut mid_phase = ParticlePairMidPhase::new(ground, body, 0);
        assert_eq!(mid_phase.generate_collisions(&context(&particles, &materials)), 2);
        assert_eq!(mid_phase.active_detectors().len(), 2);
    }

    #[test]
    fn missing_particle_invalidates() {
        let mut particles = Particles::new();
        let materials = Materials::new();
        let (ground, ball) = sphere_on_ground(&mut particles);
        let mut mid_phase = ParticlePairMidPhase::new(ground, ball, 0);
        particles.remove(ball, 0);
        assert_eq!(mid_phase.generate_collisions(&context(&particles, &materials)), 0);
        assert!(!mid_phase.is_valid());
    }

    #[test]
    fn ccd_threshold_uses_smallest_extent() {
        let desc = ParticleDescription::dynamic(RigidPose::IDENTITY, 1.0, ImplicitShape::sphere(0.1))
            .with_ccd(true);
        let mut particle = RigidParticle::from_description(ParticleHandle::new(0, 0), &desc);
        particle.p = Vec3::new(0.05, 0.0, 0.0);
        assert!(!should_enable_ccd(&particle, 0.4));
        particle.p = Vec3::new(0.1, 0.0, 0.0);
        assert!(should_enable_ccd(&particle, 0.4));
        particle.ccd_enabled = false;
        assert!(!should_enable_ccd(&particle, 0.4));
    }
}
