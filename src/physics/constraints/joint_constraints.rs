use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::constraint_rule::{
    ConstraintContainers, ConstraintRef, ConstraintRuleType, GatherContext, GraphConstraint, IConstraintRule,
    SolverContext,
};
use super::solver_body::{body_pair_mut, SolverBody};
use crate::physics::collision_detection::{CollisionConstraintAllocator, CollisionConstraintId};
use crate::physics::constraint_graph::{ConstraintGraph, Island};
use crate::physics::handles::{JointHandle, ParticleHandle};
use crate::physics::island_solver::IslandSolveData;
use crate::physics::particles::{Particles, RigidParticle};
use crate::utilities::memory::IdPool;

/// Tuning of a ball-socket joint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointSettings {
    /// Fraction of the positional error removed per iteration, in (0, 1].
    pub stiffness: f32,
    /// Linear impulse above which the joint breaks. `None` never breaks.
    pub break_impulse: Option<f32>,
    /// Moves the child's contacts onto the parent before solving.
    pub transfer_collisions: bool,
    /// Stiffness of transferred contacts.
    pub collision_transfer_stiffness: f32,
}

impl Default for JointSettings {
    fn default() -> Self {
        Self {
            stiffness: 1.0,
            break_impulse: None,
            transfer_collisions: false,
            collision_transfer_stiffness: 1.0,
        }
    }
}

impl JointSettings {
    pub fn with_stiffness(mut self, stiffness: f32) -> Self {
        self.stiffness = stiffness;
        self
    }

    pub fn with_break_impulse(mut self, impulse: f32) -> Self {
        self.break_impulse = Some(impulse);
        self
    }

    pub fn with_collision_transfer(mut self, stiffness: f32) -> Self {
        self.transfer_collisions = true;
        self.collision_transfer_stiffness = stiffness;
        self
    }
}

/// Ball-socket joint pinning a point of the child (particle 1) to a point of the parent (particle 0).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointConstraint {
    pub particles: [ParticleHandle; 2],
    /// Attachment in each particle's local space.
    pub local_anchors: [Vec3; 2],
    pub settings: JointSettings,
    pub is_enabled: bool,
    pub is_broken: bool,
    /// Linear impulse applied by the last solve.
    pub net_impulse: Vec3,
}

impl JointConstraint {
    pub fn new(particles: [ParticleHandle; 2], local_anchors: [Vec3; 2], settings: JointSettings) -> Self {
        Self {
            particles,
            local_anchors,
            settings,
            is_enabled: true,
            is_broken: false,
            net_impulse: Vec3::ZERO,
        }
    }

    /// Joint attached at a world space point, using the particles' committed poses.
    pub fn from_world_anchor(
        parent: &RigidParticle,
        child: &RigidParticle,
        anchor: Vec3,
        settings: JointSettings,
    ) -> Self {
        Self::new(
            [parent.handle, child.handle],
            [
                parent.pose().inverse_transform_point(anchor),
                child.pose().inverse_transform_point(anchor),
            ],
            settings,
        )
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.is_enabled && !self.is_broken
    }

    #[inline]
    pub fn parent(&self) -> ParticleHandle {
        self.particles[0]
    }

    #[inline]
    pub fn child(&self) -> ParticleHandle {
        self.particles[1]
    }
}

/// Reported when a joint exceeds its break impulse.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointBreakEvent {
    pub handle: JointHandle,
    pub particles: [ParticleHandle; 2],
    pub impulse: f32,
}

/// Storage of every joint, addressed by stable handles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JointConstraints {
    joints: Vec<Option<JointConstraint>>,
    id_pool: IdPool,
    #[serde(skip)]
    break_events: Vec<JointBreakEvent>,
}

impl JointConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, joint: JointConstraint) -> JointHandle {
        let id = self.id_pool.take();
        let index = id as usize;
        if index >= self.joints.len() {
            self.joints.resize(index + 1, None);
        }
        self.joints[index] = Some(joint);
        JointHandle(id)
    }

    pub fn remove(&mut self, handle: JointHandle) -> Option<JointConstraint> {
        let joint = self.joints.get_mut(handle.0 as usize)?.take()?;
        self.id_pool.return_id(handle.0);
        Some(joint)
    }

    #[inline]
    pub fn get(&self, handle: JointHandle) -> Option<&JointConstraint> {
        self.joints.get(handle.0 as usize).and_then(Option::as_ref)
    }

    #[inline]
    pub fn get_mut(&mut self, handle: JointHandle) -> Option<&mut JointConstraint> {
        self.joints.get_mut(handle.0 as usize).and_then(Option::as_mut)
    }

    /// Live joints in handle order.
    pub fn iter(&self) -> impl Iterator<Item = (JointHandle, &JointConstraint)> {
        self.joints
            .iter()
            .enumerate()
            .filter_map(|(index, joint)| joint.as_ref().map(|joint| (JointHandle(index as u32), joint)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (JointHandle, &mut JointConstraint)> {
        self.joints
            .iter_mut()
            .enumerate()
            .filter_map(|(index, joint)| joint.as_mut().map(|joint| (JointHandle(index as u32), joint)))
    }

    pub fn len(&self) -> usize {
        self.joints.iter().filter(|joint| joint.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drains the joints broken since the last call.
    pub fn take_break_events(&mut self) -> Vec<JointBreakEvent> {
        std::mem::take(&mut self.break_events)
    }
}

/// Rebuilds the child's active contacts against the parent for every joint that transfers collisions.
/// The original constraints are disabled for this tick. Returns the number of transferred constraints.
pub fn transfer_collisions_to_parents(
    joints: &JointConstraints,
    allocator: &mut CollisionConstraintAllocator,
    particles: &Particles,
) -> usize {
    let mut transfers: Vec<(CollisionConstraintId, f32, ParticleHandle, ParticleHandle)> = Vec::new();
    for (_, joint) in joints.iter() {
        if !joint.is_active() || !joint.settings.transfer_collisions {
            continue;
        }
        let (parent, child) = (joint.parent(), joint.child());
        allocator.visit_collisions(|id, constraint| {
            if constraint.is_enabled()
                && !constraint.is_transferred
                && constraint.particles.contains(&child)
                && !constraint.particles.contains(&parent)
            {
                transfers.push((id, joint.settings.collision_transfer_stiffness, parent, child));
            }
        });
    }

    let mut transferred = 0;
    for (id, stiffness, parent, child) in transfers {
        let (Some(parent_particle), Some(child_particle)) = (particles.get(parent), particles.get(child)) else {
            continue;
        };
        let Some(original) = allocator.constraint_mut(id) else {
            continue;
        };
        if original.disabled_by_modifier {
            continue;
        }
        original.disabled_by_modifier = true;
        let mut constraint = original.clone();

        let child_pose = child_particle.predicted_pose();
        let parent_pose = parent_particle.predicted_pose();
        let child_slot = if constraint.particles[0] == child { 0 } else { 1 };
        constraint.particles[child_slot] = parent;
        constraint.material.stiffness *= stiffness;
        constraint.last_transforms[child_slot] = parent_pose;
        for point in &mut constraint.manifold_points {
            let world = child_pose.transform_point(point.local_contact_points[child_slot]);
            point.local_contact_points[child_slot] = parent_pose.inverse_transform_point(world);
            if child_slot == 1 {
                let normal = child_pose.transform_vector(point.local_contact_normal);
                point.local_contact_normal = parent_pose.inverse_transform_vector(normal);
            }
        }
        constraint.disabled_by_modifier = false;
        allocator.add_transferred(constraint);
        transferred += 1;
    }
    if transferred > 0 {
        log::trace!("joints: transferred {} child collisions to parents", transferred);
    }
    transferred
}

/// Island-local copy of a joint.
#[derive(Debug, Clone)]
pub struct SolverJoint {
    pub handle: JointHandle,
    pub bodies: [usize; 2],
    pub joint: JointConstraint,
    /// Accumulated positional correction this tick.
    pub net_lambda: Vec3,
}

/// Solves ball-socket joints as position constraints.
#[derive(Debug, Clone)]
pub struct JointConstraintRule {
    priority: u32,
}

impl JointConstraintRule {
    pub fn new(priority: u32) -> Self {
        Self { priority }
    }
}

impl IConstraintRule for JointConstraintRule {
    fn rule_type(&self) -> ConstraintRuleType {
        ConstraintRuleType::Joint
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn set_priority(&mut self, priority: u32) {
        self.priority = priority;
    }

    /// Joints whose particles were destroyed are disabled.
    fn update_position_based_state(&self, particles: &Particles, containers: &mut ConstraintContainers, _dt: f32) {
        for (handle, joint) in containers.joints.iter_mut() {
            if joint.is_enabled && !joint.particles.iter().all(|&particle| particles.contains(particle)) {
                log::debug!("joint {} disabled: particle destroyed", handle);
                joint.is_enabled = false;
            }
        }
    }

    fn add_to_graph(&self, _particles: &Particles, containers: &ConstraintContainers, graph: &mut ConstraintGraph) {
        for (handle, joint) in containers.joints.iter() {
            if joint.is_active() {
                graph.add_constraint(GraphConstraint::new(
                    ConstraintRef::Joint(handle),
                    [Some(joint.particles[0]), Some(joint.particles[1])],
                    (handle.0 as u64, 0),
                ));
            }
        }
    }

    fn gather(&self, island: &Island, context: &GatherContext, data: &mut IslandSolveData) {
        for graph_constraint in &island.constraints {
            let ConstraintRef::Joint(handle) = graph_constraint.reference else {
                continue;
            };
            let Some(joint) = context.containers.joints.get(handle) else {
                continue;
            };
            let Some(bodies) = data.add_body_pair(joint.particles, context.particles, context.materials) else {
                continue;
            };
            data.joints.push(SolverJoint {
                handle,
                bodies,
                joint: joint.clone(),
                net_lambda: Vec3::ZERO,
            });
        }
    }

    fn apply_constraints(&self, data: &mut IslandSolveData, context: &SolverContext) -> bool {
        let mut needs_more = false;
        for solver_joint in &mut data.joints {
            let (body0, body1) = body_pair_mut(&mut data.bodies, solver_joint.bodies[0], solver_joint.bodies[1]);
            let stiffness = solver_joint.joint.settings.stiffness;
            let correction = solve_joint_position(solver_joint, body0, body1, stiffness);
            needs_more |= correction > context.tolerance;
        }
        needs_more
    }

    fn apply_push_out(&self, data: &mut IslandSolveData, context: &SolverContext) -> bool {
        let mut needs_more = false;
        for solver_joint in &mut data.joints {
            let (body0, body1) = body_pair_mut(&mut data.bodies, solver_joint.bodies[0], solver_joint.bodies[1]);
            let stiffness = solver_joint.joint.settings.stiffness;
            let correction = solve_joint_position(solver_joint, body0, body1, stiffness);
            let velocity = solve_joint_velocity(solver_joint, body0, body1, stiffness);
            needs_more |= correction > context.tolerance || velocity > context.tolerance;
        }
        needs_more
    }

    fn scatter(&self, data: &IslandSolveData, containers: &mut ConstraintContainers) {
        let joints = &mut containers.joints;
        for solver_joint in &data.joints {
            let Some(joint) = joints.get_mut(solver_joint.handle) else {
                continue;
            };
            joint.net_impulse = solver_joint.net_lambda / data.dt;
            let impulse = joint.net_impulse.length();
            if let Some(threshold) = joint.settings.break_impulse {
                if impulse > threshold {
                    joint.is_broken = true;
                    log::warn!(
                        "joint {} broke: impulse {} exceeded {}",
                        solver_joint.handle,
                        impulse,
                        threshold
                    );
                    let particles = joint.particles;
                    joints.break_events.push(JointBreakEvent {
                        handle: solver_joint.handle,
                        particles,
                        impulse,
                    });
                }
            }
        }
    }
}

/// Pulls the two anchors together by `stiffness` of their separation. Returns the corrected distance.
fn solve_joint_position(
    solver_joint: &mut SolverJoint,
    body0: &mut SolverBody,
    body1: &mut SolverBody,
    stiffness: f32,
) -> f32 {
    let joint = &solver_joint.joint;
    let anchor0 = body0.pose().transform_point(joint.local_anchors[0]);
    let anchor1 = body1.pose().transform_point(joint.local_anchors[1]);
    let error = anchor0 - anchor1;
    let length = error.length();
    if length <= f32::EPSILON {
        return 0.0;
    }
    let direction = error / length;
    let offset0 = anchor0 - body0.p;
    let offset1 = anchor1 - body1.p;
    let inverse_mass = body0.effective_inverse_mass(offset0, direction) + body1.effective_inverse_mass(offset1, direction);
    if inverse_mass <= 0.0 {
        return 0.0;
    }
    let correction = length * stiffness;
    let lambda = -correction / inverse_mass;
    solver_joint.net_lambda += direction * lambda;
    body0.apply_position_correction(offset0, direction * lambda);
    body1.apply_position_correction(offset1, -direction * lambda);
    correction
}

/// Removes `stiffness` of the relative velocity of the two anchors. Returns the speed that was removed.
fn solve_joint_velocity(
    solver_joint: &SolverJoint,
    body0: &mut SolverBody,
    body1: &mut SolverBody,
    stiffness: f32,
) -> f32 {
    let joint = &solver_joint.joint;
    let anchor0 = body0.pose().transform_point(joint.local_anchors[0]);
    let anchor1 = body1.pose().transform_point(joint.local_anchors[1]);
    let offset0 = anchor0 - body0.p;
    let offset1 = anchor1 - body1.p;
    let relative = body0.velocity_at(offset0) - body1.velocity_at(offset1);
    let speed = relative.length();
    if speed <= f32::EPSILON {
        return 0.0;
    }
    let direction = relative / speed;
    let inverse_mass = body0.effective_inverse_mass(offset0, direction) + body1.effective_inverse_mass(offset1, direction);
    if inverse_mass <= 0.0 {
        return 0.0;
    }
    let change = speed * stiffness;
    let impulse = direction * (-change / inverse_mass);
    body0.apply_velocity_impulse(offset0, impulse);
    body1.apply_velocity_impulse(offset1, -impulse);
    change
}
