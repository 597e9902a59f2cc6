use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::constraint_rule::{
    ConstraintContainers, ConstraintRef, ConstraintRuleType, GatherContext, GraphConstraint, IConstraintRule,
    SolverContext,
};
use crate::physics::constraint_graph::{ConstraintGraph, Island};
use crate::physics::handles::{ParticleHandle, SuspensionHandle};
use crate::physics::island_solver::IslandSolveData;
use crate::physics::particles::Particles;
use crate::utilities::memory::IdPool;

/// One-body spring that keeps an anchor on the particle at least `rest_length` above a target
/// point, measured along `axis`. It only pushes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspensionConstraint {
    pub particle: ParticleHandle,
    /// Anchor in the particle's local space.
    pub local_anchor: Vec3,
    /// Unit world space direction the spring pushes along.
    pub axis: Vec3,
    /// Ground point in world space.
    pub target: Vec3,
    pub rest_length: f32,
    /// Fraction of the compression removed per iteration, in (0, 1].
    pub stiffness: f32,
    pub is_enabled: bool,
    /// Impulse applied along the axis by the last solve.
    pub net_impulse: f32,
}

impl SuspensionConstraint {
    pub fn new(particle: ParticleHandle, local_anchor: Vec3, axis: Vec3, rest_length: f32, stiffness: f32) -> Self {
        Self {
            particle,
            local_anchor,
            axis: axis.normalize_or_zero(),
            target: Vec3::ZERO,
            rest_length,
            stiffness,
            is_enabled: true,
            net_impulse: 0.0,
        }
    }

    pub fn with_target(mut self, target: Vec3) -> Self {
        self.target = target;
        self
    }
}

/// Storage of every suspension, addressed by stable handles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuspensionConstraints {
    suspensions: Vec<Option<SuspensionConstraint>>,
    id_pool: IdPool,
}

impl SuspensionConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, suspension: SuspensionConstraint) -> SuspensionHandle {
        let id = self.id_pool.take();
        let index = id as usize;
        if index >= self.suspensions.len() {
            self.suspensions.resize(index + 1, None);
        }
        self.suspensions[index] = Some(suspension);
        SuspensionHandle(id)
    }

    pub fn remove(&mut self, handle: SuspensionHandle) -> Option<SuspensionConstraint> {
        let suspension = self.suspensions.get_mut(handle.0 as usize)?.take()?;
        self.id_pool.return_id(handle.0);
        Some(suspension)
    }

    #[inline]
    pub fn get(&self, handle: SuspensionHandle) -> Option<&SuspensionConstraint> {
        self.suspensions.get(handle.0 as usize).and_then(Option::as_ref)
    }

    #[inline]
    pub fn get_mut(&mut self, handle: SuspensionHandle) -> Option<&mut SuspensionConstraint> {
        self.suspensions.get_mut(handle.0 as usize).and_then(Option::as_mut)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SuspensionHandle, &SuspensionConstraint)> {
        self.suspensions.iter().enumerate().filter_map(|(index, suspension)| {
            suspension
                .as_ref()
                .map(|suspension| (SuspensionHandle(index as u32), suspension))
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SuspensionHandle, &mut SuspensionConstraint)> {
        self.suspensions.iter_mut().enumerate().filter_map(|(index, suspension)| {
            suspension
                .as_mut()
                .map(|suspension| (SuspensionHandle(index as u32), suspension))
        })
    }

    pub fn len(&self) -> usize {
        self.suspensions.iter().filter(|suspension| suspension.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct SolverSuspension {
    pub handle: SuspensionHandle,
    pub body: usize,
    pub suspension: SuspensionConstraint,
    pub net_lambda: f32,
}

/// Solves suspensions as unilateral position constraints, then removes compressing velocity.
#[derive(Debug, Clone)]
pub struct SuspensionConstraintRule {
    priority: u32,
}

impl SuspensionConstraintRule {
    pub fn new(priority: u32) -> Self {
        Self { priority }
    }
}

impl IConstraintRule for SuspensionConstraintRule {
    fn rule_type(&self) -> ConstraintRuleType {
        ConstraintRuleType::Suspension
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn set_priority(&mut self, priority: u32) {
        self.priority = priority;
    }

    fn update_position_based_state(&self, particles: &Particles, containers: &mut ConstraintContainers, _dt: f32) {
        for (handle, suspension) in containers.suspensions.iter_mut() {
            if suspension.is_enabled && !particles.contains(suspension.particle) {
                log::debug!("suspension {} disabled: particle destroyed", handle);
                suspension.is_enabled = false;
            }
        }
    }

    fn add_to_graph(&self, _particles: &Particles, containers: &ConstraintContainers, graph: &mut ConstraintGraph) {
        for (handle, suspension) in containers.suspensions.iter() {
            if suspension.is_enabled {
                graph.add_constraint(GraphConstraint::new(
                    ConstraintRef::Suspension(handle),
                    [Some(suspension.particle), None],
                    (handle.0 as u64, 0),
                ));
            }
        }
    }

    fn gather(&self, island: &Island, context: &GatherContext, data: &mut IslandSolveData) {
        for graph_constraint in &island.constraints {
            let ConstraintRef::Suspension(handle) = graph_constraint.reference else {
                continue;
            };
            let Some(suspension) = context.containers.suspensions.get(handle) else {
                continue;
            };
            let Some(body) = data.body_index(suspension.particle) else {
                continue;
            };
            data.suspensions.push(SolverSuspension {
                handle,
                body,
                suspension: suspension.clone(),
                net_lambda: 0.0,
            });
        }
    }

    fn apply_constraints(&self, data: &mut IslandSolveData, context: &SolverContext) -> bool {
        let mut needs_more = false;
        for solver_suspension in &mut data.suspensions {
            let body = &mut data.bodies[solver_suspension.body];
            let suspension = &solver_suspension.suspension;
            let anchor = body.pose().transform_point(suspension.local_anchor);
            let length = (anchor - suspension.target).dot(suspension.axis);
            if length >= suspension.rest_length {
                continue;
            }
            let offset = anchor - body.p;
            let inverse_mass = body.effective_inverse_mass(offset, suspension.axis);
            if inverse_mass <= 0.0 {
                continue;
            }
            let correction = (suspension.rest_length - length) * suspension.stiffness;
            let lambda = correction / inverse_mass;
            solver_suspension.net_lambda += lambda;
            body.apply_position_correction(offset, suspension.axis * lambda);
            needs_more |= correction > context.tolerance;
        }
        needs_more
    }

    fn apply_push_out(&self, data: &mut IslandSolveData, context: &SolverContext) -> bool {
        let mut needs_more = false;
        for solver_suspension in &mut data.suspensions {
            if solver_suspension.net_lambda <= 0.0 {
                continue;
            }
            let body = &mut data.bodies[solver_suspension.body];
            let suspension = &solver_suspension.suspension;
            let offset = body.q * suspension.local_anchor;
            let axial_velocity = body.velocity_at(offset).dot(suspension.axis);
            if axial_velocity >= 0.0 {
                continue;
            }
            let inverse_mass = body.effective_inverse_mass(offset, suspension.axis);
            if inverse_mass <= 0.0 {
                continue;
            }
            body.apply_velocity_impulse(offset, suspension.axis * (-axial_velocity / inverse_mass));
            needs_more |= -axial_velocity > context.tolerance;
        }
        needs_more
    }

    fn scatter(&self, data: &IslandSolveData, containers: &mut ConstraintContainers) {
        for solver_suspension in &data.suspensions {
            if let Some(suspension) = containers.suspensions.get_mut(solver_suspension.handle) {
                suspension.net_impulse = solver_suspension.net_lambda / data.dt;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_is_normalized() {
        let suspension = SuspensionConstraint::new(ParticleHandle::new(0, 0), Vec3::ZERO, Vec3::new(0.0, 2.0, 0.0), 1.0, 1.0)
            .with_target(Vec3::new(0.0, -1.0, 0.0));
        assert_eq!(suspension.axis, Vec3::Y);
        assert_eq!(suspension.target.y, -1.0);
    }

    #[test]
    fn handles_are_stable() {
        let mut suspensions = SuspensionConstraints::new();
        let a = suspensions.add(SuspensionConstraint::new(ParticleHandle::new(0, 0), Vec3::ZERO, Vec3::Y, 1.0, 1.0));
        let b = suspensions.add(SuspensionConstraint::new(ParticleHandle::new(1, 0), Vec3::ZERO, Vec3::Y, 1.0, 1.0));
        suspensions.remove(a);
        assert!(suspensions.get(a).is_none());
        assert_eq!(suspensions.get(b).map(|s| s.particle.index), Some(1));
        assert_eq!(suspensions.len(), 1);
    }
}
