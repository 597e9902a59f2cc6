use glam::Vec3;

use super::constraint_rule::{
    ConstraintContainers, ConstraintRef, ConstraintRuleType, GatherContext, GraphConstraint, IConstraintRule,
    SolverContext,
};
use super::solver_body::{body_pair_mut, SolverBody};
use crate::physics::collision_detection::{CollisionConstraintId, ParticlePairKey, PbdCollisionConstraint};
use crate::physics::constraint_graph::{ConstraintGraph, Island};
use crate::physics::island_solver::IslandSolveData;
use crate::physics::particles::Particles;

/// Island-local copy of a collision constraint.
#[derive(Debug, Clone)]
pub struct SolverCollision {
    pub id: CollisionConstraintId,
    pub bodies: [usize; 2],
    pub constraint: PbdCollisionConstraint,
}

/// Solves contacts: non-penetration and static friction as position corrections in the first
/// phase, then push-out of remaining penetration and the restitution velocity target in the second.
#[derive(Debug, Clone)]
pub struct CollisionConstraintRule {
    priority: u32,
}

impl CollisionConstraintRule {
    pub fn new(priority: u32) -> Self {
        Self { priority }
    }
}

/// Moves the pair apart along the normal when the point penetrates. Returns the correction distance.
fn solve_point_penetration(
    constraint: &mut PbdCollisionConstraint,
    index: usize,
    body0: &mut SolverBody,
    body1: &mut SolverBody,
) -> f32 {
    let (world0, world1, normal, phi) = constraint.evaluate_point(index, [body0.pose(), body1.pose()]);
    if phi >= 0.0 {
        return 0.0;
    }
    let offset0 = world0 - body0.p;
    let offset1 = world1 - body1.p;
    let inverse_mass =
        body0.effective_inverse_mass(offset0, normal) + body1.effective_inverse_mass(offset1, normal);
    if inverse_mass <= 0.0 {
        return 0.0;
    }
    let correction = -phi * constraint.material.stiffness;
    let lambda = correction / inverse_mass;
    constraint.manifold_points[index].net_push_out += lambda;
    body0.apply_position_correction(offset0, normal * lambda);
    body1.apply_position_correction(offset1, -normal * lambda);
    correction
}

/// Removes the tangential drift of the contact since the start of the tick, within the friction
/// cone of the normal correction applied so far. Returns the correction distance.
fn solve_point_static_friction(
    constraint: &mut PbdCollisionConstraint,
    index: usize,
    body0: &mut SolverBody,
    body1: &mut SolverBody,
) -> f32 {
    let point = constraint.manifold_points[index];
    let limit = constraint.material.friction * point.net_push_out;
    if limit <= 0.0 {
        return 0.0;
    }
    let (world0, world1, normal, _) = constraint.evaluate_point(index, [body0.pose(), body1.pose()]);
    let start0 = body0.start_pose().transform_point(point.local_contact_points[0]);
    let start1 = body1.start_pose().transform_point(point.local_contact_points[1]);
    let drift = (world0 - start0) - (world1 - start1);
    let tangential = drift - normal * drift.dot(normal);
    let length = tangential.length();
    if length <= f32::EPSILON {
        return 0.0;
    }
    let direction = tangential / length;
    let offset0 = world0 - body0.p;
    let offset1 = world1 - body1.p;
    let inverse_mass =
        body0.effective_inverse_mass(offset0, direction) + body1.effective_inverse_mass(offset1, direction);
    if inverse_mass <= 0.0 {
        return 0.0;
    }
    let mut net_friction = point.net_friction - direction * (length / inverse_mass);
    let net_length = net_friction.length();
    if net_length > limit {
        net_friction *= limit / net_length;
    }
    let correction = net_friction - point.net_friction;
    constraint.manifold_points[index].net_friction = net_friction;
    constraint.manifold_points[index].has_friction_anchor = true;
    body0.apply_position_correction(offset0, correction);
    body1.apply_position_correction(offset1, -correction);
    correction.length() * inverse_mass
}

/// Drives the normal velocity of a touching point to its restitution target. Returns the velocity change.
fn solve_point_velocity(
    constraint: &mut PbdCollisionConstraint,
    index: usize,
    body0: &mut SolverBody,
    body1: &mut SolverBody,
) -> f32 {
    let (world0, world1, normal, phi) = constraint.evaluate_point(index, [body0.pose(), body1.pose()]);
    let point = constraint.manifold_points[index];
    let touching = phi <= 0.0 || point.net_push_out > 0.0 || constraint.is_ccd();
    if !touching {
        return 0.0;
    }
    let offset0 = world0 - body0.p;
    let offset1 = world1 - body1.p;
    let normal_velocity = (body0.velocity_at(offset0) - body1.velocity_at(offset1)).dot(normal);
    let material = &constraint.material;
    let target = if point.initial_normal_velocity < -material.restitution_threshold {
        -material.restitution * point.initial_normal_velocity
    } else {
        0.0
    };
    if normal_velocity >= target {
        return 0.0;
    }
    let inverse_mass =
        body0.effective_inverse_mass(offset0, normal) + body1.effective_inverse_mass(offset1, normal);
    if inverse_mass <= 0.0 {
        return 0.0;
    }
    let change = target - normal_velocity;
    let impulse = change / inverse_mass;
    constraint.manifold_points[index].net_impulse += impulse;
    body0.apply_velocity_impulse(offset0, normal * impulse);
    body1.apply_velocity_impulse(offset1, -normal * impulse);
    change
}

impl IConstraintRule for CollisionConstraintRule {
    fn rule_type(&self) -> ConstraintRuleType {
        ConstraintRuleType::Collision
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn set_priority(&mut self, priority: u32) {
        self.priority = priority;
    }

    fn add_to_graph(&self, _particles: &Particles, containers: &ConstraintContainers, graph: &mut ConstraintGraph) {
        containers.collisions.visit_collisions(|id, constraint| {
            if !constraint.is_enabled() {
                return;
            }
            let [a, b] = constraint.particles;
            graph.add_constraint(GraphConstraint::new(
                ConstraintRef::Collision(id),
                [Some(a), Some(b)],
                (ParticlePairKey::new(a, b).0, constraint.shape_pair_key.0),
            ));
        });
    }

    fn gather(&self, island: &Island, context: &GatherContext, data: &mut IslandSolveData) {
        for graph_constraint in &island.constraints {
            let ConstraintRef::Collision(id) = graph_constraint.reference else {
                continue;
            };
            let Some(source) = context.containers.collisions.constraint(id) else {
                continue;
            };
            let Some(bodies) = data.add_body_pair(source.particles, context.particles, context.materials) else {
                continue;
            };
            let mut constraint = source.clone();
            constraint.accumulated_impulse = Vec3::ZERO;
            let body0 = &data.bodies[bodies[0]];
            let body1 = &data.bodies[bodies[1]];
            let poses = [body0.pose(), body1.pose()];
            for index in 0..constraint.manifold_points.len() {
                let (world0, world1, normal, _) = constraint.evaluate_point(index, poses);
                let point = &mut constraint.manifold_points[index];
                point.reset_accumulators();
                point.initial_normal_velocity =
                    (body0.velocity_at(world0 - body0.p) - body1.velocity_at(world1 - body1.p)).dot(normal);
            }
            data.collisions.push(SolverCollision { id, bodies, constraint });
        }
    }

    fn apply_constraints(&self, data: &mut IslandSolveData, context: &SolverContext) -> bool {
        let mut needs_more = false;
        for collision in &mut data.collisions {
            let (body0, body1) = body_pair_mut(&mut data.bodies, collision.bodies[0], collision.bodies[1]);
            let constraint = &mut collision.constraint;
            for index in 0..constraint.manifold_points.len() {
                let penetration = solve_point_penetration(constraint, index, body0, body1);
                let friction = solve_point_static_friction(constraint, index, body0, body1);
                needs_more |= penetration > context.tolerance || friction > context.tolerance;
            }
        }
        needs_more
    }

    fn apply_push_out(&self, data: &mut IslandSolveData, context: &SolverContext) -> bool {
        let mut needs_more = false;
        for collision in &mut data.collisions {
            let (body0, body1) = body_pair_mut(&mut data.bodies, collision.bodies[0], collision.bodies[1]);
            let constraint = &mut collision.constraint;
            for index in 0..constraint.manifold_points.len() {
                let penetration = solve_point_penetration(constraint, index, body0, body1);
                let velocity = solve_point_velocity(constraint, index, body0, body1);
                needs_more |= penetration > context.tolerance || velocity > context.tolerance;
            }
        }
        needs_more
    }

    fn scatter(&self, data: &IslandSolveData, containers: &mut ConstraintContainers) {
        for collision in &data.collisions {
            let Some(target) = containers.collisions.constraint_mut(collision.id) else {
                continue;
            };
            let mut solved = collision.constraint.clone();
            let poses = [data.bodies[collision.bodies[0]].pose(), data.bodies[collision.bodies[1]].pose()];
            solved.update_world_contacts(poses);
            solved.accumulated_impulse = solved
                .manifold_points
                .iter()
                .map(|point| point.contact.shape_contact_normal * (point.net_push_out / data.dt + point.net_impulse))
                .sum();
            *target = solved;
        }
    }
}
