use std::fmt;

use serde::{Deserialize, Serialize};

use super::joint_constraints::JointConstraints;
use super::suspension_constraints::SuspensionConstraints;
use crate::physics::collision_detection::{CollisionConstraintAllocator, CollisionConstraintId};
use crate::physics::constraint_graph::{ConstraintGraph, Island};
use crate::physics::handles::{JointHandle, ParticleHandle, SuspensionHandle};
use crate::physics::island_solver::IslandSolveData;
use crate::physics::particles::Particles;
use crate::physics::physics_material::Materials;

/// Kinds of constraint the graph knows about. Each kind is owned by one rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConstraintRuleType {
    Collision,
    Joint,
    Suspension,
}

impl fmt::Display for ConstraintRuleType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ConstraintRuleType::Collision => "collision",
            ConstraintRuleType::Joint => "joint",
            ConstraintRuleType::Suspension => "suspension",
        };
        f.write_str(name)
    }
}

/// Points at a constraint inside the storage of its rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConstraintRef {
    Collision(CollisionConstraintId),
    Joint(JointHandle),
    Suspension(SuspensionHandle),
}

impl ConstraintRef {
    #[inline]
    pub fn rule_type(&self) -> ConstraintRuleType {
        match self {
            ConstraintRef::Collision(_) => ConstraintRuleType::Collision,
            ConstraintRef::Joint(_) => ConstraintRuleType::Joint,
            ConstraintRef::Suspension(_) => ConstraintRuleType::Suspension,
        }
    }
}

/// Edge of the constraint graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphConstraint {
    pub reference: ConstraintRef,
    /// Connected particles. One-body constraints leave the second entry empty.
    pub particles: [Option<ParticleHandle>; 2],
    /// Stable ordering key within a rule.
    pub sort_key: (u64, u64),
    /// Distance in constraints from the nearest non-dynamic particle. Assigned by the graph.
    pub level: u32,
}

impl GraphConstraint {
    pub fn new(reference: ConstraintRef, particles: [Option<ParticleHandle>; 2], sort_key: (u64, u64)) -> Self {
        Self {
            reference,
            particles,
            sort_key,
            level: 0,
        }
    }

    #[inline]
    pub fn rule_type(&self) -> ConstraintRuleType {
        self.reference.rule_type()
    }
}

/// Storage of every constraint the rules solve.
#[derive(Debug, Default)]
pub struct ConstraintContainers {
    pub collisions: CollisionConstraintAllocator,
    pub joints: JointConstraints,
    pub suspensions: SuspensionConstraints,
}

/// Read-only view handed to rules while building island data.
pub struct GatherContext<'a> {
    pub particles: &'a Particles,
    pub materials: &'a Materials,
    pub containers: &'a ConstraintContainers,
}

/// Per iteration solver inputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverContext {
    pub dt: f32,
    pub iteration: u32,
    pub num_iterations: u32,
    /// Corrections at or below this size do not request another iteration.
    pub tolerance: f32,
}

/// A family of constraints solved together. Rules are solved in ascending priority order; within
/// a rule constraints are solved in the order the graph sorted them.
///
/// Solving methods run on worker threads and only touch the island data they are handed.
pub trait IConstraintRule: Send + Sync {
    fn rule_type(&self) -> ConstraintRuleType;

    fn priority(&self) -> u32;

    fn set_priority(&mut self, priority: u32);

    /// Refreshes state that depends on particle positions before collision detection runs.
    fn update_position_based_state(&self, _particles: &Particles, _containers: &mut ConstraintContainers, _dt: f32) {}

    /// Adds an edge for every constraint that takes part in this tick's solve.
    fn add_to_graph(&self, particles: &Particles, containers: &ConstraintContainers, graph: &mut ConstraintGraph);

    /// Copies the island's constraints of this rule into the island data.
    fn gather(&self, island: &Island, context: &GatherContext, data: &mut IslandSolveData);

    /// One position iteration. Returns true if anything moved more than the tolerance.
    fn apply_constraints(&self, data: &mut IslandSolveData, context: &SolverContext) -> bool;

    /// One push-out and velocity iteration. Returns true if anything changed more than the tolerance.
    fn apply_push_out(&self, data: &mut IslandSolveData, context: &SolverContext) -> bool;

    /// Writes solver results back to the constraint storage.
    fn scatter(&self, data: &IslandSolveData, containers: &mut ConstraintContainers);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::collision_detection::DetectorId;

    #[test]
    fn references_order_by_rule_then_id() {
        let collision = ConstraintRef::Collision(CollisionConstraintId::MidPhase {
            mid_phase: 3,
            detector: DetectorId::Single(0),
        });
        let joint = ConstraintRef::Joint(JointHandle(0));
        assert!(collision < joint);
        assert!(ConstraintRef::Joint(JointHandle(1)) > joint);
        assert_eq!(joint.rule_type(), ConstraintRuleType::Joint);
        assert_eq!(ConstraintRuleType::Suspension.to_string(), "suspension");
    }
}
