pub mod collision_rule;
pub mod constraint_rule;
pub mod joint_constraints;
pub mod solver_body;
pub mod suspension_constraints;

pub use collision_rule::{CollisionConstraintRule, SolverCollision};
pub use constraint_rule::{
    ConstraintContainers, ConstraintRef, ConstraintRuleType, GatherContext, GraphConstraint, IConstraintRule,
    SolverContext,
};
pub use joint_constraints::{
    transfer_collisions_to_parents, JointBreakEvent, JointConstraint, JointConstraintRule, JointConstraints,
    JointSettings, SolverJoint,
};
pub use solver_body::{SleepThresholds, SolverBody};
pub use suspension_constraints::{
    SolverSuspension, SuspensionConstraint, SuspensionConstraintRule, SuspensionConstraints,
};
