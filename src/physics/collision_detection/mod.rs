pub mod broad_phase;
pub mod ccd_manager;
pub mod collision_constraint;
pub mod collision_constraint_allocator;
pub mod contact_generation;
pub mod contact_point;
pub mod mid_phase;
pub mod narrow_phase;
pub mod pair_key;

pub use broad_phase::BroadPhase;
pub use ccd_manager::CcdManager;
pub use collision_constraint::{CcdType, CollisionMaterial, PbdCollisionConstraint};
pub use collision_constraint_allocator::{
    CollisionConstraintAllocator, CollisionConstraintId, CollisionVisitContext,
};
pub use contact_point::{ContactPoint, ManifoldPoint};
pub use mid_phase::{
    CollisionDetectionContext, DetectorId, MultiShapePairCollisionDetector, ParticlePairMidPhase,
    RestoreThreshold, SingleShapePairCollisionDetector,
};
pub use narrow_phase::NarrowPhase;
pub use pair_key::{ParticlePairKey, ShapeLocator, ShapePairKey};
