//! Rigid particle evolution: integration, collision detection with persistent contacts, island
//! partitioning and a parallel position based solve with sleeping and disabling.

pub mod physics;
pub mod utilities;

pub use physics::{
    ClusterHandle, Evolution, EvolutionError, EvolutionSettings, JointHandle, MaterialHandle, ParticleDescription,
    ParticleHandle, RigidPose, SubStepInfo, SuspensionHandle,
};
