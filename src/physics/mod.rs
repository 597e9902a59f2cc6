pub mod collidables;
pub mod collision_detection;
pub mod constraint_graph;
pub mod constraints;
pub mod error;
pub mod evolution;
pub mod evolution_observer;
pub mod evolution_settings;
pub mod handles;
pub mod island_sleeper;
pub mod island_solver;
pub mod particle_description;
pub mod particle_properties;
pub mod particles;
pub mod physics_material;
pub mod pose_integrator;
pub mod resim_cache;
pub mod rigid_clustering;
pub mod simulation_profiler;
pub mod timestepper;

pub use error::{EvolutionError, Result};
pub use evolution::{Evolution, EvolutionStats, EVOLUTION_ARCHIVE_VERSION};
pub use evolution_observer::{CollisionModifierContact, ICollisionModifier, IEvolutionObserver};
pub use evolution_settings::EvolutionSettings;
pub use handles::{ClusterHandle, JointHandle, MaterialHandle, ParticleHandle, SuspensionHandle};
pub use particle_description::ParticleDescription;
pub use particle_properties::{KinematicTarget, KinematicTargetMode, ObjectState, RigidPose};
pub use timestepper::SubStepInfo;
