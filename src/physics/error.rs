//! Error types for the evolution API.

use thiserror::Error;

use crate::physics::handles::{ClusterHandle, JointHandle, MaterialHandle, ParticleHandle, SuspensionHandle};

/// Errors reported for recoverable misuse of the evolution API.
#[derive(Debug, Error)]
pub enum EvolutionError {
    /// The handle refers to a destroyed particle or was never issued.
    #[error("Particle not found: {0}")]
    InvalidParticle(ParticleHandle),

    /// The particle exists but its state does not allow the operation.
    #[error("Particle {handle} cannot be used here: {reason}")]
    InvalidParticleState { handle: ParticleHandle, reason: &'static str },

    #[error("Joint not found: {0}")]
    InvalidJoint(JointHandle),

    #[error("Suspension not found: {0}")]
    InvalidSuspension(SuspensionHandle),

    #[error("Material not found: {0}")]
    InvalidMaterial(MaterialHandle),

    #[error("Cluster not found: {0}")]
    InvalidCluster(ClusterHandle),

    /// Settings or descriptions that cannot be simulated.
    #[error("Invalid evolution configuration: {0}")]
    InvalidConfig(String),

    /// Encoding or decoding the state archive failed.
    #[error("State archive error: {0}")]
    Archive(String),

    #[error("State archive version {found} does not match expected version {expected}")]
    ArchiveVersion { found: u32, expected: u32 },
}

impl From<bincode::Error> for EvolutionError {
    fn from(error: bincode::Error) -> Self {
        EvolutionError::Archive(error.to_string())
    }
}

/// Result type for evolution operations
pub type Result<T> = std::result::Result<T, EvolutionError>;
