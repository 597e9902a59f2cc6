use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents a rigid transformation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RigidPose {
    /// Position of the pose.
    pub position: Vec3,
    /// Orientation of the pose.
    pub orientation: Quat,
}

impl Default for RigidPose {
    #[inline(always)]
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl RigidPose {
    /// Returns a pose with a position at (0,0,0) and identity orientation.
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        orientation: Quat::IDENTITY,
    };

    /// Creates a rigid pose with the given position and orientation.
    #[inline(always)]
    pub fn new(position: Vec3, orientation: Quat) -> Self {
        Self {
            position,
            orientation,
        }
    }

    /// Creates a rigid pose with the given position and identity orientation.
    #[inline(always)]
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            orientation: Quat::IDENTITY,
        }
    }

    /// Transforms a point by the rigid pose: orientation * v + position.
    #[inline(always)]
    pub fn transform_point(&self, v: Vec3) -> Vec3 {
        self.orientation * v + self.position
    }

    /// Rotates a direction by the pose orientation.
    #[inline(always)]
    pub fn transform_vector(&self, v: Vec3) -> Vec3 {
        self.orientation * v
    }

    /// Transforms a point by the inverse of the pose: orientation^-1 * (v - position).
    #[inline(always)]
    pub fn inverse_transform_point(&self, v: Vec3) -> Vec3 {
        self.orientation.conjugate() * (v - self.position)
    }

    #[inline(always)]
    pub fn inverse_transform_vector(&self, v: Vec3) -> Vec3 {
        self.orientation.conjugate() * v
    }

    /// Concatenates a local pose onto this one: the result maps local space of `local` to the
    /// space this pose maps into.
    #[inline(always)]
    pub fn compose(&self, local: &RigidPose) -> RigidPose {
        RigidPose {
            position: self.transform_point(local.position),
            orientation: (self.orientation * local.orientation).normalize(),
        }
    }

    /// Interpolates between two poses; `alpha` of zero returns `self`.
    #[inline]
    pub fn lerp(&self, other: &RigidPose, alpha: f32) -> RigidPose {
        RigidPose {
            position: self.position.lerp(other.position, alpha),
            orientation: self.orientation.slerp(other.orientation, alpha),
        }
    }
}

impl From<Vec3> for RigidPose {
    fn from(position: Vec3) -> Self {
        Self::from_position(position)
    }
}

impl From<(Vec3, Quat)> for RigidPose {
    fn from((position, orientation): (Vec3, Quat)) -> Self {
        Self::new(position, orientation)
    }
}

impl fmt::Display for RigidPose {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}, {}", self.position, self.orientation)
    }
}

/// Simulation state of a particle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectState {
    /// Never moves; infinite mass.
    Static,
    /// Moved by the user through kinematic targets or velocities; infinite mass.
    Kinematic,
    /// Simulated.
    Dynamic,
    /// Simulated, but currently asleep along with its whole island.
    Sleeping,
}

impl ObjectState {
    /// Dynamic or sleeping particles take part in islands.
    #[inline(always)]
    pub fn is_dynamic(self) -> bool {
        matches!(self, ObjectState::Dynamic | ObjectState::Sleeping)
    }

    #[inline(always)]
    pub fn is_awake_dynamic(self) -> bool {
        self == ObjectState::Dynamic
    }
}

/// How the kinematic target of a particle is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KinematicTargetMode {
    /// The particle keeps its velocity; nothing is applied.
    None,
    /// The particle is stopped on the next tick and the mode falls back to `None`.
    Reset,
    /// The particle is moved towards the target pose across the sub-steps of the tick.
    Position,
}

/// Target pose of a kinematic particle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KinematicTarget {
    pub mode: KinematicTargetMode,
    pub target: RigidPose,
}

impl Default for KinematicTarget {
    fn default() -> Self {
        Self {
            mode: KinematicTargetMode::None,
            target: RigidPose::IDENTITY,
        }
    }
}

impl KinematicTarget {
    pub fn position(target: RigidPose) -> Self {
        Self {
            mode: KinematicTargetMode::Position,
            target,
        }
    }
}

/// Inverse mass and diagonal local inverse inertia of a particle. Zero means infinite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ParticleInertia {
    pub inverse_mass: f32,
    /// Diagonal of the inverse inertia tensor in the particle's local space.
    pub inverse_inertia: Vec3,
}

impl ParticleInertia {
    /// Inertia of an immovable particle.
    pub const INFINITE: Self = Self {
        inverse_mass: 0.0,
        inverse_inertia: Vec3::ZERO,
    };

    /// Solid box of the given half extents.
    pub fn solid_box(mass: f32, half_extents: Vec3) -> Self {
        if mass <= 0.0 {
            return Self::INFINITE;
        }
        let inverse_mass = 1.0 / mass;
        let s = half_extents * half_extents;
        let inverse_or_zero = |v: f32| if v > 0.0 { inverse_mass * 3.0 / v } else { 0.0 };
        Self {
            inverse_mass,
            inverse_inertia: Vec3::new(
                inverse_or_zero(s.y + s.z),
                inverse_or_zero(s.x + s.z),
                inverse_or_zero(s.x + s.y),
            ),
        }
    }

    /// Solid sphere of the given radius.
    pub fn solid_sphere(mass: f32, radius: f32) -> Self {
        if mass <= 0.0 || radius <= 0.0 {
            return Self::INFINITE;
        }
        let inverse_mass = 1.0 / mass;
        Self {
            inverse_mass,
            inverse_inertia: Vec3::splat(inverse_mass / ((2.0 / 5.0) * radius * radius)),
        }
    }

    #[inline(always)]
    pub fn is_infinite(&self) -> bool {
        self.inverse_mass == 0.0
    }
}

/// Per particle counters driving sleeping and automatic disabling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticleActivity {
    /// Consecutive ticks spent under the material's sleep thresholds.
    pub sleep_counter: u32,
    /// Consecutive ticks spent under the evolution's disable thresholds.
    pub disable_counter: u32,
}
