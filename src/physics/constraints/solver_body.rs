use glam::{Mat3, Quat, Vec3};

use crate::physics::handles::ParticleHandle;
use crate::physics::particle_properties::{ParticleActivity, RigidPose};
use crate::physics::particles::RigidParticle;
use crate::physics::physics_material::PhysicsMaterial;
use crate::utilities::math_helper;

/// Speeds under which a particle counts towards sleeping, taken from its material.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SleepThresholds {
    pub linear: f32,
    pub angular: f32,
    /// Consecutive ticks under both speeds before the particle may sleep.
    pub counter: u32,
}

impl From<&PhysicsMaterial> for SleepThresholds {
    fn from(material: &PhysicsMaterial) -> Self {
        Self {
            linear: material.sleeping_linear_threshold,
            angular: material.sleeping_angular_threshold,
            counter: material.sleep_counter_threshold,
        }
    }
}

/// Island-local copy of the particle state the solver reads and writes. Non-dynamic particles
/// referenced by the island's constraints are carried with zero inverse mass.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverBody {
    pub handle: ParticleHandle,
    /// Committed pose at the start of the tick.
    pub x: Vec3,
    pub r: Quat,
    /// Pose being corrected by the solver.
    pub p: Vec3,
    pub q: Quat,
    pub v: Vec3,
    pub w: Vec3,
    pub inv_mass: f32,
    pub inv_inertia_local: Vec3,
    pub is_dynamic: bool,
    pub auto_disable: bool,
    pub activity: ParticleActivity,
    pub sleep_thresholds: SleepThresholds,
}

impl SolverBody {
    pub fn from_particle(particle: &RigidParticle, sleep_thresholds: SleepThresholds) -> Self {
        let is_dynamic = particle.is_dynamic();
        Self {
            handle: particle.handle,
            x: particle.x,
            r: particle.r,
            p: particle.p,
            q: particle.q,
            v: particle.v,
            w: particle.w,
            inv_mass: if is_dynamic { particle.inertia.inverse_mass } else { 0.0 },
            inv_inertia_local: if is_dynamic {
                particle.inertia.inverse_inertia
            } else {
                Vec3::ZERO
            },
            is_dynamic,
            auto_disable: particle.auto_disable,
            activity: particle.activity,
            sleep_thresholds,
        }
    }

    #[inline(always)]
    pub fn pose(&self) -> RigidPose {
        RigidPose::new(self.p, self.q)
    }

    #[inline(always)]
    pub fn start_pose(&self) -> RigidPose {
        RigidPose::new(self.x, self.r)
    }

    #[inline]
    pub fn inv_inertia_world(&self) -> Mat3 {
        if !self.is_dynamic {
            return Mat3::ZERO;
        }
        let rotation = Mat3::from_quat(self.q);
        rotation * Mat3::from_diagonal(self.inv_inertia_local) * rotation.transpose()
    }

    /// Inverse mass seen by a unit impulse along `direction` applied at `offset` from the center of mass.
    #[inline]
    pub fn effective_inverse_mass(&self, offset: Vec3, direction: Vec3) -> f32 {
        if !self.is_dynamic {
            return 0.0;
        }
        let angular = offset.cross(direction);
        self.inv_mass + angular.dot(self.inv_inertia_world() * angular)
    }

    /// Moves the body as if a positional impulse had been applied at `offset`.
    #[inline]
    pub fn apply_position_correction(&mut self, offset: Vec3, impulse: Vec3) {
        if !self.is_dynamic {
            return;
        }
        let rotation = self.inv_inertia_world() * offset.cross(impulse);
        self.p += impulse * self.inv_mass;
        self.q = math_helper::integrate_orientation(self.q, rotation, 1.0);
    }

    #[inline]
    pub fn apply_velocity_impulse(&mut self, offset: Vec3, impulse: Vec3) {
        if !self.is_dynamic {
            return;
        }
        self.w += self.inv_inertia_world() * offset.cross(impulse);
        self.v += impulse * self.inv_mass;
    }

    /// Velocity of the point at `offset` from the center of mass.
    #[inline(always)]
    pub fn velocity_at(&self, offset: Vec3) -> Vec3 {
        self.v + self.w.cross(offset)
    }

    /// Derives velocities from the distance the solver moved the body this tick.
    pub fn update_implicit_velocity(&mut self, dt: f32) {
        if !self.is_dynamic {
            return;
        }
        self.v = (self.p - self.x) / dt;
        self.w = math_helper::angular_velocity_between(self.r, self.q, dt);
    }

    pub fn is_finite(&self) -> bool {
        math_helper::is_finite(self.p)
            && math_helper::is_finite_quat(self.q)
            && math_helper::is_finite(self.v)
            && math_helper::is_finite(self.w)
    }
}

/// Borrows two distinct bodies mutably.
#[inline]
pub fn body_pair_mut(bodies: &mut [SolverBody], a: usize, b: usize) -> (&mut SolverBody, &mut SolverBody) {
    assert_ne!(a, b, "A constraint cannot connect a body to itself.");
    if a < b {
        let (head, tail) = bodies.split_at_mut(b);
        (&mut head[a], &mut tail[0])
    } else {
        let (head, tail) = bodies.split_at_mut(a);
        (&mut tail[0], &mut head[b])
    }
}
