use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Contact produced by contact generation, in world space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContactPoint {
    /// Contact location on the surface of each shape.
    pub shape_contact_points: [Vec3; 2],
    /// Unit normal pointing from shape 1 towards shape 0.
    pub shape_contact_normal: Vec3,
    /// Signed separation along the normal; negative when penetrating.
    pub phi: f32,
}

impl ContactPoint {
    #[inline]
    pub fn new(point0: Vec3, point1: Vec3, normal: Vec3, phi: f32) -> Self {
        Self {
            shape_contact_points: [point0, point1],
            shape_contact_normal: normal,
            phi,
        }
    }

    /// Swaps the roles of the two shapes.
    #[inline]
    pub fn flipped(&self) -> Self {
        Self {
            shape_contact_points: [self.shape_contact_points[1], self.shape_contact_points[0]],
            shape_contact_normal: -self.shape_contact_normal,
            phi: self.phi,
        }
    }
}

/// Persistent contact of a collision constraint. Contact locations are stored in each particle's local
/// space so they can be re-evaluated at any pose during the solve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ManifoldPoint {
    pub contact: ContactPoint,
    /// Contact location relative to each particle's center of mass frame.
    pub local_contact_points: [Vec3; 2],
    /// Normal in the space of particle 1.
    pub local_contact_normal: Vec3,
    /// Accumulated normal position correction.
    pub net_push_out: f32,
    /// Accumulated tangential position correction.
    pub net_friction: Vec3,
    /// Accumulated velocity impulse along the normal.
    pub net_impulse: f32,
    /// Normal velocity at the start of the solve; negative when approaching.
    pub initial_normal_velocity: f32,
    /// Static friction anchor on particle 0, in its local space.
    pub friction_anchor: Vec3,
    pub has_friction_anchor: bool,
}

impl ManifoldPoint {
    pub fn new(contact: ContactPoint, local_contact_points: [Vec3; 2], local_contact_normal: Vec3) -> Self {
        Self {
            contact,
            local_contact_points,
            local_contact_normal,
            net_push_out: 0.0,
            net_friction: Vec3::ZERO,
            net_impulse: 0.0,
            initial_normal_velocity: 0.0,
            friction_anchor: local_contact_points[0],
            has_friction_anchor: false,
        }
    }

    /// Clears the solver accumulators at the start of a tick.
    #[inline]
    pub fn reset_accumulators(&mut self) {
        self.net_push_out = 0.0;
        self.net_friction = Vec3::ZERO;
        self.net_impulse = 0.0;
        self.initial_normal_velocity = 0.0;
        self.has_friction_anchor = false;
    }
}
