use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::contact_point::{ContactPoint, ManifoldPoint};
use super::pair_key::ShapePairKey;
use crate::physics::handles::ParticleHandle;
use crate::physics::particle_properties::RigidPose;

/// Combined surface properties of a collision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CollisionMaterial {
    pub friction: f32,
    pub restitution: f32,
    /// Approach speed above which restitution applies.
    pub restitution_threshold: f32,
    /// Scales every correction; 1 is rigid.
    pub stiffness: f32,
}

impl Default for CollisionMaterial {
    fn default() -> Self {
        Self {
            friction: 0.5,
            restitution: 0.0,
            restitution_threshold: 1.0,
            stiffness: 1.0,
        }
    }
}

/// Whether a constraint was produced by the continuous path this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CcdType {
    Disabled,
    Enabled,
}

/// Contact constraint between one shape pair of two particles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PbdCollisionConstraint {
    /// Particle 0 and particle 1. Normals point from particle 1 towards particle 0.
    pub particles: [ParticleHandle; 2],
    pub shape_pair_key: ShapePairKey,
    pub manifold_points: Vec<ManifoldPoint>,
    pub material: CollisionMaterial,
    pub ccd_type: CcdType,
    /// Fraction of the tick at which the sweep first touched. 1 when no impact was found.
    pub time_of_impact: f32,
    pub is_active: bool,
    pub disabled_by_modifier: bool,
    /// Set when the last detection reused the previous manifold.
    pub was_restored: bool,
    /// Particle poses the manifold was generated at.
    pub last_transforms: [RigidPose; 2],
    pub has_run_narrow_phase: bool,
    /// Sum of the impulses applied by the last solve, in world space.
    pub accumulated_impulse: Vec3,
    /// Created by moving a joint child's contact onto its parent.
    pub is_transferred: bool,
    pub cull_distance: f32,
}

impl PbdCollisionConstraint {
    pub fn new(particles: [ParticleHandle; 2], shape_pair_key: ShapePairKey) -> Self {
        Self {
            particles,
            shape_pair_key,
            manifold_points: Vec::new(),
            material: CollisionMaterial::default(),
            ccd_type: CcdType::Disabled,
            time_of_impact: 1.0,
            is_active: false,
            disabled_by_modifier: false,
            was_restored: false,
            last_transforms: [RigidPose::IDENTITY; 2],
            has_run_narrow_phase: false,
            accumulated_impulse: Vec3::ZERO,
            is_transferred: false,
            cull_distance: 0.0,
        }
    }

    /// Active, not vetoed by a modifier, and holding at least one contact.
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.is_active && !self.disabled_by_modifier && !self.manifold_points.is_empty()
    }

    #[inline]
    pub fn is_ccd(&self) -> bool {
        self.ccd_type == CcdType::Enabled
    }

    /// Clears the per tick solver state. Contacts are kept.
    pub fn reset_solver_state(&mut self) {
        self.disabled_by_modifier = false;
        self.accumulated_impulse = Vec3::ZERO;
        for point in &mut self.manifold_points {
            point.reset_accumulators();
        }
    }

    /// Marks the constraint inactive and forgets its contacts. The constraint itself is kept.
    pub fn deactivate(&mut self) {
        self.is_active = false;
        self.was_restored = false;
        self.manifold_points.clear();
        self.ccd_type = CcdType::Disabled;
        self.time_of_impact = 1.0;
    }

    /// Replaces the manifold with freshly generated world space contacts, storing them relative to
    /// the particle poses they were generated at.
    pub fn set_contacts_from_world(&mut self, contacts: &[ContactPoint], poses: [RigidPose; 2]) {
        self.manifold_points.clear();
        self.manifold_points.extend(contacts.iter().map(|contact| {
            ManifoldPoint::new(
                *contact,
                [
                    poses[0].inverse_transform_point(contact.shape_contact_points[0]),
                    poses[1].inverse_transform_point(contact.shape_contact_points[1]),
                ],
                poses[1].inverse_transform_vector(contact.shape_contact_normal),
            )
        }));
        self.last_transforms = poses;
        self.has_run_narrow_phase = true;
        self.is_active = !self.manifold_points.is_empty();
    }

    /// Evaluates a manifold point at the given particle poses. Returns the world contact points on
    /// both particles, the world normal and the separation.
    #[inline]
    pub fn evaluate_point(&self, index: usize, poses: [RigidPose; 2]) -> (Vec3, Vec3, Vec3, f32) {
        let point = &self.manifold_points[index];
        let world0 = poses[0].transform_point(point.local_contact_points[0]);
        let world1 = poses[1].transform_point(point.local_contact_points[1]);
        let normal = poses[1].transform_vector(point.local_contact_normal);
        (world0, world1, normal, (world0 - world1).dot(normal))
    }

    /// Refreshes the cached world contacts from the local contacts at the given poses.
    pub fn update_world_contacts(&mut self, poses: [RigidPose; 2]) {
        for index in 0..self.manifold_points.len() {
            let (world0, world1, normal, phi) = self.evaluate_point(index, poses);
            self.manifold_points[index].contact = ContactPoint::new(world0, world1, normal, phi);
        }
    }

    /// Smallest separation of the manifold, or `f32::MAX` without contacts.
    pub fn min_phi(&self) -> f32 {
        self.manifold_points
            .iter()
            .map(|point| point.contact.phi)
            .fold(f32::MAX, f32::min)
    }
}
