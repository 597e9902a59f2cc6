use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::physics::collidables::{ImplicitShape, ShapeInstance};
use crate::physics::collision_detection::ShapeLocator;
use crate::physics::error::{EvolutionError, Result};
use crate::physics::handles::MaterialHandle;
use crate::physics::particle_properties::{ObjectState, ParticleInertia, RigidPose};
use crate::utilities::bounding_box::BoundingBox;
use crate::utilities::math_helper;

/// Describes a particle's initial state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticleDescription {
    /// Static, kinematic, dynamic, or sleeping (dynamic but created asleep).
    pub state: ObjectState,
    /// Position and orientation of the particle.
    pub pose: RigidPose,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    /// Mass of a dynamic particle. Ignored for static and kinematic particles.
    pub mass: f32,
    /// Explicit inertia. When absent it is computed from the shapes.
    pub inertia: Option<ParticleInertia>,
    pub shapes: Vec<ShapeInstance>,
    pub material: MaterialHandle,
    pub gravity_enabled: bool,
    /// Fraction of linear velocity removed per second.
    pub linear_ether_drag: f32,
    /// Fraction of angular velocity removed per second.
    pub angular_ether_drag: f32,
    /// Whether the particle may use continuous collision detection when moving fast.
    pub ccd_enabled: bool,
    /// Whether the particle is disabled after resting below the disable thresholds.
    pub auto_disable: bool,
}

impl ParticleDescription {
    fn with_state(state: ObjectState, pose: RigidPose, mass: f32) -> Self {
        Self {
            state,
            pose,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            mass,
            inertia: None,
            shapes: Vec::new(),
            material: MaterialHandle::DEFAULT,
            gravity_enabled: state.is_dynamic(),
            linear_ether_drag: 0.0,
            angular_ether_drag: 0.0,
            ccd_enabled: false,
            auto_disable: false,
        }
    }

    /// Creates a dynamic particle with a single shape.
    pub fn dynamic(pose: RigidPose, mass: f32, shape: ImplicitShape) -> Self {
        Self::with_state(ObjectState::Dynamic, pose, mass).with_shape(ShapeInstance::new(shape))
    }

    /// Creates a kinematic particle with a single shape.
    pub fn kinematic(pose: RigidPose, shape: ImplicitShape) -> Self {
        Self::with_state(ObjectState::Kinematic, pose, 0.0).with_shape(ShapeInstance::new(shape))
    }

    /// Creates a static particle with a single shape.
    pub fn fixed(pose: RigidPose, shape: ImplicitShape) -> Self {
        Self::with_state(ObjectState::Static, pose, 0.0).with_shape(ShapeInstance::new(shape))
    }

    /// Creates a dynamic particle without shapes, such as the parent of a cluster.
    pub fn dynamic_without_shapes(pose: RigidPose, mass: f32) -> Self {
        Self::with_state(ObjectState::Dynamic, pose, mass)
    }

    pub fn with_shape(mut self, shape: ShapeInstance) -> Self {
        self.shapes.push(shape);
        self
    }

    pub fn with_velocity(mut self, linear: Vec3, angular: Vec3) -> Self {
        self.linear_velocity = linear;
        self.angular_velocity = angular;
        self
    }

    pub fn with_material(mut self, material: MaterialHandle) -> Self {
        self.material = material;
        self
    }

    pub fn with_inertia(mut self, inertia: ParticleInertia) -> Self {
        self.inertia = Some(inertia);
        self
    }

    pub fn with_gravity(mut self, enabled: bool) -> Self {
        self.gravity_enabled = enabled;
        self
    }

    pub fn with_ether_drag(mut self, linear: f32, angular: f32) -> Self {
        self.linear_ether_drag = linear;
        self.angular_ether_drag = angular;
        self
    }

    pub fn with_ccd(mut self, enabled: bool) -> Self {
        self.ccd_enabled = enabled;
        self
    }

    pub fn with_auto_disable(mut self, enabled: bool) -> Self {
        self.auto_disable = enabled;
        self
    }

    /// Creates the particle asleep. Only meaningful for dynamic particles.
    pub fn asleep(mut self) -> Self {
        if self.state == ObjectState::Dynamic {
            self.state = ObjectState::Sleeping;
        }
        self
    }

    /// Checks the description can be simulated.
    pub fn validate(&self) -> Result<()> {
        if !math_helper::is_finite(self.pose.position)
            || !math_helper::is_finite_quat(self.pose.orientation)
        {
            return Err(EvolutionError::InvalidConfig(format!(
                "particle pose must be finite, got {}",
                self.pose
            )));
        }
        if !math_helper::is_finite(self.linear_velocity)
            || !math_helper::is_finite(self.angular_velocity)
        {
            return Err(EvolutionError::InvalidConfig(
                "particle velocity must be finite".to_string(),
            ));
        }
        if self.state.is_dynamic() && !(self.mass.is_finite() && self.mass > 0.0) {
            return Err(EvolutionError::InvalidConfig(format!(
                "dynamic particle mass must be positive, got {}",
                self.mass
            )));
        }
        let too_many_children = self
            .shapes
            .iter()
            .any(|instance| instance.shape.children().len() > ShapeLocator::MAX_SHAPES);
        if self.shapes.len() > ShapeLocator::MAX_SHAPES || too_many_children {
            return Err(EvolutionError::InvalidConfig(format!(
                "particles and unions hold at most {} shapes",
                ShapeLocator::MAX_SHAPES
            )));
        }
        Ok(())
    }

    /// Bounds of every shape in the particle's local space.
    pub fn local_bounds(&self) -> BoundingBox {
        self.shapes
            .iter()
            .fold(BoundingBox::EMPTY, |bounds, shape| {
                bounds.merged(&shape.local_bounds())
            })
    }

    /// Computes the inertia the particle will be created with.
    pub fn compute_inertia(&self) -> ParticleInertia {
        if !self.state.is_dynamic() {
            return ParticleInertia::INFINITE;
        }
        if let Some(inertia) = self.inertia {
            return inertia;
        }
        match self.shapes.as_slice() {
            [single] if single.local_pose.position == Vec3::ZERO => {
                single.shape.compute_inertia(self.mass)
            }
            _ => {
                let bounds = self.local_bounds();
                if bounds.is_empty() {
                    // Shapeless particles behave like a unit sphere.
                    ParticleInertia::solid_sphere(self.mass, 1.0)
                } else {
                    ParticleInertia::solid_box(self.mass, bounds.extents() * 0.5)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::collidables::UnionChild;
    use approx::assert_relative_eq;

    #[test]
    fn static_particles_have_infinite_inertia() {
        let desc = ParticleDescription::fixed(RigidPose::IDENTITY, ImplicitShape::plane(Vec3::Y));
        assert!(desc.compute_inertia().is_infinite());
        assert!(!desc.gravity_enabled);
    }

    #[test]
    fn dynamic_inertia_comes_from_shape() {
        let desc = ParticleDescription::dynamic(RigidPose::IDENTITY, 2.0, ImplicitShape::sphere(1.0));
        let inertia = desc.compute_inertia();
        assert_relative_eq!(inertia.inverse_mass, 0.5);
        assert_relative_eq!(inertia.inverse_inertia.x, 0.5 / 0.4, epsilon = 1e-6);
    }

    #[test]
    fn validate_rejects_massless_dynamic() {
        let desc = ParticleDescription::dynamic(RigidPose::IDENTITY, 0.0, ImplicitShape::sphere(1.0));
        assert!(desc.validate().is_err());
        let desc = ParticleDescription::kinematic(RigidPose::IDENTITY, ImplicitShape::sphere(1.0));
        assert!(desc.validate().is_ok());
    }

    #[test]
    fn validate_rejects_unions_too_large_to_address() {
        let child = UnionChild {
            local_pose: RigidPose::IDENTITY,
            shape: ImplicitShape::sphere(0.1),
        };
        let largest = ImplicitShape::Union(vec![child.clone(); ShapeLocator::MAX_SHAPES]);
        let desc = ParticleDescription::dynamic(RigidPose::IDENTITY, 1.0, largest);
        assert!(desc.validate().is_ok());

        let oversized = ImplicitShape::Union(vec![child; ShapeLocator::MAX_SHAPES + 1]);
        let desc = ParticleDescription::dynamic(RigidPose::IDENTITY, 1.0, oversized);
        assert!(matches!(desc.validate(), Err(EvolutionError::InvalidConfig(_))));
    }
}
