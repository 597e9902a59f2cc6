use serde::{Deserialize, Serialize};

use super::shape::ImplicitShape;
use crate::physics::handles::MaterialHandle;
use crate::physics::particle_properties::RigidPose;
use crate::utilities::bounding_box::BoundingBox;

/// Group/mask pair deciding whether two shapes may generate contacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollisionFilter {
    /// Bits identifying which groups this shape belongs to.
    pub group: u32,
    /// Bits identifying which groups this shape collides with.
    pub mask: u32,
}

impl Default for CollisionFilter {
    fn default() -> Self {
        Self {
            group: 1,
            mask: u32::MAX,
        }
    }
}

impl CollisionFilter {
    pub fn new(group: u32, mask: u32) -> Self {
        Self { group, mask }
    }

    /// Both shapes must accept the other's group.
    #[inline(always)]
    pub fn can_collide(&self, other: &CollisionFilter) -> bool {
        (self.group & other.mask) != 0 && (other.group & self.mask) != 0
    }
}

/// A shape attached to a particle along with its collision settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeInstance {
    pub shape: ImplicitShape,
    /// Pose of the shape relative to its particle.
    pub local_pose: RigidPose,
    pub filter: CollisionFilter,
    /// Shapes that don't simulate never produce collision constraints.
    pub simulate: bool,
    /// Overrides the particle material for contacts on this shape.
    pub material: Option<MaterialHandle>,
}

impl ShapeInstance {
    pub fn new(shape: ImplicitShape) -> Self {
        Self {
            shape,
            local_pose: RigidPose::IDENTITY,
            filter: CollisionFilter::default(),
            simulate: true,
            material: None,
        }
    }

    pub fn with_local_pose(mut self, local_pose: RigidPose) -> Self {
        self.local_pose = local_pose;
        self
    }

    pub fn with_filter(mut self, filter: CollisionFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_simulate(mut self, simulate: bool) -> Self {
        self.simulate = simulate;
        self
    }

    pub fn with_material(mut self, material: MaterialHandle) -> Self {
        self.material = Some(material);
        self
    }

    /// Whether this shape may generate contacts against `other` at all.
    #[inline]
    pub fn can_collide(&self, other: &ShapeInstance) -> bool {
        self.simulate && other.simulate && self.filter.can_collide(&other.filter)
    }

    /// Bounds of the shape in its particle's local space.
    #[inline]
    pub fn local_bounds(&self) -> BoundingBox {
        self.shape.local_bounds().transformed(&self.local_pose)
    }

    /// Pose of the shape in world space given its particle's pose.
    #[inline]
    pub fn world_pose(&self, particle_pose: &RigidPose) -> RigidPose {
        particle_pose.compose(&self.local_pose)
    }

    /// Bounds of the shape in world space given its particle's pose.
    #[inline]
    pub fn world_bounds(&self, particle_pose: &RigidPose) -> BoundingBox {
        self.shape.world_bounds(&self.world_pose(particle_pose))
    }
}
