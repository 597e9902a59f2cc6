use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::physics::particle_properties::{ParticleInertia, RigidPose};
use crate::utilities::bounding_box::BoundingBox;

/// Half size of the box used to bound planes. Planes are expected on static particles.
pub const PLANE_BOUNDS_EXTENT: f32 = 1.0e6;

/// Discriminant of an implicit shape, used to dispatch contact generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ShapeType {
    Sphere = 0,
    Box = 1,
    Plane = 2,
    Union = 3,
}

/// Child of a union shape, positioned relative to the union's local space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnionChild {
    pub local_pose: RigidPose,
    pub shape: ImplicitShape,
}

/// Geometry attached to a particle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ImplicitShape {
    /// Sphere centered on the local origin.
    Sphere { radius: f32 },
    /// Box centered on the local origin.
    Box { half_extents: Vec3 },
    /// Half space whose boundary passes through the local origin. Everything on the negative side
    /// of `normal` is solid.
    Plane { normal: Vec3 },
    /// Collection of child shapes; children are tested individually.
    Union(Vec<UnionChild>),
}

impl ImplicitShape {
    pub fn sphere(radius: f32) -> Self {
        ImplicitShape::Sphere { radius }
    }

    pub fn cuboid(half_extents: Vec3) -> Self {
        ImplicitShape::Box { half_extents }
    }

    /// Creates a plane with the given normal. The normal is normalized.
    pub fn plane(normal: Vec3) -> Self {
        ImplicitShape::Plane {
            normal: normal.normalize_or_zero(),
        }
    }

    #[inline]
    pub fn shape_type(&self) -> ShapeType {
        match self {
            ImplicitShape::Sphere { .. } => ShapeType::Sphere,
            ImplicitShape::Box { .. } => ShapeType::Box,
            ImplicitShape::Plane { .. } => ShapeType::Plane,
            ImplicitShape::Union(_) => ShapeType::Union,
        }
    }

    #[inline]
    pub fn is_union(&self) -> bool {
        matches!(self, ImplicitShape::Union(_))
    }

    /// Children of a union, or an empty slice for every other shape.
    #[inline]
    pub fn children(&self) -> &[UnionChild] {
        match self {
            ImplicitShape::Union(children) => children,
            _ => &[],
        }
    }

    /// Computes the bounding box of the shape in its own local space.
    pub fn local_bounds(&self) -> BoundingBox {
        match self {
            ImplicitShape::Sphere { radius } => {
                BoundingBox::from_center(Vec3::ZERO, Vec3::splat(*radius))
            }
            ImplicitShape::Box { half_extents } => {
                BoundingBox::from_center(Vec3::ZERO, *half_extents)
            }
            ImplicitShape::Plane { .. } => {
                BoundingBox::from_center(Vec3::ZERO, Vec3::splat(PLANE_BOUNDS_EXTENT))
            }
            ImplicitShape::Union(children) => children
                .iter()
                .fold(BoundingBox::EMPTY, |bounds, child| {
                    bounds.merged(&child.shape.local_bounds().transformed(&child.local_pose))
                }),
        }
    }

    /// Computes the bounding box of the shape placed at `pose`.
    #[inline]
    pub fn world_bounds(&self, pose: &RigidPose) -> BoundingBox {
        match self {
            // Rotation does not change a sphere's box.
            ImplicitShape::Sphere { radius } => {
                BoundingBox::from_center(pose.position, Vec3::splat(*radius))
            }
            _ => self.local_bounds().transformed(pose),
        }
    }

    /// Computes the inertia of the shape for the given mass. Planes are immovable; unions are
    /// approximated by the box bounding their children.
    pub fn compute_inertia(&self, mass: f32) -> ParticleInertia {
        match self {
            ImplicitShape::Sphere { radius } => ParticleInertia::solid_sphere(mass, *radius),
            ImplicitShape::Box { half_extents } => ParticleInertia::solid_box(mass, *half_extents),
            ImplicitShape::Plane { .. } => ParticleInertia::INFINITE,
            ImplicitShape::Union(_) => {
                let bounds = self.local_bounds();
                if bounds.is_empty() {
                    ParticleInertia::INFINITE
                } else {
                    ParticleInertia::solid_box(mass, bounds.extents() * 0.5)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn union_bounds_cover_children() {
        let shape = ImplicitShape::Union(vec![
            UnionChild {
                local_pose: RigidPose::from_position(Vec3::new(2.0, 0.0, 0.0)),
                shape: ImplicitShape::sphere(0.5),
            },
            UnionChild {
                local_pose: RigidPose::from_position(Vec3::new(-1.0, 0.0, 0.0)),
                shape: ImplicitShape::cuboid(Vec3::splat(0.25)),
            },
        ]);
        let bounds = shape.local_bounds();
        assert_relative_eq!(bounds.min.x, -1.25);
        assert_relative_eq!(bounds.max.x, 2.5);
        assert_eq!(shape.children().len(), 2);
    }

    #[test]
    fn box_inertia_matches_closed_form() {
        let inertia = ImplicitShape::cuboid(Vec3::new(1.0, 2.0, 3.0)).compute_inertia(6.0);
        assert_relative_eq!(inertia.inverse_mass, 1.0 / 6.0);
        // I_xx = m (h_y^2 + h_z^2) / 3
        assert_relative_eq!(inertia.inverse_inertia.x, 3.0 / (6.0 * 13.0), epsilon = 1e-6);
        assert!(ImplicitShape::plane(Vec3::Y).compute_inertia(1.0).is_infinite());
    }
}
