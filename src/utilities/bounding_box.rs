use glam::{Mat3, Vec3};
use serde::{Deserialize, Serialize};

use crate::physics::particle_properties::RigidPose;

/// Provides simple axis-aligned bounding box functionality.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Location with the lowest X, Y, and Z coordinates in the axis-aligned bounding box.
    pub min: Vec3,
    /// Location with the highest X, Y, and Z coordinates in the axis-aligned bounding box.
    pub max: Vec3,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl BoundingBox {
    /// Inverted box that contains nothing; merging anything into it yields the other box.
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::MAX),
        max: Vec3::splat(f32::MIN),
    };

    /// Constructs a bounding box from the specified minimum and maximum.
    #[inline]
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Constructs a bounding box centered on `center` with the given half extents.
    #[inline]
    pub fn from_center(center: Vec3, half_extents: Vec3) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    /// Whether the box has been given any content.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.cmpgt(self.max).any()
    }

    /// Determines if a bounding box intersects another bounding box.
    #[inline]
    pub fn intersects(&self, other: &Self) -> bool {
        Self::intersects_bounds(self.min, self.max, other.min, other.max)
    }

    /// Determines if a bounding box intersects another bounding box.
    #[inline]
    pub fn intersects_bounds(min_a: Vec3, max_a: Vec3, min_b: Vec3, max_b: Vec3) -> bool {
        !(max_a.cmplt(min_b) | max_b.cmplt(min_a)).any()
    }

    /// Whether the point lies within the box, boundary included.
    #[inline]
    pub fn contains_point(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// Computes a bounding box which contains two other bounding boxes.
    #[inline]
    pub fn merged(&self, other: &Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Grows the box to contain the given point.
    #[inline]
    pub fn grow_to_include(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// Inflates the box uniformly on every side.
    #[inline]
    pub fn expanded(&self, margin: f32) -> Self {
        Self {
            min: self.min - Vec3::splat(margin),
            max: self.max + Vec3::splat(margin),
        }
    }

    /// Inflates the box by a per-axis amount on every side.
    #[inline]
    pub fn expanded_by(&self, margin: Vec3) -> Self {
        Self {
            min: self.min - margin,
            max: self.max + margin,
        }
    }

    /// Extends the box along a displacement so it covers both the start and the end of a sweep.
    #[inline]
    pub fn swept(&self, displacement: Vec3) -> Self {
        Self {
            min: self.min + displacement.min(Vec3::ZERO),
            max: self.max + displacement.max(Vec3::ZERO),
        }
    }

    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Gets the full size of the box along each axis.
    #[inline]
    pub fn extents(&self) -> Vec3 {
        self.max - self.min
    }

    /// Gets the smallest full size of the box along any axis.
    #[inline]
    pub fn min_extent(&self) -> f32 {
        self.extents().min_element()
    }

    /// Computes the volume of the bounding box.
    #[inline]
    pub fn compute_volume(&self) -> f32 {
        let diagonal = self.extents();
        diagonal.x * diagonal.y * diagonal.z
    }

    /// Computes the world space box enclosing this local box after it is transformed by `pose`.
    pub fn transformed(&self, pose: &RigidPose) -> Self {
        if self.is_empty() {
            return *self;
        }
        let rotation = Mat3::from_quat(pose.orientation);
        let abs_rotation = Mat3::from_cols(
            rotation.x_axis.abs(),
            rotation.y_axis.abs(),
            rotation.z_axis.abs(),
        );
        let center = pose.transform_point(self.center());
        let half_extents = abs_rotation * (self.extents() * 0.5);
        Self::from_center(center, half_extents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Quat;

    #[test]
    fn empty_merges_to_other() {
        let b = BoundingBox::new(Vec3::ZERO, Vec3::ONE);
        assert!(BoundingBox::EMPTY.is_empty());
        assert_eq!(BoundingBox::EMPTY.merged(&b), b);
    }

    #[test]
    fn intersection_includes_touching_faces() {
        let a = BoundingBox::new(Vec3::ZERO, Vec3::ONE);
        let b = BoundingBox::new(Vec3::new(1.0, 0.0, 0.0), Vec3::new(2.0, 1.0, 1.0));
        let c = BoundingBox::new(Vec3::new(1.01, 0.0, 0.0), Vec3::new(2.0, 1.0, 1.0));
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn swept_box_covers_both_ends() {
        let b = BoundingBox::new(Vec3::ZERO, Vec3::ONE).swept(Vec3::new(-3.0, 2.0, 0.0));
        assert_eq!(b.min, Vec3::new(-3.0, 0.0, 0.0));
        assert_eq!(b.max, Vec3::new(1.0, 3.0, 1.0));
    }

    #[test]
    fn rotated_box_grows() {
        let b = BoundingBox::from_center(Vec3::ZERO, Vec3::new(1.0, 0.1, 0.1));
        let pose = RigidPose::new(
            Vec3::new(5.0, 0.0, 0.0),
            Quat::from_rotation_z(std::f32::consts::FRAC_PI_2),
        );
        let world = b.transformed(&pose);
        assert_relative_eq!(world.center().x, 5.0, epsilon = 1e-5);
        assert_relative_eq!(world.extents().y, 2.0, epsilon = 1e-5);
        assert_relative_eq!(world.extents().x, 0.2, epsilon = 1e-5);
    }
}
