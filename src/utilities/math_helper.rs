use glam::{Quat, Vec3};

/// Clamps a value between a minimum and maximum value.
#[inline(always)]
pub fn clamp(value: f32, min: f32, max: f32) -> f32 {
    if value < min {
        min
    } else if value > max {
        max
    } else {
        value
    }
}

/// Rescales a vector so its length does not exceed `max_length`. Direction is preserved.
#[inline(always)]
pub fn clamp_length(v: Vec3, max_length: f32) -> Vec3 {
    let length_squared = v.length_squared();
    if length_squared > max_length * max_length {
        v * (max_length / length_squared.sqrt())
    } else {
        v
    }
}

/// Returns true if every component of the vector is finite.
#[inline(always)]
pub fn is_finite(v: Vec3) -> bool {
    v.x.is_finite() && v.y.is_finite() && v.z.is_finite()
}

/// Returns true if every component of the quaternion is finite.
#[inline(always)]
pub fn is_finite_quat(q: Quat) -> bool {
    q.x.is_finite() && q.y.is_finite() && q.z.is_finite() && q.w.is_finite()
}

/// Finds two unit vectors perpendicular to the given unit normal and to each other.
#[inline]
pub fn build_orthonormal_basis(normal: Vec3) -> (Vec3, Vec3) {
    // Duff et al. branchless basis.
    let sign = 1.0f32.copysign(normal.z);
    let a = -1.0 / (sign + normal.z);
    let b = normal.x * normal.y * a;
    let t1 = Vec3::new(1.0 + sign * normal.x * normal.x * a, sign * b, -sign * normal.x);
    let t2 = Vec3::new(b, sign + normal.y * normal.y * a, -normal.y);
    (t1, t2)
}

/// Computes the rotation angle in radians separating two orientations.
#[inline]
pub fn angle_between(a: Quat, b: Quat) -> f32 {
    let d = a.dot(b).abs().min(1.0);
    2.0 * d.acos()
}

/// Computes the angular velocity that rotates `from` into `to` over `dt`.
#[inline]
pub fn angular_velocity_between(from: Quat, to: Quat, dt: f32) -> Vec3 {
    let mut delta = to * from.conjugate();
    if delta.w < 0.0 {
        delta = -delta;
    }
    Vec3::new(delta.x, delta.y, delta.z) * (2.0 / dt)
}

/// Integrates an orientation by an angular displacement, renormalizing the result.
#[inline]
pub fn integrate_orientation(orientation: Quat, angular_velocity: Vec3, dt: f32) -> Quat {
    let w = angular_velocity * (0.5 * dt);
    let delta = Quat::from_xyzw(w.x, w.y, w.z, 0.0) * orientation;
    let result = Quat::from_xyzw(
        orientation.x + delta.x,
        orientation.y + delta.y,
        orientation.z + delta.z,
        orientation.w + delta.w,
    );
    let length_squared = result.length_squared();
    if length_squared > 1e-12 {
        result / length_squared.sqrt()
    } else {
        orientation
    }
}
