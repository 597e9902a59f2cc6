//! Contact generation between pairs of implicit shapes.
//!
//! Every function takes shape 0 first and shape 1 second and reports contacts whose normal points from
//! shape 1 towards shape 0. Contacts further apart than the cull distance are dropped.

use glam::Vec3;

use super::contact_point::ContactPoint;
use crate::physics::collidables::ImplicitShape;
use crate::physics::particle_properties::RigidPose;

/// Most contacts a single shape pair produces.
pub const MAX_MANIFOLD_POINTS: usize = 4;

/// An edge axis must beat the best face axis by this much to be chosen.
const EDGE_AXIS_PREFERENCE: f32 = 1.0e-3;

/// Slack when testing whether a point lies within a face.
const FACE_CONTAINMENT_TOLERANCE: f32 = 1.0e-4;

/// Contacts closer than this are merged.
const DUPLICATE_DISTANCE: f32 = 1.0e-4;

/// Generates contacts between two non-union shapes at the given world poses.
/// Unsupported pairs (plane against plane, or any union) produce no contacts.
pub fn generate_contacts(
    shape0: &ImplicitShape,
    pose0: &RigidPose,
    shape1: &ImplicitShape,
    pose1: &RigidPose,
    cull_distance: f32,
) -> Vec<ContactPoint> {
    use ImplicitShape::*;
    match (shape0, shape1) {
        (Sphere { radius: r0 }, Sphere { radius: r1 }) => {
            sphere_sphere(*r0, pose0.position, *r1, pose1.position, cull_distance)
                .into_iter()
                .collect()
        }
        (Sphere { radius }, Plane { normal }) => {
            sphere_plane(*radius, pose0.position, *normal, pose1, cull_distance)
                .into_iter()
                .collect()
        }
        (Plane { normal }, Sphere { radius }) => {
            sphere_plane(*radius, pose1.position, *normal, pose0, cull_distance)
                .map(|c| c.flipped())
                .into_iter()
                .collect()
        }
        (Sphere { radius }, Box { half_extents }) => {
            sphere_box(*radius, pose0.position, *half_extents, pose1, cull_distance)
                .into_iter()
                .collect()
        }
        (Box { half_extents }, Sphere { radius }) => {
            sphere_box(*radius, pose1.position, *half_extents, pose0, cull_distance)
                .map(|c| c.flipped())
                .into_iter()
                .collect()
        }
        (Box { half_extents }, Plane { normal }) => {
            box_plane(*half_extents, pose0, *normal, pose1, cull_distance)
        }
        (Plane { normal }, Box { half_extents }) => {
            box_plane(*half_extents, pose1, *normal, pose0, cull_distance)
                .iter()
                .map(ContactPoint::flipped)
                .collect()
        }
        (Box { half_extents: h0 }, Box { half_extents: h1 }) => {
            box_box(*h0, pose0, *h1, pose1, cull_distance)
        }
        _ => Vec::new(),
    }
}

pub fn sphere_sphere(
    radius0: f32,
    center0: Vec3,
    radius1: f32,
    center1: Vec3,
    cull_distance: f32,
) -> Option<ContactPoint> {
    let offset = center0 - center1;
    let distance = offset.length();
    let phi = distance - radius0 - radius1;
    if phi > cull_distance {
        return None;
    }
    // Coincident centers have no preferred direction.
    let normal = if distance > 1e-9 { offset / distance } else { Vec3::Y };
    Some(ContactPoint::new(
        center0 - normal * radius0,
        center1 + normal * radius1,
        normal,
        phi,
    ))
}

/// Sphere as shape 0, plane as shape 1.
pub fn sphere_plane(
    radius: f32,
    center: Vec3,
    plane_normal: Vec3,
    plane_pose: &RigidPose,
    cull_distance: f32,
) -> Option<ContactPoint> {
    let normal = plane_pose.transform_vector(plane_normal);
    let signed_distance = (center - plane_pose.position).dot(normal);
    let phi = signed_distance - radius;
    if phi > cull_distance {
        return None;
    }
    Some(ContactPoint::new(
        center - normal * radius,
        center - normal * signed_distance,
        normal,
        phi,
    ))
}

/// Sphere as shape 0, box as shape 1.
pub fn sphere_box(
    radius: f32,
    center: Vec3,
    half_extents: Vec3,
    box_pose: &RigidPose,
    cull_distance: f32,
) -> Option<ContactPoint> {
    let local_center = box_pose.inverse_transform_point(center);
    let clamped = local_center.clamp(-half_extents, half_extents);
    let offset = local_center - clamped;
    let distance_squared = offset.length_squared();
    let (local_normal, local_surface, phi) = if distance_squared > 1e-12 {
        let distance = distance_squared.sqrt();
        (offset / distance, clamped, distance - radius)
    } else {
        // Center inside the box: push out through the nearest face.
        let depths = half_extents - local_center.abs();
        let axis = if depths.x <= depths.y && depths.x <= depths.z {
            0
        } else if depths.y <= depths.z {
            1
        } else {
            2
        };
        let sign = if local_center[axis] >= 0.0 { 1.0 } else { -1.0 };
        let mut local_normal = Vec3::ZERO;
        local_normal[axis] = sign;
        let mut local_surface = local_center;
        local_surface[axis] = sign * half_extents[axis];
        (local_normal, local_surface, -depths[axis] - radius)
    };
    if phi > cull_distance {
        return None;
    }
    let normal = box_pose.transform_vector(local_normal);
    Some(ContactPoint::new(
        center - normal * radius,
        box_pose.transform_point(local_surface),
        normal,
        phi,
    ))
}

/// Box as shape 0, plane as shape 1. Reports the deepest vertices within the cull distance.
pub fn box_plane(
    half_extents: Vec3,
    box_pose: &RigidPose,
    plane_normal: Vec3,
    plane_pose: &RigidPose,
    cull_distance: f32,
) -> Vec<ContactPoint> {
    let normal = plane_pose.transform_vector(plane_normal);
    let mut contacts: Vec<ContactPoint> = box_vertices(box_pose, half_extents)
        .into_iter()
        .filter_map(|vertex| {
            let phi = (vertex - plane_pose.position).dot(normal);
            (phi <= cull_distance)
                .then(|| ContactPoint::new(vertex, vertex - normal * phi, normal, phi))
        })
        .collect();
    reduce_manifold(&mut contacts);
    contacts
}

/// Separating axis test between two boxes followed by face clipping or edge-edge contact.
pub fn box_box(
    half0: Vec3,
    pose0: &RigidPose,
    half1: Vec3,
    pose1: &RigidPose,
    cull_distance: f32,
) -> Vec<ContactPoint> {
    let axes0 = box_axes(pose0);
    let axes1 = box_axes(pose1);
    let offset = pose0.position - pose1.position;

    let separation_along = |axis: Vec3| -> f32 {
        let radius0 = projected_radius(&axes0, half0, axis);
        let radius1 = projected_radius(&axes1, half1, axis);
        offset.dot(axis).abs() - radius0 - radius1
    };

    // Face axes: 0..3 on box 0, 3..6 on box 1.
    let mut best_face = (f32::MIN, 0usize);
    for index in 0..6 {
        let axis = if index < 3 { axes0[index] } else { axes1[index - 3] };
        let separation = separation_along(axis);
        if separation > cull_distance {
            return Vec::new();
        }
        if separation > best_face.0 {
            best_face = (separation, index);
        }
    }

    let mut best_edge: Option<(f32, Vec3, usize, usize)> = None;
    for (i, a) in axes0.iter().enumerate() {
        for (j, b) in axes1.iter().enumerate() {
            let cross = a.cross(*b);
            let length = cross.length();
            if length < 1e-5 {
                continue;
            }
            let axis = cross / length;
            let separation = separation_along(axis);
            if separation > cull_distance {
                return Vec::new();
            }
            if best_edge.map_or(true, |(best, ..)| separation > best) {
                best_edge = Some((separation, axis, i, j));
            }
        }
    }

    if let Some((separation, axis, i, j)) = best_edge {
        if separation > best_face.0 + EDGE_AXIS_PREFERENCE {
            let normal = if offset.dot(axis) >= 0.0 { axis } else { -axis };
            return edge_edge_contact(&axes0, half0, pose0, i, &axes1, half1, pose1, j, normal, cull_distance)
                .into_iter()
                .collect();
        }
    }

    let (face_separation, face_index) = best_face;
    let mut contacts = if face_index >= 3 {
        // Reference face on box 1; its outward normal points towards box 0.
        let axis = axes1[face_index - 3];
        let normal = if offset.dot(axis) >= 0.0 { axis } else { -axis };
        face_contacts(pose1, half1, &axes1, face_index - 3, normal, pose0, half0, &axes0, cull_distance)
    } else {
        // Reference face on box 0; generate with roles swapped and flip back.
        let axis = axes0[face_index];
        let normal = if offset.dot(axis) <= 0.0 { axis } else { -axis };
        face_contacts(pose0, half0, &axes0, face_index, normal, pose1, half1, &axes1, cull_distance)
            .iter()
            .map(ContactPoint::flipped)
            .collect()
    };

    if contacts.is_empty() {
        // Numerical corner cases: fall back to a single contact between the supporting vertices.
        let normal = if face_index >= 3 {
            let axis = axes1[face_index - 3];
            if offset.dot(axis) >= 0.0 { axis } else { -axis }
        } else {
            let axis = axes0[face_index];
            if offset.dot(axis) >= 0.0 { axis } else { -axis }
        };
        let support0 = support_vertex(pose0, &axes0, half0, -normal);
        contacts.push(ContactPoint::new(
            support0,
            support0 - normal * face_separation,
            normal,
            face_separation,
        ));
    }
    reduce_manifold(&mut contacts);
    contacts
}

/// Contacts between a reference face and an incident box. The incident box is shape 0, the reference
/// box shape 1, and `normal` is the reference face's outward normal.
#[allow(clippy::too_many_arguments)]
fn face_contacts(
    reference_pose: &RigidPose,
    reference_half: Vec3,
    reference_axes: &[Vec3; 3],
    reference_axis: usize,
    normal: Vec3,
    incident_pose: &RigidPose,
    incident_half: Vec3,
    incident_axes: &[Vec3; 3],
    cull_distance: f32,
) -> Vec<ContactPoint> {
    let mut contacts = Vec::with_capacity(8);
    let tangent_axes = [(reference_axis + 1) % 3, (reference_axis + 2) % 3];
    let reference_offset = reference_half[reference_axis];

    // Incident vertices above the reference face.
    for vertex in box_vertices(incident_pose, incident_half) {
        let relative = vertex - reference_pose.position;
        let phi = relative.dot(normal) - reference_offset;
        if phi > cull_distance {
            continue;
        }
        let inside = tangent_axes.iter().all(|&t| {
            relative.dot(reference_axes[t]).abs() <= reference_half[t] + FACE_CONTAINMENT_TOLERANCE
        });
        if inside {
            push_unique(&mut contacts, ContactPoint::new(vertex, vertex - normal * phi, normal, phi));
        }
    }

    // Reference face corners under the incident face.
    let incident_face_axis = (0..3)
        .max_by(|&a, &b| {
            incident_axes[a]
                .dot(normal)
                .abs()
                .total_cmp(&incident_axes[b].dot(normal).abs())
        })
        .unwrap_or(0);
    let incident_face_normal = if incident_axes[incident_face_axis].dot(normal) <= 0.0 {
        incident_axes[incident_face_axis]
    } else {
        -incident_axes[incident_face_axis]
    };
    let alignment = normal.dot(incident_face_normal);
    if alignment.abs() > 0.1 {
        let incident_tangents = [(incident_face_axis + 1) % 3, (incident_face_axis + 2) % 3];
        let face_center = reference_pose.position + normal * reference_offset;
        for corner_signs in [(1.0, 1.0), (1.0, -1.0), (-1.0, -1.0), (-1.0, 1.0)] {
            let corner = face_center
                + reference_axes[tangent_axes[0]] * reference_half[tangent_axes[0]] * corner_signs.0
                + reference_axes[tangent_axes[1]] * reference_half[tangent_axes[1]] * corner_signs.1;
            let relative = corner - incident_pose.position;
            let inside = incident_tangents.iter().all(|&t| {
                relative.dot(incident_axes[t]).abs() <= incident_half[t] + FACE_CONTAINMENT_TOLERANCE
            });
            if !inside {
                continue;
            }
            let phi = (incident_half[incident_face_axis] - relative.dot(incident_face_normal)) / alignment;
            if phi > cull_distance {
                continue;
            }
            push_unique(&mut contacts, ContactPoint::new(corner + normal * phi, corner, normal, phi));
        }
    }
    contacts
}

#[allow(clippy::too_many_arguments)]
fn edge_edge_contact(
    axes0: &[Vec3; 3],
    half0: Vec3,
    pose0: &RigidPose,
    edge0: usize,
    axes1: &[Vec3; 3],
    half1: Vec3,
    pose1: &RigidPose,
    edge1: usize,
    normal: Vec3,
    cull_distance: f32,
) -> Option<ContactPoint> {
    let edge_center = |axes: &[Vec3; 3], half: Vec3, pose: &RigidPose, edge: usize, direction: Vec3| {
        let mut center = pose.position;
        for k in (0..3).filter(|&k| k != edge) {
            let sign = if axes[k].dot(direction) >= 0.0 { 1.0 } else { -1.0 };
            center += axes[k] * half[k] * sign;
        }
        center
    };
    // Box 0 sits on the positive side of the normal, so its edge faces -normal.
    let center0 = edge_center(axes0, half0, pose0, edge0, -normal);
    let center1 = edge_center(axes1, half1, pose1, edge1, normal);
    let (point0, point1) = closest_points_on_segments(
        center0 - axes0[edge0] * half0[edge0],
        center0 + axes0[edge0] * half0[edge0],
        center1 - axes1[edge1] * half1[edge1],
        center1 + axes1[edge1] * half1[edge1],
    );
    let phi = (point0 - point1).dot(normal);
    (phi <= cull_distance).then(|| ContactPoint::new(point0, point1, normal, phi))
}

fn closest_points_on_segments(p0: Vec3, p1: Vec3, q0: Vec3, q1: Vec3) -> (Vec3, Vec3) {
    let d1 = p1 - p0;
    let d2 = q1 - q0;
    let r = p0 - q0;
    let a = d1.dot(d1);
    let e = d2.dot(d2);
    let f = d2.dot(r);
    let (s, t) = if a <= 1e-12 && e <= 1e-12 {
        (0.0, 0.0)
    } else if a <= 1e-12 {
        (0.0, (f / e).clamp(0.0, 1.0))
    } else {
        let c = d1.dot(r);
        if e <= 1e-12 {
            ((-c / a).clamp(0.0, 1.0), 0.0)
        } else {
            let b = d1.dot(d2);
            let denominator = a * e - b * b;
            let mut s = if denominator > 1e-12 {
                ((b * f - c * e) / denominator).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let mut t = (b * s + f) / e;
            if t < 0.0 {
                t = 0.0;
                s = (-c / a).clamp(0.0, 1.0);
            } else if t > 1.0 {
                t = 1.0;
                s = ((b - c) / a).clamp(0.0, 1.0);
            }
            (s, t)
        }
    };
    (p0 + d1 * s, q0 + d2 * t)
}

#[inline]
fn box_axes(pose: &RigidPose) -> [Vec3; 3] {
    [
        pose.orientation * Vec3::X,
        pose.orientation * Vec3::Y,
        pose.orientation * Vec3::Z,
    ]
}

#[inline]
fn projected_radius(axes: &[Vec3; 3], half: Vec3, axis: Vec3) -> f32 {
    axes[0].dot(axis).abs() * half.x + axes[1].dot(axis).abs() * half.y + axes[2].dot(axis).abs() * half.z
}

fn support_vertex(pose: &RigidPose, axes: &[Vec3; 3], half: Vec3, direction: Vec3) -> Vec3 {
    let mut vertex = pose.position;
    for k in 0..3 {
        let sign = if axes[k].dot(direction) >= 0.0 { 1.0 } else { -1.0 };
        vertex += axes[k] * half[k] * sign;
    }
    vertex
}

fn box_vertices(pose: &RigidPose, half: Vec3) -> [Vec3; 8] {
    let mut vertices = [Vec3::ZERO; 8];
    for (i, vertex) in vertices.iter_mut().enumerate() {
        let local = Vec3::new(
            if i & 1 == 0 { -half.x } else { half.x },
            if i & 2 == 0 { -half.y } else { half.y },
            if i & 4 == 0 { -half.z } else { half.z },
        );
        *vertex = pose.transform_point(local);
    }
    vertices
}

fn push_unique(contacts: &mut Vec<ContactPoint>, contact: ContactPoint) {
    let duplicate = contacts.iter_mut().find(|existing| {
        existing.shape_contact_points[0].distance_squared(contact.shape_contact_points[0])
            < DUPLICATE_DISTANCE * DUPLICATE_DISTANCE
    });
    match duplicate {
        Some(existing) => {
            if contact.phi < existing.phi {
                *existing = contact;
            }
        }
        None => contacts.push(contact),
    }
}

/// Keeps at most `MAX_MANIFOLD_POINTS` contacts: the deepest one, then repeatedly the contact furthest
/// from those already kept.
fn reduce_manifold(contacts: &mut Vec<ContactPoint>) {
    if contacts.len() <= MAX_MANIFOLD_POINTS {
        return;
    }
    let deepest = contacts
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.phi.total_cmp(&b.1.phi))
        .map(|(index, _)| index)
        .unwrap_or(0);
    let mut kept = vec![contacts.swap_remove(deepest)];
    while kept.len() < MAX_MANIFOLD_POINTS && !contacts.is_empty() {
        let furthest = contacts
            .iter()
            .enumerate()
            .map(|(index, candidate)| {
                let distance = kept
                    .iter()
                    .map(|k| k.shape_contact_points[0].distance_squared(candidate.shape_contact_points[0]))
                    .fold(f32::MAX, f32::min);
                (index, distance)
            })
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(index, _)| index)
            .unwrap_or(0);
        kept.push(contacts.swap_remove(furthest));
    }
    *contacts = kept;
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Quat;

    #[test]
    fn sphere_sphere_normal_points_at_shape0() {
        let contact = sphere_sphere(1.0, Vec3::new(1.5, 0.0, 0.0), 1.0, Vec3::ZERO, 0.1).unwrap();
        assert_relative_eq!(contact.phi, -0.5);
        assert_relative_eq!(contact.shape_contact_normal.x, 1.0);
        assert_relative_eq!(contact.shape_contact_points[0].x, 0.5);
        assert_relative_eq!(contact.shape_contact_points[1].x, 1.0);
        assert!(sphere_sphere(1.0, Vec3::new(3.0, 0.0, 0.0), 1.0, Vec3::ZERO, 0.1).is_none());
    }

    #[test]
    fn sphere_inside_box_pushes_through_nearest_face() {
        let contact = sphere_box(
            0.1,
            Vec3::new(0.0, 0.9, 0.0),
            Vec3::ONE,
            &RigidPose::IDENTITY,
            0.0,
        )
        .unwrap();
        assert_relative_eq!(contact.shape_contact_normal.y, 1.0);
        assert_relative_eq!(contact.phi, -0.2, epsilon = 1e-6);
    }

    #[test]
    fn resting_box_on_plane_has_four_contacts() {
        let contacts = generate_contacts(
            &ImplicitShape::cuboid(Vec3::splat(0.5)),
            &RigidPose::from_position(Vec3::new(0.0, 0.501, 0.0)),
            &ImplicitShape::plane(Vec3::Y),
            &RigidPose::IDENTITY,
            0.05,
        );
        assert_eq!(contacts.len(), 4);
        for contact in &contacts {
            assert_relative_eq!(contact.phi, 0.001, epsilon = 1e-5);
            assert_relative_eq!(contact.shape_contact_normal.y, 1.0);
        }
    }

    #[test]
    fn plane_first_flips_normal() {
        let contacts = generate_contacts(
            &ImplicitShape::plane(Vec3::Y),
            &RigidPose::IDENTITY,
            &ImplicitShape::sphere(0.5),
            &RigidPose::from_position(Vec3::new(0.0, 0.4, 0.0)),
            0.05,
        );
        assert_eq!(contacts.len(), 1);
        assert_relative_eq!(contacts[0].shape_contact_normal.y, -1.0);
        assert_relative_eq!(contacts[0].phi, -0.1, epsilon = 1e-6);
    }

    #[test]
    fn stacked_boxes_produce_face_contacts() {
        let small = Vec3::splat(0.5);
        let large = Vec3::new(2.0, 0.5, 2.0);
        let contacts = box_box(
            small,
            &RigidPose::from_position(Vec3::new(0.0, 0.99, 0.0)),
            large,
            &RigidPose::IDENTITY,
            0.05,
        );
        assert_eq!(contacts.len(), 4);
        for contact in &contacts {
            assert_relative_eq!(contact.shape_contact_normal.y, 1.0, epsilon = 1e-5);
            assert_relative_eq!(contact.phi, -0.01, epsilon = 1e-5);
        }
        // Same pair in the other order.
        let flipped = box_box(
            large,
            &RigidPose::IDENTITY,
            small,
            &RigidPose::from_position(Vec3::new(0.0, 0.99, 0.0)),
            0.05,
        );
        assert_eq!(flipped.len(), 4);
        assert_relative_eq!(flipped[0].shape_contact_normal.y, -1.0, epsilon = 1e-5);
    }

    #[test]
    fn separated_boxes_produce_nothing() {
        let contacts = box_box(
            Vec3::splat(0.5),
            &RigidPose::new(Vec3::new(0.0, 2.0, 0.0), Quat::from_rotation_y(0.3)),
            Vec3::splat(0.5),
            &RigidPose::IDENTITY,
            0.05,
        );
        assert!(contacts.is_empty());
    }

    #[test]
    fn crossed_edges_touch_once() {
        // Box 0 rotated 45 degrees about x and z so an edge points down onto box 1's rotated edge.
        let pose0 = RigidPose::new(
            Vec3::new(0.0, 0.5 * 2f32.sqrt() * 2.0 - 0.01, 0.0),
            Quat::from_rotation_x(std::f32::consts::FRAC_PI_4),
        );
        let pose1 = RigidPose::new(Vec3::ZERO, Quat::from_rotation_z(std::f32::consts::FRAC_PI_4));
        let contacts = box_box(Vec3::splat(0.5), &pose0, Vec3::splat(0.5), &pose1, 0.05);
        assert_eq!(contacts.len(), 1);
        assert!(contacts[0].phi < 0.0);
        assert!(contacts[0].shape_contact_normal.y > 0.9);
    }

    #[test]
    fn unions_are_not_handled_directly() {
        let contacts = generate_contacts(
            &ImplicitShape::Union(Vec::new()),
            &RigidPose::IDENTITY,
            &ImplicitShape::sphere(1.0),
            &RigidPose::IDENTITY,
            0.1,
        );
        assert!(contacts.is_empty());
    }
}
