use super::{Point3d, Vector3d};
use cgmath::prelude::*;

/// Squared distances below this are treated as coincident points.
const COINCIDENT_DIST_SQ: f64 = 1e-12;

/// Computes the unit vector pointing from `origin` to `target`,
/// or `None` if the two points coincide.
pub fn unit_towards(origin: Point3d, target: Point3d) -> Option<Vector3d> {
    let delta = target - origin;
    if delta.magnitude2() < COINCIDENT_DIST_SQ {
        None
    } else {
        Some(delta.normalize())
    }
}

/// The cosine of the angle between a heading and the direction towards a target.
///
/// Positive when the target is ahead of `origin`, negative when it is behind.
/// A target coinciding with `origin` yields zero, so it counts as "not ahead".
///
/// # Parameters
/// * `origin` - The location of the observer
/// * `heading` - A unit vector along the observer's heading
/// * `target` - The location being looked at
pub fn deviation_dot(origin: Point3d, heading: Vector3d, target: Point3d) -> f64 {
    unit_towards(origin, target)
        .map(|dir| dir.dot(heading))
        .unwrap_or(0.0)
}

/// The vertical component of the cross product of a heading and the direction towards a target.
///
/// Its sign tells on which side of the heading the target lies.
pub fn deviation_cross(origin: Point3d, heading: Vector3d, target: Point3d) -> f64 {
    unit_towards(origin, target)
        .map(|dir| heading.x * dir.y - heading.y * dir.x)
        .unwrap_or(0.0)
}

/// Signed steering deviation towards a target point.
///
/// The magnitude is `1 - cos(angle)`, which is zero when the target is dead ahead.
/// The sign follows the sign of [deviation_cross].
pub fn steering_deviation(origin: Point3d, heading: Vector3d, target: Point3d) -> f64 {
    let deviation = 1.0 - deviation_dot(origin, heading, target);
    if deviation_cross(origin, heading, target) < 0.0 {
        -deviation
    } else {
        deviation
    }
}
