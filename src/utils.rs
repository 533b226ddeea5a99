pub mod sampling;

use nalgebra as na;

/// Unsigned angle between two directions in radians, `0` if either is degenerate.
pub fn angle_between(u: &na::Vector2<f64>, v: &na::Vector2<f64>) -> f64 {
    let denom = u.norm() * v.norm();
    if denom <= f64::EPSILON {
        return 0.0;
    }
    (u.dot(v) / denom).clamp(-1.0, 1.0).acos()
}

/// Signed turn from `u` to `v` in radians, positive towards +y.
pub fn signed_turn(u: &na::Vector2<f64>, v: &na::Vector2<f64>) -> f64 {
    let cross = u.x * v.y - u.y * v.x;
    cross.atan2(u.dot(v))
}

/// Wraps an angle in degrees into `[0, 180)`.
pub fn wrap_half_turn_deg(deg: f64) -> f64 {
    let wrapped = deg.rem_euclid(180.0);
    if wrapped >= 180.0 {
        0.0
    } else {
        wrapped
    }
}
