//! 2D geometry utilities shared by the sketch model, the constraint
//! residuals and the pickers.
//!
//! All points and vectors are plain `[f64; 2]` arrays.

use std::f64::consts::{PI, TAU};

use super::EPSILON;

// =============================================================================
// Point Operations
// =============================================================================

/// Squared distance between two 2D points.
#[inline]
pub fn distance_squared(p1: [f64; 2], p2: [f64; 2]) -> f64 {
    let dx = p2[0] - p1[0];
    let dy = p2[1] - p1[1];
    dx * dx + dy * dy
}

/// Distance between two 2D points.
#[inline]
pub fn distance(p1: [f64; 2], p2: [f64; 2]) -> f64 {
    distance_squared(p1, p2).sqrt()
}

#[inline]
pub fn lerp(p1: [f64; 2], p2: [f64; 2], t: f64) -> [f64; 2] {
    [p1[0] + t * (p2[0] - p1[0]), p1[1] + t * (p2[1] - p1[1])]
}

#[inline]
pub fn midpoint(p1: [f64; 2], p2: [f64; 2]) -> [f64; 2] {
    lerp(p1, p2, 0.5)
}

// =============================================================================
// Vector Operations
// =============================================================================

#[inline]
pub fn sub(a: [f64; 2], b: [f64; 2]) -> [f64; 2] {
    [a[0] - b[0], a[1] - b[1]]
}

/// z-component of the 3D cross product. Positive if v2 is counter-clockwise from v1.
#[inline]
pub fn cross_2d(v1: [f64; 2], v2: [f64; 2]) -> f64 {
    v1[0] * v2[1] - v1[1] * v2[0]
}

#[inline]
pub fn dot_2d(v1: [f64; 2], v2: [f64; 2]) -> f64 {
    v1[0] * v2[0] + v1[1] * v2[1]
}

#[inline]
pub fn length_2d(v: [f64; 2]) -> f64 {
    dot_2d(v, v).sqrt()
}

/// Unit vector, or `None` for a (near) zero vector.
#[inline]
pub fn normalize_2d(v: [f64; 2]) -> Option<[f64; 2]> {
    let len = length_2d(v);
    if len < EPSILON {
        None
    } else {
        Some([v[0] / len, v[1] / len])
    }
}

/// Point on a circle at the given polar angle.
#[inline]
pub fn polar(center: [f64; 2], radius: f64, angle: f64) -> [f64; 2] {
    [center[0] + radius * angle.cos(), center[1] + radius * angle.sin()]
}

// =============================================================================
// Line Segment Operations
// =============================================================================

/// Parameter t of the orthogonal projection of `point` onto the line through
/// `start` and `end` (t in [0,1] means the projection lies on the segment).
pub fn project_point_on_line(start: [f64; 2], end: [f64; 2], point: [f64; 2]) -> f64 {
    let d = sub(end, start);
    let len_sq = dot_2d(d, d);
    if len_sq < EPSILON * EPSILON {
        return 0.0;
    }
    dot_2d(sub(point, start), d) / len_sq
}

pub fn closest_point_on_segment(start: [f64; 2], end: [f64; 2], point: [f64; 2]) -> [f64; 2] {
    let t = project_point_on_line(start, end, point).clamp(0.0, 1.0);
    lerp(start, end, t)
}

/// Distance from `point` to the finite segment `start`-`end`.
pub fn distance_point_to_segment(start: [f64; 2], end: [f64; 2], point: [f64; 2]) -> f64 {
    distance(closest_point_on_segment(start, end, point), point)
}

/// Perpendicular distance from `point` to the infinite line through `start` and `end`.
/// Falls back to the distance to `start` for a degenerate line.
pub fn distance_point_to_line(start: [f64; 2], end: [f64; 2], point: [f64; 2]) -> f64 {
    let d = sub(end, start);
    let len = length_2d(d);
    if len < EPSILON {
        return distance(start, point);
    }
    (cross_2d(d, sub(point, start)) / len).abs()
}

/// Intersection of two finite segments, if any.
pub fn segment_intersection(
    s1: [f64; 2], e1: [f64; 2],
    s2: [f64; 2], e2: [f64; 2],
) -> Option<[f64; 2]> {
    let d1 = sub(e1, s1);
    let d2 = sub(e2, s2);
    let denom = cross_2d(d1, d2);
    if denom.abs() < EPSILON {
        return None; // Parallel
    }
    let w = sub(s2, s1);
    let t = cross_2d(w, d2) / denom;
    let u = cross_2d(w, d1) / denom;
    let tol = 1e-9;
    if (-tol..=1.0 + tol).contains(&t) && (-tol..=1.0 + tol).contains(&u) {
        Some(lerp(s1, e1, t))
    } else {
        None
    }
}

// =============================================================================
// Angles
// =============================================================================

/// Wrap an angle difference into (-PI, PI].
pub fn wrap_angle(angle: f64) -> f64 {
    if angle > -PI && angle <= PI {
        return angle;
    }
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    // The interval is open at -PI.
    if wrapped <= -PI {
        PI
    } else {
        wrapped
    }
}

/// Wrap an angle into [0, TAU).
pub fn normalize_angle(angle: f64) -> f64 {
    let a = angle.rem_euclid(TAU);
    if a >= TAU {
        0.0
    } else {
        a
    }
}

/// Counter-clockwise sweep from `start` to `end`, in (0, TAU].
/// A non-positive raw sweep gains one full turn, so `start == end` is a full circle.
pub fn ccw_sweep(start: f64, end: f64) -> f64 {
    let mut sweep = (end - start) % TAU;
    if sweep <= 0.0 {
        sweep += TAU;
    }
    sweep
}

/// Whether the polar angle `angle` lies inside the CCW sweep starting at `start`.
pub fn angle_in_sweep(angle: f64, start: f64, sweep: f64) -> bool {
    if sweep >= TAU {
        return true;
    }
    let offset = normalize_angle(angle - start);
    offset <= sweep + EPSILON
}
