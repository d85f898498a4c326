//! Sketch constraints.
//!
//! A constraint is a kind plus a tuple of point handles and an optional
//! scalar. Each one contributes a fixed number of residual rows to the solver
//! and hand-coded partial derivatives for those rows.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::points::{PointHandle, PointStore};
use super::{SketchError, SketchResult};
use crate::geometry::utils_2d::{cross_2d, dot_2d, length_2d, sub, wrap_angle};
use crate::geometry::EPSILON;

pub const CONSTRAINT_COINCIDENT: i32 = 0;
pub const CONSTRAINT_HORIZONTAL: i32 = 1;
pub const CONSTRAINT_VERTICAL: i32 = 2;
pub const CONSTRAINT_DISTANCE: i32 = 3;
pub const CONSTRAINT_FIXED: i32 = 4;
pub const CONSTRAINT_PARALLEL: i32 = 5;
pub const CONSTRAINT_PERPENDICULAR: i32 = 6;
pub const CONSTRAINT_EQUAL_LENGTH: i32 = 7;
pub const CONSTRAINT_TANGENT: i32 = 8;
pub const CONSTRAINT_ANGLE: i32 = 9;
pub const CONSTRAINT_ON_LINE: i32 = 10;

/// Stable handle of a constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConstraintHandle(pub u32);

impl ConstraintHandle {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ConstraintHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Radius of a tangent circle: a plain value, or the distance from the
/// center to a rim point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RadiusRef {
    Value(f64),
    Point(PointHandle),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constraint {
    Coincident { p: PointHandle, q: PointHandle },
    Horizontal { p: PointHandle, q: PointHandle },
    Vertical { p: PointHandle, q: PointHandle },
    /// Solved in squared form: `|q - p|^2 - value^2`.
    Distance { p: PointHandle, q: PointHandle, value: f64 },
    /// Pins a point to the position captured when the constraint was created.
    Fixed { p: PointHandle, x: f64, y: f64 },
    Parallel { p1: PointHandle, p2: PointHandle, p3: PointHandle, p4: PointHandle },
    Perpendicular { p1: PointHandle, p2: PointHandle, p3: PointHandle, p4: PointHandle },
    EqualLength { p1: PointHandle, p2: PointHandle, p3: PointHandle, p4: PointHandle },
    /// Line `p1`-`p2` tangent to the circle around `center`.
    Tangent { p1: PointHandle, p2: PointHandle, center: PointHandle, radius: RadiusRef },
    /// Signed angle from `p2 - p1` to `p4 - p3`, in radians.
    Angle { p1: PointHandle, p2: PointHandle, p3: PointHandle, p4: PointHandle, value: f64 },
    /// Point `p` on the infinite line through `a` and `b`.
    OnLine { p: PointHandle, a: PointHandle, b: PointHandle },
}

impl Constraint {
    /// Fixed constraint capturing the current position of `p`.
    pub fn fixed_at(points: &PointStore, p: PointHandle) -> SketchResult<Self> {
        let [x, y] = points.position(p)?;
        Ok(Constraint::Fixed { p, x, y })
    }

    /// Numeric kind used across the host boundary (`CONSTRAINT_*`).
    pub fn code(&self) -> i32 {
        match self {
            Constraint::Coincident { .. } => CONSTRAINT_COINCIDENT,
            Constraint::Horizontal { .. } => CONSTRAINT_HORIZONTAL,
            Constraint::Vertical { .. } => CONSTRAINT_VERTICAL,
            Constraint::Distance { .. } => CONSTRAINT_DISTANCE,
            Constraint::Fixed { .. } => CONSTRAINT_FIXED,
            Constraint::Parallel { .. } => CONSTRAINT_PARALLEL,
            Constraint::Perpendicular { .. } => CONSTRAINT_PERPENDICULAR,
            Constraint::EqualLength { .. } => CONSTRAINT_EQUAL_LENGTH,
            Constraint::Tangent { .. } => CONSTRAINT_TANGENT,
            Constraint::Angle { .. } => CONSTRAINT_ANGLE,
            Constraint::OnLine { .. } => CONSTRAINT_ON_LINE,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Constraint::Coincident { .. } => "Coincident",
            Constraint::Horizontal { .. } => "Horizontal",
            Constraint::Vertical { .. } => "Vertical",
            Constraint::Distance { .. } => "Distance",
            Constraint::Fixed { .. } => "Fixed",
            Constraint::Parallel { .. } => "Parallel",
            Constraint::Perpendicular { .. } => "Perpendicular",
            Constraint::EqualLength { .. } => "Equal Length",
            Constraint::Tangent { .. } => "Tangent",
            Constraint::Angle { .. } => "Angle",
            Constraint::OnLine { .. } => "On Line",
        }
    }

    /// Point handles this constraint depends on, as stored (not resolved).
    pub fn points(&self) -> Vec<PointHandle> {
        match self {
            Constraint::Coincident { p, q }
            | Constraint::Horizontal { p, q }
            | Constraint::Vertical { p, q }
            | Constraint::Distance { p, q, .. } => vec![*p, *q],
            Constraint::Fixed { p, .. } => vec![*p],
            Constraint::Parallel { p1, p2, p3, p4 }
            | Constraint::Perpendicular { p1, p2, p3, p4 }
            | Constraint::EqualLength { p1, p2, p3, p4 }
            | Constraint::Angle { p1, p2, p3, p4, .. } => vec![*p1, *p2, *p3, *p4],
            Constraint::Tangent { p1, p2, center, radius } => {
                let mut v = vec![*p1, *p2, *center];
                if let RadiusRef::Point(rim) = radius {
                    v.push(*rim);
                }
                v
            }
            Constraint::OnLine { p, a, b } => vec![*p, *a, *b],
        }
    }

    pub fn references(&self, handle: PointHandle) -> bool {
        self.points().contains(&handle)
    }

    /// Number of residual rows.
    pub fn equation_count(&self) -> usize {
        match self {
            Constraint::Coincident { .. } | Constraint::Fixed { .. } => 2,
            _ => 1,
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Constraint::Distance { value, .. } | Constraint::Angle { value, .. } => Some(*value),
            Constraint::Tangent { radius: RadiusRef::Value(r), .. } => Some(*r),
            _ => None,
        }
    }

    /// Replaces the dimensional value. Returns false for constraints without one.
    pub fn set_value(&mut self, new_value: f64) -> bool {
        match self {
            Constraint::Distance { value, .. } | Constraint::Angle { value, .. } => {
                *value = new_value;
                true
            }
            Constraint::Tangent { radius: RadiusRef::Value(r), .. } => {
                *r = new_value;
                true
            }
            _ => false,
        }
    }

    /// Insertion checks: every handle is live, scalars are usable, and no
    /// point class appears twice where that makes the constraint unsatisfiable.
    pub fn validate(&self, points: &PointStore) -> SketchResult<()> {
        let mut reps = Vec::new();
        for h in self.points() {
            reps.push(points.resolve(h)?);
        }
        let same = |i: usize, j: usize| reps[i] == reps[j];
        let degenerate = |reason: &'static str| {
            Err(SketchError::DegenerateConstraint { kind: self.type_name(), reason })
        };

        match self {
            Constraint::Distance { value, .. } => {
                if !value.is_finite() || *value <= 0.0 {
                    return Err(SketchError::InvalidValue { what: "distance", value: *value });
                }
                if same(0, 1) {
                    return degenerate("both ends resolve to the same point");
                }
            }
            Constraint::Fixed { x, y, .. } => {
                if !x.is_finite() {
                    return Err(SketchError::InvalidValue { what: "fixed x", value: *x });
                }
                if !y.is_finite() {
                    return Err(SketchError::InvalidValue { what: "fixed y", value: *y });
                }
            }
            Constraint::Tangent { radius, .. } => {
                if same(0, 1) {
                    return degenerate("line end points resolve to the same point");
                }
                match radius {
                    RadiusRef::Value(r) if !r.is_finite() || *r < 0.0 => {
                        return Err(SketchError::InvalidValue { what: "radius", value: *r });
                    }
                    RadiusRef::Point(_) if same(2, 3) => {
                        return degenerate("rim point resolves to the center");
                    }
                    _ => {}
                }
            }
            Constraint::Angle { value, .. } => {
                if !value.is_finite() {
                    return Err(SketchError::InvalidValue { what: "angle", value: *value });
                }
                if same(0, 1) || same(2, 3) {
                    return degenerate("a direction has coincident end points");
                }
            }
            Constraint::OnLine { .. } => {
                if same(1, 2) {
                    return degenerate("line end points resolve to the same point");
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Appends this constraint's residuals to `out`.
    pub fn residuals<F>(&self, at: &F, out: &mut Vec<f64>)
    where
        F: Fn(PointHandle) -> [f64; 2],
    {
        match self {
            Constraint::Coincident { p, q } => {
                let (p, q) = (at(*p), at(*q));
                out.push(q[0] - p[0]);
                out.push(q[1] - p[1]);
            }
            Constraint::Horizontal { p, q } => out.push(at(*q)[1] - at(*p)[1]),
            Constraint::Vertical { p, q } => out.push(at(*q)[0] - at(*p)[0]),
            Constraint::Distance { p, q, value } => {
                let d = sub(at(*q), at(*p));
                out.push(dot_2d(d, d) - value * value);
            }
            Constraint::Fixed { p, x, y } => {
                let p = at(*p);
                out.push(p[0] - x);
                out.push(p[1] - y);
            }
            Constraint::Parallel { p1, p2, p3, p4 } => {
                let (d1, d2) = directions(at, *p1, *p2, *p3, *p4);
                out.push(cross_2d(d1, d2));
            }
            Constraint::Perpendicular { p1, p2, p3, p4 } => {
                let (d1, d2) = directions(at, *p1, *p2, *p3, *p4);
                out.push(dot_2d(d1, d2));
            }
            Constraint::EqualLength { p1, p2, p3, p4 } => {
                let (d1, d2) = directions(at, *p1, *p2, *p3, *p4);
                out.push(dot_2d(d1, d1) - dot_2d(d2, d2));
            }
            Constraint::Tangent { p1, p2, center, radius } => {
                let c = at(*center);
                let (s, _) = signed_line_distance(at(*p1), at(*p2), c);
                out.push(s.abs() - radius_value(at, c, radius));
            }
            Constraint::Angle { p1, p2, p3, p4, value } => {
                let (d1, d2) = directions(at, *p1, *p2, *p3, *p4);
                let phi = cross_2d(d1, d2).atan2(dot_2d(d1, d2));
                out.push(wrap_angle(phi - value));
            }
            Constraint::OnLine { p, a, b } => {
                let (s, _) = signed_line_distance(at(*a), at(*b), at(*p));
                out.push(s);
            }
        }
    }

    /// Emits the non-zero partial derivatives of each residual row as
    /// `(row, point, [d/dx, d/dy])`. A point may be emitted more than once for
    /// the same row; callers accumulate.
    pub fn jacobian<F, E>(&self, at: &F, emit: &mut E)
    where
        F: Fn(PointHandle) -> [f64; 2],
        E: FnMut(usize, PointHandle, [f64; 2]),
    {
        match self {
            Constraint::Coincident { p, q } => {
                emit(0, *p, [-1.0, 0.0]);
                emit(0, *q, [1.0, 0.0]);
                emit(1, *p, [0.0, -1.0]);
                emit(1, *q, [0.0, 1.0]);
            }
            Constraint::Horizontal { p, q } => {
                emit(0, *p, [0.0, -1.0]);
                emit(0, *q, [0.0, 1.0]);
            }
            Constraint::Vertical { p, q } => {
                emit(0, *p, [-1.0, 0.0]);
                emit(0, *q, [1.0, 0.0]);
            }
            Constraint::Distance { p, q, .. } => {
                let d = sub(at(*q), at(*p));
                emit(0, *p, [-2.0 * d[0], -2.0 * d[1]]);
                emit(0, *q, [2.0 * d[0], 2.0 * d[1]]);
            }
            Constraint::Fixed { p, .. } => {
                emit(0, *p, [1.0, 0.0]);
                emit(1, *p, [0.0, 1.0]);
            }
            Constraint::Parallel { p1, p2, p3, p4 } => {
                let (d1, d2) = directions(at, *p1, *p2, *p3, *p4);
                emit_directions(emit, [*p1, *p2, *p3, *p4], [d2[1], -d2[0]], [-d1[1], d1[0]]);
            }
            Constraint::Perpendicular { p1, p2, p3, p4 } => {
                let (d1, d2) = directions(at, *p1, *p2, *p3, *p4);
                emit_directions(emit, [*p1, *p2, *p3, *p4], d2, d1);
            }
            Constraint::EqualLength { p1, p2, p3, p4 } => {
                let (d1, d2) = directions(at, *p1, *p2, *p3, *p4);
                emit_directions(
                    emit,
                    [*p1, *p2, *p3, *p4],
                    [2.0 * d1[0], 2.0 * d1[1]],
                    [-2.0 * d2[0], -2.0 * d2[1]],
                );
            }
            Constraint::Tangent { p1, p2, center, radius } => {
                let c = at(*center);
                let (s, [ga, gb, gq]) = signed_line_distance(at(*p1), at(*p2), c);
                let sign = if s < 0.0 { -1.0 } else { 1.0 };
                emit(0, *p1, [sign * ga[0], sign * ga[1]]);
                emit(0, *p2, [sign * gb[0], sign * gb[1]]);
                emit(0, *center, [sign * gq[0], sign * gq[1]]);
                if let RadiusRef::Point(rim) = radius {
                    let v = sub(at(*rim), c);
                    let r = length_2d(v);
                    if r > EPSILON {
                        let u = [v[0] / r, v[1] / r];
                        emit(0, *rim, [-u[0], -u[1]]);
                        emit(0, *center, u);
                    }
                }
            }
            Constraint::Angle { p1, p2, p3, p4, .. } => {
                let (d1, d2) = directions(at, *p1, *p2, *p3, *p4);
                let a = cross_2d(d1, d2);
                let b = dot_2d(d1, d2);
                let n = a * a + b * b;
                if n > EPSILON * EPSILON {
                    let g1 = [(b * d2[1] - a * d2[0]) / n, (-b * d2[0] - a * d2[1]) / n];
                    let g2 = [(-b * d1[1] - a * d1[0]) / n, (b * d1[0] - a * d1[1]) / n];
                    emit_directions(emit, [*p1, *p2, *p3, *p4], g1, g2);
                }
            }
            Constraint::OnLine { p, a, b } => {
                let (_, [ga, gb, gq]) = signed_line_distance(at(*a), at(*b), at(*p));
                emit(0, *a, ga);
                emit(0, *b, gb);
                emit(0, *p, gq);
            }
        }
    }
}

fn directions<F>(
    at: &F,
    p1: PointHandle,
    p2: PointHandle,
    p3: PointHandle,
    p4: PointHandle,
) -> ([f64; 2], [f64; 2])
where
    F: Fn(PointHandle) -> [f64; 2],
{
    (sub(at(p2), at(p1)), sub(at(p4), at(p3)))
}

/// Spreads gradients taken with respect to `d1 = p2 - p1` and `d2 = p4 - p3`
/// onto the four points.
fn emit_directions<E>(emit: &mut E, pts: [PointHandle; 4], g1: [f64; 2], g2: [f64; 2])
where
    E: FnMut(usize, PointHandle, [f64; 2]),
{
    emit(0, pts[0], [-g1[0], -g1[1]]);
    emit(0, pts[1], g1);
    emit(0, pts[2], [-g2[0], -g2[1]]);
    emit(0, pts[3], g2);
}

fn radius_value<F>(at: &F, center: [f64; 2], radius: &RadiusRef) -> f64
where
    F: Fn(PointHandle) -> [f64; 2],
{
    match radius {
        RadiusRef::Value(r) => *r,
        RadiusRef::Point(rim) => length_2d(sub(at(*rim), center)),
    }
}

/// Signed distance from `q` to the line through `a` and `b`, with its
/// gradients with respect to `a`, `b` and `q`. Positive on the left of `a -> b`.
/// A degenerate line falls back to the distance from `q` to `a`.
fn signed_line_distance(a: [f64; 2], b: [f64; 2], q: [f64; 2]) -> (f64, [[f64; 2]; 3]) {
    let d = sub(b, a);
    let w = sub(q, a);
    let len = length_2d(d);

    if len < EPSILON {
        let dist = length_2d(w);
        if dist < EPSILON {
            return (0.0, [[0.0; 2]; 3]);
        }
        let u = [w[0] / dist, w[1] / dist];
        return (dist, [[-u[0], -u[1]], [0.0, 0.0], u]);
    }

    let cr = cross_2d(d, w);
    let s = cr / len;
    let len3 = len * len * len;
    let gq = [-d[1] / len, d[0] / len];
    let gd = [w[1] / len - cr * d[0] / len3, -w[0] / len - cr * d[1] / len3];
    let ga = [-gq[0] - gd[0], -gq[1] - gd[1]];
    (s, [ga, gd, gq])
}
