use std::f64::consts::{FRAC_PI_2, TAU};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::points::{PointHandle, PointStore};
use super::snap::SnapType;
use super::SketchResult;
use crate::geometry::utils_2d::{
    angle_in_sweep, ccw_sweep, distance, distance_point_to_segment, midpoint, normalize_2d,
    normalize_angle, polar, sub,
};
use crate::geometry::Aabb2;

pub const FLAG_VISIBLE: u32 = 1;
pub const FLAG_SELECTED: u32 = 2;
pub const FLAG_CONSTRUCTION: u32 = 4;
pub const FLAG_HOVER: u32 = 8;
pub const FLAG_FIXED: u32 = 16;
pub const FLAG_PREVIEW: u32 = 32;

/// Stable handle of a geometry record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShapeHandle(pub u32);

impl ShapeHandle {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ShapeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// Display state bits shared with the host (`FLAG_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GeometryFlags(pub u32);

impl GeometryFlags {
    pub const VISIBLE: Self = Self(FLAG_VISIBLE);
    pub const SELECTED: Self = Self(FLAG_SELECTED);
    pub const CONSTRUCTION: Self = Self(FLAG_CONSTRUCTION);
    pub const HOVER: Self = Self(FLAG_HOVER);
    pub const FIXED: Self = Self(FLAG_FIXED);
    pub const PREVIEW: Self = Self(FLAG_PREVIEW);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// Whether pickers should consider a record with these flags.
    pub fn is_pickable(self) -> bool {
        self.contains(Self::VISIBLE) && !self.contains(Self::PREVIEW)
    }
}

impl std::ops::BitOr for GeometryFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl Default for GeometryFlags {
    fn default() -> Self {
        Self::VISIBLE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeometryKind {
    Segment,
    Circle,
    Arc,
    Point,
}

impl GeometryKind {
    /// Numeric tag used across the host boundary.
    pub fn code(self) -> i32 {
        match self {
            GeometryKind::Segment => 0,
            GeometryKind::Circle => 1,
            GeometryKind::Arc => 2,
            GeometryKind::Point => 3,
        }
    }
}

/// Sketch geometry. Every variant refers to points by handle and reads their
/// coordinates through the point store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Geometry {
    Segment { p1: PointHandle, p2: PointHandle },
    Circle { center: PointHandle, radius: f64 },
    /// Counter-clockwise arc. `start_angle` is in [0, 2PI) and
    /// `end_angle - start_angle` is in (0, 2PI].
    Arc { center: PointHandle, radius: f64, start_angle: f64, end_angle: f64 },
    /// Standalone point entity; `pixel_size` is the host's display size.
    Point { p: PointHandle, pixel_size: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryRecord {
    pub geometry: Geometry,
    #[serde(default)]
    pub flags: GeometryFlags,
}

impl GeometryRecord {
    pub fn new(geometry: Geometry) -> Self {
        Self { geometry, flags: GeometryFlags::default() }
    }
}

impl Geometry {
    /// Builds an arc with normalized angles. A non-positive raw sweep gains a
    /// full turn, so `start == end` yields a full circle.
    pub fn arc(center: PointHandle, radius: f64, start_angle: f64, end_angle: f64) -> Self {
        let sweep = ccw_sweep(start_angle, end_angle);
        let start = normalize_angle(start_angle);
        Geometry::Arc { center, radius, start_angle: start, end_angle: start + sweep }
    }

    pub fn kind(&self) -> GeometryKind {
        match self {
            Geometry::Segment { .. } => GeometryKind::Segment,
            Geometry::Circle { .. } => GeometryKind::Circle,
            Geometry::Arc { .. } => GeometryKind::Arc,
            Geometry::Point { .. } => GeometryKind::Point,
        }
    }

    pub fn point_handles(&self) -> Vec<PointHandle> {
        match self {
            Geometry::Segment { p1, p2 } => vec![*p1, *p2],
            Geometry::Circle { center, .. } | Geometry::Arc { center, .. } => vec![*center],
            Geometry::Point { p, .. } => vec![*p],
        }
    }

    pub fn radius(&self) -> Option<f64> {
        match self {
            Geometry::Circle { radius, .. } | Geometry::Arc { radius, .. } => Some(*radius),
            _ => None,
        }
    }

    /// Arc end points, derived from center, radius and angles.
    pub fn arc_endpoints(&self, points: &PointStore) -> SketchResult<Option<([f64; 2], [f64; 2])>> {
        match self {
            Geometry::Arc { center, radius, start_angle, end_angle } => {
                let c = points.position(*center)?;
                Ok(Some((polar(c, *radius, *start_angle), polar(c, *radius, *end_angle))))
            }
            _ => Ok(None),
        }
    }

    pub fn length(&self, points: &PointStore) -> SketchResult<f64> {
        Ok(match self {
            Geometry::Segment { p1, p2 } => distance(points.position(*p1)?, points.position(*p2)?),
            Geometry::Circle { radius, .. } => TAU * radius,
            Geometry::Arc { radius, start_angle, end_angle, .. } => radius * (end_angle - start_angle),
            Geometry::Point { .. } => 0.0,
        })
    }

    /// Midpoint along the curve; the center for circles.
    pub fn midpoint(&self, points: &PointStore) -> SketchResult<[f64; 2]> {
        Ok(match self {
            Geometry::Segment { p1, p2 } => midpoint(points.position(*p1)?, points.position(*p2)?),
            Geometry::Circle { center, .. } => points.position(*center)?,
            Geometry::Arc { center, radius, start_angle, end_angle } => {
                polar(points.position(*center)?, *radius, 0.5 * (start_angle + end_angle))
            }
            Geometry::Point { p, .. } => points.position(*p)?,
        })
    }

    /// Unit tangent at curve parameter `t` in [0, 1], in the direction of
    /// increasing `t`. `None` for points and degenerate curves.
    pub fn tangent_at(&self, points: &PointStore, t: f64) -> SketchResult<Option<[f64; 2]>> {
        let angle_tangent = |angle: f64| [-angle.sin(), angle.cos()];
        Ok(match self {
            Geometry::Segment { p1, p2 } => {
                normalize_2d(sub(points.position(*p2)?, points.position(*p1)?))
            }
            Geometry::Circle { radius, .. } if *radius > 0.0 => Some(angle_tangent(t * TAU)),
            Geometry::Arc { radius, start_angle, end_angle, .. } if *radius > 0.0 => {
                Some(angle_tangent(start_angle + t * (end_angle - start_angle)))
            }
            _ => None,
        })
    }

    pub fn bounding_box(&self, points: &PointStore) -> SketchResult<Aabb2> {
        Ok(match self {
            Geometry::Segment { p1, p2 } => {
                let mut b = Aabb2::from_point(points.position(*p1)?);
                b.extend(points.position(*p2)?);
                b
            }
            Geometry::Circle { center, radius } => {
                let c = points.position(*center)?;
                Aabb2::new([c[0] - radius, c[1] - radius], [c[0] + radius, c[1] + radius])
            }
            Geometry::Arc { center, radius, start_angle, end_angle } => {
                let c = points.position(*center)?;
                let sweep = end_angle - start_angle;
                let mut b = Aabb2::from_point(polar(c, *radius, *start_angle));
                b.extend(polar(c, *radius, *end_angle));
                for k in 0..4 {
                    let axis = k as f64 * FRAC_PI_2;
                    if angle_in_sweep(axis, *start_angle, sweep) {
                        b.extend(polar(c, *radius, axis));
                    }
                }
                b
            }
            Geometry::Point { p, .. } => Aabb2::from_point(points.position(*p)?),
        })
    }

    /// Distance from `(x, y)` to the geometry itself: the finite segment,
    /// the circle rim, or the arc (falling back to the nearest end point when
    /// the projected angle lies outside the sweep).
    pub fn point_distance(&self, points: &PointStore, x: f64, y: f64) -> SketchResult<f64> {
        let q = [x, y];
        Ok(match self {
            Geometry::Segment { p1, p2 } => {
                distance_point_to_segment(points.position(*p1)?, points.position(*p2)?, q)
            }
            Geometry::Circle { center, radius } => (distance(points.position(*center)?, q) - radius).abs(),
            Geometry::Arc { center, radius, start_angle, end_angle } => {
                let c = points.position(*center)?;
                let d = distance(c, q);
                let angle = (q[1] - c[1]).atan2(q[0] - c[0]);
                if angle_in_sweep(angle, *start_angle, end_angle - start_angle) {
                    (d - radius).abs()
                } else {
                    let s = polar(c, *radius, *start_angle);
                    let e = polar(c, *radius, *end_angle);
                    distance(s, q).min(distance(e, q))
                }
            }
            Geometry::Point { p, .. } => distance(points.position(*p)?, q),
        })
    }

    /// Semantically significant locations on the geometry.
    pub fn snap_points(&self, points: &PointStore) -> SketchResult<Vec<([f64; 2], SnapType)>> {
        let mut out = Vec::new();
        match self {
            Geometry::Segment { p1, p2 } => {
                let a = points.position(*p1)?;
                let b = points.position(*p2)?;
                out.push((a, SnapType::Endpoint));
                out.push((b, SnapType::Endpoint));
                out.push((midpoint(a, b), SnapType::Midpoint));
            }
            Geometry::Circle { center, radius } => {
                let c = points.position(*center)?;
                out.push((c, SnapType::Center));
                for k in 0..4 {
                    out.push((polar(c, *radius, k as f64 * FRAC_PI_2), SnapType::Quadrant));
                }
            }
            Geometry::Arc { center, radius, start_angle, end_angle } => {
                let c = points.position(*center)?;
                let sweep = end_angle - start_angle;
                out.push((c, SnapType::Center));
                if sweep < TAU {
                    out.push((polar(c, *radius, *start_angle), SnapType::Endpoint));
                    out.push((polar(c, *radius, *end_angle), SnapType::Endpoint));
                }
                out.push((polar(c, *radius, start_angle + 0.5 * sweep), SnapType::Midpoint));
                for k in 0..4 {
                    let axis = k as f64 * FRAC_PI_2;
                    if angle_in_sweep(axis, *start_angle, sweep) {
                        out.push((polar(c, *radius, axis), SnapType::Quadrant));
                    }
                }
            }
            Geometry::Point { p, .. } => out.push((points.position(*p)?, SnapType::Endpoint)),
        }
        Ok(out)
    }
}
