//! Snap point detection for sketch mode
//!
//! Collects the semantically significant locations near the cursor: geometry
//! endpoints, midpoints, centers and quadrants, plus segment intersections,
//! the sketch origin and grid points.

use serde::{Deserialize, Serialize};

use super::scene::Sketch;
use super::types::{Geometry, ShapeHandle};
use crate::geometry::utils_2d::{distance, segment_intersection};

/// Types of snap points available in sketch mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SnapType {
    /// Segment and arc end points, standalone points
    Endpoint,
    /// Segment midpoints, arc sweep midpoints
    Midpoint,
    /// Circle/arc centers
    Center,
    /// Axis points of circles, and of arcs where they fall inside the sweep
    Quadrant,
    /// Crossing of two segments
    Intersection,
    /// Sketch origin (0, 0)
    Origin,
    Grid,
}

impl SnapType {
    /// Priority for snap types (lower = higher priority)
    pub fn priority(&self) -> u8 {
        match self {
            SnapType::Endpoint => 1,
            SnapType::Center => 2,
            SnapType::Intersection => 3,
            SnapType::Midpoint => 4,
            SnapType::Quadrant => 5,
            SnapType::Origin => 6,
            SnapType::Grid => 10,
        }
    }

    /// Numeric tag used across the host boundary.
    pub fn code(&self) -> i32 {
        match self {
            SnapType::Endpoint => 0,
            SnapType::Midpoint => 1,
            SnapType::Center => 2,
            SnapType::Quadrant => 3,
            SnapType::Intersection => 4,
            SnapType::Origin => 5,
            SnapType::Grid => 6,
        }
    }
}

/// A detected snap point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapPoint {
    pub position: [f64; 2],
    pub snap_type: SnapType,
    /// Geometry the snap came from; `None` for intersections, origin and grid
    pub source: Option<ShapeHandle>,
    /// Distance from cursor (for sorting)
    pub distance: f64,
}

/// Configuration for snap detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapConfig {
    /// Maximum distance (in sketch units) for a snap to activate
    pub snap_radius: f64,
    pub enable_endpoint: bool,
    pub enable_midpoint: bool,
    pub enable_center: bool,
    pub enable_quadrant: bool,
    pub enable_intersection: bool,
    pub enable_origin: bool,
    pub enable_grid: bool,
    pub grid_spacing: f64,
}

impl Default for SnapConfig {
    fn default() -> Self {
        Self {
            snap_radius: 0.5,
            enable_endpoint: true,
            enable_midpoint: true,
            enable_center: true,
            enable_quadrant: true,
            enable_intersection: false,
            enable_origin: false,
            enable_grid: false,
            grid_spacing: 1.0,
        }
    }
}

impl SnapConfig {
    pub fn is_enabled(&self, snap_type: SnapType) -> bool {
        match snap_type {
            SnapType::Endpoint => self.enable_endpoint,
            SnapType::Midpoint => self.enable_midpoint,
            SnapType::Center => self.enable_center,
            SnapType::Quadrant => self.enable_quadrant,
            SnapType::Intersection => self.enable_intersection,
            SnapType::Origin => self.enable_origin,
            SnapType::Grid => self.enable_grid,
        }
    }

    pub fn with_snap_radius(mut self, radius: f64) -> Self {
        self.snap_radius = radius;
        self
    }
}

/// Find all snap points within the snap radius of the cursor, in geometry
/// handle order. Geometry that is hidden or in preview is skipped.
pub fn find_snap_points(cursor: [f64; 2], sketch: &Sketch, config: &SnapConfig) -> Vec<SnapPoint> {
    let mut snaps = Vec::new();
    let mut push = |position: [f64; 2], snap_type: SnapType, source: Option<ShapeHandle>| {
        let d = distance(cursor, position);
        if d <= config.snap_radius {
            snaps.push(SnapPoint { position, snap_type, source, distance: d });
        }
    };

    let points = sketch.points();
    for (handle, record) in sketch.shapes() {
        if !record.flags.is_pickable() {
            continue;
        }
        let Ok(candidates) = record.geometry.snap_points(points) else {
            continue;
        };
        for (position, snap_type) in candidates {
            if config.is_enabled(snap_type) {
                push(position, snap_type, Some(handle));
            }
        }
    }

    if config.enable_intersection {
        let segments: Vec<_> = sketch
            .shapes()
            .filter(|(_, r)| r.flags.is_pickable())
            .filter_map(|(_, r)| match r.geometry {
                Geometry::Segment { p1, p2 } => {
                    Some((points.position(p1).ok()?, points.position(p2).ok()?))
                }
                _ => None,
            })
            .collect();

        for i in 0..segments.len() {
            for j in (i + 1)..segments.len() {
                let (s1, e1) = segments[i];
                let (s2, e2) = segments[j];
                if let Some(p) = segment_intersection(s1, e1, s2, e2) {
                    push(p, SnapType::Intersection, None);
                }
            }
        }
    }

    if config.enable_origin {
        push([0.0, 0.0], SnapType::Origin, None);
    }

    if config.enable_grid && config.grid_spacing > 0.0 {
        let grid_x = (cursor[0] / config.grid_spacing).round() * config.grid_spacing;
        let grid_y = (cursor[1] / config.grid_spacing).round() * config.grid_spacing;
        push([grid_x, grid_y], SnapType::Grid, None);
    }

    snaps
}

/// Find the best snap point for the cursor position: highest priority first,
/// then nearest, then lowest source handle.
pub fn snap_cursor(cursor: [f64; 2], sketch: &Sketch, config: &SnapConfig) -> Option<SnapPoint> {
    best_snap(find_snap_points(cursor, sketch, config))
}

/// Picks the winner among already collected snap points.
pub fn best_snap(mut snaps: Vec<SnapPoint>) -> Option<SnapPoint> {
    snaps.sort_by(|a, b| {
        a.snap_type
            .priority()
            .cmp(&b.snap_type.priority())
            .then(a.distance.total_cmp(&b.distance))
            .then(a.source.cmp(&b.source))
    });

    snaps.into_iter().next()
}
