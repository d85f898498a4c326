//! The sketch scene: the mutation and query surface used by interactive tools.
//!
//! Geometry and constraints hold point handles, never coordinates, and read
//! positions through the point store. Merging points therefore never needs a
//! walk over the records that reference them.

use std::time::Instant;

use tracing::debug;

use super::constraint::{Constraint, ConstraintHandle, RadiusRef};
use super::points::{PointHandle, PointStore};
use super::snap::{self, SnapConfig, SnapPoint};
use super::solver::{SolveResult, Solver, SolverConfig, SolverObserver};
use super::types::{Geometry, GeometryFlags, GeometryKind, GeometryRecord, ShapeHandle};
use super::{SketchError, SketchResult};
use crate::geometry::Aabb2;

#[derive(Debug, Default)]
pub struct Sketch {
    points: PointStore,
    shapes: Vec<Option<GeometryRecord>>,
    constraints: Vec<Option<Constraint>>,
    solver: Solver,
    snap_config: SnapConfig,
    last_result: Option<SolveResult>,
}

impl Sketch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_solver_config(config: SolverConfig) -> Self {
        Self { solver: Solver::new(config), ..Self::default() }
    }

    // =========================================================================
    // Points
    // =========================================================================

    pub fn points(&self) -> &PointStore {
        &self.points
    }

    pub fn add_point(&mut self, x: f64, y: f64, fixed: bool) -> PointHandle {
        self.points.create_point(x, y, fixed)
    }

    pub fn position(&self, handle: PointHandle) -> SketchResult<[f64; 2]> {
        self.points.position(handle)
    }

    pub fn set_position(&mut self, handle: PointHandle, x: f64, y: f64) -> SketchResult<()> {
        self.points.set_position(handle, x, y).inspect_err(|e| {
            debug!(%handle, error = %e, "Rejected point move");
        })
    }

    pub fn set_fixed(&mut self, handle: PointHandle, fixed: bool) -> SketchResult<()> {
        self.points.set_fixed(handle, fixed)
    }

    pub fn is_fixed(&self, handle: PointHandle) -> SketchResult<bool> {
        self.points.is_fixed(handle)
    }

    /// Representative of `handle`'s coincidence class.
    pub fn find(&mut self, handle: PointHandle) -> SketchResult<PointHandle> {
        self.points.find(handle)
    }

    /// Merges two points. Records referencing either keep their handles and
    /// now read the merged coordinates.
    pub fn union(&mut self, a: PointHandle, b: PointHandle) -> SketchResult<PointHandle> {
        let rep = self.points.union(a, b)?;
        debug!(%a, %b, %rep, "Merged points");
        Ok(rep)
    }

    /// Removes the class of `handle`. Fails while any live geometry or
    /// constraint references a handle of that class.
    pub fn remove_point(&mut self, handle: PointHandle) -> SketchResult<()> {
        let rep = self.points.resolve(handle)?;
        let in_class = |h: PointHandle| self.points.resolve(h).ok() == Some(rep);

        let used_by_shape = self
            .shapes()
            .any(|(_, r)| r.geometry.point_handles().into_iter().any(in_class));
        let used_by_constraint = self
            .constraints()
            .any(|(_, c)| c.points().into_iter().any(in_class));
        if used_by_shape || used_by_constraint {
            debug!(%handle, "Rejected point removal, still referenced");
            return Err(SketchError::PointInUse(handle));
        }

        self.points.remove_class(handle)?;
        Ok(())
    }

    // =========================================================================
    // Geometry
    // =========================================================================

    pub fn shapes(&self) -> impl Iterator<Item = (ShapeHandle, &GeometryRecord)> + '_ {
        self.shapes
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.as_ref().map(|r| (ShapeHandle(i as u32), r)))
    }

    pub fn shape(&self, handle: ShapeHandle) -> SketchResult<&GeometryRecord> {
        self.shapes
            .get(handle.index())
            .and_then(Option::as_ref)
            .ok_or(SketchError::UnknownShape(handle))
    }

    pub fn shape_count(&self) -> usize {
        self.shapes().count()
    }

    fn push_shape(&mut self, geometry: Geometry) -> SketchResult<ShapeHandle> {
        for h in geometry.point_handles() {
            self.points.resolve(h)?;
        }
        let handle = ShapeHandle(self.shapes.len() as u32);
        self.shapes.push(Some(GeometryRecord::new(geometry)));
        Ok(handle)
    }

    pub fn add_segment(&mut self, p1: PointHandle, p2: PointHandle) -> SketchResult<ShapeHandle> {
        self.push_shape(Geometry::Segment { p1, p2 })
    }

    pub fn add_circle(&mut self, center: PointHandle, radius: f64) -> SketchResult<ShapeHandle> {
        check_radius(radius)?;
        self.push_shape(Geometry::Circle { center, radius })
    }

    /// Counter-clockwise arc from `start_angle` to `end_angle`; equal angles
    /// give a full turn.
    pub fn add_arc(
        &mut self,
        center: PointHandle,
        radius: f64,
        start_angle: f64,
        end_angle: f64,
    ) -> SketchResult<ShapeHandle> {
        check_radius(radius)?;
        for (what, value) in [("start angle", start_angle), ("end angle", end_angle)] {
            if !value.is_finite() {
                return Err(SketchError::InvalidValue { what, value });
            }
        }
        self.push_shape(Geometry::arc(center, radius, start_angle, end_angle))
    }

    pub fn add_entity_point(&mut self, p: PointHandle, pixel_size: f64) -> SketchResult<ShapeHandle> {
        self.push_shape(Geometry::Point { p, pixel_size })
    }

    /// Drops a geometry record. Its points stay in the store.
    pub fn remove_shape(&mut self, handle: ShapeHandle) -> SketchResult<()> {
        self.shape(handle)?;
        self.shapes[handle.index()] = None;
        Ok(())
    }

    pub fn flags(&self, handle: ShapeHandle) -> SketchResult<GeometryFlags> {
        Ok(self.shape(handle)?.flags)
    }

    pub fn set_flags(&mut self, handle: ShapeHandle, flags: GeometryFlags) -> SketchResult<()> {
        match self.shapes.get_mut(handle.index()).and_then(Option::as_mut) {
            Some(record) => {
                record.flags = flags;
                Ok(())
            }
            None => Err(SketchError::UnknownShape(handle)),
        }
    }

    /// Bounding box of all visible geometry; empty for an empty sketch.
    pub fn bounding_box(&self) -> Aabb2 {
        self.shapes()
            .filter(|(_, r)| r.flags.contains(GeometryFlags::VISIBLE))
            .filter_map(|(_, r)| r.geometry.bounding_box(&self.points).ok())
            .fold(Aabb2::empty(), |acc, b| acc.union(&b))
    }

    fn segment_points(&self, handle: ShapeHandle) -> SketchResult<(PointHandle, PointHandle)> {
        match self.shape(handle)?.geometry {
            Geometry::Segment { p1, p2 } => Ok((p1, p2)),
            _ => Err(SketchError::WrongShapeKind { handle, expected: "segment" }),
        }
    }

    // =========================================================================
    // Constraints
    // =========================================================================

    pub fn constraints(&self) -> impl Iterator<Item = (ConstraintHandle, &Constraint)> + '_ {
        self.constraints
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.as_ref().map(|c| (ConstraintHandle(i as u32), c)))
    }

    pub fn constraint(&self, handle: ConstraintHandle) -> SketchResult<&Constraint> {
        self.constraints
            .get(handle.index())
            .and_then(Option::as_ref)
            .ok_or(SketchError::UnknownConstraint(handle))
    }

    pub fn constraint_count(&self) -> usize {
        self.constraints().count()
    }

    /// Validates and appends a constraint. Prefer [`Sketch::union`] over a raw
    /// `Coincident` for user-initiated merges; it removes two variables
    /// instead of adding two equations.
    pub fn add_constraint(&mut self, constraint: Constraint) -> SketchResult<ConstraintHandle> {
        if let Err(e) = constraint.validate(&self.points) {
            debug!(kind = constraint.type_name(), error = %e, "Rejected constraint");
            return Err(e);
        }
        let handle = ConstraintHandle(self.constraints.len() as u32);
        debug!(%handle, kind = constraint.type_name(), "Added constraint");
        self.constraints.push(Some(constraint));
        Ok(handle)
    }

    /// Pins `p` where it currently is.
    pub fn fix_point(&mut self, p: PointHandle) -> SketchResult<ConstraintHandle> {
        let c = Constraint::fixed_at(&self.points, p)?;
        self.add_constraint(c)
    }

    /// Tangency between a segment and a circle or arc, using the circle's
    /// current radius.
    pub fn add_tangent(&mut self, segment: ShapeHandle, circle: ShapeHandle) -> SketchResult<ConstraintHandle> {
        let (p1, p2) = self.segment_points(segment)?;
        let (center, radius) = match self.shape(circle)?.geometry {
            Geometry::Circle { center, radius } | Geometry::Arc { center, radius, .. } => (center, radius),
            _ => return Err(SketchError::WrongShapeKind { handle: circle, expected: "circle or arc" }),
        };
        self.add_constraint(Constraint::Tangent { p1, p2, center, radius: RadiusRef::Value(radius) })
    }

    pub fn add_on_line(&mut self, p: PointHandle, segment: ShapeHandle) -> SketchResult<ConstraintHandle> {
        let (a, b) = self.segment_points(segment)?;
        self.add_constraint(Constraint::OnLine { p, a, b })
    }

    pub fn add_horizontal_segment(&mut self, segment: ShapeHandle) -> SketchResult<ConstraintHandle> {
        let (p, q) = self.segment_points(segment)?;
        self.add_constraint(Constraint::Horizontal { p, q })
    }

    pub fn add_vertical_segment(&mut self, segment: ShapeHandle) -> SketchResult<ConstraintHandle> {
        let (p, q) = self.segment_points(segment)?;
        self.add_constraint(Constraint::Vertical { p, q })
    }

    /// Changes a dimension, e.g. after the user edits a distance.
    pub fn set_constraint_value(&mut self, handle: ConstraintHandle, value: f64) -> SketchResult<()> {
        let mut updated = self.constraint(handle)?.clone();
        if !updated.set_value(value) {
            return Err(SketchError::InvalidValue { what: "value for a constraint without one", value });
        }
        updated.validate(&self.points)?;
        self.constraints[handle.index()] = Some(updated);
        Ok(())
    }

    pub fn remove_constraint(&mut self, handle: ConstraintHandle) -> SketchResult<Constraint> {
        let removed = self
            .constraints
            .get_mut(handle.index())
            .and_then(Option::take)
            .ok_or(SketchError::UnknownConstraint(handle))?;
        debug!(%handle, kind = removed.type_name(), "Removed constraint");
        Ok(removed)
    }

    pub fn clear_constraints(&mut self) {
        for slot in &mut self.constraints {
            *slot = None;
        }
        self.last_result = None;
    }

    /// Removes every point, shape and constraint. Handles are not reused
    /// afterwards. Solver and snap settings are kept.
    pub fn clear_scene(&mut self) {
        self.points.clear();
        for slot in &mut self.shapes {
            *slot = None;
        }
        self.clear_constraints();
        self.solver.reset();
    }

    /// Current residuals of each constraint, in insertion order.
    pub fn residuals(&self) -> Vec<(ConstraintHandle, Vec<f64>)> {
        let at = |h: PointHandle| self.points.position(h).unwrap_or([f64::NAN; 2]);
        self.constraints()
            .map(|(handle, c)| {
                let mut out = Vec::with_capacity(c.equation_count());
                c.residuals(&at, &mut out);
                (handle, out)
            })
            .collect()
    }

    pub fn max_residual(&self) -> f64 {
        self.residuals()
            .iter()
            .flat_map(|(_, r)| r.iter())
            .map(|v| v.abs())
            .fold(0.0, f64::max)
    }

    // =========================================================================
    // Solving
    // =========================================================================

    pub fn solver_config(&self) -> &SolverConfig {
        self.solver.config()
    }

    pub fn set_solver_config(&mut self, config: SolverConfig) {
        self.solver.set_config(config);
    }

    pub fn solver_config_mut(&mut self) -> &mut SolverConfig {
        self.solver.config_mut()
    }

    pub fn set_observer(&mut self, observer: Option<SolverObserver>) {
        self.solver.set_observer(observer);
    }

    pub fn solve(&mut self) -> SolveResult {
        self.run_solve(None)
    }

    /// Like [`Sketch::solve`], stopping with the best iterate once `deadline` passes.
    pub fn solve_with_deadline(&mut self, deadline: Instant) -> SolveResult {
        self.run_solve(Some(deadline))
    }

    fn run_solve(&mut self, deadline: Option<Instant>) -> SolveResult {
        let active: Vec<&Constraint> = self.constraints.iter().flatten().collect();
        let result = self.solver.solve(&mut self.points, &active, deadline);
        self.last_result = Some(result.clone());
        result
    }

    /// One damped iteration, keeping the damping between calls.
    pub fn step(&mut self) -> SolveResult {
        let active: Vec<&Constraint> = self.constraints.iter().flatten().collect();
        let result = self.solver.step(&mut self.points, &active);
        self.last_result = Some(result.clone());
        result
    }

    pub fn last_result(&self) -> Option<&SolveResult> {
        self.last_result.as_ref()
    }

    // =========================================================================
    // Pickers
    // =========================================================================

    /// Nearest live point within `tol`. Coincident handles are reported once,
    /// by their representative; ties go to the smaller handle.
    pub fn find_closest_point(&self, x: f64, y: f64, tol: f64) -> Option<PointHandle> {
        let mut best: Option<(PointHandle, f64)> = None;
        for h in self.points.representatives() {
            let Ok([px, py]) = self.points.position(h) else {
                continue;
            };
            let d = (px - x).hypot(py - y);
            if d <= tol && best.map_or(true, |(_, bd)| d < bd) {
                best = Some((h, d));
            }
        }
        best.map(|(h, _)| h)
    }

    /// Nearest pickable geometry within `tol`; ties go to the smaller handle.
    pub fn find_closest_shape(&self, x: f64, y: f64, tol: f64) -> Option<(GeometryKind, ShapeHandle)> {
        let mut best: Option<(GeometryKind, ShapeHandle, f64)> = None;
        for (handle, record) in self.shapes() {
            if !record.flags.is_pickable() {
                continue;
            }
            let Ok(d) = record.geometry.point_distance(&self.points, x, y) else {
                continue;
            };
            if d <= tol && best.map_or(true, |(_, _, bd)| d < bd) {
                best = Some((record.geometry.kind(), handle, d));
            }
        }
        best.map(|(kind, handle, _)| (kind, handle))
    }

    pub fn snap_config(&self) -> &SnapConfig {
        &self.snap_config
    }

    pub fn set_snap_config(&mut self, config: SnapConfig) {
        self.snap_config = config;
    }

    /// All snap points within `tol` of `(x, y)`, using the sketch's snap
    /// settings with `tol` as radius.
    pub fn snap_candidates(&self, x: f64, y: f64, tol: f64) -> Vec<SnapPoint> {
        let config = self.snap_config.clone().with_snap_radius(tol);
        snap::find_snap_points([x, y], self, &config)
    }

    /// Best snap for the cursor under the sketch's snap settings.
    pub fn snap_cursor(&self, x: f64, y: f64) -> Option<SnapPoint> {
        snap::snap_cursor([x, y], self, &self.snap_config)
    }
}

fn check_radius(radius: f64) -> SketchResult<()> {
    if radius.is_finite() && radius >= 0.0 {
        Ok(())
    } else {
        Err(SketchError::InvalidValue { what: "radius", value: radius })
    }
}
