//! Parametric 2D sketch: point store with coincidence merging, geometry
//! records, constraints and the numeric solver that satisfies them.

use thiserror::Error;

pub mod constraint;
pub mod points;
pub mod scene;
pub mod snap;
pub mod solver;
pub mod types;

pub use constraint::{Constraint, ConstraintHandle, RadiusRef};
pub use points::{PointHandle, PointStore};
pub use scene::Sketch;
pub use snap::{SnapConfig, SnapPoint, SnapType};
pub use solver::{SolveResult, SolveStatus, Solver, SolverConfig, SolverEvent};
pub use types::{Geometry, GeometryFlags, GeometryKind, GeometryRecord, ShapeHandle};

/// Errors returned for rejected sketch operations. A rejected operation
/// leaves the sketch untouched.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SketchError {
    #[error("Unknown point handle: {0}")]
    UnknownPoint(PointHandle),

    #[error("Unknown shape handle: {0}")]
    UnknownShape(ShapeHandle),

    #[error("Unknown constraint handle: {0}")]
    UnknownConstraint(ConstraintHandle),

    #[error("Point {0} is fixed")]
    FixedPoint(PointHandle),

    #[error("Point {0} is still referenced by geometry or constraints")]
    PointInUse(PointHandle),

    #[error("Degenerate {kind} constraint: {reason}")]
    DegenerateConstraint { kind: &'static str, reason: &'static str },

    #[error("Invalid {what}: {value}")]
    InvalidValue { what: &'static str, value: f64 },

    #[error("Shape {handle} is not a {expected}")]
    WrongShapeKind { handle: ShapeHandle, expected: &'static str },
}

pub type SketchResult<T> = Result<T, SketchError>;

#[cfg(test)]
mod tests_solver;

#[cfg(test)]
mod tests_scene;
