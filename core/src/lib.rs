//! 2D parametric sketch core: point store, geometry, constraints and the
//! Levenberg-Marquardt solver.

pub mod geometry;
pub mod sketch;

pub use sketch::{
    Constraint, ConstraintHandle, Geometry, GeometryFlags, GeometryKind, PointHandle, RadiusRef,
    ShapeHandle, Sketch, SketchError, SketchResult, SolveResult, SolveStatus, SolverConfig,
    SolverEvent,
};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
