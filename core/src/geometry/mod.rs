//! Planar geometry helpers shared by the sketch model.

/// Length below which vectors and segments count as degenerate.
pub const EPSILON: f64 = 1e-9;

pub mod primitives;
pub use primitives::*;

pub mod utils_2d;
