//! C-ABI function table over `sketch-core`.
//!
//! Every sketch lives behind an opaque `SketchContext` pointer obtained from
//! [`sketch_create`]. Handle-returning functions return `-1` on failure,
//! status-returning functions return `1` on success and `0` otherwise. A null
//! context is treated like any other caller error.

use std::time::{Duration, Instant};

use tracing::debug;
use tracing_subscriber::EnvFilter;

use sketch_core::sketch::snap;
use sketch_core::sketch::solver::SolverObserver;
use sketch_core::sketch::types::GeometryFlags;
use sketch_core::sketch::{
    Constraint, ConstraintHandle, PointHandle, RadiusRef, ShapeHandle, Sketch, SketchResult,
    SolverEvent,
};

pub use sketch_core::sketch::constraint::{
    CONSTRAINT_ANGLE, CONSTRAINT_COINCIDENT, CONSTRAINT_DISTANCE, CONSTRAINT_EQUAL_LENGTH,
    CONSTRAINT_FIXED, CONSTRAINT_HORIZONTAL, CONSTRAINT_ON_LINE, CONSTRAINT_PARALLEL,
    CONSTRAINT_PERPENDICULAR, CONSTRAINT_TANGENT, CONSTRAINT_VERTICAL,
};
pub use sketch_core::sketch::types::{
    FLAG_CONSTRUCTION, FLAG_FIXED, FLAG_HOVER, FLAG_PREVIEW, FLAG_SELECTED, FLAG_VISIBLE,
};

const INVALID: i32 = -1;

/// Host callback receiving solver diagnostics as `(event tag, value)`.
pub type ObserverFn = extern "C" fn(u32, f64);

/// Opaque per-sketch state handed to the host.
pub struct SketchContext {
    sketch: Sketch,
}

unsafe fn context<'a>(ctx: *mut SketchContext) -> Option<&'a mut Sketch> {
    ctx.as_mut().map(|c| &mut c.sketch)
}

fn point(h: i32) -> Option<PointHandle> {
    u32::try_from(h).ok().map(PointHandle)
}

fn shape(h: i32) -> Option<ShapeHandle> {
    u32::try_from(h).ok().map(ShapeHandle)
}

fn to_handle(h: u32) -> i32 {
    i32::try_from(h).unwrap_or(INVALID)
}

fn status<T>(result: SketchResult<T>) -> i32 {
    match result {
        Ok(_) => 1,
        Err(e) => {
            debug!(error = %e, "Sketch call rejected");
            0
        }
    }
}

fn handle_or_invalid(result: SketchResult<u32>) -> i32 {
    match result {
        Ok(h) => to_handle(h),
        Err(e) => {
            debug!(error = %e, "Sketch call rejected");
            INVALID
        }
    }
}

/// Installs a `tracing` fmt subscriber filtered by `RUST_LOG`.
/// Returns 0 if a global subscriber was already set.
#[no_mangle]
pub extern "C" fn sketch_init_logging() -> i32 {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()
        .is_ok();
    i32::from(installed)
}

#[no_mangle]
pub extern "C" fn sketch_create() -> *mut SketchContext {
    Box::into_raw(Box::new(SketchContext { sketch: Sketch::new() }))
}

/// # Safety
/// `ctx` must be null or a pointer returned by [`sketch_create`] that has not
/// been destroyed yet.
#[no_mangle]
pub unsafe extern "C" fn sketch_destroy(ctx: *mut SketchContext) {
    if !ctx.is_null() {
        drop(Box::from_raw(ctx));
    }
}

// =============================================================================
// Points
// =============================================================================

/// # Safety
/// `ctx` must be null or a live context from [`sketch_create`].
#[no_mangle]
pub unsafe extern "C" fn sketch_add_point(ctx: *mut SketchContext, x: f64, y: f64, fixed: i32) -> i32 {
    match context(ctx) {
        Some(sketch) => to_handle(sketch.add_point(x, y, fixed != 0).0),
        None => INVALID,
    }
}

/// Writes the position of `h` to `out_x`/`out_y`.
///
/// # Safety
/// `ctx` must be null or a live context; the out pointers must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn sketch_get_point(
    ctx: *mut SketchContext,
    h: i32,
    out_x: *mut f64,
    out_y: *mut f64,
) -> i32 {
    let (Some(sketch), Some(h)) = (context(ctx), point(h)) else {
        return 0;
    };
    if out_x.is_null() || out_y.is_null() {
        return 0;
    }
    match sketch.position(h) {
        Ok([x, y]) => {
            *out_x = x;
            *out_y = y;
            1
        }
        Err(_) => 0,
    }
}

/// # Safety
/// `ctx` must be null or a live context from [`sketch_create`].
#[no_mangle]
pub unsafe extern "C" fn sketch_set_point(ctx: *mut SketchContext, h: i32, x: f64, y: f64) -> i32 {
    match (context(ctx), point(h)) {
        (Some(sketch), Some(h)) => status(sketch.set_position(h, x, y)),
        _ => 0,
    }
}

/// # Safety
/// `ctx` must be null or a live context from [`sketch_create`].
#[no_mangle]
pub unsafe extern "C" fn sketch_set_point_fixed(ctx: *mut SketchContext, h: i32, fixed: i32) -> i32 {
    match (context(ctx), point(h)) {
        (Some(sketch), Some(h)) => status(sketch.set_fixed(h, fixed != 0)),
        _ => 0,
    }
}

/// Merges two points and returns the representative.
///
/// # Safety
/// `ctx` must be null or a live context from [`sketch_create`].
#[no_mangle]
pub unsafe extern "C" fn sketch_union(ctx: *mut SketchContext, a: i32, b: i32) -> i32 {
    match (context(ctx), point(a), point(b)) {
        (Some(sketch), Some(a), Some(b)) => handle_or_invalid(sketch.union(a, b).map(|h| h.0)),
        _ => INVALID,
    }
}

/// # Safety
/// `ctx` must be null or a live context from [`sketch_create`].
#[no_mangle]
pub unsafe extern "C" fn sketch_find(ctx: *mut SketchContext, h: i32) -> i32 {
    match (context(ctx), point(h)) {
        (Some(sketch), Some(h)) => handle_or_invalid(sketch.find(h).map(|h| h.0)),
        _ => INVALID,
    }
}

/// # Safety
/// `ctx` must be null or a live context from [`sketch_create`].
#[no_mangle]
pub unsafe extern "C" fn sketch_remove_point(ctx: *mut SketchContext, h: i32) -> i32 {
    match (context(ctx), point(h)) {
        (Some(sketch), Some(h)) => status(sketch.remove_point(h)),
        _ => 0,
    }
}

// =============================================================================
// Geometry
// =============================================================================

/// # Safety
/// `ctx` must be null or a live context from [`sketch_create`].
#[no_mangle]
pub unsafe extern "C" fn sketch_add_segment(ctx: *mut SketchContext, p1: i32, p2: i32) -> i32 {
    match (context(ctx), point(p1), point(p2)) {
        (Some(sketch), Some(p1), Some(p2)) => handle_or_invalid(sketch.add_segment(p1, p2).map(|h| h.0)),
        _ => INVALID,
    }
}

/// # Safety
/// `ctx` must be null or a live context from [`sketch_create`].
#[no_mangle]
pub unsafe extern "C" fn sketch_add_circle(ctx: *mut SketchContext, center: i32, radius: f64) -> i32 {
    match (context(ctx), point(center)) {
        (Some(sketch), Some(c)) => handle_or_invalid(sketch.add_circle(c, radius).map(|h| h.0)),
        _ => INVALID,
    }
}

/// # Safety
/// `ctx` must be null or a live context from [`sketch_create`].
#[no_mangle]
pub unsafe extern "C" fn sketch_add_arc(
    ctx: *mut SketchContext,
    center: i32,
    radius: f64,
    start_angle: f64,
    end_angle: f64,
) -> i32 {
    match (context(ctx), point(center)) {
        (Some(sketch), Some(c)) => {
            handle_or_invalid(sketch.add_arc(c, radius, start_angle, end_angle).map(|h| h.0))
        }
        _ => INVALID,
    }
}

/// # Safety
/// `ctx` must be null or a live context from [`sketch_create`].
#[no_mangle]
pub unsafe extern "C" fn sketch_add_entity_point(ctx: *mut SketchContext, p: i32, pixel_size: f64) -> i32 {
    match (context(ctx), point(p)) {
        (Some(sketch), Some(p)) => handle_or_invalid(sketch.add_entity_point(p, pixel_size).map(|h| h.0)),
        _ => INVALID,
    }
}

/// # Safety
/// `ctx` must be null or a live context from [`sketch_create`].
#[no_mangle]
pub unsafe extern "C" fn sketch_remove_shape(ctx: *mut SketchContext, h: i32) -> i32 {
    match (context(ctx), shape(h)) {
        (Some(sketch), Some(h)) => status(sketch.remove_shape(h)),
        _ => 0,
    }
}

/// # Safety
/// `ctx` must be null or a live context from [`sketch_create`].
#[no_mangle]
pub unsafe extern "C" fn sketch_set_shape_flags(ctx: *mut SketchContext, h: i32, flags: u32) -> i32 {
    match (context(ctx), shape(h)) {
        (Some(sketch), Some(h)) => status(sketch.set_flags(h, GeometryFlags(flags))),
        _ => 0,
    }
}

/// Returns the flag bits of a shape, or -1.
///
/// # Safety
/// `ctx` must be null or a live context from [`sketch_create`].
#[no_mangle]
pub unsafe extern "C" fn sketch_get_shape_flags(ctx: *mut SketchContext, h: i32) -> i32 {
    match (context(ctx), shape(h)) {
        (Some(sketch), Some(h)) => handle_or_invalid(sketch.flags(h).map(|f| f.bits())),
        _ => INVALID,
    }
}

// =============================================================================
// Constraints
// =============================================================================

/// Builds a constraint from the flat host encoding.
///
/// Point roles per kind: two-point kinds use `p1`, `p2`; `FIXED` pins `p1`
/// at its current position; `TANGENT` takes the line `p1`-`p2`, center `p3`
/// and either the rim point `p4` or, when `p4 < 0`, the radius `value`;
/// `ON_LINE` keeps `p1` on the line `p2`-`p3`.
fn decode_constraint(
    sketch: &Sketch,
    kind: i32,
    p1: i32,
    p2: i32,
    p3: i32,
    p4: i32,
    value: f64,
) -> Option<Constraint> {
    Some(match kind {
        CONSTRAINT_COINCIDENT => Constraint::Coincident { p: point(p1)?, q: point(p2)? },
        CONSTRAINT_HORIZONTAL => Constraint::Horizontal { p: point(p1)?, q: point(p2)? },
        CONSTRAINT_VERTICAL => Constraint::Vertical { p: point(p1)?, q: point(p2)? },
        CONSTRAINT_DISTANCE => Constraint::Distance { p: point(p1)?, q: point(p2)?, value },
        CONSTRAINT_FIXED => Constraint::fixed_at(sketch.points(), point(p1)?).ok()?,
        CONSTRAINT_PARALLEL => Constraint::Parallel { p1: point(p1)?, p2: point(p2)?, p3: point(p3)?, p4: point(p4)? },
        CONSTRAINT_PERPENDICULAR => {
            Constraint::Perpendicular { p1: point(p1)?, p2: point(p2)?, p3: point(p3)?, p4: point(p4)? }
        }
        CONSTRAINT_EQUAL_LENGTH => {
            Constraint::EqualLength { p1: point(p1)?, p2: point(p2)?, p3: point(p3)?, p4: point(p4)? }
        }
        CONSTRAINT_TANGENT => {
            let radius = match point(p4) {
                Some(rim) => RadiusRef::Point(rim),
                None => RadiusRef::Value(value),
            };
            Constraint::Tangent { p1: point(p1)?, p2: point(p2)?, center: point(p3)?, radius }
        }
        CONSTRAINT_ANGLE => Constraint::Angle { p1: point(p1)?, p2: point(p2)?, p3: point(p3)?, p4: point(p4)?, value },
        CONSTRAINT_ON_LINE => Constraint::OnLine { p: point(p1)?, a: point(p2)?, b: point(p3)? },
        _ => return None,
    })
}

/// Adds a constraint of `kind` (`CONSTRAINT_*`). Unused point slots may be -1.
///
/// # Safety
/// `ctx` must be null or a live context from [`sketch_create`].
#[no_mangle]
pub unsafe extern "C" fn sketch_add_constraint(
    ctx: *mut SketchContext,
    kind: i32,
    p1: i32,
    p2: i32,
    p3: i32,
    p4: i32,
    value: f64,
) -> i32 {
    let Some(sketch) = context(ctx) else {
        return INVALID;
    };
    let Some(constraint) = decode_constraint(sketch, kind, p1, p2, p3, p4, value) else {
        debug!(kind, p1, p2, p3, p4, "Rejected malformed constraint");
        return INVALID;
    };
    handle_or_invalid(sketch.add_constraint(constraint).map(|h| h.0))
}

/// # Safety
/// `ctx` must be null or a live context from [`sketch_create`].
#[no_mangle]
pub unsafe extern "C" fn sketch_remove_constraint(ctx: *mut SketchContext, h: i32) -> i32 {
    match (context(ctx), u32::try_from(h).ok()) {
        (Some(sketch), Some(h)) => status(sketch.remove_constraint(ConstraintHandle(h))),
        _ => 0,
    }
}

/// # Safety
/// `ctx` must be null or a live context from [`sketch_create`].
#[no_mangle]
pub unsafe extern "C" fn sketch_clear_constraints(ctx: *mut SketchContext) {
    if let Some(sketch) = context(ctx) {
        sketch.clear_constraints();
    }
}

/// # Safety
/// `ctx` must be null or a live context from [`sketch_create`].
#[no_mangle]
pub unsafe extern "C" fn sketch_clear_scene(ctx: *mut SketchContext) {
    if let Some(sketch) = context(ctx) {
        sketch.clear_scene();
    }
}

/// Largest absolute residual at the current coordinates.
///
/// # Safety
/// `ctx` must be null or a live context from [`sketch_create`].
#[no_mangle]
pub unsafe extern "C" fn sketch_get_max_residual(ctx: *mut SketchContext) -> f64 {
    context(ctx).map_or(f64::NAN, |s| s.max_residual())
}

// =============================================================================
// Solver
// =============================================================================

/// Returns 1 on convergence, 0 otherwise.
///
/// # Safety
/// `ctx` must be null or a live context from [`sketch_create`].
#[no_mangle]
pub unsafe extern "C" fn sketch_solve(ctx: *mut SketchContext) -> i32 {
    context(ctx).map_or(0, |s| i32::from(s.solve().converged))
}

/// Like [`sketch_solve`], giving up after `budget_ms` milliseconds.
///
/// # Safety
/// `ctx` must be null or a live context from [`sketch_create`].
#[no_mangle]
pub unsafe extern "C" fn sketch_solve_with_budget(ctx: *mut SketchContext, budget_ms: u32) -> i32 {
    let deadline = Instant::now() + Duration::from_millis(u64::from(budget_ms));
    context(ctx).map_or(0, |s| i32::from(s.solve_with_deadline(deadline).converged))
}

/// One solver iteration. Returns 1 once converged.
///
/// # Safety
/// `ctx` must be null or a live context from [`sketch_create`].
#[no_mangle]
pub unsafe extern "C" fn sketch_step(ctx: *mut SketchContext) -> i32 {
    context(ctx).map_or(0, |s| i32::from(s.step().converged))
}

/// # Safety
/// `ctx` must be null or a live context from [`sketch_create`].
#[no_mangle]
pub unsafe extern "C" fn sketch_get_solver_iterations(ctx: *mut SketchContext) -> i32 {
    context(ctx)
        .and_then(|s| s.last_result())
        .map_or(0, |r| i32::try_from(r.iterations).unwrap_or(i32::MAX))
}

/// # Safety
/// `ctx` must be null or a live context from [`sketch_create`].
#[no_mangle]
pub unsafe extern "C" fn sketch_get_solver_max_error(ctx: *mut SketchContext) -> f64 {
    context(ctx).and_then(|s| s.last_result()).map_or(0.0, |r| r.max_error)
}

/// Degrees of freedom reported by the last solve.
///
/// # Safety
/// `ctx` must be null or a live context from [`sketch_create`].
#[no_mangle]
pub unsafe extern "C" fn sketch_get_solver_dof(ctx: *mut SketchContext) -> i32 {
    context(ctx).and_then(|s| s.last_result()).map_or(0, |r| r.dof)
}

/// # Safety
/// `ctx` must be null or a live context from [`sketch_create`].
#[no_mangle]
pub unsafe extern "C" fn sketch_set_solver_max_iterations(ctx: *mut SketchContext, max_iterations: u32) {
    if let Some(sketch) = context(ctx) {
        sketch.solver_config_mut().max_iterations = max_iterations as usize;
    }
}

/// # Safety
/// `ctx` must be null or a live context from [`sketch_create`].
#[no_mangle]
pub unsafe extern "C" fn sketch_set_solver_tolerance(ctx: *mut SketchContext, tolerance: f64) -> i32 {
    match context(ctx) {
        Some(sketch) if tolerance.is_finite() && tolerance > 0.0 => {
            sketch.solver_config_mut().tolerance = tolerance;
            1
        }
        _ => 0,
    }
}

/// Installs (or with null, removes) the solver diagnostics callback.
///
/// # Safety
/// `ctx` must be null or a live context from [`sketch_create`].
#[no_mangle]
pub unsafe extern "C" fn sketch_set_observer(ctx: *mut SketchContext, observer: Option<ObserverFn>) {
    if let Some(sketch) = context(ctx) {
        sketch.set_observer(observer.map(|cb| {
            Box::new(move |event: SolverEvent, value: f64| cb(event.tag(), value)) as SolverObserver
        }));
    }
}

// =============================================================================
// Pickers
// =============================================================================

/// # Safety
/// `ctx` must be null or a live context from [`sketch_create`].
#[no_mangle]
pub unsafe extern "C" fn sketch_find_closest_point(ctx: *mut SketchContext, x: f64, y: f64, tol: f64) -> i32 {
    context(ctx)
        .and_then(|s| s.find_closest_point(x, y, tol))
        .map_or(INVALID, |h| to_handle(h.0))
}

/// Returns the nearest shape handle and writes its kind (0 segment, 1 circle,
/// 2 arc, 3 point) to `out_kind`.
///
/// # Safety
/// `ctx` must be null or a live context; `out_kind` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn sketch_find_closest_shape(
    ctx: *mut SketchContext,
    x: f64,
    y: f64,
    tol: f64,
    out_kind: *mut i32,
) -> i32 {
    match context(ctx).and_then(|s| s.find_closest_shape(x, y, tol)) {
        Some((kind, h)) => {
            if !out_kind.is_null() {
                *out_kind = kind.code();
            }
            to_handle(h.0)
        }
        None => INVALID,
    }
}

/// Best snap within `tol`. Writes position and snap kind and returns the
/// source shape handle, or -1 for snaps without one. Returns -2 if nothing
/// is in range.
///
/// # Safety
/// `ctx` must be null or a live context; out pointers must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn sketch_snap(
    ctx: *mut SketchContext,
    x: f64,
    y: f64,
    tol: f64,
    out_x: *mut f64,
    out_y: *mut f64,
    out_kind: *mut i32,
) -> i32 {
    let Some(best) = context(ctx).and_then(|s| snap::best_snap(s.snap_candidates(x, y, tol))) else {
        return -2;
    };
    if !out_x.is_null() {
        *out_x = best.position[0];
    }
    if !out_y.is_null() {
        *out_y = best.position[1];
    }
    if !out_kind.is_null() {
        *out_kind = best.snap_type.code();
    }
    best.source.map_or(INVALID, |h| to_handle(h.0))
}

/// Writes up to `capacity` snap candidates as `(x, y, kind, source)` quadruples
/// into `out` and returns the total number found. `source` is -1 when absent.
///
/// # Safety
/// `ctx` must be null or a live context; `out` must be null or valid for
/// `4 * capacity` writes.
#[no_mangle]
pub unsafe extern "C" fn sketch_snap_candidates(
    ctx: *mut SketchContext,
    x: f64,
    y: f64,
    tol: f64,
    out: *mut f64,
    capacity: u32,
) -> i32 {
    let Some(sketch) = context(ctx) else {
        return INVALID;
    };
    let snaps = sketch.snap_candidates(x, y, tol);
    if !out.is_null() {
        let out = std::slice::from_raw_parts_mut(out, 4 * capacity as usize);
        for (chunk, s) in out.chunks_exact_mut(4).zip(&snaps) {
            chunk[0] = s.position[0];
            chunk[1] = s.position[1];
            chunk[2] = f64::from(s.snap_type.code());
            chunk[3] = s.source.map_or(-1.0, |h| f64::from(h.0));
        }
    }
    i32::try_from(snaps.len()).unwrap_or(i32::MAX)
}
