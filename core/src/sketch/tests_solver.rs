use super::*;
use approx::assert_abs_diff_eq;
use std::f64::consts::FRAC_PI_4;
use std::time::{Duration, Instant};

fn horizontal_sketch() -> (Sketch, PointHandle, PointHandle) {
    let mut sketch = Sketch::new();
    let a = sketch.add_point(0.0, 0.0, true);
    let b = sketch.add_point(10.0, 0.5, false);
    sketch.add_segment(a, b).unwrap();
    sketch.add_constraint(Constraint::Horizontal { p: a, q: b }).unwrap();
    (sketch, a, b)
}

#[test]
fn test_already_converged_takes_no_iterations() {
    let (mut sketch, _, b) = horizontal_sketch();
    assert!(sketch.solve().converged);
    let before = sketch.position(b).unwrap();

    let again = sketch.solve();
    assert!(again.converged);
    assert_eq!(again.iterations, 0);
    assert_eq!(sketch.position(b).unwrap(), before);
}

#[test]
fn test_parallel_constraint() {
    let mut sketch = Sketch::new();
    let a = sketch.add_point(0.0, 0.0, true);
    let b = sketch.add_point(10.0, 0.0, true);
    let c = sketch.add_point(0.0, 5.0, true);
    let d = sketch.add_point(10.0, 7.0, false);
    sketch.add_constraint(Constraint::Parallel { p1: a, p2: b, p3: c, p4: d }).unwrap();

    let result = sketch.solve();
    assert!(result.converged);
    let [dx, dy] = sketch.position(d).unwrap();
    assert_abs_diff_eq!(dy, 5.0, epsilon = 1e-6);
    assert_abs_diff_eq!(dx, 10.0, epsilon = 1e-6);
}

#[test]
fn test_angle_constraint() {
    let mut sketch = Sketch::new();
    let a = sketch.add_point(0.0, 0.0, true);
    let b = sketch.add_point(1.0, 0.0, true);
    let d = sketch.add_point(1.0, 0.2, false);
    sketch
        .add_constraint(Constraint::Angle { p1: a, p2: b, p3: a, p4: d, value: FRAC_PI_4 })
        .unwrap();

    let result = sketch.solve();
    assert!(result.converged);
    let [x, y] = sketch.position(d).unwrap();
    assert_abs_diff_eq!(y.atan2(x), FRAC_PI_4, epsilon = 1e-6);
}

#[test]
fn test_tangent_with_radius_point() {
    let mut sketch = Sketch::new();
    let a = sketch.add_point(0.0, 0.0, true);
    let b = sketch.add_point(10.0, 0.0, true);
    let c = sketch.add_point(5.0, 2.0, true);
    let rim = sketch.add_point(5.0, 5.0, false);
    sketch
        .add_constraint(Constraint::Tangent { p1: a, p2: b, center: c, radius: RadiusRef::Point(rim) })
        .unwrap();

    let result = sketch.solve();
    assert!(result.converged);
    let [rx, ry] = sketch.position(rim).unwrap();
    assert_abs_diff_eq!((rx - 5.0).hypot(ry - 2.0), 2.0, epsilon = 1e-6);
}

#[test]
fn test_on_line_constraint() {
    let mut sketch = Sketch::new();
    let a = sketch.add_point(0.0, 0.0, true);
    let b = sketch.add_point(10.0, 10.0, true);
    let seg = sketch.add_segment(a, b).unwrap();
    let p = sketch.add_point(3.0, 7.0, false);
    sketch.add_on_line(p, seg).unwrap();

    let result = sketch.solve();
    assert!(result.converged);
    let [x, y] = sketch.position(p).unwrap();
    assert_abs_diff_eq!(x, y, epsilon = 1e-5);
    // Minimum-norm correction is the orthogonal projection.
    assert_abs_diff_eq!(x, 5.0, epsilon = 1e-5);
}

#[test]
fn test_equal_length_constraint() {
    let mut sketch = Sketch::new();
    let a = sketch.add_point(0.0, 0.0, true);
    let b = sketch.add_point(3.0, 4.0, true);
    let c = sketch.add_point(10.0, 0.0, true);
    let d = sketch.add_point(12.0, 0.0, false);
    sketch.add_constraint(Constraint::EqualLength { p1: a, p2: b, p3: c, p4: d }).unwrap();

    assert!(sketch.solve().converged);
    let [dx, dy] = sketch.position(d).unwrap();
    assert_abs_diff_eq!((dx - 10.0).hypot(dy), 5.0, epsilon = 1e-6);
}

#[test]
fn test_raw_coincident_constraint() {
    let mut sketch = Sketch::new();
    let a = sketch.add_point(0.0, 0.0, true);
    let b = sketch.add_point(2.0, 3.0, false);
    sketch.add_constraint(Constraint::Coincident { p: a, q: b }).unwrap();

    let result = sketch.solve();
    assert!(result.converged);
    assert_eq!(result.dof, 0);
    let [x, y] = sketch.position(b).unwrap();
    assert_abs_diff_eq!(x, 0.0, epsilon = 1e-6);
    assert_abs_diff_eq!(y, 0.0, epsilon = 1e-6);
    // The raw form keeps two handles with two coordinate sets.
    assert_ne!(sketch.points().resolve(a).unwrap(), sketch.points().resolve(b).unwrap());
}

#[test]
fn test_fixed_constraint_holds_snapshot() {
    let mut sketch = Sketch::new();
    let p = sketch.add_point(1.0, 1.0, false);
    let q = sketch.add_point(4.0, 1.0, false);
    sketch.fix_point(p).unwrap();
    sketch.add_constraint(Constraint::Distance { p, q, value: 5.0 }).unwrap();

    let result = sketch.solve();
    assert!(result.converged);
    let [px, py] = sketch.position(p).unwrap();
    assert_abs_diff_eq!(px, 1.0, epsilon = 1e-5);
    assert_abs_diff_eq!(py, 1.0, epsilon = 1e-5);
    let [qx, qy] = sketch.position(q).unwrap();
    assert_abs_diff_eq!((qx - px).hypot(qy - py), 5.0, epsilon = 1e-6);
}

#[test]
fn test_union_removes_variables() {
    let mut sketch = Sketch::new();
    let a = sketch.add_point(0.0, 0.0, true);
    let b = sketch.add_point(3.0, 1.0, false);
    let c = sketch.add_point(3.0, 2.0, false);
    sketch.union(b, c).unwrap();
    sketch.add_constraint(Constraint::Horizontal { p: a, q: c }).unwrap();

    let result = sketch.solve();
    assert!(result.converged);
    assert_eq!(result.dof, 1);
    assert!(result.is_under_constrained());
    assert_eq!(sketch.position(b).unwrap(), sketch.position(c).unwrap());
    assert_abs_diff_eq!(sketch.position(b).unwrap()[1], 0.0, epsilon = 1e-6);
}

#[test]
fn test_fully_constrained_point() {
    let mut sketch = Sketch::new();
    let a = sketch.add_point(0.0, 0.0, true);
    let b = sketch.add_point(4.0, 0.3, false);
    sketch.add_constraint(Constraint::Horizontal { p: a, q: b }).unwrap();
    sketch.add_constraint(Constraint::Distance { p: a, q: b, value: 5.0 }).unwrap();

    let result = sketch.solve();
    assert!(result.converged);
    assert!(result.is_fully_constrained());
    assert!(!result.is_over_constrained());
}

#[test]
fn test_step_until_converged() {
    let (mut sketch, _, b) = horizontal_sketch();
    let mut steps = 0;
    loop {
        let result = sketch.step();
        steps += 1;
        if result.converged || steps > 10 {
            break;
        }
    }
    assert!(steps <= 4);
    assert_abs_diff_eq!(sketch.position(b).unwrap()[1], 0.0, epsilon = 1e-6);
    assert!(sketch.last_result().is_some_and(|r| r.converged));
}

#[test]
fn test_future_deadline_does_not_interfere() {
    let (mut sketch, _, _) = horizontal_sketch();
    let result = sketch.solve_with_deadline(Instant::now() + Duration::from_secs(60));
    assert!(result.converged);
    assert_eq!(result.status, SolveStatus::Converged);
}

#[test]
fn test_fixed_points_bit_identical() {
    let mut sketch = Sketch::new();
    let a = sketch.add_point(0.1, 0.2, true);
    let b = sketch.add_point(5.3, 0.0, true);
    let c = sketch.add_point(0.0, 5.0, false);
    sketch.add_constraint(Constraint::Perpendicular { p1: a, p2: b, p3: b, p4: c }).unwrap();
    sketch.add_constraint(Constraint::Distance { p: b, q: c, value: 5.0 }).unwrap();

    let (pa, pb) = (sketch.position(a).unwrap(), sketch.position(b).unwrap());
    sketch.solve();
    assert_eq!(sketch.position(a).unwrap(), pa);
    assert_eq!(sketch.position(b).unwrap(), pb);
}

#[test]
fn test_tolerance_from_config() {
    let config = SolverConfig::default().with_tolerance(0.6);
    let mut sketch = Sketch::with_solver_config(config);
    let a = sketch.add_point(0.0, 0.0, true);
    let b = sketch.add_point(10.0, 0.5, false);
    sketch.add_constraint(Constraint::Horizontal { p: a, q: b }).unwrap();

    let result = sketch.solve();
    assert!(result.converged);
    assert_eq!(result.iterations, 0);
    assert_eq!(sketch.position(b).unwrap(), [10.0, 0.5]);
}

#[test]
fn test_iteration_budget() {
    let config = SolverConfig::default().with_max_iterations(1);
    let mut sketch = Sketch::with_solver_config(config);
    let a = sketch.add_point(0.0, 0.0, true);
    let b = sketch.add_point(1.0, 0.0, false);
    sketch.add_constraint(Constraint::Distance { p: a, q: b, value: 5.0 }).unwrap();

    let result = sketch.solve();
    assert!(!result.converged);
    assert_eq!(result.iterations, 1);
    assert_eq!(result.status, SolveStatus::NotConverged);
}
