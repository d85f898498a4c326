use super::*;
use approx::assert_abs_diff_eq;
use std::f64::consts::{FRAC_PI_2, PI, TAU};

#[test]
fn test_find_closest_point_tie_breaks_by_handle() {
    let mut sketch = Sketch::new();
    let a = sketch.add_point(1.0, 0.0, false);
    let _b = sketch.add_point(-1.0, 0.0, false);
    assert_eq!(sketch.find_closest_point(0.0, 0.0, 2.0), Some(a));
    assert_eq!(sketch.find_closest_point(0.0, 0.0, 0.5), None);
}

#[test]
fn test_find_closest_point_reports_representative() {
    let mut sketch = Sketch::new();
    let a = sketch.add_point(0.0, 0.0, false);
    let b = sketch.add_point(5.0, 5.0, false);
    sketch.union(b, a).unwrap();
    assert_eq!(sketch.find_closest_point(0.1, 0.0, 1.0), Some(a));
    assert_eq!(sketch.find_closest_point(5.0, 5.0, 1.0), None);
}

#[test]
fn test_find_closest_shape() {
    let mut sketch = Sketch::new();
    let a = sketch.add_point(0.0, 0.0, false);
    let b = sketch.add_point(10.0, 0.0, false);
    let c = sketch.add_point(5.0, 5.0, false);
    let seg = sketch.add_segment(a, b).unwrap();
    let circle = sketch.add_circle(c, 2.0).unwrap();

    assert_eq!(sketch.find_closest_shape(5.0, 0.1, 0.5), Some((GeometryKind::Segment, seg)));
    assert_eq!(sketch.find_closest_shape(5.0, 3.1, 0.5), Some((GeometryKind::Circle, circle)));
    // Beyond the segment end the distance is to the end point, not the line.
    assert_eq!(sketch.find_closest_shape(12.0, 0.0, 0.5), None);
}

#[test]
fn test_hidden_and_preview_shapes_are_not_picked() {
    let mut sketch = Sketch::new();
    let a = sketch.add_point(0.0, 0.0, false);
    let b = sketch.add_point(10.0, 0.0, false);
    let seg = sketch.add_segment(a, b).unwrap();
    assert_eq!(sketch.flags(seg).unwrap(), GeometryFlags::VISIBLE);

    sketch.set_flags(seg, GeometryFlags(0)).unwrap();
    assert_eq!(sketch.find_closest_shape(5.0, 0.1, 0.5), None);

    sketch.set_flags(seg, GeometryFlags::VISIBLE | GeometryFlags::PREVIEW).unwrap();
    assert_eq!(sketch.find_closest_shape(5.0, 0.1, 0.5), None);

    sketch.set_flags(seg, GeometryFlags::VISIBLE | GeometryFlags::SELECTED).unwrap();
    assert!(sketch.find_closest_shape(5.0, 0.1, 0.5).is_some());
}

#[test]
fn test_arc_picking_respects_sweep() {
    let mut sketch = Sketch::new();
    let c = sketch.add_point(0.0, 0.0, false);
    let arc = sketch.add_arc(c, 1.0, 0.0, FRAC_PI_2).unwrap();

    let s = std::f64::consts::FRAC_1_SQRT_2;
    assert_eq!(sketch.find_closest_shape(s, s, 0.1), Some((GeometryKind::Arc, arc)));
    assert_eq!(sketch.find_closest_shape(-1.0, 0.0, 0.1), None);
}

#[test]
fn test_arc_normalization() {
    let mut sketch = Sketch::new();
    let c = sketch.add_point(0.0, 0.0, false);

    let full = sketch.add_arc(c, 1.0, 1.0, 1.0).unwrap();
    match sketch.shape(full).unwrap().geometry {
        Geometry::Arc { start_angle, end_angle, .. } => {
            assert_abs_diff_eq!(end_angle - start_angle, TAU, epsilon = 1e-12);
        }
        _ => panic!("expected an arc"),
    }

    let wrapped = sketch.add_arc(c, 1.0, -FRAC_PI_2, PI).unwrap();
    match sketch.shape(wrapped).unwrap().geometry {
        Geometry::Arc { start_angle, end_angle, .. } => {
            assert_abs_diff_eq!(start_angle, 1.5 * PI, epsilon = 1e-12);
            assert_abs_diff_eq!(end_angle - start_angle, 1.5 * PI, epsilon = 1e-12);
        }
        _ => panic!("expected an arc"),
    }
}

#[test]
fn test_remove_point_in_use() {
    let mut sketch = Sketch::new();
    let a = sketch.add_point(0.0, 0.0, false);
    let b = sketch.add_point(1.0, 0.0, false);
    let alias = sketch.add_point(2.0, 0.0, false);
    let seg = sketch.add_segment(a, b).unwrap();
    sketch.union(a, alias).unwrap();

    assert_eq!(sketch.remove_point(alias), Err(SketchError::PointInUse(alias)));
    assert!(sketch.position(alias).is_ok());

    sketch.remove_shape(seg).unwrap();
    sketch.remove_point(alias).unwrap();
    assert!(sketch.position(a).is_err());
    assert!(sketch.position(b).is_ok());
}

#[test]
fn test_remove_point_referenced_by_constraint() {
    let mut sketch = Sketch::new();
    let a = sketch.add_point(0.0, 0.0, false);
    let b = sketch.add_point(1.0, 0.0, false);
    let c = sketch.add_constraint(Constraint::Horizontal { p: a, q: b }).unwrap();

    assert!(sketch.remove_point(b).is_err());
    sketch.remove_constraint(c).unwrap();
    assert!(sketch.remove_point(b).is_ok());
}

#[test]
fn test_remove_constraint_keeps_other_residuals() {
    let mut sketch = Sketch::new();
    let a = sketch.add_point(0.0, 0.0, true);
    let b = sketch.add_point(3.0, 1.0, false);
    let keep = sketch.add_constraint(Constraint::Horizontal { p: a, q: b }).unwrap();
    let before = sketch.residuals();

    let extra = sketch.add_constraint(Constraint::Distance { p: a, q: b, value: 2.0 }).unwrap();
    assert_eq!(sketch.constraint_count(), 2);
    sketch.remove_constraint(extra).unwrap();

    assert_eq!(sketch.residuals(), before);
    assert_eq!(before[0].0, keep);
    assert!(matches!(sketch.remove_constraint(extra), Err(SketchError::UnknownConstraint(_))));
}

#[test]
fn test_rejected_constraints_leave_scene_untouched() {
    let mut sketch = Sketch::new();
    let a = sketch.add_point(0.0, 0.0, false);
    let b = sketch.add_point(1.0, 0.0, false);
    sketch.union(a, b).unwrap();

    // Freshly unioned points are the same point.
    assert!(sketch.add_constraint(Constraint::Distance { p: a, q: b, value: 1.0 }).is_err());
    assert!(sketch
        .add_constraint(Constraint::Horizontal { p: a, q: PointHandle(99) })
        .is_err());
    assert_eq!(sketch.constraint_count(), 0);

    // A horizontal between coincident points is trivially satisfied.
    assert!(sketch.add_constraint(Constraint::Horizontal { p: a, q: b }).is_ok());
}

#[test]
fn test_set_position_on_fixed_point() {
    let mut sketch = Sketch::new();
    let a = sketch.add_point(1.0, 2.0, true);
    assert_eq!(sketch.set_position(a, 5.0, 5.0), Err(SketchError::FixedPoint(a)));
    assert_eq!(sketch.position(a).unwrap(), [1.0, 2.0]);

    sketch.set_fixed(a, false).unwrap();
    sketch.set_position(a, 5.0, 5.0).unwrap();
    assert_eq!(sketch.position(a).unwrap(), [5.0, 5.0]);
}

#[test]
fn test_scene_helpers() {
    let mut sketch = Sketch::new();
    let a = sketch.add_point(0.0, 0.0, true);
    let b = sketch.add_point(10.0, 0.0, true);
    let c = sketch.add_point(5.0, 2.5, false);
    let seg = sketch.add_segment(a, b).unwrap();
    let circle = sketch.add_circle(c, 3.0).unwrap();

    let t = sketch.add_tangent(seg, circle).unwrap();
    assert!(matches!(
        sketch.constraint(t).unwrap(),
        Constraint::Tangent { radius: RadiusRef::Value(r), .. } if *r == 3.0
    ));

    assert!(matches!(
        sketch.add_tangent(circle, seg),
        Err(SketchError::WrongShapeKind { .. })
    ));
    assert!(matches!(
        sketch.add_on_line(c, circle),
        Err(SketchError::WrongShapeKind { .. })
    ));

    let h = sketch.add_horizontal_segment(seg).unwrap();
    assert_eq!(sketch.constraint(h).unwrap().code(), constraint::CONSTRAINT_HORIZONTAL);
    let v = sketch.add_vertical_segment(seg).unwrap();
    assert_eq!(sketch.constraint(v).unwrap().code(), constraint::CONSTRAINT_VERTICAL);
}

#[test]
fn test_set_constraint_value() {
    let mut sketch = Sketch::new();
    let a = sketch.add_point(0.0, 0.0, true);
    let b = sketch.add_point(1.0, 0.0, false);
    let d = sketch.add_constraint(Constraint::Distance { p: a, q: b, value: 5.0 }).unwrap();
    assert!(sketch.solve().converged);

    sketch.set_constraint_value(d, 2.0).unwrap();
    assert!(sketch.set_constraint_value(d, -1.0).is_err());
    assert_eq!(sketch.constraint(d).unwrap().value(), Some(2.0));

    assert!(sketch.solve().converged);
    assert_abs_diff_eq!(sketch.position(b).unwrap()[0], 2.0, epsilon = 1e-6);
}

#[test]
fn test_clear_scene_does_not_reuse_handles() {
    let mut sketch = Sketch::new();
    let a = sketch.add_point(0.0, 0.0, false);
    let b = sketch.add_point(1.0, 0.0, false);
    let seg = sketch.add_segment(a, b).unwrap();
    sketch.add_constraint(Constraint::Horizontal { p: a, q: b }).unwrap();

    sketch.clear_scene();
    assert_eq!(sketch.shape_count(), 0);
    assert_eq!(sketch.constraint_count(), 0);
    assert!(sketch.position(a).is_err());
    assert!(sketch.shape(seg).is_err());

    assert_eq!(sketch.add_point(0.0, 0.0, false), PointHandle(2));
    assert!(sketch.solve().converged);
}

#[test]
fn test_clear_constraints_keeps_geometry() {
    let mut sketch = Sketch::new();
    let a = sketch.add_point(0.0, 0.0, false);
    let b = sketch.add_point(1.0, 0.5, false);
    sketch.add_segment(a, b).unwrap();
    sketch.add_constraint(Constraint::Horizontal { p: a, q: b }).unwrap();

    sketch.clear_constraints();
    assert_eq!(sketch.constraint_count(), 0);
    assert_eq!(sketch.shape_count(), 1);
    assert_eq!(sketch.max_residual(), 0.0);
}

#[test]
fn test_snap_candidates_use_tolerance() {
    let mut sketch = Sketch::new();
    let a = sketch.add_point(0.0, 0.0, false);
    let b = sketch.add_point(10.0, 0.0, false);
    let seg = sketch.add_segment(a, b).unwrap();

    let near = sketch.snap_candidates(0.3, 0.0, 0.5);
    assert_eq!(near.len(), 1);
    assert_eq!(near[0].snap_type, SnapType::Endpoint);
    assert_eq!(near[0].source, Some(seg));

    assert!(sketch.snap_candidates(0.3, 0.0, 0.1).is_empty());
    assert_eq!(sketch.snap_candidates(5.0, 0.0, 5.0).len(), 3);

    let best = sketch.snap_cursor(4.8, 0.1).expect("midpoint snap");
    assert_eq!(best.snap_type, SnapType::Midpoint);
}

#[test]
fn test_bounding_box() {
    let mut sketch = Sketch::new();
    assert!(sketch.bounding_box().is_empty());

    let a = sketch.add_point(0.0, 0.0, false);
    let b = sketch.add_point(4.0, 1.0, false);
    let c = sketch.add_point(10.0, 10.0, false);
    sketch.add_segment(a, b).unwrap();
    sketch.add_circle(c, 1.0).unwrap();

    let bb = sketch.bounding_box();
    assert_eq!(bb.min, [0.0, 0.0]);
    assert_eq!(bb.max, [11.0, 11.0]);
}

#[test]
fn test_invalid_shape_inputs() {
    let mut sketch = Sketch::new();
    let c = sketch.add_point(0.0, 0.0, false);
    assert!(matches!(sketch.add_circle(c, -1.0), Err(SketchError::InvalidValue { .. })));
    assert!(matches!(sketch.add_arc(c, 1.0, f64::NAN, 0.0), Err(SketchError::InvalidValue { .. })));
    assert!(matches!(
        sketch.add_segment(c, PointHandle(7)),
        Err(SketchError::UnknownPoint(PointHandle(7)))
    ));
    assert_eq!(sketch.shape_count(), 0);
}
