//! Levenberg-Marquardt constraint solver.
//!
//! The variable vector holds the coordinates of every free representative
//! point, in handle order. Fixed classes contribute constants. Each outer
//! iteration solves the damped normal equations `(JᵀJ + λI) δ = -Jᵀr` with a
//! dense Cholesky factorization and keeps the step only if it lowers `‖r‖`.

use std::fmt;
use std::time::Instant;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::constraint::Constraint;
use super::points::{PointHandle, PointStore};

/// Configuration for the Levenberg-Marquardt solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub max_iterations: usize,
    /// Convergence threshold on the largest absolute residual.
    pub tolerance: f64,
    pub lambda_initial: f64,
    /// Damping is divided by this on an accepted step and multiplied on a rejected one.
    pub lambda_factor: f64,
    pub lambda_min: f64,
    pub lambda_max: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-6,
            lambda_initial: 1e-3,
            lambda_factor: 10.0,
            lambda_min: 1e-9,
            lambda_max: 1e9,
        }
    }
}

impl SolverConfig {
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_lambda_initial(mut self, lambda: f64) -> Self {
        self.lambda_initial = lambda;
        self
    }

    pub fn with_lambda_factor(mut self, factor: f64) -> Self {
        self.lambda_factor = factor;
        self
    }

    pub fn with_lambda_bounds(mut self, min: f64, max: f64) -> Self {
        self.lambda_min = min;
        self.lambda_max = max;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolveStatus {
    Converged,
    /// Iteration budget spent or no further progress possible.
    NotConverged,
    /// A residual or step went non-finite; coordinates were left untouched.
    NumericFailure,
    DeadlineExpired,
}

/// Result of constraint solving
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveResult {
    /// Whether the largest residual reached the tolerance
    pub converged: bool,
    /// Number of LM iterations performed (accepted and rejected)
    pub iterations: usize,
    /// Largest absolute residual at the returned coordinates
    pub max_error: f64,
    /// Free scalar variables minus residual equations.
    /// Negative = over-constrained, 0 = fully constrained, positive = under-constrained
    pub dof: i32,
    pub status: SolveStatus,
}

impl SolveResult {
    /// Returns true if sketch is fully constrained (DOF = 0)
    pub fn is_fully_constrained(&self) -> bool {
        self.dof == 0 && self.converged
    }

    /// Returns true if sketch is under-constrained (DOF > 0)
    pub fn is_under_constrained(&self) -> bool {
        self.dof > 0
    }

    /// Returns true if sketch is over-constrained (DOF < 0 or didn't converge)
    pub fn is_over_constrained(&self) -> bool {
        self.dof < 0 || !self.converged
    }
}

/// Diagnostic events passed to the solver observer together with a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverEvent {
    /// Value: number of free scalar variables.
    Started,
    /// Value: residual norm after the step.
    StepAccepted,
    /// Value: damping after the rejection.
    StepRejected,
    /// Value: largest residual.
    Converged,
    /// Value: largest residual.
    NotConverged,
    /// Value: damping at the point of failure.
    NumericFailure,
    /// Value: largest residual.
    DeadlineExpired,
    /// Value: residual norm. Emitted when a step is rejected at maximum damping.
    Stagnated,
}

impl SolverEvent {
    /// Stable numeric tag for hosts.
    pub fn tag(self) -> u32 {
        match self {
            SolverEvent::Started => 0,
            SolverEvent::StepAccepted => 1,
            SolverEvent::StepRejected => 2,
            SolverEvent::Converged => 3,
            SolverEvent::NotConverged => 4,
            SolverEvent::NumericFailure => 5,
            SolverEvent::DeadlineExpired => 6,
            SolverEvent::Stagnated => 7,
        }
    }
}

pub type SolverObserver = Box<dyn FnMut(SolverEvent, f64)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepOutcome {
    Accepted,
    Rejected,
    Stagnated,
    NumericFailure,
}

/// Mapping between point handles and solver variables for one solve.
struct Layout {
    /// Handle index -> representative index.
    rep: Vec<u32>,
    /// Representative index -> variable pair.
    column: Vec<Option<usize>>,
    /// Representative index -> coordinates used for fixed classes.
    frozen: Vec<[f64; 2]>,
    /// Free representatives in column order.
    free: Vec<PointHandle>,
}

impl Layout {
    fn build(points: &PointStore) -> Self {
        let cap = points.capacity();
        let mut rep = Vec::with_capacity(cap);
        let mut column = vec![None; cap];
        let mut frozen = vec![[0.0; 2]; cap];
        let mut free = Vec::new();

        for i in 0..cap {
            let h = PointHandle(i as u32);
            rep.push(points.resolve(h).unwrap_or(h).0);
        }
        for r in points.representatives() {
            let pos = points.position(r).unwrap_or([0.0; 2]);
            if points.is_fixed(r).unwrap_or(true) {
                frozen[r.index()] = pos;
            } else {
                column[r.index()] = Some(free.len());
                free.push(r);
            }
        }
        Self { rep, column, frozen, free }
    }

    fn column_of(&self, h: PointHandle) -> Option<usize> {
        let r = *self.rep.get(h.index())? as usize;
        self.column[r]
    }

    fn position(&self, x: &[f64], h: PointHandle) -> [f64; 2] {
        let Some(&r) = self.rep.get(h.index()) else {
            return [f64::NAN; 2];
        };
        match self.column[r as usize] {
            Some(c) => [x[2 * c], x[2 * c + 1]],
            None => self.frozen[r as usize],
        }
    }
}

/// Damped least-squares solver. Owns its working buffers and reuses them
/// across calls; the damping state survives between `step` calls.
pub struct Solver {
    config: SolverConfig,
    lambda: f64,
    x: Vec<f64>,
    x_try: Vec<f64>,
    r: Vec<f64>,
    r_try: Vec<f64>,
    jac: DMatrix<f64>,
    observer: Option<SolverObserver>,
}

impl fmt::Debug for Solver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Solver")
            .field("config", &self.config)
            .field("lambda", &self.lambda)
            .field("observer", &self.observer.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for Solver {
    fn default() -> Self {
        Self::new(SolverConfig::default())
    }
}

impl Solver {
    pub fn new(config: SolverConfig) -> Self {
        Self {
            lambda: config.lambda_initial,
            config,
            x: Vec::new(),
            x_try: Vec::new(),
            r: Vec::new(),
            r_try: Vec::new(),
            jac: DMatrix::zeros(0, 0),
            observer: None,
        }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: SolverConfig) {
        self.lambda = config.lambda_initial;
        self.config = config;
    }

    pub fn config_mut(&mut self) -> &mut SolverConfig {
        &mut self.config
    }

    /// Current damping factor.
    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    /// Resets the damping carried between `step` calls.
    pub fn reset(&mut self) {
        self.lambda = self.config.lambda_initial;
    }

    pub fn set_observer(&mut self, observer: Option<SolverObserver>) {
        self.observer = observer;
    }

    fn emit(&mut self, event: SolverEvent, value: f64) {
        if let Some(observer) = self.observer.as_mut() {
            observer(event, value);
        }
    }

    /// Runs LM iterations until convergence, the iteration budget, the
    /// optional deadline, stagnation, or a numeric failure. Free
    /// representatives receive the final iterate unless the solve failed
    /// numerically, in which case the store is not touched.
    pub fn solve(
        &mut self,
        points: &mut PointStore,
        constraints: &[&Constraint],
        deadline: Option<Instant>,
    ) -> SolveResult {
        let layout = self.load(points, constraints);
        let dof = self.x.len() as i32 - self.r.len() as i32;
        let initial_error = max_abs(&self.r);
        self.lambda = self.config.lambda_initial;

        debug!(
            variables = self.x.len(),
            equations = self.r.len(),
            dof,
            initial_error,
            "Starting sketch solve"
        );
        self.emit(SolverEvent::Started, self.x.len() as f64);

        let mut iterations = 0;
        let status = if !all_finite(&self.r) {
            SolveStatus::NumericFailure
        } else {
            loop {
                let max_error = max_abs(&self.r);
                if max_error <= self.config.tolerance {
                    break SolveStatus::Converged;
                }
                if self.x.is_empty() || iterations >= self.config.max_iterations {
                    break SolveStatus::NotConverged;
                }
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    break SolveStatus::DeadlineExpired;
                }
                iterations += 1;
                match self.iterate(&layout, constraints, iterations) {
                    StepOutcome::Accepted | StepOutcome::Rejected => {}
                    StepOutcome::Stagnated => break SolveStatus::NotConverged,
                    StepOutcome::NumericFailure => break SolveStatus::NumericFailure,
                }
            }
        };

        let max_error = if status == SolveStatus::NumericFailure {
            warn!(iterations, lambda = self.lambda, "Sketch solve hit a non-finite value, coordinates reverted");
            self.emit(SolverEvent::NumericFailure, self.lambda);
            initial_error
        } else {
            self.write_back(&layout, points);
            max_abs(&self.r)
        };

        match status {
            SolveStatus::Converged => {
                debug!(iterations, max_error, "Sketch solve converged");
                self.emit(SolverEvent::Converged, max_error);
            }
            SolveStatus::NotConverged => {
                debug!(iterations, max_error, "Sketch solve did not converge");
                self.emit(SolverEvent::NotConverged, max_error);
            }
            SolveStatus::DeadlineExpired => {
                debug!(iterations, max_error, "Sketch solve deadline expired");
                self.emit(SolverEvent::DeadlineExpired, max_error);
            }
            SolveStatus::NumericFailure => {}
        }

        SolveResult {
            converged: status == SolveStatus::Converged,
            iterations,
            max_error,
            dof,
            status,
        }
    }

    /// Performs at most one LM iteration with the damping left by the
    /// previous call. An accepted iterate is written back.
    pub fn step(&mut self, points: &mut PointStore, constraints: &[&Constraint]) -> SolveResult {
        let layout = self.load(points, constraints);
        let dof = self.x.len() as i32 - self.r.len() as i32;
        let initial_error = max_abs(&self.r);

        let (status, iterations) = if !all_finite(&self.r) {
            (SolveStatus::NumericFailure, 0)
        } else if initial_error <= self.config.tolerance {
            (SolveStatus::Converged, 0)
        } else if self.x.is_empty() {
            (SolveStatus::NotConverged, 0)
        } else {
            match self.iterate(&layout, constraints, 1) {
                StepOutcome::NumericFailure => (SolveStatus::NumericFailure, 1),
                StepOutcome::Accepted if max_abs(&self.r) <= self.config.tolerance => {
                    (SolveStatus::Converged, 1)
                }
                _ => (SolveStatus::NotConverged, 1),
            }
        };

        let max_error = if status == SolveStatus::NumericFailure {
            self.emit(SolverEvent::NumericFailure, self.lambda);
            initial_error
        } else {
            self.write_back(&layout, points);
            max_abs(&self.r)
        };

        SolveResult {
            converged: status == SolveStatus::Converged,
            iterations,
            max_error,
            dof,
            status,
        }
    }

    /// Builds the variable layout, loads the free coordinates into `x`,
    /// evaluates `r` and sizes the Jacobian.
    fn load(&mut self, points: &PointStore, constraints: &[&Constraint]) -> Layout {
        let layout = Layout::build(points);

        self.x.clear();
        for &h in &layout.free {
            let [px, py] = points.position(h).unwrap_or([0.0; 2]);
            self.x.push(px);
            self.x.push(py);
        }

        let mut r = std::mem::take(&mut self.r);
        evaluate(&layout, &self.x, constraints, &mut r);
        self.r = r;

        let (m, n) = (self.r.len(), self.x.len());
        if self.jac.shape() != (m, n) {
            self.jac = DMatrix::zeros(m, n);
        }
        layout
    }

    fn iterate(&mut self, layout: &Layout, constraints: &[&Constraint], iteration: usize) -> StepOutcome {
        fill_jacobian(layout, &self.x, constraints, &mut self.jac);
        if self.jac.iter().any(|v| !v.is_finite()) {
            return StepOutcome::NumericFailure;
        }

        let r = DVector::from_column_slice(&self.r);
        let gradient = self.jac.tr_mul(&r);
        let mut normal = self.jac.tr_mul(&self.jac);
        for i in 0..normal.nrows() {
            normal[(i, i)] += self.lambda;
        }

        let delta = match normal.cholesky() {
            Some(chol) => chol.solve(&gradient),
            None => return self.reject(iteration, norm(&self.r)),
        };
        if delta.iter().any(|v| !v.is_finite()) {
            return StepOutcome::NumericFailure;
        }

        self.x_try.clear();
        self.x_try.extend(self.x.iter().zip(delta.iter()).map(|(x, d)| x - d));
        let mut r_try = std::mem::take(&mut self.r_try);
        evaluate(layout, &self.x_try, constraints, &mut r_try);
        self.r_try = r_try;
        if !all_finite(&self.r_try) {
            return StepOutcome::NumericFailure;
        }

        let current = norm(&self.r);
        let trial = norm(&self.r_try);
        if trial < current {
            std::mem::swap(&mut self.x, &mut self.x_try);
            std::mem::swap(&mut self.r, &mut self.r_try);
            self.lambda = (self.lambda / self.config.lambda_factor).max(self.config.lambda_min);
            trace!(iteration, lambda = self.lambda, residual = trial, "LM step accepted");
            self.emit(SolverEvent::StepAccepted, trial);
            StepOutcome::Accepted
        } else {
            self.reject(iteration, current)
        }
    }

    fn reject(&mut self, iteration: usize, residual: f64) -> StepOutcome {
        if self.lambda >= self.config.lambda_max {
            debug!(iteration, residual, "LM stagnated at maximum damping");
            self.emit(SolverEvent::Stagnated, residual);
            return StepOutcome::Stagnated;
        }
        self.lambda = (self.lambda * self.config.lambda_factor).min(self.config.lambda_max);
        trace!(iteration, lambda = self.lambda, residual, "LM step rejected");
        self.emit(SolverEvent::StepRejected, self.lambda);
        StepOutcome::Rejected
    }

    fn write_back(&self, layout: &Layout, points: &mut PointStore) {
        for (c, &h) in layout.free.iter().enumerate() {
            points.write_solved(h, [self.x[2 * c], self.x[2 * c + 1]]);
        }
    }
}

fn evaluate(layout: &Layout, x: &[f64], constraints: &[&Constraint], out: &mut Vec<f64>) {
    out.clear();
    let at = |h: PointHandle| layout.position(x, h);
    for c in constraints {
        c.residuals(&at, out);
    }
}

fn fill_jacobian(layout: &Layout, x: &[f64], constraints: &[&Constraint], jac: &mut DMatrix<f64>) {
    jac.fill(0.0);
    let at = |h: PointHandle| layout.position(x, h);
    let mut row0 = 0;
    for c in constraints {
        c.jacobian(&at, &mut |row: usize, h: PointHandle, g: [f64; 2]| {
            if let Some(col) = layout.column_of(h) {
                jac[(row0 + row, 2 * col)] += g[0];
                jac[(row0 + row, 2 * col + 1)] += g[1];
            }
        });
        row0 += c.equation_count();
    }
}

fn max_abs(v: &[f64]) -> f64 {
    v.iter().map(|x| x.abs()).fold(0.0, f64::max)
}

fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

fn all_finite(v: &[f64]) -> bool {
    v.iter().all(|x| x.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_default_config() {
        let config = SolverConfig::default();
        assert_eq!(config.max_iterations, 100);
        assert_eq!(config.tolerance, 1e-6);
        assert_eq!(config.lambda_initial, 1e-3);
        assert_eq!(config.lambda_factor, 10.0);
        assert_eq!(config.lambda_min, 1e-9);
        assert_eq!(config.lambda_max, 1e9);
    }

    #[test]
    fn test_config_builders_and_serde_defaults() {
        let config = SolverConfig::default().with_max_iterations(7).with_tolerance(1e-9);
        assert_eq!(config.max_iterations, 7);
        assert_eq!(config.tolerance, 1e-9);

        let parsed: SolverConfig = serde_json::from_str(r#"{"max_iterations": 3}"#).unwrap();
        assert_eq!(parsed.max_iterations, 3);
        assert_eq!(parsed.lambda_max, 1e9);
    }

    #[test]
    fn test_empty_system_converges_trivially() {
        let mut points = PointStore::new();
        let mut solver = Solver::default();
        let result = solver.solve(&mut points, &[], None);
        assert!(result.converged);
        assert_eq!(result.iterations, 0);
        assert_eq!(result.max_error, 0.0);
        assert_eq!(result.dof, 0);
    }

    #[test]
    fn test_free_point_without_constraints_is_under_constrained() {
        let mut points = PointStore::new();
        points.create_point(1.0, 2.0, false);
        let result = Solver::default().solve(&mut points, &[], None);
        assert!(result.converged);
        assert_eq!(result.dof, 2);
        assert!(result.is_under_constrained());
    }

    #[test]
    fn test_non_finite_residual_reverts() {
        let mut points = PointStore::new();
        let a = points.create_point(0.0, 0.0, true);
        let b = points.create_point(1.0, 0.0, false);
        // value^2 overflows to infinity.
        let c = Constraint::Distance { p: a, q: b, value: 1e200 };
        let result = Solver::default().solve(&mut points, &[&c], None);
        assert!(!result.converged);
        assert_eq!(result.status, SolveStatus::NumericFailure);
        assert_eq!(points.position(b).unwrap(), [1.0, 0.0]);
    }

    #[test]
    fn test_expired_deadline_keeps_coordinates() {
        let mut points = PointStore::new();
        let a = points.create_point(0.0, 0.0, true);
        let b = points.create_point(10.0, 0.5, false);
        let c = Constraint::Horizontal { p: a, q: b };
        let result = Solver::default().solve(&mut points, &[&c], Some(Instant::now()));
        assert!(!result.converged);
        assert_eq!(result.status, SolveStatus::DeadlineExpired);
        assert_eq!(result.iterations, 0);
        assert_abs_diff_eq!(result.max_error, 0.5);
        assert_eq!(points.position(b).unwrap(), [10.0, 0.5]);
    }

    #[test]
    fn test_step_carries_damping() {
        let mut points = PointStore::new();
        let a = points.create_point(0.0, 0.0, true);
        let b = points.create_point(1.0, 0.0, false);
        let c = Constraint::Distance { p: a, q: b, value: 5.0 };
        let mut solver = Solver::default();

        // The first full-size step overshoots and is rejected.
        let first = solver.step(&mut points, &[&c]);
        assert_eq!(first.iterations, 1);
        assert!(!first.converged);
        assert_abs_diff_eq!(solver.lambda(), 1e-2, epsilon = 1e-15);

        let mut last = first;
        for _ in 0..100 {
            last = solver.step(&mut points, &[&c]);
            if last.converged {
                break;
            }
        }
        assert!(last.converged);
        let [x, _] = points.position(b).unwrap();
        assert_abs_diff_eq!(x, 5.0, epsilon = 1e-6);
    }

    #[test]
    fn test_observer_receives_events() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);

        let mut points = PointStore::new();
        let a = points.create_point(0.0, 0.0, true);
        let b = points.create_point(10.0, 0.5, false);
        let c = Constraint::Horizontal { p: a, q: b };

        let mut solver = Solver::default();
        solver.set_observer(Some(Box::new(move |event, value| {
            sink.borrow_mut().push((event.tag(), value));
        })));
        let result = solver.solve(&mut points, &[&c], None);
        assert!(result.converged);

        let events = events.borrow();
        assert_eq!(events.first().map(|e| e.0), Some(SolverEvent::Started.tag()));
        assert_eq!(events.last().map(|e| e.0), Some(SolverEvent::Converged.tag()));
        assert!(events.iter().any(|e| e.0 == SolverEvent::StepAccepted.tag()));
    }

    #[test]
    fn test_stagnation_stops_early() {
        // Two fixed-direction requirements on one coordinate that cannot both hold.
        let mut points = PointStore::new();
        let a = points.create_point(0.0, 0.0, true);
        let b = points.create_point(0.0, 3.0, true);
        let p = points.create_point(1.0, 1.0, false);
        let c1 = Constraint::Horizontal { p: a, q: p };
        let c2 = Constraint::Horizontal { p: b, q: p };
        let result = Solver::default().solve(&mut points, &[&c1, &c2], None);
        assert!(!result.converged);
        assert_eq!(result.status, SolveStatus::NotConverged);
        assert_abs_diff_eq!(result.max_error, 1.5, epsilon = 1e-6);
        assert!(result.iterations < 100);
    }
}
