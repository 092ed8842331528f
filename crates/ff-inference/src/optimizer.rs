//! Optimization algorithms
//!
//! Thin wrapper around argmin's L-BFGS. Box constraints are handled by mapping
//! each bounded parameter onto an unbounded internal one.

use crate::hessian::{compute_hessian, invert_hessian};
use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason, TerminationStatus};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use ff_core::{Error, FitStatus, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Configuration for L-BFGS-B optimizer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Maximum number of iterations
    pub max_iter: u64,
    /// Convergence tolerance for gradient norm
    pub tol: f64,
    /// Number of corrections to approximate inverse Hessian
    pub m: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self { max_iter: 1000, tol: 1e-6, m: 10 }
    }
}

/// Result of optimization
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Best-fit parameters
    pub parameters: Vec<f64>,
    /// Function value at minimum
    pub fval: f64,
    /// Number of iterations
    pub n_iter: u64,
    /// Number of objective (cost) evaluations.
    pub n_fev: usize,
    /// Number of gradient evaluations.
    pub n_gev: usize,
    /// Exit status (converged, iteration limit, aborted)
    pub status: FitStatus,
    /// Termination message
    pub message: String,
}

impl OptimizationResult {
    /// Whether the solver reported convergence.
    pub fn converged(&self) -> bool {
        self.status.is_converged()
    }
}

impl fmt::Display for OptimizationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OptimizationResult(fval={:.6}, n_iter={}, n_fev={}, n_gev={}, status={})",
            self.fval, self.n_iter, self.n_fev, self.n_gev, self.status
        )
    }
}

/// Central-difference gradient with step `1e-8 * max(|x_i|, 1)`.
pub fn central_gradient<F>(f: F, params: &[f64]) -> Result<Vec<f64>>
where
    F: Fn(&[f64]) -> Result<f64>,
{
    let n = params.len();
    let mut grad = vec![0.0; n];
    let mut work = params.to_vec();

    for i in 0..n {
        let eps = 1e-8 * params[i].abs().max(1.0);

        work[i] = params[i] + eps;
        let f_plus = f(&work)?;

        work[i] = params[i] - eps;
        let f_minus = f(&work)?;

        work[i] = params[i];
        grad[i] = (f_plus - f_minus) / (2.0 * eps);
    }

    Ok(grad)
}

/// Objective function trait for optimization
pub trait ObjectiveFunction: Send + Sync {
    /// Evaluate function at given parameters
    fn eval(&self, params: &[f64]) -> Result<f64>;

    /// Compute gradient at given parameters (numerical if not overridden)
    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        central_gradient(|p| self.eval(p), params)
    }
}

/// Largest estimated distance to the minimum, `g^T H^-1 g / 2`, accepted as converged.
///
/// Matches Migrad's default criterion for objectives in negative-log-likelihood
/// units (`up = 0.5`).
pub const EDM_MAX: f64 = 1e-4;

/// Fresh L-BFGS starts from the best point when a run stalls before convergence.
const MAX_RESTARTS: usize = 3;

/// Parameters within this fraction of the box width from a bound count as on it.
const ACTIVE_BOUND_TOL: f64 = 1e-5;

/// Map between a bounded external parameter and an unbounded internal one.
///
/// Same transforms as Minuit: `sin` for a two-sided box, `sqrt` for one-sided
/// bounds. Internal iterates can wander anywhere while the external value stays
/// inside the box.
#[derive(Debug, Clone, Copy, PartialEq)]
enum BoundTransform {
    Free,
    Lower(f64),
    Upper(f64),
    Double(f64, f64),
}

impl BoundTransform {
    fn new((lo, hi): (f64, f64)) -> Self {
        match (lo.is_finite(), hi.is_finite()) {
            (true, true) => BoundTransform::Double(lo, hi),
            (true, false) => BoundTransform::Lower(lo),
            (false, true) => BoundTransform::Upper(hi),
            (false, false) => BoundTransform::Free,
        }
    }

    fn to_external(self, t: f64) -> f64 {
        match self {
            BoundTransform::Free => t,
            BoundTransform::Lower(lo) => lo - 1.0 + (t * t + 1.0).sqrt(),
            BoundTransform::Upper(hi) => hi + 1.0 - (t * t + 1.0).sqrt(),
            BoundTransform::Double(lo, hi) => lo + 0.5 * (hi - lo) * (t.sin() + 1.0),
        }
    }

    /// Inverse map. The value is first moved off the bound: internal gradients
    /// vanish exactly there.
    fn to_internal(self, x: f64) -> f64 {
        match self {
            BoundTransform::Free => x,
            BoundTransform::Lower(lo) => {
                let x = x.max(lo + 1e-3 * lo.abs().max(1.0));
                ((x - lo + 1.0).powi(2) - 1.0).sqrt()
            }
            BoundTransform::Upper(hi) => {
                let x = x.min(hi - 1e-3 * hi.abs().max(1.0));
                ((hi - x + 1.0).powi(2) - 1.0).sqrt()
            }
            BoundTransform::Double(lo, hi) => {
                let margin = 1e-3 * (hi - lo);
                let x = x.clamp(lo + margin, hi - margin);
                (2.0 * (x - lo) / (hi - lo) - 1.0).clamp(-1.0, 1.0).asin()
            }
        }
    }

    /// `dx/dt`
    fn derivative(self, t: f64) -> f64 {
        match self {
            BoundTransform::Free => 1.0,
            BoundTransform::Lower(_) => t / (t * t + 1.0).sqrt(),
            BoundTransform::Upper(_) => -t / (t * t + 1.0).sqrt(),
            BoundTransform::Double(lo, hi) => 0.5 * (hi - lo) * t.cos(),
        }
    }
}

fn to_external(transforms: &[BoundTransform], internal: &[f64]) -> Vec<f64> {
    transforms.iter().zip(internal).map(|(tr, &t)| tr.to_external(t)).collect()
}

/// Wrapper to make ObjectiveFunction compatible with argmin, in internal coordinates.
struct ArgminProblem<'a> {
    objective: &'a dyn ObjectiveFunction,
    transforms: &'a [BoundTransform],
    counts: Arc<FuncCounts>,
}

/// Clamp each parameter into its `(lo, hi)` box.
pub fn clamp_params(params: &[f64], bounds: &[(f64, f64)]) -> Vec<f64> {
    params.iter().zip(bounds.iter()).map(|(&v, &(lo, hi))| v.clamp(lo, hi)).collect()
}

#[derive(Default)]
struct FuncCounts {
    cost: AtomicUsize,
    grad: AtomicUsize,
}

impl CostFunction for ArgminProblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, params: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        self.counts.cost.fetch_add(1, Ordering::Relaxed);
        let external = to_external(self.transforms, params);
        let value =
            self.objective.eval(&external).map_err(|e| argmin::core::Error::msg(e.to_string()))?;
        if !value.is_finite() {
            return Err(argmin::core::Error::msg(format!("objective is not finite: {value}")));
        }
        Ok(value)
    }
}

impl Gradient for ArgminProblem<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(
        &self,
        params: &Self::Param,
    ) -> std::result::Result<Self::Gradient, argmin::core::Error> {
        self.counts.grad.fetch_add(1, Ordering::Relaxed);
        let external = to_external(self.transforms, params);
        let g = self
            .objective
            .gradient(&external)
            .map_err(|e| argmin::core::Error::msg(e.to_string()))?;

        Ok(g.iter()
            .zip(self.transforms.iter().zip(params))
            .map(|(gx, (tr, &t))| gx * tr.derivative(t))
            .collect())
    }
}

/// Gradient with components pushing out of the box at an active bound removed.
pub fn projected_gradient(grad: &[f64], params: &[f64], bounds: &[(f64, f64)]) -> Vec<f64> {
    grad.iter()
        .zip(params.iter().zip(bounds))
        .map(|(&g, (&x, &(lo, hi)))| {
            let width = if lo.is_finite() && hi.is_finite() { hi - lo } else { 1.0 };
            let tol = ACTIVE_BOUND_TOL * width;
            if (x <= lo + tol && g > 0.0) || (x >= hi - tol && g < 0.0) { 0.0 } else { g }
        })
        .collect()
}

/// Estimated distance to the minimum, `g^T H^-1 g / 2`, over the parameters not
/// held at a bound.
pub fn estimated_distance_to_minimum(
    objective: &dyn ObjectiveFunction,
    params: &[f64],
    bounds: &[(f64, f64)],
) -> Result<f64> {
    let grad = projected_gradient(&objective.gradient(params)?, params, bounds);
    let free: Vec<usize> = (0..params.len()).filter(|&i| grad[i] != 0.0).collect();
    if free.is_empty() {
        return Ok(0.0);
    }

    let hessian = compute_hessian(objective, params, bounds)?;
    let sub = DMatrix::from_fn(free.len(), free.len(), |a, b| hessian[(free[a], free[b])]);
    let g = DVector::from_iterator(free.len(), free.iter().map(|&i| grad[i]));

    let edm = match invert_hessian(&sub) {
        Some(cov) => 0.5 * g.dot(&(&cov * &g)),
        // Directions without positive curvature carry no distance estimate.
        None => free
            .iter()
            .enumerate()
            .filter(|&(a, _)| sub[(a, a)] > 0.0)
            .map(|(a, &i)| 0.5 * grad[i] * grad[i] / sub[(a, a)])
            .sum(),
    };
    Ok(edm.abs())
}

/// Projected gradient norm and estimated distance to the minimum.
fn convergence_measures(
    objective: &dyn ObjectiveFunction,
    params: &[f64],
    bounds: &[(f64, f64)],
) -> Result<(f64, f64)> {
    let grad = projected_gradient(&objective.gradient(params)?, params, bounds);
    let grad_norm = grad.iter().map(|g| g * g).sum::<f64>().sqrt();
    let edm = estimated_distance_to_minimum(objective, params, bounds)?;
    Ok((grad_norm, edm))
}

/// L-BFGS-B optimizer with box constraints
#[derive(Debug, Clone)]
pub struct LbfgsbOptimizer {
    config: OptimizerConfig,
}

/// One argmin run in internal coordinates.
struct RunOutcome {
    internal: Vec<f64>,
    fval: f64,
    n_iter: u64,
    termination: TerminationStatus,
}

impl LbfgsbOptimizer {
    /// Create new L-BFGS-B optimizer with given configuration
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    /// Minimize objective function with bounds
    ///
    /// # Arguments
    /// * `objective` - Objective function to minimize
    /// * `init_params` - Initial parameter values
    /// * `bounds` - Parameter bounds as (lower, upper) for each parameter
    ///
    /// The solver works on unbounded internal parameters, so every iterate maps
    /// into the box. A run counts as converged only when the projected gradient
    /// norm is below `tol` or the estimated distance to the minimum is below
    /// [`EDM_MAX`]; a run that stalls short of that is restarted from its best
    /// point with fresh curvature memory.
    ///
    /// A solver failure on the first run is an `Err`; running out of iterations
    /// or stalling is reported through the status.
    pub fn minimize(
        &self,
        objective: &dyn ObjectiveFunction,
        init_params: &[f64],
        bounds: &[(f64, f64)],
    ) -> Result<OptimizationResult> {
        if init_params.len() != bounds.len() {
            return Err(Error::Validation(format!(
                "Parameter and bounds length mismatch: {} != {}",
                init_params.len(),
                bounds.len()
            )));
        }
        if let Some((lo, hi)) = bounds.iter().find(|(lo, hi)| lo.is_nan() || hi.is_nan() || lo >= hi) {
            return Err(Error::Validation(format!("Invalid parameter bounds [{lo}, {hi}]")));
        }

        let transforms: Vec<BoundTransform> = bounds.iter().map(|&b| BoundTransform::new(b)).collect();
        let counts = Arc::new(FuncCounts::default());

        let mut internal: Vec<f64> = transforms
            .iter()
            .zip(clamp_params(init_params, bounds))
            .map(|(tr, x)| tr.to_internal(x))
            .collect();
        let mut fval = f64::NAN;
        let mut n_iter = 0;
        let mut status = FitStatus::Aborted;
        let mut message = String::from("not started");

        for attempt in 0..=MAX_RESTARTS {
            let remaining = self.config.max_iter.saturating_sub(n_iter);
            if remaining == 0 {
                status = FitStatus::IterationLimit;
                break;
            }

            let run = match self.run_lbfgs(objective, &transforms, &counts, &internal, remaining) {
                Ok(run) => run,
                Err(e) => {
                    // A line search can break down at a point that is already the minimum.
                    let params = to_external(&transforms, &internal);
                    let (grad_norm, edm) = convergence_measures(objective, &params, bounds)?;
                    if grad_norm <= self.config.tol || edm <= EDM_MAX {
                        fval = objective.eval(&params)?;
                        status = FitStatus::Converged;
                        message = format!("converged ({e})");
                        break;
                    }
                    if attempt == 0 {
                        return Err(e);
                    }
                    log::debug!("L-BFGS restart {attempt} failed: {e}");
                    status = FitStatus::Aborted;
                    message = e.to_string();
                    break;
                }
            };
            internal = run.internal;
            fval = run.fval;
            n_iter += run.n_iter;
            message = run.termination.to_string();

            let params = to_external(&transforms, &internal);
            let (grad_norm, edm) = convergence_measures(objective, &params, bounds)?;
            if grad_norm <= self.config.tol || edm <= EDM_MAX {
                status = FitStatus::Converged;
                break;
            }
            status = match run.termination {
                TerminationStatus::Terminated(TerminationReason::MaxItersReached) => {
                    FitStatus::IterationLimit
                }
                _ => FitStatus::Aborted,
            };
            if status == FitStatus::IterationLimit {
                break;
            }
            log::debug!(
                "L-BFGS stalled ({message}) with |g|={grad_norm:.3e}, edm={edm:.3e}; restarting"
            );
            message = format!("stalled with projected gradient norm {grad_norm:.3e}");
        }

        Ok(OptimizationResult {
            parameters: to_external(&transforms, &internal),
            fval,
            n_iter,
            n_fev: counts.cost.load(Ordering::Relaxed),
            n_gev: counts.grad.load(Ordering::Relaxed),
            status,
            message,
        })
    }

    fn run_lbfgs(
        &self,
        objective: &dyn ObjectiveFunction,
        transforms: &[BoundTransform],
        counts: &Arc<FuncCounts>,
        start: &[f64],
        max_iter: u64,
    ) -> Result<RunOutcome> {
        let problem = ArgminProblem { objective, transforms, counts: counts.clone() };

        let linesearch = MoreThuenteLineSearch::new();
        // argmin's default cost tolerance (~EPS) is far stricter than the objective's
        // natural scale and ends in iteration-limit exits.
        let tol_cost =
            if self.config.tol == 0.0 { 0.0 } else { (0.1 * self.config.tol).max(1e-12) };
        let solver = LBFGS::new(linesearch, self.config.m)
            .with_tolerance_grad(self.config.tol)
            .map_err(|e| Error::Validation(format!("Invalid optimizer configuration (tol): {e}")))?;
        let solver = solver.with_tolerance_cost(tol_cost).map_err(|e| {
            Error::Validation(format!("Invalid optimizer configuration (tol_cost): {e}"))
        })?;

        let res = Executor::new(problem, solver)
            .configure(|state| state.param(start.to_vec()).max_iters(max_iter))
            .run()
            .map_err(|e| Error::Computation(format!("Optimization failed: {}", e)))?;

        let state = res.state();
        let internal = state
            .get_best_param()
            .ok_or_else(|| Error::Computation("No best parameters found".to_string()))?
            .clone();
        Ok(RunOutcome {
            internal,
            fval: state.get_best_cost(),
            n_iter: state.get_iter(),
            termination: state.get_termination_status().clone(),
        })
    }
}

impl Default for LbfgsbOptimizer {
    fn default() -> Self {
        Self::new(OptimizerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // f(x, y) = (x - 2)^2 + (y - 3)^2, minimum at (2, 3)
    struct QuadraticFunction;

    impl ObjectiveFunction for QuadraticFunction {
        fn eval(&self, params: &[f64]) -> Result<f64> {
            let x = params[0];
            let y = params[1];
            Ok((x - 2.0).powi(2) + (y - 3.0).powi(2))
        }

        fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
            let x = params[0];
            let y = params[1];
            Ok(vec![2.0 * (x - 2.0), 2.0 * (y - 3.0)])
        }
    }

    #[test]
    fn test_optimizer_quadratic() {
        let config = OptimizerConfig { max_iter: 100, tol: 1e-6, m: 10 };
        let optimizer = LbfgsbOptimizer::new(config);

        let result = optimizer.minimize(&QuadraticFunction, &[0.0, 0.0], &[(-10.0, 10.0); 2]).unwrap();

        assert!(result.converged(), "Optimizer should converge: {}", result);
        assert_relative_eq!(result.parameters[0], 2.0, epsilon = 1e-4);
        assert_relative_eq!(result.parameters[1], 3.0, epsilon = 1e-4);
        assert_relative_eq!(result.fval, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_optimizer_with_bounds() {
        let optimizer = LbfgsbOptimizer::default();

        // Constrained optimum at x=3, y=2
        let bounds = vec![(3.0, 5.0), (1.0, 2.0)];
        let result = optimizer.minimize(&QuadraticFunction, &[4.0, 1.5], &bounds).unwrap();

        assert_relative_eq!(result.parameters[0], 3.0, epsilon = 1e-4);
        assert_relative_eq!(result.parameters[1], 2.0, epsilon = 1e-4);
        assert!(result.converged(), "Status: {}", result.message);
    }

    // Uses the numerical default gradient.
    struct ShiftedParabola;

    impl ObjectiveFunction for ShiftedParabola {
        fn eval(&self, params: &[f64]) -> Result<f64> {
            Ok((params[0] - 0.25).powi(2) * 50.0 - 5.0)
        }
    }

    #[test]
    fn test_numerical_gradient_matches_analytic() {
        let g = ShiftedParabola.gradient(&[1.0]).unwrap();
        assert_relative_eq!(g[0], 100.0 * 0.75, epsilon = 1e-4);
    }

    #[test]
    fn test_optimizer_negative_minimum() {
        let result = LbfgsbOptimizer::default().minimize(&ShiftedParabola, &[0.9], &[(0.0, 1.0)]).unwrap();
        assert!(result.converged());
        assert_relative_eq!(result.parameters[0], 0.25, epsilon = 1e-4);
        assert_relative_eq!(result.fval, -5.0, epsilon = 1e-6);
    }

    // Steep parabola with its minimum close to the lower bound, on the scale of
    // a likelihood with a few thousand events.
    struct NearBound;

    impl ObjectiveFunction for NearBound {
        fn eval(&self, params: &[f64]) -> Result<f64> {
            Ok(5000.0 * (params[0] - 0.02).powi(2))
        }

        fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
            Ok(vec![10000.0 * (params[0] - 0.02)])
        }
    }

    #[test]
    fn test_overshoot_past_bound_does_not_stall() {
        for start in [0.5, 0.9, 0.999] {
            let result = LbfgsbOptimizer::default().minimize(&NearBound, &[start], &[(0.0, 1.0)]).unwrap();
            assert!(result.converged(), "start {start}: {result}");
            assert_relative_eq!(result.parameters[0], 0.02, epsilon = 1e-5);
        }
    }

    // Minimum outside the box: the solution sits on the bound with a nonzero gradient.
    struct Slope;

    impl ObjectiveFunction for Slope {
        fn eval(&self, params: &[f64]) -> Result<f64> {
            Ok(300.0 * params[0] + (params[1] - 0.4).powi(2))
        }

        fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
            Ok(vec![300.0, 2.0 * (params[1] - 0.4)])
        }
    }

    #[test]
    fn test_active_bound_with_nonzero_gradient() {
        let bounds = [(0.0, 1.0), (0.0, 1.0)];
        let result = LbfgsbOptimizer::default().minimize(&Slope, &[0.7, 0.9], &bounds).unwrap();
        assert!(result.converged(), "{result}");
        assert!(result.parameters[0] < 1e-5, "x = {}", result.parameters[0]);
        assert_relative_eq!(result.parameters[1], 0.4, epsilon = 1e-4);

        let pg = projected_gradient(&[300.0, 0.0], &result.parameters, &bounds);
        assert_eq!(pg[0], 0.0);
    }

    #[test]
    fn test_bound_transform_stays_in_box() {
        let tr = BoundTransform::new((0.0, 1.0));
        for t in [-40.0, -2.5, 0.0, 2.0, 100.0] {
            let x = tr.to_external(t);
            assert!((0.0..=1.0).contains(&x), "t={t} -> x={x}");
        }
        assert_relative_eq!(tr.to_external(tr.to_internal(0.3)), 0.3, epsilon = 1e-12);

        let lower = BoundTransform::new((2.0, f64::INFINITY));
        assert!(lower.to_external(-7.0) >= 2.0);
        assert_relative_eq!(lower.to_external(lower.to_internal(5.0)), 5.0, epsilon = 1e-12);
        assert_eq!(BoundTransform::new((f64::NEG_INFINITY, f64::INFINITY)), BoundTransform::Free);
    }

    #[test]
    fn test_edm_is_zero_at_minimum_and_positive_away() {
        let bounds = [(-10.0, 10.0); 2];
        let at_min = estimated_distance_to_minimum(&QuadraticFunction, &[2.0, 3.0], &bounds).unwrap();
        assert_relative_eq!(at_min, 0.0, epsilon = 1e-12);
        // g = (-2, 0), H = 2I: edm = 0.5 * 4 / 2 = 1
        let away = estimated_distance_to_minimum(&QuadraticFunction, &[1.0, 3.0], &bounds).unwrap();
        assert_relative_eq!(away, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_iteration_limit_is_reported_not_raised() {
        let config = OptimizerConfig { max_iter: 1, tol: 1e-14, m: 10 };
        let result = LbfgsbOptimizer::new(config)
            .minimize(&QuadraticFunction, &[-9.0, 9.0], &[(-10.0, 10.0); 2])
            .unwrap();
        assert!(result.n_iter <= 1);
        if !result.converged() {
            assert_eq!(result.status, FitStatus::IterationLimit);
        }
    }

    #[test]
    fn test_bounds_length_mismatch() {
        let err = LbfgsbOptimizer::default().minimize(&QuadraticFunction, &[0.0], &[]).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_empty_box_rejected() {
        let err = LbfgsbOptimizer::default()
            .minimize(&QuadraticFunction, &[0.0, 0.0], &[(1.0, 1.0), (0.0, 1.0)])
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
