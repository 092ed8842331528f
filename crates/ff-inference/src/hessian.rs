//! Hessian and covariance estimation at a fitted minimum.

use crate::optimizer::ObjectiveFunction;
use ff_core::Result;
use nalgebra::DMatrix;

/// Finite-difference Hessian from objective gradients.
///
/// Steps go towards the interior of the box so bounded parameters sitting on an
/// edge are never evaluated outside it.
pub fn compute_hessian(
    objective: &dyn ObjectiveFunction,
    best_params: &[f64],
    bounds: &[(f64, f64)],
) -> Result<DMatrix<f64>> {
    let n = best_params.len();
    let grad_center = objective.gradient(best_params)?;

    let mut hessian = DMatrix::zeros(n, n);

    for j in 0..n {
        let mut eps = 1e-4 * best_params[j].abs().max(1.0);
        if let Some(&(lo, hi)) = bounds.get(j) {
            if best_params[j] + eps > hi && best_params[j] - eps >= lo {
                eps = -eps;
            }
        }

        let mut params_step = best_params.to_vec();
        params_step[j] += eps;
        let grad_step = objective.gradient(&params_step)?;

        for i in 0..n {
            hessian[(i, j)] = (grad_step[i] - grad_center[i]) / eps;
        }
    }

    // Symmetrise: H = (H + H^T) / 2
    let ht = hessian.transpose();
    hessian = (&hessian + &ht) * 0.5;

    Ok(hessian)
}

/// Diagonal shifts tried after a plain Cholesky fails, as powers of ten times
/// `1e-9` of the largest diagonal entry.
const SHIFT_STEPS: i32 = 9;

/// Covariance as the inverse Hessian.
///
/// A finite-difference Hessian can be slightly indefinite at a valid minimum, so
/// the factorisation is retried with a growing diagonal shift. `None` when no
/// shift gives a factorisation with a positive finite diagonal.
pub fn invert_hessian(hessian: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let n = hessian.nrows();
    let scale = hessian.diagonal().amax().max(1.0);

    std::iter::once(0.0)
        .chain((0..SHIFT_STEPS).map(|k| scale * 1e-9 * 10f64.powi(k)))
        .filter_map(|shift| (hessian + DMatrix::identity(n, n) * shift).cholesky())
        .map(|chol| chol.inverse())
        .find(|cov| cov.diagonal().iter().all(|v| v.is_finite() && *v > 0.0))
}

/// Per-parameter `1 / sqrt(|H_ii|)`, used when the full inverse is unavailable.
pub fn diagonal_uncertainties(hessian: &DMatrix<f64>) -> Vec<f64> {
    hessian.diagonal().iter().map(|h| h.abs().max(1e-12).sqrt().recip()).collect()
}
