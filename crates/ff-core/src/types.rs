//! Common data types for fracfit

use serde::{Deserialize, Serialize};
use std::fmt;

/// Minimiser exit status.
///
/// The numeric codes follow the usual fitter convention: `0` is a converged fit,
/// anything else is a failure that callers may still choose to inspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitStatus {
    /// Gradient or cost tolerance satisfied.
    Converged,
    /// Minimum found but the covariance matrix was not positive definite.
    CovarianceNotPosDef,
    /// Iteration limit reached before convergence.
    IterationLimit,
    /// Minimiser aborted (line-search failure, non-finite objective).
    Aborted,
}

impl FitStatus {
    /// Integer status code (`0` = converged).
    pub fn code(self) -> i32 {
        match self {
            FitStatus::Converged => 0,
            FitStatus::CovarianceNotPosDef => 1,
            FitStatus::IterationLimit => 4,
            FitStatus::Aborted => 5,
        }
    }

    /// `true` only for [`FitStatus::Converged`].
    pub fn is_converged(self) -> bool {
        self == FitStatus::Converged
    }
}

impl fmt::Display for FitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self {
            FitStatus::Converged => "converged",
            FitStatus::CovarianceNotPosDef => "covariance not positive definite",
            FitStatus::IterationLimit => "iteration limit reached",
            FitStatus::Aborted => "minimiser aborted",
        };
        write!(f, "{} ({})", self.code(), what)
    }
}

/// Result of a template fraction fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitOutcome {
    /// Convergence status
    pub status: FitStatus,

    /// Fitted fractions, one per template, in template order
    pub fractions: Vec<f64>,

    /// Fraction uncertainties (sqrt of covariance diagonal)
    pub uncertainties: Vec<f64>,

    /// Covariance matrix of the fractions (row-major, N×N). `None` if Hessian inversion failed.
    pub covariance: Option<Vec<f64>>,

    /// Objective value at the minimum (NLL, or chi2/2)
    pub objective: f64,

    /// Baker-Cousins chi-square of data against the fitted prediction
    pub chi2: f64,

    /// Degrees of freedom for `chi2`
    pub ndf: i64,

    /// Upper-tail chi-square probability, when `ndf > 0`
    pub p_value: Option<f64>,

    /// Fitted prediction per bin in the fit range
    pub predicted: Vec<f64>,

    /// Number of minimiser iterations
    pub n_iter: u64,

    /// Number of objective evaluations
    pub n_fev: usize,

    /// Number of gradient evaluations
    pub n_gev: usize,
}

impl FitOutcome {
    /// Integer status code (`0` = converged).
    pub fn status_code(&self) -> i32 {
        self.status.code()
    }

    /// Whether the minimiser converged.
    pub fn converged(&self) -> bool {
        self.status.is_converged()
    }

    /// Number of templates.
    pub fn n_templates(&self) -> usize {
        self.fractions.len()
    }

    /// Fitted fraction `i` and its uncertainty.
    pub fn fraction(&self, i: usize) -> Option<(f64, f64)> {
        Some((*self.fractions.get(i)?, *self.uncertainties.get(i)?))
    }

    /// Get correlation matrix element (i, j). Returns `None` if covariance is unavailable.
    pub fn correlation(&self, i: usize, j: usize) -> Option<f64> {
        let cov = self.covariance.as_ref()?;
        let n = self.fractions.len();
        if i >= n || j >= n {
            return None;
        }
        let sigma_i = self.uncertainties[i];
        let sigma_j = self.uncertainties[j];
        if sigma_i <= 0.0 || sigma_j <= 0.0 {
            return None;
        }
        Some(cov[i * n + j] / (sigma_i * sigma_j))
    }
}
