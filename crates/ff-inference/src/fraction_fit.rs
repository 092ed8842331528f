//! Template fraction fit.
//!
//! Fits the fractions `f_i` of N Monte-Carlo templates to a data histogram. The
//! expected content of bin `b` is
//!
//! ```text
//! mu_b = sum_i p_i A_ib,     p_i = f_i * N_data / N_i,     sum_i f_i = 1
//! ```
//!
//! where `N_data` and `N_i` are integrals over the fit range. With the
//! likelihood statistic the true template contents `A_ib` are profiled per bin
//! (see [`crate::barlow_beeston`]) so finite MC statistics widen the fit; with
//! the chi-square statistic they enter through the template bin variances.
//!
//! The N fractions are built from N-1 box parameters `u_k` in `[0, 1]` by stick
//! breaking: `f_k = u_k * prod_{j<k} (1 - u_j)` and the last fraction takes what
//! is left. Every point of the box lands on the simplex.

use crate::barlow_beeston::profile_bin;
use crate::hessian::{compute_hessian, diagonal_uncertainties, invert_hessian};
use crate::optimizer::{LbfgsbOptimizer, ObjectiveFunction, OptimizationResult, OptimizerConfig};
use ff_core::{Error, FitOutcome, FitStatus, FractionFitter, Histogram, Result};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};
use std::fmt;
use std::str::FromStr;

/// Objective minimised by the fitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitStatistic {
    /// Binned Poisson likelihood with Barlow-Beeston template statistics.
    #[default]
    Likelihood,
    /// Chi-square with data and template bin variances in the denominator.
    Chi2,
}

impl fmt::Display for FitStatistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FitStatistic::Likelihood => f.write_str("likelihood"),
            FitStatistic::Chi2 => f.write_str("chi2"),
        }
    }
}

impl FromStr for FitStatistic {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "likelihood" | "nll" | "ml" => Ok(FitStatistic::Likelihood),
            "chi2" | "chisquare" | "chi-square" => Ok(FitStatistic::Chi2),
            other => Err(Error::Config(format!(
                "unknown fit statistic '{other}' (expected 'likelihood' or 'chi2')"
            ))),
        }
    }
}

/// Fraction fit settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FractionFitConfig {
    /// Objective to minimise.
    pub statistic: FitStatistic,
    /// Inclusive 0-based bin range entering the fit. `None` = all bins.
    pub fit_range: Option<(usize, usize)>,
    /// Log fit summaries at debug instead of info level.
    pub quiet: bool,
    /// Minimiser settings.
    pub optimizer: OptimizerConfig,
}

/// Binned fraction fitter over an ordered template set.
#[derive(Debug, Clone, Default)]
pub struct TemplateFractionFitter {
    config: FractionFitConfig,
}

impl TemplateFractionFitter {
    /// Create a fitter with the given configuration.
    pub fn new(config: FractionFitConfig) -> Self {
        Self { config }
    }

    /// Access the fit configuration.
    pub fn config(&self) -> &FractionFitConfig {
        &self.config
    }

    /// Fit `templates` to `data`.
    pub fn fit_templates(&self, data: &Histogram, templates: &[Histogram]) -> Result<FitOutcome> {
        let model = FractionModel::new(data, templates, &self.config)?;
        let n_free = model.n_templates() - 1;
        let equal = vec![1.0 / model.n_templates() as f64; n_free + 1];
        let init = free_from_fractions(&equal);
        let bounds = vec![(0.0, 1.0); n_free];

        let optimizer = LbfgsbOptimizer::new(self.config.optimizer);
        let result = match optimizer.minimize(&model, &init, &bounds) {
            Ok(result) => result,
            Err(e) => {
                log::warn!("fraction fit of '{}' aborted: {}", data.name, e);
                let fval = model.eval(&init).unwrap_or(f64::NAN);
                OptimizationResult {
                    parameters: init.clone(),
                    fval,
                    n_iter: 0,
                    n_fev: 0,
                    n_gev: 0,
                    status: FitStatus::Aborted,
                    message: e.to_string(),
                }
            }
        };

        let mut status = result.status;
        let hessian = compute_hessian(&model, &result.parameters, &bounds)?;
        let (free_cov, free_unc) = match invert_hessian(&hessian) {
            Some(cov) if (0..n_free).all(|i| cov[(i, i)].is_finite() && cov[(i, i)] > 0.0) => {
                let unc = (0..n_free).map(|i| cov[(i, i)].sqrt()).collect();
                (Some(cov), unc)
            }
            _ => {
                log::warn!(
                    "fraction fit of '{}': Hessian not positive definite, using diagonal approximation",
                    data.name
                );
                if status.is_converged() {
                    status = FitStatus::CovarianceNotPosDef;
                }
                (None, diagonal_uncertainties(&hessian))
            }
        };

        let fractions = fractions_from_free(&result.parameters);
        let jacobian = fraction_jacobian(&result.parameters);
        let (uncertainties, covariance) = propagate_to_all(&jacobian, &free_cov, &free_unc);

        let p = model.normalisations(&fractions);
        let predicted = model.prediction(&p);
        let (chi2, n_used) = model.baker_cousins_chi2(&predicted);
        let ndf = n_used as i64 - n_free as i64;
        let p_value = if ndf > 0 {
            ChiSquared::new(ndf as f64).ok().map(|dist| dist.sf(chi2))
        } else {
            None
        };

        let outcome = FitOutcome {
            status,
            fractions,
            uncertainties,
            covariance,
            objective: result.fval,
            chi2,
            ndf,
            p_value,
            predicted,
            n_iter: result.n_iter,
            n_fev: result.n_fev,
            n_gev: result.n_gev,
        };

        if self.config.quiet {
            log::debug!(
                "fraction fit '{}' ({}): status={} fractions={:?} chi2/ndf={:.3}/{}",
                data.name,
                self.config.statistic,
                outcome.status,
                outcome.fractions,
                outcome.chi2,
                outcome.ndf
            );
        } else {
            log::info!(
                "fraction fit '{}' ({}): status={} fractions={:?} +- {:?} chi2/ndf={:.3}/{} ({})",
                data.name,
                self.config.statistic,
                outcome.status,
                outcome.fractions,
                outcome.uncertainties,
                outcome.chi2,
                outcome.ndf,
                result.message
            );
        }

        Ok(outcome)
    }
}

impl FractionFitter for TemplateFractionFitter {
    fn fit(&self, data: &Histogram, templates: &[Histogram]) -> Result<FitOutcome> {
        self.fit_templates(data, templates)
    }
}

/// Stick-breaking map from N-1 box parameters to N fractions summing to 1.
fn fractions_from_free(free: &[f64]) -> Vec<f64> {
    let mut fractions = Vec::with_capacity(free.len() + 1);
    let mut rest = 1.0;
    for &u in free {
        fractions.push(rest * u);
        rest *= 1.0 - u;
    }
    fractions.push(rest);
    fractions
}

/// Inverse of [`fractions_from_free`] for fractions on the simplex.
fn free_from_fractions(fractions: &[f64]) -> Vec<f64> {
    let mut rest = 1.0;
    fractions[..fractions.len() - 1]
        .iter()
        .map(|&f| {
            let u = if rest > 0.0 { (f / rest).clamp(0.0, 1.0) } else { 0.5 };
            rest -= f;
            u
        })
        .collect()
}

/// `J[(i, k)] = df_i / du_k`, an N x (N-1) matrix.
fn fraction_jacobian(free: &[f64]) -> DMatrix<f64> {
    let n_free = free.len();
    let mut jac = DMatrix::zeros(n_free + 1, n_free);
    for k in 0..n_free {
        let before: f64 = free[..k].iter().map(|u| 1.0 - u).product();
        jac[(k, k)] = before;
        // Every later fraction carries the factor (1 - u_k).
        let mut rest = -before;
        for i in k + 1..n_free {
            jac[(i, k)] = rest * free[i];
            rest *= 1.0 - free[i];
        }
        jac[(n_free, k)] = rest;
    }
    jac
}

/// Map the free-parameter covariance onto all N fractions: `J C J^T`.
///
/// Without a covariance the diagonal uncertainties are propagated as if
/// uncorrelated.
fn propagate_to_all(
    jacobian: &DMatrix<f64>,
    free_cov: &Option<DMatrix<f64>>,
    free_unc: &[f64],
) -> (Vec<f64>, Option<Vec<f64>>) {
    let n = jacobian.nrows();

    match free_cov {
        Some(cov) => {
            let full = jacobian * cov * jacobian.transpose();
            let unc = (0..n).map(|i| full[(i, i)].max(0.0).sqrt()).collect();
            // nalgebra iterates column-major; the matrix is symmetric so the flat
            // layout is also row-major.
            let flat = full.iter().copied().collect();
            (unc, Some(flat))
        }
        None => {
            let unc = (0..n)
                .map(|i| {
                    free_unc
                        .iter()
                        .enumerate()
                        .map(|(k, u)| (jacobian[(i, k)] * u).powi(2))
                        .sum::<f64>()
                        .sqrt()
                })
                .collect();
            (unc, None)
        }
    }
}

/// Fit-range view of the data and templates plus normalisations.
struct FractionModel {
    statistic: FitStatistic,
    data: Vec<f64>,
    data_var: Vec<f64>,
    /// `templates[i][b]`
    templates: Vec<Vec<f64>>,
    template_var: Vec<Vec<f64>>,
    /// `N_data / N_i`
    norm: Vec<f64>,
}

impl FractionModel {
    fn new(data: &Histogram, templates: &[Histogram], config: &FractionFitConfig) -> Result<Self> {
        if templates.len() < 2 {
            return Err(Error::Validation(format!(
                "fraction fit needs at least 2 templates, got {}",
                templates.len()
            )));
        }
        for t in templates {
            data.check_binning(t)?;
        }
        if data.n_bins() == 0 {
            return Err(Error::Validation(format!("histogram '{}' has no bins", data.name)));
        }

        let (first, last) = config.fit_range.unwrap_or((0, data.n_bins() - 1));
        if first > last || last >= data.n_bins() {
            return Err(Error::Validation(format!(
                "fit range [{first}, {last}] outside histogram '{}' with {} bins",
                data.name,
                data.n_bins()
            )));
        }
        let range = first..=last;

        let data_total = data.integral_range(first, last);
        if data_total <= 0.0 {
            return Err(Error::DegenerateTemplate { name: data.name.clone() });
        }

        let mut norm = Vec::with_capacity(templates.len());
        for t in templates {
            let total = t.integral_range(first, last);
            if total <= 0.0 {
                return Err(Error::DegenerateTemplate { name: t.name.clone() });
            }
            norm.push(data_total / total);
        }

        Ok(Self {
            statistic: config.statistic,
            data: data.bin_content[range.clone()].to_vec(),
            data_var: range.clone().map(|b| data.bin_variance(b)).collect(),
            templates: templates.iter().map(|t| t.bin_content[range.clone()].to_vec()).collect(),
            template_var: templates
                .iter()
                .map(|t| range.clone().map(|b| t.bin_variance(b)).collect())
                .collect(),
            norm,
        })
    }

    fn n_templates(&self) -> usize {
        self.templates.len()
    }

    fn n_bins(&self) -> usize {
        self.data.len()
    }

    fn normalisations(&self, fractions: &[f64]) -> Vec<f64> {
        fractions.iter().zip(&self.norm).map(|(f, n)| f * n).collect()
    }

    /// Profiled negative log-likelihood (saturated, zero for a perfect match) and
    /// its derivative with respect to each `p_i`.
    fn nll(&self, p: &[f64]) -> (f64, Vec<f64>) {
        let n = self.n_templates();
        let mut a = vec![0.0; n];
        let mut true_counts = vec![0.0; n];
        let mut grad = vec![0.0; n];
        let mut nll = 0.0;

        for b in 0..self.n_bins() {
            for i in 0..n {
                a[i] = self.templates[i][b];
            }
            let d = self.data[b];
            let t = profile_bin(d, &a, p, &mut true_counts);

            let mu: f64 = p.iter().zip(&true_counts).map(|(pi, ai)| pi * ai).sum();
            nll += poisson_deviance_half(d, mu);
            for i in 0..n {
                nll += poisson_deviance_half(a[i], true_counts[i]);
                // Envelope theorem: d(-lnL)/dp_i = (1 - d/mu) * A_i = t * A_i.
                grad[i] += t * true_counts[i];
            }
        }

        (nll, grad)
    }

    /// Half chi-square and its derivative with respect to each `p_i`.
    fn half_chi2(&self, p: &[f64]) -> (f64, Vec<f64>) {
        let n = self.n_templates();
        let mut grad = vec![0.0; n];
        let mut chi2 = 0.0;

        for b in 0..self.n_bins() {
            let mut mu = 0.0;
            let mut var = self.data_var[b];
            for i in 0..n {
                mu += p[i] * self.templates[i][b];
                var += p[i] * p[i] * self.template_var[i][b];
            }
            if var <= 0.0 {
                continue;
            }
            let r = self.data[b] - mu;
            chi2 += r * r / var;
            for i in 0..n {
                grad[i] += -2.0 * r * self.templates[i][b] / var
                    - r * r * 2.0 * p[i] * self.template_var[i][b] / (var * var);
            }
        }

        (0.5 * chi2, grad.into_iter().map(|g| 0.5 * g).collect())
    }

    fn objective(&self, p: &[f64]) -> (f64, Vec<f64>) {
        match self.statistic {
            FitStatistic::Likelihood => self.nll(p),
            FitStatistic::Chi2 => self.half_chi2(p),
        }
    }

    /// Fitted prediction per bin.
    fn prediction(&self, p: &[f64]) -> Vec<f64> {
        let n = self.n_templates();
        match self.statistic {
            FitStatistic::Likelihood => {
                let mut a = vec![0.0; n];
                let mut true_counts = vec![0.0; n];
                (0..self.n_bins())
                    .map(|b| {
                        for i in 0..n {
                            a[i] = self.templates[i][b];
                        }
                        profile_bin(self.data[b], &a, p, &mut true_counts);
                        p.iter().zip(&true_counts).map(|(pi, ai)| pi * ai).sum()
                    })
                    .collect()
            }
            FitStatistic::Chi2 => (0..self.n_bins())
                .map(|b| (0..n).map(|i| p[i] * self.templates[i][b]).sum())
                .collect(),
        }
    }

    /// Baker-Cousins likelihood-ratio chi-square and the number of bins used.
    fn baker_cousins_chi2(&self, predicted: &[f64]) -> (f64, usize) {
        let mut chi2 = 0.0;
        let mut used = 0;
        for (&d, &mu) in self.data.iter().zip(predicted) {
            if d <= 0.0 && mu <= 0.0 {
                continue;
            }
            used += 1;
            chi2 += 2.0 * poisson_deviance_half(d, mu);
        }
        (chi2, used)
    }
}

impl ObjectiveFunction for FractionModel {
    fn eval(&self, params: &[f64]) -> Result<f64> {
        let p = self.normalisations(&fractions_from_free(params));
        Ok(self.objective(&p).0)
    }

    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        let p = self.normalisations(&fractions_from_free(params));
        let (_, grad_p) = self.objective(&p);

        // dF/du_k = sum_i dF/dp_i * norm_i * df_i/du_k
        let grad_f: Vec<f64> = grad_p.iter().zip(&self.norm).map(|(g, n)| g * n).collect();
        let jac = fraction_jacobian(params);
        Ok((0..params.len())
            .map(|k| (0..grad_f.len()).map(|i| grad_f[i] * jac[(i, k)]).sum())
            .collect())
    }
}

/// `mu - n + n ln(n / mu)`: half the Poisson deviance of observing `n` given `mu`.
fn poisson_deviance_half(n: f64, mu: f64) -> f64 {
    if n > 0.0 {
        if mu <= 0.0 {
            return f64::INFINITY;
        }
        mu - n + n * (n / mu).ln()
    } else {
        mu
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::central_gradient;
    use approx::assert_relative_eq;

    const SIGNAL: [f64; 10] = [5.0, 20.0, 60.0, 120.0, 160.0, 120.0, 60.0, 20.0, 5.0, 2.0];
    const BACKGROUND: [f64; 10] = [100.0, 90.0, 80.0, 70.0, 60.0, 50.0, 40.0, 30.0, 20.0, 10.0];
    const RISING: [f64; 10] = [2.0, 4.0, 8.0, 16.0, 32.0, 48.0, 64.0, 80.0, 96.0, 110.0];
    const TILTED: [f64; 10] = [104.0, 93.0, 82.0, 71.0, 60.0, 49.0, 38.0, 27.0, 16.0, 5.0];

    fn hist(name: &str, bins: &[f64]) -> Histogram {
        Histogram::new(name, bins.to_vec()).unwrap()
    }

    /// Noiseless data: sum of templates scaled to `fractions` of `total`.
    fn mixture(templates: &[Histogram], fractions: &[f64], total: f64) -> Histogram {
        let n_bins = templates[0].n_bins();
        let mut bins = vec![0.0; n_bins];
        for (t, f) in templates.iter().zip(fractions) {
            let scale = f * total / t.integral();
            for (b, c) in bins.iter_mut().zip(&t.bin_content) {
                *b += scale * c;
            }
        }
        hist("dataObs", &bins)
    }

    #[test]
    fn test_two_template_recovery() {
        let templates = vec![hist("sig", &SIGNAL), hist("bkg", &BACKGROUND)];
        let data = mixture(&templates, &[0.3, 0.7], 1000.0);

        let out = TemplateFractionFitter::default().fit(&data, &templates).unwrap();

        assert_eq!(out.status_code(), 0, "status: {}", out.status);
        assert_relative_eq!(out.fractions[0], 0.3, epsilon = 1e-3);
        assert_relative_eq!(out.fractions[1], 0.7, epsilon = 1e-3);
        assert_relative_eq!(out.fractions.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        assert!(out.chi2 < 1e-4, "noiseless fit should be perfect, chi2={}", out.chi2);
        assert_eq!(out.ndf, 9);
    }

    #[test]
    fn test_two_template_uncertainties_are_equal_and_anticorrelated() {
        let templates = vec![hist("sig", &SIGNAL), hist("bkg", &BACKGROUND)];
        let data = mixture(&templates, &[0.4, 0.6], 800.0);

        let out = TemplateFractionFitter::default().fit(&data, &templates).unwrap();

        assert!(out.uncertainties[0] > 0.0 && out.uncertainties[0] < 0.2);
        assert_relative_eq!(out.uncertainties[0], out.uncertainties[1], max_relative = 1e-9);
        assert_relative_eq!(out.correlation(0, 1).unwrap(), -1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_three_template_recovery() {
        let templates = vec![hist("sig", &SIGNAL), hist("bkg", &BACKGROUND), hist("up", &RISING)];
        let data = mixture(&templates, &[0.2, 0.5, 0.3], 2000.0);

        let out = TemplateFractionFitter::default().fit(&data, &templates).unwrap();

        assert!(out.converged(), "status: {}", out.status);
        for (got, want) in out.fractions.iter().zip([0.2, 0.5, 0.3]) {
            assert_relative_eq!(*got, want, epsilon = 2e-3);
        }
        assert!(out.fractions.iter().all(|f| (0.0..=1.0).contains(f)));
        assert_eq!(out.uncertainties.len(), 3);
        assert_eq!(out.covariance.as_ref().map(|c| c.len()), Some(9));
    }

    #[test]
    fn test_chi2_statistic_recovery() {
        let templates = vec![hist("sig", &SIGNAL), hist("bkg", &BACKGROUND)];
        let data = mixture(&templates, &[0.3, 0.7], 1000.0);
        let config = FractionFitConfig { statistic: FitStatistic::Chi2, ..Default::default() };

        let out = TemplateFractionFitter::new(config).fit(&data, &templates).unwrap();

        assert!(out.converged(), "status: {}", out.status);
        assert_relative_eq!(out.fractions[0], 0.3, epsilon = 1e-3);
        assert_relative_eq!(out.objective, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_fit_range_ignores_excluded_bins() {
        let templates = vec![hist("sig", &SIGNAL), hist("bkg", &BACKGROUND)];
        let mut data = mixture(&templates, &[0.3, 0.7], 1000.0);
        data.bin_content[9] += 5000.0;

        let config = FractionFitConfig { fit_range: Some((0, 8)), ..Default::default() };
        let out = TemplateFractionFitter::new(config).fit(&data, &templates).unwrap();

        // Fractions refer to integrals over bins 0..=8.
        let sig_in = 0.3 * templates[0].integral_range(0, 8) / templates[0].integral();
        let bkg_in = 0.7 * templates[1].integral_range(0, 8) / templates[1].integral();
        assert!(out.converged(), "status: {}", out.status);
        assert_relative_eq!(out.fractions[0], sig_in / (sig_in + bkg_in), epsilon = 5e-4);
        assert_eq!(out.predicted.len(), 9);
    }

    #[test]
    fn test_small_fractions_are_not_pushed_to_the_bound() {
        let templates = vec![hist("sig", &SIGNAL), hist("bkg", &BACKGROUND)];
        for f0 in [0.02, 0.1] {
            let data = mixture(&templates, &[f0, 1.0 - f0], 2500.0);
            for statistic in [FitStatistic::Likelihood, FitStatistic::Chi2] {
                let config = FractionFitConfig { statistic, ..Default::default() };
                let out = TemplateFractionFitter::new(config).fit(&data, &templates).unwrap();
                assert_eq!(out.status_code(), 0, "{statistic} f0={f0}: {}", out.status);
                assert_relative_eq!(out.fractions[0], f0, epsilon = 5e-4);
            }
        }
    }

    #[test]
    fn test_three_template_small_fractions_with_chi2() {
        let templates = vec![hist("sig", &SIGNAL), hist("bkg", &BACKGROUND), hist("up", &RISING)];
        let data = mixture(&templates, &[0.1, 0.1, 0.8], 2500.0);
        let config = FractionFitConfig { statistic: FitStatistic::Chi2, ..Default::default() };

        let out = TemplateFractionFitter::new(config).fit(&data, &templates).unwrap();

        assert_eq!(out.status_code(), 0, "status: {}", out.status);
        for (got, want) in out.fractions.iter().zip([0.1, 0.1, 0.8]) {
            assert_relative_eq!(*got, want, epsilon = 1e-3);
        }
        assert!(out.objective < 1e-4, "objective {}", out.objective);
    }

    #[test]
    fn test_empty_component_uncertainty_follows_template_shape() {
        // Third component absent from data. Its uncertainty must come from how
        // well the data separates its shape, so a near copy of the background
        // is much less constrained than a distinct shape.
        let data_templates = [hist("sig", &SIGNAL), hist("bkg", &BACKGROUND)];
        let data = mixture(&data_templates, &[0.5, 0.5], 2500.0);

        let fit_with = |third: &[f64]| {
            let templates = vec![hist("sig", &SIGNAL), hist("bkg", &BACKGROUND), hist("extra", third)];
            TemplateFractionFitter::default().fit(&data, &templates).unwrap()
        };
        let distinct = fit_with(&RISING);
        let similar = fit_with(&TILTED);

        for out in [&distinct, &similar] {
            assert_relative_eq!(out.fractions[2], 0.0, epsilon = 2e-3);
            assert!(out.uncertainties.iter().all(|u| u.is_finite() && *u > 0.0));
        }
        assert_relative_eq!(distinct.fractions[0], 0.5, epsilon = 2e-3);
        assert!(
            similar.uncertainties[2] > 2.0 * distinct.uncertainties[2],
            "similar={} distinct={}",
            similar.uncertainties[2],
            distinct.uncertainties[2]
        );
    }

    #[test]
    fn test_stick_breaking_map() {
        let fractions = [0.2, 0.5, 0.3];
        let free = free_from_fractions(&fractions);
        assert_relative_eq!(free[0], 0.2, epsilon = 1e-12);
        assert_relative_eq!(free[1], 0.625, epsilon = 1e-12);
        for (got, want) in fractions_from_free(&free).iter().zip(fractions) {
            assert_relative_eq!(*got, want, epsilon = 1e-12);
        }

        // Columns of the Jacobian sum to zero: the fractions always sum to 1.
        let jac = fraction_jacobian(&[0.3, 0.9]);
        for k in 0..2 {
            assert_relative_eq!(jac.column(k).sum(), 0.0, epsilon = 1e-12);
        }
        assert_relative_eq!(jac[(2, 1)], -0.7, epsilon = 1e-12);
    }

    #[test]
    fn test_invalid_fit_range() {
        let templates = vec![hist("sig", &SIGNAL), hist("bkg", &BACKGROUND)];
        let data = mixture(&templates, &[0.5, 0.5], 100.0);
        let config = FractionFitConfig { fit_range: Some((3, 10)), ..Default::default() };
        let err = TemplateFractionFitter::new(config).fit(&data, &templates).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_zero_template_is_degenerate() {
        let templates = vec![hist("sig", &SIGNAL), hist("empty", &[0.0; 10])];
        let data = hist("dataObs", &SIGNAL);
        match TemplateFractionFitter::default().fit(&data, &templates).unwrap_err() {
            Error::DegenerateTemplate { name } => assert_eq!(name, "empty"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_binning_mismatch() {
        let templates = vec![hist("sig", &SIGNAL), hist("short", &[1.0, 2.0])];
        let data = hist("dataObs", &SIGNAL);
        let err = TemplateFractionFitter::default().fit(&data, &templates).unwrap_err();
        assert!(matches!(err, Error::BinningMismatch { .. }));
    }

    #[test]
    fn test_single_template_rejected() {
        let templates = vec![hist("sig", &SIGNAL)];
        let data = hist("dataObs", &SIGNAL);
        let err = TemplateFractionFitter::default().fit(&data, &templates).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_pure_signal_hits_bound() {
        let templates = vec![hist("sig", &SIGNAL), hist("bkg", &BACKGROUND)];
        let data = mixture(&templates, &[1.0, 0.0], 500.0);

        let out = TemplateFractionFitter::default().fit(&data, &templates).unwrap();

        assert_relative_eq!(out.fractions[0], 1.0, epsilon = 1e-3);
        assert!(out.fractions[1] >= 0.0);
    }

    #[test]
    fn test_statistic_parsing() {
        assert_eq!("chi2".parse::<FitStatistic>().unwrap(), FitStatistic::Chi2);
        assert_eq!("Likelihood".parse::<FitStatistic>().unwrap(), FitStatistic::Likelihood);
        assert!("least-squares".parse::<FitStatistic>().is_err());
    }

    #[test]
    fn test_analytic_gradient_matches_numerical() {
        let templates = vec![hist("sig", &SIGNAL), hist("bkg", &BACKGROUND), hist("up", &RISING)];
        // Fluctuated data so the minimum is not at a perfect match.
        let mut data = mixture(&templates, &[0.25, 0.45, 0.3], 900.0);
        for (i, b) in data.bin_content.iter_mut().enumerate() {
            *b = (*b + if i % 2 == 0 { 7.0 } else { -5.0 }).max(0.0).round();
        }
        for statistic in [FitStatistic::Likelihood, FitStatistic::Chi2] {
            let config = FractionFitConfig { statistic, ..Default::default() };
            let model = FractionModel::new(&data, &templates, &config).unwrap();
            let x = [0.3, 0.4];
            let analytic = model.gradient(&x).unwrap();
            let numeric = central_gradient(|p| model.eval(p), &x).unwrap();
            for (a, n) in analytic.iter().zip(&numeric) {
                assert_relative_eq!(*a, *n, max_relative = 1e-4, epsilon = 1e-4);
            }
        }
    }
}
