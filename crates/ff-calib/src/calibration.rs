//! Scale-factor and purity calculators.
//!
//! Both are pure functions of a fit outcome and histogram integrals; nothing
//! here fits or touches a store.

use ff_core::{Error, FitOutcome, Histogram, Result};
use serde::{Deserialize, Serialize};

/// Scale factor that maps a template's normalisation onto its fitted share of data:
/// `data_integral * fraction / template_integral`.
pub fn scale_factor(data_integral: f64, fraction: f64, template: &Histogram) -> Result<f64> {
    let template_integral = template.integral();
    if template_integral == 0.0 {
        return Err(Error::DegenerateTemplate { name: template.name.clone() });
    }
    Ok(data_integral * fraction / template_integral)
}

/// Electron mis-ID scale factor from a fit whose template 0 is the mis-identified component.
pub fn misid_scale_factor(outcome: &FitOutcome, data: &Histogram, templates: &[Histogram]) -> Result<f64> {
    let (fraction, _) = outcome.fraction(0).ok_or_else(|| missing_fraction(0, outcome))?;
    let template = templates
        .first()
        .ok_or_else(|| Error::Validation("mis-ID scale factor needs a template".to_string()))?;
    scale_factor(data.integral(), fraction, template)
}

/// Photon purity with its propagated uncertainty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Purity {
    /// `rate[0] / (rate[0] + rate[1])`
    pub value: f64,
    /// Linearly propagated uncertainty.
    pub uncertainty: f64,
}

/// Purity propagation from two component rates and their errors.
///
/// `purity = rates[0] / (rates[0] + rates[1])` and
/// `sigma = sqrt((errors[0] (1 + purity) / total)^2 + (errors[1] purity / total)^2)`,
/// treating the two rate errors as uncorrelated.
pub fn propagate_purity(rates: [f64; 2], errors: [f64; 2]) -> Result<Purity> {
    let total = rates[0] + rates[1];
    if total == 0.0 {
        return Err(Error::DegenerateRate { total_rate: total });
    }
    let value = rates[0] / total;
    let uncertainty = ((errors[0] * (1.0 + value) / total).powi(2)
        + (errors[1] * value / total).powi(2))
    .sqrt();
    Ok(Purity { value, uncertainty })
}

/// Photon purity from a fit of the isolated (template 0) and nonprompt
/// (template 1) components.
///
/// Each component's rate is its first-bin content times its scale factor; the
/// rate error uses the fitted fraction uncertainty in place of the fraction.
pub fn photon_purity(outcome: &FitOutcome, data: &Histogram, templates: &[Histogram]) -> Result<Purity> {
    if templates.len() < 2 {
        return Err(Error::Validation(format!(
            "photon purity needs 2 templates, got {}",
            templates.len()
        )));
    }
    let data_integral = data.integral();

    let mut rates = [0.0; 2];
    let mut errors = [0.0; 2];
    for i in 0..2 {
        let template = &templates[i];
        let (fraction, fraction_err) =
            outcome.fraction(i).ok_or_else(|| missing_fraction(i, outcome))?;
        let first_bin = template.first_bin_content().ok_or_else(|| {
            Error::Validation(format!("template '{}' has no bins", template.name))
        })?;

        rates[i] = first_bin * scale_factor(data_integral, fraction, template)?;
        errors[i] = first_bin * scale_factor(data_integral, fraction_err, template)?;
    }

    propagate_purity(rates, errors)
}

fn missing_fraction(i: usize, outcome: &FitOutcome) -> Error {
    Error::Validation(format!("fit outcome has {} fractions, need index {}", outcome.n_templates(), i))
}
