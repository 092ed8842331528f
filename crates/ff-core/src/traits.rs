//! Core traits for fracfit
//!
//! Histogram storage and fraction fitting sit behind narrow traits so the
//! calibration driver never depends on a concrete file format or minimiser.

use crate::{FitOutcome, Histogram, Result};

/// Read-only source of named histograms.
pub trait HistogramStore {
    /// Fetch a histogram by key.
    ///
    /// Fails with [`crate::Error::MissingHistogram`] when the key is absent.
    fn get(&self, name: &str) -> Result<Histogram>;

    /// Whether a key is present.
    fn contains(&self, name: &str) -> bool {
        self.get(name).is_ok()
    }

    /// Store name used in error messages (e.g. the file path).
    fn name(&self) -> &str;
}

/// Fits template fractions to a data histogram.
pub trait FractionFitter {
    /// Fit `templates` (ordered, N >= 2) to `data`.
    ///
    /// A non-converged minimisation is reported through [`FitOutcome::status`],
    /// not as an error.
    fn fit(&self, data: &Histogram, templates: &[Histogram]) -> Result<FitOutcome>;
}

impl<S: HistogramStore + ?Sized> HistogramStore for &S {
    fn get(&self, name: &str) -> Result<Histogram> {
        (**self).get(name)
    }

    fn contains(&self, name: &str) -> bool {
        (**self).contains(name)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
