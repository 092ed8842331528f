//! 1D histogram used for data and Monte-Carlo templates.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// A 1D histogram with per-bin contents and optional sum of squared weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    /// Histogram name (store key it was read from, or a composite name).
    pub name: String,
    /// Bin contents (length = n_bins, excluding under/overflow).
    pub bin_content: Vec<f64>,
    /// Sum of weights squared per bin (for statistical errors), if stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sumw2: Option<Vec<f64>>,
    /// Bin edges (length = n_bins + 1), if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bin_edges: Option<Vec<f64>>,
}

impl Histogram {
    /// Create a histogram from bin contents.
    ///
    /// Contents must be finite and non-negative.
    pub fn new(name: impl Into<String>, bin_content: Vec<f64>) -> Result<Self> {
        let h = Self { name: name.into(), bin_content, sumw2: None, bin_edges: None };
        h.validate()?;
        Ok(h)
    }

    /// Attach per-bin sum of squared weights.
    pub fn with_sumw2(mut self, sumw2: Vec<f64>) -> Result<Self> {
        self.sumw2 = Some(sumw2);
        self.validate()?;
        Ok(self)
    }

    /// Attach bin edges.
    pub fn with_edges(mut self, edges: Vec<f64>) -> Result<Self> {
        self.bin_edges = Some(edges);
        self.validate()?;
        Ok(self)
    }

    /// Check internal consistency (lengths, signs, monotonic edges).
    pub fn validate(&self) -> Result<()> {
        if let Some((i, v)) =
            self.bin_content.iter().enumerate().find(|(_, v)| !(v.is_finite() && **v >= 0.0))
        {
            return Err(Error::Validation(format!(
                "histogram '{}': bin {} has invalid content {}",
                self.name, i, v
            )));
        }
        if let Some(w2) = &self.sumw2 {
            if w2.len() != self.bin_content.len() {
                return Err(Error::Validation(format!(
                    "histogram '{}': sumw2 length {} != n_bins {}",
                    self.name,
                    w2.len(),
                    self.bin_content.len()
                )));
            }
            if w2.iter().any(|v| !(v.is_finite() && *v >= 0.0)) {
                return Err(Error::Validation(format!(
                    "histogram '{}': sumw2 must be finite and non-negative",
                    self.name
                )));
            }
        }
        if let Some(edges) = &self.bin_edges {
            if edges.len() != self.bin_content.len() + 1 {
                return Err(Error::Validation(format!(
                    "histogram '{}': {} edges for {} bins",
                    self.name,
                    edges.len(),
                    self.bin_content.len()
                )));
            }
            if edges.windows(2).any(|w| !(w[1] > w[0])) {
                return Err(Error::Validation(format!(
                    "histogram '{}': bin edges must be strictly increasing",
                    self.name
                )));
            }
        }
        Ok(())
    }

    /// Number of bins.
    pub fn n_bins(&self) -> usize {
        self.bin_content.len()
    }

    /// Sum of all bin contents.
    pub fn integral(&self) -> f64 {
        self.bin_content.iter().sum()
    }

    /// Sum of bin contents over an inclusive bin range.
    pub fn integral_range(&self, first: usize, last: usize) -> f64 {
        if first > last || first >= self.n_bins() {
            return 0.0;
        }
        let last = last.min(self.n_bins() - 1);
        self.bin_content[first..=last].iter().sum()
    }

    /// Content of the first bin, if the histogram has any bins.
    pub fn first_bin_content(&self) -> Option<f64> {
        self.bin_content.first().copied()
    }

    /// Variance of bin `i`: stored sumw2, else Poisson (the content itself).
    pub fn bin_variance(&self, i: usize) -> f64 {
        match &self.sumw2 {
            Some(w2) => w2[i],
            None => self.bin_content[i],
        }
    }

    /// Statistical uncertainty of bin `i`.
    pub fn bin_error(&self, i: usize) -> f64 {
        self.bin_variance(i).sqrt()
    }

    /// Ensure `other` has the same binning as `self`.
    pub fn check_binning(&self, other: &Histogram) -> Result<()> {
        if self.n_bins() != other.n_bins() {
            return Err(Error::BinningMismatch {
                left: self.name.clone(),
                right: other.name.clone(),
                detail: format!("{} bins vs {} bins", self.n_bins(), other.n_bins()),
            });
        }
        if let (Some(a), Some(b)) = (&self.bin_edges, &other.bin_edges) {
            let tol = 1e-9;
            if let Some(i) = a
                .iter()
                .zip(b.iter())
                .position(|(x, y)| (x - y).abs() > tol * x.abs().max(y.abs()).max(1.0))
            {
                return Err(Error::BinningMismatch {
                    left: self.name.clone(),
                    right: other.name.clone(),
                    detail: format!("edge {} differs ({} vs {})", i, a[i], b[i]),
                });
            }
        }
        Ok(())
    }

    /// Add `other` bin-by-bin into `self`.
    ///
    /// Sum of squared weights is kept when either side stores it; a side without
    /// sumw2 contributes its Poisson variance.
    pub fn add(&mut self, other: &Histogram) -> Result<()> {
        self.check_binning(other)?;

        if self.sumw2.is_some() || other.sumw2.is_some() {
            let summed: Vec<f64> =
                (0..self.n_bins()).map(|i| self.bin_variance(i) + other.bin_variance(i)).collect();
            self.sumw2 = Some(summed);
        }
        for (a, b) in self.bin_content.iter_mut().zip(other.bin_content.iter()) {
            *a += b;
        }
        if self.bin_edges.is_none() {
            self.bin_edges = other.bin_edges.clone();
        }
        Ok(())
    }

    /// Sum a non-empty list of histograms into a new histogram called `name`.
    pub fn sum<'a, I>(name: impl Into<String>, parts: I) -> Result<Histogram>
    where
        I: IntoIterator<Item = &'a Histogram>,
    {
        let name = name.into();
        let mut iter = parts.into_iter();
        let first = iter.next().ok_or_else(|| {
            Error::Validation(format!("cannot build '{}' from zero histograms", name))
        })?;
        let mut total = first.clone();
        total.name = name;
        for h in iter {
            // Report the constituent against the first one, not the composite name.
            first.check_binning(h)?;
            total.add(h)?;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_rejects_negative_content() {
        let err = Histogram::new("h", vec![1.0, -2.0]).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_integral_and_first_bin() {
        let h = Histogram::new("h", vec![2.0, 3.0, 5.0]).unwrap();
        assert_relative_eq!(h.integral(), 10.0);
        assert_relative_eq!(h.integral_range(1, 2), 8.0);
        assert_relative_eq!(h.integral_range(1, 99), 8.0);
        assert_eq!(h.first_bin_content(), Some(2.0));
        assert_eq!(Histogram::new("e", vec![]).unwrap().first_bin_content(), None);
    }

    #[test]
    fn test_poisson_variance_without_sumw2() {
        let h = Histogram::new("h", vec![4.0, 9.0]).unwrap();
        assert_relative_eq!(h.bin_error(1), 3.0);
        let w = h.with_sumw2(vec![1.0, 2.0]).unwrap();
        assert_relative_eq!(w.bin_variance(1), 2.0);
    }

    #[test]
    fn test_add_mixes_sumw2_and_poisson() {
        let mut a = Histogram::new("a", vec![1.0, 2.0]).unwrap().with_sumw2(vec![0.5, 0.5]).unwrap();
        let b = Histogram::new("b", vec![3.0, 4.0]).unwrap();
        a.add(&b).unwrap();
        assert_eq!(a.bin_content, vec![4.0, 6.0]);
        assert_eq!(a.sumw2, Some(vec![3.5, 4.5]));
    }

    #[test]
    fn test_add_rejects_bin_count_mismatch() {
        let mut a = Histogram::new("a", vec![1.0, 2.0]).unwrap();
        let b = Histogram::new("b", vec![1.0, 2.0, 3.0]).unwrap();
        match a.add(&b).unwrap_err() {
            Error::BinningMismatch { left, right, .. } => {
                assert_eq!(left, "a");
                assert_eq!(right, "b");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_edges_must_match_when_both_present() {
        let a = Histogram::new("a", vec![1.0, 2.0]).unwrap().with_edges(vec![0.0, 1.0, 2.0]).unwrap();
        let b = Histogram::new("b", vec![1.0, 2.0]).unwrap().with_edges(vec![0.0, 1.5, 2.0]).unwrap();
        assert!(matches!(a.check_binning(&b), Err(Error::BinningMismatch { .. })));
        let c = Histogram::new("c", vec![1.0, 2.0]).unwrap();
        assert!(a.check_binning(&c).is_ok());
    }

    #[test]
    fn test_sum_of_three() {
        let parts = [
            Histogram::new("Other_nominal", vec![1.0, 2.0, 3.0]).unwrap(),
            Histogram::new("WGamma_nominal", vec![0.5, 0.5, 0.5]).unwrap(),
            Histogram::new("ZGamma_nominal", vec![2.0, 0.0, 1.0]).unwrap(),
        ];
        let total = Histogram::sum("background", parts.iter()).unwrap();
        assert_eq!(total.name, "background");
        assert_eq!(total.bin_content, vec![3.5, 2.5, 4.5]);
        assert_relative_eq!(total.integral(), parts.iter().map(|h| h.integral()).sum::<f64>());
    }

    #[test]
    fn test_sum_empty_is_error() {
        assert!(Histogram::sum("x", std::iter::empty()).is_err());
    }
}
