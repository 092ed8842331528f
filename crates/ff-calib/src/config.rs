//! Run configuration (JSON or YAML).

use crate::driver::Pipeline;
use ff_core::{Error, Result};
use ff_inference::{FitStatistic, FractionFitConfig, OptimizerConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Systematic labels processed when the configuration does not list any.
pub const DEFAULT_SYSTEMATICS: [&str; 5] =
    ["nominal", "eleEffWeightDown", "eleEffWeightUp", "muEffWeightDown", "muEffWeightUp"];

/// Settings for one calibration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Ordered systematic labels; report order follows this list.
    #[serde(default = "default_systematics")]
    pub systematics: Vec<String>,

    /// Which calibration to derive.
    #[serde(default)]
    pub pipeline: Pipeline,

    /// Fit objective.
    #[serde(default)]
    pub statistic: FitStatistic,

    /// Inclusive 0-based bin range entering the fit.
    #[serde(default)]
    pub fit_range: Option<(usize, usize)>,

    /// Keep per-fit summaries at debug level.
    #[serde(default)]
    pub quiet: bool,

    /// Minimiser settings.
    #[serde(default)]
    pub optimizer: OptimizerConfig,
}

/// Labels must be non-empty, non-blank and unique; results are keyed by label.
pub(crate) fn check_labels(labels: &[String]) -> Result<()> {
    if labels.is_empty() {
        return Err(Error::Config("systematics list is empty".to_string()));
    }
    let mut seen = HashSet::new();
    for label in labels {
        if label.trim().is_empty() {
            return Err(Error::Config("systematic labels must be non-empty".to_string()));
        }
        if !seen.insert(label.as_str()) {
            return Err(Error::Config(format!("systematic '{label}' listed twice")));
        }
    }
    Ok(())
}

fn default_systematics() -> Vec<String> {
    DEFAULT_SYSTEMATICS.iter().map(|s| s.to_string()).collect()
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            systematics: default_systematics(),
            pipeline: Pipeline::default(),
            statistic: FitStatistic::default(),
            fit_range: None,
            quiet: false,
            optimizer: OptimizerConfig::default(),
        }
    }
}

impl RunConfig {
    /// Defaults for a given pipeline.
    pub fn for_pipeline(pipeline: Pipeline) -> Self {
        Self { pipeline, ..Self::default() }
    }

    /// Reject empty or repeated labels.
    pub fn validate(&self) -> Result<()> {
        check_labels(&self.systematics)?;
        if let Some((first, last)) = self.fit_range {
            if first > last {
                return Err(Error::Config(format!("fit_range [{first}, {last}] is empty")));
            }
        }
        Ok(())
    }

    /// Fitter settings derived from this run configuration.
    pub fn fit_config(&self) -> FractionFitConfig {
        FractionFitConfig {
            statistic: self.statistic,
            fit_range: self.fit_range,
            quiet: self.quiet,
            optimizer: self.optimizer,
        }
    }
}

/// Read a run configuration: `.json` as JSON, anything else as YAML.
pub fn read_run_config(path: &Path) -> Result<RunConfig> {
    let bytes = std::fs::read(path)?;
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("").to_ascii_lowercase();
    let cfg: RunConfig = if ext == "json" {
        serde_json::from_slice(&bytes)?
    } else {
        serde_yaml_ng::from_slice(&bytes)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?
    };
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg: RunConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, RunConfig::default());
        assert_eq!(cfg.systematics.len(), 5);
        assert_eq!(cfg.systematics[0], "nominal");
        assert_eq!(cfg.pipeline, Pipeline::MisId);
        assert_eq!(cfg.optimizer.max_iter, 1000);
    }

    #[test]
    fn test_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "systematics: [nominal, JESUp, JESDown]\npipeline: purity\nstatistic: chi2\nfit_range: [1, 8]\noptimizer:\n  max_iter: 50"
        )
        .unwrap();

        let cfg = read_run_config(file.path()).unwrap();
        assert_eq!(cfg.systematics, vec!["nominal", "JESUp", "JESDown"]);
        assert_eq!(cfg.pipeline, Pipeline::Purity);
        assert_eq!(cfg.fit_config().statistic, FitStatistic::Chi2);
        assert_eq!(cfg.fit_range, Some((1, 8)));
        assert_eq!(cfg.optimizer.max_iter, 50);
        assert_eq!(cfg.optimizer.m, 10);
    }

    #[test]
    fn test_json_file_rejects_duplicates() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"systematics": ["nominal", "nominal"]}}"#).unwrap();
        assert!(matches!(read_run_config(file.path()), Err(Error::Config(_))));
    }

    #[test]
    fn test_empty_list_rejected() {
        let cfg = RunConfig { systematics: vec![], ..RunConfig::default() };
        assert!(cfg.validate().is_err());
    }
}
