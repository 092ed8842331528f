//! Systematic-variation driver.
//!
//! For every configured label: load templates, fit, derive the calibration,
//! record the result. A fit that does not converge is logged and still
//! recorded; any other failure stops the run with the label attached, leaving
//! the results gathered so far in the [`RunContext`].

use crate::calibration::{misid_scale_factor, photon_purity};
use crate::config::{RunConfig, check_labels};
use crate::loader::{Category, TemplateLoader};
use ff_core::{Error, FitOutcome, FractionFitter, Histogram, HistogramStore, Result};
use ff_inference::TemplateFractionFitter;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Calibration pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Pipeline {
    /// Electron mis-ID scale factor from the e+gamma mass templates.
    #[default]
    #[serde(rename = "misid")]
    MisId,
    /// Photon purity from the charged-hadron isolation templates.
    #[serde(rename = "purity")]
    Purity,
}

impl Pipeline {
    /// Ordered template categories; template 0 is the calibrated component.
    pub fn categories(self) -> Vec<Category> {
        match self {
            Pipeline::MisId => vec![
                Category::single("MisIDele"),
                Category::composite("OtherMC", &["Other", "WGamma", "ZGamma"]),
            ],
            Pipeline::Purity => vec![Category::single("Isolated"), Category::single("NonPrompt")],
        }
    }

    /// Loader reading this pipeline's categories.
    pub fn loader(self) -> TemplateLoader {
        TemplateLoader::new(self.categories())
    }

    /// Derive the calibration value from a fit.
    pub fn calibrate(
        self,
        outcome: &FitOutcome,
        data: &Histogram,
        templates: &[Histogram],
    ) -> Result<CalibrationValue> {
        match self {
            Pipeline::MisId => {
                let value = misid_scale_factor(outcome, data, templates)?;
                Ok(CalibrationValue::ScaleFactor { value })
            }
            Pipeline::Purity => {
                let purity = photon_purity(outcome, data, templates)?;
                Ok(CalibrationValue::Purity { value: purity.value, uncertainty: purity.uncertainty })
            }
        }
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pipeline::MisId => f.write_str("misid"),
            Pipeline::Purity => f.write_str("purity"),
        }
    }
}

impl FromStr for Pipeline {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "misid" | "mis-id" => Ok(Pipeline::MisId),
            "purity" => Ok(Pipeline::Purity),
            other => Err(Error::Config(format!("unknown pipeline '{other}'"))),
        }
    }
}

/// Calibration result for one label.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CalibrationValue {
    /// Multiplicative correction on the template normalisation.
    ScaleFactor {
        /// Scale factor.
        value: f64,
    },
    /// Purity and its propagated uncertainty.
    Purity {
        /// Purity.
        value: f64,
        /// Uncertainty.
        uncertainty: f64,
    },
}

impl CalibrationValue {
    /// Central value.
    pub fn value(&self) -> f64 {
        match *self {
            CalibrationValue::ScaleFactor { value } | CalibrationValue::Purity { value, .. } => value,
        }
    }

    /// Uncertainty, when the pipeline propagates one.
    pub fn uncertainty(&self) -> Option<f64> {
        match *self {
            CalibrationValue::ScaleFactor { .. } => None,
            CalibrationValue::Purity { uncertainty, .. } => Some(uncertainty),
        }
    }
}

impl fmt::Display for CalibrationValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationValue::ScaleFactor { value } => write!(f, "scale factor = {value:.6}"),
            CalibrationValue::Purity { value, uncertainty } => {
                write!(f, "purity = {value:.6} +- {uncertainty:.6}")
            }
        }
    }
}

/// One row of the result table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEntry {
    /// Systematic label.
    pub label: String,
    /// Fit status code (`0` = converged).
    pub status: i32,
    /// Calibration result.
    pub result: CalibrationValue,
    /// Fitted fractions, template order.
    pub fractions: Vec<f64>,
    /// Fraction uncertainties.
    pub uncertainties: Vec<f64>,
}

impl ResultEntry {
    /// Whether the underlying fit converged.
    pub fn converged(&self) -> bool {
        self.status == 0
    }
}

/// Insertion-ordered label -> result table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultTable {
    /// Pipeline that produced the table.
    pub pipeline: Pipeline,
    /// Entries in processing order.
    pub entries: Vec<ResultEntry>,
}

impl ResultTable {
    /// Empty table.
    pub fn new(pipeline: Pipeline) -> Self {
        Self { pipeline, entries: Vec::new() }
    }

    /// Entry for `label`.
    pub fn get(&self, label: &str) -> Option<&ResultEntry> {
        self.entries.iter().find(|e| e.label == label)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Labels whose fit did not converge.
    pub fn failed_labels(&self) -> Vec<&str> {
        self.entries.iter().filter(|e| !e.converged()).map(|e| e.label.as_str()).collect()
    }

    fn push(&mut self, entry: ResultEntry) -> Result<()> {
        if self.get(&entry.label).is_some() {
            return Err(Error::Config(format!("systematic '{}' already recorded", entry.label)));
        }
        self.entries.push(entry);
        Ok(())
    }
}

impl fmt::Display for ResultTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} results ({} systematics)", self.pipeline, self.entries.len())?;
        let width = self.entries.iter().map(|e| e.label.len()).max().unwrap_or(0);
        for e in &self.entries {
            write!(f, "  {:<width$}  {}", e.label, e.result)?;
            if !e.converged() {
                write!(f, "  [fit status {}]", e.status)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Process-scoped state for one run: the open store and the accumulating results.
pub struct RunContext<S: HistogramStore> {
    store: S,
    results: ResultTable,
}

impl<S: HistogramStore> RunContext<S> {
    /// Start a run over `store`.
    pub fn new(store: S, pipeline: Pipeline) -> Self {
        Self { store, results: ResultTable::new(pipeline) }
    }

    /// The histogram store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Results recorded so far.
    pub fn results(&self) -> &ResultTable {
        &self.results
    }

    /// Finish the run, releasing the store.
    pub fn into_results(self) -> ResultTable {
        self.results
    }
}

/// Repeats load -> fit -> calibrate over an ordered list of systematic labels.
pub struct SystematicsDriver<F: FractionFitter> {
    pipeline: Pipeline,
    systematics: Vec<String>,
    loader: TemplateLoader,
    fitter: F,
}

impl SystematicsDriver<TemplateFractionFitter> {
    /// Driver with the default fitter, configured from a run configuration.
    pub fn from_config(config: &RunConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(
            config.pipeline,
            config.systematics.clone(),
            TemplateFractionFitter::new(config.fit_config()),
        ))
    }
}

impl<F: FractionFitter> SystematicsDriver<F> {
    /// Driver over `systematics` with an explicit fitter.
    pub fn new(pipeline: Pipeline, systematics: Vec<String>, fitter: F) -> Self {
        Self { pipeline, systematics, loader: pipeline.loader(), fitter }
    }

    /// Replace the template loader (custom categories or data key).
    pub fn with_loader(mut self, loader: TemplateLoader) -> Self {
        self.loader = loader;
        self
    }

    /// Pipeline this driver runs.
    pub fn pipeline(&self) -> Pipeline {
        self.pipeline
    }

    /// Labels in processing order.
    pub fn systematics(&self) -> &[String] {
        &self.systematics
    }

    /// Load templates for `label`, fit them to `data` and calibrate.
    pub fn process_label(
        &self,
        store: &dyn HistogramStore,
        data: &Histogram,
        label: &str,
    ) -> Result<ResultEntry> {
        let templates = self.loader.load_templates(store, label)?;

        let outcome = self.fitter.fit(data, &templates)?;
        if !outcome.converged() {
            log::warn!(
                "Error in fit while processing {} sample: exit status {}",
                label,
                outcome.status_code()
            );
        }

        let result = self.pipeline.calibrate(&outcome, data, &templates)?;
        log::debug!("{label}: {result}");

        Ok(ResultEntry {
            label: label.to_string(),
            status: outcome.status_code(),
            result,
            fractions: outcome.fractions,
            uncertainties: outcome.uncertainties,
        })
    }

    /// Process every label into `ctx`.
    ///
    /// Repeated labels, or labels `ctx` already holds, are a configuration error
    /// raised before any fit. Otherwise stops at the first fatal error; entries
    /// recorded before it stay in `ctx`.
    pub fn run<S: HistogramStore>(&self, ctx: &mut RunContext<S>) -> Result<()> {
        if ctx.results.pipeline != self.pipeline {
            return Err(Error::Validation(format!(
                "run context collects {} results, driver runs {}",
                ctx.results.pipeline, self.pipeline
            )));
        }
        check_labels(&self.systematics)?;
        if let Some(label) = self.systematics.iter().find(|l| ctx.results.get(l).is_some()) {
            return Err(Error::Config(format!("systematic '{label}' already recorded")));
        }
        log::info!(
            "{} pipeline over {} systematics using store '{}'",
            self.pipeline,
            self.systematics.len(),
            ctx.store.name()
        );

        let data = self.loader.load_data(&ctx.store)?;
        for label in &self.systematics {
            let entry = self
                .process_label(&ctx.store, &data, label)
                .map_err(|e| e.for_systematic(label))?;
            ctx.results.push(entry)?;
        }

        let failed = ctx.results.failed_labels();
        if !failed.is_empty() {
            log::warn!("{} of {} fits did not converge: {:?}", failed.len(), ctx.results.len(), failed);
        }
        Ok(())
    }
}
