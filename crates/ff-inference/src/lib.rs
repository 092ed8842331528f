//! # ff-inference
//!
//! Template fraction fitting for fracfit.
//!
//! This crate provides:
//! - A box-constrained L-BFGS wrapper around argmin
//! - Barlow-Beeston profiling of finite template statistics
//! - The binned fraction fitter (likelihood or chi-square)
//!
//! ## Architecture
//!
//! The fitter implements [`ff_core::FractionFitter`]; callers depend on that
//! trait, not on the minimiser.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Per-bin profiling of true template contents.
pub mod barlow_beeston;
/// Binned template fraction fit.
pub mod fraction_fit;
/// Numerical Hessian and covariance at a minimum.
pub mod hessian;
/// Generic numerical optimizer (L-BFGS-B backend).
pub mod optimizer;

pub use fraction_fit::{FitStatistic, FractionFitConfig, TemplateFractionFitter};
pub use optimizer::{LbfgsbOptimizer, ObjectiveFunction, OptimizationResult, OptimizerConfig};
