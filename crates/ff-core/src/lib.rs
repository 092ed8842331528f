//! # ff-core
//!
//! Core types, traits, and error handling for fracfit.
//!
//! This crate provides:
//! - Common error types
//! - The [`Histogram`] used for data and templates
//! - Core traits ([`HistogramStore`], [`FractionFitter`])
//! - The [`FitOutcome`] shared by fitters and calculators

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod histogram;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use histogram::Histogram;
pub use traits::{FractionFitter, HistogramStore};
pub use types::{FitOutcome, FitStatus};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
