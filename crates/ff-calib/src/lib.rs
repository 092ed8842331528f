//! # ff-calib
//!
//! Calibration pipelines built on the fraction fitter.
//!
//! - [`store`]: histogram stores (in-memory, JSON file)
//! - [`loader`]: data and template loading per systematic label
//! - [`calibration`]: mis-ID scale factor and photon purity
//! - [`driver`]: the loop over systematic labels
//! - [`config`]: run configuration (JSON / YAML)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod calibration;
pub mod config;
pub mod driver;
pub mod loader;
pub mod store;

pub use calibration::{Purity, misid_scale_factor, photon_purity, propagate_purity, scale_factor};
pub use config::{DEFAULT_SYSTEMATICS, RunConfig, read_run_config};
pub use driver::{
    CalibrationValue, Pipeline, ResultEntry, ResultTable, RunContext, SystematicsDriver,
};
pub use loader::{Category, DATA_KEY, TemplateLoader, histogram_key};
pub use store::{JsonFileStore, MemoryStore};
