//! Error types for fracfit

use thiserror::Error;

/// fracfit error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration could not be parsed or is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// A requested histogram is not present in the store
    #[error("histogram '{name}' not found in store '{store}'")]
    MissingHistogram {
        /// Store key that was requested.
        name: String,
        /// Name of the store that was queried.
        store: String,
    },

    /// Two histograms that must share a binning do not
    #[error("binning mismatch between '{left}' and '{right}': {detail}")]
    BinningMismatch {
        /// First histogram.
        left: String,
        /// Second histogram.
        right: String,
        /// What differs.
        detail: String,
    },

    /// A normalisation histogram has zero integral
    #[error("histogram '{name}' has zero integral; its scale factor is undefined")]
    DegenerateTemplate {
        /// Histogram with the zero integral.
        name: String,
    },

    /// Total rate entering a purity ratio is zero
    #[error("total rate is {total_rate}; purity is undefined")]
    DegenerateRate {
        /// Offending total rate.
        total_rate: f64,
    },

    /// A fatal error raised while processing one systematic variation
    #[error("systematic '{label}': {source}")]
    Systematic {
        /// Systematic label being processed.
        label: String,
        /// Underlying error.
        #[source]
        source: Box<Error>,
    },

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),
}

impl Error {
    /// Attach a systematic label to an error. Already-labelled errors are kept as is.
    pub fn for_systematic(self, label: &str) -> Self {
        match self {
            Error::Systematic { .. } => self,
            other => Error::Systematic { label: label.to_string(), source: Box::new(other) },
        }
    }

    /// The innermost error, skipping systematic context.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Systematic { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
