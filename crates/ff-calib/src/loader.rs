//! Template loading from a histogram store.
//!
//! Store keys follow `{stem}_{label}`; data lives under a fixed key.

use ff_core::{Error, Histogram, HistogramStore, Result};
use serde::{Deserialize, Serialize};

/// Store key of the observed data histogram.
pub const DATA_KEY: &str = "dataObs";

/// Store key for a category stem under a systematic label.
pub fn histogram_key(stem: &str, label: &str) -> String {
    format!("{stem}_{label}")
}

/// One template: a logical category built from one or more stored histograms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    /// Category name, used as the composite histogram name.
    pub name: String,
    /// Stored histogram stems summed into this category.
    pub stems: Vec<String>,
}

impl Category {
    /// Category backed by a single stored histogram with the same stem.
    pub fn single(stem: &str) -> Self {
        Self { name: stem.to_string(), stems: vec![stem.to_string()] }
    }

    /// Category summed from several stored histograms.
    pub fn composite(name: &str, stems: &[&str]) -> Self {
        Self { name: name.to_string(), stems: stems.iter().map(|s| s.to_string()).collect() }
    }
}

/// Fetches data and templates for one systematic label at a time.
#[derive(Debug, Clone)]
pub struct TemplateLoader {
    data_key: String,
    categories: Vec<Category>,
}

impl TemplateLoader {
    /// Loader for an ordered category list, reading data from [`DATA_KEY`].
    pub fn new(categories: Vec<Category>) -> Self {
        Self { data_key: DATA_KEY.to_string(), categories }
    }

    /// Read data from a different key.
    pub fn with_data_key(mut self, key: impl Into<String>) -> Self {
        self.data_key = key.into();
        self
    }

    /// Ordered template categories.
    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    /// Data histogram. The same for every systematic label.
    pub fn load_data(&self, store: &dyn HistogramStore) -> Result<Histogram> {
        store.get(&self.data_key)
    }

    /// Templates for `label`, in category order.
    pub fn load_templates(&self, store: &dyn HistogramStore, label: &str) -> Result<Vec<Histogram>> {
        self.categories.iter().map(|c| self.load_category(store, c, label)).collect()
    }

    fn load_category(
        &self,
        store: &dyn HistogramStore,
        category: &Category,
        label: &str,
    ) -> Result<Histogram> {
        let parts = category
            .stems
            .iter()
            .map(|stem| store.get(&histogram_key(stem, label)))
            .collect::<Result<Vec<_>>>()?;

        match parts.as_slice() {
            [] => Err(Error::Validation(format!("category '{}' has no histograms", category.name))),
            [single] => Ok(single.clone()),
            _ => {
                let composite = Histogram::sum(histogram_key(&category.name, label), parts.iter())?;
                log::debug!(
                    "summed {} histograms into '{}' (integral {:.3})",
                    parts.len(),
                    composite.name,
                    composite.integral()
                );
                Ok(composite)
            }
        }
    }
}
