//! Histogram stores.
//!
//! [`MemoryStore`] holds histograms in a map; [`JsonFileStore`] reads a JSON
//! document once and serves it from memory:
//!
//! ```json
//! {
//!   "histograms": {
//!     "dataObs":          { "contents": [120, 80, 40] },
//!     "MisIDele_nominal": { "contents": [30, 10, 2], "sumw2": [4.1, 1.2, 0.3] }
//!   }
//! }
//! ```

use ff_core::{Error, Histogram, HistogramStore, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// In-memory histogram store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    name: String,
    histograms: HashMap<String, Histogram>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), histograms: HashMap::new() }
    }

    /// Insert a histogram under its own name.
    pub fn insert(&mut self, histogram: Histogram) {
        self.histograms.insert(histogram.name.clone(), histogram);
    }

    /// Builder-style insert.
    pub fn with(mut self, histogram: Histogram) -> Self {
        self.insert(histogram);
        self
    }

    /// Number of stored histograms.
    pub fn len(&self) -> usize {
        self.histograms.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.histograms.is_empty()
    }

    /// Stored keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.histograms.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}

impl HistogramStore for MemoryStore {
    fn get(&self, name: &str) -> Result<Histogram> {
        self.histograms
            .get(name)
            .cloned()
            .ok_or_else(|| Error::MissingHistogram { name: name.to_string(), store: self.name.clone() })
    }

    fn contains(&self, name: &str) -> bool {
        self.histograms.contains_key(name)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// On-disk record for one histogram.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct HistogramRecord {
    contents: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sumw2: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    edges: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreDocument {
    histograms: HashMap<String, HistogramRecord>,
}

/// Histogram store backed by a JSON file, parsed once at open.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    inner: MemoryStore,
}

impl JsonFileStore {
    /// Open and parse a store file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let bytes = std::fs::read(&path)?;
        let mut store = Self::from_slice(&bytes, path.display().to_string())?;
        store.path = path;
        Ok(store)
    }

    /// Parse a store document from bytes. `name` labels errors.
    pub fn from_slice(bytes: &[u8], name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let doc: StoreDocument = serde_json::from_slice(bytes)?;

        let mut inner = MemoryStore::new(name.clone());
        for (key, record) in doc.histograms {
            let mut h = Histogram::new(key, record.contents)?;
            if let Some(w2) = record.sumw2 {
                h = h.with_sumw2(w2)?;
            }
            if let Some(edges) = record.edges {
                h = h.with_edges(edges)?;
            }
            inner.insert(h);
        }
        log::debug!("histogram store '{}': {} histograms", name, inner.len());

        Ok(Self { path: PathBuf::from(name), inner })
    }

    /// Write histograms as a store document.
    pub fn write<'a, I>(path: impl AsRef<Path>, histograms: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a Histogram>,
    {
        let doc = StoreDocument {
            histograms: histograms
                .into_iter()
                .map(|h| {
                    let record = HistogramRecord {
                        contents: h.bin_content.clone(),
                        sumw2: h.sumw2.clone(),
                        edges: h.bin_edges.clone(),
                    };
                    (h.name.clone(), record)
                })
                .collect(),
        };
        std::fs::write(path, serde_json::to_string_pretty(&doc)?)?;
        Ok(())
    }

    /// Path the store was read from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        self.inner.keys()
    }
}

impl HistogramStore for JsonFileStore {
    fn get(&self, name: &str) -> Result<Histogram> {
        self.inner.get(name)
    }

    fn contains(&self, name: &str) -> bool {
        self.inner.contains(name)
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
