//! Job configuration
//!
//! Mirrors the parameter document the ERP extractor is configured with:
//!
//! ```json
//! {
//!   "parameters": {
//!     "data_object": "Car",
//!     "fields": "ID,Brand,Components,Components.Manufacturer",
//!     "loading_options": {
//!       "load_type": "Incremental load",
//!       "incremental_field": "Changed",
//!       "date_from": "2024-01-01 00:00:00",
//!       "date_to": "2024-02-01 00:00:00"
//!     },
//!     "engine": { "primary_key": "ID", "column_policy": "observed_only" }
//!   }
//! }
//! ```
//!
//! Connection settings (credentials, service URL, SSH) may be present in the
//! same document; they belong to the page source and are ignored here.

use crate::error::Result;
use crate::melt::types::MeltConfig;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How the destination tables are loaded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadType {
    #[default]
    #[serde(rename = "Full Load", alias = "full_load", alias = "full")]
    Full,
    #[serde(rename = "Incremental load", alias = "incremental_load", alias = "incremental")]
    Incremental,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadingOptions {
    #[serde(default)]
    pub load_type: LoadType,

    /// Root field holding the change timestamp; required for incremental loads
    #[serde(default)]
    pub incremental_field: Option<String>,

    /// Start of the fetch window, already resolved to an absolute timestamp
    #[serde(default)]
    pub date_from: Option<String>,

    #[serde(default)]
    pub date_to: Option<String>,
}

/// Parameters of one extraction job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameters {
    /// Root object (and root table) name
    pub data_object: String,

    /// Comma-separated dotted field paths; empty means discover everything
    #[serde(default)]
    pub fields: Option<String>,

    /// Filter conditions passed through to the page source
    #[serde(default)]
    pub conditions: Option<String>,

    #[serde(default)]
    pub loading_options: LoadingOptions,

    #[serde(default)]
    pub engine: MeltConfig,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Document {
    Wrapped { parameters: Parameters },
    Bare(Parameters),
}

impl Parameters {
    pub fn new(data_object: impl Into<String>, fields: impl Into<String>) -> Self {
        Parameters {
            data_object: data_object.into(),
            fields: Some(fields.into()),
            conditions: None,
            loading_options: LoadingOptions::default(),
            engine: MeltConfig::default(),
        }
    }

    pub fn with_loading_options(mut self, loading_options: LoadingOptions) -> Self {
        self.loading_options = loading_options;
        self
    }

    pub fn with_engine(mut self, engine: MeltConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Field spec, empty when none was configured
    pub fn fields(&self) -> &str {
        self.fields.as_deref().unwrap_or("")
    }

    /// Parse a configuration document, with or without the `parameters` wrapper
    pub fn from_json_str(json: &str) -> Result<Self> {
        let document: Document = serde_json::from_str(json)?;
        Ok(match document {
            Document::Wrapped { parameters } => parameters,
            Document::Bare(parameters) => parameters,
        })
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_json_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }
}
