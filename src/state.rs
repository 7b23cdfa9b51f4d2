//! State carried between runs
//!
//! Each run records the columns it wrote per table. The next run seeds its
//! schemas with them so destination headers keep their order and columns
//! that a smaller page set happens not to contain do not vanish.

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    /// Table name to the columns written by the last run
    #[serde(default)]
    pub previous_columns: IndexMap<String, Vec<String>>,
}

impl RunState {
    /// Load state from a JSON file; a missing file means a first run
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no previous state, starting fresh");
            return Ok(RunState::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read state file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse state file: {}", path.display()))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).context("Failed to serialize state")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write state file: {}", path.display()))
    }

    pub fn columns(&self, table: &str) -> Option<&[String]> {
        self.previous_columns.get(table).map(Vec::as_slice)
    }
}
