//! Load planning
//!
//! Decides how each output table is loaded into the destination and which
//! columns identify its rows. The root table follows the configured load
//! type; child tables follow the root, identified by their full key chain.

use crate::config::{LoadType, LoadingOptions};
use crate::error::{MeltError, Result};
use crate::melt::fields::{ObjectNode, PATH_SEPARATOR};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

// Timestamps arrive already resolved, either as a date or a date with time
static TIMESTAMP_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}( \d{2}:\d{2}:\d{2})?$").unwrap()
});

/// Load semantics of a destination table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// Truncate the destination table and replace its content
    Full,
    /// Upsert rows by their full primary key tuple
    Incremental,
}

/// Everything a sink needs to know about one finalized table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: String,

    /// Final column order
    pub columns: Vec<String>,

    /// Ancestor key columns followed by the table's own key
    pub primary_key: Vec<String>,

    pub load_mode: LoadMode,

    /// Change-tracking column, set on the root table of incremental loads only
    pub incremental_key: Option<String>,
}

impl TableDescriptor {
    pub fn is_incremental(&self) -> bool {
        self.load_mode == LoadMode::Incremental
    }
}

/// Resolved load settings for a run
#[derive(Debug, Clone, PartialEq)]
pub struct LoadPlan {
    pub mode: LoadMode,
    pub incremental_field: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
}

impl LoadPlan {
    /// A plan that overwrites every table
    pub fn full() -> Self {
        LoadPlan {
            mode: LoadMode::Full,
            incremental_field: None,
            date_from: None,
            date_to: None,
        }
    }

    /// Validate the loading options against the parsed field tree.
    ///
    /// Incremental loads need a root-level incremental field and a resolved
    /// fetch window; anything missing fails here, before extraction starts.
    pub fn resolve(options: &LoadingOptions, root: &ObjectNode) -> Result<Self> {
        if options.load_type == LoadType::Full {
            return Ok(Self::full());
        }

        let missing = || {
            MeltError::config(
                "incremental load needs the incremental field, date from and date to",
            )
        };

        let field = non_blank(&options.incremental_field).ok_or_else(missing)?;
        let date_from = non_blank(&options.date_from).ok_or_else(missing)?;
        let date_to = non_blank(&options.date_to).ok_or_else(missing)?;

        if field.contains(PATH_SEPARATOR) {
            return Err(MeltError::config(format!(
                "incremental field '{}' must be a field of the root object '{}'",
                field, root.name
            )));
        }

        if !root.scalar_fields.is_empty() && !root.scalar_fields.contains(field) {
            return Err(MeltError::config(format!(
                "incremental field '{}' is not among the fields of '{}'",
                field, root.name
            )));
        }

        for (name, value) in [("date_from", date_from), ("date_to", date_to)] {
            if !TIMESTAMP_REGEX.is_match(value) {
                return Err(MeltError::config(format!(
                    "{} '{}' is not a resolved timestamp (expected YYYY-MM-DD[ HH:MM:SS])",
                    name, value
                )));
            }
        }

        if pad_timestamp(date_from) > pad_timestamp(date_to) {
            return Err(MeltError::config(format!(
                "date_from '{}' is after date_to '{}'",
                date_from, date_to
            )));
        }

        Ok(LoadPlan {
            mode: LoadMode::Incremental,
            incremental_field: Some(field.to_string()),
            date_from: Some(date_from.to_string()),
            date_to: Some(date_to.to_string()),
        })
    }

    /// Descriptor for a table with the given key chain and final columns
    pub fn describe(
        &self,
        table: &str,
        is_root: bool,
        primary_key: Vec<String>,
        columns: Vec<String>,
    ) -> TableDescriptor {
        let incremental_key = match self.mode {
            LoadMode::Incremental if is_root => self.incremental_field.clone(),
            _ => None,
        };

        TableDescriptor {
            name: table.to_string(),
            columns,
            primary_key,
            load_mode: self.mode,
            incremental_key,
        }
    }

    /// Filter conditions for the page source, with the incremental window appended.
    ///
    /// Produces `<field>;GE;<from>,<field>;LE;<to>` after any existing conditions.
    pub fn fetch_conditions(&self, base: Option<&str>) -> Option<String> {
        let base = base.map(str::trim).filter(|conditions| !conditions.is_empty());

        let window = match (&self.incremental_field, &self.date_from, &self.date_to) {
            (Some(field), Some(from), Some(to)) if self.mode == LoadMode::Incremental => {
                Some(format!("{field};GE;{from},{field};LE;{to}"))
            }
            _ => None,
        };

        match (base, window) {
            (Some(base), Some(window)) => Some(format!("{},{}", base, window)),
            (Some(base), None) => Some(base.to_string()),
            (None, window) => window,
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn pad_timestamp(value: &str) -> String {
    if value.len() == 10 {
        format!("{} 00:00:00", value)
    } else {
        value.to_string()
    }
}
