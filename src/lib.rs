//! # erpmelt - ERP object extraction into relational tables
//!
//! Flattens hierarchical business objects returned page by page from an ERP
//! API (a `Car` with its `Components`, each with a `Manufacturer`) into one
//! table per object level, with foreign key columns back to every ancestor.
//!
//! ## Modules
//!
//! - **melt**: field spec parsing, record flattening, schema accumulation,
//!   load planning and table sinks
//! - **config**: job parameters
//! - **state**: column layout carried between runs
//!
//! ## Quick Start
//!
//! ```rust
//! use erpmelt::{Extraction, MemoryStore, Parameters};
//! use serde_json::json;
//!
//! # fn main() -> anyhow::Result<()> {
//! let params = Parameters::new("Car", "ID,Brand,Components,Components.Manufacturer");
//! let mut extraction = Extraction::new(&params)?;
//!
//! extraction.process_page(vec![json!({
//!     "ID": 1,
//!     "Brand": "X",
//!     "Components": [
//!         {"ID": 10, "ComponentName": "C1", "Manufacturer": {"ID": 100, "ManufacturerName": "M1"}}
//!     ]
//! })])?;
//!
//! let mut store = MemoryStore::new();
//! extraction.finish_into(&mut store)?;
//!
//! // Car, Car.Components (with Car_ID), Car.Components.Manufacturer (with Car_ID, Components_ID)
//! assert_eq!(store.table("Car.Components.Manufacturer").unwrap().len(), 1);
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use serde_json::Value;
use std::io::BufRead;

pub mod config;
pub mod error;
pub mod melt;
pub mod state;

// Re-export commonly used types for convenience
pub use config::{LoadType, LoadingOptions, Parameters};
pub use error::MeltError;
pub use melt::{
    Extraction, FinalizedTable, LoadMode, MeltConfig, MemoryStore, RunSummary, StreamWriter,
    TableDescriptor, TableFileWriter, TableSink,
};
pub use state::RunState;

/// Records of one page.
///
/// The page source returns a JSON array of records; a lone object is taken
/// as a page holding a single record.
pub fn page_records(page: Value) -> Vec<Value> {
    match page {
        Value::Array(records) => records,
        other => vec![other],
    }
}

/// Main entry point: run an extraction over newline-delimited pages
pub fn melt_pages<R: BufRead, S: TableSink + ?Sized>(
    reader: R,
    params: &Parameters,
    state: &RunState,
    sink: &mut S,
) -> Result<RunSummary> {
    let mut extraction = Extraction::resume(params, state)?;

    let pages = reader.lines().enumerate().filter_map(|(idx, line)| {
        let page = line
            .with_context(|| format!("Failed to read page {}", idx + 1))
            .and_then(|line| {
                if line.trim().is_empty() {
                    return Ok(None);
                }
                serde_json::from_str::<Value>(&line)
                    .map(|value| Some(page_records(value)))
                    .with_context(|| format!("Failed to parse page {}", idx + 1))
            });
        page.transpose()
    });

    extraction.run(pages)?;
    Ok(extraction.finish_into(sink)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_page_records() {
        assert_eq!(page_records(json!([{"ID": 1}, {"ID": 2}])).len(), 2);
        assert_eq!(page_records(json!({"ID": 1})), vec![json!({"ID": 1})]);
    }

    #[test]
    fn test_melt_pages() {
        let input = concat!(
            r#"[{"ID": 1, "Brand": "X", "Components": [{"ID": 10, "Name": "a"}]}]"#,
            "\n\n",
            r#"[{"ID": 2, "Brand": "Y", "Components": []}, {"ID": 3, "Components": [{"ID": 30}]}]"#,
            "\n",
        );

        let params = Parameters::new("Car", "ID,Brand,Components");
        let mut store = MemoryStore::new();
        let summary = melt_pages(input.as_bytes(), &params, &RunState::default(), &mut store).unwrap();

        assert_eq!(summary.stats.pages, 2);
        assert_eq!(summary.stats.records, 3);
        assert_eq!(store.table("Car").unwrap().len(), 3);

        let components = store.table("Car.Components").unwrap();
        assert_eq!(components.len(), 2);
        assert_eq!(components.columns, vec!["Car_ID", "ID", "Name"]);
    }

    #[test]
    fn test_melt_pages_reports_bad_page() {
        let params = Parameters::new("Car", "ID");
        let mut store = MemoryStore::new();

        let err = melt_pages(
            "[{\"ID\": 1}]\nnot json\n".as_bytes(),
            &params,
            &RunState::default(),
            &mut store,
        )
        .unwrap_err();

        assert!(err.to_string().contains("page 2"));
        assert!(store.table("Car").is_none());
    }
}
