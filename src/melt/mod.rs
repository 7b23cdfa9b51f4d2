//! Object-graph flattening - turn nested ERP records into relational tables
//!
//! A field spec is parsed into a tree of object levels ([`fields`]). Each
//! raw record is walked along that tree ([`extractor`]), producing one row
//! per level with the full chain of ancestor keys injected. Rows from all
//! pages are merged into stable per-table schemas ([`accumulator`]), tagged
//! with their load semantics ([`plan`]) and handed to a sink ([`writer`]).
//! [`run`] drives a whole extraction.

pub mod types;
pub mod fields;
pub mod shape;
pub mod extractor;
pub mod accumulator;
pub mod plan;
pub mod writer;
pub mod run;

pub use types::{ColumnPolicy, FlatRecord, MeltConfig, ParentKey, Row};
pub use fields::{parse_field_tree, ObjectNode};
pub use extractor::{Flattened, Flattener};
pub use accumulator::{AccumulatedTable, SchemaAccumulator};
pub use plan::{LoadMode, LoadPlan, TableDescriptor};
pub use writer::{FinalizedTable, Manifest, MemoryStore, StreamWriter, TableFileWriter, TableSink};
pub use run::{Extraction, RunStats, RunSummary};
