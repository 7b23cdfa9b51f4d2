//! Extraction runs
//!
//! An [`Extraction`] owns everything scoped to one run: the parsed field
//! tree, the load plan, the accumulated schemas and the buffered rows.
//! Pages are processed strictly in the order they are fed in.

use crate::config::Parameters;
use crate::error::{MeltError, Result};
use crate::melt::accumulator::{AccumulatedTable, SchemaAccumulator};
use crate::melt::extractor::Flattener;
use crate::melt::fields::{parse_field_tree, ObjectNode};
use crate::melt::plan::LoadPlan;
use crate::melt::shape::ValueShape;
use crate::melt::types::MeltConfig;
use crate::melt::writer::{FinalizedTable, TableSink};
use crate::state::RunState;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

/// Pages between progress messages
const PROGRESS_EVERY: u64 = 100;

/// Counters for one run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    pub pages: u64,
    pub records: u64,
    pub rows: IndexMap<String, u64>,
    pub coerced_values: u64,
    pub shadowed_fields: u64,
}

/// What a finished run leaves behind besides its tables
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub state: RunState,
    pub stats: RunStats,
}

/// One extraction run over a stream of pages
#[derive(Debug)]
pub struct Extraction {
    flattener: Flattener,
    plan: LoadPlan,
    conditions: Option<String>,
    accumulator: SchemaAccumulator,
    table_keys: IndexMap<String, Vec<String>>,
    stats: RunStats,
}

impl Extraction {
    /// Set up a first run
    pub fn new(params: &Parameters) -> Result<Self> {
        Self::resume(params, &RunState::default())
    }

    /// Set up a run that continues the column layout of a previous one.
    ///
    /// All configuration is validated here, before any page is read.
    pub fn resume(params: &Parameters, state: &RunState) -> Result<Self> {
        let config = params.engine.clone();
        let tree = parse_field_tree(&params.data_object, params.fields(), &config)
            .map_err(|err| err.with_context("fields"))?;

        let deepest = tree.walk().iter().map(|node| node.depth).max().unwrap_or(0);
        if deepest > config.max_depth {
            return Err(MeltError::config(format!(
                "field spec nests {} levels deep, more than max_depth {}",
                deepest, config.max_depth
            )));
        }

        let plan = LoadPlan::resolve(&params.loading_options, &tree)
            .map_err(|err| err.with_context("loading_options"))?;

        let mut accumulator = SchemaAccumulator::new(config.max_columns)
            .with_previous_columns(&state.previous_columns);
        let mut table_keys = IndexMap::new();
        for node in tree.walk() {
            let keys = node.key_columns();
            accumulator.register(&node.name, &keys);
            table_keys.insert(node.name.clone(), keys);
        }

        tracing::info!(
            data_object = %tree.name,
            tables = table_keys.len(),
            mode = ?plan.mode,
            "prepared extraction"
        );

        Ok(Extraction {
            flattener: Flattener::new(tree, config),
            plan,
            conditions: params.conditions.clone(),
            accumulator,
            table_keys,
            stats: RunStats::default(),
        })
    }

    pub fn tree(&self) -> &ObjectNode {
        self.flattener.tree()
    }

    pub fn plan(&self) -> &LoadPlan {
        &self.plan
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn accumulator(&self) -> &SchemaAccumulator {
        &self.accumulator
    }

    /// Filter conditions the page source should fetch with
    pub fn fetch_conditions(&self) -> Option<String> {
        self.plan.fetch_conditions(self.conditions.as_deref())
    }

    /// Flatten one page of root records.
    ///
    /// The page is applied as a whole: if any record fails, none of its rows
    /// reach the accumulated tables.
    pub fn process_page(&mut self, records: Vec<Value>) -> Result<()> {
        let page = self.stats.pages;
        let first_ordinal = self.stats.records;

        let mut staged = Vec::with_capacity(records.len());
        let mut new_keys: IndexMap<String, Vec<String>> = IndexMap::new();
        let mut coerced = 0;
        let mut shadowed = 0;

        for (index, record) in records.iter().enumerate() {
            let Value::Object(obj) = record else {
                return Err(MeltError::InvalidRecord {
                    page,
                    index,
                    found: ValueShape::of(record).as_str(),
                });
            };

            let flattened = self.flattener.flatten(obj, first_ordinal + index as u64)?;
            coerced += flattened.coerced;
            shadowed += flattened.shadowed;
            for (table, keys) in flattened.keys {
                if !self.table_keys.contains_key(&table) {
                    new_keys.entry(table).or_insert(keys);
                }
            }
            staged.push(flattened.tables);
        }

        let mut row_counts: IndexMap<String, u64> = IndexMap::new();
        for tables in &staged {
            for (table, rows) in tables {
                *row_counts.entry(table.clone()).or_insert(0) += rows.len() as u64;
            }
        }

        self.accumulator.observe_all(staged)?;

        for (table, keys) in new_keys {
            tracing::debug!(table = %table, "discovered table");
            self.table_keys.insert(table, keys);
        }
        for (table, count) in row_counts {
            *self.stats.rows.entry(table).or_insert(0) += count;
        }
        self.stats.pages += 1;
        self.stats.records += records.len() as u64;
        self.stats.coerced_values += coerced;
        self.stats.shadowed_fields += shadowed;

        if page % PROGRESS_EVERY == 0 {
            tracing::info!(page = page + 1, records = self.stats.records, "processing page");
        } else {
            tracing::debug!(page = page + 1, records = records.len(), "processed page");
        }

        Ok(())
    }

    /// Feed every page of a source through the run.
    ///
    /// A failing page source stops the run and its error is returned as is.
    pub fn run<I, E>(&mut self, pages: I) -> Result<()>
    where
        I: IntoIterator<Item = std::result::Result<Vec<Value>, E>>,
        E: Into<anyhow::Error>,
    {
        for page in pages {
            let records = page.map_err(|err| MeltError::External(err.into()))?;
            self.process_page(records)?;
        }
        Ok(())
    }

    /// Finalize all tables, root first
    pub fn finish(self) -> (Vec<FinalizedTable>, RunSummary) {
        let config = self.flattener.config().clone();
        let root = self.flattener.tree().name.clone();

        let mut accumulated = self.accumulator.finish();
        let names: Vec<String> = accumulated.iter().map(|table| table.name.clone()).collect();
        for table in &mut accumulated {
            prune_object_leaf_columns(table, &names, &config);
        }

        let previous_columns = accumulated
            .iter()
            .map(|table| (table.name.clone(), table.columns.clone()))
            .collect();

        let tables: Vec<FinalizedTable> = accumulated
            .into_iter()
            .filter_map(|table| {
                // Tables only known from a previous run's state are not part of this one
                let keys = self.table_keys.get(&table.name)?.clone();
                let descriptor = self
                    .plan
                    .describe(&table.name, table.name == root, keys, table.columns);

                tracing::info!(
                    table = %descriptor.name,
                    columns = descriptor.columns.len(),
                    rows = table.rows.len(),
                    mode = ?descriptor.load_mode,
                    "finalized table"
                );

                Some(FinalizedTable {
                    descriptor,
                    rows: table.rows,
                })
            })
            .collect();

        let summary = RunSummary {
            state: RunState { previous_columns },
            stats: self.stats,
        };

        (tables, summary)
    }

    /// Finalize all tables and hand them to a sink
    pub fn finish_into<S: TableSink + ?Sized>(self, sink: &mut S) -> Result<RunSummary> {
        let (tables, summary) = self.finish();
        for table in tables {
            sink.write_table(table)?;
        }
        sink.flush()?;
        Ok(summary)
    }
}

/// Drop columns reserved for a declared leaf that only ever held objects.
///
/// Such a column is null in every row and shadows the child table the leaf
/// expanded into.
fn prune_object_leaf_columns(table: &mut AccumulatedTable, names: &[String], config: &MeltConfig) {
    let pruned: Vec<String> = table
        .columns
        .iter()
        .filter(|column| {
            let child = config.child_table_name(&table.name, column);
            names.contains(&child)
                && table
                    .rows
                    .iter()
                    .all(|row| row.get(column.as_str()).map_or(true, Value::is_null))
        })
        .cloned()
        .collect();

    if pruned.is_empty() {
        return;
    }

    tracing::debug!(table = %table.name, columns = ?pruned, "dropping columns of object leaves");
    table.columns.retain(|column| !pruned.contains(column));
    for row in &mut table.rows {
        *row = std::mem::take(row)
            .into_iter()
            .filter(|(column, _)| !pruned.contains(column))
            .collect();
    }
}
