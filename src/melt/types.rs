use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One output row: column name to raw JSON scalar, in column order.
pub type Row = Map<String, Value>;

/// Rows produced from a single raw record, grouped by table name.
///
/// Tables appear in the order the flattener first visited them, so the
/// root table always comes first.
pub type FlatRecord = IndexMap<String, Vec<Row>>;

/// A foreign key injected into descendant rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentKey {
    /// Column name in the child table, e.g. "Car_ID"
    pub column: String,

    /// Raw value of the ancestor's primary key
    pub value: Value,
}

impl ParentKey {
    pub fn new(column: impl Into<String>, value: Value) -> Self {
        ParentKey {
            column: column.into(),
            value,
        }
    }
}

/// What to do with declared fields that a record does not carry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnPolicy {
    /// Emit the column with a null value so the table schema reserves it.
    #[default]
    ReserveDeclared,
    /// Only emit columns that were present in at least one record.
    ObservedOnly,
}

/// Configuration for the flattening engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeltConfig {
    /// Maximum nesting depth below the root (only reachable through discovery)
    pub max_depth: usize,

    /// Separator between segments of nested table names ("Car.Components")
    pub table_separator: String,

    /// Separator between the ancestor name and its key in foreign key columns ("Car_ID")
    pub key_separator: String,

    /// Field identifying a record at every level unless overridden
    pub primary_key: String,

    /// Per-table primary key field, keyed by full table name
    pub primary_key_overrides: IndexMap<String, String>,

    pub column_policy: ColumnPolicy,

    /// Upper bound on the width of any single table
    pub max_columns: Option<usize>,
}

impl MeltConfig {
    /// Primary key field for the given table
    pub fn primary_key_for(&self, table: &str) -> &str {
        self.primary_key_overrides
            .get(table)
            .map(String::as_str)
            .unwrap_or(&self.primary_key)
    }

    /// Name of the foreign key column pointing at an ancestor level
    pub fn parent_key_column(&self, ancestor_field: &str, ancestor_key: &str) -> String {
        format!("{}{}{}", ancestor_field, self.key_separator, ancestor_key)
    }

    pub fn child_table_name(&self, parent: &str, field: &str) -> String {
        format!("{}{}{}", parent, self.table_separator, field)
    }
}

impl Default for MeltConfig {
    fn default() -> Self {
        MeltConfig {
            max_depth: 10,
            table_separator: String::from("."),
            key_separator: String::from("_"),
            primary_key: String::from("ID"),
            primary_key_overrides: IndexMap::new(),
            column_policy: ColumnPolicy::default(),
            max_columns: None,
        }
    }
}
