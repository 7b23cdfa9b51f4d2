use crate::error::Result;
use crate::melt::plan::{LoadMode, TableDescriptor};
use crate::melt::types::Row;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

static NULL: Value = Value::Null;

/// A table ready to be handed to a destination
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizedTable {
    pub descriptor: TableDescriptor,

    /// Rows aligned to `descriptor.columns`
    pub rows: Vec<Row>,
}

/// Destination for finalized tables
pub trait TableSink {
    fn write_table(&mut self, table: FinalizedTable) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Load instructions written next to each table file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub columns: Vec<String>,
    pub primary_key: Vec<String>,
    pub incremental: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incremental_key: Option<String>,
}

impl From<&TableDescriptor> for Manifest {
    fn from(descriptor: &TableDescriptor) -> Self {
        Manifest {
            columns: descriptor.columns.clone(),
            primary_key: descriptor.primary_key.clone(),
            incremental: descriptor.is_incremental(),
            incremental_key: descriptor.incremental_key.clone(),
        }
    }
}

/// Writes each table to `<dir>/<table>.jsonl` with a `.manifest` beside it.
///
/// Files are replaced on every run; merging incremental output into the
/// warehouse is left to the loader reading the manifest.
pub struct TableFileWriter {
    output_dir: PathBuf,
    written: Vec<PathBuf>,
}

impl TableFileWriter {
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Result<Self> {
        std::fs::create_dir_all(&output_dir)?;

        Ok(TableFileWriter {
            output_dir: output_dir.as_ref().to_path_buf(),
            written: Vec::new(),
        })
    }

    pub fn table_path(&self, table: &str) -> PathBuf {
        self.output_dir.join(format!("{}.jsonl", table))
    }

    /// Files written so far, table files and manifests
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl TableSink for TableFileWriter {
    fn write_table(&mut self, table: FinalizedTable) -> Result<()> {
        let path = self.table_path(&table.descriptor.name);
        let mut writer = BufWriter::new(File::create(&path)?);
        for row in &table.rows {
            serde_json::to_writer(&mut writer, row)?;
            writeln!(writer)?;
        }
        writer.flush()?;

        let manifest_path = path.with_extension("jsonl.manifest");
        let manifest = Manifest::from(&table.descriptor);
        std::fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)?;

        tracing::debug!(
            table = %table.descriptor.name,
            path = %path.display(),
            rows = table.rows.len(),
            "wrote table file"
        );

        self.written.push(path);
        self.written.push(manifest_path);
        Ok(())
    }
}

/// Writes every row of every table to a single stream, tagged with its table
pub struct StreamWriter<W: Write> {
    writer: W,
}

impl<W: Write> StreamWriter<W> {
    pub fn new(writer: W) -> Self {
        StreamWriter { writer }
    }
}

impl<W: Write> TableSink for StreamWriter<W> {
    fn write_table(&mut self, table: FinalizedTable) -> Result<()> {
        for row in table.rows {
            let mut data = Row::new();
            data.insert(
                "_table".to_string(),
                Value::String(table.descriptor.name.clone()),
            );
            data.extend(row);

            serde_json::to_writer(&mut self.writer, &data)?;
            writeln!(self.writer)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(self.writer.flush()?)
    }
}

/// Destination table kept in memory
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredTable {
    pub columns: Vec<String>,
    pub primary_key: Vec<String>,
    rows: IndexMap<String, Row>,
}

impl StoredTable {
    pub fn rows(&self) -> impl Iterator<Item = &Row> {
        self.rows.values()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row stored under the given key tuple
    pub fn get(&self, key: &[Value]) -> Option<&Row> {
        self.rows.get(&encode_key(key.iter()))
    }

    fn upsert(&mut self, row: Row) {
        let key = encode_key(
            self.primary_key
                .iter()
                .map(|column| row.get(column).unwrap_or(&NULL)),
        );
        self.rows.insert(key, row);
    }
}

/// An in-memory destination applying load semantics.
///
/// Full loads replace a table; incremental loads upsert by the full primary
/// key tuple. Key values are compared by their raw JSON representation, so
/// `1` and `"1"` are different keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryStore {
    tables: IndexMap<String, StoredTable>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self, name: &str) -> Option<&StoredTable> {
        self.tables.get(name)
    }
}

impl TableSink for MemoryStore {
    fn write_table(&mut self, table: FinalizedTable) -> Result<()> {
        let FinalizedTable { descriptor, rows } = table;

        let stored = self.tables.entry(descriptor.name.clone()).or_default();
        match descriptor.load_mode {
            LoadMode::Full => {
                *stored = StoredTable {
                    columns: descriptor.columns,
                    primary_key: descriptor.primary_key,
                    rows: IndexMap::new(),
                };
            }
            LoadMode::Incremental => {
                for column in descriptor.columns {
                    if !stored.columns.contains(&column) {
                        stored.columns.push(column);
                    }
                }
                stored.primary_key = descriptor.primary_key;
            }
        }

        for row in rows {
            stored.upsert(row);
        }
        Ok(())
    }
}

fn encode_key<'a>(values: impl Iterator<Item = &'a Value>) -> String {
    let values: Vec<&Value> = values.collect();
    // Serializing a slice of JSON values cannot fail
    serde_json::to_string(&values).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        serde_json::from_value(value).unwrap()
    }

    fn table(mode: LoadMode, rows: Vec<Value>) -> FinalizedTable {
        FinalizedTable {
            descriptor: TableDescriptor {
                name: "Car.Components".to_string(),
                columns: vec!["Car_ID".to_string(), "ID".to_string(), "Name".to_string()],
                primary_key: vec!["Car_ID".to_string(), "ID".to_string()],
                load_mode: mode,
                incremental_key: None,
            },
            rows: rows.into_iter().map(row).collect(),
        }
    }

    #[test]
    fn test_stream_writer() {
        let mut buffer = Vec::new();
        let mut writer = StreamWriter::new(&mut buffer);

        writer
            .write_table(table(LoadMode::Full, vec![json!({"Car_ID": 1, "ID": 2, "Name": "a"})]))
            .unwrap();
        writer.flush().unwrap();

        let output = String::from_utf8(buffer).unwrap();
        assert_eq!(
            output.trim(),
            r#"{"_table":"Car.Components","Car_ID":1,"ID":2,"Name":"a"}"#
        );
    }

    #[test]
    fn test_full_load_replaces() {
        let mut store = MemoryStore::new();
        store
            .write_table(table(LoadMode::Full, vec![json!({"Car_ID": 1, "ID": 1, "Name": "a"})]))
            .unwrap();
        store
            .write_table(table(LoadMode::Full, vec![json!({"Car_ID": 2, "ID": 1, "Name": "b"})]))
            .unwrap();

        let stored = store.table("Car.Components").unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored.get(&[json!(1), json!(1)]).is_none());
        assert_eq!(stored.get(&[json!(2), json!(1)]).unwrap()["Name"], "b");
    }

    #[test]
    fn test_incremental_load_upserts_by_key_tuple() {
        let mut store = MemoryStore::new();
        store
            .write_table(table(
                LoadMode::Incremental,
                vec![
                    json!({"Car_ID": 1, "ID": 1, "Name": "a"}),
                    json!({"Car_ID": 2, "ID": 1, "Name": "b"}),
                ],
            ))
            .unwrap();
        store
            .write_table(table(
                LoadMode::Incremental,
                vec![json!({"Car_ID": 1, "ID": 1, "Name": "changed"})],
            ))
            .unwrap();

        let stored = store.table("Car.Components").unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored.get(&[json!(1), json!(1)]).unwrap()["Name"], "changed");
    }

    #[test]
    fn test_keys_are_not_coerced() {
        let mut store = MemoryStore::new();
        store
            .write_table(table(
                LoadMode::Incremental,
                vec![
                    json!({"Car_ID": 1, "ID": 1, "Name": "number"}),
                    json!({"Car_ID": "1", "ID": 1, "Name": "string"}),
                ],
            ))
            .unwrap();

        assert_eq!(store.table("Car.Components").unwrap().len(), 2);
    }

    #[test]
    fn test_file_writer_writes_table_and_manifest() {
        let dir = std::env::temp_dir().join(format!("erpmelt-writer-{}", std::process::id()));
        let mut writer = TableFileWriter::new(&dir).unwrap();

        writer
            .write_table(table(
                LoadMode::Incremental,
                vec![json!({"Car_ID": 1, "ID": 2, "Name": "a"})],
            ))
            .unwrap();

        let content = std::fs::read_to_string(dir.join("Car.Components.jsonl")).unwrap();
        assert_eq!(content, "{\"Car_ID\":1,\"ID\":2,\"Name\":\"a\"}\n");

        let manifest: Manifest = serde_json::from_str(
            &std::fs::read_to_string(dir.join("Car.Components.jsonl.manifest")).unwrap(),
        )
        .unwrap();
        assert!(manifest.incremental);
        assert_eq!(manifest.primary_key, vec!["Car_ID", "ID"]);
        assert_eq!(writer.written().len(), 2);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
