//! Field path parsing
//!
//! Turns a comma-separated list of dotted field paths into a tree of
//! [`ObjectNode`]s, one node per output table.

use crate::error::{MeltError, Result};
use crate::melt::types::MeltConfig;
use indexmap::{IndexMap, IndexSet};

/// Separator between segments of a configured field path
pub const PATH_SEPARATOR: char = '.';

/// One level of the object hierarchy being extracted
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectNode {
    /// Full table name, e.g. "Car.Components"
    pub name: String,

    /// Name of this level as seen from its parent ("Components"); the data object at the root
    pub field_name: String,

    /// Declared leaf fields owned by this level
    pub scalar_fields: IndexSet<String>,

    /// Declared child objects, keyed by field name
    pub children: IndexMap<String, ObjectNode>,

    /// Foreign key columns pointing at each ancestor, outermost first
    pub parent_key_names: Vec<String>,

    /// Field identifying one record at this level
    pub primary_key: String,

    /// Column carrying this level's key in every descendant table
    pub key_column: String,

    /// Whether the field spec named this branch on its own
    pub explicit: bool,

    pub depth: usize,
}

impl ObjectNode {
    /// Root node for a data object, with nothing declared yet
    pub fn root(data_object: &str, config: &MeltConfig) -> Self {
        let primary_key = config.primary_key_for(data_object).to_string();
        ObjectNode {
            name: data_object.to_string(),
            field_name: data_object.to_string(),
            scalar_fields: IndexSet::new(),
            children: IndexMap::new(),
            parent_key_names: Vec::new(),
            key_column: config.parent_key_column(data_object, &primary_key),
            primary_key,
            explicit: true,
            depth: 0,
        }
    }

    /// Build an empty node for a child field of this level.
    ///
    /// Used both while parsing and for child objects discovered in records.
    /// When the child's key column would repeat an ancestor's (a `Parts.Parts`
    /// chain), it is qualified with the child's full table name instead.
    pub fn child(&self, field_name: &str, config: &MeltConfig) -> Self {
        let name = config.child_table_name(&self.name, field_name);
        let primary_key = config.primary_key_for(&name).to_string();

        let mut parent_key_names = self.parent_key_names.clone();
        parent_key_names.push(self.key_column.clone());

        let mut key_column = config.parent_key_column(field_name, &primary_key);
        if parent_key_names.contains(&key_column) {
            key_column = config.parent_key_column(&name, &primary_key);
        }

        ObjectNode {
            key_column,
            primary_key,
            name,
            field_name: field_name.to_string(),
            scalar_fields: IndexSet::new(),
            children: IndexMap::new(),
            parent_key_names,
            explicit: false,
            depth: self.depth + 1,
        }
    }

    /// True when the field spec declared nothing at this level
    pub fn is_undeclared(&self) -> bool {
        self.scalar_fields.is_empty() && self.children.is_empty()
    }

    /// Whether rows of this level take every scalar field of the record.
    ///
    /// That is the case for a branch named on its own (`Components`) and for
    /// a level with nothing declared. Any other level emits its declared
    /// leaves only.
    pub fn selects_all(&self) -> bool {
        (self.explicit && self.depth > 0) || self.is_undeclared()
    }

    /// Primary key columns of this level's table: ancestor keys, then its own
    pub fn key_columns(&self) -> Vec<String> {
        let mut keys = self.parent_key_names.clone();
        keys.push(self.primary_key.clone());
        keys
    }

    /// Declared paths relative to this node, dot-joined.
    ///
    /// Leaves come first, then explicitly named branches and their subtrees.
    pub fn declared_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.scalar_fields.iter().cloned().collect();

        for (field, child) in &self.children {
            if child.explicit {
                paths.push(field.clone());
            }
            for sub in child.declared_paths() {
                paths.push(format!("{}{}{}", field, PATH_SEPARATOR, sub));
            }
        }

        paths
    }

    /// Visit this node and every descendant, parents before children
    pub fn walk(&self) -> Vec<&ObjectNode> {
        let mut nodes = vec![self];
        for child in self.children.values() {
            nodes.extend(child.walk());
        }
        nodes
    }

    /// Look up a node by its full table name
    pub fn find(&self, table: &str) -> Option<&ObjectNode> {
        self.walk().into_iter().find(|node| node.name == table)
    }

    fn child_mut(&mut self, field_name: &str, config: &MeltConfig) -> &mut ObjectNode {
        if !self.children.contains_key(field_name) {
            let child = self.child(field_name, config);
            self.children.insert(field_name.to_string(), child);
        }
        // The entry was inserted above when missing.
        &mut self.children[field_name]
    }

    fn insert_leaf(&mut self, segments: &[String], config: &MeltConfig) {
        match segments {
            [] => {}
            [leaf] => {
                self.scalar_fields.insert(leaf.clone());
            }
            [head, rest @ ..] => self.child_mut(head, config).insert_leaf(rest, config),
        }
    }

    fn insert_branch(&mut self, segments: &[String], config: &MeltConfig) {
        let Some((head, rest)) = segments.split_first() else {
            return;
        };

        let child = self.child_mut(head, config);
        if rest.is_empty() {
            child.explicit = true;
        } else {
            child.insert_branch(rest, config);
        }
    }
}

/// Split a comma-separated field spec into distinct, validated paths
pub fn parse_paths(fields: &str) -> Result<IndexSet<Vec<String>>> {
    let mut paths = IndexSet::new();

    for raw in fields.split(',') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }

        let segments: Vec<String> = raw
            .split(PATH_SEPARATOR)
            .map(|segment| segment.trim().to_string())
            .collect();

        if segments.iter().any(String::is_empty) {
            return Err(MeltError::config(format!(
                "field path '{}' contains an empty segment",
                raw
            )));
        }

        paths.insert(segments);
    }

    Ok(paths)
}

/// Parse a field spec into the object tree rooted at `data_object`.
///
/// An empty spec yields a root with nothing declared, which makes the
/// flattener discover fields and child objects from the records themselves.
pub fn parse_field_tree(data_object: &str, fields: &str, config: &MeltConfig) -> Result<ObjectNode> {
    let data_object = data_object.trim();
    if data_object.is_empty() {
        return Err(MeltError::config("data object name is empty"));
    }
    if data_object.contains(PATH_SEPARATOR) {
        return Err(MeltError::config(format!(
            "data object '{}' must be a single name",
            data_object
        )));
    }

    let paths = parse_paths(fields)?;

    // Any strict prefix of another path names a child object, not a field
    let mut branches: IndexSet<&[String]> = IndexSet::new();
    for path in &paths {
        for len in 1..path.len() {
            branches.insert(&path[..len]);
        }
    }

    let mut root = ObjectNode::root(data_object, config);
    for path in &paths {
        if branches.contains(path.as_slice()) {
            root.insert_branch(path, config);
        } else {
            root.insert_leaf(path, config);
        }
    }

    tracing::debug!(
        data_object,
        tables = root.walk().len(),
        "parsed field spec"
    );

    Ok(root)
}
