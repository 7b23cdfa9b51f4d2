use crate::error::{MeltError, Result};
use crate::melt::fields::ObjectNode;
use crate::melt::shape::{coerce_to_scalar, ValueShape};
use crate::melt::types::{ColumnPolicy, FlatRecord, MeltConfig, ParentKey, Row};
use indexmap::IndexMap;
use serde_json::{Map, Value};

/// Rows produced from one raw record
#[derive(Debug, Clone, Default)]
pub struct Flattened {
    pub tables: FlatRecord,

    /// Primary key columns of every table that received a row
    pub keys: IndexMap<String, Vec<String>>,

    /// Values that had the wrong shape for their field and were stringified
    pub coerced: u64,

    /// Record fields skipped because they carried an ancestor key column's name
    pub shadowed: u64,
}

impl Flattened {
    pub fn rows(&self, table: &str) -> &[Row] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// A nested value waiting to be expanded into its own table
struct Pending<'v> {
    node: std::borrow::Cow<'v, ObjectNode>,
    value: &'v Value,
}

/// Walks raw records along an object tree, emitting one row per table level
#[derive(Debug, Clone)]
pub struct Flattener {
    tree: ObjectNode,
    config: MeltConfig,
}

impl Flattener {
    pub fn new(tree: ObjectNode, config: MeltConfig) -> Self {
        Flattener { tree, config }
    }

    pub fn tree(&self) -> &ObjectNode {
        &self.tree
    }

    pub fn config(&self) -> &MeltConfig {
        &self.config
    }

    /// Flatten one record of the root object.
    ///
    /// `ordinal` is the record's position in the run and stands in for the
    /// primary key when the record has none.
    pub fn flatten(&self, record: &Map<String, Value>, ordinal: u64) -> Result<Flattened> {
        let mut out = Flattened::default();

        // Declared tables are always reported, even when this record has no rows for them
        for node in self.tree.walk() {
            out.tables.entry(node.name.clone()).or_default();
        }

        self.flatten_object(&self.tree, record, &[], ordinal, &mut out)?;
        Ok(out)
    }

    fn flatten_object(
        &self,
        node: &ObjectNode,
        obj: &Map<String, Value>,
        parent_keys: &[ParentKey],
        position: u64,
        out: &mut Flattened,
    ) -> Result<()> {
        if node.depth > self.config.max_depth {
            return Err(MeltError::DepthLimit {
                table: node.name.clone(),
                limit: self.config.max_depth,
            });
        }

        let mut row = Row::new();
        for key in parent_keys {
            row.insert(key.column.clone(), key.value.clone());
        }

        let own_key = self.primary_key_value(node, obj, position, out);
        row.insert(node.primary_key.clone(), own_key.clone());

        let mut nested: Vec<Pending<'_>> = Vec::new();
        let selects_all = node.selects_all();

        // Declared leaves: columns, or whole objects to expand as child tables
        for field in &node.scalar_fields {
            if *field == node.primary_key {
                continue;
            }

            let Some(value) = obj.get(field) else {
                let reserve = self.config.column_policy == ColumnPolicy::ReserveDeclared;
                if reserve && !selects_all && !is_parent_key(parent_keys, field) {
                    row.insert(field.clone(), Value::Null);
                }
                continue;
            };

            let shape = ValueShape::of(value);
            if shape.is_nested() {
                nested.push(Pending {
                    node: std::borrow::Cow::Owned(node.child(field, &self.config)),
                    value,
                });
            } else if selects_all {
                // Leaves listed below a fully selected level name nested objects
                if shape != ValueShape::Null {
                    let coerced = self.coerce(node, field, value, shape, out);
                    self.put(&mut row, node, parent_keys, field, coerced, out);
                }
            } else if shape.is_columnar() {
                self.put(&mut row, node, parent_keys, field, value.clone(), out);
            } else {
                let coerced = self.coerce(node, field, value, shape, out);
                self.put(&mut row, node, parent_keys, field, coerced, out);
            }
        }

        // Every other scalar of the record, and its nested objects when no child is declared
        if selects_all {
            let discover_children = node.children.is_empty();

            for (field, value) in obj {
                if *field == node.primary_key
                    || node.scalar_fields.contains(field)
                    || node.children.contains_key(field)
                {
                    continue;
                }

                let shape = ValueShape::of(value);
                if shape.is_columnar() {
                    self.put(&mut row, node, parent_keys, field, value.clone(), out);
                } else if shape.is_nested() {
                    if discover_children {
                        nested.push(Pending {
                            node: std::borrow::Cow::Owned(node.child(field, &self.config)),
                            value,
                        });
                    }
                } else {
                    let coerced = self.coerce(node, field, value, shape, out);
                    self.put(&mut row, node, parent_keys, field, coerced, out);
                }
            }
        }

        // Declared child objects
        for (field, child) in &node.children {
            let Some(value) = obj.get(field) else {
                continue;
            };

            let shape = ValueShape::of(value);
            match shape {
                ValueShape::Null => {}
                ValueShape::Scalar | ValueShape::ScalarArray => {
                    let coerced = self.coerce(node, field, value, shape, out);
                    self.put(&mut row, node, parent_keys, field, coerced, out);
                }
                ValueShape::Object | ValueShape::ObjectArray | ValueShape::EmptyArray => {
                    nested.push(Pending {
                        node: std::borrow::Cow::Borrowed(child),
                        value,
                    });
                }
            }
        }

        out.tables.entry(node.name.clone()).or_default().push(row);
        out.keys
            .entry(node.name.clone())
            .or_insert_with(|| node.key_columns());

        if nested.is_empty() {
            return Ok(());
        }

        let mut child_keys = parent_keys.to_vec();
        child_keys.push(ParentKey::new(node.key_column.clone(), own_key));

        for pending in nested {
            self.flatten_nested(&pending.node, pending.value, &child_keys, out)?;
        }

        Ok(())
    }

    /// Expand a nested value into rows of the child table
    fn flatten_nested(
        &self,
        node: &ObjectNode,
        value: &Value,
        parent_keys: &[ParentKey],
        out: &mut Flattened,
    ) -> Result<()> {
        match value {
            Value::Object(obj) => {
                self.flatten_object(node, obj, parent_keys, 0, out)?;
            }
            Value::Array(items) => {
                out.tables.entry(node.name.clone()).or_default();
                out.keys
                    .entry(node.name.clone())
                    .or_insert_with(|| node.key_columns());
                for (idx, item) in items.iter().enumerate() {
                    if let Value::Object(obj) = item {
                        self.flatten_object(node, obj, parent_keys, idx as u64, out)?;
                    }
                }
            }
            _ => {}
        }

        Ok(())
    }

    /// Raw primary key of a record, or its position when the key is missing
    fn primary_key_value(
        &self,
        node: &ObjectNode,
        obj: &Map<String, Value>,
        position: u64,
        out: &mut Flattened,
    ) -> Value {
        match obj.get(&node.primary_key) {
            None | Some(Value::Null) => Value::from(position),
            Some(value) => {
                let shape = ValueShape::of(value);
                if shape.is_columnar() {
                    value.clone()
                } else {
                    self.coerce(node, &node.primary_key, value, shape, out)
                }
            }
        }
    }

    /// Add a record field to the row unless it would overwrite an ancestor key
    fn put(
        &self,
        row: &mut Row,
        node: &ObjectNode,
        parent_keys: &[ParentKey],
        field: &str,
        value: Value,
        out: &mut Flattened,
    ) {
        if is_parent_key(parent_keys, field) {
            tracing::warn!(
                table = %node.name,
                field,
                "record field has the name of an ancestor key column, skipping it"
            );
            out.shadowed += 1;
            return;
        }
        row.insert(field.to_string(), value);
    }

    fn coerce(
        &self,
        node: &ObjectNode,
        field: &str,
        value: &Value,
        shape: ValueShape,
        out: &mut Flattened,
    ) -> Value {
        tracing::warn!(
            table = %node.name,
            field,
            found = shape.as_str(),
            "unexpected value shape, storing it as a JSON string"
        );
        out.coerced += 1;
        coerce_to_scalar(value)
    }
}

fn is_parent_key(parent_keys: &[ParentKey], field: &str) -> bool {
    parent_keys.iter().any(|key| key.column == field)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::melt::fields::parse_field_tree;
    use serde_json::json;

    fn flattener(fields: &str) -> Flattener {
        flattener_with(fields, MeltConfig::default())
    }

    fn flattener_with(fields: &str, config: MeltConfig) -> Flattener {
        let tree = parse_field_tree("Car", fields, &config).unwrap();
        Flattener::new(tree, config)
    }

    fn flatten(flattener: &Flattener, record: Value) -> Flattened {
        let Value::Object(obj) = record else {
            panic!("test record must be an object");
        };
        flattener.flatten(&obj, 0).unwrap()
    }

    fn columns(row: &Row) -> Vec<&str> {
        row.keys().map(String::as_str).collect()
    }

    #[test]
    fn test_car_components_manufacturer() {
        let flattener =
            flattener("ID,Brand,Model,YearOfBuild,Components,Components.Manufacturer");
        let out = flatten(
            &flattener,
            json!({
                "ID": 1,
                "Brand": "X",
                "Model": "Y",
                "YearOfBuild": 2020,
                "Components": [{
                    "ID": 10,
                    "ComponentName": "C1",
                    "Manufacturer": {"ID": 100, "ManufacturerName": "M1"}
                }]
            }),
        );

        assert_eq!(
            out.tables.keys().collect::<Vec<_>>(),
            vec!["Car", "Car.Components", "Car.Components.Manufacturer"]
        );

        let car = out.rows("Car");
        assert_eq!(car.len(), 1);
        assert_eq!(
            Value::Object(car[0].clone()),
            json!({"ID": 1, "Brand": "X", "Model": "Y", "YearOfBuild": 2020})
        );

        let components = out.rows("Car.Components");
        assert_eq!(components.len(), 1);
        assert_eq!(columns(&components[0]), vec!["Car_ID", "ID", "ComponentName"]);
        assert_eq!(
            Value::Object(components[0].clone()),
            json!({"Car_ID": 1, "ID": 10, "ComponentName": "C1"})
        );

        let manufacturers = out.rows("Car.Components.Manufacturer");
        assert_eq!(manufacturers.len(), 1);
        assert_eq!(
            columns(&manufacturers[0]),
            vec!["Car_ID", "Components_ID", "ID", "ManufacturerName"]
        );
        assert_eq!(manufacturers[0]["ManufacturerName"], "M1");
        assert_eq!(manufacturers[0]["Components_ID"], 10);
        assert_eq!(
            out.keys["Car.Components.Manufacturer"],
            vec!["Car_ID", "Components_ID", "ID"]
        );
        assert_eq!(out.coerced, 0);
    }

    #[test]
    fn test_missing_declared_field_is_null() {
        let flattener = flattener("ID,Brand,Model");
        let out = flatten(&flattener, json!({"ID": 1, "Brand": "X"}));

        let row = &out.rows("Car")[0];
        assert_eq!(columns(row), vec!["ID", "Brand", "Model"]);
        assert_eq!(row["Model"], Value::Null);
    }

    #[test]
    fn test_observed_only_omits_missing_field() {
        let config = MeltConfig {
            column_policy: ColumnPolicy::ObservedOnly,
            ..MeltConfig::default()
        };
        let flattener = flattener_with("ID,Brand,Model", config);
        let out = flatten(&flattener, json!({"ID": 1, "Brand": "X"}));

        assert_eq!(columns(&out.rows("Car")[0]), vec!["ID", "Brand"]);
    }

    #[test]
    fn test_empty_child_array_yields_no_rows() {
        let flattener = flattener("ID,Components,Components.Name");
        let out = flatten(&flattener, json!({"ID": 1, "Components": []}));

        assert_eq!(out.rows("Car").len(), 1);
        assert!(out.tables.contains_key("Car.Components"));
        assert!(out.rows("Car.Components").is_empty());
    }

    #[test]
    fn test_child_array_shares_parent_chain() {
        let flattener = flattener("ID,Components.Name");
        let out = flatten(
            &flattener,
            json!({
                "ID": "A-1",
                "Components": [{"ID": 1, "Name": "a"}, {"ID": 2, "Name": "b"}, {"ID": 3}]
            }),
        );

        let rows = out.rows("Car.Components");
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|row| row["Car_ID"] == "A-1"));
        assert_eq!(rows[2]["Name"], Value::Null);
    }

    #[test]
    fn test_absent_object_leaf_reserves_no_column() {
        let flattener = flattener("ID,Components,Components.Manufacturer");
        let out = flatten(
            &flattener,
            json!({"ID": 1, "Components": [{"ID": 30, "ComponentName": "C3", "Weight": 12.5}]}),
        );

        assert_eq!(
            columns(&out.rows("Car.Components")[0]),
            vec!["Car_ID", "ID", "ComponentName", "Weight"]
        );
        assert!(!out.tables.contains_key("Car.Components.Manufacturer"));
    }

    #[test]
    fn test_null_object_leaf_keeps_component_fields() {
        let flattener = flattener("ID,Components,Components.Manufacturer");
        let out = flatten(
            &flattener,
            json!({"ID": 1, "Components": [{"ID": 10, "ComponentName": "C1", "Manufacturer": null}]}),
        );

        let row = &out.rows("Car.Components")[0];
        assert_eq!(
            Value::Object(row.clone()),
            json!({"Car_ID": 1, "ID": 10, "ComponentName": "C1"})
        );
        assert!(!out.tables.contains_key("Car.Components.Manufacturer"));
        assert_eq!(out.coerced, 0);
    }

    #[test]
    fn test_scalar_object_leaf_is_coerced_next_to_component_fields() {
        let flattener = flattener("ID,Components,Components.Manufacturer");
        let out = flatten(
            &flattener,
            json!({"ID": 1, "Components": [{"ID": 10, "ComponentName": "C1", "Manufacturer": "Acme"}]}),
        );

        let row = &out.rows("Car.Components")[0];
        assert_eq!(columns(row), vec!["Car_ID", "ID", "Manufacturer", "ComponentName"]);
        assert_eq!(row["Manufacturer"], "Acme");
        assert_eq!(out.coerced, 1);
    }

    #[test]
    fn test_record_without_declared_fields_stays_declared() {
        let flattener = flattener("ID,Brand,Model");
        let out = flatten(&flattener, json!({"Serial": "S-9", "Secret": "x"}));

        let row = &out.rows("Car")[0];
        assert_eq!(
            Value::Object(row.clone()),
            json!({"ID": 0, "Brand": null, "Model": null})
        );
    }

    #[test]
    fn test_repeated_ancestor_names_keep_every_key() {
        let flattener = flattener("ID,Parts.Parts.Parts.Name");
        let out = flatten(
            &flattener,
            json!({
                "ID": 1,
                "Parts": [{"ID": 2, "Parts": [{"ID": 3, "Parts": [{"ID": 4, "Name": "bolt"}]}]}]
            }),
        );

        let row = &out.rows("Car.Parts.Parts.Parts")[0];
        assert_eq!(
            Value::Object(row.clone()),
            json!({"Car_ID": 1, "Parts_ID": 2, "Car.Parts.Parts_ID": 3, "ID": 4, "Name": "bolt"})
        );
        assert_eq!(
            out.keys["Car.Parts.Parts.Parts"],
            vec!["Car_ID", "Parts_ID", "Car.Parts.Parts_ID", "ID"]
        );
    }

    #[test]
    fn test_field_named_like_parent_key_is_skipped() {
        let flattener = flattener("ID,Components");
        let out = flatten(
            &flattener,
            json!({"ID": 1, "Components": [{"ID": 10, "Car_ID": 999, "Name": "a"}]}),
        );

        let row = &out.rows("Car.Components")[0];
        assert_eq!(
            Value::Object(row.clone()),
            json!({"Car_ID": 1, "ID": 10, "Name": "a"})
        );
        assert_eq!(out.shadowed, 1);
    }

    #[test]
    fn test_single_nested_object_yields_one_row() {
        let flattener = flattener("ID,Owner.Name");
        let out = flatten(&flattener, json!({"ID": 7, "Owner": {"ID": 3, "Name": "Ann"}}));

        let rows = out.rows("Car.Owner");
        assert_eq!(rows.len(), 1);
        assert_eq!(Value::Object(rows[0].clone()), json!({"Car_ID": 7, "ID": 3, "Name": "Ann"}));
    }

    #[test]
    fn test_missing_primary_key_uses_position() {
        let flattener = flattener("ID,Components.Name");
        let out = flatten(
            &flattener,
            json!({"ID": 1, "Components": [{"Name": "a"}, {"Name": "b"}]}),
        );

        let rows = out.rows("Car.Components");
        assert_eq!(rows[0]["ID"], 0);
        assert_eq!(rows[1]["ID"], 1);
    }

    #[test]
    fn test_root_without_key_uses_ordinal() {
        let flattener = flattener("Brand");
        let Value::Object(obj) = json!({"Brand": "X"}) else {
            unreachable!()
        };
        let out = flattener.flatten(&obj, 41).unwrap();

        assert_eq!(out.rows("Car")[0]["ID"], 41);
    }

    #[test]
    fn test_key_values_are_not_coerced() {
        let flattener = flattener("ID,Components.Name");
        let out = flatten(
            &flattener,
            json!({"ID": "1", "Components": [{"ID": 1, "Name": "a"}]}),
        );

        let row = &out.rows("Car.Components")[0];
        assert_eq!(row["Car_ID"], json!("1"));
        assert_eq!(row["ID"], json!(1));
    }

    #[test]
    fn test_discovery_without_fields() {
        let flattener = flattener("");
        let out = flatten(
            &flattener,
            json!({
                "ID": 1,
                "Brand": "X",
                "Owner": {"ID": 5, "Name": "Ann"},
                "Components": [{"ID": 10, "Tags": {"ID": 1, "Label": "t"}}]
            }),
        );

        assert_eq!(
            out.tables.keys().collect::<Vec<_>>(),
            vec!["Car", "Car.Owner", "Car.Components", "Car.Components.Tags"]
        );
        assert_eq!(columns(&out.rows("Car")[0]), vec!["ID", "Brand"]);
        assert_eq!(
            columns(&out.rows("Car.Components.Tags")[0]),
            vec!["Car_ID", "Components_ID", "ID", "Label"]
        );
    }

    #[test]
    fn test_declared_scalar_holding_array_is_stringified() {
        let flattener = flattener("ID,Tags");
        let out = flatten(&flattener, json!({"ID": 1, "Tags": ["a", "b"]}));

        assert_eq!(out.rows("Car")[0]["Tags"], json!(r#"["a","b"]"#));
        assert_eq!(out.coerced, 1);
    }

    #[test]
    fn test_declared_branch_holding_scalar_is_stringified() {
        let flattener = flattener("ID,Components.Name");
        let out = flatten(&flattener, json!({"ID": 1, "Components": "none"}));

        assert_eq!(out.rows("Car")[0]["Components"], json!("none"));
        assert!(out.rows("Car.Components").is_empty());
        assert_eq!(out.coerced, 1);
    }

    #[test]
    fn test_declared_mode_ignores_undeclared_objects() {
        let flattener = flattener("ID,Brand");
        let out = flatten(
            &flattener,
            json!({"ID": 1, "Brand": "X", "Extra": 3, "Owner": {"ID": 2}}),
        );

        assert_eq!(out.tables.len(), 1);
        assert_eq!(columns(&out.rows("Car")[0]), vec!["ID", "Brand"]);
    }

    #[test]
    fn test_discovery_depth_limit_is_reported() {
        let config = MeltConfig {
            max_depth: 1,
            ..MeltConfig::default()
        };
        let flattener = flattener_with("", config);
        let Value::Object(obj) = json!({"ID": 1, "A": {"ID": 2, "B": {"ID": 3}}}) else {
            unreachable!()
        };

        let err = flattener.flatten(&obj, 0).unwrap_err();
        assert!(matches!(err, MeltError::DepthLimit { ref table, .. } if table == "Car.A.B"));
    }
}
