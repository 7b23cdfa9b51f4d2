//! Per-value shape inference
//!
//! The ERP returns records of irregular shape, so every value is classified
//! at runtime before the flattener decides whether it becomes a column or a
//! child table.

use serde_json::Value;

/// Structural shape of a raw JSON value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueShape {
    Null,
    Scalar,
    /// A single nested record
    Object,
    /// A collection of nested records
    ObjectArray,
    /// An empty collection; nothing can be said about its elements
    EmptyArray,
    /// Scalars, or a mix of scalars and records
    ScalarArray,
}

impl ValueShape {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ValueShape::Null,
            Value::Bool(_) | Value::Number(_) | Value::String(_) => ValueShape::Scalar,
            Value::Object(_) => ValueShape::Object,
            Value::Array(items) if items.is_empty() => ValueShape::EmptyArray,
            Value::Array(items) => {
                if items.iter().all(Value::is_object) {
                    ValueShape::ObjectArray
                } else {
                    ValueShape::ScalarArray
                }
            }
        }
    }

    /// Values that fit in a single column as they are
    pub fn is_columnar(self) -> bool {
        matches!(self, ValueShape::Null | ValueShape::Scalar)
    }

    /// Values that become rows of a child table
    pub fn is_nested(self) -> bool {
        matches!(
            self,
            ValueShape::Object | ValueShape::ObjectArray | ValueShape::EmptyArray
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ValueShape::Null => "null",
            ValueShape::Scalar => "scalar",
            ValueShape::Object => "object",
            ValueShape::ObjectArray => "array of objects",
            ValueShape::EmptyArray => "empty array",
            ValueShape::ScalarArray => "array of scalars",
        }
    }
}

/// Render a value that does not fit a column as an opaque JSON string.
///
/// Scalars pass through untouched so their raw representation is kept.
pub fn coerce_to_scalar(value: &Value) -> Value {
    if ValueShape::of(value).is_columnar() {
        value.clone()
    } else {
        Value::String(value.to_string())
    }
}
