//! Tabular query results.
//!
//! Flight SQL returns Arrow record batches and the embedded engine returns
//! DuckDB rows; both are normalised into a [`Table`] of JSON values.

use arrow_array::cast::AsArray;
use arrow_array::types::{
    Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type, UInt16Type, UInt32Type,
    UInt64Type, UInt8Type,
};
use arrow_array::{Array, RecordBatch};
use arrow_cast::display::{ArrayFormatter, FormatOptions};
use arrow_schema::{DataType, Schema};
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::AdapterError;

/// A result column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableColumn {
    /// Column name.
    pub name: String,

    /// Engine type name, when the engine reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
}

impl TableColumn {
    pub fn new(name: impl Into<String>, data_type: Option<String>) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Rows returned by a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<TableColumn>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl Table {
    /// Create an empty table with no columns.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a table from columns and rows.
    pub fn new(columns: Vec<TableColumn>, rows: Vec<Vec<serde_json::Value>>) -> Self {
        Self { columns, rows }
    }

    /// Build a table from an Arrow schema and its record batches.
    pub fn from_record_batches(schema: &Schema, batches: &[RecordBatch]) -> Result<Self, AdapterError> {
        let columns = schema
            .fields()
            .iter()
            .map(|f| TableColumn::new(f.name().clone(), Some(f.data_type().to_string())))
            .collect::<Vec<_>>();

        let mut rows = Vec::with_capacity(batches.iter().map(|b| b.num_rows()).sum());
        let options = FormatOptions::default().with_null("");

        for batch in batches {
            if batch.num_columns() != columns.len() {
                return Err(AdapterError::Arrow(format!(
                    "Record batch has {} columns, schema has {}",
                    batch.num_columns(),
                    columns.len()
                )));
            }

            let formatters = batch
                .columns()
                .iter()
                .map(|c| ArrayFormatter::try_new(c.as_ref(), &options))
                .collect::<Result<Vec<_>, _>>()?;

            for row in 0..batch.num_rows() {
                let values = batch
                    .columns()
                    .iter()
                    .zip(&formatters)
                    .map(|(array, formatter)| arrow_value_to_json(array.as_ref(), formatter, row))
                    .collect::<Result<Vec<_>, _>>()?;
                rows.push(values);
            }
        }

        Ok(Self { columns, rows })
    }

    /// Number of rows.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Column names in order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Position of a column, compared case-insensitively.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Value at a row and column name.
    pub fn get(&self, row: usize, column: &str) -> Option<&serde_json::Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// String value at a row and column name, if present and not null.
    pub fn get_str(&self, row: usize, column: &str) -> Option<String> {
        self.get(row, column).and_then(|v| match v {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        })
    }

    /// Rows as JSON objects keyed by column name.
    pub fn to_objects(&self) -> Vec<serde_json::Value> {
        self.rows
            .iter()
            .map(|values| {
                let mut obj = serde_json::Map::new();
                for (i, value) in values.iter().enumerate() {
                    let name = self.columns.get(i).map(|c| c.name.as_str()).unwrap_or("");
                    obj.insert(name.to_string(), value.clone());
                }
                serde_json::Value::Object(obj)
            })
            .collect()
    }
}

fn display_cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cells: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|r| r.iter().map(display_cell).collect())
            .collect();

        let mut widths: Vec<usize> = self.columns.iter().map(|c| c.name.chars().count()).collect();
        for row in &cells {
            for (i, cell) in row.iter().enumerate() {
                if let Some(w) = widths.get_mut(i) {
                    *w = (*w).max(cell.chars().count());
                }
            }
        }

        let header = self
            .columns
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:<width$}", c.name, width = *w))
            .collect::<Vec<_>>()
            .join(" | ");
        writeln!(f, "{}", header.trim_end())?;

        let rule = widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-");
        writeln!(f, "{}", rule)?;

        for row in &cells {
            let line = row
                .iter()
                .zip(&widths)
                .map(|(cell, w)| format!("{:<width$}", cell, width = *w))
                .collect::<Vec<_>>()
                .join(" | ");
            writeln!(f, "{}", line.trim_end())?;
        }

        Ok(())
    }
}

/// Render the first value of an array with Arrow's display formatting.
pub(crate) fn display_first(array: &dyn Array) -> Result<String, AdapterError> {
    let options = FormatOptions::default();
    let formatter = ArrayFormatter::try_new(array, &options)?;
    Ok(formatter.value(0).try_to_string()?)
}

/// Convert one Arrow cell to JSON.
fn arrow_value_to_json(
    array: &dyn Array,
    formatter: &ArrayFormatter<'_>,
    row: usize,
) -> Result<serde_json::Value, AdapterError> {
    if array.is_null(row) {
        return Ok(serde_json::Value::Null);
    }

    let value = match array.data_type() {
        DataType::Null => serde_json::Value::Null,
        DataType::Boolean => serde_json::json!(array.as_boolean().value(row)),
        DataType::Int8 => serde_json::json!(array.as_primitive::<Int8Type>().value(row)),
        DataType::Int16 => serde_json::json!(array.as_primitive::<Int16Type>().value(row)),
        DataType::Int32 => serde_json::json!(array.as_primitive::<Int32Type>().value(row)),
        DataType::Int64 => serde_json::json!(array.as_primitive::<Int64Type>().value(row)),
        DataType::UInt8 => serde_json::json!(array.as_primitive::<UInt8Type>().value(row)),
        DataType::UInt16 => serde_json::json!(array.as_primitive::<UInt16Type>().value(row)),
        DataType::UInt32 => serde_json::json!(array.as_primitive::<UInt32Type>().value(row)),
        DataType::UInt64 => serde_json::json!(array.as_primitive::<UInt64Type>().value(row)),
        DataType::Float32 => float_to_json(array.as_primitive::<Float32Type>().value(row) as f64),
        DataType::Float64 => float_to_json(array.as_primitive::<Float64Type>().value(row)),
        DataType::Utf8 => serde_json::json!(array.as_string::<i32>().value(row)),
        DataType::LargeUtf8 => serde_json::json!(array.as_string::<i64>().value(row)),
        DataType::Utf8View => serde_json::json!(array.as_string_view().value(row)),
        DataType::Binary => {
            serde_json::json!(base64::engine::general_purpose::STANDARD.encode(array.as_binary::<i32>().value(row)))
        }
        DataType::LargeBinary => {
            serde_json::json!(base64::engine::general_purpose::STANDARD.encode(array.as_binary::<i64>().value(row)))
        }
        _ => serde_json::json!(formatter.value(row).try_to_string()?),
    };
    Ok(value)
}

fn float_to_json(f: f64) -> serde_json::Value {
    serde_json::Number::from_f64(f)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::{
        ArrayRef, BinaryArray, BooleanArray, Date32Array, Float64Array, Int32Array, StringArray,
    };
    use arrow_schema::Field;
    use std::sync::Arc;

    fn sample_batch() -> (Arc<Schema>, RecordBatch) {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int32, false),
            Field::new("name", DataType::Utf8, true),
            Field::new("value", DataType::Float64, true),
            Field::new("active", DataType::Boolean, true),
        ]));

        let columns: Vec<ArrayRef> = vec![
            Arc::new(Int32Array::from(vec![1, 2])),
            Arc::new(StringArray::from(vec![Some("Alice"), None])),
            Arc::new(Float64Array::from(vec![Some(100.5), Some(f64::NAN)])),
            Arc::new(BooleanArray::from(vec![Some(true), Some(false)])),
        ];

        let batch = RecordBatch::try_new(schema.clone(), columns).unwrap();
        (schema, batch)
    }

    #[test]
    fn test_from_record_batches() {
        let (schema, batch) = sample_batch();
        let table = Table::from_record_batches(&schema, &[batch.clone(), batch]).unwrap();

        assert_eq!(table.row_count(), 4);
        assert_eq!(table.column_names(), vec!["id", "name", "value", "active"]);
        assert_eq!(table.columns[0].data_type.as_deref(), Some("Int32"));
        assert_eq!(table.rows[0], vec![
            serde_json::json!(1),
            serde_json::json!("Alice"),
            serde_json::json!(100.5),
            serde_json::json!(true),
        ]);
        assert_eq!(table.rows[1][1], serde_json::Value::Null);
        assert_eq!(table.rows[1][2], serde_json::Value::Null);
    }

    #[test]
    fn test_empty_batches_keep_schema() {
        let (schema, _) = sample_batch();
        let table = Table::from_record_batches(&schema, &[]).unwrap();
        assert_eq!(table.row_count(), 0);
        assert_eq!(table.columns.len(), 4);
    }

    #[test]
    fn test_binary_and_date_values() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("payload", DataType::Binary, false),
            Field::new("day", DataType::Date32, false),
        ]));
        let columns: Vec<ArrayRef> = vec![
            Arc::new(BinaryArray::from(vec![b"hi".as_ref()])),
            Arc::new(Date32Array::from(vec![19723])),
        ];
        let batch = RecordBatch::try_new(schema.clone(), columns).unwrap();

        let table = Table::from_record_batches(&schema, &[batch]).unwrap();
        assert_eq!(table.rows[0][0], "aGk=");
        assert_eq!(table.rows[0][1], "2024-01-01");
    }

    #[test]
    fn test_accessors_and_objects() {
        let (schema, batch) = sample_batch();
        let table = Table::from_record_batches(&schema, &[batch]).unwrap();

        assert_eq!(table.get(0, "NAME"), Some(&serde_json::json!("Alice")));
        assert_eq!(table.get_str(0, "id"), Some("1".to_string()));
        assert_eq!(table.get_str(1, "name"), None);
        assert!(table.get(5, "id").is_none());

        let objects = table.to_objects();
        assert_eq!(objects[0]["name"], "Alice");
        assert_eq!(objects[1]["active"], false);
    }

    #[test]
    fn test_display() {
        let table = Table::new(
            vec![TableColumn::new("id", None), TableColumn::new("name", None)],
            vec![vec![serde_json::json!(1), serde_json::json!("Alice")]],
        );
        let rendered = table.to_string();
        assert!(rendered.starts_with("id | name"));
        assert!(rendered.contains("1  | Alice"));
    }
}
