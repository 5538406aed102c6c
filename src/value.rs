//! Result cell values
//!
//! Warehouse rows are untyped. Most cells arrive as plain scalars, but
//! date/time cells arrive wrapped (a type tag around a primitive). Every
//! renderer goes through [`normalize`] so the two shapes never leak.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    /// Convert a JSON value into a scalar. Nested values are rendered as text.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Scalar::Null,
            serde_json::Value::Bool(b) => Scalar::Bool(*b),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Scalar::Int)
                .or_else(|| n.as_f64().map(Scalar::Float))
                .unwrap_or_else(|| Scalar::Text(n.to_string())),
            serde_json::Value::String(s) => Scalar::Text(s.clone()),
            other => Scalar::Text(other.to_string()),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => write!(f, "null"),
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::Float(v) => write!(f, "{}", v),
            Scalar::Text(s) => write!(f, "{}", s),
        }
    }
}

/// A single result cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    Scalar(Scalar),
    /// Typed wrapper around a primitive, e.g. `DATE("2024-03-01")`.
    Wrapped { type_name: String, value: Scalar },
}

impl CellValue {
    pub fn text(s: impl Into<String>) -> Self {
        CellValue::Scalar(Scalar::Text(s.into()))
    }

    pub fn int(i: i64) -> Self {
        CellValue::Scalar(Scalar::Int(i))
    }

    pub fn wrapped(type_name: impl Into<String>, value: Scalar) -> Self {
        CellValue::Wrapped {
            type_name: type_name.into(),
            value,
        }
    }
}

/// Strip any wrapper and return the primitive inside.
pub fn normalize(cell: &CellValue) -> &Scalar {
    match cell {
        CellValue::Scalar(s) => s,
        CellValue::Wrapped { value, .. } => value,
    }
}

/// One row of warehouse output. Column order is preserved as returned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub columns: Vec<(String, CellValue)>,
}

impl ResultRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: CellValue) -> Self {
        self.columns.push((name.into(), value));
        self
    }

    pub fn get(&self, name: &str) -> Option<&CellValue> {
        self.columns
            .iter()
            .find(|(col, _)| col == name)
            .map(|(_, value)| value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_unwraps_dates() {
        let cell = CellValue::wrapped("DATE", Scalar::Text("2024-03-01".to_string()));
        assert_eq!(normalize(&cell).to_string(), "2024-03-01");

        let plain = CellValue::int(7);
        assert_eq!(normalize(&plain), &Scalar::Int(7));
    }

    #[test]
    fn test_row_lookup_keeps_order() {
        let row = ResultRow::new()
            .with("b", CellValue::int(2))
            .with("a", CellValue::int(1));
        assert_eq!(row.columns[0].0, "b");
        assert_eq!(row.get("a"), Some(&CellValue::int(1)));
        assert!(row.get("c").is_none());
    }
}
