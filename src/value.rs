//! Cell values and the row/chunk units of streaming work.
//!
//! A [`Value`] is a single parsed cell. Values carry a total order so they can
//! be used directly as sort keys and heap entries: numbers sort before text,
//! nulls sort last, and floats are compared via `ordered-float` so `NaN` does
//! not poison the ordering.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// One row of a table, positionally aligned to a [`Schema`](crate::schema::Schema).
pub type Row = Vec<Value>;

/// A bounded in-memory batch of rows; the unit of sorting, spilling and
/// parallel dispatch.
pub type Chunk = Vec<Row>;

/// A single scalar cell.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Value {
    /// Explicit null (the configured null token, or an empty field).
    Null,
    /// A cell that parsed as a number.
    Number(f64),
    /// Any other cell.
    Text(String),
}

/// Kind marker used for strict cross-file type reconciliation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueKind {
    Number,
    Text,
}

impl ValueKind {
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Number => "number",
            ValueKind::Text => "text",
        }
    }
}

impl Value {
    /// Parse a raw field. An empty field or the configured null token becomes
    /// [`Value::Null`]; anything that parses as `f64` becomes a number.
    pub fn parse(field: &str, null_token: &str) -> Value {
        if field.is_empty() || field == null_token {
            return Value::Null;
        }
        match field.parse::<f64>() {
            Ok(n) => Value::Number(n),
            Err(_) => Value::Text(field.to_string()),
        }
    }

    /// Render the value back into a field. Numbers use `f64`'s shortest
    /// round-trippable display form, so `3.0` renders as `3`.
    pub fn render(&self, null_token: &str) -> String {
        match self {
            Value::Null => null_token.to_string(),
            Value::Number(n) => format!("{n}"),
            Value::Text(s) => s.clone(),
        }
    }

    /// The value's kind, or `None` for null.
    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            Value::Null => None,
            Value::Number(_) => Some(ValueKind::Number),
            Value::Text(_) => Some(ValueKind::Text),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Rough resident size, used for byte-budget chunk accounting.
    pub fn estimated_size(&self) -> usize {
        match self {
            Value::Null | Value::Number(_) => 16,
            Value::Text(s) => 24 + s.len(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Greater,
            (_, Value::Null) => Ordering::Less,
            (Value::Number(a), Value::Number(b)) => OrderedFloat(*a).cmp(&OrderedFloat(*b)),
            (Value::Number(_), Value::Text(_)) => Ordering::Less,
            (Value::Text(_), Value::Number(_)) => Ordering::Greater,
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
        }
    }
}

impl fmt::Display for Value {
    /// Nulls display as an empty field.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Number(n) => write!(f, "{n}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

/// Rough resident size of a row.
pub fn row_size(row: &Row) -> usize {
    24 + row.iter().map(Value::estimated_size).sum::<usize>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_classifies_fields() {
        assert_eq!(Value::parse("", "NA"), Value::Null);
        assert_eq!(Value::parse("NA", "NA"), Value::Null);
        assert_eq!(Value::parse("42", ""), Value::Number(42.0));
        assert_eq!(Value::parse("-1.5", ""), Value::Number(-1.5));
        assert_eq!(Value::parse("abc", ""), Value::Text("abc".into()));
    }

    #[test]
    fn render_round_trips() {
        for field in ["42", "-1.5", "0.25", "hello", "12abc"] {
            let v = Value::parse(field, "");
            assert_eq!(Value::parse(&v.render(""), ""), v);
        }
    }

    #[test]
    fn whole_numbers_render_without_fraction() {
        assert_eq!(Value::Number(3.0).render(""), "3");
        assert_eq!(Value::Number(3.5).render(""), "3.5");
    }

    #[test]
    fn nulls_sort_last() {
        let mut values = vec![
            Value::Null,
            Value::Text("a".into()),
            Value::Number(7.0),
            Value::Number(-2.0),
        ];
        values.sort();
        assert_eq!(
            values,
            vec![
                Value::Number(-2.0),
                Value::Number(7.0),
                Value::Text("a".into()),
                Value::Null,
            ]
        );
    }

    #[test]
    fn nan_does_not_break_ordering() {
        let mut values = vec![Value::Number(f64::NAN), Value::Number(1.0)];
        values.sort();
        assert_eq!(values[0], Value::Number(1.0));
    }
}
