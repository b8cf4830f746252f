//! Column schemas and schema reconciliation.
//!
//! Reconciliation is pure: the unified schema of N inputs is the union of
//! their column names ordered by first appearance, and a [`Projection`]
//! re-shapes any source row into that unified shape by inserting nulls for
//! columns the source does not carry.

use crate::error::{Error, Result};
use crate::value::{Row, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// An ordered sequence of column names, unique within one file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<String>,
}

impl Schema {
    /// Build a schema, rejecting duplicate column names.
    pub fn new(columns: Vec<String>) -> Result<Self> {
        let mut seen = HashSet::new();
        for name in &columns {
            if !seen.insert(name.as_str()) {
                return Err(Error::Config(format!("duplicate column name '{name}'")));
            }
        }
        Ok(Self { columns })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Position of a column by name.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Union of the given schemas, ordered by first appearance.
    pub fn reconcile<'a>(schemas: impl IntoIterator<Item = &'a Schema>) -> Schema {
        let mut columns: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for schema in schemas {
            for name in &schema.columns {
                if seen.insert(name.clone()) {
                    columns.push(name.clone());
                }
            }
        }
        Schema { columns }
    }
}

/// Precomputed mapping from a source schema into a target (reconciled) schema.
///
/// Target columns absent from the source map to [`Value::Null`]; by
/// construction a source's columns are a subset of the reconciled schema, so
/// no source data is ever dropped.
#[derive(Clone, Debug)]
pub struct Projection {
    mapping: Vec<Option<usize>>,
}

impl Projection {
    pub fn new(source: &Schema, target: &Schema) -> Self {
        let mapping = target
            .columns()
            .iter()
            .map(|name| source.position(name))
            .collect();
        Self { mapping }
    }

    /// True when the source already has the target's exact shape.
    pub fn is_identity(&self) -> bool {
        self.mapping
            .iter()
            .enumerate()
            .all(|(i, m)| *m == Some(i))
    }

    /// Re-shape one source row into the target schema.
    pub fn project(&self, row: &Row) -> Row {
        self.mapping
            .iter()
            .map(|m| match m {
                Some(i) => row.get(*i).cloned().unwrap_or(Value::Null),
                None => Value::Null,
            })
            .collect()
    }
}
