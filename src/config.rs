//! Shared configuration surface: input format, chunk budgets and strictness.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Delimited-text format options shared by readers, writers and the merger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsvFormat {
    /// Field delimiter byte.
    pub delimiter: u8,
    /// Quote byte protecting delimiter-bearing text fields.
    pub quote: u8,
    /// Token representing an explicit null. Empty fields are always null.
    pub null_token: String,
}

impl Default for CsvFormat {
    fn default() -> Self {
        Self { delimiter: b',', quote: b'"', null_token: String::new() }
    }
}

impl CsvFormat {
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_null_token(mut self, token: impl Into<String>) -> Self {
        self.null_token = token.into();
        self
    }
}

/// Memory budget bounding a single chunk, as a row count or an estimated
/// resident byte size.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkBudget {
    /// At most this many rows per chunk.
    Rows(usize),
    /// At most this many estimated bytes per chunk. A chunk always admits at
    /// least one row, however large.
    Bytes(usize),
}

impl ChunkBudget {
    pub(crate) fn validate(&self) -> Result<()> {
        match self {
            ChunkBudget::Rows(0) => Err(Error::Config("chunk budget of 0 rows".into())),
            ChunkBudget::Bytes(0) => Err(Error::Config("chunk budget of 0 bytes".into())),
            _ => Ok(()),
        }
    }

    pub(crate) fn is_full(&self, rows: usize, bytes: usize) -> bool {
        match *self {
            ChunkBudget::Rows(limit) => rows >= limit,
            ChunkBudget::Bytes(limit) => rows > 0 && bytes >= limit,
        }
    }
}

impl Default for ChunkBudget {
    fn default() -> Self {
        ChunkBudget::Rows(10_000)
    }
}

/// How shape and type irregularities are handled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strictness {
    /// Fail on ragged rows and on cross-file type conflicts.
    #[default]
    Strict,
    /// Pad/truncate ragged rows; coerce conflicting types to text.
    Lenient,
}

impl Strictness {
    pub fn is_strict(self) -> bool {
        matches!(self, Strictness::Strict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_budgets_are_rejected() {
        assert!(ChunkBudget::Rows(0).validate().is_err());
        assert!(ChunkBudget::Bytes(0).validate().is_err());
        assert!(ChunkBudget::Rows(1).validate().is_ok());
    }

    #[test]
    fn byte_budget_admits_at_least_one_row() {
        let budget = ChunkBudget::Bytes(8);
        assert!(!budget.is_full(0, 0));
        assert!(budget.is_full(1, 500));
    }
}
