//! Error taxonomy for csvflow runs.
//!
//! Recoverability is part of the contract: [`Error::MalformedRow`] and
//! [`Error::Transform`] can be tolerated when the caller configures lenient
//! shape handling or failure collection; everything else aborts the run.
//! Every abort path releases its resources (open files, spill segments,
//! worker threads) before the error reaches the caller.

use thiserror::Error;

/// Result type alias for csvflow operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for csvflow operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A data row's field count does not match the header (strict mode only).
    #[error("row {row_index}: expected {expected} fields, found {found}")]
    MalformedRow {
        /// 1-based index of the offending data row.
        row_index: u64,
        /// Field count declared by the header.
        expected: usize,
        /// Field count actually present.
        found: usize,
    },

    /// Reading or writing a temporary spill segment failed. Fatal to the run.
    #[error("spill i/o failure: {source}")]
    SpillIo {
        #[source]
        source: std::io::Error,
    },

    /// A column name carries incompatible value types across merged inputs
    /// (strict mode only).
    #[error("column '{column}' has conflicting types across inputs ({first} vs {second})")]
    SchemaConflict {
        /// The reconciled column name.
        column: String,
        /// Kind observed first.
        first: &'static str,
        /// Kind that clashed with it.
        second: &'static str,
    },

    /// A worker's transform function failed on a chunk.
    #[error("transform failed on chunk {chunk_index}: {message}")]
    Transform {
        /// 0-based index of the chunk that failed.
        chunk_index: u64,
        /// Rendered cause reported by the transform.
        message: String,
    },

    /// The run was stopped by a caller-held [`CancelToken`](crate::pool::CancelToken).
    #[error("run cancelled")]
    Cancelled,

    /// Invalid configuration, detected before any I/O begins.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Non-spill I/O failure (input file, output sink).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Low-level CSV parse or encode failure on an input or output file.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

impl Error {
    pub(crate) fn spill(source: std::io::Error) -> Self {
        Error::SpillIo { source }
    }

    pub(crate) fn spill_csv(source: csv::Error) -> Self {
        Error::SpillIo { source: std::io::Error::other(source) }
    }
}
