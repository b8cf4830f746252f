//! Output sink abstraction.
//!
//! The core appends rows incrementally through [`RowSink`] and never branches
//! on the concrete sink. Two implementations ship here: [`CsvSink`] streams
//! rows to a delimited file, [`MemorySink`] collects them in memory (used in
//! tests and for small frame-shaped results).

use crate::config::CsvFormat;
use crate::error::Result;
use crate::schema::Schema;
use crate::value::{Chunk, Row};
use std::fs::{File, create_dir_all};
use std::path::Path;

/// Incremental row consumer.
///
/// `write_header` is called exactly once, before any row.
pub trait RowSink {
    fn write_header(&mut self, schema: &Schema) -> Result<()>;

    fn write_row(&mut self, row: &Row) -> Result<()>;

    fn write_chunk(&mut self, chunk: &Chunk) -> Result<()> {
        for row in chunk {
            self.write_row(row)?;
        }
        Ok(())
    }

    /// Flush buffered output. Idempotent.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Streaming CSV sink honoring a [`CsvFormat`].
pub struct CsvSink {
    writer: csv::Writer<File>,
    null_token: String,
}

impl CsvSink {
    /// Create (or truncate) the output file, creating parent directories as
    /// needed.
    pub fn create(path: impl AsRef<Path>, format: &CsvFormat) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            create_dir_all(parent)?;
        }
        let writer = csv::WriterBuilder::new()
            .delimiter(format.delimiter)
            .quote(format.quote)
            .from_path(path)?;
        Ok(Self { writer, null_token: format.null_token.clone() })
    }
}

impl RowSink for CsvSink {
    fn write_header(&mut self, schema: &Schema) -> Result<()> {
        self.writer.write_record(schema.columns())?;
        Ok(())
    }

    fn write_row(&mut self, row: &Row) -> Result<()> {
        self.writer
            .write_record(row.iter().map(|v| v.render(&self.null_token)))?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// In-memory sink collecting the header and all rows.
#[derive(Debug, Default)]
pub struct MemorySink {
    schema: Option<Schema>,
    rows: Vec<Row>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}

impl RowSink for MemorySink {
    fn write_header(&mut self, schema: &Schema) -> Result<()> {
        self.schema = Some(schema.clone());
        Ok(())
    }

    fn write_row(&mut self, row: &Row) -> Result<()> {
        self.rows.push(row.clone());
        Ok(())
    }
}
