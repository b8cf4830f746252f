//! Chunked, forward-only reading of delimited files.
//!
//! A [`ChunkedReader`] holds one open file handle and yields bounded
//! [`Chunk`]s in file order. It is not restartable; re-scanning a file means
//! opening a fresh reader. The handle is released when the reader is dropped,
//! whether or not it was exhausted.

use crate::config::{ChunkBudget, CsvFormat, Strictness};
use crate::error::{Error, Result};
use crate::schema::Schema;
use crate::value::{Chunk, Row, Value, row_size};
use std::fs::File;
use std::path::Path;

/// Streams a delimited file as a finite sequence of bounded chunks.
#[derive(Debug)]
pub struct ChunkedReader {
    reader: csv::Reader<File>,
    schema: Schema,
    format: CsvFormat,
    budget: ChunkBudget,
    strictness: Strictness,
    record: csv::StringRecord,
    rows_read: u64,
    done: bool,
}

impl ChunkedReader {
    /// Open a file and eagerly parse its header row.
    pub fn open(
        path: impl AsRef<Path>,
        format: &CsvFormat,
        budget: ChunkBudget,
        strictness: Strictness,
    ) -> Result<Self> {
        budget.validate()?;
        let file = File::open(path.as_ref())?;
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(format.delimiter)
            .quote(format.quote)
            .has_headers(true)
            .flexible(true)
            .from_reader(file);
        let header = reader.headers()?.clone();
        let schema = Schema::new(header.iter().map(str::to_string).collect())?;
        Ok(Self {
            reader,
            schema,
            format: format.clone(),
            budget,
            strictness,
            record: csv::StringRecord::new(),
            rows_read: 0,
            done: false,
        })
    }

    /// The file's schema, available before the first chunk.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Number of data rows consumed so far.
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        if self.done {
            return Ok(None);
        }
        let mut rows: Chunk = Vec::new();
        let mut bytes = 0usize;
        loop {
            if !self.reader.read_record(&mut self.record)? {
                self.done = true;
                break;
            }
            self.rows_read += 1;
            let row = self.decode()?;
            bytes += row_size(&row);
            rows.push(row);
            if self.budget.is_full(rows.len(), bytes) {
                break;
            }
        }
        if rows.is_empty() { Ok(None) } else { Ok(Some(rows)) }
    }

    /// Decode the current record against the header. Strict mode rejects
    /// ragged rows; lenient mode pads with nulls and drops extra fields.
    fn decode(&self) -> Result<Row> {
        let width = self.schema.len();
        if self.record.len() != width && self.strictness.is_strict() {
            return Err(Error::MalformedRow {
                row_index: self.rows_read,
                expected: width,
                found: self.record.len(),
            });
        }
        let mut row = Vec::with_capacity(width);
        for i in 0..width {
            row.push(match self.record.get(i) {
                Some(field) => Value::parse(field, &self.format.null_token),
                None => Value::Null,
            });
        }
        Ok(row)
    }
}

impl Iterator for ChunkedReader {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk().transpose()
    }
}
