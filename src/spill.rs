//! Temporary on-disk segments for external sorting.
//!
//! A [`SpillStore`] owns a unique temp directory and hands out
//! [`SegmentHandle`]s for sorted chunks written to it. Segments are read back
//! exactly once during the merge phase and deleted as they are consumed;
//! dropping the store removes the whole directory, which covers aborted runs.
//!
//! Segment rows are stored with their sort key cells prepended, so the merge
//! phase never re-derives keys (the random permutation keys in particular
//! must survive the round trip).

use crate::error::{Error, Result};
use crate::value::{Row, Value};
use std::fs::File;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Handle to one persisted segment. Owned by the sort run that created it and
/// consumed exactly once via [`SpillStore::release`].
#[derive(Debug)]
pub struct SegmentHandle {
    path: PathBuf,
    key_width: usize,
    rows: u64,
}

impl SegmentHandle {
    pub fn rows(&self) -> u64 {
        self.rows
    }
}

/// Manages the temp directory backing one external sort run.
pub struct SpillStore {
    dir: TempDir,
    next_index: usize,
}

impl SpillStore {
    /// Create a store with a unique temp directory, under `parent` when given
    /// or the system temp location otherwise. Independent runs never collide.
    pub fn new(parent: Option<&Path>) -> Result<Self> {
        let builder = {
            let mut b = tempfile::Builder::new();
            b.prefix("csvflow-spill-");
            b
        };
        let dir = match parent {
            Some(p) => builder.tempdir_in(p),
            None => builder.tempdir(),
        }
        .map_err(Error::spill)?;
        Ok(Self { dir, next_index: 0 })
    }

    /// Start a new segment file for streaming writes. Used by intermediate
    /// merge passes, which never hold a whole segment in memory.
    pub fn begin_segment(&mut self, key_width: usize) -> Result<SegmentWriter> {
        let path = self
            .dir
            .path()
            .join(format!("segment_{:04}.csv", self.next_index));
        self.next_index += 1;

        let writer = csv::WriterBuilder::new()
            .from_path(&path)
            .map_err(Error::spill_csv)?;
        Ok(SegmentWriter { writer, path, key_width, rows: 0 })
    }

    /// Write an already-sorted run of keyed rows to a new segment file.
    pub fn persist(&mut self, key_width: usize, rows: &[(Vec<Value>, Row)]) -> Result<SegmentHandle> {
        let mut writer = self.begin_segment(key_width)?;
        for (key, row) in rows {
            writer.write(key, row)?;
        }
        writer.finish()
    }

    /// Reopen a segment for a single forward pass.
    pub fn reopen(&self, handle: &SegmentHandle) -> Result<SegmentReader> {
        let reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(&handle.path)
            .map_err(Error::spill_csv)?;
        Ok(SegmentReader {
            reader,
            key_width: handle.key_width,
            record: csv::StringRecord::new(),
        })
    }

    /// Delete a segment's backing file. Consumes the handle.
    pub fn release(&mut self, handle: SegmentHandle) -> Result<()> {
        std::fs::remove_file(&handle.path).map_err(Error::spill)
    }
}

/// Streaming writer for one segment. Rows must arrive in sorted order;
/// [`finish`](Self::finish) seals the file and yields its handle.
pub struct SegmentWriter {
    writer: csv::Writer<File>,
    path: PathBuf,
    key_width: usize,
    rows: u64,
}

impl SegmentWriter {
    pub fn write(&mut self, key: &[Value], row: &Row) -> Result<()> {
        debug_assert_eq!(key.len(), self.key_width);
        self.writer
            .write_record(key.iter().chain(row.iter()).map(|v| v.render("")))
            .map_err(Error::spill_csv)?;
        self.rows += 1;
        Ok(())
    }

    pub fn finish(mut self) -> Result<SegmentHandle> {
        self.writer.flush().map_err(Error::spill)?;
        log::debug!("spilled segment {} ({} rows)", self.path.display(), self.rows);
        Ok(SegmentHandle { path: self.path, key_width: self.key_width, rows: self.rows })
    }
}

/// Forward-only reader over one segment's keyed rows.
pub struct SegmentReader {
    reader: csv::Reader<File>,
    key_width: usize,
    record: csv::StringRecord,
}

impl SegmentReader {
    /// Next `(key cells, row)` pair, or `None` at end of segment.
    pub fn next_row(&mut self) -> Result<Option<(Vec<Value>, Row)>> {
        if !self
            .reader
            .read_record(&mut self.record)
            .map_err(Error::spill_csv)?
        {
            return Ok(None);
        }
        let mut fields = self.record.iter().map(|f| Value::parse(f, ""));
        let key: Vec<Value> = fields.by_ref().take(self.key_width).collect();
        let row: Row = fields.collect();
        Ok(Some((key, row)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyed(key: f64, fields: &[&str]) -> (Vec<Value>, Row) {
        (
            vec![Value::Number(key)],
            fields.iter().map(|f| Value::parse(f, "")).collect(),
        )
    }

    #[test]
    fn persist_reopen_release_round_trip() -> Result<()> {
        let mut store = SpillStore::new(None)?;
        let rows = vec![keyed(1.0, &["a", "1"]), keyed(2.0, &["b", ""])];
        let handle = store.persist(1, &rows)?;
        assert_eq!(handle.rows(), 2);

        let mut reader = store.reopen(&handle)?;
        let (key, row) = reader.next_row()?.unwrap();
        assert_eq!(key, vec![Value::Number(1.0)]);
        assert_eq!(row, vec![Value::Text("a".into()), Value::Number(1.0)]);
        let (_, row) = reader.next_row()?.unwrap();
        assert_eq!(row[1], Value::Null);
        assert!(reader.next_row()?.is_none());

        store.release(handle)?;
        Ok(())
    }

    #[test]
    fn dropping_the_store_removes_its_directory() -> Result<()> {
        let mut store = SpillStore::new(None)?;
        let handle = store.persist(1, &[keyed(0.5, &["x"])])?;
        let dir = store.dir.path().to_path_buf();
        drop(handle);
        drop(store);
        assert!(!dir.exists());
        Ok(())
    }
}
