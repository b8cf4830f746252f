//! External merge sort for files larger than memory.
//!
//! Two phases:
//!
//! 1. **Split**: chunks are pulled from the reader, keyed, stable-sorted in
//!    memory (in parallel past a size threshold) and spilled as segments.
//! 2. **Merge**: segments are merged through a binary heap; each segment is
//!    deleted the moment it is exhausted. At most
//!    [`max_open_segments`](ExternalSorter::max_open_segments) files are open
//!    at once: when a run produces more segments than that, groups are merged
//!    into intermediate segments in passes until one final pass fits.
//!
//! Ties are deterministic: rows comparing equal on the key keep their
//! original relative order within a chunk (stable sort) and across segments
//! the earlier-created segment wins, which reduces to original file order.
//!
//! A single-chunk input skips spilling entirely and an empty input emits just
//! the header, creating no temp files at all.

use crate::config::{ChunkBudget, CsvFormat, Strictness};
use crate::error::{Error, Result};
use crate::reader::ChunkedReader;
use crate::schema::Schema;
use crate::spill::{SegmentHandle, SegmentReader, SpillStore};
use crate::value::{Chunk, Row, Value};
use crate::writer::RowSink;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::slice::ParallelSliceMut;
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Rows below this count are sorted on the calling thread.
const PAR_SORT_THRESHOLD: usize = 8_192;

/// Default cap on simultaneously open segment files during the merge phase.
const MAX_OPEN_SEGMENTS: usize = 200;

/// One sort column with its direction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortColumn {
    pub name: String,
    pub descending: bool,
}

impl SortColumn {
    pub fn asc(name: impl Into<String>) -> Self {
        Self { name: name.into(), descending: false }
    }

    pub fn desc(name: impl Into<String>) -> Self {
        Self { name: name.into(), descending: true }
    }
}

/// What to sort by: one or more columns, or a seeded random permutation.
///
/// The seed is explicit so shuffled runs are reproducible and concurrent runs
/// never share ambient RNG state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SortSpec {
    Columns(Vec<SortColumn>),
    Random { seed: u64 },
}

impl SortSpec {
    /// Ascending sort on a single column.
    pub fn by(name: impl Into<String>) -> Self {
        SortSpec::Columns(vec![SortColumn::asc(name)])
    }
}

/// Counters reported by a completed sort run.
#[derive(Clone, Copy, Debug, Default)]
pub struct SortStats {
    pub rows_read: u64,
    pub segments_spilled: usize,
    pub rows_written: u64,
}

/// Key cells plus the run's per-column directions. Ordered lexicographically
/// with each cell's comparison reversed where its column is descending; an
/// empty direction slice means all ascending (the random-key case).
#[derive(Clone, Debug)]
struct SortKey {
    cells: Vec<Value>,
    directions: Arc<[bool]>,
}

impl PartialEq for SortKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SortKey {}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        for (i, (a, b)) in self.cells.iter().zip(&other.cells).enumerate() {
            let mut ord = a.cmp(b);
            if self.directions.get(i).copied().unwrap_or(false) {
                ord = ord.reverse();
            }
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

/// Heap entry for the K-way merge. Ordered by key, then by segment creation
/// order for the documented tie-break.
struct MergeEntry {
    key: SortKey,
    segment: usize,
    row: Row,
}

impl PartialEq for MergeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MergeEntry {}

impl PartialOrd for MergeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| self.segment.cmp(&other.segment))
    }
}

/// Per-row key generation for one run.
enum KeyGen {
    Columns(Vec<usize>),
    Random(StdRng),
}

impl KeyGen {
    fn key_for(&mut self, row: &Row) -> Vec<Value> {
        match self {
            KeyGen::Columns(positions) => positions
                .iter()
                .map(|&i| row.get(i).cloned().unwrap_or(Value::Null))
                .collect(),
            KeyGen::Random(rng) => vec![Value::Number(rng.random::<f64>())],
        }
    }

    fn width(&self) -> usize {
        match self {
            KeyGen::Columns(positions) => positions.len(),
            KeyGen::Random(_) => 1,
        }
    }
}

/// Two-phase external merge sorter.
pub struct ExternalSorter {
    budget: ChunkBudget,
    format: CsvFormat,
    strictness: Strictness,
    temp_parent: Option<PathBuf>,
    threads: usize,
    max_open: usize,
}

impl ExternalSorter {
    pub fn new(budget: ChunkBudget) -> Self {
        Self {
            budget,
            format: CsvFormat::default(),
            strictness: Strictness::default(),
            temp_parent: None,
            threads: num_cpus::get(),
            max_open: MAX_OPEN_SEGMENTS,
        }
    }

    /// Set the input/output delimited-text format.
    #[must_use]
    pub fn format(mut self, format: CsvFormat) -> Self {
        self.format = format;
        self
    }

    /// Set ragged-row handling.
    #[must_use]
    pub fn strictness(mut self, strictness: Strictness) -> Self {
        self.strictness = strictness;
        self
    }

    /// Place spill segments under this directory instead of the system temp
    /// location.
    #[must_use]
    pub fn temp_dir(mut self, path: PathBuf) -> Self {
        self.temp_parent = Some(path);
        self
    }

    /// Thread count for in-memory chunk sorting. `1` disables parallel sort.
    #[must_use]
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Cap on simultaneously open segment files during the merge phase.
    /// Runs producing more segments merge them in intermediate passes first.
    /// Must be at least 2.
    #[must_use]
    pub fn max_open_segments(mut self, limit: usize) -> Self {
        self.max_open = limit;
        self
    }

    /// Sort `input` by `spec`, streaming the result into `sink`.
    ///
    /// On any error all segments created so far are removed before the error
    /// is returned; no partial output is silently left behind.
    pub fn sort(
        &self,
        input: impl AsRef<Path>,
        spec: &SortSpec,
        sink: &mut dyn RowSink,
    ) -> Result<SortStats> {
        if self.max_open < 2 {
            return Err(Error::Config("segment merge needs at least 2 open files".into()));
        }
        let mut reader =
            ChunkedReader::open(input.as_ref(), &self.format, self.budget, self.strictness)?;
        let schema = reader.schema().clone();

        let (mut keygen, directions) = self.resolve_spec(spec, &schema)?;
        sink.write_header(&schema)?;

        log::info!(
            "sorting {} ({} mode)",
            input.as_ref().display(),
            match spec {
                SortSpec::Columns(_) => "keyed",
                SortSpec::Random { .. } => "random",
            }
        );

        let mut stats = SortStats::default();
        // Store and segments are created lazily: a run that fits in one chunk
        // (or is empty) must leave no temp files behind.
        let mut store: Option<SpillStore> = None;
        let mut handles: Vec<SegmentHandle> = Vec::new();
        let mut pending: Option<Vec<(SortKey, Row)>> = None;

        for chunk in &mut reader {
            let chunk = chunk?;
            stats.rows_read += chunk.len() as u64;
            let mut rows = self.keyed_rows(chunk, &mut keygen, &directions);
            self.sort_chunk(&mut rows);

            if let Some(prev) = pending.take() {
                if store.is_none() {
                    store = Some(SpillStore::new(self.temp_parent.as_deref())?);
                }
                let store = store.as_mut().expect("just initialized");
                handles.push(Self::spill(store, keygen.width(), prev)?);
                stats.segments_spilled += 1;
            }
            pending = Some(rows);
        }

        match pending {
            None => {
                // Empty input: header only.
            }
            Some(rows) if handles.is_empty() => {
                log::info!("input fits in one chunk, sorting in memory");
                for (_, row) in rows {
                    sink.write_row(&row)?;
                    stats.rows_written += 1;
                }
            }
            Some(rows) => {
                let store = store.as_mut().expect("segments exist, store must too");
                handles.push(Self::spill(store, keygen.width(), rows)?);
                stats.segments_spilled += 1;
                stats.rows_written =
                    self.merge(store, handles, &directions, keygen.width(), sink)?;
            }
        }

        sink.finish()?;
        log::info!(
            "sort complete: {} rows read, {} segments, {} rows written",
            stats.rows_read,
            stats.segments_spilled,
            stats.rows_written
        );
        Ok(stats)
    }

    fn resolve_spec(&self, spec: &SortSpec, schema: &Schema) -> Result<(KeyGen, Arc<[bool]>)> {
        match spec {
            SortSpec::Columns(columns) => {
                if columns.is_empty() {
                    return Err(Error::Config("no sort columns given".into()));
                }
                let positions = columns
                    .iter()
                    .map(|c| {
                        schema
                            .position(&c.name)
                            .ok_or_else(|| Error::Config(format!("unknown sort column '{}'", c.name)))
                    })
                    .collect::<Result<Vec<_>>>()?;
                let directions: Arc<[bool]> =
                    columns.iter().map(|c| c.descending).collect::<Vec<_>>().into();
                Ok((KeyGen::Columns(positions), directions))
            }
            SortSpec::Random { seed } => {
                Ok((KeyGen::Random(StdRng::seed_from_u64(*seed)), Arc::from(Vec::new())))
            }
        }
    }

    fn keyed_rows(
        &self,
        chunk: Chunk,
        keygen: &mut KeyGen,
        directions: &Arc<[bool]>,
    ) -> Vec<(SortKey, Row)> {
        chunk
            .into_iter()
            .map(|row| {
                let cells = keygen.key_for(&row);
                (SortKey { cells, directions: Arc::clone(directions) }, row)
            })
            .collect()
    }

    /// Stable in-memory sort of one chunk.
    fn sort_chunk(&self, rows: &mut [(SortKey, Row)]) {
        if self.threads > 1 && rows.len() >= PAR_SORT_THRESHOLD {
            rows.par_sort_by(|a, b| a.0.cmp(&b.0));
        } else {
            rows.sort_by(|a, b| a.0.cmp(&b.0));
        }
    }

    fn spill(
        store: &mut SpillStore,
        key_width: usize,
        rows: Vec<(SortKey, Row)>,
    ) -> Result<SegmentHandle> {
        let keyed: Vec<(Vec<Value>, Row)> =
            rows.into_iter().map(|(k, r)| (k.cells, r)).collect();
        store.persist(key_width, &keyed)
    }

    /// Merge all segments into the sink, never opening more than `max_open`
    /// at once. Oversized runs first merge prefix groups into intermediate
    /// segments; the merged segment re-enters at the front so equal keys
    /// still resolve to original file order.
    fn merge(
        &self,
        store: &mut SpillStore,
        mut handles: Vec<SegmentHandle>,
        directions: &Arc<[bool]>,
        key_width: usize,
        sink: &mut dyn RowSink,
    ) -> Result<u64> {
        while handles.len() > self.max_open {
            let group: Vec<SegmentHandle> = handles.drain(..self.max_open).collect();
            log::info!(
                "intermediate merge of {} segments ({} still waiting)",
                group.len(),
                handles.len()
            );
            let mut writer = store.begin_segment(key_width)?;
            Self::merge_group(store, group, directions, &mut |key, row| {
                writer.write(key, row)
            })?;
            handles.insert(0, writer.finish()?);
        }

        log::info!("merging {} segments", handles.len());
        let mut written = 0u64;
        Self::merge_group(store, handles, directions, &mut |_key, row| {
            sink.write_row(row)?;
            written += 1;
            Ok(())
        })?;
        Ok(written)
    }

    /// K-way merge over one group of segments; releases each one as it is
    /// exhausted.
    fn merge_group(
        store: &mut SpillStore,
        handles: Vec<SegmentHandle>,
        directions: &Arc<[bool]>,
        emit: &mut dyn FnMut(&[Value], &Row) -> Result<()>,
    ) -> Result<()> {
        let mut readers: Vec<SegmentReader> = handles
            .iter()
            .map(|h| store.reopen(h))
            .collect::<Result<Vec<_>>>()?;
        let mut handles: Vec<Option<SegmentHandle>> =
            handles.into_iter().map(Some).collect();

        let mut heap: BinaryHeap<Reverse<MergeEntry>> = BinaryHeap::with_capacity(readers.len());
        for (segment, reader) in readers.iter_mut().enumerate() {
            if let Some((cells, row)) = reader.next_row()? {
                heap.push(Reverse(MergeEntry {
                    key: SortKey { cells, directions: Arc::clone(directions) },
                    segment,
                    row,
                }));
            } else if let Some(handle) = handles[segment].take() {
                store.release(handle)?;
            }
        }

        while let Some(Reverse(entry)) = heap.pop() {
            emit(&entry.key.cells, &entry.row)?;
            let segment = entry.segment;
            if let Some((cells, row)) = readers[segment].next_row()? {
                heap.push(Reverse(MergeEntry {
                    key: SortKey { cells, directions: Arc::clone(directions) },
                    segment,
                    row,
                }));
            } else if let Some(handle) = handles[segment].take() {
                store.release(handle)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(cells: Vec<Value>, directions: &[bool]) -> SortKey {
        SortKey { cells, directions: Arc::from(directions) }
    }

    #[test]
    fn descending_direction_reverses_per_column() {
        let a = key(vec![Value::Number(1.0), Value::Number(9.0)], &[false, true]);
        let b = key(vec![Value::Number(1.0), Value::Number(2.0)], &[false, true]);
        assert!(a < b);
    }

    #[test]
    fn merge_entries_break_ties_by_segment_order() {
        let k = |seg| MergeEntry {
            key: key(vec![Value::Number(5.0)], &[]),
            segment: seg,
            row: vec![],
        };
        assert!(k(0) < k(1));
    }
}
