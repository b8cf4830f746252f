//! Merging files with heterogeneous schemas into one output.
//!
//! The reconciled schema is computed once, up front, from every input's
//! header and never changes mid-run. `Concatenate` streams each input in the
//! order given; `InterleaveByKey` performs a K-way merge over the live
//! readers and requires every input to already be sorted by the key
//! (pre-sort with [`ExternalSorter`](crate::sort::ExternalSorter) otherwise —
//! unsorted inputs produce unspecified row order).

use crate::config::{ChunkBudget, CsvFormat, Strictness};
use crate::error::{Error, Result};
use crate::reader::ChunkedReader;
use crate::schema::{Projection, Schema};
use crate::sort::SortColumn;
use crate::value::{Row, Value, ValueKind};
use crate::writer::RowSink;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::path::PathBuf;
use std::sync::Arc;

/// How rows from the inputs are combined.
#[derive(Clone, Debug)]
pub enum MergeMode {
    /// All rows of input 0, then input 1, and so on.
    Concatenate,
    /// K-way interleave on a shared key; inputs must be pre-sorted by it.
    InterleaveByKey(Vec<SortColumn>),
}

/// One input file with its own format. Inputs may use different delimiters
/// or null tokens; the output format belongs to the sink.
#[derive(Clone, Debug)]
pub struct MergeInput {
    pub path: PathBuf,
    pub format: CsvFormat,
}

impl MergeInput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), format: CsvFormat::default() }
    }

    #[must_use]
    pub fn with_format(mut self, format: CsvFormat) -> Self {
        self.format = format;
        self
    }
}

/// Counters reported by a completed merge run.
#[derive(Clone, Copy, Debug, Default)]
pub struct MergeStats {
    pub inputs: usize,
    pub rows_read: u64,
    pub rows_written: u64,
}

/// Tracks the first observed kind per reconciled column. Strict mode fails
/// on a clash; lenient mode coerces the clashing value to text.
struct KindTracker {
    kinds: Vec<Option<ValueKind>>,
    strictness: Strictness,
}

impl KindTracker {
    fn new(width: usize, strictness: Strictness) -> Self {
        Self { kinds: vec![None; width], strictness }
    }

    fn observe(&mut self, schema: &Schema, row: &mut Row) -> Result<()> {
        for (i, value) in row.iter_mut().enumerate() {
            let Some(kind) = value.kind() else { continue };
            match self.kinds[i] {
                None => self.kinds[i] = Some(kind),
                Some(seen) if seen == kind => {}
                Some(seen) => {
                    if self.strictness.is_strict() {
                        return Err(Error::SchemaConflict {
                            column: schema.columns()[i].clone(),
                            first: seen.name(),
                            second: kind.name(),
                        });
                    }
                    if kind == ValueKind::Number {
                        *value = Value::Text(value.render(""));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Merges N heterogeneous inputs into one output stream.
pub struct Merger {
    budget: ChunkBudget,
    strictness: Strictness,
}

impl Merger {
    pub fn new(budget: ChunkBudget) -> Self {
        Self { budget, strictness: Strictness::default() }
    }

    /// Set ragged-row and type-conflict handling.
    #[must_use]
    pub fn strictness(mut self, strictness: Strictness) -> Self {
        self.strictness = strictness;
        self
    }

    /// Merge `inputs` under `mode` into `sink`, returning row counters.
    pub fn merge(
        &self,
        inputs: &[MergeInput],
        mode: &MergeMode,
        sink: &mut dyn RowSink,
    ) -> Result<MergeStats> {
        if inputs.is_empty() {
            return Err(Error::Config("no merge inputs given".into()));
        }

        let mut readers = inputs
            .iter()
            .map(|input| {
                ChunkedReader::open(&input.path, &input.format, self.budget, self.strictness)
            })
            .collect::<Result<Vec<_>>>()?;

        let unified = Schema::reconcile(readers.iter().map(|r| r.schema()));
        let projections: Vec<Projection> = readers
            .iter()
            .map(|r| Projection::new(r.schema(), &unified))
            .collect();

        sink.write_header(&unified)?;
        let mut tracker = KindTracker::new(unified.len(), self.strictness);
        let mut stats = MergeStats { inputs: inputs.len(), ..Default::default() };

        log::info!(
            "merging {} inputs into {} columns",
            inputs.len(),
            unified.len()
        );

        match mode {
            MergeMode::Concatenate => {
                self.concatenate(&mut readers, &projections, &unified, &mut tracker, sink, &mut stats)?
            }
            MergeMode::InterleaveByKey(columns) => self.interleave(
                readers,
                &projections,
                &unified,
                columns,
                &mut tracker,
                sink,
                &mut stats,
            )?,
        }

        sink.finish()?;
        log::info!(
            "merge complete: {} rows read, {} rows written",
            stats.rows_read,
            stats.rows_written
        );
        Ok(stats)
    }

    fn concatenate(
        &self,
        readers: &mut [ChunkedReader],
        projections: &[Projection],
        unified: &Schema,
        tracker: &mut KindTracker,
        sink: &mut dyn RowSink,
        stats: &mut MergeStats,
    ) -> Result<()> {
        for (reader, projection) in readers.iter_mut().zip(projections) {
            for chunk in reader.by_ref() {
                let chunk = chunk?;
                stats.rows_read += chunk.len() as u64;
                for row in &chunk {
                    let mut row = projection.project(row);
                    tracker.observe(unified, &mut row)?;
                    sink.write_row(&row)?;
                    stats.rows_written += 1;
                }
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn interleave(
        &self,
        readers: Vec<ChunkedReader>,
        projections: &[Projection],
        unified: &Schema,
        columns: &[SortColumn],
        tracker: &mut KindTracker,
        sink: &mut dyn RowSink,
        stats: &mut MergeStats,
    ) -> Result<()> {
        if columns.is_empty() {
            return Err(Error::Config("no interleave key columns given".into()));
        }
        // Key positions are resolved per source, before projection.
        let key_positions: Vec<Vec<usize>> = readers
            .iter()
            .map(|reader| {
                columns
                    .iter()
                    .map(|c| {
                        reader.schema().position(&c.name).ok_or_else(|| {
                            Error::Config(format!(
                                "key column '{}' missing from '{}'",
                                c.name,
                                reader.schema().columns().join(",")
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;
        let directions: Arc<[bool]> =
            columns.iter().map(|c| c.descending).collect::<Vec<_>>().into();

        let mut cursors: Vec<SourceCursor> =
            readers.into_iter().map(SourceCursor::new).collect();

        let mut heap: BinaryHeap<Reverse<InterleaveEntry>> =
            BinaryHeap::with_capacity(cursors.len());
        for (source, cursor) in cursors.iter_mut().enumerate() {
            if let Some(row) = cursor.next_row()? {
                stats.rows_read += 1;
                heap.push(Reverse(InterleaveEntry::new(
                    row,
                    &key_positions[source],
                    &directions,
                    source,
                )));
            }
        }

        while let Some(Reverse(entry)) = heap.pop() {
            let source = entry.source;
            let mut row = projections[source].project(&entry.row);
            tracker.observe(unified, &mut row)?;
            sink.write_row(&row)?;
            stats.rows_written += 1;

            if let Some(row) = cursors[source].next_row()? {
                stats.rows_read += 1;
                heap.push(Reverse(InterleaveEntry::new(
                    row,
                    &key_positions[source],
                    &directions,
                    source,
                )));
            }
        }
        Ok(())
    }
}

/// Flattens one reader's chunk sequence into a row sequence.
struct SourceCursor {
    reader: ChunkedReader,
    chunk: std::vec::IntoIter<Row>,
}

impl SourceCursor {
    fn new(reader: ChunkedReader) -> Self {
        Self { reader, chunk: Vec::new().into_iter() }
    }

    fn next_row(&mut self) -> Result<Option<Row>> {
        loop {
            if let Some(row) = self.chunk.next() {
                return Ok(Some(row));
            }
            match self.reader.next() {
                Some(Ok(chunk)) => self.chunk = chunk.into_iter(),
                Some(Err(e)) => return Err(e),
                None => return Ok(None),
            }
        }
    }
}

/// Heap entry for interleave mode: key cells with directions applied, then
/// source order for the tie-break.
struct InterleaveEntry {
    cells: Vec<Value>,
    directions: Arc<[bool]>,
    source: usize,
    row: Row,
}

impl InterleaveEntry {
    fn new(row: Row, key_positions: &[usize], directions: &Arc<[bool]>, source: usize) -> Self {
        let cells = key_positions
            .iter()
            .map(|&i| row.get(i).cloned().unwrap_or(Value::Null))
            .collect();
        Self { cells, directions: Arc::clone(directions), source, row }
    }

    fn key_cmp(&self, other: &Self) -> Ordering {
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

impl PartialEq for InterleaveEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for InterleaveEntry {}

impl PartialOrd for InterleaveEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for InterleaveEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key_cmp(other)
            .then_with(|| self.source.cmp(&other.source))
    }
}
