//! # csvflow
//!
//! Bounded-memory processing of large delimited text files. Every operation
//! trades execution time for memory: correctness holds regardless of file
//! size, and resident memory stays at one chunk (times the number of open
//! segments during a merge), never the whole file.
//!
//! ## Capabilities
//!
//! - **External sorting** — [`ExternalSorter`] sorts a file by column key(s)
//!   or shuffles it with a seeded random permutation, spilling sorted chunks
//!   to temp segments and K-way merging them back.
//! - **Heterogeneous merging** — [`Merger`] combines files whose column sets
//!   differ under a reconciled (union, first-seen order) schema, by
//!   concatenation or by key-interleaving pre-sorted inputs.
//! - **Parallel transformation** — [`ParallelTransformer`] streams chunks
//!   through a fixed [`WorkerPool`] and re-assembles output, preserving input
//!   order by default.
//!
//! All three share the same substrate: [`ChunkedReader`] yields bounded
//! chunks in file order, and the [`RowSink`] trait appends rows to the
//! destination without ever holding the whole output.
//!
//! ## Quick start
//!
//! ```no_run
//! use csvflow::{ChunkBudget, CsvFormat, CsvSink, ExternalSorter, SortSpec};
//!
//! # fn main() -> csvflow::Result<()> {
//! let sorter = ExternalSorter::new(ChunkBudget::Rows(50_000));
//! let mut sink = CsvSink::create("sorted.csv", &CsvFormat::default())?;
//! let stats = sorter.sort("big.csv", &SortSpec::by("timestamp"), &mut sink)?;
//! println!("{} rows sorted", stats.rows_written);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module overview
//!
//! - [`value`] — cell values, rows and chunks
//! - [`schema`] — schemas, reconciliation and row projection
//! - [`config`] — formats, chunk budgets, strictness
//! - [`reader`] — chunked forward-only file reading
//! - [`spill`] — temp-segment store backing external sort
//! - [`sort`] — the two-phase external merge sorter
//! - [`merge`] — heterogeneous-schema merging
//! - [`pool`] / [`transform`] — worker pool and the parallel driver
//! - [`writer`] — the row sink collaborators
//! - [`error`] — the error taxonomy

pub mod config;
pub mod error;
pub mod merge;
pub mod pool;
pub mod reader;
pub mod schema;
pub mod sort;
pub mod spill;
pub mod transform;
pub mod value;
pub mod writer;

pub use config::{ChunkBudget, CsvFormat, Strictness};
pub use error::{Error, Result};
pub use merge::{MergeInput, MergeMode, MergeStats, Merger};
pub use pool::{CancelToken, TransformFn, WorkerPool};
pub use reader::ChunkedReader;
pub use schema::{Projection, Schema};
pub use sort::{ExternalSorter, SortColumn, SortSpec, SortStats};
pub use transform::{
    FailureMode, OutputOrder, ParallelTransformer, TransformConfig, TransformReport,
};
pub use value::{Chunk, Row, Value};
pub use writer::{CsvSink, MemorySink, RowSink};
