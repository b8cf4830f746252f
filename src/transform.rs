//! End-to-end parallel chunked transformation.
//!
//! The driver runs on one thread: it pulls chunks from a
//! [`ChunkedReader`], submits them to a [`WorkerPool`] and drains results
//! into the sink. A run moves through `Idle -> Dispatching -> Draining ->
//! Done | Aborted`.
//!
//! Output ordering is a configuration choice. [`OutputOrder::Source`]
//! (the default) buffers out-of-order completions until their predecessor
//! chunk has been written, so the output matches a single-threaded run. The
//! buffer is bounded: once it holds more completions than the in-flight task
//! allowance, dispatch pauses until the chunk blocking the write cursor
//! finishes, keeping resident memory at O(chunks in flight) even when one
//! chunk is much slower than its successors. [`OutputOrder::Completion`]
//! writes results as they arrive.
//!
//! Failure handling is equally explicit: [`FailureMode::FailFast`] aborts on
//! the first failed chunk, [`FailureMode::Collect`] records failures in the
//! report next to the rows that did succeed. Silently dropping failed rows is
//! not an option.

use crate::config::{ChunkBudget, CsvFormat, Strictness};
use crate::error::{Error, Result};
use crate::pool::{CancelToken, Task, TaskOutput, TransformFn, WorkerPool};
use crate::reader::ChunkedReader;
use crate::value::Chunk;
use crate::writer::RowSink;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Output ordering guarantee.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputOrder {
    /// Deterministic: output row order matches input order.
    #[default]
    Source,
    /// Lower latency: chunks are written in completion order.
    Completion,
}

/// What happens when a transform fails on a chunk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailureMode {
    /// First failure aborts the run.
    #[default]
    FailFast,
    /// Failures are recorded and reported at the end.
    Collect,
}

/// Configuration for one parallel transform run.
#[derive(Clone, Debug)]
pub struct TransformConfig {
    /// Worker thread count.
    pub workers: usize,
    /// Bounded task queue depth; submission blocks when full.
    pub queue_depth: usize,
    pub order: OutputOrder,
    pub failure: FailureMode,
    pub budget: ChunkBudget,
    pub format: CsvFormat,
    pub strictness: Strictness,
}

impl Default for TransformConfig {
    fn default() -> Self {
        let workers = num_cpus::get().max(1);
        Self {
            workers,
            queue_depth: 2 * workers,
            order: OutputOrder::default(),
            failure: FailureMode::default(),
            budget: ChunkBudget::default(),
            format: CsvFormat::default(),
            strictness: Strictness::default(),
        }
    }
}

/// One failed chunk in a [`FailureMode::Collect`] run.
#[derive(Clone, Debug)]
pub struct ChunkFailure {
    pub chunk_index: u64,
    pub message: String,
}

/// Outcome of a completed run.
#[derive(Debug, Default)]
pub struct TransformReport {
    pub chunks_dispatched: u64,
    pub rows_written: u64,
    pub failures: Vec<ChunkFailure>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RunState {
    Idle,
    Dispatching,
    Draining,
    Done,
    Aborted,
}

/// Drives chunked reading, parallel transformation and re-assembly.
pub struct ParallelTransformer {
    config: TransformConfig,
}

impl ParallelTransformer {
    pub fn new(config: TransformConfig) -> Self {
        Self { config }
    }

    /// Transform `input` through `transform` into `sink`.
    ///
    /// The header written is the input's schema; transforms reshape rows, not
    /// schemas. Cancellation is observed between chunk submissions: dispatch
    /// stops, in-flight tasks finish, workers are joined and
    /// [`Error::Cancelled`] is returned.
    pub fn run(
        &self,
        input: impl AsRef<Path>,
        transform: Arc<TransformFn>,
        sink: &mut dyn RowSink,
        cancel: &CancelToken,
    ) -> Result<TransformReport> {
        let cfg = &self.config;
        let mut state = RunState::Idle;
        log::debug!("run state {state:?}: opening {}", input.as_ref().display());
        let mut reader =
            ChunkedReader::open(input.as_ref(), &cfg.format, cfg.budget, cfg.strictness)?;
        sink.write_header(reader.schema())?;

        let mut pool = WorkerPool::start(cfg.workers, cfg.queue_depth, transform)?;
        let mut report = TransformReport::default();
        let mut drain = DrainBuffer::new(cfg.order, cfg.failure);
        let mut outcome: Result<()> = Ok(());
        // Reorder-buffer bound: past this many buffered completions the
        // chunk blocking the write cursor is still in flight, so wait for
        // it instead of dispatching further.
        let max_pending = cfg.queue_depth + cfg.workers;

        state = RunState::Dispatching;
        log::debug!(
            "run state {state:?}: {} workers, queue depth {}",
            cfg.workers,
            cfg.queue_depth
        );

        'dispatch: for chunk in &mut reader {
            if cancel.is_cancelled() {
                outcome = Err(Error::Cancelled);
                break;
            }
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            };
            let mut task = Task { index: report.chunks_dispatched, chunk };
            report.chunks_dispatched += 1;

            while drain.backlog() > max_pending {
                match pool.recv_result() {
                    Some(output) => {
                        if let Err(e) = drain.accept(output, sink, &mut report) {
                            outcome = Err(e);
                            break 'dispatch;
                        }
                    }
                    None => {
                        outcome = Err(Error::Transform {
                            chunk_index: task.index,
                            message: "worker pool terminated unexpectedly".into(),
                        });
                        break 'dispatch;
                    }
                }
            }

            // Backpressure: when the queue is full, block on a result slot
            // instead of buffering the chunk.
            loop {
                match pool.try_submit(task) {
                    Ok(()) => break,
                    Err(returned) => {
                        task = returned;
                        match pool.recv_result() {
                            Some(output) => {
                                if let Err(e) = drain.accept(output, sink, &mut report) {
                                    outcome = Err(e);
                                    break 'dispatch;
                                }
                            }
                            None => {
                                outcome = Err(Error::Transform {
                                    chunk_index: task.index,
                                    message: "worker pool terminated unexpectedly".into(),
                                });
                                break 'dispatch;
                            }
                        }
                    }
                }
            }

            // Opportunistically drain whatever is already finished.
            while let Some(output) = pool.try_recv_result() {
                if let Err(e) = drain.accept(output, sink, &mut report) {
                    outcome = Err(e);
                    break 'dispatch;
                }
            }
        }

        state = if outcome.is_ok() { RunState::Draining } else { RunState::Aborted };
        log::debug!("dispatch finished, state {state:?}");

        pool.close();
        while let Some(output) = pool.recv_result() {
            if outcome.is_ok()
                && let Err(e) = drain.accept(output, sink, &mut report)
            {
                outcome = Err(e);
            }
        }
        pool.join();

        match outcome {
            Ok(()) => {
                drain.flush(sink, &mut report)?;
                sink.finish()?;
                state = RunState::Done;
                log::info!(
                    "transform {state:?}: {} chunks, {} rows written, {} failed chunks",
                    report.chunks_dispatched,
                    report.rows_written,
                    report.failures.len()
                );
                Ok(report)
            }
            Err(e) => {
                state = RunState::Aborted;
                log::info!("transform {state:?}: {e}");
                Err(e)
            }
        }
    }
}

/// Re-assembles task outputs into sink writes under the configured ordering
/// and failure policy.
struct DrainBuffer {
    order: OutputOrder,
    failure: FailureMode,
    /// Completed-but-unwritten chunks in source order; `None` marks a failed
    /// chunk that should be skipped when its turn comes.
    pending: BTreeMap<u64, Option<Chunk>>,
    next_write: u64,
}

impl DrainBuffer {
    fn new(order: OutputOrder, failure: FailureMode) -> Self {
        Self { order, failure, pending: BTreeMap::new(), next_write: 0 }
    }

    /// Completions buffered ahead of the write cursor.
    fn backlog(&self) -> usize {
        self.pending.len()
    }

    fn accept(
        &mut self,
        output: TaskOutput,
        sink: &mut dyn RowSink,
        report: &mut TransformReport,
    ) -> Result<()> {
        match output.result {
            Ok(chunk) => match self.order {
                OutputOrder::Completion => {
                    report.rows_written += chunk.len() as u64;
                    sink.write_chunk(&chunk)?;
                }
                OutputOrder::Source => {
                    self.pending.insert(output.index, Some(chunk));
                    self.write_ready(sink, report)?;
                }
            },
            Err(message) => match self.failure {
                FailureMode::FailFast => {
                    return Err(Error::Transform { chunk_index: output.index, message });
                }
                FailureMode::Collect => {
                    log::debug!("chunk {} failed: {message}", output.index);
                    report
                        .failures
                        .push(ChunkFailure { chunk_index: output.index, message });
                    if self.order == OutputOrder::Source {
                        self.pending.insert(output.index, None);
                        self.write_ready(sink, report)?;
                    }
                }
            },
        }
        Ok(())
    }

    fn write_ready(&mut self, sink: &mut dyn RowSink, report: &mut TransformReport) -> Result<()> {
        while let Some(entry) = self.pending.remove(&self.next_write) {
            if let Some(chunk) = entry {
                report.rows_written += chunk.len() as u64;
                sink.write_chunk(&chunk)?;
            }
            self.next_write += 1;
        }
        Ok(())
    }

    fn flush(&mut self, sink: &mut dyn RowSink, report: &mut TransformReport) -> Result<()> {
        self.write_ready(sink, report)?;
        debug_assert!(self.pending.is_empty(), "all chunk results must have arrived");
        Ok(())
    }
}
