//! Fixed-size worker pool for chunk transforms.
//!
//! Workers are plain threads fed over a bounded crossbeam channel, so
//! submission blocks once the queue is full (backpressure) and no more than
//! `queue_depth` chunks are ever buffered ahead of the workers. Workers share
//! no mutable state; everything moves by message passing — a task in, a
//! result out.

use crate::error::{Error, Result};
use crate::value::Chunk;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

/// A chunk transform. Failures are reported per chunk and never abort the
/// worker thread itself.
pub type TransformFn = dyn Fn(Chunk) -> anyhow::Result<Chunk> + Send + Sync;

/// One unit of work: a chunk and its position in the input sequence.
pub struct Task {
    pub index: u64,
    pub chunk: Chunk,
}

/// A worker's answer for one task.
pub struct TaskOutput {
    pub index: u64,
    pub result: std::result::Result<Chunk, String>,
}

/// Cooperative, run-level cancellation flag. Cloneable; all clones observe
/// the same signal.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Fixed set of worker threads with a bounded task queue.
pub struct WorkerPool {
    task_tx: Option<Sender<Task>>,
    result_rx: Receiver<TaskOutput>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` threads with a task queue of `queue_depth`. Both must
    /// be non-zero.
    pub fn start(workers: usize, queue_depth: usize, transform: Arc<TransformFn>) -> Result<Self> {
        if workers == 0 {
            return Err(Error::Config("worker pool needs at least one worker".into()));
        }
        if queue_depth == 0 {
            return Err(Error::Config("task queue depth must be non-zero".into()));
        }

        let (task_tx, task_rx) = bounded::<Task>(queue_depth);
        // Sized so every in-flight task can park a result without blocking
        // a worker indefinitely while the driver is mid-submit.
        let (result_tx, result_rx) = bounded::<TaskOutput>(queue_depth + workers);

        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            let task_rx = task_rx.clone();
            let result_tx = result_tx.clone();
            let transform = Arc::clone(&transform);
            let handle = std::thread::Builder::new()
                .name(format!("csvflow-worker-{i}"))
                .spawn(move || {
                    for task in task_rx.iter() {
                        let result = transform(task.chunk).map_err(|e| format!("{e:#}"));
                        if result_tx.send(TaskOutput { index: task.index, result }).is_err() {
                            // Driver went away; nothing left to report to.
                            break;
                        }
                    }
                })?;
            handles.push(handle);
        }
        // Workers hold the only remaining clones; dropping these lets the
        // channels disconnect when the pool closes or the workers exit.
        drop(task_rx);
        drop(result_tx);

        Ok(Self { task_tx: Some(task_tx), result_rx, handles })
    }

    /// Submit without blocking. Returns the task when the queue is full or
    /// the pool is no longer accepting work.
    pub fn try_submit(&self, task: Task) -> std::result::Result<(), Task> {
        match &self.task_tx {
            Some(tx) => match tx.try_send(task) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(task)) | Err(TrySendError::Disconnected(task)) => Err(task),
            },
            None => Err(task),
        }
    }

    /// Block for the next result. `None` once all workers have exited and
    /// the result channel is drained.
    pub fn recv_result(&self) -> Option<TaskOutput> {
        self.result_rx.recv().ok()
    }

    /// Non-blocking result poll.
    pub fn try_recv_result(&self) -> Option<TaskOutput> {
        self.result_rx.try_recv().ok()
    }

    /// Stop accepting tasks. Workers drain the queue and exit.
    pub fn close(&mut self) {
        self.task_tx = None;
    }

    /// Wait for all workers to exit. Call after [`close`](Self::close).
    pub fn join(&mut self) {
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // The result channel's capacity covers every possible in-flight
        // task, so workers can always finish their final send and exit.
        self.close();
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn chunk_of(n: f64) -> Chunk {
        vec![vec![Value::Number(n)]]
    }

    #[test]
    fn zero_workers_is_a_config_error() {
        let transform: Arc<TransformFn> = Arc::new(|chunk: Chunk| Ok(chunk));
        assert!(matches!(
            WorkerPool::start(0, 4, transform),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn results_come_back_for_every_task() -> Result<()> {
        let transform: Arc<TransformFn> = Arc::new(|chunk: Chunk| Ok(chunk));
        let mut pool = WorkerPool::start(2, 2, transform)?;
        let mut submitted = 0u64;
        let mut received = 0usize;
        while submitted < 8 {
            let mut task = Task { index: submitted, chunk: chunk_of(submitted as f64) };
            loop {
                match pool.try_submit(task) {
                    Ok(()) => break,
                    Err(t) => {
                        task = t;
                        if pool.recv_result().is_some() {
                            received += 1;
                        }
                    }
                }
            }
            submitted += 1;
        }
        pool.close();
        while pool.recv_result().is_some() {
            received += 1;
        }
        pool.join();
        assert_eq!(received, 8);
        Ok(())
    }

    #[test]
    fn transform_failures_are_reported_per_task() -> Result<()> {
        let transform: Arc<TransformFn> =
            Arc::new(|_chunk: Chunk| anyhow::bail!("boom"));
        let mut pool = WorkerPool::start(1, 1, transform)?;
        assert!(pool.try_submit(Task { index: 0, chunk: chunk_of(1.0) }).is_ok());
        pool.close();
        let out = pool.recv_result().expect("one result");
        assert_eq!(out.index, 0);
        assert_eq!(out.result.unwrap_err(), "boom");
        pool.join();
        Ok(())
    }

    #[test]
    fn cancel_token_is_shared_across_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
