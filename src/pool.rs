//! Bounded-parallel task execution.
//!
//! The [`WorkerPool`] spawns P workers that pull [`Task`]s from one shared
//! source until it is exhausted. Every outcome, success or failure, is
//! forwarded to a results channel that closes only after the last worker
//! has finished. Failing tasks never stop their siblings.

use crate::errors::{Severity, TaskError};
use async_trait::async_trait;
use indicatif::ProgressBar;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, trace};

/// One independently executable unit of work, consumed on execution.
#[async_trait]
pub trait Task: Send {
    /// Short human-readable description, used in logs.
    fn describe(&self) -> String;

    async fn execute(self: Box<Self>) -> Result<(), TaskError>;
}

pub type BoxedTask = Box<dyn Task>;

/// Sending half of a task stream.
pub type TaskSender = mpsc::UnboundedSender<BoxedTask>;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("concurrency must be at least 1, got {0}")]
    InvalidConcurrency(usize),
}

/// Result of one executed task.
#[derive(Debug)]
pub struct TaskOutcome {
    pub task: String,
    pub result: Result<(), TaskError>,
}

pub struct WorkerPool {
    concurrency: usize,
    progress: ProgressBar,
}

impl WorkerPool {
    pub fn new(concurrency: usize) -> Result<Self, PoolError> {
        if concurrency == 0 {
            return Err(PoolError::InvalidConcurrency(concurrency));
        }
        Ok(Self {
            concurrency,
            progress: ProgressBar::hidden(),
        })
    }

    /// Tick `progress` once per completed task.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Start the workers on `tasks` and return the stream of outcomes.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(&self, tasks: mpsc::UnboundedReceiver<BoxedTask>) -> mpsc::UnboundedReceiver<TaskOutcome> {
        let source = Arc::new(Mutex::new(tasks));
        let (results_tx, results_rx) = mpsc::unbounded_channel();

        for worker in 0..self.concurrency {
            let source = Arc::clone(&source);
            let results = results_tx.clone();
            let progress = self.progress.clone();

            tokio::spawn(async move {
                loop {
                    let next = source.lock().await.recv().await;
                    let Some(task) = next else {
                        break;
                    };

                    let name = task.describe();
                    trace!("Worker {} picked up: {}", worker, name);
                    let result = execute_isolated(task).await;

                    if let Err(ref e) = result {
                        match e.severity() {
                            Severity::Ignorable => {
                                debug!(target: "audit", "Task ignored error: {}: {}", name, e)
                            }
                            Severity::Fatal => debug!("Task failed: {}: {}", name, e),
                        }
                    }
                    progress.inc(1);

                    // A dropped receiver only means nobody listens anymore;
                    // the source is still drained.
                    let _ = results.send(TaskOutcome { task: name, result });
                }
                trace!("Worker {} finished", worker);
            });
        }

        results_rx
    }

    /// Run a fixed set of tasks to completion.
    pub async fn run_all(&self, tasks: Vec<BoxedTask>) -> Vec<TaskOutcome> {
        let (tx, rx) = mpsc::unbounded_channel();
        for task in tasks {
            // The receiver is alive until `spawn` below takes it.
            let _ = tx.send(task);
        }
        drop(tx);
        collect(self.spawn(rx)).await
    }
}

/// Execute `task` on its own Tokio task so a panic becomes a fatal outcome
/// instead of taking the worker down with it.
async fn execute_isolated(task: BoxedTask) -> Result<(), TaskError> {
    match tokio::spawn(task.execute()).await {
        Ok(result) => result,
        Err(e) => Err(TaskError::fatal(anyhow::anyhow!("task aborted: {}", e))),
    }
}

/// Drain an outcome stream in arrival order.
pub async fn collect(mut outcomes: mpsc::UnboundedReceiver<TaskOutcome>) -> Vec<TaskOutcome> {
    let mut all = Vec::new();
    while let Some(outcome) = outcomes.recv().await {
        all.push(outcome);
    }
    all
}
