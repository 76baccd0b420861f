use crate::task::{lock, ResultBook, Task, TaskOutput, TaskState};
use packhaul_core::progress::{noop_progress, Progress, ProgressStep};
use packhaul_core::{Error, ProgressHandler, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Aggregate outcome of one orchestrated run.
#[derive(Debug, Clone, Copy)]
pub struct RunSummary {
    pub elapsed: Duration,
    pub error_count: usize,
}

impl RunSummary {
    pub fn is_clean(&self) -> bool {
        self.error_count == 0
    }
}

/// Drives a declared task tree to completion.
///
/// Tasks run in declaration order; a body may return further tasks,
/// which run before the next declared sibling so their results are
/// registered before anything declared later looks them up. A failed
/// task halts its own subtree; when marked non-fatal the failure stops
/// there instead of propagating to the parent scope, so unrelated
/// siblings keep running.
pub struct TaskRunner {
    book: Arc<ResultBook>,
    progress: ProgressHandler,
    executed: AtomicU64,
}

impl TaskRunner {
    pub fn new() -> Self {
        Self {
            book: ResultBook::new(),
            progress: noop_progress(),
            executed: AtomicU64::new(0),
        }
    }

    pub fn with_progress(mut self, progress: ProgressHandler) -> Self {
        self.progress = progress;
        self
    }

    pub fn book(&self) -> Arc<ResultBook> {
        self.book.clone()
    }

    /// Runs the tree. Leaf failures are recorded on their results and
    /// reflected in the summary's error count; only cancellation and
    /// programming errors (duplicate task ids) surface as `Err`.
    pub async fn run(&self, tasks: Vec<Task>) -> Result<RunSummary> {
        let started = Instant::now();
        match self.run_list(tasks).await {
            Ok(()) => {}
            Err(err @ (Error::Aborted | Error::DuplicateTaskResult { .. })) => return Err(err),
            Err(err) => {
                // Already recorded on the failing task's result.
                debug!(error = %err, "Run halted by a fatal task failure");
            }
        }
        Ok(RunSummary {
            elapsed: started.elapsed(),
            error_count: self.book.error_count(),
        })
    }

    async fn run_list(&self, tasks: Vec<Task>) -> Result<()> {
        for task in tasks {
            let non_fatal = task.non_fatal;
            match Box::pin(self.run_one(task)).await {
                Ok(()) => {}
                Err(err @ (Error::Aborted | Error::DuplicateTaskResult { .. })) => return Err(err),
                Err(err) if non_fatal => {
                    debug!(error = %err, "Continuing past non-fatal task failure");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    async fn run_one(&self, task: Task) -> Result<()> {
        let result = self.book.register(task.id.clone())?;
        let count = self.executed.fetch_add(1, Ordering::SeqCst) + 1;
        (self.progress)(&Progress::absolute(
            ProgressStep::message(task.id.to_string()).with_payload(count.to_string()),
        ));
        debug!(task = %task.id, "Starting task");
        lock(&result).state = TaskState::Started;

        let started = Instant::now();
        let outcome = (task.body)(self.book.clone()).await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(TaskOutput { data, children }) => {
                {
                    let mut guard = lock(&result);
                    guard.state = TaskState::Completed;
                    guard.elapsed = elapsed;
                    guard.data = data;
                }
                self.run_list(children).await
            }
            Err(err) => {
                error!(task = %task.id, error = %err, "Task failed");
                let mut guard = lock(&result);
                guard.state = TaskState::Failed;
                guard.elapsed = elapsed;
                guard.error = Some(err.to_string());
                drop(guard);
                Err(err)
            }
        }
    }
}

impl Default for TaskRunner {
    fn default() -> Self {
        Self::new()
    }
}
