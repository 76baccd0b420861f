use futures::future::BoxFuture;
use futures::FutureExt;
use packhaul_core::{Error, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// One component of a composite task index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum IndexPart {
    Text(String),
    Number(u64),
}

impl From<&str> for IndexPart {
    fn from(value: &str) -> Self {
        IndexPart::Text(value.to_string())
    }
}

impl From<String> for IndexPart {
    fn from(value: String) -> Self {
        IndexPart::Text(value)
    }
}

impl From<u64> for IndexPart {
    fn from(value: u64) -> Self {
        IndexPart::Number(value)
    }
}

impl fmt::Display for IndexPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexPart::Text(s) => write!(f, "{s}"),
            IndexPart::Number(n) => write!(f, "{n}"),
        }
    }
}

/// Identity of one orchestrated task: a symbolic key plus an optional
/// composite index, unique per run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskId {
    pub key: &'static str,
    pub index: Vec<IndexPart>,
}

impl TaskId {
    pub fn new(key: &'static str) -> Self {
        Self {
            key,
            index: Vec::new(),
        }
    }

    pub fn indexed<I, P>(key: &'static str, index: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<IndexPart>,
    {
        Self {
            key,
            index: index.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)?;
        for part in &self.index {
            write!(f, "[{part}]")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Initial,
    Started,
    Completed,
    Failed,
}

/// Bookkeeping record of one task. Registered as a placeholder before
/// the body runs; only the task's own executor mutates it afterwards.
#[derive(Debug)]
pub struct TaskResult {
    pub id: TaskId,
    pub state: TaskState,
    pub elapsed: Duration,
    pub error: Option<String>,
    /// Arbitrary JSON payload set by the completed body, readable by
    /// later-declared tasks.
    pub data: Option<serde_json::Value>,
}

impl TaskResult {
    fn placeholder(id: TaskId) -> Self {
        Self {
            id,
            state: TaskState::Initial,
            elapsed: Duration::ZERO,
            error: None,
            data: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.state == TaskState::Failed
    }
}

/// Per-run registry of task results, shared across the task tree.
///
/// Registration happens synchronously at declaration time, so a task
/// declared later can look up an earlier sibling's result; declaration
/// order doubles as the dependency edge. Duplicate registration of one
/// id is a programming error and fails immediately.
#[derive(Default)]
pub struct ResultBook {
    results: Mutex<Vec<Arc<Mutex<TaskResult>>>>,
    index: Mutex<HashMap<TaskId, usize>>,
}

impl ResultBook {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn register(&self, id: TaskId) -> Result<Arc<Mutex<TaskResult>>> {
        let mut index = lock(&self.index);
        let mut results = lock(&self.results);
        if index.contains_key(&id) {
            return Err(Error::DuplicateTaskResult { id: id.to_string() });
        }
        let result = Arc::new(Mutex::new(TaskResult::placeholder(id.clone())));
        index.insert(id, results.len());
        results.push(result.clone());
        Ok(result)
    }

    /// Looks up a previously declared task's result. Failing the lookup
    /// means the dependency was never declared, which is an ordering
    /// bug, so this errors instead of returning an option.
    pub fn lookup(&self, id: &TaskId) -> Result<Arc<Mutex<TaskResult>>> {
        let index = lock(&self.index);
        let results = lock(&self.results);
        index
            .get(id)
            .map(|&slot| results[slot].clone())
            .ok_or_else(|| Error::TaskResultNotFound { id: id.to_string() })
    }

    pub fn data_of(&self, id: &TaskId) -> Result<Option<serde_json::Value>> {
        let result = self.lookup(id)?;
        let guard = lock(&result);
        Ok(guard.data.clone())
    }

    /// True if the task failed, or was never declared at all.
    pub fn failed_or_missing(&self, id: &TaskId) -> bool {
        match self.lookup(id) {
            Ok(result) => lock(&result).is_failed(),
            Err(_) => true,
        }
    }

    /// Snapshot of every recorded result, in declaration order.
    pub fn collect<T>(&self, f: impl Fn(&TaskResult) -> T) -> Vec<T> {
        lock(&self.results)
            .iter()
            .map(|result| f(&lock(result)))
            .collect()
    }

    pub fn error_count(&self) -> usize {
        lock(&self.results)
            .iter()
            .filter(|result| lock(result).is_failed())
            .count()
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

type TaskBody = Box<dyn FnOnce(Arc<ResultBook>) -> BoxFuture<'static, Result<TaskOutput>> + Send>;

/// What a completed task body hands back: an optional JSON payload
/// recorded on its result, plus further tasks to run (dynamic fan-out).
pub struct TaskOutput {
    pub data: Option<serde_json::Value>,
    pub children: Vec<Task>,
}

impl TaskOutput {
    pub fn done() -> Self {
        Self {
            data: None,
            children: Vec::new(),
        }
    }

    pub fn with_data(data: serde_json::Value) -> Self {
        Self {
            data: Some(data),
            children: Vec::new(),
        }
    }

    pub fn children(children: Vec<Task>) -> Self {
        Self {
            data: None,
            children,
        }
    }

    pub fn and_children(mut self, children: Vec<Task>) -> Self {
        self.children = children;
        self
    }
}

/// One declared unit of work.
pub struct Task {
    pub id: TaskId,
    pub non_fatal: bool,
    pub(crate) body: TaskBody,
}

impl Task {
    pub fn new<F, Fut>(id: TaskId, body: F) -> Self
    where
        F: FnOnce(Arc<ResultBook>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<TaskOutput>> + Send + 'static,
    {
        Self {
            id,
            non_fatal: false,
            body: Box::new(move |book| body(book).boxed()),
        }
    }

    /// Isolates this task's failure from unrelated sibling subtrees.
    pub fn non_fatal(mut self) -> Self {
        self.non_fatal = true;
        self
    }
}
