use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Repository not found: {name}")]
    RepositoryNotFound { name: String },

    #[error("Package not found: {name}")]
    PackageNotFound { name: String },

    #[error("Snapshot not found: {id}")]
    SnapshotNotFound { id: String },

    #[error("Task result not found: {id}")]
    TaskResultNotFound { id: String },

    #[error("Duplicate task result registered: {id}")]
    DuplicateTaskResult { id: String },

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("{program} exited with status {code:?}: {stderr_tail}")]
    Process {
        program: String,
        code: Option<i32>,
        stderr_tail: String,
    },

    #[error("Insufficient disk space on {source_name}: {free} bytes free, {required} required")]
    InsufficientDiskSpace {
        source_name: String,
        free: u64,
        required: u64,
    },

    #[error("Operation aborted")]
    Aborted,

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Error::Integrity(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
