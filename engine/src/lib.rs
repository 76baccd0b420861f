//! Task orchestration and the user-facing workflow actions.
//!
//! Workflows build a tree of orchestrator tasks; leaves call into a
//! [`packhaul_backends::Repository`] through the provider seam, so the
//! whole layer runs against mocks in tests.

pub mod backup;
pub mod copy;
pub mod hook;
pub mod init;
pub mod provider;
pub mod prune;
pub mod restore;
pub mod runner;
pub mod snapshots;
pub mod task;

#[cfg(test)]
mod testing;

pub use backup::{backup, BackupOptions};
pub use copy::{copy, CopyOptions};
pub use hook::{CommandHook, HookContext, HookOutput, PackageHook};
pub use init::init;
pub use provider::{BackendProvider, RepositoryProvider, WorkflowContext};
pub use prune::{prune_repositories, PruneOptions, PruneOutcome};
pub use restore::{restore, RestoreOptions};
pub use runner::{RunSummary, TaskRunner};
pub use snapshots::{snapshots, ListedSnapshot, SnapshotsOptions};
pub use task::{IndexPart, ResultBook, Task, TaskId, TaskOutput, TaskResult, TaskState};
