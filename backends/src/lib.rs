//! Storage backends and the [`Repository`] abstraction over them.
//!
//! Three variants exist: a local content store writing tar packs, a
//! git remote holding one branch per package, and an external
//! restic-compatible archiver. Workflows only ever see the trait.

pub mod archiver;
pub mod datastore;
pub mod files;
pub mod git;
pub mod process;
pub mod repository;

pub use archiver::ArchiverRepository;
pub use datastore::DatastoreRepository;
pub use git::GitRepository;
pub use process::{ProcessOutput, ProcessRunner};
pub use repository::{
    build_repository, BackupContext, BackupStats, CopyContext, DiskStats, Repository,
    RestoreContext,
};
