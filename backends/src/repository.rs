use crate::archiver::ArchiverRepository;
use crate::datastore::DatastoreRepository;
use crate::git::GitRepository;
use async_trait::async_trait;
use packhaul_core::config::{BackendConfig, BackendKind, MinFreeDiskSpace, RepositoryDescriptor};
use packhaul_core::filter::SnapshotFilter;
use packhaul_core::{
    CancelToken, Error, LeaseCollector, PackageDescriptor, ProgressHandler, Result, ScratchSession,
    Snapshot,
};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
pub struct DiskStats {
    pub total: u64,
    pub free: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BackupStats {
    pub bytes: u64,
}

/// Everything a backend needs to commit one package backup. The
/// snapshot carries the invocation identity (id, date, tags, task);
/// the backend fills in size and its native handle at commit time.
pub struct BackupContext<'a> {
    pub package: &'a PackageDescriptor,
    pub snapshot: &'a Snapshot,
    pub path: &'a Path,
    pub progress: &'a ProgressHandler,
    pub token: &'a CancelToken,
    pub leases: &'a Arc<LeaseCollector>,
}

pub struct RestoreContext<'a> {
    pub package: &'a PackageDescriptor,
    pub snapshot: &'a Snapshot,
    pub target: &'a Path,
    pub progress: &'a ProgressHandler,
    pub token: &'a CancelToken,
    pub leases: &'a Arc<LeaseCollector>,
}

pub struct CopyContext<'a> {
    pub package: &'a PackageDescriptor,
    pub snapshot: &'a Snapshot,
    pub target: &'a RepositoryDescriptor,
    pub progress: &'a ProgressHandler,
    pub token: &'a CancelToken,
    pub leases: &'a Arc<LeaseCollector>,
}

/// Uniform storage operations over the backend variants.
///
/// Implementations derive the canonical [`Snapshot`] purely from their
/// own native metadata, so `fetch_snapshots` is a pure projection and
/// no side database exists.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Human-readable location of the backing store.
    fn source(&self) -> String;

    fn kind(&self) -> BackendKind;

    /// Disk usage of the backing store, when knowable.
    async fn disk_stats(&self) -> Result<Option<DiskStats>>;

    async fn init(&self) -> Result<()>;

    async fn fetch_snapshots(&self, filter: &SnapshotFilter) -> Result<Vec<Snapshot>>;

    async fn backup(&self, ctx: &BackupContext<'_>) -> Result<BackupStats>;

    async fn restore(&self, ctx: &RestoreContext<'_>) -> Result<()>;

    /// Transfers one snapshot into a same-kind repository.
    async fn copy(&self, ctx: &CopyContext<'_>) -> Result<BackupStats>;

    async fn prune(&self, snapshot: &Snapshot) -> Result<()>;

    /// Best-effort preflight, read once per workflow invocation. The
    /// default derives from [`Repository::disk_stats`] and fails when
    /// the floor is not met; stores that cannot report stats pass.
    async fn ensure_free_disk_space(&self, min_free: &MinFreeDiskSpace) -> Result<()> {
        match self.disk_stats().await? {
            None => Ok(()),
            Some(stats) => {
                let required = min_free.required_bytes(stats.total);
                if stats.free < required {
                    Err(Error::InsufficientDiskSpace {
                        source_name: self.source(),
                        free: stats.free,
                        required,
                    })
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// Resolves a descriptor to its backend variant. The match is
/// exhaustive over the closed set of kinds.
pub fn build_repository(
    descriptor: &RepositoryDescriptor,
    session: Arc<ScratchSession>,
) -> Arc<dyn Repository> {
    match &descriptor.backend {
        BackendConfig::Datastore(config) => Arc::new(DatastoreRepository::new(
            descriptor.name.clone(),
            config.clone(),
        )),
        BackendConfig::Git(config) => Arc::new(GitRepository::new(
            descriptor.name.clone(),
            config.clone(),
            session,
        )),
        BackendConfig::Archiver(config) => Arc::new(ArchiverRepository::new(
            descriptor.name.clone(),
            config.clone(),
        )),
    }
}

/// Looks up a disk by longest mount-point prefix of `path`.
pub(crate) fn disk_stats_for_path(path: &Path) -> Option<DiskStats> {
    let disks = sysinfo::Disks::new_with_refreshed_list();
    let mut best: Option<(usize, DiskStats)> = None;
    for disk in disks.list() {
        let mount = disk.mount_point();
        if path.starts_with(mount) {
            let depth = mount.components().count();
            let stats = DiskStats {
                total: disk.total_space(),
                free: disk.available_space(),
            };
            if best.map_or(true, |(d, _)| depth > d) {
                best = Some((depth, stats));
            }
        }
    }
    best.map(|(_, stats)| stats)
}
