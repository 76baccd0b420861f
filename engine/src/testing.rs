//! Recording mocks shared by the workflow tests.

use crate::provider::RepositoryProvider;
use async_trait::async_trait;
use packhaul_backends::{
    BackupContext, BackupStats, CopyContext, DiskStats, Repository, RestoreContext,
};
use packhaul_core::config::{
    BackendConfig, BackendKind, DatastoreConfig, EnabledActions, RepositoryDescriptor,
};
use packhaul_core::filter::SnapshotFilter;
use packhaul_core::{Config, Error, PackageDescriptor, Result, Snapshot};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn descriptor(name: &str) -> RepositoryDescriptor {
    RepositoryDescriptor {
        name: name.to_string(),
        mirror_repo_names: Vec::new(),
        enabled_actions: EnabledActions::default(),
        backend: BackendConfig::Datastore(DatastoreConfig {
            root: PathBuf::from("/unused"),
            compress: false,
        }),
    }
}

pub fn package_for(name: &str, path: &Path, repositories: &[&str]) -> PackageDescriptor {
    PackageDescriptor {
        name: name.to_string(),
        path: path.to_path_buf(),
        include: Vec::new(),
        exclude: Vec::new(),
        repository_names: repositories.iter().map(|s| s.to_string()).collect(),
        prune_policy: None,
        packs: Vec::new(),
        hook: None,
    }
}

/// In-memory repository recording every call it receives.
pub struct MockRepository {
    name: String,
    kind: BackendKind,
    snapshots: Mutex<Vec<Snapshot>>,
    inits: AtomicUsize,
    backups: AtomicUsize,
    restores: AtomicUsize,
    copies: Mutex<Vec<String>>,
    pruned: Mutex<Vec<String>>,
    fail_backups: AtomicBool,
}

impl MockRepository {
    pub fn new(name: &str, kind: BackendKind) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            kind,
            snapshots: Mutex::new(Vec::new()),
            inits: AtomicUsize::new(0),
            backups: AtomicUsize::new(0),
            restores: AtomicUsize::new(0),
            copies: Mutex::new(Vec::new()),
            pruned: Mutex::new(Vec::new()),
            fail_backups: AtomicBool::new(false),
        })
    }

    pub fn seed(&self, snapshot: Snapshot) {
        self.snapshots.lock().unwrap().push(snapshot);
    }

    pub fn fail_backups(&self) {
        self.fail_backups.store(true, Ordering::SeqCst);
    }

    pub fn init_calls(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }

    pub fn backup_calls(&self) -> usize {
        self.backups.load(Ordering::SeqCst)
    }

    pub fn restore_calls(&self) -> usize {
        self.restores.load(Ordering::SeqCst)
    }

    pub fn copy_targets(&self) -> Vec<String> {
        self.copies.lock().unwrap().clone()
    }

    pub fn pruned_ids(&self) -> Vec<String> {
        self.pruned.lock().unwrap().clone()
    }

    pub fn stored_ids(&self) -> Vec<String> {
        self.snapshots
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.id.clone())
            .collect()
    }
}

#[async_trait]
impl Repository for MockRepository {
    fn source(&self) -> String {
        format!("mock:{}", self.name)
    }

    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn disk_stats(&self) -> Result<Option<DiskStats>> {
        Ok(None)
    }

    async fn init(&self) -> Result<()> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch_snapshots(&self, filter: &SnapshotFilter) -> Result<Vec<Snapshot>> {
        Ok(filter.apply(self.snapshots.lock().unwrap().clone()))
    }

    async fn backup(&self, ctx: &BackupContext<'_>) -> Result<BackupStats> {
        self.backups.fetch_add(1, Ordering::SeqCst);
        if self.fail_backups.load(Ordering::SeqCst) {
            return Err(Error::Other(format!("mock backup failure in {}", self.name)));
        }
        self.snapshots.lock().unwrap().push(ctx.snapshot.clone());
        Ok(BackupStats { bytes: 1 })
    }

    async fn restore(&self, ctx: &RestoreContext<'_>) -> Result<()> {
        self.restores.fetch_add(1, Ordering::SeqCst);
        std::fs::write(ctx.target.join("restored.txt"), &ctx.snapshot.id)?;
        Ok(())
    }

    async fn copy(&self, ctx: &CopyContext<'_>) -> Result<BackupStats> {
        self.copies.lock().unwrap().push(ctx.target.name.clone());
        Ok(BackupStats {
            bytes: ctx.snapshot.size,
        })
    }

    async fn prune(&self, snapshot: &Snapshot) -> Result<()> {
        self.pruned.lock().unwrap().push(snapshot.id.clone());
        self.snapshots
            .lock()
            .unwrap()
            .retain(|s| s.id != snapshot.id);
        Ok(())
    }
}

pub struct MockProvider {
    repositories: HashMap<String, Arc<MockRepository>>,
}

impl MockProvider {
    pub fn for_config(config: &Config) -> Arc<Self> {
        let repositories = config
            .repositories
            .iter()
            .map(|r| {
                (
                    r.name.clone(),
                    MockRepository::new(&r.name, r.backend.kind()),
                )
            })
            .collect();
        Arc::new(Self { repositories })
    }

    pub fn repo(&self, name: &str) -> Arc<MockRepository> {
        self.repositories[name].clone()
    }
}

impl RepositoryProvider for MockProvider {
    fn repository(&self, descriptor: &RepositoryDescriptor) -> Result<Arc<dyn Repository>> {
        self.repositories
            .get(&descriptor.name)
            .map(|r| r.clone() as Arc<dyn Repository>)
            .ok_or_else(|| Error::RepositoryNotFound {
                name: descriptor.name.clone(),
            })
    }
}
