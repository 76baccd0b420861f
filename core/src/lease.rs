use crate::{Error, Result};
use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Session-scoped scratch root, one per process invocation. Every
/// scratch path handed out by a [`LeaseCollector`] lives below it, and
/// teardown at exit removes whatever leaked.
#[derive(Debug)]
pub struct ScratchSession {
    root: PathBuf,
}

impl ScratchSession {
    pub fn create() -> Result<Self> {
        let root = std::env::temp_dir().join(format!(
            "packhaul-{}",
            uuid::Uuid::new_v4().simple()
        ));
        std::fs::create_dir_all(&root)?;
        debug!(root = %root.display(), "Created scratch session");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Guard for every deletion: only paths inside the session root may
    /// ever be removed.
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.root)
    }

    pub async fn teardown(&self) -> Result<()> {
        if tokio::fs::try_exists(&self.root).await? {
            tokio::fs::remove_dir_all(&self.root).await?;
        }
        Ok(())
    }
}

/// A scratch-directory allocation owned by exactly one collector until
/// released or transferred.
#[derive(Debug)]
pub struct Lease {
    path: PathBuf,
}

impl Lease {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Tracks pending scratch leases for one scope of work. Collectors nest
/// via [`LeaseCollector::child`], so a package-level cleanup releases
/// every task-level lease below it.
pub struct LeaseCollector {
    session: Arc<ScratchSession>,
    pending: Mutex<HashSet<PathBuf>>,
    children: Mutex<Vec<Arc<LeaseCollector>>>,
}

impl LeaseCollector {
    pub fn new(session: Arc<ScratchSession>) -> Arc<Self> {
        Arc::new(Self {
            session,
            pending: Mutex::new(HashSet::new()),
            children: Mutex::new(Vec::new()),
        })
    }

    pub fn session(&self) -> &Arc<ScratchSession> {
        &self.session
    }

    pub fn child(self: &Arc<Self>) -> Arc<LeaseCollector> {
        let child = LeaseCollector::new(self.session.clone());
        self.lock(&self.children).push(child.clone());
        child
    }

    /// Creates a fresh scratch directory tracked by this collector.
    pub fn acquire(&self, label: &str) -> Result<Lease> {
        let path = self.session.root().join(format!(
            "{label}-{}",
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        ));
        std::fs::create_dir_all(&path)?;
        self.lock(&self.pending).insert(path.clone());
        Ok(Lease { path })
    }

    /// Takes over a lease released from another collector.
    pub fn adopt(&self, lease: Lease) {
        self.lock(&self.pending).insert(lease.path);
    }

    pub async fn release(&self, lease: Lease) -> Result<()> {
        self.lock(&self.pending).remove(&lease.path);
        self.delete(&lease.path).await
    }

    /// Releases every pending lease of this collector and all its
    /// descendants. Deletion failures are logged, not propagated, so
    /// one stuck path cannot block the rest of the cleanup.
    pub async fn release_all(&self) {
        let children: Vec<Arc<LeaseCollector>> = self.lock(&self.children).drain(..).collect();
        for child in children {
            Box::pin(child.release_all()).await;
        }
        let paths: Vec<PathBuf> = self.lock(&self.pending).drain().collect();
        for path in paths {
            if let Err(err) = self.delete(&path).await {
                warn!(path = %path.display(), error = %err, "Failed to release lease");
            }
        }
    }

    /// Dispose-on-finish: the scratch directory is released after the
    /// block regardless of outcome.
    pub async fn with_scratch<T, F, Fut>(&self, label: &str, f: F) -> Result<T>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let lease = self.acquire(label)?;
        let result = f(lease.path.clone()).await;
        self.release(lease).await?;
        result
    }

    /// Dispose-if-failed: released immediately when the block errors;
    /// on success ownership transfers to the caller, who must adopt the
    /// lease into a collector or release it explicitly.
    pub async fn acquire_scratch<T, F, Fut>(&self, label: &str, f: F) -> Result<(T, Lease)>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let lease = self.acquire(label)?;
        match f(lease.path.clone()).await {
            Ok(value) => {
                self.lock(&self.pending).remove(&lease.path);
                Ok((value, lease))
            }
            Err(err) => {
                self.release(lease).await?;
                Err(err)
            }
        }
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        if !self.session.contains(path) {
            return Err(Error::Other(format!(
                "refusing to delete {} outside scratch root {}",
                path.display(),
                self.session.root().display()
            )));
        }
        if tokio::fs::try_exists(path).await? {
            tokio::fs::remove_dir_all(path).await?;
        }
        Ok(())
    }

    fn lock<'a, T>(&self, mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
