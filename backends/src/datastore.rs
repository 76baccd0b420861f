use crate::files::{matched_files, path_pattern_key, MatchedFile};
use crate::repository::{
    disk_stats_for_path, BackupContext, BackupStats, CopyContext, DiskStats, Repository,
    RestoreContext,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use packhaul_core::config::{BackendConfig, BackendKind, DatastoreConfig, PackSpec};
use packhaul_core::filter::{glob_match_any, SnapshotFilter};
use packhaul_core::progress::{Progress, ProgressStep};
use packhaul_core::{Error, Result, Snapshot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

const META_FILE: &str = "meta.json";
const STAGING_SUFFIX: &str = "_tmp";

/// Sidecar written last into every snapshot directory; its presence
/// marks the snapshot as committed, so interrupted backups are never
/// visible to `fetch_snapshots`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub id: String,
    pub hostname: String,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub package: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    pub version: String,
    pub size: u64,
    #[serde(default, rename = "tarStats")]
    pub tar_stats: BTreeMap<String, PackStat>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackStat {
    pub files: u64,
    pub size: u64,
    pub checksum: String,
}

/// Content-store backend: one directory per snapshot holding tar packs
/// plus `meta.json`.
pub struct DatastoreRepository {
    name: String,
    config: DatastoreConfig,
}

impl DatastoreRepository {
    pub fn new(name: String, config: DatastoreConfig) -> Self {
        Self { name, config }
    }

    fn package_dir(&self, package: &str) -> PathBuf {
        self.config.root.join(package)
    }

    fn snapshot_dir_name(snapshot: &Snapshot) -> String {
        format!(
            "{}_{}",
            snapshot.date.format("%Y%m%dT%H%M%S"),
            snapshot.short_id()
        )
    }

    async fn read_meta(&self, dir: &Path) -> Result<Option<SnapshotMeta>> {
        let meta_path = dir.join(META_FILE);
        match fs::read(&meta_path).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Scans `<root>/<package>/<snapshot>` directories and projects
    /// each committed `meta.json` into a canonical snapshot.
    async fn scan(&self) -> Result<Vec<(PathBuf, Snapshot)>> {
        let mut found = Vec::new();
        let mut packages = match fs::read_dir(&self.config.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(found),
            Err(e) => return Err(e.into()),
        };
        while let Some(package_entry) = packages.next_entry().await? {
            if !package_entry.file_type().await?.is_dir() {
                continue;
            }
            let mut snapshots = fs::read_dir(package_entry.path()).await?;
            while let Some(entry) = snapshots.next_entry().await? {
                let dir_name = entry.file_name().to_string_lossy().to_string();
                if dir_name.ends_with(STAGING_SUFFIX) || !entry.file_type().await?.is_dir() {
                    continue;
                }
                let Some(meta) = self.read_meta(&entry.path()).await? else {
                    continue;
                };
                found.push((
                    entry.path(),
                    Snapshot {
                        id: meta.id,
                        original_id: dir_name,
                        date: meta.date,
                        package_name: meta.package,
                        package_task_name: meta.task,
                        tags: meta.tags,
                        hostname: meta.hostname,
                        size: meta.size,
                    },
                ));
            }
        }
        Ok(found)
    }

    async fn locate(&self, snapshot: &Snapshot) -> Result<(PathBuf, SnapshotMeta)> {
        let dir = self
            .package_dir(&snapshot.package_name)
            .join(&snapshot.original_id);
        match self.read_meta(&dir).await? {
            Some(meta) => Ok((dir, meta)),
            None => Err(Error::SnapshotNotFound {
                id: snapshot.id.clone(),
            }),
        }
    }
}

#[async_trait]
impl Repository for DatastoreRepository {
    fn source(&self) -> String {
        self.config.root.display().to_string()
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Datastore
    }

    async fn disk_stats(&self) -> Result<Option<DiskStats>> {
        Ok(disk_stats_for_path(&self.config.root))
    }

    async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.config.root).await?;
        Ok(())
    }

    async fn fetch_snapshots(&self, filter: &SnapshotFilter) -> Result<Vec<Snapshot>> {
        let snapshots = self.scan().await?.into_iter().map(|(_, s)| s).collect();
        Ok(filter.apply(snapshots))
    }

    async fn backup(&self, ctx: &BackupContext<'_>) -> Result<BackupStats> {
        let snapshot_dir = self
            .package_dir(&ctx.snapshot.package_name)
            .join(Self::snapshot_dir_name(ctx.snapshot));
        if fs::try_exists(&snapshot_dir).await? {
            return Err(Error::integrity(format!(
                "snapshot directory already exists: {}",
                snapshot_dir.display()
            )));
        }
        fs::create_dir_all(&snapshot_dir).await?;

        let files = matched_files(ctx.path, ctx.package)?;
        let plans = plan_packs(&files, &ctx.package.packs);
        let total_packs = plans.len() as u64;

        let mut tar_stats = BTreeMap::new();
        let mut total_size = 0;
        for (index, plan) in plans.into_iter().enumerate() {
            ctx.token.check()?;
            let file_name = pack_file_name(index, plan.name.as_deref(), self.config.compress);
            (ctx.progress)(&Progress::both(
                ProgressStep::counted("Writing packs", index as u64, total_packs),
                ProgressStep::message(&file_name),
            ));
            let stat = {
                let src_root = ctx.path.to_path_buf();
                let dest = snapshot_dir.join(&file_name);
                let members: Vec<PathBuf> =
                    plan.files.iter().map(|f| f.relative.clone()).collect();
                let compress = self.config.compress;
                let token = ctx.token.clone();
                tokio::task::spawn_blocking(move || {
                    write_pack(&src_root, &members, &dest, compress, &token)
                })
                .await
                .map_err(|e| Error::Other(format!("pack writer panicked: {e}")))??
            };
            total_size += stat.size;
            tar_stats.insert(file_name, stat);
        }

        let meta = SnapshotMeta {
            id: ctx.snapshot.id.clone(),
            hostname: ctx.snapshot.hostname.clone(),
            date: ctx.snapshot.date,
            tags: ctx.snapshot.tags.clone(),
            package: ctx.snapshot.package_name.clone(),
            task: ctx.snapshot.package_task_name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            size: total_size,
            tar_stats,
        };
        fs::write(
            snapshot_dir.join(META_FILE),
            serde_json::to_vec_pretty(&meta)?,
        )
        .await?;

        info!(
            repository = %self.name,
            package = %ctx.snapshot.package_name,
            snapshot = %ctx.snapshot.short_id(),
            bytes = total_size,
            "Committed datastore snapshot"
        );
        Ok(BackupStats { bytes: total_size })
    }

    async fn restore(&self, ctx: &RestoreContext<'_>) -> Result<()> {
        let (dir, meta) = self.locate(ctx.snapshot).await?;
        fs::create_dir_all(ctx.target).await?;

        let total = meta.tar_stats.len() as u64;
        for (index, (file_name, stat)) in meta.tar_stats.iter().enumerate() {
            ctx.token.check()?;
            (ctx.progress)(&Progress::both(
                ProgressStep::counted("Unpacking", index as u64, total),
                ProgressStep::message(file_name),
            ));
            let pack_path = dir.join(file_name);
            let expected = stat.checksum.clone();
            let target = ctx.target.to_path_buf();
            let name = file_name.clone();
            tokio::task::spawn_blocking(move || {
                let actual = hash_file(&pack_path)?;
                if actual != expected {
                    return Err(Error::integrity(format!(
                        "checksum mismatch for {name}: expected {expected}, got {actual}"
                    )));
                }
                unpack(&pack_path, &target)
            })
            .await
            .map_err(|e| Error::Other(format!("unpacker panicked: {e}")))??;
        }
        Ok(())
    }

    async fn copy(&self, ctx: &CopyContext<'_>) -> Result<BackupStats> {
        let BackendConfig::Datastore(target_config) = &ctx.target.backend else {
            return Err(Error::config(format!(
                "cannot copy datastore snapshot into {} repository {:?}",
                ctx.target.backend.kind(),
                ctx.target.name
            )));
        };

        let (src_dir, _) = self.locate(ctx.snapshot).await?;
        let final_dir = target_config
            .root
            .join(&ctx.snapshot.package_name)
            .join(&ctx.snapshot.original_id);
        if fs::try_exists(&final_dir).await? {
            debug!(snapshot = %ctx.snapshot.short_id(), "Copy target already present");
            return Ok(BackupStats::default());
        }

        // Stage next to the final name, transfer everything, and only
        // then atomically rename. A partial transfer must never be
        // visible under the final snapshot name.
        let staging_dir = final_dir.with_file_name(format!(
            "{}{STAGING_SUFFIX}",
            ctx.snapshot.original_id
        ));
        if fs::try_exists(&staging_dir).await? {
            fs::remove_dir_all(&staging_dir).await?;
        }
        fs::create_dir_all(&staging_dir).await?;

        let mut entries = Vec::new();
        let mut reader = fs::read_dir(&src_dir).await?;
        while let Some(entry) = reader.next_entry().await? {
            if entry.file_type().await?.is_file() {
                entries.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        entries.sort();

        let total = entries.len() as u64;
        let mut bytes = 0;
        for (index, entry) in entries.iter().enumerate() {
            ctx.token.check()?;
            (ctx.progress)(&Progress::both(
                ProgressStep::counted("Transferring", index as u64, total),
                ProgressStep::message(entry),
            ));
            let src = src_dir.join(entry);
            let dst = staging_dir.join(entry);
            // Entries go through a scratch file so the transfer shape
            // is the same for local and remote targets.
            bytes += ctx
                .leases
                .with_scratch("datastore-copy", |scratch| async move {
                    let staged = scratch.join(entry);
                    fs::copy(&src, &staged).await?;
                    Ok(fs::copy(&staged, &dst).await?)
                })
                .await?;
        }

        fs::rename(&staging_dir, &final_dir).await?;
        info!(
            repository = %self.name,
            target = %ctx.target.name,
            snapshot = %ctx.snapshot.short_id(),
            bytes,
            "Copied datastore snapshot"
        );
        Ok(BackupStats { bytes })
    }

    async fn prune(&self, snapshot: &Snapshot) -> Result<()> {
        let (dir, _) = self.locate(snapshot).await?;
        fs::remove_dir_all(&dir).await?;
        info!(repository = %self.name, snapshot = %snapshot.short_id(), "Pruned datastore snapshot");
        Ok(())
    }
}

struct PackPlan {
    name: Option<String>,
    files: Vec<MatchedFile>,
}

/// Partitions matched files into the default catch-all pack plus named
/// packs, applying each spec's ordered include/exclude rules. A spec
/// marked `one_file_per_entry` spawns one child pack per top-level
/// entry it matched.
fn plan_packs(files: &[MatchedFile], specs: &[PackSpec]) -> Vec<PackPlan> {
    let mut default_pack = Vec::new();
    let mut per_spec: Vec<Vec<MatchedFile>> = specs.iter().map(|_| Vec::new()).collect();

    for file in files {
        let key = path_pattern_key(&file.relative);
        let claimed = specs.iter().position(|spec| {
            let included = spec.include.is_empty() || glob_match_any(&spec.include, &key);
            included && !glob_match_any(&spec.exclude, &key)
        });
        match claimed {
            Some(index) => per_spec[index].push(file.clone()),
            None => default_pack.push(file.clone()),
        }
    }

    let mut plans = Vec::new();
    if !default_pack.is_empty() {
        plans.push(PackPlan {
            name: None,
            files: default_pack,
        });
    }
    for (spec, files) in specs.iter().zip(per_spec) {
        if files.is_empty() {
            continue;
        }
        if spec.one_file_per_entry {
            let mut children: BTreeMap<String, Vec<MatchedFile>> = BTreeMap::new();
            for file in files {
                let entry = file
                    .relative
                    .components()
                    .next()
                    .map(|c| c.as_os_str().to_string_lossy().to_string())
                    .unwrap_or_default();
                children.entry(entry).or_default().push(file);
            }
            for (entry, files) in children {
                let name = match &spec.name {
                    Some(name) => format!("{name}-{}", sanitize_pack_name(&entry)),
                    None => sanitize_pack_name(&entry),
                };
                plans.push(PackPlan {
                    name: Some(name),
                    files,
                });
            }
        } else {
            plans.push(PackPlan {
                name: spec.name.clone().map(|n| sanitize_pack_name(&n)),
                files,
            });
        }
    }
    plans
}

fn sanitize_pack_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

fn pack_file_name(index: usize, name: Option<&str>, compress: bool) -> String {
    let suffix = if compress { ".tar.gz" } else { ".tar" };
    match name {
        Some(name) => format!("pack-{index}-{name}{suffix}"),
        None => format!("pack-{index}{suffix}"),
    }
}

fn write_pack(
    src_root: &Path,
    members: &[PathBuf],
    dest: &Path,
    compress: bool,
    token: &packhaul_core::CancelToken,
) -> Result<PackStat> {
    let file = std::fs::File::create(dest)?;
    if compress {
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        for member in members {
            token.check()?;
            builder.append_path_with_name(src_root.join(member), member)?;
        }
        builder.into_inner()?.finish()?;
    } else {
        let mut builder = tar::Builder::new(file);
        for member in members {
            token.check()?;
            builder.append_path_with_name(src_root.join(member), member)?;
        }
        builder.into_inner()?;
    }
    let size = std::fs::metadata(dest)?.len();
    Ok(PackStat {
        files: members.len() as u64,
        size,
        checksum: hash_file(dest)?,
    })
}

fn hash_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}

fn unpack(pack_path: &Path, target: &Path) -> Result<()> {
    let file = std::fs::File::open(pack_path)?;
    if pack_path.extension().is_some_and(|e| e == "gz") {
        tar::Archive::new(GzDecoder::new(file)).unpack(target)?;
    } else {
        tar::Archive::new(file).unpack(target)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use packhaul_core::config::{EnabledActions, RepositoryDescriptor};
    use packhaul_core::progress::noop_progress;
    use packhaul_core::{CancelToken, LeaseCollector, PreSnapshot, ScratchSession};
    use std::sync::Arc;

    fn package(dir: &Path) -> packhaul_core::PackageDescriptor {
        packhaul_core::PackageDescriptor {
            name: "web".to_string(),
            path: dir.to_path_buf(),
            include: Vec::new(),
            exclude: Vec::new(),
            repository_names: Vec::new(),
            prune_policy: None,
            packs: Vec::new(),
            hook: None,
        }
    }

    fn matched(paths: &[&str]) -> Vec<MatchedFile> {
        paths
            .iter()
            .map(|p| MatchedFile {
                relative: PathBuf::from(p),
                size: 1,
            })
            .collect()
    }

    #[test]
    fn default_pack_catches_unclaimed_files() {
        let files = matched(&["a.txt", "db/dump.sql"]);
        let specs = vec![PackSpec {
            name: Some("db".to_string()),
            include: vec!["db/*".to_string()],
            exclude: Vec::new(),
            one_file_per_entry: false,
        }];
        let plans = plan_packs(&files, &specs);
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].name, None);
        assert_eq!(plans[0].files.len(), 1);
        assert_eq!(plans[1].name.as_deref(), Some("db"));
    }

    #[test]
    fn one_file_per_entry_spawns_child_packs() {
        let files = matched(&[
            "alpha/index.html",
            "alpha/style.css",
            "beta/index.html",
        ]);
        let specs = vec![PackSpec {
            name: Some("sites".to_string()),
            include: Vec::new(),
            exclude: Vec::new(),
            one_file_per_entry: true,
        }];
        let plans = plan_packs(&files, &specs);
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].name.as_deref(), Some("sites-alpha"));
        assert_eq!(plans[0].files.len(), 2);
        assert_eq!(plans[1].name.as_deref(), Some("sites-beta"));
        assert_eq!(plans[1].files.len(), 1);
    }

    #[test]
    fn pack_file_names_follow_layout() {
        assert_eq!(pack_file_name(0, None, false), "pack-0.tar");
        assert_eq!(pack_file_name(2, Some("db"), true), "pack-2-db.tar.gz");
    }

    fn descriptor(name: &str, root: &Path, compress: bool) -> RepositoryDescriptor {
        RepositoryDescriptor {
            name: name.to_string(),
            mirror_repo_names: Vec::new(),
            enabled_actions: EnabledActions::default(),
            backend: BackendConfig::Datastore(DatastoreConfig {
                root: root.to_path_buf(),
                compress,
            }),
        }
    }

    async fn run_backup(repo: &DatastoreRepository, source: &Path) -> Snapshot {
        let session = Arc::new(ScratchSession::create().unwrap());
        let leases = LeaseCollector::new(session);
        let pre = PreSnapshot::mint();
        let package = package(source);
        let snapshot = Snapshot::from_pre(&pre, "web", None, vec!["nightly".to_string()]);
        let token = CancelToken::new();
        let progress = noop_progress();
        let ctx = BackupContext {
            package: &package,
            snapshot: &snapshot,
            path: source,
            progress: &progress,
            token: &token,
            leases: &leases,
        };
        let stats = repo.backup(&ctx).await.unwrap();
        assert!(stats.bytes > 0);
        snapshot
    }

    #[tokio::test]
    async fn backup_fetch_restore_round() {
        let source = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(source.path().join("sub")).unwrap();
        std::fs::write(source.path().join("a.txt"), b"alpha").unwrap();
        std::fs::write(source.path().join("sub/b.txt"), b"beta").unwrap();

        let store = tempfile::tempdir().unwrap();
        let repo = DatastoreRepository::new(
            "r1".to_string(),
            DatastoreConfig {
                root: store.path().to_path_buf(),
                compress: false,
            },
        );

        let committed = run_backup(&repo, source.path()).await;

        let fetched = repo
            .fetch_snapshots(&SnapshotFilter::default())
            .await
            .unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].id, committed.id);
        assert_eq!(fetched[0].package_name, "web");
        assert_eq!(fetched[0].tags, vec!["nightly"]);
        assert!(fetched[0].size > 0);

        // Prefix lookup.
        let by_prefix = repo
            .fetch_snapshots(&SnapshotFilter {
                ids: vec![committed.short_id()],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_prefix.len(), 1);

        let target = tempfile::tempdir().unwrap();
        let session = Arc::new(ScratchSession::create().unwrap());
        let leases = LeaseCollector::new(session);
        let token = CancelToken::new();
        let progress = noop_progress();
        let package = package(source.path());
        let ctx = RestoreContext {
            package: &package,
            snapshot: &fetched[0],
            target: target.path(),
            progress: &progress,
            token: &token,
            leases: &leases,
        };
        repo.restore(&ctx).await.unwrap();
        assert_eq!(
            std::fs::read(target.path().join("a.txt")).unwrap(),
            b"alpha"
        );
        assert_eq!(
            std::fs::read(target.path().join("sub/b.txt")).unwrap(),
            b"beta"
        );
    }

    #[tokio::test]
    async fn meta_file_uses_the_documented_key_names() {
        let source = tempfile::tempdir().unwrap();
        std::fs::write(source.path().join("a.txt"), b"alpha").unwrap();
        let store = tempfile::tempdir().unwrap();
        let repo = DatastoreRepository::new(
            "r1".to_string(),
            DatastoreConfig {
                root: store.path().to_path_buf(),
                compress: false,
            },
        );
        run_backup(&repo, source.path()).await;
        let fetched = repo
            .fetch_snapshots(&SnapshotFilter::default())
            .await
            .unwrap();

        let raw = std::fs::read_to_string(
            store
                .path()
                .join("web")
                .join(&fetched[0].original_id)
                .join(META_FILE),
        )
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(value.get("tarStats").is_some());
        assert!(value.get("tar_stats").is_none());
        assert!(value["tarStats"]["pack-0.tar"]["checksum"].is_string());
    }

    #[tokio::test]
    async fn restore_detects_checksum_mismatch() {
        let source = tempfile::tempdir().unwrap();
        std::fs::write(source.path().join("a.txt"), b"alpha").unwrap();
        let store = tempfile::tempdir().unwrap();
        let repo = DatastoreRepository::new(
            "r1".to_string(),
            DatastoreConfig {
                root: store.path().to_path_buf(),
                compress: false,
            },
        );
        run_backup(&repo, source.path()).await;

        let fetched = repo
            .fetch_snapshots(&SnapshotFilter::default())
            .await
            .unwrap();
        let dir = store.path().join("web").join(&fetched[0].original_id);
        std::fs::write(dir.join("pack-0.tar"), b"corrupted").unwrap();

        let target = tempfile::tempdir().unwrap();
        let session = Arc::new(ScratchSession::create().unwrap());
        let leases = LeaseCollector::new(session);
        let token = CancelToken::new();
        let progress = noop_progress();
        let package = package(source.path());
        let ctx = RestoreContext {
            package: &package,
            snapshot: &fetched[0],
            target: target.path(),
            progress: &progress,
            token: &token,
            leases: &leases,
        };
        assert!(matches!(
            repo.restore(&ctx).await,
            Err(Error::Integrity(_))
        ));
    }

    #[tokio::test]
    async fn copy_is_atomic_and_idempotent() {
        let source = tempfile::tempdir().unwrap();
        std::fs::write(source.path().join("a.txt"), b"alpha").unwrap();
        let store_a = tempfile::tempdir().unwrap();
        let store_b = tempfile::tempdir().unwrap();
        let repo = DatastoreRepository::new(
            "r1".to_string(),
            DatastoreConfig {
                root: store_a.path().to_path_buf(),
                compress: false,
            },
        );
        run_backup(&repo, source.path()).await;
        let fetched = repo
            .fetch_snapshots(&SnapshotFilter::default())
            .await
            .unwrap();

        let session = Arc::new(ScratchSession::create().unwrap());
        let leases = LeaseCollector::new(session);
        let token = CancelToken::new();
        let progress = noop_progress();
        let package = package(source.path());
        let target = descriptor("r2", store_b.path(), false);
        let ctx = CopyContext {
            package: &package,
            snapshot: &fetched[0],
            target: &target,
            progress: &progress,
            token: &token,
            leases: &leases,
        };
        let stats = repo.copy(&ctx).await.unwrap();
        assert!(stats.bytes > 0);

        let final_dir = store_b
            .path()
            .join("web")
            .join(&fetched[0].original_id);
        assert!(final_dir.join(META_FILE).exists());
        assert!(!final_dir
            .with_file_name(format!("{}{STAGING_SUFFIX}", fetched[0].original_id))
            .exists());

        // Re-running the copy is a no-op skip.
        let again = repo.copy(&ctx).await.unwrap();
        assert_eq!(again.bytes, 0);

        let mirrored = DatastoreRepository::new(
            "r2".to_string(),
            DatastoreConfig {
                root: store_b.path().to_path_buf(),
                compress: false,
            },
        );
        let fetched_b = mirrored
            .fetch_snapshots(&SnapshotFilter::default())
            .await
            .unwrap();
        assert_eq!(fetched_b.len(), 1);
        assert_eq!(fetched_b[0].id, fetched[0].id);
    }

    #[tokio::test]
    async fn prune_removes_the_snapshot_directory() {
        let source = tempfile::tempdir().unwrap();
        std::fs::write(source.path().join("a.txt"), b"alpha").unwrap();
        let store = tempfile::tempdir().unwrap();
        let repo = DatastoreRepository::new(
            "r1".to_string(),
            DatastoreConfig {
                root: store.path().to_path_buf(),
                compress: false,
            },
        );
        run_backup(&repo, source.path()).await;
        let fetched = repo
            .fetch_snapshots(&SnapshotFilter::default())
            .await
            .unwrap();
        repo.prune(&fetched[0]).await.unwrap();
        assert!(repo
            .fetch_snapshots(&SnapshotFilter::default())
            .await
            .unwrap()
            .is_empty());
        assert!(matches!(
            repo.prune(&fetched[0]).await,
            Err(Error::SnapshotNotFound { .. })
        ));
    }
}
