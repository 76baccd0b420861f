use crate::provider::WorkflowContext;
use crate::runner::{RunSummary, TaskRunner};
use crate::task::{Task, TaskId, TaskOutput};
use packhaul_backends::{BackupContext, CopyContext, RestoreContext};
use packhaul_core::config::{BackendKind, RepositoryDescriptor};
use packhaul_core::filter::SnapshotFilter;
use packhaul_core::{Error, LeaseCollector, Result, Snapshot};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
pub struct CopyOptions {
    /// Repository to copy from.
    pub source: String,
    pub ids: Vec<String>,
    pub package_patterns: Vec<String>,
    pub tags: Vec<String>,
    /// Explicit targets; defaults to the source's configured mirrors,
    /// then to every same-kind repository.
    pub repository_names: Vec<String>,
}

/// Memoizes cross-type restores per (target kind, snapshot id,
/// package), so several foreign mirrors of one kind share a single
/// materialization.
type RestoreMemo = Arc<Mutex<HashMap<(BackendKind, String, String), PathBuf>>>;

/// Transfers snapshots from one repository into its mirrors. Same-kind
/// targets use the backend's native copy; foreign kinds restore to
/// scratch and back that up into the target. Snapshots the target
/// already holds are skipped, which makes reruns safe.
pub async fn copy(ctx: &WorkflowContext, options: CopyOptions) -> Result<RunSummary> {
    let source = ctx.config.repository(&options.source)?.clone();
    let targets = target_repositories(ctx, &source, &options)?;
    if targets.is_empty() {
        return Err(Error::config(format!(
            "no copy target for repository {:?}",
            source.name
        )));
    }

    let filter = SnapshotFilter {
        ids: options.ids.clone(),
        packages: options.package_patterns.clone(),
        tags: options.tags.clone(),
        ..Default::default()
    };
    let snapshots = ctx
        .provider
        .repository(&source)?
        .fetch_snapshots(&filter)
        .await?;
    info!(
        source = %source.name,
        snapshots = snapshots.len(),
        targets = targets.len(),
        "Starting copy run"
    );

    let run_leases = LeaseCollector::new(ctx.session.clone());
    let memo: RestoreMemo = Arc::new(Mutex::new(HashMap::new()));
    let runner = TaskRunner::new().with_progress(ctx.progress.clone());

    let mut tasks = Vec::new();
    for target in &targets {
        let existing = existing_snapshots(ctx, target).await?;
        for snapshot in &snapshots {
            let id = TaskId::indexed(
                "copy",
                [snapshot.short_id(), source.name.clone(), target.name.clone()],
            );
            if existing.contains(&(snapshot.id.clone(), snapshot.package_name.clone())) {
                debug!(
                    snapshot = %snapshot.short_id(),
                    target = %target.name,
                    "Target already holds the snapshot"
                );
                continue;
            }
            let task_ctx = ctx.clone();
            let task_source = source.clone();
            let task_target = target.clone();
            let task_snapshot = snapshot.clone();
            let task_memo = memo.clone();
            let task_leases = run_leases.clone();
            tasks.push(
                Task::new(id, move |_| async move {
                    let bytes = copy_one(
                        &task_ctx,
                        &task_source,
                        &task_target,
                        &task_snapshot,
                        &task_memo,
                        &task_leases,
                    )
                    .await?;
                    Ok(TaskOutput::with_data(json!({ "bytes": bytes })))
                })
                .non_fatal(),
            );
        }
    }

    let summary = runner.run(tasks).await;
    run_leases.release_all().await;
    summary
}

fn target_repositories(
    ctx: &WorkflowContext,
    source: &RepositoryDescriptor,
    options: &CopyOptions,
) -> Result<Vec<RepositoryDescriptor>> {
    if !options.repository_names.is_empty() {
        return options
            .repository_names
            .iter()
            .map(|name| ctx.config.repository(name).cloned())
            .collect();
    }
    if !source.mirror_repo_names.is_empty() {
        return source
            .mirror_repo_names
            .iter()
            .map(|name| ctx.config.repository(name).cloned())
            .collect();
    }
    Ok(ctx
        .config
        .repositories
        .iter()
        .filter(|r| r.name != source.name && r.backend.kind() == source.backend.kind())
        .cloned()
        .collect())
}

async fn existing_snapshots(
    ctx: &WorkflowContext,
    target: &RepositoryDescriptor,
) -> Result<HashSet<(String, String)>> {
    let snapshots = ctx
        .provider
        .repository(target)?
        .fetch_snapshots(&SnapshotFilter::default())
        .await?;
    Ok(snapshots
        .into_iter()
        .map(|s| (s.id, s.package_name))
        .collect())
}

async fn copy_one(
    ctx: &WorkflowContext,
    source: &RepositoryDescriptor,
    target: &RepositoryDescriptor,
    snapshot: &Snapshot,
    memo: &RestoreMemo,
    leases: &Arc<LeaseCollector>,
) -> Result<u64> {
    let package = ctx.config.package(&snapshot.package_name)?.clone();
    let source_repo = ctx.provider.repository(source)?;

    if source.backend.kind() == target.backend.kind() {
        let stats = source_repo
            .copy(&CopyContext {
                package: &package,
                snapshot,
                target,
                progress: &ctx.progress,
                token: &ctx.token,
                leases,
            })
            .await?;
        return Ok(stats.bytes);
    }

    // Foreign target kind: materialize the snapshot once and back it
    // up into the target, reusing the materialization for every later
    // mirror of the same kind.
    let key = (
        target.backend.kind(),
        snapshot.id.clone(),
        snapshot.package_name.clone(),
    );
    let memoized = memo
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .get(&key)
        .cloned();
    let restored = match memoized {
        Some(path) => path,
        None => {
            let package_ref = &package;
            let (path, lease) = leases
                .acquire_scratch("copy-restore", |dir| async move {
                    source_repo
                        .restore(&RestoreContext {
                            package: package_ref,
                            snapshot,
                            target: &dir,
                            progress: &ctx.progress,
                            token: &ctx.token,
                            leases,
                        })
                        .await?;
                    Ok(dir)
                })
                .await?;
            leases.adopt(lease);
            memo.lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .insert(key, path.clone());
            path
        }
    };

    let target_repo = ctx.provider.repository(target)?;
    let stats = target_repo
        .backup(&BackupContext {
            package: &package,
            snapshot,
            path: &restored,
            progress: &ctx.progress,
            token: &ctx.token,
            leases,
        })
        .await?;
    Ok(stats.bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{descriptor, package_for, MockProvider};
    use chrono::Utc;
    use packhaul_core::config::{BackendConfig, GitConfig};
    use packhaul_core::{Config, ScratchSession};

    fn git_descriptor(name: &str) -> RepositoryDescriptor {
        let mut d = descriptor(name);
        d.backend = BackendConfig::Git(GitConfig {
            repo_url: format!("git@example.com:{name}.git"),
            branch_prefix: "packhaul".to_string(),
        });
        d
    }

    fn snapshot(id: &str, package: &str) -> Snapshot {
        Snapshot {
            id: id.to_string(),
            original_id: id.to_string(),
            date: Utc::now(),
            package_name: package.to_string(),
            package_task_name: None,
            tags: Vec::new(),
            hostname: "host".to_string(),
            size: 10,
        }
    }

    fn context_with(config: Config) -> (WorkflowContext, Arc<MockProvider>) {
        let provider = MockProvider::for_config(&config);
        let session = Arc::new(ScratchSession::create().unwrap());
        let ctx = WorkflowContext::new(config, session).with_provider(provider.clone());
        (ctx, provider)
    }

    #[tokio::test]
    async fn same_kind_targets_use_the_native_copy() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config {
            repositories: vec![descriptor("r1"), descriptor("r2"), descriptor("r3")],
            packages: vec![package_for("web", tmp.path(), &[])],
            ..Default::default()
        };
        let (ctx, provider) = context_with(config);
        provider.repo("r1").seed(snapshot("aaaaaaaa00000000", "web"));

        let summary = copy(
            &ctx,
            CopyOptions {
                source: "r1".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(summary.is_clean());
        let mut targets = provider.repo("r1").copy_targets();
        targets.sort();
        assert_eq!(targets, vec!["r2", "r3"]);
        assert_eq!(provider.repo("r1").restore_calls(), 0);
        ctx.session.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn cross_type_restore_is_memoized_per_target_kind() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config {
            repositories: vec![descriptor("r1"), git_descriptor("g1"), git_descriptor("g2")],
            packages: vec![package_for("web", tmp.path(), &[])],
            ..Default::default()
        };
        let (ctx, provider) = context_with(config);
        provider.repo("r1").seed(snapshot("aaaaaaaa00000000", "web"));

        let summary = copy(
            &ctx,
            CopyOptions {
                source: "r1".to_string(),
                repository_names: vec!["g1".to_string(), "g2".to_string()],
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(summary.is_clean());
        // One materialization serves both foreign mirrors.
        assert_eq!(provider.repo("r1").restore_calls(), 1);
        assert_eq!(provider.repo("g1").backup_calls(), 1);
        assert_eq!(provider.repo("g2").backup_calls(), 1);
        assert_eq!(provider.repo("r1").copy_targets().len(), 0);
        ctx.session.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn snapshots_already_present_in_the_target_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config {
            repositories: vec![descriptor("r1"), descriptor("r2")],
            packages: vec![package_for("web", tmp.path(), &[])],
            ..Default::default()
        };
        let (ctx, provider) = context_with(config);
        provider.repo("r1").seed(snapshot("aaaaaaaa00000000", "web"));
        provider.repo("r2").seed(snapshot("aaaaaaaa00000000", "web"));

        let summary = copy(
            &ctx,
            CopyOptions {
                source: "r1".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(summary.is_clean());
        assert!(provider.repo("r1").copy_targets().is_empty());
        ctx.session.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn unknown_source_repository_fails_fast() {
        let config = Config {
            repositories: vec![descriptor("r1")],
            ..Default::default()
        };
        let (ctx, _) = context_with(config);
        let result = copy(
            &ctx,
            CopyOptions {
                source: "nope".to_string(),
                ..Default::default()
            },
        )
        .await;
        assert!(matches!(result, Err(Error::RepositoryNotFound { .. })));
        ctx.session.teardown().await.unwrap();
    }
}
