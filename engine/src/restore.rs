use crate::hook::{CommandHook, HookContext, PackageHook};
use crate::provider::WorkflowContext;
use crate::runner::{RunSummary, TaskRunner};
use crate::task::{Task, TaskId, TaskOutput};
use packhaul_backends::RestoreContext;
use packhaul_core::config::RepositoryDescriptor;
use packhaul_core::filter::SnapshotFilter;
use packhaul_core::{Error, LeaseCollector, Result, Snapshot};
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    pub ids: Vec<String>,
    pub package_patterns: Vec<String>,
    pub tags: Vec<String>,
    pub repository_names: Vec<String>,
    /// Override destination; defaults to each package's configured
    /// path. With more than one matched package, a per-package
    /// subdirectory is created below it.
    pub target: Option<PathBuf>,
}

/// Restores the newest matching snapshot of every selected package,
/// taking the first match per package in repository declaration order.
pub async fn restore(ctx: &WorkflowContext, options: RestoreOptions) -> Result<RunSummary> {
    let filter = SnapshotFilter {
        ids: options.ids.clone(),
        packages: options.package_patterns.clone(),
        tags: options.tags.clone(),
        ..Default::default()
    };

    let candidates = find_candidates(ctx, &options, &filter).await?;
    if candidates.is_empty() {
        return Err(Error::SnapshotNotFound {
            id: if options.ids.is_empty() {
                "<filter matched nothing>".to_string()
            } else {
                options.ids.join(", ")
            },
        });
    }

    let run_leases = LeaseCollector::new(ctx.session.clone());
    let runner = TaskRunner::new().with_progress(ctx.progress.clone());
    let multiple = candidates.len() > 1;

    let mut tasks = Vec::new();
    for (descriptor, snapshot) in candidates {
        let task_ctx = ctx.clone();
        let leases = run_leases.child();
        let target = options.target.clone();
        let id = TaskId::indexed(
            "restore",
            [snapshot.package_name.clone(), descriptor.name.clone()],
        );
        tasks.push(
            Task::new(id, move |_| async move {
                let bytes =
                    restore_one(&task_ctx, &descriptor, &snapshot, target, multiple, &leases)
                        .await?;
                Ok(TaskOutput::with_data(json!({ "bytes": bytes })))
            })
            .non_fatal(),
        );
    }

    let summary = runner.run(tasks).await;
    run_leases.release_all().await;
    summary
}

/// First matching snapshot per package, scanning repositories in
/// declaration order.
async fn find_candidates(
    ctx: &WorkflowContext,
    options: &RestoreOptions,
    filter: &SnapshotFilter,
) -> Result<Vec<(RepositoryDescriptor, Snapshot)>> {
    let mut per_package: HashMap<String, usize> = HashMap::new();
    let mut candidates: Vec<(RepositoryDescriptor, Snapshot)> = Vec::new();
    for descriptor in &ctx.config.repositories {
        if !descriptor.enabled_actions.restore {
            continue;
        }
        if !options.repository_names.is_empty()
            && !options.repository_names.contains(&descriptor.name)
        {
            continue;
        }
        ctx.token.check()?;
        let repository = ctx.provider.repository(descriptor)?;
        for snapshot in repository.fetch_snapshots(filter).await? {
            if per_package.contains_key(&snapshot.package_name) {
                continue;
            }
            per_package.insert(snapshot.package_name.clone(), candidates.len());
            candidates.push((descriptor.clone(), snapshot));
        }
    }
    Ok(candidates)
}

async fn restore_one(
    ctx: &WorkflowContext,
    descriptor: &RepositoryDescriptor,
    snapshot: &Snapshot,
    target: Option<PathBuf>,
    multiple: bool,
    leases: &Arc<LeaseCollector>,
) -> Result<u64> {
    let package = ctx.config.package(&snapshot.package_name)?.clone();
    let hook = package.hook.clone().map(CommandHook::new);
    let hook_ctx = HookContext {
        package: &package,
        progress: &ctx.progress,
        token: &ctx.token,
        leases,
    };

    let mut destination = match target {
        Some(base) if multiple => base.join(&package.name),
        Some(base) => base,
        None => package.path.clone(),
    };
    if let Some(hook) = &hook {
        if let Some(path) = hook.prepare_restore(&hook_ctx).await?.snapshot_path {
            destination = path;
        }
    }

    ensure_empty(&destination)?;
    info!(
        snapshot = %snapshot.summary(),
        repository = %descriptor.name,
        target = %destination.display(),
        "Restoring snapshot"
    );

    let repository = ctx.provider.repository(descriptor)?;
    repository
        .restore(&RestoreContext {
            package: &package,
            snapshot,
            target: &destination,
            progress: &ctx.progress,
            token: &ctx.token,
            leases,
        })
        .await?;

    if let Some(hook) = &hook {
        hook.restore(&hook_ctx, &destination).await?;
    }
    Ok(snapshot.size)
}

/// A restore never merges into existing data.
fn ensure_empty(path: &Path) -> Result<()> {
    match std::fs::read_dir(path) {
        Ok(mut entries) => {
            if entries.next().is_some() {
                return Err(Error::integrity(format!(
                    "restore target {} is not empty",
                    path.display()
                )));
            }
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            std::fs::create_dir_all(path)?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{descriptor, package_for, MockProvider};
    use chrono::Utc;
    use packhaul_core::{Config, ScratchSession};

    fn snapshot(id: &str, package: &str) -> Snapshot {
        Snapshot {
            id: id.to_string(),
            original_id: id.to_string(),
            date: Utc::now(),
            package_name: package.to_string(),
            package_task_name: None,
            tags: Vec::new(),
            hostname: "host".to_string(),
            size: 42,
        }
    }

    fn context_with(config: Config) -> (WorkflowContext, Arc<MockProvider>) {
        let provider = MockProvider::for_config(&config);
        let session = Arc::new(ScratchSession::create().unwrap());
        let ctx = WorkflowContext::new(config, session).with_provider(provider.clone());
        (ctx, provider)
    }

    #[tokio::test]
    async fn first_repository_in_declaration_order_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("out");
        let config = Config {
            repositories: vec![descriptor("r1"), descriptor("r2")],
            packages: vec![package_for("web", tmp.path(), &[])],
            ..Default::default()
        };
        let (ctx, provider) = context_with(config);
        provider.repo("r1").seed(snapshot("aaaaaaaa00000000", "web"));
        provider.repo("r2").seed(snapshot("aaaaaaaa00000000", "web"));

        let summary = restore(
            &ctx,
            RestoreOptions {
                target: Some(target.clone()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(summary.is_clean());
        assert_eq!(provider.repo("r1").restore_calls(), 1);
        assert_eq!(provider.repo("r2").restore_calls(), 0);
        assert!(target.join("restored.txt").exists());
        ctx.session.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn non_empty_target_is_an_integrity_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("out");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("existing.txt"), "data").unwrap();

        let config = Config {
            repositories: vec![descriptor("r1")],
            packages: vec![package_for("web", tmp.path(), &[])],
            ..Default::default()
        };
        let (ctx, provider) = context_with(config);
        provider.repo("r1").seed(snapshot("aaaaaaaa00000000", "web"));

        let summary = restore(
            &ctx,
            RestoreOptions {
                target: Some(target),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(summary.error_count, 1);
        assert_eq!(provider.repo("r1").restore_calls(), 0);
        ctx.session.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn id_prefix_selects_the_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("out");
        let config = Config {
            repositories: vec![descriptor("r1")],
            packages: vec![package_for("web", tmp.path(), &[])],
            ..Default::default()
        };
        let (ctx, provider) = context_with(config);
        provider.repo("r1").seed(snapshot("aaaaaaaa00000000", "web"));
        provider.repo("r1").seed(snapshot("bbbbbbbb00000000", "web"));

        let summary = restore(
            &ctx,
            RestoreOptions {
                ids: vec!["bbbbbbbb".to_string()],
                target: Some(target.clone()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(summary.is_clean());
        assert_eq!(
            std::fs::read_to_string(target.join("restored.txt")).unwrap(),
            "bbbbbbbb00000000"
        );
        ctx.session.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn no_match_is_a_not_found_error() {
        let config = Config {
            repositories: vec![descriptor("r1")],
            ..Default::default()
        };
        let (ctx, _) = context_with(config);
        let result = restore(
            &ctx,
            RestoreOptions {
                ids: vec!["deadbeef".to_string()],
                ..Default::default()
            },
        )
        .await;
        assert!(matches!(result, Err(Error::SnapshotNotFound { .. })));
        ctx.session.teardown().await.unwrap();
    }
}
