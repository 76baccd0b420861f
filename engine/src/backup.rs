use crate::hook::{CommandHook, HookContext, PackageHook};
use crate::provider::WorkflowContext;
use crate::prune::{self, PruneOptions};
use crate::runner::{RunSummary, TaskRunner};
use crate::task::{Task, TaskId, TaskOutput};
use packhaul_backends::{BackupContext, CopyContext};
use packhaul_core::config::RepositoryDescriptor;
use packhaul_core::filter::SnapshotFilter;
use packhaul_core::{Error, LeaseCollector, PreSnapshot, Result, Snapshot};
use serde_json::json;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct BackupOptions {
    /// Package name globs; empty selects every configured package.
    pub package_patterns: Vec<String>,
    /// Repository names to involve; empty selects per-package defaults.
    pub repository_names: Vec<String>,
    pub tags: Vec<String>,
    /// Run retention pruning after the backups.
    pub prune: bool,
}

/// Backs up every selected package into its repositories, then copies
/// fresh snapshots to configured mirrors. One snapshot identity is
/// minted for the whole run.
pub async fn backup(ctx: &WorkflowContext, options: BackupOptions) -> Result<RunSummary> {
    let pre = PreSnapshot::mint();
    info!(snapshot = %pre.short_id(), "Starting backup run");

    let packages: Vec<_> = ctx
        .config
        .packages_matching(&options.package_patterns)
        .into_iter()
        .cloned()
        .collect();
    if packages.is_empty() {
        return Err(Error::config("no package matches the backup selection"));
    }

    preflight_disk_space(ctx, &packages, &options).await?;

    let run_leases = LeaseCollector::new(ctx.session.clone());
    let runner = TaskRunner::new().with_progress(ctx.progress.clone());

    let mut tasks = Vec::new();
    for package in packages {
        let task_ctx = ctx.clone();
        let task_options = options.clone();
        let task_pre = pre.clone();
        let package_leases = run_leases.child();
        let package_name = package.name.clone();
        tasks.push(
            Task::new(TaskId::indexed("package", [package_name]), move |_| async move {
                package_tasks(task_ctx, task_options, task_pre, package, package_leases).await
            })
            .non_fatal(),
        );
    }

    let summary = runner.run(tasks).await;
    run_leases.release_all().await;
    let summary = summary?;
    info!(
        snapshot = %pre.short_id(),
        errors = summary.error_count,
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "Backup run finished"
    );
    Ok(summary)
}

/// Builds the per-package subtree: one backup task per source
/// repository, then one copy task per (source, mirror) pair looking up
/// its upstream result, then optional pruning and the lease cleanup.
async fn package_tasks(
    ctx: WorkflowContext,
    options: BackupOptions,
    pre: PreSnapshot,
    package: packhaul_core::PackageDescriptor,
    leases: Arc<LeaseCollector>,
) -> Result<TaskOutput> {
    let hook = package.hook.clone().map(CommandHook::new);
    let mut working_path = package.path.clone();
    if let Some(hook) = &hook {
        let hook_ctx = HookContext {
            package: &package,
            progress: &ctx.progress,
            token: &ctx.token,
            leases: &leases,
        };
        if let Some(path) = hook.backup(&hook_ctx).await?.snapshot_path {
            working_path = path;
        }
    }

    let snapshot = Snapshot::from_pre(
        &pre,
        &package.name,
        hook.as_ref().map(|h| h.task_name().to_string()),
        options.tags.clone(),
    );

    let selected = selected_backup_repositories(&ctx, &package, &options)?;
    let sources = backup_sources(&selected);
    if sources.is_empty() {
        return Err(Error::config(format!(
            "no repository accepts backups for package {:?}",
            package.name
        )));
    }

    let mut children = Vec::new();
    for (source, _) in &sources {
        children.push(backup_task(
            &ctx,
            &package,
            &snapshot,
            &working_path,
            &leases,
            source,
        ));
    }
    // Mirror copies are declared after every backup so they can look up
    // their upstream result by id.
    for (source, mirrors) in &sources {
        for mirror in mirrors {
            children.push(mirror_task(&ctx, &package, &snapshot, &leases, source, mirror));
        }
    }

    if options.prune {
        let prune_ctx = ctx.clone();
        let prune_package = package.name.clone();
        children.push(
            Task::new(TaskId::indexed("prune", [package.name.clone()]), move |_| async move {
                let options = PruneOptions {
                    package_patterns: vec![prune_package],
                    repository_names: Vec::new(),
                    ids: Vec::new(),
                    keep: None,
                    group_by: Vec::new(),
                    dry_run: false,
                };
                let outcome = prune::prune_repositories(&prune_ctx, &options).await?;
                Ok(TaskOutput::with_data(json!({
                    "total": outcome.total,
                    "pruned": outcome.pruned,
                })))
            })
            .non_fatal(),
        );
    }

    let cleanup_leases = leases.clone();
    children.push(
        Task::new(TaskId::indexed("cleanup", [package.name.clone()]), move |_| async move {
            cleanup_leases.release_all().await;
            Ok(TaskOutput::done())
        })
        .non_fatal(),
    );

    Ok(TaskOutput::children(children))
}

fn backup_task(
    ctx: &WorkflowContext,
    package: &packhaul_core::PackageDescriptor,
    snapshot: &Snapshot,
    working_path: &PathBuf,
    leases: &Arc<LeaseCollector>,
    source: &RepositoryDescriptor,
) -> Task {
    let ctx = ctx.clone();
    let package = package.clone();
    let snapshot = snapshot.clone();
    let path = working_path.clone();
    let leases = leases.clone();
    let source = source.clone();
    Task::new(
        TaskId::indexed("backup", [package.name.clone(), source.name.clone()]),
        move |_| async move {
            let repository = ctx.provider.repository(&source)?;
            let stats = repository
                .backup(&BackupContext {
                    package: &package,
                    snapshot: &snapshot,
                    path: &path,
                    progress: &ctx.progress,
                    token: &ctx.token,
                    leases: &leases,
                })
                .await?;
            Ok(TaskOutput::with_data(json!({ "bytes": stats.bytes })))
        },
    )
    .non_fatal()
}

fn mirror_task(
    ctx: &WorkflowContext,
    package: &packhaul_core::PackageDescriptor,
    snapshot: &Snapshot,
    leases: &Arc<LeaseCollector>,
    source: &RepositoryDescriptor,
    mirror: &RepositoryDescriptor,
) -> Task {
    let ctx = ctx.clone();
    let package = package.clone();
    let snapshot = snapshot.clone();
    let leases = leases.clone();
    let source = source.clone();
    let mirror = mirror.clone();
    let upstream = TaskId::indexed("backup", [package.name.clone(), source.name.clone()]);
    Task::new(
        TaskId::indexed(
            "mirror",
            [package.name.clone(), source.name.clone(), mirror.name.clone()],
        ),
        move |book| async move {
            if book.failed_or_missing(&upstream) {
                return Err(Error::Other(format!(
                    "backup into {:?} failed, not mirroring to {:?}",
                    source.name, mirror.name
                )));
            }
            let repository = ctx.provider.repository(&source)?;
            // The in-run snapshot only carries the invocation id; the
            // backend assigns its native handle during backup, so the
            // committed form has to be fetched back before copying.
            let committed = repository
                .fetch_snapshots(&SnapshotFilter {
                    ids: vec![snapshot.id.clone()],
                    packages: vec![package.name.clone()],
                    ..Default::default()
                })
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| Error::SnapshotNotFound {
                    id: snapshot.id.clone(),
                })?;
            let stats = repository
                .copy(&CopyContext {
                    package: &package,
                    snapshot: &committed,
                    target: &mirror,
                    progress: &ctx.progress,
                    token: &ctx.token,
                    leases: &leases,
                })
                .await?;
            Ok(TaskOutput::with_data(json!({ "bytes": stats.bytes })))
        },
    )
    .non_fatal()
}

fn selected_backup_repositories(
    ctx: &WorkflowContext,
    package: &packhaul_core::PackageDescriptor,
    options: &BackupOptions,
) -> Result<Vec<RepositoryDescriptor>> {
    Ok(package
        .selected_repositories(&ctx.config)?
        .into_iter()
        .filter(|r| {
            r.enabled_actions.backup
                && (options.repository_names.is_empty()
                    || options.repository_names.contains(&r.name))
        })
        .cloned()
        .collect())
}

/// Splits the selected repositories into backup sources and their
/// mirror targets. A repository claimed as a mirror of an earlier
/// source is never backed up directly; on a mirror cycle the first
/// selected repository wins as the source.
fn backup_sources(
    selected: &[RepositoryDescriptor],
) -> Vec<(RepositoryDescriptor, Vec<RepositoryDescriptor>)> {
    let selected_names: HashSet<&str> = selected.iter().map(|r| r.name.as_str()).collect();
    let mut claimed: HashSet<String> = HashSet::new();
    let mut source_names: HashSet<String> = HashSet::new();
    let mut sources = Vec::new();

    for repo in selected {
        if claimed.contains(&repo.name) {
            continue;
        }
        source_names.insert(repo.name.clone());
        let mirrors: Vec<RepositoryDescriptor> = repo
            .mirror_repo_names
            .iter()
            .filter(|m| selected_names.contains(m.as_str()) && !source_names.contains(*m))
            .filter_map(|m| selected.iter().find(|r| &r.name == m))
            .cloned()
            .collect();
        for mirror in &mirrors {
            claimed.insert(mirror.name.clone());
        }
        sources.push((repo.clone(), mirrors));
    }
    sources
}

async fn preflight_disk_space(
    ctx: &WorkflowContext,
    packages: &[packhaul_core::PackageDescriptor],
    options: &BackupOptions,
) -> Result<()> {
    let Some(min_free) = &ctx.config.min_free_disk_space else {
        return Ok(());
    };
    let mut seen = HashSet::new();
    for package in packages {
        for repo in selected_backup_repositories(ctx, package, options)? {
            if seen.insert(repo.name.clone()) {
                ctx.provider
                    .repository(&repo)?
                    .ensure_free_disk_space(min_free)
                    .await?;
            }
        }
    }
    Ok(())
}
