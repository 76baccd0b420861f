use crate::provider::WorkflowContext;
use packhaul_core::filter::SnapshotFilter;
use packhaul_core::{Result, Snapshot};
use tracing::warn;

/// One listed snapshot together with the repository holding it.
#[derive(Debug, Clone)]
pub struct ListedSnapshot {
    pub repository_name: String,
    pub snapshot: Snapshot,
}

#[derive(Debug, Clone, Default)]
pub struct SnapshotsOptions {
    pub ids: Vec<String>,
    pub package_patterns: Vec<String>,
    pub task_names: Vec<String>,
    pub tags: Vec<String>,
    pub repository_names: Vec<String>,
    /// Keep only the newest N per package, after the other criteria.
    pub last: Option<usize>,
}

/// Lists snapshots across every enabled repository, newest first.
/// Unreachable repositories are logged and skipped so one dead store
/// does not hide the others.
pub async fn snapshots(
    ctx: &WorkflowContext,
    options: SnapshotsOptions,
) -> Result<Vec<ListedSnapshot>> {
    let filter = SnapshotFilter {
        ids: options.ids.clone(),
        packages: options.package_patterns.clone(),
        task_names: options.task_names.clone(),
        tags: options.tags.clone(),
        last: options.last,
    };

    let mut listed = Vec::new();
    for descriptor in &ctx.config.repositories {
        if !descriptor.enabled_actions.snapshots {
            continue;
        }
        if !options.repository_names.is_empty()
            && !options.repository_names.contains(&descriptor.name)
        {
            continue;
        }
        ctx.token.check()?;
        let repository = ctx.provider.repository(descriptor)?;
        match repository.fetch_snapshots(&filter).await {
            Ok(snapshots) => listed.extend(snapshots.into_iter().map(|snapshot| ListedSnapshot {
                repository_name: descriptor.name.clone(),
                snapshot,
            })),
            Err(err) => {
                warn!(repository = %descriptor.name, error = %err, "Failed to list snapshots")
            }
        }
    }
    listed.sort_by(|a, b| b.snapshot.date.cmp(&a.snapshot.date));
    Ok(listed)
}
