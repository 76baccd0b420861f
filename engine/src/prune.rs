use crate::provider::WorkflowContext;
use packhaul_core::filter::SnapshotFilter;
use packhaul_core::retention::{evaluate, evaluate_with_resolver, GroupField};
use packhaul_core::{Error, Result, RetentionPolicy};
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct PruneOptions {
    pub package_patterns: Vec<String>,
    pub repository_names: Vec<String>,
    /// Snapshot ids (or unique prefixes) to delete outright. Mutually
    /// exclusive with an explicit keep policy.
    pub ids: Vec<String>,
    /// Explicit keep policy overriding per-package configuration.
    pub keep: Option<RetentionPolicy>,
    /// Grouping for retention evaluation; empty defaults to the
    /// package name.
    pub group_by: Vec<GroupField>,
    pub dry_run: bool,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PruneOutcome {
    pub total: usize,
    pub pruned: usize,
    pub errors: usize,
}

/// Evaluates retention over every enabled repository and deletes the
/// snapshots that fall out. Per-repository failures are counted, not
/// propagated, so one unreachable store does not stop the others.
pub async fn prune_repositories(
    ctx: &WorkflowContext,
    options: &PruneOptions,
) -> Result<PruneOutcome> {
    if !options.ids.is_empty() && options.keep.is_some_and(|p| !p.is_empty()) {
        return Err(Error::config(
            "snapshot ids and a keep policy are mutually exclusive prune filters",
        ));
    }

    let group_by = if options.group_by.is_empty() {
        vec![GroupField::PackageName]
    } else {
        options.group_by.clone()
    };

    let mut outcome = PruneOutcome::default();
    for descriptor in &ctx.config.repositories {
        if !descriptor.enabled_actions.prune {
            continue;
        }
        if !options.repository_names.is_empty()
            && !options.repository_names.contains(&descriptor.name)
        {
            continue;
        }
        ctx.token.check()?;
        match prune_one(ctx, options, &group_by, &descriptor.name).await {
            Ok((total, pruned)) => {
                outcome.total += total;
                outcome.pruned += pruned;
            }
            Err(Error::Aborted) => return Err(Error::Aborted),
            Err(err) => {
                warn!(repository = %descriptor.name, error = %err, "Prune failed");
                outcome.errors += 1;
            }
        }
    }
    info!(
        total = outcome.total,
        pruned = outcome.pruned,
        errors = outcome.errors,
        dry_run = options.dry_run,
        "Prune finished"
    );
    Ok(outcome)
}

async fn prune_one(
    ctx: &WorkflowContext,
    options: &PruneOptions,
    group_by: &[GroupField],
    repository_name: &str,
) -> Result<(usize, usize)> {
    let descriptor = ctx.config.repository(repository_name)?;
    let repository = ctx.provider.repository(descriptor)?;
    let filter = SnapshotFilter {
        ids: options.ids.clone(),
        packages: options.package_patterns.clone(),
        ..Default::default()
    };
    let snapshots = repository.fetch_snapshots(&filter).await?;
    let total = snapshots.len();

    let doomed: Vec<_> = if !options.ids.is_empty() {
        // Id-deletion mode: everything the filter matched goes.
        snapshots.iter().collect()
    } else if let Some(keep) = &options.keep {
        evaluate(&snapshots, group_by, keep)
            .into_iter()
            .filter(|d| !d.keep)
            .map(|d| d.snapshot)
            .collect()
    } else {
        let config = ctx.config.clone();
        evaluate_with_resolver(&snapshots, group_by, move |package| {
            config
                .package(package)
                .ok()
                .and_then(|p| p.prune_policy)
                .or(config.default_prune_policy)
        })?
        .into_iter()
        .filter(|d| !d.keep)
        .map(|d| d.snapshot)
        .collect()
    };

    let mut pruned = 0;
    for snapshot in doomed {
        ctx.token.check()?;
        if options.dry_run {
            info!(
                repository = %repository_name,
                snapshot = %snapshot.summary(),
                "Would prune"
            );
        } else {
            repository.prune(snapshot).await?;
        }
        pruned += 1;
    }
    Ok((total, pruned))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{descriptor, package_for, MockProvider};
    use chrono::{TimeZone, Utc};
    use packhaul_core::{Config, ScratchSession, Snapshot};
    use std::sync::Arc;

    fn snapshot(id: &str, package: &str, day: u32) -> Snapshot {
        Snapshot {
            id: id.to_string(),
            original_id: id.to_string(),
            date: Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0).unwrap(),
            package_name: package.to_string(),
            package_task_name: None,
            tags: Vec::new(),
            hostname: "host".to_string(),
            size: 0,
        }
    }

    fn context_with(
        config: Config,
    ) -> (WorkflowContext, Arc<MockProvider>) {
        let provider = MockProvider::for_config(&config);
        let session = Arc::new(ScratchSession::create().unwrap());
        let ctx = WorkflowContext::new(config, session).with_provider(provider.clone());
        (ctx, provider)
    }

    fn keep_last(n: u32) -> RetentionPolicy {
        RetentionPolicy {
            keep_last: Some(n),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn id_and_keep_filters_are_rejected_before_any_call() {
        let config = Config {
            repositories: vec![descriptor("r1")],
            ..Default::default()
        };
        let (ctx, provider) = context_with(config);
        provider.repo("r1").seed(snapshot("0123456789abcdef", "web", 1));

        let result = prune_repositories(
            &ctx,
            &PruneOptions {
                ids: vec!["01234567".to_string()],
                keep: Some(keep_last(1)),
                ..Default::default()
            },
        )
        .await;
        assert!(matches!(result, Err(Error::Config(_))));
        assert!(provider.repo("r1").pruned_ids().is_empty());
        ctx.session.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn package_policy_prunes_everything_but_the_newest() {
        let tmp = tempfile::tempdir().unwrap();
        let mut package = package_for("web", tmp.path(), &["r1"]);
        package.prune_policy = Some(keep_last(1));
        let config = Config {
            repositories: vec![descriptor("r1")],
            packages: vec![package],
            ..Default::default()
        };
        let (ctx, provider) = context_with(config);
        let repo = provider.repo("r1");
        repo.seed(snapshot("aaaaaaaa00000000", "web", 1));
        repo.seed(snapshot("bbbbbbbb00000000", "web", 2));
        repo.seed(snapshot("cccccccc00000000", "web", 3));

        let outcome = prune_repositories(&ctx, &PruneOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.total, 3);
        assert_eq!(outcome.pruned, 2);
        assert_eq!(repo.stored_ids(), vec!["cccccccc00000000"]);
        ctx.session.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn without_any_policy_nothing_is_pruned() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config {
            repositories: vec![descriptor("r1")],
            packages: vec![package_for("web", tmp.path(), &["r1"])],
            ..Default::default()
        };
        let (ctx, provider) = context_with(config);
        let repo = provider.repo("r1");
        repo.seed(snapshot("aaaaaaaa00000000", "web", 1));
        repo.seed(snapshot("bbbbbbbb00000000", "web", 2));

        let outcome = prune_repositories(&ctx, &PruneOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.pruned, 0);
        assert_eq!(repo.stored_ids().len(), 2);
        ctx.session.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn dry_run_reports_without_deleting() {
        let config = Config {
            repositories: vec![descriptor("r1")],
            default_prune_policy: Some(keep_last(1)),
            ..Default::default()
        };
        let (ctx, provider) = context_with(config);
        let repo = provider.repo("r1");
        repo.seed(snapshot("aaaaaaaa00000000", "web", 1));
        repo.seed(snapshot("bbbbbbbb00000000", "web", 2));

        let outcome = prune_repositories(
            &ctx,
            &PruneOptions {
                dry_run: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(outcome.pruned, 1);
        assert!(repo.pruned_ids().is_empty());
        ctx.session.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn id_mode_deletes_exactly_the_matching_snapshot() {
        let config = Config {
            repositories: vec![descriptor("r1")],
            ..Default::default()
        };
        let (ctx, provider) = context_with(config);
        let repo = provider.repo("r1");
        repo.seed(snapshot("aaaaaaaa00000000", "web", 1));
        repo.seed(snapshot("bbbbbbbb00000000", "web", 2));

        let outcome = prune_repositories(
            &ctx,
            &PruneOptions {
                ids: vec!["aaaaaaaa".to_string()],
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(outcome.pruned, 1);
        assert_eq!(repo.pruned_ids(), vec!["aaaaaaaa00000000"]);
        ctx.session.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn prune_disabled_repository_is_skipped() {
        let mut r1 = descriptor("r1");
        r1.enabled_actions.prune = false;
        let config = Config {
            repositories: vec![r1],
            default_prune_policy: Some(keep_last(1)),
            ..Default::default()
        };
        let (ctx, provider) = context_with(config);
        let repo = provider.repo("r1");
        repo.seed(snapshot("aaaaaaaa00000000", "web", 1));
        repo.seed(snapshot("bbbbbbbb00000000", "web", 2));

        let outcome = prune_repositories(&ctx, &PruneOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.total, 0);
        assert_eq!(repo.stored_ids().len(), 2);
        ctx.session.teardown().await.unwrap();
    }
}
