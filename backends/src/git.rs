use crate::files::{copy_matched, matched_files};
use crate::process::ProcessRunner;
use crate::repository::{
    BackupContext, BackupStats, CopyContext, DiskStats, Repository, RestoreContext,
};
use async_trait::async_trait;
use packhaul_core::config::{BackendConfig, BackendKind, GitConfig};
use packhaul_core::filter::SnapshotFilter;
use packhaul_core::progress::{Progress, ProgressStep};
use packhaul_core::{CancelToken, Error, Result, ScratchSession, Snapshot};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Version-control backend: one snapshot is one commit on a
/// per-package branch plus an annotated tag whose message is the
/// JSON-serialized snapshot. Pruning rewrites history.
pub struct GitRepository {
    name: String,
    config: GitConfig,
    session: Arc<ScratchSession>,
}

impl GitRepository {
    pub fn new(name: String, config: GitConfig, session: Arc<ScratchSession>) -> Self {
        Self {
            name,
            config,
            session,
        }
    }

    fn branch_name(&self, package: &str) -> String {
        format!("{}/{package}", self.config.branch_prefix)
    }

    fn tag_name(&self, package: &str, id: &str) -> String {
        format!("{}/{package}/{id}", self.config.branch_prefix)
    }

    async fn git(&self, cwd: &Path, args: &[&str], token: &CancelToken) -> Result<String> {
        let output = ProcessRunner::new("git")
            .args(args.iter().copied())
            // Identity and prompts must not depend on the host setup.
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_AUTHOR_NAME", "packhaul")
            .env("GIT_AUTHOR_EMAIL", "packhaul@localhost")
            .env("GIT_COMMITTER_NAME", "packhaul")
            .env("GIT_COMMITTER_EMAIL", "packhaul@localhost")
            .current_dir(cwd)
            .output(token)
            .await?;
        Ok(output.stdout)
    }

    async fn git_ok(&self, cwd: &Path, args: &[&str], token: &CancelToken) -> bool {
        self.git(cwd, args, token).await.is_ok()
    }

    async fn clone_into(&self, dir: &Path, token: &CancelToken) -> Result<()> {
        self.git(
            dir,
            &["clone", "--quiet", &self.config.repo_url, "."],
            token,
        )
        .await?;
        Ok(())
    }

    /// Reads every packhaul tag of the remote and projects tag messages
    /// back into snapshots. Tags written by anything else are skipped.
    async fn scan(&self, token: &CancelToken) -> Result<Vec<Snapshot>> {
        let leases = packhaul_core::LeaseCollector::new(self.session.clone());
        let prefix = self.config.branch_prefix.clone();
        let snapshots = leases
            .with_scratch("git-scan", |dir| async move {
                self.clone_into(&dir, token).await?;
                let pattern = format!("refs/tags/{prefix}/*");
                let raw = self
                    .git(
                        &dir,
                        &[
                            "for-each-ref",
                            &pattern,
                            "--format=%(refname:strip=2)\t%(contents:subject)",
                        ],
                        token,
                    )
                    .await?;
                let mut snapshots = Vec::new();
                for line in raw.lines() {
                    let Some((tag, message)) = line.split_once('\t') else {
                        continue;
                    };
                    match serde_json::from_str::<Snapshot>(message) {
                        Ok(mut snapshot) => {
                            snapshot.original_id = tag.to_string();
                            snapshots.push(snapshot);
                        }
                        Err(err) => {
                            debug!(tag, error = %err, "Skipping unparsable snapshot tag")
                        }
                    }
                }
                Ok(snapshots)
            })
            .await?;
        Ok(snapshots)
    }
}

#[async_trait]
impl Repository for GitRepository {
    fn source(&self) -> String {
        self.config.repo_url.clone()
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Git
    }

    async fn disk_stats(&self) -> Result<Option<DiskStats>> {
        // The store lives behind a git remote; usage is not knowable.
        Ok(None)
    }

    async fn init(&self) -> Result<()> {
        let token = CancelToken::new();
        ProcessRunner::new("git")
            .args(["ls-remote", &self.config.repo_url])
            .env("GIT_TERMINAL_PROMPT", "0")
            .output(&token)
            .await?;
        Ok(())
    }

    async fn fetch_snapshots(&self, filter: &SnapshotFilter) -> Result<Vec<Snapshot>> {
        let token = CancelToken::new();
        let snapshots = self.scan(&token).await?;
        Ok(filter.apply(snapshots))
    }

    async fn backup(&self, ctx: &BackupContext<'_>) -> Result<BackupStats> {
        let package = &ctx.snapshot.package_name;
        let branch = self.branch_name(package);
        let tag = self.tag_name(package, &ctx.snapshot.id);
        let mut snapshot = ctx.snapshot.clone();
        snapshot.original_id = tag.clone();

        let files = matched_files(ctx.path, ctx.package)?;
        snapshot.size = files.iter().map(|f| f.size).sum();
        let message = serde_json::to_string(&snapshot)?;
        let src_root = ctx.path.to_path_buf();

        let bytes = ctx
            .leases
            .with_scratch("git-backup", |dir| {
                let files = files;
                async move {
                    (ctx.progress)(&Progress::relative(ProgressStep::message("Cloning")));
                    self.clone_into(&dir, ctx.token).await?;

                    let remote_branch = format!("origin/{branch}");
                    if self
                        .git_ok(&dir, &["rev-parse", "--verify", &remote_branch], ctx.token)
                        .await
                    {
                        self.git(
                            &dir,
                            &["checkout", "-B", &branch, &remote_branch],
                            ctx.token,
                        )
                        .await?;
                    } else {
                        self.git(&dir, &["checkout", "--orphan", &branch], ctx.token)
                            .await?;
                    }
                    // Replace the whole tree with the current matched
                    // set; deletions show up as removed files.
                    self.git(&dir, &["rm", "-rf", "--ignore-unmatch", "."], ctx.token)
                        .await?;

                    (ctx.progress)(&Progress::relative(ProgressStep::counted(
                        "Copying files",
                        0,
                        files.len() as u64,
                    )));
                    let bytes = copy_matched(&src_root, &dir, &files, ctx.token).await?;
                    self.git(&dir, &["add", "-A"], ctx.token).await?;

                    let status = self
                        .git(&dir, &["status", "--porcelain"], ctx.token)
                        .await?;
                    if status.trim().is_empty() {
                        debug!(package = %package, "Tree unchanged, tagging previous commit");
                    } else {
                        let commit_message = format!("backup {} {}", package, snapshot.short_id());
                        self.git(&dir, &["commit", "-m", &commit_message], ctx.token)
                            .await?;
                    }

                    self.git(&dir, &["tag", "-a", &tag, "-m", &message], ctx.token)
                        .await?;
                    (ctx.progress)(&Progress::relative(ProgressStep::message("Pushing")));
                    self.git(
                        &dir,
                        &["push", "--quiet", "origin", &branch, "--tags"],
                        ctx.token,
                    )
                    .await?;
                    Ok(bytes)
                }
            })
            .await?;

        info!(
            repository = %self.name,
            package = %package,
            snapshot = %ctx.snapshot.short_id(),
            bytes,
            "Committed git snapshot"
        );
        Ok(BackupStats { bytes })
    }

    async fn restore(&self, ctx: &RestoreContext<'_>) -> Result<()> {
        let tag = if ctx.snapshot.original_id.is_empty() {
            self.tag_name(&ctx.snapshot.package_name, &ctx.snapshot.id)
        } else {
            ctx.snapshot.original_id.clone()
        };
        let url = self.config.repo_url.clone();
        let target = ctx.target.to_path_buf();
        ctx.leases
            .with_scratch("git-restore", |dir| async move {
                (ctx.progress)(&Progress::relative(ProgressStep::message("Cloning at tag")));
                self.git(
                    &dir,
                    &["clone", "--quiet", "--depth", "1", "--branch", &tag, &url, "."],
                    ctx.token,
                )
                .await?;
                tokio::fs::remove_dir_all(dir.join(".git")).await?;
                move_tree(&dir, &target).await
            })
            .await
    }

    async fn copy(&self, ctx: &CopyContext<'_>) -> Result<BackupStats> {
        let BackendConfig::Git(target_config) = &ctx.target.backend else {
            return Err(Error::config(format!(
                "cannot copy git snapshot into {} repository {:?}",
                ctx.target.backend.kind(),
                ctx.target.name
            )));
        };
        let branch = self.branch_name(&ctx.snapshot.package_name);
        let tag = ctx.snapshot.original_id.clone();
        let target_url = target_config.repo_url.clone();
        let size = ctx.snapshot.size;
        ctx.leases
            .with_scratch("git-copy", |dir| async move {
                self.clone_into(&dir, ctx.token).await?;
                self.git(
                    &dir,
                    &["push", "--quiet", &target_url, &format!("refs/remotes/origin/{branch}:refs/heads/{branch}"), &format!("refs/tags/{tag}:refs/tags/{tag}")],
                    ctx.token,
                )
                .await?;
                Ok(BackupStats { bytes: size })
            })
            .await
    }

    /// Rebases the package branch onto the pruned commit's parent and
    /// force-pushes: history rewriting, not a soft delete. Concurrent
    /// prunes of the same branch must be serialized by the caller.
    async fn prune(&self, snapshot: &Snapshot) -> Result<()> {
        let token = CancelToken::new();
        let branch = self.branch_name(&snapshot.package_name);
        let tag = snapshot.original_id.clone();
        let leases = packhaul_core::LeaseCollector::new(self.session.clone());
        leases
            .with_scratch("git-prune", |dir| {
                let branch = branch.clone();
                let tag = tag.clone();
                let token = token.clone();
                async move {
                    self.clone_into(&dir, &token).await?;
                    let commit = self
                        .git(&dir, &["rev-list", "-n", "1", &tag], &token)
                        .await
                        .map_err(|_| Error::SnapshotNotFound {
                            id: snapshot.id.clone(),
                        })?
                        .trim()
                        .to_string();
                    self.git(
                        &dir,
                        &["checkout", "-B", &branch, &format!("origin/{branch}")],
                        &token,
                    )
                    .await?;

                    let parent = format!("{commit}^");
                    let head = self
                        .git(&dir, &["rev-parse", &branch], &token)
                        .await?
                        .trim()
                        .to_string();
                    if self.git_ok(&dir, &["rev-parse", "--verify", &parent], &token).await {
                        if head == commit {
                            // Dropping the branch tip is a plain reset.
                            self.git(&dir, &["reset", "--hard", &parent], &token)
                                .await?;
                        } else {
                            self.git(
                                &dir,
                                &[
                                    "rebase",
                                    "--onto",
                                    &parent,
                                    &commit,
                                    &branch,
                                    "--strategy-option=theirs",
                                    "--rebase-merges",
                                ],
                                &token,
                            )
                            .await
                            .map_err(|err| {
                                Error::integrity(format!(
                                    "history rewrite failed for {branch}: {err}"
                                ))
                            })?;
                        }
                        self.git(
                            &dir,
                            &["push", "--quiet", "--force", "origin", &branch],
                            &token,
                        )
                        .await?;
                    } else if head == commit {
                        // The pruned commit is the only one on the
                        // branch: drop the branch altogether.
                        self.git(
                            &dir,
                            &["push", "--quiet", "origin", &format!(":refs/heads/{branch}")],
                            &token,
                        )
                        .await?;
                    } else {
                        return Err(Error::integrity(format!(
                            "cannot rewrite history past the initial commit of {branch}"
                        )));
                    }

                    self.git(
                        &dir,
                        &["push", "--quiet", "origin", &format!(":refs/tags/{tag}")],
                        &token,
                    )
                    .await?;
                    Ok(())
                }
            })
            .await?;
        info!(repository = %self.name, snapshot = %snapshot.short_id(), "Pruned git snapshot");
        Ok(())
    }
}

/// Moves the contents of `src` into `dst`, merging into existing
/// directories.
async fn move_tree(src: &Path, dst: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dst).await?;
    let mut queue: Vec<(PathBuf, PathBuf)> = vec![(src.to_path_buf(), dst.to_path_buf())];
    while let Some((from, to)) = queue.pop() {
        let mut entries = tokio::fs::read_dir(&from).await?;
        while let Some(entry) = entries.next_entry().await? {
            let target = to.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                tokio::fs::create_dir_all(&target).await?;
                queue.push((entry.path(), target));
            } else {
                tokio::fs::rename(entry.path(), &target).await?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> GitRepository {
        GitRepository::new(
            "g1".to_string(),
            GitConfig {
                repo_url: "git@example.com:backups.git".to_string(),
                branch_prefix: "packhaul".to_string(),
            },
            Arc::new(ScratchSession::create().unwrap()),
        )
    }

    #[test]
    fn ref_names_follow_layout() {
        let repo = repo();
        assert_eq!(repo.branch_name("web"), "packhaul/web");
        assert_eq!(repo.tag_name("web", "abc123"), "packhaul/web/abc123");
    }

    #[test]
    fn tag_message_round_trips_snapshot() {
        let pre = packhaul_core::PreSnapshot::mint();
        let snapshot =
            Snapshot::from_pre(&pre, "web", Some("mysql".to_string()), vec!["t1".to_string()]);
        let message = serde_json::to_string(&snapshot).unwrap();
        assert!(!message.contains('\n'));
        let parsed: Snapshot = serde_json::from_str(&message).unwrap();
        assert_eq!(parsed, snapshot);
    }
}
