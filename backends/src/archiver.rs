use crate::process::ProcessRunner;
use crate::repository::{
    BackupContext, BackupStats, CopyContext, DiskStats, Repository, RestoreContext,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use packhaul_core::config::{ArchiverConfig, BackendConfig, BackendKind};
use packhaul_core::filter::SnapshotFilter;
use packhaul_core::progress::{Progress, ProgressStep};
use packhaul_core::{CancelToken, Error, Result, Snapshot};
use serde::Deserialize;
use tracing::{debug, info};

/// Tag namespace this tool writes into the archiver's own tag list.
/// Foreign snapshots without these tags are invisible to us.
const TAG_ID: &str = "ph:id:";
const TAG_PACKAGE: &str = "ph:package:";
const TAG_TASK: &str = "ph:task:";
const TAG_DATE: &str = "ph:date:";
const TAG_SIZE: &str = "ph:size:";

/// External-archiver backend shelling out to a restic-compatible
/// command. All state lives in the archiver's repository; our snapshot
/// identity rides along as tags.
pub struct ArchiverRepository {
    name: String,
    config: ArchiverConfig,
}

impl ArchiverRepository {
    pub fn new(name: String, config: ArchiverConfig) -> Self {
        Self { name, config }
    }

    fn runner(&self, args: &[&str]) -> ProcessRunner {
        self.runner_for(&self.config, args)
    }

    fn runner_for(&self, config: &ArchiverConfig, args: &[&str]) -> ProcessRunner {
        let mut runner = ProcessRunner::new(&config.command)
            .args(["--repo", &config.repository, "--json"])
            .envs(&config.env);
        if let Some(password_file) = &config.password_file {
            runner = runner.arg("--password-file").arg(password_file.display().to_string());
        }
        runner.args(args.iter().copied())
    }
}

#[async_trait]
impl Repository for ArchiverRepository {
    fn source(&self) -> String {
        self.config.repository.clone()
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Archiver
    }

    async fn disk_stats(&self) -> Result<Option<DiskStats>> {
        // The repository may live behind sftp, rest or object storage;
        // free space is the archiver's problem.
        Ok(None)
    }

    async fn init(&self) -> Result<()> {
        let token = CancelToken::new();
        match self.runner(&["init"]).output(&token).await {
            Ok(_) => Ok(()),
            // Already-initialized repositories answer cat config.
            Err(first) => match self.runner(&["cat", "config"]).output(&token).await {
                Ok(_) => {
                    debug!(repository = %self.name, "Archiver repository already initialized");
                    Ok(())
                }
                Err(_) => Err(first),
            },
        }
    }

    async fn fetch_snapshots(&self, filter: &SnapshotFilter) -> Result<Vec<Snapshot>> {
        let token = CancelToken::new();
        let output = self.runner(&["snapshots"]).output(&token).await?;
        let snapshots = parse_snapshot_list(&output.stdout)?;
        Ok(filter.apply(snapshots))
    }

    async fn backup(&self, ctx: &BackupContext<'_>) -> Result<BackupStats> {
        let snapshot = ctx.snapshot;
        let date_tag = format!("{TAG_DATE}{}", snapshot.date.to_rfc3339());
        let mut args: Vec<String> = vec![
            "backup".to_string(),
            ".".to_string(),
            "--tag".to_string(),
            format!("{TAG_ID}{}", snapshot.id),
            "--tag".to_string(),
            format!("{TAG_PACKAGE}{}", snapshot.package_name),
            "--tag".to_string(),
            date_tag,
        ];
        if let Some(task) = &snapshot.package_task_name {
            args.push("--tag".to_string());
            args.push(format!("{TAG_TASK}{task}"));
        }
        for tag in &snapshot.tags {
            args.push("--tag".to_string());
            args.push(tag.clone());
        }

        let progress = ctx.progress;
        let mut summary: Option<BackupSummary> = None;
        let output = self
            .runner(&args.iter().map(String::as_str).collect::<Vec<_>>())
            .current_dir(ctx.path)
            .run(ctx.token, |line| match parse_backup_line(line) {
                Some(BackupMessage::Status { percent_done }) => {
                    let mut step = ProgressStep::message("Archiving");
                    step.percent = Some(percent_done * 100.0);
                    progress(&Progress::relative(step));
                }
                Some(BackupMessage::Summary(s)) => summary = Some(s),
                None => {}
            })
            .await?;
        let summary = summary
            .or_else(|| {
                output
                    .stdout
                    .lines()
                    .rev()
                    .find_map(|line| match parse_backup_line(line) {
                        Some(BackupMessage::Summary(s)) => Some(s),
                        _ => None,
                    })
            })
            .ok_or_else(|| {
                Error::integrity(format!(
                    "archiver backup of {:?} produced no summary",
                    snapshot.package_name
                ))
            })?;

        // The size is only known after the run, so it rides in a tag
        // added to the freshly created archiver snapshot.
        self.runner(&[
            "tag",
            "--add",
            &format!("{TAG_SIZE}{}", summary.total_bytes_processed),
            &summary.snapshot_id,
        ])
        .output(ctx.token)
        .await?;

        info!(
            repository = %self.name,
            package = %snapshot.package_name,
            snapshot = %snapshot.short_id(),
            archiver_id = %summary.snapshot_id,
            bytes = summary.total_bytes_processed,
            "Archived snapshot"
        );
        Ok(BackupStats {
            bytes: summary.total_bytes_processed,
        })
    }

    async fn restore(&self, ctx: &RestoreContext<'_>) -> Result<()> {
        (ctx.progress)(&Progress::relative(ProgressStep::message("Restoring")));
        let target = ctx.target.display().to_string();
        self.runner(&[
            "restore",
            &ctx.snapshot.original_id,
            "--target",
            &target,
        ])
        .output(ctx.token)
        .await?;
        Ok(())
    }

    async fn copy(&self, ctx: &CopyContext<'_>) -> Result<BackupStats> {
        let BackendConfig::Archiver(target_config) = &ctx.target.backend else {
            return Err(Error::config(format!(
                "cannot copy archiver snapshot into {} repository {:?}",
                ctx.target.backend.kind(),
                ctx.target.name
            )));
        };
        // The archiver transfers natively between its repositories;
        // the command runs against the target with ours as the source.
        let mut runner = self
            .runner_for(target_config, &["copy", &ctx.snapshot.original_id])
            .arg("--from-repo")
            .arg(self.config.repository.clone())
            .envs(&self.config.env);
        if let Some(password_file) = &self.config.password_file {
            runner = runner
                .arg("--from-password-file")
                .arg(password_file.display().to_string());
        }
        runner.output(ctx.token).await?;
        Ok(BackupStats {
            bytes: ctx.snapshot.size,
        })
    }

    async fn prune(&self, snapshot: &Snapshot) -> Result<()> {
        let token = CancelToken::new();
        self.runner(&["forget", "--prune", &snapshot.original_id])
            .output(&token)
            .await?;
        info!(repository = %self.name, snapshot = %snapshot.short_id(), "Forgot archiver snapshot");
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ArchiverSnapshot {
    id: String,
    time: DateTime<Utc>,
    hostname: String,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug)]
struct BackupSummary {
    snapshot_id: String,
    total_bytes_processed: u64,
}

enum BackupMessage {
    Status { percent_done: f64 },
    Summary(BackupSummary),
}

fn parse_backup_line(line: &str) -> Option<BackupMessage> {
    #[derive(Deserialize)]
    struct Line {
        message_type: String,
        #[serde(default)]
        percent_done: f64,
        #[serde(default)]
        snapshot_id: String,
        #[serde(default)]
        total_bytes_processed: u64,
    }
    let line: Line = serde_json::from_str(line).ok()?;
    match line.message_type.as_str() {
        "status" => Some(BackupMessage::Status {
            percent_done: line.percent_done,
        }),
        "summary" => Some(BackupMessage::Summary(BackupSummary {
            snapshot_id: line.snapshot_id,
            total_bytes_processed: line.total_bytes_processed,
        })),
        _ => None,
    }
}

/// Projects the archiver's snapshot listing back into our model. Only
/// entries carrying our id tag count; everything else in the archiver
/// repository is somebody else's.
fn parse_snapshot_list(raw: &str) -> Result<Vec<Snapshot>> {
    let entries: Vec<ArchiverSnapshot> = serde_json::from_str(raw.trim())?;
    let mut snapshots = Vec::new();
    for entry in entries {
        let Some(id) = tag_value(&entry.tags, TAG_ID) else {
            continue;
        };
        let Some(package_name) = tag_value(&entry.tags, TAG_PACKAGE) else {
            debug!(archiver_id = %entry.id, "Skipping snapshot without a package tag");
            continue;
        };
        let date = tag_value(&entry.tags, TAG_DATE)
            .and_then(|d| DateTime::parse_from_rfc3339(&d).ok())
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or(entry.time);
        let size = tag_value(&entry.tags, TAG_SIZE)
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let tags = entry
            .tags
            .iter()
            .filter(|t| !t.starts_with("ph:"))
            .cloned()
            .collect();
        snapshots.push(Snapshot {
            id,
            original_id: entry.id,
            date,
            package_name,
            package_task_name: tag_value(&entry.tags, TAG_TASK),
            tags,
            hostname: entry.hostname,
            size,
        });
    }
    Ok(snapshots)
}

fn tag_value(tags: &[String], prefix: &str) -> Option<String> {
    tags.iter()
        .find_map(|t| t.strip_prefix(prefix).map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_list_projects_tagged_entries_only() {
        let raw = r#"[
            {
                "id": "aabbccdd",
                "time": "2026-03-01T10:00:00Z",
                "hostname": "srv1",
                "tags": [
                    "ph:id:0123456789abcdef",
                    "ph:package:web",
                    "ph:task:mysql",
                    "ph:date:2026-03-01T09:59:58+00:00",
                    "ph:size:1024",
                    "release"
                ]
            },
            {
                "id": "eeff0011",
                "time": "2026-03-02T10:00:00Z",
                "hostname": "srv1",
                "tags": ["manual"]
            }
        ]"#;
        let snapshots = parse_snapshot_list(raw).unwrap();
        assert_eq!(snapshots.len(), 1);
        let s = &snapshots[0];
        assert_eq!(s.id, "0123456789abcdef");
        assert_eq!(s.original_id, "aabbccdd");
        assert_eq!(s.package_name, "web");
        assert_eq!(s.package_task_name.as_deref(), Some("mysql"));
        assert_eq!(s.size, 1024);
        assert_eq!(s.tags, vec!["release"]);
        assert_eq!(s.date.to_rfc3339(), "2026-03-01T09:59:58+00:00");
    }

    #[test]
    fn backup_lines_distinguish_status_and_summary() {
        let status = parse_backup_line(r#"{"message_type":"status","percent_done":0.25}"#);
        assert!(matches!(
            status,
            Some(BackupMessage::Status { percent_done }) if (percent_done - 0.25).abs() < 1e-9
        ));
        let summary = parse_backup_line(
            r#"{"message_type":"summary","snapshot_id":"aabbccdd","total_bytes_processed":2048}"#,
        );
        match summary {
            Some(BackupMessage::Summary(s)) => {
                assert_eq!(s.snapshot_id, "aabbccdd");
                assert_eq!(s.total_bytes_processed, 2048);
            }
            _ => panic!("expected summary"),
        }
        assert!(parse_backup_line("not json").is_none());
    }

    #[test]
    fn malformed_listing_is_a_serialization_error() {
        assert!(parse_snapshot_list("{").is_err());
    }
}
