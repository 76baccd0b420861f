use anyhow::Result;
use clap::Args;
use packhaul_engine::{SnapshotsOptions, WorkflowContext};

#[derive(Args)]
pub struct SnapshotsCommand {
    #[arg(long, help = "Snapshot ids or unique prefixes")]
    id: Vec<String>,

    #[arg(long, help = "Package name patterns")]
    package: Vec<String>,

    #[arg(long, help = "Task name patterns (@empty matches no task)")]
    task: Vec<String>,

    #[arg(long, help = "Require at least one of these tags")]
    tag: Vec<String>,

    #[arg(long, help = "Restrict to these repositories")]
    repository: Vec<String>,

    #[arg(long, help = "Newest N snapshots per package")]
    last: Option<usize>,
}

impl SnapshotsCommand {
    pub async fn run(&self, ctx: &WorkflowContext) -> Result<()> {
        let listed = packhaul_engine::snapshots(
            ctx,
            SnapshotsOptions {
                ids: self.id.clone(),
                package_patterns: self.package.clone(),
                task_names: self.task.clone(),
                tags: self.tag.clone(),
                repository_names: self.repository.clone(),
                last: self.last,
            },
        )
        .await?;

        if listed.is_empty() {
            println!("No snapshots found");
            return Ok(());
        }
        println!(
            "{:<10} {:<20} {:<16} {:<12} {:>10}  {}",
            "ID", "Date", "Package", "Repository", "Size", "Tags"
        );
        for entry in &listed {
            let s = &entry.snapshot;
            println!(
                "{:<10} {:<20} {:<16} {:<12} {:>10}  {}",
                s.short_id(),
                s.date.format("%Y-%m-%d %H:%M:%S"),
                s.package_name,
                entry.repository_name,
                format_size(s.size),
                s.tags.join(",")
            );
        }
        println!("{} snapshot(s)", listed.len());
        Ok(())
    }
}

fn format_size(bytes: u64) -> String {
    if bytes >= 1024 * 1024 * 1024 {
        format!("{:.2} GiB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    } else if bytes >= 1024 * 1024 {
        format!("{:.2} MiB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.2} KiB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}
