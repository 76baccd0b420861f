use anyhow::{anyhow, Result};
use clap::Args;
use packhaul_engine::{BackupOptions, WorkflowContext};

#[derive(Args)]
pub struct BackupCommand {
    #[arg(help = "Package name patterns (all when omitted)")]
    package: Vec<String>,

    #[arg(long, help = "Restrict to these repositories")]
    repository: Vec<String>,

    #[arg(long, help = "Tags recorded on the snapshot")]
    tag: Vec<String>,

    #[arg(long, help = "Apply retention pruning after the backup")]
    prune: bool,
}

impl BackupCommand {
    pub async fn run(&self, ctx: &WorkflowContext) -> Result<()> {
        let summary = packhaul_engine::backup(
            ctx,
            BackupOptions {
                package_patterns: self.package.clone(),
                repository_names: self.repository.clone(),
                tags: self.tag.clone(),
                prune: self.prune,
            },
        )
        .await?;

        println!(
            "Backup finished in {:.1}s",
            summary.elapsed.as_secs_f64()
        );
        if summary.is_clean() {
            Ok(())
        } else {
            Err(anyhow!("{} task(s) failed", summary.error_count))
        }
    }
}
