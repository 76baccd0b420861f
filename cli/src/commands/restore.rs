use anyhow::{anyhow, Result};
use clap::Args;
use packhaul_engine::{RestoreOptions, WorkflowContext};
use std::path::PathBuf;

#[derive(Args)]
pub struct RestoreCommand {
    #[arg(long, help = "Snapshot ids or unique prefixes")]
    id: Vec<String>,

    #[arg(long, help = "Package name patterns")]
    package: Vec<String>,

    #[arg(long, help = "Require at least one of these tags")]
    tag: Vec<String>,

    #[arg(long, help = "Restrict to these repositories")]
    repository: Vec<String>,

    #[arg(long, help = "Target directory (package path when omitted)")]
    target: Option<PathBuf>,
}

impl RestoreCommand {
    pub async fn run(&self, ctx: &WorkflowContext) -> Result<()> {
        let summary = packhaul_engine::restore(
            ctx,
            RestoreOptions {
                ids: self.id.clone(),
                package_patterns: self.package.clone(),
                tags: self.tag.clone(),
                repository_names: self.repository.clone(),
                target: self.target.clone(),
            },
        )
        .await?;

        if summary.is_clean() {
            println!("Restore finished in {:.1}s", summary.elapsed.as_secs_f64());
            Ok(())
        } else {
            Err(anyhow!("{} restore(s) failed", summary.error_count))
        }
    }
}
