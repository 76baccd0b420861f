use anyhow::{anyhow, Result};
use clap::Args;
use packhaul_engine::{CopyOptions, WorkflowContext};

#[derive(Args)]
pub struct CopyCommand {
    #[arg(help = "Source repository")]
    source: String,

    #[arg(long, help = "Snapshot ids or unique prefixes")]
    id: Vec<String>,

    #[arg(long, help = "Package name patterns")]
    package: Vec<String>,

    #[arg(long, help = "Require at least one of these tags")]
    tag: Vec<String>,

    #[arg(long, help = "Target repositories (configured mirrors when omitted)")]
    repository: Vec<String>,
}

impl CopyCommand {
    pub async fn run(&self, ctx: &WorkflowContext) -> Result<()> {
        let summary = packhaul_engine::copy(
            ctx,
            CopyOptions {
                source: self.source.clone(),
                ids: self.id.clone(),
                package_patterns: self.package.clone(),
                tags: self.tag.clone(),
                repository_names: self.repository.clone(),
            },
        )
        .await?;

        if summary.is_clean() {
            println!("Copy finished in {:.1}s", summary.elapsed.as_secs_f64());
            Ok(())
        } else {
            Err(anyhow!("{} copy task(s) failed", summary.error_count))
        }
    }
}
