use anyhow::{anyhow, Result};
use clap::Args;
use packhaul_engine::WorkflowContext;

#[derive(Args)]
pub struct InitCommand {
    #[arg(help = "Repositories to initialize (all when omitted)")]
    repository: Vec<String>,
}

impl InitCommand {
    pub async fn run(&self, ctx: &WorkflowContext) -> Result<()> {
        let summary = packhaul_engine::init(ctx, self.repository.clone()).await?;
        if summary.is_clean() {
            println!("Repositories initialized");
            Ok(())
        } else {
            Err(anyhow!("{} repository(ies) failed to initialize", summary.error_count))
        }
    }
}
