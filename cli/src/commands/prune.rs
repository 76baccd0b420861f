use anyhow::{anyhow, Result};
use clap::{Args, ValueEnum};
use packhaul_core::retention::GroupField;
use packhaul_core::RetentionPolicy;
use packhaul_engine::{prune_repositories, PruneOptions, WorkflowContext};

#[derive(Clone, Copy, ValueEnum)]
enum GroupByArg {
    PackageName,
    TaskName,
    Hostname,
}

impl From<GroupByArg> for GroupField {
    fn from(value: GroupByArg) -> Self {
        match value {
            GroupByArg::PackageName => GroupField::PackageName,
            GroupByArg::TaskName => GroupField::TaskName,
            GroupByArg::Hostname => GroupField::Hostname,
        }
    }
}

#[derive(Args)]
pub struct PruneCommand {
    #[arg(long, help = "Delete exactly these snapshot ids")]
    id: Vec<String>,

    #[arg(long, help = "Package name patterns")]
    package: Vec<String>,

    #[arg(long, help = "Restrict to these repositories")]
    repository: Vec<String>,

    #[arg(long, help = "Keep the newest N snapshots")]
    keep_last: Option<u32>,

    #[arg(long, help = "Keep one snapshot per minute for N minutes")]
    keep_minutely: Option<u32>,

    #[arg(long, help = "Keep one snapshot per hour for N hours")]
    keep_hourly: Option<u32>,

    #[arg(long, help = "Keep one snapshot per day for N days")]
    keep_daily: Option<u32>,

    #[arg(long, help = "Keep one snapshot per week for N weeks")]
    keep_weekly: Option<u32>,

    #[arg(long, help = "Keep one snapshot per month for N months")]
    keep_monthly: Option<u32>,

    #[arg(long, help = "Keep one snapshot per year for N years")]
    keep_yearly: Option<u32>,

    #[arg(long, value_enum, help = "Grouping for retention evaluation")]
    group_by: Vec<GroupByArg>,

    #[arg(long, help = "Report what would be pruned without deleting")]
    dry_run: bool,
}

impl PruneCommand {
    pub async fn run(&self, ctx: &WorkflowContext) -> Result<()> {
        let keep = self.keep_policy();
        let outcome = prune_repositories(
            ctx,
            &PruneOptions {
                package_patterns: self.package.clone(),
                repository_names: self.repository.clone(),
                ids: self.id.clone(),
                keep: (!keep.is_empty()).then_some(keep),
                group_by: self.group_by.iter().map(|g| GroupField::from(*g)).collect(),
                dry_run: self.dry_run,
            },
        )
        .await?;

        let verb = if self.dry_run { "Would prune" } else { "Pruned" };
        println!(
            "{verb} {} of {} snapshot(s)",
            outcome.pruned, outcome.total
        );
        if outcome.errors == 0 {
            Ok(())
        } else {
            Err(anyhow!("{} repository(ies) failed to prune", outcome.errors))
        }
    }

    fn keep_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            keep_last: self.keep_last,
            keep_minutely: self.keep_minutely,
            keep_hourly: self.keep_hourly,
            keep_daily: self.keep_daily,
            keep_weekly: self.keep_weekly,
            keep_monthly: self.keep_monthly,
            keep_yearly: self.keep_yearly,
        }
    }
}
