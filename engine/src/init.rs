use crate::provider::WorkflowContext;
use crate::runner::{RunSummary, TaskRunner};
use crate::task::{Task, TaskId, TaskOutput};
use packhaul_core::Result;
use tracing::info;

/// Initializes every selected repository that allows it. Failures are
/// isolated per repository.
pub async fn init(ctx: &WorkflowContext, repository_names: Vec<String>) -> Result<RunSummary> {
    let runner = TaskRunner::new().with_progress(ctx.progress.clone());
    let mut tasks = Vec::new();
    for descriptor in &ctx.config.repositories {
        if !descriptor.enabled_actions.init {
            continue;
        }
        if !repository_names.is_empty() && !repository_names.contains(&descriptor.name) {
            continue;
        }
        let task_ctx = ctx.clone();
        let descriptor = descriptor.clone();
        let name = descriptor.name.clone();
        tasks.push(
            Task::new(TaskId::indexed("init", [name.clone()]), move |_| async move {
                let repository = task_ctx.provider.repository(&descriptor)?;
                repository.init().await?;
                info!(repository = %name, source = %repository.source(), "Initialized repository");
                Ok(TaskOutput::done())
            })
            .non_fatal(),
        );
    }
    runner.run(tasks).await
}
