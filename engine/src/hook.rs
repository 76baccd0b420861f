use async_trait::async_trait;
use packhaul_backends::ProcessRunner;
use packhaul_core::config::HookConfig;
use packhaul_core::progress::{Progress, ProgressStep};
use packhaul_core::{CancelToken, Error, LeaseCollector, PackageDescriptor, ProgressHandler, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub struct HookContext<'a> {
    pub package: &'a PackageDescriptor,
    pub progress: &'a ProgressHandler,
    pub token: &'a CancelToken,
    pub leases: &'a Arc<LeaseCollector>,
}

/// Result of a hook phase: the working path the repository should back
/// up (or restore into), when the hook supplies one.
#[derive(Debug, Default)]
pub struct HookOutput {
    pub snapshot_path: Option<PathBuf>,
}

/// Package task hook: an external collaborator producing or consuming
/// a package's working-copy directory around the storage operations.
#[async_trait]
pub trait PackageHook: Send + Sync {
    /// Task name recorded on snapshots taken through this hook.
    fn task_name(&self) -> &str;

    /// Runs before backup; may produce the directory to back up
    /// instead of the package path (e.g. a database dump).
    async fn backup(&self, ctx: &HookContext<'_>) -> Result<HookOutput>;

    /// Runs before restore; may produce the directory to restore into.
    async fn prepare_restore(&self, ctx: &HookContext<'_>) -> Result<HookOutput>;

    /// Runs after restore against the restored path.
    async fn restore(&self, ctx: &HookContext<'_>, restored_path: &Path) -> Result<()>;
}

/// Hook implementation spawning configured commands. The working
/// directory for each phase is exported as `PACKHAUL_SNAPSHOT_PATH`;
/// the package name and path ride along for scripts that need them.
pub struct CommandHook {
    task_name: String,
    config: HookConfig,
}

impl CommandHook {
    pub fn new(config: HookConfig) -> Self {
        let task_name = config
            .backup_command
            .first()
            .or_else(|| config.restore_command.first())
            .map(|program| {
                Path::new(program)
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_else(|| program.clone())
            })
            .unwrap_or_else(|| "hook".to_string());
        Self { task_name, config }
    }

    async fn run_command(
        &self,
        argv: &[String],
        snapshot_path: &Path,
        ctx: &HookContext<'_>,
    ) -> Result<()> {
        let (program, args) = argv.split_first().ok_or_else(|| {
            Error::config(format!("empty hook command for package {:?}", ctx.package.name))
        })?;
        let progress = ctx.progress;
        ProcessRunner::new(program)
            .args(args.iter().cloned())
            .envs(&self.config.env)
            .env("PACKHAUL_PACKAGE", ctx.package.name.clone())
            .env("PACKHAUL_PACKAGE_PATH", ctx.package.path.display().to_string())
            .env("PACKHAUL_SNAPSHOT_PATH", snapshot_path.display().to_string())
            .run(ctx.token, |line| {
                progress(&Progress::relative(ProgressStep::message(line)));
            })
            .await?;
        Ok(())
    }

    /// Runs one producing phase into a scratch directory. On success
    /// the lease moves to the caller's collector so the path survives
    /// until the package-level cleanup.
    async fn produce(&self, argv: &[String], ctx: &HookContext<'_>) -> Result<HookOutput> {
        if argv.is_empty() {
            return Ok(HookOutput::default());
        }
        let (path, lease) = ctx
            .leases
            .acquire_scratch("hook", |dir| async move {
                self.run_command(argv, &dir, ctx).await?;
                Ok(dir)
            })
            .await?;
        ctx.leases.adopt(lease);
        info!(
            package = %ctx.package.name,
            task = %self.task_name,
            path = %path.display(),
            "Hook produced working path"
        );
        Ok(HookOutput {
            snapshot_path: Some(path),
        })
    }
}

#[async_trait]
impl PackageHook for CommandHook {
    fn task_name(&self) -> &str {
        &self.task_name
    }

    async fn backup(&self, ctx: &HookContext<'_>) -> Result<HookOutput> {
        self.produce(&self.config.backup_command, ctx).await
    }

    async fn prepare_restore(&self, ctx: &HookContext<'_>) -> Result<HookOutput> {
        self.produce(&self.config.prepare_restore_command, ctx).await
    }

    async fn restore(&self, ctx: &HookContext<'_>, restored_path: &Path) -> Result<()> {
        if self.config.restore_command.is_empty() {
            return Ok(());
        }
        self.run_command(&self.config.restore_command, restored_path, ctx)
            .await
    }
}
