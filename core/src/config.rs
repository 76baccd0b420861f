use crate::filter::validate_patterns;
use crate::retention::RetentionPolicy;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

/// Top-level configuration: every repository and package the process
/// may touch, loaded once per invocation from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub repositories: Vec<RepositoryDescriptor>,
    #[serde(default)]
    pub packages: Vec<PackageDescriptor>,
    #[serde(default)]
    pub default_prune_policy: Option<RetentionPolicy>,
    #[serde(default)]
    pub min_free_disk_space: Option<MinFreeDiskSpace>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&raw)
            .map_err(|e| Error::config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn repository(&self, name: &str) -> Result<&RepositoryDescriptor> {
        self.repositories
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| Error::RepositoryNotFound {
                name: name.to_string(),
            })
    }

    pub fn package(&self, name: &str) -> Result<&PackageDescriptor> {
        self.packages
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| Error::PackageNotFound {
                name: name.to_string(),
            })
    }

    /// Packages selected by a list of glob patterns; empty selects all.
    pub fn packages_matching(&self, patterns: &[String]) -> Vec<&PackageDescriptor> {
        if patterns.is_empty() {
            return self.packages.iter().collect();
        }
        self.packages
            .iter()
            .filter(|p| crate::filter::glob_match_any(patterns, &p.name))
            .collect()
    }

    /// Fails fast on anything that would otherwise surface mid-run:
    /// duplicate names, dangling references, incompatible mirror kinds
    /// and broken glob patterns.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for repo in &self.repositories {
            if !names.insert(repo.name.as_str()) {
                return Err(Error::config(format!("duplicate repository {:?}", repo.name)));
            }
        }
        let mut package_names = HashSet::new();
        for package in &self.packages {
            if !package_names.insert(package.name.as_str()) {
                return Err(Error::config(format!("duplicate package {:?}", package.name)));
            }
        }
        for repo in &self.repositories {
            for mirror in &repo.mirror_repo_names {
                let target = self.repository(mirror).map_err(|_| {
                    Error::config(format!(
                        "repository {:?} mirrors unknown repository {mirror:?}",
                        repo.name
                    ))
                })?;
                if target.backend.kind() != repo.backend.kind() {
                    return Err(Error::config(format!(
                        "repository {:?} ({}) cannot mirror to {:?} ({})",
                        repo.name,
                        repo.backend.kind(),
                        target.name,
                        target.backend.kind()
                    )));
                }
            }
        }
        for package in &self.packages {
            for name in &package.repository_names {
                self.repository(name).map_err(|_| {
                    Error::config(format!(
                        "package {:?} references unknown repository {name:?}",
                        package.name
                    ))
                })?;
            }
            validate_patterns(&package.include)?;
            validate_patterns(&package.exclude)?;
            for pack in &package.packs {
                validate_patterns(&pack.include)?;
                validate_patterns(&pack.exclude)?;
            }
        }
        Ok(())
    }
}

/// One configured backend instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryDescriptor {
    pub name: String,
    #[serde(default)]
    pub mirror_repo_names: Vec<String>,
    #[serde(default)]
    pub enabled_actions: EnabledActions,
    #[serde(flatten)]
    pub backend: BackendConfig,
}

/// Closed set of backend variants, dispatched exhaustively.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    Datastore(DatastoreConfig),
    Git(GitConfig),
    Archiver(ArchiverConfig),
}

impl BackendConfig {
    pub fn kind(&self) -> BackendKind {
        match self {
            BackendConfig::Datastore(_) => BackendKind::Datastore,
            BackendConfig::Git(_) => BackendKind::Git,
            BackendConfig::Archiver(_) => BackendKind::Archiver,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Datastore,
    Git,
    Archiver,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Datastore => write!(f, "datastore"),
            BackendKind::Git => write!(f, "git"),
            BackendKind::Archiver => write!(f, "archiver"),
        }
    }
}

/// Content-store backend rooted at a local directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatastoreConfig {
    pub root: PathBuf,
    #[serde(default)]
    pub compress: bool,
}

/// Version-control backend pushing to a remote git repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    pub repo_url: String,
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
}

fn default_branch_prefix() -> String {
    "packhaul".to_string()
}

/// External-archiver backend wrapping a restic-compatible tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiverConfig {
    pub repository: String,
    #[serde(default = "default_archiver_command")]
    pub command: String,
    #[serde(default)]
    pub password_file: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_archiver_command() -> String {
    "restic".to_string()
}

/// Gates which workflows may touch a repository. Everything defaults
/// to enabled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EnabledActions {
    #[serde(default = "enabled")]
    pub backup: bool,
    #[serde(default = "enabled")]
    pub init: bool,
    #[serde(default = "enabled")]
    pub prune: bool,
    #[serde(default = "enabled")]
    pub restore: bool,
    #[serde(default = "enabled")]
    pub snapshots: bool,
}

fn enabled() -> bool {
    true
}

impl Default for EnabledActions {
    fn default() -> Self {
        Self {
            backup: true,
            init: true,
            prune: true,
            restore: true,
            snapshots: true,
        }
    }
}

/// One backed-up unit of data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageDescriptor {
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub repository_names: Vec<String>,
    #[serde(default)]
    pub prune_policy: Option<RetentionPolicy>,
    /// Datastore pack layout; repositories of other kinds ignore it.
    #[serde(default)]
    pub packs: Vec<PackSpec>,
    #[serde(default)]
    pub hook: Option<HookConfig>,
}

impl PackageDescriptor {
    /// Repositories this package targets; empty means all configured.
    pub fn selected_repositories<'a>(
        &self,
        config: &'a Config,
    ) -> Result<Vec<&'a RepositoryDescriptor>> {
        if self.repository_names.is_empty() {
            return Ok(config.repositories.iter().collect());
        }
        self.repository_names
            .iter()
            .map(|name| config.repository(name))
            .collect()
    }
}

/// One named archive unit inside a datastore snapshot. Matched files
/// not claimed by any named pack land in the default catch-all pack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackSpec {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Spawn a child pack per matched top-level entry instead of one
    /// archive for the whole pack.
    #[serde(default)]
    pub one_file_per_entry: bool,
}

/// Package task hook commands, each an argv vector run through the
/// process runner with the snapshot path exported in the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookConfig {
    #[serde(default)]
    pub backup_command: Vec<String>,
    #[serde(default)]
    pub prepare_restore_command: Vec<String>,
    #[serde(default)]
    pub restore_command: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Free-space floor for the disk-space preflight, absolute or relative
/// to the disk size.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MinFreeDiskSpace {
    Bytes(u64),
    Percent(u8),
}

impl MinFreeDiskSpace {
    pub fn required_bytes(&self, total: u64) -> u64 {
        match self {
            MinFreeDiskSpace::Bytes(bytes) => *bytes,
            MinFreeDiskSpace::Percent(percent) => total / 100 * u64::from(*percent).min(100),
        }
    }
}
