use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Minimum number of leading characters accepted when looking up a
/// snapshot by id prefix.
pub const MIN_ID_PREFIX_LEN: usize = 8;

/// Ephemeral identity minted once per backup invocation, before any
/// backend write happens. Becomes a [`Snapshot`] at backend commit time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreSnapshot {
    pub id: String,
    pub date: DateTime<Utc>,
}

impl PreSnapshot {
    pub fn mint() -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            date: Utc::now(),
        }
    }

    pub fn short_id(&self) -> String {
        self.id.chars().take(MIN_ID_PREFIX_LEN).collect()
    }
}

/// Durable, backend-queryable record of one completed package backup.
///
/// `original_id` is the backend-native handle (a git tag name, a
/// datastore directory name, an archiver snapshot id) and may differ
/// from `id`. Every field is derived purely from the backend's own
/// metadata, so listing snapshots never needs a side database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    #[serde(default)]
    pub original_id: String,
    pub date: DateTime<Utc>,
    pub package_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_task_name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub hostname: String,
    #[serde(default)]
    pub size: u64,
}

impl Snapshot {
    /// Builds the snapshot identity committed by a backend from the
    /// invocation's pre-snapshot. Size is filled in at commit time.
    pub fn from_pre(
        pre: &PreSnapshot,
        package_name: impl Into<String>,
        package_task_name: Option<String>,
        tags: Vec<String>,
    ) -> Self {
        Self {
            id: pre.id.clone(),
            original_id: pre.id.clone(),
            date: pre.date,
            package_name: package_name.into(),
            package_task_name,
            tags,
            hostname: current_hostname(),
            size: 0,
        }
    }

    pub fn short_id(&self) -> String {
        self.id.chars().take(MIN_ID_PREFIX_LEN).collect()
    }

    /// Accepts the full id or a unique prefix of at least
    /// [`MIN_ID_PREFIX_LEN`] characters.
    pub fn matches_id(&self, wanted: &str) -> bool {
        if wanted == self.id {
            return true;
        }
        wanted.len() >= MIN_ID_PREFIX_LEN && self.id.starts_with(wanted)
    }

    pub fn summary(&self) -> String {
        format!(
            "{} - {} on {} at {}",
            self.short_id(),
            self.package_name,
            self.hostname,
            self.date.format("%Y-%m-%d %H:%M:%S UTC")
        )
    }
}

pub fn current_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Sorts snapshots newest first, the order required by retention
/// evaluation and filter `last` truncation.
pub fn sort_by_date_desc(snapshots: &mut [Snapshot]) {
    snapshots.sort_by(|a, b| b.date.cmp(&a.date));
}
