use crate::snapshot::{sort_by_date_desc, Snapshot};
use crate::{Error, Result};
use glob::Pattern;
use std::collections::HashMap;

/// Reserved sentinel accepted by task-name filters, matching snapshots
/// that were taken without a package task.
pub const EMPTY_TASK_SENTINEL: &str = "@empty";

/// Criteria applied when listing snapshots from a repository.
///
/// Package and task-name entries are glob patterns; tag filtering
/// requires at least one overlapping tag; `last` keeps only the newest
/// N snapshots per package after the other criteria applied.
#[derive(Debug, Clone, Default)]
pub struct SnapshotFilter {
    pub ids: Vec<String>,
    pub packages: Vec<String>,
    pub task_names: Vec<String>,
    pub tags: Vec<String>,
    pub last: Option<usize>,
}

impl SnapshotFilter {
    pub fn for_package(name: impl Into<String>) -> Self {
        Self {
            packages: vec![name.into()],
            ..Self::default()
        }
    }

    pub fn matches(&self, snapshot: &Snapshot) -> bool {
        if !self.ids.is_empty() && !self.ids.iter().any(|id| snapshot.matches_id(id)) {
            return false;
        }
        if !self.packages.is_empty() && !glob_match_any(&self.packages, &snapshot.package_name) {
            return false;
        }
        if !self.task_names.is_empty() {
            let matched = match &snapshot.package_task_name {
                None => self.task_names.iter().any(|p| p == EMPTY_TASK_SENTINEL),
                Some(task) => glob_match_any(
                    &self
                        .task_names
                        .iter()
                        .filter(|p| p.as_str() != EMPTY_TASK_SENTINEL)
                        .cloned()
                        .collect::<Vec<_>>(),
                    task,
                ),
            };
            if !matched {
                return false;
            }
        }
        if !self.tags.is_empty() && !self.tags.iter().any(|t| snapshot.tags.contains(t)) {
            return false;
        }
        true
    }

    /// Filters and orders a fetched snapshot list: newest first, with
    /// `last` applied per package.
    pub fn apply(&self, mut snapshots: Vec<Snapshot>) -> Vec<Snapshot> {
        snapshots.retain(|s| self.matches(s));
        sort_by_date_desc(&mut snapshots);
        if let Some(last) = self.last {
            let mut seen: HashMap<String, usize> = HashMap::new();
            snapshots.retain(|s| {
                let count = seen.entry(s.package_name.clone()).or_insert(0);
                *count += 1;
                *count <= last
            });
        }
        snapshots
    }
}

/// True if any pattern matches the value. Patterns that fail to compile
/// fall back to literal comparison; `validate_patterns` is expected to
/// have rejected them at configuration load.
pub fn glob_match_any(patterns: &[String], value: &str) -> bool {
    patterns.iter().any(|p| match Pattern::new(p) {
        Ok(pattern) => pattern.matches(value),
        Err(_) => p == value,
    })
}

pub fn validate_patterns(patterns: &[String]) -> Result<()> {
    for p in patterns {
        if p == EMPTY_TASK_SENTINEL {
            continue;
        }
        Pattern::new(p).map_err(|e| Error::config(format!("invalid glob pattern {p:?}: {e}")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn snapshot(id: &str, package: &str, task: Option<&str>, tags: &[&str]) -> Snapshot {
        Snapshot {
            id: id.to_string(),
            original_id: id.to_string(),
            date: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            package_name: package.to_string(),
            package_task_name: task.map(|t| t.to_string()),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            hostname: "host".to_string(),
            size: 0,
        }
    }

    #[test]
    fn package_glob_matches() {
        let filter = SnapshotFilter {
            packages: vec!["web*".to_string()],
            ..Default::default()
        };
        assert!(filter.matches(&snapshot("a", "web-frontend", None, &[])));
        assert!(!filter.matches(&snapshot("a", "db", None, &[])));
    }

    #[test]
    fn empty_task_sentinel_matches_absent_task() {
        let filter = SnapshotFilter {
            task_names: vec![EMPTY_TASK_SENTINEL.to_string()],
            ..Default::default()
        };
        assert!(filter.matches(&snapshot("a", "web", None, &[])));
        assert!(!filter.matches(&snapshot("a", "web", Some("mysql"), &[])));
    }

    #[test]
    fn tag_filter_requires_overlap() {
        let filter = SnapshotFilter {
            tags: vec!["nightly".to_string(), "weekly".to_string()],
            ..Default::default()
        };
        assert!(filter.matches(&snapshot("a", "web", None, &["nightly"])));
        assert!(!filter.matches(&snapshot("a", "web", None, &["adhoc"])));
        assert!(!filter.matches(&snapshot("a", "web", None, &[])));
    }

    #[test]
    fn last_is_applied_per_package() {
        let mut snapshots = Vec::new();
        for (i, pkg) in [(0u32, "web"), (1, "web"), (2, "web"), (0, "db"), (1, "db")] {
            let mut s = snapshot(&format!("{pkg}{i}"), pkg, None, &[]);
            s.date = Utc.with_ymd_and_hms(2026, 1, 1 + i, 0, 0, 0).unwrap();
            snapshots.push(s);
        }
        let filter = SnapshotFilter {
            last: Some(1),
            ..Default::default()
        };
        let kept = filter.apply(snapshots);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].id, "web2");
        assert_eq!(kept[1].id, "db1");
    }

    #[test]
    fn validate_rejects_broken_patterns() {
        assert!(validate_patterns(&["web[".to_string()]).is_err());
        assert!(validate_patterns(&["web*".to_string(), EMPTY_TASK_SENTINEL.to_string()]).is_ok());
    }
}
