use crate::snapshot::Snapshot;
use crate::{Error, Result};
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Keep counts per granularity. All optional; an empty policy keeps
/// everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    #[serde(default)]
    pub keep_last: Option<u32>,
    #[serde(default)]
    pub keep_minutely: Option<u32>,
    #[serde(default)]
    pub keep_hourly: Option<u32>,
    #[serde(default)]
    pub keep_daily: Option<u32>,
    #[serde(default)]
    pub keep_weekly: Option<u32>,
    #[serde(default)]
    pub keep_monthly: Option<u32>,
    #[serde(default)]
    pub keep_yearly: Option<u32>,
}

impl RetentionPolicy {
    pub fn is_empty(&self) -> bool {
        self.keep_last.is_none()
            && self.keep_minutely.is_none()
            && self.keep_hourly.is_none()
            && self.keep_daily.is_none()
            && self.keep_weekly.is_none()
            && self.keep_monthly.is_none()
            && self.keep_yearly.is_none()
    }

    fn granularities(&self) -> Vec<Granularity> {
        let mut out = Vec::new();
        let mut push = |name: &'static str, count: Option<u32>| {
            if let Some(count) = count {
                out.push(Granularity {
                    name,
                    remaining: count,
                    last_bucket: None,
                });
            }
        };
        push("last", self.keep_last);
        push("minutely", self.keep_minutely);
        push("hourly", self.keep_hourly);
        push("daily", self.keep_daily);
        push("weekly", self.keep_weekly);
        push("monthly", self.keep_monthly);
        push("yearly", self.keep_yearly);
        out
    }
}

/// Fields a snapshot set may be partitioned by before evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupField {
    PackageName,
    TaskName,
    Hostname,
}

impl GroupField {
    fn value(&self, snapshot: &Snapshot) -> String {
        match self {
            GroupField::PackageName => snapshot.package_name.clone(),
            GroupField::TaskName => snapshot.package_task_name.clone().unwrap_or_default(),
            GroupField::Hostname => snapshot.hostname.clone(),
        }
    }
}

/// Verdict for one snapshot, in input order and borrowing the input
/// item, so callers keep object identity.
#[derive(Debug)]
pub struct Decision<'a> {
    pub snapshot: &'a Snapshot,
    pub keep: bool,
    pub reasons: Vec<&'static str>,
}

struct Granularity {
    name: &'static str,
    remaining: u32,
    last_bucket: Option<String>,
}

impl Granularity {
    fn bucket(&self, position: usize, date: &DateTime<Utc>) -> String {
        match self.name {
            // Positional: every item is its own bucket.
            "last" => position.to_string(),
            "minutely" => format!(
                "{:04}{:02}{:02}{:02}{:02}",
                date.year(),
                date.month(),
                date.day(),
                date.hour(),
                date.minute()
            ),
            "hourly" => format!(
                "{:04}{:02}{:02}{:02}",
                date.year(),
                date.month(),
                date.day(),
                date.hour()
            ),
            "daily" => format!("{:04}{:02}{:02}", date.year(), date.month(), date.day()),
            "weekly" => {
                let week = date.iso_week();
                format!("{:04}{:02}", week.year(), week.week())
            }
            "monthly" => format!("{:04}{:02}", date.year(), date.month()),
            _ => format!("{:04}", date.year()),
        }
    }
}

/// Evaluates one policy over every group. Empty policy keeps all with
/// reason `"no-filter"`.
pub fn evaluate<'a>(
    snapshots: &'a [Snapshot],
    group_by: &[GroupField],
    policy: &RetentionPolicy,
) -> Vec<Decision<'a>> {
    evaluate_groups(snapshots, group_by, |_| Some(*policy), "no-filter")
}

/// Policy-resolution mode: the callback supplies the policy per group,
/// keyed by package name (e.g. package policy falling back to a global
/// default). Requires grouping by package name; groups the callback
/// declines keep everything with the distinct `"no-policy"` reason.
pub fn evaluate_with_resolver<'a>(
    snapshots: &'a [Snapshot],
    group_by: &[GroupField],
    resolve: impl Fn(&str) -> Option<RetentionPolicy>,
) -> Result<Vec<Decision<'a>>> {
    if !group_by.contains(&GroupField::PackageName) {
        return Err(Error::config(
            "policy resolution requires grouping by package name",
        ));
    }
    Ok(evaluate_groups(
        snapshots,
        group_by,
        |package| resolve(package),
        "no-policy",
    ))
}

fn evaluate_groups<'a>(
    snapshots: &'a [Snapshot],
    group_by: &[GroupField],
    resolve: impl Fn(&str) -> Option<RetentionPolicy>,
    keep_all_reason: &'static str,
) -> Vec<Decision<'a>> {
    let mut decisions: Vec<Decision<'a>> = snapshots
        .iter()
        .map(|snapshot| Decision {
            snapshot,
            keep: false,
            reasons: Vec::new(),
        })
        .collect();

    // Partition input positions by the concatenated group key. Empty
    // group_by yields one implicit group.
    let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
    let mut group_index: HashMap<String, usize> = HashMap::new();
    for (position, snapshot) in snapshots.iter().enumerate() {
        let key = group_by
            .iter()
            .map(|f| f.value(snapshot))
            .collect::<Vec<_>>()
            .join("\u{1f}");
        let slot = *group_index.entry(key.clone()).or_insert_with(|| {
            groups.push((key, Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(position);
    }

    for (_, mut members) in groups {
        // Evaluation scans newest first regardless of input order.
        members.sort_by(|a, b| snapshots[*b].date.cmp(&snapshots[*a].date));

        let policy = members
            .first()
            .and_then(|&pos| resolve(&snapshots[pos].package_name));
        let mut granularities = match policy {
            Some(policy) if !policy.is_empty() => policy.granularities(),
            _ => {
                for &pos in &members {
                    decisions[pos].keep = true;
                    decisions[pos].reasons.push(keep_all_reason);
                }
                continue;
            }
        };

        for (scan_position, &pos) in members.iter().enumerate() {
            let date = snapshots[pos].date;
            for granularity in granularities.iter_mut() {
                if granularity.remaining == 0 {
                    continue;
                }
                let bucket = granularity.bucket(scan_position, &date);
                if granularity.last_bucket.as_deref() == Some(bucket.as_str()) {
                    continue;
                }
                granularity.last_bucket = Some(bucket);
                granularity.remaining -= 1;
                decisions[pos].keep = true;
                decisions[pos].reasons.push(granularity.name);
            }
        }
    }

    decisions
}
