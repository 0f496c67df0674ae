//! Retention policy evaluation and enforcement.
//!
//! A policy keeps the most recent N distinct calendar days, ISO weeks and
//! months that have at least one backup. Classification walks the history
//! newest-first exactly once and assigns each backup to the coarsest bucket
//! that still has room, so a backup kept for a month is never also counted
//! toward a week or day.

use crate::error::Result;
use crate::metadata::BackupMetadata;
use crate::storage::Storage;
use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Caps on retained calendar periods. `keep_all` overrides everything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionPolicy {
    #[serde(default = "default_daily")]
    pub daily: usize,
    #[serde(default = "default_weekly")]
    pub weekly: usize,
    #[serde(default = "default_monthly")]
    pub monthly: usize,
    #[serde(default)]
    pub keep_all: bool,
}

fn default_daily() -> usize {
    7
}

fn default_weekly() -> usize {
    4
}

fn default_monthly() -> usize {
    6
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            daily: default_daily(),
            weekly: default_weekly(),
            monthly: default_monthly(),
            keep_all: false,
        }
    }
}

/// The bucket a backup ends up in. Mutually exclusive; assigned once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionBucket {
    Daily,
    Weekly,
    Monthly,
    /// Explicit retain (`keep_all` policies).
    Keep,
    Delete,
}

impl fmt::Display for RetentionBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetentionBucket::Daily => write!(f, "daily"),
            RetentionBucket::Weekly => write!(f, "weekly"),
            RetentionBucket::Monthly => write!(f, "monthly"),
            RetentionBucket::Keep => write!(f, "keep"),
            RetentionBucket::Delete => write!(f, "delete"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CategorizedBackup {
    pub metadata: BackupMetadata,
    pub bucket: RetentionBucket,
}

/// Assign every backup exactly one bucket.
///
/// Bucket eligibility is evaluated monthly before weekly before daily: the
/// newest backup of a not-yet-seen month takes a monthly slot even when it
/// would also qualify for a week or day, which keeps one representative per
/// period under irregular schedules and makes shrinking any cap strictly
/// reduce the retained set.
pub fn categorize(
    mut backups: Vec<BackupMetadata>,
    policy: &RetentionPolicy,
) -> Vec<CategorizedBackup> {
    if policy.keep_all {
        return backups
            .into_iter()
            .map(|metadata| CategorizedBackup {
                metadata,
                bucket: RetentionBucket::Keep,
            })
            .collect();
    }

    // The storage layer already returns newest-first; re-assert since the
    // walk below depends on it.
    backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let mut seen_months: HashSet<String> = HashSet::new();
    let mut seen_weeks: HashSet<String> = HashSet::new();
    let mut seen_days: HashSet<String> = HashSet::new();
    let (mut monthly, mut weekly, mut daily) = (0usize, 0usize, 0usize);

    backups
        .into_iter()
        .map(|metadata| {
            let created = metadata.created_at;
            let month_key = created.format("%Y-%m").to_string();
            let iso = created.iso_week();
            let week_key = format!("{}-W{:02}", iso.year(), iso.week());
            let day_key = created.format("%Y-%m-%d").to_string();

            let bucket = if monthly < policy.monthly && !seen_months.contains(&month_key) {
                seen_months.insert(month_key);
                monthly += 1;
                RetentionBucket::Monthly
            } else if weekly < policy.weekly && !seen_weeks.contains(&week_key) {
                seen_weeks.insert(week_key);
                weekly += 1;
                RetentionBucket::Weekly
            } else if daily < policy.daily && !seen_days.contains(&day_key) {
                seen_days.insert(day_key);
                daily += 1;
                RetentionBucket::Daily
            } else {
                RetentionBucket::Delete
            };

            CategorizedBackup { metadata, bucket }
        })
        .collect()
}

/// Outcome of one retention pass.
#[derive(Debug)]
pub struct RetentionReport {
    pub categorized: Vec<CategorizedBackup>,
    /// Backup ids actually removed (empty on dry runs).
    pub deleted: Vec<String>,
    /// Artifact bytes freed, or that would be freed on a dry run.
    pub reclaimed_bytes: u64,
    pub dry_run: bool,
}

impl RetentionReport {
    pub fn delete_count(&self) -> usize {
        self.categorized
            .iter()
            .filter(|c| c.bucket == RetentionBucket::Delete)
            .count()
    }
}

/// Applies a policy to one database's persisted history.
pub struct RetentionEngine<'a> {
    storage: &'a Storage,
}

impl<'a> RetentionEngine<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    /// Categorize the database's backups and delete the `delete` set unless
    /// `dry_run`. A deletion failure aborts the remaining deletions and
    /// surfaces the error; the next run only sees what still exists, so a
    /// partial pass is safe to retry.
    pub fn apply(
        &self,
        database: &str,
        policy: &RetentionPolicy,
        dry_run: bool,
    ) -> Result<RetentionReport> {
        let backups = self.storage.list_backups(database)?;
        let categorized = categorize(backups, policy);

        let reclaimed_bytes: u64 = categorized
            .iter()
            .filter(|c| c.bucket == RetentionBucket::Delete)
            .map(|c| c.metadata.backup.size_bytes)
            .sum();

        let mut deleted = Vec::new();
        if !dry_run {
            for entry in &categorized {
                if entry.bucket != RetentionBucket::Delete {
                    continue;
                }
                self.storage
                    .delete_backup(database, &entry.metadata.backup_id)?;
                deleted.push(entry.metadata.backup_id.clone());
            }
            if !deleted.is_empty() {
                tracing::info!(
                    database,
                    count = deleted.len(),
                    reclaimed = reclaimed_bytes,
                    "Retention pass removed old backups"
                );
            }
        }

        Ok(RetentionReport {
            categorized,
            deleted,
            reclaimed_bytes,
            dry_run,
        })
    }
}
