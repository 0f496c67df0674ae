//! Composite backup-health scoring.
//!
//! Derives a 0-100 score from one database's backup history: success rate
//! of the last 30 days (0-50), recency of the newest backup (0-30) and
//! regularity of the backup intervals (0-20), plus human-readable
//! recommendations. Recomputed on demand, never persisted.

use crate::metadata::{BackupMetadata, BackupStatus};
use chrono::{DateTime, Utc};

/// History window for the success-rate and consistency components.
const WINDOW_DAYS: i64 = 30;

const SUCCESS_SHARE: f64 = 50.0;
const RECENCY_SHARE: f64 = 30.0;
const CONSISTENCY_SHARE: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Warning => write!(f, "warning"),
            HealthStatus::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthScore {
    /// 0-50: completed share of the backups in the 30-day window.
    pub success_rate: f64,
    /// 0-30: how fresh the single newest backup is.
    pub recency_score: f64,
    /// 0-20: how regular the intervals between windowed backups are.
    pub consistency_score: f64,
    /// Sum of the three components, 0-100.
    pub total_score: f64,
    pub status: HealthStatus,
    pub recommendations: Vec<String>,
    /// The history the score was computed from.
    pub backups: Vec<BackupMetadata>,
}

/// Score a database's backup history as of now.
pub fn score(backups: Vec<BackupMetadata>) -> HealthScore {
    score_at(backups, Utc::now())
}

/// Score a database's backup history as of a given instant.
pub fn score_at(mut backups: Vec<BackupMetadata>, now: DateTime<Utc>) -> HealthScore {
    backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let window_start = now - chrono::Duration::days(WINDOW_DAYS);
    let windowed: Vec<&BackupMetadata> = backups
        .iter()
        .filter(|b| b.created_at >= window_start)
        .collect();

    if windowed.is_empty() {
        return HealthScore {
            success_rate: 0.0,
            recency_score: 0.0,
            consistency_score: 0.0,
            total_score: 0.0,
            status: HealthStatus::Critical,
            recommendations: vec![
                "No backups in the last 30 days - create a backup as soon as possible".to_string(),
            ],
            backups,
        };
    }

    let completed = windowed
        .iter()
        .filter(|b| b.status == BackupStatus::Completed)
        .count();
    let success_rate = SUCCESS_SHARE * completed as f64 / windowed.len() as f64;

    // Recency looks at the single newest backup regardless of the window.
    let newest = &backups[0];
    let age_days = (now - newest.created_at).num_seconds() as f64 / 86_400.0;
    let recency_score = if age_days <= 7.0 {
        RECENCY_SHARE * (7.0 - age_days) / 7.0
    } else {
        0.0
    };

    let consistency_score = consistency(&windowed);

    let total_score = success_rate + recency_score + consistency_score;
    let status = if total_score >= 80.0 {
        HealthStatus::Healthy
    } else if total_score >= 50.0 {
        HealthStatus::Warning
    } else {
        HealthStatus::Critical
    };

    let mut recommendations = Vec::new();
    if success_rate < SUCCESS_SHARE {
        recommendations.push(
            "Some backups in the last 30 days failed - check their error details".to_string(),
        );
    }
    if age_days > 7.0 {
        recommendations
            .push("Latest backup is more than a week old - schedule regular backups".to_string());
    } else if age_days > 3.0 {
        recommendations.push(
            "Latest backup is more than 3 days old - consider backing up more often".to_string(),
        );
    }
    if windowed.len() >= 2 && consistency_score < CONSISTENCY_SHARE / 2.0 {
        recommendations.push(
            "Backup intervals are irregular - consider a fixed schedule".to_string(),
        );
    }
    if windowed.len() < 2 {
        recommendations.push(
            "Not enough recent backups to judge consistency - back up regularly".to_string(),
        );
    }

    HealthScore {
        success_rate,
        recency_score,
        consistency_score,
        total_score,
        status,
        recommendations,
        backups,
    }
}

/// Interval-regularity component: coefficient of variation of the gaps
/// between consecutive windowed backups, inverted onto 0-20. Fewer than two
/// backups (or gaps averaging zero) is insufficient data and scores 0.
fn consistency(windowed: &[&BackupMetadata]) -> f64 {
    if windowed.len() < 2 {
        return 0.0;
    }

    let gaps: Vec<f64> = windowed
        .windows(2)
        .map(|pair| {
            (pair[0].created_at - pair[1].created_at).num_seconds() as f64 / 86_400.0
        })
        .collect();

    let mean = gaps.iter().sum::<f64>() / gaps.len() as f64;
    if mean <= 0.0 {
        return 0.0;
    }

    let variance = gaps.iter().map(|g| (g - mean).powi(2)).sum::<f64>() / gaps.len() as f64;
    let cv = variance.sqrt() / mean;

    CONSISTENCY_SHARE * (1.0 - cv.min(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::Compression;
    use crate::metadata::{BackupId, BackupOptionsInfo, SourceInfo};
    use chrono::{TimeZone, Utc};

    fn backup(created: DateTime<Utc>, status: BackupStatus) -> BackupMetadata {
        let id = BackupId::from_timestamp(created);
        let mut meta = BackupMetadata::begin(
            &id,
            SourceInfo {
                kind: "mysql".to_string(),
                host: "localhost".to_string(),
                port: 3306,
                database: "shop".to_string(),
                version: String::new(),
            },
            format!("{id}.sql.gz"),
            Compression::Gzip,
            BackupOptionsInfo::default(),
        );
        match status {
            BackupStatus::Completed => {
                meta.complete(100, "sha256:aa".to_string(), created + chrono::Duration::seconds(5))
            }
            BackupStatus::Failed => meta.fail("dump failed".to_string(), created),
            BackupStatus::Running => {}
        }
        meta
    }

    #[test]
    fn test_empty_history_is_all_zero() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let score = score_at(Vec::new(), now);
        assert_eq!(score.total_score, 0.0);
        assert_eq!(score.status, HealthStatus::Critical);
        assert_eq!(score.recommendations.len(), 1);
    }

    #[test]
    fn test_only_stale_history_is_all_zero() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let old = now - chrono::Duration::days(90);
        let score = score_at(vec![backup(old, BackupStatus::Completed)], now);
        assert_eq!(score.total_score, 0.0);
        assert!(score.recommendations[0].contains("No backups"));
    }

    #[test]
    fn test_perfect_history_scores_near_100() {
        // 10 completed backups, newest a few minutes old, exactly one day
        // apart.
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 2, 5, 0).unwrap();
        let newest = Utc.with_ymd_and_hms(2025, 6, 1, 2, 0, 0).unwrap();
        let history: Vec<_> = (0..10)
            .map(|i| backup(newest - chrono::Duration::days(i), BackupStatus::Completed))
            .collect();

        let score = score_at(history, now);
        assert_eq!(score.success_rate, 50.0);
        assert!(score.recency_score > 29.0);
        assert_eq!(score.consistency_score, 20.0);
        assert!(score.total_score > 99.0 && score.total_score <= 100.0);
        assert_eq!(score.status, HealthStatus::Healthy);
        assert!(score.recommendations.is_empty());
    }

    #[test]
    fn test_failures_lower_success_rate() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let history = vec![
            backup(now - chrono::Duration::days(1), BackupStatus::Completed),
            backup(now - chrono::Duration::days(2), BackupStatus::Failed),
            backup(now - chrono::Duration::days(3), BackupStatus::Completed),
            backup(now - chrono::Duration::days(4), BackupStatus::Failed),
        ];
        let score = score_at(history, now);
        assert_eq!(score.success_rate, 25.0);
        assert!(score
            .recommendations
            .iter()
            .any(|r| r.contains("failed")));
    }

    #[test]
    fn test_recency_decays_to_zero_after_a_week() {
        let now = Utc.with_ymd_and_hms(2025, 6, 20, 0, 0, 0).unwrap();
        let history = vec![
            backup(now - chrono::Duration::days(10), BackupStatus::Completed),
            backup(now - chrono::Duration::days(12), BackupStatus::Completed),
        ];
        let score = score_at(history, now);
        assert_eq!(score.recency_score, 0.0);
        assert!(score
            .recommendations
            .iter()
            .any(|r| r.contains("more than a week old")));
    }

    #[test]
    fn test_single_backup_has_no_consistency_signal() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let history = vec![backup(now - chrono::Duration::hours(2), BackupStatus::Completed)];
        let score = score_at(history, now);
        assert_eq!(score.consistency_score, 0.0);
        assert!(score
            .recommendations
            .iter()
            .any(|r| r.contains("judge consistency")));
    }

    #[test]
    fn test_irregular_intervals_score_low() {
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 0, 0, 0).unwrap();
        // Gaps of 1, 12 and 1 days: wildly uneven.
        let history = vec![
            backup(now - chrono::Duration::days(1), BackupStatus::Completed),
            backup(now - chrono::Duration::days(2), BackupStatus::Completed),
            backup(now - chrono::Duration::days(14), BackupStatus::Completed),
            backup(now - chrono::Duration::days(15), BackupStatus::Completed),
        ];
        let score = score_at(history, now);
        assert!(score.consistency_score < 10.0);
        assert!(score
            .recommendations
            .iter()
            .any(|r| r.contains("irregular")));
    }

    #[test]
    fn test_score_always_within_bounds() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let histories = vec![
            Vec::new(),
            vec![backup(now, BackupStatus::Failed)],
            vec![
                backup(now, BackupStatus::Completed),
                backup(now, BackupStatus::Completed),
            ],
            (0..40)
                .map(|i| backup(now - chrono::Duration::hours(i * 7), BackupStatus::Completed))
                .collect(),
        ];
        for history in histories {
            let score = score_at(history, now);
            assert!(score.total_score >= 0.0 && score.total_score <= 100.0);
            assert!(score.success_rate >= 0.0 && score.success_rate <= 50.0);
            assert!(score.recency_score >= 0.0 && score.recency_score <= 30.0);
            assert!(score.consistency_score >= 0.0 && score.consistency_score <= 20.0);
        }
    }
}
