//! Subcommand implementations: thin wiring from the parsed CLI onto the
//! core pipelines, plus human-readable output.

use anyhow::Result;
use cadangkan_core::utils::{format_bytes, format_duration};
use cadangkan_core::{
    health, ActiveBackups, BackupOptions, BackupPipeline, Compression, Config, MysqlSource,
    RestoreOptions, RestorePipeline, RetentionBucket, RetentionEngine,
};

fn backup_pipeline(
    config: &Config,
    profile: &str,
    active: ActiveBackups,
) -> Result<BackupPipeline<MysqlSource>> {
    let (conn, database) = config.profile(profile)?;
    let source = MysqlSource::new(conn.clone(), &config.tools);
    Ok(BackupPipeline::new(
        config.storage(),
        conn,
        database,
        source,
        config.tools.clone(),
        active,
    ))
}

fn restore_pipeline(
    config: &Config,
    profile: &str,
    active: ActiveBackups,
) -> Result<RestorePipeline<MysqlSource>> {
    let (conn, database) = config.profile(profile)?;
    let source = MysqlSource::new(conn.clone(), &config.tools);
    Ok(RestorePipeline::new(
        config.storage(),
        conn,
        database,
        source,
        config.tools.clone(),
        active,
    ))
}

pub async fn backup(
    config: &Config,
    profile: &str,
    schema_only: bool,
    tables: Vec<String>,
    exclude_tables: Vec<String>,
    compression: Option<&str>,
) -> Result<()> {
    let compression = match compression {
        Some(codec) => codec.parse::<Compression>()?,
        None => config.compression,
    };
    let options = BackupOptions {
        schema_only,
        tables,
        exclude_tables,
        compression,
    };

    let pipeline = backup_pipeline(config, profile, ActiveBackups::new())?;
    let meta = pipeline.run(&options).await?;

    println!("Backup created: {}", meta.backup_id);
    println!("  database:    {}", meta.database.database);
    println!("  file:        {}", meta.backup.file);
    println!("  size:        {}", meta.backup.size_human);
    println!("  checksum:    {}", meta.backup.checksum);
    println!(
        "  duration:    {}",
        format_duration(meta.duration_seconds as u64)
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn restore(
    config: &Config,
    profile: &str,
    backup_id: Option<String>,
    target: Option<String>,
    create_database: bool,
    dry_run: bool,
    backup_first: bool,
) -> Result<()> {
    let options = RestoreOptions {
        backup_id,
        target,
        create_database,
        dry_run,
        backup_target_first: backup_first,
    };

    let pipeline = restore_pipeline(config, profile, ActiveBackups::new())?;
    let outcome = pipeline.run(&options).await?;

    if outcome.dry_run {
        println!(
            "Dry run: backup {} of '{}' would restore into '{}'",
            outcome.backup_id, outcome.source_database, outcome.target_database
        );
    } else {
        println!(
            "Restored backup {} of '{}' into '{}' in {}",
            outcome.backup_id,
            outcome.source_database,
            outcome.target_database,
            format_duration(outcome.duration.as_secs())
        );
    }
    Ok(())
}

pub fn list(config: &Config, profile: &str) -> Result<()> {
    let (_, database) = config.profile(profile)?;
    let backups = config.storage().list_backups(&database)?;

    if backups.is_empty() {
        println!("No backups for '{database}'");
        return Ok(());
    }

    println!(
        "{:<19} {:<10} {:>10}  {:<6} {}",
        "BACKUP ID", "STATUS", "SIZE", "CODEC", "CREATED"
    );
    for meta in backups {
        println!(
            "{:<19} {:<10} {:>10}  {:<6} {}",
            meta.backup_id,
            format!("{:?}", meta.status).to_lowercase(),
            meta.backup.size_human,
            meta.backup.compression.to_string(),
            meta.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    Ok(())
}

pub fn health(config: &Config, profile: &str) -> Result<()> {
    let (_, database) = config.profile(profile)?;
    let backups = config.storage().list_backups(&database)?;
    let score = health::score(backups);

    println!("Backup health for '{database}': {}", score.status);
    println!("  success rate: {:>5.1} / 50", score.success_rate);
    println!("  recency:      {:>5.1} / 30", score.recency_score);
    println!("  consistency:  {:>5.1} / 20", score.consistency_score);
    println!("  total:        {:>5.1} / 100", score.total_score);
    if !score.recommendations.is_empty() {
        println!("Recommendations:");
        for rec in &score.recommendations {
            println!("  - {rec}");
        }
    }
    Ok(())
}

pub fn prune(config: &Config, profile: &str, dry_run: bool) -> Result<()> {
    let (_, database) = config.profile(profile)?;
    let storage = config.storage();
    let engine = RetentionEngine::new(&storage);
    let report = engine.apply(&database, &config.retention, dry_run)?;

    let count = |bucket| {
        report
            .categorized
            .iter()
            .filter(|c| c.bucket == bucket)
            .count()
    };
    println!(
        "Retention for '{database}': {} daily, {} weekly, {} monthly, {} kept, {} to delete",
        count(RetentionBucket::Daily),
        count(RetentionBucket::Weekly),
        count(RetentionBucket::Monthly),
        count(RetentionBucket::Keep),
        report.delete_count(),
    );

    if dry_run {
        println!(
            "Dry run: would reclaim {}",
            format_bytes(report.reclaimed_bytes)
        );
        for entry in &report.categorized {
            if entry.bucket == RetentionBucket::Delete {
                println!("  would delete {}", entry.metadata.backup_id);
            }
        }
    } else if report.deleted.is_empty() {
        println!("Nothing to delete");
    } else {
        println!(
            "Deleted {} backups, reclaimed {}",
            report.deleted.len(),
            format_bytes(report.reclaimed_bytes)
        );
    }
    Ok(())
}

pub async fn verify(config: &Config, profile: &str, backup_id: Option<&str>) -> Result<()> {
    let pipeline = restore_pipeline(config, profile, ActiveBackups::new())?;
    let meta = pipeline.verify(backup_id).await?;
    println!(
        "Backup {} verified: checksum and {} stream are intact ({})",
        meta.backup_id, meta.backup.compression, meta.backup.size_human
    );
    Ok(())
}

/// One scheduled run: backup, then retention. Used by the cron scheduler,
/// which shares a single [`ActiveBackups`] registry across all schedules.
pub async fn scheduled_run(config: &Config, profile: &str, active: ActiveBackups) -> Result<()> {
    let pipeline = backup_pipeline(config, profile, active)?;
    let options = BackupOptions {
        compression: config.compression,
        ..BackupOptions::default()
    };
    let meta = pipeline.run(&options).await?;
    tracing::info!(
        profile,
        backup_id = %meta.backup_id,
        size = %meta.backup.size_human,
        "Scheduled backup completed"
    );

    // Retention runs only after the new backup's metadata is durable.
    let (_, database) = config.profile(profile)?;
    let storage = config.storage();
    let report = RetentionEngine::new(&storage).apply(&database, &config.retention, false)?;
    if !report.deleted.is_empty() {
        tracing::info!(
            profile,
            deleted = report.deleted.len(),
            reclaimed = %format_bytes(report.reclaimed_bytes),
            "Retention pass after scheduled backup"
        );
    }
    Ok(())
}
