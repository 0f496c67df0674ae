//! Cron-driven scheduled backups.
//!
//! Each config profile may carry a cron expression; the scheduler fires the
//! backup pipeline for it and applies retention afterwards. Profiles for
//! different databases run concurrently; a second firing for a database
//! whose backup is still in flight is skipped.

use crate::commands;
use anyhow::Result;
use cadangkan_core::{ActiveBackups, Config};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};

pub struct BackupScheduler {
    scheduler: Mutex<JobScheduler>,
    config: Arc<Config>,
    active: ActiveBackups,
}

impl BackupScheduler {
    pub async fn new(config: Arc<Config>) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            config,
            active: ActiveBackups::new(),
        })
    }

    pub async fn schedule_profile(&self, profile: &str, cron_expression: &str) -> Result<()> {
        let config = self.config.clone();
        let active = self.active.clone();
        let name = profile.to_string();

        let job = Job::new_async(cron_expression, move |_uuid, _lock| {
            let config = config.clone();
            let active = active.clone();
            let name = name.clone();
            Box::pin(async move {
                let database = match config.profile(&name) {
                    Ok((_, database)) => database,
                    Err(e) => {
                        tracing::error!(profile = %name, error = %e, "Schedule refers to unknown profile");
                        return;
                    }
                };
                if active.is_running(&database) {
                    tracing::warn!(profile = %name, "Skipping scheduled run: backup already in progress");
                    return;
                }

                tracing::info!(profile = %name, "Starting scheduled backup");
                if let Err(e) = commands::scheduled_run(&config, &name, active).await {
                    tracing::error!(profile = %name, error = %e, "Scheduled backup failed");
                }
            })
        })?;

        self.scheduler.lock().await.add(job).await?;
        tracing::info!(profile, cron = %cron_expression, "Backup scheduled");
        Ok(())
    }

    /// Register every profile that carries a cron expression. Returns the
    /// number of schedules installed.
    pub async fn init_schedules(&self) -> Result<usize> {
        let mut count = 0;
        for (name, conn) in &self.config.databases {
            if let Some(cron) = &conn.schedule {
                if cron.is_empty() {
                    continue;
                }
                if let Err(e) = self.schedule_profile(name, cron).await {
                    tracing::error!(profile = %name, cron = %cron, error = %e, "Failed to schedule profile");
                } else {
                    count += 1;
                }
            }
        }
        tracing::info!(count, "Cron schedules initialized");
        Ok(count)
    }

    pub async fn start(&self) -> Result<()> {
        self.scheduler.lock().await.start().await?;
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.scheduler.lock().await.shutdown().await?;
        Ok(())
    }
}

/// Run the scheduler in the foreground until Ctrl-C.
pub async fn run(config: Config) -> Result<()> {
    let scheduler = BackupScheduler::new(Arc::new(config)).await?;
    let count = scheduler.init_schedules().await?;
    if count == 0 {
        anyhow::bail!("No profile in the config file has a schedule");
    }
    scheduler.start().await?;

    tracing::info!("Scheduler running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down scheduler");
    scheduler.shutdown().await?;
    Ok(())
}
