//! Restore pipeline: locate a backup, verify it, reverse the compression
//! and stream the logical dump into the external load utility.
//!
//! Validation (resolution, artifact existence, checksum) happens before any
//! destructive action; the external load process is only started once every
//! check has passed. A dry run stops exactly at that boundary.

use crate::backup::{ActiveBackups, BackupOptions, BackupPipeline};
use crate::compress::{hash_file, CompressionEngine};
use crate::config::{ConnectionConfig, ToolConfig};
use crate::error::{Error, Result};
use crate::metadata::{BackupMetadata, BackupStatus};
use crate::source::{MysqlSource, SourceDatabase};
use crate::storage::Storage;
use crate::utils::{format_duration, mask_command};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    /// Specific backup to restore; defaults to the newest completed one.
    pub backup_id: Option<String>,
    /// Database to restore into; defaults to the original source database.
    pub target: Option<String>,
    /// Create the target database when it does not exist.
    pub create_database: bool,
    /// Validate everything but do not touch the target.
    pub dry_run: bool,
    /// Back up the target database before overwriting it.
    pub backup_target_first: bool,
}

#[derive(Debug)]
pub struct RestoreOutcome {
    pub backup_id: String,
    pub source_database: String,
    pub target_database: String,
    pub duration: Duration,
    pub dry_run: bool,
}

pub struct RestorePipeline<S> {
    storage: Storage,
    conn: ConnectionConfig,
    database: String,
    source: S,
    tools: ToolConfig,
    active: ActiveBackups,
    load_timeout: Duration,
}

impl<S: SourceDatabase + Clone> RestorePipeline<S> {
    pub fn new(
        storage: Storage,
        conn: ConnectionConfig,
        database: String,
        source: S,
        tools: ToolConfig,
        active: ActiveBackups,
    ) -> Self {
        let load_timeout = conn.subprocess_timeout();
        Self {
            storage,
            conn,
            database,
            source,
            tools,
            active,
            load_timeout,
        }
    }

    /// Override the load subprocess bound (defaults to the connection
    /// timeout scaled to 30 minutes).
    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = timeout;
        self
    }

    /// Run one restore end to end.
    pub async fn run(&self, options: &RestoreOptions) -> Result<RestoreOutcome> {
        let started = Instant::now();

        let (meta, artifact) = self.resolve_and_verify(options.backup_id.as_deref()).await?;
        let target = options
            .target
            .clone()
            .unwrap_or_else(|| self.database.clone());

        let target_exists = self.source.database_exists(&target).await?;
        if !target_exists && !options.create_database {
            return Err(Error::Restore(format!(
                "Target database '{target}' does not exist; enable create-database to create it"
            )));
        }

        if options.dry_run {
            tracing::info!(
                backup_id = %meta.backup_id,
                target = %target,
                "Dry run: backup verified, restore would succeed"
            );
            return Ok(RestoreOutcome {
                backup_id: meta.backup_id.clone(),
                source_database: self.database.clone(),
                target_database: target,
                duration: started.elapsed(),
                dry_run: true,
            });
        }

        if !target_exists {
            self.source.create_database(&target).await?;
        } else if options.backup_target_first {
            tracing::info!(target = %target, "Backing up target before overwriting");
            let safety = BackupPipeline::new(
                self.storage.clone(),
                self.conn.clone(),
                target.clone(),
                self.source.clone(),
                self.tools.clone(),
                self.active.clone(),
            );
            safety.run(&BackupOptions::default()).await?;
        }

        let engine = CompressionEngine::new(meta.backup.compression)?;
        self.load(&engine, &artifact, &target).await?;

        let duration = started.elapsed();
        tracing::info!(
            backup_id = %meta.backup_id,
            source = %self.database,
            target = %target,
            duration = %format_duration(duration.as_secs()),
            "Restore completed"
        );

        Ok(RestoreOutcome {
            backup_id: meta.backup_id.clone(),
            source_database: self.database.clone(),
            target_database: target,
            duration,
            dry_run: false,
        })
    }

    /// Standalone artifact verification: checksum plus a full decompression
    /// walk, touching no database.
    pub async fn verify(&self, backup_id: Option<&str>) -> Result<BackupMetadata> {
        let (meta, artifact) = self.resolve_and_verify(backup_id).await?;

        let engine = CompressionEngine::new(meta.backup.compression)?;
        let mut reader = engine.open_decompressed(&artifact).await?;
        let mut sink = tokio::io::sink();
        tokio::io::copy(&mut reader, &mut sink)
            .await
            .map_err(|e| Error::Compression(format!("Artifact does not decompress: {e}")))?;

        Ok(meta)
    }

    /// Steps shared by restore and verify: pick the metadata record, check
    /// the artifact exists, recompute and compare the checksum.
    async fn resolve_and_verify(
        &self,
        backup_id: Option<&str>,
    ) -> Result<(BackupMetadata, PathBuf)> {
        let backups = self.storage.list_backups(&self.database)?;

        let meta = match backup_id {
            Some(id) => backups
                .iter()
                .find(|b| b.backup_id == id)
                .cloned()
                .ok_or_else(|| Error::BackupNotFound {
                    database: self.database.clone(),
                    backup_id: Some(id.to_string()),
                })?,
            None => backups
                .iter()
                .find(|b| b.status == BackupStatus::Completed)
                .cloned()
                .ok_or_else(|| Error::BackupNotFound {
                    database: self.database.clone(),
                    backup_id: None,
                })?,
        };

        // Metadata/artifact divergence is a first-class condition, not a
        // generic I/O error.
        let artifact = self.storage.database_dir(&self.database).join(&meta.backup.file);
        if !artifact.exists() {
            return Err(Error::BackupNotFound {
                database: self.database.clone(),
                backup_id: Some(meta.backup_id.clone()),
            });
        }

        if !meta.backup.checksum.is_empty() {
            let actual = hash_file(&artifact).await?;
            if actual != meta.backup.checksum {
                return Err(Error::ChecksumMismatch {
                    expected: meta.backup.checksum.clone(),
                    actual,
                });
            }
        }

        Ok((meta, artifact))
    }

    async fn load(&self, engine: &CompressionEngine, artifact: &Path, target: &str) -> Result<()> {
        let mut args = MysqlSource::connection_args(&self.conn);
        args.push(target.to_string());
        let program = self.tools.mysql.to_string_lossy().to_string();
        tracing::debug!(command = %mask_command(&program, &args), "Running load");

        let mut child = Command::new(&self.tools.mysql)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Restore(format!("Cannot run {program}: {e}")))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Restore("Failed to open load stdin".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Restore("Failed to capture load stderr".to_string()))?;

        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            buf
        });

        let mut reader = engine.open_decompressed(artifact).await?;

        let result = tokio::time::timeout(self.load_timeout, async {
            tokio::io::copy(&mut reader, &mut stdin)
                .await
                .map_err(|e| Error::Restore(format!("Failed streaming dump into {program}: {e}")))?;
            stdin
                .shutdown()
                .await
                .map_err(|e| Error::Restore(format!("Failed closing {program} stdin: {e}")))?;
            drop(stdin);
            child
                .wait()
                .await
                .map_err(|e| Error::Restore(format!("Failed to wait for {program}: {e}")))
        })
        .await;

        let status = match result {
            Ok(inner) => inner?,
            Err(_) => {
                child.start_kill().ok();
                let _ = child.wait().await;
                stderr_task.abort();
                return Err(Error::Restore(format!(
                    "{program} timed out after {}",
                    format_duration(self.load_timeout.as_secs())
                )));
            }
        };

        if !status.success() {
            let stderr_buf = stderr_task.await.unwrap_or_default();
            let stderr_text = String::from_utf8_lossy(&stderr_buf);
            return Err(Error::Restore(format!(
                "{program} exited with {status}: {}",
                stderr_text.trim()
            )));
        }

        Ok(())
    }
}
