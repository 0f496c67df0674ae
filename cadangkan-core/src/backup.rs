//! Backup pipeline: pre-flight checks, external dump, compression and
//! metadata persistence, with guaranteed cleanup on any failure.
//!
//! The dump subprocess's stdout is streamed through the compression engine
//! directly into the artifact path; there is no intermediate temp file. On
//! any failure the half-written artifact is removed (best effort) and a
//! `failed` sidecar is persisted so the history shows the attempt.

use crate::compress::{Compression, CompressionEngine, StreamStats};
use crate::config::{ConnectionConfig, ToolConfig};
use crate::error::{Error, Result};
use crate::metadata::{BackupId, BackupMetadata, BackupOptionsInfo, SourceInfo};
use crate::source::{MysqlSource, SourceDatabase};
use crate::storage::Storage;
use crate::utils::{format_bytes, format_duration, mask_command};
use chrono::Utc;
use std::collections::HashSet;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// Assumed artifact size when the source cannot provide a live estimate.
const FALLBACK_ESTIMATE: u64 = 1024 * 1024 * 1024; // 1 GiB

/// Empirical compression ratio of gzip on logical SQL dumps.
const GZIP_RATIO: f64 = 0.35;

/// Substrings that mark a dump as broken even when mysqldump exits 0, e.g.
/// a permission problem that silently degrades the dump to schema only.
/// Matched case-insensitively against each stderr line.
const PROBLEM_PATTERNS: &[&str] = &[
    "access denied",
    "error",
    "cannot",
    "denied",
    "unknown database",
    "got errno",
];

/// Scan the dump utility's diagnostic output for known problem markers.
/// Returns the first offending line.
pub fn scan_dump_diagnostics(stderr: &str) -> Option<&str> {
    stderr.lines().find(|line| {
        let lower = line.to_lowercase();
        PROBLEM_PATTERNS.iter().any(|p| lower.contains(p))
    })
}

/// In-process registry of databases with a backup mid-flight. Two
/// concurrent backups of the same database would race on the same artifact
/// path, so the second attempt is rejected outright.
#[derive(Debug, Clone, Default)]
pub struct ActiveBackups {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl ActiveBackups {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, database: &str) -> Result<RunGuard> {
        let mut running = self.inner.lock().expect("active-backup registry poisoned");
        if !running.insert(database.to_string()) {
            return Err(Error::BackupInProgress(database.to_string()));
        }
        Ok(RunGuard {
            inner: Arc::clone(&self.inner),
            database: database.to_string(),
        })
    }

    pub fn is_running(&self, database: &str) -> bool {
        self.inner
            .lock()
            .expect("active-backup registry poisoned")
            .contains(database)
    }
}

/// Releases the registry slot when the pipeline run ends, however it ends.
pub struct RunGuard {
    inner: Arc<Mutex<HashSet<String>>>,
    database: String,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Ok(mut running) = self.inner.lock() {
            running.remove(&self.database);
        }
    }
}

/// What to back up and how.
#[derive(Debug, Clone)]
pub struct BackupOptions {
    pub schema_only: bool,
    /// Explicit table include list; mutually exclusive with
    /// `exclude_tables`.
    pub tables: Vec<String>,
    pub exclude_tables: Vec<String>,
    pub compression: Compression,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            schema_only: false,
            tables: Vec::new(),
            exclude_tables: Vec::new(),
            compression: Compression::Gzip,
        }
    }
}

pub struct BackupPipeline<S> {
    storage: Storage,
    conn: ConnectionConfig,
    database: String,
    source: S,
    tools: ToolConfig,
    active: ActiveBackups,
    dump_timeout: Duration,
}

impl<S: SourceDatabase> BackupPipeline<S> {
    pub fn new(
        storage: Storage,
        conn: ConnectionConfig,
        database: String,
        source: S,
        tools: ToolConfig,
        active: ActiveBackups,
    ) -> Self {
        let dump_timeout = conn.subprocess_timeout();
        Self {
            storage,
            conn,
            database,
            source,
            tools,
            active,
            dump_timeout,
        }
    }

    /// Override the dump subprocess bound (defaults to the connection
    /// timeout scaled to 30 minutes).
    pub fn with_dump_timeout(mut self, timeout: Duration) -> Self {
        self.dump_timeout = timeout;
        self
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Run one backup end to end, returning the persisted metadata record.
    pub async fn run(&self, options: &BackupOptions) -> Result<BackupMetadata> {
        self.validate(options)?;
        let engine = CompressionEngine::new(options.compression)?;

        let _guard = self.active.acquire(&self.database)?;

        self.storage.ensure_database_dir(&self.database)?;

        let estimate = self.estimate_artifact_size(options).await;
        let (enough, available) = self.storage.has_enough_space(estimate)?;
        if !enough {
            return Err(Storage::insufficient_space(estimate, available));
        }

        let id = BackupId::now();
        let artifact = self
            .storage
            .artifact_path(&self.database, &id.to_string(), options.compression);
        let mut meta = BackupMetadata::begin(
            &id,
            SourceInfo {
                kind: "mysql".to_string(),
                host: self.conn.host.clone(),
                port: self.conn.port,
                database: self.database.clone(),
                version: String::new(),
            },
            artifact
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            options.compression,
            BackupOptionsInfo {
                schema_only: options.schema_only,
                tables: options.tables.clone(),
                exclude_tables: options.exclude_tables.clone(),
            },
        );

        tracing::info!(
            database = %self.database,
            backup_id = %id,
            compression = %options.compression,
            "Starting backup"
        );

        match self.dump(&engine, &artifact, options).await {
            Ok(stats) => {
                let completed_at = Utc::now();
                meta.complete(stats.bytes_written, stats.checksum, completed_at);
                meta.tool.mysqldump_version = self.dump_tool_version().await;
                if self.source.is_connected().await {
                    if let Ok(version) = self.source.version().await {
                        meta.database.version = version;
                    }
                }

                if let Err(e) = self.storage.save_metadata(&meta) {
                    // An artifact without a sidecar is invisible to every
                    // other component; remove it rather than leak it.
                    self.storage.cleanup_partial_backup(
                        &self.database,
                        &id.to_string(),
                        options.compression,
                    );
                    return Err(e);
                }

                tracing::info!(
                    database = %self.database,
                    backup_id = %id,
                    size = %format_bytes(meta.backup.size_bytes),
                    duration = %format_duration(meta.duration_seconds as u64),
                    "Backup completed"
                );
                Ok(meta)
            }
            Err(err) => {
                tracing::error!(
                    database = %self.database,
                    backup_id = %id,
                    error = %err,
                    "Backup failed, cleaning up"
                );
                self.storage.cleanup_partial_backup(
                    &self.database,
                    &id.to_string(),
                    options.compression,
                );
                meta.fail(err.to_string(), Utc::now());
                if let Err(save_err) = self.storage.save_metadata(&meta) {
                    // Never let bookkeeping mask the original failure.
                    tracing::warn!(
                        database = %self.database,
                        backup_id = %id,
                        error = %save_err,
                        "Could not persist failed-backup record"
                    );
                }
                Err(err)
            }
        }
    }

    fn validate(&self, options: &BackupOptions) -> Result<()> {
        if self.database.is_empty() {
            return Err(Error::Validation("Database name must not be empty".to_string()));
        }
        if !options.tables.is_empty() && !options.exclude_tables.is_empty() {
            return Err(Error::Validation(
                "Table include and exclude lists are mutually exclusive".to_string(),
            ));
        }
        Ok(())
    }

    async fn estimate_artifact_size(&self, options: &BackupOptions) -> u64 {
        if self.source.is_connected().await {
            if let Ok(size) = self.source.database_size(&self.database).await {
                if size > 0 {
                    return match options.compression {
                        Compression::Gzip => (size as f64 * GZIP_RATIO) as u64,
                        _ => size,
                    };
                }
            }
        }
        FALLBACK_ESTIMATE
    }

    fn dump_args(&self, options: &BackupOptions) -> Vec<String> {
        let mut args = MysqlSource::connection_args(&self.conn);
        for flag in [
            "--single-transaction",
            "--quick",
            "--skip-lock-tables",
            "--no-tablespaces",
            "--set-gtid-purged=OFF",
            "--routines",
            "--triggers",
            "--events",
        ] {
            args.push(flag.to_string());
        }
        if options.schema_only {
            args.push("--no-data".to_string());
        }
        args.push(self.database.clone());
        for table in &options.tables {
            args.push(table.clone());
        }
        for table in &options.exclude_tables {
            args.push(format!("--ignore-table={}.{}", self.database, table));
        }
        args
    }

    async fn dump(
        &self,
        engine: &CompressionEngine,
        artifact: &Path,
        options: &BackupOptions,
    ) -> Result<StreamStats> {
        let args = self.dump_args(options);
        let program = self.tools.mysqldump.to_string_lossy().to_string();
        tracing::debug!(command = %mask_command(&program, &args), "Running dump");

        let mut child = Command::new(&self.tools.mysqldump)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Dump {
                message: format!("Cannot run {program}: {e}"),
                exit_code: None,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| Error::Dump {
            message: "Failed to capture dump stdout".to_string(),
            exit_code: None,
        })?;
        let mut stderr = child.stderr.take().ok_or_else(|| Error::Dump {
            message: "Failed to capture dump stderr".to_string(),
            exit_code: None,
        })?;

        // Drain stderr concurrently so a chatty dump cannot dead-lock on a
        // full pipe while we consume stdout.
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            buf
        });

        let result = tokio::time::timeout(self.dump_timeout, async {
            let stats = engine.stream_compress(stdout, artifact).await?;
            let status = child.wait().await.map_err(|e| Error::Dump {
                message: format!("Failed to wait for {program}: {e}"),
                exit_code: None,
            })?;
            Ok::<_, Error>((stats, status))
        })
        .await;

        let (stats, status) = match result {
            Ok(inner) => inner?,
            Err(_) => {
                child.start_kill().ok();
                let _ = child.wait().await;
                stderr_task.abort();
                return Err(Error::Dump {
                    message: format!(
                        "{program} timed out after {}",
                        format_duration(self.dump_timeout.as_secs())
                    ),
                    exit_code: None,
                });
            }
        };

        let stderr_buf = stderr_task.await.unwrap_or_default();
        let stderr_text = String::from_utf8_lossy(&stderr_buf);

        if !status.success() {
            let message = match stderr_text.trim() {
                "" => format!("{program} exited with {status}"),
                text => text.to_string(),
            };
            return Err(Error::Dump {
                message,
                exit_code: status.code(),
            });
        }

        // A zero exit code is not proof of a good dump: mysqldump reports
        // some permission problems on stderr and still exits 0.
        if let Some(problem) = scan_dump_diagnostics(&stderr_text) {
            return Err(Error::Dump {
                message: format!("Dump reported a problem despite exit code 0: {problem}"),
                exit_code: Some(0),
            });
        }

        Ok(stats)
    }

    /// `mysqldump --version` output for tool provenance; best effort.
    async fn dump_tool_version(&self) -> String {
        let output = Command::new(&self.tools.mysqldump)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .await;
        match output {
            Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout)
                .lines()
                .next()
                .unwrap_or_default()
                .trim()
                .to_string(),
            _ => String::new(),
        }
    }
}
