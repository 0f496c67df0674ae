//! On-disk layout of backup artifacts and their metadata sidecars.
//!
//! Layout: `{root}/{database}/{backup_id}.sql[.gz]` next to
//! `{root}/{database}/{backup_id}.meta.json`. The storage layer is the sole
//! reader/writer of sidecars; pipelines only hold in-memory copies while a
//! backup is being constructed.

use crate::compress::Compression;
use crate::error::{Error, Result};
use crate::metadata::BackupMetadata;
use crate::utils::format_bytes;
use std::path::{Path, PathBuf};

/// Safety margin applied to space estimates: a backup is only attempted when
/// the filesystem has at least 1.2x the estimated artifact size available.
const SPACE_MARGIN: f64 = 1.2;

const METADATA_SUFFIX: &str = ".meta.json";

/// Every artifact extension ever written, used when a sidecar is too damaged
/// to tell us which codec the artifact was stored with.
const KNOWN_EXTENSIONS: &[&str] = &["sql.gz", "sql.zst", "sql"];

#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Default storage root: `~/.cadangkan/backups`.
    pub fn default_root() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".cadangkan").join("backups"))
            .unwrap_or_else(|| PathBuf::from(".cadangkan/backups"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn database_dir(&self, database: &str) -> PathBuf {
        self.root.join(database)
    }

    /// Idempotent creation of the per-database directory.
    pub fn ensure_database_dir(&self, database: &str) -> Result<PathBuf> {
        let dir = self.database_dir(database);
        std::fs::create_dir_all(&dir).map_err(|e| Error::Storage {
            op: "create directory",
            path: dir.clone(),
            source: e,
        })?;
        Ok(dir)
    }

    pub fn artifact_path(&self, database: &str, backup_id: &str, codec: Compression) -> PathBuf {
        self.database_dir(database)
            .join(format!("{backup_id}.{}", codec.extension()))
    }

    pub fn metadata_path(&self, database: &str, backup_id: &str) -> PathBuf {
        self.database_dir(database)
            .join(format!("{backup_id}{METADATA_SUFFIX}"))
    }

    /// Persist a metadata sidecar (pretty-printed JSON).
    pub fn save_metadata(&self, meta: &BackupMetadata) -> Result<()> {
        let path = self.metadata_path(&meta.database.database, &meta.backup_id);
        let json = serde_json::to_string_pretty(meta)?;
        std::fs::write(&path, json).map_err(|e| Error::Storage {
            op: "write",
            path,
            source: e,
        })
    }

    /// Load one sidecar. A missing file is a distinct not-found condition so
    /// callers can tell "no such backup" from a real I/O failure.
    pub fn load_metadata(&self, database: &str, backup_id: &str) -> Result<BackupMetadata> {
        let path = self.metadata_path(database, backup_id);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::MetadataNotFound(path));
            }
            Err(e) => {
                return Err(Error::Storage {
                    op: "read",
                    path,
                    source: e,
                });
            }
        };
        serde_json::from_str(&raw).map_err(|e| Error::Metadata {
            path,
            message: e.to_string(),
        })
    }

    /// List all backups of one database, newest first.
    ///
    /// Tolerant of partial state: sidecars that fail to parse and sidecars
    /// whose artifact has gone missing are skipped (with a warning), not
    /// fatal. A missing database directory simply yields an empty list.
    pub fn list_backups(&self, database: &str) -> Result<Vec<BackupMetadata>> {
        let dir = self.database_dir(database);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::Storage {
                    op: "read directory",
                    path: dir,
                    source: e,
                });
            }
        };

        let mut backups = Vec::new();
        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(backup_id) = name.strip_suffix(METADATA_SUFFIX) else {
                continue;
            };

            let meta = match self.load_metadata(database, backup_id) {
                Ok(meta) => meta,
                Err(e) => {
                    tracing::warn!(database, backup_id, error = %e, "Skipping unreadable sidecar");
                    continue;
                }
            };

            let artifact = dir.join(&meta.backup.file);
            if !artifact.exists() {
                tracing::warn!(
                    database,
                    backup_id,
                    artifact = %artifact.display(),
                    "Skipping sidecar whose artifact is missing"
                );
                continue;
            }

            backups.push(meta);
        }

        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(backups)
    }

    /// Remove an artifact and its sidecar. Either file being already absent
    /// is fine; deletion is idempotent.
    pub fn delete_backup(&self, database: &str, backup_id: &str) -> Result<()> {
        // Prefer the sidecar's own record of the artifact filename; fall
        // back to sweeping every known extension when the sidecar is
        // missing or unreadable.
        match self.load_metadata(database, backup_id) {
            Ok(meta) => {
                let artifact = self.database_dir(database).join(&meta.backup.file);
                remove_if_exists(&artifact)?;
            }
            Err(_) => {
                for ext in KNOWN_EXTENSIONS {
                    let artifact = self.database_dir(database).join(format!("{backup_id}.{ext}"));
                    remove_if_exists(&artifact)?;
                }
            }
        }
        remove_if_exists(&self.metadata_path(database, backup_id))?;
        tracing::info!(database, backup_id, "Deleted backup");
        Ok(())
    }

    /// Best-effort removal of a half-written artifact and sidecar during
    /// failure unwind. Swallows every error: this runs while a more
    /// interesting error is already propagating and must never mask it.
    pub fn cleanup_partial_backup(&self, database: &str, backup_id: &str, codec: Compression) {
        let artifact = self.artifact_path(database, backup_id, codec);
        if let Err(e) = remove_if_exists(&artifact) {
            tracing::warn!(database, backup_id, error = %e, "Failed to clean up partial artifact");
        }
        let sidecar = self.metadata_path(database, backup_id);
        if let Err(e) = remove_if_exists(&sidecar) {
            tracing::warn!(database, backup_id, error = %e, "Failed to clean up partial sidecar");
        }
    }

    /// Available bytes on the filesystem holding the storage root.
    pub fn available_space(&self) -> Result<u64> {
        std::fs::create_dir_all(&self.root).map_err(|e| Error::Storage {
            op: "create directory",
            path: self.root.clone(),
            source: e,
        })?;
        available_bytes(&self.root)
    }

    /// Whether the root filesystem can hold an artifact of the estimated
    /// size plus the safety margin. Returns the available byte count so
    /// callers can report both sides of the comparison.
    pub fn has_enough_space(&self, estimate: u64) -> Result<(bool, u64)> {
        let available = self.available_space()?;
        Ok((available >= required_with_margin(estimate), available))
    }

    /// Build the insufficient-space error for a failed margin check.
    pub fn insufficient_space(estimate: u64, available: u64) -> Error {
        Error::InsufficientSpace {
            needed: format_bytes(required_with_margin(estimate)),
            available: format_bytes(available),
        }
    }
}

/// Estimated size inflated by the safety margin.
pub fn required_with_margin(estimate: u64) -> u64 {
    (estimate as f64 * SPACE_MARGIN) as u64
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Storage {
            op: "remove",
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

#[cfg(unix)]
fn available_bytes(path: &Path) -> Result<u64> {
    let stat = nix::sys::statvfs::statvfs(path).map_err(|e| Error::Storage {
        op: "statvfs",
        path: path.to_path_buf(),
        source: std::io::Error::from(e),
    })?;
    Ok(stat.blocks_available() as u64 * stat.fragment_size() as u64)
}

#[cfg(not(unix))]
fn available_bytes(_path: &Path) -> Result<u64> {
    // No portable free-space query on this platform; report unbounded and
    // let the dump itself fail if the disk fills.
    Ok(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{BackupId, BackupMetadata, BackupOptionsInfo, SourceInfo};
    use tempfile::tempdir;

    fn completed_backup(storage: &Storage, database: &str, id: &str) -> BackupMetadata {
        let backup_id: BackupId = id.parse().unwrap();
        let mut meta = BackupMetadata::begin(
            &backup_id,
            SourceInfo {
                kind: "mysql".to_string(),
                host: "localhost".to_string(),
                port: 3306,
                database: database.to_string(),
                version: String::new(),
            },
            format!("{id}.sql.gz"),
            Compression::Gzip,
            BackupOptionsInfo::default(),
        );
        meta.complete(
            4,
            "sha256:feed".to_string(),
            backup_id.timestamp() + chrono::Duration::seconds(5),
        );

        storage.ensure_database_dir(database).unwrap();
        std::fs::write(
            storage.artifact_path(database, id, Compression::Gzip),
            b"gzip",
        )
        .unwrap();
        storage.save_metadata(&meta).unwrap();
        meta
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let storage = Storage::new(dir.path().to_path_buf());
        let meta = completed_backup(&storage, "shop", "2025-01-01-120000");

        let loaded = storage.load_metadata("shop", "2025-01-01-120000").unwrap();
        assert_eq!(loaded.backup_id, meta.backup_id);
        assert_eq!(loaded.backup.checksum, "sha256:feed");
        assert_eq!(loaded.created_at, meta.created_at);
    }

    #[test]
    fn test_load_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let storage = Storage::new(dir.path().to_path_buf());
        match storage.load_metadata("shop", "2025-01-01-120000") {
            Err(Error::MetadataNotFound(_)) => {}
            other => panic!("expected MetadataNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_list_sorted_newest_first() {
        let dir = tempdir().unwrap();
        let storage = Storage::new(dir.path().to_path_buf());
        completed_backup(&storage, "shop", "2025-01-01-120000");
        completed_backup(&storage, "shop", "2025-01-03-120000");
        completed_backup(&storage, "shop", "2025-01-02-120000");

        let backups = storage.list_backups("shop").unwrap();
        let ids: Vec<_> = backups.iter().map(|b| b.backup_id.as_str()).collect();
        assert_eq!(
            ids,
            ["2025-01-03-120000", "2025-01-02-120000", "2025-01-01-120000"]
        );
    }

    #[test]
    fn test_list_skips_corrupt_sidecar() {
        let dir = tempdir().unwrap();
        let storage = Storage::new(dir.path().to_path_buf());
        completed_backup(&storage, "shop", "2025-01-01-120000");
        std::fs::write(
            storage.metadata_path("shop", "2025-01-02-120000"),
            b"{ not json",
        )
        .unwrap();

        let backups = storage.list_backups("shop").unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].backup_id, "2025-01-01-120000");
    }

    #[test]
    fn test_list_skips_orphaned_sidecar() {
        let dir = tempdir().unwrap();
        let storage = Storage::new(dir.path().to_path_buf());
        completed_backup(&storage, "shop", "2025-01-01-120000");

        // Sidecar present, artifact gone.
        let meta = completed_backup(&storage, "shop", "2025-01-02-120000");
        std::fs::remove_file(
            storage
                .database_dir("shop")
                .join(&meta.backup.file),
        )
        .unwrap();

        let backups = storage.list_backups("shop").unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].backup_id, "2025-01-01-120000");
    }

    #[test]
    fn test_list_missing_directory_is_empty() {
        let dir = tempdir().unwrap();
        let storage = Storage::new(dir.path().to_path_buf());
        assert!(storage.list_backups("nope").unwrap().is_empty());
    }

    #[test]
    fn test_delete_removes_both_and_is_idempotent() {
        let dir = tempdir().unwrap();
        let storage = Storage::new(dir.path().to_path_buf());
        completed_backup(&storage, "shop", "2025-01-01-120000");

        storage.delete_backup("shop", "2025-01-01-120000").unwrap();
        assert!(!storage
            .artifact_path("shop", "2025-01-01-120000", Compression::Gzip)
            .exists());
        assert!(!storage.metadata_path("shop", "2025-01-01-120000").exists());

        // Second delete of the same id is a no-op, not an error.
        storage.delete_backup("shop", "2025-01-01-120000").unwrap();
    }

    #[test]
    fn test_delete_sweeps_when_sidecar_is_gone() {
        let dir = tempdir().unwrap();
        let storage = Storage::new(dir.path().to_path_buf());
        storage.ensure_database_dir("shop").unwrap();
        let artifact = storage.artifact_path("shop", "2025-01-01-120000", Compression::None);
        std::fs::write(&artifact, b"raw dump").unwrap();

        storage.delete_backup("shop", "2025-01-01-120000").unwrap();
        assert!(!artifact.exists());
    }

    #[test]
    fn test_cleanup_partial_swallows_errors() {
        let dir = tempdir().unwrap();
        let storage = Storage::new(dir.path().to_path_buf());
        // Nothing exists; cleanup must not panic or error.
        storage.cleanup_partial_backup("shop", "2025-01-01-120000", Compression::Gzip);
    }

    #[test]
    fn test_space_margin() {
        assert_eq!(required_with_margin(0), 0);
        assert_eq!(required_with_margin(100), 120);
        assert_eq!(required_with_margin(1_000_000), 1_200_000);
    }

    #[test]
    fn test_available_space_reports_nonzero() {
        let dir = tempdir().unwrap();
        let storage = Storage::new(dir.path().join("nested").join("root"));
        assert!(storage.available_space().unwrap() > 0);
    }

    #[test]
    fn test_ensure_database_dir_idempotent() {
        let dir = tempdir().unwrap();
        let storage = Storage::new(dir.path().to_path_buf());
        let first = storage.ensure_database_dir("shop").unwrap();
        let second = storage.ensure_database_dir("shop").unwrap();
        assert_eq!(first, second);
        assert!(first.is_dir());
    }
}
