//! Persisted metadata describing one backup.
//!
//! Every artifact gets one JSON sidecar built from [`BackupMetadata`]. The
//! sidecar is the only durable record of a backup: listing, retention and
//! health scoring all operate on these records, never on the artifact bytes.

use crate::compress::Compression;
use crate::error::{Error, Result};
use crate::utils::format_bytes;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sidecar schema version written by this tool.
pub const METADATA_VERSION: &str = "1.0";

/// Tool name recorded in the `tool` block of every sidecar.
pub const TOOL_NAME: &str = "cadangkan";

const BACKUP_ID_FORMAT: &str = "%Y-%m-%d-%H%M%S";

/// Timestamp-derived backup identifier (`YYYY-MM-DD-HHMMSS`).
///
/// Second resolution, chosen so that lexicographic order equals
/// chronological order. The identifier doubles as the filename stem of both
/// the artifact and its sidecar.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BackupId(DateTime<Utc>);

impl BackupId {
    /// Identifier for a backup starting now.
    pub fn now() -> Self {
        Self::from_timestamp(Utc::now())
    }

    /// Identifier for a backup started at the given instant. Sub-second
    /// precision is dropped so the id round-trips through its string form.
    pub fn from_timestamp(at: DateTime<Utc>) -> Self {
        let truncated = Utc
            .timestamp_opt(at.timestamp(), 0)
            .single()
            .unwrap_or(at);
        Self(truncated)
    }

    /// The instant this identifier encodes.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.0
    }
}

impl fmt::Display for BackupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(BACKUP_ID_FORMAT))
    }
}

impl FromStr for BackupId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let naive = chrono::NaiveDateTime::parse_from_str(s, BACKUP_ID_FORMAT)
            .map_err(|e| Error::Validation(format!("Invalid backup id '{s}': {e}")))?;
        Ok(Self(Utc.from_utc_datetime(&naive)))
    }
}

/// Lifecycle state of a backup.
///
/// A record is created as `running` before the dump starts and flips to
/// `completed` or `failed` exactly once at the end of the pipeline. Sidecars
/// written by old versions may omit the field entirely; those count as
/// completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    Running,
    #[default]
    Completed,
    Failed,
}

/// The `database` block: where the dump came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceInfo {
    /// Engine type, always `mysql` for now.
    #[serde(rename = "type")]
    pub kind: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    /// Server version string, empty when the source was not reachable.
    #[serde(default)]
    pub version: String,
}

/// The `backup` block: the artifact on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactInfo {
    /// Artifact filename (not a full path; the directory is derived from
    /// the storage root and database name).
    pub file: String,
    pub size_bytes: u64,
    pub size_human: String,
    /// Codec the artifact was written with. Sidecars predating this field
    /// were always gzip.
    #[serde(default = "default_compression")]
    pub compression: Compression,
    /// `sha256:<hex>` over the stored (compressed) bytes, empty while the
    /// backup is still running.
    #[serde(default)]
    pub checksum: String,
}

fn default_compression() -> Compression {
    Compression::Gzip
}

/// The `options` block: what was requested.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupOptionsInfo {
    #[serde(default)]
    pub schema_only: bool,
    #[serde(default)]
    pub tables: Vec<String>,
    #[serde(default)]
    pub exclude_tables: Vec<String>,
}

/// The `tool` block: provenance of the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub version: String,
    /// Output of `mysqldump --version`, empty if it could not be queried.
    #[serde(default)]
    pub mysqldump_version: String,
}

impl Default for ToolInfo {
    fn default() -> Self {
        Self {
            name: TOOL_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            mysqldump_version: String::new(),
        }
    }
}

/// One backup's persisted metadata record.
///
/// Invariants: `status == failed` implies `error` is set and `completed_at`
/// is stamped; `status == completed` implies a non-empty checksum and an
/// artifact on disk next to the sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub version: String,
    pub backup_id: String,
    pub database: SourceInfo,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_seconds: f64,
    #[serde(default)]
    pub status: BackupStatus,
    pub backup: ArtifactInfo,
    #[serde(default)]
    pub options: BackupOptionsInfo,
    #[serde(default)]
    pub tool: ToolInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BackupMetadata {
    /// Initial `running` record, created before the dump starts.
    pub fn begin(
        id: &BackupId,
        source: SourceInfo,
        artifact_file: String,
        compression: Compression,
        options: BackupOptionsInfo,
    ) -> Self {
        Self {
            version: METADATA_VERSION.to_string(),
            backup_id: id.to_string(),
            database: source,
            created_at: id.timestamp(),
            completed_at: None,
            duration_seconds: 0.0,
            status: BackupStatus::Running,
            backup: ArtifactInfo {
                file: artifact_file,
                size_bytes: 0,
                size_human: format_bytes(0),
                compression,
                checksum: String::new(),
            },
            options,
            tool: ToolInfo::default(),
            error: None,
        }
    }

    /// Stamp the record as completed. Called exactly once, at the end of a
    /// successful pipeline run.
    pub fn complete(&mut self, size_bytes: u64, checksum: String, completed_at: DateTime<Utc>) {
        self.status = BackupStatus::Completed;
        self.completed_at = Some(completed_at);
        self.duration_seconds = duration_secs(self.created_at, completed_at);
        self.backup.size_bytes = size_bytes;
        self.backup.size_human = format_bytes(size_bytes);
        self.backup.checksum = checksum;
        self.error = None;
    }

    /// Stamp the record as failed with the captured error text.
    pub fn fail(&mut self, error: String, completed_at: DateTime<Utc>) {
        self.status = BackupStatus::Failed;
        self.completed_at = Some(completed_at);
        self.duration_seconds = duration_secs(self.created_at, completed_at);
        self.error = Some(error);
    }
}

fn duration_secs(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from)
        .to_std()
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
