//! cadangkan-core - lifecycle management for MySQL backup artifacts.
//!
//! Creating, verifying, restoring and pruning logical dumps of MySQL
//! databases on a local filesystem tree, with JSON sidecar metadata, a
//! calendar-bucket retention policy and a composite health score over the
//! backup history.

pub mod backup;
pub mod compress;
pub mod config;
pub mod error;
pub mod health;
pub mod metadata;
pub mod restore;
pub mod retention;
pub mod source;
pub mod storage;
pub mod utils;

pub use backup::{ActiveBackups, BackupOptions, BackupPipeline};
pub use compress::{Compression, CompressionEngine};
pub use config::{Config, ConnectionConfig, ToolConfig};
pub use error::{Error, Result};
pub use health::{HealthScore, HealthStatus};
pub use metadata::{BackupId, BackupMetadata, BackupStatus};
pub use restore::{RestoreOptions, RestoreOutcome, RestorePipeline};
pub use retention::{RetentionBucket, RetentionEngine, RetentionPolicy};
pub use source::{MysqlSource, SourceDatabase};
pub use storage::Storage;
