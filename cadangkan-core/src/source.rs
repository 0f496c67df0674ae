//! Source-database collaborator.
//!
//! The pipelines only need a narrow capability set from the database they
//! back up or restore into: connectivity, version, size estimate, existence
//! check and database creation. [`SourceDatabase`] captures exactly that;
//! [`MysqlSource`] implements it by shelling out to the `mysql` client
//! binary, the same external utility the restore pipeline loads through, so
//! the core carries no driver dependency.

use crate::config::{ConnectionConfig, ToolConfig};
use crate::error::{Error, Result};
use crate::utils::mask_command;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

/// Narrow contract the pipelines depend on.
pub trait SourceDatabase {
    fn is_connected(&self) -> impl std::future::Future<Output = bool> + Send;
    fn version(&self) -> impl std::future::Future<Output = Result<String>> + Send;
    fn database_size(&self, name: &str) -> impl std::future::Future<Output = Result<u64>> + Send;
    fn database_exists(&self, name: &str)
        -> impl std::future::Future<Output = Result<bool>> + Send;
    fn create_database(&self, name: &str) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// MySQL implementation backed by the `mysql` client subprocess.
#[derive(Debug, Clone)]
pub struct MysqlSource {
    conn: ConnectionConfig,
    mysql_bin: PathBuf,
}

impl MysqlSource {
    pub fn new(conn: ConnectionConfig, tools: &ToolConfig) -> Self {
        Self {
            conn,
            mysql_bin: tools.mysql.clone(),
        }
    }

    /// Connection arguments shared by every invocation.
    pub fn connection_args(conn: &ConnectionConfig) -> Vec<String> {
        let mut args = vec![
            format!("--host={}", conn.host),
            format!("--port={}", conn.port),
            format!("--user={}", conn.user),
        ];
        if !conn.password.is_empty() {
            args.push(format!("--password={}", conn.password));
        }
        args
    }

    async fn query(&self, sql: &str) -> Result<String> {
        let mut args = Self::connection_args(&self.conn);
        args.push("--batch".to_string());
        args.push("--skip-column-names".to_string());
        args.push(format!("--execute={sql}"));

        let program = self.mysql_bin.to_string_lossy().to_string();
        tracing::debug!(command = %mask_command(&program, &args), "Running introspection query");

        let run = Command::new(&self.mysql_bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output();

        let output = tokio::time::timeout(self.conn.connect_timeout(), run)
            .await
            .map_err(|_| Error::Source(format!("Query timed out after {:?}", self.conn.connect_timeout())))?
            .map_err(|e| Error::Source(format!("Cannot run {program}: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Source(format!(
                "{program} exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl SourceDatabase for MysqlSource {
    async fn is_connected(&self) -> bool {
        self.query("SELECT 1").await.is_ok()
    }

    async fn version(&self) -> Result<String> {
        self.query("SELECT VERSION()").await
    }

    async fn database_size(&self, name: &str) -> Result<u64> {
        let sql = format!(
            "SELECT COALESCE(SUM(data_length + index_length), 0) \
             FROM information_schema.tables WHERE table_schema = '{}'",
            escape_single_quotes(name)
        );
        let out = self.query(&sql).await?;
        out.parse::<u64>()
            .map_err(|_| Error::Source(format!("Unexpected size result '{out}'")))
    }

    async fn database_exists(&self, name: &str) -> Result<bool> {
        let sql = format!(
            "SELECT SCHEMA_NAME FROM information_schema.SCHEMATA WHERE SCHEMA_NAME = '{}'",
            escape_single_quotes(name)
        );
        Ok(!self.query(&sql).await?.is_empty())
    }

    async fn create_database(&self, name: &str) -> Result<()> {
        let sql = format!("CREATE DATABASE `{}`", name.replace('`', "``"));
        self.query(&sql).await?;
        tracing::info!(database = name, "Created database");
        Ok(())
    }
}

fn escape_single_quotes(value: &str) -> String {
    value.replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> ConnectionConfig {
        ConnectionConfig {
            host: "db.internal".to_string(),
            port: 3307,
            user: "backup".to_string(),
            password: "hunter2".to_string(),
            ..ConnectionConfig::default()
        }
    }

    #[test]
    fn test_connection_args_include_password_when_set() {
        let args = MysqlSource::connection_args(&conn());
        assert_eq!(
            args,
            [
                "--host=db.internal",
                "--port=3307",
                "--user=backup",
                "--password=hunter2"
            ]
        );
    }

    #[test]
    fn test_connection_args_omit_empty_password() {
        let mut c = conn();
        c.password = String::new();
        let args = MysqlSource::connection_args(&c);
        assert!(!args.iter().any(|a| a.starts_with("--password")));
    }

    #[test]
    fn test_escape_single_quotes() {
        assert_eq!(escape_single_quotes("it's"), "it''s");
        assert_eq!(escape_single_quotes("plain"), "plain");
    }

    #[cfg(unix)]
    mod with_fake_client {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        fn fake_mysql(dir: &std::path::Path, script: &str) -> std::path::PathBuf {
            let path = dir.join("mysql");
            std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn source_with(bin: std::path::PathBuf) -> MysqlSource {
            MysqlSource {
                conn: conn(),
                mysql_bin: bin,
            }
        }

        #[tokio::test]
        async fn test_version_parses_stdout() {
            let dir = tempfile::tempdir().unwrap();
            let source = source_with(fake_mysql(dir.path(), "echo '8.0.36'"));
            assert_eq!(source.version().await.unwrap(), "8.0.36");
            assert!(source.is_connected().await);
        }

        #[tokio::test]
        async fn test_database_size_parses_number() {
            let dir = tempfile::tempdir().unwrap();
            let source = source_with(fake_mysql(dir.path(), "echo 123456789"));
            assert_eq!(source.database_size("shop").await.unwrap(), 123_456_789);
        }

        #[tokio::test]
        async fn test_database_exists_on_empty_output() {
            let dir = tempfile::tempdir().unwrap();
            let source = source_with(fake_mysql(dir.path(), "true"));
            assert!(!source.database_exists("shop").await.unwrap());
        }

        #[tokio::test]
        async fn test_failing_client_surfaces_stderr() {
            let dir = tempfile::tempdir().unwrap();
            let source = source_with(fake_mysql(
                dir.path(),
                "echo 'ERROR 1045 (28000): Access denied' >&2; exit 1",
            ));
            match source.version().await {
                Err(Error::Source(msg)) => assert!(msg.contains("Access denied")),
                other => panic!("expected Source error, got {other:?}"),
            }
            assert!(!source.is_connected().await);
        }
    }
}
