//! CLI command implementations
//!
//! Each command loads the cluster file, builds a logs table over a local
//! directory and file-backed fetcher, and runs on a fresh tokio runtime.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::logs::{
    decode_key, DirectoryEntry, FileLogFetcher, IdentifierFormat, LogBusinessCard, LogsConfig,
    LogsTable, MemoryDirectory, ServerId, ENTRIES_PER_SERVER,
};
use crate::observability::{Event, Logger};

use super::args::Command;
use super::errors::{CliError, CliResult};
use super::io::write_response;

/// One cluster member in the cluster file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Display name
    pub name: String,

    /// Stable server uuid
    pub server_id: Uuid,

    /// Path of the server's log file
    pub log_path: String,
}

/// Cluster file structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Cluster members (required)
    pub servers: Vec<ServerConfig>,

    /// Entries fetched per server (optional, default 1000)
    #[serde(default = "default_entries_per_server")]
    pub entries_per_server: usize,

    /// Tail poll interval in milliseconds (optional, default 1000)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// "name" or "uuid" (optional, default "name")
    #[serde(default)]
    pub identifier_format: IdentifierFormat,
}

fn default_entries_per_server() -> usize {
    ENTRIES_PER_SERVER
}
fn default_poll_interval_ms() -> u64 {
    1000
}

impl ClusterConfig {
    /// Load the cluster file
    pub fn load(path: &Path) -> CliResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| CliError::Config(format!("Failed to read config: {}", e)))?;

        let config: ClusterConfig = serde_json::from_str(&content)
            .map_err(|e| CliError::Config(format!("Invalid config JSON: {}", e)))?;

        config.validate()?;

        let path_str = path.display().to_string();
        let servers = config.servers.len().to_string();
        Logger::info(
            Event::ConfigLoaded,
            &[("path", path_str.as_str()), ("servers", servers.as_str())],
        );

        Ok(config)
    }

    fn validate(&self) -> CliResult<()> {
        let mut ids = HashSet::new();
        for server in &self.servers {
            if server.name.trim().is_empty() {
                return Err(CliError::Config("Server name must not be empty".into()));
            }
            if server.log_path.is_empty() {
                return Err(CliError::Config(format!(
                    "Server '{}' has no log_path",
                    server.name
                )));
            }
            if !ids.insert(server.server_id) {
                return Err(CliError::Config(format!(
                    "Duplicate server_id: {}",
                    server.server_id
                )));
            }
        }

        self.logs_config()
            .validate()
            .map_err(|e| CliError::Config(e.to_string()))
    }

    /// Table configuration derived from the cluster file
    pub fn logs_config(&self) -> LogsConfig {
        let mut config = LogsConfig::default()
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms))
            .with_identifier_format(self.identifier_format);
        config.entries_per_server = self.entries_per_server;
        config
    }

    /// Build the logs table: every listed server is connected, and its log
    /// card is the path of its log file.
    pub fn build_table(&self) -> CliResult<LogsTable> {
        let directory = MemoryDirectory::new();
        for server in &self.servers {
            directory.connect(DirectoryEntry::server(
                ServerId(server.server_id),
                server.name.clone(),
                LogBusinessCard::new(server.log_path.clone()),
            ));
        }
        LogsTable::new(
            Arc::new(directory),
            Arc::new(FileLogFetcher::new()),
            self.logs_config(),
        )
        .map_err(|e| CliError::Config(e.to_string()))
    }
}

/// Main CLI entry point
///
/// Parses arguments and dispatches to the appropriate command.
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Scan { config } => scan(&config),
        Command::Get { config, key } => get(&config, &key),
        Command::Watch { config } => watch(&config),
    }
}

fn runtime() -> CliResult<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new()
        .map_err(|e| CliError::Io(format!("Failed to create tokio runtime: {}", e)))
}

/// Print every row, oldest first
pub fn scan(config_path: &Path) -> CliResult<()> {
    let config = ClusterConfig::load(config_path)?;
    let rows = runtime()?.block_on(scan_rows(&config))?;
    for row in rows {
        write_response(row)?;
    }
    Ok(())
}

pub(crate) async fn scan_rows(config: &ClusterConfig) -> CliResult<Vec<Value>> {
    let table = config.build_table()?;
    let mut rows = table.read_all_rows(&CancellationToken::new()).await?;
    sort_rows(&mut rows);
    Ok(rows)
}

/// Print one row, or `null` when absent
pub fn get(config_path: &Path, key: &str) -> CliResult<()> {
    let config = ClusterConfig::load(config_path)?;
    let row = runtime()?.block_on(get_row(&config, key))?;
    write_response(row.unwrap_or(Value::Null))
}

pub(crate) async fn get_row(config: &ClusterConfig, key: &str) -> CliResult<Option<Value>> {
    let key: Value = serde_json::from_str(key)
        .map_err(|e| CliError::InvalidKey(format!("Key is not valid JSON: {}", e)))?;
    let table = config.build_table()?;
    Ok(table.read_row(&key, &CancellationToken::new()).await?)
}

/// Print current rows, then every new row until Ctrl-C
pub fn watch(config_path: &Path) -> CliResult<()> {
    let config = ClusterConfig::load(config_path)?;
    runtime()?.block_on(async {
        let table = config.build_table()?;
        let cancel = CancellationToken::new();
        let mut subscription = tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            subscription = table.subscribe(&cancel) => subscription?,
        };

        sort_rows(&mut subscription.initial);
        for row in subscription.initial.drain(..) {
            write_response(row)?;
        }

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                change = subscription.changes.recv() => match change {
                    Some(change) => write_response(serde_json::to_value(&change)?)?,
                    None => break,
                },
            }
        }

        table.shutdown().await;
        Ok(())
    })
}

/// Order rows by primary key: timestamp, then server
fn sort_rows(rows: &mut [Value]) {
    rows.sort_by_cached_key(|row| decode_key(&row["id"]).ok());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::{format_line, LogEntry, LogLevel};
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use tempfile::TempDir;

    fn write_log(dir: &TempDir, name: &str, secs: &[u32]) -> String {
        let path = dir.path().join(format!("{}.log", name));
        let lines: Vec<String> = secs
            .iter()
            .map(|s| {
                format_line(&LogEntry::new(
                    Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, *s).unwrap(),
                    Duration::from_secs(*s as u64),
                    LogLevel::Info,
                    format!("{} {}", name, s),
                ))
            })
            .collect();
        fs::write(&path, lines.join("\n")).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn write_config(dir: &TempDir, config: &Value) -> std::path::PathBuf {
        let path = dir.path().join("clusterlogs.json");
        fs::write(&path, config.to_string()).unwrap();
        path
    }

    #[test]
    fn test_config_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, &json!({"servers": []}));

        let config = ClusterConfig::load(&path).unwrap();
        assert_eq!(config.entries_per_server, 1000);
        assert_eq!(config.poll_interval_ms, 1000);
        assert_eq!(config.identifier_format, IdentifierFormat::Name);
        assert_eq!(config.logs_config(), LogsConfig::default());
    }

    #[test]
    fn test_config_rejects_duplicates_and_zeroes() {
        let dir = TempDir::new().unwrap();
        let id = Uuid::new_v4();
        let dup = json!({"servers": [
            {"name": "a", "server_id": id, "log_path": "/a"},
            {"name": "b", "server_id": id, "log_path": "/b"},
        ]});
        let err = ClusterConfig::load(&write_config(&dir, &dup)).unwrap_err();
        assert!(matches!(err, CliError::Config(_)));

        let zero = json!({"servers": [], "poll_interval_ms": 0});
        assert!(ClusterConfig::load(&write_config(&dir, &zero)).is_err());
    }

    #[test]
    fn test_missing_config_file() {
        let dir = TempDir::new().unwrap();
        let err = ClusterConfig::load(&dir.path().join("absent.json")).unwrap_err();
        assert_eq!(err.code(), "CLUSTERLOGS_CLI_CONFIG_ERROR");
    }

    #[tokio::test]
    async fn test_scan_rows_sorted_across_servers() {
        let dir = TempDir::new().unwrap();
        let config = ClusterConfig {
            servers: vec![
                ServerConfig {
                    name: "alpha".into(),
                    server_id: Uuid::new_v4(),
                    log_path: write_log(&dir, "alpha", &[1, 4]),
                },
                ServerConfig {
                    name: "beta".into(),
                    server_id: Uuid::new_v4(),
                    log_path: write_log(&dir, "beta", &[2, 3]),
                },
            ],
            entries_per_server: 1000,
            poll_interval_ms: 1000,
            identifier_format: IdentifierFormat::Name,
        };

        let rows = scan_rows(&config).await.unwrap();
        let messages: Vec<&str> = rows.iter().map(|r| r["message"].as_str().unwrap()).collect();
        assert_eq!(messages, vec!["alpha 1", "beta 2", "beta 3", "alpha 4"]);
    }

    #[tokio::test]
    async fn test_get_row_and_invalid_key() {
        let dir = TempDir::new().unwrap();
        let server_id = Uuid::new_v4();
        let config = ClusterConfig {
            servers: vec![ServerConfig {
                name: "alpha".into(),
                server_id,
                log_path: write_log(&dir, "alpha", &[1, 2]),
            }],
            entries_per_server: 1000,
            poll_interval_ms: 1000,
            identifier_format: IdentifierFormat::Uuid,
        };

        let key = json!(["2024-03-01T10:00:02.000000000Z", server_id.to_string()]).to_string();
        let row = get_row(&config, &key).await.unwrap().unwrap();
        assert_eq!(row["message"], "alpha 2");
        assert_eq!(row["server"], server_id.to_string());

        let missing = json!(["2024-03-01T10:00:09Z", server_id.to_string()]).to_string();
        assert_eq!(get_row(&config, &missing).await.unwrap(), None);

        let err = get_row(&config, "not json").await.unwrap_err();
        assert!(matches!(err, CliError::InvalidKey(_)));
    }
}
