// src/models.rs

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

// --- HOST DOCUMENT MODELS ---
// These are deserialized from the `DBMSInstances` and `Services` sections of
// the merged (and already evaluated) host document.

/// One entry of the host's `DBMSInstances` map.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DbmsInstanceConfig {
    /// Name of the backend driving this instance (e.g. `SqlServer`).
    pub package: Option<String>,
    pub backup_path: Option<PathBuf>,
    pub data_path: Option<PathBuf>,
    /// Username -> secret. The first entry (by name) is used to connect.
    #[serde(default)]
    pub accounts: BTreeMap<String, String>,
    /// Explicit server address, when it cannot be derived from host and instance name.
    pub server: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One entry of the host's `Services` map.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    /// Name of the DBMS instance this service runs on.
    pub instance: Option<String>,
    #[serde(default)]
    pub databases: Vec<String>,
    #[serde(default)]
    pub hidden: bool,
    /// Workload name -> ordered list of tasks.
    #[serde(default)]
    pub workloads: BTreeMap<String, Vec<Value>>,
    /// Arbitrary per-service data, reachable through `Config::service_var`.
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

/// A workload task once flattened across all services.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadTask {
    pub service: String,
    /// The explicit sort key, when the task carries an `order` key.
    pub order: Option<String>,
    pub task: Value,
}

impl WorkloadTask {
    /// The key used to sort tasks of a workload: `order`, else the owning service name.
    pub fn sort_key(&self) -> &str {
        self.order.as_deref().unwrap_or(&self.service)
    }

    /// Numeric keys come first and compare as numbers (`9` before `10`);
    /// the other keys follow in text order.
    pub fn cmp_sort_key(&self, other: &Self) -> Ordering {
        let (a, b) = (self.sort_key(), other.sort_key());
        match (a.parse::<i64>(), b.parse::<i64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            (Ok(_), Err(_)) => Ordering::Less,
            (Err(_), Ok(_)) => Ordering::Greater,
            (Err(_), Err(_)) => a.cmp(b),
        }
    }
}

/// A fully resolved DBMS instance, as handed to the backends.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Instance {
    pub name: String,
    /// The host this instance is declared on.
    pub host: String,
    pub package: Option<String>,
    pub backup_path: Option<PathBuf>,
    pub data_path: Option<PathBuf>,
    pub accounts: BTreeMap<String, String>,
    pub server: Option<String>,
}

impl Instance {
    pub fn from_config(name: &str, host: &str, config: &DbmsInstanceConfig) -> Self {
        Self {
            name: name.to_string(),
            host: host.to_string(),
            package: config.package.clone(),
            backup_path: config.backup_path.clone(),
            data_path: config.data_path.clone(),
            accounts: config.accounts.clone(),
            server: config.server.clone(),
        }
    }

    /// The first declared account, if any.
    pub fn account(&self) -> Option<(&str, &str)> {
        self.accounts
            .iter()
            .next()
            .map(|(user, secret)| (user.as_str(), secret.as_str()))
    }
}

// --- DBMS OPERATION MODELS ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackupMode {
    #[default]
    Full,
    Diff,
}

impl fmt::Display for BackupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Diff => write!(f, "diff"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BackupRequest {
    pub database: String,
    /// Target file; computed from the default naming policy when `None`.
    pub output: Option<PathBuf>,
    pub mode: BackupMode,
    pub compress: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackupOutcome {
    pub status: bool,
    pub output: Option<PathBuf>,
}

/// A restore always starts from a full backup; `diff` is applied last.
#[derive(Debug, Clone, Default)]
pub struct RestoreRequest {
    pub database: String,
    pub full: PathBuf,
    pub diff: Option<PathBuf>,
    pub verify_only: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqlOptions {
    /// Render the result as a table on stdout.
    pub tabular: bool,
    /// Keep every result set instead of the first one only.
    pub multiple: bool,
    /// Render the result as JSON on stdout.
    pub json: bool,
    /// Keep the column names.
    pub columns: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ResultSet {
    /// Rows as JSON objects keyed by column name; columns are named `c<n>` when unknown.
    pub fn to_json(&self) -> Value {
        let rows = self
            .rows
            .iter()
            .map(|row| {
                let mut object = Map::new();
                for (i, cell) in row.iter().enumerate() {
                    let key = self
                        .columns
                        .get(i)
                        .cloned()
                        .unwrap_or_else(|| format!("c{}", i));
                    object.insert(key, Value::String(cell.clone()));
                }
                Value::Object(object)
            })
            .collect();
        Value::Array(rows)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlResult {
    pub ok: bool,
    pub sets: Vec<ResultSet>,
}

impl SqlResult {
    pub fn failed() -> Self {
        Self {
            ok: false,
            sets: Vec::new(),
        }
    }

    /// Rows of the first result set.
    pub fn rows(&self) -> &[Vec<String>] {
        self.sets.first().map(|s| s.rows.as_slice()).unwrap_or(&[])
    }
}

// --- SITE SETTINGS ---
// The subset of the merged document the runtime itself relies on.

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SiteSettings {
    #[serde(default)]
    pub logs: LogsSettings,
    #[serde(default)]
    pub messages: MessagesSettings,
    #[serde(default)]
    pub execution_reports: ReportsSettings,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogsSettings {
    pub root_dir: Option<PathBuf>,
    #[serde(default)]
    pub with_verbose: bool,
    #[serde(default = "default_true")]
    pub with_info: bool,
}

impl Default for LogsSettings {
    fn default() -> Self {
        Self {
            root_dir: None,
            with_verbose: false,
            with_info: true,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessagesSettings {
    pub colored: Option<bool>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReportsSettings {
    pub with_file: Option<FileReportSettings>,
    pub with_mqtt: Option<MqttReportSettings>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileReportSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub drop_dir: Option<PathBuf>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MqttReportSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Command line run to publish, with `<TOPIC>` and `<PAYLOAD>` placeholders.
    pub command: Option<String>,
    pub exclude_properties: Option<Vec<String>>,
}

// --- DAEMON CONFIGURATION ---

/// The JSON document a daemon is started with.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DaemonConfig {
    pub listening_port: u16,
    /// Pause between two polls, in milliseconds.
    pub listening_interval: Option<u64>,
    pub name: Option<String>,
    /// Program to spawn for `daemon start`; the daemon runs in-process when absent.
    pub exec_path: Option<PathBuf>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_true() -> bool {
    true
}
