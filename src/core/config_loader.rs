//! # Config Loader
//!
//! Loads the site document and the host document, merges them (host wins on
//! colliding scalar paths, sibling keys merge), evaluates the `[eval:...]`
//! markers of the merged tree and exposes it through typed views and soft
//! path lookups.
//!
//! Failures are reported through the run's Message Service rather than
//! returned: a missing site document is a warning, a missing or mismatched
//! host document and every invalid section are errors, and loading always
//! goes on so that one run reports every configuration problem at once.
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::constants::{DBMS_INSTANCES_KEY, SERVICES_KEY};
use crate::core::interpolator::{self, lookup};
use crate::core::paths::SitePaths;
use crate::models::{DbmsInstanceConfig, ServiceConfig, SiteSettings, WorkloadTask};
use crate::state::RunContext;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unable to read '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("error parsing JSON in '{path}': {source}")]
    JsonParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("'{path}' must contain a JSON object")]
    NotAnObject { path: String },
    #[error("host configuration '{path}' is keyed by '{found}', expected '{expected}'")]
    HostMismatch {
        path: String,
        found: String,
        expected: String,
    },
    #[error("no host configuration found for '{host}' (searched {searched})")]
    HostNotFound { host: String, searched: String },
}

/// Orchestrates the loading of the configuration cascade for one host.
#[derive(Debug)]
pub struct ConfigLoader<'a> {
    paths: &'a SitePaths,
}

impl<'a> ConfigLoader<'a> {
    pub fn new(paths: &'a SitePaths) -> Self {
        Self { paths }
    }

    /// Loads site and host documents and builds the evaluated configuration.
    pub fn load(&self, ctx: &mut RunContext, hostname: &str) -> Config {
        let site = self.load_site(ctx);
        let host = self.load_host(ctx, hostname);
        Config::from_documents(ctx, hostname, site, host)
    }

    /// Reads the site document. Fails soft: an absent document is a warning
    /// and yields an empty document so that callers proceed with defaults.
    pub fn load_site(&self, ctx: &mut RunContext) -> Value {
        let path = self.paths.site_config_path();
        if !path.exists() {
            ctx.warn(format!(
                "site configuration '{}' not found, using defaults",
                path.display()
            ));
            return Value::Object(Map::new());
        }
        match read_json_object(&path) {
            Ok(map) => {
                log::debug!("Site configuration loaded from {}", path.display());
                Value::Object(map)
            }
            Err(e) => {
                ctx.error(e.to_string());
                Value::Object(Map::new())
            }
        }
    }

    /// Reads `<host>.json` from the first candidate location that exists and
    /// returns the content of its single top-level key, which must be `hostname`.
    pub fn load_host(&self, ctx: &mut RunContext, hostname: &str) -> Value {
        match self.read_host(hostname) {
            Ok(host) => host,
            Err(e) => {
                ctx.error(e.to_string());
                Value::Object(Map::new())
            }
        }
    }

    fn read_host(&self, hostname: &str) -> Result<Value, ConfigError> {
        let candidates = self.paths.host_config_candidates(hostname);
        let path = candidates
            .iter()
            .find(|p| p.is_file())
            .ok_or_else(|| ConfigError::HostNotFound {
                host: hostname.to_string(),
                searched: candidates
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            })?;
        log::debug!("Host configuration found at {}", path.display());
        host_document(read_json_object(path)?, hostname, path)
    }
}

fn read_json_object(path: &Path) -> Result<Map<String, Value>, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    match serde_json::from_str(&content) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ConfigError::NotAnObject {
            path: path.display().to_string(),
        }),
        Err(source) => Err(ConfigError::JsonParse {
            path: path.display().to_string(),
            source,
        }),
    }
}

/// Unwraps a host document, checking that it is keyed by the actual hostname.
pub fn host_document(
    mut document: Map<String, Value>,
    hostname: &str,
    path: &Path,
) -> Result<Value, ConfigError> {
    let single_key = document.len() == 1 && document.contains_key(hostname);
    if !single_key {
        return Err(ConfigError::HostMismatch {
            path: path.display().to_string(),
            found: document.keys().cloned().collect::<Vec<_>>().join(", "),
            expected: hostname.to_string(),
        });
    }
    match document.remove(hostname) {
        Some(inner @ Value::Object(_)) => Ok(inner),
        _ => Err(ConfigError::NotAnObject {
            path: path.display().to_string(),
        }),
    }
}

/// Deep-merges `overlay` into `base`. Maps merge key by key; anything else in
/// `overlay` replaces what `base` had at the same path.
pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// The merged and evaluated configuration of one host.
#[derive(Debug, Clone, Default)]
pub struct Config {
    hostname: String,
    document: Value,
    site: SiteSettings,
    instances: BTreeMap<String, DbmsInstanceConfig>,
    services: BTreeMap<String, ServiceConfig>,
}

impl Config {
    /// Merges `host` over `site`, evaluates the result and decodes the typed sections.
    pub fn from_documents(ctx: &mut RunContext, hostname: &str, site: Value, host: Value) -> Self {
        let mut merged = site;
        merge(&mut merged, host);

        let (document, failures) = interpolator::evaluate_document(&merged, hostname);
        for failure in failures {
            ctx.error(format!(
                "unable to evaluate '{}': {}",
                failure.location, failure.error
            ));
        }

        let site = match serde_json::from_value::<SiteSettings>(document.clone()) {
            Ok(settings) => settings,
            Err(e) => {
                ctx.error(format!("invalid site settings: {}", e));
                SiteSettings::default()
            }
        };
        let instances = decode_section(ctx, &document, DBMS_INSTANCES_KEY);
        let services = decode_section(ctx, &document, SERVICES_KEY);

        Self {
            hostname: hostname.to_string(),
            document,
            site,
            instances,
            services,
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn site(&self) -> &SiteSettings {
        &self.site
    }

    pub fn logs_root(&self) -> Option<&Path> {
        self.site.logs.root_dir.as_deref()
    }

    /// Looks a path up in the merged configuration. A missing segment is not
    /// an error: callers apply their own defaulting policy.
    pub fn var<S: AsRef<str>>(&self, path: &[S]) -> Option<&Value> {
        lookup(&self.document, path)
    }

    pub fn var_str<S: AsRef<str>>(&self, path: &[S]) -> Option<&str> {
        self.var(path).and_then(Value::as_str)
    }

    /// Looks a path up in the service subtree first, then in the host/site configuration.
    pub fn service_var<S: AsRef<str>>(&self, service: &str, path: &[S]) -> Option<&Value> {
        self.document
            .get(SERVICES_KEY)
            .and_then(|services| services.get(service))
            .and_then(|subtree| lookup(subtree, path))
            .or_else(|| self.var(path))
    }

    pub fn instance_names(&self) -> Vec<&str> {
        self.instances.keys().map(String::as_str).collect()
    }

    pub fn instance(&self, name: &str) -> Option<&DbmsInstanceConfig> {
        self.instances.get(name)
    }

    pub fn service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.get(name)
    }

    /// Services sorted by name; hidden ones only when asked for.
    pub fn services(&self, with_hidden: bool) -> Vec<(&str, &ServiceConfig)> {
        self.services
            .iter()
            .filter(|(_, service)| with_hidden || !service.hidden)
            .map(|(name, service)| (name.as_str(), service))
            .collect()
    }

    /// Every workload name declared by at least one service, sorted.
    pub fn workload_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .services
            .values()
            .flat_map(|service| service.workloads.keys().map(String::as_str))
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// The tasks of `workload` across all services, sorted on their `order`
    /// key (falling back to the service name). Equal keys keep declaration order.
    pub fn workload_tasks(&self, workload: &str) -> Vec<WorkloadTask> {
        let mut tasks: Vec<WorkloadTask> = self
            .services
            .iter()
            .flat_map(|(name, service)| {
                service
                    .workloads
                    .get(workload)
                    .into_iter()
                    .flatten()
                    .map(move |task| WorkloadTask {
                        service: name.clone(),
                        order: task.get("order").and_then(scalar_to_string),
                        task: task.clone(),
                    })
            })
            .collect();
        tasks.sort_by(WorkloadTask::cmp_sort_key);
        tasks
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Decodes each entry of a map section on its own so that one invalid entry
/// is reported without hiding the valid ones.
fn decode_section<T: DeserializeOwned>(
    ctx: &mut RunContext,
    document: &Value,
    section: &str,
) -> BTreeMap<String, T> {
    let mut decoded = BTreeMap::new();
    let Some(value) = document.get(section) else {
        return decoded;
    };
    let Some(entries) = value.as_object() else {
        ctx.error(format!("'{}' must be a map", section));
        return decoded;
    };
    for (name, entry) in entries {
        match serde_json::from_value::<T>(entry.clone()) {
            Ok(item) => {
                decoded.insert(name.clone(), item);
            }
            Err(e) => ctx.error(format!("invalid {} entry '{}': {}", section, name, e)),
        }
    }
    decoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    fn quiet_context() -> RunContext {
        let mut ctx = RunContext::new("ttp");
        ctx.set_colored(false);
        ctx
    }

    fn write_json(path: &Path, value: &Value) {
        fs::write(path, serde_json::to_string_pretty(value).unwrap()).unwrap();
    }

    #[test]
    fn test_merge_precedence() {
        let mut site = json!({
            "logs": { "rootDir": "/site/logs", "withVerbose": true },
            "onlySite": 1
        });
        let host = json!({
            "logs": { "rootDir": "/host/logs" },
            "onlyHost": 2
        });
        merge(&mut site, host);
        assert_eq!(
            site,
            json!({
                "logs": { "rootDir": "/host/logs", "withVerbose": true },
                "onlySite": 1,
                "onlyHost": 2
            })
        );
    }

    #[test]
    fn test_load_full_cascade() {
        // --- Setup ---
        let dir = tempfile::tempdir().unwrap();
        let paths = SitePaths::new(dir.path(), Vec::new());
        write_json(
            &paths.site_config_path(),
            &json!({ "logs": { "withInfo": false }, "alerts": { "to": "ops@site" } }),
        );
        write_json(
            &dir.path().join("WS1.json"),
            &json!({ "WS1": {
                "alerts": { "to": "dba@site" },
                "DBMSInstances": {
                    "MSSQLSERVER": { "package": "SqlServer", "backupPath": "[eval:join('/backups', host())]" }
                },
                "Services": { "Sales": { "instance": "MSSQLSERVER", "databases": ["Sales"] } }
            }}),
        );
        let mut ctx = quiet_context();

        // --- Execute ---
        let config = ConfigLoader::new(&paths).load(&mut ctx, "WS1");

        // --- Assert ---
        assert!(!ctx.has_errors());
        assert_eq!(ctx.warning_count(), 0);
        assert_eq!(config.var_str(&["alerts", "to"]), Some("dba@site"));
        assert!(!config.site().logs.with_info);
        let instance = config.instance("MSSQLSERVER").unwrap();
        assert_eq!(instance.backup_path, Some(PathBuf::from("/backups/WS1")));
        assert_eq!(config.service("Sales").unwrap().databases, vec!["Sales"]);
    }

    #[test]
    fn test_missing_site_is_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SitePaths::new(dir.path(), Vec::new());
        let mut ctx = quiet_context();

        let site = ConfigLoader::new(&paths).load_site(&mut ctx);

        assert_eq!(site, json!({}));
        assert_eq!(ctx.warning_count(), 1);
        assert!(!ctx.has_errors());
    }

    #[test]
    fn test_host_key_mismatch_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SitePaths::new(dir.path(), Vec::new());
        write_json(&dir.path().join("WS1.json"), &json!({ "WS2": {} }));
        let mut ctx = quiet_context();

        let host = ConfigLoader::new(&paths).load_host(&mut ctx, "WS1");

        assert_eq!(host, json!({}));
        assert_eq!(ctx.error_count(), 1);
    }

    #[test]
    fn test_host_found_in_second_tree() {
        let site = tempfile::tempdir().unwrap();
        let tree = tempfile::tempdir().unwrap();
        let nodes = tree.path().join("etc").join("nodes");
        fs::create_dir_all(&nodes).unwrap();
        write_json(&nodes.join("WS1.json"), &json!({ "WS1": { "found": true } }));
        let paths = SitePaths::new(site.path(), vec![tree.path().to_path_buf()]);
        let mut ctx = quiet_context();

        let host = ConfigLoader::new(&paths).load_host(&mut ctx, "WS1");

        assert_eq!(host, json!({ "found": true }));
        assert!(!ctx.has_errors());
    }

    #[test]
    fn test_invalid_entries_are_all_reported() {
        let mut ctx = quiet_context();
        let host = json!({
            "DBMSInstances": {
                "GOOD": { "package": "SqlServer" },
                "BAD1": { "accounts": "not-a-map" },
                "BAD2": "not-a-map"
            }
        });

        let config = Config::from_documents(&mut ctx, "WS1", json!({}), host);

        assert_eq!(ctx.error_count(), 2);
        assert_eq!(config.instance_names(), vec!["GOOD"]);
    }

    #[test]
    fn test_service_var_falls_back_to_host() {
        let mut ctx = quiet_context();
        let host = json!({
            "backupRetention": 7,
            "Services": { "Sales": { "instance": "I1", "backupRetention": 30 }, "Hr": { "instance": "I1" } }
        });
        let config = Config::from_documents(&mut ctx, "WS1", json!({}), host);

        assert_eq!(config.service_var("Sales", &["backupRetention"]), Some(&json!(30)));
        assert_eq!(config.service_var("Hr", &["backupRetention"]), Some(&json!(7)));
        assert_eq!(config.var(&["nope", "deeper"]), None);
    }

    #[test]
    fn test_hidden_services_and_workloads() {
        let mut ctx = quiet_context();
        let host = json!({
            "Services": {
                "Zeta": {
                    "workloads": { "daily": [ { "name": "z1" }, { "name": "z0", "order": "A" } ] }
                },
                "Alpha": {
                    "hidden": true,
                    "workloads": { "daily": [ { "name": "a1" } ], "weekly": [] }
                }
            }
        });
        let config = Config::from_documents(&mut ctx, "WS1", json!({}), host);

        let visible: Vec<&str> = config.services(false).iter().map(|(n, _)| *n).collect();
        assert_eq!(visible, vec!["Zeta"]);
        assert_eq!(config.services(true).len(), 2);
        assert_eq!(config.workload_names(), vec!["daily", "weekly"]);

        let order: Vec<String> = config
            .workload_tasks("daily")
            .iter()
            .map(|t| t.task["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(order, vec!["z0", "a1", "z1"]);
    }

    #[test]
    fn test_numeric_workload_orders_sort_as_numbers() {
        let mut ctx = quiet_context();
        let host = json!({
            "Services": {
                "Sales": {
                    "workloads": { "nightly": [ { "name": "ten", "order": 10 }, { "name": "nine", "order": 9 } ] }
                },
                "Hr": {
                    "workloads": { "nightly": [ { "name": "plain" }, { "name": "two", "order": "2" } ] }
                }
            }
        });
        let config = Config::from_documents(&mut ctx, "WS1", json!({}), host);

        let order: Vec<String> = config
            .workload_tasks("nightly")
            .iter()
            .map(|t| t.task["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(order, vec!["two", "nine", "ten", "plain"]);
    }
}
