// src/core/reports.rs

//! Execution reports: a JSON record of each mutating operation, dropped
//! as a file and optionally published on the message bus through a
//! site-configured command line.

use chrono::NaiveDateTime;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use crate::core::config_loader::Config;
use crate::state::RunContext;
use crate::system::executor;

const DROP_SUBDIR: &str = "executionReports";
const DEFAULT_EXCLUDED: &[&str] = &["instance", "database"];

/// The record of one operation, built field by field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionReport {
    fields: Map<String, Value>,
}

impl ExecutionReport {
    pub fn new(instance: &str, database: &str) -> Self {
        let mut fields = Map::new();
        fields.insert("instance".to_string(), Value::from(instance));
        fields.insert("database".to_string(), Value::from(database));
        Self { fields }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    fn field_str(&self, key: &str) -> &str {
        self.fields.get(key).and_then(Value::as_str).unwrap_or("")
    }

    /// `<host>/executionReport/<command>/<verb>/<instance>/<database>`
    pub fn topic(&self, host: &str, command: &str, verb: &str) -> String {
        format!(
            "{}/executionReport/{}/{}/{}/{}",
            host,
            command,
            verb,
            self.field_str("instance"),
            self.field_str("database")
        )
    }

    /// The record with run metadata added.
    pub fn to_record(&self, ctx: &RunContext, host: &str, now: NaiveDateTime) -> Value {
        let mut record = self.fields.clone();
        record.insert("host".to_string(), Value::from(host));
        record.insert("command".to_string(), Value::from(ctx.command()));
        record.insert(
            "verb".to_string(),
            Value::from(ctx.verb().unwrap_or_default()),
        );
        record.insert(
            "timestamp".to_string(),
            Value::from(now.format("%Y-%m-%d %H:%M:%S%.3f").to_string()),
        );
        record.insert("pid".to_string(), Value::from(std::process::id()));
        Value::Object(record)
    }

    /// The bus payload: the record minus the excluded properties.
    pub fn payload(record: &Value, excluded: &[String]) -> Value {
        match record {
            Value::Object(map) => Value::Object(
                map.iter()
                    .filter(|(key, _)| !excluded.contains(*key))
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

/// Where report files go: `withFile.dropDir`, else `<logsRoot>/<YYMMDD>/executionReports`.
pub fn drop_dir(config: &Config, now: NaiveDateTime) -> Option<PathBuf> {
    let configured = config
        .site()
        .execution_reports
        .with_file
        .as_ref()
        .and_then(|f| f.drop_dir.clone());
    configured.or_else(|| {
        config
            .logs_root()
            .map(|root| root.join(now.format("%y%m%d").to_string()).join(DROP_SUBDIR))
    })
}

/// Writes and publishes a report as the site configures it.
///
/// Reports are a side channel: failing to deliver one is a warning.
pub fn publish(ctx: &mut RunContext, config: &Config, report: &ExecutionReport, now: NaiveDateTime) {
    let record = report.to_record(ctx, config.hostname(), now);
    let settings = &config.site().execution_reports;

    let file_enabled = settings.with_file.as_ref().map(|f| f.enabled).unwrap_or(true);
    if file_enabled {
        match drop_dir(config, now) {
            Some(dir) => write_file(ctx, &dir, &record, now),
            None => ctx.verbose(t!("reports.no_drop_dir")),
        }
    }

    let Some(mqtt) = settings.with_mqtt.as_ref().filter(|m| m.enabled) else {
        return;
    };
    let Some(template) = mqtt.command.as_deref() else {
        return;
    };
    let excluded: Vec<String> = mqtt
        .exclude_properties
        .clone()
        .unwrap_or_else(|| DEFAULT_EXCLUDED.iter().map(|s| s.to_string()).collect());
    let topic = report.topic(
        config.hostname(),
        ctx.command(),
        ctx.verb().unwrap_or_default(),
    );
    let payload = ExecutionReport::payload(&record, &excluded).to_string();

    let command_line = match (shlex::try_quote(&topic), shlex::try_quote(&payload)) {
        (Ok(topic), Ok(payload)) => template
            .replace("<TOPIC>", &topic)
            .replace("<PAYLOAD>", &payload),
        _ => {
            ctx.warn(t!("reports.warn.quote"));
            return;
        }
    };

    if ctx.is_dummy() {
        ctx.dummy(&command_line);
        return;
    }
    if let Err(e) = executor::execute_command_line(&command_line, &HashMap::new()) {
        ctx.warn(format!(t!("reports.warn.publish"), topic = topic, error = e));
    }
}

fn write_file(ctx: &mut RunContext, dir: &std::path::Path, record: &Value, now: NaiveDateTime) {
    let path = dir.join(format!(
        "{}-{}.json",
        now.format("%y%m%d-%H%M%S%3f"),
        std::process::id()
    ));
    if ctx.is_dummy() {
        ctx.dummy(format!(t!("reports.dummy.write"), path = path.display()));
        return;
    }
    let written = fs::create_dir_all(dir).and_then(|_| {
        let content = serde_json::to_string_pretty(record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(&path, content)
    });
    match written {
        Ok(()) => ctx.verbose(format!(t!("reports.written"), path = path.display())),
        Err(e) => ctx.warn(format!(
            t!("reports.warn.write"),
            path = path.display(),
            error = e
        )),
    }
}
