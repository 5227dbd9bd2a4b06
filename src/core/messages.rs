//! # Message Service
//!
//! Formatting and routing of every user-facing message. Screen output goes to
//! stdout (info, verbose, dummy) or stderr (warnings, errors), optionally
//! colorized; a copy is appended to the daily log file when a logs root is
//! configured. Counting errors is the job of `RunContext`, not of this module.

use chrono::{Local, NaiveDateTime};
use colored::Colorize;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::constants::MAIN_LOG_FILENAME;
use crate::models::LogsSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Verbose,
    Dummy,
    Warn,
    Error,
}

impl Level {
    /// The tag written in the log file (and on screen for everything but info).
    pub fn tag(self) -> &'static str {
        match self {
            Self::Info => "(INF)",
            Self::Verbose => "(VER)",
            Self::Dummy => "(DUM)",
            Self::Warn => "(WARN)",
            Self::Error => "(ERR)",
        }
    }

    fn to_stderr(self) -> bool {
        matches!(self, Self::Warn | Self::Error)
    }
}

/// Builds the `[<command> <verb>]` prefix; the verb is omitted until one is selected.
pub fn prefix(command: &str, verb: Option<&str>) -> String {
    match verb {
        Some(v) => format!("[{} {}]", command, v),
        None => format!("[{}]", command),
    }
}

/// `<logsRoot>/<YYMMDD>/main.log`
pub fn daily_log_path(root: &Path, now: NaiveDateTime) -> PathBuf {
    root.join(now.format("%y%m%d").to_string())
        .join(MAIN_LOG_FILENAME)
}

#[derive(Debug, Clone)]
pub struct Messenger {
    host: String,
    colored: bool,
    logs: LogsSettings,
}

impl Messenger {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            colored: colored::control::SHOULD_COLORIZE.should_colorize(),
            logs: LogsSettings::default(),
        }
    }

    pub fn set_colored(&mut self, colored: bool) {
        self.colored = colored;
    }

    pub fn colored(&self) -> bool {
        self.colored
    }

    pub fn set_host(&mut self, host: impl Into<String>) {
        self.host = host.into();
    }

    pub fn set_logs(&mut self, logs: LogsSettings) {
        self.logs = logs;
    }

    pub fn logs_root(&self) -> Option<&Path> {
        self.logs.root_dir.as_deref()
    }

    /// Renders the screen line for a message.
    pub fn format_line(&self, level: Level, prefix: &str, message: &str) -> String {
        let line = match level {
            Level::Info => format!("{} {}", prefix, message),
            _ => format!("{} {} {}", prefix, level.tag(), message),
        };
        if !self.colored {
            return line;
        }
        match level {
            Level::Info => line,
            Level::Verbose => line.cyan().to_string(),
            Level::Dummy => line.magenta().to_string(),
            Level::Warn => line.yellow().to_string(),
            Level::Error => line.red().to_string(),
        }
    }

    /// Prints the message when `on_screen` and logs it according to the logs policy.
    pub fn emit(&self, level: Level, prefix: &str, message: &str, on_screen: bool) {
        if on_screen {
            let line = self.format_line(level, prefix, message);
            if level.to_stderr() {
                eprintln!("{}", line);
            } else {
                println!("{}", line);
            }
        }
        if self.should_log(level) {
            if let Err(e) = self.append_log(level, prefix, message) {
                log::warn!("Unable to append to the daily log: {}", e);
            }
        }
    }

    /// Warnings and errors are always logged; the other levels follow the site policy.
    fn should_log(&self, level: Level) -> bool {
        match level {
            Level::Warn | Level::Error | Level::Dummy => true,
            Level::Info => self.logs.with_info,
            Level::Verbose => self.logs.with_verbose,
        }
    }

    fn append_log(&self, level: Level, prefix: &str, message: &str) -> io::Result<()> {
        let Some(root) = self.logs.root_dir.as_deref() else {
            return Ok(());
        };
        let now = Local::now().naive_local();
        let path = daily_log_path(root, now);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(
            file,
            "{} {} {} {} {} {}",
            now.format("%Y-%m-%d %H:%M:%S%.3f"),
            self.host,
            std::process::id(),
            level.tag(),
            prefix,
            message
        )
    }
}
