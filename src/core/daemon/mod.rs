// src/core/daemon/mod.rs

//! A minimal long-lived process skeleton.
//!
//! The daemon owns a non-blocking listening socket. The owning loop calls
//! [`Daemon::listen`] between its own periodic work; each call serves at
//! most one client (accept, read one request, answer, close) and returns
//! immediately when nobody is waiting. The loop stops once
//! [`Daemon::is_terminating`] turns true, after a `terminate` request or
//! a SIGINT.

pub mod client;
pub mod protocol;

use chrono::{DateTime, Local};
use serde_json::Value;
use socket2::{Domain, Socket, Type};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use thiserror::Error;

use crate::constants::{DAEMON_BUFFER_SIZE, DAEMON_BUILTIN_COMMANDS, DAEMON_DEFAULT_INTERVAL_MS};
use crate::models::DaemonConfig;
use crate::state::RunContext;
use protocol::Request;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Failed to read daemon configuration '{path}': {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Invalid daemon configuration '{path}': {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },
    #[error("Failed to listen on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("Failed to install the interrupt handler: {0}")]
    Signal(#[from] ctrlc::Error),
    #[error("Failed to reach the daemon at {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("I/O error while talking to the daemon: {0}")]
    Io(#[from] io::Error),
}

/// Reads the JSON document a daemon is started with.
///
/// The document must be a non-empty object carrying a `listeningPort`.
/// Without a `name`, the daemon is named after the file.
pub fn load_config(path: &Path) -> Result<DaemonConfig, DaemonError> {
    let content = fs::read_to_string(path).map_err(|e| DaemonError::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    let invalid = |reason: String| DaemonError::ConfigInvalid {
        path: path.to_path_buf(),
        reason,
    };
    let value: Value = serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))?;
    match value.as_object() {
        Some(map) if !map.is_empty() => {}
        _ => return Err(invalid("expected a non-empty JSON object".to_string())),
    }
    let mut config: DaemonConfig =
        serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?;
    if config.name.is_none() {
        config.name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned());
    }
    Ok(config)
}

/// A handler of a daemon-specific command; returns the answer line.
pub type CommandHandler = Box<dyn FnMut(&[String]) -> String>;

pub struct Daemon {
    name: String,
    started_at: DateTime<Local>,
    terminating: Arc<AtomicBool>,
    listener: TcpListener,
    interval: Duration,
    commands: BTreeMap<String, CommandHandler>,
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("name", &self.name)
            .field("started_at", &self.started_at)
            .field("terminating", &self.is_terminating())
            .field("listener", &self.listener)
            .field("commands", &self.commands.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Daemon {
    /// Listens on `0.0.0.0:<listeningPort>`.
    pub fn from_config(config: &DaemonConfig) -> Result<Self, DaemonError> {
        let address = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.listening_port));
        let interval =
            Duration::from_millis(config.listening_interval.unwrap_or(DAEMON_DEFAULT_INTERVAL_MS));
        let name = config.name.clone().unwrap_or_else(|| "daemon".to_string());
        Self::bind(name, address, interval)
    }

    /// Binds a non-blocking listener with `SO_REUSEADDR` set.
    pub fn bind(
        name: impl Into<String>,
        address: SocketAddr,
        interval: Duration,
    ) -> Result<Self, DaemonError> {
        let bind_error = |source| DaemonError::Bind {
            port: address.port(),
            source,
        };
        let socket = Socket::new(Domain::for_address(address), Type::STREAM, None)
            .map_err(bind_error)?;
        socket.set_reuse_address(true).map_err(bind_error)?;
        socket.bind(&address.into()).map_err(bind_error)?;
        socket.listen(128).map_err(bind_error)?;
        socket.set_nonblocking(true).map_err(bind_error)?;
        let listener: TcpListener = socket.into();

        Ok(Self {
            name: name.into(),
            started_at: Local::now(),
            terminating: Arc::new(AtomicBool::new(false)),
            listener,
            interval,
            commands: BTreeMap::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Registers a daemon-specific command. Built-in names cannot be overridden.
    pub fn register(&mut self, name: &str, handler: CommandHandler) {
        if DAEMON_BUILTIN_COMMANDS.contains(&name) {
            log::warn!("Ignoring registration of built-in daemon command '{}'", name);
            return;
        }
        self.commands.insert(name.to_string(), handler);
    }

    pub fn is_terminating(&self) -> bool {
        self.terminating.load(Ordering::SeqCst)
    }

    pub fn terminate(&self) {
        self.terminating.store(true, Ordering::SeqCst);
    }

    /// Makes SIGINT ask the loop to stop. Can only be installed once per process.
    pub fn install_interrupt_handler(&self) -> Result<(), DaemonError> {
        let flag = Arc::clone(&self.terminating);
        ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))?;
        Ok(())
    }

    /// Serves the next waiting client, if any, and returns what it asked.
    pub fn listen(&mut self, ctx: &mut RunContext) -> Option<Request> {
        let (stream, peer) = match self.listener.accept() {
            Ok(accepted) => accepted,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return None,
            Err(e) => {
                ctx.warn(format!(t!("daemon.warn.accept"), error = e));
                return None;
            }
        };
        log::debug!("Daemon '{}' accepted {}", self.name, peer);
        match self.serve(ctx, stream) {
            Ok(request) => request,
            Err(e) => {
                ctx.warn(format!(t!("daemon.warn.client"), peer = peer, error = e));
                None
            }
        }
    }

    fn serve(&mut self, ctx: &mut RunContext, mut stream: TcpStream) -> io::Result<Option<Request>> {
        // Accepted sockets inherit non-blocking mode on some platforms.
        stream.set_nonblocking(false)?;
        let mut buffer = [0u8; DAEMON_BUFFER_SIZE];
        let read = stream.read(&mut buffer)?;
        let request = protocol::parse_request(buffer.get(..read).unwrap_or_default());

        let stream = scopeguard::guard(stream, |s| {
            let _ = s.shutdown(Shutdown::Write);
        });
        let answer = match &request {
            Some(request) => {
                ctx.verbose(format!(
                    t!("daemon.received"),
                    command = request.command,
                    args = request.args.join(" ")
                ));
                self.answer(ctx, request)
            }
            None => String::new(),
        };
        let mut writer: &TcpStream = &stream;
        writer.write_all(answer.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(request)
    }

    /// The answer line to a request, without its trailing newline.
    pub fn answer(&mut self, ctx: &mut RunContext, request: &Request) -> String {
        match request.command.as_str() {
            "help" => {
                let mut names: Vec<&str> = DAEMON_BUILTIN_COMMANDS.to_vec();
                names.extend(self.commands.keys().map(String::as_str));
                names.sort_unstable();
                protocol::ok(&names.join(", "))
            }
            "status" => protocol::ok(&format!(
                "{} running since {}",
                self.name,
                self.started_at.format("%Y-%m-%d %H:%M:%S%.3f")
            )),
            "terminate" => {
                ctx.info(format!(t!("daemon.terminating"), name = self.name));
                self.terminate();
                protocol::ok("")
            }
            other => match self.commands.get_mut(other) {
                Some(handler) => handler(&request.args),
                None => {
                    ctx.warn(format!(t!("daemon.warn.unknown_command"), command = other));
                    protocol::unknown_command(other)
                }
            },
        }
    }

    /// Serves clients until terminated, sleeping `interval` between polls.
    pub fn run(&mut self, ctx: &mut RunContext) {
        ctx.info(format!(
            t!("daemon.listening"),
            name = self.name,
            address = self
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "?".to_string())
        ));
        while !self.is_terminating() {
            if self.listen(ctx).is_none() && !self.is_terminating() {
                thread::sleep(self.interval);
            }
        }
        ctx.verbose(format!(t!("daemon.stopped"), name = self.name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn quiet_context() -> RunContext {
        let mut ctx = RunContext::new("daemon");
        ctx.set_colored(false);
        ctx
    }

    fn loopback_daemon() -> Daemon {
        Daemon::bind(
            "test",
            SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            Duration::from_millis(10),
        )
        .unwrap()
    }

    /// Polls until a request was served, for at most ~5 seconds.
    fn serve_one(daemon: &mut Daemon, ctx: &mut RunContext) -> Request {
        for _ in 0..500 {
            if let Some(request) = daemon.listen(ctx) {
                return request;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("no client was served");
    }

    #[test]
    fn test_listen_returns_immediately_without_client() {
        let mut daemon = loopback_daemon();
        let mut ctx = quiet_context();
        assert!(daemon.listen(&mut ctx).is_none());
        assert!(!daemon.is_terminating());
    }

    #[test]
    fn test_help_lists_builtins() {
        // --- Setup ---
        let mut daemon = loopback_daemon();
        let mut ctx = quiet_context();
        let port = daemon.local_addr().unwrap().port();
        let client = thread::spawn(move || client::send_command("127.0.0.1", port, "help"));

        // --- Execute ---
        let request = serve_one(&mut daemon, &mut ctx);
        let answer = client.join().unwrap().unwrap();

        // --- Assert ---
        assert_eq!(request.command, "help");
        assert_eq!(answer, "help, status, terminate OK\n");
    }

    #[test]
    fn test_help_merges_registered_commands() {
        let mut daemon = loopback_daemon();
        let mut ctx = quiet_context();
        daemon.register("flush", Box::new(|_| protocol::ok("flushed")));
        let answer = daemon.answer(
            &mut ctx,
            &Request {
                command: "help".to_string(),
                args: Vec::new(),
            },
        );
        assert_eq!(answer, "flush, help, status, terminate OK");
    }

    #[test]
    fn test_registered_command_gets_its_args() {
        let mut daemon = loopback_daemon();
        let mut ctx = quiet_context();
        let calls = Rc::new(Cell::new(0));
        let seen = Rc::clone(&calls);
        daemon.register(
            "echo",
            Box::new(move |args| {
                seen.set(seen.get() + 1);
                protocol::ok(&args.join(" "))
            }),
        );
        let answer = daemon.answer(
            &mut ctx,
            &Request {
                command: "echo".to_string(),
                args: vec!["a".to_string(), "b".to_string()],
            },
        );
        assert_eq!(answer, "a b OK");
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_status_reports_start_time() {
        let mut daemon = loopback_daemon();
        let mut ctx = quiet_context();
        let answer = daemon.answer(
            &mut ctx,
            &Request {
                command: "status".to_string(),
                args: Vec::new(),
            },
        );
        assert!(answer.starts_with("test running since "));
        assert!(protocol::is_ok(&answer));
    }

    #[test]
    fn test_unknown_command_is_benign() {
        let mut daemon = loopback_daemon();
        let mut ctx = quiet_context();
        let answer = daemon.answer(
            &mut ctx,
            &Request {
                command: "frobnicate".to_string(),
                args: Vec::new(),
            },
        );
        assert_eq!(answer, "unknowned command 'frobnicate'");
        assert!(!ctx.has_errors());
        assert_eq!(ctx.warning_count(), 1);
    }

    #[test]
    fn test_terminate_stops_the_loop() {
        // --- Setup ---
        let mut daemon = loopback_daemon();
        let mut ctx = quiet_context();
        let port = daemon.local_addr().unwrap().port();
        let client = thread::spawn(move || client::send_command("127.0.0.1", port, "terminate"));

        // --- Execute ---
        let mut polls = 0;
        while !daemon.is_terminating() && polls < 500 {
            daemon.listen(&mut ctx);
            polls += 1;
            thread::sleep(Duration::from_millis(10));
        }

        // --- Assert ---
        assert!(daemon.is_terminating());
        assert_eq!(client.join().unwrap().unwrap(), "OK\n");
    }

    #[test]
    fn test_load_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.json");
        fs::write(&path, r#"{ "listeningPort": 14321, "topic": "x" }"#).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.listening_port, 14321);
        assert_eq!(config.name.as_deref(), Some("monitor"));
        assert_eq!(config.extra.get("topic"), Some(&Value::from("x")));
    }

    #[test]
    fn test_load_config_rejects_empty_or_portless() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.json");
        fs::write(&empty, "{}").unwrap();
        assert!(matches!(
            load_config(&empty),
            Err(DaemonError::ConfigInvalid { .. })
        ));

        let portless = dir.path().join("portless.json");
        fs::write(&portless, r#"{ "name": "x" }"#).unwrap();
        assert!(matches!(
            load_config(&portless),
            Err(DaemonError::ConfigInvalid { .. })
        ));
    }
}
