// src/state.rs

use std::collections::HashMap;

use crate::core::messages::{self, Level, Messenger};
use crate::models::{Instance, SiteSettings};

/// The execution context of one process run.
///
/// It owns the only mutable state shared across components: the error
/// counter that gates every "did it succeed" check, and the cache of the
/// instances resolved so far. It is created once in `main` and passed by
/// reference to every component; tests build as many as they need.
#[derive(Debug)]
pub struct RunContext {
    command: String,
    verb: Option<String>,
    errors: u32,
    warnings: u32,
    verbose: bool,
    dummy: bool,
    messenger: Messenger,
    instances: HashMap<String, Instance>,
}

impl RunContext {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            verb: None,
            errors: 0,
            warnings: 0,
            verbose: false,
            dummy: false,
            messenger: Messenger::new(crate::system::host::hostname()),
            instances: HashMap::new(),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn verb(&self) -> Option<&str> {
        self.verb.as_deref()
    }

    pub fn set_verb(&mut self, verb: impl Into<String>) {
        self.verb = Some(verb.into());
    }

    // --- Run flags ---

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    pub fn set_dummy(&mut self, dummy: bool) {
        self.dummy = dummy;
    }

    pub fn is_dummy(&self) -> bool {
        self.dummy
    }

    pub fn set_colored(&mut self, colored: bool) {
        self.messenger.set_colored(colored);
    }

    pub fn is_colored(&self) -> bool {
        self.messenger.colored()
    }

    /// Applies the site policy once the configuration is loaded.
    /// Command-line flags parsed later still override the colorization.
    pub fn apply_site_settings(&mut self, host: &str, site: &SiteSettings) {
        self.messenger.set_host(host);
        self.messenger.set_logs(site.logs.clone());
        if let Some(colored) = site.messages.colored {
            self.messenger.set_colored(colored);
        }
    }

    pub fn messenger(&self) -> &Messenger {
        &self.messenger
    }

    // --- Message Service ---

    fn emit(&self, level: Level, message: &str, on_screen: bool) {
        let prefix = messages::prefix(&self.command, self.verb.as_deref());
        self.messenger.emit(level, &prefix, message, on_screen);
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.emit(Level::Info, message.as_ref(), true);
    }

    /// Only printed with `--verbose`; still logged when the site asks for it.
    pub fn verbose(&self, message: impl AsRef<str>) {
        self.emit(Level::Verbose, message.as_ref(), self.verbose);
    }

    pub fn dummy(&self, message: impl AsRef<str>) {
        self.emit(Level::Dummy, message.as_ref(), true);
    }

    pub fn warn(&mut self, message: impl AsRef<str>) {
        self.warnings += 1;
        self.emit(Level::Warn, message.as_ref(), true);
    }

    pub fn error(&mut self, message: impl AsRef<str>) {
        self.errors += 1;
        self.emit(Level::Error, message.as_ref(), true);
    }

    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }

    pub fn error_count(&self) -> u32 {
        self.errors
    }

    pub fn warning_count(&self) -> u32 {
        self.warnings
    }

    /// The process exit code for this run: the error count, saturated so that
    /// a multiple of 256 errors never wraps to a successful status.
    pub fn exit_code(&self) -> i32 {
        i32::from(u8::try_from(self.errors).unwrap_or(u8::MAX))
    }

    /// Logs the exit and terminates the process; `None` exits with the error count.
    pub fn exit(&self, code: Option<i32>) -> ! {
        let code = code.unwrap_or_else(|| self.exit_code());
        self.emit(Level::Verbose, &format!("exiting with code {}", code), false);
        log::debug!("{} exiting with code {}", self.command, code);
        std::process::exit(code)
    }

    // --- Resolved instances cache ---

    pub fn cached_instance(&self, name: &str) -> Option<&Instance> {
        self.instances.get(name)
    }

    pub fn cache_instance(&mut self, instance: Instance) {
        self.instances.insert(instance.name.clone(), instance);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_context() -> RunContext {
        let mut ctx = RunContext::new("ttp");
        ctx.set_colored(false);
        ctx
    }

    #[test]
    fn test_fresh_context_has_no_errors() {
        let ctx = quiet_context();
        assert!(!ctx.has_errors());
        assert_eq!(ctx.exit_code(), 0);
    }

    #[test]
    fn test_error_count_is_exit_code() {
        let mut ctx = quiet_context();
        ctx.error("first");
        ctx.warn("not counted");
        ctx.error("second");
        assert!(ctx.has_errors());
        assert_eq!(ctx.error_count(), 2);
        assert_eq!(ctx.warning_count(), 1);
        assert_eq!(ctx.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_saturates() {
        let mut ctx = quiet_context();
        for _ in 0..256 {
            ctx.error("again");
        }
        assert_eq!(ctx.exit_code(), 255);
    }

    #[test]
    fn test_contexts_are_independent() {
        let mut first = quiet_context();
        let second = quiet_context();
        first.error("only here");
        assert!(first.has_errors());
        assert!(!second.has_errors());
    }

    #[test]
    fn test_instance_cache() {
        let mut ctx = quiet_context();
        assert!(ctx.cached_instance("MSSQLSERVER").is_none());
        ctx.cache_instance(Instance {
            name: "MSSQLSERVER".to_string(),
            ..Default::default()
        });
        assert!(ctx.cached_instance("MSSQLSERVER").is_some());
    }
}
