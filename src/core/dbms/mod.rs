// src/core/dbms/mod.rs

//! Backend indirection for DBMS instances.
//!
//! Every instance declares the `package` that drives it. The registry maps
//! that name to an implementation of [`DbmsBackend`], so verbs only ever talk
//! to the registry and never to a concrete backend.

pub mod sqlserver;

use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::models::{
    BackupOutcome, BackupRequest, Instance, RestoreRequest, SqlOptions, SqlResult,
};
use crate::state::RunContext;

/// The operations a DBMS backend provides.
///
/// Backends report their failures through the context (which counts them)
/// and return a neutral value; callers check `ctx.has_errors()` or the
/// returned status.
pub trait DbmsBackend: fmt::Debug {
    /// The `package` name instances use to select this backend.
    fn package(&self) -> &'static str;

    /// `request.output` is always set when called through the registry.
    fn backup_database(
        &self,
        ctx: &mut RunContext,
        instance: &Instance,
        request: &BackupRequest,
    ) -> BackupOutcome;

    fn restore_database(
        &self,
        ctx: &mut RunContext,
        instance: &Instance,
        request: &RestoreRequest,
    ) -> bool;

    /// User databases currently present on the instance.
    fn get_live_databases(&self, ctx: &mut RunContext, instance: &Instance) -> Vec<String>;

    fn get_database_tables(
        &self,
        ctx: &mut RunContext,
        instance: &Instance,
        database: &str,
    ) -> Vec<String>;

    fn exec_sql_command(
        &self,
        ctx: &mut RunContext,
        instance: &Instance,
        sql: &str,
        options: &SqlOptions,
    ) -> SqlResult;
}

/// Maps package names to backends.
#[derive(Debug, Default)]
pub struct BackendRegistry {
    backends: BTreeMap<String, Box<dyn DbmsBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every backend shipped with ttp.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(sqlserver::SqlServer::new()));
        registry
    }

    pub fn register(&mut self, backend: Box<dyn DbmsBackend>) {
        self.backends.insert(backend.package().to_string(), backend);
    }

    pub fn packages(&self) -> Vec<&str> {
        self.backends.keys().map(String::as_str).collect()
    }

    /// Finds the backend for an instance, reporting an error when the
    /// instance declares no package or an unknown one.
    pub fn dispatch(&self, ctx: &mut RunContext, instance: &Instance) -> Option<&dyn DbmsBackend> {
        let Some(package) = instance.package.as_deref() else {
            ctx.error(format!(
                t!("dbms.error.no_package"),
                instance = instance.name
            ));
            return None;
        };
        match self.backends.get(package) {
            Some(backend) => Some(backend.as_ref()),
            None => {
                ctx.error(format!(
                    t!("dbms.error.unknown_package"),
                    package = package,
                    instance = instance.name
                ));
                None
            }
        }
    }

    /// Backs up a database, computing the output file when the request has none.
    pub fn backup_database(
        &self,
        ctx: &mut RunContext,
        instance: &Instance,
        mut request: BackupRequest,
        now: NaiveDateTime,
    ) -> BackupOutcome {
        let Some(backend) = self.dispatch(ctx, instance) else {
            return BackupOutcome::default();
        };
        if request.output.is_none() {
            request.output = default_backup_path(ctx, instance, &request, now);
            if request.output.is_none() {
                return BackupOutcome::default();
            }
        }
        ctx.verbose(format!(
            t!("dbms.backup.starting"),
            instance = instance.name,
            database = request.database,
            mode = request.mode
        ));
        backend.backup_database(ctx, instance, &request)
    }

    pub fn restore_database(
        &self,
        ctx: &mut RunContext,
        instance: &Instance,
        request: &RestoreRequest,
    ) -> bool {
        match self.dispatch(ctx, instance) {
            Some(backend) => backend.restore_database(ctx, instance, request),
            None => false,
        }
    }

    pub fn get_live_databases(&self, ctx: &mut RunContext, instance: &Instance) -> Vec<String> {
        match self.dispatch(ctx, instance) {
            Some(backend) => backend.get_live_databases(ctx, instance),
            None => Vec::new(),
        }
    }

    pub fn get_database_tables(
        &self,
        ctx: &mut RunContext,
        instance: &Instance,
        database: &str,
    ) -> Vec<String> {
        match self.dispatch(ctx, instance) {
            Some(backend) => backend.get_database_tables(ctx, instance, database),
            None => Vec::new(),
        }
    }

    pub fn exec_sql_command(
        &self,
        ctx: &mut RunContext,
        instance: &Instance,
        sql: &str,
        options: &SqlOptions,
    ) -> SqlResult {
        match self.dispatch(ctx, instance) {
            Some(backend) => backend.exec_sql_command(ctx, instance, sql, options),
            None => SqlResult::failed(),
        }
    }
}

/// `<root>/<YYMMDD>/<host>-<instance>-<database>-<YYMMDD>-<HHMMSS>-<mode>.backup`
pub fn compute_default_backup_filename(
    backup_root: &Path,
    host: &str,
    instance: &str,
    database: &str,
    mode: &str,
    now: NaiveDateTime,
) -> PathBuf {
    let day = now.format("%y%m%d").to_string();
    let filename = format!(
        "{}-{}-{}-{}-{}-{}.backup",
        host,
        instance,
        database,
        day,
        now.format("%H%M%S"),
        mode
    );
    backup_root.join(&day).join(filename)
}

/// The default output file of a backup; creates the daily directory.
fn default_backup_path(
    ctx: &mut RunContext,
    instance: &Instance,
    request: &BackupRequest,
    now: NaiveDateTime,
) -> Option<PathBuf> {
    let Some(root) = instance.backup_path.as_deref() else {
        ctx.error(format!(
            t!("dbms.error.no_backup_path"),
            instance = instance.name
        ));
        return None;
    };
    let path = compute_default_backup_filename(
        root,
        &instance.host,
        &instance.name,
        &request.database,
        &request.mode.to_string(),
        now,
    );
    if let Some(dir) = path.parent() {
        if ctx.is_dummy() {
            ctx.dummy(format!(t!("dbms.dummy.create_dir"), path = dir.display()));
        } else if let Err(e) = fs::create_dir_all(dir) {
            ctx.error(format!(
                t!("dbms.error.create_dir"),
                path = dir.display(),
                error = e
            ));
            return None;
        }
    }
    Some(path)
}
