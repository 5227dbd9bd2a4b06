// src/core/dbms/sqlserver.rs

//! Microsoft SQL Server, driven through the `sqlcmd` client.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::core::dbms::DbmsBackend;
use crate::models::{
    BackupMode, BackupOutcome, BackupRequest, Instance, RestoreRequest, ResultSet, SqlOptions,
    SqlResult,
};
use crate::state::RunContext;
use crate::system::executor;

const DEFAULT_INSTANCE: &str = "MSSQLSERVER";
const SYSTEM_DATABASES: &[&str] = &["master", "model", "msdb", "tempdb"];
const COLUMN_SEPARATOR: char = '\t';
/// Read by `sqlcmd` in place of `-P`, so the secret never shows in argv.
const PASSWORD_ENV: &str = "SQLCMDPASSWORD";

#[derive(Debug, Clone)]
pub struct SqlServer {
    program: String,
}

impl Default for SqlServer {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlServer {
    pub fn new() -> Self {
        Self::with_program("sqlcmd")
    }

    /// Uses another client binary; it must accept the `sqlcmd` arguments.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// `localhost` for the default instance, `localhost\<name>` for a named one.
    pub fn server_name(instance: &Instance) -> String {
        if let Some(server) = &instance.server {
            return server.clone();
        }
        if instance.name == DEFAULT_INSTANCE {
            "localhost".to_string()
        } else {
            format!("localhost\\{}", instance.name)
        }
    }

    /// Arguments of one batch: connection, error handling, output shape, query.
    /// The account secret is not among them, see [`Self::command_env`].
    pub fn command_args(instance: &Instance, sql: &str) -> Vec<String> {
        let mut args = vec!["-S".to_string(), Self::server_name(instance)];
        match instance.account() {
            Some((user, _)) => args.extend(["-U".to_string(), user.to_string()]),
            None => args.push("-E".to_string()),
        }
        args.extend([
            "-b".to_string(),
            "-W".to_string(),
            "-s".to_string(),
            COLUMN_SEPARATOR.to_string(),
            "-Q".to_string(),
            format!("SET NOCOUNT ON; {}", sql),
        ]);
        args
    }

    /// Environment of the client: the account secret, when there is one.
    pub fn command_env(instance: &Instance) -> HashMap<String, String> {
        instance
            .account()
            .map(|(_, secret)| (PASSWORD_ENV.to_string(), secret.to_string()))
            .into_iter()
            .collect()
    }

    fn run(&self, ctx: &mut RunContext, instance: &Instance, sql: &str) -> SqlResult {
        ctx.verbose(format!(
            t!("sqlserver.executing"),
            server = Self::server_name(instance),
            sql = sql
        ));
        let args = Self::command_args(instance, sql);
        let env = Self::command_env(instance);
        match executor::execute_and_capture_output(&self.program, &args, &env) {
            Ok(output) if output.success => SqlResult {
                ok: true,
                sets: parse_output(&output.stdout),
            },
            Ok(output) => {
                let detail = output.stdout.trim();
                ctx.error(format!(
                    t!("sqlserver.error.failed"),
                    server = Self::server_name(instance),
                    detail = if detail.is_empty() { "-" } else { detail }
                ));
                SqlResult::failed()
            }
            Err(e) => {
                ctx.error(format!(t!("sqlserver.error.client"), error = e));
                SqlResult::failed()
            }
        }
    }

    /// Runs a statement that changes the server, or only shows it in dummy mode.
    fn run_mutating(&self, ctx: &mut RunContext, instance: &Instance, sql: &str) -> bool {
        if ctx.is_dummy() {
            ctx.dummy(sql);
            return true;
        }
        self.run(ctx, instance, sql).ok
    }

    /// `MOVE` clauses relocating each file of a backup under the data path.
    fn move_clauses(
        &self,
        ctx: &mut RunContext,
        instance: &Instance,
        data_path: &Path,
        database: &str,
        full: &Path,
    ) -> Option<Vec<String>> {
        let sql = format!(
            "RESTORE FILELISTONLY FROM DISK = N'{}'",
            quote_literal(&full.display().to_string())
        );
        let result = self.run(ctx, instance, &sql);
        if !result.ok {
            return None;
        }
        let Some(set) = result.sets.first() else {
            return Some(Vec::new());
        };
        let logical = column_index(set, "LogicalName").unwrap_or(0);
        let kind = column_index(set, "Type").unwrap_or(2);

        let mut clauses = Vec::new();
        let (mut data_files, mut log_files) = (0usize, 0usize);
        for row in &set.rows {
            let Some(name) = row.get(logical) else {
                continue;
            };
            let is_log = row.get(kind).map(|k| k == "L").unwrap_or(false);
            let target = if is_log {
                log_files += 1;
                relocated_file(data_path, database, "_log", log_files, "ldf")
            } else {
                data_files += 1;
                relocated_file(data_path, database, "", data_files, "mdf")
            };
            clauses.push(format!(
                "MOVE N'{}' TO N'{}'",
                quote_literal(name),
                quote_literal(&target.display().to_string())
            ));
        }
        Some(clauses)
    }

    fn verify(&self, ctx: &mut RunContext, instance: &Instance, file: &Path) -> bool {
        let sql = format!(
            "RESTORE VERIFYONLY FROM DISK = N'{}'",
            quote_literal(&file.display().to_string())
        );
        self.run(ctx, instance, &sql).ok
    }
}

impl DbmsBackend for SqlServer {
    fn package(&self) -> &'static str {
        "SqlServer"
    }

    fn backup_database(
        &self,
        ctx: &mut RunContext,
        instance: &Instance,
        request: &BackupRequest,
    ) -> BackupOutcome {
        let Some(output) = request.output.clone() else {
            ctx.error(format!(
                t!("dbms.error.no_backup_path"),
                instance = instance.name
            ));
            return BackupOutcome::default();
        };
        let sql = backup_statement(request, &output);
        let status = self.run_mutating(ctx, instance, &sql);
        if status {
            ctx.verbose(format!(
                t!("sqlserver.backup.done"),
                database = request.database,
                path = output.display()
            ));
        }
        BackupOutcome {
            status,
            output: Some(output),
        }
    }

    fn restore_database(
        &self,
        ctx: &mut RunContext,
        instance: &Instance,
        request: &RestoreRequest,
    ) -> bool {
        if request.verify_only {
            let full_ok = self.verify(ctx, instance, &request.full);
            let diff_ok = match &request.diff {
                Some(diff) => self.verify(ctx, instance, diff),
                None => true,
            };
            return full_ok && diff_ok;
        }

        let moves = match &instance.data_path {
            Some(data_path) => {
                match self.move_clauses(ctx, instance, data_path, &request.database, &request.full)
                {
                    Some(moves) => moves,
                    None => return false,
                }
            }
            None => Vec::new(),
        };

        let database = quote_identifier(&request.database);
        let recovery = if request.diff.is_some() {
            "NORECOVERY"
        } else {
            "RECOVERY"
        };
        let mut options = vec![recovery.to_string(), "REPLACE".to_string()];
        options.extend(moves);
        let full_sql = format!(
            "RESTORE DATABASE {} FROM DISK = N'{}' WITH {}",
            database,
            quote_literal(&request.full.display().to_string()),
            options.join(", ")
        );
        if !self.run_mutating(ctx, instance, &full_sql) {
            return false;
        }

        match &request.diff {
            Some(diff) => {
                let diff_sql = format!(
                    "RESTORE DATABASE {} FROM DISK = N'{}' WITH RECOVERY",
                    database,
                    quote_literal(&diff.display().to_string())
                );
                self.run_mutating(ctx, instance, &diff_sql)
            }
            None => true,
        }
    }

    fn get_live_databases(&self, ctx: &mut RunContext, instance: &Instance) -> Vec<String> {
        let result = self.run(
            ctx,
            instance,
            "SELECT name FROM master.sys.databases ORDER BY name",
        );
        result
            .rows()
            .iter()
            .filter_map(|row| row.first())
            .filter(|name| !SYSTEM_DATABASES.contains(&name.as_str()))
            .cloned()
            .collect()
    }

    fn get_database_tables(
        &self,
        ctx: &mut RunContext,
        instance: &Instance,
        database: &str,
    ) -> Vec<String> {
        let sql = format!(
            "SELECT TABLE_SCHEMA + '.' + TABLE_NAME FROM {}.INFORMATION_SCHEMA.TABLES \
             WHERE TABLE_TYPE = 'BASE TABLE' ORDER BY 1",
            quote_identifier(database)
        );
        self.run(ctx, instance, &sql)
            .rows()
            .iter()
            .filter_map(|row| row.first().cloned())
            .collect()
    }

    fn exec_sql_command(
        &self,
        ctx: &mut RunContext,
        instance: &Instance,
        sql: &str,
        options: &SqlOptions,
    ) -> SqlResult {
        let mut result = self.run(ctx, instance, sql);
        if !options.multiple {
            result.sets.truncate(1);
        }
        if !options.columns {
            for set in &mut result.sets {
                set.columns.clear();
            }
        }
        result
    }
}

/// The `BACKUP DATABASE` statement of a request.
pub fn backup_statement(request: &BackupRequest, output: &Path) -> String {
    let mut options = vec![
        "NOFORMAT".to_string(),
        "NOINIT".to_string(),
        format!(
            "NAME = N'{}-{}'",
            quote_literal(&request.database),
            request.mode
        ),
        "SKIP".to_string(),
        "NOREWIND".to_string(),
        "NOUNLOAD".to_string(),
    ];
    if request.mode == BackupMode::Diff {
        options.push("DIFFERENTIAL".to_string());
    }
    if request.compress {
        options.push("COMPRESSION".to_string());
    }
    format!(
        "BACKUP DATABASE {} TO DISK = N'{}' WITH {}",
        quote_identifier(&request.database),
        quote_literal(&output.display().to_string()),
        options.join(", ")
    )
}

/// Splits `sqlcmd -W -s <TAB>` output into result sets.
///
/// Each set is a header line, a line of dashes, then the rows; sets are
/// separated by blank lines.
pub fn parse_output(stdout: &str) -> Vec<ResultSet> {
    let mut sets = Vec::new();
    let mut current: Option<ResultSet> = None;
    let mut expect_dashes = false;

    for line in stdout.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            if let Some(set) = current.take() {
                sets.push(set);
            }
            continue;
        }
        let cells: Vec<String> = line
            .split(COLUMN_SEPARATOR)
            .map(|c| c.trim().to_string())
            .collect();
        match current.as_mut() {
            None => {
                current = Some(ResultSet {
                    columns: cells,
                    rows: Vec::new(),
                });
                expect_dashes = true;
            }
            Some(set) => {
                if expect_dashes && is_dash_line(line) {
                    expect_dashes = false;
                    continue;
                }
                expect_dashes = false;
                set.rows.push(cells);
            }
        }
    }
    if let Some(set) = current {
        sets.push(set);
    }
    sets
}

fn is_dash_line(line: &str) -> bool {
    line.chars().any(|c| c == '-') && line.chars().all(|c| c == '-' || c == COLUMN_SEPARATOR)
}

fn column_index(set: &ResultSet, name: &str) -> Option<usize> {
    set.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
}

/// `<dataPath>/<database><suffix>[_<n>].<ext>`; the first file of a kind has no index.
fn relocated_file(data_path: &Path, database: &str, suffix: &str, n: usize, ext: &str) -> PathBuf {
    let stem = if n > 1 {
        format!("{}{}_{}", database, suffix, n)
    } else {
        format!("{}{}", database, suffix)
    };
    data_path.join(format!("{}.{}", stem, ext))
}

fn quote_identifier(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

fn quote_literal(value: &str) -> String {
    value.replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::messages::daily_log_path;
    use crate::models::{LogsSettings, SiteSettings};
    use chrono::Local;

    fn instance(name: &str) -> Instance {
        Instance {
            name: name.to_string(),
            host: "WS1".to_string(),
            package: Some("SqlServer".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_server_name() {
        assert_eq!(SqlServer::server_name(&instance("MSSQLSERVER")), "localhost");
        assert_eq!(SqlServer::server_name(&instance("DEV")), "localhost\\DEV");

        let mut explicit = instance("DEV");
        explicit.server = Some("db.example.org,1433".to_string());
        assert_eq!(SqlServer::server_name(&explicit), "db.example.org,1433");
    }

    #[test]
    fn test_command_args_authentication() {
        let args = SqlServer::command_args(&instance("MSSQLSERVER"), "SELECT 1");
        assert!(args.contains(&"-E".to_string()));
        assert!(args.contains(&"-b".to_string()));

        let mut with_account = instance("MSSQLSERVER");
        with_account
            .accounts
            .insert("sa".to_string(), "secret".to_string());
        let args = SqlServer::command_args(&with_account, "SELECT 1");
        assert!(!args.contains(&"-E".to_string()));
        let user = args.iter().position(|a| a == "-U").unwrap();
        assert_eq!(args[user + 1], "sa");
        assert!(!args.contains(&"-P".to_string()));
        assert!(!args.contains(&"secret".to_string()));
        assert_eq!(args.last().unwrap(), "SET NOCOUNT ON; SELECT 1");

        let env = SqlServer::command_env(&with_account);
        assert_eq!(env.get("SQLCMDPASSWORD").map(String::as_str), Some("secret"));
        assert!(SqlServer::command_env(&instance("MSSQLSERVER")).is_empty());
    }

    #[test]
    fn test_parse_output_multiple_sets() {
        let stdout = "name\tstate\n----\t-----\nSales\tONLINE\nHR\tOFFLINE\n\nc\n-\n1\n";
        let sets = parse_output(stdout);
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0].columns, vec!["name", "state"]);
        assert_eq!(
            sets[0].rows,
            vec![vec!["Sales", "ONLINE"], vec!["HR", "OFFLINE"]]
        );
        assert_eq!(sets[1].rows, vec![vec!["1"]]);
    }

    #[test]
    fn test_parse_output_empty() {
        assert!(parse_output("").is_empty());
        assert!(parse_output("\r\n\r\n").is_empty());
    }

    #[test]
    fn test_backup_statement() {
        let request = BackupRequest {
            database: "Sal]es".to_string(),
            mode: BackupMode::Diff,
            compress: true,
            ..Default::default()
        };
        let sql = backup_statement(&request, Path::new("/b/it's.backup"));
        assert!(sql.starts_with("BACKUP DATABASE [Sal]]es] TO DISK = N'/b/it''s.backup'"));
        assert!(sql.contains("DIFFERENTIAL"));
        assert!(sql.ends_with("COMPRESSION"));
    }

    #[test]
    fn test_relocated_files() {
        let data = Path::new("/data");
        assert_eq!(
            relocated_file(data, "Sales", "", 1, "mdf"),
            PathBuf::from("/data/Sales.mdf")
        );
        assert_eq!(
            relocated_file(data, "Sales", "_log", 2, "ldf"),
            PathBuf::from("/data/Sales_log_2.ldf")
        );
    }

    #[test]
    fn test_dummy_mode_skips_mutations() {
        // --- Setup ---
        // The client does not exist: any attempt to run it would be an error.
        let backend = SqlServer::with_program("ttp-missing-sqlcmd");
        let mut ctx = RunContext::new("dbms");
        ctx.set_colored(false);
        ctx.set_dummy(true);
        let request = BackupRequest {
            database: "Sales".to_string(),
            output: Some(PathBuf::from("/b/Sales.backup")),
            ..Default::default()
        };

        // --- Execute ---
        let outcome = backend.backup_database(&mut ctx, &instance("MSSQLSERVER"), &request);

        // --- Assert ---
        assert!(outcome.status);
        assert!(!ctx.has_errors());
    }

    #[test]
    fn test_missing_client_is_an_error() {
        let backend = SqlServer::with_program("ttp-missing-sqlcmd");
        let mut ctx = RunContext::new("dbms");
        ctx.set_colored(false);
        let databases = backend.get_live_databases(&mut ctx, &instance("MSSQLSERVER"));
        assert!(databases.is_empty());
        assert_eq!(ctx.error_count(), 1);
    }

    #[test]
    fn test_account_secret_stays_out_of_messages_and_log() {
        // --- Setup ---
        let dir = tempfile::tempdir().unwrap();
        let backend = SqlServer::with_program("ttp-missing-sqlcmd");
        let mut ctx = RunContext::new("dbms");
        ctx.set_colored(false);
        let site = SiteSettings {
            logs: LogsSettings {
                root_dir: Some(dir.path().to_path_buf()),
                ..Default::default()
            },
            ..Default::default()
        };
        ctx.apply_site_settings("WS1", &site);
        let mut with_account = instance("MSSQLSERVER");
        with_account
            .accounts
            .insert("sa".to_string(), "TopSecret42".to_string());

        // --- Execute ---
        let databases = backend.get_live_databases(&mut ctx, &with_account);

        // --- Assert ---
        assert!(databases.is_empty());
        assert_eq!(ctx.error_count(), 1);
        let log = daily_log_path(dir.path(), Local::now().naive_local());
        let content = std::fs::read_to_string(log).unwrap();
        assert!(content.contains("(ERR) [dbms]"));
        assert!(content.contains("-U sa"));
        assert!(!content.contains("TopSecret42"));
    }
}
