// src/cli/handlers/dbms.rs

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use serde_json::Value;
use std::path::PathBuf;

use crate::{
    cli::{
        args::{BaselineArgs, SelectorArgs},
        dispatcher::{Runtime, VerbDefinition},
        handlers::commons,
    },
    core::{
        reports::{self, ExecutionReport},
        resolver::{self, Target},
    },
    models::{BackupMode, BackupRequest, RestoreRequest, SqlOptions},
    state::RunContext,
};

pub static VERBS: &[VerbDefinition] = &[
    VerbDefinition {
        name: "backup",
        help: BACKUP_HELP,
        defaults: &[("compress", "no"), ("mode", "full")],
        handler: backup,
    },
    VerbDefinition {
        name: "list",
        help: LIST_HELP,
        defaults: &[("listinstances", "no"), ("listdb", "no"), ("listtables", "no")],
        handler: list,
    },
    VerbDefinition {
        name: "restore",
        help: RESTORE_HELP,
        defaults: &[("verifyonly", "no")],
        handler: restore,
    },
    VerbDefinition {
        name: "sql",
        help: SQL_HELP,
        defaults: &[
            ("tabular", "yes"),
            ("multiple", "no"),
            ("json", "no"),
            ("columns", "yes"),
        ],
        handler: sql,
    },
];

const BACKUP_HELP: &str = "\
# @(#) backup databases
# @(-) --service=<name>        acts on the named service
# @(-) --instance=<name>       acts on the named instance
# @(-) --database=<a,b>        backup these databases instead of those of the service
# @(-) --[no]full              run a full backup [${mode}]
# @(-) --[no]diff              run a differential backup
# @(-) --[no]compress          compress the backup [${compress}]
# @(-) --output=<file>         the output file, with a single database
# @(@) Without --database, every database of the service, or of the instance, is backuped.
# @(@) The default output is <backupPath>/<YYMMDD>/<host>-<instance>-<database>-<YYMMDD>-<HHMMSS>-<mode>.backup.
";

const LIST_HELP: &str = "\
# @(#) list the instances, databases or tables
# @(-) --[no]listinstances     list the instances of this host [${listinstances}]
# @(-) --service=<name>        acts on the named service
# @(-) --instance=<name>       acts on the named instance
# @(-) --[no]listdb            list the live databases [${listdb}]
# @(-) --database=<name>       the database whose tables are listed
# @(-) --[no]listtables        list the tables of the database [${listtables}]
";

const RESTORE_HELP: &str = "\
# @(#) restore a database
# @(-) --service=<name>        acts on the named service
# @(-) --instance=<name>       acts on the named instance
# @(-) --database=<name>       the database to restore
# @(-) --full=<file>           the full backup to restore
# @(-) --diff=<file>           a differential backup to apply after the full one
# @(-) --[no]verifyonly        only check that the backups are readable [${verifyonly}]
";

const SQL_HELP: &str = "\
# @(#) execute a SQL command
# @(-) --service=<name>        acts on the named service
# @(-) --instance=<name>       acts on the named instance
# @(-) --command=<sql>         the command to execute
# @(-) --[no]tabular           display the result as a table [${tabular}]
# @(-) --[no]multiple          keep every result set [${multiple}]
# @(-) --[no]json              display the result as JSON [${json}]
# @(-) --[no]columns           keep the column names [${columns}]
";

fn target(ctx: &mut RunContext, runtime: &Runtime, selector: &SelectorArgs) -> Option<Target> {
    resolver::resolve_selector(ctx, runtime.config, &selector.selector())
}

// --- backup ---

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, disable_help_flag = true)]
struct BackupArgs {
    #[command(flatten)]
    baseline: BaselineArgs,
    #[command(flatten)]
    selector: SelectorArgs,

    #[arg(long, overrides_with = "nofull")]
    full: bool,
    #[arg(long, overrides_with = "full", hide = true)]
    nofull: bool,
    #[arg(long, overrides_with = "nodiff")]
    diff: bool,
    #[arg(long, overrides_with = "diff", hide = true)]
    nodiff: bool,
    #[arg(long, overrides_with = "nocompress")]
    compress: bool,
    #[arg(long, overrides_with = "compress", hide = true)]
    nocompress: bool,
    #[arg(long)]
    output: Option<PathBuf>,
}

fn backup(ctx: &mut RunContext, runtime: &Runtime, args: Vec<String>) -> Result<()> {
    let args = BackupArgs::try_parse_from(&args)?;
    args.baseline.apply(ctx);

    // Every option is checked before giving up, so all problems show at once.
    if args.full && args.diff {
        ctx.error(t!("dbms.backup.error.both_modes"));
    }
    let mode = if args.diff {
        BackupMode::Diff
    } else {
        BackupMode::Full
    };
    let Some(target) = target(ctx, runtime, &args.selector) else {
        return Ok(());
    };
    let databases = resolver::select_databases(ctx, runtime.backends, &target);
    if args.output.is_some() && databases.len() != 1 {
        ctx.error(t!("dbms.backup.error.output_needs_one"));
    }
    if ctx.has_errors() {
        return Ok(());
    }

    let mut done = 0;
    for database in &databases {
        if !resolver::database_exists(ctx, runtime.backends, &target.instance, database) {
            ctx.error(format!(
                t!("dbms.error.unknown_database"),
                database = database,
                instance = target.instance.name
            ));
            continue;
        }
        let request = BackupRequest {
            database: database.clone(),
            output: args.output.clone(),
            mode,
            compress: args.compress,
        };
        let outcome = runtime
            .backends
            .backup_database(ctx, &target.instance, request, runtime.now());
        if !outcome.status {
            continue;
        }
        done += 1;
        let output = outcome
            .output
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        ctx.info(format!(
            t!("dbms.backup.done"),
            database = database,
            path = output
        ));
        let report = ExecutionReport::new(&target.instance.name, database)
            .with("mode", mode.to_string())
            .with("output", output)
            .with("compress", args.compress);
        reports::publish(ctx, runtime.config, &report, runtime.now());
    }
    commons::report_tally(ctx, done, databases.len(), t!("dbms.backup.tally"));
    Ok(())
}

// --- list ---

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, disable_help_flag = true)]
struct ListArgs {
    #[command(flatten)]
    baseline: BaselineArgs,
    #[command(flatten)]
    selector: SelectorArgs,

    #[arg(long, overrides_with = "nolistinstances")]
    listinstances: bool,
    #[arg(long, overrides_with = "listinstances", hide = true)]
    nolistinstances: bool,
    #[arg(long, overrides_with = "nolistdb")]
    listdb: bool,
    #[arg(long, overrides_with = "listdb", hide = true)]
    nolistdb: bool,
    #[arg(long, overrides_with = "nolisttables")]
    listtables: bool,
    #[arg(long, overrides_with = "listtables", hide = true)]
    nolisttables: bool,
}

fn list(ctx: &mut RunContext, runtime: &Runtime, args: Vec<String>) -> Result<()> {
    let args = ListArgs::try_parse_from(&args)?;
    args.baseline.apply(ctx);

    if args.listinstances {
        let names = runtime.config.instance_names();
        for name in &names {
            let package = runtime
                .config
                .instance(name)
                .and_then(|i| i.package.as_deref())
                .unwrap_or("-");
            println!("  {}: {}", name.cyan(), package);
        }
        ctx.info(format!(
            t!("dbms.list.instances_found"),
            count = names.len(),
            host = runtime.config.hostname()
        ));
    }
    if !args.listdb && !args.listtables {
        if !args.listinstances {
            ctx.warn(t!("dbms.list.nothing"));
        }
        return Ok(());
    }
    if args.listtables && args.selector.database.len() != 1 {
        ctx.error(t!("dbms.list.error.tables_need_one"));
    }
    let Some(target) = target(ctx, runtime, &args.selector) else {
        return Ok(());
    };
    if ctx.has_errors() {
        return Ok(());
    }

    if args.listdb {
        let databases = runtime.backends.get_live_databases(ctx, &target.instance);
        for database in &databases {
            println!("  {}", database);
        }
        ctx.info(format!(
            t!("dbms.list.databases_found"),
            count = databases.len(),
            instance = target.instance.name
        ));
    }
    if args.listtables {
        let Some(database) = target.databases.first() else {
            return Ok(());
        };
        if !resolver::database_exists(ctx, runtime.backends, &target.instance, database) {
            ctx.error(format!(
                t!("dbms.error.unknown_database"),
                database = database,
                instance = target.instance.name
            ));
            return Ok(());
        }
        let tables = runtime
            .backends
            .get_database_tables(ctx, &target.instance, database);
        for table in &tables {
            println!("  {}", table);
        }
        ctx.info(format!(
            t!("dbms.list.tables_found"),
            count = tables.len(),
            database = database
        ));
    }
    Ok(())
}

// --- restore ---

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, disable_help_flag = true)]
struct RestoreArgs {
    #[command(flatten)]
    baseline: BaselineArgs,
    #[command(flatten)]
    selector: SelectorArgs,

    #[arg(long)]
    full: Option<PathBuf>,
    #[arg(long)]
    diff: Option<PathBuf>,
    #[arg(long, overrides_with = "noverifyonly")]
    verifyonly: bool,
    #[arg(long, overrides_with = "verifyonly", hide = true)]
    noverifyonly: bool,
}

fn restore(ctx: &mut RunContext, runtime: &Runtime, args: Vec<String>) -> Result<()> {
    let args = RestoreArgs::try_parse_from(&args)?;
    args.baseline.apply(ctx);

    if args.selector.database.len() != 1 {
        ctx.error(t!("dbms.restore.error.one_database"));
    }
    let full = match &args.full {
        Some(path) if path.is_file() => Some(path.clone()),
        Some(path) => {
            ctx.error(format!(
                t!("dbms.restore.error.missing_file"),
                path = path.display()
            ));
            None
        }
        None => {
            ctx.error(t!("dbms.restore.error.full_required"));
            None
        }
    };
    if let Some(diff) = &args.diff {
        if !diff.is_file() {
            ctx.error(format!(
                t!("dbms.restore.error.missing_file"),
                path = diff.display()
            ));
        }
    }
    let Some(target) = target(ctx, runtime, &args.selector) else {
        return Ok(());
    };
    let Some(full) = full else {
        return Ok(());
    };
    if ctx.has_errors() {
        return Ok(());
    }

    let Some(database) = args.selector.database.first().cloned() else {
        return Ok(());
    };
    let request = RestoreRequest {
        database: database.clone(),
        full: full.clone(),
        diff: args.diff.clone(),
        verify_only: args.verifyonly,
    };
    let restored = runtime
        .backends
        .restore_database(ctx, &target.instance, &request);
    if restored && !args.verifyonly {
        let report = ExecutionReport::new(&target.instance.name, &database)
            .with("full", full.display().to_string())
            .with(
                "diff",
                args.diff
                    .as_ref()
                    .map(|d| Value::from(d.display().to_string()))
                    .unwrap_or(Value::Null),
            );
        reports::publish(ctx, runtime.config, &report, runtime.now());
    }
    let what = if args.verifyonly {
        t!("dbms.restore.tally_verified")
    } else {
        t!("dbms.restore.tally")
    };
    commons::report_tally(ctx, usize::from(restored), 1, what);
    Ok(())
}

// --- sql ---

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, disable_help_flag = true)]
struct SqlArgs {
    #[command(flatten)]
    baseline: BaselineArgs,
    #[command(flatten)]
    selector: SelectorArgs,

    #[arg(long)]
    command: Option<String>,
    #[arg(long, overrides_with = "notabular")]
    tabular: bool,
    #[arg(long, overrides_with = "tabular", hide = true)]
    notabular: bool,
    #[arg(long, overrides_with = "nomultiple")]
    multiple: bool,
    #[arg(long, overrides_with = "multiple", hide = true)]
    nomultiple: bool,
    #[arg(long, overrides_with = "nojson")]
    json: bool,
    #[arg(long, overrides_with = "json", hide = true)]
    nojson: bool,
    #[arg(long, overrides_with = "nocolumns")]
    columns: bool,
    #[arg(long, overrides_with = "columns", hide = true)]
    nocolumns: bool,
}

fn sql(ctx: &mut RunContext, runtime: &Runtime, args: Vec<String>) -> Result<()> {
    let args = SqlArgs::try_parse_from(&args)?;
    args.baseline.apply(ctx);

    let command = args
        .command
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty());
    if command.is_none() {
        ctx.error(t!("dbms.sql.error.no_command"));
    }
    let Some(target) = target(ctx, runtime, &args.selector) else {
        return Ok(());
    };
    let Some(command) = command else {
        return Ok(());
    };

    let options = SqlOptions {
        tabular: !args.notabular && !args.json,
        multiple: args.multiple,
        json: args.json,
        columns: !args.nocolumns,
    };
    let result = runtime
        .backends
        .exec_sql_command(ctx, &target.instance, command, &options);
    if !result.ok {
        if !ctx.has_errors() {
            ctx.error(t!("dbms.sql.error.failed"));
        }
        return Ok(());
    }

    if options.json {
        let sets: Vec<Value> = result.sets.iter().map(|s| s.to_json()).collect();
        let value = if options.multiple {
            Value::Array(sets)
        } else {
            sets.into_iter().next().unwrap_or(Value::Array(Vec::new()))
        };
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else if options.tabular {
        for set in &result.sets {
            println!("{}", commons::format_table(set, ctx.is_colored()));
        }
    } else {
        for row in result.sets.iter().flat_map(|s| s.rows.iter()) {
            println!("{}", row.join("\t"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{config_loader::Config, dbms::tests::stub_registry, paths::SitePaths};
    use chrono::{NaiveDate, NaiveDateTime};
    use serde_json::json;

    fn fixed_clock() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(10, 20, 30)
            .unwrap()
    }

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    struct Fixture {
        ctx: RunContext,
        config: Config,
        backups: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let backups = tempfile::tempdir().unwrap();
        let mut ctx = RunContext::new("dbms");
        ctx.set_colored(false);
        let host = json!({
            "DBMSInstances": {
                "MSSQLSERVER": { "package": "Stub", "backupPath": backups.path() }
            },
            "Services": {
                "crm": { "instance": "MSSQLSERVER", "databases": ["Sales", "Missing"] }
            }
        });
        let site = json!({ "executionReports": { "withFile": { "enabled": false } } });
        let config = Config::from_documents(&mut ctx, "WS1", site, host);
        Fixture {
            ctx,
            config,
            backups,
        }
    }

    #[test]
    fn test_backup_tallies_partial_success_once() {
        // --- Setup ---
        let mut f = fixture();
        let backends = stub_registry(&["Sales"]);
        let paths = SitePaths::default();
        let runtime = Runtime {
            config: &f.config,
            paths: &paths,
            backends: &backends,
            clock: fixed_clock,
        };

        // --- Execute ---
        backup(&mut f.ctx, &runtime, args(&["--service=crm"])).unwrap();

        // --- Assert ---
        // One error for the missing database, one for the 1/2 tally.
        assert_eq!(f.ctx.error_count(), 2);
        assert!(f.backups.path().join("240601").is_dir());
    }

    #[test]
    fn test_backup_explicit_database() {
        let mut f = fixture();
        let backends = stub_registry(&["Sales"]);
        let paths = SitePaths::default();
        let runtime = Runtime {
            config: &f.config,
            paths: &paths,
            backends: &backends,
            clock: fixed_clock,
        };
        backup(
            &mut f.ctx,
            &runtime,
            args(&["--service=crm", "--database=Sales", "--diff"]),
        )
        .unwrap();
        assert!(!f.ctx.has_errors());
    }

    #[test]
    fn test_backup_option_errors_are_all_reported() {
        let mut f = fixture();
        let backends = stub_registry(&["Sales"]);
        let paths = SitePaths::default();
        let runtime = Runtime {
            config: &f.config,
            paths: &paths,
            backends: &backends,
            clock: fixed_clock,
        };
        backup(
            &mut f.ctx,
            &runtime,
            args(&["--service=crm", "--full", "--diff", "--output=/tmp/x.backup"]),
        )
        .unwrap();
        // Both modes, then --output with the two databases of the service.
        assert_eq!(f.ctx.error_count(), 2);
    }

    #[test]
    fn test_restore_requires_full_backup() {
        let mut f = fixture();
        let backends = stub_registry(&["Sales"]);
        let paths = SitePaths::default();
        let runtime = Runtime {
            config: &f.config,
            paths: &paths,
            backends: &backends,
            clock: fixed_clock,
        };
        restore(
            &mut f.ctx,
            &runtime,
            args(&["--instance=MSSQLSERVER", "--database=Sales"]),
        )
        .unwrap();
        assert_eq!(f.ctx.error_count(), 1);
    }

    #[test]
    fn test_restore_from_existing_file() {
        let mut f = fixture();
        let full = f.backups.path().join("Sales.backup");
        std::fs::write(&full, "backup").unwrap();
        let backends = stub_registry(&["Sales"]);
        let paths = SitePaths::default();
        let runtime = Runtime {
            config: &f.config,
            paths: &paths,
            backends: &backends,
            clock: fixed_clock,
        };
        let full_arg = format!("--full={}", full.display());
        restore(
            &mut f.ctx,
            &runtime,
            args(&["--instance=MSSQLSERVER", "--database=Sales", &full_arg]),
        )
        .unwrap();
        assert!(!f.ctx.has_errors());
    }

    #[test]
    fn test_sql_without_command_is_an_error() {
        let mut f = fixture();
        let backends = stub_registry(&["Sales"]);
        let paths = SitePaths::default();
        let runtime = Runtime {
            config: &f.config,
            paths: &paths,
            backends: &backends,
            clock: fixed_clock,
        };
        sql(&mut f.ctx, &runtime, args(&["--instance=MSSQLSERVER"])).unwrap();
        assert_eq!(f.ctx.error_count(), 1);

        let mut f = fixture();
        let runtime = Runtime {
            config: &f.config,
            paths: &paths,
            backends: &backends,
            clock: fixed_clock,
        };
        sql(
            &mut f.ctx,
            &runtime,
            args(&["--instance=MSSQLSERVER", "--command=select 1", "--json"]),
        )
        .unwrap();
        assert!(!f.ctx.has_errors());
    }
}
