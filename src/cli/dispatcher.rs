// src/cli/dispatcher.rs

use anyhow::Result;
use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use std::path::Path;

use crate::{
    cli::handlers,
    constants::RESERVED_WORDS,
    core::{
        config_loader::Config,
        dbms::BackendRegistry,
        help,
        paths::SitePaths,
        verbs::{self, VerbEntry, VerbSource},
    },
    state::RunContext,
};

/// What every verb handler gets besides its context and arguments.
pub struct Runtime<'a> {
    pub config: &'a Config,
    pub paths: &'a SitePaths,
    pub backends: &'a BackendRegistry,
    pub clock: fn() -> NaiveDateTime,
}

impl Runtime<'_> {
    pub fn now(&self) -> NaiveDateTime {
        (self.clock)()
    }
}

pub fn local_now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

pub type VerbHandler = fn(&mut RunContext, &Runtime, Vec<String>) -> Result<()>;

// --- Command Definition and Registry ---

/// A built-in verb: its tagged help block, the defaults its usage lines
/// refer to, and its handler.
pub struct VerbDefinition {
    pub name: &'static str,
    pub help: &'static str,
    pub defaults: &'static [(&'static str, &'static str)],
    pub handler: VerbHandler,
}

pub struct CommandDefinition {
    pub name: &'static str,
    pub one_liner: &'static str,
    pub verbs: &'static [VerbDefinition],
}

/// The commands compiled into the binary.
static COMMAND_REGISTRY: &[CommandDefinition] = &[
    CommandDefinition {
        name: "daemon",
        one_liner: "Manage the daemons of the host",
        verbs: handlers::daemon::VERBS,
    },
    CommandDefinition {
        name: "dbms",
        one_liner: "Manage the DBMS instances of the host",
        verbs: handlers::dbms::VERBS,
    },
    CommandDefinition {
        name: "services",
        one_liner: "Query the services defined on the host",
        verbs: handlers::services::VERBS,
    },
    CommandDefinition {
        name: "ttp",
        one_liner: "The Tools Project",
        verbs: handlers::ttp::VERBS,
    },
];

pub fn find_command(name: &str) -> Option<&'static CommandDefinition> {
    COMMAND_REGISTRY.iter().find(|cmd| cmd.name == name)
}

pub fn command_names() -> Vec<&'static str> {
    COMMAND_REGISTRY.iter().map(|cmd| cmd.name).collect()
}

/// The command a process runs as: the file name it was started under,
/// without its extension.
pub fn command_name_from_argv0(argv0: &str) -> String {
    let name = Path::new(argv0)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    for suffix in [".exe", ".EXE", ".pl"] {
        if let Some(stem) = name.strip_suffix(suffix) {
            return stem.to_string();
        }
    }
    name
}

/// `ttp <command> <verb> ...` runs like `<command> <verb> ...` when
/// `<command>` is not itself a verb of `ttp`.
pub fn resolve_invocation(command: String, mut args: Vec<String>) -> (String, Vec<String>) {
    if command != "ttp" {
        return (command, args);
    }
    let Some(first) = args.first() else {
        return (command, args);
    };
    let is_ttp_verb = handlers::ttp::VERBS.iter().any(|v| v.name == first);
    if !is_ttp_verb && first != "ttp" && find_command(first).is_some() {
        let command = args.remove(0);
        return (command, args);
    }
    (command, args)
}

/// A command name must not be one of the reserved words.
pub fn check_command_name(ctx: &mut RunContext) -> bool {
    let name = ctx.command().to_string();
    if name.is_empty() || RESERVED_WORDS.contains(&name.as_str()) {
        ctx.error(format!(t!("dispatch.error.reserved"), command = name));
        return false;
    }
    true
}

fn wants_help(args: &[String]) -> bool {
    args.iter()
        .take_while(|a| a.as_str() != "--")
        .any(|a| a == "--help" || a == "-h")
}

fn builtin_verb(command: Option<&CommandDefinition>, name: &str) -> Option<&'static VerbDefinition> {
    command
        .map(|c| c.verbs)
        .and_then(|verbs| verbs.iter().find(|v| v.name == name))
}

/// Runs one invocation of a command; the outcome is in the context's error count.
pub fn dispatch(ctx: &mut RunContext, runtime: &Runtime, args: Vec<String>) {
    log::debug!("Dispatching {} {:?}", ctx.command(), args);
    if !check_command_name(ctx) {
        return;
    }

    let command = find_command(ctx.command());
    let builtins: Vec<(&'static str, &'static str)> = command
        .map(|c| c.verbs.iter().map(|v| (v.name, v.help)).collect())
        .unwrap_or_default();
    let external = verbs::discover(&runtime.paths.verbs_dirs(ctx.command()));
    if command.is_none() && external.is_empty() {
        ctx.error(format!(
            t!("dispatch.error.unknown_command"),
            command = ctx.command()
        ));
        return;
    }
    let catalog = verbs::catalog(&builtins, external);
    let one_liner = command.map(|c| c.one_liner).unwrap_or("");

    let mut args = args.into_iter();
    let verb_name = match args.next() {
        Some(name) if name != "--help" && name != "-h" => name,
        _ => {
            println!(
                "{}",
                help::render_command_help(ctx.command(), one_liner, &verbs::summaries(&catalog))
            );
            return;
        }
    };
    ctx.set_verb(&verb_name);

    let Some(entry) = catalog.iter().find(|v| v.name == verb_name) else {
        ctx.error(format!(
            t!("dispatch.error.unknown_verb"),
            verb = verb_name,
            command = ctx.command()
        ));
        return;
    };
    let rest: Vec<String> = args.collect();

    if wants_help(&rest) {
        print_verb_help(ctx, one_liner, entry, builtin_verb(command, &verb_name));
        return;
    }

    match &entry.source {
        VerbSource::Builtin(_) => {
            let Some(verb) = builtin_verb(command, &verb_name) else {
                return;
            };
            if let Err(e) = (verb.handler)(ctx, runtime, rest) {
                ctx.error(format!("{:#}", e).trim_end());
            }
        }
        VerbSource::External(path) => {
            verbs::run_external(ctx, path, &rest, runtime.config.hostname());
        }
    }
}

fn print_verb_help(
    ctx: &mut RunContext,
    one_liner: &str,
    entry: &VerbEntry,
    builtin: Option<&VerbDefinition>,
) {
    let help = match entry.help() {
        Ok(help) => help,
        Err(e) => {
            ctx.error(e.to_string());
            return;
        }
    };
    let defaults: BTreeMap<String, String> = builtin
        .map(|v| v.defaults)
        .unwrap_or(&[])
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let command = ctx.command().to_string();
    println!(
        "{}",
        help::render_verb_help(&command, one_liner, &entry.name, &help, &defaults)
    );
}
