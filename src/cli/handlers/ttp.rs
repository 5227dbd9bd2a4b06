// src/cli/handlers/ttp.rs

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use serde_json::Value;

use crate::{
    cli::{
        args::BaselineArgs,
        dispatcher::{self, Runtime, VerbDefinition},
    },
    core::verbs,
    state::RunContext,
};

pub static VERBS: &[VerbDefinition] = &[
    VerbDefinition {
        name: "list",
        help: LIST_HELP,
        defaults: &[("commands", "no")],
        handler: list,
    },
    VerbDefinition {
        name: "vars",
        help: VARS_HELP,
        defaults: &[],
        handler: vars,
    },
];

const LIST_HELP: &str = "\
# @(#) list the available commands
# @(-) --[no]commands          list the available commands [${commands}]
";

const VARS_HELP: &str = "\
# @(#) display a value of the host configuration
# @(-) --key=<a,b,c>           the path of the value in the configuration
# @(@) The value is looked up in the host configuration merged over the site one.
";

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, disable_help_flag = true)]
struct ListArgs {
    #[command(flatten)]
    baseline: BaselineArgs,

    #[arg(long, overrides_with = "nocommands")]
    commands: bool,
    #[arg(long, overrides_with = "commands", hide = true)]
    nocommands: bool,
}

/// `ttp list --commands`: the built-in commands and those found in the trees.
fn list(ctx: &mut RunContext, runtime: &Runtime, args: Vec<String>) -> Result<()> {
    let args = ListArgs::try_parse_from(&args)?;
    args.baseline.apply(ctx);

    if !args.commands {
        ctx.warn(t!("ttp.list.nothing"));
        return Ok(());
    }

    let mut names: Vec<String> = dispatcher::command_names()
        .into_iter()
        .map(str::to_string)
        .collect();
    names.extend(verbs::discover_commands(&runtime.paths.roots));
    names.sort_by_key(|n| n.to_lowercase());
    names.dedup();

    for name in &names {
        match dispatcher::find_command(name) {
            Some(command) => println!("  {}: {}", name.cyan(), command.one_liner),
            None => println!("  {}", name.cyan()),
        }
    }
    ctx.info(format!(t!("ttp.list.commands_found"), count = names.len()));
    Ok(())
}

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, disable_help_flag = true)]
struct VarsArgs {
    #[command(flatten)]
    baseline: BaselineArgs,

    #[arg(long, value_delimiter = ',', num_args = 1.., required = true)]
    key: Vec<String>,
}

/// `ttp vars --key=a,b,c`: a string is printed as is, anything else as JSON.
fn vars(ctx: &mut RunContext, runtime: &Runtime, args: Vec<String>) -> Result<()> {
    let args = VarsArgs::try_parse_from(&args)?;
    args.baseline.apply(ctx);

    match runtime.config.var(&args.key) {
        Some(Value::String(text)) => println!("{}", text),
        Some(value) => println!("{}", serde_json::to_string_pretty(value)?),
        None => ctx.warn(format!(t!("ttp.vars.not_found"), key = args.key.join(","))),
    }
    Ok(())
}
