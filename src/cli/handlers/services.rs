// src/cli/handlers/services.rs

use anyhow::Result;
use clap::Parser;
use colored::Colorize;

use crate::{
    cli::{
        args::BaselineArgs,
        dispatcher::{Runtime, VerbDefinition},
    },
    state::RunContext,
};

pub static VERBS: &[VerbDefinition] = &[
    VerbDefinition {
        name: "list",
        help: LIST_HELP,
        defaults: &[("hidden", "no")],
        handler: list,
    },
    VerbDefinition {
        name: "workloads",
        help: WORKLOADS_HELP,
        defaults: &[],
        handler: workloads,
    },
];

const LIST_HELP: &str = "\
# @(#) list the services defined on this host
# @(-) --[no]hidden            also list the hidden services [${hidden}]
";

const WORKLOADS_HELP: &str = "\
# @(#) list the workloads, or the tasks of one workload
# @(-) --workload=<name>       display the tasks of this workload
# @(@) Tasks are sorted on their 'order' key, falling back to the name of their service.
# @(@) Numeric keys come first, in numeric order; the others follow in text order.
";

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, disable_help_flag = true)]
struct ListArgs {
    #[command(flatten)]
    baseline: BaselineArgs,

    #[arg(long, overrides_with = "nohidden")]
    hidden: bool,
    #[arg(long, overrides_with = "hidden", hide = true)]
    nohidden: bool,
}

fn list(ctx: &mut RunContext, runtime: &Runtime, args: Vec<String>) -> Result<()> {
    let args = ListArgs::try_parse_from(&args)?;
    args.baseline.apply(ctx);

    let services = runtime.config.services(args.hidden);
    for (name, service) in &services {
        let instance = service.instance.as_deref().unwrap_or("-");
        let mark = if service.hidden { " (hidden)" } else { "" };
        println!("  {}: {}{}", name.cyan(), instance, mark);
    }
    ctx.info(format!(
        t!("services.list.found"),
        count = services.len(),
        host = runtime.config.hostname()
    ));
    Ok(())
}

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, disable_help_flag = true)]
struct WorkloadsArgs {
    #[command(flatten)]
    baseline: BaselineArgs,

    #[arg(long)]
    workload: Option<String>,
}

fn workloads(ctx: &mut RunContext, runtime: &Runtime, args: Vec<String>) -> Result<()> {
    let args = WorkloadsArgs::try_parse_from(&args)?;
    args.baseline.apply(ctx);

    let Some(workload) = args.workload else {
        let names = runtime.config.workload_names();
        for name in &names {
            println!("  {}", name.cyan());
        }
        ctx.info(format!(t!("services.workloads.found"), count = names.len()));
        return Ok(());
    };

    let tasks = runtime.config.workload_tasks(&workload);
    if tasks.is_empty() {
        ctx.warn(format!(t!("services.workloads.empty"), workload = workload));
        return Ok(());
    }
    for task in &tasks {
        println!(
            "  {} {}: {}",
            task.sort_key().yellow(),
            task.service.cyan(),
            serde_json::to_string(&task.task)?
        );
    }
    Ok(())
}
