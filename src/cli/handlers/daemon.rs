// src/cli/handlers/daemon.rs

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser};
use std::path::PathBuf;

use crate::{
    cli::{
        args::BaselineArgs,
        dispatcher::{Runtime, VerbDefinition},
    },
    core::daemon::{self, Daemon, client, protocol},
    state::RunContext,
    system::executor,
};

pub static VERBS: &[VerbDefinition] = &[
    VerbDefinition {
        name: "command",
        help: COMMAND_HELP,
        defaults: &[("host", "localhost")],
        handler: command,
    },
    VerbDefinition {
        name: "start",
        help: START_HELP,
        defaults: &[],
        handler: start,
    },
    VerbDefinition {
        name: "status",
        help: STATUS_HELP,
        defaults: &[("host", "localhost")],
        handler: status,
    },
    VerbDefinition {
        name: "stop",
        help: STOP_HELP,
        defaults: &[("host", "localhost")],
        handler: stop,
    },
];

const START_HELP: &str = "\
# @(#) start a daemon
# @(-) --json=<file>           the JSON configuration of the daemon
# @(@) The daemon runs in the foreground, unless its configuration names an 'execPath'
# @(@) to be started in the background.
";

const COMMAND_HELP: &str = "\
# @(#) send a command to a running daemon
# @(-) --json=<file>           the JSON configuration of the daemon
# @(-) --port=<port>           the port the daemon listens on
# @(-) --host=<name>           the host the daemon runs on [${host}]
# @(-) --command=<line>        the command and its arguments
";

const STATUS_HELP: &str = "\
# @(#) display the status of a running daemon
# @(-) --json=<file>           the JSON configuration of the daemon
# @(-) --port=<port>           the port the daemon listens on
# @(-) --host=<name>           the host the daemon runs on [${host}]
";

const STOP_HELP: &str = "\
# @(#) ask a running daemon to terminate
# @(-) --json=<file>           the JSON configuration of the daemon
# @(-) --port=<port>           the port the daemon listens on
# @(-) --host=<name>           the host the daemon runs on [${host}]
";

/// How to reach a running daemon.
#[derive(Args, Debug, Default, Clone)]
struct AddressArgs {
    #[arg(long, conflicts_with = "port")]
    json: Option<PathBuf>,
    #[arg(long)]
    port: Option<u16>,
    #[arg(long, default_value = "localhost")]
    host: String,
}

impl AddressArgs {
    fn port(&self) -> Result<u16> {
        match (&self.json, self.port) {
            (Some(path), _) => Ok(daemon::load_config(path)?.listening_port),
            (None, Some(port)) => Ok(port),
            (None, None) => Err(anyhow!(t!("daemon.error.no_address"))),
        }
    }

    fn send(&self, line: &str) -> Result<String> {
        let port = self.port()?;
        let answer = client::send_command(&self.host, port, line)
            .with_context(|| format!("'{}' on {}:{}", line, self.host, port))?;
        Ok(answer.trim_end().to_string())
    }
}

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, disable_help_flag = true)]
struct StartArgs {
    #[command(flatten)]
    baseline: BaselineArgs,

    #[arg(long, required = true)]
    json: PathBuf,
}

fn start(ctx: &mut RunContext, _runtime: &Runtime, args: Vec<String>) -> Result<()> {
    let args = StartArgs::try_parse_from(&args)?;
    args.baseline.apply(ctx);

    let config = daemon::load_config(&args.json)?;

    if let Some(exec_path) = &config.exec_path {
        let json = args.json.display().to_string();
        let child_args = ["--json".to_string(), json];
        if ctx.is_dummy() {
            ctx.dummy(format!("{} {}", exec_path.display(), child_args.join(" ")));
            return Ok(());
        }
        let pid = executor::spawn_detached(exec_path, &child_args)?;
        ctx.info(format!(
            t!("daemon.started"),
            name = config.name.as_deref().unwrap_or_default(),
            pid = pid
        ));
        return Ok(());
    }

    let mut daemon = Daemon::from_config(&config)?;
    if let Err(e) = daemon.install_interrupt_handler() {
        ctx.warn(e.to_string());
    }
    daemon.run(ctx);
    Ok(())
}

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, disable_help_flag = true)]
struct CommandArgs {
    #[command(flatten)]
    baseline: BaselineArgs,
    #[command(flatten)]
    address: AddressArgs,

    #[arg(long, required = true)]
    command: String,
}

/// Prints the answer as is: daemon-specific commands are free to answer without `OK`.
fn command(ctx: &mut RunContext, _runtime: &Runtime, args: Vec<String>) -> Result<()> {
    let args = CommandArgs::try_parse_from(&args)?;
    args.baseline.apply(ctx);

    let answer = args.address.send(&args.command)?;
    println!("{}", answer);
    Ok(())
}

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, disable_help_flag = true)]
struct AddressOnlyArgs {
    #[command(flatten)]
    baseline: BaselineArgs,
    #[command(flatten)]
    address: AddressArgs,
}

fn status(ctx: &mut RunContext, _runtime: &Runtime, args: Vec<String>) -> Result<()> {
    let args = AddressOnlyArgs::try_parse_from(&args)?;
    args.baseline.apply(ctx);

    let answer = args.address.send("status")?;
    if protocol::is_ok(&answer) {
        ctx.info(answer);
    } else {
        ctx.error(format!(t!("daemon.error.unexpected_answer"), answer = answer));
    }
    Ok(())
}

fn stop(ctx: &mut RunContext, _runtime: &Runtime, args: Vec<String>) -> Result<()> {
    let args = AddressOnlyArgs::try_parse_from(&args)?;
    args.baseline.apply(ctx);

    if ctx.is_dummy() {
        ctx.dummy(format!(t!("daemon.dummy.stop"), host = args.address.host));
        return Ok(());
    }
    let answer = args.address.send("terminate")?;
    if protocol::is_ok(&answer) {
        ctx.info(t!("daemon.stop.requested"));
    } else {
        ctx.error(format!(t!("daemon.error.unexpected_answer"), answer = answer));
    }
    Ok(())
}
