// src/bin/ttp.rs

use clap::Parser;
use std::env;
use ttp::{
    cli::{
        Cli,
        dispatcher::{self, Runtime},
    },
    core::{config_loader::ConfigLoader, dbms::BackendRegistry, paths::SitePaths},
    state::RunContext,
    system::host,
};

/// The entry point of every TTP command.
///
/// The command is named after the file the binary was started under, so that
/// `dbms`, `daemon` or `services` may all be links to this one binary.
/// Errors are counted along the run; the exit code is their number.
fn main() {
    env_logger::init();

    let argv0 = env::args().next().unwrap_or_default();
    let cli = Cli::parse();
    log::debug!("CLI args parsed: {:?}", cli);

    let (command, args) =
        dispatcher::resolve_invocation(dispatcher::command_name_from_argv0(&argv0), cli.args);
    let mut ctx = RunContext::new(command);

    if !dispatcher::check_command_name(&mut ctx) {
        ctx.exit(None);
    }

    let paths = match SitePaths::from_env() {
        Ok(paths) => paths,
        Err(e) => {
            ctx.error(e.to_string());
            ctx.exit(None);
        }
    };

    let hostname = host::hostname();
    let config = ConfigLoader::new(&paths).load(&mut ctx, &hostname);
    ctx.apply_site_settings(&hostname, config.site());

    let backends = BackendRegistry::with_defaults();
    let runtime = Runtime {
        config: &config,
        paths: &paths,
        backends: &backends,
        clock: dispatcher::local_now,
    };

    dispatcher::dispatch(&mut ctx, &runtime, args);
    ctx.exit(None);
}
