use clap::Parser;

pub mod args;
pub mod dispatcher;
pub mod handlers;

/// ttp: The Tools Project.
///
/// The binary is a multicall one: it runs as the command named after the
/// file it was started under (`dbms`, `daemon`, `services`, `ttp`).
#[derive(Parser, Debug)]
#[command(
    version,
    about,
    disable_help_flag = true,
    disable_version_flag = true,
    disable_help_subcommand = true
)]
pub struct Cli {
    /// The verb and its arguments; each verb parses its own.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}
