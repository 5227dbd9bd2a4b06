// src/cli/args.rs

use clap::Args;

use crate::core::resolver::Selector;
use crate::state::RunContext;

/// Flags every verb accepts. `--help` is handled by the dispatcher before
/// the verb parses its arguments.
#[derive(Args, Debug, Default, Clone)]
pub struct BaselineArgs {
    /// Colorize the messages.
    #[arg(long, overrides_with = "nocolored")]
    pub colored: bool,
    #[arg(long, overrides_with = "colored", hide = true)]
    pub nocolored: bool,

    /// Show what would be done without doing it.
    #[arg(long, overrides_with = "nodummy")]
    pub dummy: bool,
    #[arg(long, overrides_with = "dummy", hide = true)]
    pub nodummy: bool,

    /// Show verbose messages.
    #[arg(long, overrides_with = "noverbose")]
    pub verbose: bool,
    #[arg(long, overrides_with = "verbose", hide = true)]
    pub noverbose: bool,
}

impl BaselineArgs {
    /// Applies the run flags; an absent flag keeps the current setting.
    pub fn apply(&self, ctx: &mut RunContext) {
        if self.colored {
            ctx.set_colored(true);
        } else if self.nocolored {
            ctx.set_colored(false);
        }
        if self.dummy {
            ctx.set_dummy(true);
        } else if self.nodummy {
            ctx.set_dummy(false);
        }
        if self.verbose {
            ctx.set_verbose(true);
        } else if self.noverbose {
            ctx.set_verbose(false);
        }
    }
}

/// `--service` / `--instance` / `--database`.
#[derive(Args, Debug, Default, Clone)]
pub struct SelectorArgs {
    /// The service whose instance and databases are used.
    #[arg(long)]
    pub service: Option<String>,

    /// The DBMS instance to work on.
    #[arg(long)]
    pub instance: Option<String>,

    /// Databases, replacing those of the service.
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    pub database: Vec<String>,
}

impl SelectorArgs {
    pub fn selector(&self) -> Selector {
        Selector {
            service: self.service.clone(),
            instance: self.instance.clone(),
            databases: self.database.clone(),
        }
    }
}
