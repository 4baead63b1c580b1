use anyhow::Result;
use clap::Parser;
use std::sync::Arc;

use theme_engine::engine::CancellationToken;
use theme_engine::logging::{self, Logger};
use theme_engine::{cli, commands};

fn main() -> Result<()> {
    let _ = enable_ansi_support::enable_ansi_support();
    let args = cli::Cli::parse();

    let command = match &args.command {
        cli::Command::Apply(_) => "apply",
        cli::Command::Validate(_) => "validate",
        cli::Command::List => "list",
        cli::Command::Cache { .. } => "cache",
        cli::Command::Version => {
            commands::version::run();
            return Ok(());
        }
    };
    logging::init_subscriber(args.verbose, command);
    let log = Arc::new(Logger::new(command));

    match args.command {
        cli::Command::Apply(opts) => {
            let cancel = CancellationToken::new();
            let handler_token = cancel.clone();
            if let Err(e) = ctrlc::set_handler(move || handler_token.cancel()) {
                log.warn(&format!("interrupt handler not installed: {e}"));
            }
            commands::apply::run(&args.global, &opts, args.verbose, &cancel, &log)
        }
        cli::Command::Validate(opts) => commands::validate::run(&opts, &log),
        cli::Command::List => commands::list::run(&args.global, &log),
        cli::Command::Cache { action } => commands::cache::run(&args.global, action, &log),
        cli::Command::Version => Ok(()),
    }
}
