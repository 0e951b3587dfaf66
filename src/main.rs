//! `dotstate` command-line entry point.
use std::io::Write as _;
use std::process::ExitCode;

use clap::Parser;
use dotstate::{cli, commands, logging};

fn main() -> ExitCode {
    let _ = enable_ansi_support::enable_ansi_support();
    let args = cli::Cli::parse();
    let name = args.command.name();
    logging::init_subscriber(
        args.global.verbose,
        args.global.debug,
        args.global.console_color(),
        name,
    );
    let log = logging::Logger::new(name);

    match commands::run(&args, &log, &mut std::io::stdout()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let _ = writeln!(std::io::stderr(), "dotstate: {e:#}");
            ExitCode::FAILURE
        }
    }
}
