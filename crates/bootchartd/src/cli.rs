//! Invocation classification.
//!
//! As PID 1 our arguments are whatever the kernel left on its command line,
//! so they are never fed to clap. Otherwise an explicit subcommand is
//! required and anything else is a usage error.

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "bootchartd", version, arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Start sampling; with a command, sample it and archive when it exits
    Start {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Wait for boot to complete, then archive the samples
    Wait,
    /// Archive the samples collected so far
    Stop,
}

#[derive(Debug)]
pub enum Invocation {
    /// Started by the kernel as init.
    Pid1,
    Command(Command),
    /// Unrecognized arguments (or `--help`); carries clap's usage output.
    Usage(clap::Error),
}

pub fn classify(pid: u32, args: &[String]) -> Invocation {
    if pid == 1 {
        return Invocation::Pid1;
    }
    match Cli::try_parse_from(args) {
        Ok(cli) => Invocation::Command(cli.command),
        Err(e) => Invocation::Usage(e),
    }
}
