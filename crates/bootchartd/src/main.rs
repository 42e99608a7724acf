mod cli;
mod cmd;
mod logging;
mod pid1;
mod session;

use std::process::ExitCode;

use bootchart_core::RuntimeConfig;

use crate::cli::{Command, Invocation};

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args_os()
        .map(|a| a.to_string_lossy().into_owned())
        .collect();

    match cli::classify(std::process::id(), &args) {
        Invocation::Pid1 => pid1::run(args),
        Invocation::Usage(e) => {
            // `--help` and `--version` land here too and exit 0.
            let _ = e.print();
            ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(2))
        }
        Invocation::Command(command) => run_command(command),
    }
}

fn run_command(command: Command) -> ExitCode {
    // The config decides where logs go, so it is loaded under a scoped
    // stderr subscriber before the global one is installed.
    let config = tracing::subscriber::with_default(logging::stderr_subscriber(), RuntimeConfig::load);

    let _guard = match &config.log_file {
        Some(path) => match logging::init_with_file(path) {
            Ok(guard) => Some(guard),
            Err(e) => {
                logging::init_stderr();
                tracing::warn!("file logging unavailable, using stderr only: {e}");
                None
            }
        },
        None => {
            logging::init_stderr();
            None
        }
    };

    // Built by hand rather than with `#[tokio::main]`: the PID 1 path must
    // never start a runtime.
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(cmd::run(command, &config)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
