use std::process::ExitCode;

use bootchart_core::{
    ArchiveBuilder, ArchiveRequest, BootchartError, BootchartResult, Collector,
    DetectOutcome, Detector, DetectorPaths, DetectorSettings, RuntimeConfig, command_basename,
    wait_for_boot,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::Command;
use crate::session::{BootSession, Mode};

// ---------------------------------------------------------------------------
// Public entry point
// ---------------------------------------------------------------------------

pub async fn run(command: Command, config: &RuntimeConfig) -> BootchartResult<ExitCode> {
    match command {
        Command::Start { command } => start(config, command).await,
        Command::Wait => wait(config).await.map(|()| ExitCode::SUCCESS),
        Command::Stop => stop(config, None).await.map(|()| ExitCode::SUCCESS),
    }
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

/// `start [cmd...]`: sample in the background, or around a single command.
async fn start(config: &RuntimeConfig, command: Vec<String>) -> BootchartResult<ExitCode> {
    let mut session = BootSession::new(Mode::Manual, config.sample_hz);
    session.collector = Some(Collector::from_config(config).start(session.sample_hz)?);

    let Some((program, args)) = command.split_first() else {
        info!(session = %session, "sampling in background; run `bootchartd stop` to archive");
        return Ok(ExitCode::SUCCESS);
    };

    let name = command_basename(program);
    info!(command = %name, session = %session, "sampling command");
    let status = tokio::process::Command::new(program).args(args).status().await;

    // Archive whatever was sampled, even if the command failed to run.
    stop(config, Some(name)).await?;

    match status {
        Ok(status) if status.success() => Ok(ExitCode::SUCCESS),
        Ok(status) => {
            warn!(%status, "sampled command failed");
            let code = status.code().and_then(|c| u8::try_from(c).ok()).unwrap_or(1);
            Ok(ExitCode::from(code))
        }
        Err(e) => Err(BootchartError::Internal(format!("run {program}: {e}"))),
    }
}

/// `wait`: block until boot completes, then archive.
async fn wait(config: &RuntimeConfig) -> BootchartResult<()> {
    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let detector = Detector::new(DetectorPaths::default(), DetectorSettings::default());
    match wait_for_boot(detector, config.detect_timeout, cancel).await {
        DetectOutcome::Completed { matched } => {
            info!(program = %matched, "boot complete");
            stop(config, None).await
        }
        DetectOutcome::TimedOut => Err(BootchartError::DetectTimeout(
            config.detect_timeout.map(|d| d.as_secs()).unwrap_or_default(),
        )),
        DetectOutcome::Cancelled => {
            info!("detection cancelled, nothing archived");
            Ok(())
        }
    }
}

/// `stop`: dump and archive the collector's samples now.
async fn stop(config: &RuntimeConfig, command: Option<String>) -> BootchartResult<()> {
    let request = ArchiveRequest::from_config(config).with_command(command);
    let summary = ArchiveBuilder::from_config(config).build(&request).await?;
    info!(
        path = %summary.path.display(),
        entries = summary.entries.len(),
        bytes = summary.bytes,
        "boot chart archived"
    );
    if let Some(image) = &summary.rendered {
        info!(path = %image.display(), "boot chart rendered");
    }
    Ok(())
}

async fn cancel_on_signal(cancel: CancellationToken) {
    let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "cannot listen for SIGTERM");
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
    cancel.cancel();
}
