//! Standing in for init.
//!
//! The kernel runs us as PID 1 (`init=/sbin/bootchartd`). We start the
//! collector, arrange for boot-completion detection, and then exec the real
//! init with the arguments we were given. Nothing here may prevent that exec:
//! every earlier failure is logged and skipped, because a boot without a
//! chart is fine and a boot without init is not.
//!
//! This path is strictly single-threaded (no tokio runtime), so the
//! environment can be mutated safely and nothing is lost across the exec.

use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{ExitCode, Stdio};
use std::thread;
use std::time::Duration;

use bootchart_core::constants::{
    BOOTCHART_INIT_ARG, FULL_ROOT_PROBE, PID1_SEARCH_PATH, PID1_SETTLE_MS,
};
use bootchart_core::{
    Collector, CollectorError, CollectorHandle, EnvOverride, InitTarget, RuntimeConfig, exec_init,
};
use tracing::{error, info, warn};

use crate::logging;
use crate::session::{BootSession, Mode};

/// Side effects of the handoff, in the order [`prepare_handoff`] drives them.
trait Pid1Host {
    /// Whether the real root filesystem is mounted (as opposed to an
    /// initramfs-style minimal root).
    fn root_is_full(&self) -> bool;
    fn start_collector(&mut self, sample_hz: u32) -> Result<CollectorHandle, CollectorError>;
    fn spawn_detector(&mut self);
    fn settle(&mut self);
    fn restore_env(&mut self);
}

/// The machine we are booting.
struct SystemHost {
    config: RuntimeConfig,
    self_exe: PathBuf,
    path_override: Option<EnvOverride>,
}

impl Pid1Host for SystemHost {
    fn root_is_full(&self) -> bool {
        Path::new(FULL_ROOT_PROBE).exists()
    }

    fn start_collector(&mut self, sample_hz: u32) -> Result<CollectorHandle, CollectorError> {
        Collector::from_config(&self.config).start_fresh(sample_hz)
    }

    fn spawn_detector(&mut self) {
        spawn_detector(&self.self_exe);
    }

    fn settle(&mut self) {
        thread::sleep(Duration::from_millis(PID1_SETTLE_MS));
    }

    fn restore_env(&mut self) {
        if let Some(path_override) = self.path_override.take() {
            path_override.restore();
        }
    }
}

/// Run the PID 1 protocol. Only returns if the exec into the real init
/// failed, in which case the system has no init.
pub fn run(args: Vec<String>) -> ExitCode {
    logging::init_stderr();
    let path_override = EnvOverride::apply("PATH", PID1_SEARCH_PATH);

    let (argv0, kernel_args) = match args.split_first() {
        Some((first, rest)) => (first.clone(), rest.to_vec()),
        None => (String::new(), Vec::new()),
    };
    let config = RuntimeConfig::load();
    let sample_hz = config.sample_hz;
    let mut host = SystemHost {
        config,
        self_exe: self_exe(&argv0),
        path_override: Some(path_override),
    };

    let env_override = std::env::var(BOOTCHART_INIT_ARG.trim_end_matches('=')).ok();
    let candidates = override_candidates(env_override, &kernel_args);
    let self_exe = host.self_exe.clone();
    let (session, target) = prepare_handoff(&mut host, sample_hz, &candidates, &self_exe);
    info!(session = %session, "handing over to init");

    let Err(e) = exec_init(&target, &kernel_args);

    // Nothing left to fall back to: the kernel panics once PID 1 exits.
    error!(
        init = %target,
        error = %e,
        "CATASTROPHIC: exec of the real init failed, the system has no init"
    );
    ExitCode::FAILURE
}

/// Everything before the exec: collector first, then (on a full root) the
/// detector and the settle delay, then init resolution and the environment
/// restore. Failures are logged; this always yields a target.
fn prepare_handoff(
    host: &mut impl Pid1Host,
    sample_hz: u32,
    override_args: &[String],
    self_exe: &Path,
) -> (BootSession, InitTarget) {
    let early_root = !host.root_is_full();
    let mut session = BootSession::new(Mode::Pid1 { early_root }, sample_hz);
    info!(early_root, "bootchartd running as init");

    match host.start_collector(sample_hz) {
        Ok(handle) => session.collector = Some(handle),
        Err(e) => error!(error = %e, "collector failed to start, booting without a chart"),
    }

    if early_root {
        info!("minimal root detected, deferring boot-completion detection");
    } else {
        host.spawn_detector();
        host.settle();
    }

    let target = InitTarget::resolve(override_args, self_exe);
    session.init_target = Some(target.clone());
    host.restore_env();
    (session, target)
}

/// Our own binary, for the self-reference guard and the detector spawn.
fn self_exe(argv0: &str) -> PathBuf {
    std::env::current_exe().unwrap_or_else(|_| PathBuf::from(argv0))
}

/// Candidate override arguments: the kernel passes unrecognized `key=value`
/// parameters to init through the environment, so `bootchart_init` may
/// arrive there. Explicit arguments come last and therefore win.
fn override_candidates(env_value: Option<String>, kernel_args: &[String]) -> Vec<String> {
    env_value
        .map(|value| format!("{BOOTCHART_INIT_ARG}{value}"))
        .into_iter()
        .chain(kernel_args.iter().cloned())
        .collect()
}

/// Start `bootchartd wait` in the background. It outlives our exec and
/// archives the samples once boot is complete.
fn spawn_detector(self_exe: &Path) {
    let result = std::process::Command::new(self_exe)
        .arg("wait")
        .stdin(Stdio::null())
        .process_group(0)
        .spawn();
    match result {
        Ok(child) => info!(pid = child.id(), "boot-completion detector started"),
        Err(e) => warn!(
            exe = %self_exe.display(),
            error = %e,
            "failed to start boot-completion detector; run `bootchartd stop` after boot"
        ),
    }
}
