//! Boot-completion detection.
//!
//! There is no reliable "boot finished" signal, so we poll: first for `/proc`
//! to exist, then for a process whose name says interactive startup is over
//! (a getty on text systems, a greeter or desktop shell otherwise). After the
//! first match we keep sampling for a settle delay to catch trailing
//! post-login activity.
//!
//! The detector runs as a cancellable task and reports exactly once through a
//! oneshot channel. [`wait_for_boot`] adds an optional deadline on top.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::constants::{
    EARLY_LOGIN_PARAM, GRAPHICAL_PROGRAMS, POST_LOGIN_SETTLE_SECS, PROC_POLL_MS,
    SYSTEMD_DEFAULT_TARGETS, TEXT_LOGIN_PROGRAMS, WATCH_POLL_MS,
};

/// Kernel truncates `/proc/<pid>/comm` to this many bytes.
const COMM_LEN: usize = 15;

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Filesystem locations the heuristic reads.
#[derive(Debug, Clone)]
pub struct DetectorPaths {
    pub proc_root: PathBuf,
    pub inittab: PathBuf,
    /// systemd `default.target` symlinks, first existing one wins.
    pub default_targets: Vec<PathBuf>,
}

impl Default for DetectorPaths {
    fn default() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
            inittab: PathBuf::from("/etc/inittab"),
            default_targets: SYSTEMD_DEFAULT_TARGETS.iter().map(PathBuf::from).collect(),
        }
    }
}

impl DetectorPaths {
    /// `/proc` counts as mounted once its `stat` file is readable.
    fn proc_ready(&self) -> bool {
        self.proc_root.join("stat").exists()
    }

    fn cmdline(&self) -> PathBuf {
        self.proc_root.join("cmdline")
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DetectorSettings {
    pub proc_poll: Duration,
    pub watch_poll: Duration,
    pub settle: Duration,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            proc_poll: Duration::from_millis(PROC_POLL_MS),
            watch_poll: Duration::from_millis(WATCH_POLL_MS),
            settle: Duration::from_secs(POST_LOGIN_SETTLE_SECS),
        }
    }
}

pub const UNKNOWN_RUNLEVEL: &str = "unknown";

/// Default runlevel from `/etc/inittab`, then from the systemd default target.
pub fn read_runlevel(paths: &DetectorPaths) -> String {
    if let Some(level) = std::fs::read_to_string(&paths.inittab)
        .ok()
        .and_then(|s| parse_inittab(&s))
    {
        return level;
    }
    if let Some(level) = paths
        .default_targets
        .iter()
        .find_map(|link| std::fs::read_link(link).ok())
        .and_then(|target| runlevel_for_target(&target))
    {
        return level;
    }
    UNKNOWN_RUNLEVEL.to_string()
}

/// Extract `N` from an `id:N:initdefault:` line.
fn parse_inittab(contents: &str) -> Option<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .find_map(|line| {
            let mut fields = line.split(':');
            let _id = fields.next()?;
            let level = fields.next()?;
            let action = fields.next()?;
            (action == "initdefault" && !level.is_empty()).then(|| level.to_string())
        })
}

fn runlevel_for_target(target: &Path) -> Option<String> {
    let name = target.file_name()?.to_str()?;
    let level = match name {
        "rescue.target" => "1",
        "multi-user.target" => "3",
        "graphical.target" => "5",
        other => other
            .strip_prefix("runlevel")
            .and_then(|rest| rest.strip_suffix(".target"))?,
    };
    Some(level.to_string())
}

/// Whether the kernel command line asks for the text-login heuristic.
pub fn early_login_requested(paths: &DetectorPaths) -> bool {
    std::fs::read_to_string(paths.cmdline())
        .map(|cmdline| cmdline.split_whitespace().any(|arg| arg == EARLY_LOGIN_PARAM))
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Watch-set
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKind {
    TextLogin,
    Graphical,
}

/// Process names whose appearance marks the end of interactive boot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSet {
    pub kind: WatchKind,
    pub programs: Vec<String>,
}

impl WatchSet {
    pub fn new(kind: WatchKind, programs: &[&str]) -> Self {
        Self {
            kind,
            programs: programs.iter().map(|p| p.to_string()).collect(),
        }
    }

    fn matches(&self, comm: &str) -> Option<&str> {
        self.programs
            .iter()
            .find(|program| comm_matches(comm, program))
            .map(String::as_str)
    }
}

/// Pure selection rule: runlevel 2 or 3, or an early-login request, means
/// text logins; anything else means a graphical session. Early login wins.
pub fn select_watch_set(runlevel: &str, early_login: bool) -> WatchSet {
    if early_login || matches!(runlevel, "2" | "3") {
        WatchSet::new(WatchKind::TextLogin, TEXT_LOGIN_PROGRAMS)
    } else {
        WatchSet::new(WatchKind::Graphical, GRAPHICAL_PROGRAMS)
    }
}

/// Whether a `/proc/<pid>/comm` value names `program`, allowing for the
/// kernel's truncation of long names.
pub(crate) fn comm_matches(comm: &str, program: &str) -> bool {
    comm == program
        || (comm.len() == COMM_LEN && program.len() > COMM_LEN && program.starts_with(comm))
}

/// Scan `<proc_root>/<pid>/comm` for the first process in the watch-set.
pub fn find_watched_process(proc_root: &Path, watch: &WatchSet) -> Option<String> {
    let entries = std::fs::read_dir(proc_root).ok()?;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(pid) = name.to_str() else { continue };
        if pid.is_empty() || !pid.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        // Processes may exit between readdir and read.
        let Ok(comm) = std::fs::read_to_string(entry.path().join("comm")) else {
            continue;
        };
        if let Some(program) = watch.matches(comm.trim_end()) {
            debug!(pid, program, "watched process found");
            return Some(program.to_string());
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Detector task
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectOutcome {
    /// Boot judged complete; `matched` is the watch-set program that fired.
    Completed { matched: String },
    TimedOut,
    Cancelled,
}

pub struct Detector {
    paths: DetectorPaths,
    settings: DetectorSettings,
    watch_set: Option<WatchSet>,
}

impl Detector {
    pub fn new(paths: DetectorPaths, settings: DetectorSettings) -> Self {
        Self {
            paths,
            settings,
            watch_set: None,
        }
    }

    /// Use a fixed watch-set instead of deriving one from the runlevel.
    pub fn with_watch_set(mut self, watch_set: WatchSet) -> Self {
        self.watch_set = Some(watch_set);
        self
    }

    /// Run on a background task; the receiver fires exactly once.
    pub fn spawn(self, cancel: CancellationToken) -> oneshot::Receiver<DetectOutcome> {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let outcome = self.run(&cancel).await;
            let _ = tx.send(outcome);
        });
        rx
    }

    async fn run(self, cancel: &CancellationToken) -> DetectOutcome {
        while !self.paths.proc_ready() {
            if !pause(cancel, self.settings.proc_poll).await {
                return DetectOutcome::Cancelled;
            }
        }

        let watch = match self.watch_set {
            Some(watch) => watch,
            None => {
                let runlevel = read_runlevel(&self.paths);
                let early_login = early_login_requested(&self.paths);
                let watch = select_watch_set(&runlevel, early_login);
                info!(runlevel = %runlevel, early_login, kind = ?watch.kind, "watch-set selected");
                watch
            }
        };
        if watch.programs.is_empty() {
            warn!("watch-set is empty; boot completion will never be detected, run `stop` manually");
        }

        let matched = loop {
            if let Some(program) = find_watched_process(&self.paths.proc_root, &watch) {
                break program;
            }
            if !pause(cancel, self.settings.watch_poll).await {
                return DetectOutcome::Cancelled;
            }
        };

        info!(
            program = %matched,
            settle_secs = self.settings.settle.as_secs(),
            "boot completion detected, settling"
        );
        if !pause(cancel, self.settings.settle).await {
            return DetectOutcome::Cancelled;
        }
        DetectOutcome::Completed { matched }
    }
}

/// Sleep for `duration`; returns `false` if cancelled first.
async fn pause(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Run `detector` and wait for its outcome, optionally bounded by `deadline`.
///
/// On deadline the task is cancelled and [`DetectOutcome::TimedOut`] is
/// returned, never confused with a completed boot.
pub async fn wait_for_boot(
    detector: Detector,
    deadline: Option<Duration>,
    cancel: CancellationToken,
) -> DetectOutcome {
    let task_cancel = cancel.child_token();
    let rx = detector.spawn(task_cancel.clone());

    let outcome = match deadline {
        Some(limit) => match tokio::time::timeout(limit, rx).await {
            Ok(received) => received.ok(),
            Err(_) => {
                task_cancel.cancel();
                return DetectOutcome::TimedOut;
            }
        },
        None => rx.await.ok(),
    };
    // A dropped sender means the task died without reporting.
    outcome.unwrap_or(DetectOutcome::Cancelled)
}
