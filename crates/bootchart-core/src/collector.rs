//! Client side of the sampling agent contract.
//!
//! - `<collector> <hz>` starts background sampling
//! - `<collector> --dump <dir>` writes buffered samples into `dir`
//!
//! The agent is referenced by PID only. We never wait on it; it is reaped by
//! whichever init ends up as its parent.

use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::detector::comm_matches;
use crate::error::{ArchiveError, CollectorError};

/// A launched sampling agent. Not owned: dropping it leaves the agent running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectorHandle {
    pub pid: u32,
}

pub struct Collector {
    bin: PathBuf,
    pid_file: PathBuf,
}

impl Collector {
    pub fn new(bin: PathBuf, pid_file: PathBuf) -> Self {
        Self { bin, pid_file }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(config.collector_bin.clone(), config.pid_file())
    }

    /// Start background sampling at `sample_hz`.
    ///
    /// Refuses when the pid file names a live instance of our agent. The
    /// agent runs in its own process group so terminal signals aimed at us
    /// do not stop it.
    pub fn start(&self, sample_hz: u32) -> Result<CollectorHandle, CollectorError> {
        if let Some(pid) = self.running_pid() {
            return Err(CollectorError::AlreadyRunning(pid));
        }
        self.spawn(sample_hz)
    }

    /// Start sampling for a new boot. Nothing survives a reboot, so any pid
    /// file found here belongs to an earlier boot and is discarded.
    pub fn start_fresh(&self, sample_hz: u32) -> Result<CollectorHandle, CollectorError> {
        if self.pid_file.exists() {
            info!(path = %self.pid_file.display(), "discarding pid file from a previous boot");
            self.clear_pid_file();
        }
        self.spawn(sample_hz)
    }

    fn spawn(&self, sample_hz: u32) -> Result<CollectorHandle, CollectorError> {
        let child = std::process::Command::new(&self.bin)
            .arg(sample_hz.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .process_group(0)
            .spawn()
            .map_err(|source| CollectorError::Spawn {
                bin: self.bin.clone(),
                source,
            })?;

        let handle = CollectorHandle { pid: child.id() };
        info!(pid = handle.pid, sample_hz, bin = %self.bin.display(), "collector started");
        self.write_pid_file(handle);
        Ok(handle)
    }

    /// PID recorded in the pid file, if that process is still alive and is
    /// our agent. A recycled PID now owned by something else does not count.
    pub fn running_pid(&self) -> Option<i32> {
        let contents = std::fs::read_to_string(&self.pid_file).ok()?;
        let pid: i32 = contents.trim().parse().ok()?;
        if pid <= 0 {
            return None;
        }
        let comm = std::fs::read_to_string(format!("/proc/{pid}/comm")).ok()?;
        let name = self.bin.file_name()?.to_str()?;
        if comm_matches(comm.trim_end(), name) {
            Some(pid)
        } else {
            debug!(pid, comm = comm.trim_end(), "pid file names an unrelated process");
            None
        }
    }

    /// Ask the agent to dump its buffered samples into `dir`.
    pub async fn dump(&self, dir: &Path) -> Result<(), ArchiveError> {
        debug!(bin = %self.bin.display(), dir = %dir.display(), "requesting dump");
        let output = tokio::process::Command::new(&self.bin)
            .arg("--dump")
            .arg(dir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                ArchiveError::DumpFailed(format!("spawn {}: {e}", self.bin.display()))
            })?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let detail = if stderr.is_empty() {
            format!("{} exited with {}", self.bin.display(), output.status)
        } else {
            format!("{} exited with {}: {stderr}", self.bin.display(), output.status)
        };
        Err(ArchiveError::DumpFailed(detail))
    }

    /// Forget the running agent after a completed archive cycle.
    pub fn clear_pid_file(&self) {
        match std::fs::remove_file(&self.pid_file) {
            Ok(()) => debug!(path = %self.pid_file.display(), "pid file removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.pid_file.display(), error = %e, "failed to remove pid file"),
        }
    }

    fn write_pid_file(&self, handle: CollectorHandle) {
        if let Err(e) = std::fs::write(&self.pid_file, format!("{}\n", handle.pid)) {
            warn!(path = %self.pid_file.display(), error = %e, "failed to write collector pid file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// Spawn `bin` as a long-lived process so its comm matches the agent.
    fn spawn_live(bin: &Path) -> std::process::Child {
        std::process::Command::new(bin).arg("50").spawn().unwrap()
    }

    fn wait_for(path: &Path) -> bool {
        for _ in 0..250 {
            if path.exists() {
                return true;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        false
    }

    #[test]
    fn start_refuses_when_agent_is_running() {
        let dir = tempfile::tempdir().unwrap();
        let bin = script(dir.path(), "collector", "while :; do sleep 1; done");
        let mut agent = spawn_live(&bin);
        let pid_file = dir.path().join("collector.pid");
        std::fs::write(&pid_file, format!("{}\n", agent.id())).unwrap();

        let err = Collector::new(bin, pid_file).start(50).unwrap_err();
        agent.kill().unwrap();
        agent.wait().unwrap();
        assert!(matches!(err, CollectorError::AlreadyRunning(pid) if pid as u32 == agent.id()));
    }

    #[test]
    fn recycled_pid_of_unrelated_process_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("started");
        let bin = script(dir.path(), "collector", &format!("touch {}", marker.display()));
        let pid_file = dir.path().join("collector.pid");
        // PID 1 is always alive and never our agent.
        std::fs::write(&pid_file, "1\n").unwrap();

        let handle = Collector::new(bin, pid_file.clone()).start(50).unwrap();
        assert!(wait_for(&marker));
        let recorded = std::fs::read_to_string(&pid_file).unwrap();
        assert_eq!(recorded.trim(), handle.pid.to_string());
    }

    #[test]
    fn fresh_start_discards_pid_file_from_previous_boot() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("started");
        let body = format!("touch {}; while :; do sleep 1; done", marker.display());
        let bin = script(dir.path(), "collector", &body);
        let mut previous = spawn_live(&bin);
        let pid_file = dir.path().join("collector.pid");
        std::fs::write(&pid_file, format!("{}\n", previous.id())).unwrap();
        assert!(wait_for(&marker));
        std::fs::remove_file(&marker).unwrap();

        let collector = Collector::new(bin, pid_file.clone());
        let handle = collector.start_fresh(50).unwrap();
        let ran = wait_for(&marker);

        previous.kill().unwrap();
        previous.wait().unwrap();
        let _ = terminate(handle.pid);
        assert!(ran);
        let recorded = std::fs::read_to_string(&pid_file).unwrap();
        assert_eq!(recorded.trim(), handle.pid.to_string());
    }

    fn terminate(pid: u32) -> std::io::Result<std::process::ExitStatus> {
        std::process::Command::new("kill").arg(pid.to_string()).status()
    }

    #[test]
    fn stale_pid_file_does_not_block_start() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("started");
        let bin = script(
            dir.path(),
            "collector",
            &format!("echo \"$1\" > {}", marker.display()),
        );
        let pid_file = dir.path().join("collector.pid");
        std::fs::write(&pid_file, "not-a-pid\n").unwrap();

        let collector = Collector::new(bin, pid_file.clone());
        let handle = collector.start(25).unwrap();

        let recorded = std::fs::read_to_string(&pid_file).unwrap();
        assert_eq!(recorded.trim(), handle.pid.to_string());

        for _ in 0..100 {
            if marker.exists() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        assert_eq!(std::fs::read_to_string(&marker).unwrap().trim(), "25");
    }

    #[test]
    fn start_reports_missing_binary() {
        let dir = tempfile::tempdir().unwrap();
        let collector = Collector::new(
            dir.path().join("missing-collector"),
            dir.path().join("collector.pid"),
        );
        let err = collector.start(50).unwrap_err();
        assert!(matches!(err, CollectorError::Spawn { .. }));
        assert!(!dir.path().join("collector.pid").exists());
    }

    #[tokio::test]
    async fn dump_failure_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let bin = script(dir.path(), "collector", "echo 'no collector running' >&2; exit 1");
        let collector = Collector::new(bin, dir.path().join("collector.pid"));

        let err = collector.dump(dir.path()).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("dump operation failed"), "{msg}");
        assert!(msg.contains("no collector running"), "{msg}");
    }

    #[tokio::test]
    async fn dump_passes_target_directory() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        std::fs::create_dir(&out).unwrap();
        let bin = script(dir.path(), "collector", "[ \"$1\" = --dump ] && touch \"$2/proc_ps.log\"");
        let collector = Collector::new(bin, dir.path().join("collector.pid"));

        collector.dump(&out).await.unwrap();
        assert!(out.join("proc_ps.log").exists());
    }

    #[test]
    fn clear_pid_file_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("collector.pid");
        std::fs::write(&pid_file, "1\n").unwrap();
        let collector = Collector::new(dir.path().join("c"), pid_file.clone());

        collector.clear_pid_file();
        collector.clear_pid_file();
        assert!(!pid_file.exists());
    }
}
