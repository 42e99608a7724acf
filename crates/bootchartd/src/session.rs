use std::fmt;

use bootchart_core::{CollectorHandle, InitTarget};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Standing in for init. `early_root` is set inside an initramfs-style
    /// minimal root, where boot-completion detection is deferred.
    Pid1 { early_root: bool },
    Manual,
}

/// One invocation of the orchestrator, from start to archive or handoff.
#[derive(Debug)]
pub struct BootSession {
    pub mode: Mode,
    pub sample_hz: u32,
    pub init_target: Option<InitTarget>,
    /// Referenced by PID only; never waited on.
    pub collector: Option<CollectorHandle>,
}

impl BootSession {
    pub fn new(mode: Mode, sample_hz: u32) -> Self {
        Self {
            mode,
            sample_hz,
            init_target: None,
            collector: None,
        }
    }
}

impl fmt::Display for BootSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mode {
            Mode::Pid1 { early_root: true } => f.write_str("pid1 (early root)")?,
            Mode::Pid1 { early_root: false } => f.write_str("pid1")?,
            Mode::Manual => f.write_str("manual")?,
        }
        write!(f, ", {} Hz", self.sample_hz)?;
        match self.collector {
            Some(handle) => write!(f, ", collector pid {}", handle.pid)?,
            None => f.write_str(", no collector")?,
        }
        if let Some(target) = &self.init_target {
            write!(f, ", init {target}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bootchart_core::InitSource;
    use std::path::PathBuf;

    #[test]
    fn display_summarizes_handoff() {
        let mut session = BootSession::new(Mode::Pid1 { early_root: false }, 50);
        session.collector = Some(CollectorHandle { pid: 17 });
        session.init_target = Some(InitTarget {
            path: PathBuf::from("/sbin/init"),
            source: InitSource::Default,
        });
        assert_eq!(
            session.to_string(),
            "pid1, 50 Hz, collector pid 17, init /sbin/init (default)"
        );
    }

    #[test]
    fn manual_session_without_collector() {
        let session = BootSession::new(Mode::Manual, 25);
        assert_eq!(session.to_string(), "manual, 25 Hz, no collector");
    }
}
