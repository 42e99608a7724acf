//! Error types for the boot chart lifecycle.

use std::path::PathBuf;

pub type BootchartResult<T> = Result<T, BootchartError>;

/// Top-level error returned by every lifecycle command.
#[derive(thiserror::Error, Debug)]
pub enum BootchartError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Collector(#[from] CollectorError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("boot-completion detection timed out after {0}s")]
    DetectTimeout(u64),

    #[error("internal: {0}")]
    Internal(String),
}

/// Failures while extracting and packaging samples.
#[derive(thiserror::Error, Debug)]
pub enum ArchiveError {
    #[error("create temporary directory in {}: {source}", dir.display())]
    TempDir {
        dir: PathBuf,
        source: std::io::Error,
    },

    #[error("dump operation failed: {0}")]
    DumpFailed(String),

    #[error("dump produced no {0}; extraction failed")]
    MissingPrimaryLog(&'static str),

    #[error("write archive {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("lock {}: {detail}", path.display())]
    Lock { path: PathBuf, detail: String },
}

/// Failures while launching the sampling agent.
#[derive(thiserror::Error, Debug)]
pub enum CollectorError {
    #[error("spawn collector {}: {source}", bin.display())]
    Spawn {
        bin: PathBuf,
        source: std::io::Error,
    },

    #[error("collector already running (pid {0}); run `stop` first")]
    AlreadyRunning(i32),
}

/// The handoff to the real init failed. Reaching this as PID 1 leaves the
/// system without an init.
#[derive(thiserror::Error, Debug)]
pub enum ExecError {
    #[error("init path {} contains a NUL byte", .0.display())]
    InvalidPath(PathBuf),

    #[error("argument contains a NUL byte: {0:?}")]
    InvalidArgument(String),

    #[error("exec {}: {source}", path.display())]
    Exec {
        path: PathBuf,
        source: nix::errno::Errno,
    },
}
