//! Resolution of the real init to hand over to once sampling is running.
//!
//! `bootchart_init=<path>` wins over `init=<path>`, which wins over the
//! platform default. An `init=` that names this binary is ignored: the
//! kernel passed it because we are that init, and following it would exec
//! ourselves forever.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::constants::{BOOTCHART_INIT_ARG, DEFAULT_INIT, INIT_ARG};

/// Which input decided the init target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitSource {
    BootchartOverride,
    KernelOverride,
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitTarget {
    pub path: PathBuf,
    pub source: InitSource,
}

impl fmt::Display for InitTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match self.source {
            InitSource::BootchartOverride => "bootchart_init=",
            InitSource::KernelOverride => "init=",
            InitSource::Default => "default",
        };
        write!(f, "{} ({source})", self.path.display())
    }
}

impl InitTarget {
    /// Resolve from the argument list the kernel handed us.
    ///
    /// `self_exe` is this binary's own path; any `init=` override equal to it
    /// after canonicalization is treated as absent.
    pub fn resolve<S: AsRef<str>>(args: &[S], self_exe: &Path) -> Self {
        if let Some(path) = last_value(args, BOOTCHART_INIT_ARG) {
            return Self {
                path,
                source: InitSource::BootchartOverride,
            };
        }

        if let Some(path) = last_value(args, INIT_ARG) {
            if !is_same_file(&path, self_exe) {
                return Self {
                    path,
                    source: InitSource::KernelOverride,
                };
            }
            tracing::debug!(path = %path.display(), "ignoring init= override that points at ourselves");
        }

        Self {
            path: PathBuf::from(DEFAULT_INIT),
            source: InitSource::Default,
        }
    }
}

/// Value of the last `prefix<value>` argument with a non-empty value.
fn last_value<S: AsRef<str>>(args: &[S], prefix: &str) -> Option<PathBuf> {
    args.iter()
        .rev()
        .filter_map(|arg| arg.as_ref().strip_prefix(prefix))
        .find(|value| !value.is_empty())
        .map(PathBuf::from)
}

/// Path equality after resolving symlinks. Paths that cannot be resolved
/// (early boot, missing files) are compared as written.
fn is_same_file(a: &Path, b: &Path) -> bool {
    canonical(a) == canonical(b)
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
