//! Handoff to the real init.
//!
//! As PID 1 we must end by replacing our process image with the real init.
//! [`exec_init`] only ever returns an error: its success type is
//! uninhabited. An error here means the machine has no init, so callers
//! treat it as catastrophic.

use std::convert::Infallible;
use std::ffi::{CString, OsString};
use std::os::unix::ffi::OsStrExt;

use crate::error::ExecError;
use crate::init_target::InitTarget;

/// Replace the current process with `target`, passing `args` through.
///
/// `argv[0]` is the target path; `args` follow unchanged.
pub fn exec_init<S: AsRef<str>>(target: &InitTarget, args: &[S]) -> Result<Infallible, ExecError> {
    let path = CString::new(target.path.as_os_str().as_bytes())
        .map_err(|_| ExecError::InvalidPath(target.path.clone()))?;

    let mut argv = Vec::with_capacity(args.len() + 1);
    argv.push(path.clone());
    for arg in args {
        let arg = arg.as_ref();
        argv.push(CString::new(arg).map_err(|_| ExecError::InvalidArgument(arg.to_string()))?);
    }

    nix::unistd::execv(&path, &argv).map_err(|source| ExecError::Exec {
        path: target.path.clone(),
        source,
    })
}

/// One environment variable temporarily overridden while we stand in for
/// init. [`EnvOverride::restore`] puts the saved value back (or removes the
/// variable if it was unset) right before the handoff.
#[derive(Debug)]
pub struct EnvOverride {
    key: &'static str,
    saved: Option<OsString>,
}

impl EnvOverride {
    /// Save the current value of `key` and replace it with `value`.
    ///
    /// Must be called before any other thread is spawned.
    pub fn apply(key: &'static str, value: &str) -> Self {
        let saved = std::env::var_os(key);
        // SAFETY: the PID 1 path is single-threaded; no other thread can
        // read the environment concurrently.
        unsafe { std::env::set_var(key, value) };
        Self { key, saved }
    }

    pub fn restore(self) {
        match &self.saved {
            // SAFETY: see `apply`.
            Some(value) => unsafe { std::env::set_var(self.key, value) },
            // SAFETY: see `apply`.
            None => unsafe { std::env::remove_var(self.key) },
        }
    }
}
