//! Boot chart lifecycle: everything `bootchartd` does between being started
//! by the kernel and handing over to the real init, plus the post-boot
//! detection and archiving steps.

pub mod archive;
pub mod collector;
pub mod config;
pub mod constants;
pub mod detector;
pub mod error;
pub mod handoff;
pub mod init_target;
mod lock;
pub mod render;

pub use archive::{ArchiveBuilder, ArchiveRequest, ArchiveSummary, command_basename};
pub use collector::{Collector, CollectorHandle};
pub use config::{RenderFormat, RuntimeConfig};
pub use detector::{
    DetectOutcome, Detector, DetectorPaths, DetectorSettings, WatchKind, WatchSet,
    select_watch_set, wait_for_boot,
};
pub use error::{ArchiveError, BootchartError, BootchartResult, CollectorError, ExecError};
pub use handoff::{EnvOverride, exec_init};
pub use init_target::{InitSource, InitTarget};
pub use render::Renderer;
