//! Best-effort invocation of the chart renderer.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tracing::{info, warn};

use crate::config::RenderFormat;

pub struct Renderer {
    bin: String,
}

impl Renderer {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    /// Render `archive` into `output`. Every failure is logged and reported
    /// as `None`; the archive is already durable at this point.
    pub async fn render(&self, archive: &Path, output: &Path, format: RenderFormat) -> Option<PathBuf> {
        let bin = match which::which(&self.bin) {
            Ok(bin) => bin,
            Err(_) => {
                info!(bin = %self.bin, "render tool not found, skipping render");
                return None;
            }
        };

        if let Some(dir) = output.parent()
            && let Err(e) = std::fs::create_dir_all(dir)
        {
            warn!(dir = %dir.display(), error = %e, "cannot create render output dir");
            return None;
        }

        let status = tokio::process::Command::new(&bin)
            .arg("-o")
            .arg(output)
            .arg("-f")
            .arg(format.as_str())
            .arg(archive)
            .stdin(Stdio::null())
            .status()
            .await;
        match status {
            Ok(status) if status.success() => {
                info!(output = %output.display(), %format, "chart rendered");
                Some(output.to_path_buf())
            }
            Ok(status) => {
                warn!(bin = %bin.display(), %status, "render failed");
                None
            }
            Err(e) => {
                warn!(bin = %bin.display(), error = %e, "render tool failed to start");
                None
            }
        }
    }
}
