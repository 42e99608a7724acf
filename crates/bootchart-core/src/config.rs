//! Runtime configuration: built-in defaults overlaid by `KEY=value` files.
//!
//! Files are read from the system location (or `BOOTCHARTD_CONFIG`) and then
//! from `./bootchartd.conf`, later files winning. Loading never fails: a
//! missing file is a notice and a bad value keeps its default, so PID 1 can
//! always proceed.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use tracing::{debug, info, warn};

pub const SYSTEM_CONFIG_PATH: &str = "/etc/bootchartd.conf";
pub const LOCAL_CONFIG_FILE: &str = "bootchartd.conf";
pub const ENV_CONFIG_PATH: &str = "BOOTCHARTD_CONFIG";

/// Image format requested from the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderFormat {
    Png,
    Svg,
    Pdf,
}

impl RenderFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Svg => "svg",
            Self::Pdf => "pdf",
        }
    }
}

impl fmt::Display for RenderFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RenderFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "svg" => Ok(Self::Svg),
            "pdf" => Ok(Self::Pdf),
            other => Err(format!("unknown render format '{other}'")),
        }
    }
}

/// Merged configuration, immutable for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub sample_hz: u32,
    pub archive_dest: PathBuf,
    pub auto_render: bool,
    pub render_format: RenderFormat,
    pub render_dir: PathBuf,
    pub collector_bin: PathBuf,
    pub render_bin: String,
    pub tmp_dir: PathBuf,
    /// Deadline for boot-completion detection; `None` waits forever.
    pub detect_timeout: Option<Duration>,
    pub log_file: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            sample_hz: 50,
            archive_dest: PathBuf::from("/var/log/bootchart.tgz"),
            auto_render: false,
            render_format: RenderFormat::Png,
            render_dir: PathBuf::from("/var/log"),
            collector_bin: PathBuf::from("/lib/bootchart/bootchart-collector"),
            render_bin: "pybootchartgui".into(),
            tmp_dir: PathBuf::from("/tmp"),
            detect_timeout: None,
            log_file: None,
        }
    }
}

impl RuntimeConfig {
    /// Load defaults, then the system file, then the working-directory file.
    pub fn load() -> Self {
        let system = std::env::var_os(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(SYSTEM_CONFIG_PATH));
        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        Self::load_from(&[system, local])
    }

    /// Overlay each file in order onto the defaults.
    pub fn load_from(paths: &[PathBuf]) -> Self {
        let mut config = Self::default();
        for path in paths {
            config.overlay_file(path);
        }
        config
    }

    fn overlay_file(&mut self, path: &Path) {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                debug!(path = %path.display(), "loading config");
                self.overlay_str(&contents);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "config file not found, keeping defaults");
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "config file unreadable, keeping defaults");
            }
        }
    }

    /// Apply `KEY=value` lines. Comments and blank lines are skipped.
    pub fn overlay_str(&mut self, contents: &str) {
        for (key, value) in parse_pairs(contents) {
            if let Err(e) = self.apply(&key, &value) {
                warn!(key = %key, value = %value, "ignoring config value: {e}");
            }
        }
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<(), String> {
        match key {
            "SAMPLE_HZ" => {
                let hz = value.parse::<u32>().map_err(|e| e.to_string())?;
                if hz == 0 {
                    return Err("sample rate must be positive".into());
                }
                self.sample_hz = hz;
            }
            "BOOTLOG_DEST" => self.archive_dest = non_empty_path(value)?,
            "AUTO_RENDER" => self.auto_render = parse_bool(value)?,
            "AUTO_RENDER_FORMAT" => self.render_format = value.parse()?,
            "AUTO_RENDER_DIR" => self.render_dir = non_empty_path(value)?,
            "COLLECTOR_BIN" => self.collector_bin = non_empty_path(value)?,
            "RENDER_BIN" => {
                if value.is_empty() {
                    return Err("empty value".into());
                }
                self.render_bin = value.to_string();
            }
            "TMPDIR" => self.tmp_dir = non_empty_path(value)?,
            "DETECT_TIMEOUT" => {
                let secs = value.parse::<u64>().map_err(|e| e.to_string())?;
                self.detect_timeout = (secs > 0).then(|| Duration::from_secs(secs));
            }
            "LOG_FILE" => {
                self.log_file = (!value.is_empty()).then(|| PathBuf::from(value));
            }
            _ => debug!(key, "unknown config key"),
        }
        Ok(())
    }

    pub fn pid_file(&self) -> PathBuf {
        self.tmp_dir.join(crate::constants::COLLECTOR_PID_FILE)
    }

    pub fn dump_lock(&self) -> PathBuf {
        self.tmp_dir.join(crate::constants::DUMP_LOCK_FILE)
    }
}

/// Split `contents` into `(KEY, value)` pairs with surrounding quotes removed.
fn parse_pairs(contents: &str) -> Vec<(String, String)> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            Some((key.trim().to_string(), unquote(value.trim()).to_string()))
        })
        .collect()
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|v| v.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "yes" | "true" | "1" | "on" => Ok(true),
        "no" | "false" | "0" | "off" => Ok(false),
        other => Err(format!("not a boolean: '{other}'")),
    }
}

fn non_empty_path(value: &str) -> Result<PathBuf, String> {
    if value.is_empty() {
        Err("empty path".into())
    } else {
        Ok(PathBuf::from(value))
    }
}
