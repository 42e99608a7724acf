//! Sample extraction and archiving.
//!
//! Flow:
//! 1. Take the dump lock so concurrent `stop`s cannot interleave dumps
//! 2. Create a unique temp directory (removed on every exit path)
//! 3. Ask the collector to dump into it
//! 4. Check the primary log exists
//! 5. Pack `header`, `dmesg` and `*.log` into a tar.gz at the destination
//! 6. Optionally render the archive

use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::{debug, info, warn};

use crate::collector::Collector;
use crate::config::{RenderFormat, RuntimeConfig};
use crate::constants::{DUMP_DIR_PREFIX, HEADER_FILE, KERNEL_LOG_FILE, PRIMARY_LOG};
use crate::error::ArchiveError;
use crate::lock::DumpLock;
use crate::render::Renderer;

/// Instruction to extract and package the current samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveRequest {
    pub destination: PathBuf,
    pub render_enabled: bool,
    pub render_format: RenderFormat,
    pub render_output_dir: PathBuf,
    /// Basename of the command a `start <cmd>` session was bound to.
    pub command: Option<String>,
}

impl ArchiveRequest {
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            destination: config.archive_dest.clone(),
            render_enabled: config.auto_render,
            render_format: config.render_format,
            render_output_dir: config.render_dir.clone(),
            command: None,
        }
    }

    pub fn with_command(mut self, command: Option<String>) -> Self {
        self.command = command;
        self
    }

    fn render_output(&self) -> PathBuf {
        self.render_output_dir
            .join(format!("bootchart.{}", self.render_format.as_str()))
    }
}

#[derive(Debug, Clone)]
pub struct ArchiveSummary {
    pub path: PathBuf,
    pub entries: Vec<String>,
    pub bytes: u64,
    pub rendered: Option<PathBuf>,
}

pub struct ArchiveBuilder {
    collector: Collector,
    renderer: Renderer,
    tmp_root: PathBuf,
    lock_path: PathBuf,
}

impl ArchiveBuilder {
    pub fn new(collector: Collector, renderer: Renderer, tmp_root: PathBuf, lock_path: PathBuf) -> Self {
        Self {
            collector,
            renderer,
            tmp_root,
            lock_path,
        }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(
            Collector::from_config(config),
            Renderer::new(config.render_bin.clone()),
            config.tmp_dir.clone(),
            config.dump_lock(),
        )
    }

    /// Dump, validate and package the collector's samples.
    pub async fn build(&self, request: &ArchiveRequest) -> Result<ArchiveSummary, ArchiveError> {
        let mut summary = {
            let _lock = DumpLock::acquire(self.lock_path.clone()).await?;
            self.extract_and_pack(request).await?
        };
        self.collector.clear_pid_file();

        if request.render_enabled {
            summary.rendered = self
                .renderer
                .render(&summary.path, &request.render_output(), request.render_format)
                .await;
        }
        Ok(summary)
    }

    async fn extract_and_pack(&self, request: &ArchiveRequest) -> Result<ArchiveSummary, ArchiveError> {
        let dump_dir = tempfile::Builder::new()
            .prefix(DUMP_DIR_PREFIX)
            .tempdir_in(&self.tmp_root)
            .map_err(|source| ArchiveError::TempDir {
                dir: self.tmp_root.clone(),
                source,
            })?;
        debug!(dir = %dump_dir.path().display(), "dump directory created");

        self.collector.dump(dump_dir.path()).await?;

        if !dump_dir.path().join(PRIMARY_LOG).is_file() {
            return Err(ArchiveError::MissingPrimaryLog(PRIMARY_LOG));
        }

        if let Some(command) = &request.command {
            record_command(dump_dir.path(), command);
        }

        let entries = archive_entries(dump_dir.path());
        let src = dump_dir.path().to_path_buf();
        let dest = request.destination.clone();
        let names = entries.clone();
        let bytes = tokio::task::spawn_blocking(move || write_archive(&src, &names, &dest))
            .await
            .map_err(|e| ArchiveError::Write {
                path: request.destination.clone(),
                source: std::io::Error::other(format!("archive task: {e}")),
            })?
            .map_err(|source| ArchiveError::Write {
                path: request.destination.clone(),
                source,
            })?;

        if let Err(e) = dump_dir.close() {
            warn!(error = %e, "failed to remove dump directory");
        }

        info!(
            path = %request.destination.display(),
            entries = entries.len(),
            bytes,
            "archive written"
        );
        Ok(ArchiveSummary {
            path: request.destination.clone(),
            entries,
            bytes,
            rendered: None,
        })
    }
}

/// Basename of a command, as recorded in the dump header.
pub fn command_basename(command: &str) -> String {
    Path::new(command)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| command.to_string())
}

fn record_command(dump_dir: &Path, command: &str) {
    let header = dump_dir.join(HEADER_FILE);
    let result = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&header)
        .and_then(|mut f| writeln!(f, "profile.command = {command}"));
    if let Err(e) = result {
        warn!(path = %header.display(), error = %e, "failed to record command in header");
    }
}

/// Files to pack: header, kernel log, then every `*.log` in name order.
fn archive_entries(dump_dir: &Path) -> Vec<String> {
    let mut entries = Vec::new();
    for name in [HEADER_FILE, KERNEL_LOG_FILE] {
        if dump_dir.join(name).is_file() {
            entries.push(name.to_string());
        } else {
            warn!(file = name, "dump is missing expected file");
        }
    }

    let mut logs: Vec<String> = std::fs::read_dir(dump_dir)
        .map(|rd| {
            rd.flatten()
                .filter(|e| e.path().is_file())
                .filter_map(|e| e.file_name().into_string().ok())
                .filter(|name| name.ends_with(".log"))
                .collect()
        })
        .unwrap_or_default();
    logs.sort();
    entries.extend(logs);
    entries
}

/// Write a tar.gz of `names` (relative to `src`) to `dest`, replacing any
/// existing archive only once the new one is complete. Returns its size.
fn write_archive(src: &Path, names: &[String], dest: &Path) -> std::io::Result<u64> {
    let parent = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)?;

    let staging = tempfile::NamedTempFile::new_in(&parent)?;
    let encoder = GzEncoder::new(staging, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for name in names {
        builder.append_path_with_name(src.join(name), name)?;
    }
    let staging = builder.into_inner()?.finish()?;
    staging.as_file().sync_all()?;
    let file = staging.persist(dest).map_err(|e| e.error)?;
    Ok(file.metadata()?.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::os::unix::fs::PermissionsExt;

    const GOOD_DUMP: &str = r#"[ "$1" = --dump ] || exit 2
printf 'version.bootchart = 0.1\n' > "$2/header"
printf 'kernel ring buffer\n' > "$2/dmesg"
printf '12 (init) S 0\n' > "$2/proc_ps.log"
printf 'cpu 1 2 3\n' > "$2/proc_stat.log"
printf 'sda 1\n' > "$2/proc_diskstats.log"
printf 'ignored\n' > "$2/notes.txt""#;

    struct Fixture {
        dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            std::fs::create_dir(dir.path().join("tmp")).unwrap();
            Self { dir }
        }

        fn tmp_root(&self) -> PathBuf {
            self.dir.path().join("tmp")
        }

        fn dest(&self) -> PathBuf {
            self.dir.path().join("out").join("test.tgz")
        }

        fn builder(&self, collector_body: &str, render_body: Option<&str>) -> ArchiveBuilder {
            let bin = self.script("collector", collector_body);
            let render = match render_body {
                Some(body) => self.script("render", body).display().to_string(),
                None => self.dir.path().join("no-render").display().to_string(),
            };
            ArchiveBuilder::new(
                Collector::new(bin, self.tmp_root().join("bootchart-collector.pid")),
                Renderer::new(render),
                self.tmp_root(),
                self.tmp_root().join("bootchart-dump.lock"),
            )
        }

        fn request(&self) -> ArchiveRequest {
            ArchiveRequest {
                destination: self.dest(),
                render_enabled: false,
                render_format: RenderFormat::Png,
                render_output_dir: self.dir.path().join("charts"),
                command: None,
            }
        }

        fn script(&self, name: &str, body: &str) -> PathBuf {
            let path = self.dir.path().join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        /// Dump directories left behind under the temp root.
        fn leftover_dump_dirs(&self) -> Vec<String> {
            std::fs::read_dir(self.tmp_root())
                .unwrap()
                .flatten()
                .filter_map(|e| e.file_name().into_string().ok())
                .filter(|name| name.starts_with(DUMP_DIR_PREFIX))
                .collect()
        }
    }

    fn archive_contents(path: &Path) -> Vec<(String, String)> {
        let file = std::fs::File::open(path).unwrap();
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        let mut out = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().display().to_string();
            let mut body = String::new();
            std::io::Read::read_to_string(&mut entry, &mut body).unwrap();
            out.push((name, body));
        }
        out
    }

    #[tokio::test]
    async fn packs_header_kernel_log_and_metric_logs() {
        let fx = Fixture::new();
        let summary = fx.builder(GOOD_DUMP, None).build(&fx.request()).await.unwrap();

        assert_eq!(summary.path, fx.dest());
        assert!(summary.bytes > 0);
        assert_eq!(
            summary.entries,
            vec![
                "header",
                "dmesg",
                "proc_diskstats.log",
                "proc_ps.log",
                "proc_stat.log"
            ]
        );

        let contents = archive_contents(&fx.dest());
        let names: Vec<&str> = contents.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, summary.entries);
        assert!(contents.iter().any(|(n, b)| n == "proc_ps.log" && b.contains("(init)")));
        assert!(fx.leftover_dump_dirs().is_empty());
        assert_eq!(summary.rendered, None);
    }

    #[tokio::test]
    async fn overwrites_previous_archive() {
        let fx = Fixture::new();
        std::fs::create_dir_all(fx.dest().parent().unwrap()).unwrap();
        std::fs::write(fx.dest(), b"stale").unwrap();

        fx.builder(GOOD_DUMP, None).build(&fx.request()).await.unwrap();
        let contents = archive_contents(&fx.dest());
        assert!(contents.iter().any(|(n, _)| n == "header"));
    }

    #[tokio::test]
    async fn dump_failure_is_fatal_and_cleans_up() {
        let fx = Fixture::new();
        let builder = fx.builder("echo 'no collector running' >&2; exit 1", None);

        let err = builder.build(&fx.request()).await.unwrap_err();
        assert!(matches!(err, ArchiveError::DumpFailed(_)));
        assert!(!fx.dest().exists());
        assert!(fx.leftover_dump_dirs().is_empty());
    }

    #[tokio::test]
    async fn missing_primary_log_is_fatal_and_cleans_up() {
        let fx = Fixture::new();
        let builder = fx.builder(r#"printf 'h\n' > "$2/header"; printf 'x\n' > "$2/proc_stat.log""#, None);

        let err = builder.build(&fx.request()).await.unwrap_err();
        assert!(matches!(err, ArchiveError::MissingPrimaryLog(PRIMARY_LOG)));
        assert!(!fx.dest().exists());
        assert!(fx.leftover_dump_dirs().is_empty());
    }

    #[tokio::test]
    async fn missing_tmp_root_is_fatal() {
        let fx = Fixture::new();
        let builder = ArchiveBuilder::new(
            Collector::new(fx.script("collector", GOOD_DUMP), fx.dir.path().join("pid")),
            Renderer::new("no-render"),
            fx.dir.path().join("absent"),
            fx.dir.path().join("dump.lock"),
        );
        let err = builder.build(&fx.request()).await.unwrap_err();
        assert!(matches!(err, ArchiveError::TempDir { .. }));
    }

    #[tokio::test]
    async fn records_command_in_header() {
        let fx = Fixture::new();
        let request = fx.request().with_command(Some(command_basename("/usr/bin/firefox")));
        fx.builder(GOOD_DUMP, None).build(&request).await.unwrap();

        let contents = archive_contents(&fx.dest());
        let header = contents.iter().find(|(n, _)| n == "header").unwrap();
        assert!(header.1.contains("profile.command = firefox"), "{}", header.1);
    }

    #[tokio::test]
    async fn successful_build_clears_pid_file() {
        let fx = Fixture::new();
        let pid_file = fx.tmp_root().join("bootchart-collector.pid");
        std::fs::write(&pid_file, "4242\n").unwrap();

        fx.builder(GOOD_DUMP, None).build(&fx.request()).await.unwrap();
        assert!(!pid_file.exists());
    }

    #[tokio::test]
    async fn renders_when_enabled() {
        let fx = Fixture::new();
        let mut request = fx.request();
        request.render_enabled = true;
        request.render_format = RenderFormat::Svg;

        let summary = fx
            .builder(GOOD_DUMP, Some(r#"touch "$2""#))
            .build(&request)
            .await
            .unwrap();
        let expected = fx.dir.path().join("charts").join("bootchart.svg");
        assert_eq!(summary.rendered.as_deref(), Some(expected.as_path()));
        assert!(expected.exists());
    }

    #[tokio::test]
    async fn render_failure_keeps_archive() {
        let fx = Fixture::new();
        let mut request = fx.request();
        request.render_enabled = true;

        let summary = fx
            .builder(GOOD_DUMP, Some("exit 1"))
            .build(&request)
            .await
            .unwrap();
        assert_eq!(summary.rendered, None);
        assert!(fx.dest().exists());
    }

    #[test]
    fn command_basename_strips_directories() {
        assert_eq!(command_basename("/usr/bin/firefox"), "firefox");
        assert_eq!(command_basename("make"), "make");
        assert_eq!(command_basename("./build.sh"), "build.sh");
    }
}
