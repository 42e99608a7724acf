//! Mock sampling agent for testing.
//!
//! Speaks the collector contract without touching `/proc`:
//!
//!   bootchart-mock-collector <hz>            start "sampling"
//!   bootchart-mock-collector --dump <dir>    write a sample set into <dir>
//!
//! State lives in `$BOOTCHART_MOCK_STATE` (default: `<tmp>/bootchart-mock`).
//! A dump without a preceding start fails the way the real agent does when
//! nothing is running.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use bootchart_core::constants::{HEADER_FILE, KERNEL_LOG_FILE, PRIMARY_LOG};

const STATE_ENV: &str = "BOOTCHART_MOCK_STATE";
const SAMPLES_MARKER: &str = "samples";

fn state_dir() -> PathBuf {
    std::env::var_os(STATE_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("bootchart-mock"))
}

fn start(hz: u32) -> std::io::Result<()> {
    let dir = state_dir();
    std::fs::create_dir_all(&dir)?;
    std::fs::write(dir.join(SAMPLES_MARKER), format!("{hz}\n"))
}

fn dump(out: &Path) -> Result<(), String> {
    let marker = state_dir().join(SAMPLES_MARKER);
    let hz = std::fs::read_to_string(&marker).map_err(|_| "no collector running".to_string())?;
    let hz = hz.trim();

    let files = [
        (
            HEADER_FILE,
            format!("version = mock\ntitle = mock boot chart\nsystem.uname = mock\nsamples.hz = {hz}\n"),
        ),
        (KERNEL_LOG_FILE, "[    0.000000] Linux version mock\n".to_string()),
        (PRIMARY_LOG, "100\n1 (init) S 0 0 0 0 -1 0 0 0 0 0 0 0\n\n".to_string()),
        ("proc_stat.log", "100\ncpu  1 0 1 10 0 0 0 0 0 0\n\n".to_string()),
        ("proc_diskstats.log", "100\n   8       0 sda 1 0 8 0 0 0 0 0 0 0 0\n\n".to_string()),
    ];
    for (name, contents) in files {
        let path = out.join(name);
        std::fs::write(&path, contents).map_err(|e| format!("write {}: {e}", path.display()))?;
    }

    std::fs::remove_file(&marker).map_err(|e| format!("remove {}: {e}", marker.display()))
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    match args.as_slice() {
        ["--dump", dir] => match dump(Path::new(dir)) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("{e}");
                ExitCode::FAILURE
            }
        },
        [hz] => match hz.parse::<u32>() {
            Ok(hz) => match start(hz) {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("start: {e}");
                    ExitCode::FAILURE
                }
            },
            Err(_) => usage(),
        },
        _ => usage(),
    }
}

fn usage() -> ExitCode {
    eprintln!("usage: bootchart-mock-collector <hz> | --dump <dir>");
    ExitCode::from(2)
}
