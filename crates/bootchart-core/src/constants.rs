//! Constants.

// ---------------------------------------------------------------------------
// Init handoff
// ---------------------------------------------------------------------------

/// Init executed when no override is present on the command line.
pub const DEFAULT_INIT: &str = "/sbin/init";

/// Kernel argument naming the init to hand over to (highest priority).
pub const BOOTCHART_INIT_ARG: &str = "bootchart_init=";

/// Generic kernel init override.
pub const INIT_ARG: &str = "init=";

/// Device node that only exists once the real root is mounted.
pub const FULL_ROOT_PROBE: &str = "/dev/random";

/// Search path used while we stand in for init.
pub const PID1_SEARCH_PATH: &str = "/sbin:/bin:/usr/sbin:/usr/bin";

/// Delay after launching the collector before handing over to init, in ms.
pub const PID1_SETTLE_MS: u64 = 1000;

// ---------------------------------------------------------------------------
// Boot-completion detection
// ---------------------------------------------------------------------------

/// Poll interval while waiting for `/proc` to appear, in ms.
pub const PROC_POLL_MS: u64 = 100;

/// Poll interval for the watch-set scan, in ms.
pub const WATCH_POLL_MS: u64 = 2000;

/// Settle delay after the first watch-set match, in seconds.
pub const POST_LOGIN_SETTLE_SECS: u64 = 20;

/// Kernel command-line flag selecting the text-login watch-set.
pub const EARLY_LOGIN_PARAM: &str = "early_login";

/// Where systemd keeps the `default.target` symlink: the administrator's
/// choice first, then the vendor default.
pub const SYSTEMD_DEFAULT_TARGETS: &[&str] = &[
    "/etc/systemd/system/default.target",
    "/usr/lib/systemd/system/default.target",
    "/lib/systemd/system/default.target",
];

pub const TEXT_LOGIN_PROGRAMS: &[&str] = &["mingetty", "agetty", "rungetty", "getty", "fgetty"];

pub const GRAPHICAL_PROGRAMS: &[&str] = &[
    "gdm",
    "gdm3",
    "gdm-session-worker",
    "kdm_greet",
    "lightdm",
    "sddm",
    "xdm",
    "gnome-shell",
    "gnome-panel",
    "plasmashell",
    "kdesktop",
    "ksplashqml",
    "xfce4-session",
    "xfce4-panel",
    "lxsession",
    "lxpanel",
    "mate-panel",
    "icewm-session",
];

// ---------------------------------------------------------------------------
// Collector dump
// ---------------------------------------------------------------------------

/// Log whose presence proves the dump produced usable output.
pub const PRIMARY_LOG: &str = "proc_ps.log";

pub const HEADER_FILE: &str = "header";
pub const KERNEL_LOG_FILE: &str = "dmesg";

pub const COLLECTOR_PID_FILE: &str = "bootchart-collector.pid";
pub const DUMP_LOCK_FILE: &str = "bootchart-dump.lock";
pub const DUMP_DIR_PREFIX: &str = "bootchart.";
