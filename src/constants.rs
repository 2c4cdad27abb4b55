//! Application-wide constants
//!
//! This module contains all magic numbers and string literals used throughout
//! the application, providing a single source of truth for constant values.

/// X11 protocol constants
pub mod x11 {
    /// `_NET_WM_STATE` client message action: remove the property
    pub const NET_WM_STATE_REMOVE: u32 = 0;

    /// `_NET_WM_STATE` client message action: add the property
    pub const NET_WM_STATE_ADD: u32 = 1;

    /// Source indication for EWMH client messages (2 = pager/direct user action)
    pub const SOURCE_INDICATION_PAGER: u32 = 2;

    /// `_MOTIF_WM_HINTS` flag marking the decorations field as valid
    pub const MWM_HINTS_DECORATIONS: u32 = 1 << 1;

    /// `_MOTIF_WM_HINTS` decorations value: no chrome at all
    pub const MWM_DECOR_NONE: u32 = 0;

    /// `_MOTIF_WM_HINTS` decorations value: all chrome
    pub const MWM_DECOR_ALL: u32 = 1;

    /// Number of 32-bit fields in a `_MOTIF_WM_HINTS` property
    pub const MWM_HINTS_ELEMENTS: usize = 5;

    /// Size of PID property value in bytes
    pub const PID_PROPERTY_SIZE: usize = 4;

    /// Upper bound on title property length requested from the server
    pub const TITLE_MAX_LONG_LENGTH: u32 = 1024;
}

/// Native window discovery defaults
pub mod discovery {
    /// How long `find_window` waits for the editor window by default
    pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

    /// Delay between two scans of the window list
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 200;

    /// Window titles containing any of these (case-insensitive) are transient
    pub const SPLASH_TITLE_MARKERS: &[&str] = &["splash", "loading"];

    /// Window titles exactly equal to any of these are start screens, not documents
    pub const START_SCREEN_TITLES: &[&str] = &["LibreOffice", "Start Center", "OpenOffice"];
}

/// Position synchronization defaults
pub mod sync {
    /// Pixel distance a component must exceed before a native move is issued
    pub const MOVE_THRESHOLD_PX: i32 = 1;

    /// Default lower bound of the adaptive tick rate
    pub const DEFAULT_MIN_FPS: u32 = 10;

    /// Default upper bound of the adaptive tick rate
    pub const DEFAULT_MAX_FPS: u32 = 60;

    /// Default share of the remaining distance covered per tick when smoothing
    pub const DEFAULT_SMOOTHING_FACTOR: f64 = 0.5;

    /// Consecutive native failures tolerated before the engine gives up
    pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 10;

    /// Share of the excess rate kept per decay step while the host is at rest
    pub const FPS_DECAY: f64 = 0.9;

    /// Length of one decay step
    pub const FPS_DECAY_STEP_MS: u64 = 100;

    /// Interval between two liveness probes of the tracked window
    pub const LIVENESS_INTERVAL_MS: u64 = 1_000;

    /// Window over which the achieved frame rate is measured
    pub const FPS_WINDOW_MS: u64 = 1_000;
}

/// External editor process constants
pub mod editor {
    /// Default editor executable
    pub const DEFAULT_COMMAND: &str = "soffice";

    /// Default editor arguments placed before the document path
    pub const DEFAULT_ARGS: &[&str] = &["--nologo", "--norestore"];

    /// Time between SIGTERM and forced termination
    pub const DEFAULT_TERMINATE_GRACE_MS: u64 = 3_000;

    /// Polling step while waiting for the editor to exit
    pub const EXIT_POLL_INTERVAL_MS: u64 = 50;
}

/// Filesystem locations
pub mod paths {
    /// Format for a process's stat file (used to rebuild the process tree)
    pub const PROC_STAT_FORMAT: &str = "/proc/{}/stat";

    /// Root of the procfs mount
    pub const PROC_ROOT: &str = "/proc";
}

/// Configuration file constants
pub mod config {
    /// Application directory under the platform config/cache/runtime dirs
    pub const APP_DIR: &str = "doc-overlay";

    /// Configuration filename
    pub const FILENAME: &str = "config.json";

    /// IPC socket filename
    pub const SOCKET_FILENAME: &str = "overlay.sock";

    /// Default log level when neither LOG_LEVEL nor the config sets one
    pub const DEFAULT_LOG_LEVEL: &str = "info";
}

/// Binary main loops
pub mod runtime {
    /// How often the server checks for new connections and shutdown signals
    pub const ACCEPT_POLL_INTERVAL_MS: u64 = 100;

    /// How long one read on a connected host waits before shutdown signals are checked
    pub const REQUEST_POLL_INTERVAL_MS: u64 = 100;

    /// How often `open` checks the session state and shutdown signals
    pub const SESSION_POLL_INTERVAL_MS: u64 = 200;
}
