//! Tracked-overlay embedding of an external document editor window
//!
//! Instead of reparenting the editor's top-level window into the host UI, the
//! editor window is stripped of its chrome and continuously moved/resized to
//! sit exactly over a placeholder region of the host window.

#![cfg_attr(not(windows), forbid(unsafe_code))]
#![cfg_attr(windows, deny(unsafe_code))]

pub mod config;
pub mod constants;
pub mod decorations;
pub mod error;
pub mod geometry;
#[cfg(unix)]
pub mod ipc;
pub mod manager;
pub mod platform;
pub mod process;
pub mod state;
pub mod sync;
pub mod tracker;

pub use config::OverlayConfig;
pub use error::{OverlayError, OverlayResult};
pub use geometry::{CalibrationOffset, ContainerBounds, CoordinateSystem, Rect};
pub use manager::{OverlayManager, OverlayStatus, PlatformInfo};
pub use platform::{Capabilities, WindowBackend, WindowHandle, WindowInfo};
pub use state::OverlayState;
pub use sync::{SyncMetrics, SyncSettings, SyncSettingsPatch};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex shared with the sync thread, ignoring poisoning (a panicked
/// holder leaves plain data behind, never a broken invariant)
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
