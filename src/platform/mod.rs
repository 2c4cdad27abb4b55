//! Native windowing backends
//!
//! One small trait, one implementation per windowing system. The backend is
//! picked once at startup by [`detect`] and shared (`Arc`) between the control
//! thread and the sync thread.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::geometry::Rect;

#[cfg(test)]
pub mod fake;
#[cfg(windows)]
#[allow(unsafe_code)]
mod win32;
#[cfg(all(unix, not(target_os = "macos")))]
mod x11;

/// Opaque native window identifier (X11 window id, Win32 HWND value)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowHandle(pub u64);

impl fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// One top-level window as reported by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInfo {
    pub handle: WindowHandle,
    pub pid: Option<u32>,
    pub title: String,
}

/// What a backend can do on this platform
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub position_sync: bool,
    pub decoration_removal: bool,
    pub always_on_top: bool,
    pub taskbar_hiding: bool,
}

pub trait WindowBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> Capabilities;

    /// Top-level windows, oldest first (the last entry is the most recently
    /// created or mapped one)
    fn list_windows(&self) -> Result<Vec<WindowInfo>>;

    fn is_alive(&self, handle: WindowHandle) -> bool;

    fn move_resize(&self, handle: WindowHandle, rect: Rect) -> Result<()>;

    fn strip_decorations(&self, handle: WindowHandle) -> Result<()>;

    fn restore_decorations(&self, handle: WindowHandle) -> Result<()>;

    fn set_keep_above(&self, handle: WindowHandle, above: bool) -> Result<()>;
}

/// Connect to the windowing system of the running session
#[cfg(all(unix, not(target_os = "macos")))]
pub fn detect() -> Result<Arc<dyn WindowBackend>> {
    if std::env::var_os("DISPLAY").is_none() && std::env::var_os("WAYLAND_DISPLAY").is_some() {
        anyhow::bail!(
            "Native Wayland sessions do not allow positioning foreign windows; run the editor under XWayland (DISPLAY must be set)"
        );
    }
    Ok(Arc::new(x11::X11Backend::connect()?))
}

/// Connect to the windowing system of the running session
#[cfg(windows)]
pub fn detect() -> Result<Arc<dyn WindowBackend>> {
    Ok(Arc::new(win32::Win32Backend::new()))
}

/// Connect to the windowing system of the running session
#[cfg(not(any(windows, all(unix, not(target_os = "macos")))))]
pub fn detect() -> Result<Arc<dyn WindowBackend>> {
    anyhow::bail!("No window backend available for {}", std::env::consts::OS)
}
