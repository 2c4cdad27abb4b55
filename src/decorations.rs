//! Window-manager chrome removal for the tracked window
//!
//! Everything here is cosmetic: failures are logged as decoration errors and
//! never change the overlay state. Restoration is best-effort; some window
//! managers only re-read Motif hints on remap.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::OverlayError;
use crate::platform::{WindowBackend, WindowHandle};

pub struct DecorationRemover {
    backend: Arc<dyn WindowBackend>,
    stripped: HashSet<WindowHandle>,
    above: HashSet<WindowHandle>,
}

impl DecorationRemover {
    pub fn new(backend: Arc<dyn WindowBackend>) -> Self {
        Self {
            backend,
            stripped: HashSet::new(),
            above: HashSet::new(),
        }
    }

    /// Remove title bar, border and taskbar entry. Idempotent.
    pub fn strip_decorations(&mut self, handle: WindowHandle) {
        if self.stripped.contains(&handle) {
            debug!(window = %handle, "Decorations already stripped");
            return;
        }
        if !self.backend.capabilities().decoration_removal {
            debug!(backend = self.backend.name(), "Decoration removal not supported");
            return;
        }
        match self.backend.strip_decorations(handle) {
            Ok(()) => {
                info!(window = %handle, "Stripped window decorations");
                self.stripped.insert(handle);
            }
            Err(e) => {
                let err = OverlayError::Decoration(format!("{e:#}"));
                warn!(window = %handle, error = %err, "Failed to strip decorations");
            }
        }
    }

    /// Best-effort reversal of [`Self::strip_decorations`]
    pub fn restore_decorations(&mut self, handle: WindowHandle) {
        if !self.stripped.remove(&handle) {
            debug!(window = %handle, "Decorations were never stripped, nothing to restore");
            return;
        }
        match self.backend.restore_decorations(handle) {
            Ok(()) => info!(window = %handle, "Restored window decorations"),
            Err(e) => {
                let err = OverlayError::Decoration(format!("{e:#}"));
                warn!(window = %handle, error = %err, "Failed to restore decorations");
            }
        }
    }

    /// Keep the overlay stacked above the host window (or release it)
    pub fn set_keep_above(&mut self, handle: WindowHandle, above: bool) {
        if above == self.above.contains(&handle) {
            return;
        }
        if !self.backend.capabilities().always_on_top {
            debug!(backend = self.backend.name(), "Always-on-top not supported");
            return;
        }
        match self.backend.set_keep_above(handle, above) {
            Ok(()) => {
                debug!(window = %handle, above = above, "Updated keep-above state");
                if above {
                    self.above.insert(handle);
                } else {
                    self.above.remove(&handle);
                }
            }
            Err(e) => {
                let err = OverlayError::Decoration(format!("{e:#}"));
                warn!(window = %handle, above = above, error = %err, "Failed to change stacking");
            }
        }
    }

    /// Drop bookkeeping for a window that no longer exists
    pub fn forget(&mut self, handle: WindowHandle) {
        self.stripped.remove(&handle);
        self.above.remove(&handle);
    }
}
