//! Error taxonomy surfaced by the overlay subsystem
//!
//! Backends and plumbing use `anyhow` internally; everything that reaches the
//! host application is converted into one of these variants first.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OverlayError {
    /// Bad document path or bad rectangle
    #[error("validation error: {0}")]
    Validation(String),

    /// The editor process could not be started
    #[error("launch error: {0}")]
    Launch(String),

    /// No qualifying editor window appeared in time
    #[error("window not found: no editor window for pid {pid} within {}ms", timeout.as_millis())]
    WindowNotFound { pid: u32, timeout: Duration },

    /// A native geometry call failed (or the tracked window vanished)
    #[error("positioning error: {0}")]
    Positioning(String),

    /// Decoration changes failed; cosmetic only
    #[error("decoration error: {0}")]
    Decoration(String),
}

pub type OverlayResult<T> = std::result::Result<T, OverlayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_not_found_display() {
        let err = OverlayError::WindowNotFound {
            pid: 42,
            timeout: Duration::from_millis(1500),
        };
        assert_eq!(
            err.to_string(),
            "window not found: no editor window for pid 42 within 1500ms"
        );
    }

    #[test]
    fn test_launch_error_display() {
        let err = OverlayError::Launch("soffice: not found".to_string());
        assert_eq!(err.to_string(), "launch error: soffice: not found");
    }
}
