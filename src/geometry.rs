//! Screen-space geometry for the tracked editor window
//!
//! Container bounds arrive relative to the host window's content area; the
//! host window position arrives in screen coordinates. Their sum, corrected by
//! a calibration offset, is where the editor window has to sit.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{OverlayError, OverlayResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// UI placeholder rectangle, relative to the host window content area
pub type ContainerBounds = Rect;

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// Only rectangles with a positive area can be applied to a window
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// Offset by `(dx, dy)`, clamped to the i32 range
    pub fn translated(&self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x.saturating_add(dx),
            y: self.y.saturating_add(dy),
            ..*self
        }
    }

    /// Largest per-component difference between two rectangles, saturated at
    /// `i32::MAX`
    pub fn max_component_delta(&self, other: &Rect) -> i32 {
        let diff = |a: i32, b: i32| (i64::from(a) - i64::from(b)).abs();
        let max = diff(self.x, other.x)
            .max(diff(self.y, other.y))
            .max(diff(self.width, other.width))
            .max(diff(self.height, other.height));
        i32::try_from(max).unwrap_or(i32::MAX)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Correction for host-window chrome (title bar height, borders)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationOffset {
    pub dx: i32,
    pub dy: i32,
}

#[derive(Debug, Clone, Default)]
pub struct CoordinateSystem {
    container: Option<ContainerBounds>,
    window_position: Option<Position>,
    calibration: CalibrationOffset,
}

impl CoordinateSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the container rectangle. Empty rectangles are rejected and the
    /// previous one is kept.
    pub fn update_container_bounds(&mut self, bounds: ContainerBounds) -> OverlayResult<()> {
        if !bounds.is_valid() {
            warn!(
                width = bounds.width,
                height = bounds.height,
                "Rejecting container bounds with non-positive size"
            );
            return Err(OverlayError::Validation(format!(
                "container bounds must have a positive size, got {}x{}",
                bounds.width, bounds.height
            )));
        }
        self.container = Some(bounds);
        Ok(())
    }

    pub fn update_window_position(&mut self, x: i32, y: i32) {
        self.window_position = Some(Position::new(x, y));
    }

    pub fn calibration(&self) -> CalibrationOffset {
        self.calibration
    }

    pub fn reset_calibration(&mut self) {
        self.calibration = CalibrationOffset::default();
    }

    /// Absolute on-screen rectangle for the editor window, once both the
    /// container and the host window position are known
    pub fn calculate_screen_position(&self) -> Option<Rect> {
        let container = self.container?;
        let window = self.window_position?;
        Some(container.translated(
            window.x.saturating_add(self.calibration.dx),
            window.y.saturating_add(self.calibration.dy),
        ))
    }

    /// Derive the calibration offset from the observed on-screen position of
    /// the current container
    pub fn calibrate_offsets(&mut self, observed: Rect) -> OverlayResult<()> {
        let (Some(container), Some(window)) = (self.container, self.window_position) else {
            return Err(OverlayError::Validation(
                "calibration needs container bounds and a window position".to_string(),
            ));
        };
        let uncorrected = container.translated(window.x, window.y);
        self.calibration = CalibrationOffset {
            dx: observed.x.saturating_sub(uncorrected.x),
            dy: observed.y.saturating_sub(uncorrected.y),
        };
        info!(
            dx = self.calibration.dx,
            dy = self.calibration.dy,
            "Calibrated screen offsets"
        );
        debug!(observed = ?observed, computed = ?uncorrected, "Calibration inputs");
        Ok(())
    }
}
