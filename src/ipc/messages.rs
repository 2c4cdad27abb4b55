//! IPC message types for host application ↔ overlay server communication

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::geometry::{ContainerBounds, Rect};
use crate::manager::{OverlayStatus, PlatformInfo};
use crate::sync::{SyncMetrics, SyncSettingsPatch};

/// Requests sent from the host application to the overlay server
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum OverlayRequest {
    /// Set the base directory for relative document paths
    Initialize { documents_dir: Option<PathBuf> },

    LoadDocument { path: PathBuf, bounds: ContainerBounds },

    /// Placeholder moved or resized inside the host window
    UpdateContainerBounds(ContainerBounds),

    /// Host window moved on screen
    UpdateWindowPosition { x: i32, y: i32 },

    Stop,

    GetStatus,

    ConfigureSyncEngine(SyncSettingsPatch),

    GetSyncMetrics,

    /// Observed on-screen rectangle of the current container
    CalibrateOffsets(Rect),

    /// Drop the calibration offset
    ResetCalibration,

    /// Health check
    Ping,

    /// Stop the session and the server
    Shutdown,
}

/// Responses sent from the overlay server to the host application
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum OverlayResponse {
    /// Response to Initialize
    Initialized(PlatformInfo),

    /// Outcome of a command
    Ack {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        state: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    Status(OverlayStatus),

    Metrics(SyncMetrics),

    /// Health check response
    Pong,
}

impl OverlayResponse {
    pub fn ok() -> Self {
        OverlayResponse::Ack {
            success: true,
            state: None,
            error: None,
        }
    }

    pub fn failed(error: impl ToString) -> Self {
        OverlayResponse::Ack {
            success: false,
            state: None,
            error: Some(error.to_string()),
        }
    }
}
