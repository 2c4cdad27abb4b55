//! Maps IPC requests onto `OverlayManager` calls

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, warn};

use super::{OverlayConnection, OverlayRequest, OverlayResponse};
use crate::constants::runtime;
use crate::manager::OverlayManager;

/// Whether the server keeps running after a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Shutdown,
}

pub fn handle_request(manager: &mut OverlayManager, req: OverlayRequest) -> (OverlayResponse, Flow) {
    let response = match req {
        OverlayRequest::Initialize { documents_dir } => {
            OverlayResponse::Initialized(manager.initialize(documents_dir.as_deref()))
        }

        OverlayRequest::LoadDocument { path, bounds } => {
            info!(path = %path.display(), bounds = ?bounds, "Load requested via IPC");
            let result = manager.load_document(&path, bounds);
            OverlayResponse::Ack {
                success: result.is_ok(),
                state: Some(manager.state().as_str().to_string()),
                error: result.err().map(|e| e.to_string()),
            }
        }

        OverlayRequest::UpdateContainerBounds(bounds) => match manager.update_container_bounds(bounds) {
            Ok(()) => OverlayResponse::ok(),
            Err(e) => OverlayResponse::failed(e),
        },

        OverlayRequest::UpdateWindowPosition { x, y } => {
            manager.update_window_position(x, y);
            OverlayResponse::ok()
        }

        OverlayRequest::Stop => {
            manager.stop();
            OverlayResponse::ok()
        }

        OverlayRequest::GetStatus => OverlayResponse::Status(manager.get_status()),

        OverlayRequest::ConfigureSyncEngine(patch) => match manager.configure_sync_engine(&patch) {
            Ok(()) => OverlayResponse::ok(),
            Err(e) => OverlayResponse::failed(e),
        },

        OverlayRequest::ResetCalibration => {
            manager.reset_calibration();
            OverlayResponse::ok()
        }

        OverlayRequest::GetSyncMetrics => OverlayResponse::Metrics(manager.get_sync_metrics()),

        OverlayRequest::CalibrateOffsets(observed) => match manager.calibrate_offsets(observed) {
            Ok(offset) => {
                debug!(dx = offset.dx, dy = offset.dy, "Calibration applied via IPC");
                OverlayResponse::ok()
            }
            Err(e) => OverlayResponse::failed(e),
        },

        OverlayRequest::Ping => OverlayResponse::Pong,

        OverlayRequest::Shutdown => {
            info!("Received shutdown request via IPC");
            manager.stop();
            return (OverlayResponse::ok(), Flow::Shutdown);
        }
    };
    (response, Flow::Continue)
}

/// Answer requests on one connection until the client hangs up, asks for
/// shutdown, or `shutdown` is raised
pub fn serve_connection(
    conn: &mut OverlayConnection,
    manager: &mut OverlayManager,
    shutdown: &AtomicBool,
) -> Result<Flow> {
    info!("Host connected to overlay server");
    let poll = Duration::from_millis(runtime::REQUEST_POLL_INTERVAL_MS);
    loop {
        if shutdown.load(Ordering::SeqCst) {
            info!("Shutdown signalled while a host is connected");
            return Ok(Flow::Shutdown);
        }

        let req = match conn.poll_request(poll) {
            Ok(Some(req)) => req,
            Ok(None) => continue,
            Err(e) => {
                debug!(error = %format!("{e:#}"), "IPC connection closed");
                info!("Host disconnected from overlay server");
                return Ok(Flow::Continue);
            }
        };

        let (response, flow) = handle_request(manager, req);
        if let Err(e) = conn.send_response(&response) {
            warn!(error = %format!("{e:#}"), "Failed to send IPC response");
            return Ok(flow);
        }
        if flow == Flow::Shutdown {
            return Ok(flow);
        }
    }
}
