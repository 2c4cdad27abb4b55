//! Session orchestration: launch, discover, strip, place, sync, tear down
//!
//! One `OverlayManager` owns at most one editor process, one tracked window
//! and one sync loop. All methods run on the caller's thread; only the sync
//! loop runs in the background.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::OverlayConfig;
use crate::decorations::DecorationRemover;
use crate::error::{OverlayError, OverlayResult};
use crate::geometry::{CalibrationOffset, ContainerBounds, CoordinateSystem, Rect};
use crate::lock;
use crate::platform::{self, Capabilities, WindowBackend, WindowHandle};
use crate::process::EditorProcess;
use crate::state::{ErrorCallback, OverlayState, StateCallback, StateMachine};
use crate::sync::{PositionSyncEngine, SyncMetrics, SyncSettingsPatch};
use crate::tracker::WindowTracker;

/// Answer to `initialize`: which overlay features work here
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformInfo {
    pub platform: String,
    pub backend: String,
    pub features: Capabilities,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayStatus {
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Rect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<SyncMetrics>,
}

pub struct OverlayManager {
    config: OverlayConfig,
    backend: Arc<dyn WindowBackend>,
    documents_dir: Option<PathBuf>,
    machine: StateMachine,
    coords: Arc<Mutex<CoordinateSystem>>,
    tracker: WindowTracker,
    decorations: DecorationRemover,
    engine: PositionSyncEngine,
    process: Option<EditorProcess>,
}

impl OverlayManager {
    /// Manager bound to the windowing system of the running session
    pub fn new(config: OverlayConfig) -> Result<Self> {
        let backend = platform::detect()?;
        Ok(Self::with_backend(config, backend))
    }

    pub fn with_backend(config: OverlayConfig, backend: Arc<dyn WindowBackend>) -> Self {
        let coords = Arc::new(Mutex::new(CoordinateSystem::new()));
        info!(backend = backend.name(), "Overlay manager created");
        Self {
            tracker: WindowTracker::new(backend.clone()),
            decorations: DecorationRemover::new(backend.clone()),
            engine: PositionSyncEngine::new(backend.clone(), coords.clone(), config.sync),
            coords,
            config,
            backend,
            documents_dir: None,
            machine: StateMachine::new(),
            process: None,
        }
    }

    pub fn set_state_callback(&self, callback: StateCallback) {
        self.machine.set_state_callback(callback);
    }

    pub fn set_error_callback(&self, callback: ErrorCallback) {
        self.machine.set_error_callback(callback);
    }

    /// Record the base directory for relative document paths
    pub fn initialize(&mut self, documents_dir: Option<&Path>) -> PlatformInfo {
        if let Some(dir) = documents_dir {
            if !dir.is_dir() {
                warn!(dir = %dir.display(), "Documents directory does not exist (yet)");
            }
            self.documents_dir = Some(dir.to_path_buf());
        }
        let info = self.platform_info();
        info!(
            platform = %info.platform,
            backend = %info.backend,
            features = ?info.features,
            documents_dir = ?self.documents_dir,
            "Overlay initialized"
        );
        info
    }

    pub fn platform_info(&self) -> PlatformInfo {
        PlatformInfo {
            platform: std::env::consts::OS.to_string(),
            backend: self.backend.name().to_string(),
            features: self.backend.capabilities(),
        }
    }

    /// Open `file_path` in the editor and overlay it onto `bounds`. An active
    /// session is stopped first. Any failure leaves the manager in `Error`
    /// with the launched process (if any) terminated.
    pub fn load_document(&mut self, file_path: &Path, bounds: ContainerBounds) -> OverlayResult<()> {
        if self.machine.current() != OverlayState::Idle {
            info!(state = %self.machine.current(), "Stopping active session before loading a new document");
            self.stop();
        }

        match self.launch_and_embed(file_path, bounds) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.abort_load(&err);
                Err(err)
            }
        }
    }

    fn resolve_document(&self, file_path: &Path) -> PathBuf {
        match &self.documents_dir {
            Some(dir) if file_path.is_relative() => dir.join(file_path),
            _ => file_path.to_path_buf(),
        }
    }

    fn launch_and_embed(&mut self, file_path: &Path, bounds: ContainerBounds) -> OverlayResult<()> {
        let document = self.resolve_document(file_path);
        if !document.is_file() {
            return Err(OverlayError::Validation(format!(
                "document not found: {}",
                document.display()
            )));
        }
        lock(&self.coords).update_container_bounds(bounds)?;

        self.machine.transition(OverlayState::Launching);
        self.tracker.set_title_hint(
            document
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
        );
        self.tracker.snapshot_baseline();
        let process = EditorProcess::spawn(&self.config.editor.command, &self.config.editor.args, &document)?;
        let pid = process.pid();
        self.process = Some(process);

        self.machine.transition(OverlayState::SearchingWindow);
        let window = self.tracker.find_window(
            pid,
            self.config.discovery.timeout(),
            self.config.discovery.poll_interval(),
        )?;

        if self.config.window.strip_decorations {
            self.decorations.strip_decorations(window);
        }
        if self.config.window.keep_above {
            self.decorations.set_keep_above(window, true);
        }
        let initial = self.place(window)?;
        self.machine.transition(OverlayState::Positioning);

        let machine = self.machine.clone();
        self.engine.start(
            window,
            initial,
            Box::new(move |err| {
                machine.fail(err.to_string());
            }),
        )?;
        self.machine.transition(OverlayState::Embedded);
        info!(pid = pid, window = %window, document = %document.display(), "Document embedded");
        Ok(())
    }

    /// First placement; skipped until the host window position is known
    fn place(&self, window: WindowHandle) -> OverlayResult<Option<Rect>> {
        let Some(rect) = lock(&self.coords).calculate_screen_position() else {
            debug!(window = %window, "Host window position unknown, deferring placement to sync loop");
            return Ok(None);
        };
        self.backend
            .move_resize(window, rect)
            .map_err(|e| OverlayError::Positioning(format!("initial placement failed: {e:#}")))?;
        debug!(window = %window, rect = ?rect, "Initial placement");
        Ok(Some(rect))
    }

    fn abort_load(&mut self, err: &OverlayError) {
        warn!(error = %err, "Document load failed");
        self.machine.fail(err.to_string());
        self.release_session();
    }

    /// Stop the loop, give the window back its chrome and end the editor
    fn release_session(&mut self) {
        self.engine.stop();
        if let Some(window) = self.tracker.clear() {
            if self.tracker.is_alive(window) {
                self.decorations.set_keep_above(window, false);
                self.decorations.restore_decorations(window);
            }
            self.decorations.forget(window);
        }
        if let Some(mut process) = self.process.take() {
            process.terminate(self.config.editor.terminate_grace());
        }
    }

    /// Tear down the session and return to `Idle`. Safe from any state.
    pub fn stop(&mut self) {
        // Joined before `Stopping` so a fault raised by the loop in the
        // meantime cannot land after it
        self.engine.stop();

        if self.machine.current() == OverlayState::Idle {
            if self.process.is_none() && self.tracker.tracked().is_none() {
                debug!("Stop requested while idle");
                return;
            }
            self.release_session();
            self.engine.reset_metrics();
            return;
        }

        self.machine.transition(OverlayState::Stopping);
        self.release_session();
        self.engine.reset_metrics();
        self.machine.transition(OverlayState::Idle);
    }

    pub fn update_container_bounds(&self, bounds: ContainerBounds) -> OverlayResult<()> {
        lock(&self.coords).update_container_bounds(bounds)
    }

    pub fn update_window_position(&self, x: i32, y: i32) {
        lock(&self.coords).update_window_position(x, y);
    }

    pub fn state(&self) -> OverlayState {
        self.machine.current()
    }

    pub fn get_status(&self) -> OverlayStatus {
        let state = self.machine.current();
        let embedded = state == OverlayState::Embedded;
        OverlayStatus {
            state: state.as_str().to_string(),
            error: state.error_message().map(str::to_string),
            geometry: embedded
                .then(|| {
                    self.engine
                        .last_geometry()
                        .or_else(|| lock(&self.coords).calculate_screen_position())
                })
                .flatten(),
            metrics: embedded.then(|| self.engine.get_metrics()),
        }
    }

    pub fn configure_sync_engine(&self, patch: &SyncSettingsPatch) -> OverlayResult<()> {
        self.engine.apply(patch)
    }

    pub fn get_sync_metrics(&self) -> SyncMetrics {
        self.engine.get_metrics()
    }

    /// `observed` is where the current container really is on screen
    pub fn calibrate_offsets(&self, observed: Rect) -> OverlayResult<CalibrationOffset> {
        let mut coords = lock(&self.coords);
        coords.calibrate_offsets(observed)?;
        Ok(coords.calibration())
    }

    pub fn reset_calibration(&self) {
        lock(&self.coords).reset_calibration();
    }
}

impl Drop for OverlayManager {
    fn drop(&mut self) {
        self.stop();
    }
}
