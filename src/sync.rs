//! Position synchronization loop
//!
//! The control law lives in [`advance`], a pure function of the previous loop
//! state, the current target and the elapsed time. The background thread only
//! feeds it inputs and carries out the move commands it returns.

use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};

use crate::constants::sync;
use crate::error::{OverlayError, OverlayResult};
use crate::geometry::{CoordinateSystem, Rect};
use crate::lock;
use crate::platform::{WindowBackend, WindowHandle};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default)]
    pub enable_smoothing: bool,

    /// Share of the remaining delta covered per tick (1.0 = snap, 0 = frozen)
    #[serde(default = "default_smoothing_factor")]
    pub smoothing_factor: f64,

    #[serde(default)]
    pub enable_prediction: bool,

    #[serde(default = "default_min_fps")]
    pub min_fps: u32,

    #[serde(default = "default_max_fps")]
    pub max_fps: u32,

    /// Native failures in a row before the engine stops itself
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
}

fn default_smoothing_factor() -> f64 {
    sync::DEFAULT_SMOOTHING_FACTOR
}

fn default_min_fps() -> u32 {
    sync::DEFAULT_MIN_FPS
}

fn default_max_fps() -> u32 {
    sync::DEFAULT_MAX_FPS
}

fn default_max_consecutive_failures() -> u32 {
    sync::DEFAULT_MAX_CONSECUTIVE_FAILURES
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            enable_smoothing: false,
            smoothing_factor: default_smoothing_factor(),
            enable_prediction: false,
            min_fps: default_min_fps(),
            max_fps: default_max_fps(),
            max_consecutive_failures: default_max_consecutive_failures(),
        }
    }
}

impl SyncSettings {
    pub fn validate(&self) -> OverlayResult<()> {
        if !(0.0..=1.0).contains(&self.smoothing_factor) {
            return Err(OverlayError::Validation(format!(
                "smoothing_factor must be within 0..=1, got {}",
                self.smoothing_factor
            )));
        }
        if self.min_fps == 0 || self.max_fps < self.min_fps {
            return Err(OverlayError::Validation(format!(
                "fps range must satisfy 0 < min_fps <= max_fps, got {}..{}",
                self.min_fps, self.max_fps
            )));
        }
        if self.max_consecutive_failures == 0 {
            return Err(OverlayError::Validation(
                "max_consecutive_failures must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Copy with `patch` applied, validated as a whole
    pub fn patched(&self, patch: &SyncSettingsPatch) -> OverlayResult<SyncSettings> {
        let mut next = *self;
        if let Some(v) = patch.enable_smoothing {
            next.enable_smoothing = v;
        }
        if let Some(v) = patch.smoothing_factor {
            next.smoothing_factor = v;
        }
        if let Some(v) = patch.enable_prediction {
            next.enable_prediction = v;
        }
        if let Some(v) = patch.min_fps {
            next.min_fps = v;
        }
        if let Some(v) = patch.max_fps {
            next.max_fps = v;
        }
        if let Some(v) = patch.max_consecutive_failures {
            next.max_consecutive_failures = v;
        }
        next.validate()?;
        Ok(next)
    }
}

/// Partial update for [`SyncSettings`]; absent fields keep their value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettingsPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_smoothing: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smoothing_factor: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_prediction: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_fps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_fps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_consecutive_failures: Option<u32>,
}

/// Diagnostic snapshot; never read by the loop itself
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncMetrics {
    pub tick_count: u64,
    pub move_count: u64,
    pub achieved_fps: f64,
    pub current_target_fps: f64,
    pub average_move_latency_ms: f64,
    pub consecutive_failures: u32,
}

/// Loop memory carried from one tick to the next
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncState {
    /// Geometry most recently written to the window
    pub last_applied: Option<Rect>,
    /// Raw target observed on the previous tick
    pub last_target: Option<Rect>,
    /// Target movement between the two previous ticks
    pub last_delta: Option<(i32, i32)>,
    pub target_fps: f64,
}

impl SyncState {
    pub fn new(initial: Option<Rect>, settings: &SyncSettings) -> Self {
        Self {
            last_applied: initial,
            last_target: None,
            last_delta: None,
            target_fps: f64::from(settings.min_fps),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.target_fps.max(1.0))
    }
}

/// Rounded step of `factor` of the way from `from` to `to`. Steps that would
/// round into the move threshold are widened to just past it, so a low factor
/// still makes progress without jumping to the target.
fn lerp(from: i32, to: i32, factor: f64) -> i32 {
    let remaining = i64::from(to) - i64::from(from);
    if remaining == 0 || factor <= 0.0 {
        return from;
    }
    let mut step = (remaining as f64 * factor).round() as i64;
    let threshold = i64::from(sync::MOVE_THRESHOLD_PX);
    if remaining.abs() > threshold && step.abs() <= threshold {
        step = remaining.signum() * (threshold + 1);
    }
    clamp_i32(i64::from(from) + step)
}

fn clamp_i32(value: i64) -> i32 {
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

fn smooth(from: Rect, to: Rect, factor: f64) -> Rect {
    let factor = factor.clamp(0.0, 1.0);
    Rect {
        x: lerp(from.x, to.x, factor),
        y: lerp(from.y, to.y, factor),
        width: lerp(from.width, to.width, factor),
        height: lerp(from.height, to.height, factor),
    }
}

/// Extrapolate one tick ahead from the mean of the last two target deltas
fn predict(target: Rect, delta: Option<(i32, i32)>, previous: Option<(i32, i32)>) -> Rect {
    match (delta, previous) {
        (Some((dx1, dy1)), Some((dx0, dy0))) => {
            let vx = (f64::from(dx1) + f64::from(dx0)) / 2.0;
            let vy = (f64::from(dy1) + f64::from(dy0)) / 2.0;
            target.translated(vx.round() as i32, vy.round() as i32)
        }
        _ => target,
    }
}

fn decay_fps(current: f64, min_fps: f64, dt: Duration) -> f64 {
    let steps = dt.as_secs_f64() / Duration::from_millis(sync::FPS_DECAY_STEP_MS).as_secs_f64();
    min_fps + (current - min_fps).max(0.0) * sync::FPS_DECAY.powf(steps)
}

/// One control step: returns the next loop state and the geometry to write,
/// if any
pub fn advance(
    state: &SyncState,
    target: Option<Rect>,
    settings: &SyncSettings,
    dt: Duration,
) -> (SyncState, Option<Rect>) {
    let min_fps = f64::from(settings.min_fps);
    let max_fps = f64::from(settings.max_fps).max(min_fps);
    let mut next = *state;

    let Some(raw) = target else {
        next.target_fps = decay_fps(state.target_fps, min_fps, dt).clamp(min_fps, max_fps);
        return (next, None);
    };

    let delta = state
        .last_target
        .map(|prev| (raw.x.saturating_sub(prev.x), raw.y.saturating_sub(prev.y)));
    let moving = state.last_target.is_some_and(|prev| prev != raw);
    next.target_fps = if moving {
        max_fps
    } else {
        decay_fps(state.target_fps, min_fps, dt).clamp(min_fps, max_fps)
    };
    next.last_target = Some(raw);
    next.last_delta = delta;

    let goal = if settings.enable_prediction {
        predict(raw, delta, state.last_delta)
    } else {
        raw
    };

    let proposed = match state.last_applied {
        Some(applied) if settings.enable_smoothing => {
            smooth(applied, goal, settings.smoothing_factor)
        }
        _ => goal,
    };

    match state.last_applied {
        Some(applied) if applied.max_component_delta(&proposed) <= sync::MOVE_THRESHOLD_PX => {
            (next, None)
        }
        _ => {
            next.last_applied = Some(proposed);
            (next, Some(proposed))
        }
    }
}

/// Invoked from the sync thread when the engine gives up on its own
pub type FaultHandler = Box<dyn Fn(OverlayError) + Send + 'static>;

struct Worker {
    stop_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Everything the background thread owns or shares
struct SyncLoop {
    backend: Arc<dyn WindowBackend>,
    coords: Arc<Mutex<CoordinateSystem>>,
    settings: Arc<Mutex<SyncSettings>>,
    metrics: Arc<Mutex<SyncMetrics>>,
    last_geometry: Arc<Mutex<Option<Rect>>>,
    window: WindowHandle,
    stop_rx: mpsc::Receiver<()>,
    on_fault: FaultHandler,
}

impl SyncLoop {
    fn stop_requested(&self) -> bool {
        matches!(
            self.stop_rx.try_recv(),
            Ok(()) | Err(TryRecvError::Disconnected)
        )
    }

    fn run(self, initial: Option<Rect>) {
        let mut state = SyncState::new(initial, &lock(&self.settings));
        let mut last_tick = Instant::now();
        let mut last_probe = last_tick;
        let mut window_start = last_tick;
        let mut window_ticks = 0u64;
        let mut failures = 0u32;
        let liveness_interval = Duration::from_millis(sync::LIVENESS_INTERVAL_MS);
        let fps_window = Duration::from_millis(sync::FPS_WINDOW_MS);

        debug!(window = %self.window, "Sync loop running");

        loop {
            match self.stop_rx.recv_timeout(state.tick_interval()) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }

            let settings = *lock(&self.settings);
            let now = Instant::now();
            let dt = now.duration_since(last_tick);
            last_tick = now;

            if now.duration_since(last_probe) >= liveness_interval {
                last_probe = now;
                if !self.backend.is_alive(self.window) {
                    warn!(window = %self.window, "Tracked window disappeared");
                    (self.on_fault)(OverlayError::Positioning(format!(
                        "tracked window {} no longer exists",
                        self.window
                    )));
                    break;
                }
            }

            let target = lock(&self.coords).calculate_screen_position();
            let (mut next, command) = advance(&state, target, &settings, dt);
            let mut fault = None;

            if let Some(rect) = command {
                if self.stop_requested() {
                    break;
                }
                let started = Instant::now();
                match self.backend.move_resize(self.window, rect) {
                    Ok(()) => {
                        failures = 0;
                        *lock(&self.last_geometry) = Some(rect);
                        let latency = started.elapsed();
                        let mut metrics = lock(&self.metrics);
                        metrics.move_count += 1;
                        let sample = latency.as_secs_f64() * 1000.0;
                        metrics.average_move_latency_ms +=
                            (sample - metrics.average_move_latency_ms) / metrics.move_count as f64;
                        trace!(window = %self.window, rect = ?rect, "Applied geometry");
                    }
                    Err(e) => {
                        failures += 1;
                        next.last_applied = state.last_applied;
                        warn!(
                            window = %self.window,
                            failures = failures,
                            error = %format!("{e:#}"),
                            "Failed to apply geometry"
                        );
                        if failures >= settings.max_consecutive_failures {
                            fault = Some(OverlayError::Positioning(format!(
                                "{failures} consecutive geometry failures, last: {e:#}"
                            )));
                        }
                    }
                }
            }

            state = next;
            window_ticks += 1;
            {
                let mut metrics = lock(&self.metrics);
                metrics.tick_count += 1;
                metrics.current_target_fps = state.target_fps;
                metrics.consecutive_failures = failures;
                let elapsed = now.duration_since(window_start);
                if elapsed >= fps_window {
                    metrics.achieved_fps = window_ticks as f64 / elapsed.as_secs_f64();
                    window_start = now;
                    window_ticks = 0;
                }
            }

            if let Some(err) = fault {
                error!(window = %self.window, error = %err, "Giving up on position sync");
                (self.on_fault)(err);
                break;
            }
        }

        debug!(window = %self.window, "Sync loop exited");
    }
}

pub struct PositionSyncEngine {
    backend: Arc<dyn WindowBackend>,
    coords: Arc<Mutex<CoordinateSystem>>,
    settings: Arc<Mutex<SyncSettings>>,
    metrics: Arc<Mutex<SyncMetrics>>,
    last_geometry: Arc<Mutex<Option<Rect>>>,
    worker: Option<Worker>,
}

impl PositionSyncEngine {
    pub fn new(
        backend: Arc<dyn WindowBackend>,
        coords: Arc<Mutex<CoordinateSystem>>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            backend,
            coords,
            settings: Arc::new(Mutex::new(settings)),
            metrics: Arc::new(Mutex::new(SyncMetrics::default())),
            last_geometry: Arc::new(Mutex::new(None)),
            worker: None,
        }
    }

    /// Start tracking `window`. `initial` is the geometry already applied by
    /// the caller, if any. A running loop is stopped first.
    pub fn start(
        &mut self,
        window: WindowHandle,
        initial: Option<Rect>,
        on_fault: FaultHandler,
    ) -> OverlayResult<()> {
        self.stop();
        *lock(&self.metrics) = SyncMetrics::default();
        *lock(&self.last_geometry) = initial;

        let (stop_tx, stop_rx) = mpsc::channel();
        let sync_loop = SyncLoop {
            backend: self.backend.clone(),
            coords: self.coords.clone(),
            settings: self.settings.clone(),
            metrics: self.metrics.clone(),
            last_geometry: self.last_geometry.clone(),
            window,
            stop_rx,
            on_fault,
        };
        let handle = thread::Builder::new()
            .name("overlay-sync".to_string())
            .spawn(move || sync_loop.run(initial))
            .map_err(|e| OverlayError::Positioning(format!("failed to start sync thread: {e}")))?;

        self.worker = Some(Worker { stop_tx, handle });
        info!(window = %window, settings = ?self.settings(), "Position sync started");
        Ok(())
    }

    /// Signal the loop and wait for it to exit; no geometry is written after
    /// this returns
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            // Send fails only if the loop already gave up on its own
            let _ = worker.stop_tx.send(());
            if worker.handle.join().is_err() {
                error!("Sync thread panicked");
            }
            info!("Position sync stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    pub fn get_metrics(&self) -> SyncMetrics {
        *lock(&self.metrics)
    }

    pub fn reset_metrics(&self) {
        *lock(&self.metrics) = SyncMetrics::default();
    }

    pub fn last_geometry(&self) -> Option<Rect> {
        *lock(&self.last_geometry)
    }

    pub fn settings(&self) -> SyncSettings {
        *lock(&self.settings)
    }

    pub fn set_smoothing(&self, enabled: bool, factor: f64) -> OverlayResult<()> {
        self.apply(&SyncSettingsPatch {
            enable_smoothing: Some(enabled),
            smoothing_factor: Some(factor),
            ..Default::default()
        })
    }

    pub fn set_prediction(&self, enabled: bool) {
        lock(&self.settings).enable_prediction = enabled;
    }

    /// Apply a partial update; the loop picks it up on its next tick
    pub fn apply(&self, patch: &SyncSettingsPatch) -> OverlayResult<()> {
        let mut settings = lock(&self.settings);
        *settings = settings.patched(patch)?;
        debug!(settings = ?*settings, "Sync settings updated");
        Ok(())
    }
}

impl Drop for PositionSyncEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fake::FakeBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TICK: Duration = Duration::from_millis(16);

    fn settings() -> SyncSettings {
        SyncSettings::default()
    }

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_advance_skips_without_target() {
        let state = SyncState::new(Some(Rect::new(0, 0, 100, 100)), &settings());
        let (next, command) = advance(&state, None, &settings(), TICK);
        assert_eq!(command, None);
        assert_eq!(next.last_applied, state.last_applied);
    }

    #[test]
    fn test_first_command_snaps_to_target() {
        let state = SyncState::new(None, &settings());
        let target = Rect::new(100, 100, 800, 600);
        let (next, command) = advance(&state, Some(target), &settings(), TICK);
        assert_eq!(command, Some(target));
        assert_eq!(next.last_applied, Some(target));
    }

    #[test]
    fn test_full_smoothing_factor_reaches_target_next_tick() {
        let cfg = SyncSettings {
            enable_smoothing: true,
            smoothing_factor: 1.0,
            ..settings()
        };
        let state = SyncState::new(Some(Rect::new(0, 0, 100, 100)), &cfg);
        let target = Rect::new(537, -211, 640, 480);
        let (_, command) = advance(&state, Some(target), &cfg, TICK);
        assert_eq!(command, Some(target));
    }

    #[test]
    fn test_zero_smoothing_factor_never_moves() {
        let cfg = SyncSettings {
            enable_smoothing: true,
            smoothing_factor: 0.0,
            ..settings()
        };
        let start = Rect::new(0, 0, 100, 100);
        let mut state = SyncState::new(Some(start), &cfg);
        for i in 1..50 {
            let (next, command) = advance(&state, Some(Rect::new(i * 10, i * 7, 300, 200)), &cfg, TICK);
            assert_eq!(command, None);
            state = next;
        }
        assert_eq!(state.last_applied, Some(start));
    }

    #[test]
    fn test_half_smoothing_converges() {
        let cfg = SyncSettings {
            enable_smoothing: true,
            smoothing_factor: 0.5,
            ..settings()
        };
        let target = Rect::new(100, 0, 100, 100);
        let mut state = SyncState::new(Some(Rect::new(0, 0, 100, 100)), &cfg);

        let (next, command) = advance(&state, Some(target), &cfg, TICK);
        assert_eq!(command, Some(Rect::new(50, 0, 100, 100)));
        state = next;

        for _ in 0..20 {
            state = advance(&state, Some(target), &cfg, TICK).0;
        }
        let settled = state.last_applied.unwrap();
        assert!(settled.max_component_delta(&target) <= sync::MOVE_THRESHOLD_PX);
    }

    #[test]
    fn test_low_smoothing_factor_moves_gradually() {
        let cfg = SyncSettings {
            enable_smoothing: true,
            smoothing_factor: 0.01,
            ..settings()
        };
        let target = Rect::new(100, 0, 100, 100);
        let mut state = SyncState::new(Some(Rect::new(0, 0, 100, 100)), &cfg);

        let (next, command) = advance(&state, Some(target), &cfg, TICK);
        assert_eq!(command, Some(Rect::new(2, 0, 100, 100)));
        state = next;

        let mut previous_x = 2;
        let mut ticks = 1;
        while state.last_applied != Some(target) && ticks < 200 {
            let (next, command) = advance(&state, Some(target), &cfg, TICK);
            if let Some(rect) = command {
                assert!(rect.x > previous_x && rect.x <= target.x);
                assert!(rect.x - previous_x <= 2);
                previous_x = rect.x;
            }
            state = next;
            ticks += 1;
        }
        assert_eq!(state.last_applied, Some(target));
        assert_eq!(ticks, 50);
    }

    #[test]
    fn test_extreme_targets_do_not_overflow() {
        let cfg = SyncSettings {
            enable_smoothing: true,
            smoothing_factor: 0.5,
            enable_prediction: true,
            ..settings()
        };
        let mut state = SyncState::new(Some(Rect::new(i32::MIN, i32::MIN, 100, 100)), &cfg);
        for target in [
            Rect::new(i32::MAX, i32::MAX, 100, 100),
            Rect::new(i32::MIN, i32::MIN, 100, 100),
            Rect::new(i32::MAX, i32::MIN, i32::MAX, 1),
        ] {
            let (next, command) = advance(&state, Some(target), &cfg, TICK);
            assert!(command.is_some());
            state = next;
        }
    }

    #[test]
    fn test_one_pixel_jitter_is_ignored() {
        let applied = Rect::new(10, 10, 200, 200);
        let state = SyncState::new(Some(applied), &settings());

        let (_, command) = advance(&state, Some(Rect::new(11, 9, 201, 200)), &settings(), TICK);
        assert_eq!(command, None);

        let (_, command) = advance(&state, Some(Rect::new(12, 10, 200, 200)), &settings(), TICK);
        assert_eq!(command, Some(Rect::new(12, 10, 200, 200)));
    }

    #[test]
    fn test_prediction_extrapolates_linear_motion() {
        let cfg = SyncSettings {
            enable_prediction: true,
            ..settings()
        };
        let mut state = SyncState::new(None, &cfg);
        let mut last = None;
        for x in [0, 10, 20] {
            let (next, command) = advance(&state, Some(Rect::new(x, 0, 100, 100)), &cfg, TICK);
            state = next;
            last = command;
        }
        // Two deltas of +10 observed: one tick ahead of x=20
        assert_eq!(last, Some(Rect::new(30, 0, 100, 100)));

        // Motion stops: prediction settles back onto the target
        state = advance(&state, Some(Rect::new(20, 0, 100, 100)), &cfg, TICK).0;
        let (_, command) = advance(&state, Some(Rect::new(20, 0, 100, 100)), &cfg, TICK);
        assert_eq!(command, Some(Rect::new(20, 0, 100, 100)));
    }

    #[test]
    fn test_adaptive_rate_rises_and_decays() {
        let cfg = settings();
        let mut state = SyncState::new(None, &cfg);
        assert_eq!(state.target_fps, 10.0);

        state = advance(&state, Some(Rect::new(0, 0, 10, 10)), &cfg, TICK).0;
        state = advance(&state, Some(Rect::new(50, 0, 10, 10)), &cfg, TICK).0;
        assert_eq!(state.target_fps, 60.0);

        for _ in 0..100 {
            state = advance(&state, Some(Rect::new(50, 0, 10, 10)), &cfg, Duration::from_millis(100)).0;
        }
        assert!(state.target_fps < 10.1);
        assert!(state.target_fps >= 10.0);
    }

    #[test]
    fn test_settings_validation() {
        assert!(settings().validate().is_ok());
        let bad = SyncSettingsPatch {
            smoothing_factor: Some(1.5),
            ..Default::default()
        };
        assert!(settings().patched(&bad).is_err());
        let bad = SyncSettingsPatch {
            min_fps: Some(30),
            max_fps: Some(20),
            ..Default::default()
        };
        assert!(settings().patched(&bad).is_err());
        let nan = SyncSettingsPatch {
            smoothing_factor: Some(f64::NAN),
            ..Default::default()
        };
        assert!(settings().patched(&nan).is_err());
    }

    fn engine_with(backend: Arc<FakeBackend>, cfg: SyncSettings) -> (PositionSyncEngine, Arc<Mutex<CoordinateSystem>>) {
        let coords = Arc::new(Mutex::new(CoordinateSystem::new()));
        (PositionSyncEngine::new(backend, coords.clone(), cfg), coords)
    }

    fn fast() -> SyncSettings {
        SyncSettings {
            min_fps: 200,
            max_fps: 500,
            max_consecutive_failures: 3,
            ..SyncSettings::default()
        }
    }

    #[test]
    fn test_engine_follows_target_and_stops_cleanly() {
        let backend = Arc::new(FakeBackend::new());
        let (mut engine, coords) = engine_with(backend.clone(), fast());
        {
            let mut c = coords.lock().unwrap();
            c.update_window_position(100, 50);
            c.update_container_bounds(Rect::new(10, 20, 400, 300)).unwrap();
        }

        engine.start(WindowHandle(1), None, Box::new(|_| {})).unwrap();
        assert!(wait_until(Duration::from_secs(2), || {
            backend.last_move() == Some(Rect::new(110, 70, 400, 300))
        }));

        coords.lock().unwrap().update_window_position(300, 50);
        assert!(wait_until(Duration::from_secs(2), || {
            backend.last_move() == Some(Rect::new(310, 70, 400, 300))
        }));
        assert_eq!(engine.last_geometry(), Some(Rect::new(310, 70, 400, 300)));

        engine.stop();
        assert!(!engine.is_running());
        let moves = backend.moves().len();
        coords.lock().unwrap().update_window_position(900, 900);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(backend.moves().len(), moves);
        assert!(engine.get_metrics().tick_count > 0);
    }

    #[test]
    fn test_engine_picks_up_runtime_settings() {
        let backend = Arc::new(FakeBackend::new());
        let (mut engine, coords) = engine_with(backend.clone(), fast());
        {
            let mut c = coords.lock().unwrap();
            c.update_window_position(0, 0);
            c.update_container_bounds(Rect::new(0, 0, 100, 100)).unwrap();
        }
        engine
            .start(WindowHandle(1), Some(Rect::new(0, 0, 100, 100)), Box::new(|_| {}))
            .unwrap();

        engine.set_smoothing(true, 0.0).unwrap();
        engine.set_prediction(true);
        assert!(engine.settings().enable_prediction);
        thread::sleep(Duration::from_millis(30));
        coords.lock().unwrap().update_window_position(500, 500);
        thread::sleep(Duration::from_millis(100));
        assert!(backend.moves().is_empty());

        engine.set_smoothing(false, 0.0).unwrap();
        engine.set_prediction(false);
        assert!(wait_until(Duration::from_secs(2), || {
            backend.last_move() == Some(Rect::new(500, 500, 100, 100))
        }));
        engine.stop();
    }

    #[test]
    fn test_engine_gives_up_after_consecutive_failures() {
        let backend = Arc::new(FakeBackend::new());
        backend.set_fail_moves(true);
        let (mut engine, coords) = engine_with(backend.clone(), fast());
        {
            let mut c = coords.lock().unwrap();
            c.update_window_position(0, 0);
            c.update_container_bounds(Rect::new(0, 0, 100, 100)).unwrap();
        }

        let faults = Arc::new(Mutex::new(Vec::new()));
        let seen = faults.clone();
        engine
            .start(WindowHandle(1), None, Box::new(move |e| seen.lock().unwrap().push(e)))
            .unwrap();

        assert!(wait_until(Duration::from_secs(2), || !engine.is_running()));
        let faults = faults.lock().unwrap();
        assert_eq!(faults.len(), 1);
        assert!(matches!(faults[0], OverlayError::Positioning(_)));
        assert_eq!(engine.get_metrics().consecutive_failures, 3);
        engine.stop();
    }

    #[test]
    fn test_engine_reports_closed_window() {
        let backend = Arc::new(FakeBackend::new());
        let (mut engine, _coords) = engine_with(backend.clone(), fast());
        let faults = Arc::new(AtomicUsize::new(0));
        let seen = faults.clone();
        engine
            .start(WindowHandle(5), None, Box::new(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        backend.close(WindowHandle(5));
        assert!(wait_until(Duration::from_secs(3), || faults.load(Ordering::SeqCst) == 1));
        assert!(wait_until(Duration::from_secs(1), || !engine.is_running()));
    }

    #[test]
    fn test_reset_metrics_zeroes_snapshot() {
        let backend = Arc::new(FakeBackend::new());
        let (mut engine, _coords) = engine_with(backend, fast());
        engine.start(WindowHandle(1), None, Box::new(|_| {})).unwrap();
        assert!(wait_until(Duration::from_secs(2), || engine.get_metrics().tick_count > 2));
        engine.stop();
        engine.reset_metrics();
        assert_eq!(engine.get_metrics(), SyncMetrics::default());
    }
}
