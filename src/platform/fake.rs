//! In-memory backend for tests: scripted window lists, recorded geometry

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Result};

use super::{Capabilities, WindowBackend, WindowHandle, WindowInfo};
use crate::geometry::Rect;
use crate::lock;

#[derive(Default)]
pub struct FakeBackend {
    windows: Mutex<Vec<WindowInfo>>,
    /// Windows that show up once `list_windows` has been called N times
    scheduled: Mutex<Vec<(usize, WindowInfo)>>,
    list_calls: AtomicUsize,
    closed: Mutex<HashSet<WindowHandle>>,
    moves: Mutex<Vec<(WindowHandle, Rect)>>,
    stripped: Mutex<Vec<WindowHandle>>,
    restored: Mutex<Vec<WindowHandle>>,
    above: Mutex<Vec<(WindowHandle, bool)>>,
    fail_moves: AtomicBool,
    fail_decorations: AtomicBool,
    /// Delay of liveness checks made from the sync thread
    liveness_delay: Mutex<Option<Duration>>,
    liveness_checks_started: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn window(handle: u64, pid: Option<u32>, title: &str) -> WindowInfo {
        WindowInfo {
            handle: WindowHandle(handle),
            pid,
            title: title.to_string(),
        }
    }

    pub fn add_window(&self, info: WindowInfo) {
        lock(&self.windows).push(info);
    }

    /// Make `info` appear from the `after`-th listing on (0-based call count)
    pub fn add_window_after(&self, after: usize, info: WindowInfo) {
        lock(&self.scheduled).push((after, info));
    }

    pub fn close(&self, handle: WindowHandle) {
        lock(&self.closed).insert(handle);
    }

    pub fn set_fail_moves(&self, fail: bool) {
        self.fail_moves.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_decorations(&self, fail: bool) {
        self.fail_decorations.store(fail, Ordering::SeqCst);
    }

    /// Slow down liveness checks issued by the sync thread
    pub fn set_liveness_delay(&self, delay: Duration) {
        *lock(&self.liveness_delay) = Some(delay);
    }

    pub fn liveness_checks_started(&self) -> usize {
        self.liveness_checks_started.load(Ordering::SeqCst)
    }

    pub fn moves(&self) -> Vec<(WindowHandle, Rect)> {
        lock(&self.moves).clone()
    }

    pub fn last_move(&self) -> Option<Rect> {
        lock(&self.moves).last().map(|(_, rect)| *rect)
    }

    pub fn stripped(&self) -> Vec<WindowHandle> {
        lock(&self.stripped).clone()
    }

    pub fn restored(&self) -> Vec<WindowHandle> {
        lock(&self.restored).clone()
    }

    pub fn above(&self) -> Vec<(WindowHandle, bool)> {
        lock(&self.above).clone()
    }
}

impl WindowBackend for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            position_sync: true,
            decoration_removal: true,
            always_on_top: true,
            taskbar_hiding: false,
        }
    }

    fn list_windows(&self) -> Result<Vec<WindowInfo>> {
        let call = self.list_calls.fetch_add(1, Ordering::SeqCst);
        let mut windows = lock(&self.windows);
        lock(&self.scheduled).retain(|(after, info)| {
            if call >= *after {
                windows.push(info.clone());
                false
            } else {
                true
            }
        });
        let closed = lock(&self.closed);
        Ok(windows
            .iter()
            .filter(|w| !closed.contains(&w.handle))
            .cloned()
            .collect())
    }

    fn is_alive(&self, handle: WindowHandle) -> bool {
        if std::thread::current().name() == Some("overlay-sync") {
            self.liveness_checks_started.fetch_add(1, Ordering::SeqCst);
            let delay = *lock(&self.liveness_delay);
            if let Some(delay) = delay {
                std::thread::sleep(delay);
            }
        }
        !lock(&self.closed).contains(&handle)
    }

    fn move_resize(&self, handle: WindowHandle, rect: Rect) -> Result<()> {
        if self.fail_moves.load(Ordering::SeqCst) {
            bail!("BadWindow for {handle}");
        }
        lock(&self.moves).push((handle, rect));
        Ok(())
    }

    fn strip_decorations(&self, handle: WindowHandle) -> Result<()> {
        if self.fail_decorations.load(Ordering::SeqCst) {
            bail!("window manager ignored hints for {handle}");
        }
        lock(&self.stripped).push(handle);
        Ok(())
    }

    fn restore_decorations(&self, handle: WindowHandle) -> Result<()> {
        if self.fail_decorations.load(Ordering::SeqCst) {
            bail!("window manager ignored hints for {handle}");
        }
        lock(&self.restored).push(handle);
        Ok(())
    }

    fn set_keep_above(&self, handle: WindowHandle, above: bool) -> Result<()> {
        lock(&self.above).push((handle, above));
        Ok(())
    }
}
