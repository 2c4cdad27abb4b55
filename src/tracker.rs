//! Discovery of the editor's top-level window

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::constants::discovery;
use crate::error::{OverlayError, OverlayResult};
use crate::platform::{WindowBackend, WindowHandle, WindowInfo};
use crate::process;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryStrategy {
    /// Window owned by the spawned pid itself
    ProcessId,
    /// Window owned by a child of the spawned pid (launcher wrappers)
    ProcessTree,
    /// Window that appeared after launch and names the document
    /// (single-instance editors hand the file to an older process)
    NewWindow,
}

impl DiscoveryStrategy {
    /// Strategies that make sense on the current platform, in order
    pub fn platform_defaults() -> Vec<DiscoveryStrategy> {
        if cfg!(target_os = "linux") {
            vec![Self::ProcessId, Self::ProcessTree, Self::NewWindow]
        } else {
            vec![Self::ProcessId, Self::NewWindow]
        }
    }
}

/// Start screens and splash windows come and go before the document window
pub fn is_transient_title(title: &str) -> bool {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return true;
    }
    let lower = trimmed.to_lowercase();
    discovery::SPLASH_TITLE_MARKERS
        .iter()
        .any(|marker| lower.contains(marker))
        || discovery::START_SCREEN_TITLES
            .iter()
            .any(|screen| trimmed.eq_ignore_ascii_case(screen))
}

fn matches_hint(title: &str, hint: Option<&str>) -> bool {
    hint.is_some_and(|hint| title.to_lowercase().contains(&hint.to_lowercase()))
}

/// Pick the best window for one strategy: qualifying windows only, document
/// title matches first, most recent last-wins
pub fn select_candidate(
    windows: &[WindowInfo],
    strategy: DiscoveryStrategy,
    pid: u32,
    family: &[u32],
    baseline: &HashSet<WindowHandle>,
    title_hint: Option<&str>,
) -> Option<WindowHandle> {
    let qualifying: Vec<&WindowInfo> = windows
        .iter()
        .filter(|w| !is_transient_title(&w.title))
        .filter(|w| match strategy {
            DiscoveryStrategy::ProcessId => w.pid == Some(pid),
            DiscoveryStrategy::ProcessTree => w.pid.is_some_and(|p| family.contains(&p)),
            DiscoveryStrategy::NewWindow => {
                !baseline.contains(&w.handle) && matches_hint(&w.title, title_hint)
            }
        })
        .collect();

    qualifying
        .iter()
        .rev()
        .find(|w| matches_hint(&w.title, title_hint))
        .or_else(|| qualifying.last())
        .map(|w| w.handle)
}

pub struct WindowTracker {
    backend: Arc<dyn WindowBackend>,
    strategies: Vec<DiscoveryStrategy>,
    baseline: HashSet<WindowHandle>,
    title_hint: Option<String>,
    tracked: Option<WindowHandle>,
}

impl WindowTracker {
    pub fn new(backend: Arc<dyn WindowBackend>) -> Self {
        Self::with_strategies(backend, DiscoveryStrategy::platform_defaults())
    }

    pub fn with_strategies(backend: Arc<dyn WindowBackend>, strategies: Vec<DiscoveryStrategy>) -> Self {
        Self {
            backend,
            strategies,
            baseline: HashSet::new(),
            title_hint: None,
            tracked: None,
        }
    }

    /// Prefer windows whose title contains `hint` (usually the document name)
    pub fn set_title_hint(&mut self, hint: Option<String>) {
        self.title_hint = hint;
    }

    /// Remember every window that exists before the editor is launched
    pub fn snapshot_baseline(&mut self) {
        self.baseline = match self.backend.list_windows() {
            Ok(windows) => windows.into_iter().map(|w| w.handle).collect(),
            Err(e) => {
                warn!(error = %e, "Failed to snapshot existing windows");
                HashSet::new()
            }
        };
        debug!(count = self.baseline.len(), "Captured window baseline");
    }

    pub fn tracked(&self) -> Option<WindowHandle> {
        self.tracked
    }

    /// Forget the tracked window; callers stop the sync loop first
    pub fn clear(&mut self) -> Option<WindowHandle> {
        self.tracked.take()
    }

    pub fn is_alive(&self, handle: WindowHandle) -> bool {
        self.backend.is_alive(handle)
    }

    /// Poll until a qualifying window for `pid` shows up. Fails no earlier
    /// than `timeout` and no later than one `poll_interval` after it.
    pub fn find_window(
        &mut self,
        pid: u32,
        timeout: Duration,
        poll_interval: Duration,
    ) -> OverlayResult<WindowHandle> {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut scans = 0u32;

        loop {
            scans += 1;
            if let Some((handle, strategy)) = self.scan(pid) {
                info!(
                    pid = pid,
                    window = %handle,
                    strategy = ?strategy,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Found editor window"
                );
                self.tracked = Some(handle);
                return Ok(handle);
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(pid = pid, scans = scans, "No editor window appeared before timeout");
                return Err(OverlayError::WindowNotFound { pid, timeout });
            }
            std::thread::sleep(poll_interval.min(deadline - now));
        }
    }

    fn scan(&self, pid: u32) -> Option<(WindowHandle, DiscoveryStrategy)> {
        let windows = match self.backend.list_windows() {
            Ok(windows) => windows,
            Err(e) => {
                debug!(error = %e, "Window scan failed, retrying next poll");
                return None;
            }
        };

        let mut family: Option<Vec<u32>> = None;
        for &strategy in &self.strategies {
            let family = match strategy {
                DiscoveryStrategy::ProcessTree => {
                    family.get_or_insert_with(|| process::descendants(pid)).as_slice()
                }
                _ => &[][..],
            };
            if let Some(handle) = select_candidate(
                &windows,
                strategy,
                pid,
                family,
                &self.baseline,
                self.title_hint.as_deref(),
            ) {
                return Some((handle, strategy));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fake::FakeBackend;

    fn w(handle: u64, pid: Option<u32>, title: &str) -> WindowInfo {
        FakeBackend::window(handle, pid, title)
    }

    #[test]
    fn test_transient_titles() {
        assert!(is_transient_title(""));
        assert!(is_transient_title("   "));
        assert!(is_transient_title("LibreOffice"));
        assert!(is_transient_title("Start Center"));
        assert!(is_transient_title("soffice splash"));
        assert!(!is_transient_title("a.odt - LibreOffice Writer"));
    }

    #[test]
    fn test_process_id_prefers_most_recent() {
        let windows = [
            w(1, Some(10), "old.odt - Writer"),
            w(2, Some(10), "LibreOffice"),
            w(3, Some(10), "new.odt - Writer"),
            w(4, Some(11), "other.odt - Writer"),
        ];
        let pick = select_candidate(&windows, DiscoveryStrategy::ProcessId, 10, &[], &HashSet::new(), None);
        assert_eq!(pick, Some(WindowHandle(3)));
    }

    #[test]
    fn test_title_hint_beats_recency() {
        let windows = [
            w(1, Some(10), "report.odt - Writer"),
            w(2, Some(10), "Untitled 1 - Writer"),
        ];
        let pick = select_candidate(
            &windows,
            DiscoveryStrategy::ProcessId,
            10,
            &[],
            &HashSet::new(),
            Some("report.odt"),
        );
        assert_eq!(pick, Some(WindowHandle(1)));
    }

    #[test]
    fn test_process_tree_uses_family() {
        let windows = [w(5, Some(21), "a.odt - Writer")];
        assert_eq!(
            select_candidate(&windows, DiscoveryStrategy::ProcessId, 20, &[], &HashSet::new(), None),
            None
        );
        assert_eq!(
            select_candidate(&windows, DiscoveryStrategy::ProcessTree, 20, &[21], &HashSet::new(), None),
            Some(WindowHandle(5))
        );
    }

    #[test]
    fn test_new_window_requires_hint_and_ignores_baseline() {
        let windows = [w(7, Some(99), "a.odt - Writer"), w(8, None, "a.odt - Writer")];
        let baseline = HashSet::from([WindowHandle(8)]);
        assert_eq!(
            select_candidate(&windows, DiscoveryStrategy::NewWindow, 1, &[], &baseline, None),
            None
        );
        assert_eq!(
            select_candidate(&windows, DiscoveryStrategy::NewWindow, 1, &[], &baseline, Some("a.odt")),
            Some(WindowHandle(7))
        );
    }

    #[test]
    fn test_find_window_waits_for_late_window() {
        let backend = Arc::new(FakeBackend::new());
        backend.add_window_after(3, w(42, Some(500), "a.odt - Writer"));
        let mut tracker = WindowTracker::new(backend);

        let handle = tracker
            .find_window(500, Duration::from_secs(2), Duration::from_millis(10))
            .unwrap();
        assert_eq!(handle, WindowHandle(42));
        assert_eq!(tracker.tracked(), Some(WindowHandle(42)));
        assert_eq!(tracker.clear(), Some(WindowHandle(42)));
        assert_eq!(tracker.tracked(), None);
    }

    #[test]
    fn test_find_window_skips_splash_until_document_window() {
        let backend = Arc::new(FakeBackend::new());
        backend.add_window(w(1, Some(500), "LibreOffice"));
        backend.add_window_after(2, w(2, Some(500), "a.odt - LibreOffice Writer"));
        let mut tracker = WindowTracker::new(backend);

        let handle = tracker
            .find_window(500, Duration::from_secs(2), Duration::from_millis(10))
            .unwrap();
        assert_eq!(handle, WindowHandle(2));
    }

    #[test]
    fn test_find_window_falls_back_to_new_window() {
        let backend = Arc::new(FakeBackend::new());
        backend.add_window(w(1, Some(7), "notes.odt - Writer"));
        backend.add_window_after(1, w(2, Some(7), "a.odt - Writer"));
        let mut tracker = WindowTracker::new(backend);
        tracker.set_title_hint(Some("a.odt".to_string()));
        tracker.snapshot_baseline();

        // Spawned pid 500 exited after handing the document to pid 7
        let handle = tracker
            .find_window(500, Duration::from_secs(2), Duration::from_millis(10))
            .unwrap();
        assert_eq!(handle, WindowHandle(2));
    }

    #[test]
    fn test_find_window_timeout_bounds() {
        let backend = Arc::new(FakeBackend::new());
        backend.add_window(w(1, Some(1), "unrelated - Editor"));
        let mut tracker = WindowTracker::new(backend);

        let timeout = Duration::from_millis(250);
        let poll = Duration::from_millis(100);
        let started = Instant::now();
        let err = tracker.find_window(4_000_000, timeout, poll).unwrap_err();
        let elapsed = started.elapsed();

        assert_eq!(err, OverlayError::WindowNotFound { pid: 4_000_000, timeout });
        assert!(elapsed >= timeout, "failed early after {elapsed:?}");
        // One poll interval of slack plus scheduling noise
        assert!(elapsed < timeout + poll + Duration::from_millis(200), "took {elapsed:?}");
        assert_eq!(tracker.tracked(), None);
    }
}
