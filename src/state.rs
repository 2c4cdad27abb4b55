//! Overlay lifecycle state machine and callback dispatch

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::lock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayState {
    Idle,
    Launching,
    SearchingWindow,
    Positioning,
    Embedded,
    Stopping,
    Error(String),
}

impl OverlayState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverlayState::Idle => "idle",
            OverlayState::Launching => "launching",
            OverlayState::SearchingWindow => "searching_window",
            OverlayState::Positioning => "positioning",
            OverlayState::Embedded => "embedded",
            OverlayState::Stopping => "stopping",
            OverlayState::Error(_) => "error",
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            OverlayState::Error(message) => Some(message),
            _ => None,
        }
    }

    /// Allowed edges: the happy path `Idle -> ... -> Embedded -> Stopping ->
    /// Idle`, any state into `Error`, and any busy state into `Stopping`
    pub fn can_transition_to(&self, next: &OverlayState) -> bool {
        use OverlayState::*;
        match (self, next) {
            (_, Error(_)) => true,
            (Idle, Launching)
            | (Launching, SearchingWindow)
            | (SearchingWindow, Positioning)
            | (Positioning, Embedded)
            | (Stopping, Idle) => true,
            (Idle | Stopping, Stopping) => false,
            (_, Stopping) => true,
            _ => false,
        }
    }
}

impl fmt::Display for OverlayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverlayState::Error(message) => write!(f, "error: {message}"),
            other => f.write_str(other.as_str()),
        }
    }
}

pub type StateCallback = Arc<dyn Fn(&OverlayState) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;

struct Inner {
    state: Mutex<OverlayState>,
    on_state: Mutex<Option<StateCallback>>,
    on_error: Mutex<Option<ErrorCallback>>,
}

/// Shared handle to the overlay state; cloned into the sync thread so a
/// steady-state failure can move the machine into `Error`
#[derive(Clone)]
pub struct StateMachine {
    inner: Arc<Inner>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(OverlayState::Idle),
                on_state: Mutex::new(None),
                on_error: Mutex::new(None),
            }),
        }
    }

    pub fn current(&self) -> OverlayState {
        lock(&self.inner.state).clone()
    }

    pub fn set_state_callback(&self, callback: StateCallback) {
        *lock(&self.inner.on_state) = Some(callback);
    }

    pub fn set_error_callback(&self, callback: ErrorCallback) {
        *lock(&self.inner.on_error) = Some(callback);
    }

    /// Move to `next` if the edge exists. Callbacks run after the lock is
    /// released. Returns whether the transition happened.
    pub fn transition(&self, next: OverlayState) -> bool {
        {
            let mut state = lock(&self.inner.state);
            if !state.can_transition_to(&next) {
                warn!(from = %*state, to = %next, "Refusing invalid state transition");
                return false;
            }
            debug!(from = %*state, to = %next, "State transition");
            *state = next.clone();
        }

        match &next {
            OverlayState::Error(message) => error!(error = %message, "Overlay entered error state"),
            other => info!(state = other.as_str(), "Overlay state changed"),
        }

        self.notify_state(&next);
        if let OverlayState::Error(message) = &next {
            self.notify_error(message);
        }
        true
    }

    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.transition(OverlayState::Error(message.into()))
    }

    fn notify_state(&self, state: &OverlayState) {
        let callback = lock(&self.inner.on_state).clone();
        if let Some(callback) = callback {
            if catch_unwind(AssertUnwindSafe(|| callback(state))).is_err() {
                error!(state = state.as_str(), "State callback panicked");
            }
        }
    }

    fn notify_error(&self, message: &str) {
        let callback = lock(&self.inner.on_error).clone();
        if let Some(callback) = callback {
            if catch_unwind(AssertUnwindSafe(|| callback(message))).is_err() {
                error!(error = %message, "Error callback panicked");
            }
        }
    }
}
