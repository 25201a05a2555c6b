use std::{
    fmt,
    sync::atomic::{
        AtomicBool,
        Ordering,
    },
};

use parking_lot::Mutex;

use crate::registry::ActiveGuard;


/// Lifecycle of a watch
///
/// ```text
/// Starting -> Running -> StopRequested -> Stopped
///     |           |                         ^
///     +-----------+-------------------------+
/// ```
///
/// A watch that fails while starting, or fails while running, goes straight
/// to `Stopped`. `Stopped` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// OS resources are being acquired
    Starting,

    /// Waiting for, decoding and delivering changes
    Running,

    /// A stop was requested, but the watch thread has not yet left its loop
    StopRequested,

    /// Resources are released; no more events will be delivered
    Stopped,
}

impl SessionState {
    /// Whether the watch can still deliver events
    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Starting | SessionState::Running)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Starting      => "starting",
            SessionState::Running       => "running",
            SessionState::StopRequested => "stop-requested",
            SessionState::Stopped       => "stopped",
        };
        f.write_str(name)
    }
}


/// State shared between a watch thread and everyone who may stop it
///
/// The stop flag is checked by the backend on every wake-up and before every
/// delivered event. The state only moves forward.
#[derive(Debug)]
pub(crate) struct Control {
    stop: AtomicBool,
    state: Mutex<SessionState>,
    active: Mutex<Option<ActiveGuard>>,
}

impl Control {
    pub(crate) fn new() -> Self {
        Control {
            stop: AtomicBool::new(false),
            state: Mutex::new(SessionState::Starting),
            active: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Count this watch as active until it stops
    pub(crate) fn attach(&self, guard: ActiveGuard) {
        *self.active.lock() = Some(guard);
    }

    /// `Starting -> Running`
    ///
    /// Returns `false` if the watch must not run, because a stop was already
    /// requested or the watch is stopped.
    pub(crate) fn begin(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            SessionState::Starting if !self.stop_requested() => {
                *state = SessionState::Running;
                true
            }
            SessionState::Running => true,
            _ => false,
        }
    }

    /// Set the stop flag and move to `StopRequested`
    ///
    /// Returns `true` for the first request only.
    pub(crate) fn request_stop(&self) -> bool {
        let first = !self.stop.swap(true, Ordering::AcqRel);

        let mut state = self.state.lock();
        if state.is_active() {
            *state = SessionState::StopRequested;
        }

        first
    }

    /// Move to `Stopped` and release the active count
    ///
    /// Returns `true` if this call did the transition. Later calls change
    /// nothing.
    pub(crate) fn finish(&self) -> bool {
        let mut state = self.state.lock();
        if *state == SessionState::Stopped {
            return false;
        }
        *state = SessionState::Stopped;
        drop(state);

        self.active.lock().take();
        true
    }
}
