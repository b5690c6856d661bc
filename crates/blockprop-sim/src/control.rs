//! Run control shared between the engine and whoever drives it.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

/// Observable state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    /// Not draining; waiting for events or a trigger
    Idle,
    /// Draining the event queue, or between steps of a stepped run
    Draining,
    /// Stopped by the pause flag
    Paused,
    /// Reached the logical horizon
    Finished,
    /// Stopped by a fatal error
    Failed,
}

impl RunState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => RunState::Draining,
            2 => RunState::Paused,
            3 => RunState::Finished,
            4 => RunState::Failed,
            _ => RunState::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            RunState::Idle => 0,
            RunState::Draining => 1,
            RunState::Paused => 2,
            RunState::Finished => 3,
            RunState::Failed => 4,
        }
    }
}

/// Why a call to `dequeue` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrainOutcome {
    /// The queue is empty
    Idle,
    /// The pause flag was set
    Paused,
    /// The next event lies past the configured horizon
    Horizon,
    /// The next event lies past the limit given for this drain
    Stepped,
    /// Another drain was already in progress; nothing was done
    AlreadyDraining,
}

#[derive(Debug, Default)]
struct ControlInner {
    paused: AtomicBool,
    state: AtomicU8,
    resumed: Notify,
}

/// Cloneable handle to the pause flag and run state.
///
/// Pausing takes effect once the event being processed completes.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    inner: Arc<ControlInner>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);
        self.inner.resumed.notify_one();
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> RunState {
        RunState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    pub(crate) fn set_state(&self, state: RunState) {
        self.inner.state.store(state.as_u8(), Ordering::SeqCst);
    }

    /// Wait until the pause flag is cleared.
    pub async fn resumed(&self) {
        while self.is_paused() {
            self.inner.resumed.notified().await;
        }
    }
}
