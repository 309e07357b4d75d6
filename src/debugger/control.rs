//! Single-slot control latches shared between the control surface and a
//! running script's worker thread.
//!
//! A latch is a boolean that one thread sets and another observes. Requests
//! are never queued: setting an already-set latch is a no-op and the last
//! write wins.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Fixed polling interval of every cooperative wait loop.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Number of polls between re-publications of the paused line state.
pub const REPUBLISH_POLLS: u32 = 100;

#[derive(Debug, Default)]
pub struct Latch(AtomicBool);

impl Latch {
    pub fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Atomically read and clear the latch.
    pub fn test_and_clear(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }

    pub fn assign(&self, value: bool) {
        self.0.store(value, Ordering::SeqCst);
    }
}

/// The five control latches of a run.
#[derive(Debug, Default)]
pub struct ControlFlags {
    pub go: Latch,
    pub pause: Latch,
    pub step: Latch,
    pub stop: Latch,
    pub retry_needed: Latch,
}

impl ControlFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume continuous execution.
    pub fn go(&self) {
        self.step.clear();
        self.go.set();
        self.pause.clear();
    }

    /// Run exactly one statement, then pause again.
    pub fn step(&self) {
        self.step.set();
        self.go.set();
        self.pause.set();
    }

    /// Resume after a prompt was answered, staying in step mode if active.
    pub fn continue_(&self) {
        self.go.set();
        if self.step.is_set() {
            self.pause.set();
        }
    }

    pub fn pause(&self) {
        self.pause.set();
        self.go.clear();
    }

    pub fn retry(&self) {
        self.retry_needed.set();
    }

    /// Reset before a new run. A pending pause survives so a run can be
    /// started already paused at its first statement.
    pub fn reset_for_run(&self) {
        self.go.clear();
        self.step.clear();
        self.stop.clear();
        self.retry_needed.clear();
    }
}
