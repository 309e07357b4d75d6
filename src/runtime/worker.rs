//! Process-shared background workers.
//!
//! One output-flush worker and at most one limits worker serve every run
//! of a runner. They are started by the first run and stopped when the
//! last active run terminates.

use crate::Result;
use anyhow::Context;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Interruptible sleep.
#[derive(Debug, Default)]
pub struct Sleeper {
    cancelled: Mutex<bool>,
    wake: Condvar,
}

impl Sleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `duration`; returns `true` if cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut cancelled = self.cancelled.lock().unwrap_or_else(|p| p.into_inner());
        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            cancelled = match self.wake.wait_timeout(cancelled, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }

    pub fn cancel(&self) {
        *self.cancelled.lock().unwrap_or_else(|p| p.into_inner()) = true;
        self.wake.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// A named background thread with its cancellation handle.
#[derive(Debug)]
pub struct WorkerHandle {
    name: String,
    sleeper: Arc<Sleeper>,
    handle: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn spawn<F>(name: &str, body: F) -> Result<Self>
    where
        F: FnOnce(Arc<Sleeper>) + Send + 'static,
    {
        let sleeper = Arc::new(Sleeper::new());
        let thread_sleeper = Arc::clone(&sleeper);
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(thread_sleeper))
            .with_context(|| format!("Failed to start {} thread", name))?;
        debug!("Started {} worker", name);
        Ok(Self {
            name: name.to_string(),
            sleeper,
            handle,
        })
    }

    /// Cancel and join.
    pub fn stop(self) {
        self.sleeper.cancel();
        if self.handle.thread().id() == std::thread::current().id() {
            return;
        }
        if self.handle.join().is_err() {
            warn!("{} worker panicked", self.name);
        } else {
            debug!("Stopped {} worker", self.name);
        }
    }
}

/// Shared worker slots of a runner.
#[derive(Debug, Default)]
pub struct Workers {
    pub output: Option<WorkerHandle>,
    pub limits: Option<WorkerHandle>,
}

impl Workers {
    /// Take every running worker out of its slot.
    pub fn take_all(&mut self) -> Vec<WorkerHandle> {
        self.output.take().into_iter().chain(self.limits.take()).collect()
    }
}
