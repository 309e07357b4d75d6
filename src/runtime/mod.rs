//! Script execution sub-system.
//!
//! Sub-modules:
//! - [`executor`]        — Public façade; the process context shared by runs.
//! - [`script`]          — One run: state machine, waits, error policy.
//! - [`hooks`]           — Per-statement hooks called by instrumented code.
//! - [`engine`]          — Rhai engine setup and script-callable primitives.
//! - [`segmenter`]       — Comment stripping and statement segmentation.
//! - [`instrumentation`] — Source-to-source rewrite around the hooks.
//! - [`cache`]           — Script text and instrumentation caches.
//! - [`output`]          — Output buffering, formatting and the message log.
//! - [`loader`]          — Script storage.
//! - [`limits`]          — Telemetry limits monitoring.
//! - [`worker`]          — Shared background threads.
//! - [`report`]          — Suite run reports.
//! - [`result`]          — Faults, control signals and run outcomes.

pub mod cache;
pub mod engine;
pub mod executor;
pub mod hooks;
pub mod instrumentation;
pub mod limits;
pub mod loader;
pub mod output;
pub mod report;
pub mod result;
pub mod script;
pub mod segmenter;
pub mod worker;

pub use cache::{FileCache, TopLevelEntry};
pub use engine::ScriptApi;
pub use executor::{Dispatch, RunSpec, RunnerSettings, ScriptRunner, ScriptRunnerBuilder};
pub use instrumentation::{instrument_script, Instrumenter};
pub use limits::{ChannelLimitsSource, LimitsEvent, LimitsSource, LimitsState};
pub use loader::{DirectoryStore, MemoryStore, ScriptStore};
pub use output::{format_output, OutputBuffer, OutputLine};
pub use report::RunReport;
pub use result::{ControlSignal, RunOutcome, ScriptFault};
pub use script::RunningScript;
pub use segmenter::{segments, strip_comments, Segment, SegmentKind};

use std::sync::{Mutex, MutexGuard};

/// Lock a mutex, recovering the data of a poisoned lock.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
