//! Instrumented, cooperatively controlled execution of procedure scripts.
//!
//! A script is rewritten so that every statement calls back into the
//! runner, which is how pausing, stepping, breakpoints, retry after an
//! error and output capture work without any support from the evaluator.

pub mod cli;
pub mod config;
pub mod debugger;
pub mod error;
pub mod events;
pub mod protocol;
pub mod runtime;
pub mod spawn;

pub use config::{RunSettings, RunnerConfig};
pub use debugger::ScriptState;
pub use error::{Result, RunnerError};
pub use events::{ConsoleSink, EventSink, JsonLinesSink, MemorySink};
pub use protocol::{ControlRequest, OutputColor, RunEvent};
pub use runtime::{
    Dispatch, DirectoryStore, MemoryStore, RunOutcome, RunSpec, RunningScript, ScriptFault,
    ScriptRunner, ScriptStore,
};
pub use spawn::{RunRequest, RunSpawner};
