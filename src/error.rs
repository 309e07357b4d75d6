use thiserror::Error;

/// Errors surfaced by the script runner to its host.
///
/// Script-level failures (a statement raising while it runs) are not
/// represented here; they are reported through the run's event stream and
/// carried as [`crate::runtime::ScriptFault`].
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Instrumentation failed at line {line}: {message}")]
    Instrumentation { line: usize, message: String },

    #[error("Script not found: {0}")]
    ScriptNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Script {0} is already running")]
    AlreadyRunning(String),

    #[error("Cannot {0} while the script is running")]
    Busy(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to spawn script process: {0}")]
    Spawn(String),

    #[error("Invalid control request: {0}")]
    Protocol(String),

    #[error("No script is running")]
    NoCurrentRun,

    #[error("No spawned run with id {0}")]
    UnknownRun(u64),

    #[error("Failed to compile {filename}: {message}")]
    Compile { filename: String, message: String },
}

pub type Result<T> = anyhow::Result<T>;
