use serde::{Deserialize, Serialize};
use std::fmt;

/// Externally visible state of a run, published with every `line` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptState {
    Init,
    Running,
    Paused,
    Waiting,
    Breakpoint,
    Error,
    Fatal,
    Stopped,
}

impl ScriptState {
    /// `stopped` and `fatal` end a run.
    pub fn is_terminal(self) -> bool {
        matches!(self, ScriptState::Stopped | ScriptState::Fatal)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScriptState::Init => "init",
            ScriptState::Running => "running",
            ScriptState::Paused => "paused",
            ScriptState::Waiting => "waiting",
            ScriptState::Breakpoint => "breakpoint",
            ScriptState::Error => "error",
            ScriptState::Fatal => "fatal",
            ScriptState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ScriptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
