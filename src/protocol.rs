use crate::debugger::state::ScriptState;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Colour hint attached to every published output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutputColor {
    Black,
    Blue,
    Red,
    Yellow,
    Green,
}

impl fmt::Display for OutputColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutputColor::Black => "BLACK",
            OutputColor::Blue => "BLUE",
            OutputColor::Red => "RED",
            OutputColor::Yellow => "YELLOW",
            OutputColor::Green => "GREEN",
        };
        f.write_str(s)
    }
}

/// Events published to the observer of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// A file became the active file; `breakpoints` are 0-based rows.
    File {
        filename: String,
        text: String,
        breakpoints: Vec<usize>,
    },
    Line {
        filename: String,
        line_no: usize,
        state: ScriptState,
    },
    Output {
        line: String,
        color: OutputColor,
    },
    /// The script is waiting on an operator prompt.
    Script {
        method: String,
        prompt_id: String,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    },
    PromptComplete {
        prompt_id: String,
    },
    Backtrace {
        frames: Vec<String>,
    },
    Report {
        report: Value,
    },
    Complete,
}

impl RunEvent {
    pub fn line(filename: &str, line_no: usize, state: ScriptState) -> Self {
        RunEvent::Line {
            filename: filename.to_string(),
            line_no,
            state,
        }
    }

    pub fn output(line: impl Into<String>, color: OutputColor) -> Self {
        RunEvent::Output {
            line: line.into(),
            color,
        }
    }

    /// The `state` of a line event.
    pub fn state(&self) -> Option<ScriptState> {
        match self {
            RunEvent::Line { state, .. } => Some(*state),
            _ => None,
        }
    }
}

/// Requests accepted from the control surface of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlRequest {
    Go,
    Step,
    Pause,
    Stop,
    Retry,
    Shutdown,
    SetBreakpoint {
        filename: String,
        line: usize,
    },
    ClearBreakpoint {
        filename: String,
        line: usize,
    },
    ClearBreakpoints {
        #[serde(default)]
        filename: Option<String>,
    },
    SetText {
        text: String,
        filename: String,
    },
    Answer {
        prompt_id: String,
        answer: Value,
    },
    Backtrace,
}

impl ControlRequest {
    /// Parse one JSON control line.
    pub fn parse(line: &str) -> crate::Result<Self> {
        serde_json::from_str(line.trim())
            .map_err(|e| crate::RunnerError::Protocol(format!("{}: {}", e, line.trim())).into())
    }

    /// Answers are matched against a prompt; everything else is a command.
    pub fn is_command(&self) -> bool {
        !matches!(self, ControlRequest::Answer { .. })
    }
}
