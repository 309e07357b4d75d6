//! Result and fault types of a script run.
//!
//! This module defines how errors raised inside the evaluator are turned
//! into reportable [`ScriptFault`]s, and how the runner's own control
//! signals (stop, skip) travel through the evaluator without being caught
//! by script-level `try`/`catch`.

use rhai::{Dynamic, EvalAltResult, Map, Position, INT};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_FAULT_ID: AtomicU64 = AtomicU64::new(1);

/// A reported script error.
///
/// The `id` gives the fault an identity: when the same fault is caught
/// again further up the call chain it is recognised and not reported twice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptFault {
    pub id: u64,
    pub message: String,
    pub filename: Option<String>,
    pub line: Option<usize>,
}

impl ScriptFault {
    pub fn new(message: impl Into<String>, filename: Option<&str>, line: Option<usize>) -> Self {
        Self {
            id: NEXT_FAULT_ID.fetch_add(1, Ordering::Relaxed),
            message: message.into(),
            filename: filename.map(str::to_string),
            line,
        }
    }

    /// Build a fault from the value bound by a `catch` clause.
    pub fn from_caught(value: &Dynamic, filename: &str, line: usize) -> Self {
        if let Some(fault) = value.clone().try_cast::<ScriptFault>() {
            return fault;
        }
        if let Some(map) = value.clone().try_cast::<Map>() {
            if let Some(message) = map.get("message") {
                let line = map
                    .get("line")
                    .and_then(|l| l.as_int().ok())
                    .and_then(|l| usize::try_from(l).ok())
                    .unwrap_or(line);
                let source = map
                    .get("source")
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| filename.to_string());
                return Self::new(message.to_string(), Some(&source), Some(line));
            }
        }
        Self::new(value.to_string(), Some(filename), Some(line))
    }

    /// Build a fault from an error that escaped to the top of the run.
    pub fn from_eval_error(err: &EvalAltResult, filename: &str) -> Self {
        match root_cause(err) {
            EvalAltResult::ErrorRuntime(value, pos) => {
                let line = pos.line().unwrap_or(0);
                Self::from_caught(value, filename, line)
            }
            other => {
                let pos = other.position();
                let text = other.to_string();
                let message = match text.strip_suffix(&format!(" ({})", pos)) {
                    Some(message) if !pos.is_none() => message.to_string(),
                    _ => text,
                };
                Self::new(message, Some(filename), pos.line())
            }
        }
    }

    /// Raise this fault into the evaluator, keeping its identity.
    pub fn into_error(self) -> Box<EvalAltResult> {
        EvalAltResult::ErrorRuntime(Dynamic::from(self), Position::NONE).into()
    }

    /// `<file>:<line>: <message>`, or the bare message without a location.
    pub fn location(&self) -> Option<String> {
        match (&self.filename, self.line) {
            (Some(file), Some(line)) => Some(format!("{}:{}", file, line)),
            (Some(file), None) => Some(file.clone()),
            _ => None,
        }
    }

    // ── script getters ───────────────────────────────────────────────────────

    pub(crate) fn get_message(&mut self) -> String {
        self.message.clone()
    }

    pub(crate) fn get_line(&mut self) -> INT {
        self.line.map(|l| l as INT).unwrap_or(0)
    }

    pub(crate) fn get_source(&mut self) -> String {
        self.filename.clone().unwrap_or_default()
    }
}

impl fmt::Display for ScriptFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location() {
            Some(location) => write!(f, "{}: {}", location, self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// The innermost error, looking through function-call and module wrappers.
pub fn root_cause(err: &EvalAltResult) -> &EvalAltResult {
    match err {
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => root_cause(inner),
        EvalAltResult::ErrorInModule(_, inner, _) => root_cause(inner),
        other => other,
    }
}

/// Runner-originated interruptions. Never reported as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Stop,
    Skip,
}

impl ControlSignal {
    fn token(self) -> &'static str {
        match self {
            ControlSignal::Stop => "script-runner:stop",
            ControlSignal::Skip => "script-runner:skip",
        }
    }

    /// Raised as a termination, which script `catch` clauses never see.
    pub fn into_error(self) -> Box<EvalAltResult> {
        EvalAltResult::ErrorTerminated(self.token().into(), Position::NONE).into()
    }

    pub fn from_error(err: &EvalAltResult) -> Option<Self> {
        match root_cause(err) {
            EvalAltResult::ErrorTerminated(token, _) => {
                let token = token.to_string();
                if token == ControlSignal::Skip.token() {
                    Some(ControlSignal::Skip)
                } else {
                    Some(ControlSignal::Stop)
                }
            }
            _ => None,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Stopped,
    Fatal(ScriptFault),
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed)
    }
}
