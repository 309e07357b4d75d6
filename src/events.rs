//! Event sinks: where a run's [`RunEvent`]s go.

use crate::debugger::state::ScriptState;
use crate::protocol::{OutputColor, RunEvent};
use colored::Colorize;
use std::io::Write;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;

/// Transport for run events.
pub trait EventSink: Send + Sync {
    fn publish(&self, run_id: u64, event: &RunEvent);
}

/// Writes one JSON object per line.
pub struct JsonLinesSink<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

impl JsonLinesSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> EventSink for JsonLinesSink<W> {
    fn publish(&self, _run_id: u64, event: &RunEvent) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to serialize event: {}", e);
                return;
            }
        };
        let mut out = self.out.lock().unwrap_or_else(|p| p.into_inner());
        if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
            warn!("Failed to write event: {}", e);
        }
    }
}

/// Human-readable terminal rendering of the event stream.
pub struct ConsoleSink {
    out: Mutex<std::io::Stdout>,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self {
            out: Mutex::new(std::io::stdout()),
        }
    }

    fn render(event: &RunEvent) -> Option<String> {
        match event {
            RunEvent::Output { line, color } => Some(match color {
                OutputColor::Red => line.red().to_string(),
                OutputColor::Yellow => line.yellow().to_string(),
                OutputColor::Blue => line.blue().to_string(),
                OutputColor::Green => line.green().to_string(),
                OutputColor::Black => line.clone(),
            }),
            RunEvent::Line {
                filename,
                line_no,
                state,
            } => match state {
                ScriptState::Running => None,
                ScriptState::Error | ScriptState::Fatal => {
                    Some(format!("[{}] {}:{}", state, filename, line_no).red().to_string())
                }
                _ => Some(format!("[{}] {}:{}", state, filename, line_no).dimmed().to_string()),
            },
            RunEvent::Script {
                method,
                prompt_id,
                args,
                ..
            } => Some(
                format!("PROMPT {} ({}): {:?}", method, prompt_id, args)
                    .cyan()
                    .bold()
                    .to_string(),
            ),
            RunEvent::Backtrace { frames } => Some(frames.join("\n")),
            RunEvent::Report { report } => Some(report.to_string()),
            RunEvent::File { .. } | RunEvent::PromptComplete { .. } | RunEvent::Complete => None,
        }
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for ConsoleSink {
    fn publish(&self, _run_id: u64, event: &RunEvent) {
        if let Some(text) = Self::render(event) {
            let mut out = self.out.lock().unwrap_or_else(|p| p.into_inner());
            let _ = writeln!(out, "{}", text);
        }
    }
}

/// Records every event in memory.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<(u64, RunEvent)>>,
    changed: Condvar,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RunEvent> {
        self.lock().iter().map(|(_, event)| event.clone()).collect()
    }

    pub fn events_for(&self, run_id: u64) -> Vec<RunEvent> {
        self.lock()
            .iter()
            .filter(|(id, _)| *id == run_id)
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// Text of every output event, in order.
    pub fn output_lines(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter_map(|(_, event)| match event {
                RunEvent::Output { line, .. } => Some(line.clone()),
                _ => None,
            })
            .collect()
    }

    /// `(line_no, state)` of every line event, in order.
    pub fn line_states(&self) -> Vec<(usize, ScriptState)> {
        self.lock()
            .iter()
            .filter_map(|(_, event)| match event {
                RunEvent::Line { line_no, state, .. } => Some((*line_no, *state)),
                _ => None,
            })
            .collect()
    }

    /// Block until an event matching `predicate` has been recorded.
    pub fn wait_for(&self, timeout: Duration, predicate: impl Fn(&RunEvent) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut events = self.lock();
        loop {
            if events.iter().any(|(_, event)| predicate(event)) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            events = match self.changed.wait_timeout(events, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(u64, RunEvent)>> {
        self.events.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl EventSink for MemorySink {
    fn publish(&self, run_id: u64, event: &RunEvent) {
        self.lock().push((run_id, event.clone()));
        self.changed.notify_all();
    }
}
