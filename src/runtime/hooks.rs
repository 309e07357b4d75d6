//! Statement hooks.
//!
//! Instrumented code calls these around every statement. They run on the
//! worker thread and are where the control latches take effect.

use super::loader::fetch_named;
use super::lock;
use super::result::{ControlSignal, ScriptFault};
use super::script::{RhaiResult, RunningScript};
use crate::debugger::FileSwitch;
use crate::protocol::{OutputColor, RunEvent};
use rhai::{Dynamic, EvalAltResult, Position};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::time::Instant;
use tracing::{debug, warn};

impl RunningScript {
    /// Line number as seen by the operator: statements of the top-level
    /// file are shifted by the run's line offset.
    fn operator_line(&self, filename: &str, line: usize) -> usize {
        let offset = lock(&self.cursor).line_offset;
        if offset > 0 && filename == self.filename() {
            line + offset
        } else {
            line
        }
    }

    /// Called before every statement.
    pub(crate) fn pre_line(&self, filename: &str, line: usize) -> RhaiResult<()> {
        let line = self.operator_line(filename, line);
        {
            let mut cursor = lock(&self.cursor);
            cursor.filename = Some(filename.to_string());
            cursor.line = line;
        }
        if !self.use_instrumentation.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.flags.go.clear();
        if self.flags.stop.is_set() {
            return Err(ControlSignal::Stop.into_error());
        }
        self.handle_file_switch(filename);
        self.mark_running();
        self.handle_pause(filename, line)?;
        self.handle_line_delay();
        Ok(())
    }

    /// Called after every statement that completed.
    pub(crate) fn post_line(&self, filename: &str, line: usize) {
        if self.use_instrumentation.load(Ordering::SeqCst) {
            let line = self.operator_line(filename, line);
            self.flush_output(Some((filename, line)));
        }
    }

    /// Called with the error caught around a statement.
    ///
    /// Returns `true` to re-execute the statement.
    pub(crate) fn on_exception(
        &self,
        caught: Dynamic,
        filename: &str,
        line: usize,
    ) -> RhaiResult<bool> {
        if self.flags.stop.is_set() {
            return Err(ControlSignal::Stop.into_error());
        }
        if self.skip_requested.load(Ordering::SeqCst) {
            return Err(ControlSignal::Skip.into_error());
        }
        if !self.use_instrumentation.load(Ordering::SeqCst) {
            return Err(rethrow(caught));
        }

        let line = self.operator_line(filename, line);
        let fault = ScriptFault::from_caught(&caught, filename, line);
        if *lock(&self.last_error) == Some(fault.id) {
            debug!("Fault {} already reported", fault.id);
            return Err(fault.into_error());
        }
        self.handle_exception(fault, false)
    }

    /// Raised by `skip_script()`.
    pub(crate) fn skip(&self) -> RhaiResult<()> {
        self.skip_requested.store(true, Ordering::SeqCst);
        Err(ControlSignal::Skip.into_error())
    }

    /// Pause policy: breakpoints always stop; a pause request stops once,
    /// or on every statement while stepping.
    fn handle_pause(&self, filename: &str, line: usize) -> RhaiResult<()> {
        let breakpoint = self.shared.is_breakpoint(filename, line);
        if self.flags.pause.is_set() {
            if !self.flags.step.is_set() {
                self.flags.pause.clear();
            }
            if breakpoint {
                self.perform_breakpoint(filename, line)
            } else {
                self.perform_pause()
            }
        } else if breakpoint {
            self.perform_breakpoint(filename, line)
        } else {
            Ok(())
        }
    }

    fn perform_breakpoint(&self, filename: &str, line: usize) -> RhaiResult<()> {
        self.flags.go.clear();
        let base = Path::new(filename)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| filename.to_string());
        // Observers see the reason before the state change.
        self.scriptrunner_puts(&format!("Hit Breakpoint at {}:{}", base, line), OutputColor::Black);
        self.flush_output(Some((filename, line)));
        self.mark_breakpoint();
        self.wait_for_go_or_stop(None)
    }

    /// Keep at least the configured delay between statements.
    fn handle_line_delay(&self) {
        let delay = self.shared.settings().line_delay;
        if !delay.is_zero() {
            let elapsed = lock(&self.cursor).pre_line_time.elapsed();
            if let Some(remaining) = delay.checked_sub(elapsed) {
                std::thread::sleep(remaining);
            }
        }
        lock(&self.cursor).pre_line_time = Instant::now();
    }

    /// Track the file being executed. Entering a new file publishes its
    /// text; returning to a file already on the call stack drops the frames
    /// above it.
    fn handle_file_switch(&self, filename: &str) {
        let switch = {
            let mut cursor = lock(&self.cursor);
            if cursor.current_file == filename {
                return;
            }
            cursor.current_file = filename.to_string();
            cursor.call_stack.enter(filename)
        };
        if switch == FileSwitch::Pushed {
            self.load_file_into_script(filename);
        }
    }

    fn load_file_into_script(&self, filename: &str) {
        self.shared.mark_breakpoints(filename);
        let cache = &self.shared.file_cache;
        let text = match cache.text(filename) {
            Some(text) => text,
            None => match fetch_named(self.shared.store.as_ref(), filename) {
                Ok((_, text)) => {
                    cache.insert_text(filename, &text);
                    text
                }
                Err(e) => {
                    warn!("Failed to load {}: {:#}", filename, e);
                    return;
                }
            },
        };
        self.shared.publish(
            self.id(),
            &RunEvent::File {
                filename: filename.to_string(),
                text,
                breakpoints: self.shared.breakpoint_rows(filename),
            },
        );
    }
}

/// Raise a caught value again unchanged.
fn rethrow(caught: Dynamic) -> Box<EvalAltResult> {
    EvalAltResult::ErrorRuntime(caught, Position::NONE).into()
}
