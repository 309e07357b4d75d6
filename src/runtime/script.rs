use super::cache::TopLevelEntry;
use super::engine;
use super::executor::{RunSpec, RunnerShared};
use super::lock;
use super::output::{format_output, MessageLog, OutputBuffer, TIME_FORMAT};
use super::report::RunReport;
use super::result::{ControlSignal, RunOutcome, ScriptFault};
use crate::config::RunSettings;
use crate::debugger::control::REPUBLISH_POLLS;
use crate::debugger::{CallStack, ControlFlags, ScriptState, POLL_INTERVAL};
use crate::protocol::{OutputColor, RunEvent};
use crate::{Result, RunnerError};
use chrono::{DateTime, Local};
use rhai::{Dynamic, EvalAltResult, Scope};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{error, info, warn};

pub(crate) type RhaiResult<T> = std::result::Result<T, Box<EvalAltResult>>;

/// Where the run currently is.
#[derive(Debug)]
pub(crate) struct Cursor {
    /// File of the statement being executed, `None` outside a statement.
    pub(crate) filename: Option<String>,
    pub(crate) line: usize,
    /// File whose text was last published.
    pub(crate) current_file: String,
    pub(crate) call_stack: CallStack,
    pub(crate) line_offset: usize,
    pub(crate) pre_line_time: Instant,
}

/// An operator prompt the script is blocked on.
#[derive(Debug, Clone)]
pub(crate) struct PendingPrompt {
    pub(crate) id: String,
    pub(crate) method: String,
    pub(crate) args: Vec<Value>,
    pub(crate) kwargs: Map<String, Value>,
}

impl PendingPrompt {
    fn event(&self) -> RunEvent {
        RunEvent::Script {
            method: self.method.clone(),
            prompt_id: self.id.clone(),
            args: self.args.clone(),
            kwargs: self.kwargs.clone(),
        }
    }
}

/// One script run and its cooperative state machine.
///
/// Control operations (`go`, `pause`, `stop`, ...) only write latches;
/// the worker thread observes them from the statement hooks and the wait
/// loops.
pub struct RunningScript {
    pub(super) shared: Arc<RunnerShared>,
    id: u64,
    scope: String,
    disconnect: bool,
    reporting: bool,
    settings: RunSettings,
    pub(super) flags: ControlFlags,
    pub(super) skip_requested: AtomicBool,
    /// Inside a `wait()` that only ends on go, pause or stop.
    untimed_wait: AtomicBool,
    pub(super) cancel_instrumentation: AtomicBool,
    pub(super) use_instrumentation: AtomicBool,
    continue_after_error: AtomicBool,
    running: AtomicBool,
    state: Mutex<ScriptState>,
    filename: Mutex<String>,
    body: Mutex<String>,
    pub(super) cursor: Mutex<Cursor>,
    exceptions: Mutex<Vec<ScriptFault>>,
    pub(super) last_error: Mutex<Option<u64>>,
    stdout_max_lines: usize,
    top_level: Mutex<Option<TopLevelEntry>>,
    prompt: Mutex<Option<PendingPrompt>>,
    user_input: Mutex<Option<Value>>,
    pub(crate) output: OutputBuffer,
    message_log: Mutex<MessageLog>,
    previous: Mutex<Option<Arc<RunningScript>>>,
    worker: Mutex<Option<JoinHandle<RunOutcome>>>,
    outcome: Mutex<Option<RunOutcome>>,
    started: Mutex<Option<DateTime<Local>>>,
}

impl std::fmt::Debug for RunningScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningScript")
            .field("id", &self.id)
            .field("filename", &self.filename())
            .field("state", &self.state())
            .finish()
    }
}

impl RunningScript {
    pub(crate) fn new(
        shared: Arc<RunnerShared>,
        id: u64,
        spec: RunSpec,
        filename: String,
        body: String,
    ) -> Self {
        let config = &shared.config;
        let continue_after_error = spec
            .settings
            .continue_after_error
            .unwrap_or(config.continue_after_error);
        let message_log = MessageLog::new(&filename, config.log_dir.clone());
        let stdout_max_lines = config.stdout_max_lines;
        Self {
            id,
            scope: spec.scope,
            disconnect: spec.disconnect,
            reporting: spec.name.contains("suite"),
            settings: spec.settings,
            flags: ControlFlags::new(),
            skip_requested: AtomicBool::new(false),
            untimed_wait: AtomicBool::new(false),
            cancel_instrumentation: AtomicBool::new(false),
            use_instrumentation: AtomicBool::new(true),
            continue_after_error: AtomicBool::new(continue_after_error),
            running: AtomicBool::new(false),
            state: Mutex::new(ScriptState::Init),
            cursor: Mutex::new(Cursor {
                filename: None,
                line: 0,
                current_file: filename.clone(),
                call_stack: CallStack::new(),
                line_offset: 0,
                pre_line_time: Instant::now(),
            }),
            filename: Mutex::new(filename),
            body: Mutex::new(body),
            exceptions: Mutex::new(Vec::new()),
            last_error: Mutex::new(None),
            stdout_max_lines,
            top_level: Mutex::new(None),
            prompt: Mutex::new(None),
            user_input: Mutex::new(None),
            output: OutputBuffer::new(),
            message_log: Mutex::new(message_log),
            previous: Mutex::new(None),
            worker: Mutex::new(None),
            outcome: Mutex::new(None),
            started: Mutex::new(None),
            shared,
        }
    }

    // ── accessors ────────────────────────────────────────────────────────────

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn filename(&self) -> String {
        lock(&self.filename).clone()
    }

    /// Key used for breakpoints and logs: the filename, or `Untitled<id>`
    /// for a run without one.
    pub fn unique_filename(&self) -> String {
        let filename = lock(&self.filename);
        if filename.is_empty() {
            format!("Untitled{}", self.id)
        } else {
            filename.clone()
        }
    }

    fn basename(&self) -> String {
        let filename = self.unique_filename();
        Path::new(&filename)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or(filename)
    }

    pub fn text(&self) -> String {
        lock(&self.body).clone()
    }

    pub fn state(&self) -> ScriptState {
        *lock(&self.state)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnect
    }

    pub fn is_reporting(&self) -> bool {
        self.reporting
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    pub fn flags(&self) -> &ControlFlags {
        &self.flags
    }

    /// Errors reported during the current or last run.
    pub fn exceptions(&self) -> Vec<ScriptFault> {
        lock(&self.exceptions).clone()
    }

    /// `(filename, line)` of the statement being executed.
    pub fn position(&self) -> (Option<String>, usize) {
        let cursor = lock(&self.cursor);
        (cursor.filename.clone(), cursor.line)
    }

    pub fn prompt_id(&self) -> Option<String> {
        lock(&self.prompt).as_ref().map(|prompt| prompt.id.clone())
    }

    /// Whether the script is blocked until the operator sends go, pause
    /// or stop.
    pub fn awaits_operator(&self) -> bool {
        self.prompt_id().is_some()
            || self.untimed_wait.load(Ordering::SeqCst)
            || matches!(
                self.state(),
                ScriptState::Paused | ScriptState::Breakpoint | ScriptState::Error
            )
    }

    pub fn continue_after_error(&self) -> bool {
        self.continue_after_error.load(Ordering::SeqCst)
    }

    pub fn set_continue_after_error(&self, enabled: bool) {
        self.continue_after_error.store(enabled, Ordering::SeqCst);
    }

    pub(super) fn pause_on_error(&self) -> bool {
        self.settings
            .pause_on_error
            .unwrap_or_else(|| self.shared.settings().pause_on_error)
    }

    /// Files entered by the run, innermost first; the innermost frame
    /// carries the current line.
    pub fn backtrace(&self) -> Vec<String> {
        let cursor = lock(&self.cursor);
        let mut frames = cursor.call_stack.backtrace();
        if let (Some(top), Some(filename)) = (frames.first_mut(), cursor.filename.as_ref()) {
            if top == filename {
                *top = format!("{}:{}", filename, cursor.line);
            }
        }
        frames
    }

    // ── control operations ───────────────────────────────────────────────────

    pub fn go(&self) {
        self.flags.go();
    }

    pub fn step(&self) {
        self.flags.step();
    }

    /// Resume after a prompt answer, staying in step mode when active.
    pub fn continue_(&self) {
        self.flags.continue_();
    }

    pub fn pause(&self) {
        self.flags.pause();
    }

    pub fn retry(&self) {
        self.flags.retry();
    }

    /// Request a stop. Has no effect unless the run is active.
    pub fn stop(&self) {
        if self.is_running() {
            self.flags.stop.set();
            self.cancel_instrumentation.store(true, Ordering::SeqCst);
        }
    }

    /// Replace the script text. Refused while the run is active.
    pub fn set_text(&self, text: &str, filename: &str) -> Result<()> {
        if self.is_running() {
            return Err(RunnerError::Busy("set the script text".into()).into());
        }
        *lock(&self.filename) = filename.to_string();
        *lock(&self.body) = text.to_string();
        self.shared.mark_breakpoints(&self.unique_filename());
        Ok(())
    }

    /// Rename the run's script, carrying breakpoints set under the old
    /// name over to the new one.
    pub fn set_filename(&self, filename: &str) {
        self.stop_message_log();
        let old_key = self.unique_filename();
        *lock(&self.filename) = filename.to_string();
        let new_key = self.unique_filename();
        if lock(&self.shared.breakpoints).migrate(&old_key, &new_key) {
            info!("Moved breakpoints from {} to {}", old_key, new_key);
        }
        *lock(&self.message_log) = MessageLog::new(&new_key, self.shared.config.log_dir.clone());
        self.shared.mark_breakpoints(&new_key);
    }

    /// Close the message log and hand its contents to the store.
    pub fn stop_message_log(&self) {
        let contents = lock(&self.message_log).stop();
        if contents.is_empty() {
            return;
        }
        if let Err(e) = self.shared.store.save_log(&self.unique_filename(), &contents) {
            warn!("Failed to save message log: {:#}", e);
        }
    }

    pub fn message_log_path(&self) -> Option<std::path::PathBuf> {
        lock(&self.message_log).path().map(Path::to_path_buf)
    }

    /// Answer the pending prompt `prompt_id`.
    pub fn answer(&self, prompt_id: &str, answer: Value) {
        let pending = lock(&self.prompt).clone();
        match pending {
            Some(prompt) if prompt.id == prompt_id => {
                let input = convert_answer(&prompt.method, answer);
                self.scriptrunner_puts(
                    &format!("User input: {}", display_value(&input)),
                    OutputColor::Black,
                );
                *lock(&self.user_input) = Some(input);
                self.continue_();
            }
            Some(prompt) => self.scriptrunner_puts(
                &format!(
                    "INFO: Received answer for prompt {} when looking for {}.",
                    prompt_id, prompt.id
                ),
                OutputColor::Black,
            ),
            None => self.scriptrunner_puts(
                &format!("INFO: Unexpectedly received answer for unknown prompt {}.", prompt_id),
                OutputColor::Black,
            ),
        }
    }

    // ── published state ──────────────────────────────────────────────────────

    pub(super) fn publish_line(&self, state: ScriptState) {
        let (filename, line) = {
            let cursor = lock(&self.cursor);
            (cursor.filename.clone(), cursor.line)
        };
        let filename = filename.unwrap_or_else(|| self.filename());
        self.shared
            .publish(self.id, &RunEvent::line(&filename, line, state));
    }

    fn mark(&self, state: ScriptState) {
        *lock(&self.state) = state;
        self.publish_line(state);
    }

    pub(super) fn mark_running(&self) {
        self.mark(ScriptState::Running);
    }

    pub(super) fn mark_paused(&self) {
        self.mark(ScriptState::Paused);
    }

    fn mark_waiting(&self) {
        self.mark(ScriptState::Waiting);
    }

    pub(super) fn mark_breakpoint(&self) {
        self.mark(ScriptState::Breakpoint);
    }

    fn mark_error(&self) {
        self.mark(ScriptState::Error);
    }

    fn mark_fatal(&self) {
        self.mark(ScriptState::Fatal);
    }

    fn mark_stopped(&self) {
        self.mark(ScriptState::Stopped);
    }

    /// Publish an engine message.
    pub fn scriptrunner_puts(&self, text: &str, color: OutputColor) {
        let line = format!("{} (SCRIPTRUNNER): {}", Local::now().format(TIME_FORMAT), text);
        self.shared
            .publish(self.id, &RunEvent::output(line.clone(), color));
        lock(&self.message_log).write_lines([line.as_str()]);
    }

    /// Publish buffered output attributed to `location`.
    pub(super) fn flush_output(&self, location: Option<(&str, usize)>) {
        let Some(text) = self.output.take_complete() else {
            return;
        };
        let lines = format_output(&text, location, self.stdout_max_lines, Local::now());
        for line in &lines {
            self.shared
                .publish(self.id, &RunEvent::output(line.line.clone(), line.color));
        }
        lock(&self.message_log).write_lines(lines.iter().map(|line| line.line.as_str()));
    }

    /// Publish buffered output attributed to the current statement.
    pub(crate) fn flush_output_here(&self) {
        let (filename, line) = self.position();
        self.flush_output(filename.as_deref().map(|filename| (filename, line)));
    }

    // ── waits ────────────────────────────────────────────────────────────────

    /// Poll every [`POLL_INTERVAL`] until `done` holds, re-publishing the
    /// line state (and the prompt) about once a second.
    fn poll_until(&self, prompt: Option<&PendingPrompt>, done: impl Fn() -> bool) {
        let mut polls: u32 = 0;
        while !done() {
            std::thread::sleep(POLL_INTERVAL);
            if polls % REPUBLISH_POLLS == 0 {
                self.publish_line(self.state());
                if let Some(prompt) = prompt {
                    self.shared.publish(self.id, &prompt.event());
                }
            }
            polls = polls.wrapping_add(1);
        }
    }

    /// Block until go or stop. Callers clear `go` before publishing the
    /// state that invites it.
    pub(super) fn wait_for_go_or_stop(&self, prompt: Option<PendingPrompt>) -> RhaiResult<()> {
        if let Some(prompt) = &prompt {
            *lock(&self.prompt) = Some(prompt.clone());
        }
        self.poll_until(prompt.as_ref(), || {
            self.flags.go.is_set() || self.flags.stop.is_set()
        });
        if let Some(prompt) = lock(&self.prompt).take() {
            self.shared.publish(
                self.id,
                &RunEvent::PromptComplete {
                    prompt_id: prompt.id,
                },
            );
        }
        self.flags.go.clear();
        self.mark_running();
        if self.flags.stop.is_set() {
            return Err(ControlSignal::Stop.into_error());
        }
        Ok(())
    }

    fn wait_for_go_or_stop_or_retry(&self, fault: &ScriptFault) -> RhaiResult<()> {
        self.poll_until(None, || {
            self.flags.go.is_set()
                || self.flags.stop.is_set()
                || self.flags.retry_needed.is_set()
        });
        self.flags.go.clear();
        self.mark_running();
        if self.flags.stop.is_set() {
            return Err(ControlSignal::Stop.into_error());
        }
        if !self.continue_after_error() && !self.flags.retry_needed.is_set() {
            return Err(fault.clone().into_error());
        }
        Ok(())
    }

    pub(super) fn perform_pause(&self) -> RhaiResult<()> {
        self.flags.go.clear();
        self.mark_paused();
        self.wait_for_go_or_stop(None)
    }

    fn perform_wait(&self, prompt: PendingPrompt) -> RhaiResult<()> {
        self.flags.go.clear();
        self.mark_waiting();
        self.wait_for_go_or_stop(Some(prompt))
    }

    /// Block on an operator prompt and return the answer.
    ///
    /// A `Cancel` answer pauses the script and asks again.
    pub(super) fn prompt(
        &self,
        method: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> RhaiResult<Value> {
        use itertools::Itertools;

        loop {
            let rendered = args.iter().map(display_value).join(", ");
            self.scriptrunner_puts(&format!("{}({})", method, rendered), OutputColor::Black);
            *lock(&self.user_input) = None;
            self.perform_wait(PendingPrompt {
                id: uuid::Uuid::new_v4().to_string(),
                method: method.to_string(),
                args: args.clone(),
                kwargs: kwargs.clone(),
            })?;
            match lock(&self.user_input).take() {
                Some(Value::String(answer)) if answer == "Cancel" => self.perform_pause()?,
                Some(answer) => return Ok(answer),
                None => return Ok(Value::Null),
            }
        }
    }

    /// Cooperative sleep. Returns `true` when cut short by go or pause.
    pub(super) fn script_wait(&self, seconds: Option<f64>) -> RhaiResult<bool> {
        if self.disconnect {
            return Ok(true);
        }
        self.untimed_wait.store(seconds.is_none(), Ordering::SeqCst);
        self.publish_line(ScriptState::Waiting);

        let seconds = seconds.unwrap_or(30_000_000.0);
        let waited = if seconds > 0.0 {
            self.wait_until_released(seconds)
        } else {
            Ok(false)
        };
        self.untimed_wait.store(false, Ordering::SeqCst);
        waited
    }

    fn wait_until_released(&self, seconds: f64) -> RhaiResult<bool> {
        let deadline = std::time::Duration::try_from_secs_f64(seconds)
            .ok()
            .and_then(|duration| Instant::now().checked_add(duration));

        let mut polls: u32 = 0;
        while deadline.map_or(true, |deadline| Instant::now() < deadline) {
            std::thread::sleep(POLL_INTERVAL);
            polls = polls.wrapping_add(1);
            if polls % REPUBLISH_POLLS == 0 {
                self.publish_line(ScriptState::Waiting);
            }
            if self.flags.pause.is_set() {
                self.perform_pause()?;
                return Ok(true);
            }
            if self.flags.go.test_and_clear() {
                return Ok(true);
            }
            if self.flags.stop.is_set() {
                return Err(ControlSignal::Stop.into_error());
            }
        }
        Ok(false)
    }

    // ── errors ───────────────────────────────────────────────────────────────

    /// Report `fault` and apply the error policy.
    ///
    /// Returns whether the operator asked to retry the failed statement.
    pub(super) fn handle_exception(&self, fault: ScriptFault, fatal: bool) -> RhaiResult<bool> {
        self.flags.go.clear();
        lock(&self.exceptions).push(fault.clone());
        *lock(&self.last_error) = Some(fault.id);

        let call_stack = lock(&self.cursor).call_stack.backtrace();
        error!(
            run = self.id,
            file = fault.filename.as_deref().unwrap_or(""),
            line = fault.line.unwrap_or(0),
            call_stack = ?call_stack,
            "{}",
            fault.message
        );
        self.output.write_line(&format!("ERROR: {}", fault));
        match (&fault.filename, fault.line) {
            (Some(filename), Some(line)) => self.flush_output(Some((filename.as_str(), line))),
            _ => self.flush_output_here(),
        }

        let pause_on_error = self.pause_on_error();
        if !fatal {
            self.mark_error();
        }
        if !pause_on_error && !self.continue_after_error() && !fatal {
            return Err(fault.into_error());
        }
        if !fatal && pause_on_error {
            self.wait_for_go_or_stop_or_retry(&fault)?;
        }
        Ok(self.flags.retry_needed.test_and_clear())
    }

    // ── run lifecycle ────────────────────────────────────────────────────────

    /// Run the script text from the start.
    pub fn run(self: &Arc<Self>) -> Result<()> {
        let text = self.text();
        self.run_text(&text, 0, None, false)
    }

    /// Run in `scope` without the start and completion messages.
    pub fn run_and_close_on_complete(self: &Arc<Self>, scope: Option<Scope<'static>>) -> Result<()> {
        let text = self.text();
        self.run_text(&text, 0, scope, true)
    }

    /// Instrument `text` and execute it on a new worker thread.
    ///
    /// `line_offset` is added to the line numbers of the top-level file.
    /// Functions of a top-level script are made private unless a `scope`
    /// is supplied. Instrumentation errors are returned before anything
    /// runs.
    #[tracing::instrument(skip_all, fields(run = self.id))]
    pub fn run_text(
        self: &Arc<Self>,
        text: &str,
        line_offset: usize,
        scope: Option<Scope<'static>>,
        close_on_complete: bool,
    ) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(RunnerError::AlreadyRunning(self.unique_filename()).into());
        }
        self.reset(line_offset);

        let filename = self.filename();
        let instrumented = match self.instrument_top_level(text, line_offset, &filename, scope.is_none()) {
            Ok(Some(instrumented)) => instrumented,
            Ok(None) => {
                info!("Instrumentation of {} cancelled", filename);
                self.scriptrunner_puts(
                    &format!("Script stopped: {}", self.basename()),
                    OutputColor::Black,
                );
                self.mark_stopped();
                self.running.store(false, Ordering::SeqCst);
                return Ok(());
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let previous = self.shared.swap_current(Arc::clone(self));
        *lock(&self.previous) = previous;
        *lock(&self.started) = Some(Local::now());

        let run = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name(format!("script-run-{}", self.id))
            .spawn(move || run.execute(instrumented, scope, close_on_complete));
        match spawned {
            Ok(handle) => {
                *lock(&self.worker) = Some(handle);
                Ok(())
            }
            Err(e) => {
                let previous = lock(&self.previous).take();
                self.shared.restore_current(self, previous);
                self.running.store(false, Ordering::SeqCst);
                Err(RunnerError::Spawn(e.to_string()).into())
            }
        }
    }

    fn reset(&self, line_offset: usize) {
        self.flags.reset_for_run();
        self.skip_requested.store(false, Ordering::SeqCst);
        self.cancel_instrumentation.store(false, Ordering::SeqCst);
        self.use_instrumentation.store(true, Ordering::SeqCst);
        lock(&self.exceptions).clear();
        *lock(&self.last_error) = None;
        *lock(&self.outcome) = None;
        let filename = self.filename();
        let mut cursor = lock(&self.cursor);
        cursor.filename = None;
        cursor.line = 0;
        cursor.call_stack.reset(&filename);
        cursor.current_file = filename;
        cursor.line_offset = line_offset;
        cursor.pre_line_time = Instant::now();
    }

    fn instrument_top_level(
        &self,
        text: &str,
        line_offset: usize,
        filename: &str,
        mark_private: bool,
    ) -> Result<Option<String>> {
        if let Some(entry) = lock(&self.top_level).as_ref() {
            if entry.matches(text, line_offset, filename) {
                return Ok(Some(entry.instrumented.clone()));
            }
        }
        let cache = &self.shared.file_cache;
        if !filename.is_empty() {
            cache.insert_text(filename, text);
        }
        let Some(instrumented) = cache.instrumenter().instrument_cancellable(
            text,
            filename,
            mark_private,
            &self.cancel_instrumentation,
        )?
        else {
            return Ok(None);
        };
        *lock(&self.top_level) = Some(TopLevelEntry {
            text: text.to_string(),
            line_offset,
            filename: filename.to_string(),
            instrumented: instrumented.clone(),
        });
        Ok(Some(instrumented))
    }

    /// Body of the worker thread.
    fn execute(
        self: Arc<Self>,
        instrumented: String,
        scope: Option<Scope<'static>>,
        close_on_complete: bool,
    ) -> RunOutcome {
        let name = self.basename();
        if !close_on_complete {
            let mut message = format!("Starting script: {}", name);
            if self.disconnect {
                message.push_str(" in DISCONNECT mode");
            }
            self.scriptrunner_puts(&message, OutputColor::Black);
        }
        self.flush_output(None);
        self.shared.start_workers();

        let outcome = match self.evaluate(&instrumented, scope) {
            Ok(()) => {
                self.flush_output_here();
                if !close_on_complete {
                    self.scriptrunner_puts(&format!("Script completed: {}", name), OutputColor::Black);
                }
                RunOutcome::Completed
            }
            Err(err) => match ControlSignal::from_error(&err) {
                Some(signal) => {
                    info!("Run {} ended by {:?}", self.id, signal);
                    self.flush_output_here();
                    self.scriptrunner_puts(&format!("Script stopped: {}", name), OutputColor::Black);
                    RunOutcome::Stopped
                }
                None => {
                    let fault = ScriptFault::from_eval_error(&err, &self.filename());
                    let duplicate = *lock(&self.last_error) == Some(fault.id);
                    if !duplicate {
                        // Fatal reports never block and never re-raise.
                        match self.handle_exception(fault.clone(), true) {
                            Ok(false) => {}
                            Ok(true) => warn!("Run {} dropped a retry after a fatal error", self.id),
                            Err(e) => warn!("Fatal report for run {} raised: {}", self.id, e),
                        }
                    }
                    self.flush_output_here();
                    self.scriptrunner_puts(
                        &format!("Exception in Control Statement - Script stopped: {}", name),
                        OutputColor::Red,
                    );
                    self.mark_fatal();
                    RunOutcome::Fatal(fault)
                }
            },
        };

        self.finish(&outcome);
        outcome
    }

    fn evaluate(
        self: &Arc<Self>,
        instrumented: &str,
        scope: Option<Scope<'static>>,
    ) -> RhaiResult<()> {
        let engine = engine::build_engine(self);
        let mut ast = engine.compile(instrumented)?;
        ast.set_source(self.filename());
        let mut scope = scope.unwrap_or_default();
        lock(&self.cursor).pre_line_time = Instant::now();
        engine.run_ast_with_scope(&mut scope, &ast)
    }

    fn finish(&self, outcome: &RunOutcome) {
        let previous = lock(&self.previous).take();
        if !self.shared.restore_current(self, previous) {
            self.shared.stop_workers();
        }
        {
            let filename = self.filename();
            let mut cursor = lock(&self.cursor);
            cursor.filename = Some(filename);
            cursor.line = 0;
        }
        self.mark_stopped();
        if self.reporting {
            self.publish_report(outcome);
        }
        *lock(&self.outcome) = Some(outcome.clone());
        self.running.store(false, Ordering::SeqCst);
    }

    fn publish_report(&self, outcome: &RunOutcome) {
        let started = (*lock(&self.started)).unwrap_or_else(Local::now);
        let report = RunReport::build(self, outcome, started, Local::now());
        let value = match serde_json::to_value(&report) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to serialize report: {}", e);
                return;
            }
        };
        self.shared
            .publish(self.id, &RunEvent::Report { report: value.clone() });
        let bytes = match serde_json::to_vec_pretty(&value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to serialize report: {}", e);
                return;
            }
        };
        if let Err(e) = self.shared.store.save_report(&self.unique_filename(), &bytes) {
            warn!("Failed to save report: {:#}", e);
        }
    }

    /// Wait for the worker thread and return how the run ended.
    pub fn join(&self) -> RunOutcome {
        let handle = lock(&self.worker).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Run {} worker panicked", self.id);
                self.running.store(false, Ordering::SeqCst);
                let fault = ScriptFault::new("script worker panicked", Some(&self.filename()), None);
                *lock(&self.outcome) = Some(RunOutcome::Fatal(fault));
            }
        }
        lock(&self.outcome).clone().unwrap_or(RunOutcome::Stopped)
    }
}

/// Convert a prompt answer: `true`/`false` become booleans, `ask` answers
/// become numbers where they parse as one.
fn convert_answer(method: &str, answer: Value) -> Value {
    let Value::String(text) = answer else {
        return answer;
    };
    match text.as_str() {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if method == "ask" {
        let trimmed = text.trim();
        if let Ok(int) = trimmed.parse::<i64>() {
            return Value::from(int);
        }
        if let Ok(float) = trimmed.parse::<f64>() {
            if let Some(number) = serde_json::Number::from_f64(float) {
                return Value::Number(number);
            }
        }
    }
    Value::String(text)
}

pub(super) fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Convert a script value for the wire.
pub(super) fn to_json(value: &Dynamic) -> Value {
    rhai::serde::from_dynamic::<Value>(value).unwrap_or_else(|_| Value::String(value.to_string()))
}
