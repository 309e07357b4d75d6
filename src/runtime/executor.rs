use super::cache::FileCache;
use super::engine::ScriptApi;
use super::limits::{monitor_limits, LimitsSource};
use super::loader::{fetch_named, ScriptStore};
use super::lock;
use super::script::RunningScript;
use super::worker::{WorkerHandle, Workers};
use crate::config::{RunSettings, RunnerConfig};
use crate::debugger::{Breakpoint, BreakpointManager};
use crate::events::EventSink;
use crate::protocol::{ControlRequest, OutputColor, RunEvent};
use crate::{Result, RunnerError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

const OUTPUT_WAKE: Duration = Duration::from_secs(1);

/// Runner-wide settings that apply to every run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunnerSettings {
    pub line_delay: Duration,
    pub pause_on_error: bool,
    pub monitor_limits: bool,
    pub pause_on_red: bool,
}

impl RunnerSettings {
    fn from_config(config: &RunnerConfig) -> Self {
        Self {
            line_delay: config.line_delay(),
            pause_on_error: config.pause_on_error,
            monitor_limits: config.monitor_limits,
            pause_on_red: config.pause_on_red,
        }
    }
}

/// State shared by every run of a [`ScriptRunner`].
pub(crate) struct RunnerShared {
    pub(crate) config: RunnerConfig,
    settings: Mutex<RunnerSettings>,
    current: Mutex<Option<Arc<RunningScript>>>,
    pub(crate) breakpoints: Mutex<BreakpointManager>,
    pub(crate) file_cache: FileCache,
    workers: Mutex<Workers>,
    pub(crate) sink: Arc<dyn EventSink>,
    pub(crate) store: Arc<dyn ScriptStore>,
    pub(crate) apis: Vec<Arc<dyn ScriptApi>>,
    limits: Option<Arc<dyn LimitsSource>>,
    next_id: AtomicU64,
}

impl RunnerShared {
    pub(crate) fn settings(&self) -> RunnerSettings {
        *lock(&self.settings)
    }

    pub(crate) fn publish(&self, run_id: u64, event: &RunEvent) {
        self.sink.publish(run_id, event);
    }

    pub(crate) fn current(&self) -> Option<Arc<RunningScript>> {
        lock(&self.current).clone()
    }

    /// Install `run` as current, returning the run it replaces.
    pub(crate) fn swap_current(&self, run: Arc<RunningScript>) -> Option<Arc<RunningScript>> {
        lock(&self.current).replace(run)
    }

    /// Put `previous` back if `run` is still current. Returns whether any
    /// run remains current.
    pub(crate) fn restore_current(
        &self,
        run: &RunningScript,
        previous: Option<Arc<RunningScript>>,
    ) -> bool {
        let mut current = lock(&self.current);
        let is_current = current
            .as_ref()
            .map_or(false, |active| std::ptr::eq(Arc::as_ptr(active), run));
        if is_current {
            *current = previous;
        }
        current.is_some()
    }

    pub(crate) fn is_breakpoint(&self, filename: &str, line: usize) -> bool {
        lock(&self.breakpoints).should_break(filename, line)
    }

    /// 0-based rows of `filename`, as carried by `file` events.
    pub(crate) fn breakpoint_rows(&self, filename: &str) -> Vec<usize> {
        lock(&self.breakpoints).rows(filename)
    }

    /// Load persisted breakpoints of `filename` unless it already has an
    /// entry in the table.
    pub(crate) fn mark_breakpoints(&self, filename: &str) {
        if lock(&self.breakpoints).has_file(filename) {
            return;
        }
        let rows = match self.store.breakpoints(filename) {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Failed to load breakpoints of {}: {:#}", filename, e);
                Vec::new()
            }
        };
        if !rows.is_empty() {
            debug!("Loaded {} stored breakpoints for {}", rows.len(), filename);
        }
        let mut breakpoints = lock(&self.breakpoints);
        breakpoints.touch(filename);
        breakpoints.load_rows(filename, &rows);
    }

    /// Start the output worker and, when enabled, the limits worker.
    pub(crate) fn start_workers(self: &Arc<Self>) {
        let settings = self.settings();
        let mut workers = lock(&self.workers);

        if workers.output.is_none() {
            let weak = Arc::downgrade(self);
            let idle = self.config.output_idle_flush();
            match WorkerHandle::spawn("output", move |sleeper| output_loop(weak, &sleeper, idle)) {
                Ok(handle) => workers.output = Some(handle),
                Err(e) => warn!("{:#}", e),
            }
        }

        if settings.monitor_limits && workers.limits.is_none() {
            let Some(source) = self.limits.clone() else {
                warn!("Limits monitoring requested without a limits source");
                return;
            };
            let weak = Arc::downgrade(self);
            let pause_on_red = settings.pause_on_red;
            let spawned = WorkerHandle::spawn("limits", move |sleeper| {
                let report_to = weak.clone();
                monitor_limits(
                    source.as_ref(),
                    &sleeper,
                    pause_on_red,
                    |text, color| {
                        if let Some(run) = report_to.upgrade().and_then(|shared| shared.current()) {
                            run.scriptrunner_puts(&text, color);
                        }
                    },
                    || {
                        if let Some(run) = weak.upgrade().and_then(|shared| shared.current()) {
                            run.pause();
                        }
                    },
                );
            });
            match spawned {
                Ok(handle) => workers.limits = Some(handle),
                Err(e) => warn!("{:#}", e),
            }
        }
    }

    pub(crate) fn stop_workers(&self) {
        let handles = lock(&self.workers).take_all();
        for handle in handles {
            handle.stop();
        }
    }
}

/// Body of the output worker: flush the current run after a period
/// without output.
fn output_loop(shared: Weak<RunnerShared>, sleeper: &super::worker::Sleeper, idle: Duration) {
    loop {
        if sleeper.sleep(OUTPUT_WAKE) {
            break;
        }
        let Some(shared) = shared.upgrade() else {
            break;
        };
        if let Some(run) = shared.current() {
            if run.output.idle_for() > idle {
                run.flush_output_here();
            }
        }
    }
}

/// Parameters of a new run.
#[derive(Debug, Clone, Default)]
pub struct RunSpec {
    pub id: Option<u64>,
    pub name: String,
    pub scope: String,
    pub disconnect: bool,
    pub settings: RunSettings,
}

impl RunSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: "DEFAULT".to_string(),
            ..Self::default()
        }
    }

    pub fn id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn disconnect(mut self, disconnect: bool) -> Self {
        self.disconnect = disconnect;
        self
    }

    pub fn settings(mut self, settings: RunSettings) -> Self {
        self.settings = settings;
        self
    }
}

/// What the control loop should do after a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Continue,
    Shutdown,
}

/// Builder for [`ScriptRunner`].
pub struct ScriptRunnerBuilder {
    config: RunnerConfig,
    sink: Option<Arc<dyn EventSink>>,
    store: Option<Arc<dyn ScriptStore>>,
    apis: Vec<Arc<dyn ScriptApi>>,
    limits: Option<Arc<dyn LimitsSource>>,
}

impl ScriptRunnerBuilder {
    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn store(mut self, store: Arc<dyn ScriptStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Register script functions provided by a host API.
    pub fn api(mut self, api: Arc<dyn ScriptApi>) -> Self {
        self.apis.push(api);
        self
    }

    pub fn limits(mut self, source: Arc<dyn LimitsSource>) -> Self {
        self.limits = Some(source);
        self
    }

    pub fn build(self) -> Result<ScriptRunner> {
        let sink = self
            .sink
            .ok_or_else(|| RunnerError::Config("an event sink is required".into()))?;
        let store = self
            .store
            .ok_or_else(|| RunnerError::Config("a script store is required".into()))?;
        let shared = RunnerShared {
            settings: Mutex::new(RunnerSettings::from_config(&self.config)),
            config: self.config,
            current: Mutex::new(None),
            breakpoints: Mutex::new(BreakpointManager::new()),
            file_cache: FileCache::new()?,
            workers: Mutex::new(Workers::default()),
            sink,
            store,
            apis: self.apis,
            limits: self.limits,
            next_id: AtomicU64::new(1),
        };
        Ok(ScriptRunner {
            shared: Arc::new(shared),
        })
    }
}

/// Process context of the script runner.
///
/// Owns everything shared between runs: the breakpoint table, the file
/// cache, the background workers and the collaborators. Exactly one run is
/// current at a time; control requests and the shared workers act on it.
#[derive(Clone)]
pub struct ScriptRunner {
    shared: Arc<RunnerShared>,
}

impl ScriptRunner {
    pub fn builder(config: RunnerConfig) -> ScriptRunnerBuilder {
        ScriptRunnerBuilder {
            config,
            sink: None,
            store: None,
            apis: Vec::new(),
            limits: None,
        }
    }

    fn allocate_id(&self, requested: Option<u64>) -> u64 {
        match requested {
            Some(id) => {
                self.shared.next_id.fetch_max(id + 1, Ordering::SeqCst);
                id
            }
            None => self.shared.next_id.fetch_add(1, Ordering::SeqCst),
        }
    }

    /// Create a run for the stored script `spec.name`.
    ///
    /// Loads stored breakpoints and publishes the script text as a `file`
    /// event.
    #[tracing::instrument(skip_all, fields(name = %spec.name))]
    pub fn open(&self, spec: RunSpec) -> Result<Arc<RunningScript>> {
        let (filename, body) = fetch_named(self.shared.store.as_ref(), &spec.name)?;
        self.open_with_body(spec, filename, body)
    }

    /// Create a run for `text` that is not in the store.
    pub fn open_text(&self, spec: RunSpec, text: &str) -> Result<Arc<RunningScript>> {
        let filename = spec.name.clone();
        self.open_with_body(spec, filename, text.to_string())
    }

    fn open_with_body(
        &self,
        spec: RunSpec,
        filename: String,
        body: String,
    ) -> Result<Arc<RunningScript>> {
        let id = self.allocate_id(spec.id);
        let run = Arc::new(RunningScript::new(
            Arc::clone(&self.shared),
            id,
            spec,
            filename,
            body,
        ));
        let key = run.unique_filename();
        self.shared.mark_breakpoints(&key);
        self.shared.publish(
            id,
            &RunEvent::File {
                filename: run.filename(),
                text: run.text(),
                breakpoints: self.shared.breakpoint_rows(&key),
            },
        );
        info!("Opened {} as run {}", key, id);
        Ok(run)
    }

    pub fn current(&self) -> Option<Arc<RunningScript>> {
        self.shared.current()
    }

    pub fn settings(&self) -> RunnerSettings {
        self.shared.settings()
    }

    pub fn set_line_delay(&self, delay: Duration) {
        lock(&self.shared.settings).line_delay = delay;
    }

    pub fn set_pause_on_error(&self, enabled: bool) {
        lock(&self.shared.settings).pause_on_error = enabled;
    }

    pub fn set_monitor_limits(&self, enabled: bool) {
        lock(&self.shared.settings).monitor_limits = enabled;
    }

    pub fn set_pause_on_red(&self, enabled: bool) {
        lock(&self.shared.settings).pause_on_red = enabled;
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.shared.config
    }

    pub fn file_cache(&self) -> &FileCache {
        &self.shared.file_cache
    }

    pub fn set_breakpoint(&self, filename: &str, line: usize) {
        lock(&self.shared.breakpoints).add(filename, line);
    }

    pub fn clear_breakpoint(&self, filename: &str, line: usize) {
        lock(&self.shared.breakpoints).remove(filename, line);
    }

    /// Clear the breakpoints of one file, or all of them.
    pub fn clear_breakpoints(&self, filename: Option<&str>) {
        let mut breakpoints = lock(&self.shared.breakpoints);
        match filename {
            Some(filename) if !filename.is_empty() => breakpoints.clear_file(filename),
            _ => breakpoints.clear(),
        }
    }

    pub fn is_breakpoint(&self, filename: &str, line: usize) -> bool {
        self.shared.is_breakpoint(filename, line)
    }

    pub fn breakpoints(&self) -> Vec<Breakpoint> {
        lock(&self.shared.breakpoints).list()
    }

    /// Apply a control request to the current run.
    pub fn dispatch_current(&self, request: ControlRequest) -> Result<Dispatch> {
        let run = self.current().ok_or(RunnerError::NoCurrentRun)?;
        self.dispatch(&run, request)
    }

    /// Apply one control request to `run`.
    pub fn dispatch(&self, run: &RunningScript, request: ControlRequest) -> Result<Dispatch> {
        if request.is_command() && request != ControlRequest::Shutdown {
            let json = serde_json::to_string(&request)?;
            run.scriptrunner_puts(
                &format!("Script {} received command: {}", run.filename(), json),
                OutputColor::Black,
            );
        }
        match request {
            ControlRequest::Go => run.go(),
            ControlRequest::Step => run.step(),
            ControlRequest::Pause => run.pause(),
            ControlRequest::Retry => run.retry(),
            ControlRequest::Stop => {
                run.stop();
                return Ok(Dispatch::Shutdown);
            }
            ControlRequest::Shutdown => return Ok(Dispatch::Shutdown),
            ControlRequest::SetBreakpoint { filename, line } => self.set_breakpoint(&filename, line),
            ControlRequest::ClearBreakpoint { filename, line } => {
                self.clear_breakpoint(&filename, line)
            }
            ControlRequest::ClearBreakpoints { filename } => {
                self.clear_breakpoints(filename.as_deref())
            }
            ControlRequest::SetText { text, filename } => run.set_text(&text, &filename)?,
            ControlRequest::Answer { prompt_id, answer } => run.answer(&prompt_id, answer),
            ControlRequest::Backtrace => {
                let frames = run.backtrace();
                self.shared.publish(run.id(), &RunEvent::Backtrace { frames });
            }
        }
        Ok(Dispatch::Continue)
    }
}
