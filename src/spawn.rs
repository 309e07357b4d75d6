//! Launching runs in their own process.

use crate::config::{RunSettings, RunnerConfig};
use crate::protocol::ControlRequest;
use crate::runtime::lock;
use crate::{Result, RunnerError};
use anyhow::Context;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{debug, info};

/// Variables every child needs to start at all.
const BASE_ENV: [&str; 9] = [
    "PATH",
    "HOME",
    "USERPROFILE",
    "SYSTEMROOT",
    "TMPDIR",
    "TEMP",
    "TMP",
    "LANG",
    "RUST_LOG",
];

/// A script to run in a new process.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub name: String,
    pub scope: Option<String>,
    pub disconnect: bool,
    pub settings: RunSettings,
    pub line_delay: Option<f64>,
    pub root: Option<PathBuf>,
    /// Set in the child's environment as given.
    pub env: Vec<(String, String)>,
}

impl RunRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Starts `<program> run ...` child processes and holds on to them.
///
/// Each child reads control requests from its stdin, which stays piped to
/// the spawner until the child is waited for.
pub struct RunSpawner {
    program: PathBuf,
    config: RunnerConfig,
    config_path: Option<PathBuf>,
    capture_output: bool,
    next_id: AtomicU64,
    children: Mutex<HashMap<u64, Child>>,
}

impl RunSpawner {
    pub fn new(program: impl Into<PathBuf>, config: RunnerConfig) -> Self {
        Self {
            program: program.into(),
            config,
            config_path: None,
            capture_output: false,
            next_id: AtomicU64::new(1),
            children: Mutex::new(HashMap::new()),
        }
    }

    /// Spawner for the running executable.
    pub fn current_exe(config: RunnerConfig) -> Result<Self> {
        let program =
            std::env::current_exe().map_err(|e| RunnerError::Spawn(e.to_string()))?;
        Ok(Self::new(program, config))
    }

    /// Pass `--config <path>` to every child.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Pipe each child's event stream back instead of inheriting stdout.
    pub fn with_captured_output(mut self) -> Self {
        self.capture_output = true;
        self
    }

    /// Allocate a run id and start the child. Returns the id.
    pub fn spawn(&self, request: &RunRequest) -> Result<u64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut command = self.command(id, request);
        command.stdin(Stdio::piped());
        if self.capture_output {
            command.stdout(Stdio::piped());
        }
        let child = command
            .spawn()
            .map_err(|e| RunnerError::Spawn(format!("{}: {}", self.program.display(), e)))?;
        info!("Spawned run {} of {} as process {}", id, request.name, child.id());
        lock(&self.children).insert(id, child);
        Ok(id)
    }

    /// Write `request` as one JSON line to the control input of run `id`.
    pub fn send(&self, id: u64, request: &ControlRequest) -> Result<()> {
        let line = serde_json::to_string(request)
            .map_err(|e| RunnerError::Protocol(e.to_string()))?;
        let mut children = lock(&self.children);
        let child = children.get_mut(&id).ok_or(RunnerError::UnknownRun(id))?;
        let stdin = child
            .stdin
            .as_mut()
            .ok_or_else(|| RunnerError::Spawn(format!("run {} has no control input", id)))?;
        writeln!(stdin, "{}", line)
            .and_then(|_| stdin.flush())
            .with_context(|| format!("Failed to send {} to run {}", line, id))?;
        debug!("Sent {} to run {}", line, id);
        Ok(())
    }

    /// Event stream of run `id`, when output is captured. Can be taken once.
    pub fn take_output(&self, id: u64) -> Result<Option<ChildStdout>> {
        let mut children = lock(&self.children);
        let child = children.get_mut(&id).ok_or(RunnerError::UnknownRun(id))?;
        Ok(child.stdout.take())
    }

    /// Ids of the children not yet waited for.
    pub fn running(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = lock(&self.children).keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Wait for run `id` to exit and reap it.
    ///
    /// The control input stays open while waiting; a run that is blocked
    /// on the operator only ends on a request sent before this call.
    pub fn wait(&self, id: u64) -> Result<ExitStatus> {
        let mut child = lock(&self.children)
            .remove(&id)
            .ok_or(RunnerError::UnknownRun(id))?;
        let status = child
            .wait()
            .with_context(|| format!("Failed to wait for run {}", id))?;
        info!("Run {} exited with {}", id, status);
        Ok(status)
    }

    /// Close the control input of run `id`. The child stops a run that is
    /// blocked on the operator once its input is closed.
    pub fn close_input(&self, id: u64) -> Result<()> {
        let mut children = lock(&self.children);
        let child = children.get_mut(&id).ok_or(RunnerError::UnknownRun(id))?;
        drop(child.stdin.take());
        Ok(())
    }

    /// The command line and environment of run `id`.
    pub fn command(&self, id: u64, request: &RunRequest) -> Command {
        let mut command = Command::new(&self.program);
        if let Some(path) = &self.config_path {
            command.arg("--config").arg(path);
        }
        command
            .arg("run")
            .arg(&request.name)
            .arg("--id")
            .arg(id.to_string())
            .arg("--scope")
            .arg(request.scope.as_deref().unwrap_or("DEFAULT"));
        if let Some(root) = request.root.as_ref().or(self.config.script_root.as_ref()) {
            command.arg("--root").arg(root);
        }
        if let Some(delay) = request.line_delay {
            command.arg("--line-delay").arg(delay.to_string());
        }
        let options = request.settings.to_options();
        if !options.is_empty() {
            command.arg("--options").arg(options.join(","));
        }
        if request.disconnect {
            command.arg("--disconnect");
        }

        command.env_clear();
        let forwarded = BASE_ENV
            .iter()
            .copied()
            .chain(self.config.forward_env.iter().map(String::as_str));
        for name in forwarded {
            if let Ok(value) = std::env::var(name) {
                command.env(name, value);
            }
        }
        for (key, value) in &request.env {
            command.env(key, value);
        }
        command
    }
}
