//! Script storage.
//!
//! The runner never touches the filesystem for script text directly; it
//! goes through a [`ScriptStore`]. This module provides the trait plus a
//! directory-backed store for the CLI and an in-memory store for embedding
//! and tests.

use crate::{Result, RunnerError};
use anyhow::Context;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

/// Default extension tried when a script name has none.
pub const SCRIPT_EXTENSION: &str = "rhai";

/// Storage collaborator of the runner.
pub trait ScriptStore: Send + Sync {
    /// Text of the script called `name`.
    fn body(&self, name: &str) -> Result<String>;

    /// Persisted breakpoints of `name` as 0-based rows.
    fn breakpoints(&self, _name: &str) -> Result<Vec<usize>> {
        Ok(Vec::new())
    }

    fn save_report(&self, name: &str, report: &[u8]) -> Result<()>;

    fn save_log(&self, _name: &str, _log: &str) -> Result<()> {
        Ok(())
    }
}

/// Look `name` up, retrying with the default extension.
pub fn fetch_script(store: &dyn ScriptStore, name: &str) -> Result<String> {
    fetch_named(store, name).map(|(_, text)| text)
}

/// Like [`fetch_script`], also returning the name the text was found under.
pub fn fetch_named(store: &dyn ScriptStore, name: &str) -> Result<(String, String)> {
    match store.body(name) {
        Ok(text) => Ok((name.to_string(), text)),
        Err(first) => {
            if Path::new(name).extension().is_some() {
                return Err(first);
            }
            let with_extension = format!("{}.{}", name, SCRIPT_EXTENSION);
            match store.body(&with_extension) {
                Ok(text) => Ok((with_extension, text)),
                Err(_) => Err(first),
            }
        }
    }
}

/// Scripts stored as files below a root directory.
///
/// Breakpoints live next to each script in `<name>.breakpoints` (a JSON
/// array of rows); reports and logs go to `reports/` and `logs/`.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, name: &str) -> Result<PathBuf> {
        let relative = Path::new(name);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes || name.is_empty() {
            return Err(RunnerError::ScriptNotFound(name.to_string()).into());
        }
        Ok(self.root.join(relative))
    }

    fn artifact_path(&self, dir: &str, name: &str, extension: &str) -> PathBuf {
        let flat = name.replace(['/', '\\'], "_");
        let stamp = chrono::Local::now().format("%Y_%m_%d_%H_%M_%S");
        self.root
            .join(dir)
            .join(format!("{}_{}.{}", stamp, flat, extension))
    }

    fn write_artifact(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, bytes)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Saved {}", path.display());
        Ok(())
    }
}

impl ScriptStore for DirectoryStore {
    fn body(&self, name: &str) -> Result<String> {
        let path = self.resolve(name)?;
        if !path.is_file() {
            return Err(RunnerError::ScriptNotFound(name.to_string()).into());
        }
        debug!("Reading script {}", path.display());
        std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read script {}", path.display()))
    }

    fn breakpoints(&self, name: &str) -> Result<Vec<usize>> {
        let mut path = self.resolve(name)?.into_os_string();
        path.push(".breakpoints");
        let path = PathBuf::from(path);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&text)
            .map_err(|e| RunnerError::Storage(format!("{}: {}", path.display(), e)).into())
    }

    fn save_report(&self, name: &str, report: &[u8]) -> Result<()> {
        let path = self.artifact_path("reports", name, "json");
        self.write_artifact(&path, report)
    }

    fn save_log(&self, name: &str, log: &str) -> Result<()> {
        if log.is_empty() {
            return Ok(());
        }
        let path = self.artifact_path("logs", name, "txt");
        self.write_artifact(&path, log.as_bytes())
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    scripts: HashMap<String, String>,
    breakpoints: HashMap<String, Vec<usize>>,
    reports: Vec<(String, Vec<u8>)>,
    logs: Vec<(String, String)>,
}

/// Scripts held in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn with_script(self, name: &str, text: &str) -> Self {
        self.insert(name, text);
        self
    }

    pub fn insert(&self, name: &str, text: &str) {
        self.lock().scripts.insert(name.to_string(), text.to_string());
    }

    pub fn set_breakpoints(&self, name: &str, rows: Vec<usize>) {
        self.lock().breakpoints.insert(name.to_string(), rows);
    }

    pub fn reports(&self) -> Vec<(String, Vec<u8>)> {
        self.lock().reports.clone()
    }

    pub fn logs(&self) -> Vec<(String, String)> {
        self.lock().logs.clone()
    }
}

impl ScriptStore for MemoryStore {
    fn body(&self, name: &str) -> Result<String> {
        self.lock()
            .scripts
            .get(name)
            .cloned()
            .ok_or_else(|| RunnerError::ScriptNotFound(name.to_string()).into())
    }

    fn breakpoints(&self, name: &str) -> Result<Vec<usize>> {
        Ok(self.lock().breakpoints.get(name).cloned().unwrap_or_default())
    }

    fn save_report(&self, name: &str, report: &[u8]) -> Result<()> {
        self.lock().reports.push((name.to_string(), report.to_vec()));
        Ok(())
    }

    fn save_log(&self, name: &str, log: &str) -> Result<()> {
        self.lock().logs.push((name.to_string(), log.to_string()));
        Ok(())
    }
}
