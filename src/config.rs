//! Runner configuration.
//!
//! Loaded from TOML; every field has a default so an absent or partial file
//! is valid. Without an explicit path the runner looks for
//! `<config dir>/script-runner/config.toml`.

use crate::{Result, RunnerError};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Seconds slept after every statement.
    pub line_delay: f64,
    pub pause_on_error: bool,
    pub continue_after_error: bool,
    /// Watch telemetry limits while a script runs.
    pub monitor_limits: bool,
    /// Pause the running script when a limit turns red.
    pub pause_on_red: bool,
    pub stdout_max_lines: usize,
    /// Seconds of output inactivity before the idle flush.
    pub output_idle_flush: f64,
    pub script_root: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    /// Environment variables forwarded to spawned runs.
    pub forward_env: Vec<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            line_delay: 0.1,
            pause_on_error: true,
            continue_after_error: true,
            monitor_limits: false,
            pause_on_red: false,
            stdout_max_lines: 1000,
            output_idle_flush: 5.0,
            script_root: None,
            log_dir: None,
            forward_env: vec![
                "SCRIPT_API_USER".to_string(),
                "SCRIPT_API_PASSWORD".to_string(),
                "SCRIPT_API_TOKEN".to_string(),
            ],
        }
    }
}

impl RunnerConfig {
    /// Default location of the configuration file.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("script-runner").join("config.toml"))
    }

    /// Load from `path`, or from the default location when it exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => {
                    debug!("No configuration file, using defaults");
                    return Ok(Self::default());
                }
            },
        };
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_toml(&text)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| RunnerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !self.line_delay.is_finite() || self.line_delay < 0.0 {
            return Err(RunnerError::Config(format!(
                "line_delay must be a non-negative number of seconds, got {}",
                self.line_delay
            ))
            .into());
        }
        if !self.output_idle_flush.is_finite() || self.output_idle_flush <= 0.0 {
            return Err(RunnerError::Config(format!(
                "output_idle_flush must be positive, got {}",
                self.output_idle_flush
            ))
            .into());
        }
        if self.stdout_max_lines == 0 {
            return Err(RunnerError::Config("stdout_max_lines must be at least 1".into()).into());
        }
        Ok(())
    }

    pub fn line_delay(&self) -> Duration {
        Duration::from_secs_f64(self.line_delay)
    }

    pub fn output_idle_flush(&self) -> Duration {
        Duration::from_secs_f64(self.output_idle_flush)
    }
}

/// Per-run options, as named by the operator when starting a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSettings {
    pub manual: bool,
    pub pause_on_error: Option<bool>,
    pub continue_after_error: Option<bool>,
    pub loop_: bool,
    pub break_loop_on_error: bool,
}

impl RunSettings {
    /// Parse option words such as `pauseOnError` or `abortAfterError`.
    pub fn from_options<S: AsRef<str>>(options: &[S]) -> Result<Self> {
        let mut settings = Self::default();
        for option in options {
            match option.as_ref().trim() {
                "" => {}
                "manual" => settings.manual = true,
                "pauseOnError" => settings.pause_on_error = Some(true),
                "continueAfterError" => settings.continue_after_error = Some(true),
                "abortAfterError" => settings.continue_after_error = Some(false),
                "loop" => settings.loop_ = true,
                "breakLoopOnError" => settings.break_loop_on_error = true,
                other => {
                    return Err(RunnerError::Config(format!("Unknown run option: {}", other)).into())
                }
            }
        }
        Ok(settings)
    }

    /// Option words in their wire spelling, for reports.
    pub fn to_options(&self) -> Vec<&'static str> {
        let mut options = Vec::new();
        if self.manual {
            options.push("manual");
        }
        if self.pause_on_error == Some(true) {
            options.push("pauseOnError");
        }
        match self.continue_after_error {
            Some(true) => options.push("continueAfterError"),
            Some(false) => options.push("abortAfterError"),
            None => {}
        }
        if self.loop_ {
            options.push("loop");
        }
        if self.break_loop_on_error {
            options.push("breakLoopOnError");
        }
        options
    }
}
