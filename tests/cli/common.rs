#![allow(dead_code)]

use assert_cmd::Command;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A script root with a configuration file that disables line delay and
/// pausing on errors.
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("runner.toml"),
            "line_delay = 0.0\npause_on_error = false\n",
        )
        .unwrap();
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn config(&self) -> PathBuf {
        self.dir.path().join("runner.toml")
    }

    pub fn script(&self, name: &str, text: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, text).unwrap();
        path
    }

    /// `script-runner --config <cfg> run <name> --root <dir>`
    pub fn run(&self, name: &str) -> Command {
        let mut cmd = cmd();
        cmd.arg("--config")
            .arg(self.config())
            .arg("run")
            .arg(name)
            .arg("--root")
            .arg(self.root());
        cmd
    }
}

pub fn cmd() -> Command {
    let mut cmd = Command::cargo_bin("script-runner").unwrap();
    cmd.env_remove("RUST_LOG").env_remove("SCRIPT_RUNNER_CONFIG");
    cmd
}

/// Parse stdout as JSON lines.
pub fn events(stdout: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(stdout)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).unwrap_or_else(|e| panic!("{}: {}", e, line)))
        .collect()
}

pub fn output_lines(events: &[Value]) -> Vec<String> {
    events
        .iter()
        .filter(|event| event["type"] == "output")
        .filter_map(|event| event["line"].as_str().map(str::to_string))
        .collect()
}
