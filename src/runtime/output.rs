//! Output capture and formatting.
//!
//! Script output accumulates in an [`OutputBuffer`] and is only published
//! once it ends with a newline. Each published line is timestamped and
//! attributed to the statement that produced it, unless it already carries
//! a structured log prefix.

use crate::protocol::OutputColor;
use anyhow::Context;
use chrono::{DateTime, Local};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

/// Timestamp format of every published line.
pub const TIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S%.3f";

#[derive(Debug)]
struct BufferState {
    text: String,
    last_write: Instant,
}

/// Lock-guarded output accumulator of one run.
#[derive(Debug)]
pub struct OutputBuffer {
    state: Mutex<BufferState>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BufferState {
                text: String::new(),
                last_write: Instant::now(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn write(&self, text: &str) {
        let mut state = self.lock();
        state.text.push_str(text);
        state.last_write = Instant::now();
    }

    pub fn write_line(&self, text: &str) {
        let mut state = self.lock();
        state.text.push_str(text);
        state.text.push('\n');
        state.last_write = Instant::now();
    }

    /// Take the buffered text if it ends on a line boundary.
    pub fn take_complete(&self) -> Option<String> {
        let mut state = self.lock();
        state.last_write = Instant::now();
        if state.text.ends_with('\n') {
            Some(std::mem::take(&mut state.text))
        } else {
            None
        }
    }

    pub fn idle_for(&self) -> Duration {
        self.lock().last_write.elapsed()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().text.is_empty()
    }

    pub fn clear(&self) {
        self.lock().text.clear();
    }
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// `std::io::Write` adapter over a shared [`OutputBuffer`].
pub struct OutputWriter<'a>(pub &'a OutputBuffer);

impl Write for OutputWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(&String::from_utf8_lossy(buf));
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// One published output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub line: String,
    pub color: OutputColor,
    /// The line was passed through verbatim as an existing log entry.
    pub structured: bool,
}

/// Lines already formatted as `YYYY/MM/DD HH:MM:SS.mmm (...`.
fn is_structured(line: &str) -> bool {
    let bytes = line.as_bytes();
    bytes.len() >= 25 && bytes.starts_with(b"20") && bytes[10] == b' ' && &bytes[23..25] == b" ("
}

fn color_of(line: &str, default: OutputColor) -> OutputColor {
    if line.starts_with("ERROR:") {
        OutputColor::Red
    } else if line.starts_with("WARN:") {
        OutputColor::Yellow
    } else {
        default
    }
}

/// Unwrap a JSON log record, returning its message and timestamp if present.
fn unwrap_json(line: &str) -> Option<(Option<String>, Option<String>)> {
    if !line.trim_start().starts_with('{') {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    let object = value.as_object()?;
    let log = object.get("log").and_then(|v| v.as_str()).map(str::to_string);
    let timestamp = object
        .get("@timestamp")
        .and_then(|v| v.as_str())
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .map(|ts| ts.with_timezone(&Local).format(TIME_FORMAT).to_string());
    Some((log, timestamp))
}

/// Format buffered output into published lines.
///
/// `location` is the `(filename, line)` the output is attributed to;
/// `None` marks engine messages. At most `max_lines` lines are produced,
/// followed by one red truncation warning when more were written.
pub fn format_output(
    text: &str,
    location: Option<(&str, usize)>,
    max_lines: usize,
    now: DateTime<Local>,
) -> Vec<OutputLine> {
    let now_formatted = now.format(TIME_FORMAT).to_string();
    let prefix = |time: &str| match location {
        Some((filename, line)) => {
            let base = Path::new(filename)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| filename.to_string());
            format!("{} ({}:{}): ", time, base, line)
        }
        None => format!("{} (SCRIPTRUNNER): ", time),
    };
    let default_color = if location.is_some() {
        OutputColor::Black
    } else {
        OutputColor::Blue
    };

    let mut lines = Vec::new();
    for raw in text.lines() {
        if lines.len() >= max_lines {
            lines.push(OutputLine {
                line: format!(
                    "{}ERROR: Too much written to stdout.  Truncating output to {} lines.",
                    prefix(&now_formatted),
                    max_lines
                ),
                color: OutputColor::Red,
                structured: false,
            });
            break;
        }

        let mut out = raw.to_string();
        let mut time = now_formatted.clone();
        if let Some((log, timestamp)) = unwrap_json(raw) {
            if let Some(log) = log {
                out = log;
            }
            if let Some(timestamp) = timestamp {
                time = timestamp;
            }
        }

        if is_structured(&out) {
            lines.push(OutputLine {
                color: color_of(&out, OutputColor::Black),
                line: out,
                structured: true,
            });
        } else {
            lines.push(OutputLine {
                color: color_of(&out, default_color),
                line: format!("{}{}", prefix(&time), out),
                structured: false,
            });
        }
    }
    lines
}

/// Durable record of everything a run published.
///
/// Lines go to a file under the configured log directory, or are kept in
/// memory when there is none.
#[derive(Debug)]
pub struct MessageLog {
    script_name: String,
    dir: Option<PathBuf>,
    file: Option<(PathBuf, File)>,
    contents: String,
}

impl MessageLog {
    pub fn new(script_name: &str, dir: Option<PathBuf>) -> Self {
        Self {
            script_name: script_name.to_string(),
            dir,
            file: None,
            contents: String::new(),
        }
    }

    fn open(&mut self) -> crate::Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
        let base = Path::new(&self.script_name)
            .file_name()
            .map(|name| name.to_string_lossy().replace('.', "_"))
            .unwrap_or_else(|| "script".to_string());
        let stamp = Local::now().format("%Y_%m_%d_%H_%M_%S");
        let path = dir.join(format!("{}_sr_{}.txt", stamp, base));
        let file = File::create(&path)
            .with_context(|| format!("Failed to create message log {}", path.display()))?;
        self.file = Some((path, file));
        Ok(())
    }

    pub fn write_lines<'a>(&mut self, lines: impl IntoIterator<Item = &'a str>) {
        let mut chunk = String::new();
        for line in lines {
            chunk.push_str(line);
            chunk.push('\n');
        }
        if chunk.is_empty() {
            return;
        }
        if self.file.is_none() && self.dir.is_some() {
            if let Err(e) = self.open() {
                warn!("Message log unavailable: {:#}", e);
                self.dir = None;
            }
        }
        if let Some((path, file)) = &mut self.file {
            if let Err(e) = file.write_all(chunk.as_bytes()) {
                warn!("Failed to write message log {}: {}", path.display(), e);
            }
        }
        self.contents.push_str(&chunk);
    }

    pub fn path(&self) -> Option<&Path> {
        self.file.as_ref().map(|(path, _)| path.as_path())
    }

    pub fn contents(&self) -> &str {
        &self.contents
    }

    /// Close the log, returning everything written to it.
    pub fn stop(&mut self) -> String {
        if let Some((path, mut file)) = self.file.take() {
            if let Err(e) = file.flush() {
                warn!("Failed to flush message log {}: {}", path.display(), e);
            }
        }
        std::mem::take(&mut self.contents)
    }
}
