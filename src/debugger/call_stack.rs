/// Ordered list of files entered by the running script; the last entry is
/// the file currently executing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallStack {
    frames: Vec<String>,
}

/// What [`CallStack::enter`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSwitch {
    /// The file was pushed as a new frame.
    Pushed,
    /// The file was already on the stack; frames above it were dropped.
    Returned,
}

impl CallStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn top(&self) -> Option<&str> {
        self.frames.last().map(String::as_str)
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.frames.iter().any(|frame| frame == filename)
    }

    /// Make `filename` the active frame.
    pub fn enter(&mut self, filename: &str) -> FileSwitch {
        match self.frames.iter().rposition(|frame| frame == filename) {
            Some(index) => {
                self.frames.truncate(index + 1);
                FileSwitch::Returned
            }
            None => {
                self.frames.push(filename.to_string());
                FileSwitch::Pushed
            }
        }
    }

    pub fn reset(&mut self, filename: &str) {
        self.frames.clear();
        self.frames.push(filename.to_string());
    }

    /// Frames from innermost to outermost.
    pub fn backtrace(&self) -> Vec<String> {
        self.frames.iter().rev().cloned().collect()
    }

    pub fn frames(&self) -> &[String] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
