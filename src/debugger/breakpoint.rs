use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A single line breakpoint.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Breakpoint {
    pub filename: String,
    pub line: usize,
}

impl fmt::Display for Breakpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.filename, self.line)
    }
}

/// Manages line breakpoints across runs.
///
/// Lines are 1-based. The table lives on the runner, not on a run, so
/// breakpoints survive between runs until explicitly cleared.
#[derive(Debug, Clone)]
pub struct BreakpointManager {
    breakpoints: BTreeMap<String, BTreeSet<usize>>,
}

impl BreakpointManager {
    /// Create a new breakpoint manager
    pub fn new() -> Self {
        Self {
            breakpoints: BTreeMap::new(),
        }
    }

    /// Add a breakpoint at `filename:line`
    pub fn add(&mut self, filename: &str, line: usize) {
        self.breakpoints
            .entry(filename.to_string())
            .or_default()
            .insert(line);
    }

    /// Remove a breakpoint, returning whether it existed.
    ///
    /// The file keeps its (possibly empty) entry, so stored breakpoints are
    /// not loaded for it again.
    pub fn remove(&mut self, filename: &str, line: usize) -> bool {
        self.breakpoints
            .get_mut(filename)
            .is_some_and(|lines| lines.remove(&line))
    }

    /// Record `filename` as known without adding a breakpoint.
    pub fn touch(&mut self, filename: &str) {
        self.breakpoints.entry(filename.to_string()).or_default();
    }

    /// Check if execution should break at this position
    pub fn should_break(&self, filename: &str, line: usize) -> bool {
        self.breakpoints
            .get(filename)
            .is_some_and(|lines| lines.contains(&line))
    }

    /// Whether `filename` has an entry, even an empty one.
    pub fn has_file(&self, filename: &str) -> bool {
        self.breakpoints.contains_key(filename)
    }

    /// Breakpoint lines of one file, 1-based and ascending.
    pub fn lines(&self, filename: &str) -> Vec<usize> {
        self.breakpoints
            .get(filename)
            .map(|lines| lines.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Breakpoint lines of one file as 0-based editor rows.
    pub fn rows(&self, filename: &str) -> Vec<usize> {
        self.lines(filename)
            .into_iter()
            .map(|line| line.saturating_sub(1))
            .collect()
    }

    /// Insert persisted 0-based rows for `filename`.
    pub fn load_rows(&mut self, filename: &str, rows: &[usize]) {
        for row in rows {
            self.add(filename, row + 1);
        }
    }

    /// Move every breakpoint of `from` to `to`, unless `to` already has some.
    pub fn migrate(&mut self, from: &str, to: &str) -> bool {
        if from == to || !self.lines(to).is_empty() {
            return false;
        }
        match self.breakpoints.remove(from) {
            Some(lines) => {
                self.breakpoints.insert(to.to_string(), lines);
                true
            }
            None => false,
        }
    }

    /// List all breakpoints
    pub fn list(&self) -> Vec<Breakpoint> {
        self.breakpoints
            .iter()
            .flat_map(|(filename, lines)| {
                lines.iter().map(move |line| Breakpoint {
                    filename: filename.clone(),
                    line: *line,
                })
            })
            .collect()
    }

    /// Clear the breakpoints of one file
    pub fn clear_file(&mut self, filename: &str) {
        self.breakpoints.remove(filename);
    }

    /// Clear all breakpoints
    pub fn clear(&mut self) {
        self.breakpoints.clear();
    }

    /// Check if there are any breakpoints set
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Get count of breakpoints
    pub fn count(&self) -> usize {
        self.breakpoints.values().map(BTreeSet::len).sum()
    }
}

impl Default for BreakpointManager {
    fn default() -> Self {
        Self::new()
    }
}
