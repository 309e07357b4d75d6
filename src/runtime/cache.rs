//! Instrumentation and script text caches.
//!
//! The file cache is shared by every run of a runner and keyed by filename;
//! the top-level entry is owned by one run and only hits when text, line
//! offset and filename all match.

use super::instrumentation::Instrumenter;
use crate::Result;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Mutex;

#[derive(Debug, Clone, Default)]
pub struct CacheEntry {
    pub original_text: String,
    pub instrumented_text: Option<String>,
}

/// Per-filename cache of script text and its instrumented form.
#[derive(Debug)]
pub struct FileCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    instrumenter: Instrumenter,
}

impl FileCache {
    pub fn new() -> Result<Self> {
        Ok(Self {
            entries: Mutex::new(HashMap::new()),
            instrumenter: Instrumenter::new()?,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn instrumenter(&self) -> &Instrumenter {
        &self.instrumenter
    }

    /// Cached original text of `filename`.
    pub fn text(&self, filename: &str) -> Option<String> {
        self.lock()
            .get(filename)
            .map(|entry| entry.original_text.clone())
    }

    /// Record text for `filename`, dropping a stale instrumented form.
    pub fn insert_text(&self, filename: &str, text: &str) {
        let mut entries = self.lock();
        let entry = entries.entry(filename.to_string()).or_default();
        if entry.original_text != text {
            entry.original_text = text.to_string();
            entry.instrumented_text = None;
        }
    }

    /// Instrumented form of `text`, instrumenting on first use.
    ///
    /// `Ok(None)` means the pass was cancelled.
    pub fn instrumented(
        &self,
        filename: &str,
        text: &str,
        mark_private: bool,
        cancel: &AtomicBool,
    ) -> Result<Option<String>> {
        {
            let entries = self.lock();
            if let Some(entry) = entries.get(filename) {
                if entry.original_text == text {
                    if let Some(instrumented) = &entry.instrumented_text {
                        return Ok(Some(instrumented.clone()));
                    }
                }
            }
        }

        let Some(instrumented) =
            self.instrumenter
                .instrument_cancellable(text, filename, mark_private, cancel)?
        else {
            return Ok(None);
        };

        self.lock().insert(
            filename.to_string(),
            CacheEntry {
                original_text: text.to_string(),
                instrumented_text: Some(instrumented.clone()),
            },
        );
        Ok(Some(instrumented))
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.lock().contains_key(filename)
    }

    pub fn remove(&self, filename: &str) {
        self.lock().remove(filename);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

/// Single-slot cache of one run's top-level instrumented text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopLevelEntry {
    pub text: String,
    pub line_offset: usize,
    pub filename: String,
    pub instrumented: String,
}

impl TopLevelEntry {
    pub fn matches(&self, text: &str, line_offset: usize, filename: &str) -> bool {
        self.text == text && self.line_offset == line_offset && self.filename == filename
    }
}
