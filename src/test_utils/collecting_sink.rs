//! A sink that accumulates report lines in memory for test assertions.
//!
//! Shared across the test modules so each one does not need its own copy
//! of the same boilerplate.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::report::LogSink;
use crate::severity::Severity;

/// Sink storing every line it receives for later inspection.
#[derive(Clone, Default)]
pub struct CollectingSink {
    lines: Arc<Mutex<Vec<(Severity, String)>>>,
}

impl CollectingSink {
    /// Create a new empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every `(severity, line)` pair received so far.
    pub fn collected(&self) -> Vec<(Severity, String)> {
        self.lines.lock().clone()
    }

    /// Lines rendered the way the stderr sink prints them.
    pub fn rendered(&self) -> Vec<String> {
        self.lines
            .lock()
            .iter()
            .map(|(severity, line)| format!("{}{}", severity.header(), line))
            .collect()
    }
}

impl LogSink for CollectingSink {
    fn write_line(&self, severity: Severity, line: &str) {
        self.lines.lock().push((severity, line.to_string()));
    }
}
