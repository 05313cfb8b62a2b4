//! Sinks for election diagnostics.
//!
//! Every reply that disqualifies a candidate produces exactly one
//! human-readable line. Where that line goes is up to the caller: the
//! default [`TracingSink`] forwards it to `tracing`, while tests attach a
//! private [`CapturedLog`] so assertions never share state.

use std::sync::{Arc, Mutex};

/// Anything that accepts formatted diagnostic lines.
pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, line: &str);
}

/// Forwards diagnostics to `tracing` at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&self, line: &str) {
        tracing::info!(target: "replset::election", "{line}");
    }
}

/// Collects diagnostic lines in memory.
///
/// Cloning shares the underlying buffer, so one clone can be handed to the
/// checker while the other is inspected.
#[derive(Debug, Default, Clone)]
pub struct CapturedLog {
    lines: Arc<Mutex<Vec<String>>>,
}

impl CapturedLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every line captured so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Counts captured lines containing `needle`.
    pub fn count_containing(&self, needle: &str) -> usize {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|l| l.contains(needle))
            .count()
    }
}

impl DiagnosticSink for CapturedLog {
    fn emit(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(line.to_owned());
    }
}
