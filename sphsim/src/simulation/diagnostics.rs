//! Diagnostics channel
//!
//! The core reports missing attributes and numerical failures as
//! `(Severity, message)` pairs to a `DiagnosticSink`. Nothing reported
//! here ever aborts the host process.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Receiver for diagnostics
pub trait DiagnosticSink: Send + Sync {
    fn report(&self, severity: Severity, message: &str);
}

/// Default sink, forwards to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Info => tracing::info!(target: "sphsim::diagnostics", "{message}"),
            Severity::Warning => tracing::warn!(target: "sphsim::diagnostics", "{message}"),
            Severity::Error => tracing::error!(target: "sphsim::diagnostics", "{message}"),
        }
    }
}

/// Sink that keeps every report in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<(Severity, String)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(Severity, String)> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Number of reports whose message contains `needle`
    pub fn count_containing(&self, needle: &str) -> usize {
        self.entries()
            .iter()
            .filter(|(_, msg)| msg.contains(needle))
            .count()
    }
}

impl DiagnosticSink for MemorySink {
    fn report(&self, severity: Severity, message: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push((severity, message.to_owned()));
        }
    }
}

/// Sink plus "report once" bookkeeping, shared by every component of a solver.
pub struct Diagnostics {
    sink: Arc<dyn DiagnosticSink>,
    seen: Mutex<HashSet<String>>,
}

impl Diagnostics {
    pub fn new(sink: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            sink,
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Diagnostics forwarded to `tracing`
    pub fn tracing() -> Arc<Self> {
        Arc::new(Self::new(Arc::new(TracingSink)))
    }

    pub fn report(&self, severity: Severity, message: &str) {
        self.sink.report(severity, message);
    }

    /// Report only the first time `key` is seen since the last `reset_once`.
    /// Returns true when the report went out.
    pub fn report_once(&self, key: &str, severity: Severity, message: &str) -> bool {
        let fresh = match self.seen.lock() {
            Ok(mut seen) => seen.insert(key.to_owned()),
            Err(_) => true,
        };
        if fresh {
            self.sink.report(severity, message);
        }
        fresh
    }

    /// Forget the "once" keys; called at the start of every outer step
    pub fn reset_once(&self) {
        if let Ok(mut seen) = self.seen.lock() {
            seen.clear();
        }
    }
}

impl std::fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Diagnostics").finish_non_exhaustive()
    }
}
