//! Per-run diagnostics log.
//!
//! Every run accumulates a bounded history of log lines alongside what it
//! sends to `tracing`, so a caller can attach the trail of a failed or odd
//! run to a bug report. The snapshot travels with every result variant.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::stage::Stage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

/// One diagnostics line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Milliseconds since the run started
    pub elapsed_ms: u64,
    pub level: LogLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    pub message: String,
}

/// Exported diagnostics of one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunDiagnostics {
    pub run_id: u64,
    pub entries: Vec<LogEntry>,
    /// Oldest entries evicted once the history was full
    pub dropped_entries: u64,
}

impl RunDiagnostics {
    /// Plain text, one line per entry
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        if self.dropped_entries > 0 {
            let _ = writeln!(out, "[run {}] {} earlier entries dropped", self.run_id, self.dropped_entries);
        }
        for entry in &self.entries {
            let _ = writeln!(
                out,
                "[run {}] +{:>7}ms {:<5} {:<16} {}",
                self.run_id,
                entry.elapsed_ms,
                entry.level.as_str(),
                entry.stage.map(|s| s.as_str()).unwrap_or("-"),
                entry.message
            );
        }
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Entries at or above `level`
    pub fn at_least(&self, level: LogLevel) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().filter(move |e| e.level >= level)
    }
}

/// Bounded, thread-safe log shared by the coordinator and its stage tasks
#[derive(Debug)]
pub struct RunLog {
    run_id: u64,
    started: Instant,
    capacity: usize,
    entries: Mutex<VecDeque<LogEntry>>,
    dropped: AtomicU64,
}

impl RunLog {
    pub fn new(run_id: u64, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            run_id,
            started: Instant::now(),
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn record(&self, level: LogLevel, stage: Option<Stage>, message: impl Into<String>) {
        let entry = LogEntry {
            elapsed_ms: self.elapsed_ms(),
            level,
            stage,
            message: message.into(),
        };

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.len() == self.capacity {
            entries.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        entries.push_back(entry);
    }

    pub fn info(&self, stage: Option<Stage>, message: impl Into<String>) {
        self.record(LogLevel::Info, stage, message);
    }

    pub fn warn(&self, stage: Option<Stage>, message: impl Into<String>) {
        self.record(LogLevel::Warn, stage, message);
    }

    pub fn error(&self, stage: Option<Stage>, message: impl Into<String>) {
        self.record(LogLevel::Error, stage, message);
    }

    pub fn snapshot(&self) -> RunDiagnostics {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        RunDiagnostics {
            run_id: self.run_id,
            entries: entries.iter().cloned().collect(),
            dropped_entries: self.dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_in_order() {
        let log = RunLog::new(7, 16);
        log.info(None, "accepted");
        log.warn(Some(Stage::TempoEstimation), "ambiguous tempo");

        let snapshot = log.snapshot();
        assert_eq!(snapshot.run_id, 7);
        assert_eq!(snapshot.entries.len(), 2);
        assert_eq!(snapshot.entries[1].stage, Some(Stage::TempoEstimation));
        assert_eq!(snapshot.at_least(LogLevel::Warn).count(), 1);
    }

    #[test]
    fn test_bounded_history_counts_drops() {
        let log = RunLog::new(1, 3);
        for i in 0..5 {
            log.info(None, format!("line {}", i));
        }
        let snapshot = log.snapshot();
        assert_eq!(snapshot.entries.len(), 3);
        assert_eq!(snapshot.entries[0].message, "line 2");
        assert_eq!(snapshot.dropped_entries, 2);
    }

    #[test]
    fn test_text_and_json_export() {
        let log = RunLog::new(3, 8);
        log.error(Some(Stage::Separation), "model missing");
        let snapshot = log.snapshot();

        let text = snapshot.to_text();
        assert!(text.contains("[run 3]"));
        assert!(text.contains("ERROR"));
        assert!(text.contains("separation"));
        assert!(text.contains("model missing"));

        let json = snapshot.to_json().unwrap();
        let parsed: RunDiagnostics = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, snapshot);
    }
}
