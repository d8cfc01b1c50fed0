use crate::ledger::CostSummary;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use thiserror::Error;

/// Severity levels for diagnostic output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Returns the canonical uppercase representation.
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rotation policy (default mirrors 1 GiB x 10 files).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRotationPolicy {
    pub max_bytes: usize,
    pub max_files: usize,
}

impl Default for LogRotationPolicy {
    fn default() -> Self {
        Self {
            max_bytes: 1 << 30,
            max_files: 10,
        }
    }
}

/// Accumulated log lines for a rotated file.
#[derive(Debug, Default, Clone)]
pub struct LogFile {
    lines: Vec<String>,
    bytes_written: usize,
}

impl LogFile {
    /// Lines contained within the log segment.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Total bytes recorded before rotation.
    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }
}

/// Structured diagnostic record. Each variant maps to one JSON line with a
/// `kind` discriminator, so downstream collectors can route on skip reasons
/// and failure classes without parsing free text.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiagnosticRecord {
    /// The dispatcher short-circuited before running the projection.
    InvocationSkipped {
        cascade_id: String,
        path: String,
        reason: String,
    },
    /// A single derived write was withheld (no-op heuristic or fence refusal).
    WriteSkipped {
        cascade_id: String,
        path: String,
        reason: String,
    },
    /// The cost budget threshold was crossed.
    BudgetOverrun {
        cascade_id: String,
        estimated_cost: u64,
        budget: u64,
        mode: String,
    },
    /// A governor ceiling tripped and the invocation aborted.
    CeilingBreached {
        cascade_id: String,
        path: String,
        detail: String,
    },
    /// The projection failed; the failure was logged and swallowed.
    ProjectionFailed {
        cascade_id: String,
        path: String,
        detail: String,
    },
    /// Per-invocation cost summary, emitted on every terminal outcome.
    CostSummary {
        cascade_id: String,
        path: String,
        outcome: String,
        #[serde(flatten)]
        summary: CostSummary,
    },
}

#[derive(Serialize)]
struct LogEnvelope<'a> {
    ts: u64,
    level: &'a str,
    seq: u64,
    #[serde(flatten)]
    record: &'a DiagnosticRecord,
}

/// Errors surfaced while serializing diagnostic records.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to serialize diagnostic record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// JSON-line logger with deterministic rotation semantics.
#[derive(Debug, Clone)]
pub struct DiagnosticLogger {
    policy: LogRotationPolicy,
    current_level: LogLevel,
    files: VecDeque<LogFile>,
    active: LogFile,
    seq: u64,
}

impl Default for DiagnosticLogger {
    fn default() -> Self {
        Self::new(LogRotationPolicy::default())
    }
}

impl DiagnosticLogger {
    /// Creates a logger anchored to the provided rotation policy.
    pub fn new(policy: LogRotationPolicy) -> Self {
        Self {
            policy,
            current_level: LogLevel::Info,
            files: VecDeque::new(),
            active: LogFile::default(),
            seq: 0,
        }
    }

    /// Returns the current log level.
    pub fn level(&self) -> LogLevel {
        self.current_level
    }

    /// Applies a dynamic log-level override.
    pub fn set_level(&mut self, level: LogLevel) {
        self.current_level = level;
    }

    /// Emits a JSON-line diagnostic record.
    pub fn log(
        &mut self,
        ts_ms: u64,
        level: LogLevel,
        record: &DiagnosticRecord,
    ) -> Result<(), LoggingError> {
        if level < self.current_level {
            return Ok(());
        }
        self.seq = self.seq.saturating_add(1);
        let envelope = LogEnvelope {
            ts: ts_ms,
            level: level.as_str(),
            seq: self.seq,
            record,
        };
        let line = serde_json::to_string(&envelope).map_err(LoggingError::Serialize)?;
        self.rotate_if_needed(line.len());
        self.active.bytes_written = self.active.bytes_written.saturating_add(line.len());
        self.active.lines.push(line);
        Ok(())
    }

    /// Returns the current file plus rotated history.
    pub fn files(&self) -> impl Iterator<Item = &LogFile> {
        self.files.iter().chain(std::iter::once(&self.active))
    }

    /// Flattens every retained line in emission order.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.files().flat_map(|file| file.lines()).map(String::as_str)
    }

    fn rotate_if_needed(&mut self, next_line_len: usize) {
        if self.active.bytes_written + next_line_len <= self.policy.max_bytes {
            return;
        }
        if !self.active.lines.is_empty() {
            self.files.push_back(std::mem::take(&mut self.active));
            while self.files.len() > self.policy.max_files {
                self.files.pop_front();
            }
        }
        self.active = LogFile::default();
    }
}
