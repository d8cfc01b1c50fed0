use crate::cascade::guarded_io::{GuardedIo, GuardedIoError};
use crate::event::ChangeEvent;
use thiserror::Error;

/// Outcome of one projection run. Projections usually start from
/// [`GuardedIo::report`] so the write/skip counters line up with what the
/// executor actually did, then attach a note where useful.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectionReport {
    /// Documents written (merge writes plus batch ops committed).
    pub documents_written: usize,
    /// Writes withheld by the no-op heuristic.
    pub writes_skipped: usize,
    /// Writes refused by a fencing conflict.
    pub fence_refusals: usize,
    /// True when a soft budget stop cut the work short.
    pub budget_stopped: bool,
    /// Free-form context for diagnostics.
    pub note: Option<String>,
}

impl ProjectionReport {
    /// Attaches a diagnostic note.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Failures raised by projection bodies. Converted into logged no-ops at the
/// dispatcher boundary, never re-raised past it.
#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error(transparent)]
    Io(#[from] GuardedIoError),
    #[error("malformed document {path}: {detail}")]
    MalformedDocument { path: String, detail: String },
    #[error("projection invariant violated: {detail}")]
    Invariant { detail: String },
}

/// Business-specific recompute/fan-out logic run by the dispatcher.
///
/// Implementations must be idempotent and side-effect-free beyond the writes
/// they issue through the guarded executor: aggregate projections recompute
/// their aggregate fully from the children they read and overwrite it, never
/// patch it; fan-out projections enumerate referencing documents only through
/// indexed capped queries.
pub trait Projection: Send {
    /// Stable cascade identity embedded in provenance tags.
    fn cascade_id(&self) -> &str;

    /// Top-level fields whose changes this cascade reacts to.
    fn relevant_fields(&self) -> &[&'static str];

    /// Handles one change event using guarded I/O only.
    fn apply(
        &self,
        event: &ChangeEvent,
        io: &mut GuardedIo<'_>,
    ) -> Result<ProjectionReport, ProjectionError>;
}
