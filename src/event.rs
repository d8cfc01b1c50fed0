use crate::document::{DocumentPath, FieldMap};

/// Kind of change delivered by the external change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
}

impl EventKind {
    /// Canonical lowercase label used in diagnostics.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Updated => "updated",
            EventKind::Deleted => "deleted",
        }
    }
}

/// Change event consumed once per dispatcher invocation. Immutable after
/// construction; `before`/`after` are the document states on either side of
/// the change (absent on creation and deletion respectively).
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    kind: EventKind,
    path: DocumentPath,
    before: Option<FieldMap>,
    after: Option<FieldMap>,
}

impl ChangeEvent {
    /// Creation event: no prior state.
    pub fn created(path: DocumentPath, after: FieldMap) -> Self {
        Self {
            kind: EventKind::Created,
            path,
            before: None,
            after: Some(after),
        }
    }

    /// Update event carrying both states.
    pub fn updated(path: DocumentPath, before: FieldMap, after: FieldMap) -> Self {
        Self {
            kind: EventKind::Updated,
            path,
            before: Some(before),
            after: Some(after),
        }
    }

    /// Deletion event: no next state.
    pub fn deleted(path: DocumentPath, before: FieldMap) -> Self {
        Self {
            kind: EventKind::Deleted,
            path,
            before: Some(before),
            after: None,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn path(&self) -> &DocumentPath {
        &self.path
    }

    pub fn before(&self) -> Option<&FieldMap> {
        self.before.as_ref()
    }

    pub fn after(&self) -> Option<&FieldMap> {
        self.after.as_ref()
    }

    /// The most recent state carried by the event: `after` when present,
    /// otherwise `before` (deletions).
    pub fn latest_state(&self) -> Option<&FieldMap> {
        self.after.as_ref().or(self.before.as_ref())
    }
}
