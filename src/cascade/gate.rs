use crate::document::{fields_equal, FieldMap};

/// Verdict returned by the change gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateVerdict {
    /// At least one relevant field changed (or the document is new).
    Pass,
    /// Only irrelevant fields changed; the cascade has nothing to do.
    Skip,
}

/// Relevance filter deciding whether an update warrants cascade work. Keeps
/// cascades from re-firing on bookkeeping writes (timestamps, provenance,
/// counters) that never affect their derived output.
#[derive(Debug, Clone)]
pub struct ChangeGate {
    relevant_fields: Vec<String>,
}

impl ChangeGate {
    /// Creates a gate watching the given top-level fields.
    pub fn new<I, S>(relevant_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            relevant_fields: relevant_fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Fields the gate watches.
    pub fn relevant_fields(&self) -> &[String] {
        &self.relevant_fields
    }

    /// Evaluates an update. Absent `before` means creation and always passes;
    /// otherwise at least one watched field must differ by deep structural
    /// equality. Deterministic: identical inputs always yield the same
    /// verdict.
    pub fn evaluate(&self, before: Option<&FieldMap>, after: &FieldMap) -> GateVerdict {
        let Some(before) = before else {
            return GateVerdict::Pass;
        };
        let changed = self
            .relevant_fields
            .iter()
            .any(|field| !fields_equal(before.get(field), after.get(field)));
        if changed {
            GateVerdict::Pass
        } else {
            GateVerdict::Skip
        }
    }
}
