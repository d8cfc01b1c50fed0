use crate::document::{covers_fields, FieldMap, StoredDocument};

/// Decision for one pending derived write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteDecision {
    /// The write changes something; commit it fenced on the generation
    /// observed at read time (0 when the target does not exist yet).
    Proceed { fence: u64 },
    /// Every proposed field already carries the proposed value; committing
    /// would be a no-op that only re-triggers the cascade. Skip it.
    SkipNoOp,
}

/// Heuristic no-op detector plus fencing-token source. The deep comparison
/// predicts re-trigger loops; the fence turns the prediction into a
/// guarantee, because a write is refused outright when another writer moved
/// the document after our read.
pub fn assess_write(current: Option<&StoredDocument>, proposed: &FieldMap) -> WriteDecision {
    match current {
        None => WriteDecision::Proceed { fence: 0 },
        Some(document) => {
            if covers_fields(&document.fields, proposed) {
                WriteDecision::SkipNoOp
            } else {
                WriteDecision::Proceed {
                    fence: document.generation,
                }
            }
        }
    }
}
