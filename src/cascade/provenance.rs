use crate::definitions::sha256_bytes;
use crate::document::{FieldMap, PROVENANCE_FIELD};
use crate::store::ProvenanceTag;
use serde_json::Value;

/// Builds the provenance tag for a cascade-authored write. The digest covers
/// the canonically serialized written fields (keys sort deterministically),
/// so two writes of the same payload carry the same digest.
pub fn tag_for_write(cascade_id: &str, written_at_ms: u64, fields: &FieldMap) -> ProvenanceTag {
    let canonical = serde_json::to_vec(fields).unwrap_or_default();
    ProvenanceTag {
        cascade_id: cascade_id.to_string(),
        written_at_ms,
        fields_digest: sha256_bytes(&canonical),
    }
}

/// Returns the cascade's own entry from a document state's provenance map.
pub fn entry_of<'a>(state: &'a FieldMap, cascade_id: &str) -> Option<&'a Value> {
    state
        .get(PROVENANCE_FIELD)
        .and_then(Value::as_object)
        .and_then(|map| map.get(cascade_id))
}

/// Decides whether an incoming event was produced by the named cascade's own
/// write. A cascade refreshes its entry (timestamp and digest) on every write
/// it authors, so the event is a self-write exactly when the entry is present
/// afterwards and differs from the entry before. Stale entries left over from
/// older writes compare equal on both sides and do not suppress the event.
pub fn is_self_write(
    cascade_id: &str,
    before: Option<&FieldMap>,
    after: Option<&FieldMap>,
) -> bool {
    let Some(after) = after else {
        // Deletions carry no next state; cascades do not delete their targets.
        return false;
    };
    let Some(after_entry) = entry_of(after, cascade_id) else {
        return false;
    };
    match before.and_then(|state| entry_of(state, cascade_id)) {
        Some(before_entry) => before_entry != after_entry,
        None => true,
    }
}
