use super::COMPANIES_COLLECTION;
use crate::cascade::guarded_io::GuardedIo;
use crate::cascade::projection::{Projection, ProjectionError, ProjectionReport};
use crate::document::DocumentPath;
use crate::event::ChangeEvent;
use serde_json::{json, Map, Value};

/// Cascade identity for the location mirror.
pub const LOCATION_MIRROR_CASCADE: &str = "location_mirror";

/// Mirror field maintained on the owning company document.
pub const LOCATION_FIELD: &str = "location";

const RELEVANT_FIELDS: &[&str] = &["company_id", "label", "city", "country"];

/// One-to-one mirror: a location document's display fields are copied onto
/// the owning company's `location` field. No query involved; a point read
/// finds the owner and a single guarded merge write refreshes the mirror.
/// Deleting the location clears the mirror.
#[derive(Debug, Clone, Default)]
pub struct LocationMirror;

impl Projection for LocationMirror {
    fn cascade_id(&self) -> &str {
        LOCATION_MIRROR_CASCADE
    }

    fn relevant_fields(&self) -> &[&'static str] {
        RELEVANT_FIELDS
    }

    fn apply(
        &self,
        event: &ChangeEvent,
        io: &mut GuardedIo<'_>,
    ) -> Result<ProjectionReport, ProjectionError> {
        let state = event
            .latest_state()
            .ok_or_else(|| ProjectionError::Invariant {
                detail: "change event carries neither state".to_string(),
            })?;
        let company_id = state
            .get("company_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ProjectionError::MalformedDocument {
                path: event.path().render(),
                detail: "location names no company_id".to_string(),
            })?;
        let company_path = DocumentPath::new(COMPANIES_COLLECTION, company_id);

        // The company is a source-of-truth document; the mirror must never
        // create it. An absent owner self-heals on the next qualifying event.
        if io.read(&company_path)?.is_none() {
            return Ok(io.report().with_note("owning company absent; mirror deferred"));
        }

        let mirror = match event.after() {
            Some(after) => json!({
                "label": after.get("label").cloned().unwrap_or(Value::Null),
                "city": after.get("city").cloned().unwrap_or(Value::Null),
                "country": after.get("country").cloned().unwrap_or(Value::Null),
            }),
            None => Value::Null,
        };
        let mut fields = Map::new();
        fields.insert(LOCATION_FIELD.to_string(), mirror);
        io.merge_write(&company_path, fields)?;
        Ok(io.report())
    }
}
