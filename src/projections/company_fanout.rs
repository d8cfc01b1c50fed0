use super::DEALS_COLLECTION;
use crate::cascade::guarded_io::GuardedIo;
use crate::cascade::projection::{Projection, ProjectionError, ProjectionReport};
use crate::event::ChangeEvent;
use crate::store::{Query, WriteOp};
use serde_json::{Map, Value};

/// Cascade identity for the company display-field fan-out.
pub const COMPANY_FANOUT_CASCADE: &str = "company_fanout";

/// Embedded snapshot field maintained on every deal referencing the company.
pub const COMPANY_SNAPSHOT_FIELD: &str = "company_snapshot";

const RELEVANT_FIELDS: &[&str] = &["name", "sector", "city"];

/// Fan-out: when a company's display fields change, push a fresh embedded
/// snapshot into every deal referencing it. Targets come from an indexed
/// capped query only, and writes go through the bounded batch executor;
/// deals whose snapshot is already current are pruned up front, which is the
/// no-op heuristic applied at fan-out granularity.
#[derive(Debug, Clone)]
pub struct CompanyFanout {
    deal_cap: usize,
}

impl Default for CompanyFanout {
    fn default() -> Self {
        Self { deal_cap: 2_000 }
    }
}

impl CompanyFanout {
    /// Overrides the fan-out target cap.
    pub fn with_deal_cap(deal_cap: usize) -> Self {
        Self { deal_cap }
    }
}

impl Projection for CompanyFanout {
    fn cascade_id(&self) -> &str {
        COMPANY_FANOUT_CASCADE
    }

    fn relevant_fields(&self) -> &[&'static str] {
        RELEVANT_FIELDS
    }

    fn apply(
        &self,
        event: &ChangeEvent,
        io: &mut GuardedIo<'_>,
    ) -> Result<ProjectionReport, ProjectionError> {
        let Some(after) = event.after() else {
            // Deal cleanup after a company deletion belongs to the CRUD layer.
            return Ok(io
                .report()
                .with_note("company deleted; embedded snapshots left in place"));
        };
        let company_id = event.path().document_id().to_string();
        let snapshot = build_snapshot(after, event)?;
        let snapshot_value = Value::Object(snapshot.clone());

        let deals = io.query(
            Query::collection(DEALS_COLLECTION, self.deal_cap)
                .where_eq("company_id", company_id.as_str()),
        )?;
        let total = deals.len();
        let stale: Vec<_> = deals
            .into_iter()
            .filter(|deal| deal.field(COMPANY_SNAPSHOT_FIELD) != Some(&snapshot_value))
            .collect();
        let pruned = total - stale.len();

        io.batch_write(&stale, |deal| {
            let mut fields = Map::new();
            fields.insert(COMPANY_SNAPSHOT_FIELD.to_string(), snapshot_value.clone());
            WriteOp::merge(deal.path.clone(), fields)
        })?;

        let mut report = io.report();
        report.writes_skipped += pruned;
        Ok(report)
    }
}

fn build_snapshot(
    after: &Map<String, Value>,
    event: &ChangeEvent,
) -> Result<Map<String, Value>, ProjectionError> {
    let name = after
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| ProjectionError::MalformedDocument {
            path: event.path().render(),
            detail: "company name must be a string".to_string(),
        })?;
    let mut snapshot = Map::new();
    snapshot.insert("name".to_string(), Value::from(name));
    for field in ["sector", "city"] {
        if let Some(value) = after.get(field) {
            snapshot.insert(field.to_string(), value.clone());
        }
    }
    Ok(snapshot)
}
