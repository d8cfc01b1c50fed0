use super::{company_metrics_path, DEALS_COLLECTION};
use crate::cascade::guarded_io::GuardedIo;
use crate::cascade::projection::{Projection, ProjectionError, ProjectionReport};
use crate::document::StoredDocument;
use crate::event::ChangeEvent;
use crate::store::Query;
use serde::Serialize;
use serde_json::{json, Map};
use std::collections::BTreeSet;

/// Cascade identity for the pipeline-totals aggregate.
pub const PIPELINE_TOTALS_CASCADE: &str = "pipeline_totals";

/// Aggregate field written onto the company metrics document.
pub const PIPELINE_VALUE_FIELD: &str = "pipeline_value";

const RELEVANT_FIELDS: &[&str] = &["company_id", "stage", "revenue_low", "revenue_high"];
const PIPELINE_STAGE: &str = "pipeline";

/// Derived pipeline totals for one company. `deal_count` counts every
/// qualifying deal; `low`/`high` sum only deals with usable revenue data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Default)]
pub struct PipelineValue {
    pub low: f64,
    pub high: f64,
    pub deal_count: u64,
}

/// Recomputes the aggregate from scratch. Pure and order-independent: the
/// same deal set always folds to the same totals, so replays converge.
pub fn recompute_pipeline(deals: &[StoredDocument]) -> PipelineValue {
    let mut value = PipelineValue::default();
    for deal in deals {
        value.deal_count += 1;
        let low = deal.num_field("revenue_low");
        let high = deal.num_field("revenue_high");
        if let (Some(low), Some(high)) = (low, high) {
            value.low += low;
            value.high += high;
        }
    }
    value
}

/// Full-recompute aggregate: any qualifying deal change rereads every
/// pipeline-stage deal of the affected companies and overwrites the
/// aggregate, so the derived document can never drift from its children.
/// Created lazily on the first qualifying event, overwritten on each
/// subsequent one.
#[derive(Debug, Clone)]
pub struct PipelineTotals {
    deal_cap: usize,
}

impl Default for PipelineTotals {
    fn default() -> Self {
        Self { deal_cap: 1_000 }
    }
}

impl PipelineTotals {
    /// Overrides the per-company deal cap.
    pub fn with_deal_cap(deal_cap: usize) -> Self {
        Self { deal_cap }
    }
}

impl Projection for PipelineTotals {
    fn cascade_id(&self) -> &str {
        PIPELINE_TOTALS_CASCADE
    }

    fn relevant_fields(&self) -> &[&'static str] {
        RELEVANT_FIELDS
    }

    fn apply(
        &self,
        event: &ChangeEvent,
        io: &mut GuardedIo<'_>,
    ) -> Result<ProjectionReport, ProjectionError> {
        // A reassigned deal affects both the old and the new company.
        let companies = affected_companies(event)?;
        for company_id in &companies {
            let deals = io.query(
                Query::collection(DEALS_COLLECTION, self.deal_cap)
                    .where_eq("company_id", company_id.as_str())
                    .where_eq("stage", PIPELINE_STAGE),
            )?;
            let value = recompute_pipeline(&deals);
            let mut fields = Map::new();
            fields.insert(
                PIPELINE_VALUE_FIELD.to_string(),
                json!({
                    "low": value.low,
                    "high": value.high,
                    "deal_count": value.deal_count,
                }),
            );
            io.merge_write(&company_metrics_path(company_id), fields)?;
        }
        Ok(io.report())
    }
}

/// Company ids referenced on either side of a deal event, deduplicated.
pub(crate) fn affected_companies(event: &ChangeEvent) -> Result<BTreeSet<String>, ProjectionError> {
    let mut companies = BTreeSet::new();
    for state in [event.before(), event.after()].into_iter().flatten() {
        if let Some(company_id) = state.get("company_id") {
            let company_id =
                company_id
                    .as_str()
                    .ok_or_else(|| ProjectionError::MalformedDocument {
                        path: event.path().render(),
                        detail: "company_id must be a string".to_string(),
                    })?;
            if !company_id.is_empty() {
                companies.insert(company_id.to_string());
            }
        }
    }
    if companies.is_empty() {
        return Err(ProjectionError::MalformedDocument {
            path: event.path().render(),
            detail: "deal names no company_id".to_string(),
        });
    }
    Ok(companies)
}
