use super::pipeline_totals::affected_companies;
use super::{company_metrics_path, DEALS_COLLECTION};
use crate::cascade::guarded_io::GuardedIo;
use crate::cascade::projection::{Projection, ProjectionError, ProjectionReport};
use crate::event::ChangeEvent;
use crate::store::Query;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;

/// Cascade identity for the active-salespeople roster.
pub const ACTIVE_SALESPEOPLE_CASCADE: &str = "active_salespeople";

/// Roster field written onto the company metrics document.
pub const ACTIVE_SALESPEOPLE_FIELD: &str = "active_salespeople";

const RELEVANT_FIELDS: &[&str] = &["company_id", "stage", "owner"];

/// Stages that count as active for roster purposes.
pub const ACTIVE_STAGES: &[&str] = &["lead", "pipeline"];

/// Roster snapshot: the sorted distinct owners of a company's active deals.
/// Rebuilt from scratch on every qualifying change, same as the pipeline
/// aggregate, so duplicate or out-of-order events converge.
#[derive(Debug, Clone)]
pub struct ActiveSalespeople {
    deal_cap: usize,
}

impl Default for ActiveSalespeople {
    fn default() -> Self {
        Self { deal_cap: 1_000 }
    }
}

impl ActiveSalespeople {
    /// Overrides the per-company deal cap.
    pub fn with_deal_cap(deal_cap: usize) -> Self {
        Self { deal_cap }
    }
}

impl Projection for ActiveSalespeople {
    fn cascade_id(&self) -> &str {
        ACTIVE_SALESPEOPLE_CASCADE
    }

    fn relevant_fields(&self) -> &[&'static str] {
        RELEVANT_FIELDS
    }

    fn apply(
        &self,
        event: &ChangeEvent,
        io: &mut GuardedIo<'_>,
    ) -> Result<ProjectionReport, ProjectionError> {
        let companies = affected_companies(event)?;
        for company_id in &companies {
            let active_stages = ACTIVE_STAGES
                .iter()
                .map(|stage| Value::from(*stage))
                .collect();
            let deals = io.query(
                Query::collection(DEALS_COLLECTION, self.deal_cap)
                    .where_eq("company_id", company_id.as_str())
                    .where_in("stage", active_stages),
            )?;
            let mut owners = BTreeSet::new();
            for deal in &deals {
                if let Some(owner) = deal.str_field("owner") {
                    if !owner.is_empty() {
                        owners.insert(owner.to_string());
                    }
                }
            }
            let names: Vec<Value> = owners.into_iter().map(Value::from).collect();
            let count = names.len() as u64;
            let mut fields = Map::new();
            fields.insert(
                ACTIVE_SALESPEOPLE_FIELD.to_string(),
                json!({
                    "names": names,
                    "count": count,
                }),
            );
            io.merge_write(&company_metrics_path(company_id), fields)?;
        }
        Ok(io.report())
    }
}
