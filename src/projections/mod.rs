//! Worked projections built on the guarded primitives: a full-recompute
//! aggregate, a fan-out, a roster snapshot, and a one-to-one mirror.

pub mod active_salespeople;
pub mod company_fanout;
pub mod location_mirror;
pub mod pipeline_totals;

pub use active_salespeople::{ActiveSalespeople, ACTIVE_SALESPEOPLE_CASCADE};
pub use company_fanout::{CompanyFanout, COMPANY_FANOUT_CASCADE};
pub use location_mirror::{LocationMirror, LOCATION_MIRROR_CASCADE};
pub use pipeline_totals::{PipelineTotals, PipelineValue, PIPELINE_TOTALS_CASCADE};

/// Collection holding deal documents.
pub const DEALS_COLLECTION: &str = "deals";
/// Collection holding company documents.
pub const COMPANIES_COLLECTION: &str = "companies";
/// Collection holding location documents.
pub const LOCATIONS_COLLECTION: &str = "locations";
/// Collection holding per-company derived metrics documents.
pub const COMPANY_METRICS_COLLECTION: &str = "company_metrics";

use crate::document::DocumentPath;

/// Path of the derived metrics document for a company.
pub fn company_metrics_path(company_id: &str) -> DocumentPath {
    DocumentPath::new(COMPANY_METRICS_COLLECTION, company_id)
}
