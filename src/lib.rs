//! Cascata: cascade-safe incremental aggregation over a document store.
//!
//! A change to one document (a deal, a company, a location) triggers
//! recomputation of derived fields on related documents. The engine here is
//! the safety framework every such cascade runs on: a relevance gate,
//! per-cascade provenance with self-write suppression, a governor enforcing
//! per-invocation ceilings, a cost ledger with configurable budget modes, a
//! bounded query/batch executor with loop-guard and generation fencing, and
//! a dispatcher that composes them around pluggable projections and never
//! lets a failure escape.

pub mod cascade;
pub mod clock;
pub mod config;
pub mod definitions;
pub mod document;
pub mod event;
pub mod governor;
pub mod intake;
pub mod ledger;
pub mod logging;
pub mod projections;
pub mod store;

pub use cascade::dispatch::{
    DispatchOutcome, DispatchPhase, ExhaustionCause, InvocationRecord, SkipReason,
    TriggerDispatcher,
};
pub use cascade::gate::{ChangeGate, GateVerdict};
pub use cascade::guarded_io::{BatchReport, GuardedIo, GuardedIoError, IoLimits, WriteOutcome};
pub use cascade::loop_guard::{assess_write, WriteDecision};
pub use cascade::projection::{Projection, ProjectionError, ProjectionReport};
pub use cascade::provenance::{entry_of, is_self_write, tag_for_write};
pub use clock::{
    ManualClock, MonotonicClock, RecordingSleeper, Sleeper, SystemMonotonicClock, ThreadSleeper,
};
pub use config::{
    CascadeSettings, CircuitBreaker, SettingsError, SettingsKnobClass, SettingsPatchResult,
    SettingsService, SettingsTelemetry,
};
pub use definitions::{
    load_bundle, load_bundle_pinned, sha256_bytes, sha256_file, validate_definition,
    CascadeDefinition, DefinitionBundle, DefinitionError,
};
pub use document::{
    covers_fields, fields_equal, DocumentPath, FieldMap, StoredDocument, PROVENANCE_FIELD,
};
pub use event::{ChangeEvent, EventKind};
pub use governor::{CascadeCeilings, ExecutionContext, GovernorError, SafetyGovernor};
pub use intake::{IntakeAudit, IntakeError, IntakeQueue, INTAKE_QUEUE_CAPACITY};
pub use ledger::{
    BudgetMode, BudgetSignal, CostBudget, CostLedger, CostSummary, CostTable, LedgerEntry,
    LedgerError, OperationKind,
};
pub use logging::{
    DiagnosticLogger, DiagnosticRecord, LogFile, LogLevel, LogRotationPolicy, LoggingError,
};
pub use projections::{
    company_metrics_path, ActiveSalespeople, CompanyFanout, LocationMirror, PipelineTotals,
    PipelineValue, ACTIVE_SALESPEOPLE_CASCADE, COMPANIES_COLLECTION, COMPANY_FANOUT_CASCADE,
    COMPANY_METRICS_COLLECTION, DEALS_COLLECTION, LOCATIONS_COLLECTION, LOCATION_MIRROR_CASCADE,
    PIPELINE_TOTALS_CASCADE,
};
pub use store::memory::{stamp_provenance, MemoryStore};
pub use store::{
    BatchReceipt, DocumentStore, FieldFilter, FilterOp, ProvenanceTag, Query, StoreError,
    WriteBatch, WriteOp, WritePayload, MAX_ATOMIC_BATCH_OPS,
};
