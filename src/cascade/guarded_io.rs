use crate::cascade::loop_guard::{assess_write, WriteDecision};
use crate::cascade::projection::ProjectionReport;
use crate::cascade::provenance::tag_for_write;
use crate::clock::{MonotonicClock, Sleeper};
use crate::config::CascadeSettings;
use crate::document::{DocumentPath, FieldMap, StoredDocument};
use crate::governor::{ExecutionContext, GovernorError, SafetyGovernor};
use crate::ledger::{BudgetSignal, CostLedger, LedgerError, OperationKind};
use crate::logging::{DiagnosticLogger, DiagnosticRecord, LogLevel};
use crate::store::{
    DocumentStore, Query, StoreError, WriteBatch, WriteOp, WritePayload, MAX_ATOMIC_BATCH_OPS,
};
use thiserror::Error;

/// Executor-level bounds derived from the cascade settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoLimits {
    pub max_query_results: usize,
    pub max_batch_size: usize,
    pub backoff_ms: u64,
}

impl From<&CascadeSettings> for IoLimits {
    fn from(settings: &CascadeSettings) -> Self {
        Self {
            max_query_results: settings.max_query_results,
            max_batch_size: settings.max_batch_size.min(MAX_ATOMIC_BATCH_OPS).max(1),
            backoff_ms: settings.backoff_ms,
        }
    }
}

/// Failures raised by guarded operations.
#[derive(Debug, Clone, Error)]
pub enum GuardedIoError {
    #[error(transparent)]
    Governor(#[from] GovernorError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of one guarded merge write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// Withheld by the no-op heuristic.
    SkippedNoOp,
    /// Refused because the target's generation moved after our read.
    FenceRefused,
}

/// Report returned by [`GuardedIo::batch_write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchReport {
    pub items_total: usize,
    pub ops_committed: usize,
    pub commits: usize,
    pub backoff_sleeps: usize,
    /// True when a soft budget stop ended chunking early.
    pub budget_stopped: bool,
}

/// Bounded I/O surface handed to projections. Every operation checks the
/// governor first and reports its cost to the ledger; queries are capped,
/// batches are chunked to the store's atomic limit with inter-chunk backoff,
/// and single derived writes go through the loop guard, provenance stamping,
/// and generation fencing.
pub struct GuardedIo<'a> {
    cascade_id: &'a str,
    store: &'a mut dyn DocumentStore,
    governor: &'a SafetyGovernor,
    ctx: &'a mut ExecutionContext,
    ledger: &'a mut CostLedger,
    clock: &'a mut dyn MonotonicClock,
    sleeper: &'a mut dyn Sleeper,
    logger: &'a mut DiagnosticLogger,
    limits: IoLimits,
    documents_written: usize,
    writes_skipped: usize,
    fence_refusals: usize,
    budget_stopped: bool,
}

impl<'a> GuardedIo<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cascade_id: &'a str,
        store: &'a mut dyn DocumentStore,
        governor: &'a SafetyGovernor,
        ctx: &'a mut ExecutionContext,
        ledger: &'a mut CostLedger,
        clock: &'a mut dyn MonotonicClock,
        sleeper: &'a mut dyn Sleeper,
        logger: &'a mut DiagnosticLogger,
        limits: IoLimits,
    ) -> Self {
        Self {
            cascade_id,
            store,
            governor,
            ctx,
            ledger,
            clock,
            sleeper,
            logger,
            limits,
            documents_written: 0,
            writes_skipped: 0,
            fence_refusals: 0,
            budget_stopped: false,
        }
    }

    /// Cascade identity stamped onto every write issued here.
    pub fn cascade_id(&self) -> &str {
        self.cascade_id
    }

    /// Executor bounds in force.
    pub fn limits(&self) -> IoLimits {
        self.limits
    }

    /// Re-evaluates every governor ceiling. Guarded operations call this
    /// internally; projections call it at their own suspension points.
    pub fn check_limits(&mut self) -> Result<(), GuardedIoError> {
        self.governor.check_limits(self.ctx, self.clock)?;
        Ok(())
    }

    /// Records one level of guarded recursion (nested cascade work).
    pub fn enter_recursion(&mut self) {
        self.governor.enter_recursion(self.ctx);
    }

    /// Guarded point read.
    pub fn read(&mut self, path: &DocumentPath) -> Result<Option<StoredDocument>, GuardedIoError> {
        self.check_limits()?;
        self.ledger.admit_new_work()?;
        self.point_read(path)
    }

    /// Guarded indexed query. The configured executor cap applies on top of
    /// the query's own limit; an unbounded scan is impossible by
    /// construction.
    pub fn query(&mut self, query: Query) -> Result<Vec<StoredDocument>, GuardedIoError> {
        self.check_limits()?;
        self.ledger.admit_new_work()?;
        let query = query.clamp_limit(self.limits.max_query_results);
        self.governor.enter_operation(self.ctx);
        let result = self.store.run_query(&query);
        self.governor.exit_operation(self.ctx);
        let results = result?;
        self.record_cost(OperationKind::QueryResult, results.len().max(1) as u64)?;
        Ok(results)
    }

    /// Guarded batched write. Items are chunked to at most the configured
    /// batch size (never above the store's atomic limit); each chunk commits
    /// as one atomic batch followed by a fixed backoff, except after the
    /// final chunk. A failure after chunk *k* leaves chunks 1..k committed
    /// and the remainder unattempted.
    pub fn batch_write<T, F>(
        &mut self,
        items: &[T],
        mut build: F,
    ) -> Result<BatchReport, GuardedIoError>
    where
        F: FnMut(&T) -> WriteOp,
    {
        let mut report = BatchReport {
            items_total: items.len(),
            ..BatchReport::default()
        };
        if items.is_empty() {
            return Ok(report);
        }
        let chunk_size = self.limits.max_batch_size;
        let chunk_count = items.len().div_ceil(chunk_size);
        for (index, chunk) in items.chunks(chunk_size).enumerate() {
            self.check_limits()?;
            if self.ledger.admit_new_work().is_err() {
                self.budget_stopped = true;
                report.budget_stopped = true;
                break;
            }
            let mut batch = WriteBatch::new();
            for item in chunk {
                let op = self.stamp(build(item));
                batch.push(op)?;
            }
            self.governor.enter_operation(self.ctx);
            let committed = self.store.commit_batch(batch);
            self.governor.exit_operation(self.ctx);
            let receipt = committed?;
            self.record_cost(OperationKind::DocumentWrite, receipt.ops_applied as u64)?;
            self.record_cost(OperationKind::BatchCommit, 1)?;
            report.commits += 1;
            report.ops_committed += receipt.ops_applied;
            self.documents_written += receipt.ops_applied;
            if index + 1 < chunk_count {
                self.sleeper.sleep_ms(self.limits.backoff_ms);
                report.backoff_sleeps += 1;
            }
        }
        Ok(report)
    }

    /// Guarded single merge write with loop-guard and fencing semantics: the
    /// target is read first, a deep-equal proposal is withheld as a predicted
    /// no-op re-trigger, and the commit is fenced on the generation observed
    /// by that read.
    pub fn merge_write(
        &mut self,
        path: &DocumentPath,
        fields: FieldMap,
    ) -> Result<WriteOutcome, GuardedIoError> {
        self.check_limits()?;
        self.ledger.admit_new_work()?;
        let current = self.point_read(path)?;
        match assess_write(current.as_ref(), &fields) {
            WriteDecision::SkipNoOp => {
                self.writes_skipped += 1;
                self.emit(
                    LogLevel::Info,
                    DiagnosticRecord::WriteSkipped {
                        cascade_id: self.cascade_id.to_string(),
                        path: path.render(),
                        reason: "noop_write".to_string(),
                    },
                );
                Ok(WriteOutcome::SkippedNoOp)
            }
            WriteDecision::Proceed { fence } => {
                // The read above is a suspension point; re-check before the
                // commit.
                self.check_limits()?;
                let written_at_ms = self.clock.now_ms();
                let tag = tag_for_write(self.cascade_id, written_at_ms, &fields);
                let op = WriteOp::merge(path.clone(), fields)
                    .with_tag(tag)
                    .with_fence(fence);
                let mut batch = WriteBatch::new();
                batch.push(op)?;
                self.governor.enter_operation(self.ctx);
                let committed = self.store.commit_batch(batch);
                self.governor.exit_operation(self.ctx);
                match committed {
                    Ok(_) => {
                        self.record_cost(OperationKind::DocumentWrite, 1)?;
                        self.documents_written += 1;
                        Ok(WriteOutcome::Written)
                    }
                    Err(StoreError::FenceConflict {
                        path: conflicted, ..
                    }) => {
                        self.fence_refusals += 1;
                        self.emit(
                            LogLevel::Warn,
                            DiagnosticRecord::WriteSkipped {
                                cascade_id: self.cascade_id.to_string(),
                                path: conflicted.render(),
                                reason: "fence_conflict".to_string(),
                            },
                        );
                        Ok(WriteOutcome::FenceRefused)
                    }
                    Err(other) => Err(other.into()),
                }
            }
        }
    }

    /// Executor activity so far, in report form.
    pub fn report(&self) -> ProjectionReport {
        ProjectionReport {
            documents_written: self.documents_written,
            writes_skipped: self.writes_skipped,
            fence_refusals: self.fence_refusals,
            budget_stopped: self.budget_stopped,
            note: None,
        }
    }

    fn point_read(
        &mut self,
        path: &DocumentPath,
    ) -> Result<Option<StoredDocument>, GuardedIoError> {
        self.governor.enter_operation(self.ctx);
        let result = self.store.get(path);
        self.governor.exit_operation(self.ctx);
        let document = result?;
        self.record_cost(OperationKind::PointRead, 1)?;
        Ok(document)
    }

    fn stamp(&mut self, op: WriteOp) -> WriteOp {
        match &op.payload {
            WritePayload::Set { fields } | WritePayload::Merge { fields } => {
                let tag = tag_for_write(self.cascade_id, self.clock.now_ms(), fields);
                op.with_tag(tag)
            }
            WritePayload::Delete => op,
        }
    }

    fn record_cost(&mut self, kind: OperationKind, units: u64) -> Result<(), LedgerError> {
        match self.ledger.record(kind, units)? {
            BudgetSignal::None => {}
            BudgetSignal::WarnOverrun {
                estimated_cost,
                budget,
            } => {
                self.emit(
                    LogLevel::Warn,
                    DiagnosticRecord::BudgetOverrun {
                        cascade_id: self.cascade_id.to_string(),
                        estimated_cost,
                        budget,
                        mode: "warn_only".to_string(),
                    },
                );
            }
            BudgetSignal::StopNewWork {
                estimated_cost,
                budget,
            } => {
                self.budget_stopped = true;
                self.emit(
                    LogLevel::Warn,
                    DiagnosticRecord::BudgetOverrun {
                        cascade_id: self.cascade_id.to_string(),
                        estimated_cost,
                        budget,
                        mode: "soft_stop".to_string(),
                    },
                );
            }
        }
        Ok(())
    }

    fn emit(&mut self, level: LogLevel, record: DiagnosticRecord) {
        let ts = self.clock.now_ms();
        let _ = self.logger.log(ts, level, &record);
    }
}
