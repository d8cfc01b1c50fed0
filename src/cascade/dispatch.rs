use crate::cascade::gate::{ChangeGate, GateVerdict};
use crate::cascade::guarded_io::{GuardedIo, GuardedIoError, IoLimits};
use crate::cascade::projection::{Projection, ProjectionError, ProjectionReport};
use crate::cascade::provenance::is_self_write;
use crate::clock::{MonotonicClock, Sleeper, SystemMonotonicClock, ThreadSleeper};
use crate::config::{CascadeSettings, CircuitBreaker};
use crate::document::DocumentPath;
use crate::event::{ChangeEvent, EventKind};
use crate::governor::{ExecutionContext, GovernorError, SafetyGovernor};
use crate::ledger::{CostLedger, CostSummary, LedgerError};
use crate::logging::{DiagnosticLogger, DiagnosticRecord, LogLevel};
use crate::store::DocumentStore;

/// Why an invocation short-circuited before running the projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Manual kill switch engaged.
    CircuitOpen,
    /// The event was produced by this cascade's own write.
    SelfWrite,
    /// No relevant field changed.
    IrrelevantChange,
}

impl SkipReason {
    /// Canonical label used in diagnostics.
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::CircuitOpen => "circuit_open",
            SkipReason::SelfWrite => "self_write",
            SkipReason::IrrelevantChange => "irrelevant_change",
        }
    }
}

/// What exhausted the invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExhaustionCause {
    /// A governor ceiling tripped.
    Governor(GovernorError),
    /// The hard cost budget was exceeded.
    Budget { estimated_cost: u64, budget: u64 },
}

impl std::fmt::Display for ExhaustionCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExhaustionCause::Governor(err) => write!(f, "{err}"),
            ExhaustionCause::Budget {
                estimated_cost,
                budget,
            } => write!(
                f,
                "cost budget exhausted: {estimated_cost} units spent, budget {budget}"
            ),
        }
    }
}

/// Terminal outcome of one dispatch. Failures are represented here, logged,
/// and swallowed; the dispatcher never re-raises and never retries.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// The projection ran to completion.
    Completed(ProjectionReport),
    /// Short-circuited before the projection ran.
    Skipped(SkipReason),
    /// Aborted mid-flight by a ceiling or hard budget breach. The report
    /// reflects work committed before the abort.
    ResourceExhausted {
        cause: ExhaustionCause,
        partial: ProjectionReport,
    },
    /// A soft budget stop ended the invocation early; committed work stands.
    BudgetStopped(ProjectionReport),
    /// The projection failed; the failure was logged and the event counts as
    /// handled, because redelivering a failing event would amplify the very
    /// cascade this framework exists to contain.
    Failed {
        detail: String,
        partial: ProjectionReport,
    },
}

impl DispatchOutcome {
    /// View for request/response callers built on the same primitives:
    /// causes stay server-side, only a generic internal error crosses the
    /// boundary.
    pub fn client_result(&self) -> Result<(), &'static str> {
        match self {
            DispatchOutcome::Completed(_)
            | DispatchOutcome::Skipped(_)
            | DispatchOutcome::BudgetStopped(_) => Ok(()),
            DispatchOutcome::ResourceExhausted { .. } | DispatchOutcome::Failed { .. } => {
                Err("internal error")
            }
        }
    }

    /// Canonical label used in diagnostics.
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchOutcome::Completed(_) => "completed",
            DispatchOutcome::Skipped(_) => "skipped",
            DispatchOutcome::ResourceExhausted { .. } => "resource_exhausted",
            DispatchOutcome::BudgetStopped(_) => "budget_stopped",
            DispatchOutcome::Failed { .. } => "failed",
        }
    }
}

/// Phases traversed by the dispatcher state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPhase {
    Idle,
    GateCheck,
    Skip,
    Proceed,
    ExecutingProjection,
    Success,
    CaughtFailure,
    Terminal,
}

/// Record of one invocation: outcome, phase trace, and cost summary.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationRecord {
    pub cascade_id: String,
    pub path: DocumentPath,
    pub outcome: DispatchOutcome,
    pub trace: Vec<DispatchPhase>,
    pub cost: CostSummary,
}

/// Composes the guard primitives around one projection. Per invocation:
/// fresh execution context and ledger, circuit-breaker check, change gate
/// (updates only), self-write check, then the projection with guarded I/O.
/// Every failure is caught, logged with context, and converted into a
/// terminal outcome.
pub struct TriggerDispatcher {
    projection: Box<dyn Projection>,
    gate: ChangeGate,
    governor: SafetyGovernor,
    settings: CascadeSettings,
    breaker: CircuitBreaker,
    clock: Box<dyn MonotonicClock>,
    sleeper: Box<dyn Sleeper>,
}

impl TriggerDispatcher {
    /// Builds a dispatcher with the system clock and sleeper.
    pub fn new(
        projection: Box<dyn Projection>,
        settings: CascadeSettings,
        breaker: CircuitBreaker,
    ) -> Self {
        let gate = ChangeGate::new(projection.relevant_fields().iter().copied());
        let governor = SafetyGovernor::new(settings.ceilings);
        Self {
            projection,
            gate,
            governor,
            settings,
            breaker,
            clock: Box::new(SystemMonotonicClock::new()),
            sleeper: Box::new(ThreadSleeper),
        }
    }

    /// Builds a dispatcher from a validated cascade definition. The
    /// definition's settings become the ceilings, cost table, and executor
    /// bounds in force.
    pub fn for_definition(
        projection: Box<dyn Projection>,
        definition: &crate::definitions::CascadeDefinition,
        breaker: CircuitBreaker,
    ) -> Result<Self, crate::definitions::DefinitionError> {
        crate::definitions::validate_definition(definition)?;
        Ok(Self::new(projection, definition.settings.clone(), breaker))
    }

    /// Injects a custom clock (tests).
    pub fn with_clock(mut self, clock: Box<dyn MonotonicClock>) -> Self {
        self.clock = clock;
        self
    }

    /// Injects a custom sleeper (tests).
    pub fn with_sleeper(mut self, sleeper: Box<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Cascade identity of the wrapped projection.
    pub fn cascade_id(&self) -> &str {
        self.projection.cascade_id()
    }

    /// Settings in force.
    pub fn settings(&self) -> &CascadeSettings {
        &self.settings
    }

    /// Handles one change event end to end. Never panics on projection
    /// failure and never re-raises; the returned record is the only output
    /// besides diagnostics and committed writes.
    pub fn dispatch(
        &mut self,
        store: &mut dyn DocumentStore,
        logger: &mut DiagnosticLogger,
        event: &ChangeEvent,
    ) -> InvocationRecord {
        let cascade_id = self.projection.cascade_id().to_string();
        let mut trace = vec![DispatchPhase::Idle];
        let mut ctx = ExecutionContext::start(self.clock.as_mut());
        let mut ledger = CostLedger::new(
            self.settings.cost_table,
            self.settings.budget,
            ctx.started_at_ms(),
        );

        trace.push(DispatchPhase::GateCheck);
        let skip = self.gate_check(event);
        let outcome = match skip {
            Some(reason) => {
                trace.push(DispatchPhase::Skip);
                emit(
                    logger,
                    self.clock.now_ms(),
                    LogLevel::Info,
                    &DiagnosticRecord::InvocationSkipped {
                        cascade_id: cascade_id.clone(),
                        path: event.path().render(),
                        reason: reason.as_str().to_string(),
                    },
                );
                DispatchOutcome::Skipped(reason)
            }
            None => {
                trace.push(DispatchPhase::Proceed);
                trace.push(DispatchPhase::ExecutingProjection);
                let limits = IoLimits::from(&self.settings);
                let mut io = GuardedIo::new(
                    self.projection.cascade_id(),
                    store,
                    &self.governor,
                    &mut ctx,
                    &mut ledger,
                    self.clock.as_mut(),
                    self.sleeper.as_mut(),
                    logger,
                    limits,
                );
                let result = self.projection.apply(event, &mut io);
                let partial = io.report();
                drop(io);
                match result {
                    Ok(report) => {
                        trace.push(DispatchPhase::Success);
                        if report.budget_stopped {
                            DispatchOutcome::BudgetStopped(report)
                        } else {
                            DispatchOutcome::Completed(report)
                        }
                    }
                    Err(error) => {
                        trace.push(DispatchPhase::CaughtFailure);
                        self.classify_failure(logger, &cascade_id, event, error, partial)
                    }
                }
            }
        };

        trace.push(DispatchPhase::Terminal);
        let now_ms = self.clock.now_ms();
        let cost = ledger.summary(now_ms);
        emit(
            logger,
            now_ms,
            LogLevel::Info,
            &DiagnosticRecord::CostSummary {
                cascade_id: cascade_id.clone(),
                path: event.path().render(),
                outcome: outcome.as_str().to_string(),
                summary: cost,
            },
        );
        InvocationRecord {
            cascade_id,
            path: event.path().clone(),
            outcome,
            trace,
            cost,
        }
    }

    fn gate_check(&self, event: &ChangeEvent) -> Option<SkipReason> {
        if self.breaker.engaged() {
            return Some(SkipReason::CircuitOpen);
        }
        if event.kind() == EventKind::Updated {
            if let Some(after) = event.after() {
                if self.gate.evaluate(event.before(), after) == GateVerdict::Skip {
                    return Some(SkipReason::IrrelevantChange);
                }
            }
        }
        if is_self_write(self.projection.cascade_id(), event.before(), event.after()) {
            return Some(SkipReason::SelfWrite);
        }
        None
    }

    fn classify_failure(
        &mut self,
        logger: &mut DiagnosticLogger,
        cascade_id: &str,
        event: &ChangeEvent,
        error: ProjectionError,
        partial: ProjectionReport,
    ) -> DispatchOutcome {
        let now_ms = self.clock.now_ms();
        match error {
            ProjectionError::Io(GuardedIoError::Governor(cause)) => {
                emit(
                    logger,
                    now_ms,
                    LogLevel::Error,
                    &DiagnosticRecord::CeilingBreached {
                        cascade_id: cascade_id.to_string(),
                        path: event.path().render(),
                        detail: cause.to_string(),
                    },
                );
                DispatchOutcome::ResourceExhausted {
                    cause: ExhaustionCause::Governor(cause),
                    partial,
                }
            }
            ProjectionError::Io(GuardedIoError::Ledger(LedgerError::BudgetExceeded {
                estimated_cost,
                budget,
            })) => {
                emit(
                    logger,
                    now_ms,
                    LogLevel::Error,
                    &DiagnosticRecord::BudgetOverrun {
                        cascade_id: cascade_id.to_string(),
                        estimated_cost,
                        budget,
                        mode: "hard_abort".to_string(),
                    },
                );
                DispatchOutcome::ResourceExhausted {
                    cause: ExhaustionCause::Budget {
                        estimated_cost,
                        budget,
                    },
                    partial,
                }
            }
            ProjectionError::Io(GuardedIoError::Ledger(LedgerError::BudgetStopRequested {
                ..
            })) => {
                let mut report = partial;
                report.budget_stopped = true;
                DispatchOutcome::BudgetStopped(report)
            }
            other => {
                emit(
                    logger,
                    now_ms,
                    LogLevel::Error,
                    &DiagnosticRecord::ProjectionFailed {
                        cascade_id: cascade_id.to_string(),
                        path: event.path().render(),
                        detail: other.to_string(),
                    },
                );
                DispatchOutcome::Failed {
                    detail: other.to_string(),
                    partial,
                }
            }
        }
    }
}

fn emit(logger: &mut DiagnosticLogger, ts_ms: u64, level: LogLevel, record: &DiagnosticRecord) {
    // Diagnostics must never take an invocation down with them.
    let _ = logger.log(ts_ms, level, record);
}
