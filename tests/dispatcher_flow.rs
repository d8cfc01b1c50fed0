use cascata::{
    BudgetMode, CascadeSettings, ChangeEvent, CircuitBreaker, CostBudget, DiagnosticLogger,
    DispatchOutcome, DispatchPhase, DocumentPath, ExhaustionCause, GuardedIo, ManualClock,
    MemoryStore, Projection, ProjectionError, ProjectionReport, RecordingSleeper, SkipReason,
    TriggerDispatcher,
};
use serde_json::{Map, Value};

const TEST_CASCADE: &str = "deal_status_rollup";
const RELEVANT: &[&str] = &["status", "value"];

enum Behavior {
    Succeed,
    FailInvariant,
    WriteDerived,
    ReadMany(usize),
    RecurseDeep(u32),
}

struct TestProjection {
    behavior: Behavior,
}

impl Projection for TestProjection {
    fn cascade_id(&self) -> &str {
        TEST_CASCADE
    }

    fn relevant_fields(&self) -> &[&'static str] {
        RELEVANT
    }

    fn apply(
        &self,
        event: &ChangeEvent,
        io: &mut GuardedIo<'_>,
    ) -> Result<ProjectionReport, ProjectionError> {
        match &self.behavior {
            Behavior::Succeed => Ok(io.report()),
            Behavior::FailInvariant => Err(ProjectionError::Invariant {
                detail: "synthetic failure".to_string(),
            }),
            Behavior::WriteDerived => {
                let mut fields = Map::new();
                fields.insert("value".to_string(), Value::from(1));
                let derived = DocumentPath::new("derived", event.path().document_id());
                io.merge_write(&derived, fields)?;
                Ok(io.report())
            }
            Behavior::ReadMany(count) => {
                for idx in 0..*count {
                    io.read(&DocumentPath::new("deals", format!("d{idx}")))?;
                }
                Ok(io.report())
            }
            Behavior::RecurseDeep(depth) => {
                for _ in 0..*depth {
                    io.enter_recursion();
                }
                io.read(&DocumentPath::new("deals", "d0"))?;
                Ok(io.report())
            }
        }
    }
}

fn dispatcher(behavior: Behavior, settings: CascadeSettings) -> TriggerDispatcher {
    TriggerDispatcher::new(
        Box::new(TestProjection { behavior }),
        settings,
        CircuitBreaker::new(false),
    )
    .with_clock(Box::new(ManualClock::starting_at(0)))
    .with_sleeper(Box::new(RecordingSleeper::new()))
}

fn fields(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

fn relevant_update() -> ChangeEvent {
    ChangeEvent::updated(
        DocumentPath::new("deals", "d1"),
        fields(&[("status", "open".into()), ("value", 100.into())]),
        fields(&[("status", "closed".into()), ("value", 100.into())]),
    )
}

#[test]
fn successful_run_traverses_the_full_state_machine() {
    let mut dispatcher = dispatcher(Behavior::Succeed, CascadeSettings::default());
    let mut store = MemoryStore::new();
    let mut logger = DiagnosticLogger::default();
    let record = dispatcher.dispatch(&mut store, &mut logger, &relevant_update());
    assert!(matches!(record.outcome, DispatchOutcome::Completed(_)));
    assert_eq!(
        record.trace,
        vec![
            DispatchPhase::Idle,
            DispatchPhase::GateCheck,
            DispatchPhase::Proceed,
            DispatchPhase::ExecutingProjection,
            DispatchPhase::Success,
            DispatchPhase::Terminal,
        ]
    );
    assert_eq!(record.cascade_id, TEST_CASCADE);
}

#[test]
fn irrelevant_update_skips_before_the_projection_runs() {
    let mut dispatcher = dispatcher(Behavior::WriteDerived, CascadeSettings::default());
    let mut store = MemoryStore::new();
    let mut logger = DiagnosticLogger::default();
    let event = ChangeEvent::updated(
        DocumentPath::new("deals", "d1"),
        fields(&[("status", "open".into()), ("value", 100.into())]),
        fields(&[
            ("status", "open".into()),
            ("value", 100.into()),
            ("notes", "x".into()),
        ]),
    );
    let record = dispatcher.dispatch(&mut store, &mut logger, &event);
    assert_eq!(
        record.outcome,
        DispatchOutcome::Skipped(SkipReason::IrrelevantChange)
    );
    assert!(record.trace.contains(&DispatchPhase::Skip));
    assert_eq!(record.cost.operation_count, 0);
    assert_eq!(store.len(), 0);
    let skipped = logger
        .lines()
        .any(|line| line.contains("invocation_skipped") && line.contains("irrelevant_change"));
    assert!(skipped, "expected a structured skip record");
}

#[test]
fn creation_events_bypass_the_gate() {
    let mut dispatcher = dispatcher(Behavior::WriteDerived, CascadeSettings::default());
    let mut store = MemoryStore::new();
    let mut logger = DiagnosticLogger::default();
    let event = ChangeEvent::created(
        DocumentPath::new("deals", "d9"),
        fields(&[("status", "open".into())]),
    );
    let record = dispatcher.dispatch(&mut store, &mut logger, &event);
    match record.outcome {
        DispatchOutcome::Completed(report) => assert_eq!(report.documents_written, 1),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(store.len(), 1);
}

#[test]
fn deletion_events_bypass_the_gate() {
    let mut dispatcher = dispatcher(Behavior::Succeed, CascadeSettings::default());
    let mut store = MemoryStore::new();
    let mut logger = DiagnosticLogger::default();
    let event = ChangeEvent::deleted(
        DocumentPath::new("deals", "d1"),
        fields(&[("status", "open".into())]),
    );
    let record = dispatcher.dispatch(&mut store, &mut logger, &event);
    assert!(matches!(record.outcome, DispatchOutcome::Completed(_)));
}

#[test]
fn projection_failures_are_logged_and_swallowed() {
    let mut dispatcher = dispatcher(Behavior::FailInvariant, CascadeSettings::default());
    let mut store = MemoryStore::new();
    let mut logger = DiagnosticLogger::default();
    let record = dispatcher.dispatch(&mut store, &mut logger, &relevant_update());
    match &record.outcome {
        DispatchOutcome::Failed { detail, .. } => {
            assert!(detail.contains("synthetic failure"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(record.trace.contains(&DispatchPhase::CaughtFailure));
    assert!(logger.lines().any(|line| line.contains("projection_failed")));
    // The terminal cost summary is still emitted.
    assert!(logger.lines().any(|line| line.contains("cost_summary")));
}

#[test]
fn hard_budget_abort_surfaces_as_resource_exhaustion() {
    let settings = CascadeSettings {
        budget: CostBudget {
            max_cost: 3,
            mode: BudgetMode::HardAbort,
        },
        ..CascadeSettings::default()
    };
    let mut dispatcher = dispatcher(Behavior::ReadMany(10), settings);
    let mut store = MemoryStore::new();
    let mut logger = DiagnosticLogger::default();
    let record = dispatcher.dispatch(&mut store, &mut logger, &relevant_update());
    match &record.outcome {
        DispatchOutcome::ResourceExhausted { cause, .. } => {
            assert!(matches!(cause, ExhaustionCause::Budget { budget: 3, .. }));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn soft_budget_stop_ends_the_invocation_gracefully() {
    let settings = CascadeSettings {
        budget: CostBudget {
            max_cost: 3,
            mode: BudgetMode::SoftStop,
        },
        ..CascadeSettings::default()
    };
    let mut dispatcher = dispatcher(Behavior::ReadMany(10), settings);
    let mut store = MemoryStore::new();
    let mut logger = DiagnosticLogger::default();
    let record = dispatcher.dispatch(&mut store, &mut logger, &relevant_update());
    match &record.outcome {
        DispatchOutcome::BudgetStopped(report) => {
            assert!(report.budget_stopped);
            assert_eq!(report.documents_written, 0);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(logger.lines().any(|line| line.contains("soft_stop")));
}

#[test]
fn callers_only_ever_see_a_generic_internal_error() {
    let mut failing = dispatcher(Behavior::FailInvariant, CascadeSettings::default());
    let mut store = MemoryStore::new();
    let mut logger = DiagnosticLogger::default();
    let record = failing.dispatch(&mut store, &mut logger, &relevant_update());
    assert_eq!(record.outcome.client_result(), Err("internal error"));

    let mut dispatcher = dispatcher(Behavior::Succeed, CascadeSettings::default());
    let record = dispatcher.dispatch(&mut store, &mut logger, &relevant_update());
    assert_eq!(record.outcome.client_result(), Ok(()));
}

#[test]
fn recursion_breach_aborts_with_governor_cause() {
    let mut dispatcher = dispatcher(Behavior::RecurseDeep(5), CascadeSettings::default());
    let mut store = MemoryStore::new();
    let mut logger = DiagnosticLogger::default();
    let record = dispatcher.dispatch(&mut store, &mut logger, &relevant_update());
    match &record.outcome {
        DispatchOutcome::ResourceExhausted { cause, .. } => {
            assert!(matches!(cause, ExhaustionCause::Governor(_)));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(logger.lines().any(|line| line.contains("ceiling_breached")));
}
