use cascata::projections::pipeline_totals::recompute_pipeline;
use cascata::{
    CascadeSettings, ChangeEvent, CircuitBreaker, DiagnosticLogger, DispatchOutcome, DocumentPath,
    DocumentStore, ManualClock, MemoryStore, PipelineTotals, RecordingSleeper, TriggerDispatcher,
};
use serde_json::{json, Map, Value};

fn deal_fields(company: &str, stage: &str, revenue: Option<(f64, f64)>) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("company_id".to_string(), company.into());
    fields.insert("stage".to_string(), stage.into());
    if let Some((low, high)) = revenue {
        fields.insert("revenue_low".to_string(), low.into());
        fields.insert("revenue_high".to_string(), high.into());
    }
    fields
}

fn dispatcher() -> TriggerDispatcher {
    TriggerDispatcher::new(
        Box::new(PipelineTotals::default()),
        CascadeSettings::default(),
        CircuitBreaker::new(false),
    )
    .with_clock(Box::new(ManualClock::starting_at(0)))
    .with_sleeper(Box::new(RecordingSleeper::new()))
}

fn seed_company_deals(store: &mut MemoryStore) {
    store.seed(
        DocumentPath::new("deals", "a"),
        deal_fields("x", "pipeline", Some((1_000.0, 2_000.0))),
    );
    store.seed(
        DocumentPath::new("deals", "b"),
        deal_fields("x", "pipeline", Some((500.0, 800.0))),
    );
    // Deal c qualifies by stage but carries no usable revenue data.
    store.seed(
        DocumentPath::new("deals", "c"),
        deal_fields("x", "pipeline", None),
    );
}

#[test]
fn aggregate_counts_all_deals_but_sums_only_usable_revenue() {
    let mut store = MemoryStore::new();
    seed_company_deals(&mut store);
    let mut dispatcher = dispatcher();
    let mut logger = DiagnosticLogger::default();

    let event = ChangeEvent::created(
        DocumentPath::new("deals", "c"),
        deal_fields("x", "pipeline", None),
    );
    let record = dispatcher.dispatch(&mut store, &mut logger, &event);
    assert!(matches!(record.outcome, DispatchOutcome::Completed(_)));

    let metrics = store
        .get(&DocumentPath::new("company_metrics", "x"))
        .unwrap()
        .expect("aggregate created lazily");
    assert_eq!(
        metrics.field("pipeline_value"),
        Some(&json!({"low": 1_500.0, "high": 2_800.0, "deal_count": 3}))
    );
}

#[test]
fn recomputing_with_no_further_changes_is_a_noop() {
    let mut store = MemoryStore::new();
    seed_company_deals(&mut store);
    let mut dispatcher = dispatcher();
    let mut logger = DiagnosticLogger::default();

    let event = ChangeEvent::created(
        DocumentPath::new("deals", "a"),
        deal_fields("x", "pipeline", Some((1_000.0, 2_000.0))),
    );
    dispatcher.dispatch(&mut store, &mut logger, &event);
    let commits = store.commit_count();
    let first = store
        .get(&DocumentPath::new("company_metrics", "x"))
        .unwrap()
        .unwrap();

    // Redelivery of the same event recomputes the same aggregate; the loop
    // guard withholds the identical write.
    let record = dispatcher.dispatch(&mut store, &mut logger, &event);
    match record.outcome {
        DispatchOutcome::Completed(report) => {
            assert_eq!(report.documents_written, 0);
            assert_eq!(report.writes_skipped, 1);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(store.commit_count(), commits);
    let second = store
        .get(&DocumentPath::new("company_metrics", "x"))
        .unwrap()
        .unwrap();
    assert_eq!(first, second);
}

#[test]
fn aggregate_is_overwritten_not_patched() {
    let mut store = MemoryStore::new();
    seed_company_deals(&mut store);
    let mut dispatcher = dispatcher();
    let mut logger = DiagnosticLogger::default();

    let event = ChangeEvent::created(
        DocumentPath::new("deals", "a"),
        deal_fields("x", "pipeline", Some((1_000.0, 2_000.0))),
    );
    dispatcher.dispatch(&mut store, &mut logger, &event);

    // Deal b leaves the pipeline; the store reflects it before the event.
    store.seed(
        DocumentPath::new("deals", "b"),
        deal_fields("x", "closed_lost", Some((500.0, 800.0))),
    );
    let event = ChangeEvent::updated(
        DocumentPath::new("deals", "b"),
        deal_fields("x", "pipeline", Some((500.0, 800.0))),
        deal_fields("x", "closed_lost", Some((500.0, 800.0))),
    );
    dispatcher.dispatch(&mut store, &mut logger, &event);

    let metrics = store
        .get(&DocumentPath::new("company_metrics", "x"))
        .unwrap()
        .unwrap();
    assert_eq!(
        metrics.field("pipeline_value"),
        Some(&json!({"low": 1_000.0, "high": 2_000.0, "deal_count": 2}))
    );
}

#[test]
fn reassigned_deal_recomputes_both_companies() {
    let mut store = MemoryStore::new();
    store.seed(
        DocumentPath::new("deals", "a"),
        deal_fields("new_co", "pipeline", Some((100.0, 200.0))),
    );
    let mut dispatcher = dispatcher();
    let mut logger = DiagnosticLogger::default();

    let event = ChangeEvent::updated(
        DocumentPath::new("deals", "a"),
        deal_fields("old_co", "pipeline", Some((100.0, 200.0))),
        deal_fields("new_co", "pipeline", Some((100.0, 200.0))),
    );
    let record = dispatcher.dispatch(&mut store, &mut logger, &event);
    match record.outcome {
        DispatchOutcome::Completed(report) => assert_eq!(report.documents_written, 2),
        other => panic!("unexpected outcome: {other:?}"),
    }

    let old_metrics = store
        .get(&DocumentPath::new("company_metrics", "old_co"))
        .unwrap()
        .unwrap();
    assert_eq!(
        old_metrics.field("pipeline_value"),
        Some(&json!({"low": 0.0, "high": 0.0, "deal_count": 0}))
    );
    let new_metrics = store
        .get(&DocumentPath::new("company_metrics", "new_co"))
        .unwrap()
        .unwrap();
    assert_eq!(
        new_metrics.field("pipeline_value"),
        Some(&json!({"low": 100.0, "high": 200.0, "deal_count": 1}))
    );
}

#[test]
fn recompute_is_order_independent() {
    let mut store = MemoryStore::new();
    seed_company_deals(&mut store);
    let deals = store
        .run_query(
            &cascata::Query::collection("deals", 100)
                .where_eq("company_id", "x")
                .where_eq("stage", "pipeline"),
        )
        .unwrap();
    let forward = recompute_pipeline(&deals);
    let mut reversed = deals.clone();
    reversed.reverse();
    let backward = recompute_pipeline(&reversed);
    assert_eq!(forward, backward);
    assert_eq!(forward.deal_count, 3);
    assert_eq!(forward.low, 1_500.0);
    assert_eq!(forward.high, 2_800.0);
}
