use cascata::{
    CascadeSettings, ChangeEvent, CircuitBreaker, CompanyFanout, DiagnosticLogger,
    DispatchOutcome, DocumentPath, DocumentStore, ManualClock, MemoryStore, RecordingSleeper,
    TriggerDispatcher, COMPANY_FANOUT_CASCADE, PROVENANCE_FIELD,
};
use serde_json::{json, Map, Value};

fn company_fields(name: &str, sector: &str, city: &str) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("name".to_string(), name.into());
    fields.insert("sector".to_string(), sector.into());
    fields.insert("city".to_string(), city.into());
    fields
}

fn deal_fields(company: &str, snapshot: Option<Value>) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("company_id".to_string(), company.into());
    fields.insert("stage".to_string(), "pipeline".into());
    if let Some(snapshot) = snapshot {
        fields.insert("company_snapshot".to_string(), snapshot);
    }
    fields
}

fn dispatcher(settings: CascadeSettings) -> TriggerDispatcher {
    TriggerDispatcher::new(
        Box::new(CompanyFanout::default()),
        settings,
        CircuitBreaker::new(false),
    )
    .with_clock(Box::new(ManualClock::starting_at(0)))
    .with_sleeper(Box::new(RecordingSleeper::new()))
}

fn rename_event(company_id: &str, from: &str, to: &str) -> ChangeEvent {
    ChangeEvent::updated(
        DocumentPath::new("companies", company_id),
        company_fields(from, "software", "Austin"),
        company_fields(to, "software", "Austin"),
    )
}

#[test]
fn snapshot_fans_out_to_every_referencing_deal() {
    let mut store = MemoryStore::new();
    for idx in 0..5 {
        store.seed(
            DocumentPath::new("deals", &format!("d{idx}")),
            deal_fields("c1", None),
        );
    }
    store.seed(DocumentPath::new("deals", "unrelated"), deal_fields("c2", None));
    let mut dispatcher = dispatcher(CascadeSettings::default());
    let mut logger = DiagnosticLogger::default();

    let record = dispatcher.dispatch(&mut store, &mut logger, &rename_event("c1", "Initech", "Initrode"));
    match record.outcome {
        DispatchOutcome::Completed(report) => assert_eq!(report.documents_written, 5),
        other => panic!("unexpected outcome: {other:?}"),
    }

    let expected = json!({"name": "Initrode", "sector": "software", "city": "Austin"});
    for idx in 0..5 {
        let deal = store
            .get(&DocumentPath::new("deals", &format!("d{idx}")))
            .unwrap()
            .unwrap();
        assert_eq!(deal.field("company_snapshot"), Some(&expected));
        // Every fan-out write carries the cascade's provenance entry.
        let provenance = deal.field(PROVENANCE_FIELD).unwrap().as_object().unwrap();
        assert!(provenance.contains_key(COMPANY_FANOUT_CASCADE));
    }
    let untouched = store
        .get(&DocumentPath::new("deals", "unrelated"))
        .unwrap()
        .unwrap();
    assert!(untouched.field("company_snapshot").is_none());
}

#[test]
fn current_snapshots_are_pruned_as_noops() {
    let snapshot = json!({"name": "Initech", "sector": "software", "city": "Austin"});
    let mut store = MemoryStore::new();
    store.seed(
        DocumentPath::new("deals", "fresh"),
        deal_fields("c1", Some(snapshot.clone())),
    );
    store.seed(DocumentPath::new("deals", "stale"), deal_fields("c1", None));
    let mut dispatcher = dispatcher(CascadeSettings::default());
    let mut logger = DiagnosticLogger::default();

    let event = ChangeEvent::updated(
        DocumentPath::new("companies", "c1"),
        company_fields("Initech", "software", "Houston"),
        company_fields("Initech", "software", "Austin"),
    );
    let record = dispatcher.dispatch(&mut store, &mut logger, &event);
    match record.outcome {
        DispatchOutcome::Completed(report) => {
            assert_eq!(report.documents_written, 1);
            assert_eq!(report.writes_skipped, 1);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn fanout_writes_are_chunked_with_backoff() {
    let mut store = MemoryStore::new();
    for idx in 0..7 {
        store.seed(
            DocumentPath::new("deals", &format!("d{idx}")),
            deal_fields("c1", None),
        );
    }
    let settings = CascadeSettings {
        max_batch_size: 3,
        ..CascadeSettings::default()
    };
    let mut dispatcher = dispatcher(settings);
    let mut logger = DiagnosticLogger::default();

    let before = store.commit_count();
    let record = dispatcher.dispatch(&mut store, &mut logger, &rename_event("c1", "Initech", "Initrode"));
    match record.outcome {
        DispatchOutcome::Completed(report) => assert_eq!(report.documents_written, 7),
        other => panic!("unexpected outcome: {other:?}"),
    }
    // 7 targets at batch size 3: three atomic commits.
    assert_eq!(store.commit_count() - before, 3);
}

#[test]
fn replaying_the_fanout_write_back_into_the_cascade_skips() {
    let mut store = MemoryStore::new();
    store.seed(DocumentPath::new("deals", "d0"), deal_fields("c1", None));
    let mut dispatcher = dispatcher(CascadeSettings::default());
    let mut logger = DiagnosticLogger::default();
    dispatcher.dispatch(&mut store, &mut logger, &rename_event("c1", "Initech", "Initrode"));

    let written = store
        .get(&DocumentPath::new("deals", "d0"))
        .unwrap()
        .unwrap();
    let mut before = written.fields.clone();
    before.remove("company_snapshot");
    before.remove(PROVENANCE_FIELD);
    let replay = ChangeEvent::updated(
        DocumentPath::new("deals", "d0"),
        before,
        written.fields.clone(),
    );
    let commits = store.commit_count();
    let record = dispatcher.dispatch(&mut store, &mut logger, &replay);
    assert!(matches!(record.outcome, DispatchOutcome::Skipped(_)));
    assert_eq!(store.commit_count(), commits);
}

#[test]
fn company_deletion_is_a_noop_for_the_fanout() {
    let mut store = MemoryStore::new();
    store.seed(DocumentPath::new("deals", "d0"), deal_fields("c1", None));
    let mut dispatcher = dispatcher(CascadeSettings::default());
    let mut logger = DiagnosticLogger::default();
    let event = ChangeEvent::deleted(
        DocumentPath::new("companies", "c1"),
        company_fields("Initech", "software", "Austin"),
    );
    let record = dispatcher.dispatch(&mut store, &mut logger, &event);
    match record.outcome {
        DispatchOutcome::Completed(report) => {
            assert_eq!(report.documents_written, 0);
            assert!(report.note.is_some());
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(store.commit_count(), 0);
}
