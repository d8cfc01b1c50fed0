use cascata::{
    CostSummary, DiagnosticLogger, DiagnosticRecord, LogLevel, LogRotationPolicy,
};
use serde_json::Value;

fn skip_record(reason: &str) -> DiagnosticRecord {
    DiagnosticRecord::InvocationSkipped {
        cascade_id: "pipeline_totals".to_string(),
        path: "deals/d1".to_string(),
        reason: reason.to_string(),
    }
}

#[test]
fn records_serialize_with_a_kind_discriminator() {
    let mut logger = DiagnosticLogger::default();
    logger.log(100, LogLevel::Info, &skip_record("self_write")).unwrap();
    logger
        .log(
            200,
            LogLevel::Info,
            &DiagnosticRecord::CostSummary {
                cascade_id: "pipeline_totals".to_string(),
                path: "deals/d1".to_string(),
                outcome: "completed".to_string(),
                summary: CostSummary {
                    operation_count: 4,
                    estimated_cost: 9,
                    elapsed_ms: 12,
                },
            },
        )
        .unwrap();

    let lines: Vec<&str> = logger.lines().collect();
    assert_eq!(lines.len(), 2);
    let first: Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(first["kind"], "invocation_skipped");
    assert_eq!(first["reason"], "self_write");
    assert_eq!(first["level"], "INFO");
    assert_eq!(first["ts"], 100);
    assert_eq!(first["seq"], 1);
    let second: Value = serde_json::from_str(lines[1]).unwrap();
    assert_eq!(second["kind"], "cost_summary");
    assert_eq!(second["operation_count"], 4);
    assert_eq!(second["estimated_cost"], 9);
    assert_eq!(second["elapsed_ms"], 12);
    assert_eq!(second["seq"], 2);
}

#[test]
fn level_filter_suppresses_quieter_records() {
    let mut logger = DiagnosticLogger::default();
    logger.set_level(LogLevel::Warn);
    logger.log(1, LogLevel::Info, &skip_record("irrelevant_change")).unwrap();
    assert_eq!(logger.lines().count(), 0);
    logger
        .log(
            2,
            LogLevel::Error,
            &DiagnosticRecord::ProjectionFailed {
                cascade_id: "pipeline_totals".to_string(),
                path: "deals/d1".to_string(),
                detail: "boom".to_string(),
            },
        )
        .unwrap();
    assert_eq!(logger.lines().count(), 1);
}

#[test]
fn rotation_caps_retained_files() {
    let mut logger = DiagnosticLogger::new(LogRotationPolicy {
        max_bytes: 200,
        max_files: 2,
    });
    for idx in 0..40 {
        logger
            .log(idx, LogLevel::Info, &skip_record("circuit_open"))
            .unwrap();
    }
    // Two rotated files plus the active one.
    assert!(logger.files().count() <= 3);
    for file in logger.files() {
        assert!(file.bytes_written() <= 400);
    }
    // The newest record is always retained.
    assert!(logger.lines().last().unwrap().contains("\"ts\":39"));
}
