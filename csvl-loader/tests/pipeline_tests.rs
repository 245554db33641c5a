//! End-to-end pipeline runs against an in-memory remote store

mod helpers;

use csvl_loader::models::{OutcomeStatus, Record};
use csvl_loader::services::{
    csv_input, prepare, AcceptAll, ArtifactSettings, BatchOrchestrator, ExecutorSettings,
    ImportPipeline, JsonSchemaCheck, MapError, MappingTable, NoProgress, RemoteError,
    ResourceKind, StatsReport,
};
use csvl_loader::utils::RetryPolicy;
use csvl_loader::LoaderError;
use helpers::{api_error, MockRemoteClient};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;

fn settings() -> ExecutorSettings {
    ExecutorSettings {
        retry: RetryPolicy::immediate(3),
        ..ExecutorSettings::new(ResourceKind::Product)
    }
}

fn name_mapping() -> MappingTable {
    MappingTable::parse([("name", "name")], "name").unwrap()
}

fn rows(names: &[&str]) -> Vec<Record> {
    names
        .iter()
        .enumerate()
        .map(|(ordinal, name)| Record::from_pairs(ordinal, [("name", *name)]))
        .collect()
}

// ============================================================================
// Full runs
// ============================================================================

#[tokio::test]
async fn test_two_rows_one_at_a_time() {
    let client = MockRemoteClient::new();
    let settings = settings();
    let prepared = prepare(rows(&["A", "B"]), &AcceptAll, &name_mapping()).unwrap();

    let pipeline = ImportPipeline::new(&client, &settings, &AcceptAll, "Test Project");
    let orchestrator = BatchOrchestrator::new(1, Arc::new(NoProgress));
    let report = pipeline.execute(prepared, &orchestrator, 0).await.unwrap();

    assert_eq!(report.ledger.success_count, 2);
    assert_eq!(report.ledger.failure_count, 0);
    assert!(report.ledger.failure_messages.is_empty());
    assert_eq!(report.container.unwrap().name, "Test Project");
    assert_eq!(client.container_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_project_failure_aborts_before_any_upsert() {
    let client = MockRemoteClient::new();
    client.fail_container(api_error(403));
    let settings = settings();
    let prepared = prepare(rows(&["A"]), &AcceptAll, &name_mapping()).unwrap();

    let pipeline = ImportPipeline::new(&client, &settings, &AcceptAll, "Test Project");
    let orchestrator = BatchOrchestrator::new(1, Arc::new(NoProgress));
    let result = pipeline.execute(prepared, &orchestrator, 0).await;

    match result {
        Err(LoaderError::Setup { project, source }) => {
            assert_eq!(project, "Test Project");
            assert_eq!(source.status(), Some(403));
        }
        other => panic!("expected setup error, got {:?}", other.map(|r| r.ledger)),
    }
    assert_eq!(client.total_upserts(), 0);
}

#[test]
fn test_unmapped_column_is_fatal() {
    let rows = vec![Record::from_pairs(0, [("name", "A"), ("sku", "S1")])];

    let result = prepare(rows, &AcceptAll, &name_mapping());

    assert!(matches!(
        result,
        Err(LoaderError::Mapping(MapError::UnmappedField { ref field, ordinal: 0 })) if field == "sku"
    ));
}

#[test]
fn test_invalid_rows_are_set_aside() {
    let schema = JsonSchemaCheck::compile(
        "input",
        &json!({
            "type": "object",
            "required": ["name"],
            "properties": { "name": { "type": "string", "minLength": 1 } }
        }),
    )
    .unwrap();

    let prepared = prepare(rows(&["A", "", "C"]), &schema, &name_mapping()).unwrap();

    assert_eq!(prepared.total_rows, 3);
    assert_eq!(prepared.documents.len(), 2);
    assert_eq!(prepared.invalid_rows.len(), 1);
    assert_eq!(prepared.invalid_rows[0].ordinal, 1);
    assert_eq!(prepared.documents[1].ordinal, 2);
}

// ============================================================================
// Executor steps
// ============================================================================

#[tokio::test]
async fn test_output_schema_violation_is_never_sent() {
    let client = MockRemoteClient::new();
    let settings = settings();
    let output_schema = JsonSchemaCheck::compile(
        "output",
        &json!({
            "type": "object",
            "properties": { "name": { "type": "string", "maxLength": 3 } }
        }),
    )
    .unwrap();
    let prepared = prepare(rows(&["Mug", "Teapot"]), &AcceptAll, &name_mapping()).unwrap();

    let pipeline = ImportPipeline::new(&client, &settings, &output_schema, "P");
    let orchestrator = BatchOrchestrator::new(2, Arc::new(NoProgress));
    let report = pipeline.execute(prepared, &orchestrator, 0).await.unwrap();

    assert_eq!((report.ledger.success_count, report.ledger.failure_count), (1, 1));
    assert_eq!(client.upserts_for("name=Teapot"), 0);
    assert!(report.ledger.failure_messages[0]
        .starts_with("Record 1 (Teapot): Schema validation failed: Teapot\n- /name"));
}

#[tokio::test]
async fn test_identifier_update_key() {
    let client = MockRemoteClient::new();
    let settings = ExecutorSettings {
        update_key: "sku".to_string(),
        ..settings()
    };
    let mapping =
        MappingTable::parse([("name", "name"), ("sku", "identifiers.sku")], "name").unwrap();
    let records = vec![
        Record::from_pairs(0, [("name", "Mug"), ("sku", "M-1")]),
        Record::from_pairs(1, [("name", "Cup"), ("sku", "")]),
    ];
    let prepared = prepare(records, &AcceptAll, &mapping).unwrap();

    let pipeline = ImportPipeline::new(&client, &settings, &AcceptAll, "P");
    let orchestrator = BatchOrchestrator::new(2, Arc::new(NoProgress));
    let report = pipeline.execute(prepared, &orchestrator, 0).await.unwrap();

    assert_eq!(client.upserts_for("identifiers.sku=M-1"), 1);
    assert!(report.ledger.outcome(0).unwrap().is_success());
    assert_eq!(
        report.ledger.outcome(1).unwrap().failure_message().unwrap(),
        "Record 1 (Cup): Resource has no identifiers.sku to match on"
    );
}

#[tokio::test]
async fn test_redirector_and_qr_download() {
    let dir = tempfile::tempdir().unwrap();
    let client = MockRemoteClient::new();
    let settings = ExecutorSettings {
        default_redirect_url: Some("https://example.com/default".to_string()),
        artifacts: Some(ArtifactSettings {
            output_dir: dir.path().join("qr"),
            url_template: "https://{shortDomain}/{shortId}.png".to_string(),
        }),
        ..settings()
    };
    let mapping =
        MappingTable::parse([("name", "name"), ("url", "redirectUrl")], "name").unwrap();
    let records = vec![
        Record::from_pairs(0, [("name", "Blue Mug"), ("url", "https://example.com/mug")]),
        Record::from_pairs(1, [("name", "Cup"), ("url", "")]),
    ];
    let prepared = prepare(records, &AcceptAll, &mapping).unwrap();

    let pipeline = ImportPipeline::new(&client, &settings, &AcceptAll, "P");
    let orchestrator = BatchOrchestrator::new(1, Arc::new(NoProgress));
    let report = pipeline.execute(prepared, &orchestrator, 0).await.unwrap();

    assert_eq!(report.ledger.success_count, 2);

    // redirectUrl drives the redirector and is not part of the resource
    let upserts = client.upsert_calls.lock().unwrap().clone();
    assert!(upserts.iter().all(|(_, body)| body.get("redirectUrl").is_none()));

    let secondary = client.secondary_calls.lock().unwrap().clone();
    assert_eq!(
        secondary,
        vec![
            ("U-name=Blue Mug".to_string(), json!({ "defaultRedirectUrl": "https://example.com/mug" })),
            ("U-name=Cup".to_string(), json!({ "defaultRedirectUrl": "https://example.com/default" })),
        ]
    );

    match &report.ledger.outcome(0).unwrap().status {
        OutcomeStatus::Success(applied) => {
            assert_eq!(applied.short_id.as_deref(), Some("s1"));
            let artifact = applied.artifact.as_ref().unwrap();
            assert_eq!(artifact, &dir.path().join("qr").join("Blue_Mug_s1.png"));
            assert_eq!(std::fs::read(artifact).unwrap(), b"\x89PNG");
        }
        other => panic!("expected success, got {:?}", other),
    }
    assert_eq!(
        client.fetched_urls.lock().unwrap()[0],
        "https://tn.gg/s1.png"
    );
}

#[tokio::test]
async fn test_no_redirector_without_url() {
    let client = MockRemoteClient::new();
    let settings = settings();
    let prepared = prepare(rows(&["A"]), &AcceptAll, &name_mapping()).unwrap();

    let pipeline = ImportPipeline::new(&client, &settings, &AcceptAll, "P");
    let orchestrator = BatchOrchestrator::new(1, Arc::new(NoProgress));
    pipeline.execute(prepared, &orchestrator, 0).await.unwrap();

    assert!(client.secondary_calls.lock().unwrap().is_empty());
    assert!(client.fetched_urls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_scope_failure_is_retried_then_recorded() {
    let client = MockRemoteClient::new();
    client.fail_scope("U-name=B", api_error(503));
    let settings = settings();
    let prepared = prepare(rows(&["A", "B"]), &AcceptAll, &name_mapping()).unwrap();

    let pipeline = ImportPipeline::new(&client, &settings, &AcceptAll, "P");
    let orchestrator = BatchOrchestrator::new(2, Arc::new(NoProgress));
    let report = pipeline.execute(prepared, &orchestrator, 0).await.unwrap();

    assert_eq!((report.ledger.success_count, report.ledger.failure_count), (1, 1));
    assert_eq!(client.scopes_for("U-name=B"), 3);
    assert_eq!(client.scopes_for("U-name=A"), 1);
    assert_eq!(
        report.ledger.failure_messages,
        vec!["Record 1 (B): Project scope update failed: API error 503: status 503 (after 3 attempts)"
            .to_string()]
    );
}

#[tokio::test]
async fn test_redirector_failure_keeps_earlier_steps() {
    let client = MockRemoteClient::new();
    client.fail_secondary("U-name=Mug", api_error(400));
    let settings = ExecutorSettings {
        default_redirect_url: Some("https://example.com/default".to_string()),
        ..settings()
    };
    let prepared = prepare(rows(&["Mug", "Cup"]), &AcceptAll, &name_mapping()).unwrap();

    let pipeline = ImportPipeline::new(&client, &settings, &AcceptAll, "P");
    let orchestrator = BatchOrchestrator::new(1, Arc::new(NoProgress));
    let report = pipeline.execute(prepared, &orchestrator, 0).await.unwrap();

    let mug = report.ledger.outcome(0).unwrap();
    assert_eq!(
        mug.failure_message().unwrap(),
        "Record 0 (Mug): Redirector failed: API error 400: status 400"
    );
    assert!(report.ledger.outcome(1).unwrap().is_success());

    // The upserted resource stays in place and scoped
    assert_eq!(client.upserts_for("name=Mug"), 1);
    assert_eq!(client.scopes_for("U-name=Mug"), 1);
    assert_eq!(client.fetched_urls.lock().unwrap().len(), 0);
}

#[tokio::test]
async fn test_qr_download_failure_keeps_success() {
    let dir = tempfile::tempdir().unwrap();
    let client = MockRemoteClient::new();
    client.fail_fetch(RemoteError::Network("connection reset".to_string()));
    let settings = ExecutorSettings {
        default_redirect_url: Some("https://example.com/default".to_string()),
        artifacts: Some(ArtifactSettings {
            output_dir: dir.path().join("qr"),
            url_template: "https://{shortDomain}/{shortId}.png".to_string(),
        }),
        ..settings()
    };
    let prepared = prepare(rows(&["A"]), &AcceptAll, &name_mapping()).unwrap();

    let pipeline = ImportPipeline::new(&client, &settings, &AcceptAll, "P");
    let orchestrator = BatchOrchestrator::new(1, Arc::new(NoProgress));
    let report = pipeline.execute(prepared, &orchestrator, 0).await.unwrap();

    assert_eq!((report.ledger.success_count, report.ledger.failure_count), (1, 0));
    match &report.ledger.outcome(0).unwrap().status {
        OutcomeStatus::Success(applied) => {
            assert_eq!(applied.short_id.as_deref(), Some("s1"));
            assert_eq!(applied.artifact, None);
        }
        other => panic!("expected success, got {:?}", other),
    }
    // Network errors are retried before giving up on the image
    assert_eq!(client.fetched_urls.lock().unwrap().len(), 3);
    assert!(!dir.path().join("qr").join("A_s1.png").exists());
}

#[tokio::test]
async fn test_identity_field_names_failures_and_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let client = MockRemoteClient::new();
    let settings = ExecutorSettings {
        update_key: "sku".to_string(),
        default_redirect_url: Some("https://example.com/default".to_string()),
        artifacts: Some(ArtifactSettings {
            output_dir: dir.path().to_path_buf(),
            url_template: "https://{shortDomain}/{shortId}.png".to_string(),
        }),
        ..settings()
    };
    client.fail_always("identifiers.sku=C-2", api_error(409));
    let mapping = MappingTable::parse([("sku", "identifiers.sku")], "identifiers.sku").unwrap();
    let records = vec![
        Record::from_pairs(0, [("sku", "M-1")]),
        Record::from_pairs(1, [("sku", "C-2")]),
    ];
    let prepared = prepare(records, &AcceptAll, &mapping).unwrap();

    let pipeline = ImportPipeline::new(&client, &settings, &AcceptAll, "P");
    let orchestrator = BatchOrchestrator::new(1, Arc::new(NoProgress));
    let report = pipeline.execute(prepared, &orchestrator, 0).await.unwrap();

    assert_eq!(
        report.ledger.failure_messages,
        vec!["Record 1 (C-2): Upsert failed: API error 409: status 409".to_string()]
    );
    match &report.ledger.outcome(0).unwrap().status {
        OutcomeStatus::Success(applied) => {
            assert_eq!(applied.artifact.as_deref(), Some(dir.path().join("M-1_s1.png").as_path()));
        }
        other => panic!("expected success, got {:?}", other),
    }
}

// ============================================================================
// CSV in, stats out
// ============================================================================

#[tokio::test]
async fn test_csv_to_stats_file() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("products.csv");
    std::fs::write(&data, "\u{feff}name,name ,color\nMug,dup,blue\nCup,dup,red\n").unwrap();

    let client = MockRemoteClient::new();
    client.fail_always("name=Cup", api_error(422));
    let settings = settings();
    let mapping = MappingTable::parse(
        [("name", "name"), ("color", "customFields.color")],
        "name",
    )
    .unwrap();

    let records = csv_input::read_records(&data).unwrap();
    let prepared = prepare(records, &AcceptAll, &mapping).unwrap();
    let pipeline = ImportPipeline::new(&client, &settings, &AcceptAll, "P");
    let orchestrator = BatchOrchestrator::new(2, Arc::new(NoProgress));
    let report = pipeline.execute(prepared, &orchestrator, 0).await.unwrap();

    let upserts = client.upsert_calls.lock().unwrap().clone();
    let mug = upserts.iter().find(|(f, _)| f == "name=Mug").unwrap();
    assert_eq!(mug.1, json!({ "name": "Mug", "customFields": { "color": "blue" } }));

    let stats_path = dir.path().join("stats.txt");
    StatsReport::from_import(&data, &report).write(&stats_path).unwrap();
    let stats = std::fs::read_to_string(&stats_path).unwrap();

    assert!(stats.contains("\nOK: 1\n\nFailed: 1\n"));
    assert!(stats.contains("\nErrors:\nRecord 1 (Cup): Upsert failed: API error 422"));
}
