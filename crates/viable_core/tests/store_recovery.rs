use serde_json::{json, Value};
use std::path::Path;
use viable_core::{seed_document, Inspection, LoadOutcome, RecoveryKind, Store};

fn current_payload() -> Value {
    json!({
        "schemaVersion": 13,
        "nodes": [], "variables": [], "episodes": [], "actions": [], "notes": [],
        "models": [], "links": [], "exceptions": [], "proxies": [], "proxyReadings": []
    })
}

fn write_json(path: &Path, payload: &Value) -> Vec<u8> {
    let bytes = serde_json::to_vec_pretty(payload).unwrap();
    std::fs::write(path, &bytes).unwrap();
    bytes
}

fn expect_recovered(outcome: LoadOutcome, expected: RecoveryKind) -> std::path::PathBuf {
    match outcome {
        LoadOutcome::Recovered {
            kind,
            quarantined_to: Some(path),
        } => {
            assert_eq!(kind, expected);
            path
        }
        other => panic!("unexpected outcome: {other}"),
    }
}

#[test]
fn garbage_bytes_are_quarantined_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(&path, b"not json at all").unwrap();
    let store = Store::open_at(&path);

    let report = store.load_with_report();

    assert_eq!(report.document, seed_document());
    let quarantined = expect_recovered(report.outcome, RecoveryKind::ParseFailure);
    assert_eq!(quarantined.parent(), path.parent());
    assert_eq!(std::fs::read(&quarantined).unwrap(), b"not json at all");
    assert!(!path.exists());
    assert_eq!(store.quarantined(), vec![quarantined]);
}

#[test]
fn dangling_episode_reference_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let mut payload = current_payload();
    payload["actions"] = json!([
        {"id": "act-1", "description": "walk", "status": "Pending", "episodeId": "ep-missing"}
    ]);
    let bytes = write_json(&path, &payload);

    let report = Store::open_at(&path).load_with_report();

    assert_eq!(report.document, seed_document());
    let quarantined = expect_recovered(report.outcome, RecoveryKind::ReferentialIntegrity);
    assert_eq!(std::fs::read(quarantined).unwrap(), bytes);
}

#[test]
fn part_of_cycle_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let mut payload = current_payload();
    payload["nodes"] = json!([
        {"id": "a", "kind": "Personal", "name": "A", "tags": []},
        {"id": "b", "kind": "Personal", "name": "B", "tags": []}
    ]);
    payload["links"] = json!([
        {"id": "l1", "sourceId": "b", "targetId": "a", "relation": "part_of"},
        {"id": "l2", "sourceId": "a", "targetId": "b", "relation": "part_of"}
    ]);
    write_json(&path, &payload);

    let report = Store::open_at(&path).load_with_report();
    expect_recovered(report.outcome, RecoveryKind::ReferentialIntegrity);
}

#[test]
fn future_version_is_quarantined() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let mut payload = current_payload();
    payload["schemaVersion"] = json!(99);
    write_json(&path, &payload);

    let report = Store::open_at(&path).load_with_report();
    expect_recovered(report.outcome, RecoveryKind::SchemaMismatch);
}

#[test]
fn wrong_enum_value_is_schema_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let mut payload = current_payload();
    payload["variables"] = json!([
        {"id": "v1", "node": {"type": "Personal", "id": "personal"}, "name": "Sleep", "status": "Great"}
    ]);
    write_json(&path, &payload);

    let report = Store::open_at(&path).load_with_report();
    expect_recovered(report.outcome, RecoveryKind::SchemaMismatch);
}

#[test]
fn repeated_corruption_keeps_every_copy() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let store = Store::open_at(&path);

    std::fs::write(&path, b"{").unwrap();
    store.load();
    std::fs::write(&path, b"[]").unwrap();
    store.load();

    let quarantined = store.quarantined();
    assert_eq!(quarantined.len(), 2);
    let mut contents: Vec<Vec<u8>> = quarantined
        .iter()
        .map(|copy| std::fs::read(copy).unwrap())
        .collect();
    contents.sort();
    assert_eq!(contents, vec![b"[]".to_vec(), b"{".to_vec()]);
}

#[test]
fn recovered_load_can_be_saved_over() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(&path, b"not json at all").unwrap();
    let store = Store::open_at(&path);

    let report = store.load_with_report();
    store
        .save_if_unchanged(&report.document, &report.revision)
        .unwrap();

    assert_eq!(store.load(), seed_document());
    assert_eq!(store.quarantined().len(), 1);
}

#[test]
fn inspect_reports_without_side_effects() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let store = Store::open_at(&path);

    assert!(matches!(store.inspect().unwrap(), Inspection::Absent));

    std::fs::write(&path, b"not json at all").unwrap();
    let inspection = store.inspect().unwrap();
    assert!(matches!(inspection, Inspection::Unparsable(_)));
    assert!(!inspection.is_valid());
    assert!(path.exists());
    assert!(store.quarantined().is_empty());

    let mut payload = current_payload();
    payload["actions"] = json!([
        {"id": "act-1", "description": "walk", "status": "Pending", "episodeId": "ep-missing"}
    ]);
    write_json(&path, &payload);
    match store.inspect().unwrap() {
        Inspection::Invalid(err) => assert!(err.is_referential(), "unexpected error: {err}"),
        other => panic!("unexpected inspection: {other:?}"),
    }

    write_json(&path, &current_payload());
    match store.inspect().unwrap() {
        Inspection::Valid {
            from_level,
            entity_count,
            ..
        } => {
            assert_eq!(from_level, 13);
            assert_eq!(entity_count, 0);
        }
        other => panic!("unexpected inspection: {other:?}"),
    }
}
