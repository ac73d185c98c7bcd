#![allow(clippy::unwrap_used)]

use std::{fs, time::Duration};

use tempfile::TempDir;

use super::*;

fn layer_in(dir: &TempDir, allow_create: bool) -> DocumentLayer {
    let settings = DocumentSettings {
        allow_create,
        ..DocumentSettings::default()
    };
    DocumentLayer::open_file(dir.path().join("documents.json"), settings).unwrap()
}

fn seed(dir: &TempDir, documents: &[Document]) {
    fs::write(
        dir.path().join("documents.json"),
        serde_json::to_vec(documents).unwrap(),
    )
    .unwrap();
}

fn settings_document(identifier: &str, setting: &str, value: Value) -> Document {
    let mut document = Document::new(DocumentSettings::DEFAULT_TYPE, identifier);
    document.settings.insert(setting.to_string(), value);
    document
}

#[test]
fn reads_settings_through_identifiers() {
    let dir = TempDir::new().unwrap();
    seed(
        &dir,
        &[
            settings_document("Device.Network", "Up", Value::Bool(true)),
            settings_document("Device", "State", Value::from("Running")),
        ],
    );
    let layer = layer_in(&dir, false);
    let device = layer.open(None, &Path::new("/Device")).unwrap();

    assert_eq!(
        layer.read_value(device, &Path::new("Network/Up")),
        Some(Value::Bool(true))
    );
    assert_eq!(
        layer.read_value(device, &Path::new("State")),
        Some(Value::from("Running"))
    );
    assert_eq!(
        layer.children(device),
        BTreeSet::from(["Network".to_string(), "State".to_string()])
    );
}

#[test]
fn updates_existing_documents_only_by_default() {
    let dir = TempDir::new().unwrap();
    seed(&dir, &[settings_document("Device", "State", Value::from("Off"))]);
    let layer = layer_in(&dir, false);
    let root = layer.open(None, &Path::new("/")).unwrap();
    let writer = WriterId::new();

    assert!(layer.write_value(&writer, root, &Path::new("/Device/State"), Value::from("On")));
    assert!(layer.write_value(&writer, root, &Path::new("/Device/State"), Value::from("On")));
    assert!(!layer.write_value(&writer, root, &Path::new("/Missing/State"), Value::from("On")));

    assert_eq!(
        layer.read_value(root, &Path::new("/Device/State")),
        Some(Value::from("On"))
    );
    assert_eq!(layer.read_value(root, &Path::new("/Missing/State")), None);
}

#[test]
fn new_settings_on_existing_documents_need_the_creation_toggle() {
    let dir = TempDir::new().unwrap();
    seed(&dir, &[settings_document("Device", "State", Value::from("Off"))]);
    let writer = WriterId::new();

    let strict = layer_in(&dir, false);
    let root = strict.open(None, &Path::new("/")).unwrap();
    assert!(!strict.write_value(&writer, root, &Path::new("/Device/Volume"), Value::Int(1)));
    assert_eq!(strict.read_value(root, &Path::new("/Device/Volume")), None);
    assert_eq!(
        strict.children(strict.open(None, &Path::new("/Device")).unwrap()),
        BTreeSet::from(["State".to_string()])
    );

    let permissive = layer_in(&dir, true);
    let root = permissive.open(None, &Path::new("/")).unwrap();
    assert!(permissive.write_value(&writer, root, &Path::new("/Device/Volume"), Value::Int(1)));
    assert_eq!(
        permissive.read_value(root, &Path::new("/Device/Volume")),
        Some(Value::Int(1))
    );
}

#[test]
fn creation_toggle_allows_new_documents() {
    let dir = TempDir::new().unwrap();
    let layer = layer_in(&dir, true);
    let root = layer.open(None, &Path::new("/")).unwrap();

    assert!(layer.write_value(&WriterId::new(), root, &Path::new("/Device/State"), Value::Int(1)));

    let reopened = layer_in(&dir, false);
    let handle = reopened.open(None, &Path::new("/Device")).unwrap();
    assert_eq!(reopened.read_value(handle, &Path::new("State")), Some(Value::Int(1)));
}

#[test]
fn settings_need_an_identifier() {
    let dir = TempDir::new().unwrap();
    let layer = layer_in(&dir, true);
    let root = layer.open(None, &Path::new("/")).unwrap();

    assert!(!layer.write_value(&WriterId::new(), root, &Path::new("/State"), Value::Int(1)));
    assert!(layer.open(None, &Path::new("/a.b/c")).is_none());
}

#[test]
fn removing_a_setting_is_an_update() {
    let dir = TempDir::new().unwrap();
    seed(&dir, &[settings_document("Device", "State", Value::Int(1))]);
    let layer = layer_in(&dir, false);
    let device = layer.open(None, &Path::new("/Device")).unwrap();

    assert!(layer.remove_value(&WriterId::new(), device, &Path::new("State")));
    assert_eq!(layer.read_value(device, &Path::new("State")), None);
}

#[test]
fn removing_documents_follows_the_creation_toggle() {
    let dir = TempDir::new().unwrap();
    seed(&dir, &[settings_document("Device.Network", "Up", Value::Bool(true))]);

    let read_update_only = layer_in(&dir, false);
    let device = read_update_only.open(None, &Path::new("/Device")).unwrap();
    assert!(!read_update_only.remove_subtree(&WriterId::new(), device));
    drop(read_update_only);

    let full = layer_in(&dir, true);
    let device = full.open(None, &Path::new("/Device")).unwrap();
    assert!(full.remove_subtree(&WriterId::new(), device));
    assert!(full.children(device).is_empty());
}

#[tokio::test]
async fn service_changes_notify_overlapping_handles() {
    let dir = TempDir::new().unwrap();
    seed(&dir, &[settings_document("Device", "State", Value::Int(1))]);
    let layer = layer_in(&dir, false);
    let device = layer.open(None, &Path::new("/Device")).unwrap();
    let mut events = layer.events();

    layer.write_value(&WriterId::new(), device, &Path::new("State"), Value::Int(2));

    let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event, LayerEvent::Changed(device));
}

#[test]
fn malformed_queries_are_reported_by_the_service() {
    let dir = TempDir::new().unwrap();
    let service = JsonDocumentService::open(dir.path().join("documents.json")).unwrap();

    let response = block_on(service.request(DocumentRequest::Query {
        query: "[?colour=\"red\"]".to_string(),
    }));

    assert!(matches!(response, Err(DocumentError::Query { .. })));
}

#[test]
fn duplicate_documents_are_rejected() {
    let dir = TempDir::new().unwrap();
    let service = JsonDocumentService::open(dir.path().join("documents.json")).unwrap();
    let create = || DocumentRequest::Create {
        document: Document::new("t", "x"),
    };

    assert_eq!(
        block_on(service.request(create())).unwrap(),
        DocumentResponse::Affected(1)
    );
    assert!(matches!(
        block_on(service.request(create())),
        Err(DocumentError::Duplicate(_))
    ));
}
