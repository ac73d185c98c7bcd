//! Unit tests for CLI module
//!
//! Tests command dispatch, argument validation and formatting against a
//! registry backed by temporary hive files.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use tempfile::TempDir;

use crate::{
    LayerRegistry, Value,
    cli::{
        CliError, CliService, CliSession,
        formatting::{format_options, format_value},
    },
    config::ValueSpaceConfig,
    layer::{
        Layer, LayerOptions,
        registry::{HiveKind, RegistryLayer, RegistrySettings},
    },
};

fn hive(dir: &TempDir, kind: HiveKind, file: &str) -> Arc<dyn Layer> {
    let mut settings = RegistrySettings::new(kind, dir.path().join(file));
    settings.watch_debounce = None;
    Arc::new(RegistryLayer::open(settings).unwrap())
}

fn service(dir: &TempDir) -> CliService {
    let registry = LayerRegistry::from_layers(vec![
        hive(dir, HiveKind::Volatile, "volatile.json"),
        hive(dir, HiveKind::NonVolatile, "registry.json"),
    ])
    .unwrap();
    CliService::new(CliSession::with_registry(ValueSpaceConfig::default(), registry))
}

fn run(service: &CliService, line: &[&str]) -> Result<String, CliError> {
    let args: Vec<String> = line.iter().skip(2).map(|arg| arg.to_string()).collect();
    service.execute_command(line[0], line.get(1).copied().unwrap_or(""), &args)
}

#[test]
fn format_value_quotes_text() {
    assert_eq!(format_value(Some(&Value::from("hello world"))), "\"hello world\"");
    assert_eq!(format_value(Some(&Value::from(""))), "\"\"");
}

#[test]
fn format_value_scalars() {
    assert_eq!(format_value(Some(&Value::Int(-123))), "-123");
    assert_eq!(format_value(Some(&Value::Float(-2.5))), "-2.5");
    assert_eq!(format_value(Some(&Value::Bool(false))), "false");
    assert_eq!(format_value(Some(&Value::Bytes(vec![1, 2, 3]))), "<3 bytes>");
    assert_eq!(format_value(None), "<unset>");
}

#[test]
fn format_value_lists() {
    let value = Value::from(vec!["a".to_string(), "b".to_string()]);
    assert_eq!(format_value(Some(&value)), "[\"a\", \"b\"]");
    assert_eq!(format_value(Some(&Value::StringList(Vec::new()))), "[]");
}

#[test]
fn format_options_names_each_bit() {
    assert_eq!(
        format_options(LayerOptions::PERMANENT | LayerOptions::WRITABLE),
        "permanent, writable"
    );
    assert_eq!(format_options(LayerOptions::empty()), "none");
}

#[test]
fn all_categories_are_registered() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);

    let categories: Vec<String> = service.list_all().into_iter().map(|(c, _)| c).collect();
    assert_eq!(categories, ["broker", "config", "layers", "value"]);

    let value_commands = service
        .list_all()
        .into_iter()
        .find(|(category, _)| category == "value")
        .map(|(_, commands)| commands)
        .unwrap();
    assert_eq!(value_commands, ["get", "list", "reset", "set", "watch"]);
}

#[test]
fn unknown_commands_are_reported() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);

    assert!(matches!(
        run(&service, &["nope", "get"]),
        Err(CliError::CommandNotFound(_))
    ));
    assert!(matches!(
        run(&service, &["value", "nope"]),
        Err(CliError::CommandNotFound(_))
    ));
}

#[test]
fn argument_counts_are_validated() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);

    assert!(matches!(
        run(&service, &["value", "set", "/Device/State"]),
        Err(CliError::InvalidArguments(_))
    ));
    assert!(matches!(
        run(&service, &["value", "get", "/a", "/b"]),
        Err(CliError::InvalidArguments(_))
    ));
    assert!(matches!(
        run(&service, &["value", "get", "/"]),
        Err(CliError::InvalidArguments(_))
    ));
}

#[test]
fn set_get_and_reset_round_trip_through_the_permanent_hive() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);

    assert_eq!(
        run(&service, &["value", "set", "/Device/State", "Running"]).unwrap(),
        "/Device/State: \"Running\""
    );
    assert_eq!(
        run(&service, &["value", "get", "/Device/State"]).unwrap(),
        "/Device/State: \"Running\""
    );

    let listing = run(&service, &["value", "list", "/Device"]).unwrap();
    assert!(listing.contains("State = \"Running\""));

    assert_eq!(
        run(&service, &["value", "reset", "/Device/State"]).unwrap(),
        "/Device/State: removed"
    );
    assert_eq!(
        run(&service, &["value", "get", "/Device/State"]).unwrap(),
        "/Device/State: <unset>"
    );
}

#[test]
fn set_parses_literals() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);

    assert_eq!(
        run(&service, &["value", "set", "/Device/Volume", "30"]).unwrap(),
        "/Device/Volume: 30"
    );
    assert_eq!(
        run(&service, &["value", "set", "/Device/Serial", "\"0042\""]).unwrap(),
        "/Device/Serial: \"0042\""
    );
}

#[test]
fn layers_are_listed_in_priority_order() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);

    let listing = run(&service, &["layers", "list"]).unwrap();
    let volatile = listing.find("Volatile Registry Layer").unwrap();
    let permanent = listing.find("Non-Volatile Registry Layer").unwrap();
    assert!(volatile < permanent);
}

#[test]
fn schema_is_json() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);

    let schema = run(&service, &["config", "schema"]).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&schema).unwrap();
    assert!(parsed.get("properties").is_some());
}

#[test]
fn help_lists_every_category() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);

    let help = run(&service, &["help"]).unwrap();
    for category in ["broker", "config", "layers", "value"] {
        assert!(help.contains(category));
    }
    assert!(run(&service, &["value"]).unwrap().contains("reset"));
}
