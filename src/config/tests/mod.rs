//! Unit tests for config module
//!
//! Tests configuration defaults, parsing and loading.

#![allow(clippy::unwrap_used)]

use std::path::PathBuf;

use tempfile::TempDir;

use crate::{
    ValueSpaceError,
    config::{BrokerBackend, LogLevel, ValueSpaceConfig},
};

#[test]
fn defaults_enable_every_layer() {
    let config = ValueSpaceConfig::default();

    assert!(config.layers.config_store.enabled);
    assert!(config.layers.registry_volatile.enabled);
    assert!(config.layers.registry_nonvolatile.enabled);
    assert!(config.layers.context_broker.enabled);
    assert!(config.layers.document_store.enabled);
    assert!(!config.layers.document_store.allow_create);
    assert!(!config.registry.dedicated_worker);
    assert_eq!(config.general.log_level, LogLevel::Info);
}

#[test]
fn partial_tables_keep_other_defaults() {
    let config = ValueSpaceConfig::parse(
        r#"
        [general]
        log_level = "debug"

        [registry]
        dedicated_worker = true

        [layers.context_broker]
        backend = "local"

        [layers.document_store]
        allow_create = true
        file = "/tmp/docs.json"
        "#,
        None,
    )
    .unwrap();

    assert_eq!(config.general.log_level, LogLevel::Debug);
    assert!(config.registry.dedicated_worker);
    assert_eq!(config.layers.context_broker.backend, BrokerBackend::Local);
    assert_eq!(config.layers.context_broker.call_timeout_ms, 2000);
    assert!(config.layers.document_store.allow_create);
    assert_eq!(
        config.layers.document_store.file,
        Some(PathBuf::from("/tmp/docs.json"))
    );
    assert!(config.layers.config_store.enabled);
}

#[test]
fn serialize_roundtrip() {
    let original = ValueSpaceConfig::default();

    let toml_str = toml::to_string(&original).unwrap();
    let parsed = ValueSpaceConfig::parse(&toml_str, None).unwrap();

    assert_eq!(original, parsed);
}

#[test]
fn invalid_toml_is_a_parse_error() {
    let result = ValueSpaceConfig::parse("[general", None);

    assert!(matches!(result, Err(ValueSpaceError::TomlParseError { .. })));
}

#[test]
fn wrong_types_are_validation_errors() {
    let result = ValueSpaceConfig::parse("[general]\nlog_level = \"loud\"\n", None);

    assert!(matches!(result, Err(ValueSpaceError::ConfigValidation { .. })));
}

#[test]
fn missing_file_yields_defaults() {
    let dir = TempDir::new().unwrap();

    let config = ValueSpaceConfig::load(&dir.path().join("absent.toml")).unwrap();

    assert_eq!(config, ValueSpaceConfig::default());
}

#[test]
fn schema_describes_layer_tables() {
    let schema = serde_json::to_string(&ValueSpaceConfig::schema()).unwrap();

    assert!(schema.contains("allow_create"));
    assert!(schema.contains("dedicated_worker"));
}
