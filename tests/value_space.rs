#![allow(clippy::unwrap_used)]

mod common;

use std::{sync::Arc, time::Duration};

use common::FakeLayer;
use futures::StreamExt;
use serial_test::serial;
use tempfile::TempDir;
use valuespace::{
    LayerRegistry, Path, Publisher, Subscriber, Value, ValueSpaceError,
    config::{BrokerBackend, ValueSpaceConfig},
    layer::{
        CONFIG_STORE_LAYER, CONTEXT_BROKER_LAYER, DOCUMENT_STORE_LAYER, Layer, LayerOptions,
        REGISTRY_NONVOLATILE_LAYER, REGISTRY_VOLATILE_LAYER,
        context::{ContextBrokerLayer, LocalBroker},
    },
};

const WAIT: Duration = Duration::from_secs(2);

fn registry_of(layers: &[&Arc<FakeLayer>]) -> Arc<LayerRegistry> {
    LayerRegistry::from_layers(
        layers
            .iter()
            .map(|layer| Arc::clone(layer) as Arc<dyn Layer>)
            .collect(),
    )
    .unwrap()
}

#[test]
fn highest_priority_layer_wins() {
    let high = FakeLayer::transient("high", 10);
    let low = FakeLayer::permanent("low", 20);
    high.seed("/Device/State", "from-high");
    low.seed("/Device/State", "from-low");
    low.seed("/Device/Model", "from-low");
    let registry = registry_of(&[&low, &high]);

    let subscriber = Subscriber::new(registry, "/Device");

    assert_eq!(subscriber.value("State", ""), Value::from("from-high"));
    assert_eq!(subscriber.value("Model", ""), Value::from("from-low"));
    assert_eq!(subscriber.value("Missing", 7), Value::Int(7));
    assert_eq!(
        subscriber.sub_paths().into_iter().collect::<Vec<_>>(),
        ["Model", "State"]
    );
}

#[test]
fn filters_select_the_layers_a_subscriber_reads() {
    let high = FakeLayer::transient("high", 10);
    let low = FakeLayer::permanent("low", 20);
    high.seed("/Device/State", "from-high");
    low.seed("/Device/State", "from-low");
    let registry = registry_of(&[&high, &low]);

    let permanent = Subscriber::with_filter(registry.clone(), "/Device", LayerOptions::PERMANENT);
    assert_eq!(permanent.value("State", ""), Value::from("from-low"));
    assert_eq!(permanent.layers(), [low.id()]);

    let explicit = Subscriber::with_layer(registry.clone(), "/Device", high.id());
    assert_eq!(explicit.value("State", ""), Value::from("from-high"));

    let contradictory = Subscriber::with_filter(
        registry,
        "/Device",
        LayerOptions::PERMANENT | LayerOptions::TRANSIENT,
    );
    assert!(!contradictory.is_connected());
    assert_eq!(contradictory.value("State", "none"), Value::from("none"));
}

#[test]
fn published_values_are_visible_after_sync() {
    let layer = FakeLayer::permanent("store", 10);
    let registry = registry_of(&[&layer]);

    let publisher = Publisher::new(registry.clone(), "/Device");
    assert!(publisher.set_value("Volume", 30));
    publisher.sync();

    let subscriber = Subscriber::new(registry, "/Device");
    assert_eq!(subscriber.value("Volume", 0), Value::Int(30));
    assert_eq!(layer.syncs(), 1);
}

#[test]
fn publishers_bind_to_the_first_matching_writable_layer() {
    let read_only = FakeLayer::new("read-only", 5, LayerOptions::PERMANENT | LayerOptions::READ_ONLY);
    let transient = FakeLayer::transient("transient", 10);
    let permanent = FakeLayer::permanent("permanent", 20);
    let registry = registry_of(&[&read_only, &transient, &permanent]);

    let any = Publisher::new(registry.clone(), "/Device");
    assert_eq!(any.layer(), Some(transient.id()));

    let lasting = Publisher::with_filter(registry.clone(), "/Device", LayerOptions::PERMANENT);
    assert_eq!(lasting.layer(), Some(permanent.id()));

    let explicit = Publisher::with_layer(registry, "/Device", read_only.id());
    assert_eq!(explicit.layer(), Some(read_only.id()));
}

#[test]
fn disconnected_publishers_ignore_writes() {
    let layer = FakeLayer::new("read-only", 5, LayerOptions::PERMANENT | LayerOptions::READ_ONLY);
    let registry = registry_of(&[&layer]);

    let publisher = Publisher::new(registry, "/Device");

    assert!(!publisher.is_connected());
    assert!(!publisher.set_value("State", "On"));
    assert!(!publisher.reset_value("State"));
    publisher.sync();
    assert_eq!(layer.stored("/Device/State"), None);
    assert_eq!(layer.created(), 0);
}

#[test]
fn transient_values_vanish_with_their_publisher() {
    let transient = FakeLayer::transient("transient", 10);
    transient.seed("/Device/Other", "someone else");
    let registry = registry_of(&[&transient]);

    let publisher = Publisher::new(registry, "/Device");
    publisher.set_value("State", "Running");
    assert_eq!(transient.stored("/Device/State"), Some(Value::from("Running")));

    drop(publisher);

    assert_eq!(transient.stored("/Device/State"), None);
    assert_eq!(transient.stored("/Device/Other"), Some(Value::from("someone else")));
    assert_eq!(transient.open_handles(), 0);
}

#[test]
fn permanent_values_outlive_their_publisher() {
    let permanent = FakeLayer::permanent("permanent", 10);
    let registry = registry_of(&[&permanent]);

    let publisher = Publisher::new(registry, "/Device");
    publisher.set_value("State", "Running");
    drop(publisher);

    assert_eq!(permanent.stored("/Device/State"), Some(Value::from("Running")));
    assert_eq!(permanent.open_handles(), 0);
}

#[test]
fn handles_are_freed_with_their_last_reference() {
    let layer = FakeLayer::permanent("counting", 10);
    let registry = registry_of(&[&layer]);

    let first = Subscriber::new(registry.clone(), "/Device");
    let second = Subscriber::new(registry, "/Device");
    assert_eq!(layer.created(), 1);

    drop(first);
    assert_eq!(layer.freed(), 0);
    assert_eq!(layer.open_handles(), 1);

    drop(second);
    assert_eq!(layer.freed(), 1);
    assert_eq!(layer.open_handles(), 0);
}

#[test]
fn device_state_scenario() {
    let layer = FakeLayer::permanent("store", 10);
    let registry = registry_of(&[&layer]);

    let publisher = Publisher::new(registry.clone(), "/Device");
    publisher.set_value("State", "Starting");
    publisher.sync();

    let subscriber = Subscriber::new(registry, "/Device/State");
    assert_eq!(subscriber.value("", "Off"), Value::from("Starting"));

    publisher.reset_value("State");
    publisher.sync();
    assert_eq!(subscriber.value("", "Off"), Value::from("Off"));
}

#[test]
fn navigation_rebinds_the_subscriber() {
    let layer = FakeLayer::permanent("store", 10);
    layer.seed("/Device/Network/Up", true);
    layer.seed("/Device/State", "On");
    let registry = registry_of(&[&layer]);

    let mut subscriber = Subscriber::new(registry, "/Device");
    subscriber.cd("Network");
    assert_eq!(subscriber.path(), &Path::new("/Device/Network"));
    assert_eq!(subscriber.value("Up", false), Value::Bool(true));

    subscriber.cd_up();
    assert_eq!(subscriber.value("State", ""), Value::from("On"));

    subscriber.cd("/Device/Network");
    assert_eq!(subscriber.path(), &Path::new("/Device/Network"));

    subscriber.set_path("/Elsewhere");
    assert!(subscriber.sub_paths().is_empty());
    assert_eq!(layer.open_handles(), 1);
}

#[tokio::test]
async fn subscribers_on_one_path_share_an_aggregator() {
    let layer = FakeLayer::permanent("store", 10);
    let registry = registry_of(&[&layer]);

    let first = Subscriber::new(registry.clone(), "/Device");
    let second = Subscriber::new(registry.clone(), "/Device");
    let mut first_changes = first.contents_changed();
    let mut second_changes = second.contents_changed();
    assert_eq!(registry.active_notifiers(), 1);

    drop(first);
    let ended = tokio::time::timeout(WAIT, first_changes.next()).await.unwrap();
    assert_eq!(ended, None);
    drop(first_changes);

    let publisher = Publisher::new(registry.clone(), "/Device");
    publisher.set_value("State", "On");

    let change = tokio::time::timeout(WAIT, second_changes.next()).await.unwrap();
    assert_eq!(change, Some(()));
    assert_eq!(registry.active_notifiers(), 1);

    drop(second_changes);
    assert_eq!(registry.active_notifiers(), 0);
}

#[tokio::test]
async fn changes_in_any_attached_layer_are_reported() {
    let high = FakeLayer::transient("high", 10);
    let low = FakeLayer::permanent("low", 20);
    let registry = registry_of(&[&high, &low]);

    let subscriber = Subscriber::new(registry.clone(), "/Device");
    let mut changes = subscriber.contents_changed();

    let publisher = Publisher::with_layer(registry, "/Device", low.id());
    publisher.set_value("Model", "X");

    let change = tokio::time::timeout(WAIT, changes.next()).await.unwrap();
    assert_eq!(change, Some(()));
}

#[tokio::test]
async fn rebinding_ends_change_streams() {
    let layer = FakeLayer::permanent("store", 10);
    let registry = registry_of(&[&layer]);

    let mut subscriber = Subscriber::new(registry, "/Device");
    let mut changes = subscriber.contents_changed();

    subscriber.cd("Network");

    let ended = tokio::time::timeout(WAIT, changes.next()).await.unwrap();
    assert_eq!(ended, None);
}

#[tokio::test]
async fn publishers_learn_about_interested_readers() {
    let broker: Arc<dyn Layer> =
        Arc::new(ContextBrokerLayer::new(Arc::new(LocalBroker::new()), 200).unwrap());
    let registry = LayerRegistry::from_layers(vec![broker]).unwrap();

    let publisher = Publisher::with_layer(registry.clone(), "/Sensors", CONTEXT_BROKER_LAYER);
    let mut interest = publisher.interest_changed();

    let reader = Subscriber::with_layer(registry, "/Sensors/Temperature", CONTEXT_BROKER_LAYER);
    let started = tokio::time::timeout(WAIT, interest.next()).await.unwrap();
    assert_eq!(started, Some(("Temperature".to_string(), true)));

    drop(reader);
    let stopped = tokio::time::timeout(WAIT, interest.next()).await.unwrap();
    assert_eq!(stopped, Some(("Temperature".to_string(), false)));

    drop(publisher);
    let ended = tokio::time::timeout(WAIT, interest.next()).await.unwrap();
    assert_eq!(ended, None);
}

#[test]
fn duplicate_layers_are_rejected() {
    let layer = FakeLayer::permanent("store", 10);
    let result = LayerRegistry::from_layers(vec![
        Arc::clone(&layer) as Arc<dyn Layer>,
        Arc::clone(&layer) as Arc<dyn Layer>,
    ]);

    assert!(matches!(result, Err(ValueSpaceError::DuplicateLayer(id)) if id == layer.id()));
}

fn config_in(dir: &TempDir) -> ValueSpaceConfig {
    let mut config = ValueSpaceConfig::default();
    let layers = &mut config.layers;

    layers.registry_volatile.file = Some(dir.path().join("runtime/volatile.json"));
    layers.registry_volatile.watch_debounce_ms = 0;
    layers.registry_nonvolatile.file = Some(dir.path().join("data/registry.json"));
    layers.registry_nonvolatile.watch_debounce_ms = 0;
    layers.config_store.file = Some(dir.path().join("config/store.toml"));
    layers.config_store.watch_debounce_ms = 0;
    layers.context_broker.backend = BrokerBackend::Local;
    layers.document_store.file = Some(dir.path().join("data/documents.json"));

    config
}

#[test]
#[serial]
fn configured_registry_installs_layers_in_priority_order() {
    let dir = TempDir::new().unwrap();
    let registry = LayerRegistry::from_config(&config_in(&dir)).unwrap();

    assert_eq!(
        registry.available_layers(),
        [
            REGISTRY_VOLATILE_LAYER,
            CONTEXT_BROKER_LAYER,
            CONFIG_STORE_LAYER,
            REGISTRY_NONVOLATILE_LAYER,
            DOCUMENT_STORE_LAYER,
        ]
    );
    assert!(!registry.has_dedicated_worker());
}

#[test]
#[serial]
fn one_configured_registry_per_process() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);

    let registry = LayerRegistry::from_config(&config).unwrap();
    assert!(matches!(
        LayerRegistry::from_config(&config),
        Err(ValueSpaceError::RegistryActive)
    ));

    drop(registry);
    assert!(LayerRegistry::from_config(&config).is_ok());
}

#[test]
#[serial]
fn disabled_layers_are_not_installed() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(&dir);
    config.layers.context_broker.enabled = false;
    config.layers.document_store.enabled = false;

    let registry = LayerRegistry::from_config(&config).unwrap();

    assert_eq!(
        registry.available_layers(),
        [REGISTRY_VOLATILE_LAYER, CONFIG_STORE_LAYER, REGISTRY_NONVOLATILE_LAYER]
    );
}

#[test]
#[serial]
fn relocated_layers_behave_the_same() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(&dir);
    config.registry.dedicated_worker = true;

    let registry = LayerRegistry::from_config(&config).unwrap();
    assert!(registry.has_dedicated_worker());

    let publisher = Publisher::with_filter(registry.clone(), "/Device", LayerOptions::PERMANENT);
    assert_eq!(publisher.layer(), Some(CONFIG_STORE_LAYER));
    assert!(publisher.set_value("State", "Running"));
    publisher.sync();

    let subscriber = Subscriber::new(registry.clone(), "/Device");
    assert_eq!(subscriber.value("State", ""), Value::from("Running"));

    let transient = Publisher::new(registry.clone(), "/Device");
    assert_eq!(transient.layer(), Some(REGISTRY_VOLATILE_LAYER));
    transient.set_value("State", "Starting");
    assert_eq!(subscriber.value("State", ""), Value::from("Starting"));

    drop(transient);
    assert_eq!(subscriber.value("State", ""), Value::from("Running"));
}
