#![allow(clippy::unwrap_used)]

use std::time::Duration;

use super::*;

fn layer_with(broker: &Arc<LocalBroker>) -> ContextBrokerLayer {
    ContextBrokerLayer::new(Arc::clone(broker) as Arc<dyn ContextBroker>, DEFAULT_ORDER).unwrap()
}

async fn next_event(events: &mut broadcast::Receiver<LayerEvent>) -> LayerEvent {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap()
}

#[test]
fn paths_map_to_dotted_properties() {
    let broker = Arc::new(LocalBroker::new());
    let layer = layer_with(&broker);
    let battery = layer.open(None, &Path::new("/Battery")).unwrap();

    assert!(layer.write_value(&WriterId::new(), battery, &Path::new("Charge/Level"), Value::Int(80)));

    assert_eq!(broker.get("Battery.Charge.Level").unwrap(), Some(Value::Int(80)));
    assert_eq!(
        layer.read_value(battery, &Path::new("Charge/Level")),
        Some(Value::Int(80))
    );
    assert_eq!(layer.children(battery), BTreeSet::from(["Charge".to_string()]));
}

#[test]
fn dotted_segments_cannot_be_opened() {
    let broker = Arc::new(LocalBroker::new());
    let layer = layer_with(&broker);

    assert!(layer.open(None, &Path::new("/Battery/v1.2")).is_none());
}

#[test]
fn writers_only_remove_their_own_properties() {
    let broker = Arc::new(LocalBroker::new());
    let layer = layer_with(&broker);
    let me = WriterId::named("me");
    let device = layer.open(None, &Path::new("/Device")).unwrap();

    layer.write_value(&me, device, &Path::new("Mine"), Value::Int(1));
    broker.set("someone-else", "Device.Theirs", Value::Int(2)).unwrap();

    assert!(layer.remove_subtree(&me, device));
    assert_eq!(layer.read_value(device, &Path::new("Mine")), None);
    assert_eq!(layer.read_value(device, &Path::new("Theirs")), Some(Value::Int(2)));
}

#[test]
fn interest_subscribes_once_per_handle() {
    let broker = Arc::new(LocalBroker::new());
    let layer = layer_with(&broker);
    let level = layer.open(None, &Path::new("/Battery/Level")).unwrap();

    layer.set_interest(level, true);
    layer.set_interest(level, true);
    assert_eq!(broker.subscriber_count("Battery.Level"), 1);

    layer.set_interest(level, false);
    assert_eq!(broker.subscriber_count("Battery.Level"), 1);
    layer.set_interest(level, false);
    assert_eq!(broker.subscriber_count("Battery.Level"), 0);
}

#[test]
fn releasing_an_interested_handle_unsubscribes() {
    let broker = Arc::new(LocalBroker::new());
    let layer = layer_with(&broker);
    let level = layer.open(None, &Path::new("/Battery/Level")).unwrap();

    layer.set_interest(level, true);
    layer.release(level);

    assert_eq!(broker.subscriber_count("Battery.Level"), 0);
}

#[tokio::test]
async fn broker_changes_reach_interested_handles() {
    let broker = Arc::new(LocalBroker::new());
    let layer = layer_with(&broker);
    let battery = layer.open(None, &Path::new("/Battery")).unwrap();
    layer.set_interest(battery, true);
    let mut events = layer.events();

    broker.set("provider", "Battery.Level", Value::Int(50)).unwrap();

    assert_eq!(next_event(&mut events).await, LayerEvent::Changed(battery));
}

#[tokio::test]
async fn subscribers_are_reported_to_watching_publishers() {
    let broker = Arc::new(LocalBroker::new());
    let publisher_side = layer_with(&broker);
    let subscriber_side = layer_with(&broker);

    let device = publisher_side.open(None, &Path::new("/Device")).unwrap();
    assert!(publisher_side.add_watch(device));
    let mut events = publisher_side.events();

    let state = subscriber_side.open(None, &Path::new("/Device/State")).unwrap();
    subscriber_side.set_interest(state, true);

    assert_eq!(
        next_event(&mut events).await,
        LayerEvent::Interest {
            handle: device,
            attribute: Path::new("State"),
            interested: true,
        }
    );

    subscriber_side.set_interest(state, false);

    assert_eq!(
        next_event(&mut events).await,
        LayerEvent::Interest {
            handle: device,
            attribute: Path::new("State"),
            interested: false,
        }
    );
}
