#![allow(clippy::unwrap_used)]

use std::{fs, thread, time::Instant};

use tempfile::TempDir;

use super::*;

fn layer_in(dir: &TempDir) -> ConfigStoreLayer {
    let mut settings = ConfigStoreSettings::new(dir.path().join("store.toml"));
    settings.watch_debounce = None;
    ConfigStoreLayer::open(settings).unwrap()
}

fn root(layer: &ConfigStoreLayer) -> Handle {
    layer.open(None, &Path::new("/")).unwrap()
}

#[test]
fn reads_values_from_existing_file() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("store.toml"),
        "[Device]\nState = \"Starting\"\n[Device.Network]\nUp = true\n",
    )
    .unwrap();

    let layer = layer_in(&dir);
    let device = layer.open(None, &Path::new("/Device")).unwrap();

    assert_eq!(
        layer.read_value(device, &Path::new("State")),
        Some(Value::from("Starting"))
    );
    assert_eq!(
        layer.read_value(device, &Path::new("Network/Up")),
        Some(Value::Bool(true))
    );
    assert_eq!(layer.read_value(device, &Path::new("Network")), None);
    assert_eq!(
        layer.children(device),
        BTreeSet::from(["Network".to_string(), "State".to_string()])
    );
}

#[test]
fn writes_are_visible_before_sync_and_persisted_after() {
    let dir = TempDir::new().unwrap();
    let layer = layer_in(&dir);
    let writer = WriterId::new();
    let handle = root(&layer);

    assert!(layer.write_value(&writer, handle, &Path::new("/Device/State"), Value::from("Up")));
    assert_eq!(
        layer.read_value(handle, &Path::new("/Device/State")),
        Some(Value::from("Up"))
    );
    assert!(!dir.path().join("store.toml").exists());

    layer.sync();

    let written = fs::read_to_string(dir.path().join("store.toml")).unwrap();
    assert!(written.contains("State = \"Up\""));
}

#[test]
fn values_survive_reopening() {
    let dir = TempDir::new().unwrap();
    {
        let layer = layer_in(&dir);
        let handle = root(&layer);
        layer.write_value(&WriterId::new(), handle, &Path::new("/a/b"), Value::Int(3));
    }

    let layer = layer_in(&dir);
    let handle = root(&layer);
    assert_eq!(layer.read_value(handle, &Path::new("/a/b")), Some(Value::Int(3)));
}

#[test]
fn sync_merges_values_flushed_by_another_store() {
    let dir = TempDir::new().unwrap();
    let first = layer_in(&dir);
    let second = layer_in(&dir);
    let (first_root, second_root) = (root(&first), root(&second));

    assert!(first.write_value(&WriterId::new(), first_root, &Path::new("/Device/A"), Value::Int(1)));
    first.sync();
    assert!(second.write_value(&WriterId::new(), second_root, &Path::new("/Device/B"), Value::Int(2)));
    second.sync();

    let reader = layer_in(&dir);
    let device = reader.open(None, &Path::new("/Device")).unwrap();
    assert_eq!(reader.read_value(device, &Path::new("A")), Some(Value::Int(1)));
    assert_eq!(reader.read_value(device, &Path::new("B")), Some(Value::Int(2)));

    assert_eq!(
        second.read_value(second_root, &Path::new("/Device/A")),
        Some(Value::Int(1))
    );
}

#[test]
fn sync_reports_merged_values_to_open_handles() {
    let dir = TempDir::new().unwrap();
    let first = layer_in(&dir);
    let second = layer_in(&dir);
    let handle = second.open(None, &Path::new("/Device/A")).unwrap();
    let second_root = root(&second);

    first.write_value(&WriterId::new(), root(&first), &Path::new("/Device/A"), Value::Int(1));
    first.sync();

    second.write_value(&WriterId::new(), second_root, &Path::new("/Other"), Value::Int(2));
    let mut events = second.events();
    second.sync();

    let received: Vec<_> = std::iter::from_fn(|| events.try_recv().ok()).collect();
    assert!(received.contains(&LayerEvent::Changed(handle)));
    assert_eq!(
        second.read_value(handle, &Path::default()),
        Some(Value::Int(1))
    );
}

#[test]
fn rewriting_a_stale_value_still_reaches_the_file() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("store.toml");
    fs::write(&file, "a = 1\n").unwrap();
    let layer = layer_in(&dir);
    let handle = root(&layer);

    fs::write(&file, "a = 5\n").unwrap();
    assert!(layer.write_value(&WriterId::new(), handle, &Path::new("a"), Value::Int(1)));
    layer.sync();

    assert_eq!(fs::read_to_string(&file).unwrap().trim(), "a = 1");
}

#[test]
fn removal_is_unconditional_in_a_permanent_layer() {
    let dir = TempDir::new().unwrap();
    let layer = layer_in(&dir);
    let handle = root(&layer);

    layer.write_value(&WriterId::new(), handle, &Path::new("/a/b"), Value::Int(1));

    assert!(layer.remove_value(&WriterId::new(), handle, &Path::new("/a")));
    assert_eq!(layer.read_value(handle, &Path::new("/a/b")), None);
    assert!(!layer.remove_value(&WriterId::new(), handle, &Path::new("/a")));
}

#[test]
fn writing_through_a_leaf_fails() {
    let dir = TempDir::new().unwrap();
    let layer = layer_in(&dir);
    let handle = root(&layer);
    let writer = WriterId::new();

    layer.write_value(&writer, handle, &Path::new("/a"), Value::Int(1));

    assert!(!layer.write_value(&writer, handle, &Path::new("/a/b"), Value::Int(2)));
    assert!(!layer.write_value(&writer, handle, &Path::new("/"), Value::Int(2)));
}

#[test]
fn writes_notify_overlapping_handles() {
    let dir = TempDir::new().unwrap();
    let layer = layer_in(&dir);
    let device = layer.open(None, &Path::new("/Device")).unwrap();
    let other = layer.open(None, &Path::new("/Other")).unwrap();
    let mut events = layer.events();

    layer.write_value(&WriterId::new(), device, &Path::new("State"), Value::from("x"));

    assert_eq!(events.try_recv().unwrap(), LayerEvent::Changed(device));
    assert!(events.try_recv().is_err());
    let _ = other;
}

#[test]
fn reload_picks_up_external_edits_and_keeps_pending_writes() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("store.toml");
    fs::write(&file, "[a]\nx = 1\n").unwrap();

    let layer = layer_in(&dir);
    let handle = layer.open(None, &Path::new("/a")).unwrap();
    layer.write_value(&WriterId::new(), handle, &Path::new("y"), Value::Int(2));
    let mut events = layer.events();

    fs::write(&file, "[a]\nx = 10\n").unwrap();
    layer.reload();

    assert_eq!(layer.read_value(handle, &Path::new("x")), Some(Value::Int(10)));
    assert_eq!(layer.read_value(handle, &Path::new("y")), Some(Value::Int(2)));
    assert_eq!(events.try_recv().unwrap(), LayerEvent::Changed(handle));
}

#[test]
fn file_watcher_reloads_external_edits() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("store.toml");
    fs::write(&file, "a = 1\n").unwrap();

    let mut settings = ConfigStoreSettings::new(&file);
    settings.watch_debounce = Some(Duration::from_millis(20));
    let layer = ConfigStoreLayer::open(settings).unwrap();
    let handle = root(&layer);

    fs::write(&file, "a = 2\n").unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while layer.read_value(handle, &Path::new("a")) != Some(Value::Int(2)) {
        assert!(Instant::now() < deadline, "external edit was not picked up");
        thread::sleep(Duration::from_millis(20));
    }
}
