//! Context broker layer.
//!
//! Paths map onto dotted context property names: `/Battery/Level` is the
//! property `Battery.Level`. Segments that contain a dot cannot be
//! expressed and fail to open. Values are owned by the writer that set
//! them, so the layer is transient.

mod broker;
mod dbus;

use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex, MutexGuard, Weak},
    thread,
};

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

pub use broker::{BrokerError, BrokerEvent, ContextBroker, LocalBroker};
pub use dbus::{BROKER_OBJECT_PATH, BROKER_SERVICE, BrokerService, ContextBrokerBusProxy, DbusBroker};

use super::{
    CONTEXT_BROKER_LAYER, EVENT_CAPACITY, Handle, HandleTable, Layer, LayerEvent, LayerId,
    LayerOptions, WriterId, emit_changes,
};
use crate::{Path, PathEncoding, Value};

/// Default priority rank of the context broker layer.
pub const DEFAULT_ORDER: u32 = 200;

fn property_key(path: &Path) -> Option<String> {
    if path.is_root() {
        return None;
    }
    path.with_encoding(PathEncoding::Dot)
        .ok()
        .map(|dotted| dotted.to_string())
}

fn property_path(key: &str) -> Option<Path> {
    Path::parse_dotted(key)
        .and_then(|dotted| dotted.with_encoding(PathEncoding::Slash))
        .ok()
}

struct ContextShared {
    broker: Arc<dyn ContextBroker>,
    handles: Mutex<HandleTable<()>>,
    events: broadcast::Sender<LayerEvent>,
}

impl ContextShared {
    fn lock(&self) -> MutexGuard<'_, HandleTable<()>> {
        match self.handles.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn dispatch(&self, event: BrokerEvent) {
        match event {
            BrokerEvent::ValueChanged(key) => {
                let Some(path) = property_path(&key) else {
                    return;
                };
                let handles = self.lock();
                emit_changes(&handles, &self.events, &[path], true);
            }
            BrokerEvent::InterestChanged { key, interested } => {
                let Some(path) = property_path(&key) else {
                    return;
                };

                let handles = self.lock();
                for (handle, entry) in handles.iter() {
                    if !entry.is_watched() {
                        continue;
                    }
                    let Some(attribute) = path.strip_prefix(entry.path()) else {
                        continue;
                    };
                    let _ = self.events.send(LayerEvent::Interest {
                        handle,
                        attribute,
                        interested,
                    });
                }
            }
        }
    }

    fn keys_under(&self, base: &Path) -> Vec<(String, Path)> {
        let keys = match self.broker.keys() {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Failed to list context properties: {e}");
                return Vec::new();
            }
        };

        keys.into_iter()
            .filter_map(|key| {
                let path = property_path(&key)?;
                let relative = path.strip_prefix(base)?;
                Some((key, relative))
            })
            .collect()
    }
}

/// Transient, writable layer backed by a [`ContextBroker`].
pub struct ContextBrokerLayer {
    shared: Arc<ContextShared>,
    order: u32,
}

impl ContextBrokerLayer {
    /// Wraps `broker` as a layer with the given priority rank.
    ///
    /// A forwarding thread turns broker notifications into layer events; it
    /// ends once the layer is gone.
    ///
    /// # Errors
    /// Returns `BrokerError::Worker` if the forwarding thread cannot start.
    pub fn new(broker: Arc<dyn ContextBroker>, order: u32) -> Result<Self, BrokerError> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let mut broker_events = broker.events();

        let shared = Arc::new(ContextShared {
            broker,
            handles: Mutex::new(HandleTable::new()),
            events,
        });

        let weak: Weak<ContextShared> = Arc::downgrade(&shared);
        thread::Builder::new()
            .name("context-events".to_string())
            .spawn(move || {
                loop {
                    let event = match broker_events.blocking_recv() {
                        Ok(event) => event,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Context broker events lagged");
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    };
                    let Some(shared) = weak.upgrade() else {
                        break;
                    };
                    shared.dispatch(event);
                }
                debug!("Context event forwarding stopped");
            })
            .map_err(|e| BrokerError::Worker(e.to_string()))?;

        info!(order, "Context broker layer ready");

        Ok(Self { shared, order })
    }

    /// Connects to the session-bus broker.
    ///
    /// # Errors
    /// Returns `BrokerError` if the bus or the broker service is unreachable.
    pub fn session(order: u32, timeout: std::time::Duration) -> Result<Self, BrokerError> {
        let broker = DbusBroker::connect(timeout)?;
        Self::new(Arc::new(broker), order)
    }

    fn key_of(&self, handle: Handle, sub_path: &Path) -> Option<(Path, String)> {
        let path = self.shared.lock().path(handle)?.join(sub_path);
        let key = property_key(&path)?;
        Some((path, key))
    }

    fn unset_under(&self, writer: &WriterId, base: &Path) -> bool {
        let mut removed = false;
        for (key, _) in self.shared.keys_under(base) {
            match self.shared.broker.unset(writer.as_str(), &key) {
                Ok(true) => removed = true,
                Ok(false) => {}
                Err(e) => warn!(key, "Failed to unset context property: {e}"),
            }
        }
        removed
    }
}

impl Layer for ContextBrokerLayer {
    fn id(&self) -> LayerId {
        CONTEXT_BROKER_LAYER
    }

    fn name(&self) -> &str {
        "Context Broker Layer"
    }

    fn order(&self) -> u32 {
        self.order
    }

    fn options(&self) -> LayerOptions {
        LayerOptions::TRANSIENT | LayerOptions::WRITABLE
    }

    fn open(&self, parent: Option<Handle>, path: &Path) -> Option<Handle> {
        let mut handles = self.shared.lock();
        let absolute = match parent {
            Some(parent) => handles.path(parent)?.join(path),
            None => path.clone(),
        };

        if absolute.with_encoding(PathEncoding::Dot).is_err() {
            debug!(path = %absolute, "Path has no context property form");
            return None;
        }

        handles.acquire(absolute, |_| Some(()))
    }

    fn release(&self, handle: Handle) {
        let mut handles = self.shared.lock();
        let Some(entry) = handles.release(handle) else {
            return;
        };
        drop(handles);

        if entry.has_interest() {
            if let Some(key) = property_key(entry.path()) {
                if let Err(e) = self.shared.broker.unsubscribe(&key) {
                    warn!(key, "Failed to unsubscribe context property: {e}");
                }
            }
        }
    }

    fn read_value(&self, handle: Handle, sub_path: &Path) -> Option<Value> {
        let (_, key) = self.key_of(handle, sub_path)?;
        match self.shared.broker.get(&key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, "Failed to read context property: {e}");
                None
            }
        }
    }

    fn children(&self, handle: Handle) -> BTreeSet<String> {
        let Some(base) = self.shared.lock().path(handle).cloned() else {
            return BTreeSet::new();
        };

        self.shared
            .keys_under(&base)
            .into_iter()
            .filter_map(|(_, relative)| relative.segments().first().cloned())
            .collect()
    }

    fn write_value(&self, writer: &WriterId, handle: Handle, sub_path: &Path, value: Value) -> bool {
        let Some((path, key)) = self.key_of(handle, sub_path) else {
            return false;
        };

        match self.shared.broker.set(writer.as_str(), &key, value) {
            Ok(()) => true,
            Err(e) => {
                warn!(path = %path, "Failed to publish context property: {e}");
                false
            }
        }
    }

    fn remove_value(&self, writer: &WriterId, handle: Handle, sub_path: &Path) -> bool {
        let Some(base) = self.shared.lock().path(handle).map(|path| path.join(sub_path)) else {
            return false;
        };
        self.unset_under(writer, &base)
    }

    fn remove_subtree(&self, writer: &WriterId, handle: Handle) -> bool {
        self.remove_value(writer, handle, &Path::default())
    }

    fn supports_interest_notification(&self) -> bool {
        true
    }

    fn set_interest(&self, handle: Handle, enabled: bool) -> bool {
        let (edge, key) = {
            let mut handles = self.shared.lock();
            let Some(entry) = handles.get_mut(handle) else {
                return false;
            };
            let edge = if enabled {
                entry.add_interest()
            } else {
                entry.remove_interest()
            };
            (edge, property_key(entry.path()))
        };

        let (true, Some(key)) = (edge, key) else {
            return true;
        };

        let result = if enabled {
            self.shared.broker.subscribe(&key)
        } else {
            self.shared.broker.unsubscribe(&key)
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(key, enabled, "Failed to change context subscription: {e}");
                false
            }
        }
    }

    fn add_watch(&self, handle: Handle) -> bool {
        match self.shared.lock().get_mut(handle) {
            Some(entry) => {
                entry.add_watch();
                true
            }
            None => false,
        }
    }

    fn remove_watches(&self, handle: Handle) {
        if let Some(entry) = self.shared.lock().get_mut(handle) {
            entry.clear_watches();
        }
    }

    fn sync(&self) {}

    fn events(&self) -> broadcast::Receiver<LayerEvent> {
        self.shared.events.subscribe()
    }
}

#[cfg(test)]
mod tests;
