use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use tokio::sync::broadcast;
use tracing::{debug, instrument};

use crate::{Value, layer::EVENT_CAPACITY};

/// Errors from talking to a context broker.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// D-Bus operation failed
    #[error("D-Bus error: {0}")]
    Dbus(#[from] zbus::Error),

    /// The broker rejected a call
    #[error("broker call failed: {0}")]
    Call(#[from] zbus::fdo::Error),

    /// A value could not be encoded for or decoded from the bus
    #[error("invalid value encoding: {0}")]
    Encoding(#[from] serde_json::Error),

    /// The broker worker has stopped
    #[error("broker connection is closed")]
    Disconnected,

    /// The broker did not answer in time
    #[error("broker call timed out after {0:?}")]
    Timeout(Duration),

    /// The broker worker could not be started
    #[error("failed to start broker worker: {0}")]
    Worker(String),
}

/// Notification from a context broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    /// A property was set, changed or removed.
    ValueChanged(String),
    /// The first subscriber arrived at, or the last one left, a property.
    InterestChanged {
        /// Dotted property name
        key: String,
        /// Whether anyone is subscribed now
        interested: bool,
    },
}

/// A context property broker.
///
/// Properties are flat dotted names (`Battery.ChargePercentage`), each
/// owned by the provider that last set it. Every client sees every
/// `ValueChanged`; subscriptions only count interest so that providers
/// learn when someone listens.
pub trait ContextBroker: Send + Sync {
    /// Current value of `key`.
    fn get(&self, key: &str) -> Result<Option<Value>, BrokerError>;

    /// Publishes `value` under `key` on behalf of `provider`.
    fn set(&self, provider: &str, key: &str, value: Value) -> Result<(), BrokerError>;

    /// Removes `key` if `provider` owns it.
    fn unset(&self, provider: &str, key: &str) -> Result<bool, BrokerError>;

    /// Removes every property `provider` owns.
    fn remove_provider(&self, provider: &str) -> Result<bool, BrokerError>;

    /// Names of all published properties.
    fn keys(&self) -> Result<Vec<String>, BrokerError>;

    /// Registers one more subscriber for `key`.
    fn subscribe(&self, key: &str) -> Result<(), BrokerError>;

    /// Drops one subscriber of `key`.
    fn unsubscribe(&self, key: &str) -> Result<(), BrokerError>;

    /// Subscribes to broker notifications.
    fn events(&self) -> broadcast::Receiver<BrokerEvent>;
}

#[derive(Debug)]
struct Property {
    value: Value,
    provider: String,
}

/// What one bus client left in the broker.
#[derive(Debug, Default)]
struct ClientState {
    providers: BTreeSet<String>,
    subscriptions: HashMap<String, usize>,
}

#[derive(Debug, Default)]
struct LocalState {
    properties: BTreeMap<String, Property>,
    subscribers: HashMap<String, usize>,
    clients: HashMap<String, ClientState>,
}

/// In-process broker.
///
/// Used directly when every publisher and subscriber shares one process,
/// and as the state behind [`BrokerService`](super::BrokerService) when a
/// process hosts the broker on the session bus.
#[derive(Debug)]
pub struct LocalBroker {
    state: Mutex<LocalState>,
    events: broadcast::Sender<BrokerEvent>,
}

impl Default for LocalBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBroker {
    /// Creates an empty broker.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Mutex::new(LocalState::default()),
            events,
        }
    }

    /// Number of subscribers currently registered for `key`.
    pub fn subscriber_count(&self, key: &str) -> usize {
        self.lock().subscribers.get(key).copied().unwrap_or(0)
    }

    /// [`set`](ContextBroker::set) on behalf of the bus client `client`,
    /// which is remembered as the owner of `provider`.
    pub fn set_by(
        &self,
        client: &str,
        provider: &str,
        key: &str,
        value: Value,
    ) -> Result<(), BrokerError> {
        self.lock()
            .clients
            .entry(client.to_string())
            .or_default()
            .providers
            .insert(provider.to_string());
        self.set(provider, key, value)
    }

    /// [`subscribe`](ContextBroker::subscribe) on behalf of `client`.
    pub fn subscribe_by(&self, client: &str, key: &str) -> Result<(), BrokerError> {
        *self
            .lock()
            .clients
            .entry(client.to_string())
            .or_default()
            .subscriptions
            .entry(key.to_string())
            .or_insert(0) += 1;
        self.subscribe(key)
    }

    /// [`unsubscribe`](ContextBroker::unsubscribe) on behalf of `client`.
    /// Ignored unless `client` holds a subscription to `key`.
    pub fn unsubscribe_by(&self, client: &str, key: &str) -> Result<(), BrokerError> {
        let held = {
            let mut state = self.lock();
            let Some(subscriptions) = state
                .clients
                .get_mut(client)
                .map(|client| &mut client.subscriptions)
            else {
                return Ok(());
            };
            match subscriptions.get_mut(key) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    true
                }
                Some(_) => {
                    subscriptions.remove(key);
                    true
                }
                None => false,
            }
        };

        if held {
            self.unsubscribe(key)?;
        }
        Ok(())
    }

    /// Drops every subscription `client` holds and every property its
    /// providers published. Returns whether the client was known.
    #[instrument(skip(self), level = "debug")]
    pub fn drop_client(&self, client: &str) -> bool {
        let Some(gone) = self.lock().clients.remove(client) else {
            return false;
        };

        for (key, count) in &gone.subscriptions {
            for _ in 0..*count {
                let _ = self.unsubscribe(key);
            }
        }
        for provider in &gone.providers {
            let _ = self.remove_provider(provider);
        }

        debug!(
            providers = gone.providers.len(),
            subscriptions = gone.subscriptions.len(),
            "Dropped client state"
        );
        true
    }

    fn lock(&self) -> MutexGuard<'_, LocalState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn notify(&self, event: BrokerEvent) {
        let _ = self.events.send(event);
    }
}

impl ContextBroker for LocalBroker {
    fn get(&self, key: &str) -> Result<Option<Value>, BrokerError> {
        Ok(self
            .lock()
            .properties
            .get(key)
            .map(|property| property.value.clone()))
    }

    #[instrument(skip(self, value), level = "debug")]
    fn set(&self, provider: &str, key: &str, value: Value) -> Result<(), BrokerError> {
        {
            let mut state = self.lock();
            let unchanged = state
                .properties
                .get(key)
                .is_some_and(|existing| existing.value == value && existing.provider == provider);
            if unchanged {
                return Ok(());
            }

            state.properties.insert(
                key.to_string(),
                Property {
                    value,
                    provider: provider.to_string(),
                },
            );
        }

        self.notify(BrokerEvent::ValueChanged(key.to_string()));
        Ok(())
    }

    fn unset(&self, provider: &str, key: &str) -> Result<bool, BrokerError> {
        {
            let mut state = self.lock();
            match state.properties.get(key) {
                Some(property) if property.provider == provider => {
                    state.properties.remove(key);
                }
                _ => return Ok(false),
            }
        }

        self.notify(BrokerEvent::ValueChanged(key.to_string()));
        Ok(true)
    }

    fn remove_provider(&self, provider: &str) -> Result<bool, BrokerError> {
        let removed: Vec<String> = {
            let mut state = self.lock();
            let owned: Vec<String> = state
                .properties
                .iter()
                .filter(|(_, property)| property.provider == provider)
                .map(|(key, _)| key.clone())
                .collect();
            for key in &owned {
                state.properties.remove(key);
            }
            owned
        };

        debug!(provider, count = removed.len(), "Removed provider properties");

        let any = !removed.is_empty();
        for key in removed {
            self.notify(BrokerEvent::ValueChanged(key));
        }
        Ok(any)
    }

    fn keys(&self) -> Result<Vec<String>, BrokerError> {
        Ok(self.lock().properties.keys().cloned().collect())
    }

    fn subscribe(&self, key: &str) -> Result<(), BrokerError> {
        let first = {
            let mut state = self.lock();
            let count = state.subscribers.entry(key.to_string()).or_insert(0);
            *count += 1;
            *count == 1
        };

        if first {
            self.notify(BrokerEvent::InterestChanged {
                key: key.to_string(),
                interested: true,
            });
        }
        Ok(())
    }

    fn unsubscribe(&self, key: &str) -> Result<(), BrokerError> {
        let last = {
            let mut state = self.lock();
            match state.subscribers.get_mut(key) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    false
                }
                Some(_) => {
                    state.subscribers.remove(key);
                    true
                }
                None => false,
            }
        };

        if last {
            self.notify(BrokerEvent::InterestChanged {
                key: key.to_string(),
                interested: false,
            });
        }
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<BrokerEvent> {
        self.events.subscribe()
    }
}
