//! Session-bus transport for the context broker.
//!
//! Values cross the bus as JSON text of [`Value`], so the interface stays
//! independent of D-Bus variant typing.

use std::{sync::Arc, thread, time::Duration};

use futures::StreamExt;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};
use zbus::{
    Connection, fdo::DBusProxy, interface, message::Header, names::BusName,
    object_server::SignalEmitter, proxy,
};

use super::broker::{BrokerError, BrokerEvent, ContextBroker, LocalBroker};
use crate::{Value, layer::EVENT_CAPACITY};

/// Well-known bus name of the broker.
pub const BROKER_SERVICE: &str = "org.valuespace.ContextBroker";
/// Object path the broker is exported at.
pub const BROKER_OBJECT_PATH: &str = "/org/valuespace/ContextBroker";

/// Client side of the `org.valuespace.ContextBroker1` interface.
#[proxy(
    default_service = "org.valuespace.ContextBroker",
    default_path = "/org/valuespace/ContextBroker",
    interface = "org.valuespace.ContextBroker1"
)]
pub trait ContextBrokerBus {
    /// Returns whether `key` is set, and its JSON value.
    fn get(&self, key: &str) -> zbus::Result<(bool, String)>;

    /// Publishes a JSON value for `provider`.
    fn set(&self, provider: &str, key: &str, value: &str) -> zbus::Result<()>;

    /// Removes `key` if `provider` owns it.
    fn unset(&self, provider: &str, key: &str) -> zbus::Result<bool>;

    /// Removes everything `provider` published.
    fn remove_provider(&self, provider: &str) -> zbus::Result<bool>;

    /// Names of all properties.
    fn keys(&self) -> zbus::Result<Vec<String>>;

    /// Adds a subscriber to `key`.
    fn subscribe(&self, key: &str) -> zbus::Result<()>;

    /// Removes a subscriber from `key`.
    fn unsubscribe(&self, key: &str) -> zbus::Result<()>;

    /// A property was set, changed or removed.
    #[zbus(signal)]
    fn value_changed(&self, key: String) -> zbus::Result<()>;

    /// A property gained its first or lost its last subscriber.
    #[zbus(signal)]
    fn interest_changed(&self, key: String, interested: bool) -> zbus::Result<()>;
}

/// Exports a [`LocalBroker`] on the session bus.
pub struct BrokerService {
    broker: Arc<LocalBroker>,
}

impl BrokerService {
    /// Wraps `broker` for export.
    pub fn new(broker: Arc<LocalBroker>) -> Self {
        Self { broker }
    }

    /// Claims the broker name and serves until the returned connection is
    /// dropped.
    ///
    /// # Errors
    /// Returns `BrokerError::Dbus` if the bus is unreachable or the name is
    /// already taken.
    pub async fn serve(broker: Arc<LocalBroker>) -> Result<Connection, BrokerError> {
        let mut events = broker.events();

        let connection = zbus::connection::Builder::session()?
            .name(BROKER_SERVICE)?
            .serve_at(BROKER_OBJECT_PATH, Self::new(Arc::clone(&broker)))?
            .build()
            .await?;

        let mut departures = DBusProxy::new(&connection)
            .await?
            .receive_name_owner_changed()
            .await?;
        tokio::spawn(async move {
            while let Some(signal) = departures.next().await {
                let Ok(args) = signal.args() else {
                    continue;
                };
                let BusName::Unique(client) = args.name() else {
                    continue;
                };
                if args.new_owner().is_some() {
                    continue;
                }
                if broker.drop_client(client) {
                    info!(%client, "Released state of disconnected broker client");
                }
            }
        });

        let signal_connection = connection.clone();
        tokio::spawn(async move {
            let emitter = match SignalEmitter::new(&signal_connection, BROKER_OBJECT_PATH) {
                Ok(emitter) => emitter,
                Err(e) => {
                    error!("Cannot emit broker signals: {e}");
                    return;
                }
            };

            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Broker signal forwarding lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                let sent = match &event {
                    BrokerEvent::ValueChanged(key) => Self::value_changed(&emitter, key).await,
                    BrokerEvent::InterestChanged { key, interested } => {
                        Self::interest_changed(&emitter, key, *interested).await
                    }
                };
                if let Err(e) = sent {
                    warn!(?event, "Failed to emit broker signal: {e}");
                }
            }
        });

        info!(service = BROKER_SERVICE, "Context broker is serving");
        Ok(connection)
    }
}

fn call_failed(error: BrokerError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(error.to_string())
}

#[interface(name = "org.valuespace.ContextBroker1")]
impl BrokerService {
    async fn get(&self, key: &str) -> zbus::fdo::Result<(bool, String)> {
        match self.broker.get(key).map_err(call_failed)? {
            Some(value) => {
                let json = serde_json::to_string(&value)
                    .map_err(|e| call_failed(BrokerError::Encoding(e)))?;
                Ok((true, json))
            }
            None => Ok((false, String::new())),
        }
    }

    async fn set(
        &self,
        #[zbus(header)] header: Header<'_>,
        provider: &str,
        key: &str,
        value: &str,
    ) -> zbus::fdo::Result<()> {
        let value: Value = serde_json::from_str(value)
            .map_err(|e| zbus::fdo::Error::InvalidArgs(e.to_string()))?;
        let result = match header.sender() {
            Some(client) => self.broker.set_by(client, provider, key, value),
            None => self.broker.set(provider, key, value),
        };
        result.map_err(call_failed)
    }

    async fn unset(&self, provider: &str, key: &str) -> zbus::fdo::Result<bool> {
        self.broker.unset(provider, key).map_err(call_failed)
    }

    async fn remove_provider(&self, provider: &str) -> zbus::fdo::Result<bool> {
        self.broker.remove_provider(provider).map_err(call_failed)
    }

    async fn keys(&self) -> zbus::fdo::Result<Vec<String>> {
        self.broker.keys().map_err(call_failed)
    }

    async fn subscribe(
        &self,
        #[zbus(header)] header: Header<'_>,
        key: &str,
    ) -> zbus::fdo::Result<()> {
        let result = match header.sender() {
            Some(client) => self.broker.subscribe_by(client, key),
            None => self.broker.subscribe(key),
        };
        result.map_err(call_failed)
    }

    async fn unsubscribe(
        &self,
        #[zbus(header)] header: Header<'_>,
        key: &str,
    ) -> zbus::fdo::Result<()> {
        let result = match header.sender() {
            Some(client) => self.broker.unsubscribe_by(client, key),
            None => self.broker.unsubscribe(key),
        };
        result.map_err(call_failed)
    }

    #[zbus(signal)]
    async fn value_changed(emitter: &SignalEmitter<'_>, key: &str) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn interest_changed(
        emitter: &SignalEmitter<'_>,
        key: &str,
        interested: bool,
    ) -> zbus::Result<()>;
}

type Reply<T> = oneshot::Sender<Result<T, BrokerError>>;

enum BrokerCommand {
    Get { key: String, reply: Reply<Option<Value>> },
    Set { provider: String, key: String, value: Value, reply: Reply<()> },
    Unset { provider: String, key: String, reply: Reply<bool> },
    RemoveProvider { provider: String, reply: Reply<bool> },
    Keys { reply: Reply<Vec<String>> },
    Subscribe { key: String, reply: Reply<()> },
    Unsubscribe { key: String, reply: Reply<()> },
}

/// Broker client that talks to a [`BrokerService`] over the session bus.
///
/// The bus connection lives on a dedicated worker thread with its own
/// runtime; calls are queued to it and block on the reply.
pub struct DbusBroker {
    commands: mpsc::UnboundedSender<BrokerCommand>,
    events: broadcast::Sender<BrokerEvent>,
}

impl DbusBroker {
    /// Connects to the session bus and waits until the worker is ready.
    ///
    /// # Errors
    /// Returns `BrokerError` if the worker cannot start or the bus is
    /// unreachable.
    pub fn connect(timeout: Duration) -> Result<Self, BrokerError> {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (ready_tx, ready_rx) = oneshot::channel();

        let worker_events = events.clone();
        thread::Builder::new()
            .name("context-broker".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(BrokerError::Worker(e.to_string())));
                        return;
                    }
                };

                runtime.block_on(run_worker(command_rx, worker_events, timeout, ready_tx));
            })
            .map_err(|e| BrokerError::Worker(e.to_string()))?;

        futures::executor::block_on(ready_rx).map_err(|_| BrokerError::Disconnected)??;

        Ok(Self { commands, events })
    }

    fn request<T>(&self, command: impl FnOnce(Reply<T>) -> BrokerCommand) -> Result<T, BrokerError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| BrokerError::Disconnected)?;

        futures::executor::block_on(response).map_err(|_| BrokerError::Disconnected)?
    }
}

impl ContextBroker for DbusBroker {
    fn get(&self, key: &str) -> Result<Option<Value>, BrokerError> {
        let key = key.to_string();
        self.request(|reply| BrokerCommand::Get { key, reply })
    }

    fn set(&self, provider: &str, key: &str, value: Value) -> Result<(), BrokerError> {
        let (provider, key) = (provider.to_string(), key.to_string());
        self.request(|reply| BrokerCommand::Set {
            provider,
            key,
            value,
            reply,
        })
    }

    fn unset(&self, provider: &str, key: &str) -> Result<bool, BrokerError> {
        let (provider, key) = (provider.to_string(), key.to_string());
        self.request(|reply| BrokerCommand::Unset {
            provider,
            key,
            reply,
        })
    }

    fn remove_provider(&self, provider: &str) -> Result<bool, BrokerError> {
        let provider = provider.to_string();
        self.request(|reply| BrokerCommand::RemoveProvider { provider, reply })
    }

    fn keys(&self) -> Result<Vec<String>, BrokerError> {
        self.request(|reply| BrokerCommand::Keys { reply })
    }

    fn subscribe(&self, key: &str) -> Result<(), BrokerError> {
        let key = key.to_string();
        self.request(|reply| BrokerCommand::Subscribe { key, reply })
    }

    fn unsubscribe(&self, key: &str) -> Result<(), BrokerError> {
        let key = key.to_string();
        self.request(|reply| BrokerCommand::Unsubscribe { key, reply })
    }

    fn events(&self) -> broadcast::Receiver<BrokerEvent> {
        self.events.subscribe()
    }
}

async fn run_worker(
    mut command_rx: mpsc::UnboundedReceiver<BrokerCommand>,
    events: broadcast::Sender<BrokerEvent>,
    timeout: Duration,
    ready: oneshot::Sender<Result<(), BrokerError>>,
) {
    let proxy = match connect_proxy().await {
        Ok(proxy) => proxy,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    let ping = with_timeout(timeout, async { Ok(proxy.keys().await?) }).await;
    if let Err(e) = ping {
        let _ = ready.send(Err(e));
        return;
    }

    let signals = match forward_signals(&proxy, events).await {
        Ok(task) => task,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    let _ = ready.send(Ok(()));
    debug!("Context broker client connected");

    while let Some(command) = command_rx.recv().await {
        handle_command(&proxy, command, timeout).await;
    }

    signals.abort();
    debug!("Context broker client stopped");
}

async fn connect_proxy() -> Result<ContextBrokerBusProxy<'static>, BrokerError> {
    let connection = Connection::session().await?;
    Ok(ContextBrokerBusProxy::new(&connection).await?)
}

async fn forward_signals(
    proxy: &ContextBrokerBusProxy<'static>,
    events: broadcast::Sender<BrokerEvent>,
) -> Result<tokio::task::JoinHandle<()>, BrokerError> {
    let mut value_changed = proxy.receive_value_changed().await?;
    let mut interest_changed = proxy.receive_interest_changed().await?;

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(signal) = value_changed.next() => {
                    if let Ok(args) = signal.args() {
                        let _ = events.send(BrokerEvent::ValueChanged(args.key));
                    }
                }

                Some(signal) = interest_changed.next() => {
                    if let Ok(args) = signal.args() {
                        let _ = events.send(BrokerEvent::InterestChanged {
                            key: args.key,
                            interested: args.interested,
                        });
                    }
                }

                else => break,
            }
        }
    }))
}

async fn with_timeout<T>(
    timeout: Duration,
    call: impl Future<Output = Result<T, BrokerError>>,
) -> Result<T, BrokerError> {
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| BrokerError::Timeout(timeout))?
}

async fn handle_command(proxy: &ContextBrokerBusProxy<'static>, command: BrokerCommand, timeout: Duration) {
    match command {
        BrokerCommand::Get { key, reply } => {
            let result = with_timeout(timeout, async {
                let (found, json) = proxy.get(&key).await?;
                if !found {
                    return Ok(None);
                }
                Ok(Some(serde_json::from_str(&json)?))
            })
            .await;
            let _ = reply.send(result);
        }
        BrokerCommand::Set {
            provider,
            key,
            value,
            reply,
        } => {
            let result = with_timeout(timeout, async {
                let json = serde_json::to_string(&value)?;
                Ok(proxy.set(&provider, &key, &json).await?)
            })
            .await;
            let _ = reply.send(result);
        }
        BrokerCommand::Unset {
            provider,
            key,
            reply,
        } => {
            let result =
                with_timeout(timeout, async { Ok(proxy.unset(&provider, &key).await?) }).await;
            let _ = reply.send(result);
        }
        BrokerCommand::RemoveProvider { provider, reply } => {
            let result =
                with_timeout(timeout, async { Ok(proxy.remove_provider(&provider).await?) }).await;
            let _ = reply.send(result);
        }
        BrokerCommand::Keys { reply } => {
            let result = with_timeout(timeout, async { Ok(proxy.keys().await?) }).await;
            let _ = reply.send(result);
        }
        BrokerCommand::Subscribe { key, reply } => {
            let result = with_timeout(timeout, async { Ok(proxy.subscribe(&key).await?) }).await;
            if let Err(e) = &result {
                error!(key, "Broker subscription failed: {e}");
            }
            let _ = reply.send(result);
        }
        BrokerCommand::Unsubscribe { key, reply } => {
            let result = with_timeout(timeout, async { Ok(proxy.unsubscribe(&key).await?) }).await;
            let _ = reply.send(result);
        }
    }
}
