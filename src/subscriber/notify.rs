use std::{
    sync::{Arc, Mutex},
    thread,
};

use futures::{
    StreamExt,
    future::{self, Either},
    stream::{self, BoxStream},
};
use tokio::sync::{broadcast, oneshot};
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};
use tracing::{debug, warn};

use crate::layer::{Handle, Layer, LayerEvent, LayerId};

/// Capacity of the consolidated change channel.
const CHANGE_CAPACITY: usize = 64;

/// Identity of a binding set: the (layer, handle) pairs in priority order.
pub(crate) type BindingKey = Vec<(LayerId, Handle)>;

/// Merges the change events of several (layer, handle) pairs into one
/// consolidated signal.
///
/// Subscribers bound to the same pairs share one aggregator. Each
/// [`ContentsChanged`](super::ContentsChanged) listener holds a strong
/// reference; the merging thread stops when the last one goes away.
pub(crate) struct Aggregator {
    changes: broadcast::Sender<()>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl Aggregator {
    /// Starts merging the events of `bindings`.
    ///
    /// Returns `None` if the merging thread cannot be spawned.
    pub(crate) fn start(bindings: &[(Arc<dyn Layer>, Handle)]) -> Option<Arc<Self>> {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        let (shutdown, stop) = oneshot::channel::<()>();

        let sources: Vec<BoxStream<'static, ()>> = bindings
            .iter()
            .map(|(layer, handle)| changes_of(layer.events(), *handle))
            .collect();

        let sender = changes.clone();
        let spawned = thread::Builder::new()
            .name("contents-changed".to_string())
            .spawn(move || {
                let forward = stream::select_all(sources).for_each(move |()| {
                    let _ = sender.send(());
                    future::ready(())
                });
                match futures::executor::block_on(future::select(stop, Box::pin(forward))) {
                    Either::Left(_) => debug!("Change aggregation stopped"),
                    Either::Right(_) => debug!("Every aggregated layer closed its events"),
                }
            });

        if let Err(e) = spawned {
            warn!("Cannot start change aggregation: {e}");
            return None;
        }

        Some(Arc::new(Self {
            changes,
            shutdown: Mutex::new(Some(shutdown)),
        }))
    }

    /// Subscribes to the consolidated signal.
    pub(crate) fn subscribe(&self) -> broadcast::Receiver<()> {
        self.changes.subscribe()
    }
}

impl Drop for Aggregator {
    fn drop(&mut self) {
        let shutdown = match self.shutdown.get_mut() {
            Ok(shutdown) => shutdown.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(shutdown) = shutdown {
            let _ = shutdown.send(());
        }
    }
}

/// One `()` per `Changed` event for `handle`; a lag counts as a change.
fn changes_of(events: broadcast::Receiver<LayerEvent>, handle: Handle) -> BoxStream<'static, ()> {
    BroadcastStream::new(events)
        .filter_map(move |event| {
            future::ready(match event {
                Ok(LayerEvent::Changed(changed)) if changed == handle => Some(()),
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    debug!(skipped, "Layer events lagged, reporting a change");
                    Some(())
                }
            })
        })
        .boxed()
}
