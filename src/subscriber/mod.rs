//! Read-side facade.
//!
//! A [`Subscriber`] attaches to every layer its selection admits, reads
//! through them in priority order and folds their change events into one
//! [`ContentsChanged`] stream.

pub(crate) mod notify;

use std::{
    collections::BTreeSet,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures::Stream;
use tokio::sync::{broadcast::error::RecvError, watch};
use tracing::{debug, instrument, warn};

use crate::{
    Path, Value,
    layer::{Handle, Layer, LayerId, LayerOptions},
    registry::{LayerRegistry, LayerSelection},
};

/// Merged view of one path across layers.
///
/// Binding happens at construction and again on [`set_path`](Self::set_path),
/// [`cd`](Self::cd) and [`cd_up`](Self::cd_up). Rebinding ends every
/// [`ContentsChanged`] stream obtained before it.
pub struct Subscriber {
    registry: Arc<LayerRegistry>,
    selection: LayerSelection,
    path: Path,
    bindings: Vec<(Arc<dyn Layer>, Handle)>,
    epoch: watch::Sender<u64>,
}

impl Subscriber {
    /// Subscribes to `path` in every installed layer.
    pub fn new(registry: Arc<LayerRegistry>, path: impl Into<Path>) -> Self {
        Self::bound(registry, path.into(), LayerSelection::default())
    }

    /// Subscribes to `path` in every layer whose options satisfy `filter`.
    pub fn with_filter(
        registry: Arc<LayerRegistry>,
        path: impl Into<Path>,
        filter: LayerOptions,
    ) -> Self {
        Self::bound(registry, path.into(), LayerSelection::Filter(filter))
    }

    /// Subscribes to `path` in the single layer `layer`.
    pub fn with_layer(registry: Arc<LayerRegistry>, path: impl Into<Path>, layer: LayerId) -> Self {
        Self::bound(registry, path.into(), LayerSelection::Layer(layer))
    }

    fn bound(registry: Arc<LayerRegistry>, path: Path, selection: LayerSelection) -> Self {
        let (epoch, _) = watch::channel(0);
        let mut subscriber = Self {
            registry,
            selection,
            path,
            bindings: Vec::new(),
            epoch,
        };
        subscriber.bind();
        subscriber
    }

    #[instrument(skip(self), fields(path = %self.path))]
    fn bind(&mut self) {
        let bindings: Vec<_> = self
            .registry
            .matching(self.selection)
            .filter_map(|layer| {
                let handle = layer.open(None, &self.path)?;
                if !layer.set_interest(handle, true) {
                    warn!(layer = layer.name(), "Failed to arm change notification");
                }
                Some((Arc::clone(layer), handle))
            })
            .collect();

        if bindings.is_empty() {
            debug!("No layer accepts this path");
        }
        self.bindings = bindings;
    }

    fn unbind(&mut self) {
        for (layer, handle) in self.bindings.drain(..) {
            if !layer.set_interest(handle, false) {
                warn!(layer = layer.name(), "Failed to disarm change notification");
            }
            layer.release(handle);
        }
        self.epoch.send_modify(|epoch| *epoch += 1);
    }

    /// The bound path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether at least one layer is attached.
    pub fn is_connected(&self) -> bool {
        !self.bindings.is_empty()
    }

    /// Identities of the attached layers in priority order.
    pub fn layers(&self) -> Vec<LayerId> {
        self.bindings.iter().map(|(layer, _)| layer.id()).collect()
    }

    /// The value at `sub_path` from the highest-priority layer that has one.
    pub fn find_value(&self, sub_path: impl Into<Path>) -> Option<Value> {
        let sub_path = sub_path.into();
        self.bindings
            .iter()
            .find_map(|(layer, handle)| layer.read_value(*handle, &sub_path))
    }

    /// Like [`find_value`](Self::find_value), falling back to `default`.
    pub fn value(&self, sub_path: impl Into<Path>, default: impl Into<Value>) -> Value {
        self.find_value(sub_path)
            .unwrap_or_else(|| default.into())
    }

    /// Names of the immediate children, merged across layers.
    pub fn sub_paths(&self) -> BTreeSet<String> {
        self.bindings
            .iter()
            .flat_map(|(layer, handle)| layer.children(*handle))
            .collect()
    }

    /// Rebinds to the absolute `path`.
    pub fn set_path(&mut self, path: impl Into<Path>) {
        self.unbind();
        self.path = path.into();
        self.bind();
    }

    /// Rebinds relative to the current path; a leading `/` makes `path`
    /// absolute.
    pub fn cd(&mut self, path: &str) {
        let target = if path.starts_with('/') {
            Path::new(path)
        } else {
            self.path.join(&Path::new(path))
        };
        self.set_path(target);
    }

    /// Rebinds to the parent path.
    pub fn cd_up(&mut self) {
        let parent = self.path.parent();
        self.set_path(parent);
    }

    /// Stream of consolidated change notifications.
    ///
    /// Subscribers bound to the same layer handles share one aggregator.
    /// The stream ends when this subscriber rebinds or is dropped.
    pub fn contents_changed(&self) -> ContentsChanged {
        let mut epoch = self.epoch.subscribe();
        let aggregator = if self.bindings.is_empty() {
            None
        } else {
            self.registry.notifier(&self.bindings)
        };
        let mut changes = aggregator.as_ref().map(|aggregator| aggregator.subscribe());

        let inner = async_stream::stream! {
            let _aggregator = aggregator;
            loop {
                let Some(changes) = changes.as_mut() else {
                    let _ = epoch.changed().await;
                    break;
                };
                let changed = tokio::select! {
                    biased;
                    _ = epoch.changed() => false,
                    change = changes.recv() => !matches!(change, Err(RecvError::Closed)),
                };
                if !changed {
                    break;
                }
                yield ();
            }
        };

        ContentsChanged {
            inner: Box::pin(inner),
        }
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.unbind();
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("path", &self.path)
            .field("layers", &self.layers())
            .finish()
    }
}

/// Consolidated change notifications of a [`Subscriber`].
pub struct ContentsChanged {
    inner: Pin<Box<dyn Stream<Item = ()> + Send>>,
}

impl Stream for ContentsChanged {
    type Item = ();

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}
