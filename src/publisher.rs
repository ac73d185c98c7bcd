//! Write-side facade.

use std::{
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    task::{Context, Poll},
};

use futures::Stream;
use tokio::sync::{broadcast::error::RecvError, watch};
use tracing::{debug, info, instrument, warn};

use crate::{
    Path, Value,
    layer::{Handle, Layer, LayerEvent, LayerId, LayerOptions, WriterId},
    registry::{LayerRegistry, LayerSelection},
};

/// Writes values below one path into exactly one layer.
///
/// The layer is the first one, in priority order, that the selection admits
/// and that accepts the path. Without such a layer the publisher stays
/// disconnected and every write is a logged no-op.
///
/// Dropping a publisher bound to a transient layer removes everything it
/// wrote.
pub struct Publisher {
    _registry: Arc<LayerRegistry>,
    path: Path,
    writer: WriterId,
    binding: Option<(Arc<dyn Layer>, Handle)>,
    has_written: AtomicBool,
    watching: AtomicBool,
    closed: watch::Sender<()>,
}

impl Publisher {
    /// Publishes at `path` in the first writable layer.
    pub fn new(registry: Arc<LayerRegistry>, path: impl Into<Path>) -> Self {
        Self::with_filter(registry, path, LayerOptions::empty())
    }

    /// Publishes at `path` in the first writable layer satisfying `filter`.
    pub fn with_filter(
        registry: Arc<LayerRegistry>,
        path: impl Into<Path>,
        filter: LayerOptions,
    ) -> Self {
        let selection = LayerSelection::Filter(filter | LayerOptions::WRITABLE);
        Self::bound(registry, path.into(), selection)
    }

    /// Publishes at `path` in the layer `layer`.
    pub fn with_layer(registry: Arc<LayerRegistry>, path: impl Into<Path>, layer: LayerId) -> Self {
        Self::bound(registry, path.into(), LayerSelection::Layer(layer))
    }

    #[instrument(skip(registry, path), fields(path = %path))]
    fn bound(registry: Arc<LayerRegistry>, path: Path, selection: LayerSelection) -> Self {
        let binding = registry.matching(selection).find_map(|layer| {
            let handle = layer.open(None, &path)?;
            Some((Arc::clone(layer), handle))
        });

        match &binding {
            Some((layer, _)) => debug!(layer = layer.name(), "Publisher bound"),
            None => warn!(?selection, "No layer accepts this publisher"),
        }

        let (closed, _) = watch::channel(());
        Self {
            _registry: registry,
            path,
            writer: WriterId::new(),
            binding,
            has_written: AtomicBool::new(false),
            watching: AtomicBool::new(false),
            closed,
        }
    }

    /// The bound path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a layer accepted this publisher.
    pub fn is_connected(&self) -> bool {
        self.binding.is_some()
    }

    /// Identity of the bound layer.
    pub fn layer(&self) -> Option<LayerId> {
        self.binding.as_ref().map(|(layer, _)| layer.id())
    }

    /// Writes `value` at `name`, relative to the bound path.
    ///
    /// The write may be buffered until [`sync`](Self::sync). Returns
    /// whether the layer accepted it.
    pub fn set_value(&self, name: impl Into<Path>, value: impl Into<Value>) -> bool {
        let name = name.into();
        let Some((layer, handle)) = &self.binding else {
            warn!(path = %self.path, %name, "Write on a disconnected publisher ignored");
            return false;
        };

        let written = layer.write_value(&self.writer, *handle, &name, value.into());
        if written {
            self.has_written.store(true, Ordering::Release);
        } else {
            warn!(layer = layer.name(), path = %self.path, %name, "Layer rejected write");
        }
        written
    }

    /// Removes the value at `name` and everything below it.
    pub fn reset_value(&self, name: impl Into<Path>) -> bool {
        let name = name.into();
        let Some((layer, handle)) = &self.binding else {
            warn!(path = %self.path, %name, "Reset on a disconnected publisher ignored");
            return false;
        };
        layer.remove_value(&self.writer, *handle, &name)
    }

    /// Blocks until earlier writes are visible to other processes.
    pub fn sync(&self) {
        match &self.binding {
            Some((layer, _)) => layer.sync(),
            None => warn!(path = %self.path, "Sync on a disconnected publisher ignored"),
        }
    }

    /// Stream of `(attribute, interested)` pairs reporting when readers
    /// start or stop listening below the bound path.
    ///
    /// Layers without interest reporting yield an empty stream. The stream
    /// ends when the publisher is dropped.
    pub fn interest_changed(&self) -> InterestChanged {
        let mut closed = self.closed.subscribe();
        let watched = match &self.binding {
            Some((layer, handle)) if layer.add_watch(*handle) => {
                self.watching.store(true, Ordering::Release);
                Some((layer.events(), *handle))
            }
            Some((layer, _)) => {
                debug!(layer = layer.name(), "Layer does not report interest");
                None
            }
            None => None,
        };

        let inner = async_stream::stream! {
            let Some((mut events, watched)) = watched else {
                return;
            };
            loop {
                let event = tokio::select! {
                    biased;
                    _ = closed.changed() => break,
                    event = events.recv() => event,
                };
                match event {
                    Ok(LayerEvent::Interest { handle, attribute, interested }) if handle == watched => {
                        yield (attribute.segments().join("/"), interested);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Interest events lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        };

        InterestChanged {
            inner: Box::pin(inner),
        }
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        let Some((layer, handle)) = self.binding.take() else {
            return;
        };

        if *self.has_written.get_mut() && layer.options().contains(LayerOptions::TRANSIENT) {
            if layer.remove_subtree(&self.writer, handle) {
                info!(path = %self.path, layer = layer.name(), "Removed transient values");
            }
            layer.sync();
        }
        if *self.watching.get_mut() {
            layer.remove_watches(handle);
        }
        layer.release(handle);
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("path", &self.path)
            .field("layer", &self.layer())
            .finish()
    }
}

/// Reader interest reported to a [`Publisher`].
pub struct InterestChanged {
    inner: Pin<Box<dyn Stream<Item = (String, bool)> + Send>>,
}

impl Stream for InterestChanged {
    type Item = (String, bool);

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}
