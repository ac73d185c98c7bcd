//! The per-process set of installed layers.
//!
//! A [`LayerRegistry`] is built once, from configuration or from explicit
//! layers, and injected into every [`Publisher`](crate::Publisher) and
//! [`Subscriber`](crate::Subscriber) as an `Arc`. Layers are kept in
//! priority order (lowest `order` first).

mod worker;

pub use worker::{LayerWorker, WorkerLayer};

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex, MutexGuard, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tracing::{info, instrument, warn};

use crate::{
    Result, ValueSpaceError,
    config::{BrokerBackend, ConfigPaths, LayersConfig, ValueSpaceConfig},
    layer::{
        Handle, Layer, LayerId, LayerOptions,
        context::{self, ContextBrokerLayer, LocalBroker},
        document::{DocumentLayer, DocumentSettings},
        registry::{HiveKind, RegistryLayer, RegistrySettings},
        store::{ConfigStoreLayer, ConfigStoreSettings},
    },
    subscriber::notify::{Aggregator, BindingKey},
};

static REGISTRY_CLAIMED: AtomicBool = AtomicBool::new(false);

/// Marks this process as owning its configured registry until dropped.
#[derive(Debug)]
struct ProcessClaim;

impl ProcessClaim {
    fn acquire() -> Result<Self> {
        REGISTRY_CLAIMED
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| Self)
            .map_err(|_| ValueSpaceError::RegistryActive)
    }
}

impl Drop for ProcessClaim {
    fn drop(&mut self) {
        REGISTRY_CLAIMED.store(false, Ordering::Release);
    }
}

/// Which layers a facade binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerSelection {
    /// Every layer whose options satisfy the filter.
    Filter(LayerOptions),
    /// The one layer with this identity.
    Layer(LayerId),
}

impl LayerSelection {
    /// Whether `layer` is selected.
    pub fn admits(&self, layer: &dyn Layer) -> bool {
        match self {
            LayerSelection::Filter(filter) => layer.options().satisfies(*filter),
            LayerSelection::Layer(id) => layer.id() == *id,
        }
    }
}

impl Default for LayerSelection {
    fn default() -> Self {
        LayerSelection::Filter(LayerOptions::empty())
    }
}

/// Ordered collection of the installed layers.
pub struct LayerRegistry {
    layers: Vec<Arc<dyn Layer>>,
    notifiers: Mutex<HashMap<BindingKey, Weak<Aggregator>>>,
    worker: Option<Arc<LayerWorker>>,
    _claim: Option<ProcessClaim>,
}

impl LayerRegistry {
    /// Installs every layer enabled in `config`.
    ///
    /// Layers that fail to come up are logged and skipped; the registry
    /// then simply offers fewer layers. Only one registry built this way
    /// may exist in a process at a time.
    ///
    /// # Errors
    /// Returns `ValueSpaceError::RegistryActive` if another configured
    /// registry is alive, or `WorkerUnavailable` if the dedicated worker
    /// cannot start.
    #[instrument(skip(config))]
    pub fn from_config(config: &ValueSpaceConfig) -> Result<Arc<Self>> {
        let claim = ProcessClaim::acquire()?;
        let worker = if config.registry.dedicated_worker {
            Some(LayerWorker::spawn()?)
        } else {
            None
        };

        let layers = build_layers(&config.layers)
            .into_iter()
            .map(|layer| match &worker {
                Some(worker) => {
                    Arc::new(WorkerLayer::new(layer, Arc::clone(worker))) as Arc<dyn Layer>
                }
                None => layer,
            })
            .collect();

        let mut registry = Self::assemble(layers)?;
        registry.worker = worker;
        registry._claim = Some(claim);

        info!(
            layers = registry.layers.len(),
            dedicated_worker = registry.worker.is_some(),
            "Layer registry ready"
        );
        Ok(Arc::new(registry))
    }

    /// Builds a registry from explicit layers.
    ///
    /// Meant for embedding and tests; it does not claim the process.
    ///
    /// # Errors
    /// Returns `ValueSpaceError::DuplicateLayer` if two layers share an id.
    pub fn from_layers(layers: Vec<Arc<dyn Layer>>) -> Result<Arc<Self>> {
        Self::assemble(layers).map(Arc::new)
    }

    fn assemble(mut layers: Vec<Arc<dyn Layer>>) -> Result<Self> {
        let mut seen = HashSet::new();
        for layer in &layers {
            if !seen.insert(layer.id()) {
                return Err(ValueSpaceError::DuplicateLayer(layer.id()));
            }
        }
        layers.sort_by_key(|layer| layer.order());

        Ok(Self {
            layers,
            notifiers: Mutex::new(HashMap::new()),
            worker: None,
            _claim: None,
        })
    }

    /// Installed layers in priority order.
    pub fn layers(&self) -> &[Arc<dyn Layer>] {
        &self.layers
    }

    /// The installed layer with identity `id`.
    pub fn layer(&self, id: LayerId) -> Option<&Arc<dyn Layer>> {
        self.layers.iter().find(|layer| layer.id() == id)
    }

    /// Identities of the installed layers in priority order.
    pub fn available_layers(&self) -> Vec<LayerId> {
        self.layers.iter().map(|layer| layer.id()).collect()
    }

    /// Layers admitted by `selection`, in priority order.
    pub fn matching(&self, selection: LayerSelection) -> impl Iterator<Item = &Arc<dyn Layer>> {
        self.layers
            .iter()
            .filter(move |layer| selection.admits(layer.as_ref()))
    }

    /// Whether the layers run on a dedicated worker thread.
    pub fn has_dedicated_worker(&self) -> bool {
        self.worker.is_some()
    }

    /// Number of aggregators that still have listeners.
    pub fn active_notifiers(&self) -> usize {
        self.lock_notifiers()
            .values()
            .filter(|notifier| notifier.strong_count() > 0)
            .count()
    }

    /// Returns the aggregator shared by every subscriber bound to exactly
    /// `bindings`, starting one if none is alive.
    pub(crate) fn notifier(&self, bindings: &[(Arc<dyn Layer>, Handle)]) -> Option<Arc<Aggregator>> {
        let key: BindingKey = bindings
            .iter()
            .map(|(layer, handle)| (layer.id(), *handle))
            .collect();

        let mut notifiers = self.lock_notifiers();
        notifiers.retain(|_, notifier| notifier.strong_count() > 0);

        if let Some(existing) = notifiers.get(&key).and_then(Weak::upgrade) {
            return Some(existing);
        }

        let aggregator = Aggregator::start(bindings)?;
        notifiers.insert(key, Arc::downgrade(&aggregator));
        Some(aggregator)
    }

    fn lock_notifiers(&self) -> MutexGuard<'_, HashMap<BindingKey, Weak<Aggregator>>> {
        match self.notifiers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl std::fmt::Debug for LayerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerRegistry")
            .field("layers", &self.layers)
            .field("dedicated_worker", &self.worker.is_some())
            .finish()
    }
}

fn debounce(millis: u64) -> Option<Duration> {
    (millis > 0).then(|| Duration::from_millis(millis))
}

fn build_layers(config: &LayersConfig) -> Vec<Arc<dyn Layer>> {
    type Builder<'a> = Box<dyn FnOnce() -> Result<Arc<dyn Layer>> + 'a>;

    let candidates: [(&str, bool, Builder<'_>); 5] = [
        (
            "registry_volatile",
            config.registry_volatile.enabled,
            Box::new(|| registry_layer(config, HiveKind::Volatile)),
        ),
        (
            "context_broker",
            config.context_broker.enabled,
            Box::new(|| context_layer(config)),
        ),
        (
            "config_store",
            config.config_store.enabled,
            Box::new(|| config_store_layer(config)),
        ),
        (
            "registry_nonvolatile",
            config.registry_nonvolatile.enabled,
            Box::new(|| registry_layer(config, HiveKind::NonVolatile)),
        ),
        (
            "document_store",
            config.document_store.enabled,
            Box::new(|| document_layer(config)),
        ),
    ];

    let mut layers = Vec::new();
    for (name, enabled, build) in candidates {
        if !enabled {
            info!(layer = name, "Layer disabled by configuration");
            continue;
        }
        match build() {
            Ok(layer) => layers.push(layer),
            Err(e) => warn!(layer = name, "Skipping layer: {e}"),
        }
    }
    layers
}

fn config_store_layer(config: &LayersConfig) -> Result<Arc<dyn Layer>> {
    let settings = &config.config_store;
    let file = match &settings.file {
        Some(file) => file.clone(),
        None => ConfigPaths::config_store()
            .map_err(|e| ValueSpaceError::layer_init("config_store", e))?,
    };

    let layer = ConfigStoreLayer::open(ConfigStoreSettings {
        file,
        order: settings.order.unwrap_or(ConfigStoreSettings::DEFAULT_ORDER),
        watch_debounce: debounce(settings.watch_debounce_ms),
    })
    .map_err(|e| ValueSpaceError::layer_init("config_store", e))?;
    Ok(Arc::new(layer))
}

fn registry_layer(config: &LayersConfig, kind: HiveKind) -> Result<Arc<dyn Layer>> {
    let (settings, name) = match kind {
        HiveKind::Volatile => (&config.registry_volatile, "registry_volatile"),
        HiveKind::NonVolatile => (&config.registry_nonvolatile, "registry_nonvolatile"),
    };
    let file = match (&settings.file, kind) {
        (Some(file), _) => file.clone(),
        (None, HiveKind::Volatile) => ConfigPaths::volatile_hive(),
        (None, HiveKind::NonVolatile) => {
            ConfigPaths::nonvolatile_hive().map_err(|e| ValueSpaceError::layer_init(name, e))?
        }
    };

    let layer = RegistryLayer::open(RegistrySettings {
        kind,
        file,
        order: settings.order.unwrap_or(kind.default_order()),
        watch_debounce: debounce(settings.watch_debounce_ms),
    })
    .map_err(|e| ValueSpaceError::layer_init(name, e))?;
    Ok(Arc::new(layer))
}

fn context_layer(config: &LayersConfig) -> Result<Arc<dyn Layer>> {
    let settings = &config.context_broker;
    let order = settings.order.unwrap_or(context::DEFAULT_ORDER);

    let layer = match settings.backend {
        BrokerBackend::SessionBus => {
            ContextBrokerLayer::session(order, Duration::from_millis(settings.call_timeout_ms))
        }
        BrokerBackend::Local => ContextBrokerLayer::new(Arc::new(LocalBroker::new()), order),
    }
    .map_err(|e| ValueSpaceError::layer_init("context_broker", e))?;
    Ok(Arc::new(layer))
}

fn document_layer(config: &LayersConfig) -> Result<Arc<dyn Layer>> {
    let settings = &config.document_store;
    let file = match &settings.file {
        Some(file) => file.clone(),
        None => {
            ConfigPaths::documents().map_err(|e| ValueSpaceError::layer_init("document_store", e))?
        }
    };

    let layer = DocumentLayer::open_file(
        file,
        DocumentSettings {
            document_type: settings.document_type.clone(),
            order: settings.order.unwrap_or(DocumentSettings::DEFAULT_ORDER),
            allow_create: settings.allow_create,
        },
    )
    .map_err(|e| ValueSpaceError::layer_init("document_store", e))?;
    Ok(Arc::new(layer))
}
