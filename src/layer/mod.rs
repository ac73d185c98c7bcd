//! Backend layers and the capability contract they share.
//!
//! Every storage substrate (TOML configuration store, registry hive, context
//! broker, document service) implements [`Layer`]. Layers never call each
//! other; the [`LayerRegistry`](crate::registry::LayerRegistry) orders them
//! and the [`Publisher`](crate::Publisher) and
//! [`Subscriber`](crate::Subscriber) facades dispatch through opaque
//! [`Handle`]s.

/// Session-bus context broker layer.
pub mod context;
/// JSON document service layer.
pub mod document;
/// Generation-checked handle arena shared by adapters.
pub mod handles;
mod ids;
/// Registry hive layers (volatile and non-volatile).
pub mod registry;
/// TOML configuration store layer.
pub mod store;

use std::{collections::BTreeSet, fmt, process};

use bitflags::bitflags;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{Path, Value};

pub use handles::{Handle, HandleEntry, HandleTable};
pub use ids::{
    CONFIG_STORE_LAYER, CONTEXT_BROKER_LAYER, DOCUMENT_STORE_LAYER, REGISTRY_NONVOLATILE_LAYER,
    REGISTRY_VOLATILE_LAYER,
};

/// Capacity of each layer's event channel.
pub const EVENT_CAPACITY: usize = 256;

bitflags! {
    /// Capability bits of a layer, also used as a selection filter.
    ///
    /// `PERMANENT`/`TRANSIENT` and `WRITABLE`/`READ_ONLY` are two mutually
    /// exclusive axes. A filter that sets both bits of one axis matches no
    /// layer; an empty filter matches every layer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LayerOptions: u32 {
        /// Values outlive the writing process.
        const PERMANENT = 1;
        /// Values are owned by the writer and cleaned up with it.
        const TRANSIENT = 1 << 1;
        /// Publishers may write.
        const WRITABLE = 1 << 2;
        /// Publishers may not write.
        const READ_ONLY = 1 << 3;
    }
}

impl LayerOptions {
    /// Whether no axis has both of its bits set.
    pub fn is_consistent(self) -> bool {
        !self.contains(Self::PERMANENT | Self::TRANSIENT)
            && !self.contains(Self::WRITABLE | Self::READ_ONLY)
    }

    /// Whether a layer with these options satisfies `filter`.
    pub fn satisfies(self, filter: LayerOptions) -> bool {
        filter.is_consistent() && self.contains(filter)
    }
}

/// Stable identity of a layer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(Uuid);

impl LayerId {
    /// Builds an identity from a raw 128-bit value.
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    /// Wraps an existing UUID.
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// A fresh random identity, for ad hoc layers.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.0)
    }
}

impl fmt::Debug for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LayerId({})", self.0)
    }
}

/// Identity a write is attributed to.
///
/// Transient layers record it per key so that a publisher only ever removes
/// what it wrote itself.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct WriterId(String);

impl WriterId {
    /// A unique writer identity for this process.
    pub fn new() -> Self {
        Self(format!("{}:{}", process::id(), Uuid::new_v4()))
    }

    /// A writer identity with a caller-chosen name.
    pub fn named(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The identity as text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for WriterId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WriterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WriterId({})", self.0)
    }
}

/// Notification emitted by a layer.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerEvent {
    /// The value at the handle, or below it, changed.
    Changed(Handle),
    /// Readers started or stopped listening to an attribute under a handle
    /// that a publisher is watching.
    Interest {
        /// The watched publisher handle
        handle: Handle,
        /// Attribute relative to the handle's path
        attribute: Path,
        /// Whether anyone is listening now
        interested: bool,
    },
}

/// The capability contract every backend layer implements.
///
/// Paths handed to a layer are `/`-encoded and relative to the parent
/// handle (or absolute when the parent is `None`). Failures inside a layer
/// are logged and reported as "not found" or `false`; they never panic and
/// never surface as errors to the facades.
pub trait Layer: Send + Sync {
    /// Stable identity.
    fn id(&self) -> LayerId;

    /// Human readable name.
    fn name(&self) -> &str;

    /// Priority rank; lower wins on read conflicts.
    fn order(&self) -> u32;

    /// Capability bits.
    fn options(&self) -> LayerOptions;

    /// Resolves `path` under `parent` (or the root) to a handle.
    ///
    /// Opening an already-open path bumps its reference count. Returns
    /// `None` when the path is not expressible in this layer.
    fn open(&self, parent: Option<Handle>, path: &Path) -> Option<Handle>;

    /// Drops one reference; the native resource goes away at zero.
    fn release(&self, handle: Handle);

    /// Value stored at `handle` + `sub_path`.
    fn read_value(&self, handle: Handle, sub_path: &Path) -> Option<Value>;

    /// Names of the immediate children of `handle`.
    fn children(&self, handle: Handle) -> BTreeSet<String>;

    /// Stores `value` at `handle` + `sub_path` on behalf of `writer`.
    fn write_value(&self, writer: &WriterId, handle: Handle, sub_path: &Path, value: Value)
    -> bool;

    /// Removes the value (and subtree) at `handle` + `sub_path`.
    fn remove_value(&self, writer: &WriterId, handle: Handle, sub_path: &Path) -> bool;

    /// Removes everything at and below `handle`.
    fn remove_subtree(&self, writer: &WriterId, handle: Handle) -> bool;

    /// Whether change watching must be switched on per handle.
    fn supports_interest_notification(&self) -> bool {
        false
    }

    /// Arms or disarms change watching for `handle`.
    fn set_interest(&self, _handle: Handle, _enabled: bool) -> bool {
        true
    }

    /// Starts reporting reader interest below `handle` to its publisher.
    fn add_watch(&self, _handle: Handle) -> bool {
        false
    }

    /// Stops reporting reader interest below `handle`.
    fn remove_watches(&self, _handle: Handle) {}

    /// Flushes buffered writes and blocks until they are visible.
    fn sync(&self);

    /// Subscribes to this layer's events.
    fn events(&self) -> broadcast::Receiver<LayerEvent>;
}

impl fmt::Debug for dyn Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Layer")
            .field("name", &self.name())
            .field("id", &self.id())
            .field("order", &self.order())
            .field("options", &self.options())
            .finish()
    }
}

/// Sends `Changed` for every handle that overlaps one of `changed`.
///
/// When `interested_only` is set, handles without armed interest are
/// skipped.
pub(crate) fn emit_changes<T>(
    table: &HandleTable<T>,
    events: &broadcast::Sender<LayerEvent>,
    changed: &[Path],
    interested_only: bool,
) {
    for handle in table.affected_by(changed, interested_only) {
        let _ = events.send(LayerEvent::Changed(handle));
    }
}
