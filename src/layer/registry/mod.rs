//! Registry hive layers.
//!
//! A hive is a tree of keys holding named values, persisted as JSON. The
//! volatile hive lives in the session runtime directory and records the
//! owning writer of every value, so each publisher cleans up only what it
//! wrote. The non-volatile hive lives in the data directory and deletes
//! unconditionally.
//!
//! Change watching is explicit and per handle: `set_interest(true)` arms a
//! watch descriptor on the handle's key. When that key does not exist yet,
//! the descriptor is armed on the nearest existing ancestor instead (a
//! proxy watch) and moved down once the key appears.

mod hive;

use std::{
    collections::BTreeSet,
    path::{Path as FsPath, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

pub use hive::HiveError;
use hive::Key;

use super::{
    EVENT_CAPACITY, Handle, HandleTable, Layer, LayerEvent, LayerId, LayerOptions,
    REGISTRY_NONVOLATILE_LAYER, REGISTRY_VOLATILE_LAYER, WriterId,
};
use crate::{
    Path, PathEncoding, Value,
    watch::{FileLock, ReloadTask},
};

/// Longest wait for another process to finish writing the same hive.
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Which hive a [`RegistryLayer`] is backed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HiveKind {
    /// Values are owned by their writer and vanish with it.
    Volatile,
    /// Values persist across sessions.
    NonVolatile,
}

impl HiveKind {
    fn id(self) -> LayerId {
        match self {
            HiveKind::Volatile => REGISTRY_VOLATILE_LAYER,
            HiveKind::NonVolatile => REGISTRY_NONVOLATILE_LAYER,
        }
    }

    fn name(self) -> &'static str {
        match self {
            HiveKind::Volatile => "Volatile Registry Layer",
            HiveKind::NonVolatile => "Non-Volatile Registry Layer",
        }
    }

    fn options(self) -> LayerOptions {
        match self {
            HiveKind::Volatile => LayerOptions::TRANSIENT | LayerOptions::WRITABLE,
            HiveKind::NonVolatile => LayerOptions::PERMANENT | LayerOptions::WRITABLE,
        }
    }

    /// Default priority rank.
    pub fn default_order(self) -> u32 {
        match self {
            HiveKind::Volatile => 100,
            HiveKind::NonVolatile => 400,
        }
    }
}

/// Settings for a [`RegistryLayer`].
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    /// Volatile or non-volatile hive.
    pub kind: HiveKind,
    /// Backing JSON file.
    pub file: PathBuf,
    /// Priority rank.
    pub order: u32,
    /// Quiet period before external edits are reloaded; `None` disables
    /// watching the file.
    pub watch_debounce: Option<Duration>,
}

impl RegistrySettings {
    /// Settings for a hive at `file` with the default order for `kind`.
    pub fn new(kind: HiveKind, file: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            file: file.into(),
            order: kind.default_order(),
            watch_debounce: Some(Duration::from_millis(100)),
        }
    }
}

/// An armed change watch on one key.
#[derive(Debug, Clone, PartialEq)]
struct WatchDescriptor {
    armed_at: Path,
}

impl WatchDescriptor {
    fn arm(hive: &Key, target: &Path) -> Self {
        let depth = hive.nearest_existing(target.segments());
        let armed_at = Path::from_segments(
            PathEncoding::Slash,
            target.segments()[..depth].iter().cloned(),
        )
        .unwrap_or_default();

        Self { armed_at }
    }

    fn is_proxy(&self, target: &Path) -> bool {
        &self.armed_at != target
    }

    fn fires_on(&self, changed: &[Path]) -> bool {
        changed.iter().any(|path| path.overlaps(&self.armed_at))
    }
}

struct RegistryState {
    handles: HandleTable<Option<WatchDescriptor>>,
    hive: Key,
}

struct RegistryShared {
    kind: HiveKind,
    file: PathBuf,
    state: Mutex<RegistryState>,
    events: broadcast::Sender<LayerEvent>,
}

impl RegistryShared {
    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Re-reads the hive file and fires the watches the difference touches.
    fn reload(&self) {
        let mut state = self.lock();
        self.refresh(&mut state);
    }

    fn refresh(&self, state: &mut RegistryState) {
        match hive::load(&self.file) {
            Ok(next) => self.replace(state, next),
            Err(e) => warn!(hive = ?self.kind, "Failed to reload hive: {e}"),
        }
    }

    fn replace(&self, state: &mut RegistryState, next: Key) {
        let changed = hive::changed_paths(&state.hive, &next);
        state.hive = next;
        if !changed.is_empty() {
            debug!(hive = ?self.kind, changes = changed.len(), "Hive changed");
            self.fire_watches(state, &changed);
        }
    }

    /// Applies `op` to the freshest hive on disk and writes it back, holding
    /// the hive lock across load and save.
    fn mutate(&self, op: impl FnOnce(&mut Key) -> bool) -> bool {
        let mut state = self.lock();
        let _lock = match FileLock::acquire(&self.file, LOCK_TIMEOUT) {
            Ok(lock) => lock,
            Err(e) => {
                warn!(hive = ?self.kind, "Failed to lock hive: {e}");
                return false;
            }
        };
        self.refresh(&mut state);

        let mut next = state.hive.clone();
        if !op(&mut next) {
            return false;
        }

        if let Err(e) = hive::save(&self.file, &next) {
            warn!(hive = ?self.kind, "Failed to write hive: {e}");
            return false;
        }

        self.replace(&mut state, next);
        true
    }

    fn fire_watches(&self, state: &mut RegistryState, changed: &[Path]) {
        let RegistryState { handles, hive } = state;

        for (handle, entry) in handles.iter_mut() {
            let target = entry.path().clone();
            let Some(watch) = entry.native.as_mut() else {
                continue;
            };
            if !watch.fires_on(changed) {
                continue;
            }

            let rearmed = WatchDescriptor::arm(hive, &target);
            if rearmed != *watch {
                debug!(
                    key = %target,
                    from = %watch.armed_at,
                    to = %rearmed.armed_at,
                    "Re-armed registry watch"
                );
                *watch = rearmed;
            }

            if changed.iter().any(|path| path.overlaps(&target)) {
                let _ = self.events.send(LayerEvent::Changed(handle));
            }
        }
    }
}

/// Layer backed by a JSON registry hive.
pub struct RegistryLayer {
    shared: Arc<RegistryShared>,
    order: u32,
    _reload: Option<ReloadTask>,
}

impl RegistryLayer {
    /// Opens the hive described by `settings`.
    ///
    /// # Errors
    /// Returns `HiveError` if an existing hive file cannot be read or the
    /// file watcher cannot be started.
    #[instrument(skip(settings), fields(hive = ?settings.kind, file = %settings.file.display()))]
    pub fn open(settings: RegistrySettings) -> Result<Self, HiveError> {
        let hive = hive::load(&settings.file)?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let shared = Arc::new(RegistryShared {
            kind: settings.kind,
            file: settings.file.clone(),
            state: Mutex::new(RegistryState {
                handles: HandleTable::new(),
                hive,
            }),
            events,
        });

        let reload = match settings.watch_debounce {
            Some(debounce) => {
                let io_error = |details: String| HiveError::Io {
                    path: settings.file.clone(),
                    details,
                };
                if let Some(parent) = settings.file.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| io_error(e.to_string()))?;
                }

                let watched = Arc::clone(&shared);
                let task = ReloadTask::spawn(
                    "registry",
                    vec![settings.file.clone()],
                    debounce,
                    move || watched.reload(),
                )
                .map_err(|e| io_error(e.to_string()))?;
                Some(task)
            }
            None => None,
        };

        info!("Registry layer ready");

        Ok(Self {
            shared,
            order: settings.order,
            _reload: reload,
        })
    }

    /// Which hive this layer serves.
    pub fn kind(&self) -> HiveKind {
        self.shared.kind
    }

    /// Path of the hive file.
    pub fn file(&self) -> &FsPath {
        &self.shared.file
    }

    /// Re-reads the hive file immediately.
    pub fn reload(&self) {
        self.shared.reload();
    }

    fn owner<'a>(&self, writer: &'a WriterId) -> Option<&'a str> {
        match self.shared.kind {
            HiveKind::Volatile => Some(writer.as_str()),
            HiveKind::NonVolatile => None,
        }
    }

    fn resolve(&self, handle: Handle, sub_path: &Path) -> Option<Path> {
        self.shared
            .lock()
            .handles
            .path(handle)
            .map(|base| base.join(sub_path))
    }

    #[cfg(test)]
    fn armed_at(&self, handle: Handle) -> Option<Path> {
        let state = self.shared.lock();
        state
            .handles
            .get(handle)?
            .native
            .as_ref()
            .map(|watch| watch.armed_at.clone())
    }
}

impl Layer for RegistryLayer {
    fn id(&self) -> LayerId {
        self.shared.kind.id()
    }

    fn name(&self) -> &str {
        self.shared.kind.name()
    }

    fn order(&self) -> u32 {
        self.order
    }

    fn options(&self) -> LayerOptions {
        self.shared.kind.options()
    }

    fn open(&self, parent: Option<Handle>, path: &Path) -> Option<Handle> {
        let mut state = self.shared.lock();
        let absolute = match parent {
            Some(parent) => state.handles.path(parent)?.join(path),
            None => path.clone(),
        };

        state.handles.acquire(absolute, |_| Some(None))
    }

    fn release(&self, handle: Handle) {
        let mut state = self.shared.lock();
        let Some(entry) = state.handles.release(handle) else {
            return;
        };
        if let Some(watch) = &entry.native {
            debug!(key = %entry.path(), armed_at = %watch.armed_at, "Disarmed registry watch");
        }
    }

    fn read_value(&self, handle: Handle, sub_path: &Path) -> Option<Value> {
        let state = self.shared.lock();
        let path = state.handles.path(handle)?.join(sub_path);
        state.hive.value(path.segments()).cloned()
    }

    fn children(&self, handle: Handle) -> BTreeSet<String> {
        let state = self.shared.lock();
        match state.handles.path(handle) {
            Some(path) => state.hive.children(path.segments()),
            None => BTreeSet::new(),
        }
    }

    fn write_value(&self, writer: &WriterId, handle: Handle, sub_path: &Path, value: Value) -> bool {
        let Some(path) = self.resolve(handle, sub_path) else {
            return false;
        };
        if path.is_root() {
            warn!("Registry values need a name");
            return false;
        }

        let owner = self.owner(writer);
        self.shared.mutate(|hive| {
            hive.set(path.segments(), value, owner);
            true
        })
    }

    fn remove_value(&self, writer: &WriterId, handle: Handle, sub_path: &Path) -> bool {
        let Some(path) = self.resolve(handle, sub_path) else {
            return false;
        };

        let owner = self.owner(writer);
        self.shared
            .mutate(|hive| hive.remove(path.segments(), owner))
    }

    fn remove_subtree(&self, writer: &WriterId, handle: Handle) -> bool {
        self.remove_value(writer, handle, &Path::default())
    }

    fn supports_interest_notification(&self) -> bool {
        true
    }

    fn set_interest(&self, handle: Handle, enabled: bool) -> bool {
        let mut state = self.shared.lock();
        let RegistryState { handles, hive } = &mut *state;
        let Some(entry) = handles.get_mut(handle) else {
            return false;
        };

        if enabled {
            if entry.add_interest() {
                let watch = WatchDescriptor::arm(hive, entry.path());
                debug!(
                    key = %entry.path(),
                    armed_at = %watch.armed_at,
                    proxy = watch.is_proxy(entry.path()),
                    "Armed registry watch"
                );
                entry.native = Some(watch);
            }
        } else if entry.remove_interest() {
            entry.native = None;
            debug!(key = %entry.path(), "Disarmed registry watch");
        }

        true
    }

    fn sync(&self) {
        self.shared.reload();
    }

    fn events(&self) -> broadcast::Receiver<LayerEvent> {
        self.shared.events.subscribe()
    }
}
