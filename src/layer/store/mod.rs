//! TOML configuration store layer.
//!
//! The whole store is one TOML document on disk. Nested tables are
//! directories and leaves are values, so `/Device/Network/Up` lives at
//! `[Device.Network] Up = ...`. Writes are applied to an in-memory copy at
//! once and queued as pending operations; [`Layer::sync`] flushes them with
//! an atomic rename. External edits are picked up by a file watcher, the
//! pending queue is replayed on top of the new content, and the difference
//! is reported as `Changed` events.

mod diff;
mod path_ops;

use std::{
    collections::BTreeSet,
    fs, io,
    path::{Path as FsPath, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use tokio::sync::broadcast;
use toml::{Value as TomlValue, map::Map};
use tracing::{debug, info, instrument, warn};

use super::{
    CONFIG_STORE_LAYER, EVENT_CAPACITY, Handle, HandleTable, Layer, LayerEvent, LayerId,
    LayerOptions, WriterId, emit_changes,
};
use crate::{
    Path, Value,
    watch::{FileLock, ReloadTask, write_atomically},
};

/// Longest wait for another process to finish flushing the same file.
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from the configuration store substrate.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The path cannot be stored in the document
    #[error("invalid store path: {0}")]
    InvalidPath(String),

    /// Reading or writing the store file failed
    #[error("I/O error on '{path}': {details}")]
    Io {
        /// Path of the store file
        path: PathBuf,
        /// I/O error details
        details: String,
    },

    /// The store file is not valid TOML
    #[error("failed to parse '{path}': {details}")]
    Parse {
        /// Path of the store file
        path: PathBuf,
        /// Parse error details
        details: String,
    },

    /// Serializing the document failed
    #[error("failed to serialize store: {0}")]
    Serialize(String),
}

/// Settings for a [`ConfigStoreLayer`].
#[derive(Debug, Clone)]
pub struct ConfigStoreSettings {
    /// Backing TOML file.
    pub file: PathBuf,
    /// Priority rank.
    pub order: u32,
    /// Quiet period before an external edit is reloaded; `None` disables
    /// watching.
    pub watch_debounce: Option<Duration>,
}

impl ConfigStoreSettings {
    /// Default priority rank of the configuration store.
    pub const DEFAULT_ORDER: u32 = 300;

    /// Settings for `file` with default order and a 200 ms debounce.
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            order: Self::DEFAULT_ORDER,
            watch_debounce: Some(Duration::from_millis(200)),
        }
    }
}

enum PendingWrite {
    Set(Vec<String>, TomlValue),
    Remove(Vec<String>),
}

impl PendingWrite {
    fn apply(&self, document: &mut TomlValue) {
        match self {
            PendingWrite::Set(segments, value) => {
                if let Err(e) = path_ops::set_value_at_path(document, segments, value.clone()) {
                    debug!("Dropping pending write that no longer applies: {e}");
                }
            }
            PendingWrite::Remove(segments) => {
                path_ops::remove_value_at_path(document, segments);
            }
        }
    }
}

struct StoreState {
    handles: HandleTable<()>,
    current: TomlValue,
    pending: Vec<PendingWrite>,
}

struct StoreShared {
    file: PathBuf,
    state: Mutex<StoreState>,
    events: broadcast::Sender<LayerEvent>,
}

impl StoreShared {
    fn lock(&self) -> MutexGuard<'_, StoreState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Re-reads the file, replays unflushed writes and reports what changed.
    fn reload(&self) {
        let base = match read_document(&self.file) {
            Ok(base) => base,
            Err(e) => {
                warn!("Failed to reload config store: {e}");
                return;
            }
        };

        let mut state = self.lock();
        let mut next = base;
        for write in &state.pending {
            write.apply(&mut next);
        }

        let changed = diff::changed_paths(&state.current, &next);
        if changed.is_empty() {
            return;
        }

        info!(changes = changed.len(), "Config store changed on disk");
        state.current = next;
        emit_changes(&state.handles, &self.events, &changed, false);
    }
}

/// Permanent, writable layer backed by a TOML file.
pub struct ConfigStoreLayer {
    shared: Arc<StoreShared>,
    order: u32,
    _reload: Option<ReloadTask>,
}

impl ConfigStoreLayer {
    /// Opens (or starts) the store at `settings.file`.
    ///
    /// A missing file is an empty store; the file is created on the first
    /// flush.
    ///
    /// # Errors
    /// Returns `StoreError` if the file exists but cannot be read or parsed,
    /// or the watcher cannot be started.
    #[instrument(skip(settings), fields(file = %settings.file.display()))]
    pub fn open(settings: ConfigStoreSettings) -> Result<Self, StoreError> {
        let current = read_document(&settings.file)?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let shared = Arc::new(StoreShared {
            file: settings.file.clone(),
            state: Mutex::new(StoreState {
                handles: HandleTable::new(),
                current,
                pending: Vec::new(),
            }),
            events,
        });

        let reload = match settings.watch_debounce {
            Some(debounce) => {
                ensure_parent(&settings.file)?;
                let watched = Arc::clone(&shared);
                let task = ReloadTask::spawn(
                    "config-store",
                    vec![settings.file.clone()],
                    debounce,
                    move || watched.reload(),
                )
                .map_err(|e| StoreError::Io {
                    path: settings.file.clone(),
                    details: e.to_string(),
                })?;
                Some(task)
            }
            None => None,
        };

        info!("Config store layer ready");

        Ok(Self {
            shared,
            order: settings.order,
            _reload: reload,
        })
    }

    /// Path of the backing file.
    pub fn file(&self) -> &FsPath {
        &self.shared.file
    }

    /// Re-reads the backing file immediately.
    pub fn reload(&self) {
        self.shared.reload();
    }

    fn resolve(&self, state: &StoreState, handle: Handle, sub_path: &Path) -> Option<Path> {
        state.handles.path(handle).map(|base| base.join(sub_path))
    }

    /// Rewrites the file as its current on-disk content plus the pending
    /// writes, under the cross-process store lock.
    fn flush(&self) -> Result<(), StoreError> {
        let mut state = self.shared.lock();
        if state.pending.is_empty() {
            return Ok(());
        }

        let io_error = |e: io::Error| StoreError::Io {
            path: self.shared.file.clone(),
            details: e.to_string(),
        };
        let _lock = FileLock::acquire(&self.shared.file, LOCK_TIMEOUT).map_err(io_error)?;

        let mut next = read_document(&self.shared.file)?;
        for write in &state.pending {
            write.apply(&mut next);
        }

        let contents =
            toml::to_string_pretty(&next).map_err(|e| StoreError::Serialize(e.to_string()))?;
        write_atomically(&self.shared.file, contents.as_bytes()).map_err(io_error)?;

        debug!(writes = state.pending.len(), "Flushed config store");
        state.pending.clear();

        let changed = diff::changed_paths(&state.current, &next);
        state.current = next;
        if !changed.is_empty() {
            debug!(changes = changed.len(), "Merged concurrent edits while flushing");
            emit_changes(&state.handles, &self.shared.events, &changed, false);
        }

        Ok(())
    }
}

impl Layer for ConfigStoreLayer {
    fn id(&self) -> LayerId {
        CONFIG_STORE_LAYER
    }

    fn name(&self) -> &str {
        "Config Store Layer"
    }

    fn order(&self) -> u32 {
        self.order
    }

    fn options(&self) -> LayerOptions {
        LayerOptions::PERMANENT | LayerOptions::WRITABLE
    }

    fn open(&self, parent: Option<Handle>, path: &Path) -> Option<Handle> {
        let mut state = self.shared.lock();
        let absolute = match parent {
            Some(parent) => state.handles.path(parent)?.join(path),
            None => path.clone(),
        };

        state.handles.acquire(absolute, |_| Some(()))
    }

    fn release(&self, handle: Handle) {
        self.shared.lock().handles.release(handle);
    }

    fn read_value(&self, handle: Handle, sub_path: &Path) -> Option<Value> {
        let state = self.shared.lock();
        let path = self.resolve(&state, handle, sub_path)?;

        path_ops::navigate(&state.current, path.segments()).and_then(Value::from_toml)
    }

    fn children(&self, handle: Handle) -> BTreeSet<String> {
        let state = self.shared.lock();
        let Some(path) = state.handles.path(handle) else {
            return BTreeSet::new();
        };

        match path_ops::navigate(&state.current, path.segments()) {
            Some(TomlValue::Table(table)) => table.keys().cloned().collect(),
            _ => BTreeSet::new(),
        }
    }

    fn write_value(
        &self,
        _writer: &WriterId,
        handle: Handle,
        sub_path: &Path,
        value: Value,
    ) -> bool {
        let mut state = self.shared.lock();
        let Some(path) = self.resolve(&state, handle, sub_path) else {
            return false;
        };

        if path.is_root() {
            warn!("Refusing to replace the config store root with a value");
            return false;
        }

        let new_value = value.to_toml();
        let unchanged = path_ops::navigate(&state.current, path.segments()) == Some(&new_value);

        if let Err(e) =
            path_ops::set_value_at_path(&mut state.current, path.segments(), new_value.clone())
        {
            warn!(path = %path, "Config store write rejected: {e}");
            return false;
        }

        // Queued even when unchanged here: the file may differ by now.
        state
            .pending
            .push(PendingWrite::Set(path.segments().to_vec(), new_value));
        if !unchanged {
            emit_changes(&state.handles, &self.shared.events, &[path], false);
        }
        true
    }

    fn remove_value(&self, _writer: &WriterId, handle: Handle, sub_path: &Path) -> bool {
        let mut state = self.shared.lock();
        let Some(path) = self.resolve(&state, handle, sub_path) else {
            return false;
        };

        if !path_ops::remove_value_at_path(&mut state.current, path.segments()) {
            return false;
        }

        state
            .pending
            .push(PendingWrite::Remove(path.segments().to_vec()));
        emit_changes(&state.handles, &self.shared.events, &[path], false);
        true
    }

    fn remove_subtree(&self, writer: &WriterId, handle: Handle) -> bool {
        self.remove_value(writer, handle, &Path::default())
    }

    fn sync(&self) {
        if let Err(e) = self.flush() {
            warn!("Failed to flush config store: {e}");
        }
    }

    fn events(&self) -> broadcast::Receiver<LayerEvent> {
        self.shared.events.subscribe()
    }
}

impl Drop for ConfigStoreLayer {
    fn drop(&mut self) {
        self.sync();
    }
}

fn read_document(file: &FsPath) -> Result<TomlValue, StoreError> {
    let text = match fs::read_to_string(file) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Ok(TomlValue::Table(Map::new()));
        }
        Err(e) => {
            return Err(StoreError::Io {
                path: file.to_path_buf(),
                details: e.to_string(),
            });
        }
    };

    toml::from_str::<TomlValue>(&text).map_err(|e| StoreError::Parse {
        path: file.to_path_buf(),
        details: e.to_string(),
    })
}

fn ensure_parent(file: &FsPath) -> Result<(), StoreError> {
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent).map_err(|e| StoreError::Io {
            path: parent.to_path_buf(),
            details: e.to_string(),
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests;
