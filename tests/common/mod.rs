//! In-memory layer that counts native resource creation and teardown.

#![allow(dead_code, clippy::unwrap_used)]

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use tokio::sync::broadcast;
use valuespace::{
    Path, Value,
    layer::{Handle, HandleTable, Layer, LayerEvent, LayerId, LayerOptions, WriterId},
};

#[derive(Default)]
struct State {
    handles: HandleTable<()>,
    values: BTreeMap<Path, (Value, WriterId)>,
}

/// A layer holding values in a map, with counters for handle resources.
pub struct FakeLayer {
    id: LayerId,
    name: String,
    order: u32,
    options: LayerOptions,
    state: Mutex<State>,
    events: broadcast::Sender<LayerEvent>,
    created: AtomicUsize,
    freed: AtomicUsize,
    syncs: AtomicUsize,
}

impl FakeLayer {
    pub fn new(name: &str, order: u32, options: LayerOptions) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            id: LayerId::random(),
            name: name.to_string(),
            order,
            options,
            state: Mutex::new(State::default()),
            events,
            created: AtomicUsize::new(0),
            freed: AtomicUsize::new(0),
            syncs: AtomicUsize::new(0),
        })
    }

    pub fn permanent(name: &str, order: u32) -> Arc<Self> {
        Self::new(name, order, LayerOptions::PERMANENT | LayerOptions::WRITABLE)
    }

    pub fn transient(name: &str, order: u32) -> Arc<Self> {
        Self::new(name, order, LayerOptions::TRANSIENT | LayerOptions::WRITABLE)
    }

    /// Stores `value` at the absolute `path` as if another process wrote it.
    pub fn seed(&self, path: &str, value: impl Into<Value>) {
        self.state.lock().unwrap().values.insert(
            Path::new(path),
            (value.into(), WriterId::named("seed")),
        );
    }

    /// Value at the absolute `path`, bypassing handles.
    pub fn stored(&self, path: &str) -> Option<Value> {
        let state = self.state.lock().unwrap();
        state.values.get(&Path::new(path)).map(|(value, _)| value.clone())
    }

    /// Native resources created so far.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Native resources freed so far.
    pub fn freed(&self) -> usize {
        self.freed.load(Ordering::SeqCst)
    }

    /// Number of `sync` calls.
    pub fn syncs(&self) -> usize {
        self.syncs.load(Ordering::SeqCst)
    }

    /// Number of open handles.
    pub fn open_handles(&self) -> usize {
        self.state.lock().unwrap().handles.len()
    }

    fn resolve(state: &State, handle: Handle, sub_path: &Path) -> Option<Path> {
        state.handles.path(handle).map(|base| base.join(sub_path))
    }

    fn notify(&self, state: &State, changed: &Path) {
        for handle in state.handles.affected_by(std::slice::from_ref(changed), false) {
            let _ = self.events.send(LayerEvent::Changed(handle));
        }
    }

    fn remove_under(&self, writer: &WriterId, base: &Path) -> bool {
        let mut state = self.state.lock().unwrap();
        let owned_only = self.options.contains(LayerOptions::TRANSIENT);
        let before = state.values.len();
        state.values.retain(|path, (_, owner)| {
            !(base.includes(path) && (!owned_only || *owner == *writer))
        });
        let removed = state.values.len() != before;
        if removed {
            self.notify(&state, base);
        }
        removed
    }
}

impl Layer for FakeLayer {
    fn id(&self) -> LayerId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn order(&self) -> u32 {
        self.order
    }

    fn options(&self) -> LayerOptions {
        self.options
    }

    fn open(&self, parent: Option<Handle>, path: &Path) -> Option<Handle> {
        let mut state = self.state.lock().unwrap();
        let absolute = match parent {
            Some(parent) => state.handles.path(parent)?.join(path),
            None => path.clone(),
        };
        state.handles.acquire(absolute, |_| {
            self.created.fetch_add(1, Ordering::SeqCst);
            Some(())
        })
    }

    fn release(&self, handle: Handle) {
        if self.state.lock().unwrap().handles.release(handle).is_some() {
            self.freed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn read_value(&self, handle: Handle, sub_path: &Path) -> Option<Value> {
        let state = self.state.lock().unwrap();
        let path = Self::resolve(&state, handle, sub_path)?;
        state.values.get(&path).map(|(value, _)| value.clone())
    }

    fn children(&self, handle: Handle) -> BTreeSet<String> {
        let state = self.state.lock().unwrap();
        let Some(base) = state.handles.path(handle).cloned() else {
            return BTreeSet::new();
        };
        state
            .values
            .keys()
            .filter_map(|path| path.strip_prefix(&base))
            .filter_map(|relative| relative.segments().first().cloned())
            .collect()
    }

    fn write_value(&self, writer: &WriterId, handle: Handle, sub_path: &Path, value: Value) -> bool {
        let mut state = self.state.lock().unwrap();
        let Some(path) = Self::resolve(&state, handle, sub_path) else {
            return false;
        };
        state.values.insert(path.clone(), (value, writer.clone()));
        self.notify(&state, &path);
        true
    }

    fn remove_value(&self, writer: &WriterId, handle: Handle, sub_path: &Path) -> bool {
        let path = {
            let state = self.state.lock().unwrap();
            Self::resolve(&state, handle, sub_path)
        };
        path.is_some_and(|path| self.remove_under(writer, &path))
    }

    fn remove_subtree(&self, writer: &WriterId, handle: Handle) -> bool {
        let path = self.state.lock().unwrap().handles.path(handle).cloned();
        path.is_some_and(|path| self.remove_under(writer, &path))
    }

    fn sync(&self) {
        self.syncs.fetch_add(1, Ordering::SeqCst);
    }

    fn events(&self) -> broadcast::Receiver<LayerEvent> {
        self.events.subscribe()
    }
}
