use std::{collections::HashMap, fmt};

use crate::Path;

/// Opaque token for an open path in one layer.
///
/// Contains both a slot index and a generation counter so that stale handles
/// are detected after the path is released and the slot reused.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle {
    idx: u32,
    generation: u32,
}

impl Handle {
    /// Returns the raw slot index (for diagnostics only).
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.idx
    }

    /// Returns the generation counter.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}@gen{})", self.idx, self.generation)
    }
}

/// Book-keeping for one open path.
#[derive(Debug)]
pub struct HandleEntry<T> {
    path: Path,
    refcount: usize,
    interest: usize,
    watches: usize,
    /// Layer-specific native resource (open key, watch descriptor, ...).
    pub native: T,
}

impl<T> HandleEntry<T> {
    /// Canonical absolute path of the handle.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of outstanding `open` calls.
    pub fn refcount(&self) -> usize {
        self.refcount
    }

    /// Whether at least one reader armed change watching.
    pub fn has_interest(&self) -> bool {
        self.interest > 0
    }

    /// Whether at least one publisher asked for interest reports.
    pub fn is_watched(&self) -> bool {
        self.watches > 0
    }

    /// Counts one more reader; returns `true` on the 0 -> 1 edge.
    pub fn add_interest(&mut self) -> bool {
        self.interest += 1;
        self.interest == 1
    }

    /// Counts one reader less; returns `true` on the 1 -> 0 edge.
    pub fn remove_interest(&mut self) -> bool {
        if self.interest == 0 {
            return false;
        }
        self.interest -= 1;
        self.interest == 0
    }

    /// Counts one more publisher watch; returns `true` on the 0 -> 1 edge.
    pub fn add_watch(&mut self) -> bool {
        self.watches += 1;
        self.watches == 1
    }

    /// Clears all publisher watches; returns `true` if any were set.
    pub fn clear_watches(&mut self) -> bool {
        std::mem::take(&mut self.watches) > 0
    }
}

struct Slot<T> {
    generation: u32,
    entry: Option<HandleEntry<T>>,
}

/// Per-layer arena mapping canonical paths to refcounted handles.
///
/// Freed slots are recycled through a free list; bumping the generation on
/// free makes every old handle for the slot fail validation. A layer guards
/// its table with a single mutex.
pub struct HandleTable<T> {
    slots: Vec<Slot<T>>,
    free_list: Vec<u32>,
    by_path: HashMap<Path, Handle>,
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandleTable<T> {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            by_path: HashMap::new(),
        }
    }

    /// Returns the handle for `path`, creating it if needed.
    ///
    /// An existing entry gains one reference and `create` is not called.
    /// Otherwise `create` produces the native resource; `None` aborts and no
    /// entry is made.
    pub fn acquire(&mut self, path: Path, create: impl FnOnce(&Path) -> Option<T>) -> Option<Handle> {
        if let Some(&handle) = self.by_path.get(&path) {
            if let Some(entry) = self.get_mut(handle) {
                entry.refcount += 1;
                return Some(handle);
            }
        }

        let native = create(&path)?;
        let entry = HandleEntry {
            path: path.clone(),
            refcount: 1,
            interest: 0,
            watches: 0,
            native,
        };

        let idx = if let Some(idx) = self.free_list.pop() {
            self.slots[idx as usize].entry = Some(entry);
            idx
        } else {
            let idx = u32::try_from(self.slots.len()).ok()?;
            self.slots.push(Slot {
                generation: 0,
                entry: Some(entry),
            });
            idx
        };

        let handle = Handle {
            idx,
            generation: self.slots[idx as usize].generation,
        };
        self.by_path.insert(path, handle);

        Some(handle)
    }

    /// Drops one reference to `handle`.
    ///
    /// Returns the entry once the last reference is gone so that the caller
    /// can tear down the native resource. Stale handles are ignored.
    pub fn release(&mut self, handle: Handle) -> Option<HandleEntry<T>> {
        let entry = self.get_mut(handle)?;
        entry.refcount -= 1;
        if entry.refcount > 0 {
            return None;
        }

        let slot = &mut self.slots[handle.idx as usize];
        let entry = slot.entry.take()?;
        // Bump generation so old handles immediately fail validation.
        slot.generation = slot.generation.wrapping_add(1);
        self.free_list.push(handle.idx);
        self.by_path.remove(&entry.path);

        Some(entry)
    }

    /// Whether `handle` refers to a live entry.
    pub fn is_valid(&self, handle: Handle) -> bool {
        self.get(handle).is_some()
    }

    /// The entry for `handle`, if it is still live.
    pub fn get(&self, handle: Handle) -> Option<&HandleEntry<T>> {
        self.slots
            .get(handle.idx as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    /// Mutable access to the entry for `handle`.
    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut HandleEntry<T>> {
        self.slots
            .get_mut(handle.idx as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entry.as_mut())
    }

    /// The canonical path of `handle`.
    pub fn path(&self, handle: Handle) -> Option<&Path> {
        self.get(handle).map(HandleEntry::path)
    }

    /// The live handle for `path`, if one is open.
    pub fn lookup(&self, path: &Path) -> Option<Handle> {
        self.by_path.get(path).copied()
    }

    /// Iterates all live entries.
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &HandleEntry<T>)> {
        self.slots.iter().enumerate().filter_map(|(idx, slot)| {
            slot.entry.as_ref().map(|entry| {
                (
                    Handle {
                        idx: idx as u32,
                        generation: slot.generation,
                    },
                    entry,
                )
            })
        })
    }

    /// Iterates all live entries mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle, &mut HandleEntry<T>)> {
        self.slots.iter_mut().enumerate().filter_map(|(idx, slot)| {
            let generation = slot.generation;
            slot.entry.as_mut().map(|entry| {
                (
                    Handle {
                        idx: idx as u32,
                        generation,
                    },
                    entry,
                )
            })
        })
    }

    /// Handles whose path is an ancestor or descendant of any of `changed`.
    pub fn affected_by(&self, changed: &[Path], interested_only: bool) -> Vec<Handle> {
        self.iter()
            .filter(|(_, entry)| !interested_only || entry.has_interest())
            .filter(|(_, entry)| changed.iter().any(|path| entry.path.overlaps(path)))
            .map(|(handle, _)| handle)
            .collect()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    /// Whether no handle is open.
    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }
}
