use std::{
    collections::{BTreeMap, BTreeSet},
    fs, io,
    path::{Path as FsPath, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{Path, Value, watch::write_atomically};

/// Errors from reading or writing a hive file.
#[derive(Debug, thiserror::Error)]
pub enum HiveError {
    /// Reading or writing the hive file failed
    #[error("I/O error on hive '{path}': {details}")]
    Io {
        /// Path of the hive file
        path: PathBuf,
        /// I/O error details
        details: String,
    },

    /// The hive file is not a valid hive
    #[error("corrupt hive '{path}': {details}")]
    Corrupt {
        /// Path of the hive file
        path: PathBuf,
        /// Parse error details
        details: String,
    },

    /// Serializing the hive failed
    #[error("failed to serialize hive: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A stored value and the writer that owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(super) struct Entry {
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

/// One registry key: named values plus named subkeys.
///
/// A value and a subkey may share a name; both show up once in the
/// children of the key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(super) struct Key {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub values: BTreeMap<String, Entry>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub keys: BTreeMap<String, Key>,
}

impl Key {
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.keys.is_empty()
    }

    pub fn key(&self, segments: &[String]) -> Option<&Key> {
        segments
            .iter()
            .try_fold(self, |key, segment| key.keys.get(segment))
    }

    pub fn value(&self, segments: &[String]) -> Option<&Value> {
        let (name, parents) = segments.split_last()?;
        self.key(parents)?
            .values
            .get(name)
            .map(|entry| &entry.value)
    }

    pub fn children(&self, segments: &[String]) -> BTreeSet<String> {
        let Some(key) = self.key(segments) else {
            return BTreeSet::new();
        };

        key.keys.keys().chain(key.values.keys()).cloned().collect()
    }

    /// Deepest existing key on the way to `segments`.
    pub fn nearest_existing(&self, segments: &[String]) -> usize {
        let mut key = self;
        for (depth, segment) in segments.iter().enumerate() {
            match key.keys.get(segment) {
                Some(next) => key = next,
                None => return depth,
            }
        }
        segments.len()
    }

    /// Stores a value, creating intermediate keys. Returns whether anything
    /// changed.
    pub fn set(&mut self, segments: &[String], value: Value, owner: Option<&str>) -> bool {
        let Some((name, parents)) = segments.split_last() else {
            return false;
        };

        let key = parents
            .iter()
            .fold(self, |key, segment| key.keys.entry(segment.clone()).or_default());

        let entry = Entry {
            value,
            owner: owner.map(str::to_string),
        };
        if key.values.get(name) == Some(&entry) {
            return false;
        }

        key.values.insert(name.clone(), entry);
        true
    }

    /// Removes the value and the subkey named by `segments`.
    ///
    /// With an `owner`, only values recorded for that owner go. Keys left
    /// empty by the removal are pruned, including ancestors.
    pub fn remove(&mut self, segments: &[String], owner: Option<&str>) -> bool {
        let Some((first, rest)) = segments.split_first() else {
            return self.clear_owned(owner);
        };

        if rest.is_empty() {
            let value_removed = match self.values.get(first) {
                Some(entry) if owns(entry, owner) => self.values.remove(first).is_some(),
                _ => false,
            };
            let key_removed = self.remove_subkey(first, |key| key.clear_owned(owner));
            return value_removed || key_removed;
        }

        self.remove_subkey(first, |key| key.remove(rest, owner))
    }

    fn remove_subkey(&mut self, name: &str, op: impl FnOnce(&mut Key) -> bool) -> bool {
        let Some(subkey) = self.keys.get_mut(name) else {
            return false;
        };

        let removed = op(subkey);
        if subkey.is_empty() {
            self.keys.remove(name);
            return true;
        }
        removed
    }

    fn clear_owned(&mut self, owner: Option<&str>) -> bool {
        let before = self.values.len();
        self.values.retain(|_, entry| !owns(entry, owner));
        let mut removed = self.values.len() != before;

        self.keys.retain(|_, key| {
            removed |= key.clear_owned(owner);
            if key.is_empty() {
                removed = true;
                return false;
            }
            true
        });

        removed
    }
}

fn owns(entry: &Entry, owner: Option<&str>) -> bool {
    match owner {
        Some(owner) => entry.owner.as_deref() == Some(owner),
        None => true,
    }
}

/// Lists the paths at which two hives differ.
///
/// A key present on only one side is reported once at the key.
pub(super) fn changed_paths(old: &Key, new: &Key) -> Vec<Path> {
    let mut changes = Vec::new();
    diff_keys(&Path::default(), old, new, &mut changes);
    changes
}

fn diff_keys(prefix: &Path, old: &Key, new: &Key, changes: &mut Vec<Path>) {
    let names: BTreeSet<&String> = old.values.keys().chain(new.values.keys()).collect();
    for name in names {
        let before = old.values.get(name).map(|entry| &entry.value);
        let after = new.values.get(name).map(|entry| &entry.value);
        if before != after {
            changes.push(prefix.child(name));
        }
    }

    let names: BTreeSet<&String> = old.keys.keys().chain(new.keys.keys()).collect();
    for name in names {
        match (old.keys.get(name), new.keys.get(name)) {
            (Some(before), Some(after)) => diff_keys(&prefix.child(name), before, after, changes),
            _ => changes.push(prefix.child(name)),
        }
    }
}

/// Reads a hive file; a missing file is an empty hive.
pub(super) fn load(file: &FsPath) -> Result<Key, HiveError> {
    let text = match fs::read_to_string(file) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Key::default()),
        Err(e) => {
            return Err(HiveError::Io {
                path: file.to_path_buf(),
                details: e.to_string(),
            });
        }
    };

    if text.trim().is_empty() {
        return Ok(Key::default());
    }

    serde_json::from_str(&text).map_err(|e| HiveError::Corrupt {
        path: file.to_path_buf(),
        details: e.to_string(),
    })
}

pub(super) fn save(file: &FsPath, hive: &Key) -> Result<(), HiveError> {
    let contents = serde_json::to_vec_pretty(hive)?;
    write_atomically(file, &contents).map_err(|e| HiveError::Io {
        path: file.to_path_buf(),
        details: e.to_string(),
    })
}
