use std::collections::BTreeSet;

use toml::Value;

use crate::{Path, PathEncoding};

/// Lists the paths whose values differ between two TOML documents.
///
/// Keys present on only one side are reported once at the key itself, not
/// for every leaf below them.
pub(super) fn changed_paths(old: &Value, new: &Value) -> Vec<Path> {
    let mut changes = Vec::new();
    diff_toml_values(&mut Vec::new(), old, new, &mut changes);
    changes
}

fn diff_toml_values(
    prefix: &mut Vec<String>,
    old: &Value,
    new: &Value,
    changes: &mut Vec<Path>,
) {
    match (old, new) {
        (Value::Table(old_table), Value::Table(new_table)) => {
            let all_keys: BTreeSet<&String> = old_table.keys().chain(new_table.keys()).collect();

            for key in all_keys {
                prefix.push(key.clone());

                match (old_table.get(key), new_table.get(key)) {
                    (Some(old_val), Some(new_val)) => {
                        diff_toml_values(prefix, old_val, new_val, changes);
                    }
                    _ => changes.push(to_path(prefix)),
                }

                prefix.pop();
            }
        }
        _ => {
            if old != new {
                changes.push(to_path(prefix));
            }
        }
    }
}

fn to_path(segments: &[String]) -> Path {
    Path::from_segments(PathEncoding::Slash, segments.iter().cloned())
        .unwrap_or_else(|_| Path::new(&segments.join("/")))
}
