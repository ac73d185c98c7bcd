use toml::{Value, map::Map};

use super::StoreError;

/// Navigates through a TOML value structure following path segments.
///
/// Arrays are indexed by numeric segments. Returns `None` if any step is
/// missing.
pub(super) fn navigate<'a>(value: &'a Value, segments: &[String]) -> Option<&'a Value> {
    let mut current = value;

    for part in segments {
        current = match current {
            Value::Table(table) => table.get(part)?,
            Value::Array(array) => array.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Sets a value at the specified path, creating intermediate tables.
///
/// # Errors
/// * `StoreError::InvalidPath` - If the path is empty or crosses a leaf value
pub(super) fn set_value_at_path(
    value: &mut Value,
    segments: &[String],
    new_value: Value,
) -> Result<(), StoreError> {
    let Some((last_key, parents)) = segments.split_last() else {
        return Err(StoreError::InvalidPath("cannot assign to the root".to_string()));
    };

    let parent = navigate_to_parent_mut(value, parents)?;

    insert_value(parent, last_key, new_value)
}

/// Removes the value or table at `segments`.
///
/// Removing the root clears the whole document. Returns whether anything
/// was removed.
pub(super) fn remove_value_at_path(value: &mut Value, segments: &[String]) -> bool {
    let Some((last_key, parents)) = segments.split_last() else {
        return match value {
            Value::Table(table) if !table.is_empty() => {
                table.clear();
                true
            }
            _ => false,
        };
    };

    let mut current = value;
    for part in parents {
        current = match current {
            Value::Table(table) => match table.get_mut(part) {
                Some(next) => next,
                None => return false,
            },
            _ => return false,
        };
    }

    match current {
        Value::Table(table) => table.remove(last_key).is_some(),
        _ => false,
    }
}

/// Walks to the container that will hold the last segment, creating empty
/// tables on the way.
///
/// # Errors
/// * `StoreError::InvalidPath` - If a step lands on a non-table value
fn navigate_to_parent_mut<'a>(
    value: &'a mut Value,
    parents: &[String],
) -> Result<&'a mut Value, StoreError> {
    let mut current = value;

    for (i, part) in parents.iter().enumerate() {
        current = navigate_step_mut(current, part, &parents[..=i])?;
    }

    Ok(current)
}

/// Performs a single navigation step in a mutable TOML structure
///
/// # Arguments
/// * `current` - The current TOML value
/// * `key` - The key to navigate to
/// * `path_so_far` - The path traversed so far (for error messages)
///
/// # Errors
/// * `StoreError::InvalidPath` - If the current value is not a table
fn navigate_step_mut<'a>(
    current: &'a mut Value,
    key: &str,
    path_so_far: &[String],
) -> Result<&'a mut Value, StoreError> {
    match current {
        Value::Table(table) => Ok(table
            .entry(key.to_string())
            .or_insert_with(|| Value::Table(Map::new()))),
        _ => Err(StoreError::InvalidPath(format!(
            "cannot descend into {} at '/{}'",
            current.type_str(),
            path_so_far.join("/")
        ))),
    }
}

/// Inserts a value into a TOML table.
///
/// # Errors
/// * `StoreError::InvalidPath` - If the container is not a table
fn insert_value(container: &mut Value, key: &str, new_value: Value) -> Result<(), StoreError> {
    match container {
        Value::Table(table) => {
            table.insert(key.to_string(), new_value);
            Ok(())
        }
        _ => Err(StoreError::InvalidPath(format!(
            "cannot insert '{key}' into {}",
            container.type_str()
        ))),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn segments(path: &str) -> Vec<String> {
        path.split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    fn document() -> Value {
        toml::from_str(
            r#"
[Device]
State = "Starting"
Names = ["a", "b"]

[Device.Network]
Up = true
"#,
        )
        .unwrap()
    }

    #[test]
    fn navigates_tables_and_arrays() {
        let doc = document();

        assert_eq!(
            navigate(&doc, &segments("/Device/State")).and_then(Value::as_str),
            Some("Starting")
        );
        assert_eq!(
            navigate(&doc, &segments("/Device/Names/1")).and_then(Value::as_str),
            Some("b")
        );
        assert!(navigate(&doc, &segments("/Device/Missing")).is_none());
        assert!(navigate(&doc, &segments("/Device/State/Deeper")).is_none());
    }

    #[test]
    fn set_creates_intermediate_tables() {
        let mut doc = document();
        set_value_at_path(
            &mut doc,
            &segments("/Battery/Charge/Level"),
            Value::Integer(80),
        )
        .unwrap();

        assert_eq!(
            navigate(&doc, &segments("/Battery/Charge/Level")).and_then(Value::as_integer),
            Some(80)
        );
    }

    #[test]
    fn set_refuses_to_descend_into_leaves() {
        let mut doc = document();
        let result = set_value_at_path(&mut doc, &segments("/Device/State/Sub"), Value::Boolean(true));

        assert!(matches!(result, Err(StoreError::InvalidPath(_))));
    }

    #[test]
    fn set_refuses_root() {
        let mut doc = document();
        assert!(set_value_at_path(&mut doc, &[], Value::Boolean(true)).is_err());
    }

    #[test]
    fn remove_drops_subtrees() {
        let mut doc = document();

        assert!(remove_value_at_path(&mut doc, &segments("/Device/Network")));
        assert!(navigate(&doc, &segments("/Device/Network/Up")).is_none());
        assert!(!remove_value_at_path(&mut doc, &segments("/Device/Network")));
        assert!(remove_value_at_path(&mut doc, &[]));
        assert!(doc.as_table().unwrap().is_empty());
    }
}
