//! Path traversal over a JSON tree.
//!
//! Path segments index objects by key and arrays by decimal position.

use serde_json::{Map, Value};

pub(crate) fn read_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for key in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(key)?,
            Value::Array(items) => items.get(key.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Writes `value` at `path`, creating (or replacing non-container)
/// intermediate levels with objects. Arrays stay arrays when addressed by
/// position: writing at or past the end extends them, padding with nulls.
/// Returns the previous leaf value.
pub(crate) fn write_path(root: &mut Value, path: &str, value: Value) -> Option<Value> {
    let mut keys: Vec<&str> = path.split('.').collect();
    let last = keys.pop().unwrap_or(path);

    let mut current = root;
    for key in keys {
        current = child_mut(current, key);
    }

    let index = array_index(current, last);
    match (current, index) {
        (Value::Array(items), Some(i)) if i < items.len() => Some(std::mem::replace(&mut items[i], value)),
        (Value::Array(items), Some(i)) => {
            *array_slot(items, i) = value;
            None
        }
        (current, _) => ensure_object(current).insert(last.to_string(), value),
    }
}

/// Position addressed by `key` when `parent` is an array.
fn array_index(parent: &Value, key: &str) -> Option<usize> {
    match parent {
        Value::Array(_) => key.parse::<usize>().ok(),
        _ => None,
    }
}

fn array_slot(items: &mut Vec<Value>, index: usize) -> &mut Value {
    if index >= items.len() {
        items.resize(index + 1, Value::Null);
    }
    &mut items[index]
}

fn child_mut<'a>(parent: &'a mut Value, key: &str) -> &'a mut Value {
    let index = array_index(parent, key);
    match (parent, index) {
        (Value::Array(items), Some(i)) => array_slot(items, i),
        (parent, _) => ensure_object(parent).entry(key.to_string()).or_insert(Value::Null),
    }
}

fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced with an object"),
    }
}

/// Identity-style comparison: equal primitives are unchanged, containers
/// always count as a change, and anything replacing an absent value is new.
pub(crate) fn is_changed(old: Option<&Value>, new: &Value) -> bool {
    match (old, new) {
        (Some(Value::Number(a)), Value::Number(b)) => a.as_f64() != b.as_f64(),
        (Some(old @ (Value::Null | Value::Bool(_) | Value::String(_))), new) => old != new,
        _ => true,
    }
}

/// Recursively merges objects in `source` into `target`. Arrays and
/// primitives in `source` replace what `target` holds.
pub fn deep_merge(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(dst), Value::Object(src)) => {
            for (key, value) in src {
                if value.is_object() {
                    let slot = dst.entry(key).or_insert_with(|| Value::Object(Map::new()));
                    if !slot.is_object() {
                        *slot = Value::Object(Map::new());
                    }
                    deep_merge(slot, value);
                } else {
                    dst.insert(key, value);
                }
            }
        }
        (target, source) => *target = source,
    }
}
