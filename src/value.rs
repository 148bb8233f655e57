//! The structured-value universe and dotted-path addressing over it.
//!
//! `serde_json::Value` is reused directly as the value type rather than
//! reinventing null/bool/number/string/array/object.

use serde_json::{Map, Value as Json};
use std::collections::BTreeSet;

/// A structured, JSON-shaped value: null, boolean, IEEE-754 double, string,
/// ordered sequence, or keyed mapping.
pub type Value = Json;

/// Coarse shape of a value, used to decide whether two values recurse
/// together (both composite of the same kind) or are compared/replaced
/// wholesale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Primitive,
    Array,
    Object,
}

pub fn kind(v: &Value) -> Kind {
    match v {
        Json::Array(_) => Kind::Array,
        Json::Object(_) => Kind::Object,
        _ => Kind::Primitive,
    }
}

pub fn is_primitive(v: &Value) -> bool {
    kind(v) == Kind::Primitive
}

/// True when both values are composite of the *same* kind (object/object or
/// array/array). Anything else — primitive/primitive, primitive/composite,
/// or array/object — is a "type mismatch" for diff purposes.
pub fn same_composite_kind(a: &Value, b: &Value) -> bool {
    matches!(
        (kind(a), kind(b)),
        (Kind::Array, Kind::Array) | (Kind::Object, Kind::Object)
    )
}

/// Enumerate a composite value's child keys: object field names, or
/// stringified indices `"0"`, `"1"`, … for arrays, which are treated as
/// keyed children indexed by their position.
pub fn child_keys(v: &Value) -> BTreeSet<String> {
    match v {
        Json::Object(map) => map.keys().cloned().collect(),
        Json::Array(arr) => (0..arr.len()).map(|i| i.to_string()).collect(),
        _ => BTreeSet::new(),
    }
}

pub fn get_child<'a>(v: &'a Value, key: &str) -> Option<&'a Value> {
    match v {
        Json::Object(map) => map.get(key),
        Json::Array(arr) => key.parse::<usize>().ok().and_then(|i| arr.get(i)),
        _ => None,
    }
}

/// Join a parent dotted path with a child key segment. The root path is the
/// literal string `"."`; children of the root are addressed by the bare key,
/// not `".key"`.
pub fn join_path(parent: &str, key: &str) -> String {
    if parent == "." {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

fn segments(path: &str) -> Vec<&str> {
    if path == "." {
        Vec::new()
    } else {
        path.split('.').collect()
    }
}

/// Read the value at a dotted path. `None` if any segment is missing.
pub fn get_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for seg in segments(path) {
        current = get_child(current, seg)?;
    }
    Some(current)
}

/// Write a value at a dotted path, creating missing intermediates as
/// mappings.
pub fn set_path(root: &mut Value, path: &str, value: Value) {
    if path == "." {
        *root = value;
        return;
    }
    let segs = segments(path);
    let mut current = root;
    for seg in &segs[..segs.len() - 1] {
        current = step_or_create(current, seg);
    }
    set_child(current, segs[segs.len() - 1], value);
}

/// Remove the value at a dotted path. A no-op if the path (or any of its
/// ancestors) does not exist.
pub fn unset_path(root: &mut Value, path: &str) {
    if path == "." {
        *root = Value::Null;
        return;
    }
    let segs = segments(path);
    let mut current = root;
    for seg in &segs[..segs.len() - 1] {
        match step_existing(current, seg) {
            Some(next) => current = next,
            None => return,
        }
    }
    remove_child(current, segs[segs.len() - 1]);
}

fn step_or_create<'a>(current: &'a mut Value, key: &str) -> &'a mut Value {
    if matches!(current, Json::Array(_)) {
        if let Some(idx) = key.parse::<usize>().ok() {
            if let Json::Array(arr) = current {
                while arr.len() <= idx {
                    arr.push(Value::Null);
                }
                return &mut arr[idx];
            }
        }
    }
    if !matches!(current, Json::Object(_)) {
        *current = Value::Object(Map::new());
    }
    let map = match current {
        Json::Object(map) => map,
        _ => unreachable!(),
    };
    map.entry(key.to_string()).or_insert(Value::Null)
}

fn step_existing<'a>(current: &'a mut Value, key: &str) -> Option<&'a mut Value> {
    match current {
        Json::Object(map) => map.get_mut(key),
        Json::Array(arr) => key.parse::<usize>().ok().and_then(move |i| arr.get_mut(i)),
        _ => None,
    }
}

fn set_child(current: &mut Value, key: &str, value: Value) {
    if let Json::Array(arr) = current {
        if let Ok(idx) = key.parse::<usize>() {
            while arr.len() <= idx {
                arr.push(Value::Null);
            }
            arr[idx] = value;
            return;
        }
    }
    if !matches!(current, Json::Object(_)) {
        *current = Value::Object(Map::new());
    }
    if let Json::Object(map) = current {
        map.insert(key.to_string(), value);
    }
}

fn remove_child(current: &mut Value, key: &str) {
    match current {
        Json::Object(map) => {
            map.remove(key);
        }
        Json::Array(arr) => {
            if let Ok(idx) = key.parse::<usize>() {
                if idx < arr.len() {
                    arr.remove(idx);
                }
            }
        }
        _ => {}
    }
}
