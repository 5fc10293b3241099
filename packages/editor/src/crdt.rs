//! # Replicated-structure helpers
//!
//! Thin layer between `yrs` containers and `serde_json` values.
//!
//! ## Key Principles
//!
//! 1. **Reads snapshot, writes target leaves**: readers convert a whole
//!    subtree to JSON; writers touch only the keys they change.
//! 2. **Shapes can decay**: concurrent writers that disagree on a nested
//!    container's shape can leave a plain value where a live map or array
//!    was expected. `ensure_map`/`ensure_array` re-materialize those before
//!    anything writes into them.

use serde_json::{Map as JsonMap, Number, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use yrs::{Any, Array, ArrayPrelim, ArrayRef, Map, MapPrelim, MapRef, Out, ReadTxn, TransactionMut};

/// Convert a `yrs` primitive into JSON.
///
/// Integral numbers come back as JSON integers so that they deserialize into
/// integer fields.
pub fn any_to_json(any: &Any) -> Value {
    match any {
        Any::Null | Any::Undefined => Value::Null,
        Any::Bool(b) => Value::Bool(*b),
        Any::Number(n) => number_to_json(*n),
        Any::BigInt(n) => Value::Number(Number::from(*n)),
        Any::String(s) => Value::String(s.to_string()),
        Any::Buffer(bytes) => Value::Array(
            bytes
                .iter()
                .map(|b| Value::Number(Number::from(*b)))
                .collect(),
        ),
        Any::Array(items) => Value::Array(items.iter().map(any_to_json).collect()),
        Any::Map(entries) => {
            let mut obj = JsonMap::new();
            for (k, v) in entries.iter() {
                obj.insert(k.clone(), any_to_json(v));
            }
            Value::Object(obj)
        }
    }
}

fn number_to_json(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// Convert JSON into a `yrs` primitive (never a live container).
pub fn json_to_any(value: &Value) -> Any {
    match value {
        Value::Null => Any::Null,
        Value::Bool(b) => Any::Bool(*b),
        Value::Number(n) => Any::Number(n.as_f64().unwrap_or(0.0)),
        Value::String(s) => Any::String(Arc::from(s.as_str())),
        Value::Array(items) => {
            let items: Vec<Any> = items.iter().map(json_to_any).collect();
            Any::Array(Arc::from(items))
        }
        Value::Object(entries) => {
            let map: HashMap<String, Any> = entries
                .iter()
                .map(|(k, v)| (k.clone(), json_to_any(v)))
                .collect();
            Any::Map(Arc::new(map))
        }
    }
}

/// Deep-convert any replicated value (live or plain) into JSON.
pub fn out_to_json<T: ReadTxn>(txn: &T, out: Out) -> Value {
    match out {
        Out::Any(any) => any_to_json(&any),
        Out::YMap(map) => map_to_json(txn, &map),
        Out::YArray(array) => array_to_json(txn, &array),
        _ => Value::Null,
    }
}

pub fn map_to_json<T: ReadTxn>(txn: &T, map: &MapRef) -> Value {
    let mut obj = JsonMap::new();
    for (key, value) in map.iter(txn) {
        obj.insert(key.to_string(), out_to_json(txn, value));
    }
    Value::Object(obj)
}

pub fn array_to_json<T: ReadTxn>(txn: &T, array: &ArrayRef) -> Value {
    Value::Array(array.iter(txn).map(|v| out_to_json(txn, v)).collect())
}

/// Read one key of a map as JSON, `None` when absent.
pub fn get_json<T: ReadTxn>(txn: &T, map: &MapRef, key: &str) -> Option<Value> {
    map.get(txn, key).map(|out| out_to_json(txn, out))
}

/// Live handle for `parent[key]` as a map, creating or re-materializing it.
///
/// Idempotent: a live map is returned untouched. A decayed plain object is
/// replaced by a live map holding the same entries; any other value (or a
/// missing key) becomes an empty live map.
pub fn ensure_map(txn: &mut TransactionMut, parent: &MapRef, key: &str) -> MapRef {
    match parent.get(&*txn, key) {
        Some(Out::YMap(map)) => map,
        Some(other) => {
            let snapshot = out_to_json(&*txn, other);
            let map = parent.insert(txn, key, MapPrelim::default());
            if let Value::Object(entries) = snapshot {
                debug!(key, entries = entries.len(), "Re-materializing decayed map");
                for (k, v) in entries {
                    map.insert(txn, k, json_to_any(&v));
                }
            }
            map
        }
        None => parent.insert(txn, key, MapPrelim::default()),
    }
}

/// Live handle for `parent[key]` as an array, creating or re-materializing it.
pub fn ensure_array(txn: &mut TransactionMut, parent: &MapRef, key: &str) -> ArrayRef {
    match parent.get(&*txn, key) {
        Some(Out::YArray(array)) => array,
        Some(other) => {
            let snapshot = out_to_json(&*txn, other);
            let array = parent.insert(txn, key, ArrayPrelim::default());
            if let Value::Array(items) = snapshot {
                debug!(key, items = items.len(), "Re-materializing decayed array");
                for item in items {
                    array.push_back(txn, json_to_any(&item));
                }
            }
            array
        }
        None => parent.insert(txn, key, ArrayPrelim::default()),
    }
}

/// Write a plain leaf value.
pub fn set_json(txn: &mut TransactionMut, map: &MapRef, key: &str, value: &Value) {
    map.insert(txn, key, json_to_any(value));
}

/// Replace `parent[key]` with a live map holding `entries` as plain leaves.
pub fn write_live_map(
    txn: &mut TransactionMut,
    parent: &MapRef,
    key: &str,
    entries: &JsonMap<String, Value>,
) -> MapRef {
    let map = parent.insert(txn, key, MapPrelim::default());
    for (k, v) in entries {
        map.insert(txn, k.as_str(), json_to_any(v));
    }
    map
}

/// Replace `parent[key]` with a live array holding `items` as plain values.
pub fn write_live_array(
    txn: &mut TransactionMut,
    parent: &MapRef,
    key: &str,
    items: &[Value],
) -> ArrayRef {
    let array = parent.insert(txn, key, ArrayPrelim::default());
    for item in items {
        array.push_back(txn, json_to_any(item));
    }
    array
}

/// Remove every array element matching `pred`, returning how many went.
///
/// Indices are visited back to front so removals don't shift pending ones.
pub fn retain_array(
    txn: &mut TransactionMut,
    array: &ArrayRef,
    mut keep: impl FnMut(&Value) -> bool,
) -> usize {
    let items = match array_to_json(&*txn, array) {
        Value::Array(items) => items,
        _ => return 0,
    };
    let mut removed = 0;
    for (index, item) in items.iter().enumerate().rev() {
        if !keep(item) {
            array.remove(txn, index as u32);
            removed += 1;
        }
    }
    removed
}

/// Rewrite array elements in place; `f` returns `Some(new)` to replace one.
pub fn rewrite_array(
    txn: &mut TransactionMut,
    array: &ArrayRef,
    mut f: impl FnMut(&Value) -> Option<Value>,
) -> usize {
    let items = match array_to_json(&*txn, array) {
        Value::Array(items) => items,
        _ => return 0,
    };
    let mut rewritten = 0;
    for (index, item) in items.iter().enumerate() {
        if let Some(replacement) = f(item) {
            array.remove(txn, index as u32);
            array.insert(txn, index as u32, json_to_any(&replacement));
            rewritten += 1;
        }
    }
    rewritten
}
