// src/store/tree.rs
//
// Path addressing inside a JSON tree. Shared by the in-memory store and the
// Postgres store, which keeps one tree per document root.

use serde_json::{Map, Value};

/// Returns the subtree at `segments`, if any.
pub fn get<'a>(root: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    let mut node = root;
    for segment in segments {
        node = node.as_object()?.get(*segment)?;
    }
    if node.is_null() { None } else { Some(node) }
}

/// Replaces the subtree at `segments` with `value`.
///
/// Intermediate objects are created as needed and non-object intermediates
/// are replaced. A `null` value removes the entry, and objects left empty by
/// the removal are pruned.
pub fn set(root: &mut Value, segments: &[&str], value: Value) {
    let Some((last, parents)) = segments.split_last() else {
        *root = value;
        return;
    };

    if value.is_null() {
        remove(root, parents, last);
        return;
    }

    let mut node = root;
    for segment in parents {
        node = ensure_object(node)
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    ensure_object(node).insert(last.to_string(), value);
}

fn remove(root: &mut Value, parents: &[&str], last: &str) {
    let Some((head, rest)) = parents.split_first() else {
        if let Some(map) = root.as_object_mut() {
            map.remove(last);
        }
        return;
    };

    let Some(child) = root.as_object_mut().and_then(|m| m.get_mut(*head)) else {
        return;
    };
    remove(child, rest, last);

    let now_empty = child.as_object().is_some_and(|m| m.is_empty());
    if now_empty {
        if let Some(map) = root.as_object_mut() {
            map.remove(*head);
        }
    }
}

fn ensure_object(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!("node was just made an object"),
    }
}
