// src/path.rs
//! Dotted-path resolution
//!
//! Paths are split on `.`. A numeric segment indexes into an array; any other
//! segment met on an array is applied to every element, which is how
//! `{"items.price": ...}` reaches the prices of all items.

use crate::value::{Map, Value};

/// Outcome of resolving a path
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    Missing,
    Value(Value),
    /// Several matches collected through an array
    Multi(Vec<Value>),
}

impl Resolved {
    #[inline]
    pub fn is_missing(&self) -> bool {
        matches!(self, Resolved::Missing)
    }

    /// Flatten into a single value: Missing becomes Undefined, Multi an Array
    pub fn into_value(self) -> Value {
        match self {
            Resolved::Missing => Value::Undefined,
            Resolved::Value(v) => v,
            Resolved::Multi(vs) => Value::Array(vs),
        }
    }

    /// Borrowing variant of `into_value`
    pub fn to_value(&self) -> Value {
        self.clone().into_value()
    }
}

#[inline]
pub(crate) fn is_index(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

fn lookup<'v>(value: &'v Value, segment: &str) -> Option<&'v Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(arr) if is_index(segment) => segment.parse::<usize>().ok().and_then(|i| arr.get(i)),
        _ => None,
    }
}

/// Resolve a dotted path against a value
pub fn resolve(doc: &Value, path: &str) -> Resolved {
    resolve_with(doc, path, false)
}

/// Resolve with an explicit stop flag
///
/// With `stop_at_array`, an array met on the very first segment is returned
/// as is instead of being mapped over. Every per-element recursion sets the
/// flag, so nested arrays are never flattened more than one level per
/// segment.
pub fn resolve_with(doc: &Value, path: &str, stop_at_array: bool) -> Resolved {
    let segments: Vec<&str> = path.split('.').collect();
    resolve_segments(doc, &segments, stop_at_array)
}

fn resolve_segments(doc: &Value, segments: &[&str], stop_at_array: bool) -> Resolved {
    let mut current = doc;
    for (i, segment) in segments.iter().enumerate() {
        if let Value::Array(items) = current {
            if !is_index(segment) {
                if i == 0 && stop_at_array {
                    return Resolved::Value(current.clone());
                }
                let rest = &segments[i..];
                let mut found = Vec::new();
                for item in items {
                    match resolve_segments(item, rest, true) {
                        Resolved::Missing => {}
                        Resolved::Value(v) => found.push(v),
                        Resolved::Multi(vs) => found.extend(vs),
                    }
                }
                return match found.len() {
                    0 => Resolved::Missing,
                    1 => Resolved::Value(found.remove(0)),
                    _ => Resolved::Multi(found),
                };
            }
        }
        match lookup(current, segment) {
            Some(next) => current = next,
            None => return Resolved::Missing,
        }
    }
    Resolved::Value(current.clone())
}

/// `resolve` flattened to a value
pub fn resolve_value(doc: &Value, path: &str) -> Value {
    resolve(doc, path).into_value()
}

/// Minimal object shape containing only the branch a path selects
///
/// `resolve_obj({a: {b: 1, c: 2}}, "a.b")` is `{a: {b: 1}}`. Inside arrays,
/// object elements that miss keep an empty `{}` placeholder so several
/// results can be merged index-wise; scalar elements are dropped. Returns
/// `None` when nothing resolves.
pub fn resolve_obj(doc: &Value, path: &str) -> Option<Value> {
    let segments: Vec<&str> = path.split('.').collect();
    resolve_obj_segments(doc, &segments)
}

fn resolve_obj_segments(value: &Value, segments: &[&str]) -> Option<Value> {
    let (head, rest) = segments.split_first()?;
    match value {
        Value::Array(items) if is_index(head) => {
            let item = head.parse::<usize>().ok().and_then(|i| items.get(i))?;
            let inner = if rest.is_empty() {
                item.clone()
            } else {
                resolve_obj_segments(item, rest)?
            };
            Some(Value::Array(vec![inner]))
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            let mut any = false;
            for item in items {
                match resolve_obj_segments(item, segments) {
                    Some(v) => {
                        any = true;
                        out.push(v);
                    }
                    None if item.is_object() => out.push(Value::object()),
                    None => {}
                }
            }
            if any {
                Some(Value::Array(out))
            } else {
                None
            }
        }
        Value::Object(map) => {
            let child = map.get(*head)?;
            let inner = if rest.is_empty() {
                child.clone()
            } else {
                resolve_obj_segments(child, rest)?
            };
            let mut out = Map::new();
            out.insert(head.to_string(), inner);
            Some(Value::Object(out))
        }
        _ => None,
    }
}

/// Walk to the parent of the last segment and call `visit(parent, key)`
///
/// With `force`, missing intermediate objects are created. Arrays are
/// iterated element-wise when the next segment is not an index.
pub fn traverse(doc: &mut Value, path: &str, force: bool, visit: &mut dyn FnMut(&mut Value, &str)) {
    let segments: Vec<&str> = path.split('.').collect();
    traverse_segments(doc, &segments, force, visit);
}

fn traverse_segments(
    value: &mut Value,
    segments: &[&str],
    force: bool,
    visit: &mut dyn FnMut(&mut Value, &str),
) {
    let (head, rest) = match segments.split_first() {
        Some(split) => split,
        None => return,
    };

    if let Value::Array(items) = value {
        if !is_index(head) {
            for item in items.iter_mut() {
                traverse_segments(item, segments, force, visit);
            }
            return;
        }
    }

    if rest.is_empty() {
        visit(value, head);
        return;
    }

    match value {
        Value::Array(items) => {
            if let Some(child) = head.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
                traverse_segments(child, rest, force, visit);
            }
        }
        Value::Object(map) => {
            let needs_slot = match map.get(*head) {
                None => force,
                Some(existing) => force && existing.is_nil(),
            };
            if needs_slot {
                map.insert(head.to_string(), Value::object());
            }
            if let Some(child) = map.get_mut(*head) {
                traverse_segments(child, rest, force, visit);
            }
        }
        _ => {}
    }
}

/// Assign `new_value` at `path`, creating intermediate objects
pub fn set_value(doc: &mut Value, path: &str, new_value: Value) {
    traverse(doc, path, true, &mut |parent, key| match parent {
        Value::Object(map) => {
            map.insert(key.to_string(), new_value.clone());
        }
        Value::Array(items) => {
            if let Ok(i) = key.parse::<usize>() {
                if i < items.len() {
                    items[i] = new_value.clone();
                } else if i == items.len() {
                    items.push(new_value.clone());
                }
            }
        }
        _ => {}
    });
}

/// Remove the value at `path`; absent paths are a no-op
pub fn remove_value(doc: &mut Value, path: &str) {
    traverse(doc, path, false, &mut |parent, key| match parent {
        Value::Object(map) => {
            map.shift_remove(key);
        }
        Value::Array(items) => {
            if let Ok(i) = key.parse::<usize>() {
                if i < items.len() {
                    items.remove(i);
                }
            }
        }
        _ => {}
    });
}

/// Deep merge `source` into `target`
///
/// Objects merge per key, arrays index-wise; any other pairing lets the
/// source win.
pub fn merge_into(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(t), Value::Object(s)) => {
            for (key, value) in s {
                match t.get_mut(&key) {
                    Some(existing) => merge_into(existing, value),
                    None => {
                        t.insert(key, value);
                    }
                }
            }
        }
        (Value::Array(t), Value::Array(s)) => {
            for (i, value) in s.into_iter().enumerate() {
                if i < t.len() {
                    merge_into(&mut t[i], value);
                } else {
                    t.push(value);
                }
            }
        }
        (t, s) => *t = s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn v(j: serde_json::Value) -> Value {
        Value::from(j)
    }

    #[test]
    fn test_resolve_simple_and_nested() {
        let doc = v(json!({"name": "Alice", "address": {"city": "NYC"}}));
        assert_eq!(resolve(&doc, "name"), Resolved::Value(v(json!("Alice"))));
        assert_eq!(resolve(&doc, "address.city"), Resolved::Value(v(json!("NYC"))));
        assert!(resolve(&doc, "address.zip").is_missing());
    }

    #[test]
    fn test_resolve_maps_over_arrays() {
        let doc = v(json!({"a": [{"b": 1}, {"b": 2}]}));
        assert_eq!(resolve(&doc, "a.b"), Resolved::Multi(vec![v(json!(1)), v(json!(2))]));
    }

    #[test]
    fn test_resolve_single_match_collapses() {
        let doc = v(json!({"a": [{"b": 1}, {"c": 2}]}));
        assert_eq!(resolve(&doc, "a.b"), Resolved::Value(v(json!(1))));
    }

    #[test]
    fn test_resolve_through_null_is_missing() {
        let doc = v(json!({"a": null}));
        assert!(resolve(&doc, "a.b").is_missing());
    }

    #[test]
    fn test_resolve_array_index() {
        let doc = v(json!({"items": [{"name": "x"}, {"name": "y"}]}));
        assert_eq!(resolve(&doc, "items.1.name"), Resolved::Value(v(json!("y"))));
        assert!(resolve(&doc, "items.5.name").is_missing());
    }

    #[test]
    fn test_resolve_flattens_nested_arrays_of_objects() {
        let doc = v(json!({"a": [{"b": [{"c": 1}, {"c": 2}]}, {"b": [{"c": 3}]}]}));
        assert_eq!(
            resolve(&doc, "a.b.c"),
            Resolved::Multi(vec![v(json!(1)), v(json!(2)), v(json!(3))])
        );
    }

    #[test]
    fn test_resolve_stops_at_inner_array() {
        let doc = v(json!({"a": [[{"b": 1}], [{"b": 2}]]}));
        assert_eq!(
            resolve(&doc, "a.b"),
            Resolved::Multi(vec![v(json!([{"b": 1}])), v(json!([{"b": 2}]))])
        );
        let arr = v(json!([{"b": 1}]));
        assert_eq!(resolve_with(&arr, "b", true), Resolved::Value(arr.clone()));
    }

    #[test]
    fn test_resolve_value_flattens() {
        let doc = v(json!({"a": [{"b": 1}, {"b": 2}]}));
        assert_eq!(resolve_value(&doc, "a.b"), v(json!([1, 2])));
        assert!(resolve_value(&doc, "z").is_undefined());
    }

    #[test]
    fn test_resolve_obj_minimal_shape() {
        let doc = v(json!({"a": {"b": 1, "c": 2}, "d": 3}));
        assert_eq!(resolve_obj(&doc, "a.b"), Some(v(json!({"a": {"b": 1}}))));
        assert_eq!(resolve_obj(&doc, "a.z"), None);
    }

    #[test]
    fn test_resolve_obj_keeps_array_alignment() {
        let doc = v(json!({"a": [{"b": 1, "c": 2}, {"c": 3}, 7]}));
        assert_eq!(resolve_obj(&doc, "a.b"), Some(v(json!({"a": [{"b": 1}, {}]}))));
        assert_eq!(resolve_obj(&doc, "a.x"), None);
    }

    #[test]
    fn test_merge_into_index_wise() {
        let doc = v(json!({"a": [{"b": 1, "c": 2}, {"c": 3}]}));
        let mut out = resolve_obj(&doc, "a.b").unwrap();
        merge_into(&mut out, resolve_obj(&doc, "a.c").unwrap());
        assert_eq!(out, v(json!({"a": [{"b": 1, "c": 2}, {"c": 3}]})));
    }

    #[test]
    fn test_set_value_creates_intermediates() {
        let mut doc = v(json!({"name": "Alice"}));
        set_value(&mut doc, "address.city", v(json!("NYC")));
        assert_eq!(doc, v(json!({"name": "Alice", "address": {"city": "NYC"}})));
    }

    #[test]
    fn test_set_value_over_array_elements() {
        let mut doc = v(json!({"a": [{"b": 1}, {"b": 2}]}));
        set_value(&mut doc, "a.b", v(json!(0)));
        assert_eq!(doc, v(json!({"a": [{"b": 0}, {"b": 0}]})));

        set_value(&mut doc, "a.0", v(json!("first")));
        assert_eq!(doc, v(json!({"a": ["first", {"b": 0}]})));
    }

    #[test]
    fn test_remove_value() {
        let mut doc = v(json!({"a": {"b": 1, "c": 2}, "list": [1, 2, 3]}));
        remove_value(&mut doc, "a.b");
        remove_value(&mut doc, "list.1");
        remove_value(&mut doc, "missing.path");
        assert_eq!(doc, v(json!({"a": {"c": 2}, "list": [1, 3]})));
    }

    #[test]
    fn test_traverse_without_force_skips_missing() {
        let mut doc = v(json!({"a": 1}));
        let mut visited = 0;
        traverse(&mut doc, "x.y", false, &mut |_, _| visited += 1);
        assert_eq!(visited, 0);
        traverse(&mut doc, "x.y", true, &mut |_, _| visited += 1);
        assert_eq!(visited, 1);
    }
}
