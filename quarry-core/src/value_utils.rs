//! Value utility functions shared across modules
//!
//! Comparison, canonical encoding and partitioning helpers used by the
//! query operators, accumulators and pipeline stages.

use crate::collation::Collator;
use crate::error::Result;
use crate::value::{Kind, Value};
use ahash::AHashSet;
use indexmap::IndexMap;
use std::cmp::Ordering;

/// Compare two values of the same comparable kind
///
/// Returns `Some(Ordering)` for number/number, string/string, bool/bool and
/// date/date; `None` for everything else, including NaN operands. Query
/// comparison operators (`$lt`, `$gte`, ...) never match across kinds.
///
/// # Examples
///
/// ```
/// use quarry_core::Value;
/// use std::cmp::Ordering;
/// use quarry_core::value_utils::compare_values;
///
/// assert_eq!(compare_values(&Value::from(10), &Value::from(5)), Some(Ordering::Greater));
/// assert_eq!(compare_values(&Value::from("a"), &Value::from(1)), None);
/// ```
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(n1), Value::Number(n2)) => n1.partial_cmp(n2),
        (Value::String(s1), Value::String(s2)) => Some(s1.cmp(s2)),
        (Value::Bool(b1), Value::Bool(b2)) => Some(b1.cmp(b2)),
        (Value::Date(d1), Value::Date(d2)) => Some(d1.cmp(d2)),
        _ => None,
    }
}

/// Total order over all values
///
/// Kinds rank Undefined < Null < Number < String < Object < Array < Bool <
/// Date < Regex < Function. NaN sorts below every other number. Strings go
/// through the collator when one is given.
pub fn sort_order(a: &Value, b: &Value, collator: Option<&dyn Collator>) -> Ordering {
    let (ka, kb) = (a.kind(), b.kind());
    if ka != kb {
        return ka.sort_rank().cmp(&kb.sort_rank());
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.is_nan(), y.is_nan()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        },
        (Value::String(x), Value::String(y)) => match collator {
            Some(c) => c.compare(x, y),
            None => x.cmp(y),
        },
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Date(x), Value::Date(y)) => x.cmp(y),
        (
            Value::Regex {
                pattern: p1,
                flags: f1,
            },
            Value::Regex {
                pattern: p2,
                flags: f2,
            },
        ) => p1.cmp(p2).then_with(|| f1.cmp(f2)),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = sort_order(l, r, collator);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            // Field by field: name first, then value
            for ((lk, lv), (rk, rv)) in x.iter().zip(y.iter()) {
                let ord = lk.cmp(rk).then_with(|| sort_order(lv, rv, collator));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => Ordering::Equal,
    }
}

/// Canonical string encoding of a value
///
/// Object keys are sorted and strings are JSON-escaped, so two values
/// produce the same encoding exactly when they are equal. Integral numbers
/// render without a fraction, which also folds `-0` into `0`.
///
/// # Examples
///
/// ```
/// use quarry_core::Value;
/// use quarry_core::value_utils::canonical_string;
/// use serde_json::json;
///
/// let v1 = Value::from(json!({"a": 1, "b": 2}));
/// let v2 = Value::from(json!({"b": 2, "a": 1}));
/// assert_eq!(canonical_string(&v1), canonical_string(&v2));
/// ```
pub fn canonical_string(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Undefined => out.push_str("undefined"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            if n.is_nan() {
                out.push_str("NaN");
            } else if n.fract() == 0.0 && n.abs() < 9.2e18 {
                out.push_str(&(*n as i64).to_string());
            } else {
                out.push_str(&format!("{:?}", n));
            }
        }
        Value::String(s) => write_escaped(s, out),
        Value::Date(d) => {
            out.push_str("Date(");
            out.push_str(&d.timestamp_millis().to_string());
            out.push(')');
        }
        Value::Regex { pattern, flags } => {
            out.push('/');
            out.push_str(pattern);
            out.push('/');
            out.push_str(flags);
        }
        Value::Array(arr) => {
            out.push('[');
            for (i, item) in arr.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut pairs: Vec<_> = map.iter().collect();
            pairs.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (k, v)) in pairs.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_escaped(k, out);
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
        Value::Function(f) => out.push_str(&format!("{:?}", f)),
    }
}

fn write_escaped(s: &str, out: &mut String) {
    out.push_str(&serde_json::Value::String(s.to_string()).to_string());
}

/// Partition items by key in first-seen key order
///
/// Members keep their input order. Keys are compared by canonical encoding,
/// so partitions coincide with value equality.
pub fn group_by<T, F>(items: Vec<T>, mut key_fn: F) -> Result<Vec<(Value, Vec<T>)>>
where
    F: FnMut(&T) -> Result<Value>,
{
    let mut groups: IndexMap<String, (Value, Vec<T>), ahash::RandomState> =
        IndexMap::with_hasher(ahash::RandomState::new());
    for item in items {
        let key = key_fn(&item)?;
        groups
            .entry(key.hash_key())
            .or_insert_with(|| (key, Vec::new()))
            .1
            .push(item);
    }
    Ok(groups.into_values().collect())
}

/// Remove duplicates, keeping the first occurrence
pub fn unique(values: Vec<Value>) -> Vec<Value> {
    let mut seen = AHashSet::new();
    values
        .into_iter()
        .filter(|v| seen.insert(v.hash_key()))
        .collect()
}

/// True when `haystack` holds a value equal to `needle`
pub fn contains(haystack: &[Value], needle: &Value) -> bool {
    haystack.iter().any(|v| v == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collation::{BasicCollator, CollationSpec};
    use serde_json::json;

    fn v(j: serde_json::Value) -> Value {
        Value::from(j)
    }

    #[test]
    fn test_compare_values_same_kind() {
        assert_eq!(compare_values(&v(json!(10)), &v(json!(5))), Some(Ordering::Greater));
        assert_eq!(compare_values(&v(json!("apple")), &v(json!("banana"))), Some(Ordering::Less));
        assert_eq!(compare_values(&v(json!(false)), &v(json!(true))), Some(Ordering::Less));
    }

    #[test]
    fn test_compare_values_incompatible() {
        assert_eq!(compare_values(&v(json!("string")), &v(json!(42))), None);
        assert_eq!(compare_values(&v(json!(true)), &v(json!(1))), None);
        assert_eq!(compare_values(&v(json!([1, 2])), &v(json!(1))), None);
        assert_eq!(compare_values(&Value::Number(f64::NAN), &v(json!(1))), None);
    }

    #[test]
    fn test_sort_order_ranks_kinds() {
        let mut values = vec![
            v(json!(true)),
            v(json!([1])),
            v(json!({"a": 1})),
            v(json!("s")),
            v(json!(3)),
            Value::Null,
            Value::Undefined,
        ];
        values.sort_by(|a, b| sort_order(a, b, None));
        assert_eq!(
            values.iter().map(|x| x.kind()).collect::<Vec<_>>(),
            vec![
                Kind::Undefined,
                Kind::Null,
                Kind::Number,
                Kind::String,
                Kind::Object,
                Kind::Array,
                Kind::Boolean,
            ]
        );
    }

    #[test]
    fn test_sort_order_arrays_and_nan() {
        assert_eq!(sort_order(&v(json!([1, 2])), &v(json!([1, 3])), None), Ordering::Less);
        assert_eq!(sort_order(&v(json!([1])), &v(json!([1, 0])), None), Ordering::Less);
        assert_eq!(
            sort_order(&Value::Number(f64::NAN), &v(json!(-1e300)), None),
            Ordering::Less
        );
    }

    #[test]
    fn test_sort_order_uses_collator() {
        let c = BasicCollator::new(CollationSpec::new("en").with_strength(1));
        assert_eq!(sort_order(&v(json!("b")), &v(json!("A")), None), Ordering::Greater);
        assert_eq!(sort_order(&v(json!("b")), &v(json!("A")), Some(&c)), Ordering::Greater);
        assert_eq!(sort_order(&v(json!("a")), &v(json!("B")), Some(&c)), Ordering::Less);
        assert_eq!(sort_order(&v(json!("a")), &v(json!("B")), None), Ordering::Greater);
    }

    #[test]
    fn test_canonical_string_object_key_order() {
        let v1 = v(json!({"a": 1, "b": 2}));
        let v2 = v(json!({"b": 2, "a": 1}));
        assert_eq!(canonical_string(&v1), canonical_string(&v2));
        assert_eq!(canonical_string(&v1), r#"{"a":1,"b":2}"#);
    }

    #[test]
    fn test_canonical_string_distinguishes_kinds() {
        assert_ne!(canonical_string(&v(json!("1"))), canonical_string(&v(json!(1))));
        assert_ne!(canonical_string(&Value::Null), canonical_string(&Value::Undefined));
        assert_ne!(
            canonical_string(&v(json!("/a/i"))),
            canonical_string(&Value::regex("a", "i"))
        );
        assert_eq!(canonical_string(&Value::Number(-0.0)), "0");
        assert_eq!(canonical_string(&v(json!(3.14))), "3.14");
    }

    #[test]
    fn test_canonical_string_escapes_keys() {
        let tricky = v(json!({"a\",\"b": 1}));
        let plain = v(json!({"a": 1, "b": 1}));
        assert_ne!(canonical_string(&tricky), canonical_string(&plain));
    }

    #[test]
    fn test_group_by_first_seen_order() {
        let items = vec![v(json!(2)), v(json!(1)), v(json!(2)), v(json!(3)), v(json!(1))];
        let groups = group_by(items, |x| Ok(x.clone())).unwrap();
        let keys: Vec<_> = groups.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![v(json!(2)), v(json!(1)), v(json!(3))]);
        assert_eq!(groups[0].1.len(), 2);
    }

    #[test]
    fn test_unique_keeps_first() {
        let values = vec![v(json!({"a": 1, "b": 2})), v(json!(1)), v(json!({"b": 2, "a": 1}))];
        let out = unique(values);
        assert_eq!(out.len(), 2);
    }
}
