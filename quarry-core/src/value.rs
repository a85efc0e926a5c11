// src/value.rs
//! Document value model
//!
//! `Value` is the tagged union every other module works on. It is a superset
//! of JSON: besides the six JSON kinds it carries `Undefined` (the result of
//! a missed path lookup), `Date`, `Regex` and `Function` (an opaque host
//! callback, used by `$where`).
//!
//! Equality follows the query language rather than Rust's float rules:
//! `NaN == NaN`, object key order is irrelevant, and values of different
//! kinds are never equal.

use crate::value_utils::canonical_string;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use indexmap::IndexMap;
use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

/// Ordered field map of an object value
pub type Map = IndexMap<String, Value>;

/// Opaque host predicate stored inside a value
#[derive(Clone)]
pub struct Callback(Arc<dyn Fn(&Value) -> bool + Send + Sync>);

impl Callback {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Callback(Arc::new(f))
    }

    pub fn call(&self, value: &Value) -> bool {
        (self.0)(value)
    }

    /// Two callbacks are the same only if they share one allocation
    pub fn ptr_eq(&self, other: &Callback) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callback({:p})", Arc::as_ptr(&self.0))
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Undefined,
    Bool(bool),
    Number(f64),
    String(String),
    Date(DateTime<Utc>),
    Regex { pattern: String, flags: String },
    Array(Vec<Value>),
    Object(Map),
    Function(Callback),
}

/// Canonical classification of a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Null,
    Undefined,
    Boolean,
    Number,
    String,
    Date,
    RegExp,
    Array,
    Object,
    Function,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Null => "null",
            Kind::Undefined => "undefined",
            Kind::Boolean => "boolean",
            Kind::Number => "number",
            Kind::String => "string",
            Kind::Date => "date",
            Kind::RegExp => "regexp",
            Kind::Array => "array",
            Kind::Object => "object",
            Kind::Function => "function",
        }
    }

    /// Rank in the cross-kind sort order
    pub(crate) fn sort_rank(&self) -> u8 {
        match self {
            Kind::Undefined => 0,
            Kind::Null => 1,
            Kind::Number => 2,
            Kind::String => 3,
            Kind::Object => 4,
            Kind::Array => 5,
            Kind::Boolean => 6,
            Kind::Date => 7,
            Kind::RegExp => 8,
            Kind::Function => 9,
        }
    }
}

// ── Classification ───────────────────────────────────────────────────────────

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Value::Null => Kind::Null,
            Value::Undefined => Kind::Undefined,
            Value::Bool(_) => Kind::Boolean,
            Value::Number(_) => Kind::Number,
            Value::String(_) => Kind::String,
            Value::Date(_) => Kind::Date,
            Value::Regex { .. } => Kind::RegExp,
            Value::Array(_) => Kind::Array,
            Value::Object(_) => Kind::Object,
            Value::Function(_) => Kind::Function,
        }
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Null | Value::Undefined)
    }

    #[inline]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    #[inline]
    pub fn is_number(&self) -> bool {
        matches!(self, Value::Number(_))
    }

    #[inline]
    pub fn is_string(&self) -> bool {
        matches!(self, Value::String(_))
    }

    #[inline]
    pub fn is_array(&self) -> bool {
        matches!(self, Value::Array(_))
    }

    #[inline]
    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    #[inline]
    pub fn is_regex(&self) -> bool {
        matches!(self, Value::Regex { .. })
    }

    /// Aggregation truthiness: false, null, undefined, 0 and NaN are falsy
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null | Value::Undefined => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            _ => true,
        }
    }

    /// BSON type alias of this value, classifying numbers by shape
    ///
    /// Numbers with a fractional part are `double`; integral numbers are
    /// `int` up to 2^31-1 in magnitude, `long` up to 2^63-1, `double` beyond.
    pub fn bson_type(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Undefined => "undefined",
            Value::Bool(_) => "bool",
            Value::Number(n) => number_type(*n),
            Value::String(_) => "string",
            Value::Date(_) => "date",
            Value::Regex { .. } => "regex",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Function(_) => "javascript",
        }
    }
}

fn number_type(n: f64) -> &'static str {
    if !n.is_finite() || n.fract() != 0.0 {
        "double"
    } else if n.abs() <= i32::MAX as f64 {
        "int"
    } else if n.abs() <= i64::MAX as f64 {
        "long"
    } else {
        "double"
    }
}

// ── Extraction ───────────────────────────────────────────────────────────────

impl Value {
    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Integral numbers only
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(n) if n.fract() == 0.0 && n.abs() <= i64::MAX as f64 => Some(*n as i64),
            _ => None,
        }
    }

    /// Non-negative integral numbers only
    pub fn as_usize(&self) -> Option<usize> {
        self.as_i64()
            .and_then(|n| if n >= 0 { Some(n as usize) } else { None })
    }

    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    #[inline]
    pub fn as_date(&self) -> Option<&DateTime<Utc>> {
        match self {
            Value::Date(d) => Some(d),
            _ => None,
        }
    }

    #[inline]
    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(arr) => Some(arr),
            _ => None,
        }
    }

    #[inline]
    pub fn as_array_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::Array(arr) => Some(arr),
            _ => None,
        }
    }

    #[inline]
    pub fn as_object(&self) -> Option<&Map> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    #[inline]
    pub fn as_object_mut(&mut self) -> Option<&mut Map> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Object field lookup; `None` for non-objects
    #[inline]
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(map) => map.get(key),
            _ => None,
        }
    }

    /// Single-key object `{"$op": arg}` split into its parts
    pub fn as_operator(&self) -> Option<(&str, &Value)> {
        match self {
            Value::Object(map) if map.len() == 1 => {
                let (key, arg) = map.iter().next()?;
                if key.starts_with('$') {
                    Some((key.as_str(), arg))
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

// ── Constructors ─────────────────────────────────────────────────────────────

impl Value {
    pub fn object() -> Self {
        Value::Object(Map::new())
    }

    pub fn regex(pattern: impl Into<String>, flags: impl Into<String>) -> Self {
        Value::Regex {
            pattern: pattern.into(),
            flags: flags.into(),
        }
    }

    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Value::Function(Callback::new(f))
    }

    /// Date from milliseconds since the Unix epoch
    pub fn date_from_millis(millis: i64) -> Option<Self> {
        Utc.timestamp_millis_opt(millis).single().map(Value::Date)
    }

    /// Stable grouping key: the canonical encoding of the value
    ///
    /// Two values share a key exactly when they are equal.
    pub fn hash_key(&self) -> String {
        canonical_string(self)
    }

    /// Convert back into plain JSON
    ///
    /// Dates become RFC 3339 strings, regexes `/pattern/flags`, integral
    /// numbers integers. Undefined fields are omitted from objects and become
    /// `null` elsewhere.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null | Value::Undefined | Value::Function(_) => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => number_to_json(*n),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Date(d) => {
                serde_json::Value::String(d.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            Value::Regex { pattern, flags } => {
                serde_json::Value::String(format!("/{}/{}", pattern, flags))
            }
            Value::Array(arr) => serde_json::Value::Array(arr.iter().map(Value::to_json).collect()),
            Value::Object(map) => serde_json::Value::Object(
                map.iter()
                    .filter(|(_, v)| !v.is_undefined())
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

fn number_to_json(n: f64) -> serde_json::Value {
    // 2^53: largest range where every integer is exact in f64
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

// ── From impls ───────────────────────────────────────────────────────────────

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl From<Map> for Value {
    fn from(m: Map) -> Self {
        Value::Object(m)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(d: DateTime<Utc>) -> Self {
        Value::Date(d)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(arr) => Value::Array(arr.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&serde_json::Value> for Value {
    fn from(json: &serde_json::Value) -> Self {
        Value::from(json.clone())
    }
}

// ── Equality ─────────────────────────────────────────────────────────────────

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        is_equal(self, other)
    }
}

/// Structural equality of two values
pub fn is_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Undefined, Value::Undefined) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x == y || (x.is_nan() && y.is_nan()),
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Date(x), Value::Date(y)) => x == y,
        (
            Value::Regex {
                pattern: p1,
                flags: f1,
            },
            Value::Regex {
                pattern: p2,
                flags: f2,
            },
        ) => p1 == p2 && f1 == f2,
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(l, r)| is_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(k, v)| y.get(k).map(|w| is_equal(v, w)).unwrap_or(false))
        }
        (Value::Function(x), Value::Function(y)) => x.ptr_eq(y),
        _ => false,
    }
}

// ── Display / serde ──────────────────────────────────────────────────────────

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from)
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
    fn test_nan_equals_nan() {
        assert_eq!(Value::Number(f64::NAN), Value::Number(f64::NAN));
        assert_ne!(Value::Number(f64::NAN), Value::Number(0.0));
    }

    #[test]
    fn test_array_equality_is_ordered() {
        assert_ne!(v(json!([1, 2])), v(json!([2, 1])));
        assert_eq!(v(json!([1, [2, 3]])), v(json!([1, [2, 3]])));
    }

    #[test]
    fn test_object_equality_ignores_key_order() {
        assert_eq!(v(json!({"a": 1, "b": 2})), v(json!({"b": 2, "a": 1})));
        assert_ne!(v(json!({"a": 1})), v(json!({"a": 1, "b": 2})));
    }

    #[test]
    fn test_cross_kind_never_equal() {
        assert_ne!(v(json!(1)), v(json!("1")));
        assert_ne!(Value::Null, Value::Undefined);
        assert_ne!(v(json!(0)), v(json!(false)));
    }

    #[test]
    fn test_function_identity() {
        let f = Value::function(|_| true);
        let g = Value::function(|_| true);
        assert_eq!(f, f.clone());
        assert_ne!(f, g);
    }

    #[test]
    fn test_bson_type_by_shape() {
        assert_eq!(Value::Number(1.5).bson_type(), "double");
        assert_eq!(Value::Number(42.0).bson_type(), "int");
        assert_eq!(Value::Number(3_000_000_000.0).bson_type(), "long");
        assert_eq!(Value::Number(1e30).bson_type(), "double");
        assert_eq!(Value::regex("a", "i").bson_type(), "regex");
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Number(0.0).is_truthy());
        assert!(!Value::Undefined.is_truthy());
        assert!(Value::String(String::new()).is_truthy());
        assert!(v(json!([])).is_truthy());
    }

    #[test]
    fn test_to_json_shapes() {
        let doc = v(json!({"a": 1, "b": 2.5, "c": [null]}));
        assert_eq!(doc.to_json(), json!({"a": 1, "b": 2.5, "c": [null]}));

        let mut map = Map::new();
        map.insert("gone".to_string(), Value::Undefined);
        map.insert("kept".to_string(), Value::Bool(true));
        assert_eq!(Value::Object(map).to_json(), json!({"kept": true}));

        let date = Value::date_from_millis(0).unwrap();
        assert_eq!(date.to_json(), json!("1970-01-01T00:00:00.000Z"));
    }

    #[test]
    fn test_clone_detaches() {
        let original = v(json!({"a": {"b": [1, 2]}}));
        let mut copy = original.clone();
        copy.as_object_mut()
            .unwrap()
            .insert("a".to_string(), Value::Null);
        assert_eq!(original, v(json!({"a": {"b": [1, 2]}})));
    }

    #[test]
    fn test_hash_key_matches_equality() {
        assert_eq!(
            v(json!({"a": 1, "b": 2})).hash_key(),
            v(json!({"b": 2, "a": 1})).hash_key()
        );
        assert_ne!(v(json!(1)).hash_key(), v(json!("1")).hash_key());
        assert_eq!(Value::Number(1.0).hash_key(), v(json!(1)).hash_key());
    }

    #[test]
    fn test_serde_round_trip() {
        let value: Value = serde_json::from_str(r#"{"x": [1, "two", true]}"#).unwrap();
        assert_eq!(value, v(json!({"x": [1, "two", true]})));
        assert_eq!(serde_json::to_string(&value).unwrap(), r#"{"x":[1,"two",true]}"#);
    }
}
