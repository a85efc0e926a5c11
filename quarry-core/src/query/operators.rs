// src/query/operators.rs
//! Built-in query operators
//!
//! Each operator is a unit struct implementing [`QueryOperator`]. The
//! predicate compiler resolves the field path once and hands every operator
//! the [`Resolved`] left-hand side, so array semantics live here:
//!
//! ```text
//! Resolved::Value(v)      v, plus the elements of v when v is an array
//! Resolved::Multi(vs)     every element of vs, and their elements in turn
//! Resolved::Missing       nothing (only $exists, $ne, $nin, $not and
//!                         $eq: null can still succeed)
//! ```

use crate::context::Context;
use crate::error::{QuarryError, Result};
use crate::path::Resolved;
use crate::query::{test_operators, Predicate};
use crate::registry::{Operator, QueryOperator};
use crate::value::Value;
use crate::value_utils::{compare_values, contains};
use lazy_static::lazy_static;
use lru::LruCache;
use parking_lot::Mutex;
use regex::Regex;
use std::cmp::Ordering;
use std::num::NonZeroUsize;
use std::sync::Arc;

// ============================================================================
// REGEX WITH OPTIONS SUPPORT
// ============================================================================

const REGEX_CACHE_SIZE: usize = 100;

lazy_static! {
    /// Compiled patterns keyed by "pattern:flags"
    static ref REGEX_CACHE: Mutex<LruCache<String, Regex>> = Mutex::new(LruCache::new(
        NonZeroUsize::new(REGEX_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN)
    ));
}

/// Build a regex pattern string with query-language flags
///
/// `i`, `m`, `s` and `x` become inline flags; anything else (`g`, `u`) has no
/// meaning for a single match and is dropped.
fn build_regex_pattern(pattern: &str, flags: &str) -> String {
    let mut regex_str = String::new();

    let valid_flags: String = flags
        .chars()
        .filter(|c| matches!(c, 'i' | 'm' | 's' | 'x'))
        .collect();

    if !valid_flags.is_empty() {
        regex_str.push_str("(?");
        regex_str.push_str(&valid_flags);
        regex_str.push(')');
    }

    regex_str.push_str(pattern);
    regex_str
}

/// Get or compile a regex with caching
///
/// Shared by `$regex` and the `$regexMatch` expression operator.
pub(crate) fn get_or_compile_regex(pattern: &str, flags: &str) -> Result<Regex> {
    let cache_key = format!("{}:{}", pattern, flags);

    if let Some(regex) = REGEX_CACHE.lock().get(&cache_key) {
        return Ok(regex.clone());
    }

    let regex = Regex::new(&build_regex_pattern(pattern, flags)).map_err(|e| {
        QuarryError::Validation(format!("Invalid regex pattern '{}': {}", pattern, e))
    })?;

    REGEX_CACHE.lock().put(cache_key, regex.clone());
    Ok(regex)
}

fn regex_parts(filter_value: &Value) -> Result<(&str, &str)> {
    match filter_value {
        Value::Regex { pattern, flags } => Ok((pattern.as_str(), flags.as_str())),
        Value::String(pattern) => Ok((pattern.as_str(), "")),
        other => Err(QuarryError::Validation(format!(
            "$regex requires a pattern, got {}",
            other.kind().as_str()
        ))),
    }
}

// ============================================================================
// LEFT-HAND SIDE HELPERS
// ============================================================================

/// The resolved values an operator is tried against
fn candidates(doc_value: &Resolved) -> &[Value] {
    match doc_value {
        Resolved::Missing => &[],
        Resolved::Value(v) => std::slice::from_ref(v),
        Resolved::Multi(vs) => vs,
    }
}

/// Candidates followed by the elements of any array candidate
fn flattened(doc_value: &Resolved) -> Vec<&Value> {
    let mut out = Vec::new();
    for value in candidates(doc_value) {
        out.push(value);
        if let Value::Array(items) = value {
            out.extend(items.iter());
        }
    }
    out
}

/// Equality with containment: any candidate equals `target` or is an array
/// holding it. A nil target also matches a missing field.
fn equals_any(doc_value: &Resolved, target: &Value) -> bool {
    if target.is_nil() {
        return doc_value.is_missing() || flattened(doc_value).iter().any(|v| v.is_nil());
    }
    candidates(doc_value).iter().any(|v| {
        v == target
            || v
                .as_array()
                .map(|items| contains(items, target))
                .unwrap_or(false)
    })
}

fn regex_matches_any(doc_value: &Resolved, pattern: &str, flags: &str) -> Result<bool> {
    let regex = get_or_compile_regex(pattern, flags)?;
    Ok(flattened(doc_value)
        .iter()
        .any(|v| v.as_str().map(|s| regex.is_match(s)).unwrap_or(false)))
}

fn compare_same_kind(ctx: &Context<'_>, a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b, ctx.collator()) {
        (Value::String(x), Value::String(y), Some(collator)) => Some(collator.compare(x, y)),
        _ => compare_values(a, b),
    }
}

/// Shared body of `$gt`, `$gte`, `$lt` and `$lte`
fn compare_with_predicate<F>(
    ctx: &Context<'_>,
    doc_value: &Resolved,
    filter_value: &Value,
    predicate: F,
) -> bool
where
    F: Fn(Ordering) -> bool,
{
    flattened(doc_value).iter().any(|v| {
        compare_same_kind(ctx, v, filter_value)
            .map(&predicate)
            .unwrap_or(false)
    })
}

fn require_array<'v>(filter_value: &'v Value, name: &str) -> Result<&'v Vec<Value>> {
    filter_value.as_array().ok_or_else(|| {
        QuarryError::Validation(format!("{} operator requires an array", name))
    })
}

// ============================================================================
// COMPARISON OPERATORS
// ============================================================================

/// `$eq`: structural equality, element containment on arrays
pub struct EqOperator;

impl QueryOperator for EqOperator {
    fn matches(
        &self,
        _ctx: &Context<'_>,
        doc_value: &Resolved,
        filter_value: &Value,
        _document: &Value,
    ) -> Result<bool> {
        Ok(equals_any(doc_value, filter_value))
    }
}

/// `$ne`: negated `$eq`; true when the field is missing
pub struct NeOperator;

impl QueryOperator for NeOperator {
    fn matches(
        &self,
        _ctx: &Context<'_>,
        doc_value: &Resolved,
        filter_value: &Value,
        _document: &Value,
    ) -> Result<bool> {
        Ok(!equals_any(doc_value, filter_value))
    }
}

pub struct GtOperator;

impl QueryOperator for GtOperator {
    fn matches(
        &self,
        ctx: &Context<'_>,
        doc_value: &Resolved,
        filter_value: &Value,
        _document: &Value,
    ) -> Result<bool> {
        Ok(compare_with_predicate(ctx, doc_value, filter_value, |ord| {
            ord == Ordering::Greater
        }))
    }
}

pub struct GteOperator;

impl QueryOperator for GteOperator {
    fn matches(
        &self,
        ctx: &Context<'_>,
        doc_value: &Resolved,
        filter_value: &Value,
        _document: &Value,
    ) -> Result<bool> {
        Ok(compare_with_predicate(ctx, doc_value, filter_value, |ord| {
            matches!(ord, Ordering::Greater | Ordering::Equal)
        }))
    }
}

pub struct LtOperator;

impl QueryOperator for LtOperator {
    fn matches(
        &self,
        ctx: &Context<'_>,
        doc_value: &Resolved,
        filter_value: &Value,
        _document: &Value,
    ) -> Result<bool> {
        Ok(compare_with_predicate(ctx, doc_value, filter_value, |ord| {
            ord == Ordering::Less
        }))
    }
}

pub struct LteOperator;

impl QueryOperator for LteOperator {
    fn matches(
        &self,
        ctx: &Context<'_>,
        doc_value: &Resolved,
        filter_value: &Value,
        _document: &Value,
    ) -> Result<bool> {
        Ok(compare_with_predicate(ctx, doc_value, filter_value, |ord| {
            matches!(ord, Ordering::Less | Ordering::Equal)
        }))
    }
}

// ============================================================================
// ARRAY OPERATORS
// ============================================================================

fn in_matches(doc_value: &Resolved, options: &[Value]) -> Result<bool> {
    for option in options {
        let hit = match option {
            Value::Regex { pattern, flags } => regex_matches_any(doc_value, pattern, flags)?,
            other => equals_any(doc_value, other),
        };
        if hit {
            return Ok(true);
        }
    }
    Ok(false)
}

/// `$in`: any candidate equals one of the listed values (regexes match
/// strings)
pub struct InOperator;

impl QueryOperator for InOperator {
    fn matches(
        &self,
        _ctx: &Context<'_>,
        doc_value: &Resolved,
        filter_value: &Value,
        _document: &Value,
    ) -> Result<bool> {
        let options = require_array(filter_value, "$in")?;
        in_matches(doc_value, options)
    }
}

/// `$nin`: negated `$in`; true when the field is missing
pub struct NinOperator;

impl QueryOperator for NinOperator {
    fn matches(
        &self,
        _ctx: &Context<'_>,
        doc_value: &Resolved,
        filter_value: &Value,
        _document: &Value,
    ) -> Result<bool> {
        let options = require_array(filter_value, "$nin")?;
        if doc_value.is_missing() {
            return Ok(true);
        }
        Ok(!in_matches(doc_value, options)?)
    }
}

/// `$all`: every listed value is present; `{$elemMatch: q}` entries need one
/// matching element
pub struct AllOperator;

impl QueryOperator for AllOperator {
    fn matches(
        &self,
        ctx: &Context<'_>,
        doc_value: &Resolved,
        filter_value: &Value,
        document: &Value,
    ) -> Result<bool> {
        let required = require_array(filter_value, "$all")?;
        if doc_value.is_missing() || required.is_empty() {
            return Ok(false);
        }
        for item in required {
            let found = match item.as_operator() {
                Some(("$elemMatch", query)) => {
                    ElemMatchOperator.matches(ctx, doc_value, query, document)?
                }
                _ => equals_any(doc_value, item),
            };
            if !found {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// `$size`: an array candidate has exactly this many elements
pub struct SizeOperator;

impl QueryOperator for SizeOperator {
    fn matches(
        &self,
        _ctx: &Context<'_>,
        doc_value: &Resolved,
        filter_value: &Value,
        _document: &Value,
    ) -> Result<bool> {
        let size = filter_value.as_usize().ok_or_else(|| {
            QuarryError::Validation("$size requires a non-negative integer".to_string())
        })?;
        Ok(candidates(doc_value)
            .iter()
            .any(|v| v.as_array().map(|items| items.len() == size).unwrap_or(false)))
    }
}

/// `$elemMatch`: one array element satisfies the whole nested condition
///
/// `{$elemMatch: {$gte: 80, $lt: 85}}` tests each element as a value;
/// `{$elemMatch: {qty: {$gt: 5}}}` runs a nested query against each object
/// element.
pub struct ElemMatchOperator;

const LOGICAL_KEYS: [&str; 6] = ["$and", "$or", "$nor", "$where", "$expr", "$comment"];

impl QueryOperator for ElemMatchOperator {
    fn matches(
        &self,
        ctx: &Context<'_>,
        doc_value: &Resolved,
        filter_value: &Value,
        document: &Value,
    ) -> Result<bool> {
        let spec = filter_value.as_object().ok_or_else(|| {
            QuarryError::Validation("$elemMatch requires an object".to_string())
        })?;

        let elements: Vec<&Value> = candidates(doc_value)
            .iter()
            .filter_map(|v| v.as_array())
            .flatten()
            .collect();
        if elements.is_empty() {
            return Ok(false);
        }

        let value_form = !spec.is_empty()
            && spec
                .keys()
                .all(|k| k.starts_with('$') && !LOGICAL_KEYS.contains(&k.as_str()));

        if value_form {
            let ops = crate::query::normalize_operators(spec)?;
            for element in elements {
                let resolved = Resolved::Value(element.clone());
                if test_operators(ctx, &resolved, &ops, document)? {
                    return Ok(true);
                }
            }
            return Ok(false);
        }

        let nested = Predicate::compile(ctx, filter_value)?;
        for element in elements.into_iter().filter(|e| e.is_object()) {
            if nested.test(ctx, element)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

// ============================================================================
// ELEMENT OPERATORS
// ============================================================================

/// `$exists`: presence of the field (true/1) or its absence (false/0)
pub struct ExistsOperator;

impl QueryOperator for ExistsOperator {
    fn matches(
        &self,
        _ctx: &Context<'_>,
        doc_value: &Resolved,
        filter_value: &Value,
        _document: &Value,
    ) -> Result<bool> {
        let want = match filter_value {
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            _ => {
                return Err(QuarryError::Validation(
                    "$exists requires a boolean".to_string(),
                ))
            }
        };
        let present = match doc_value {
            Resolved::Missing => false,
            Resolved::Value(v) => !v.is_undefined(),
            Resolved::Multi(_) => true,
        };
        Ok(present == want)
    }
}

/// Type alias for a numeric BSON type code
fn type_alias(code: i64) -> Option<&'static str> {
    match code {
        1 => Some("double"),
        2 => Some("string"),
        3 => Some("object"),
        4 => Some("array"),
        6 => Some("undefined"),
        8 => Some("bool"),
        9 => Some("date"),
        10 => Some("null"),
        11 => Some("regex"),
        13 => Some("javascript"),
        16 => Some("int"),
        18 => Some("long"),
        _ => None,
    }
}

const TYPE_ALIASES: [&str; 13] = [
    "double",
    "string",
    "object",
    "array",
    "undefined",
    "bool",
    "date",
    "null",
    "regex",
    "javascript",
    "int",
    "long",
    "number",
];

fn parse_type(spec: &Value) -> Result<&'static str> {
    let alias = match spec {
        Value::String(s) => TYPE_ALIASES.iter().find(|a| **a == s.as_str()).copied(),
        Value::Number(_) => spec.as_i64().and_then(type_alias),
        _ => None,
    };
    alias.ok_or_else(|| QuarryError::Validation(format!("$type: unknown type {}", spec)))
}

fn has_type(value: &Value, alias: &str) -> bool {
    if alias == "number" {
        value.is_number()
    } else {
        value.bson_type() == alias
    }
}

/// `$type`: a candidate (or array element) has one of the given types
pub struct TypeOperator;

impl QueryOperator for TypeOperator {
    fn matches(
        &self,
        _ctx: &Context<'_>,
        doc_value: &Resolved,
        filter_value: &Value,
        _document: &Value,
    ) -> Result<bool> {
        let aliases = match filter_value {
            Value::Array(specs) => specs.iter().map(parse_type).collect::<Result<Vec<_>>>()?,
            single => vec![parse_type(single)?],
        };
        Ok(flattened(doc_value)
            .iter()
            .any(|v| aliases.iter().any(|alias| has_type(v, alias))))
    }
}

// ============================================================================
// EVALUATION OPERATORS
// ============================================================================

/// `$mod`: `[divisor, remainder]` over numeric candidates, truncating both
pub struct ModOperator;

impl QueryOperator for ModOperator {
    fn matches(
        &self,
        _ctx: &Context<'_>,
        doc_value: &Resolved,
        filter_value: &Value,
        _document: &Value,
    ) -> Result<bool> {
        let args = require_array(filter_value, "$mod")?;
        let (divisor, remainder) = match args.as_slice() {
            [Value::Number(d), Value::Number(r)] => (d.trunc(), r.trunc()),
            _ => {
                return Err(QuarryError::Validation(
                    "$mod requires [divisor, remainder]".to_string(),
                ))
            }
        };
        if divisor == 0.0 {
            return Err(QuarryError::Validation("$mod divisor cannot be 0".to_string()));
        }
        Ok(flattened(doc_value).iter().any(|v| {
            v.as_f64()
                .map(|n| n.is_finite() && n.trunc() % divisor == remainder)
                .unwrap_or(false)
        }))
    }
}

/// `$regex`: any string candidate matches
pub struct RegexOperator;

impl QueryOperator for RegexOperator {
    fn matches(
        &self,
        _ctx: &Context<'_>,
        doc_value: &Resolved,
        filter_value: &Value,
        _document: &Value,
    ) -> Result<bool> {
        let (pattern, flags) = regex_parts(filter_value)?;
        regex_matches_any(doc_value, pattern, flags)
    }
}

// ============================================================================
// LOGICAL OPERATORS
// ============================================================================

/// `$not`: negates an operator object or a regex
pub struct NotOperator;

impl QueryOperator for NotOperator {
    fn matches(
        &self,
        ctx: &Context<'_>,
        doc_value: &Resolved,
        filter_value: &Value,
        document: &Value,
    ) -> Result<bool> {
        match filter_value {
            Value::Regex { pattern, flags } => Ok(!regex_matches_any(doc_value, pattern, flags)?),
            Value::Object(spec) if !spec.is_empty() && spec.keys().all(|k| k.starts_with('$')) => {
                let ops = crate::query::normalize_operators(spec)?;
                Ok(!test_operators(ctx, doc_value, &ops, document)?)
            }
            _ => Err(QuarryError::Validation(
                "$not requires an operator object or a regex".to_string(),
            )),
        }
    }
}

// ============================================================================
// BUILT-IN TABLE
// ============================================================================

pub(crate) fn builtin() -> Vec<(&'static str, Operator)> {
    vec![
        ("$eq", Operator::Query(Arc::new(EqOperator))),
        ("$ne", Operator::Query(Arc::new(NeOperator))),
        ("$gt", Operator::Query(Arc::new(GtOperator))),
        ("$gte", Operator::Query(Arc::new(GteOperator))),
        ("$lt", Operator::Query(Arc::new(LtOperator))),
        ("$lte", Operator::Query(Arc::new(LteOperator))),
        ("$in", Operator::Query(Arc::new(InOperator))),
        ("$nin", Operator::Query(Arc::new(NinOperator))),
        ("$all", Operator::Query(Arc::new(AllOperator))),
        ("$size", Operator::Query(Arc::new(SizeOperator))),
        ("$elemMatch", Operator::Query(Arc::new(ElemMatchOperator))),
        ("$exists", Operator::Query(Arc::new(ExistsOperator))),
        ("$type", Operator::Query(Arc::new(TypeOperator))),
        ("$mod", Operator::Query(Arc::new(ModOperator))),
        ("$regex", Operator::Query(Arc::new(RegexOperator))),
        ("$not", Operator::Query(Arc::new(NotOperator))),
    ]
}
