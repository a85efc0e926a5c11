// src/expression/object.rs
//! Object expression operators

use super::single_arg;
use crate::context::{Context, Env};
use crate::error::{QuarryError, Result};
use crate::registry::Operator;
use crate::value::{Map, Value};

pub(crate) fn operators() -> Vec<(&'static str, Operator)> {
    vec![
        ("$mergeObjects", Operator::expression(merge_objects)),
        ("$objectToArray", Operator::expression(object_to_array)),
        ("$arrayToObject", Operator::expression(array_to_object)),
    ]
}

/// Shallow merge, later fields win; nil operands are skipped
pub(crate) fn merge_all<'v>(objects: impl IntoIterator<Item = &'v Value>) -> Result<Value> {
    let mut out = Map::new();
    for value in objects {
        match value {
            v if v.is_nil() => {}
            Value::Object(map) => {
                for (k, v) in map {
                    out.insert(k.clone(), v.clone());
                }
            }
            other => {
                return Err(QuarryError::TypeMismatch(format!(
                    "$mergeObjects requires object inputs, got {}",
                    other.kind().as_str()
                )))
            }
        }
    }
    Ok(Value::Object(out))
}

fn merge_objects(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let values = ctx.evaluate_args(doc, expr, env)?;
    // A single operand that is an array merges its elements
    if let [Value::Array(items)] = values.as_slice() {
        return merge_all(items);
    }
    merge_all(&values)
}

fn object_to_array(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let value = single_arg(ctx, doc, expr, env, "$objectToArray")?;
    if value.is_nil() {
        return Ok(Value::Null);
    }
    let map = value.as_object().ok_or_else(|| {
        QuarryError::TypeMismatch(format!(
            "$objectToArray requires a document input, got {}",
            value.kind().as_str()
        ))
    })?;
    let pairs = map
        .iter()
        .map(|(k, v)| {
            let mut pair = Map::new();
            pair.insert("k".to_string(), Value::String(k.clone()));
            pair.insert("v".to_string(), v.clone());
            Value::Object(pair)
        })
        .collect();
    Ok(Value::Array(pairs))
}

fn array_to_object(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let value = single_arg(ctx, doc, expr, env, "$arrayToObject")?;
    if value.is_nil() {
        return Ok(Value::Null);
    }
    let items = super::expect_array(&value, "$arrayToObject")?;
    let mut out = Map::new();
    for item in items {
        let (key, val) = match item {
            Value::Array(pair) if pair.len() == 2 => (&pair[0], &pair[1]),
            Value::Object(map) if map.len() == 2 => match (map.get("k"), map.get("v")) {
                (Some(k), Some(v)) => (k, v),
                _ => return Err(invalid_pair()),
            },
            _ => return Err(invalid_pair()),
        };
        let key = key.as_str().ok_or_else(invalid_pair)?;
        out.insert(key.to_string(), val.clone());
    }
    Ok(Value::Object(out))
}

fn invalid_pair() -> QuarryError {
    QuarryError::Validation(
        "$arrayToObject requires [key, value] pairs or {k, v} documents with string keys".to_string(),
    )
}
