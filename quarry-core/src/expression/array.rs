// src/expression/array.rs
//! Array expression operators

use super::{expect_array, named_args, pair_args, required, single_arg};
use crate::context::{Context, Env};
use crate::error::{QuarryError, Result};
use crate::registry::Operator;
use crate::value::Value;
use crate::value_utils::contains;

pub(crate) fn operators() -> Vec<(&'static str, Operator)> {
    vec![
        ("$arrayElemAt", Operator::expression(array_elem_at)),
        ("$concatArrays", Operator::expression(concat_arrays)),
        ("$filter", Operator::expression(filter)),
        ("$in", Operator::expression(in_array)),
        ("$indexOfArray", Operator::expression(index_of_array)),
        ("$isArray", Operator::expression(is_array)),
        ("$map", Operator::expression(map)),
        ("$range", Operator::expression(range)),
        ("$reduce", Operator::expression(reduce)),
        ("$reverseArray", Operator::expression(reverse_array)),
        ("$size", Operator::expression(size)),
        ("$slice", Operator::expression(slice)),
        ("$zip", Operator::expression(zip)),
    ]
}

fn integer(value: &Value, name: &str, what: &str) -> Result<i64> {
    value.as_i64().ok_or_else(|| {
        QuarryError::Validation(format!("{} {} must be an integer, got {}", name, what, value))
    })
}

/// Resolve a possibly negative position against `len`
fn position(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let i = if index < 0 { len + index } else { index };
    if i >= 0 && i < len {
        Some(i as usize)
    } else {
        None
    }
}

fn variable_name(map: &crate::value::Map, name: &str) -> Result<String> {
    match map.get("as") {
        None => Ok("this".to_string()),
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(other) => Err(QuarryError::Validation(format!(
            "{} 'as' must be a variable name, got {}",
            name, other
        ))),
    }
}

fn array_elem_at(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let (array, index) = pair_args(ctx, doc, expr, env, "$arrayElemAt")?;
    if array.is_nil() || index.is_nil() {
        return Ok(Value::Null);
    }
    let items = expect_array(&array, "$arrayElemAt")?;
    let index = integer(&index, "$arrayElemAt", "index")?;
    Ok(position(index, items.len())
        .map(|i| items[i].clone())
        .unwrap_or(Value::Undefined))
}

fn concat_arrays(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let values = ctx.evaluate_args(doc, expr, env)?;
    let mut out = Vec::new();
    for value in values {
        match value {
            v if v.is_nil() => return Ok(Value::Null),
            Value::Array(items) => out.extend(items),
            other => {
                return Err(QuarryError::TypeMismatch(format!(
                    "$concatArrays only supports arrays, got {}",
                    other.kind().as_str()
                )))
            }
        }
    }
    Ok(Value::Array(out))
}

fn filter(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let args = named_args(expr, "$filter")?;
    let input = ctx.evaluate(doc, required(args, "input", "$filter")?, env)?;
    let cond = required(args, "cond", "$filter")?;
    let var = variable_name(args, "$filter")?;
    let limit = match args.get("limit") {
        None => None,
        Some(l) => match ctx.evaluate(doc, l, env)? {
            Value::Null => None,
            v => Some(
                v.as_usize()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| QuarryError::Validation("$filter limit must be a positive integer".to_string()))?,
            ),
        },
    };
    if input.is_nil() {
        return Ok(Value::Null);
    }
    let items = expect_array(&input, "$filter")?;

    let mut out = Vec::new();
    for item in items {
        if limit.map(|l| out.len() >= l).unwrap_or(false) {
            break;
        }
        let scope = env.bind([(var.clone(), item.clone())]);
        if ctx.evaluate(doc, cond, &scope)?.is_truthy() {
            out.push(item.clone());
        }
    }
    Ok(Value::Array(out))
}

fn in_array(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let (needle, haystack) = pair_args(ctx, doc, expr, env, "$in")?;
    let items = expect_array(&haystack, "$in")?;
    Ok(Value::Bool(contains(items, &needle)))
}

fn index_of_array(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let values = ctx.evaluate_args(doc, expr, env)?;
    if !(2..=4).contains(&values.len()) {
        return Err(QuarryError::Validation(format!(
            "$indexOfArray takes 2 to 4 arguments, got {}",
            values.len()
        )));
    }
    if values[0].is_nil() {
        return Ok(Value::Null);
    }
    let items = expect_array(&values[0], "$indexOfArray")?;
    let start = match values.get(2) {
        Some(v) => integer(v, "$indexOfArray", "start")?.max(0) as usize,
        None => 0,
    };
    let end = match values.get(3) {
        Some(v) => (integer(v, "$indexOfArray", "end")?.max(0) as usize).min(items.len()),
        None => items.len(),
    };
    let found = (start..end).find(|&i| items[i] == values[1]);
    Ok(Value::from(found.map(|i| i as i64).unwrap_or(-1)))
}

fn is_array(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let value = single_arg(ctx, doc, expr, env, "$isArray")?;
    Ok(Value::Bool(value.is_array()))
}

fn map(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let args = named_args(expr, "$map")?;
    let input = ctx.evaluate(doc, required(args, "input", "$map")?, env)?;
    let body = required(args, "in", "$map")?;
    let var = variable_name(args, "$map")?;
    if input.is_nil() {
        return Ok(Value::Null);
    }
    let items = expect_array(&input, "$map")?;
    items
        .iter()
        .map(|item| {
            let scope = env.bind([(var.clone(), item.clone())]);
            ctx.evaluate(doc, body, &scope)
                .map(|v| if v.is_undefined() { Value::Null } else { v })
        })
        .collect::<Result<Vec<_>>>()
        .map(Value::Array)
}

fn range(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let values = ctx.evaluate_args(doc, expr, env)?;
    if !(2..=3).contains(&values.len()) {
        return Err(QuarryError::Validation(format!(
            "$range takes 2 or 3 arguments, got {}",
            values.len()
        )));
    }
    let start = integer(&values[0], "$range", "start")?;
    let end = integer(&values[1], "$range", "end")?;
    let step = match values.get(2) {
        Some(v) => integer(v, "$range", "step")?,
        None => 1,
    };
    if step == 0 {
        return Err(QuarryError::Validation("$range step cannot be 0".to_string()));
    }
    let mut out = Vec::new();
    let mut i = start;
    while (step > 0 && i < end) || (step < 0 && i > end) {
        out.push(Value::from(i));
        i += step;
    }
    Ok(Value::Array(out))
}

fn reduce(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let args = named_args(expr, "$reduce")?;
    let input = ctx.evaluate(doc, required(args, "input", "$reduce")?, env)?;
    let initial = ctx.evaluate(doc, required(args, "initialValue", "$reduce")?, env)?;
    let body = required(args, "in", "$reduce")?;
    if input.is_nil() {
        return Ok(Value::Null);
    }
    let items = expect_array(&input, "$reduce")?;
    let mut acc = initial;
    for item in items {
        let scope = env.bind([
            ("value".to_string(), acc),
            ("this".to_string(), item.clone()),
        ]);
        acc = ctx.evaluate(doc, body, &scope)?;
    }
    Ok(acc)
}

fn reverse_array(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let value = single_arg(ctx, doc, expr, env, "$reverseArray")?;
    if value.is_nil() {
        return Ok(Value::Null);
    }
    let mut items = expect_array(&value, "$reverseArray")?.clone();
    items.reverse();
    Ok(Value::Array(items))
}

fn size(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let value = single_arg(ctx, doc, expr, env, "$size")?;
    Ok(Value::from(expect_array(&value, "$size")?.len()))
}

fn slice(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let values = ctx.evaluate_args(doc, expr, env)?;
    if !(2..=3).contains(&values.len()) {
        return Err(QuarryError::Validation(format!(
            "$slice takes 2 or 3 arguments, got {}",
            values.len()
        )));
    }
    if values.iter().any(Value::is_nil) {
        return Ok(Value::Null);
    }
    let items = expect_array(&values[0], "$slice")?;
    let n = integer(&values[values.len() - 1], "$slice", "count")?;
    let skip = if values.len() == 3 {
        if n <= 0 {
            return Err(QuarryError::Validation(
                "$slice count must be positive when a position is given".to_string(),
            ));
        }
        Some(integer(&values[1], "$slice", "position")?)
    } else {
        None
    };
    Ok(Value::Array(slice_items(items, skip, n)))
}

/// Shared by the `$slice` expression and projection operators
///
/// With `skip` absent a negative `n` takes from the end.
pub(crate) fn slice_items(items: &[Value], skip: Option<i64>, n: i64) -> Vec<Value> {
    let len = items.len() as i64;
    let (start, end) = match skip {
        None if n < 0 => ((len + n).max(0), len),
        None => (0, n.min(len)),
        Some(pos) => {
            let start = if pos < 0 { (len + pos).max(0) } else { pos.min(len) };
            (start, (start + n).min(len))
        }
    };
    if start >= end {
        return Vec::new();
    }
    items[start as usize..end as usize].to_vec()
}

fn zip(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let args = named_args(expr, "$zip")?;
    let inputs = ctx.evaluate(doc, required(args, "inputs", "$zip")?, env)?;
    let longest = match args.get("useLongestLength") {
        Some(v) => ctx.evaluate(doc, v, env)?.as_bool().ok_or_else(|| {
            QuarryError::Validation("$zip useLongestLength must be a boolean".to_string())
        })?,
        None => false,
    };
    let inputs = expect_array(&inputs, "$zip")?;
    let mut arrays = Vec::with_capacity(inputs.len());
    for input in inputs {
        if input.is_nil() {
            return Ok(Value::Null);
        }
        arrays.push(expect_array(input, "$zip")?.clone());
    }
    let defaults = match args.get("defaults") {
        Some(d) => {
            if !longest {
                return Err(QuarryError::Validation(
                    "$zip defaults require useLongestLength".to_string(),
                ));
            }
            let d = ctx.evaluate(doc, d, env)?;
            let d = expect_array(&d, "$zip")?.clone();
            if d.len() != arrays.len() {
                return Err(QuarryError::Validation(
                    "$zip defaults must match the number of inputs".to_string(),
                ));
            }
            d
        }
        None => vec![Value::Null; arrays.len()],
    };

    let lengths = arrays.iter().map(Vec::len);
    let rows = if longest { lengths.max() } else { lengths.min() }.unwrap_or(0);
    let out = (0..rows)
        .map(|i| {
            Value::Array(
                arrays
                    .iter()
                    .zip(defaults.iter())
                    .map(|(arr, dflt)| arr.get(i).cloned().unwrap_or_else(|| dflt.clone()))
                    .collect(),
            )
        })
        .collect();
    Ok(Value::Array(out))
}
