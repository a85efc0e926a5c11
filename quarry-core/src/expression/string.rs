// src/expression/string.rs
//! String expression operators
//!
//! Byte-based operators (`$substrBytes`, `$indexOfBytes`, `$strLenBytes`)
//! count UTF-8 bytes; the `CP` variants count code points.

use super::{expect_string, named_args, pair_args, required, single_arg};
use crate::context::{Context, Env};
use crate::error::{QuarryError, Result};
use crate::query::operators::get_or_compile_regex;
use crate::registry::Operator;
use crate::value::Value;
use std::cmp::Ordering;

pub(crate) fn operators() -> Vec<(&'static str, Operator)> {
    vec![
        ("$concat", Operator::expression(concat)),
        ("$indexOfBytes", Operator::expression(index_of_bytes)),
        ("$ltrim", Operator::expression(ltrim)),
        ("$regexMatch", Operator::expression(regex_match)),
        ("$rtrim", Operator::expression(rtrim)),
        ("$split", Operator::expression(split)),
        ("$strcasecmp", Operator::expression(strcasecmp)),
        ("$strLenBytes", Operator::expression(str_len_bytes)),
        ("$strLenCP", Operator::expression(str_len_cp)),
        ("$substr", Operator::expression(substr_bytes)),
        ("$substrBytes", Operator::expression(substr_bytes)),
        ("$substrCP", Operator::expression(substr_cp)),
        ("$toLower", Operator::expression(to_lower)),
        ("$toUpper", Operator::expression(to_upper)),
        ("$trim", Operator::expression(trim)),
    ]
}

/// Nil coerces to the empty string, numbers to their JSON text
fn coerce_string(value: &Value, name: &str) -> Result<String> {
    match value {
        v if v.is_nil() => Ok(String::new()),
        Value::String(s) => Ok(s.clone()),
        Value::Number(_) | Value::Date(_) => {
            Ok(value.to_json().as_str().map(str::to_string).unwrap_or_else(|| value.to_string()))
        }
        other => Err(QuarryError::TypeMismatch(format!(
            "{} requires a string argument, got {}",
            name,
            other.kind().as_str()
        ))),
    }
}

fn int_arg(value: &Value, name: &str) -> Result<i64> {
    value.as_i64().ok_or_else(|| {
        QuarryError::Validation(format!("{} requires integer arguments, got {}", name, value))
    })
}

fn concat(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let values = ctx.evaluate_args(doc, expr, env)?;
    let mut out = String::new();
    for value in &values {
        if value.is_nil() {
            return Ok(Value::Null);
        }
        out.push_str(expect_string(value, "$concat")?);
    }
    Ok(Value::String(out))
}

fn index_of_bytes(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let values = ctx.evaluate_args(doc, expr, env)?;
    if !(2..=4).contains(&values.len()) {
        return Err(QuarryError::Validation(format!(
            "$indexOfBytes takes 2 to 4 arguments, got {}",
            values.len()
        )));
    }
    if values[0].is_nil() {
        return Ok(Value::Null);
    }
    let haystack = expect_string(&values[0], "$indexOfBytes")?;
    let needle = expect_string(&values[1], "$indexOfBytes")?;
    let start = match values.get(2) {
        Some(v) => int_arg(v, "$indexOfBytes")?.max(0) as usize,
        None => 0,
    };
    let end = match values.get(3) {
        Some(v) => (int_arg(v, "$indexOfBytes")?.max(0) as usize).min(haystack.len()),
        None => haystack.len(),
    };
    if start > end {
        return Ok(Value::from(-1));
    }
    let window = &haystack.as_bytes()[start..end];
    let found = window
        .windows(needle.len().max(1))
        .position(|w| w == needle.as_bytes())
        .map(|i| (i + start) as i64);
    let found = if needle.is_empty() { Some(start as i64) } else { found };
    Ok(Value::from(found.unwrap_or(-1)))
}

enum TrimSide {
    Start,
    End,
    Both,
}

fn trim_impl(
    ctx: &Context<'_>,
    doc: &Value,
    expr: &Value,
    env: &Env<'_>,
    name: &str,
    side: TrimSide,
) -> Result<Value> {
    let args = named_args(expr, name)?;
    let input = ctx.evaluate(doc, required(args, "input", name)?, env)?;
    let chars = match args.get("chars") {
        Some(c) => Some(ctx.evaluate(doc, c, env)?),
        None => None,
    };
    if input.is_nil() {
        return Ok(Value::Null);
    }
    let input = expect_string(&input, name)?;
    let set: Option<Vec<char>> = match &chars {
        None => None,
        Some(v) if v.is_nil() => return Ok(Value::Null),
        Some(v) => Some(expect_string(v, name)?.chars().collect()),
    };
    let strip = |c: char| match &set {
        Some(set) => set.contains(&c),
        None => c.is_whitespace(),
    };
    let out = match side {
        TrimSide::Start => input.trim_start_matches(strip),
        TrimSide::End => input.trim_end_matches(strip),
        TrimSide::Both => input.trim_matches(strip),
    };
    Ok(Value::String(out.to_string()))
}

fn ltrim(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    trim_impl(ctx, doc, expr, env, "$ltrim", TrimSide::Start)
}

fn rtrim(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    trim_impl(ctx, doc, expr, env, "$rtrim", TrimSide::End)
}

fn trim(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    trim_impl(ctx, doc, expr, env, "$trim", TrimSide::Both)
}

fn regex_match(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let args = named_args(expr, "$regexMatch")?;
    let input = ctx.evaluate(doc, required(args, "input", "$regexMatch")?, env)?;
    let regex = ctx.evaluate(doc, required(args, "regex", "$regexMatch")?, env)?;
    let options = match args.get("options") {
        Some(o) => ctx.evaluate(doc, o, env)?.as_str().unwrap_or_default().to_string(),
        None => String::new(),
    };
    let (pattern, flags) = match &regex {
        Value::Regex { pattern, flags } => (pattern.clone(), format!("{}{}", flags, options)),
        Value::String(s) => (s.clone(), options),
        v if v.is_nil() => return Ok(Value::Bool(false)),
        other => {
            return Err(QuarryError::TypeMismatch(format!(
                "$regexMatch needs a string or regex, got {}",
                other.kind().as_str()
            )))
        }
    };
    let Some(text) = input.as_str() else {
        if input.is_nil() {
            return Ok(Value::Bool(false));
        }
        return Err(QuarryError::TypeMismatch(
            "$regexMatch needs a string input".to_string(),
        ));
    };
    Ok(Value::Bool(get_or_compile_regex(&pattern, &flags)?.is_match(text)))
}

fn split(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let (input, delimiter) = pair_args(ctx, doc, expr, env, "$split")?;
    if input.is_nil() {
        return Ok(Value::Null);
    }
    let input = expect_string(&input, "$split")?;
    let delimiter = expect_string(&delimiter, "$split")?;
    if delimiter.is_empty() {
        return Err(QuarryError::Validation(
            "$split requires a non-empty separator".to_string(),
        ));
    }
    Ok(Value::Array(
        input.split(delimiter).map(Value::from).collect(),
    ))
}

fn strcasecmp(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let (a, b) = pair_args(ctx, doc, expr, env, "$strcasecmp")?;
    let a = coerce_string(&a, "$strcasecmp")?.to_uppercase();
    let b = coerce_string(&b, "$strcasecmp")?.to_uppercase();
    Ok(Value::from(match a.cmp(&b) {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }))
}

fn str_len_bytes(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let value = single_arg(ctx, doc, expr, env, "$strLenBytes")?;
    Ok(Value::from(expect_string(&value, "$strLenBytes")?.len()))
}

fn str_len_cp(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let value = single_arg(ctx, doc, expr, env, "$strLenCP")?;
    Ok(Value::from(expect_string(&value, "$strLenCP")?.chars().count()))
}

fn substr_args(
    ctx: &Context<'_>,
    doc: &Value,
    expr: &Value,
    env: &Env<'_>,
    name: &str,
) -> Result<(String, i64, i64)> {
    let values = super::fixed_args(ctx, doc, expr, env, name, 3)?;
    let input = coerce_string(&values[0], name)?;
    Ok((input, int_arg(&values[1], name)?, int_arg(&values[2], name)?))
}

fn substr_bytes(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let (input, start, len) = substr_args(ctx, doc, expr, env, "$substrBytes")?;
    let total = input.len();
    let start = (start.max(0) as usize).min(total);
    let end = if len < 0 {
        total
    } else {
        start.saturating_add(len as usize).min(total)
    };
    input
        .get(start..end)
        .map(Value::from)
        .ok_or_else(|| {
            QuarryError::Validation(
                "$substrBytes: invalid range, ending index is in the middle of a UTF-8 character"
                    .to_string(),
            )
        })
}

fn substr_cp(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let (input, start, len) = substr_args(ctx, doc, expr, env, "$substrCP")?;
    if start < 0 || len < 0 {
        return Err(QuarryError::Validation(
            "$substrCP requires non-negative start and length".to_string(),
        ));
    }
    let out: String = input
        .chars()
        .skip(start as usize)
        .take(len as usize)
        .collect();
    Ok(Value::String(out))
}

fn to_lower(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let value = single_arg(ctx, doc, expr, env, "$toLower")?;
    Ok(Value::String(coerce_string(&value, "$toLower")?.to_lowercase()))
}

fn to_upper(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let value = single_arg(ctx, doc, expr, env, "$toUpper")?;
    Ok(Value::String(coerce_string(&value, "$toUpper")?.to_uppercase()))
}
