// src/expression/conditional.rs
//! Conditional expression operators; branches evaluate lazily

use super::{named_args, required};
use crate::context::{Context, Env};
use crate::error::{QuarryError, Result};
use crate::registry::Operator;
use crate::value::Value;

pub(crate) fn operators() -> Vec<(&'static str, Operator)> {
    vec![
        ("$cond", Operator::expression(cond)),
        ("$ifNull", Operator::expression(if_null)),
        ("$switch", Operator::expression(switch)),
    ]
}

fn cond(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let (test, then, otherwise) = match expr {
        Value::Array(items) if items.len() == 3 => (&items[0], &items[1], &items[2]),
        Value::Object(map) => (
            required(map, "if", "$cond")?,
            required(map, "then", "$cond")?,
            required(map, "else", "$cond")?,
        ),
        _ => {
            return Err(QuarryError::Validation(
                "$cond expects [if, then, else] or {if, then, else}".to_string(),
            ))
        }
    };
    if ctx.evaluate(doc, test, env)?.is_truthy() {
        ctx.evaluate(doc, then, env)
    } else {
        ctx.evaluate(doc, otherwise, env)
    }
}

/// First non-nil operand; the last operand is the replacement
fn if_null(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let operands = match expr {
        Value::Array(items) if items.len() >= 2 => items,
        _ => {
            return Err(QuarryError::Validation(
                "$ifNull needs at least two arguments".to_string(),
            ))
        }
    };
    let (replacement, candidates) = match operands.split_last() {
        Some(split) => split,
        None => return Ok(Value::Null),
    };
    for candidate in candidates {
        let value = ctx.evaluate(doc, candidate, env)?;
        if !value.is_nil() {
            return Ok(value);
        }
    }
    ctx.evaluate(doc, replacement, env)
}

fn switch(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let args = named_args(expr, "$switch")?;
    let branches = required(args, "branches", "$switch")?.as_array().ok_or_else(|| {
        QuarryError::Validation("$switch branches must be an array".to_string())
    })?;
    for branch in branches {
        let branch = named_args(branch, "$switch branch")?;
        let case = required(branch, "case", "$switch branch")?;
        let then = required(branch, "then", "$switch branch")?;
        if ctx.evaluate(doc, case, env)?.is_truthy() {
            return ctx.evaluate(doc, then, env);
        }
    }
    match args.get("default") {
        Some(default) => ctx.evaluate(doc, default, env),
        None => Err(QuarryError::Validation(
            "$switch could not find a matching branch for an input, and no default was specified"
                .to_string(),
        )),
    }
}
