// src/aggregation/accumulators.rs
//! Group operators
//!
//! Each accumulator folds the members of one partition. The optional
//! expression is evaluated against every member first; without one, the
//! members themselves are the values (the expression-operator form, e.g.
//! `{$max: "$scores"}`).

use crate::context::Context;
use crate::error::Result;
use crate::registry::Operator;
use crate::value::Value;
use crate::value_utils::unique;
use std::cmp::Ordering;

pub(crate) fn builtin() -> Vec<(&'static str, Operator)> {
    vec![
        ("$sum", Operator::group(sum)),
        ("$avg", Operator::group(avg)),
        ("$min", Operator::group(min)),
        ("$max", Operator::group(max)),
        ("$first", Operator::group(first)),
        ("$last", Operator::group(last)),
        ("$push", Operator::group(push)),
        ("$addToSet", Operator::group(add_to_set)),
        ("$stdDevPop", Operator::group(std_dev_pop)),
        ("$stdDevSamp", Operator::group(std_dev_samp)),
        ("$count", Operator::group(count)),
    ]
}

fn numbers(values: &[Value]) -> Vec<f64> {
    values.iter().filter_map(Value::as_f64).collect()
}

/// `sqrt(Σ(x - mean)² / (N - correction))`, `None` when the divisor is not
/// positive
pub(crate) fn std_dev(values: &[f64], correction: f64) -> Option<f64> {
    let n = values.len() as f64;
    if n - correction <= 0.0 {
        return None;
    }
    let mean = values.iter().sum::<f64>() / n;
    let squares: f64 = values.iter().map(|x| (x - mean).powi(2)).sum();
    Some((squares / (n - correction)).sqrt())
}

fn sum(ctx: &Context<'_>, members: &[Value], expr: Option<&Value>) -> Result<Value> {
    if let Some(Value::Number(n)) = expr {
        return Ok(Value::Number(n * members.len() as f64));
    }
    let values = ctx.compute_members(members, expr)?;
    Ok(Value::Number(numbers(&values).iter().sum()))
}

fn avg(ctx: &Context<'_>, members: &[Value], expr: Option<&Value>) -> Result<Value> {
    let values = numbers(&ctx.compute_members(members, expr)?);
    if values.is_empty() {
        return Ok(Value::from(0));
    }
    Ok(Value::Number(values.iter().sum::<f64>() / values.len() as f64))
}

fn extremum(
    ctx: &Context<'_>,
    members: &[Value],
    expr: Option<&Value>,
    keep: Ordering,
) -> Result<Value> {
    let mut best: Option<Value> = None;
    for value in ctx.compute_members(members, expr)? {
        if value.is_nil() {
            continue;
        }
        best = match best {
            Some(current) if ctx.compare(&value, &current) != keep => Some(current),
            _ => Some(value),
        };
    }
    Ok(best.unwrap_or(Value::Null))
}

fn min(ctx: &Context<'_>, members: &[Value], expr: Option<&Value>) -> Result<Value> {
    extremum(ctx, members, expr, Ordering::Less)
}

fn max(ctx: &Context<'_>, members: &[Value], expr: Option<&Value>) -> Result<Value> {
    extremum(ctx, members, expr, Ordering::Greater)
}

fn edge_member(ctx: &Context<'_>, member: Option<&Value>, expr: Option<&Value>) -> Result<Value> {
    let Some(member) = member else {
        return Ok(Value::Null);
    };
    match expr {
        Some(e) => ctx.compute(member, e),
        None => Ok(member.clone()),
    }
}

fn first(ctx: &Context<'_>, members: &[Value], expr: Option<&Value>) -> Result<Value> {
    edge_member(ctx, members.first(), expr)
}

fn last(ctx: &Context<'_>, members: &[Value], expr: Option<&Value>) -> Result<Value> {
    edge_member(ctx, members.last(), expr)
}

/// `{$push: null}` collects the members themselves, like an absent expression
fn pushed(ctx: &Context<'_>, members: &[Value], expr: Option<&Value>) -> Result<Vec<Value>> {
    let expr = expr.filter(|e| !e.is_nil());
    Ok(ctx
        .compute_members(members, expr)?
        .into_iter()
        .filter(|v| !v.is_undefined())
        .collect())
}

fn push(ctx: &Context<'_>, members: &[Value], expr: Option<&Value>) -> Result<Value> {
    pushed(ctx, members, expr).map(Value::Array)
}

fn add_to_set(ctx: &Context<'_>, members: &[Value], expr: Option<&Value>) -> Result<Value> {
    Ok(Value::Array(unique(pushed(ctx, members, expr)?)))
}

fn std_dev_pop(ctx: &Context<'_>, members: &[Value], expr: Option<&Value>) -> Result<Value> {
    let values = numbers(&ctx.compute_members(members, expr)?);
    Ok(std_dev(&values, 0.0).map(Value::Number).unwrap_or(Value::Null))
}

fn std_dev_samp(ctx: &Context<'_>, members: &[Value], expr: Option<&Value>) -> Result<Value> {
    let values = numbers(&ctx.compute_members(members, expr)?);
    Ok(std_dev(&values, 1.0).map(Value::Number).unwrap_or(Value::Null))
}

fn count(_ctx: &Context<'_>, members: &[Value], _expr: Option<&Value>) -> Result<Value> {
    Ok(Value::from(members.len()))
}
