// src/expression/comparison.rs
//! Comparison expression operators
//!
//! Unlike query comparisons these compare across kinds, using the total
//! value order.

use super::pair_args;
use crate::context::{Context, Env};
use crate::error::Result;
use crate::registry::Operator;
use crate::value::Value;
use std::cmp::Ordering;

pub(crate) fn operators() -> Vec<(&'static str, Operator)> {
    vec![
        ("$cmp", Operator::expression(cmp)),
        ("$eq", Operator::expression(eq)),
        ("$gt", Operator::expression(gt)),
        ("$gte", Operator::expression(gte)),
        ("$lt", Operator::expression(lt)),
        ("$lte", Operator::expression(lte)),
        ("$ne", Operator::expression(ne)),
    ]
}

fn ordering(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>, name: &str) -> Result<Ordering> {
    let (a, b) = pair_args(ctx, doc, expr, env, name)?;
    Ok(ctx.compare(&a, &b))
}

fn cmp(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let ord = ordering(ctx, doc, expr, env, "$cmp")?;
    Ok(Value::from(match ord {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }))
}

fn eq(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let (a, b) = pair_args(ctx, doc, expr, env, "$eq")?;
    Ok(Value::Bool(a == b))
}

fn ne(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let (a, b) = pair_args(ctx, doc, expr, env, "$ne")?;
    Ok(Value::Bool(a != b))
}

fn gt(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    Ok(Value::Bool(ordering(ctx, doc, expr, env, "$gt")? == Ordering::Greater))
}

fn gte(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    Ok(Value::Bool(ordering(ctx, doc, expr, env, "$gte")? != Ordering::Less))
}

fn lt(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    Ok(Value::Bool(ordering(ctx, doc, expr, env, "$lt")? == Ordering::Less))
}

fn lte(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    Ok(Value::Bool(ordering(ctx, doc, expr, env, "$lte")? != Ordering::Greater))
}

#[cfg(test)]
mod tests {
    use crate::expression::test_support::{eval, eval_json};
    use serde_json::json;

    #[test]
    fn test_same_kind_comparisons() {
        let doc = json!({"qty": 250});
        assert_eq!(eval_json(doc.clone(), json!({"$cmp": ["$qty", 250]})), json!(0));
        assert_eq!(eval_json(doc.clone(), json!({"$cmp": ["$qty", 300]})), json!(-1));
        assert_eq!(eval_json(doc.clone(), json!({"$gt": ["$qty", 200]})), json!(true));
        assert_eq!(eval_json(doc.clone(), json!({"$lte": ["$qty", 250]})), json!(true));
        assert_eq!(eval_json(doc, json!({"$ne": ["$qty", 250]})), json!(false));
    }

    #[test]
    fn test_cross_kind_uses_type_order() {
        let doc = json!({"s": "abc"});
        // strings sort after numbers
        assert_eq!(eval_json(doc.clone(), json!({"$gt": ["$s", 1000]})), json!(true));
        // missing sorts before null
        assert_eq!(eval_json(doc.clone(), json!({"$lt": ["$missing", null]})), json!(true));
        assert_eq!(eval_json(doc, json!({"$eq": ["$missing", null]})), json!(false));
    }

    #[test]
    fn test_requires_two_arguments() {
        assert!(eval(json!({}), json!({"$eq": [1]})).is_err());
    }
}
