// src/expression/boolean.rs
//! Boolean expression operators, using aggregation truthiness

use super::single_arg;
use crate::context::{Context, Env};
use crate::error::Result;
use crate::registry::Operator;
use crate::value::Value;

pub(crate) fn operators() -> Vec<(&'static str, Operator)> {
    vec![
        ("$and", Operator::expression(and)),
        ("$or", Operator::expression(or)),
        ("$not", Operator::expression(not)),
    ]
}

fn operands(expr: &Value) -> &[Value] {
    match expr {
        Value::Array(items) => items,
        other => std::slice::from_ref(other),
    }
}

// Operands evaluate lazily so `$and` stops at the first falsy one
fn and(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    for operand in operands(expr) {
        if !ctx.evaluate(doc, operand, env)?.is_truthy() {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

fn or(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    for operand in operands(expr) {
        if ctx.evaluate(doc, operand, env)?.is_truthy() {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

fn not(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let value = single_arg(ctx, doc, expr, env, "$not")?;
    Ok(Value::Bool(!value.is_truthy()))
}

#[cfg(test)]
mod tests {
    use crate::expression::test_support::eval_json;
    use serde_json::json;

    #[test]
    fn test_boolean_operators() {
        let doc = json!({"a": 1, "z": 0});
        assert_eq!(eval_json(doc.clone(), json!({"$and": ["$a", true]})), json!(true));
        assert_eq!(eval_json(doc.clone(), json!({"$and": ["$a", "$z"]})), json!(false));
        assert_eq!(eval_json(doc.clone(), json!({"$and": []})), json!(true));
        assert_eq!(eval_json(doc.clone(), json!({"$or": ["$z", "$missing"]})), json!(false));
        assert_eq!(eval_json(doc.clone(), json!({"$or": ["$z", "$a"]})), json!(true));
        assert_eq!(eval_json(doc.clone(), json!({"$not": ["$z"]})), json!(true));
        assert_eq!(eval_json(doc, json!({"$not": [[]]})), json!(false));
    }

    #[test]
    fn test_and_short_circuits() {
        // $size on a missing field would fail if it were evaluated
        let out = eval_json(json!({}), json!({"$and": [false, {"$size": "$missing"}]}));
        assert_eq!(out, json!(false));
    }
}
