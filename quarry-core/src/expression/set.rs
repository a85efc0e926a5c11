// src/expression/set.rs
//! Set expression operators
//!
//! Arrays are treated as sets: duplicates collapse and results keep the order
//! of first appearance.

use super::{expect_array, pair_args, single_arg};
use crate::context::{Context, Env};
use crate::error::{QuarryError, Result};
use crate::registry::Operator;
use crate::value::Value;
use crate::value_utils::{contains, unique};

pub(crate) fn operators() -> Vec<(&'static str, Operator)> {
    vec![
        ("$allElementsTrue", Operator::expression(all_elements_true)),
        ("$anyElementTrue", Operator::expression(any_element_true)),
        ("$setDifference", Operator::expression(set_difference)),
        ("$setEquals", Operator::expression(set_equals)),
        ("$setIntersection", Operator::expression(set_intersection)),
        ("$setIsSubset", Operator::expression(set_is_subset)),
        ("$setUnion", Operator::expression(set_union)),
    ]
}

/// All operands as arrays, `None` if any is nil
fn array_operands(values: &[Value], name: &str) -> Result<Option<Vec<Vec<Value>>>> {
    let mut out = Vec::with_capacity(values.len());
    for value in values {
        if value.is_nil() {
            return Ok(None);
        }
        out.push(expect_array(value, name)?.clone());
    }
    Ok(Some(out))
}

fn all_elements_true(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let value = single_arg(ctx, doc, expr, env, "$allElementsTrue")?;
    let items = expect_array(&value, "$allElementsTrue")?;
    Ok(Value::Bool(items.iter().all(Value::is_truthy)))
}

fn any_element_true(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let value = single_arg(ctx, doc, expr, env, "$anyElementTrue")?;
    let items = expect_array(&value, "$anyElementTrue")?;
    Ok(Value::Bool(items.iter().any(Value::is_truthy)))
}

fn set_difference(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let (a, b) = pair_args(ctx, doc, expr, env, "$setDifference")?;
    let Some(sets) = array_operands(&[a, b], "$setDifference")? else {
        return Ok(Value::Null);
    };
    let out = sets[0]
        .iter()
        .filter(|v| !contains(&sets[1], v))
        .cloned()
        .collect();
    Ok(Value::Array(unique(out)))
}

fn set_equals(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let values = ctx.evaluate_args(doc, expr, env)?;
    if values.len() < 2 {
        return Err(QuarryError::Validation(
            "$setEquals needs at least two arguments".to_string(),
        ));
    }
    let mut sets = Vec::with_capacity(values.len());
    for value in &values {
        sets.push(expect_array(value, "$setEquals")?);
    }
    let first = sets[0];
    let equal = sets[1..].iter().all(|other| {
        first.iter().all(|v| contains(other, v)) && other.iter().all(|v| contains(first, v))
    });
    Ok(Value::Bool(equal))
}

fn set_intersection(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let values = ctx.evaluate_args(doc, expr, env)?;
    let Some(sets) = array_operands(&values, "$setIntersection")? else {
        return Ok(Value::Null);
    };
    let Some((first, rest)) = sets.split_first() else {
        return Ok(Value::Array(Vec::new()));
    };
    let out = first
        .iter()
        .filter(|v| rest.iter().all(|set| contains(set, v)))
        .cloned()
        .collect();
    Ok(Value::Array(unique(out)))
}

fn set_is_subset(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let (a, b) = pair_args(ctx, doc, expr, env, "$setIsSubset")?;
    let a = expect_array(&a, "$setIsSubset")?;
    let b = expect_array(&b, "$setIsSubset")?;
    Ok(Value::Bool(a.iter().all(|v| contains(b, v))))
}

fn set_union(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let values = ctx.evaluate_args(doc, expr, env)?;
    let Some(sets) = array_operands(&values, "$setUnion")? else {
        return Ok(Value::Null);
    };
    Ok(Value::Array(unique(sets.into_iter().flatten().collect())))
}

#[cfg(test)]
mod tests {
    use crate::expression::test_support::{eval, eval_json};
    use serde_json::json;

    #[test]
    fn test_set_operations() {
        let doc = json!({"a": [1, 2, 2, 3], "b": [2, 3, 4]});
        assert_eq!(eval_json(doc.clone(), json!({"$setUnion": ["$a", "$b"]})), json!([1, 2, 3, 4]));
        assert_eq!(eval_json(doc.clone(), json!({"$setIntersection": ["$a", "$b"]})), json!([2, 3]));
        assert_eq!(eval_json(doc.clone(), json!({"$setDifference": ["$a", "$b"]})), json!([1]));
        assert_eq!(eval_json(doc.clone(), json!({"$setIsSubset": [[2, 3], "$b"]})), json!(true));
        assert_eq!(eval_json(doc.clone(), json!({"$setEquals": ["$a", [3, 2, 1]]})), json!(true));
        assert_eq!(eval_json(doc, json!({"$setUnion": ["$a", "$missing"]})), json!(null));
    }

    #[test]
    fn test_element_truthiness() {
        let doc = json!({});
        assert_eq!(eval_json(doc.clone(), json!({"$allElementsTrue": [[true, 1, "x"]]})), json!(true));
        assert_eq!(eval_json(doc.clone(), json!({"$allElementsTrue": [[true, 0]]})), json!(false));
        assert_eq!(eval_json(doc.clone(), json!({"$anyElementTrue": [[null, 0, []]]})), json!(true));
        assert!(eval(doc, json!({"$anyElementTrue": [5]})).is_err());
    }
}
