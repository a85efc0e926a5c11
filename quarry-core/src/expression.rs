// src/expression.rs
//! Aggregation expression evaluator
//!
//! An expression is a plain value read under these rules:
//!
//! ```text
//! "$path"            field of the current document
//! "$$var.path"       bound variable ($$ROOT, $$CURRENT, $let/$map/... names)
//! {"$op": arg}       expression operator, or a group operator over an array
//! [e1, e2]           element-wise
//! {"k": e}           each field evaluated, undefined fields dropped
//! anything else      literal
//! ```
//!
//! Operators live in flat name→fn tables, one module per family.

pub(crate) mod arithmetic;
pub(crate) mod array;
pub(crate) mod boolean;
pub(crate) mod comparison;
pub(crate) mod conditional;
pub(crate) mod date;
pub(crate) mod literal;
pub(crate) mod object;
pub(crate) mod set;
pub(crate) mod string;
pub(crate) mod types;
pub(crate) mod variable;

use crate::context::{Context, Env};
use crate::error::{QuarryError, Result};
use crate::path::resolve;
use crate::registry::Operator;
use crate::value::{Map, Value};

/// Every built-in expression operator
pub(crate) fn builtin() -> Vec<(&'static str, Operator)> {
    let mut ops = Vec::new();
    ops.extend(arithmetic::operators());
    ops.extend(array::operators());
    ops.extend(boolean::operators());
    ops.extend(comparison::operators());
    ops.extend(conditional::operators());
    ops.extend(date::operators());
    ops.extend(literal::operators());
    ops.extend(object::operators());
    ops.extend(set::operators());
    ops.extend(string::operators());
    ops.extend(types::operators());
    ops.extend(variable::operators());
    ops
}

pub fn evaluate(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    match expr {
        Value::String(s) if s.starts_with('$') => field_reference(doc, s, env),
        Value::Array(items) => items
            .iter()
            .map(|item| evaluate(ctx, doc, item, env))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => evaluate_object(ctx, doc, map, env),
        other => Ok(other.clone()),
    }
}

fn evaluate_object(ctx: &Context<'_>, doc: &Value, map: &Map, env: &Env<'_>) -> Result<Value> {
    if map.keys().any(|k| k.starts_with('$')) {
        if map.len() != 1 {
            return Err(QuarryError::Validation(format!(
                "an expression object with an operator must have exactly one field, got {}",
                map.len()
            )));
        }
        if let Some((name, arg)) = map.iter().next() {
            return apply_operator(ctx, doc, name, arg, env);
        }
    }

    let mut out = Map::with_capacity(map.len());
    for (key, sub) in map {
        let value = evaluate(ctx, doc, sub, env)?;
        if !value.is_undefined() {
            out.insert(key.clone(), value);
        }
    }
    Ok(Value::Object(out))
}

/// Dispatch `{name: arg}` to an expression or group operator
pub fn apply_operator(
    ctx: &Context<'_>,
    doc: &Value,
    name: &str,
    arg: &Value,
    env: &Env<'_>,
) -> Result<Value> {
    let tables = ctx.tables();
    if let Some(op) = tables.expression(name) {
        return op.evaluate(ctx, doc, arg, env);
    }
    if let Some(op) = tables.group(name) {
        let members = match evaluate(ctx, doc, arg, env)? {
            Value::Array(items) => items,
            other => {
                return Err(QuarryError::TypeMismatch(format!(
                    "{} in an expression needs an array, got {}",
                    name,
                    other.kind().as_str()
                )))
            }
        };
        return op.accumulate(ctx, &members, None);
    }
    Err(QuarryError::UnknownOperator(name.to_string()))
}

fn field_reference(doc: &Value, reference: &str, env: &Env<'_>) -> Result<Value> {
    let Some(var_path) = reference.strip_prefix("$$") else {
        return Ok(resolve(doc, &reference[1..]).into_value());
    };

    let (name, rest) = match var_path.split_once('.') {
        Some((name, rest)) => (name, Some(rest)),
        None => (var_path, None),
    };

    let base = if let Some(bound) = env.lookup(name) {
        bound
    } else {
        match name {
            "ROOT" => env.root(),
            "CURRENT" => doc,
            "REMOVE" => return Ok(Value::Undefined),
            "KEEP" | "PRUNE" | "DESCEND" => return Ok(Value::String(reference.to_string())),
            _ => {
                return Err(QuarryError::Validation(format!(
                    "use of undefined variable: {}",
                    name
                )))
            }
        }
    };

    Ok(match rest {
        Some(path) => resolve(base, path).into_value(),
        None => base.clone(),
    })
}

// ============================================================================
// ARGUMENT HELPERS (shared by the operator families)
// ============================================================================

/// Evaluate `args` and require exactly `n` of them
pub(crate) fn fixed_args(
    ctx: &Context<'_>,
    doc: &Value,
    args: &Value,
    env: &Env<'_>,
    name: &str,
    n: usize,
) -> Result<Vec<Value>> {
    let values = ctx.evaluate_args(doc, args, env)?;
    if values.len() != n {
        return Err(QuarryError::Validation(format!(
            "{} takes exactly {} argument{}, got {}",
            name,
            n,
            if n == 1 { "" } else { "s" },
            values.len()
        )));
    }
    Ok(values)
}

/// Evaluate a single-operand argument; `[x]` and `x` are the same
pub(crate) fn single_arg(
    ctx: &Context<'_>,
    doc: &Value,
    args: &Value,
    env: &Env<'_>,
    name: &str,
) -> Result<Value> {
    let mut values = fixed_args(ctx, doc, args, env, name, 1)?;
    Ok(values.remove(0))
}

/// Evaluate two operands
pub(crate) fn pair_args(
    ctx: &Context<'_>,
    doc: &Value,
    args: &Value,
    env: &Env<'_>,
    name: &str,
) -> Result<(Value, Value)> {
    let mut values = fixed_args(ctx, doc, args, env, name, 2)?;
    let b = values.pop().unwrap_or(Value::Null);
    let a = values.pop().unwrap_or(Value::Null);
    Ok((a, b))
}

/// Named-argument object such as `{input, as, in}`
pub(crate) fn named_args<'v>(args: &'v Value, name: &str) -> Result<&'v Map> {
    args.as_object().ok_or_else(|| {
        QuarryError::Validation(format!("{} expects an object argument", name))
    })
}

pub(crate) fn required<'v>(map: &'v Map, key: &str, name: &str) -> Result<&'v Value> {
    map.get(key)
        .ok_or_else(|| QuarryError::Validation(format!("{} requires '{}'", name, key)))
}

pub(crate) fn expect_number(value: &Value, name: &str) -> Result<f64> {
    value.as_f64().ok_or_else(|| {
        QuarryError::TypeMismatch(format!(
            "{} only supports numeric types, got {}",
            name,
            value.kind().as_str()
        ))
    })
}

pub(crate) fn expect_array<'v>(value: &'v Value, name: &str) -> Result<&'v Vec<Value>> {
    value.as_array().ok_or_else(|| {
        QuarryError::TypeMismatch(format!(
            "{} requires an array, got {}",
            name,
            value.kind().as_str()
        ))
    })
}

pub(crate) fn expect_string<'v>(value: &'v Value, name: &str) -> Result<&'v str> {
    value.as_str().ok_or_else(|| {
        QuarryError::TypeMismatch(format!(
            "{} requires a string, got {}",
            name,
            value.kind().as_str()
        ))
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::config::EngineConfig;
    use crate::context::Context;
    use crate::error::Result;
    use crate::registry::OperatorTables;
    use crate::value::Value;
    use lazy_static::lazy_static;

    lazy_static! {
        static ref TABLES: OperatorTables = OperatorTables::builtin();
        static ref CONFIG: EngineConfig = EngineConfig::default();
    }

    pub fn ctx() -> Context<'static> {
        Context::new(&TABLES, &CONFIG)
    }

    /// Evaluate a JSON expression against a JSON document
    pub fn eval(doc: serde_json::Value, expr: serde_json::Value) -> Result<Value> {
        ctx().compute(&Value::from(doc), &Value::from(expr))
    }

    pub fn eval_json(doc: serde_json::Value, expr: serde_json::Value) -> serde_json::Value {
        eval(doc, expr).map(|v| v.to_json()).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{eval, eval_json};
    use crate::error::QuarryError;
    use crate::value::Value;
    use serde_json::json;

    #[test]
    fn test_field_paths_and_literals() {
        let doc = json!({"a": {"b": 5}, "list": [{"x": 1}, {"x": 2}]});
        assert_eq!(eval_json(doc.clone(), json!("$a.b")), json!(5));
        assert_eq!(eval_json(doc.clone(), json!("$list.x")), json!([1, 2]));
        assert_eq!(eval_json(doc.clone(), json!(42)), json!(42));
        assert_eq!(eval_json(doc, json!(["$a.b", "lit"])), json!([5, "lit"]));
    }

    #[test]
    fn test_system_variables() {
        let doc = json!({"a": 1});
        assert_eq!(eval_json(doc.clone(), json!("$$ROOT")), json!({"a": 1}));
        assert_eq!(eval_json(doc.clone(), json!("$$CURRENT.a")), json!(1));
        assert_eq!(eval_json(doc.clone(), json!("$$KEEP")), json!("$$KEEP"));
        assert!(eval(doc, json!("$$REMOVE")).unwrap().is_undefined());
    }

    #[test]
    fn test_unbound_variable_fails() {
        let err = eval(json!({}), json!("$$nope")).unwrap_err();
        assert!(matches!(err, QuarryError::Validation(_)));
    }

    #[test]
    fn test_object_drops_undefined_fields() {
        let out = eval_json(json!({"a": 1}), json!({"x": "$a", "y": "$missing", "z": "$$REMOVE"}));
        assert_eq!(out, json!({"x": 1}));
    }

    #[test]
    fn test_operator_object_must_have_one_key() {
        let err = eval(json!({}), json!({"$add": [1, 2], "other": 1})).unwrap_err();
        assert!(matches!(err, QuarryError::Validation(_)));
    }

    #[test]
    fn test_unknown_operator() {
        let err = eval(json!({}), json!({"$frobnicate": 1})).unwrap_err();
        assert!(matches!(err, QuarryError::UnknownOperator(_)));
    }

    #[test]
    fn test_group_operator_in_expression() {
        let doc = json!({"scores": [80, 90, 76]});
        assert_eq!(eval_json(doc.clone(), json!({"$max": "$scores"})), json!(90));
        assert_eq!(eval_json(doc.clone(), json!({"$sum": "$scores"})), json!(246));
        assert_eq!(eval_json(doc.clone(), json!({"$min": [3, "$scores.1"]})), json!(3));
        let err = eval(doc, json!({"$avg": 5})).unwrap_err();
        assert!(matches!(err, QuarryError::TypeMismatch(_)));
    }

    #[test]
    fn test_undefined_value_round_trip() {
        assert!(eval(json!({}), json!("$missing")).unwrap().is_undefined());
        assert_eq!(eval(json!({}), json!(null)).unwrap(), Value::Null);
    }
}
