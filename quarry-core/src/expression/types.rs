// src/expression/types.rs
//! Type inspection and conversion operators
//!
//! Conversions follow `$convert`: each `$toX` shortcut is `$convert` with
//! `to: X` and no `onError`/`onNull`.

use super::{named_args, required, single_arg};
use crate::context::{Context, Env};
use crate::error::{QuarryError, Result};
use crate::registry::Operator;
use crate::value::Value;
use chrono::SecondsFormat;

pub(crate) fn operators() -> Vec<(&'static str, Operator)> {
    vec![
        ("$convert", Operator::expression(convert)),
        ("$isNumber", Operator::expression(is_number)),
        ("$toBool", Operator::expression(to_bool)),
        ("$toDate", Operator::expression(to_date)),
        ("$toDouble", Operator::expression(to_double)),
        ("$toInt", Operator::expression(to_int)),
        ("$toLong", Operator::expression(to_long)),
        ("$toString", Operator::expression(to_string)),
        ("$type", Operator::expression(type_of)),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Double,
    String,
    Bool,
    Date,
    Int,
    Long,
}

impl Target {
    fn parse(value: &Value) -> Result<Target> {
        let target = match value {
            Value::String(s) => match s.as_str() {
                "double" => Some(Target::Double),
                "string" => Some(Target::String),
                "bool" => Some(Target::Bool),
                "date" => Some(Target::Date),
                "int" => Some(Target::Int),
                "long" => Some(Target::Long),
                _ => None,
            },
            Value::Number(_) => match value.as_i64() {
                Some(1) => Some(Target::Double),
                Some(2) => Some(Target::String),
                Some(8) => Some(Target::Bool),
                Some(9) => Some(Target::Date),
                Some(16) => Some(Target::Int),
                Some(18) => Some(Target::Long),
                _ => None,
            },
            _ => None,
        };
        target.ok_or_else(|| {
            QuarryError::Validation(format!("unknown $convert target type: {}", value))
        })
    }
}

fn conversion_error(value: &Value, target: Target) -> QuarryError {
    QuarryError::Validation(format!(
        "unsupported conversion from {} to {:?}",
        value.kind().as_str(),
        target
    ))
}

fn integral(n: f64, min: f64, max: f64, value: &Value, target: Target) -> Result<Value> {
    let t = n.trunc();
    if !n.is_finite() || t < min || t > max {
        return Err(QuarryError::Validation(format!(
            "conversion of {} to {:?} would overflow",
            value, target
        )));
    }
    Ok(Value::Number(t))
}

fn parse_integer(s: &str, min: f64, max: f64, value: &Value, target: Target) -> Result<Value> {
    let n = s
        .trim()
        .parse::<i64>()
        .map_err(|_| conversion_error(value, target))? as f64;
    if n < min || n > max {
        return Err(conversion_error(value, target));
    }
    Ok(Value::Number(n))
}

/// Convert a non-nil value
fn convert_value(ctx: &Context<'_>, value: &Value, target: Target) -> Result<Value> {
    let int_range = (i32::MIN as f64, i32::MAX as f64);
    let long_range = (i64::MIN as f64, i64::MAX as f64);
    match (target, value) {
        (Target::Bool, Value::Bool(_)) => Ok(value.clone()),
        (Target::Bool, Value::Number(n)) => Ok(Value::Bool(*n != 0.0)),
        (Target::Bool, _) => Ok(Value::Bool(true)),

        (Target::Double, Value::Number(_)) => Ok(value.clone()),
        (Target::Double, Value::Bool(b)) => Ok(Value::from(if *b { 1 } else { 0 })),
        (Target::Double, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Value::Number)
            .map_err(|_| conversion_error(value, target)),
        (Target::Double, Value::Date(d)) => Ok(Value::from(d.timestamp_millis())),

        (Target::Int, Value::Number(n)) => integral(*n, int_range.0, int_range.1, value, target),
        (Target::Long, Value::Number(n)) => integral(*n, long_range.0, long_range.1, value, target),
        (Target::Int | Target::Long, Value::Bool(b)) => Ok(Value::from(if *b { 1 } else { 0 })),
        (Target::Int, Value::String(s)) => parse_integer(s, int_range.0, int_range.1, value, target),
        (Target::Long, Value::String(s)) => parse_integer(s, long_range.0, long_range.1, value, target),
        (Target::Long, Value::Date(d)) => Ok(Value::from(d.timestamp_millis())),

        (Target::Date, Value::Date(_)) => Ok(value.clone()),
        (Target::Date, Value::Number(_)) => value
            .as_i64()
            .and_then(Value::date_from_millis)
            .ok_or_else(|| conversion_error(value, target)),
        (Target::Date, Value::String(s)) => ctx
            .config()
            .date_parser()
            .parse(s, None)
            .map(Value::Date)
            .ok_or_else(|| conversion_error(value, target)),

        (Target::String, Value::String(_)) => Ok(value.clone()),
        (Target::String, Value::Bool(b)) => Ok(Value::from(b.to_string())),
        (Target::String, Value::Number(_)) => Ok(Value::from(value.to_json().to_string())),
        (Target::String, Value::Date(d)) => {
            Ok(Value::from(d.to_rfc3339_opts(SecondsFormat::Millis, true)))
        }

        _ => Err(conversion_error(value, target)),
    }
}

fn convert_simple(
    ctx: &Context<'_>,
    doc: &Value,
    expr: &Value,
    env: &Env<'_>,
    name: &str,
    target: Target,
) -> Result<Value> {
    let value = single_arg(ctx, doc, expr, env, name)?;
    if value.is_nil() {
        return Ok(Value::Null);
    }
    convert_value(ctx, &value, target)
}

fn convert(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let args = named_args(expr, "$convert")?;
    let input = ctx.evaluate(doc, required(args, "input", "$convert")?, env)?;
    let target = Target::parse(&ctx.evaluate(doc, required(args, "to", "$convert")?, env)?)?;
    if input.is_nil() {
        return match args.get("onNull") {
            Some(on_null) => ctx.evaluate(doc, on_null, env),
            None => Ok(Value::Null),
        };
    }
    match convert_value(ctx, &input, target) {
        Ok(v) => Ok(v),
        Err(e) => match args.get("onError") {
            Some(on_error) => ctx.evaluate(doc, on_error, env),
            None => Err(e),
        },
    }
}

fn to_bool(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    convert_simple(ctx, doc, expr, env, "$toBool", Target::Bool)
}

fn to_date(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    convert_simple(ctx, doc, expr, env, "$toDate", Target::Date)
}

fn to_double(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    convert_simple(ctx, doc, expr, env, "$toDouble", Target::Double)
}

fn to_int(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    convert_simple(ctx, doc, expr, env, "$toInt", Target::Int)
}

fn to_long(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    convert_simple(ctx, doc, expr, env, "$toLong", Target::Long)
}

fn to_string(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    convert_simple(ctx, doc, expr, env, "$toString", Target::String)
}

fn is_number(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let value = single_arg(ctx, doc, expr, env, "$isNumber")?;
    Ok(Value::Bool(value.is_number()))
}

fn type_of(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let value = single_arg(ctx, doc, expr, env, "$type")?;
    Ok(Value::from(if value.is_undefined() {
        "missing"
    } else {
        value.bson_type()
    }))
}

#[cfg(test)]
mod tests {
    use crate::expression::test_support::{eval, eval_json};
    use serde_json::json;

    #[test]
    fn test_type_names() {
        let doc = json!({"i": 1, "d": 1.5, "s": "x", "a": [], "o": {}, "n": null});
        assert_eq!(eval_json(doc.clone(), json!({"$type": "$i"})), json!("int"));
        assert_eq!(eval_json(doc.clone(), json!({"$type": "$d"})), json!("double"));
        assert_eq!(eval_json(doc.clone(), json!({"$type": "$s"})), json!("string"));
        assert_eq!(eval_json(doc.clone(), json!({"$type": ["$a"]})), json!("array"));
        assert_eq!(eval_json(doc.clone(), json!({"$type": "$o"})), json!("object"));
        assert_eq!(eval_json(doc.clone(), json!({"$type": "$n"})), json!("null"));
        assert_eq!(eval_json(doc.clone(), json!({"$type": "$zzz"})), json!("missing"));
        assert_eq!(eval_json(doc, json!({"$isNumber": "$d"})), json!(true));
    }

    #[test]
    fn test_shortcut_conversions() {
        let doc = json!({});
        assert_eq!(eval_json(doc.clone(), json!({"$toInt": "42"})), json!(42));
        assert_eq!(eval_json(doc.clone(), json!({"$toInt": 7.9})), json!(7));
        assert_eq!(eval_json(doc.clone(), json!({"$toDouble": "2.5"})), json!(2.5));
        assert_eq!(eval_json(doc.clone(), json!({"$toBool": 0})), json!(false));
        assert_eq!(eval_json(doc.clone(), json!({"$toBool": "false"})), json!(true));
        assert_eq!(eval_json(doc.clone(), json!({"$toString": 12})), json!("12"));
        assert_eq!(eval_json(doc.clone(), json!({"$toString": true})), json!("true"));
        assert_eq!(eval_json(doc.clone(), json!({"$toLong": null})), json!(null));
        assert_eq!(
            eval_json(doc, json!({"$toString": {"$toDate": 0}})),
            json!("1970-01-01T00:00:00.000Z")
        );
    }

    #[test]
    fn test_convert_with_fallbacks() {
        let doc = json!({"bad": "abc"});
        assert_eq!(
            eval_json(doc.clone(), json!({"$convert": {"input": "$bad", "to": "int", "onError": -1}})),
            json!(-1)
        );
        assert_eq!(
            eval_json(doc.clone(), json!({"$convert": {"input": "$none", "to": 16, "onNull": 0}})),
            json!(0)
        );
        assert!(eval(doc.clone(), json!({"$convert": {"input": "$bad", "to": "int"}})).is_err());
        assert!(eval(doc, json!({"$convert": {"input": 1, "to": "decimal"}})).is_err());
        assert!(eval(json!({}), json!({"$toInt": 3e10})).is_err());
    }
}
