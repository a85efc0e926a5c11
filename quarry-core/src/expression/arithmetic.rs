// src/expression/arithmetic.rs
//! Arithmetic expression operators
//!
//! A null or missing operand makes the result null. `$add` and `$subtract`
//! also work on dates, counting in milliseconds.

use super::{expect_number, pair_args, single_arg};
use crate::context::{Context, Env};
use crate::error::{QuarryError, Result};
use crate::registry::Operator;
use crate::value::Value;
use chrono::{DateTime, Duration, Utc};

pub(crate) fn operators() -> Vec<(&'static str, Operator)> {
    vec![
        ("$abs", Operator::expression(abs)),
        ("$add", Operator::expression(add)),
        ("$ceil", Operator::expression(ceil)),
        ("$divide", Operator::expression(divide)),
        ("$exp", Operator::expression(exp)),
        ("$floor", Operator::expression(floor)),
        ("$ln", Operator::expression(ln)),
        ("$log", Operator::expression(log)),
        ("$log10", Operator::expression(log10)),
        ("$mod", Operator::expression(modulo)),
        ("$multiply", Operator::expression(multiply)),
        ("$pow", Operator::expression(pow)),
        ("$round", Operator::expression(round)),
        ("$sqrt", Operator::expression(sqrt)),
        ("$subtract", Operator::expression(subtract)),
        ("$trunc", Operator::expression(trunc)),
    ]
}

/// Apply `f` to a single numeric operand
fn unary(
    ctx: &Context<'_>,
    doc: &Value,
    expr: &Value,
    env: &Env<'_>,
    name: &str,
    f: impl Fn(f64) -> Result<f64>,
) -> Result<Value> {
    let value = single_arg(ctx, doc, expr, env, name)?;
    if value.is_nil() {
        return Ok(Value::Null);
    }
    Ok(Value::Number(f(expect_number(&value, name)?)?))
}

/// Two numeric operands, `None` when either is nil
fn binary(
    ctx: &Context<'_>,
    doc: &Value,
    expr: &Value,
    env: &Env<'_>,
    name: &str,
) -> Result<Option<(f64, f64)>> {
    let (a, b) = pair_args(ctx, doc, expr, env, name)?;
    if a.is_nil() || b.is_nil() {
        return Ok(None);
    }
    Ok(Some((expect_number(&a, name)?, expect_number(&b, name)?)))
}

fn abs(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    unary(ctx, doc, expr, env, "$abs", |n| Ok(n.abs()))
}

fn ceil(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    unary(ctx, doc, expr, env, "$ceil", |n| Ok(n.ceil()))
}

fn floor(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    unary(ctx, doc, expr, env, "$floor", |n| Ok(n.floor()))
}

fn exp(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    unary(ctx, doc, expr, env, "$exp", |n| Ok(n.exp()))
}

fn ln(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    unary(ctx, doc, expr, env, "$ln", |n| positive(n, "$ln").map(f64::ln))
}

fn log10(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    unary(ctx, doc, expr, env, "$log10", |n| positive(n, "$log10").map(f64::log10))
}

fn sqrt(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    unary(ctx, doc, expr, env, "$sqrt", |n| {
        if n < 0.0 {
            Err(QuarryError::Validation(
                "$sqrt's argument must be greater than or equal to 0".to_string(),
            ))
        } else {
            Ok(n.sqrt())
        }
    })
}

fn positive(n: f64, name: &str) -> Result<f64> {
    if n > 0.0 {
        Ok(n)
    } else {
        Err(QuarryError::Validation(format!(
            "{}'s argument must be a positive number, got {}",
            name, n
        )))
    }
}

fn log(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    match binary(ctx, doc, expr, env, "$log")? {
        None => Ok(Value::Null),
        Some((n, base)) => {
            positive(n, "$log")?;
            if base <= 0.0 || base == 1.0 {
                return Err(QuarryError::Validation(
                    "$log's base must be a positive number not equal to 1".to_string(),
                ));
            }
            Ok(Value::Number(n.log(base)))
        }
    }
}

fn pow(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    match binary(ctx, doc, expr, env, "$pow")? {
        None => Ok(Value::Null),
        Some((base, exponent)) => {
            if base == 0.0 && exponent < 0.0 {
                return Err(QuarryError::Validation(
                    "$pow cannot take a base of 0 and a negative exponent".to_string(),
                ));
            }
            Ok(Value::Number(base.powf(exponent)))
        }
    }
}

fn divide(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    match binary(ctx, doc, expr, env, "$divide")? {
        None => Ok(Value::Null),
        Some((_, d)) if d == 0.0 => Err(QuarryError::Validation("can't $divide by zero".to_string())),
        Some((n, d)) => Ok(Value::Number(n / d)),
    }
}

fn modulo(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    match binary(ctx, doc, expr, env, "$mod")? {
        None => Ok(Value::Null),
        Some((_, d)) if d == 0.0 => Err(QuarryError::Validation("can't $mod by zero".to_string())),
        Some((n, d)) => Ok(Value::Number(n % d)),
    }
}

fn multiply(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let values = ctx.evaluate_args(doc, expr, env)?;
    let mut product = 1.0;
    for value in &values {
        if value.is_nil() {
            return Ok(Value::Null);
        }
        product *= expect_number(value, "$multiply")?;
    }
    Ok(Value::Number(product))
}

/// Move a date by a fractional number of milliseconds, truncated
pub(crate) fn shift_millis(date: DateTime<Utc>, millis: f64) -> Result<DateTime<Utc>> {
    let millis = millis.trunc();
    if !millis.is_finite() || millis < i64::MIN as f64 || millis >= i64::MAX as f64 {
        return Err(date_overflow());
    }
    Duration::try_milliseconds(millis as i64)
        .and_then(|delta| date.checked_add_signed(delta))
        .ok_or_else(date_overflow)
}

pub(crate) fn date_overflow() -> QuarryError {
    QuarryError::Validation("date overflow".to_string())
}

fn add(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let values = ctx.evaluate_args(doc, expr, env)?;
    let mut total = 0.0;
    let mut date = None;
    for value in &values {
        match value {
            v if v.is_nil() => return Ok(Value::Null),
            Value::Number(n) => total += n,
            Value::Date(d) => {
                if date.is_some() {
                    return Err(QuarryError::Validation(
                        "only one date allowed in an $add expression".to_string(),
                    ));
                }
                date = Some(*d);
            }
            other => {
                return Err(QuarryError::TypeMismatch(format!(
                    "$add only supports numeric or date types, got {}",
                    other.kind().as_str()
                )))
            }
        }
    }
    match date {
        Some(d) => Ok(Value::Date(shift_millis(d, total)?)),
        None => Ok(Value::Number(total)),
    }
}

fn subtract(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let (a, b) = pair_args(ctx, doc, expr, env, "$subtract")?;
    match (&a, &b) {
        _ if a.is_nil() || b.is_nil() => Ok(Value::Null),
        (Value::Number(x), Value::Number(y)) => Ok(Value::Number(x - y)),
        (Value::Date(x), Value::Date(y)) => Ok(Value::Number((*x - *y).num_milliseconds() as f64)),
        (Value::Date(x), Value::Number(ms)) => Ok(Value::Date(shift_millis(*x, -ms)?)),
        _ => Err(QuarryError::TypeMismatch(format!(
            "can't $subtract a {} from a {}",
            b.kind().as_str(),
            a.kind().as_str()
        ))),
    }
}

/// Optional `place` second operand shared by `$round` and `$trunc`
fn with_place(
    ctx: &Context<'_>,
    doc: &Value,
    expr: &Value,
    env: &Env<'_>,
    name: &str,
) -> Result<Option<(f64, i32)>> {
    let values = ctx.evaluate_args(doc, expr, env)?;
    if values.is_empty() || values.len() > 2 {
        return Err(QuarryError::Validation(format!(
            "{} takes 1 or 2 arguments, got {}",
            name,
            values.len()
        )));
    }
    if values.iter().any(Value::is_nil) {
        return Ok(None);
    }
    let n = expect_number(&values[0], name)?;
    let place = match values.get(1) {
        Some(p) => p
            .as_i64()
            .filter(|p| (-20..100).contains(p))
            .ok_or_else(|| {
                QuarryError::Validation(format!("{} place must be an integer in [-20, 100)", name))
            })? as i32,
        None => 0,
    };
    Ok(Some((n, place)))
}

fn round_half_even(x: f64) -> f64 {
    let r = x.round();
    if (x - x.trunc()).abs() == 0.5 {
        2.0 * (x / 2.0).round()
    } else {
        r
    }
}

fn round(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    Ok(match with_place(ctx, doc, expr, env, "$round")? {
        None => Value::Null,
        Some((n, place)) => {
            let scale = 10f64.powi(place);
            Value::Number(round_half_even(n * scale) / scale)
        }
    })
}

fn trunc(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    Ok(match with_place(ctx, doc, expr, env, "$trunc")? {
        None => Value::Null,
        Some((n, place)) => {
            let scale = 10f64.powi(place);
            Value::Number((n * scale).trunc() / scale)
        }
    })
}

#[cfg(test)]
mod tests {
    use crate::error::QuarryError;
    use crate::expression::test_support::{eval, eval_json};
    use crate::value::Value;
    use serde_json::json;

    #[test]
    fn test_basic_arithmetic() {
        let doc = json!({"a": 10, "b": 4});
        assert_eq!(eval_json(doc.clone(), json!({"$add": ["$a", "$b", 1]})), json!(15));
        assert_eq!(eval_json(doc.clone(), json!({"$subtract": ["$a", "$b"]})), json!(6));
        assert_eq!(eval_json(doc.clone(), json!({"$multiply": ["$a", "$b"]})), json!(40));
        assert_eq!(eval_json(doc.clone(), json!({"$divide": ["$a", "$b"]})), json!(2.5));
        assert_eq!(eval_json(doc.clone(), json!({"$mod": ["$a", "$b"]})), json!(2));
        assert_eq!(eval_json(doc, json!({"$pow": [2, 10]})), json!(1024));
    }

    #[test]
    fn test_date_shift_out_of_range_is_an_error() {
        let doc = json!({"d": "2020-01-01T00:00:00Z"});
        let date = json!({"$toDate": "$d"});
        let err = eval(doc.clone(), json!({"$add": [date.clone(), 1e18]})).unwrap_err();
        assert!(matches!(err, QuarryError::Validation(_)));
        let err = eval(doc.clone(), json!({"$subtract": [date.clone(), 1e300]})).unwrap_err();
        assert!(matches!(err, QuarryError::Validation(_)));
        assert_eq!(
            eval_json(doc, json!({"$toString": {"$add": [date, 1500.9]}})),
            json!("2020-01-01T00:00:01.500Z")
        );
    }

    #[test]
    fn test_nil_operands_yield_null() {
        let doc = json!({"a": 1});
        assert_eq!(eval_json(doc.clone(), json!({"$add": ["$a", "$missing"]})), json!(null));
        assert_eq!(eval_json(doc.clone(), json!({"$abs": null})), json!(null));
        assert_eq!(eval_json(doc, json!({"$divide": ["$missing", 2]})), json!(null));
    }

    #[test]
    fn test_unary_operators() {
        let doc = json!({});
        assert_eq!(eval_json(doc.clone(), json!({"$abs": -3})), json!(3));
        assert_eq!(eval_json(doc.clone(), json!({"$ceil": 1.2})), json!(2));
        assert_eq!(eval_json(doc.clone(), json!({"$floor": [1.8]})), json!(1));
        assert_eq!(eval_json(doc.clone(), json!({"$sqrt": 25})), json!(5));
        assert_eq!(eval_json(doc.clone(), json!({"$log10": 1})), json!(0));
        assert_eq!(eval_json(doc.clone(), json!({"$ln": 1})), json!(0));
        assert_eq!(eval_json(doc.clone(), json!({"$log": [1, 2]})), json!(0));
        assert!(eval(doc, json!({"$ln": 0})).is_err());
    }

    #[test]
    fn test_round_and_trunc() {
        let doc = json!({});
        assert_eq!(eval_json(doc.clone(), json!({"$round": [2.5]})), json!(2));
        assert_eq!(eval_json(doc.clone(), json!({"$round": [3.5]})), json!(4));
        assert_eq!(eval_json(doc.clone(), json!({"$round": [1234.5678, 2]})), json!(1234.57));
        assert_eq!(eval_json(doc.clone(), json!({"$round": [1234.5678, -2]})), json!(1200));
        assert_eq!(eval_json(doc, json!({"$trunc": [7.89, 1]})), json!(7.8));
    }

    #[test]
    fn test_divide_by_zero() {
        let err = eval(json!({}), json!({"$divide": [1, 0]})).unwrap_err();
        assert!(err.to_string().contains("divide by zero"));
    }

    #[test]
    fn test_type_mismatch() {
        let err = eval(json!({"s": "x"}), json!({"$add": [1, "$s"]})).unwrap_err();
        assert!(matches!(err, QuarryError::TypeMismatch(_)));
    }

    #[test]
    fn test_date_arithmetic() {
        let doc = Value::from(json!({}));
        let ctx = crate::expression::test_support::ctx();
        let start = Value::date_from_millis(1_000).unwrap();
        let end = Value::date_from_millis(61_000).unwrap();

        let mut args = crate::value::Map::new();
        args.insert("$add".to_string(), Value::Array(vec![start.clone(), Value::from(500)]));
        let shifted = ctx.compute(&doc, &Value::Object(args)).unwrap();
        assert_eq!(shifted, Value::date_from_millis(1_500).unwrap());

        let mut args = crate::value::Map::new();
        args.insert("$subtract".to_string(), Value::Array(vec![end, start]));
        assert_eq!(ctx.compute(&doc, &Value::Object(args)).unwrap(), Value::from(60_000));
    }
}
