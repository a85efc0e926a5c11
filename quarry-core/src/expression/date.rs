// src/expression/date.rs
//! Date expression operators
//!
//! Extraction operators accept either a date expression or
//! `{date, timezone}`. Timezones are `"UTC"`/`"Z"` or fixed offsets such as
//! `"+05:30"`; named zones need a host-side conversion before the value
//! reaches the engine.

use super::arithmetic::date_overflow;
use super::{named_args, required};
use crate::context::{Context, Env};
use crate::error::{QuarryError, Result};
use crate::registry::Operator;
use crate::value::Value;
use chrono::{DateTime, Datelike, Duration, FixedOffset, Timelike};
use std::fmt::Write;

pub(crate) fn operators() -> Vec<(&'static str, Operator)> {
    vec![
        ("$dayOfMonth", Operator::expression(day_of_month)),
        ("$dayOfWeek", Operator::expression(day_of_week)),
        ("$dayOfYear", Operator::expression(day_of_year)),
        ("$hour", Operator::expression(hour)),
        ("$millisecond", Operator::expression(millisecond)),
        ("$minute", Operator::expression(minute)),
        ("$month", Operator::expression(month)),
        ("$second", Operator::expression(second)),
        ("$week", Operator::expression(week)),
        ("$year", Operator::expression(year)),
        ("$dateToString", Operator::expression(date_to_string)),
        ("$dateFromString", Operator::expression(date_from_string)),
    ]
}

const DEFAULT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S.%LZ";

/// Parse `"UTC"`, `"Z"`, `"+hh:mm"`, `"-hhmm"` or `"+hh"`
pub(crate) fn parse_timezone(tz: &str) -> Result<FixedOffset> {
    let invalid = || QuarryError::Validation(format!("unrecognized time zone identifier: {}", tz));
    if tz.eq_ignore_ascii_case("utc") || tz.eq_ignore_ascii_case("gmt") || tz == "Z" {
        return FixedOffset::east_opt(0).ok_or_else(invalid);
    }
    let (sign, rest) = match tz.as_bytes().first() {
        Some(b'+') => (1, &tz[1..]),
        Some(b'-') => (-1, &tz[1..]),
        _ => return Err(invalid()),
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let (hours, minutes) = match digits.len() {
        2 => (digits.parse::<i32>().map_err(|_| invalid())?, 0),
        4 => (
            digits[..2].parse::<i32>().map_err(|_| invalid())?,
            digits[2..].parse::<i32>().map_err(|_| invalid())?,
        ),
        _ => return Err(invalid()),
    };
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

fn timezone_arg(ctx: &Context<'_>, doc: &Value, tz: Option<&Value>, env: &Env<'_>) -> Result<FixedOffset> {
    match tz {
        None => parse_timezone("UTC"),
        Some(expr) => match ctx.evaluate(doc, expr, env)? {
            Value::String(s) => parse_timezone(&s),
            v if v.is_nil() => parse_timezone("UTC"),
            other => Err(QuarryError::Validation(format!(
                "timezone must be a string, got {}",
                other.kind().as_str()
            ))),
        },
    }
}

/// The operand as a date in its timezone, `None` when it is nil
fn date_operand(
    ctx: &Context<'_>,
    doc: &Value,
    expr: &Value,
    env: &Env<'_>,
    name: &str,
) -> Result<Option<DateTime<FixedOffset>>> {
    let (date_expr, tz_expr) = match expr {
        Value::Object(map) if map.contains_key("date") => (required(map, "date", name)?, map.get("timezone")),
        Value::Array(items) if items.len() == 1 => (&items[0], None),
        other => (other, None),
    };
    let tz = timezone_arg(ctx, doc, tz_expr, env)?;
    match ctx.evaluate(doc, date_expr, env)? {
        Value::Date(d) => Ok(Some(d.with_timezone(&tz))),
        v if v.is_nil() => Ok(None),
        other => Err(QuarryError::TypeMismatch(format!(
            "{} can't convert from {} to Date",
            name,
            other.kind().as_str()
        ))),
    }
}

fn extract(
    ctx: &Context<'_>,
    doc: &Value,
    expr: &Value,
    env: &Env<'_>,
    name: &str,
    f: impl Fn(&DateTime<FixedOffset>) -> i64,
) -> Result<Value> {
    Ok(match date_operand(ctx, doc, expr, env, name)? {
        Some(d) => Value::from(f(&d)),
        None => Value::Null,
    })
}

/// Week of the year, weeks starting on Sunday; days before the first Sunday are week 0
fn sunday_week(d: &DateTime<FixedOffset>) -> i64 {
    let yday = d.ordinal0() as i64;
    let wday = d.weekday().num_days_from_sunday() as i64;
    (yday + 7 - wday) / 7
}

fn day_of_month(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    extract(ctx, doc, expr, env, "$dayOfMonth", |d| d.day() as i64)
}

fn day_of_week(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    extract(ctx, doc, expr, env, "$dayOfWeek", |d| {
        d.weekday().num_days_from_sunday() as i64 + 1
    })
}

fn day_of_year(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    extract(ctx, doc, expr, env, "$dayOfYear", |d| d.ordinal() as i64)
}

fn hour(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    extract(ctx, doc, expr, env, "$hour", |d| d.hour() as i64)
}

fn millisecond(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    extract(ctx, doc, expr, env, "$millisecond", |d| {
        (d.timestamp_subsec_millis() % 1000) as i64
    })
}

fn minute(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    extract(ctx, doc, expr, env, "$minute", |d| d.minute() as i64)
}

fn month(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    extract(ctx, doc, expr, env, "$month", |d| d.month() as i64)
}

fn second(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    extract(ctx, doc, expr, env, "$second", |d| d.second() as i64)
}

fn week(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    extract(ctx, doc, expr, env, "$week", sunday_week)
}

fn year(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    extract(ctx, doc, expr, env, "$year", |d| d.year() as i64)
}

/// Render with MongoDB format specifiers
pub(crate) fn format_date(d: &DateTime<FixedOffset>, format: &str) -> Result<String> {
    let mut out = String::new();
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let spec = chars.next().ok_or_else(|| {
            QuarryError::Validation("$dateToString format cannot end with a single %".to_string())
        })?;
        // write! into a String cannot fail
        let _ = match spec {
            'd' => write!(out, "{:02}", d.day()),
            'G' => write!(out, "{:04}", d.iso_week().year()),
            'H' => write!(out, "{:02}", d.hour()),
            'j' => write!(out, "{:03}", d.ordinal()),
            'L' => write!(out, "{:03}", d.timestamp_subsec_millis() % 1000),
            'm' => write!(out, "{:02}", d.month()),
            'M' => write!(out, "{:02}", d.minute()),
            'S' => write!(out, "{:02}", d.second()),
            'u' => write!(out, "{}", d.weekday().number_from_monday()),
            'U' => write!(out, "{:02}", sunday_week(d)),
            'V' => write!(out, "{:02}", d.iso_week().week()),
            'w' => write!(out, "{}", d.weekday().num_days_from_sunday()),
            'Y' => write!(out, "{:04}", d.year()),
            'z' => write!(out, "{}", d.format("%z")),
            'Z' => write!(out, "{}", d.offset().local_minus_utc() / 60),
            '%' => write!(out, "%"),
            other => {
                return Err(QuarryError::Validation(format!(
                    "invalid format character %{} in $dateToString",
                    other
                )))
            }
        };
    }
    Ok(out)
}

fn date_to_string(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let args = named_args(expr, "$dateToString")?;
    let date = ctx.evaluate(doc, required(args, "date", "$dateToString")?, env)?;
    let tz = timezone_arg(ctx, doc, args.get("timezone"), env)?;
    let format = match args.get("format") {
        Some(f) => match ctx.evaluate(doc, f, env)? {
            Value::String(s) => s,
            other => {
                return Err(QuarryError::Validation(format!(
                    "$dateToString format must be a string, got {}",
                    other.kind().as_str()
                )))
            }
        },
        None => DEFAULT_FORMAT.to_string(),
    };
    match date {
        Value::Date(d) => Ok(Value::String(format_date(&d.with_timezone(&tz), &format)?)),
        v if v.is_nil() => match args.get("onNull") {
            Some(on_null) => ctx.evaluate(doc, on_null, env),
            None => Ok(Value::Null),
        },
        other => Err(QuarryError::TypeMismatch(format!(
            "$dateToString can't convert from {} to Date",
            other.kind().as_str()
        ))),
    }
}

fn date_from_string(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let args = named_args(expr, "$dateFromString")?;
    let input = ctx.evaluate(doc, required(args, "dateString", "$dateFromString")?, env)?;
    let format = match args.get("format") {
        Some(f) => ctx.evaluate(doc, f, env)?.as_str().map(str::to_string),
        None => None,
    };
    let offset = match args.get("timezone") {
        Some(_) => Some(timezone_arg(ctx, doc, args.get("timezone"), env)?),
        None => None,
    };
    let fail = |message: String| -> Result<Value> {
        match args.get("onError") {
            Some(on_error) => ctx.evaluate(doc, on_error, env),
            None => Err(QuarryError::Validation(message)),
        }
    };

    let text = match input {
        Value::String(s) => s,
        v if v.is_nil() => {
            return match args.get("onNull") {
                Some(on_null) => ctx.evaluate(doc, on_null, env),
                None => Ok(Value::Null),
            }
        }
        other => return fail(format!("$dateFromString requires a string, got {}", other.kind().as_str())),
    };

    match ctx.config().date_parser().parse(&text, format.as_deref()) {
        Some(parsed) => {
            // A wall-clock time in `timezone` is that many seconds ahead of UTC
            let shift = offset.map(|o| o.local_minus_utc() as i64).unwrap_or(0);
            Duration::try_seconds(shift)
                .and_then(|delta| parsed.checked_sub_signed(delta))
                .map(Value::Date)
                .ok_or_else(date_overflow)
        }
        None => fail(format!("error parsing date string '{}'", text)),
    }
}
