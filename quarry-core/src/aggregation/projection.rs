// src/aggregation/projection.rs
//! `$project` evaluation and the projection-only operators
//!
//! A projection spec is either pure inclusion (`1`, `true`, computed
//! expressions) or pure exclusion (`0`, `false`); only the identity field may
//! be excluded from an inclusion spec. Projection operators (`$slice` with a
//! numeric argument, `$elemMatch`, `$stdDevPop`, `$stdDevSamp`) fit either
//! mode.

use super::accumulators::std_dev;
use crate::context::Context;
use crate::error::{QuarryError, Result};
use crate::expression::array::slice_items;
use crate::path::{merge_into, remove_value, resolve, resolve_obj, set_value, Resolved};
use crate::registry::{Operator, ProjectionOperator};
use crate::value::{Map, Value};
use std::sync::Arc;

pub(crate) fn builtin() -> Vec<(&'static str, Operator)> {
    vec![
        ("$slice", Operator::projection(slice)),
        ("$elemMatch", Operator::projection(elem_match)),
        ("$stdDevPop", Operator::projection(std_dev_pop)),
        ("$stdDevSamp", Operator::projection(std_dev_samp)),
    ]
}

// ============================================================================
// PROJECTION OPERATORS
// ============================================================================

fn slice(
    _ctx: &Context<'_>,
    _document: &Value,
    expr: &Value,
    field: &str,
    resolved: &Resolved,
) -> Result<Value> {
    let (skip, n) = match expr {
        Value::Number(_) => (None, slice_count(expr, field)?),
        Value::Array(args) if args.len() == 2 => {
            let skip = args[0].as_i64().ok_or_else(|| slice_error(field))?;
            let n = slice_count(&args[1], field)?;
            if n <= 0 {
                return Err(QuarryError::Validation(format!(
                    "$slice on '{}' requires a positive count",
                    field
                )));
            }
            (Some(skip), n)
        }
        _ => return Err(slice_error(field)),
    };
    Ok(match resolved.to_value() {
        Value::Array(items) => Value::Array(slice_items(&items, skip, n)),
        other => other,
    })
}

fn slice_count(value: &Value, field: &str) -> Result<i64> {
    value.as_i64().ok_or_else(|| slice_error(field))
}

fn slice_error(field: &str) -> QuarryError {
    QuarryError::Validation(format!(
        "$slice on '{}' requires n or [skip, n] integers",
        field
    ))
}

/// First array element matching the criteria, as a one-element array
fn elem_match(
    ctx: &Context<'_>,
    _document: &Value,
    expr: &Value,
    _field: &str,
    resolved: &Resolved,
) -> Result<Value> {
    let predicate = ctx.compile(expr)?;
    let Resolved::Value(Value::Array(items)) = resolved else {
        return Ok(Value::Undefined);
    };
    for item in items {
        if item.is_object() && predicate.test(ctx, item)? {
            return Ok(Value::Array(vec![item.clone()]));
        }
    }
    Ok(Value::Undefined)
}

fn numeric_values(ctx: &Context<'_>, document: &Value, expr: &Value) -> Result<Vec<f64>> {
    Ok(match ctx.compute(document, expr)? {
        Value::Array(items) => items.iter().filter_map(Value::as_f64).collect(),
        single => single.as_f64().into_iter().collect(),
    })
}

fn std_dev_pop(
    ctx: &Context<'_>,
    document: &Value,
    expr: &Value,
    _field: &str,
    _resolved: &Resolved,
) -> Result<Value> {
    let values = numeric_values(ctx, document, expr)?;
    Ok(std_dev(&values, 0.0).map(Value::Number).unwrap_or(Value::Null))
}

fn std_dev_samp(
    ctx: &Context<'_>,
    document: &Value,
    expr: &Value,
    _field: &str,
    _resolved: &Resolved,
) -> Result<Value> {
    let values = numeric_values(ctx, document, expr)?;
    Ok(std_dev(&values, 1.0).map(Value::Number).unwrap_or(Value::Null))
}

// ============================================================================
// PROJECTION SPEC
// ============================================================================

#[derive(Clone)]
enum FieldSpec {
    Include,
    Exclude,
    Computed(Value),
    Operator {
        operator: Arc<dyn ProjectionOperator>,
        arg: Value,
    },
}

impl FieldSpec {
    fn is_inclusion(&self) -> bool {
        matches!(self, FieldSpec::Include | FieldSpec::Computed(_))
    }
}

/// A validated projection
#[derive(Clone)]
pub(crate) struct Projection {
    fields: Vec<(String, FieldSpec)>,
    inclusion: bool,
}

impl Projection {
    pub(crate) fn parse(ctx: &Context<'_>, spec: &Value) -> Result<Self> {
        let map = spec.as_object().ok_or_else(|| {
            QuarryError::Validation("$project requires an object".to_string())
        })?;

        let mut flat = Vec::with_capacity(map.len());
        flatten_spec(map, None, &mut flat);

        let mut fields = Vec::with_capacity(flat.len());
        for (path, value) in flat {
            fields.push((path, classify(ctx, value)?));
        }

        let inclusion = fields.iter().any(|(_, f)| f.is_inclusion());
        if inclusion {
            if let Some((path, _)) = fields
                .iter()
                .find(|(p, f)| matches!(f, FieldSpec::Exclude) && p != ctx.id_key())
            {
                return Err(QuarryError::Validation(format!(
                    "$project cannot mix inclusion and exclusion (field '{}')",
                    path
                )));
            }
        }
        Ok(Projection { fields, inclusion })
    }

    fn excludes(&self, path: &str) -> bool {
        self.fields
            .iter()
            .any(|(p, f)| p == path && matches!(f, FieldSpec::Exclude))
    }

    pub(crate) fn apply(&self, ctx: &Context<'_>, doc: &Value) -> Result<Value> {
        let mut out = if self.inclusion {
            let mut base = Map::new();
            let id_key = ctx.id_key();
            if !self.excludes(id_key) {
                if let Some(id) = doc.get(id_key) {
                    base.insert(id_key.to_string(), id.clone());
                }
            }
            Value::Object(base)
        } else {
            doc.clone()
        };

        for (path, field) in &self.fields {
            match field {
                FieldSpec::Include => {
                    if let Some(part) = resolve_obj(doc, path) {
                        merge_into(&mut out, part);
                    }
                }
                FieldSpec::Exclude => remove_value(&mut out, path),
                FieldSpec::Computed(expr) => {
                    let value = ctx.compute(doc, expr)?;
                    if !value.is_undefined() {
                        set_value(&mut out, path, value);
                    }
                }
                FieldSpec::Operator { operator, arg } => {
                    let resolved = resolve(doc, path);
                    let value = operator.project(ctx, doc, arg, path, &resolved)?;
                    if value.is_undefined() {
                        remove_value(&mut out, path);
                    } else {
                        set_value(&mut out, path, value);
                    }
                }
            }
        }
        Ok(out)
    }
}

/// `{a: {b: 1}}` is the same spec as `{"a.b": 1}`
fn flatten_spec<'v>(map: &'v Map, prefix: Option<&str>, out: &mut Vec<(String, &'v Value)>) {
    for (key, value) in map {
        let path = match prefix {
            Some(p) => format!("{}.{}", p, key),
            None => key.clone(),
        };
        match value {
            Value::Object(inner) if !inner.is_empty() && !inner.keys().any(|k| k.starts_with('$')) => {
                flatten_spec(inner, Some(&path), out)
            }
            _ => out.push((path, value)),
        }
    }
}

fn classify(ctx: &Context<'_>, value: &Value) -> Result<FieldSpec> {
    Ok(match value {
        Value::Bool(true) => FieldSpec::Include,
        Value::Bool(false) => FieldSpec::Exclude,
        Value::Number(n) if *n == 0.0 => FieldSpec::Exclude,
        Value::Number(_) => FieldSpec::Include,
        Value::Object(_) => match value.as_operator() {
            Some((name, arg)) if is_projection_call(name, arg) => {
                match ctx.tables().projection(name) {
                    Some(operator) => FieldSpec::Operator {
                        operator: Arc::clone(operator),
                        arg: arg.clone(),
                    },
                    None => FieldSpec::Computed(value.clone()),
                }
            }
            _ => FieldSpec::Computed(value.clone()),
        },
        other => FieldSpec::Computed(other.clone()),
    })
}

/// `$slice` is a projection operator only with literal integer arguments;
/// `{$slice: ["$arr", 2]}` is the expression operator
fn is_projection_call(name: &str, arg: &Value) -> bool {
    if name != "$slice" {
        return true;
    }
    match arg {
        Value::Number(_) => true,
        Value::Array(args) => args.iter().all(Value::is_number),
        _ => false,
    }
}
