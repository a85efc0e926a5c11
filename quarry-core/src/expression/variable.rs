// src/expression/variable.rs
use super::{named_args, required};
use crate::context::{Context, Env};
use crate::error::{QuarryError, Result};
use crate::registry::Operator;
use crate::value::Value;

pub(crate) fn operators() -> Vec<(&'static str, Operator)> {
    vec![("$let", Operator::expression(let_vars))]
}

/// `{$let: {vars: {...}, in: expr}}`
///
/// Variable expressions evaluate in the enclosing scope; `in` sees the new
/// bindings on top of it.
fn let_vars(ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
    let args = named_args(expr, "$let")?;
    let vars = required(args, "vars", "$let")?
        .as_object()
        .ok_or_else(|| QuarryError::Validation("$let vars must be an object".to_string()))?;
    let body = required(args, "in", "$let")?;

    let mut bindings = Vec::with_capacity(vars.len());
    for (name, var_expr) in vars {
        if name.is_empty() || name.starts_with('$') || name.contains('.') {
            return Err(QuarryError::Validation(format!("invalid variable name: {}", name)));
        }
        bindings.push((name.clone(), ctx.evaluate(doc, var_expr, env)?));
    }
    ctx.evaluate(doc, body, &env.bind(bindings))
}
