// src/expression/literal.rs
use crate::context::{Context, Env};
use crate::error::Result;
use crate::registry::Operator;
use crate::value::Value;

pub(crate) fn operators() -> Vec<(&'static str, Operator)> {
    vec![("$literal", Operator::expression(literal))]
}

/// Returns the argument without evaluating it
fn literal(_ctx: &Context<'_>, _doc: &Value, expr: &Value, _env: &Env<'_>) -> Result<Value> {
    Ok(expr.clone())
}
