// src/registry.rs
//! Operator registry
//!
//! Every operator the engine knows, built-in or host-supplied, lives in one
//! table per class. The tables are held behind an `Arc` snapshot: a running
//! query or pipeline keeps the snapshot it started with, and registration
//! swaps in a fresh copy.
//!
//! ```text
//! Registry ── RwLock<Arc<OperatorTables>>
//!                 │
//!      ┌──────────┼──────────┬──────────┬────────────┐
//!    query   projection    group    pipeline   expression
//! ```

use crate::context::{Context, Env};
use crate::error::{QuarryError, Result};
use crate::path::Resolved;
use crate::value::Value;
use crate::{log_debug, log_info};
use ahash::AHashMap;
use lazy_static::lazy_static;
use parking_lot::RwLock;
use regex::Regex;
use std::fmt;
use std::sync::Arc;

lazy_static! {
    static ref OPERATOR_NAME: Regex = Regex::new(r"^\$\w+$").expect("static pattern");
}

/// Class an operator is registered under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorClass {
    Query,
    Projection,
    Group,
    Pipeline,
    Expression,
}

impl OperatorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperatorClass::Query => "query",
            OperatorClass::Projection => "projection",
            OperatorClass::Group => "group",
            OperatorClass::Pipeline => "pipeline",
            OperatorClass::Expression => "expression",
        }
    }
}

// ============================================================================
// CALLING CONVENTIONS
// ============================================================================

/// Query operator: tests one field of a document
///
/// `doc_value` is the resolved left-hand side, `filter_value` the operand
/// from the criteria and `document` the whole document.
pub trait QueryOperator: Send + Sync {
    fn matches(
        &self,
        ctx: &Context<'_>,
        doc_value: &Resolved,
        filter_value: &Value,
        document: &Value,
    ) -> Result<bool>;
}

/// Projection operator: computes a projected field
pub trait ProjectionOperator: Send + Sync {
    fn project(
        &self,
        ctx: &Context<'_>,
        document: &Value,
        expr: &Value,
        field: &str,
        resolved: &Resolved,
    ) -> Result<Value>;
}

/// Group operator: folds the members of a partition
///
/// With `expr` absent each member is its own value.
pub trait AccumulatorOperator: Send + Sync {
    fn accumulate(&self, ctx: &Context<'_>, members: &[Value], expr: Option<&Value>)
        -> Result<Value>;
}

/// Pipeline operator: transforms a whole collection
pub trait StageOperator: Send + Sync {
    fn execute(&self, ctx: &Context<'_>, collection: Vec<Value>, args: &Value) -> Result<Vec<Value>>;
}

/// Expression operator: receives its argument unevaluated
pub trait ExpressionOperator: Send + Sync {
    fn evaluate(&self, ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value>;
}

/// Result of a host-supplied query closure
#[derive(Debug, Clone)]
pub enum QueryOutcome {
    Bool(bool),
    /// Criteria tested against the whole document
    Query(Value),
}

impl From<bool> for QueryOutcome {
    fn from(b: bool) -> Self {
        QueryOutcome::Bool(b)
    }
}

/// An operator implementation tagged with its class
#[derive(Clone)]
pub enum Operator {
    Query(Arc<dyn QueryOperator>),
    Projection(Arc<dyn ProjectionOperator>),
    Group(Arc<dyn AccumulatorOperator>),
    Pipeline(Arc<dyn StageOperator>),
    Expression(Arc<dyn ExpressionOperator>),
}

impl fmt::Debug for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Operator::{}", self.class().as_str())
    }
}

// ============================================================================
// CLOSURE ADAPTERS
// ============================================================================

/// Wraps a closure or fn item as an operator of one class
pub struct FnOperator<F>(pub F);

impl<F> QueryOperator for FnOperator<F>
where
    F: Fn(&Context<'_>, &Resolved, &Value, &Value) -> Result<QueryOutcome> + Send + Sync,
{
    fn matches(
        &self,
        ctx: &Context<'_>,
        doc_value: &Resolved,
        filter_value: &Value,
        document: &Value,
    ) -> Result<bool> {
        match (self.0)(ctx, doc_value, filter_value, document)? {
            QueryOutcome::Bool(b) => Ok(b),
            QueryOutcome::Query(criteria) => ctx.compile(&criteria)?.test(ctx, document),
        }
    }
}

impl<F> ProjectionOperator for FnOperator<F>
where
    F: Fn(&Context<'_>, &Value, &Value, &str, &Resolved) -> Result<Value> + Send + Sync,
{
    fn project(
        &self,
        ctx: &Context<'_>,
        document: &Value,
        expr: &Value,
        field: &str,
        resolved: &Resolved,
    ) -> Result<Value> {
        (self.0)(ctx, document, expr, field, resolved)
    }
}

impl<F> AccumulatorOperator for FnOperator<F>
where
    F: Fn(&Context<'_>, &[Value], Option<&Value>) -> Result<Value> + Send + Sync,
{
    fn accumulate(&self, ctx: &Context<'_>, members: &[Value], expr: Option<&Value>) -> Result<Value> {
        (self.0)(ctx, members, expr)
    }
}

impl<F> StageOperator for FnOperator<F>
where
    F: Fn(&Context<'_>, Vec<Value>, &Value) -> Result<Vec<Value>> + Send + Sync,
{
    fn execute(&self, ctx: &Context<'_>, collection: Vec<Value>, args: &Value) -> Result<Vec<Value>> {
        (self.0)(ctx, collection, args)
    }
}

impl<F> ExpressionOperator for FnOperator<F>
where
    F: Fn(&Context<'_>, &Value, &Value, &Env<'_>) -> Result<Value> + Send + Sync,
{
    fn evaluate(&self, ctx: &Context<'_>, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
        (self.0)(ctx, doc, expr, env)
    }
}

impl Operator {
    pub fn class(&self) -> OperatorClass {
        match self {
            Operator::Query(_) => OperatorClass::Query,
            Operator::Projection(_) => OperatorClass::Projection,
            Operator::Group(_) => OperatorClass::Group,
            Operator::Pipeline(_) => OperatorClass::Pipeline,
            Operator::Expression(_) => OperatorClass::Expression,
        }
    }

    pub fn query<F>(f: F) -> Self
    where
        F: Fn(&Context<'_>, &Resolved, &Value, &Value) -> Result<QueryOutcome>
            + Send
            + Sync
            + 'static,
    {
        Operator::Query(Arc::new(FnOperator(f)))
    }

    pub fn projection<F>(f: F) -> Self
    where
        F: Fn(&Context<'_>, &Value, &Value, &str, &Resolved) -> Result<Value> + Send + Sync + 'static,
    {
        Operator::Projection(Arc::new(FnOperator(f)))
    }

    pub fn group<F>(f: F) -> Self
    where
        F: Fn(&Context<'_>, &[Value], Option<&Value>) -> Result<Value> + Send + Sync + 'static,
    {
        Operator::Group(Arc::new(FnOperator(f)))
    }

    pub fn pipeline<F>(f: F) -> Self
    where
        F: Fn(&Context<'_>, Vec<Value>, &Value) -> Result<Vec<Value>> + Send + Sync + 'static,
    {
        Operator::Pipeline(Arc::new(FnOperator(f)))
    }

    pub fn expression<F>(f: F) -> Self
    where
        F: Fn(&Context<'_>, &Value, &Value, &Env<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        Operator::Expression(Arc::new(FnOperator(f)))
    }
}

// ============================================================================
// TABLES
// ============================================================================

/// Immutable set of operator tables, one per class
#[derive(Clone, Default)]
pub struct OperatorTables {
    tables: AHashMap<OperatorClass, AHashMap<String, Operator>>,
}

impl OperatorTables {
    /// Tables holding every built-in operator
    pub fn builtin() -> Self {
        let mut tables = OperatorTables::default();
        let batches: Vec<(OperatorClass, Vec<(&'static str, Operator)>)> = vec![
            (OperatorClass::Query, crate::query::operators::builtin()),
            (OperatorClass::Projection, crate::aggregation::projection::builtin()),
            (OperatorClass::Group, crate::aggregation::accumulators::builtin()),
            (OperatorClass::Pipeline, crate::aggregation::stages::builtin()),
            (OperatorClass::Expression, crate::expression::builtin()),
        ];
        for (class, ops) in batches {
            let table = tables.tables.entry(class).or_default();
            for (name, op) in ops {
                table.insert(name.to_string(), op);
            }
        }
        tables
    }

    pub fn get(&self, class: OperatorClass, name: &str) -> Option<&Operator> {
        self.tables.get(&class).and_then(|t| t.get(name))
    }

    pub fn contains(&self, class: OperatorClass, name: &str) -> bool {
        self.get(class, name).is_some()
    }

    pub fn query(&self, name: &str) -> Option<&Arc<dyn QueryOperator>> {
        match self.get(OperatorClass::Query, name) {
            Some(Operator::Query(op)) => Some(op),
            _ => None,
        }
    }

    pub fn projection(&self, name: &str) -> Option<&Arc<dyn ProjectionOperator>> {
        match self.get(OperatorClass::Projection, name) {
            Some(Operator::Projection(op)) => Some(op),
            _ => None,
        }
    }

    pub fn group(&self, name: &str) -> Option<&Arc<dyn AccumulatorOperator>> {
        match self.get(OperatorClass::Group, name) {
            Some(Operator::Group(op)) => Some(op),
            _ => None,
        }
    }

    pub fn pipeline(&self, name: &str) -> Option<&Arc<dyn StageOperator>> {
        match self.get(OperatorClass::Pipeline, name) {
            Some(Operator::Pipeline(op)) => Some(op),
            _ => None,
        }
    }

    pub fn expression(&self, name: &str) -> Option<&Arc<dyn ExpressionOperator>> {
        match self.get(OperatorClass::Expression, name) {
            Some(Operator::Expression(op)) => Some(op),
            _ => None,
        }
    }

    /// Operator names registered under a class, sorted
    pub fn names(&self, class: OperatorClass) -> Vec<String> {
        let mut names: Vec<String> = self
            .tables
            .get(&class)
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    fn check(&self, class: OperatorClass, name: &str, op: &Operator) -> Result<()> {
        if !OPERATOR_NAME.is_match(name) {
            return Err(QuarryError::InvalidOperatorName(name.to_string()));
        }
        if op.class() != class {
            return Err(QuarryError::Validation(format!(
                "operator {} is a {} operator, cannot register as {}",
                name,
                op.class().as_str(),
                class.as_str()
            )));
        }
        if self.contains(class, name) {
            return Err(QuarryError::DuplicateOperator(format!(
                "{} ({})",
                name,
                class.as_str()
            )));
        }
        Ok(())
    }
}

/// Owner of the live operator tables
pub struct Registry {
    tables: RwLock<Arc<OperatorTables>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Registry preloaded with the built-in operators
    pub fn new() -> Self {
        Registry {
            tables: RwLock::new(Arc::new(OperatorTables::builtin())),
        }
    }

    /// Registry with no operators at all
    pub fn empty() -> Self {
        Registry {
            tables: RwLock::new(Arc::new(OperatorTables::default())),
        }
    }

    /// The snapshot execution runs against
    pub fn snapshot(&self) -> Arc<OperatorTables> {
        Arc::clone(&*self.tables.read())
    }

    pub fn register(&self, class: OperatorClass, name: &str, op: Operator) -> Result<()> {
        self.register_batch(class, vec![(name.to_string(), op)])
    }

    /// Register several operators atomically
    ///
    /// The whole batch is validated first; on any error nothing is inserted.
    pub fn register_batch(&self, class: OperatorClass, ops: Vec<(String, Operator)>) -> Result<()> {
        let mut guard = self.tables.write();
        let mut next = OperatorTables::clone(&guard);
        for (name, op) in &ops {
            next.check(class, name, op)?;
            next.tables
                .entry(class)
                .or_default()
                .insert(name.clone(), op.clone());
        }
        for (name, _) in &ops {
            log_info!("registered {} operator {}", class.as_str(), name);
        }
        *guard = Arc::new(next);
        log_debug!("operator tables swapped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_expression() -> Operator {
        Operator::expression(|_, _, _, _| Ok(Value::Null))
    }

    #[test]
    fn test_builtin_tables_cover_every_class() {
        let tables = OperatorTables::builtin();
        assert!(tables.query("$eq").is_some());
        assert!(tables.projection("$slice").is_some());
        assert!(tables.group("$sum").is_some());
        assert!(tables.pipeline("$match").is_some());
        assert!(tables.expression("$add").is_some());
        assert!(tables.expression("$sum").is_none());
    }

    #[test]
    fn test_register_rejects_bad_names() {
        let registry = Registry::new();
        let err = registry
            .register(OperatorClass::Expression, "double", noop_expression())
            .unwrap_err();
        assert!(matches!(err, QuarryError::InvalidOperatorName(_)));

        let err = registry
            .register(OperatorClass::Expression, "$bad-name", noop_expression())
            .unwrap_err();
        assert!(matches!(err, QuarryError::InvalidOperatorName(_)));
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let registry = Registry::new();
        let err = registry
            .register(OperatorClass::Expression, "$add", noop_expression())
            .unwrap_err();
        assert!(matches!(err, QuarryError::DuplicateOperator(_)));
    }

    #[test]
    fn test_register_rejects_class_mismatch() {
        let registry = Registry::new();
        let err = registry
            .register(OperatorClass::Group, "$noop", noop_expression())
            .unwrap_err();
        assert!(matches!(err, QuarryError::Validation(_)));
    }

    #[test]
    fn test_batch_is_all_or_nothing() {
        let registry = Registry::new();
        let batch = vec![
            ("$first_new".to_string(), noop_expression()),
            ("$add".to_string(), noop_expression()),
        ];
        assert!(registry
            .register_batch(OperatorClass::Expression, batch)
            .is_err());
        assert!(registry.snapshot().expression("$first_new").is_none());
    }

    #[test]
    fn test_snapshot_is_isolated_from_registration() {
        let registry = Registry::new();
        let before = registry.snapshot();
        registry
            .register(OperatorClass::Expression, "$noop", noop_expression())
            .unwrap();
        assert!(before.expression("$noop").is_none());
        assert!(registry.snapshot().expression("$noop").is_some());
    }
}
