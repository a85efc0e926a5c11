// src/context.rs
//! Execution context handed to every operator
//!
//! A `Context` pairs one operator-table snapshot with the engine
//! configuration. It is `Copy` and cheap to pass down; nested queries,
//! sub-pipelines and custom operators all go through it instead of reaching
//! for global state.

use crate::aggregation::Pipeline;
use crate::collation::Collator;
use crate::config::EngineConfig;
use crate::error::{QuarryError, Result};
use crate::expression;
use crate::path::{self, Resolved};
use crate::query::Predicate;
use crate::registry::OperatorTables;
use crate::value::{is_equal, Value};
use crate::value_utils::sort_order;
use ahash::AHashMap;
use std::cmp::Ordering;
use std::rc::Rc;

#[derive(Clone, Copy)]
pub struct Context<'a> {
    tables: &'a OperatorTables,
    config: &'a EngineConfig,
}

impl<'a> Context<'a> {
    pub fn new(tables: &'a OperatorTables, config: &'a EngineConfig) -> Self {
        Context { tables, config }
    }

    pub fn tables(&self) -> &'a OperatorTables {
        self.tables
    }

    pub fn config(&self) -> &'a EngineConfig {
        self.config
    }

    /// Same tables, different configuration
    pub fn with_config<'b>(&self, config: &'b EngineConfig) -> Context<'b>
    where
        'a: 'b,
    {
        Context {
            tables: self.tables,
            config,
        }
    }

    /// Name of the identity field (`_id` unless configured)
    pub fn id_key(&self) -> &'a str {
        &self.config.id_key
    }

    pub fn collator(&self) -> Option<&'a dyn Collator> {
        self.config.collator()
    }

    /// Total order, collation aware
    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        sort_order(a, b, self.collator())
    }

    pub fn is_equal(&self, a: &Value, b: &Value) -> bool {
        is_equal(a, b)
    }

    pub fn resolve(&self, doc: &Value, path: &str) -> Resolved {
        path::resolve(doc, path)
    }

    /// Evaluate an expression against `doc` within `env`
    pub fn evaluate(&self, doc: &Value, expr: &Value, env: &Env<'_>) -> Result<Value> {
        expression::evaluate(self, doc, expr, env)
    }

    /// Evaluate with a fresh environment rooted at `doc`
    pub fn compute(&self, doc: &Value, expr: &Value) -> Result<Value> {
        expression::evaluate(self, doc, expr, &Env::new(doc))
    }

    pub fn apply_operator(&self, doc: &Value, name: &str, arg: &Value, env: &Env<'_>) -> Result<Value> {
        expression::apply_operator(self, doc, name, arg, env)
    }

    /// Evaluate an operator argument list
    ///
    /// An array argument evaluates element-wise; anything else is a single
    /// argument.
    pub fn evaluate_args(&self, doc: &Value, args: &Value, env: &Env<'_>) -> Result<Vec<Value>> {
        match args {
            Value::Array(items) => items.iter().map(|e| self.evaluate(doc, e, env)).collect(),
            other => Ok(vec![self.evaluate(doc, other, env)?]),
        }
    }

    /// Per-member values of an accumulator expression
    ///
    /// With no expression the members themselves are the values.
    pub fn compute_members(&self, members: &[Value], expr: Option<&Value>) -> Result<Vec<Value>> {
        match expr {
            None => Ok(members.to_vec()),
            Some(e) => members.iter().map(|m| self.compute(m, e)).collect(),
        }
    }

    /// Run the group operator `name` over `members`
    pub fn accumulate(&self, name: &str, members: &[Value], expr: Option<&Value>) -> Result<Value> {
        let op = self
            .tables
            .group(name)
            .ok_or_else(|| QuarryError::UnknownOperator(name.to_string()))?;
        op.accumulate(self, members, expr)
    }

    /// Compile filter criteria against this context's tables
    pub fn compile(&self, criteria: &Value) -> Result<Predicate> {
        Predicate::compile(self, criteria)
    }

    /// Parse and run a pipeline given as an array of stages
    pub fn run_pipeline(&self, collection: Vec<Value>, stages: &Value) -> Result<Vec<Value>> {
        Pipeline::parse(self, stages)?.execute(self, collection)
    }
}

#[derive(Debug)]
struct Frame {
    vars: AHashMap<String, Value>,
    parent: Option<Rc<Frame>>,
}

/// Variable environment of an expression
///
/// Holds the root document (`$$ROOT`) and a chain of binding frames. Inner
/// frames shadow outer ones; binding never touches the documents.
#[derive(Debug, Clone)]
pub struct Env<'a> {
    root: &'a Value,
    frame: Option<Rc<Frame>>,
}

impl<'a> Env<'a> {
    pub fn new(root: &'a Value) -> Self {
        Env { root, frame: None }
    }

    pub fn root(&self) -> &'a Value {
        self.root
    }

    /// Child environment with extra bindings
    pub fn bind<I>(&self, vars: I) -> Env<'a>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        Env {
            root: self.root,
            frame: Some(Rc::new(Frame {
                vars: vars.into_iter().collect(),
                parent: self.frame.clone(),
            })),
        }
    }

    /// Innermost binding of `name`
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        let mut frame = self.frame.as_deref();
        while let Some(f) = frame {
            if let Some(v) = f.vars.get(name) {
                return Some(v);
            }
            frame = f.parent.as_deref();
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use serde_json::json;

    #[test]
    fn test_env_shadowing() {
        let root = Value::from(json!({"a": 1}));
        let outer = Env::new(&root).bind(vec![("x".to_string(), Value::from(1))]);
        let inner = outer.bind(vec![("x".to_string(), Value::from(2))]);
        assert_eq!(inner.lookup("x"), Some(&Value::from(2)));
        assert_eq!(outer.lookup("x"), Some(&Value::from(1)));
        assert_eq!(inner.lookup("y"), None);
        assert_eq!(inner.root(), &root);
    }

    #[test]
    fn test_context_helpers() {
        let registry = Registry::new();
        let tables = registry.snapshot();
        let config = EngineConfig::default();
        let ctx = Context::new(&tables, &config);

        assert_eq!(ctx.id_key(), "_id");
        let doc = Value::from(json!({"a": 2, "b": 3}));
        let sum = ctx.compute(&doc, &Value::from(json!({"$add": ["$a", "$b"]}))).unwrap();
        assert_eq!(sum, Value::from(5));

        let members = vec![doc.clone(), Value::from(json!({"a": 4}))];
        let total = ctx
            .accumulate("$sum", &members, Some(&Value::from("$a")))
            .unwrap();
        assert_eq!(total, Value::from(6));

        assert!(matches!(
            ctx.accumulate("$nope", &members, None),
            Err(QuarryError::UnknownOperator(_))
        ));
    }
}
