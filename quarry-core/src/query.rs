// src/query.rs
//! Predicate compiler for the filter language
//!
//! `Predicate::compile` turns a filter document into a tree of clauses once;
//! `Predicate::test` then runs it against any number of documents. Field
//! conditions are normalised at compile time:
//!
//! ```text
//! {age: 30}                      → {age: {$eq: 30}}
//! {name: /^al/i}                 → {name: {$regex: /^al/i}}
//! {name: {$regex: "^al", $options: "i"}}
//!                                → {name: {$regex: /^al/i}}
//! ```
//!
//! Top-level `$and`, `$or`, `$nor`, `$expr`, `$where` and `$comment` are
//! handled here; every other `$op` is looked up in the query operator table.
//! `$where` callbacks run after every other clause of the same document.

pub mod operators;

use crate::config::EngineConfig;
use crate::context::Context;
use crate::cursor::Cursor;
use crate::error::{QuarryError, Result};
use crate::path::Resolved;
use crate::registry::{OperatorTables, QueryOperator};
use crate::value::{Callback, Map, Value};
use crate::{log_error, log_trace};
use std::fmt;
use std::sync::Arc;

// ============================================================================
// COMPILED FORM
// ============================================================================

/// A compiled filter, reusable across documents
#[derive(Clone, Debug, Default)]
pub struct Predicate {
    clauses: Vec<Clause>,
    wheres: Vec<Callback>,
}

#[derive(Clone, Debug)]
enum Clause {
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Nor(Vec<Predicate>),
    Expr(Value),
    Field { path: String, tests: Vec<FieldTest> },
}

#[derive(Clone)]
struct FieldTest {
    name: String,
    operator: Arc<dyn QueryOperator>,
    operand: Value,
}

impl fmt::Debug for FieldTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}: {}}}", self.name, self.operand)
    }
}

impl Predicate {
    /// Compile filter criteria against the context's operator tables
    pub fn compile(ctx: &Context<'_>, criteria: &Value) -> Result<Predicate> {
        let map = criteria.as_object().ok_or_else(|| {
            QuarryError::Validation(format!(
                "query criteria must be an object, got {}",
                criteria.kind().as_str()
            ))
        })?;

        let mut predicate = Predicate::default();
        for (key, value) in map {
            match key.as_str() {
                "$and" => predicate.clauses.push(Clause::And(compile_list(ctx, key, value)?)),
                "$or" => predicate.clauses.push(Clause::Or(compile_list(ctx, key, value)?)),
                "$nor" => predicate.clauses.push(Clause::Nor(compile_list(ctx, key, value)?)),
                "$where" => predicate.wheres.push(where_callback(value)?),
                "$expr" => predicate.clauses.push(Clause::Expr(value.clone())),
                "$comment" => {}
                op if op.starts_with('$') => {
                    return Err(QuarryError::UnknownOperator(op.to_string()))
                }
                field => predicate.clauses.push(compile_field(ctx, field, value)?),
            }
        }
        Ok(predicate)
    }

    /// True for the empty filter `{}`
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty() && self.wheres.is_empty()
    }

    /// Run every clause with AND semantics, failing fast
    pub fn test(&self, ctx: &Context<'_>, doc: &Value) -> Result<bool> {
        for clause in &self.clauses {
            if !clause.test(ctx, doc)? {
                return Ok(false);
            }
        }
        Ok(self.wheres.iter().all(|callback| callback.call(doc)))
    }
}

impl Clause {
    fn test(&self, ctx: &Context<'_>, doc: &Value) -> Result<bool> {
        match self {
            Clause::And(subs) => {
                for sub in subs {
                    if !sub.test(ctx, doc)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Clause::Or(subs) => any_matches(ctx, subs, doc),
            Clause::Nor(subs) => Ok(!any_matches(ctx, subs, doc)?),
            Clause::Expr(expr) => Ok(ctx.compute(doc, expr)?.is_truthy()),
            Clause::Field { path, tests } => {
                let resolved = ctx.resolve(doc, path);
                for test in tests {
                    if !test.operator.matches(ctx, &resolved, &test.operand, doc)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }
}

fn any_matches(ctx: &Context<'_>, subs: &[Predicate], doc: &Value) -> Result<bool> {
    for sub in subs {
        if sub.test(ctx, doc)? {
            return Ok(true);
        }
    }
    Ok(false)
}

// ============================================================================
// COMPILATION HELPERS
// ============================================================================

fn compile_list(ctx: &Context<'_>, name: &str, value: &Value) -> Result<Vec<Predicate>> {
    let items = value.as_array().ok_or_else(|| {
        QuarryError::Validation(format!("{} requires an array", name))
    })?;
    if items.is_empty() {
        return Err(QuarryError::Validation(format!(
            "{} requires a non-empty array",
            name
        )));
    }
    items.iter().map(|item| Predicate::compile(ctx, item)).collect()
}

fn where_callback(value: &Value) -> Result<Callback> {
    match value {
        Value::Function(callback) => Ok(callback.clone()),
        Value::String(_) => Err(QuarryError::Validation(
            "$where requires a callback; string bodies are not evaluated".to_string(),
        )),
        other => Err(QuarryError::Validation(format!(
            "$where requires a callback, got {}",
            other.kind().as_str()
        ))),
    }
}

fn compile_field(ctx: &Context<'_>, path: &str, value: &Value) -> Result<Clause> {
    let ops = match value {
        Value::Object(spec) if spec.keys().next().map(|k| k.starts_with('$')).unwrap_or(false) => {
            if let Some(field) = spec.keys().find(|k| !k.starts_with('$')) {
                return Err(QuarryError::Validation(format!(
                    "condition on '{}' mixes operators with the field '{}'",
                    path, field
                )));
            }
            normalize_operators(spec)?
        }
        Value::Regex { .. } => vec![("$regex".to_string(), value.clone())],
        literal => vec![("$eq".to_string(), literal.clone())],
    };

    let tests = ops
        .into_iter()
        .map(|(name, operand)| {
            let operator = ctx
                .tables()
                .query(&name)
                .cloned()
                .ok_or_else(|| QuarryError::UnknownOperator(name.clone()))?;
            Ok(FieldTest {
                name,
                operator,
                operand,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Clause::Field {
        path: path.to_string(),
        tests,
    })
}

/// Operator list of a condition object, with `$regex` + `$options` folded
/// into one regex value
pub(crate) fn normalize_operators(spec: &Map) -> Result<Vec<(String, Value)>> {
    let options = match spec.get("$options") {
        None => None,
        Some(Value::String(s)) => Some(s.as_str()),
        Some(_) => {
            return Err(QuarryError::Validation(
                "$options requires a string".to_string(),
            ))
        }
    };

    let mut ops = Vec::with_capacity(spec.len());
    for (name, arg) in spec {
        match name.as_str() {
            "$options" => {
                if !spec.contains_key("$regex") {
                    return Err(QuarryError::Validation(
                        "$options requires $regex".to_string(),
                    ));
                }
            }
            "$regex" => {
                let regex = match arg {
                    Value::String(pattern) => Value::regex(pattern.clone(), options.unwrap_or("")),
                    Value::Regex { pattern, flags } => {
                        Value::regex(pattern.clone(), options.unwrap_or(flags))
                    }
                    other => {
                        return Err(QuarryError::Validation(format!(
                            "$regex requires a string pattern, got {}",
                            other.kind().as_str()
                        )))
                    }
                };
                ops.push((name.clone(), regex));
            }
            _ => ops.push((name.clone(), arg.clone())),
        }
    }
    Ok(ops)
}

/// Test a resolved value against a normalised operator list
pub(crate) fn test_operators(
    ctx: &Context<'_>,
    resolved: &Resolved,
    ops: &[(String, Value)],
    document: &Value,
) -> Result<bool> {
    for (name, operand) in ops {
        let operator = ctx
            .tables()
            .query(name)
            .ok_or_else(|| QuarryError::UnknownOperator(name.clone()))?;
        if !operator.matches(ctx, resolved, operand, document)? {
            return Ok(false);
        }
    }
    Ok(true)
}

// ============================================================================
// QUERY
// ============================================================================

/// Criteria compiled against one operator snapshot and configuration
///
/// A `Query` owns what it needs, so it can be kept, cloned and shared across
/// threads independently of the engine that built it.
#[derive(Clone)]
pub struct Query {
    tables: Arc<OperatorTables>,
    config: Arc<EngineConfig>,
    criteria: Value,
    predicate: Predicate,
    projection: Option<Value>,
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("criteria", &self.criteria)
            .field("projection", &self.projection)
            .finish()
    }
}

impl Query {
    pub fn new(
        tables: Arc<OperatorTables>,
        config: Arc<EngineConfig>,
        criteria: impl Into<Value>,
    ) -> Result<Self> {
        let criteria = criteria.into();
        let predicate = Predicate::compile(&Context::new(&tables, &config), &criteria)
            .map_err(|e| {
                log_error!("query compilation failed: {}", e);
                e
            })?;
        log_trace!(
            "query compiled to {} top-level clauses",
            predicate.clauses.len() + predicate.wheres.len()
        );
        Ok(Query {
            tables,
            config,
            criteria,
            predicate,
            projection: None,
        })
    }

    /// Projection applied by cursors created from this query
    pub fn with_projection(mut self, projection: impl Into<Value>) -> Self {
        self.projection = Some(projection.into());
        self
    }

    pub fn criteria(&self) -> &Value {
        &self.criteria
    }

    pub fn projection(&self) -> Option<&Value> {
        self.projection.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn context(&self) -> Context<'_> {
        Context::new(&self.tables, &self.config)
    }

    pub fn test(&self, doc: &Value) -> Result<bool> {
        self.predicate.test(&self.context(), doc)
    }

    /// Documents that match, in input order
    pub fn filter(&self, collection: Vec<Value>) -> Result<Vec<Value>> {
        if self.predicate.is_empty() {
            return Ok(collection);
        }
        let ctx = self.context();
        let mut out = Vec::with_capacity(collection.len());
        for doc in collection {
            if self.predicate.test(&ctx, &doc)? {
                out.push(doc);
            }
        }
        Ok(out)
    }

    /// Lazy cursor over the matching documents
    pub fn find(&self, collection: Vec<Value>) -> Cursor {
        Cursor::new(self.clone(), collection)
    }

    /// Documents that do not match, in input order
    pub fn remove(&self, collection: Vec<Value>) -> Result<Vec<Value>> {
        let ctx = self.context();
        let mut kept = Vec::with_capacity(collection.len());
        for doc in collection {
            if !self.predicate.test(&ctx, &doc)? {
                kept.push(doc);
            }
        }
        Ok(kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::test_support::ctx;
    use serde_json::json;

    fn matches(doc: serde_json::Value, criteria: serde_json::Value) -> Result<bool> {
        let ctx = ctx();
        Predicate::compile(&ctx, &Value::from(criteria))?.test(&ctx, &Value::from(doc))
    }

    #[test]
    fn test_empty_criteria_matches_all() {
        assert!(matches(json!({"a": 1}), json!({})).unwrap());
        assert!(Predicate::compile(&ctx(), &Value::object()).unwrap().is_empty());
    }

    #[test]
    fn test_literal_and_nested_paths() {
        let doc = json!({"name": "Alice", "address": {"city": "Paris"}, "tags": ["x", "y"]});
        assert!(matches(doc.clone(), json!({"name": "Alice", "address.city": "Paris"})).unwrap());
        assert!(matches(doc.clone(), json!({"tags": "y"})).unwrap());
        assert!(!matches(doc.clone(), json!({"name": "Alice", "address.city": "Rome"})).unwrap());
        assert!(matches(doc, json!({"address": {"city": "Paris"}})).unwrap());
    }

    #[test]
    fn test_operator_objects() {
        let doc = json!({"age": 30});
        assert!(matches(doc.clone(), json!({"age": {"$gt": 18, "$lt": 40}})).unwrap());
        assert!(!matches(doc.clone(), json!({"age": {"$gt": 18, "$lt": 25}})).unwrap());
        let err = matches(doc, json!({"age": {"$gt": 18, "plain": 1}})).unwrap_err();
        assert!(matches!(err, QuarryError::Validation(_)));
    }

    #[test]
    fn test_logical_operators() {
        let doc = json!({"a": 1, "b": 2});
        assert!(matches(doc.clone(), json!({"$and": [{"a": 1}, {"b": 2}]})).unwrap());
        assert!(matches(doc.clone(), json!({"$or": [{"a": 5}, {"b": 2}]})).unwrap());
        assert!(!matches(doc.clone(), json!({"$or": [{"a": 5}, {"b": 5}]})).unwrap());
        assert!(matches(doc.clone(), json!({"$nor": [{"a": 5}, {"b": 5}]})).unwrap());
        assert!(!matches(doc, json!({"$nor": [{"a": 1}]})).unwrap());
    }

    #[test]
    fn test_logical_operators_require_non_empty_array() {
        for op in ["$and", "$or", "$nor"] {
            let mut not_array = serde_json::Map::new();
            not_array.insert(op.to_string(), json!({"a": 1}));
            let err = matches(json!({}), serde_json::Value::Object(not_array)).unwrap_err();
            assert!(err.to_string().contains("requires an array"));

            let mut empty = serde_json::Map::new();
            empty.insert(op.to_string(), json!([]));
            let err = matches(json!({}), serde_json::Value::Object(empty)).unwrap_err();
            assert!(matches!(err, QuarryError::Validation(_)));
        }
    }

    #[test]
    fn test_unknown_operators() {
        let err = matches(json!({}), json!({"$bogus": 1})).unwrap_err();
        assert!(matches!(err, QuarryError::UnknownOperator(_)));
        let err = matches(json!({}), json!({"a": {"$bogus": 1}})).unwrap_err();
        assert!(matches!(err, QuarryError::UnknownOperator(_)));
    }

    #[test]
    fn test_criteria_must_be_object() {
        let err = matches(json!({}), json!([1])).unwrap_err();
        assert!(matches!(err, QuarryError::Validation(_)));
    }

    #[test]
    fn test_regex_with_options() {
        let doc = json!({"name": "ALICE"});
        assert!(matches(doc.clone(), json!({"name": {"$regex": "^al", "$options": "i"}})).unwrap());
        assert!(!matches(doc.clone(), json!({"name": {"$regex": "^al"}})).unwrap());
        assert!(matches(doc, json!({"name": {"$options": "i"}})).is_err());
    }

    #[test]
    fn test_regex_literal_normalised() {
        let mut criteria = Map::new();
        criteria.insert("name".to_string(), Value::regex("^b", "i"));
        let ctx = ctx();
        let predicate = Predicate::compile(&ctx, &Value::Object(criteria)).unwrap();
        assert!(predicate.test(&ctx, &Value::from(json!({"name": "Bob"}))).unwrap());
        assert!(!predicate.test(&ctx, &Value::from(json!({"name": "Alice"}))).unwrap());
    }

    #[test]
    fn test_not_with_regex_options() {
        let doc = json!({"name": "Alice"});
        assert!(!matches(doc.clone(), json!({"name": {"$not": {"$regex": "^a", "$options": "i"}}})).unwrap());
        assert!(matches(doc, json!({"name": {"$not": {"$regex": "^b"}}})).unwrap());
    }

    #[test]
    fn test_expr_compares_fields() {
        let doc = json!({"spent": 120, "budget": 100});
        assert!(matches(doc.clone(), json!({"$expr": {"$gt": ["$spent", "$budget"]}})).unwrap());
        assert!(!matches(doc, json!({"$expr": {"$lt": ["$spent", "$budget"]}})).unwrap());
    }

    #[test]
    fn test_comment_is_ignored() {
        assert!(matches(json!({"a": 1}), json!({"$comment": "why", "a": 1})).unwrap());
    }

    #[test]
    fn test_where_runs_callback_last() {
        let mut criteria = Map::new();
        criteria.insert(
            "$where".to_string(),
            Value::function(|doc| doc.get("a").and_then(Value::as_f64) == Some(1.0)),
        );
        criteria.insert("b".to_string(), Value::from(2));
        let ctx = ctx();
        let predicate = Predicate::compile(&ctx, &Value::Object(criteria)).unwrap();
        assert!(predicate.test(&ctx, &Value::from(json!({"a": 1, "b": 2}))).unwrap());
        assert!(!predicate.test(&ctx, &Value::from(json!({"a": 2, "b": 2}))).unwrap());
        assert!(!predicate.test(&ctx, &Value::from(json!({"a": 1, "b": 3}))).unwrap());
    }

    #[test]
    fn test_where_string_is_rejected() {
        let err = matches(json!({}), json!({"$where": "this.a == 1"})).unwrap_err();
        assert!(matches!(err, QuarryError::Validation(_)));
    }

    #[test]
    fn test_query_find_and_remove() {
        let tables = Arc::new(OperatorTables::builtin());
        let config = Arc::new(EngineConfig::default());
        let query = Query::new(tables, config, json!({"n": {"$gte": 2}})).unwrap();
        let docs: Vec<Value> = vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})]
            .into_iter()
            .map(Value::from)
            .collect();

        assert!(query.test(&docs[1]).unwrap());
        let kept = query.remove(docs.clone()).unwrap();
        assert_eq!(kept, vec![Value::from(json!({"n": 1}))]);
        let found = query.filter(docs).unwrap();
        assert_eq!(found.len(), 2);
    }
}
