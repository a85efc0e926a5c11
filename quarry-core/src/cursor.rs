// src/cursor.rs
//! Lazy find cursor
//!
//! A cursor holds the collection, the compiled query and the find options.
//! Nothing runs until the first materialising call; the query filters the
//! collection once, then the options run as `$sort → $skip → $limit →
//! $project` and the result is cached. Changing an option drops the cached
//! result but keeps the filtered documents.

use crate::collation::CollationSpec;
use crate::error::Result;
use crate::find_options::FindOptions;
use crate::log_debug;
use crate::query::Query;
use crate::value::Value;

#[derive(Debug, Clone)]
pub struct Cursor {
    query: Query,
    documents: Vec<Value>,
    filtered: bool,
    options: FindOptions,
    results: Option<Vec<Value>>,
    position: usize,
}

impl Cursor {
    pub fn new(query: Query, collection: Vec<Value>) -> Self {
        let mut options = FindOptions::new();
        options.projection = query.projection().cloned();
        Cursor {
            query,
            documents: collection,
            filtered: false,
            options,
            results: None,
            position: 0,
        }
    }

    pub fn options(&self) -> &FindOptions {
        &self.options
    }

    fn reset(mut self) -> Self {
        self.results = None;
        self.position = 0;
        self
    }

    /// Sort spec `{field: 1 | -1, ...}`
    pub fn sort(mut self, spec: impl Into<Value>) -> Self {
        self.options.sort = Some(spec.into());
        self.reset()
    }

    pub fn skip(mut self, n: usize) -> Self {
        self.options.skip = Some(n);
        self.reset()
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.options.limit = Some(n);
        self.reset()
    }

    pub fn project(mut self, spec: impl Into<Value>) -> Self {
        self.options.projection = Some(spec.into());
        self.reset()
    }

    pub fn collation(mut self, spec: CollationSpec) -> Self {
        self.options.collation = Some(spec);
        self.reset()
    }

    fn materialize(&mut self) -> Result<&[Value]> {
        if self.results.is_none() {
            if !self.filtered {
                self.documents = self.query.filter(self.documents.clone())?;
                self.filtered = true;
            }
            let stages = self.options.to_stages();
            let ctx = self.query.context();
            let results = match &self.options.collation {
                Some(spec) => {
                    let config = self.query.config().clone().with_collation(spec.clone());
                    ctx.with_config(&config)
                        .run_pipeline(self.documents.clone(), &stages)?
                }
                None => ctx.run_pipeline(self.documents.clone(), &stages)?,
            };
            log_debug!(
                "cursor materialized {} of {} matching documents",
                results.len(),
                self.documents.len()
            );
            self.results = Some(results);
        }
        Ok(self.results.as_deref().unwrap_or_default())
    }

    /// Every result, regardless of the iteration position
    pub fn all(&mut self) -> Result<Vec<Value>> {
        Ok(self.materialize()?.to_vec())
    }

    pub fn first(&mut self) -> Result<Option<Value>> {
        Ok(self.materialize()?.first().cloned())
    }

    pub fn last(&mut self) -> Result<Option<Value>> {
        Ok(self.materialize()?.last().cloned())
    }

    /// Number of results after skip and limit
    pub fn count(&mut self) -> Result<usize> {
        Ok(self.materialize()?.len())
    }

    pub fn has_next(&mut self) -> Result<bool> {
        let position = self.position;
        Ok(position < self.materialize()?.len())
    }

    /// Get the next document
    pub fn next(&mut self) -> Result<Option<Value>> {
        let position = self.position;
        let doc = self.materialize()?.get(position).cloned();
        if doc.is_some() {
            self.position += 1;
        }
        Ok(doc)
    }

    /// Get the next `n` documents
    pub fn next_batch(&mut self, n: usize) -> Result<Vec<Value>> {
        let start = self.position;
        let batch: Vec<Value> = self.materialize()?.iter().skip(start).take(n).cloned().collect();
        self.position += batch.len();
        Ok(batch)
    }

    /// Get remaining count
    pub fn remaining(&mut self) -> Result<usize> {
        let position = self.position;
        Ok(self.materialize()?.len().saturating_sub(position))
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn rewind(&mut self) {
        self.position = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::registry::OperatorTables;
    use serde_json::json;
    use std::sync::Arc;

    fn cursor(criteria: serde_json::Value, docs: serde_json::Value) -> Cursor {
        let query = Query::new(
            Arc::new(OperatorTables::builtin()),
            Arc::new(EngineConfig::default()),
            criteria,
        )
        .unwrap();
        let docs = match Value::from(docs) {
            Value::Array(items) => items,
            _ => unreachable!(),
        };
        query.find(docs)
    }

    fn people() -> serde_json::Value {
        json!([
            {"_id": 1, "name": "Ann", "age": 31},
            {"_id": 2, "name": "Bob", "age": 17},
            {"_id": 3, "name": "Cid", "age": 45},
            {"_id": 4, "name": "Dee", "age": 22}
        ])
    }

    fn ids(docs: &[Value]) -> Vec<serde_json::Value> {
        docs.iter().map(|d| d.to_json()["_id"].clone()).collect()
    }

    #[test]
    fn test_filter_sort_skip_limit() {
        let mut c = cursor(json!({"age": {"$gte": 18}}), people())
            .sort(json!({"age": -1}))
            .skip(1)
            .limit(1);
        assert_eq!(ids(&c.all().unwrap()), vec![json!(1)]);
        assert_eq!(c.count().unwrap(), 1);
    }

    #[test]
    fn test_iteration() {
        let mut c = cursor(json!({}), people()).sort(json!({"name": 1}));
        assert!(c.has_next().unwrap());
        assert_eq!(c.next().unwrap().unwrap().to_json()["name"], json!("Ann"));
        assert_eq!(ids(&c.next_batch(2).unwrap()), vec![json!(2), json!(3)]);
        assert_eq!(c.remaining().unwrap(), 1);
        assert_eq!(c.next().unwrap().unwrap().to_json()["_id"], json!(4));
        assert!(!c.has_next().unwrap());
        assert!(c.next().unwrap().is_none());
        c.rewind();
        assert_eq!(c.position(), 0);
        assert!(c.has_next().unwrap());
    }

    #[test]
    fn test_first_last_and_projection() {
        let mut c = cursor(json!({"age": {"$lt": 40}}), people()).project(json!({"name": 1, "_id": 0}));
        assert_eq!(c.first().unwrap().unwrap().to_json(), json!({"name": "Ann"}));
        assert_eq!(c.last().unwrap().unwrap().to_json(), json!({"name": "Dee"}));
    }

    #[test]
    fn test_changing_options_drops_cache() {
        let mut c = cursor(json!({}), people()).limit(1);
        assert_eq!(c.count().unwrap(), 1);
        let mut c = c.limit(3);
        assert_eq!(c.count().unwrap(), 3);
    }

    #[test]
    fn test_collation_numeric_ordering() {
        let docs = json!([{"_id": 1, "s": "item10"}, {"_id": 2, "s": "item2"}]);
        let mut plain = cursor(json!({}), docs.clone()).sort(json!({"s": 1}));
        assert_eq!(ids(&plain.all().unwrap()), vec![json!(1), json!(2)]);

        let mut collated = cursor(json!({}), docs)
            .sort(json!({"s": 1}))
            .collation(CollationSpec::new("en").with_numeric_ordering(true));
        assert_eq!(ids(&collated.all().unwrap()), vec![json!(2), json!(1)]);
    }

    #[test]
    fn test_invalid_sort_surfaces_on_materialize() {
        let mut c = cursor(json!({}), people()).sort(json!({"age": 0}));
        assert!(c.all().is_err());
    }
}
