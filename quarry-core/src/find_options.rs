// src/find_options.rs
// Find options: sort, skip, limit, projection, collation

use crate::collation::CollationSpec;
use crate::value::{Map, Value};

/// Options a cursor applies after filtering
///
/// They run as ordinary pipeline stages, in the order
/// `$sort → $skip → $limit → $project`.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Projection: same shape as a `$project` stage
    pub projection: Option<Value>,

    /// Sort: `{field: 1 | -1, ...}`, most significant key first
    pub sort: Option<Value>,

    /// Limit: maximum number of documents to return
    pub limit: Option<usize>,

    /// Skip: number of documents to skip (for pagination)
    pub skip: Option<usize>,

    /// String collation for sorting
    pub collation: Option<CollationSpec>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_projection(mut self, projection: impl Into<Value>) -> Self {
        self.projection = Some(projection.into());
        self
    }

    pub fn with_sort(mut self, sort: impl Into<Value>) -> Self {
        self.sort = Some(sort.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn with_collation(mut self, collation: CollationSpec) -> Self {
        self.collation = Some(collation);
        self
    }

    /// The options as a pipeline
    pub fn to_stages(&self) -> Value {
        let mut stages = Vec::new();
        if let Some(sort) = &self.sort {
            stages.push(stage("$sort", sort.clone()));
        }
        if let Some(skip) = self.skip {
            stages.push(stage("$skip", Value::from(skip)));
        }
        if let Some(limit) = self.limit {
            stages.push(stage("$limit", Value::from(limit)));
        }
        if let Some(projection) = &self.projection {
            stages.push(stage("$project", projection.clone()));
        }
        Value::Array(stages)
    }
}

fn stage(name: &str, args: Value) -> Value {
    let mut map = Map::new();
    map.insert(name.to_string(), args);
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_no_options_no_stages() {
        assert_eq!(FindOptions::new().to_stages().to_json(), json!([]));
    }

    #[test]
    fn test_stage_order() {
        let options = FindOptions::new()
            .with_projection(json!({"name": 1}))
            .with_limit(5)
            .with_skip(10)
            .with_sort(json!({"age": -1}));

        assert_eq!(
            options.to_stages().to_json(),
            json!([
                {"$sort": {"age": -1}},
                {"$skip": 10},
                {"$limit": 5},
                {"$project": {"name": 1}}
            ])
        );
    }

    #[test]
    fn test_collation_is_not_a_stage() {
        let options = FindOptions::new().with_collation(CollationSpec::new("en"));
        assert!(options.collation.is_some());
        assert_eq!(options.to_stages().to_json(), json!([]));
    }
}
