// src/aggregation.rs
//! Aggregation pipeline
//!
//! A pipeline is an array of single-key stage objects. `Pipeline::parse`
//! checks the shape and resolves every stage name against the pipeline
//! operator table before anything runs, so an unknown stage aborts the call
//! without touching the input. `execute` then threads the collection through
//! the stages in order.

pub(crate) mod accumulators;
pub(crate) mod projection;
pub(crate) mod stages;

use crate::context::Context;
use crate::error::{QuarryError, Result};
use crate::registry::StageOperator;
use crate::value::Value;
use crate::{log_debug, log_trace};
use std::fmt;
use std::sync::Arc;

/// A parsed pipeline
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

#[derive(Clone)]
struct Stage {
    name: String,
    operator: Arc<dyn StageOperator>,
    args: Value,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.stages.iter().map(|s| &s.name))
            .finish()
    }
}

impl Pipeline {
    /// Parse a pipeline from an array of stage objects
    pub fn parse(ctx: &Context<'_>, pipeline: &Value) -> Result<Self> {
        let items = pipeline.as_array().ok_or_else(|| {
            QuarryError::Validation("pipeline must be an array".to_string())
        })?;

        let mut stages = Vec::with_capacity(items.len());
        for item in items {
            let map = item.as_object().ok_or_else(|| {
                QuarryError::Validation("each pipeline stage must be an object".to_string())
            })?;
            if map.len() != 1 {
                return Err(QuarryError::Validation(format!(
                    "each pipeline stage must have exactly one key, got {}",
                    map.len()
                )));
            }
            if let Some((name, args)) = map.iter().next() {
                let operator = ctx
                    .tables()
                    .pipeline(name)
                    .cloned()
                    .ok_or_else(|| QuarryError::UnknownOperator(name.clone()))?;
                stages.push(Stage {
                    name: name.clone(),
                    operator,
                    args: args.clone(),
                });
            }
        }
        Ok(Pipeline { stages })
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Run every stage in order
    pub fn execute(&self, ctx: &Context<'_>, collection: Vec<Value>) -> Result<Vec<Value>> {
        let mut current = collection;
        for (i, stage) in self.stages.iter().enumerate() {
            log_debug!("stage {} {} on {} documents", i, stage.name, current.len());
            current = stage.operator.execute(ctx, current, &stage.args)?;
            log_trace!("stage {} {} produced {} documents", i, stage.name, current.len());
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::test_support::ctx;
    use serde_json::json;

    fn parse(stages: serde_json::Value) -> Result<Pipeline> {
        Pipeline::parse(&ctx(), &Value::from(stages))
    }

    #[test]
    fn test_pipeline_not_array() {
        let err = parse(json!({"$match": {}})).unwrap_err();
        assert!(err.to_string().contains("must be an array"));
    }

    #[test]
    fn test_pipeline_empty() {
        let pipeline = parse(json!([])).unwrap();
        assert!(pipeline.is_empty());
        let docs = vec![Value::from(json!({"a": 1}))];
        assert_eq!(pipeline.execute(&ctx(), docs.clone()).unwrap(), docs);
    }

    #[test]
    fn test_stage_not_object() {
        let err = parse(json!(["$match"])).unwrap_err();
        assert!(matches!(err, QuarryError::Validation(_)));
    }

    #[test]
    fn test_stage_multiple_operators() {
        let err = parse(json!([{"$match": {}, "$limit": 1}])).unwrap_err();
        assert!(err.to_string().contains("exactly one key"));
    }

    #[test]
    fn test_stage_unknown_operator() {
        let err = parse(json!([{"$match": {}}, {"$teleport": 1}])).unwrap_err();
        assert!(matches!(err, QuarryError::UnknownOperator(ref name) if name == "$teleport"));
    }

    #[test]
    fn test_stage_names() {
        let pipeline = parse(json!([{"$match": {}}, {"$limit": 2}])).unwrap();
        assert_eq!(pipeline.len(), 2);
        assert_eq!(pipeline.stage_names(), vec!["$match", "$limit"]);
    }
}
