// src/engine.rs
// Engine API - owns configuration and operator registry

use std::sync::Arc;

use crate::aggregation::Pipeline;
use crate::config::EngineConfig;
use crate::context::Context;
use crate::cursor::Cursor;
use crate::error::Result;
use crate::logging::set_log_level;
use crate::query::Query;
use crate::registry::{Operator, OperatorClass, Registry};
use crate::value::Value;
use crate::{log_debug, log_error, log_info};

/// Query and aggregation engine
///
/// Collections are plain `Vec<Value>` owned by the caller; the engine never
/// stores documents. Every call runs against the operator snapshot current
/// when it starts, so registering operators never affects a running call.
pub struct Engine {
    config: Arc<EngineConfig>,
    registry: Registry,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Engine with the default configuration and the built-in operators
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Engine with an explicit configuration
    ///
    /// A configured log level is applied process-wide.
    pub fn with_config(config: EngineConfig) -> Self {
        if let Some(level) = config.log_level {
            set_log_level(level);
        }
        log_info!("engine created (id key '{}')", config.id_key);
        Engine {
            config: Arc::new(config),
            registry: Registry::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Compile criteria into a reusable query
    pub fn query(&self, criteria: impl Into<Value>) -> Result<Query> {
        Query::new(self.registry.snapshot(), Arc::clone(&self.config), criteria)
    }

    /// Cursor over the documents matching `criteria`
    pub fn find(
        &self,
        collection: Vec<Value>,
        criteria: impl Into<Value>,
        projection: Option<Value>,
    ) -> Result<Cursor> {
        let query = match projection {
            Some(spec) => self.query(criteria)?.with_projection(spec),
            None => self.query(criteria)?,
        };
        Ok(query.find(collection))
    }

    /// The documents that do not match `criteria`
    pub fn remove(&self, collection: Vec<Value>, criteria: impl Into<Value>) -> Result<Vec<Value>> {
        self.query(criteria)?.remove(collection)
    }

    /// Run an aggregation pipeline
    ///
    /// The pipeline is parsed completely before any stage runs.
    pub fn aggregate(&self, collection: Vec<Value>, pipeline: &Value) -> Result<Vec<Value>> {
        let tables = self.registry.snapshot();
        let ctx = Context::new(&tables, &self.config);
        Pipeline::parse(&ctx, pipeline)
            .and_then(|pipeline| {
                log_debug!(
                    "aggregate: {} stages over {} documents",
                    pipeline.len(),
                    collection.len()
                );
                pipeline.execute(&ctx, collection)
            })
            .map_err(|e| {
                log_error!("aggregate failed: {}", e);
                e
            })
    }

    /// `aggregate` for hosts holding `serde_json` documents
    pub fn aggregate_json(
        &self,
        collection: &[serde_json::Value],
        pipeline: &serde_json::Value,
    ) -> Result<Vec<serde_json::Value>> {
        let docs = collection.iter().map(Value::from).collect();
        let out = self.aggregate(docs, &Value::from(pipeline))?;
        Ok(out.iter().map(Value::to_json).collect())
    }

    /// `aggregate` over JSON text
    pub fn aggregate_str(&self, collection: &str, pipeline: &str) -> Result<String> {
        let docs: Vec<serde_json::Value> = serde_json::from_str(collection)?;
        let pipeline: serde_json::Value = serde_json::from_str(pipeline)?;
        let out = self.aggregate_json(&docs, &pipeline)?;
        Ok(serde_json::to_string(&out)?)
    }

    /// Register a batch of operators built against the current tables
    ///
    /// The factory sees a context over the tables as they are before the
    /// batch, so it can delegate to existing operators. The batch is
    /// all-or-nothing.
    pub fn register_operators<F>(&self, class: OperatorClass, factory: F) -> Result<()>
    where
        F: FnOnce(&Context<'_>) -> Vec<(String, Operator)>,
    {
        let tables = self.registry.snapshot();
        let ops = factory(&Context::new(&tables, &self.config));
        self.registry.register_batch(class, ops)
    }

    pub fn register_operator(&self, class: OperatorClass, name: &str, op: Operator) -> Result<()> {
        self.registry.register(class, name, op)
    }
}
