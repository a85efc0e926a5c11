// src/config.rs
//! Engine configuration
//!
//! `EngineConfig` is built once and injected into the engine explicitly; it
//! is shared read-only by every query, cursor and pipeline the engine runs.

use crate::collation::{BasicCollator, ChronoDateParser, CollationSpec, Collator, DateParser};
use crate::error::{QuarryError, Result};
use crate::logging::LogLevel;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub const DEFAULT_ID_KEY: &str = "_id";

/// Looks up a named collection for `$lookup`
pub trait CollectionResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Option<Vec<Value>>;
}

impl<F> CollectionResolver for F
where
    F: Fn(&str) -> Option<Vec<Value>> + Send + Sync,
{
    fn resolve(&self, name: &str) -> Option<Vec<Value>> {
        self(name)
    }
}

/// Serialisable subset of the configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSettings {
    #[serde(default)]
    pub id_key: Option<String>,
    #[serde(default)]
    pub collation: Option<CollationSpec>,
    #[serde(default)]
    pub log_level: Option<String>,
}

#[derive(Clone)]
pub struct EngineConfig {
    pub id_key: String,
    pub collation: Option<CollationSpec>,
    pub log_level: Option<LogLevel>,
    collator: Option<Arc<dyn Collator>>,
    date_parser: Arc<dyn DateParser>,
    collection_resolver: Option<Arc<dyn CollectionResolver>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            id_key: DEFAULT_ID_KEY.to_string(),
            collation: None,
            log_level: None,
            collator: None,
            date_parser: Arc::new(ChronoDateParser),
            collection_resolver: None,
        }
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("id_key", &self.id_key)
            .field("collation", &self.collation)
            .field("log_level", &self.log_level)
            .field("collator", &self.collator)
            .field("date_parser", &self.date_parser)
            .field("collection_resolver", &self.collection_resolver.is_some())
            .finish()
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id_key(mut self, id_key: impl Into<String>) -> Self {
        self.id_key = id_key.into();
        self
    }

    /// Collate strings with a `BasicCollator` built from `spec`
    pub fn with_collation(mut self, spec: CollationSpec) -> Self {
        self.collator = Some(Arc::new(BasicCollator::new(spec.clone())));
        self.collation = Some(spec);
        self
    }

    /// Collate strings with a host-supplied comparator
    pub fn with_collator(mut self, collator: Arc<dyn Collator>) -> Self {
        self.collator = Some(collator);
        self
    }

    pub fn with_date_parser(mut self, parser: Arc<dyn DateParser>) -> Self {
        self.date_parser = parser;
        self
    }

    pub fn with_collection_resolver(mut self, resolver: Arc<dyn CollectionResolver>) -> Self {
        self.collection_resolver = Some(resolver);
        self
    }

    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = Some(level);
        self
    }

    /// Build from a JSON settings object
    ///
    /// ```
    /// use quarry_core::EngineConfig;
    /// use serde_json::json;
    ///
    /// let config = EngineConfig::from_json(&json!({"idKey": "key"})).unwrap();
    /// assert_eq!(config.id_key, "key");
    /// ```
    pub fn from_json(settings: &serde_json::Value) -> Result<Self> {
        let settings: EngineSettings = serde_json::from_value(settings.clone())?;
        Self::from_settings(settings)
    }

    pub fn from_settings(settings: EngineSettings) -> Result<Self> {
        let mut config = EngineConfig::default();
        if let Some(id_key) = settings.id_key {
            if id_key.is_empty() {
                return Err(QuarryError::Validation("idKey must not be empty".to_string()));
            }
            config = config.with_id_key(id_key);
        }
        if let Some(spec) = settings.collation {
            config = config.with_collation(spec);
        }
        if let Some(level) = settings.log_level {
            config = config.with_log_level(level.parse()?);
        }
        Ok(config)
    }

    pub fn collator(&self) -> Option<&dyn Collator> {
        self.collator.as_deref()
    }

    pub fn date_parser(&self) -> &dyn DateParser {
        self.date_parser.as_ref()
    }

    pub fn collection_resolver(&self) -> Option<&dyn CollectionResolver> {
        self.collection_resolver.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.id_key, "_id");
        assert!(config.collator().is_none());
        assert!(config.collection_resolver().is_none());
    }

    #[test]
    fn test_from_json() {
        let config = EngineConfig::from_json(&json!({
            "idKey": "uid",
            "collation": {"locale": "en", "strength": 1},
            "logLevel": "debug"
        }))
        .unwrap();
        assert_eq!(config.id_key, "uid");
        assert!(config.collator().is_some());
        assert_eq!(config.log_level, Some(LogLevel::Debug));
    }

    #[test]
    fn test_from_json_rejects_bad_level() {
        let err = EngineConfig::from_json(&json!({"logLevel": "loud"})).unwrap_err();
        assert!(err.to_string().contains("unknown log level"));
    }

    #[test]
    fn test_closure_resolver() {
        let resolver = |name: &str| {
            if name == "orders" {
                Some(vec![Value::from(json!({"id": 1}))])
            } else {
                None
            }
        };
        let config = EngineConfig::new().with_collection_resolver(Arc::new(resolver));
        let resolver = config.collection_resolver().unwrap();
        assert_eq!(resolver.resolve("orders").map(|c| c.len()), Some(1));
        assert!(resolver.resolve("other").is_none());
    }
}
