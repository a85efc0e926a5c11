// src/lib.rs
// Embeddable in-memory document query and aggregation engine

pub mod aggregation;
pub mod collation;
pub mod config;
pub mod context;
pub mod cursor;
pub mod engine;
pub mod error;
pub mod expression;
pub mod find_options;
pub mod logging;
pub mod path;
pub mod query;
pub mod registry;
pub mod value;
pub mod value_utils;

// Public exports
pub use aggregation::Pipeline;
pub use collation::{BasicCollator, ChronoDateParser, CollationSpec, Collator, DateParser};
pub use config::{CollectionResolver, EngineConfig, EngineSettings};
pub use context::{Context, Env};
pub use cursor::Cursor;
pub use engine::Engine;
pub use error::{QuarryError, Result};
pub use find_options::FindOptions;
pub use logging::{get_log_level, set_log_level, LogLevel};
pub use path::Resolved;
pub use query::{Predicate, Query};
pub use registry::{
    AccumulatorOperator, ExpressionOperator, Operator, OperatorClass, OperatorTables,
    ProjectionOperator, QueryOperator, QueryOutcome, Registry, StageOperator,
};
pub use value::{Callback, Kind, Map, Value};
