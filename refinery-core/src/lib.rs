//! # Refinery Core
//!
//! Core library for Refinery, a record transformation engine.
//! Provides the record and schema model, the operator contract, the
//! cleaning, scoring, deduplication, aggregation, schema-inference and
//! anomaly-detection operators, and a batch-size auto-tuner that learns
//! from run history.

pub mod chain;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod patterns;
pub mod persistence;
pub mod record;
pub mod schema;
pub mod statistics;
pub mod stats;
pub mod transformer;
pub mod transformers;
pub mod tuner;

// Re-export commonly used types at the crate root.
pub use chain::{ChainOutput, TransformChain};
pub use config::{OperatorConfig, PipelineConfig, build_chain, build_operator, load_config};
pub use embeddings::{Embedder, EmbeddingConfig, LocalEmbedder, create_embedder};
pub use error::{
    ConfigurationError, RefineryError, Result, SchemaError, StoreError, TransformError,
};
pub use patterns::PatternKind;
pub use record::{Payload, Record, RecordMetadata, Stage};
pub use schema::{Field, FieldPattern, FieldType, Schema};
pub use stats::{StatsReport, TransformerStats};
pub use transformer::Transformer;
pub use tuner::{
    AutoTuner, AutoTunerConfig, BatchSizeRecommendation, HistoryAnalysis, HistoryStore,
    InMemoryHistoryStore, JsonFileHistoryStore, OptimizationTarget, PerformanceSample,
    TuningReport,
};
