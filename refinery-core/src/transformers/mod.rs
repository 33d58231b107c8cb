//! Transformation operators.

pub mod aggregate;
pub mod anomaly;
pub mod cleaners;
pub mod dedup;
pub mod isolation_forest;
pub mod metadata_columns;
pub mod quality;
pub mod schema_infer;
pub mod splitter;

pub use aggregate::{AggregateFunction, AggregationSpec, Aggregator, AggregatorConfig};
pub use anomaly::{AnomalyDetector, AnomalyDetectorConfig, DetectionMethod};
pub use cleaners::{ColumnRemover, ColumnRemoverConfig, NullRemover, NullRemoverConfig, NullStrategy};
pub use dedup::{Deduplicator, DeduplicatorConfig, MatchMode, MergeStrategy};
pub use metadata_columns::{MetadataToColumns, MetadataToColumnsConfig};
pub use quality::{QualityBreakdown, QualityScorer, QualityScorerConfig, QualityWeights};
pub use schema_infer::{SchemaInferrer, SchemaInferrerConfig};
pub use splitter::AnomalySplitter;
