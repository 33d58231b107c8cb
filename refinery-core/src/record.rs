//! The record envelope passed between operators.

use crate::schema::Schema;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Ordered field name -> value mapping.
pub type Payload = Map<String, Value>;

/// Pipeline stage a record last passed through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Extract,
    Transform,
    Load,
}

/// Provenance and operator annotations carried beside the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    #[serde(default = "default_source_type")]
    pub source_type: String,
    #[serde(default)]
    pub source_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    /// Overall quality in [0, 1], set by the quality scorer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
    #[serde(default)]
    pub pipeline_id: String,
    #[serde(default)]
    pub stage: Stage,
    /// Operator-added values (anomaly flags, dedup cluster ids, ...).
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub annotations: Map<String, Value>,
}

fn default_source_type() -> String {
    "unknown".to_string()
}

impl Default for RecordMetadata {
    fn default() -> Self {
        Self {
            source_type: default_source_type(),
            source_id: String::new(),
            record_id: None,
            quality_score: None,
            pipeline_id: String::new(),
            stage: Stage::Extract,
            annotations: Map::new(),
        }
    }
}

/// A single unit of data: payload plus metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub data: Payload,
    #[serde(default)]
    pub metadata: RecordMetadata,
    #[serde(skip)]
    pub schema: Option<Arc<Schema>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loaded_at: Option<DateTime<Utc>>,
}

impl Record {
    pub fn new(data: Payload) -> Self {
        Self {
            data,
            ..Default::default()
        }
    }

    /// Build a record from a JSON value. Non-object values are wrapped as `{"value": v}`.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::new(map),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                Self::new(map)
            }
        }
    }

    pub fn with_source(mut self, source_type: impl Into<String>, source_id: impl Into<String>) -> Self {
        self.metadata.source_type = source_type.into();
        self.metadata.source_id = source_id.into();
        self
    }

    pub fn with_record_id(mut self, id: impl Into<String>) -> Self {
        self.metadata.record_id = Some(id.into());
        self
    }

    pub fn with_quality(mut self, score: f64) -> Self {
        self.metadata.quality_score = Some(score);
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    pub fn annotation(&self, key: &str) -> Option<&Value> {
        self.metadata.annotations.get(key)
    }

    pub fn annotate(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata.annotations.insert(key.into(), value.into());
    }

    /// Identifier used in logs: the record id, or `"<anonymous>"`.
    pub fn display_id(&self) -> &str {
        self.metadata.record_id.as_deref().unwrap_or("<anonymous>")
    }

    /// Mark the record as having passed through a transform operator.
    pub fn mark_transformed(&mut self) {
        self.metadata.stage = Stage::Transform;
        self.transformed_at = Some(Utc::now());
    }

    /// Serialize the payload only, the shape written by file sinks.
    pub fn into_value(self) -> Value {
        Value::Object(self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_value_object() {
        let record = Record::from_value(json!({"b": 1, "a": 2}));
        let keys: Vec<&String> = record.data.keys().collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(record.metadata.stage, Stage::Extract);
    }

    #[test]
    fn test_from_value_scalar_is_wrapped() {
        let record = Record::from_value(json!(5));
        assert_eq!(record.get("value"), Some(&json!(5)));
    }

    #[test]
    fn test_annotations_are_separate_from_payload() {
        let mut record = Record::from_value(json!({"is_anomaly": "payload"}));
        record.annotate("is_anomaly", true);
        assert_eq!(record.get("is_anomaly"), Some(&json!("payload")));
        assert_eq!(record.annotation("is_anomaly"), Some(&json!(true)));
    }

    #[test]
    fn test_mark_transformed() {
        let mut record = Record::default();
        record.mark_transformed();
        assert_eq!(record.metadata.stage, Stage::Transform);
        assert!(record.transformed_at.is_some());
    }

    #[test]
    fn test_metadata_serde_defaults() {
        let meta: RecordMetadata = serde_json::from_str("{}").unwrap();
        assert_eq!(meta.source_type, "unknown");
        assert!(meta.annotations.is_empty());
    }
}
