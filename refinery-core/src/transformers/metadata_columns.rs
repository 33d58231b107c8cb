//! Copies operator annotations into payload columns so file sinks can see them.

use crate::error::TransformError;
use crate::record::Record;
use crate::stats::TransformerStats;
use crate::transformer::Transformer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataToColumnsConfig {
    #[serde(default = "default_true")]
    pub include_anomaly_info: bool,
    #[serde(default = "default_true")]
    pub include_quality_info: bool,
    #[serde(default = "default_true")]
    pub include_quality_breakdown: bool,
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_true() -> bool {
    true
}

fn default_prefix() -> String {
    "_meta_".to_string()
}

impl Default for MetadataToColumnsConfig {
    fn default() -> Self {
        Self {
            include_anomaly_info: true,
            include_quality_info: true,
            include_quality_breakdown: true,
            prefix: default_prefix(),
        }
    }
}

pub struct MetadataToColumns {
    config: MetadataToColumnsConfig,
    stats: TransformerStats,
}

fn round4(v: f64) -> Value {
    Value::from((v * 10_000.0).round() / 10_000.0)
}

impl MetadataToColumns {
    pub fn new(config: MetadataToColumnsConfig) -> Self {
        Self {
            config,
            stats: TransformerStats::new(),
        }
    }

    /// Insert unless the payload already has the key. Returns whether it was written.
    fn put(&self, record: &mut Record, name: &str, value: Value) -> bool {
        let key = format!("{}{}", self.config.prefix, name);
        if record.data.contains_key(&key) {
            tracing::debug!(record = record.display_id(), column = %key, "Payload column exists, skipped");
            return false;
        }
        record.data.insert(key, value);
        true
    }

    fn columns(&self, record: &Record) -> Vec<(&'static str, Value)> {
        let mut columns = Vec::new();
        let ann = &record.metadata.annotations;

        if self.config.include_anomaly_info {
            let is_anomaly = ann.get("is_anomaly").and_then(Value::as_bool).unwrap_or(false);
            columns.push(("is_anomaly", Value::Bool(is_anomaly)));
            let (method, reasons) = if is_anomaly {
                let method = ann
                    .get("anomaly_method")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string();
                let reasons = ann
                    .get("anomaly_reasons")
                    .and_then(Value::as_array)
                    .map(|r| {
                        r.iter()
                            .filter_map(Value::as_str)
                            .collect::<Vec<_>>()
                            .join("; ")
                    })
                    .unwrap_or_default();
                (method, reasons)
            } else {
                (String::new(), String::new())
            };
            columns.push(("anomaly_method", Value::String(method)));
            columns.push(("anomaly_reasons", Value::String(reasons)));
        }

        if self.config.include_quality_info {
            let score = record.metadata.quality_score.map_or(Value::Null, round4);
            columns.push(("quality_score", score));
        }

        if self.config.include_quality_breakdown {
            let breakdown = ann.get("quality_breakdown").and_then(Value::as_object);
            for part in ["completeness", "validity", "consistency"] {
                let value = breakdown
                    .and_then(|b| b.get(part))
                    .and_then(Value::as_f64)
                    .map_or(Value::Null, round4);
                columns.push((part, value));
            }
        }
        columns
    }
}

impl Transformer for MetadataToColumns {
    fn name(&self) -> &str {
        "metadata_to_columns"
    }

    fn transform(&mut self, mut record: Record) -> Result<Option<Record>, TransformError> {
        let mut written = false;
        for (name, value) in self.columns(&record) {
            written |= self.put(&mut record, name, value);
        }
        if written {
            record.mark_transformed();
            self.stats.record_modified();
        }
        Ok(Some(record))
    }

    fn stats(&self) -> &TransformerStats {
        &self.stats
    }

    fn stats_mut(&mut self) -> &mut TransformerStats {
        &mut self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_copies_annotations() {
        let mut record = Record::from_value(json!({"id": 1})).with_quality(0.876_54);
        record.annotate("is_anomaly", true);
        record.annotate("anomaly_method", "iqr");
        record.annotate("anomaly_reasons", json!(["a", "b"]));
        record.annotate(
            "quality_breakdown",
            json!({"completeness": 1.0, "validity": 0.5, "consistency": 0.75}),
        );

        let mut op = MetadataToColumns::new(MetadataToColumnsConfig::default());
        let out = op.transform(record).unwrap().unwrap();
        assert_eq!(out.get("_meta_is_anomaly"), Some(&json!(true)));
        assert_eq!(out.get("_meta_anomaly_method"), Some(&json!("iqr")));
        assert_eq!(out.get("_meta_anomaly_reasons"), Some(&json!("a; b")));
        assert_eq!(out.get("_meta_quality_score"), Some(&json!(0.8765)));
        assert_eq!(out.get("_meta_validity"), Some(&json!(0.5)));
    }

    #[test]
    fn test_never_overwrites_payload() {
        let record = Record::from_value(json!({"_meta_is_anomaly": "keep me"}));
        let mut op = MetadataToColumns::new(MetadataToColumnsConfig::default());
        let out = op.transform(record).unwrap().unwrap();
        assert_eq!(out.get("_meta_is_anomaly"), Some(&json!("keep me")));
        assert_eq!(out.get("_meta_quality_score"), Some(&Value::Null));
    }

    #[test]
    fn test_custom_prefix_and_sections() {
        let mut op = MetadataToColumns::new(MetadataToColumnsConfig {
            include_anomaly_info: false,
            include_quality_breakdown: false,
            prefix: "q_".into(),
            ..Default::default()
        });
        let out = op
            .transform(Record::from_value(json!({})).with_quality(0.5))
            .unwrap()
            .unwrap();
        assert_eq!(out.data.len(), 1);
        assert_eq!(out.get("q_quality_score"), Some(&json!(0.5)));
    }
}
