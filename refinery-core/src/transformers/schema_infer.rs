//! Schema inference from a sample of records.
//!
//! Each value is classified into a candidate type, the most frequent
//! candidate wins per field (with integer/float and date/datetime widening),
//! and optional pattern, constraint and enum suggestions are layered on top.

use crate::error::{ConfigurationError, SchemaError, TransformError};
use crate::patterns::PatternKind;
use crate::record::{Payload, Record};
use crate::schema::{
    Field, FieldPattern, FieldType, Schema, parse_bool, parse_date, parse_datetime,
    parse_json_text, value_key,
};
use crate::stats::TransformerStats;
use crate::transformer::Transformer;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Candidate types in tie-break priority order.
const PRIORITY: [FieldType; 8] = [
    FieldType::Boolean,
    FieldType::Integer,
    FieldType::Float,
    FieldType::Date,
    FieldType::Datetime,
    FieldType::Json,
    FieldType::Array,
    FieldType::String,
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaInferrerConfig {
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
    /// Minimum match fraction for a pattern to be assigned.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    #[serde(default = "default_true")]
    pub detect_patterns: bool,
    #[serde(default = "default_true")]
    pub infer_constraints: bool,
    #[serde(default = "default_true")]
    pub suggest_enums: bool,
    /// Maximum distinct values for an enum suggestion.
    #[serde(default = "default_enum_threshold")]
    pub enum_threshold: usize,
}

fn default_sample_size() -> usize {
    1000
}

fn default_confidence_threshold() -> f64 {
    0.8
}

fn default_true() -> bool {
    true
}

fn default_enum_threshold() -> usize {
    10
}

impl Default for SchemaInferrerConfig {
    fn default() -> Self {
        Self {
            sample_size: default_sample_size(),
            confidence_threshold: default_confidence_threshold(),
            detect_patterns: true,
            infer_constraints: true,
            suggest_enums: true,
            enum_threshold: default_enum_threshold(),
        }
    }
}

/// Candidate type for a single non-null value. `None` for null-like values.
pub fn classify(value: &Value) -> Option<FieldType> {
    match value {
        Value::Null => None,
        Value::Bool(_) => Some(FieldType::Boolean),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(FieldType::Integer),
        Value::Number(_) => Some(FieldType::Float),
        Value::Array(_) => Some(FieldType::Array),
        Value::Object(_) => Some(FieldType::Json),
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(classify_text(s)),
    }
}

fn classify_text(s: &str) -> FieldType {
    let t = s.trim();
    if parse_bool(t).is_some() {
        FieldType::Boolean
    } else if t.parse::<i64>().is_ok() {
        FieldType::Integer
    } else if t.parse::<f64>().is_ok_and(f64::is_finite) {
        FieldType::Float
    } else if parse_date(t).is_some() {
        FieldType::Date
    } else if parse_datetime(t).is_some() {
        FieldType::Datetime
    } else if parse_json_text(t).is_some() {
        FieldType::Json
    } else {
        FieldType::String
    }
}

fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

/// Running observations for one field.
#[derive(Debug, Clone)]
struct FieldProfile {
    name: String,
    non_null: usize,
    type_counts: HashMap<FieldType, usize>,
    strings: Vec<String>,
    numbers: Vec<f64>,
    /// Distinct non-null values, `None` once the cap is exceeded.
    distinct: Option<BTreeMap<String, Value>>,
}

impl FieldProfile {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            non_null: 0,
            type_counts: HashMap::new(),
            strings: Vec::new(),
            numbers: Vec::new(),
            distinct: Some(BTreeMap::new()),
        }
    }

    fn observe(&mut self, value: &Value, distinct_cap: usize) {
        let Some(candidate) = classify(value) else {
            return;
        };
        self.non_null += 1;
        *self.type_counts.entry(candidate).or_insert(0) += 1;
        if let Value::String(s) = value {
            self.strings.push(s.clone());
        }
        if let Some(n) = numeric_value(value) {
            self.numbers.push(n);
        }
        if let Some(distinct) = &mut self.distinct {
            distinct.entry(value_key(value)).or_insert_with(|| value.clone());
            if distinct.len() > distinct_cap {
                self.distinct = None;
            }
        }
    }

    /// Winning type and the fraction of non-null values consistent with it.
    fn winning_type(&self) -> (FieldType, f64) {
        if self.non_null == 0 {
            return (FieldType::String, 0.0);
        }
        let mut counts = self.type_counts.clone();
        let count = |c: &HashMap<FieldType, usize>, t: FieldType| c.get(&t).copied().unwrap_or(0);
        if count(&counts, FieldType::Float) > 0 {
            let ints = counts.remove(&FieldType::Integer).unwrap_or(0);
            *counts.entry(FieldType::Float).or_insert(0) += ints;
        }
        if count(&counts, FieldType::Datetime) > 0 {
            let dates = counts.remove(&FieldType::Date).unwrap_or(0);
            *counts.entry(FieldType::Datetime).or_insert(0) += dates;
        }

        let mut best = FieldType::String;
        let mut best_count = 0;
        for t in PRIORITY {
            let c = count(&counts, t);
            if c > best_count {
                best = t;
                best_count = c;
            }
        }
        (best, best_count as f64 / self.non_null as f64)
    }

    fn dominant_pattern(&self, threshold: f64) -> Option<(PatternKind, f64)> {
        if self.strings.is_empty() {
            return None;
        }
        let mut best: Option<(PatternKind, f64)> = None;
        for kind in PatternKind::ALL {
            let matches = self.strings.iter().filter(|s| kind.is_match(s)).count();
            let fraction = matches as f64 / self.non_null as f64;
            if best.is_none_or(|(_, f)| fraction > f) {
                best = Some((kind, fraction));
            }
        }
        best.filter(|(_, f)| *f >= threshold && *f > 0.0)
    }

    fn to_field(&self, config: &SchemaInferrerConfig, sample_count: usize) -> Field {
        let (field_type, type_confidence) = self.winning_type();
        let mut field = Field::new(self.name.clone(), field_type);
        field.inferred = true;
        field.nullable = self.non_null < sample_count;

        let mut confidence = type_confidence;
        let mut pattern = None;
        if config.detect_patterns
            && let Some((kind, pattern_confidence)) =
                self.dominant_pattern(config.confidence_threshold)
        {
            pattern = Some(kind);
            field.pattern = Some(FieldPattern::Named(kind));
            confidence = (type_confidence + pattern_confidence) / 2.0;
        }
        field.confidence = Some(confidence);

        if config.infer_constraints {
            if field_type.is_numeric() && !self.numbers.is_empty() {
                field.min_value = self.numbers.iter().copied().reduce(f64::min);
                field.max_value = self.numbers.iter().copied().reduce(f64::max);
            }
            if field_type == FieldType::String && !self.strings.is_empty() {
                let lengths = self.strings.iter().map(|s| s.chars().count());
                field.min_length = lengths.clone().min();
                field.max_length = lengths.max();
            }
        }

        if config.suggest_enums
            && let Some(distinct) = &self.distinct
            && !distinct.is_empty()
            && distinct.len() <= config.enum_threshold
            && distinct.len() * 2 <= self.non_null
        {
            let mut values: Vec<Value> = distinct.values().cloned().collect();
            if values.iter().all(Value::is_number) {
                values.sort_by(|a, b| {
                    let x = a.as_f64().unwrap_or(0.0);
                    let y = b.as_f64().unwrap_or(0.0);
                    x.total_cmp(&y)
                });
            }
            field.enum_values = Some(values);
        }

        let lead = match pattern {
            Some(kind) => kind.label().to_string(),
            None => capitalize(field_type.as_str()),
        };
        field.description = Some(format!("{lead} - field: {}", self.name));
        field
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Accumulates field profiles across observed records.
#[derive(Debug, Clone, Default)]
pub struct SchemaProfiler {
    sample_count: usize,
    fields: Vec<FieldProfile>,
    index: HashMap<String, usize>,
}

impl SchemaProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn observe(&mut self, data: &Payload, distinct_cap: usize) {
        self.sample_count += 1;
        for (name, value) in data {
            let idx = match self.index.get(name) {
                Some(&i) => i,
                None => {
                    self.fields.push(FieldProfile::new(name));
                    self.index.insert(name.clone(), self.fields.len() - 1);
                    self.fields.len() - 1
                }
            };
            self.fields[idx].observe(value, distinct_cap);
        }
    }

    pub fn finish(&self, config: &SchemaInferrerConfig) -> Result<Schema, SchemaError> {
        if self.sample_count == 0 {
            return Err(SchemaError::EmptySample);
        }
        let fields = self
            .fields
            .iter()
            .map(|p| p.to_field(config, self.sample_count))
            .collect();
        let mut schema = Schema::new("inferred_schema", fields)?;
        schema.inferred = true;
        schema.created_at = Some(Utc::now());
        schema.sample_size = Some(self.sample_count);
        schema.null_counts = Some(
            self.fields
                .iter()
                .map(|p| (p.name.clone(), self.sample_count - p.non_null))
                .collect(),
        );
        Ok(schema)
    }
}

pub struct SchemaInferrer {
    config: SchemaInferrerConfig,
    profiler: SchemaProfiler,
    schema: Option<Arc<Schema>>,
    stats: TransformerStats,
}

impl SchemaInferrer {
    pub fn new(config: SchemaInferrerConfig) -> Result<Self, ConfigurationError> {
        if config.sample_size == 0 {
            return Err(ConfigurationError::out_of_range(
                "sample_size",
                0.0,
                1.0,
                f64::from(u32::MAX),
            ));
        }
        if !(0.0..=1.0).contains(&config.confidence_threshold) {
            return Err(ConfigurationError::out_of_range(
                "confidence_threshold",
                config.confidence_threshold,
                0.0,
                1.0,
            ));
        }
        Ok(Self {
            config,
            profiler: SchemaProfiler::new(),
            schema: None,
            stats: TransformerStats::new(),
        })
    }

    fn distinct_cap(&self) -> usize {
        self.config.enum_threshold
    }

    /// Infer a schema from the first `sample_size` records of `records`.
    pub fn infer(&self, records: &[Record]) -> Result<Schema, SchemaError> {
        let mut profiler = SchemaProfiler::new();
        for record in records.iter().take(self.config.sample_size) {
            profiler.observe(&record.data, self.distinct_cap());
        }
        profiler.finish(&self.config)
    }

    /// Schema from the most recent batch, or from records observed one at a time.
    pub fn inferred_schema(&self) -> Result<Arc<Schema>, SchemaError> {
        match &self.schema {
            Some(schema) => Ok(Arc::clone(schema)),
            None => self.profiler.finish(&self.config).map(Arc::new),
        }
    }
}

impl Transformer for SchemaInferrer {
    fn name(&self) -> &str {
        "schema_inferrer"
    }

    /// Observe the record into the running profile and pass it through.
    fn transform(&mut self, record: Record) -> Result<Option<Record>, TransformError> {
        if self.profiler.sample_count() < self.config.sample_size {
            let cap = self.distinct_cap();
            self.profiler.observe(&record.data, cap);
            self.schema = None;
        }
        Ok(Some(record))
    }

    fn transform_batch(&mut self, mut records: Vec<Record>) -> Vec<Record> {
        let schema = match self.infer(&records) {
            Ok(schema) => Arc::new(schema),
            Err(SchemaError::EmptySample) => return records,
            Err(e) => {
                tracing::warn!(error = %e, "Schema inference failed, records passed through");
                self.stats.record_processed_n(records.len());
                return records;
            }
        };

        for record in &mut records {
            record.schema = Some(Arc::clone(&schema));
            record.annotate("schema_inferred", true);
        }
        self.stats.record_processed_n(records.len());
        self.stats.record_modified_n(records.len());
        tracing::info!(
            operator = "schema_inferrer",
            fields = schema.fields.len(),
            sample_size = schema.sample_size.unwrap_or(0),
            "Inferred schema"
        );
        self.schema = Some(schema);
        records
    }

    fn stats(&self) -> &TransformerStats {
        &self.stats
    }

    fn stats_mut(&mut self) -> &mut TransformerStats {
        &mut self.stats
    }

    fn reset_stats(&mut self) {
        self.stats.reset();
        self.profiler = SchemaProfiler::new();
        self.schema = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inferrer() -> SchemaInferrer {
        SchemaInferrer::new(SchemaInferrerConfig::default()).unwrap()
    }

    fn records(values: Vec<Value>) -> Vec<Record> {
        values.into_iter().map(Record::from_value).collect()
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(&json!(true)), Some(FieldType::Boolean));
        assert_eq!(classify(&json!("false")), Some(FieldType::Boolean));
        assert_eq!(classify(&json!(" 12 ")), Some(FieldType::Integer));
        assert_eq!(classify(&json!("1.5")), Some(FieldType::Float));
        assert_eq!(classify(&json!("2024-01-31")), Some(FieldType::Date));
        assert_eq!(classify(&json!("2024-01-31T08:00:00Z")), Some(FieldType::Datetime));
        assert_eq!(classify(&json!("{\"a\":1}")), Some(FieldType::Json));
        assert_eq!(classify(&json!([1])), Some(FieldType::Array));
        assert_eq!(classify(&json!("hello")), Some(FieldType::String));
        assert_eq!(classify(&json!("")), None);
        assert_eq!(classify(&Value::Null), None);
    }

    #[test]
    fn test_all_integer_column_is_required_integer() {
        let batch = records(vec![json!({"id": 1}), json!({"id": 2}), json!({"id": 3})]);
        let schema = inferrer().infer(&batch).unwrap();
        let field = schema.get_field("id").unwrap();
        assert_eq!(field.field_type, FieldType::Integer);
        assert!(!field.nullable);
        assert_eq!(field.min_value, Some(1.0));
        assert_eq!(field.max_value, Some(3.0));
        assert_eq!(field.confidence, Some(1.0));
        assert!(schema.inferred);
        assert_eq!(schema.sample_size, Some(3));
    }

    #[test]
    fn test_integer_float_widen_to_float() {
        let batch = records(vec![
            json!({"x": 1}),
            json!({"x": 2}),
            json!({"x": 2.5}),
        ]);
        let field = inferrer().infer(&batch).unwrap().fields[0].clone();
        assert_eq!(field.field_type, FieldType::Float);
        assert_eq!(field.confidence, Some(1.0));
    }

    #[test]
    fn test_nulls_and_missing_keys_make_nullable() {
        let batch = records(vec![
            json!({"a": 1, "b": "x"}),
            json!({"a": null, "b": ""}),
            json!({"b": "y"}),
        ]);
        let schema = inferrer().infer(&batch).unwrap();
        assert!(schema.get_field("a").unwrap().nullable);
        assert!(schema.get_field("b").unwrap().nullable);
        let nulls = schema.null_counts.as_ref().unwrap();
        assert_eq!(nulls["a"], 2);
        assert_eq!(nulls["b"], 1);
    }

    #[test]
    fn test_fields_in_first_seen_order() {
        let batch = records(vec![json!({"b": 1}), json!({"a": 1, "b": 2})]);
        let schema = inferrer().infer(&batch).unwrap();
        assert_eq!(schema.field_names(), vec!["b", "a"]);
    }

    #[test]
    fn test_pattern_detection() {
        let batch = records(vec![
            json!({"contact": "a@example.com"}),
            json!({"contact": "b@example.com"}),
            json!({"contact": "c@example.org"}),
            json!({"contact": "d@example.net"}),
            json!({"contact": "not an email"}),
        ]);
        let field = inferrer().infer(&batch).unwrap().fields[0].clone();
        assert_eq!(field.pattern, Some(FieldPattern::Named(PatternKind::Email)));
        assert!((field.confidence.unwrap() - 0.9).abs() < 1e-9);
        assert_eq!(
            field.description.as_deref(),
            Some("Email address - field: contact")
        );
        assert_eq!(field.min_length, Some(12));
    }

    #[test]
    fn test_pattern_below_threshold_not_assigned() {
        let batch = records(vec![
            json!({"c": "a@example.com"}),
            json!({"c": "hello"}),
        ]);
        let field = inferrer().infer(&batch).unwrap().fields[0].clone();
        assert_eq!(field.pattern, None);
    }

    #[test]
    fn test_enum_suggestion() {
        let statuses = ["active", "inactive", "active", "active", "inactive", "active"];
        let batch = records(statuses.iter().map(|s| json!({"status": s})).collect());
        let field = inferrer().infer(&batch).unwrap().fields[0].clone();
        assert_eq!(
            field.enum_values,
            Some(vec![json!("active"), json!("inactive")])
        );

        let unique = records((0..6).map(|i| json!({"code": format!("c{i}")})).collect());
        let field = inferrer().infer(&unique).unwrap().fields[0].clone();
        assert_eq!(field.enum_values, None);
    }

    #[test]
    fn test_empty_sample() {
        assert!(matches!(
            inferrer().infer(&[]),
            Err(SchemaError::EmptySample)
        ));
        assert!(inferrer().inferred_schema().is_err());
    }

    #[test]
    fn test_batch_attaches_schema() {
        let mut inf = inferrer();
        let out = inf.transform_batch(records(vec![json!({"n": 1}), json!({"n": 2})]));
        assert!(out.iter().all(|r| r.schema.is_some()));
        assert_eq!(out[0].annotation("schema_inferred"), Some(&json!(true)));
        assert_eq!(inf.inferred_schema().unwrap().fields.len(), 1);
        assert_eq!(inf.stats().records_modified, 2);
    }

    #[test]
    fn test_incremental_observation_respects_sample_size() {
        let mut inf = SchemaInferrer::new(SchemaInferrerConfig {
            sample_size: 2,
            ..Default::default()
        })
        .unwrap();
        for v in [json!({"n": 1}), json!({"n": 2}), json!({"n": "text"})] {
            inf.transform(Record::from_value(v)).unwrap();
        }
        let schema = inf.inferred_schema().unwrap();
        assert_eq!(schema.sample_size, Some(2));
        assert_eq!(schema.fields[0].field_type, FieldType::Integer);
    }
}
