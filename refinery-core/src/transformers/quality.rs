//! Per-record quality scoring: completeness, validity and consistency.

use crate::error::{ConfigurationError, TransformError};
use crate::patterns::PatternKind;
use crate::record::{Payload, Record};
use crate::schema::{Field, FieldPattern, Schema, as_f64, is_empty_value, parse_temporal};
use crate::stats::TransformerStats;
use crate::transformer::Transformer;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;

const WEIGHT_TOLERANCE: f64 = 0.01;
const SUSPICIOUS_STRING_LEN: usize = 10_000;
const LONG_STRING_LEN: usize = 1_000;
const SUSPICIOUS_MAGNITUDE: f64 = 1e15;

/// Relative weight of each sub-score. Must sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityWeights {
    #[serde(default = "default_completeness")]
    pub completeness: f64,
    #[serde(default = "default_validity")]
    pub validity: f64,
    #[serde(default = "default_consistency")]
    pub consistency: f64,
}

fn default_completeness() -> f64 {
    0.4
}

fn default_validity() -> f64 {
    0.3
}

fn default_consistency() -> f64 {
    0.3
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            completeness: default_completeness(),
            validity: default_validity(),
            consistency: default_consistency(),
        }
    }
}

impl QualityWeights {
    fn validate(&self) -> Result<(), ConfigurationError> {
        let parts = [self.completeness, self.validity, self.consistency];
        let total: f64 = parts.iter().sum();
        if parts.iter().any(|w| *w < 0.0 || !w.is_finite())
            || (total - 1.0).abs() > WEIGHT_TOLERANCE
        {
            return Err(ConfigurationError::InvalidWeights { total });
        }
        Ok(())
    }
}

/// An `(earlier, later)` field pair that must be chronologically ordered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateOrder {
    pub earlier: String,
    pub later: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityScorerConfig {
    #[serde(default)]
    pub weights: QualityWeights,
    /// Records scoring below this are dropped when `filter_low_quality` is set.
    #[serde(default)]
    pub min_score: f64,
    #[serde(default)]
    pub filter_low_quality: bool,
    /// Declared types, patterns and bounds used for validity and consistency.
    /// Without one, the schema attached to each record (e.g. by the schema
    /// inferrer) is used instead.
    #[serde(default)]
    pub reference_schema: Option<Schema>,
    #[serde(default)]
    pub date_order: Vec<DateOrder>,
}

impl Default for QualityScorerConfig {
    fn default() -> Self {
        Self {
            weights: QualityWeights::default(),
            min_score: 0.0,
            filter_low_quality: false,
            reference_schema: None,
            date_order: Vec::new(),
        }
    }
}

/// The three sub-scores and their weighted combination.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityBreakdown {
    pub completeness: f64,
    pub validity: f64,
    pub consistency: f64,
    pub overall: f64,
}

pub struct QualityScorer {
    config: QualityScorerConfig,
    /// Compiled custom patterns of the reference schema, keyed by source.
    custom_patterns: HashMap<String, Regex>,
    stats: TransformerStats,
}

impl QualityScorer {
    pub fn new(config: QualityScorerConfig) -> Result<Self, ConfigurationError> {
        config.weights.validate()?;
        if !(0.0..=1.0).contains(&config.min_score) {
            return Err(ConfigurationError::out_of_range(
                "min_score",
                config.min_score,
                0.0,
                1.0,
            ));
        }
        let mut custom_patterns = HashMap::new();
        if let Some(schema) = &config.reference_schema {
            schema.validate().map_err(|e| ConfigurationError::Parse {
                message: e.to_string(),
            })?;
            for field in &schema.fields {
                if let Some(FieldPattern::Custom(pattern)) = &field.pattern
                    && !custom_patterns.contains_key(pattern)
                {
                    let re = Regex::new(pattern).map_err(|e| ConfigurationError::InvalidPattern {
                        pattern: pattern.clone(),
                        message: e.to_string(),
                    })?;
                    custom_patterns.insert(pattern.clone(), re);
                }
            }
        }
        Ok(Self {
            config,
            custom_patterns,
            stats: TransformerStats::new(),
        })
    }

    /// Score a payload against the reference schema, if any.
    pub fn score(&self, data: &Payload) -> QualityBreakdown {
        self.score_with_schema(data, self.config.reference_schema.as_ref())
    }

    /// Score a payload against `schema` (declared or inferred field rules).
    pub fn score_with_schema(&self, data: &Payload, schema: Option<&Schema>) -> QualityBreakdown {
        if data.is_empty() {
            return QualityBreakdown {
                completeness: 0.0,
                validity: 0.0,
                consistency: 0.0,
                overall: 0.0,
            };
        }
        let completeness = self.completeness(data);
        let validity = self.validity(data, schema);
        let consistency = self.consistency(data, schema);
        let w = &self.config.weights;
        let overall = (completeness * w.completeness
            + validity * w.validity
            + consistency * w.consistency)
            .clamp(0.0, 1.0);
        QualityBreakdown {
            completeness,
            validity,
            consistency,
            overall,
        }
    }

    fn pattern_matches(&self, pattern: &FieldPattern, value: &str) -> bool {
        match pattern {
            FieldPattern::Custom(source) => match self.custom_patterns.get(source) {
                Some(re) => re.is_match(value),
                None => pattern.is_match(value),
            },
            FieldPattern::Named(kind) => kind.is_match(value),
        }
    }

    fn completeness(&self, data: &Payload) -> f64 {
        let complete = data.values().filter(|v| !is_empty_value(v)).count();
        complete as f64 / data.len() as f64
    }

    fn validity(&self, data: &Payload, schema: Option<&Schema>) -> f64 {
        let mut scores: Vec<f64> = data
            .iter()
            .map(|(name, value)| {
                self.field_validity(name, value, schema.and_then(|s| s.get_field(name)))
            })
            .collect();

        if let Some(schema) = schema {
            for field in &schema.fields {
                if !data.contains_key(&field.name) {
                    scores.push(if field.nullable { 1.0 } else { 0.0 });
                }
            }
        }

        scores.iter().sum::<f64>() / scores.len() as f64
    }

    fn field_validity(&self, name: &str, value: &Value, declared: Option<&Field>) -> f64 {
        if value.is_null() || value.as_str().is_some_and(str::is_empty) {
            return match declared {
                Some(field) if !field.nullable => 0.0,
                _ => 1.0,
            };
        }

        let mut score: f64 = 1.0;
        match value {
            Value::String(s) => {
                let len = s.chars().count();
                if len > SUSPICIOUS_STRING_LEN {
                    score = 0.0;
                } else if len > LONG_STRING_LEN {
                    score = 0.5;
                }
            }
            Value::Number(_) => {
                if as_f64(value).is_some_and(|n| n.abs() > SUSPICIOUS_MAGNITUDE) {
                    score = 0.0;
                }
            }
            _ => {}
        }

        let pattern = declared
            .and_then(|f| f.pattern.clone())
            .or_else(|| PatternKind::implied_by_name(name).map(FieldPattern::Named));
        if let (Some(pattern), Value::String(s)) = (&pattern, value)
            && !self.pattern_matches(pattern, s)
        {
            score = 0.0;
        }

        if let Some(field) = declared {
            let ok = field.field_type.accepts(value)
                && field.within_bounds(value)
                && field.within_length(value)
                && field.allows(value);
            if !ok {
                score = 0.0;
            }
        }

        score
    }

    fn consistency(&self, data: &Payload, schema: Option<&Schema>) -> f64 {
        let mut checks: Vec<f64> = Vec::new();

        for (name, value) in data {
            if is_empty_value(value) {
                continue;
            }
            if let Some(field) = schema.and_then(|s| s.get_field(name))
                && (field.min_value.is_some() || field.max_value.is_some())
                && as_f64(value).is_some()
            {
                checks.push(if field.within_bounds(value) { 1.0 } else { 0.0 });
            }
            if let Some(check) = domain_rule(name, value) {
                checks.push(check);
            }
        }

        for pair in &self.config.date_order {
            let earlier = data.get(&pair.earlier).and_then(Value::as_str).and_then(parse_temporal);
            let later = data.get(&pair.later).and_then(Value::as_str).and_then(parse_temporal);
            if let (Some(earlier), Some(later)) = (earlier, later) {
                checks.push(if earlier <= later { 1.0 } else { 0.0 });
            }
        }

        if checks.is_empty() {
            1.0
        } else {
            checks.iter().sum::<f64>() / checks.len() as f64
        }
    }
}

/// Field-name driven plausibility rules. `None` when no rule applies.
fn domain_rule(name: &str, value: &Value) -> Option<f64> {
    let lower = name.to_lowercase();
    let has_token = |token: &str| lower.split(|c: char| !c.is_alphanumeric()).any(|t| t == token);
    let pass = |ok: bool| if ok { 1.0 } else { 0.0 };

    if has_token("age") {
        Some(pass(as_f64(value).is_some_and(|v| v > 0.0 && v < 150.0)))
    } else if has_token("salary") || has_token("price") || has_token("amount") {
        Some(pass(as_f64(value).is_some_and(|v| v > 0.0)))
    } else if lower == "id" || lower.ends_with("_id") {
        match value.as_i64().or_else(|| value.as_u64().map(|_| 0)) {
            Some(v) if v >= 0 => Some(1.0),
            Some(_) => Some(0.0),
            None => Some(0.5),
        }
    } else if lower.contains("email") {
        Some(pass(value.is_string()))
    } else {
        None
    }
}

impl Transformer for QualityScorer {
    fn name(&self) -> &str {
        "quality_scorer"
    }

    fn transform(&mut self, mut record: Record) -> Result<Option<Record>, TransformError> {
        let schema = self
            .config
            .reference_schema
            .as_ref()
            .or(record.schema.as_deref());
        let breakdown = self.score_with_schema(&record.data, schema);

        if self.config.filter_low_quality && breakdown.overall < self.config.min_score {
            tracing::debug!(
                record = record.display_id(),
                score = breakdown.overall,
                "Filtered low-quality record"
            );
            return Ok(None);
        }

        record.metadata.quality_score = Some(breakdown.overall);
        record.annotate(
            "quality_breakdown",
            json!({
                "completeness": breakdown.completeness,
                "validity": breakdown.validity,
                "consistency": breakdown.consistency,
                "overall": breakdown.overall,
            }),
        );
        record.mark_transformed();
        self.stats.record_modified();
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
    use crate::record::Stage;
    use crate::schema::FieldType;
    use serde_json::json;
    use std::sync::Arc;

    fn payload(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn scorer() -> QualityScorer {
        QualityScorer::new(QualityScorerConfig::default()).unwrap()
    }

    #[test]
    fn test_invalid_weights_rejected() {
        let config = QualityScorerConfig {
            weights: QualityWeights {
                completeness: 0.5,
                validity: 0.5,
                consistency: 0.5,
            },
            ..Default::default()
        };
        assert!(matches!(
            QualityScorer::new(config),
            Err(ConfigurationError::InvalidWeights { .. })
        ));

        let negative = QualityScorerConfig {
            weights: QualityWeights {
                completeness: 1.2,
                validity: -0.2,
                consistency: 0.0,
            },
            ..Default::default()
        };
        assert!(QualityScorer::new(negative).is_err());
    }

    #[test]
    fn test_weights_within_tolerance_accepted() {
        let config = QualityScorerConfig {
            weights: QualityWeights {
                completeness: 0.4,
                validity: 0.3,
                consistency: 0.305,
            },
            ..Default::default()
        };
        assert!(QualityScorer::new(config).is_ok());
    }

    #[test]
    fn test_min_score_range() {
        let config = QualityScorerConfig {
            min_score: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            QualityScorer::new(config),
            Err(ConfigurationError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_empty_payload_scores_zero() {
        let b = scorer().score(&Payload::new());
        assert_eq!(b.overall, 0.0);
        assert_eq!(b.completeness, 0.0);
    }

    #[test]
    fn test_completeness_counts_empty_values() {
        let data = payload(json!({"a": 1, "b": null, "c": "", "d": []}));
        let b = scorer().score(&data);
        assert!((b.completeness - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_clean_record_scores_one() {
        let data = payload(json!({
            "id": 7,
            "name": "Alice",
            "email": "alice@example.com",
            "age": 34
        }));
        let b = scorer().score(&data);
        assert!((b.overall - 1.0).abs() < 1e-9, "{b:?}");
    }

    #[test]
    fn test_invalid_email_and_age_lower_score() {
        let data = payload(json!({"email": "not-an-email", "age": 200}));
        let b = scorer().score(&data);
        assert!((b.validity - 0.5).abs() < 1e-9);
        assert!((b.consistency - 0.5).abs() < 1e-9);
        assert!(b.overall < 1.0);
    }

    #[test]
    fn test_long_strings_and_huge_numbers() {
        let data = payload(json!({"notes": "x".repeat(2000), "total": 1e16}));
        let b = scorer().score(&data);
        assert!((b.validity - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_reference_schema_checks() {
        let schema = Schema::new(
            "people",
            vec![
                Field::new("age", FieldType::Integer).with_bounds(Some(18.0), Some(65.0)),
                Field::new("name", FieldType::String).required(),
            ],
        )
        .unwrap();
        let scorer = QualityScorer::new(QualityScorerConfig {
            reference_schema: Some(schema),
            ..Default::default()
        })
        .unwrap();

        let data = payload(json!({"age": 70}));
        let b = scorer.score(&data);
        // age out of declared bounds, name missing but required
        assert_eq!(b.validity, 0.0);
        // schema bounds fail, domain age rule passes
        assert!((b.consistency - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_custom_pattern_rejected() {
        let schema = Schema::new(
            "codes",
            vec![Field::new("code", FieldType::String).with_pattern(FieldPattern::Custom("([".into()))],
        )
        .unwrap();
        let result = QualityScorer::new(QualityScorerConfig {
            reference_schema: Some(schema),
            ..Default::default()
        });
        assert!(matches!(
            result,
            Err(ConfigurationError::InvalidPattern { ref pattern, .. }) if pattern == "(["
        ));
    }

    #[test]
    fn test_custom_pattern_scored() {
        let schema = Schema::new(
            "codes",
            vec![
                Field::new("code", FieldType::String)
                    .with_pattern(FieldPattern::Custom(r"^[A-Z]{3}-\d+$".into())),
            ],
        )
        .unwrap();
        let scorer = QualityScorer::new(QualityScorerConfig {
            reference_schema: Some(schema),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(scorer.score(&payload(json!({"code": "SKU-42"}))).validity, 1.0);
        assert_eq!(scorer.score(&payload(json!({"code": "sku42"}))).validity, 0.0);
    }

    #[test]
    fn test_attached_schema_used_without_reference() {
        let schema = Arc::new(
            Schema::new(
                "inferred_schema",
                vec![Field::new("count", FieldType::Integer).with_bounds(Some(0.0), Some(8.0))],
            )
            .unwrap(),
        );
        let mut scorer = scorer();

        let mut bad = Record::from_value(json!({"count": "abc"}));
        bad.schema = Some(Arc::clone(&schema));
        let bad = scorer.transform(bad).unwrap().unwrap();
        assert!(bad.metadata.quality_score.unwrap() < 1.0);
        assert_eq!(bad.annotation("quality_breakdown").unwrap()["validity"], json!(0.0));

        let mut good = Record::from_value(json!({"count": 3}));
        good.schema = Some(schema);
        let good = scorer.transform(good).unwrap().unwrap();
        assert!((good.metadata.quality_score.unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_reference_schema_wins_over_attached() {
        let reference = Schema::new("ref", vec![Field::new("count", FieldType::String)]).unwrap();
        let mut scorer = QualityScorer::new(QualityScorerConfig {
            reference_schema: Some(reference),
            ..Default::default()
        })
        .unwrap();
        let mut record = Record::from_value(json!({"count": "abc"}));
        record.schema = Some(Arc::new(
            Schema::new("inferred_schema", vec![Field::new("count", FieldType::Integer)]).unwrap(),
        ));
        let out = scorer.transform(record).unwrap().unwrap();
        assert!((out.metadata.quality_score.unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_date_order() {
        let scorer = QualityScorer::new(QualityScorerConfig {
            date_order: vec![DateOrder {
                earlier: "start".into(),
                later: "end".into(),
            }],
            ..Default::default()
        })
        .unwrap();
        let good = scorer.score(&payload(json!({"start": "2024-01-01", "end": "2024-02-01"})));
        let bad = scorer.score(&payload(json!({"start": "2024-03-01", "end": "2024-02-01"})));
        let partial = scorer.score(&payload(json!({"start": "2024-03-01"})));
        assert_eq!(good.consistency, 1.0);
        assert_eq!(bad.consistency, 0.0);
        assert_eq!(partial.consistency, 1.0);
    }

    #[test]
    fn test_transform_attaches_score() {
        let mut scorer = scorer();
        let record = Record::from_value(json!({"name": "Bob", "city": null}));
        let out = scorer.transform(record).unwrap().unwrap();
        let score = out.metadata.quality_score.unwrap();
        assert!((0.0..=1.0).contains(&score));
        assert_eq!(out.metadata.stage, Stage::Transform);
        assert!(out.transformed_at.is_some());
        assert!(out.annotation("quality_breakdown").is_some());
        assert_eq!(scorer.stats().records_modified, 1);
    }

    #[test]
    fn test_filter_low_quality() {
        let mut scorer = QualityScorer::new(QualityScorerConfig {
            min_score: 0.9,
            filter_low_quality: true,
            ..Default::default()
        })
        .unwrap();
        let records = vec![
            Record::from_value(json!({"a": 1, "b": 2})),
            Record::from_value(json!({"a": null, "b": null, "c": ""})),
        ];
        let out = scorer.transform_batch(records);
        assert_eq!(out.len(), 1);
        assert_eq!(scorer.stats().records_filtered, 1);
        assert_eq!(scorer.stats().records_processed, 2);
    }
}
