//! Schema and field definitions shared by every operator.

use crate::error::SchemaError;
use crate::patterns::PatternKind;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

/// Declared field type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
    Date,
    Datetime,
    Timestamp,
    Json,
    Array,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
            FieldType::Datetime => "datetime",
            FieldType::Timestamp => "timestamp",
            FieldType::Json => "json",
            FieldType::Array => "array",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldType::Integer | FieldType::Float)
    }

    /// Whether a non-null JSON value is consistent with this type.
    ///
    /// Strings holding a parseable representation are accepted, since most
    /// sources (CSV in particular) deliver every cell as text.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => false,
            (FieldType::String, Value::String(_)) => true,
            (FieldType::String, _) => false,
            (FieldType::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (FieldType::Integer, Value::String(s)) => s.trim().parse::<i64>().is_ok(),
            (FieldType::Float, Value::Number(_)) => true,
            (FieldType::Float, Value::String(s)) => {
                s.trim().parse::<f64>().is_ok_and(|f| f.is_finite())
            }
            (FieldType::Boolean, Value::Bool(_)) => true,
            (FieldType::Boolean, Value::String(s)) => parse_bool(s).is_some(),
            (FieldType::Date, Value::String(s)) => parse_date(s).is_some(),
            (FieldType::Datetime, Value::String(s)) => parse_datetime(s).is_some(),
            (FieldType::Timestamp, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (FieldType::Timestamp, Value::String(s)) => parse_datetime(s).is_some(),
            (FieldType::Json, Value::Object(_) | Value::Array(_)) => true,
            (FieldType::Json, Value::String(s)) => parse_json_text(s).is_some(),
            (FieldType::Array, Value::Array(_)) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Format constraint on a string field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldPattern {
    /// One of the built-in formats.
    Named(PatternKind),
    /// A caller-supplied regular expression.
    Custom(String),
}

impl FieldPattern {
    /// Check `value` against the pattern. An invalid custom regex matches nothing.
    pub fn is_match(&self, value: &str) -> bool {
        match self {
            FieldPattern::Named(kind) => kind.is_match(value),
            FieldPattern::Custom(pattern) => Regex::new(pattern)
                .map(|re| re.is_match(value))
                .unwrap_or(false),
        }
    }
}

/// A single field definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<FieldPattern>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
    /// True when produced by the schema inferrer.
    #[serde(default)]
    pub inferred: bool,
    /// Inference confidence in [0, 1].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

fn default_true() -> bool {
    true
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: true,
            description: None,
            min_value: None,
            max_value: None,
            min_length: None,
            max_length: None,
            pattern: None,
            enum_values: None,
            inferred: false,
            confidence: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_bounds(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min_value = min;
        self.max_value = max;
        self
    }

    pub fn with_pattern(mut self, pattern: FieldPattern) -> Self {
        self.pattern = Some(pattern);
        self
    }

    /// Whether `value` lies within the numeric bounds. Non-numeric values pass.
    pub fn within_bounds(&self, value: &Value) -> bool {
        let Some(n) = as_f64(value) else {
            return true;
        };
        self.min_value.is_none_or(|min| n >= min) && self.max_value.is_none_or(|max| n <= max)
    }

    /// Whether a string value respects the length bounds. Non-strings pass.
    pub fn within_length(&self, value: &Value) -> bool {
        let Value::String(s) = value else {
            return true;
        };
        let len = s.chars().count();
        self.min_length.is_none_or(|min| len >= min) && self.max_length.is_none_or(|max| len <= max)
    }

    /// Whether the value belongs to the enumerated set (if any).
    pub fn allows(&self, value: &Value) -> bool {
        match &self.enum_values {
            None => true,
            Some(values) => {
                let needle = value_key(value);
                values.iter().any(|v| value_key(v) == needle)
            }
        }
    }
}

/// A named, ordered list of fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    pub fields: Vec<Field>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<Vec<String>>,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub inferred: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub null_counts: Option<BTreeMap<String, usize>>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Schema {
    /// Build a schema, rejecting duplicate field names.
    pub fn new(name: impl Into<String>, fields: Vec<Field>) -> Result<Self, SchemaError> {
        let schema = Self {
            name: name.into(),
            fields,
            primary_key: None,
            version: default_version(),
            inferred: false,
            created_at: None,
            sample_size: None,
            null_counts: None,
        };
        schema.validate()?;
        Ok(schema)
    }

    pub fn with_primary_key(mut self, key: Vec<String>) -> Result<Self, SchemaError> {
        self.primary_key = Some(key);
        self.validate()?;
        Ok(self)
    }

    /// Check the field-name uniqueness and primary-key invariants.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateField {
                    schema: self.name.clone(),
                    name: field.name.clone(),
                });
            }
        }
        if let Some(key) = &self.primary_key {
            if key.is_empty() {
                return Err(SchemaError::Inconsistent {
                    schema: self.name.clone(),
                    message: "primary key is empty".into(),
                });
            }
            if let Some(missing) = key.iter().find(|k| !seen.contains(k.as_str())) {
                return Err(SchemaError::Inconsistent {
                    schema: self.name.clone(),
                    message: format!("primary key references unknown field '{missing}'"),
                });
            }
        }
        Ok(())
    }

    pub fn get_field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }
}

/// True for null, empty strings, and empty containers.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// Numeric view of a JSON value. Booleans are not numbers.
pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Stable identity string for a value, used for distinct counting and grouping.
pub fn value_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// Parse an ISO 8601 calendar date (`YYYY-MM-DD`).
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

/// Parse an ISO 8601 date-time, with or without offset.
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

/// Parse either a date or a date-time into a comparable instant.
pub fn parse_temporal(s: &str) -> Option<NaiveDateTime> {
    parse_datetime(s).or_else(|| parse_date(s).and_then(|d| d.and_hms_opt(0, 0, 0)))
}

/// Parse a string holding a JSON object or array.
pub fn parse_json_text(s: &str) -> Option<Value> {
    let trimmed = s.trim();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return None;
    }
    serde_json::from_str::<Value>(trimmed)
        .ok()
        .filter(|v| v.is_object() || v.is_array())
}
