//! Record-at-a-time cleaning operators: null handling and column removal.

use crate::error::{ConfigurationError, TransformError};
use crate::record::Record;
use crate::stats::TransformerStats;
use crate::transformer::Transformer;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

fn is_null_like(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// What to do with null or empty-string values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullStrategy {
    /// Drop records holding any null.
    #[default]
    Drop,
    /// Drop records whose values are all null.
    DropAll,
    /// Keep the record, remove the null fields.
    RemoveFields,
    /// Replace nulls with `fill_value`.
    Fill,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NullRemoverConfig {
    #[serde(default)]
    pub strategy: NullStrategy,
    #[serde(default)]
    pub fill_value: Option<Value>,
    /// Restrict null checks to these fields.
    #[serde(default)]
    pub fields: Option<Vec<String>>,
}

pub struct NullRemover {
    config: NullRemoverConfig,
    stats: TransformerStats,
}

impl NullRemover {
    pub fn new(config: NullRemoverConfig) -> Result<Self, ConfigurationError> {
        if config.strategy == NullStrategy::Fill && config.fill_value.is_none() {
            return Err(ConfigurationError::missing("fill_value"));
        }
        Ok(Self {
            config,
            stats: TransformerStats::new(),
        })
    }

    fn in_scope(&self, field: &str) -> bool {
        self.config
            .fields
            .as_ref()
            .is_none_or(|fields| fields.iter().any(|f| f == field))
    }
}

impl Transformer for NullRemover {
    fn name(&self) -> &str {
        "null_remover"
    }

    fn transform(&mut self, mut record: Record) -> Result<Option<Record>, TransformError> {
        let null_fields: Vec<String> = record
            .data
            .iter()
            .filter(|(k, v)| self.in_scope(k) && is_null_like(v))
            .map(|(k, _)| k.clone())
            .collect();
        let scoped = record.data.keys().filter(|k| self.in_scope(k)).count();

        match self.config.strategy {
            NullStrategy::Drop if !null_fields.is_empty() => {
                tracing::debug!(record = record.display_id(), "Dropped record with null values");
                return Ok(None);
            }
            NullStrategy::DropAll if null_fields.len() == scoped => {
                tracing::debug!(record = record.display_id(), "Dropped all-null record");
                return Ok(None);
            }
            NullStrategy::RemoveFields if !null_fields.is_empty() => {
                for field in &null_fields {
                    record.data.shift_remove(field);
                }
                self.stats.record_modified();
            }
            NullStrategy::Fill if !null_fields.is_empty() => {
                let fill = self.config.fill_value.clone().unwrap_or(Value::Null);
                for field in &null_fields {
                    record.data.insert(field.clone(), fill.clone());
                }
                self.stats.record_modified();
            }
            _ => {}
        }

        record.mark_transformed();
        Ok(Some(record))
    }

    fn stats(&self) -> &TransformerStats {
        &self.stats
    }

    fn stats_mut(&mut self) -> &mut TransformerStats {
        &mut self.stats
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnRemoverConfig {
    /// Exact column names to remove.
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub prefix: Option<String>,
    /// Regex matched against column names.
    #[serde(default)]
    pub pattern: Option<String>,
    /// Never removed, even when another rule matches.
    #[serde(default)]
    pub keep_columns: Vec<String>,
}

pub struct ColumnRemover {
    columns: HashSet<String>,
    prefix: Option<String>,
    pattern: Option<Regex>,
    keep: HashSet<String>,
    stats: TransformerStats,
}

impl ColumnRemover {
    pub fn new(config: ColumnRemoverConfig) -> Result<Self, ConfigurationError> {
        if config.columns.is_empty() && config.prefix.is_none() && config.pattern.is_none() {
            return Err(ConfigurationError::missing("columns, prefix or pattern"));
        }
        let pattern = config
            .pattern
            .as_deref()
            .map(|p| {
                Regex::new(p).map_err(|e| ConfigurationError::InvalidPattern {
                    pattern: p.to_string(),
                    message: e.to_string(),
                })
            })
            .transpose()?;
        Ok(Self {
            columns: config.columns.into_iter().collect(),
            prefix: config.prefix,
            pattern,
            keep: config.keep_columns.into_iter().collect(),
            stats: TransformerStats::new(),
        })
    }

    pub fn should_remove(&self, column: &str) -> bool {
        if self.keep.contains(column) {
            return false;
        }
        self.columns.contains(column)
            || self.prefix.as_deref().is_some_and(|p| column.starts_with(p))
            || self.pattern.as_ref().is_some_and(|re| re.is_match(column))
    }
}

impl Transformer for ColumnRemover {
    fn name(&self) -> &str {
        "column_remover"
    }

    fn transform(&mut self, mut record: Record) -> Result<Option<Record>, TransformError> {
        let before = record.data.len();
        record.data.retain(|k, _| !self.should_remove(k));
        if record.data.len() != before {
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
