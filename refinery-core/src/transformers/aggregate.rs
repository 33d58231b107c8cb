//! Group-by aggregation over a whole batch.

use crate::error::{ConfigurationError, TransformError};
use crate::record::{Payload, Record, RecordMetadata, Stage};
use crate::schema::{Field, FieldType, Schema, value_key};
use crate::stats::TransformerStats;
use crate::transformer::Transformer;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Supported aggregation functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Sum,
    Avg,
    Min,
    Max,
    Count,
    CountDistinct,
    First,
    Last,
    Concat,
    List,
}

impl AggregateFunction {
    pub const NAMES: [&'static str; 10] = [
        "sum",
        "avg",
        "min",
        "max",
        "count",
        "count_distinct",
        "first",
        "last",
        "concat",
        "list",
    ];

    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "sum" => Self::Sum,
            "avg" => Self::Avg,
            "min" => Self::Min,
            "max" => Self::Max,
            "count" => Self::Count,
            "count_distinct" => Self::CountDistinct,
            "first" => Self::First,
            "last" => Self::Last,
            "concat" => Self::Concat,
            "list" => Self::List,
            _ => return None,
        })
    }

    /// Apply the function to one group's values (`None` = key absent).
    pub fn apply(&self, values: &[Option<&Value>]) -> Value {
        let present = || values.iter().flatten().copied().filter(|v| !v.is_null());
        let numbers = || present().filter(|v| v.is_number());

        match self {
            Self::Sum => sum(numbers()),
            Self::Avg => {
                let nums: Vec<f64> = numbers().filter_map(Value::as_f64).collect();
                if nums.is_empty() {
                    Value::Null
                } else {
                    float(nums.iter().sum::<f64>() / nums.len() as f64)
                }
            }
            Self::Min => numbers()
                .min_by(|a, b| cmp_numbers(a, b))
                .cloned()
                .unwrap_or(Value::Null),
            Self::Max => numbers()
                .max_by(|a, b| cmp_numbers(a, b))
                .cloned()
                .unwrap_or(Value::Null),
            Self::Count => Value::from(values.len()),
            Self::CountDistinct => {
                Value::from(present().map(value_key).collect::<HashSet<_>>().len())
            }
            Self::First => present().next().cloned().unwrap_or(Value::Null),
            Self::Last => present().last().cloned().unwrap_or(Value::Null),
            Self::Concat => Value::String(
                present()
                    .map(value_key)
                    .collect::<Vec<_>>()
                    .join(", "),
            ),
            Self::List => Value::Array(present().cloned().collect()),
        }
    }

    /// Output field type in the aggregated schema.
    fn output_type(&self, source: Option<&Field>) -> FieldType {
        match self {
            Self::Sum | Self::Avg | Self::Min | Self::Max => FieldType::Float,
            Self::Count | Self::CountDistinct => FieldType::Integer,
            Self::List => FieldType::Array,
            Self::First | Self::Last => source.map_or(FieldType::String, |f| f.field_type),
            Self::Concat => FieldType::String,
        }
    }
}

fn cmp_numbers(a: &Value, b: &Value) -> std::cmp::Ordering {
    let x = a.as_f64().unwrap_or(f64::NAN);
    let y = b.as_f64().unwrap_or(f64::NAN);
    x.total_cmp(&y)
}

fn float(v: f64) -> Value {
    Number::from_f64(v).map_or(Value::Null, Value::Number)
}

/// Integer sums stay integral unless they overflow or meet a float.
fn sum<'a>(values: impl Iterator<Item = &'a Value>) -> Value {
    let mut int_total: Option<i64> = Some(0);
    let mut float_total = 0.0;
    for v in values {
        float_total += v.as_f64().unwrap_or(0.0);
        int_total = match (int_total, v.as_i64()) {
            (Some(acc), Some(i)) => acc.checked_add(i),
            _ => None,
        };
    }
    match int_total {
        Some(total) => Value::from(total),
        None => float(float_total),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationSpec {
    /// Source field.
    pub field: String,
    /// One of [`AggregateFunction::NAMES`].
    pub function: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatorConfig {
    pub group_by: Vec<String>,
    /// Output field name -> aggregation.
    pub aggregations: BTreeMap<String, AggregationSpec>,
    #[serde(default = "default_keep_group_fields")]
    pub keep_group_fields: bool,
}

fn default_keep_group_fields() -> bool {
    true
}

pub struct Aggregator {
    config: AggregatorConfig,
    functions: Vec<(String, String, AggregateFunction)>,
    stats: TransformerStats,
}

impl Aggregator {
    pub fn new(config: AggregatorConfig) -> Result<Self, ConfigurationError> {
        if config.group_by.is_empty() {
            return Err(ConfigurationError::missing("group_by"));
        }
        if config.aggregations.is_empty() {
            return Err(ConfigurationError::missing("aggregations"));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = config.group_by.iter().find(|name| !seen.insert(name.as_str())) {
            return Err(ConfigurationError::DuplicateField {
                option: "group_by".into(),
                field: dup.clone(),
            });
        }
        // output records carry group fields and outputs side by side
        if config.keep_group_fields
            && let Some(output) = config.aggregations.keys().find(|o| seen.contains(o.as_str()))
        {
            return Err(ConfigurationError::DuplicateField {
                option: "aggregations".into(),
                field: output.clone(),
            });
        }
        let functions = config
            .aggregations
            .iter()
            .map(|(output, spec)| {
                AggregateFunction::parse(&spec.function)
                    .map(|f| (output.clone(), spec.field.clone(), f))
                    .ok_or_else(|| ConfigurationError::UnknownFunction {
                        output: output.clone(),
                        name: spec.function.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            config,
            functions,
            stats: TransformerStats::new(),
        })
    }

    fn aggregated_schema(&self, source: Option<&Schema>) -> Option<Arc<Schema>> {
        let source_field = |name: &str| source.and_then(|s| s.get_field(name));
        let mut fields = Vec::new();
        if self.config.keep_group_fields {
            for name in &self.config.group_by {
                let field_type = source_field(name).map_or(FieldType::String, |f| f.field_type);
                fields.push(Field::new(name.clone(), field_type));
            }
        }
        for (output, field, function) in &self.functions {
            fields.push(Field::new(
                output.clone(),
                function.output_type(source_field(field)),
            ));
        }
        match Schema::new("aggregated_data", fields) {
            Ok(mut schema) => {
                schema.inferred = true;
                schema.created_at = Some(Utc::now());
                Some(Arc::new(schema))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Aggregated schema not attached");
                None
            }
        }
    }

    fn aggregate_group(&self, key: &[Value], members: &[&Record]) -> Record {
        let mut data = Payload::new();
        if self.config.keep_group_fields {
            for (name, value) in self.config.group_by.iter().zip(key) {
                data.insert(name.clone(), value.clone());
            }
        }
        for (output, field, function) in &self.functions {
            let values: Vec<Option<&Value>> = members.iter().map(|r| r.get(field)).collect();
            data.insert(output.clone(), function.apply(&values));
        }

        let template = members[0];
        let mut annotations = Map::new();
        annotations.insert("group_size".into(), Value::from(members.len()));
        annotations.insert("transformation_type".into(), Value::from("aggregation"));
        Record {
            data,
            metadata: RecordMetadata {
                source_type: template.metadata.source_type.clone(),
                source_id: template.metadata.source_id.clone(),
                record_id: Some(uuid::Uuid::new_v4().to_string()),
                quality_score: None,
                pipeline_id: template.metadata.pipeline_id.clone(),
                stage: Stage::Transform,
                annotations,
            },
            schema: None,
            extracted_at: template.extracted_at,
            transformed_at: Some(Utc::now()),
            loaded_at: None,
        }
    }
}

impl Transformer for Aggregator {
    fn name(&self) -> &str {
        "aggregator"
    }

    fn transform(&mut self, _record: Record) -> Result<Option<Record>, TransformError> {
        Err(TransformError::BatchOnly {
            operator: self.name().to_string(),
        })
    }

    fn transform_batch(&mut self, records: Vec<Record>) -> Vec<Record> {
        if records.is_empty() {
            return records;
        }

        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, (Vec<Value>, Vec<&Record>)> = HashMap::new();
        for record in &records {
            let key: Vec<Value> = self
                .config
                .group_by
                .iter()
                .map(|f| record.get(f).cloned().unwrap_or(Value::Null))
                .collect();
            let id = Value::Array(key.clone()).to_string();
            groups
                .entry(id.clone())
                .or_insert_with(|| {
                    order.push(id);
                    (key, Vec::new())
                })
                .1
                .push(record);
        }

        let schema = self.aggregated_schema(records[0].schema.as_deref());
        let out: Vec<Record> = order
            .iter()
            .filter_map(|id| groups.get(id))
            .map(|(key, members)| {
                let mut record = self.aggregate_group(key, members);
                record.schema = schema.clone();
                record
            })
            .collect();

        let n = records.len();
        self.stats.record_processed_n(n);
        self.stats.record_filtered_n(n - out.len());
        self.stats.record_modified_n(out.len());
        tracing::info!(
            operator = "aggregator",
            input = n,
            groups = out.len(),
            "Aggregated records into groups"
        );
        out
    }

    fn stats(&self) -> &TransformerStats {
        &self.stats
    }

    fn stats_mut(&mut self) -> &mut TransformerStats {
        &mut self.stats
    }
}
