//! Batch anomaly detection over numeric fields.
//!
//! Four methods are available: a leave-one-out z-score, Tukey's IQR fences,
//! an isolation forest, and a 2-of-3 vote across those three.

use super::isolation_forest::IsolationForest;
use crate::error::{ConfigurationError, TransformError};
use crate::record::Record;
use crate::schema::as_f64;
use crate::statistics::{mean, percentile, sorted, std_deviation};
use crate::stats::TransformerStats;
use crate::transformer::Transformer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

const EPS: f64 = 1e-12;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    #[default]
    Statistical,
    Iqr,
    IsolationForest,
    Combined,
}

impl DetectionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionMethod::Statistical => "statistical",
            DetectionMethod::Iqr => "iqr",
            DetectionMethod::IsolationForest => "isolation_forest",
            DetectionMethod::Combined => "combined",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyDetectorConfig {
    #[serde(default)]
    pub method: DetectionMethod,
    /// z-score cut-off for the statistical method.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_iqr_multiplier")]
    pub iqr_multiplier: f64,
    /// Fields to analyse. `None` selects every field whose non-null values are all numbers.
    #[serde(default)]
    pub numeric_fields: Option<Vec<String>>,
    #[serde(default)]
    pub filter_anomalies: bool,
    /// Expected outlier share for the isolation forest.
    #[serde(default = "default_contamination")]
    pub contamination: f64,
    #[serde(default = "default_n_estimators")]
    pub n_estimators: usize,
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_threshold() -> f64 {
    3.0
}

fn default_iqr_multiplier() -> f64 {
    1.5
}

fn default_contamination() -> f64 {
    0.1
}

fn default_n_estimators() -> usize {
    100
}

fn default_max_samples() -> usize {
    256
}

fn default_seed() -> u64 {
    42
}

impl Default for AnomalyDetectorConfig {
    fn default() -> Self {
        Self {
            method: DetectionMethod::Statistical,
            threshold: default_threshold(),
            iqr_multiplier: default_iqr_multiplier(),
            numeric_fields: None,
            filter_anomalies: false,
            contamination: default_contamination(),
            n_estimators: default_n_estimators(),
            max_samples: default_max_samples(),
            seed: default_seed(),
        }
    }
}

fn require_positive(option: &str, value: f64) -> Result<(), ConfigurationError> {
    if value.is_nan() || value <= 0.0 {
        return Err(ConfigurationError::out_of_range(
            option,
            value,
            0.0,
            f64::INFINITY,
        ));
    }
    Ok(())
}

/// Record index -> human-readable reasons.
pub type Findings = BTreeMap<usize, Vec<String>>;

/// One numeric column: per-record values, `None` where absent or non-numeric.
struct Column {
    name: String,
    values: Vec<Option<f64>>,
}

impl Column {
    fn present(&self) -> Vec<(usize, f64)> {
        self.values
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.map(|x| (i, x)))
            .collect()
    }
}

pub struct AnomalyDetector {
    config: AnomalyDetectorConfig,
    stats: TransformerStats,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyDetectorConfig) -> Result<Self, ConfigurationError> {
        require_positive("threshold", config.threshold)?;
        require_positive("iqr_multiplier", config.iqr_multiplier)?;
        let contamination = config.contamination;
        if contamination.is_nan() || contamination <= 0.0 || contamination > 0.5 {
            return Err(ConfigurationError::out_of_range(
                "contamination",
                config.contamination,
                0.0,
                0.5,
            ));
        }
        if config.n_estimators == 0 {
            return Err(ConfigurationError::out_of_range(
                "n_estimators",
                0.0,
                1.0,
                f64::INFINITY,
            ));
        }
        if config.max_samples < 2 {
            return Err(ConfigurationError::out_of_range(
                "max_samples",
                config.max_samples as f64,
                2.0,
                f64::INFINITY,
            ));
        }
        Ok(Self {
            config,
            stats: TransformerStats::new(),
        })
    }

    fn columns(&self, records: &[Record]) -> Vec<Column> {
        let names: Vec<String> = match &self.config.numeric_fields {
            Some(fields) => fields.clone(),
            None => {
                let mut order: Vec<String> = Vec::new();
                let mut rejected: HashSet<String> = HashSet::new();
                for record in records {
                    for (name, value) in &record.data {
                        match value {
                            Value::Null => {}
                            Value::Number(_) => {
                                if !order.contains(name) {
                                    order.push(name.clone());
                                }
                            }
                            _ => {
                                rejected.insert(name.clone());
                            }
                        }
                    }
                }
                order.retain(|name| !rejected.contains(name));
                order
            }
        };
        names
            .into_iter()
            .map(|name| {
                let values = records
                    .iter()
                    .map(|r| r.get(&name).and_then(as_f64))
                    .collect();
                Column { name, values }
            })
            .collect()
    }

    /// Run `method` over `records` and return the flagged indices with reasons.
    pub fn detect(&self, records: &[Record], method: DetectionMethod) -> Findings {
        let columns = self.columns(records);
        match method {
            DetectionMethod::Statistical => self.detect_statistical(&columns),
            DetectionMethod::Iqr => self.detect_iqr(&columns),
            DetectionMethod::IsolationForest => {
                self.detect_isolation_forest(&columns, records.len())
            }
            DetectionMethod::Combined => {
                let votes = [
                    self.detect_statistical(&columns),
                    self.detect_iqr(&columns),
                    self.detect_isolation_forest(&columns, records.len()),
                ];
                let mut combined = Findings::new();
                for i in 0..records.len() {
                    let agreeing: Vec<&Vec<String>> =
                        votes.iter().filter_map(|v| v.get(&i)).collect();
                    if agreeing.len() >= 2 {
                        combined.insert(i, agreeing.into_iter().flatten().cloned().collect());
                    }
                }
                combined
            }
        }
    }

    /// Leave-one-out z-score: each value against the mean and std of the others.
    fn detect_statistical(&self, columns: &[Column]) -> Findings {
        let mut findings = Findings::new();
        for column in columns {
            let present = column.present();
            let n = present.len();
            if n < 3 {
                continue;
            }
            let values: Vec<f64> = present.iter().map(|(_, v)| *v).collect();
            let m = mean(&values);
            // relative, so rounding in the mean of a constant column doesn't count
            if std_deviation(&values, m) < EPS * m.abs().max(1.0) {
                continue;
            }
            let total_ss: f64 = values.iter().map(|x| (x - m).powi(2)).sum();
            let nf = n as f64;
            for &(i, x) in &present {
                let d = x - m;
                let rest_mean = m - d / (nf - 1.0);
                let rest_ss = (total_ss - d * d * nf / (nf - 1.0)).max(0.0);
                let rest_std = (rest_ss / (nf - 1.0)).sqrt();
                let deviation = (x - rest_mean).abs();
                let z = if rest_std < EPS {
                    if deviation > EPS { f64::INFINITY } else { 0.0 }
                } else {
                    deviation / rest_std
                };
                if z > self.config.threshold {
                    findings.entry(i).or_default().push(format!(
                        "{}={} is {:.2} standard deviations from mean ({:.2})",
                        column.name, x, z, rest_mean
                    ));
                }
            }
        }
        findings
    }

    fn detect_iqr(&self, columns: &[Column]) -> Findings {
        let mut findings = Findings::new();
        for column in columns {
            let present = column.present();
            if present.len() < 4 {
                continue;
            }
            let values = sorted(&present.iter().map(|(_, v)| *v).collect::<Vec<_>>());
            let q1 = percentile(&values, 25.0);
            let q3 = percentile(&values, 75.0);
            let iqr = q3 - q1;
            if iqr < EPS {
                continue;
            }
            let lower = q1 - self.config.iqr_multiplier * iqr;
            let upper = q3 + self.config.iqr_multiplier * iqr;
            for &(i, x) in &present {
                if x < lower || x > upper {
                    findings.entry(i).or_default().push(format!(
                        "{}={} outside IQR bounds [{:.2}, {:.2}]",
                        column.name, x, lower, upper
                    ));
                }
            }
        }
        findings
    }

    fn detect_isolation_forest(&self, columns: &[Column], n: usize) -> Findings {
        let mut findings = Findings::new();
        let usable: Vec<&Column> = columns
            .iter()
            .filter(|c| c.values.iter().any(Option::is_some))
            .collect();
        if usable.is_empty() || n < 2 {
            return findings;
        }

        let means: Vec<f64> = usable
            .iter()
            .map(|c| mean(&c.present().iter().map(|(_, v)| *v).collect::<Vec<_>>()))
            .collect();
        let matrix: Vec<Vec<f64>> = (0..n)
            .map(|i| {
                usable
                    .iter()
                    .zip(&means)
                    .map(|(c, m)| c.values[i].unwrap_or(*m))
                    .collect()
            })
            .collect();

        let forest = IsolationForest::fit(
            &matrix,
            self.config.n_estimators,
            self.config.max_samples,
            self.config.seed,
        );
        for (i, (flagged, score)) in forest
            .predict_outliers(&matrix, self.config.contamination)
            .into_iter()
            .enumerate()
        {
            if flagged {
                findings
                    .entry(i)
                    .or_default()
                    .push(format!("isolation forest anomaly score {score:.3}"));
            }
        }
        findings
    }
}

impl Transformer for AnomalyDetector {
    fn name(&self) -> &str {
        "anomaly_detector"
    }

    /// A lone record has no population to deviate from.
    fn transform(&mut self, mut record: Record) -> Result<Option<Record>, TransformError> {
        record.annotate("is_anomaly", false);
        record.annotate("anomaly_method", self.config.method.as_str());
        self.stats.record_modified();
        Ok(Some(record))
    }

    fn transform_batch(&mut self, records: Vec<Record>) -> Vec<Record> {
        let n = records.len();
        if n == 0 {
            return records;
        }
        let mut findings = self.detect(&records, self.config.method);
        let flagged = findings.len();
        let method = self.config.method.as_str();

        let mut out = Vec::with_capacity(n);
        for (i, mut record) in records.into_iter().enumerate() {
            let reasons = findings.remove(&i);
            if reasons.is_some() && self.config.filter_anomalies {
                tracing::debug!(record = record.display_id(), "Filtered anomalous record");
                self.stats.record_filtered();
                continue;
            }
            record.annotate("is_anomaly", reasons.is_some());
            record.annotate("anomaly_method", method);
            if let Some(reasons) = reasons {
                record.annotate("anomaly_reasons", reasons);
            }
            self.stats.record_modified();
            out.push(record);
        }

        self.stats.record_processed_n(n);
        tracing::info!(
            operator = "anomaly_detector",
            method,
            input = n,
            anomalies = flagged,
            "Anomaly detection complete"
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
