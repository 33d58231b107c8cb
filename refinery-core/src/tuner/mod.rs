//! Batch-size auto-tuner.
//!
//! The tuner learns from post-hoc [`PerformanceSample`]s kept in an injected
//! [`HistoryStore`] and answers recommendation queries. It never touches a
//! running pipeline; callers apply its suggestions on their next run.

pub mod sample;
pub mod store;

pub use sample::PerformanceSample;
pub use store::{HistoryStore, InMemoryHistoryStore, JsonFileHistoryStore};

use crate::error::{ConfigurationError, StoreError};
use crate::statistics::{coefficient_of_variation, mean, std_deviation};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Samples at which the sample-count term of the confidence saturates.
const FULL_CONFIDENCE_SAMPLES: f64 = 10.0;
/// Keeps inverse scores finite when memory or cost is zero.
const INVERSE_EPSILON: f64 = 0.001;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationTarget {
    #[default]
    Throughput,
    Memory,
    Cost,
}

impl OptimizationTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Throughput => "throughput",
            Self::Memory => "memory",
            Self::Cost => "cost",
        }
    }

    /// Higher is better for every target.
    pub fn score(&self, sample: &PerformanceSample) -> f64 {
        match self {
            Self::Throughput => sample.throughput,
            Self::Memory => 1.0 / (sample.memory_per_record() + INVERSE_EPSILON),
            Self::Cost => 1.0 / (sample.memory_mb * sample.duration_seconds + INVERSE_EPSILON),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoTunerConfig {
    #[serde(default)]
    pub optimization_target: OptimizationTarget,
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    /// Only the most recent `history_window` samples are considered.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default = "default_candidates")]
    pub batch_size_candidates: Vec<usize>,
}

fn default_min_samples() -> usize {
    5
}

fn default_history_window() -> usize {
    100
}

fn default_candidates() -> Vec<usize> {
    vec![100, 250, 500, 1000, 2500, 5000, 10000]
}

impl Default for AutoTunerConfig {
    fn default() -> Self {
        Self {
            optimization_target: OptimizationTarget::default(),
            min_samples: default_min_samples(),
            history_window: default_history_window(),
            batch_size_candidates: default_candidates(),
        }
    }
}

impl AutoTunerConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.min_samples == 0 {
            return Err(ConfigurationError::out_of_range(
                "min_samples",
                0.0,
                1.0,
                f64::INFINITY,
            ));
        }
        if self.history_window < self.min_samples {
            return Err(ConfigurationError::out_of_range(
                "history_window",
                self.history_window as f64,
                self.min_samples as f64,
                f64::INFINITY,
            ));
        }
        if self.batch_size_candidates.is_empty() {
            return Err(ConfigurationError::missing("batch_size_candidates"));
        }
        if self.batch_size_candidates.contains(&0) {
            return Err(ConfigurationError::out_of_range(
                "batch_size_candidates",
                0.0,
                1.0,
                f64::INFINITY,
            ));
        }
        Ok(())
    }
}

/// The winning batch size and how much to trust it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSizeRecommendation {
    pub batch_size: usize,
    /// In [0, 1].
    pub confidence: f64,
    /// `confidence` as a percentage, rounded to one decimal.
    pub confidence_pct: f64,
    /// Winner's mean score relative to the mean of all bucket means, in percent.
    pub expected_improvement_pct: f64,
    pub bucket_samples: usize,
    pub mean_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningReport {
    pub pipeline_id: String,
    pub has_recommendation: bool,
    pub current_batch_size: Option<usize>,
    pub recommendation: Option<BatchSizeRecommendation>,
    pub reason: String,
    pub samples_considered: usize,
    pub optimization_target: OptimizationTarget,
}

/// Summary statistics over a pipeline's history window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryAnalysis {
    pub pipeline_id: String,
    pub total_runs: usize,
    pub successful_runs: usize,
    pub failed_runs: usize,
    pub avg_throughput: f64,
    pub max_throughput: f64,
    pub min_throughput: f64,
    pub std_throughput: f64,
    pub avg_memory_mb: f64,
    pub max_memory_mb: f64,
    pub batch_sizes_tried: Vec<usize>,
}

struct Bucket {
    batch_size: usize,
    mean: f64,
    cv: f64,
    count: usize,
}

pub struct AutoTuner {
    store: Arc<dyn HistoryStore>,
    config: AutoTunerConfig,
}

impl AutoTuner {
    pub fn new(store: Arc<dyn HistoryStore>, config: AutoTunerConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;
        Ok(Self { store, config })
    }

    pub fn config(&self) -> &AutoTunerConfig {
        &self.config
    }

    pub fn record_performance(&self, sample: PerformanceSample) -> Result<(), StoreError> {
        tracing::info!(
            pipeline_id = %sample.pipeline_id,
            throughput = sample.throughput,
            memory_mb = sample.memory_mb,
            batch_size = sample.batch_size,
            success = sample.success,
            "Recorded performance sample"
        );
        self.store.append(sample)
    }

    fn window(&self, pipeline_id: &str) -> Result<Vec<PerformanceSample>, StoreError> {
        let mut history = self.store.load(pipeline_id)?;
        if history.len() > self.config.history_window {
            history.drain(..history.len() - self.config.history_window);
        }
        Ok(history)
    }

    /// Per-batch-size buckets over successful samples, ascending by size.
    fn buckets(&self, history: &[PerformanceSample]) -> Vec<Bucket> {
        let mut scores: BTreeMap<usize, Vec<f64>> = BTreeMap::new();
        for s in history.iter().filter(|s| s.success) {
            scores
                .entry(s.batch_size)
                .or_default()
                .push(self.config.optimization_target.score(s));
        }
        scores
            .into_iter()
            .map(|(batch_size, values)| Bucket {
                batch_size,
                mean: mean(&values),
                cv: coefficient_of_variation(&values),
                count: values.len(),
            })
            .collect()
    }

    fn best_bucket(&self, history: &[PerformanceSample]) -> Option<BatchSizeRecommendation> {
        let buckets = self.buckets(history);
        // Ascending order plus a strict comparison gives ties to the smaller size.
        let best = buckets.iter().fold(None::<&Bucket>, |best, b| match best {
            Some(current) if b.mean <= current.mean => Some(current),
            _ => Some(b),
        })?;

        let successful: usize = buckets.iter().map(|b| b.count).sum();
        let share = best.count as f64 / successful as f64;
        let count_term = (best.count as f64 / FULL_CONFIDENCE_SAMPLES).min(1.0);
        let consistency = 1.0 / (1.0 + best.cv);
        let confidence = ((share + count_term + consistency) / 3.0).clamp(0.0, 1.0);

        let means: Vec<f64> = buckets.iter().map(|b| b.mean).collect();
        let avg = mean(&means);
        let improvement = if avg > 0.0 {
            (best.mean - avg) / avg * 100.0
        } else {
            0.0
        };

        Some(BatchSizeRecommendation {
            batch_size: best.batch_size,
            confidence,
            confidence_pct: (confidence * 1000.0).round() / 10.0,
            expected_improvement_pct: improvement,
            bucket_samples: best.count,
            mean_score: best.mean,
        })
    }

    pub fn recommend(
        &self,
        pipeline_id: &str,
        current_batch_size: Option<usize>,
    ) -> Result<TuningReport, StoreError> {
        let history = self.window(pipeline_id)?;
        let mut report = TuningReport {
            pipeline_id: pipeline_id.to_string(),
            has_recommendation: false,
            current_batch_size,
            recommendation: None,
            reason: String::new(),
            samples_considered: history.len(),
            optimization_target: self.config.optimization_target,
        };

        if history.len() < self.config.min_samples {
            report.reason = format!(
                "Insufficient data: {}/{} samples collected",
                history.len(),
                self.config.min_samples
            );
            return Ok(report);
        }

        let Some(rec) = self.best_bucket(&history) else {
            report.reason = "No successful runs in history".to_string();
            return Ok(report);
        };

        if Some(rec.batch_size) == current_batch_size {
            report.reason = "Current settings are near optimal".to_string();
        } else {
            report.has_recommendation = true;
            report.reason = format!(
                "Optimal batch size is {} based on {} runs. Expected {:.1}% improvement in {}.",
                rec.batch_size,
                history.len(),
                rec.expected_improvement_pct,
                self.config.optimization_target.as_str()
            );
        }
        tracing::debug!(
            pipeline_id,
            batch_size = rec.batch_size,
            confidence = rec.confidence,
            "Computed batch size recommendation"
        );
        report.recommendation = Some(rec);
        Ok(report)
    }

    /// The best batch size, or `None` while history is insufficient.
    pub fn recommend_batch_size(
        &self,
        pipeline_id: &str,
    ) -> Result<Option<BatchSizeRecommendation>, StoreError> {
        Ok(self.recommend(pipeline_id, None)?.recommendation)
    }

    /// Next batch size to try: the middle untried candidate while any
    /// remain, then the best observed size, then `current_batch_size`.
    pub fn suggest_next_batch_size(
        &self,
        pipeline_id: &str,
        current_batch_size: usize,
    ) -> Result<usize, StoreError> {
        let history = self.window(pipeline_id)?;
        let tried: BTreeSet<usize> = history.iter().map(|s| s.batch_size).collect();
        let untried: Vec<usize> = self
            .config
            .batch_size_candidates
            .iter()
            .copied()
            .filter(|bs| !tried.contains(bs))
            .collect();
        if !untried.is_empty() {
            return Ok(untried[untried.len() / 2]);
        }

        let target = self.config.optimization_target;
        let best = history
            .iter()
            .filter(|s| s.success)
            .max_by(|a, b| target.score(a).total_cmp(&target.score(b)));
        Ok(best.map_or(current_batch_size, |s| s.batch_size))
    }

    /// `None` when the pipeline has no history at all.
    pub fn performance_summary(&self, pipeline_id: &str) -> Result<Option<HistoryAnalysis>, StoreError> {
        let history = self.window(pipeline_id)?;
        if history.is_empty() {
            return Ok(None);
        }
        let successful: Vec<&PerformanceSample> = history.iter().filter(|s| s.success).collect();
        let throughputs: Vec<f64> = successful.iter().map(|s| s.throughput).collect();
        let memory: Vec<f64> = successful.iter().map(|s| s.memory_mb).collect();
        let avg_throughput = mean(&throughputs);

        Ok(Some(HistoryAnalysis {
            pipeline_id: pipeline_id.to_string(),
            total_runs: history.len(),
            successful_runs: successful.len(),
            failed_runs: history.len() - successful.len(),
            avg_throughput,
            max_throughput: throughputs.iter().copied().fold(0.0, f64::max),
            min_throughput: throughputs.iter().copied().reduce(f64::min).unwrap_or(0.0),
            std_throughput: std_deviation(&throughputs, avg_throughput),
            avg_memory_mb: mean(&memory),
            max_memory_mb: memory.iter().copied().fold(0.0, f64::max),
            batch_sizes_tried: successful
                .iter()
                .map(|s| s.batch_size)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
        }))
    }
}
