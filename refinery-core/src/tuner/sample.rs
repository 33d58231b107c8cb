//! One row of run history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metrics from a single pipeline run. Throughput is derived at
/// construction and stored so history files stay self-describing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub pipeline_id: String,
    pub records_processed: u64,
    pub duration_seconds: f64,
    pub batch_size: usize,
    pub memory_mb: f64,
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default = "Utc::now")]
    pub recorded_at: DateTime<Utc>,
    /// Records per second; 0 when the duration is 0.
    #[serde(default)]
    pub throughput: f64,
}

fn default_success() -> bool {
    true
}

impl PerformanceSample {
    pub fn new(
        pipeline_id: impl Into<String>,
        records_processed: u64,
        duration_seconds: f64,
        batch_size: usize,
        memory_mb: f64,
    ) -> Self {
        let throughput = if duration_seconds > 0.0 {
            records_processed as f64 / duration_seconds
        } else {
            0.0
        };
        Self {
            pipeline_id: pipeline_id.into(),
            records_processed,
            duration_seconds,
            batch_size,
            memory_mb,
            success: true,
            error: None,
            recorded_at: Utc::now(),
            throughput,
        }
    }

    /// Mark the run as failed.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }

    pub fn memory_per_record(&self) -> f64 {
        if self.records_processed == 0 {
            0.0
        } else {
            self.memory_mb / self.records_processed as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_metrics() {
        let s = PerformanceSample::new("p", 1000, 2.0, 500, 50.0);
        assert_eq!(s.throughput, 500.0);
        assert_eq!(s.memory_per_record(), 0.05);
        assert!(s.success);
    }

    #[test]
    fn test_zero_duration_and_records() {
        let s = PerformanceSample::new("p", 0, 0.0, 100, 10.0);
        assert_eq!(s.throughput, 0.0);
        assert_eq!(s.memory_per_record(), 0.0);
    }

    #[test]
    fn test_failed_sample_round_trip() {
        let s = PerformanceSample::new("p", 10, 1.0, 100, 1.0).failed("disk full");
        let json = serde_json::to_string(&s).unwrap();
        let back: PerformanceSample = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
        assert_eq!(back.error.as_deref(), Some("disk full"));
    }
}
