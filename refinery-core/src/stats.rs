//! Per-operator counters.

use serde::{Deserialize, Serialize};

/// Counters owned by each operator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformerStats {
    /// Input records handled without error, including ones later filtered.
    pub records_processed: u64,
    /// Input records removed from the output.
    pub records_filtered: u64,
    /// Records whose payload or metadata was changed.
    pub records_modified: u64,
    /// Per-record failures.
    pub errors: u64,
}

impl TransformerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_processed(&mut self) {
        self.records_processed += 1;
    }

    pub fn record_processed_n(&mut self, n: usize) {
        self.records_processed += n as u64;
    }

    pub fn record_filtered(&mut self) {
        self.records_filtered += 1;
    }

    pub fn record_filtered_n(&mut self, n: usize) {
        self.records_filtered += n as u64;
    }

    pub fn record_modified(&mut self) {
        self.records_modified += 1;
    }

    pub fn record_modified_n(&mut self, n: usize) {
        self.records_modified += n as u64;
    }

    pub fn record_error(&mut self) {
        self.errors += 1;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Records that made it to the output.
    pub fn records_emitted(&self) -> u64 {
        self.records_processed.saturating_sub(self.records_filtered)
    }
}

/// Snapshot of one operator's counters, labelled with its name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsReport {
    pub operator: String,
    #[serde(flatten)]
    pub stats: TransformerStats,
}

impl std::fmt::Display for StatsReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: processed={} filtered={} modified={} errors={}",
            self.operator,
            self.stats.records_processed,
            self.stats.records_filtered,
            self.stats.records_modified,
            self.stats.errors
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_default() {
        let s = TransformerStats::new();
        assert_eq!(s.records_processed, 0);
        assert_eq!(s.errors, 0);
    }

    #[test]
    fn test_record_and_reset() {
        let mut s = TransformerStats::new();
        s.record_processed_n(5);
        s.record_filtered();
        s.record_modified_n(3);
        s.record_error();
        assert_eq!(s.records_emitted(), 4);
        assert_eq!(s.records_modified, 3);
        s.reset();
        assert_eq!(s, TransformerStats::default());
    }

    #[test]
    fn test_report_display() {
        let report = StatsReport {
            operator: "deduplicator".into(),
            stats: TransformerStats {
                records_processed: 5,
                records_filtered: 1,
                records_modified: 0,
                errors: 0,
            },
        };
        assert_eq!(
            report.to_string(),
            "deduplicator: processed=5 filtered=1 modified=0 errors=0"
        );
    }
}
