//! Routes anomalous records out of the main stream into a quarantine buffer.

use crate::error::TransformError;
use crate::record::Record;
use crate::stats::TransformerStats;
use crate::transformer::Transformer;
use serde_json::Value;

/// Holds back records flagged `is_anomaly`, either as an annotation or as a
/// `_meta_is_anomaly` payload column. Clean records pass through untouched.
pub struct AnomalySplitter {
    quarantine: Vec<Record>,
    stats: TransformerStats,
}

impl AnomalySplitter {
    pub fn new() -> Self {
        Self {
            quarantine: Vec::new(),
            stats: TransformerStats::new(),
        }
    }

    fn is_flagged(record: &Record) -> bool {
        let flag = record
            .annotation("is_anomaly")
            .or_else(|| record.get("_meta_is_anomaly"));
        matches!(flag, Some(Value::Bool(true)))
    }

    pub fn quarantined(&self) -> &[Record] {
        &self.quarantine
    }

    /// Take the quarantined records, leaving the buffer empty.
    pub fn drain_quarantine(&mut self) -> Vec<Record> {
        std::mem::take(&mut self.quarantine)
    }
}

impl Default for AnomalySplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl Transformer for AnomalySplitter {
    fn name(&self) -> &str {
        "anomaly_splitter"
    }

    fn transform(&mut self, record: Record) -> Result<Option<Record>, TransformError> {
        if Self::is_flagged(&record) {
            tracing::debug!(record = record.display_id(), "Quarantined anomalous record");
            self.quarantine.push(record);
            return Ok(None);
        }
        Ok(Some(record))
    }

    fn transform_batch(&mut self, records: Vec<Record>) -> Vec<Record> {
        let before = self.quarantine.len();
        let total = records.len();
        let mut clean = Vec::with_capacity(total);
        for record in records {
            self.stats.record_processed();
            if Self::is_flagged(&record) {
                self.stats.record_filtered();
                self.quarantine.push(record);
            } else {
                clean.push(record);
            }
        }
        tracing::info!(
            clean = clean.len(),
            quarantined = self.quarantine.len() - before,
            total,
            "Split batch"
        );
        clean
    }

    fn stats(&self) -> &TransformerStats {
        &self.stats
    }

    fn stats_mut(&mut self) -> &mut TransformerStats {
        &mut self.stats
    }

    fn drain_side_output(&mut self) -> Vec<Record> {
        self.drain_quarantine()
    }

    fn reset_stats(&mut self) {
        self.stats.reset();
        self.quarantine.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn flagged(id: i64) -> Record {
        let mut r = Record::from_value(json!({"id": id}));
        r.annotate("is_anomaly", true);
        r
    }

    #[test]
    fn test_splits_on_annotation_and_column() {
        let mut splitter = AnomalySplitter::new();
        let mut clean = Record::from_value(json!({"id": 2}));
        clean.annotate("is_anomaly", false);
        let out = splitter.transform_batch(vec![
            flagged(1),
            clean,
            Record::from_value(json!({"id": 3, "_meta_is_anomaly": true})),
            Record::from_value(json!({"id": 4})),
        ]);
        let ids: Vec<_> = out.iter().map(|r| r.get("id").cloned()).collect();
        assert_eq!(ids, vec![Some(json!(2)), Some(json!(4))]);
        assert_eq!(splitter.quarantined().len(), 2);
        assert_eq!(splitter.stats().records_filtered, 2);
        assert_eq!(splitter.stats().records_processed, 4);
    }

    #[test]
    fn test_drain_empties_buffer() {
        let mut splitter = AnomalySplitter::new();
        assert!(splitter.transform(flagged(1)).unwrap().is_none());
        assert_eq!(splitter.drain_quarantine().len(), 1);
        assert!(splitter.drain_quarantine().is_empty());
    }

    #[test]
    fn test_reset_clears_quarantine() {
        let mut splitter = AnomalySplitter::new();
        splitter.transform_batch(vec![flagged(1)]);
        splitter.reset_stats();
        assert!(splitter.quarantined().is_empty());
        assert_eq!(splitter.stats().records_processed, 0);
    }
}
