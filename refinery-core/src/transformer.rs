//! The operator contract.
//!
//! Every operator implements [`Transformer`]. Record-at-a-time operators only
//! need [`Transformer::transform`]; the default [`Transformer::transform_batch`]
//! applies it element-wise and keeps the counters. Operators that need the
//! whole working set (deduplication, aggregation, anomaly detection) override
//! the batch method.

use crate::error::TransformError;
use crate::record::Record;
use crate::stats::{StatsReport, TransformerStats};

pub trait Transformer: Send {
    /// Stable operator name used in logs and stats reports.
    fn name(&self) -> &str;

    /// Transform a single record. `Ok(None)` filters the record out.
    fn transform(&mut self, record: Record) -> Result<Option<Record>, TransformError>;

    /// Transform a batch. Failures are per record: the failing record is
    /// dropped, counted, and logged, and the rest of the batch continues.
    fn transform_batch(&mut self, records: Vec<Record>) -> Vec<Record> {
        let mut out = Vec::with_capacity(records.len());
        for record in records {
            match self.transform(record) {
                Ok(Some(r)) => {
                    self.stats_mut().record_processed();
                    out.push(r);
                }
                Ok(None) => {
                    let stats = self.stats_mut();
                    stats.record_processed();
                    stats.record_filtered();
                }
                Err(e) => {
                    tracing::warn!(operator = self.name(), error = %e, "Record transform failed");
                    self.stats_mut().record_error();
                }
            }
        }
        out
    }

    fn stats(&self) -> &TransformerStats;

    fn stats_mut(&mut self) -> &mut TransformerStats;

    /// Clear counters. Operators with accumulated state clear it as well.
    fn reset_stats(&mut self) {
        self.stats_mut().reset();
    }

    /// Records the operator routed aside instead of emitting (quarantine).
    /// Draining empties the buffer.
    fn drain_side_output(&mut self) -> Vec<Record> {
        Vec::new()
    }

    fn stats_report(&self) -> StatsReport {
        StatsReport {
            operator: self.name().to_string(),
            stats: *self.stats(),
        }
    }
}
