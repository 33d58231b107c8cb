//! Ordered application of operators over one in-memory batch.

use crate::record::Record;
use crate::stats::StatsReport;
use crate::transformer::Transformer;
use std::time::Instant;

/// Result of one [`TransformChain::run`].
#[derive(Debug, Default)]
pub struct ChainOutput {
    pub records: Vec<Record>,
    /// Records routed aside by operators such as the anomaly splitter.
    pub quarantined: Vec<Record>,
    /// One report per operator, in chain order.
    pub stats: Vec<StatsReport>,
}

#[derive(Default)]
pub struct TransformChain {
    operators: Vec<Box<dyn Transformer>>,
}

impl TransformChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, operator: Box<dyn Transformer>) {
        self.operators.push(operator);
    }

    pub fn with(mut self, operator: impl Transformer + 'static) -> Self {
        self.operators.push(Box::new(operator));
        self
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.operators.iter().map(|op| op.name()).collect()
    }

    /// Feed `records` through every operator in order.
    ///
    /// Each operator sees the full output of the previous one. Counters
    /// accumulate across runs until [`TransformChain::reset`].
    pub fn run(&mut self, records: Vec<Record>) -> ChainOutput {
        if self.operators.is_empty() {
            tracing::info!("No operators configured, passing records through");
            return ChainOutput {
                records,
                ..Default::default()
            };
        }

        let mut records = records;
        let mut quarantined = Vec::new();
        for op in self.operators.iter_mut() {
            let input = records.len();
            let start = Instant::now();
            records = op.transform_batch(records);
            quarantined.extend(op.drain_side_output());
            tracing::info!(
                operator = op.name(),
                input,
                output = records.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Applied operator"
            );
        }

        ChainOutput {
            records,
            quarantined,
            stats: self.stats_reports(),
        }
    }

    pub fn stats_reports(&self) -> Vec<StatsReport> {
        self.operators.iter().map(|op| op.stats_report()).collect()
    }

    pub fn reset(&mut self) {
        for op in self.operators.iter_mut() {
            op.reset_stats();
        }
    }
}
