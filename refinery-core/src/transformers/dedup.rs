//! Duplicate detection and merging.
//!
//! Exact mode hashes a canonical rendering of the match fields. Fuzzy mode
//! embeds the same rendering and unions every pair whose cosine similarity
//! reaches the threshold. Clusters are closed transitively, so with borderline
//! similarities the result can depend on which pairs cross the threshold.

use crate::embeddings::{Embedder, EmbeddingConfig, cosine_similarity, create_embedder};
use crate::error::{ConfigurationError, TransformError};
use crate::record::Record;
use crate::stats::TransformerStats;
use crate::transformer::Transformer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};

const NULL_MARKER: &str = "<null>";
/// Distinct canonical texts never count as fully identical.
const DISTINCT_TEXT_CEILING: f64 = 1.0 - 1e-9;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    #[default]
    Exact,
    Fuzzy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    #[default]
    KeepFirst,
    KeepLast,
    KeepBestQuality,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeduplicatorConfig {
    #[serde(default)]
    pub match_mode: MatchMode,
    /// Fields compared for equality. `None` compares every payload field.
    #[serde(default)]
    pub match_fields: Option<Vec<String>>,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default)]
    pub merge_strategy: MergeStrategy,
    /// Embedder for fuzzy matching. The default `local` provider hashes
    /// term frequencies, so similarity is lexical: shared words count,
    /// synonyms and paraphrases do not. Set `provider = "fastembed"` (needs
    /// the `semantic-search` feature) for a pretrained sentence model.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Only records agreeing on these fields are compared with each other.
    #[serde(default)]
    pub block_by: Option<Vec<String>>,
}

fn default_similarity_threshold() -> f64 {
    0.95
}

impl Default for DeduplicatorConfig {
    fn default() -> Self {
        Self {
            match_mode: MatchMode::Exact,
            match_fields: None,
            similarity_threshold: default_similarity_threshold(),
            merge_strategy: MergeStrategy::KeepFirst,
            embedding: EmbeddingConfig::default(),
            block_by: None,
        }
    }
}

/// Union-find with path compression and union by rank.
#[derive(Debug)]
pub struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    pub fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut node = x;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    pub fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }

    /// Member lists per set, each sorted, ordered by smallest member.
    pub fn groups(&mut self) -> Vec<Vec<usize>> {
        let mut by_root: HashMap<usize, Vec<usize>> = HashMap::new();
        for i in 0..self.parent.len() {
            let root = self.find(i);
            by_root.entry(root).or_default().push(i);
        }
        let mut groups: Vec<Vec<usize>> = by_root.into_values().collect();
        groups.sort_by_key(|g| g[0]);
        groups
    }
}

pub struct Deduplicator {
    config: DeduplicatorConfig,
    embedder: Option<Box<dyn Embedder>>,
    stats: TransformerStats,
}

impl Deduplicator {
    pub fn new(config: DeduplicatorConfig) -> Result<Self, ConfigurationError> {
        if !(0.0..=1.0).contains(&config.similarity_threshold) {
            return Err(ConfigurationError::out_of_range(
                "similarity_threshold",
                config.similarity_threshold,
                0.0,
                1.0,
            ));
        }
        if config.match_fields.as_ref().is_some_and(Vec::is_empty) {
            return Err(ConfigurationError::missing("match_fields"));
        }
        let embedder = match config.match_mode {
            MatchMode::Fuzzy => Some(create_embedder(&config.embedding)?),
            MatchMode::Exact => None,
        };
        Ok(Self {
            config,
            embedder,
            stats: TransformerStats::new(),
        })
    }

    /// Use a caller-provided embedder for fuzzy matching.
    pub fn with_embedder(mut self, embedder: Box<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    fn match_fields(&self, records: &[Record]) -> Vec<String> {
        match &self.config.match_fields {
            Some(fields) => fields.clone(),
            None => records
                .iter()
                .flat_map(|r| r.data.keys().cloned())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
        }
    }

    /// Partition record indices into blocks that are compared internally.
    fn blocks(&self, records: &[Record]) -> Vec<Vec<usize>> {
        let Some(block_by) = &self.config.block_by else {
            return vec![(0..records.len()).collect()];
        };
        let mut order: Vec<String> = Vec::new();
        let mut blocks: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, record) in records.iter().enumerate() {
            let key = block_by
                .iter()
                .map(|f| canonical_value(record.get(f)))
                .collect::<Vec<_>>()
                .join("\u{1f}");
            blocks
                .entry(key.clone())
                .or_insert_with(|| {
                    order.push(key);
                    Vec::new()
                })
                .push(i);
        }
        order
            .into_iter()
            .filter_map(|k| blocks.remove(&k))
            .collect()
    }

    fn cluster_exact(&self, keys: &[String], blocks: &[Vec<usize>], sets: &mut DisjointSet) {
        for block in blocks {
            let mut first_by_digest: HashMap<&str, usize> = HashMap::new();
            for &i in block {
                match first_by_digest.get(keys[i].as_str()) {
                    Some(&first) => sets.union(first, i),
                    None => {
                        first_by_digest.insert(keys[i].as_str(), i);
                    }
                }
            }
        }
    }

    fn cluster_fuzzy(
        &self,
        embedder: &dyn Embedder,
        texts: &[String],
        blocks: &[Vec<usize>],
        sets: &mut DisjointSet,
    ) {
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let vectors = embedder.embed_batch(&refs);
        let threshold = self.config.similarity_threshold;
        for block in blocks {
            for (pos, &i) in block.iter().enumerate() {
                for &j in &block[pos + 1..] {
                    let similarity = if texts[i] == texts[j] {
                        1.0
                    } else {
                        cosine_similarity(&vectors[i], &vectors[j]).min(DISTINCT_TEXT_CEILING)
                    };
                    if similarity >= threshold {
                        sets.union(i, j);
                    }
                }
            }
        }
    }

    fn survivor(&self, members: &[usize], records: &[Record]) -> usize {
        match self.config.merge_strategy {
            MergeStrategy::KeepFirst => members[0],
            MergeStrategy::KeepLast => members[members.len() - 1],
            MergeStrategy::KeepBestQuality => {
                let mut best = members[0];
                let mut best_score = records[best].metadata.quality_score.unwrap_or(0.0);
                for &i in &members[1..] {
                    let score = records[i].metadata.quality_score.unwrap_or(0.0);
                    if score > best_score {
                        best = i;
                        best_score = score;
                    }
                }
                best
            }
        }
    }
}

/// Trimmed, lower-cased rendering. Missing and null share one marker.
fn canonical_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => NULL_MARKER.to_string(),
        Some(Value::String(s)) => s.trim().to_lowercase(),
        Some(other) => other.to_string().trim().to_lowercase(),
    }
}

fn sha256_hex(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

impl Transformer for Deduplicator {
    fn name(&self) -> &str {
        "deduplicator"
    }

    /// Duplicates only exist relative to a batch; single records pass through.
    fn transform(&mut self, record: Record) -> Result<Option<Record>, TransformError> {
        Ok(Some(record))
    }

    fn transform_batch(&mut self, records: Vec<Record>) -> Vec<Record> {
        let n = records.len();
        if n == 0 {
            return records;
        }
        let fields = self.match_fields(&records);
        let blocks = self.blocks(&records);
        let mut sets = DisjointSet::new(n);

        let keys: Vec<String> = match (self.config.match_mode, self.embedder.as_deref()) {
            (MatchMode::Fuzzy, Some(embedder)) => {
                let texts: Vec<String> = records
                    .iter()
                    .map(|r| {
                        fields
                            .iter()
                            .map(|f| format!("{f}: {}", canonical_value(r.get(f))))
                            .collect::<Vec<_>>()
                            .join(" | ")
                    })
                    .collect();
                self.cluster_fuzzy(embedder, &texts, &blocks, &mut sets);
                texts.iter().map(|t| sha256_hex(t)).collect()
            }
            _ => {
                let texts: Vec<String> = records
                    .iter()
                    .map(|r| {
                        fields
                            .iter()
                            .map(|f| format!("{f}={}", canonical_value(r.get(f))))
                            .collect::<Vec<_>>()
                            .join("\u{1f}")
                    })
                    .collect();
                let keys: Vec<String> = texts.iter().map(|t| sha256_hex(t)).collect();
                self.cluster_exact(&keys, &blocks, &mut sets);
                keys
            }
        };

        // survivor index -> (cluster id, cluster size)
        let mut keep: Vec<Option<(String, usize)>> = vec![None; n];
        let mut clusters = 0usize;
        for members in sets.groups() {
            let survivor = self.survivor(&members, &records);
            if members.len() > 1 {
                clusters += 1;
            }
            keep[survivor] = Some((keys[members[0]][..16].to_string(), members.len()));
        }

        let mut out = Vec::with_capacity(n);
        for (i, mut record) in records.into_iter().enumerate() {
            match keep[i].take() {
                Some((cluster_id, size)) => {
                    if size > 1 {
                        record.annotate("dedup_cluster_id", cluster_id);
                        record.annotate("dedup_cluster_size", size);
                        self.stats.record_modified();
                    }
                    out.push(record);
                }
                None => {
                    tracing::debug!(record = record.display_id(), "Dropped duplicate record");
                }
            }
        }

        self.stats.record_processed_n(n);
        self.stats.record_filtered_n(n - out.len());
        tracing::info!(
            operator = "deduplicator",
            mode = ?self.config.match_mode,
            input = n,
            output = out.len(),
            clusters,
            "Deduplication complete"
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::LocalEmbedder;
    use serde_json::json;

    fn people() -> Vec<Record> {
        vec![
            Record::from_value(json!({"id": 1, "name": "Alice", "email": "a@x.com"})),
            Record::from_value(json!({"id": 2, "name": "Bob", "email": "b@x.com"})),
            Record::from_value(json!({"id": 3, "name": "alice ", "email": "A@X.com"})),
            Record::from_value(json!({"id": 4, "name": "Carol", "email": "c@x.com"})),
            Record::from_value(json!({"id": 5, "name": "Dan", "email": "d@x.com"})),
        ]
    }

    fn exact(strategy: MergeStrategy) -> Deduplicator {
        Deduplicator::new(DeduplicatorConfig {
            match_fields: Some(vec!["name".into(), "email".into()]),
            merge_strategy: strategy,
            ..Default::default()
        })
        .unwrap()
    }

    fn ids(records: &[Record]) -> Vec<i64> {
        records
            .iter()
            .map(|r| r.get("id").and_then(Value::as_i64).unwrap())
            .collect()
    }

    #[test]
    fn test_disjoint_set() {
        let mut sets = DisjointSet::new(5);
        sets.union(0, 3);
        sets.union(3, 4);
        assert_eq!(sets.find(4), sets.find(0));
        assert_ne!(sets.find(1), sets.find(0));
        assert_eq!(sets.groups(), vec![vec![0, 3, 4], vec![1], vec![2]]);
    }

    #[test]
    fn test_threshold_validated() {
        let config = DeduplicatorConfig {
            similarity_threshold: 1.2,
            ..Default::default()
        };
        assert!(matches!(
            Deduplicator::new(config),
            Err(ConfigurationError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_exact_keep_first() {
        let mut dedup = exact(MergeStrategy::KeepFirst);
        let out = dedup.transform_batch(people());
        assert_eq!(ids(&out), vec![1, 2, 4, 5]);
        assert_eq!(out[0].annotation("dedup_cluster_size"), Some(&json!(2)));
        assert!(out[1].annotation("dedup_cluster_id").is_none());
        assert_eq!(dedup.stats().records_filtered, 1);
        assert_eq!(dedup.stats().records_processed, 5);
    }

    #[test]
    fn test_exact_keep_last_preserves_input_order() {
        let mut dedup = exact(MergeStrategy::KeepLast);
        let out = dedup.transform_batch(people());
        assert_eq!(ids(&out), vec![2, 3, 4, 5]);
    }

    #[test]
    fn test_keep_best_quality() {
        let mut records = people();
        records[0].metadata.quality_score = Some(0.4);
        records[2].metadata.quality_score = Some(0.9);
        let out = exact(MergeStrategy::KeepBestQuality).transform_batch(records);
        assert_eq!(ids(&out), vec![2, 3, 4, 5]);

        let tie = exact(MergeStrategy::KeepBestQuality).transform_batch(people());
        assert_eq!(ids(&tie), vec![1, 2, 4, 5]);
    }

    #[test]
    fn test_null_and_missing_match() {
        let records = vec![
            Record::from_value(json!({"name": "x", "phone": null})),
            Record::from_value(json!({"name": "x"})),
        ];
        let out = Deduplicator::new(DeduplicatorConfig::default())
            .unwrap()
            .transform_batch(records);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_exact_is_idempotent() {
        let mut dedup = exact(MergeStrategy::KeepFirst);
        let once = dedup.transform_batch(people());
        let twice = dedup.transform_batch(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_block_by_limits_comparisons() {
        let records = vec![
            Record::from_value(json!({"name": "alice", "region": "eu"})),
            Record::from_value(json!({"name": "alice", "region": "us"})),
            Record::from_value(json!({"name": "alice", "region": "eu"})),
        ];
        let mut dedup = Deduplicator::new(DeduplicatorConfig {
            match_fields: Some(vec!["name".into()]),
            block_by: Some(vec!["region".into()]),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(dedup.transform_batch(records).len(), 2);
    }

    #[test]
    fn test_fuzzy_threshold_one_matches_exact() {
        let mut fuzzy = Deduplicator::new(DeduplicatorConfig {
            match_mode: MatchMode::Fuzzy,
            match_fields: Some(vec!["name".into(), "email".into()]),
            similarity_threshold: 1.0,
            ..Default::default()
        })
        .unwrap();
        let out = fuzzy.transform_batch(people());
        assert_eq!(ids(&out), vec![1, 2, 4, 5]);
    }

    #[test]
    fn test_fuzzy_merges_near_duplicates() {
        let records = vec![
            Record::from_value(json!({"title": "Acme Widget Pro large blue", "sku": 1})),
            Record::from_value(json!({"title": "acme widget pro large blue!", "sku": 2})),
            Record::from_value(json!({"title": "Completely different gadget", "sku": 3})),
        ];
        let mut fuzzy = Deduplicator::new(DeduplicatorConfig {
            match_mode: MatchMode::Fuzzy,
            match_fields: Some(vec!["title".into()]),
            similarity_threshold: 0.9,
            ..Default::default()
        })
        .unwrap()
        .with_embedder(Box::new(LocalEmbedder::new(256)));
        let out = fuzzy.transform_batch(records);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].annotation("dedup_cluster_size"), Some(&json!(2)));
    }

    #[test]
    fn test_single_record_passes_through() {
        let mut dedup = exact(MergeStrategy::KeepFirst);
        let record = Record::from_value(json!({"name": "solo"}));
        assert_eq!(dedup.transform(record.clone()).unwrap(), Some(record));
    }
}
