//! Property-based tests for the operators using proptest.

use proptest::prelude::*;

use refinery_core::transformers::{
    AggregationSpec, Aggregator, AggregatorConfig, AnomalyDetector, AnomalyDetectorConfig,
    DetectionMethod, Deduplicator, DeduplicatorConfig, MatchMode, QualityScorer,
    QualityScorerConfig, QualityWeights,
};
use refinery_core::{Record, Transformer};
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet, HashSet};

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        (-1000i64..1000).prop_map(Value::from),
        (-1e6f64..1e6).prop_map(|f| json!(f)),
        "[a-z@. ]{0,12}".prop_map(Value::from),
    ]
}

fn payloads() -> impl Strategy<Value = Vec<Value>> {
    let keys = prop::sample::select(vec!["id", "name", "email", "age", "price", "created_at", "note"]);
    prop::collection::vec(
        prop::collection::btree_map(keys, scalar(), 0..6)
            .prop_map(|m| Value::Object(m.into_iter().map(|(k, v)| (k.to_string(), v)).collect())),
        0..30,
    )
}

fn to_records(values: &[Value]) -> Vec<Record> {
    values.iter().cloned().map(Record::from_value).collect()
}

fn people(pairs: &[(u8, u8)]) -> Vec<Record> {
    pairs
        .iter()
        .map(|(n, e)| Record::from_value(json!({"name": format!("n{n}"), "email": format!("e{e}")})))
        .collect()
}

fn dedup(mode: MatchMode, threshold: f64) -> Deduplicator {
    Deduplicator::new(DeduplicatorConfig {
        match_mode: mode,
        match_fields: Some(vec!["name".into(), "email".into()]),
        similarity_threshold: threshold,
        ..Default::default()
    })
    .unwrap()
}

fn flagged(detector: &AnomalyDetector, records: &[Record], method: DetectionMethod) -> BTreeSet<usize> {
    detector.detect(records, method).into_keys().collect()
}

// --- Quality scorer properties ---

proptest! {
    #[test]
    fn quality_score_is_bounded(values in payloads()) {
        let scorer = QualityScorer::new(QualityScorerConfig::default()).unwrap();
        for value in &values {
            let record = Record::from_value(value.clone());
            let b = scorer.score(&record.data);
            for part in [b.completeness, b.validity, b.consistency, b.overall] {
                prop_assert!((0.0..=1.0).contains(&part), "score {} out of range", part);
            }
        }
    }

    #[test]
    fn weights_off_one_are_rejected(c in 0.0f64..1.0, v in 0.0f64..1.0, k in 0.0f64..1.0) {
        prop_assume!((c + v + k - 1.0).abs() > 0.011);
        let config = QualityScorerConfig {
            weights: QualityWeights { completeness: c, validity: v, consistency: k },
            ..Default::default()
        };
        prop_assert!(QualityScorer::new(config).is_err());
    }
}

// --- Deduplication properties ---

proptest! {
    #[test]
    fn exact_dedup_is_idempotent(pairs in prop::collection::vec((0u8..5, 0u8..5), 0..40)) {
        let mut first = dedup(MatchMode::Exact, 0.95);
        let once = first.transform_batch(people(&pairs));
        let distinct: HashSet<_> = pairs.iter().collect();
        prop_assert_eq!(once.len(), distinct.len());

        let mut second = dedup(MatchMode::Exact, 0.95);
        let twice = second.transform_batch(once.clone());
        prop_assert_eq!(twice, once);
    }

    #[test]
    fn fuzzy_dedup_never_grows(pairs in prop::collection::vec((0u8..5, 0u8..5), 0..25), t in 0.5f64..1.0) {
        let input = people(&pairs);
        let n = input.len();
        let out = dedup(MatchMode::Fuzzy, t).transform_batch(input);
        prop_assert!(out.len() <= n);
    }

    #[test]
    fn fuzzy_at_full_threshold_matches_exact(pairs in prop::collection::vec((0u8..6, 0u8..6), 0..30)) {
        let exact = dedup(MatchMode::Exact, 1.0).transform_batch(people(&pairs));
        let fuzzy = dedup(MatchMode::Fuzzy, 1.0).transform_batch(people(&pairs));
        let payloads = |rs: Vec<Record>| rs.into_iter().map(|r| r.data).collect::<Vec<_>>();
        prop_assert_eq!(payloads(fuzzy), payloads(exact));
    }
}

// --- Aggregation properties ---

proptest! {
    #[test]
    fn one_group_per_distinct_key(keys in prop::collection::vec((0u8..4, 0u8..3), 1..40)) {
        let records: Vec<Record> = keys
            .iter()
            .map(|(a, b)| Record::from_value(json!({"a": a, "b": b, "v": 1})))
            .collect();
        let mut aggregations = BTreeMap::new();
        aggregations.insert("n".to_string(), AggregationSpec { field: "v".into(), function: "count".into() });
        let mut agg = Aggregator::new(AggregatorConfig {
            group_by: vec!["a".into(), "b".into()],
            aggregations,
            keep_group_fields: true,
        })
        .unwrap();

        let out = agg.transform_batch(records);
        let distinct: HashSet<_> = keys.iter().collect();
        prop_assert_eq!(out.len(), distinct.len());
        for record in &out {
            let a = record.get("a").and_then(Value::as_u64).unwrap() as u8;
            let b = record.get("b").and_then(Value::as_u64).unwrap() as u8;
            let size = keys.iter().filter(|k| **k == (a, b)).count();
            prop_assert_eq!(record.get("n"), Some(&json!(size)));
        }
    }
}

// --- Anomaly detection properties ---

proptest! {
    #[test]
    fn constant_field_is_never_flagged(value in -1e6f64..1e6, n in 3usize..40) {
        let records: Vec<Record> = (0..n).map(|_| Record::from_value(json!({"x": value}))).collect();
        let detector = AnomalyDetector::new(AnomalyDetectorConfig::default()).unwrap();
        prop_assert!(flagged(&detector, &records, DetectionMethod::Statistical).is_empty());
    }

    #[test]
    fn combined_is_subset_of_union(xs in prop::collection::vec(-100.0f64..100.0, 4..40), spike in 500.0f64..5000.0) {
        let mut values = xs;
        values.push(spike);
        let records: Vec<Record> = values.iter().map(|x| Record::from_value(json!({"x": x}))).collect();
        let detector = AnomalyDetector::new(AnomalyDetectorConfig::default()).unwrap();

        let union: BTreeSet<usize> = [
            DetectionMethod::Statistical,
            DetectionMethod::Iqr,
            DetectionMethod::IsolationForest,
        ]
        .into_iter()
        .flat_map(|m| flagged(&detector, &records, m))
        .collect();
        let combined = flagged(&detector, &records, DetectionMethod::Combined);
        prop_assert!(combined.is_subset(&union));
    }
}
