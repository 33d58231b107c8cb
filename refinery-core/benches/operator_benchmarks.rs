use criterion::{Criterion, black_box, criterion_group, criterion_main};
use refinery_core::transformers::{
    AnomalyDetector, AnomalyDetectorConfig, DetectionMethod, Deduplicator, DeduplicatorConfig,
    MatchMode, QualityScorer, QualityScorerConfig, SchemaInferrer, SchemaInferrerConfig,
};
use refinery_core::tuner::{AutoTuner, AutoTunerConfig, InMemoryHistoryStore, PerformanceSample};
use refinery_core::{Record, Transformer};
use serde_json::json;
use std::sync::Arc;

fn customers(n: usize) -> Vec<Record> {
    (0..n)
        .map(|i| {
            Record::from_value(json!({
                "id": i,
                "name": format!("Customer {}", i % (n / 2).max(1)),
                "email": format!("customer{}@example.com", i % (n / 2).max(1)),
                "age": 20 + i % 50,
                "amount": (i % 97) as f64 * 1.5,
                "created_at": "2024-03-01T12:00:00Z",
            }))
        })
        .collect()
}

fn bench_quality(c: &mut Criterion) {
    let scorer = QualityScorer::new(QualityScorerConfig::default()).unwrap();
    let records = customers(1);
    c.bench_function("quality_score_record", |b| {
        b.iter(|| scorer.score(black_box(&records[0].data)))
    });
}

fn bench_dedup(c: &mut Criterion) {
    let records = customers(1000);
    c.bench_function("dedup_exact_1000", |b| {
        b.iter(|| {
            let mut dedup = Deduplicator::new(DeduplicatorConfig {
                match_fields: Some(vec!["name".into(), "email".into()]),
                ..Default::default()
            })
            .unwrap();
            dedup.transform_batch(black_box(records.clone()))
        })
    });

    let records = customers(200);
    c.bench_function("dedup_fuzzy_200", |b| {
        b.iter(|| {
            let mut dedup = Deduplicator::new(DeduplicatorConfig {
                match_mode: MatchMode::Fuzzy,
                match_fields: Some(vec!["name".into(), "email".into()]),
                ..Default::default()
            })
            .unwrap();
            dedup.transform_batch(black_box(records.clone()))
        })
    });
}

fn bench_anomaly(c: &mut Criterion) {
    let records = customers(1000);
    let detector = AnomalyDetector::new(AnomalyDetectorConfig::default()).unwrap();
    for method in [
        DetectionMethod::Statistical,
        DetectionMethod::Iqr,
        DetectionMethod::IsolationForest,
        DetectionMethod::Combined,
    ] {
        c.bench_function(&format!("anomaly_{}_1000", method.as_str()), |b| {
            b.iter(|| detector.detect(black_box(&records), method))
        });
    }
}

fn bench_schema_inference(c: &mut Criterion) {
    let records = customers(1000);
    let inferrer = SchemaInferrer::new(SchemaInferrerConfig::default()).unwrap();
    c.bench_function("schema_infer_1000", |b| {
        b.iter(|| inferrer.infer(black_box(&records)))
    });
}

fn bench_tuner(c: &mut Criterion) {
    let store = Arc::new(InMemoryHistoryStore::new());
    let tuner = AutoTuner::new(store, AutoTunerConfig::default()).unwrap();
    for i in 0..100u64 {
        let batch_size = [250, 500, 1000, 2500][(i % 4) as usize];
        tuner
            .record_performance(PerformanceSample::new("bench", 10_000 + i * 7, 2.0, batch_size, 64.0))
            .unwrap();
    }
    c.bench_function("tuner_recommend_100_samples", |b| {
        b.iter(|| tuner.recommend(black_box("bench"), Some(500)))
    });
}

criterion_group!(
    benches,
    bench_quality,
    bench_dedup,
    bench_anomaly,
    bench_schema_inference,
    bench_tuner
);
criterion_main!(benches);
