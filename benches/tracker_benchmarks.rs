//! Tracker benchmarks using Criterion.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use birdtrack::{
    BoundingBox, Detection, FlockConfig, FlockDetector, MatchMetric, Tracker, TrackerConfig,
};

/// Create test detections for benchmarking: one bird per 100px grid step.
fn create_test_detections(n: usize, frame_index: usize) -> Vec<Detection> {
    (0..n)
        .map(|i| {
            let x = (i * 100) as f64;
            let y = (i * 50) as f64;
            let bbox = BoundingBox::new(x, y, 50.0, 50.0);
            Detection::new("gull", bbox, 0.9, frame_index).expect("valid detection")
        })
        .collect()
}

fn benchmark_tracker_update_10_objects(c: &mut Criterion) {
    let mut tracker = Tracker::new(TrackerConfig::default()).expect("valid tracker");
    let detections = create_test_detections(10, 0);

    c.bench_function("tracker_update_10_objects", |b| {
        b.iter(|| {
            tracker.update(1, black_box(detections.clone()));
        })
    });
}

fn benchmark_tracker_update_50_objects(c: &mut Criterion) {
    let mut tracker = Tracker::new(TrackerConfig::default()).expect("valid tracker");
    let detections = create_test_detections(50, 0);

    c.bench_function("tracker_update_50_objects", |b| {
        b.iter(|| {
            tracker.update(1, black_box(detections.clone()));
        })
    });
}

fn benchmark_tracker_update_100_objects(c: &mut Criterion) {
    let mut tracker = Tracker::new(TrackerConfig::default()).expect("valid tracker");
    let detections = create_test_detections(100, 0);

    c.bench_function("tracker_update_100_objects", |b| {
        b.iter(|| {
            tracker.update(1, black_box(detections.clone()));
        })
    });
}

fn benchmark_tracker_update_100_objects_centroid(c: &mut Criterion) {
    let config = TrackerConfig {
        metric: MatchMetric::CentroidProximity,
        min_match_score: 1.0 / (1.0 + 75.0),
        ..TrackerConfig::default()
    };
    let mut tracker = Tracker::new(config).expect("valid tracker");
    let detections = create_test_detections(100, 0);

    c.bench_function("tracker_update_100_objects_centroid", |b| {
        b.iter(|| {
            tracker.update(1, black_box(detections.clone()));
        })
    });
}

fn benchmark_flock_detection_100_tracks(c: &mut Criterion) {
    let mut tracker = Tracker::new(TrackerConfig::default()).expect("valid tracker");
    tracker.update(0, create_test_detections(100, 0));
    let detector = FlockDetector::new(FlockConfig::default()).expect("valid detector");

    c.bench_function("flock_detection_100_tracks", |b| {
        b.iter(|| {
            detector.evaluate(1, black_box(tracker.active_tracks()));
        })
    });
}

criterion_group!(
    benches,
    benchmark_tracker_update_10_objects,
    benchmark_tracker_update_50_objects,
    benchmark_tracker_update_100_objects,
    benchmark_tracker_update_100_objects_centroid,
    benchmark_flock_detection_100_tracks,
);
criterion_main!(benches);
