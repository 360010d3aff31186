#![allow(clippy::uninlined_format_args, clippy::cast_precision_loss)]
use std::sync::Arc;

use approx::assert_relative_eq;
use specview_algorithms::{AggregationConfig, AggregationEngine, PublishedSets, RebuildOutcome};
use specview_core::{LabelChange, LabelMask, SharedContext, SpectralImage, Value, ViewportContext};

/// Small deterministic generator so runs are reproducible.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        self.0 >> 33
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }
}

const WIDTH: usize = 37;
const HEIGHT: usize = 23;
const BANDS: usize = 4;
const LABELS: [&str; 3] = ["leaf", "bark", "sky"];

fn random_image(seed: u64) -> SpectralImage {
    let mut rng = Lcg(seed);
    let bands = (0..BANDS)
        .map(|_| {
            (0..WIDTH * HEIGHT)
                .map(|_| rng.below(256) as Value)
                .collect()
        })
        .collect();
    SpectralImage::new(WIDTH, HEIGHT, bands, 0.0, 255.0).unwrap()
}

fn random_mask(seed: u64) -> LabelMask {
    let mut rng = Lcg(seed);
    let data = (0..WIDTH * HEIGHT)
        .map(|_| rng.below(LABELS.len() as u64 + 1) as u8)
        .collect();
    LabelMask::from_vec(WIDTH, HEIGHT, data).unwrap()
}

fn engine_for(image: &SpectralImage, config: AggregationConfig) -> AggregationEngine {
    let ctx = ViewportContext::for_image(image, 8)
        .unwrap()
        .with_labels(LABELS);
    AggregationEngine::new(Arc::new(SharedContext::new(ctx)), config).unwrap()
}

fn build(image: &SpectralImage, mask: &LabelMask, config: AggregationConfig) -> Arc<PublishedSets> {
    let engine = engine_for(image, config);
    assert!(engine.rebuild(image, mask).unwrap().is_published());
    engine.current()
}

fn assert_same_sets(a: &PublishedSets, b: &PublishedSets) {
    assert_eq!(a.sets().len(), b.sets().len());
    for (x, y) in a.sets().iter().zip(b.sets()) {
        assert_eq!(x.total_weight(), y.total_weight(), "label {}", x.name());
        let (xb, yb) = (x.bins(), y.bins());
        assert_eq!(xb.len(), yb.len(), "label {}", x.name());
        for ((kx, bx), (ky, by)) in xb.iter().zip(&yb) {
            assert_eq!(kx, ky);
            assert_relative_eq!(bx.weight(), by.weight());
            for (mx, my) in bx.means().iter().zip(by.means()) {
                assert_relative_eq!(*mx, my, epsilon = 1e-4);
            }
        }
    }
}

#[test]
fn test_partition_independence() {
    let image = random_image(7);
    let mask = random_mask(11);
    let reference = build(&image, &mask, AggregationConfig::default().with_parallel(false));

    for rows in [1, 7, HEIGHT, 1000] {
        let parallel = build(
            &image,
            &mask,
            AggregationConfig::default()
                .with_rows_per_chunk(rows)
                .with_shards(3),
        );
        assert_same_sets(&reference, &parallel);
    }
    assert_eq!(reference.total_weight(), (WIDTH * HEIGHT) as u64);
}

#[test]
fn test_delta_equivalence() {
    let image = random_image(3);
    let mut mask = random_mask(5);
    let engine = engine_for(&image, AggregationConfig::default());
    engine.rebuild(&image, &mask).unwrap();

    let mut rng = Lcg(99);
    let mut changes = Vec::new();
    for _ in 0..500 {
        let pixel = rng.below((WIDTH * HEIGHT) as u64) as usize;
        let label = rng.below(LABELS.len() as u64 + 1) as u8;
        if let Some(change) = mask.relabel(pixel, label).unwrap() {
            changes.push(change);
        }
    }
    let stats = engine.apply_deltas(&image, &changes).unwrap();
    assert_eq!(stats.applied, changes.len());
    assert_eq!(stats.skipped, 0);

    let rebuilt = build(&image, &mask, AggregationConfig::default());
    assert_same_sets(&engine.current(), &rebuilt);
}

#[test]
fn test_add_then_remove_restores_set() {
    let image = random_image(21);
    let mask = LabelMask::unlabeled(WIDTH, HEIGHT);
    let engine = engine_for(&image, AggregationConfig::default());
    engine.rebuild(&image, &mask).unwrap();
    let before = engine.current().set(0).unwrap().bins();

    for pixel in [0, 17, 400] {
        engine.apply_delta(&image, LabelChange::new(pixel, 0, 2)).unwrap();
    }
    for pixel in [400, 17, 0] {
        engine.apply_delta(&image, LabelChange::new(pixel, 2, 0)).unwrap();
    }

    let current = engine.current();
    assert_eq!(current.set(0).unwrap().bins().len(), before.len());
    for ((k1, b1), (k2, b2)) in before.iter().zip(current.set(0).unwrap().bins()) {
        assert_eq!(*k1, k2);
        assert_relative_eq!(b1.weight(), b2.weight());
        for (m1, m2) in b1.means().iter().zip(b2.means()) {
            assert_relative_eq!(*m1, m2, epsilon = 1e-4);
        }
    }
    assert!(current.set(2).unwrap().is_empty());
}

#[test]
fn test_stale_background_rebuild_keeps_previous_sets() {
    let image = Arc::new(random_image(1));
    let mask = Arc::new(LabelMask::unlabeled(WIDTH, HEIGHT));
    let engine = Arc::new(engine_for(&image, AggregationConfig::default()));
    engine.rebuild(&image, &mask).unwrap();
    let published = engine.current();

    let snapshot = engine.context().snapshot();
    let stale = engine.build(snapshot, &image, &mask).unwrap();
    let generation = engine
        .context()
        .update(|ctx| ctx.set_nbins(16))
        .unwrap();

    match engine.publish(stale) {
        RebuildOutcome::Stale { built, current } => {
            assert_eq!(built + 1, current);
            assert_eq!(current, generation);
        }
        other => panic!("expected stale outcome, got {:?}", other),
    }
    assert!(Arc::ptr_eq(&published, &engine.current()));

    let outcome = engine
        .spawn_rebuild(Arc::clone(&image), Arc::clone(&mask))
        .join()
        .unwrap()
        .unwrap();
    assert!(outcome.is_published());
    assert_eq!(engine.current().context().nbins(), 16);
    assert!(!engine.context().is_pending());
}

#[test]
fn test_delta_during_rebuild_is_not_lost() {
    let image = random_image(5);
    let mut mask = random_mask(10);
    let engine = engine_for(&image, AggregationConfig::default());
    engine.rebuild(&image, &mask).unwrap();
    engine.context().invalidate();

    // the build is taken from the mask before the edit lands
    let in_flight = engine
        .build(engine.context().snapshot(), &image, &mask)
        .unwrap();
    let target = (0..WIDTH * HEIGHT)
        .find(|&i| mask.as_slice()[i] != 1)
        .unwrap();
    let change = mask.relabel(target, 1).unwrap().unwrap();
    let before = engine.current().set(1).unwrap().total_weight();
    engine.apply_delta(&image, change).unwrap();

    match engine.publish(in_flight) {
        RebuildOutcome::LabelsChanged { built, current } => assert_eq!(built + 1, current),
        other => panic!("expected labels-changed outcome, got {:?}", other),
    }
    assert_eq!(engine.current().set(1).unwrap().total_weight(), before + 1);
    assert!(engine.context().is_pending());

    assert!(engine.rebuild(&image, &mask).unwrap().is_published());
    let reference = build(&image, &mask, AggregationConfig::default());
    let current = engine.current();
    for label in 0..=LABELS.len() as u8 {
        assert_eq!(
            current.set(label).unwrap().total_weight(),
            reference.set(label).unwrap().total_weight()
        );
    }
    assert_eq!(current.set(1).unwrap().total_weight(), before + 1);
}

#[test]
fn test_readers_keep_their_snapshot() {
    let image = random_image(4);
    let mask = random_mask(8);
    let engine = engine_for(&image, AggregationConfig::default());
    engine.rebuild(&image, &mask).unwrap();

    let held = engine.current();
    let weight = held.total_weight();
    engine.context().invalidate();
    engine
        .rebuild(&image, &LabelMask::unlabeled(WIDTH, HEIGHT))
        .unwrap();

    assert_eq!(held.total_weight(), weight);
    assert_eq!(held.generation(), 1);
    assert_eq!(engine.current().generation(), 2);
}
