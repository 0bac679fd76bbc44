//! Round-trip the two model encodings and confirm a reloaded cascade scores
//! probe windows bit-identically.

use bbf::{
    load_cascade, read_cascade_blob, save_cascade, write_cascade_blob, Cascade, Feature,
    FeaturePoint, StageClassifier, WindowSample, WindowSize,
};

fn probe_cascade() -> Cascade {
    let size = WindowSize::new(16, 16);
    let mut cascade = Cascade::new(size);

    // thresholds and alphas picked so that decimal formatting would lose bits
    let mut first = StageClassifier::new();
    first.threshold = f32::from_bits(0xbdcc_cccd); // ~ -0.1
    first.features.push(
        Feature::from_points(
            &[FeaturePoint::new(8, 8, 0), FeaturePoint::new(3, 3, 1)],
            &[FeaturePoint::new(0, 0, 0)],
        )
        .unwrap(),
    );
    first.alphas.push([-(2.0f32 / 3.0), 2.0f32 / 3.0]);

    let mut second = StageClassifier::new();
    second.threshold = f32::from_bits(0x3a83_126f);
    second.features.push(
        Feature::from_points(
            &[FeaturePoint::new(15, 0, 0)],
            &[
                FeaturePoint::new(0, 15, 0),
                FeaturePoint::new(2, 2, 2),
                FeaturePoint::new(7, 1, 1),
            ],
        )
        .unwrap(),
    );
    second.alphas.push([-0.123_456_79, 0.123_456_79]);
    second.features.push(
        Feature::from_points(
            &[FeaturePoint::new(4, 4, 1)],
            &[FeaturePoint::new(1, 1, 2)],
        )
        .unwrap(),
    );
    second.alphas.push([-1.0f32 / 7.0, 1.0f32 / 7.0]);

    cascade.stages.push(first);
    cascade.stages.push(second);
    cascade
}

fn probe_windows(size: WindowSize) -> Vec<WindowSample> {
    let mut state = 0x9e37_79b9u64;
    let mut next = || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        (state % 256) as u8
    };
    (0..16)
        .map(|_| {
            let full: Vec<u8> = (0..size.width * size.height).map(|_| next()).collect();
            WindowSample::from_full_res(&full, size.width as usize, size)
        })
        .collect()
}

fn stage_scores(cascade: &Cascade, windows: &[WindowSample]) -> Vec<u32> {
    let mut bits = Vec::new();
    for w in windows {
        for stage in &cascade.stages {
            bits.push(stage.score(&w.planes(), w.strides()).to_bits());
        }
    }
    bits
}

#[test]
fn text_model_reloads_bit_exactly() {
    let dir = std::env::temp_dir().join(format!("bbf-roundtrip-{}", std::process::id()));
    let cascade = probe_cascade();
    save_cascade(&dir, &cascade).unwrap();
    let loaded = load_cascade(&dir).unwrap();

    assert_eq!(loaded.size, cascade.size);
    assert_eq!(loaded.stages.len(), cascade.stages.len());
    for (a, b) in cascade.stages.iter().zip(&loaded.stages) {
        assert_eq!(a.threshold.to_bits(), b.threshold.to_bits());
        for (x, y) in a.alphas.iter().zip(&b.alphas) {
            assert_eq!(x[0].to_bits(), y[0].to_bits());
            assert_eq!(x[1].to_bits(), y[1].to_bits());
        }
    }

    let windows = probe_windows(cascade.size);
    assert_eq!(stage_scores(&cascade, &windows), stage_scores(&loaded, &windows));
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn binary_blob_reloads_bit_exactly() {
    let cascade = probe_cascade();
    let needed = write_cascade_blob(&cascade, &mut []);
    let mut buf = vec![0u8; needed];
    assert_eq!(write_cascade_blob(&cascade, &mut buf), needed);

    let loaded = read_cascade_blob(&buf).unwrap();
    let windows = probe_windows(cascade.size);
    assert_eq!(stage_scores(&cascade, &windows), stage_scores(&loaded, &windows));
}

#[test]
fn both_encodings_agree_with_each_other() {
    let dir = std::env::temp_dir().join(format!("bbf-agree-{}", std::process::id()));
    let cascade = probe_cascade();
    save_cascade(&dir, &cascade).unwrap();
    let from_text = load_cascade(&dir).unwrap();

    let mut buf = vec![0u8; write_cascade_blob(&cascade, &mut [])];
    write_cascade_blob(&cascade, &mut buf);
    let from_blob = read_cascade_blob(&buf).unwrap();

    let windows = probe_windows(cascade.size);
    assert_eq!(
        stage_scores(&from_text, &windows),
        stage_scores(&from_blob, &windows)
    );
    std::fs::remove_dir_all(&dir).unwrap();
}
