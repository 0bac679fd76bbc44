//! Hard-negative mining: harvest background crops that the in-progress
//! cascade still mistakes for objects.
//!
//! Each pass walks the background set (mirrored horizontally on odd passes),
//! runs the detector with grouping disabled, and samples candidate windows
//! without replacement up to a per-image quota. A crop is kept only when
//! every finished stage accepts it. The quota is generous on the first two
//! passes and shrinks to the remaining demand afterwards; a full pass that
//! harvests nothing declares the background set exhausted.

use std::path::{Path, PathBuf};

use bbf_core::sample::WindowSample;
use bbf_core::{Cascade, Rect};
use image::imageops::flip_horizontal;
use image::GrayImage;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
#[cfg(feature = "tracing")]
use tracing::{debug, instrument, warn};

use crate::detect::{detect_objects, DetectParams};
use crate::samples::sample_from_crop;

/// Harvest up to `want` hard negatives from `backgrounds`.
///
/// Unreadable images are skipped with a diagnostic; running out of
/// productive backgrounds is not an error and simply yields fewer samples
/// than requested.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(cascade, backgrounds), fields(backgrounds = backgrounds.len(), want))
)]
pub fn mine_negatives(
    cascade: &Cascade,
    backgrounds: &[PathBuf],
    want: usize,
    seed: u64,
) -> Vec<WindowSample> {
    let mut out = Vec::with_capacity(want);
    if want == 0 {
        return out;
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let params = DetectParams::new()
        .with_min_neighbors(0)
        .with_min_size(cascade.size);

    'passes: for pass in 0usize.. {
        let before = out.len();
        for (i, path) in backgrounds.iter().enumerate() {
            // spread the remaining demand over the remaining images early
            // on, then ask each image for everything that is still missing
            let quota = if pass < 2 {
                (want - out.len()) / (backgrounds.len() - i) + 1
            } else {
                want - out.len()
            };

            let img = match load_gray(path) {
                Ok(img) => img,
                Err(_e) => {
                    #[cfg(feature = "tracing")]
                    warn!(path = %path.display(), error = %_e, "skipping unreadable background");
                    continue;
                }
            };
            let img = if pass % 2 == 1 {
                flip_horizontal(&img)
            } else {
                img
            };

            let candidates = detect_objects(&img, &[cascade], &params);
            let mut picks: Vec<usize> = (0..candidates.len())
                .filter(|&c| fits_inside(&candidates[c].rect, &img))
                .collect();
            picks.shuffle(&mut rng);

            for &c in picks.iter().take(quota) {
                let sample = sample_from_crop(&img, candidates[c].rect, cascade.size);
                if cascade.accepts(&sample.planes(), sample.strides()).is_some() {
                    out.push(sample);
                    if out.len() >= want {
                        break 'passes;
                    }
                }
            }

            #[cfg(feature = "tracing")]
            debug!(harvested = out.len(), want, "mining progress");
        }

        if out.len() == before {
            #[cfg(feature = "tracing")]
            warn!(
                harvested = out.len(),
                want, "background set exhausted before reaching the requested count"
            );
            break;
        }
    }

    out
}

fn load_gray(path: &Path) -> image::ImageResult<GrayImage> {
    Ok(image::ImageReader::open(path)?.decode()?.to_luma8())
}

/// Whether the candidate rectangle can be cropped with a margin; detections
/// at the very edge of the frame are rejected rather than clamped.
fn fits_inside(rect: &Rect, img: &GrayImage) -> bool {
    rect.x >= 0
        && rect.y >= 0
        && rect.x + rect.width < img.width() as i32
        && rect.y + rect.height < img.height() as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use bbf_core::WindowSize;
    use image::Luma;

    fn noise_image(side: u32, seed: u64) -> GrayImage {
        let mut state = seed | 1;
        GrayImage::from_fn(side, side, |_, _| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            Luma([(state % 256) as u8])
        })
    }

    fn temp_backgrounds(n: usize, tag: &str) -> Vec<PathBuf> {
        let dir = std::env::temp_dir().join(format!("bbf-mine-{}-{tag}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        (0..n)
            .map(|i| {
                let path = dir.join(format!("bg-{i}.png"));
                noise_image(48, 0x1234 + i as u64).save(&path).unwrap();
                path
            })
            .collect()
    }

    #[test]
    fn empty_cascade_harvests_the_requested_count() {
        let backgrounds = temp_backgrounds(2, "count");
        let cascade = Cascade::new(WindowSize::new(8, 8));
        let negs = mine_negatives(&cascade, &backgrounds, 12, 7);
        assert_eq!(negs.len(), 12);
        for s in &negs {
            assert!(cascade.accepts(&s.planes(), s.strides()).is_some());
        }
    }

    #[test]
    fn mining_is_deterministic_for_a_seed() {
        let backgrounds = temp_backgrounds(2, "seed");
        let cascade = Cascade::new(WindowSize::new(8, 8));
        let a = mine_negatives(&cascade, &backgrounds, 6, 42);
        let b = mine_negatives(&cascade, &backgrounds, 6, 42);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.as_bytes(), y.as_bytes());
        }
    }

    #[test]
    fn unreadable_backgrounds_are_skipped() {
        let mut backgrounds = temp_backgrounds(1, "bad");
        backgrounds.insert(0, PathBuf::from("/nonexistent/missing.png"));
        let cascade = Cascade::new(WindowSize::new(8, 8));
        let negs = mine_negatives(&cascade, &backgrounds, 4, 3);
        assert_eq!(negs.len(), 4);
    }

    #[test]
    fn exhaustion_returns_a_shortfall() {
        let backgrounds = temp_backgrounds(1, "short");
        // a cascade that rejects everything: impossible ordering
        let mut stage = bbf_core::StageClassifier::new();
        stage.push(
            bbf_core::Feature::pair(
                bbf_core::FeaturePoint::new(0, 0, 0),
                bbf_core::FeaturePoint::new(0, 0, 0),
            ),
            1.0,
        );
        stage.threshold = 10.0;
        let mut cascade = Cascade::new(WindowSize::new(8, 8));
        cascade.stages.push(stage);

        let negs = mine_negatives(&cascade, &backgrounds, 5, 1);
        assert!(negs.is_empty());
    }
}
