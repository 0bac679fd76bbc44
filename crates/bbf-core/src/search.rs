//! Weak-learner search: a bootstrap phase followed by a floating search over
//! the discrete space of features.
//!
//! Both phases score whole generations of candidate features against the
//! current example pools and keep the weighted-error minimizer, stopping at a
//! fixed point. Correctness rests on exhaustive neighbor generation, not on
//! pruning; the scoring of one generation is the embarrassingly parallel
//! hotspot of training and is distributed over worker threads when the
//! `rayon` feature is enabled.

use crate::feature::{Feature, FeaturePoint, POINT_MAX};
use crate::sample::WindowSample;
use crate::WindowSize;
#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Weighted error of one candidate: mass of the positives it fails plus the
/// mass of the negatives it passes.
pub fn weighted_error(
    feature: &Feature,
    pos: &[WindowSample],
    neg: &[WindowSample],
    pw: &[f64],
    nw: &[f64],
) -> f64 {
    let mut err = 0.0;
    for (sample, w) in pos.iter().zip(pw) {
        if !feature.run(&sample.planes(), sample.strides()) {
            err += w;
        }
    }
    for (sample, w) in neg.iter().zip(nw) {
        if feature.run(&sample.planes(), sample.strides()) {
            err += w;
        }
    }
    err
}

/// Every sample position of the detection window, in generation order:
/// level-major, then column, then row.
pub fn window_positions(size: WindowSize) -> Vec<FeaturePoint> {
    let mut pts = Vec::new();
    for level in 0u8..3 {
        for x in 0..size.cols(level as usize) as u8 {
            for y in 0..size.rows(level as usize) as u8 {
                pts.push(FeaturePoint::new(x, y, level));
            }
        }
    }
    pts
}

/// Index and error of the lowest-weighted-error candidate; ties resolve to
/// the first occurrence in generation order.
fn best_of(
    candidates: &[Feature],
    pos: &[WindowSample],
    neg: &[WindowSample],
    pw: &[f64],
    nw: &[f64],
) -> (usize, f64) {
    #[cfg(feature = "rayon")]
    let (err, idx) = candidates
        .par_iter()
        .enumerate()
        .map(|(i, f)| (weighted_error(f, pos, neg, pw, nw), i))
        .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)))
        .expect("candidate generation is never empty");

    #[cfg(not(feature = "rayon"))]
    let (err, idx) = {
        let mut best = (f64::INFINITY, 0usize);
        for (i, f) in candidates.iter().enumerate() {
            let e = weighted_error(f, pos, neg, pw, nw);
            if e < best.0 {
                best = (e, i);
            }
        }
        best
    };

    (idx, err)
}

/// Find the feature minimizing weighted error on the given pools.
///
/// `start` seeds the bootstrap: holding a single positive point fixed, every
/// window position is tried as the sole negative point (and on alternate
/// rounds the roles swap) until a round no longer changes the best pair.
/// The floating search then grows, moves, and shrinks the incumbent by one
/// point at a time, exhaustively, until no single edit improves it. Returns
/// the final feature and its weighted error.
pub fn search_feature(
    pos: &[WindowSample],
    neg: &[WindowSample],
    pw: &[f64],
    nw: &[f64],
    size: WindowSize,
    start: FeaturePoint,
) -> (Feature, f64) {
    debug_assert!(size.width <= 255 && size.height <= 255);
    let pts = window_positions(size);

    // bootstrap: converge on the best single positive/negative pair. A
    // round must strictly lower the error to be adopted; stopping on ties
    // keeps the loop from wandering between equal-error pairs.
    let mut incumbent: Option<(Feature, f64)> = None;
    for round in 0usize.. {
        let (pos_pt, neg_pt) = match incumbent {
            None => (start, start),
            Some((f, _)) => (f.positives()[0], f.negatives()[0]),
        };
        let candidates: Vec<Feature> = if round % 2 == 0 {
            pts.iter()
                .filter(|&&q| q != pos_pt)
                .map(|&q| Feature::pair(pos_pt, q))
                .collect()
        } else {
            pts.iter()
                .filter(|&&q| q != neg_pt)
                .map(|&q| Feature::pair(q, neg_pt))
                .collect()
        };
        let (idx, err) = best_of(&candidates, pos, neg, pw, nw);
        let winner = candidates[idx];
        match incumbent {
            Some((f, best_err)) if winner.equivalent(&f) || err >= best_err => break,
            _ => incumbent = Some((winner, err)),
        }
    }
    let (mut best, mut best_err) = incumbent.expect("bootstrap ran at least one round");

    // floating search: exhaustive one-edit neighborhood of the incumbent
    loop {
        let mut candidates = Vec::new();
        for &q in &pts {
            if best.contains(q) {
                continue;
            }
            if best.positives().len() < POINT_MAX - 1 {
                candidates.push(best.with_positive(q).expect("below capacity"));
            }
            if best.negatives().len() < POINT_MAX - 1 {
                candidates.push(best.with_negative(q).expect("below capacity"));
            }
            for i in 0..best.positives().len() {
                candidates.push(best.with_positive_moved(i, q));
            }
            for i in 0..best.negatives().len() {
                candidates.push(best.with_negative_moved(i, q));
            }
        }
        for i in 0..best.positives().len() {
            if let Some(f) = best.without_positive(i) {
                candidates.push(f);
            }
        }
        for i in 0..best.negatives().len() {
            if let Some(f) = best.without_negative(i) {
                candidates.push(f);
            }
        }
        candidates.push(best);

        let (idx, err) = best_of(&candidates, pos, neg, pw, nw);
        let winner = candidates[idx];
        // the incumbent is among the candidates, so err <= best_err; only a
        // strict improvement justifies another round
        if winner.equivalent(&best) || err >= best_err {
            break;
        }
        best = winner;
        best_err = err;
    }

    (best, best_err)
}
