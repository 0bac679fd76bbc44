//! AdaBoost-style weighting, threshold selection, and reweighting used while
//! growing one stage classifier.
//!
//! Weights live in two parallel vectors (one entry per positive / negative
//! example); after every pass the two pools are renormalized jointly so that
//! their combined mass is exactly one.

use crate::cascade::Cascade;
use crate::feature::Feature;
use crate::sample::WindowSample;
use crate::stage::StageClassifier;

/// Weighted error is kept away from exactly 0 and 1 so the boosting update
/// `(1 - err) / err` and its logarithm stay finite on degenerate pools.
const ERR_CLAMP: f64 = 1e-10;

/// Margin subtracted from the selected percentile score so that positives
/// sitting exactly on it still pass the stage threshold.
const THRESHOLD_MARGIN: f32 = 1e-6;

/// Class-balance multipliers applied on every reweighting pass to counteract
/// the positive/negative pool imbalance. Derived once per training run from
/// the configured balance ratio.
#[derive(Clone, Copy, Debug)]
pub struct BalanceFactors {
    pub positive: f64,
    pub negative: f64,
}

impl BalanceFactors {
    /// `k > 1` shifts mass toward positives, `k < 1` toward negatives. The
    /// 0.01 damping keeps the factors small relative to the boost update.
    pub fn from_ratio(balance_k: f64) -> Self {
        Self {
            positive: 0.01 * balance_k,
            negative: 0.01 / balance_k,
        }
    }
}

/// Reset the weight vectors to the per-class balance constants, as at the
/// start of a fresh stage.
pub fn init_weights(pw: &mut [f64], nw: &mut [f64], balance: BalanceFactors) {
    for w in pw.iter_mut() {
        *w = balance.positive;
    }
    for w in nw.iter_mut() {
        *w = balance.negative;
    }
}

/// Scale both pools by a common factor so their joint sum is one.
pub fn normalize_joint(pw: &mut [f64], nw: &mut [f64]) {
    let total: f64 = pw.iter().sum::<f64>() + nw.iter().sum::<f64>();
    if total <= 0.0 {
        return;
    }
    for w in pw.iter_mut() {
        *w /= total;
    }
    for w in nw.iter_mut() {
        *w /= total;
    }
}

/// Score every pool member with the in-progress stage.
pub fn score_pool(stage: &StageClassifier, pool: &[WindowSample]) -> Vec<f32> {
    pool.iter()
        .map(|s| stage.score(&s.planes(), s.strides()))
        .collect()
}

/// Stage threshold guaranteeing at least a `pos_rate` fraction of positives
/// survive: the score at the `(1 - pos_rate)` percentile, minus a small
/// margin. `pos_scores` must be non-empty.
pub fn select_threshold(pos_scores: &[f32], pos_rate: f64) -> f32 {
    let mut sorted = pos_scores.to_vec();
    sorted.sort_by(f32::total_cmp);
    let idx = (((1.0 - pos_rate) * sorted.len() as f64) as usize).min(sorted.len() - 1);
    sorted[idx] - THRESHOLD_MARGIN
}

/// Empirical acceptance rates of the in-progress stage, both at the raw
/// zero score and at the selected threshold.
#[derive(Clone, Copy, Debug)]
pub struct StageRates {
    pub true_pos: f64,
    pub false_pos: f64,
    pub true_pos_at_threshold: f64,
    pub false_pos_at_threshold: f64,
}

pub fn stage_rates(pos_scores: &[f32], neg_scores: &[f32], threshold: f32) -> StageRates {
    let frac = |scores: &[f32], cut: f32| {
        if scores.is_empty() {
            0.0
        } else {
            scores.iter().filter(|&&s| s >= cut).count() as f64 / scores.len() as f64
        }
    };
    StageRates {
        true_pos: frac(pos_scores, 0.0),
        false_pos: frac(neg_scores, 0.0),
        true_pos_at_threshold: frac(pos_scores, threshold),
        false_pos_at_threshold: frac(neg_scores, threshold),
    }
}

/// One boosting round: multiply the weights of misclassified examples
/// (positives the feature fails, negatives it passes) by `(1 - err) / err`,
/// apply the class-balance factors, and renormalize jointly.
///
/// The boost update runs before the balance factor on each weight; this
/// ordering is part of the trained-model contract and is covered by tests.
/// Returns the feature's boosting coefficient `ln((1 - err) / err)`.
pub fn reweight(
    feature: &Feature,
    pos: &[WindowSample],
    neg: &[WindowSample],
    pw: &mut [f64],
    nw: &mut [f64],
    err: f64,
    balance: BalanceFactors,
) -> f64 {
    let err = err.clamp(ERR_CLAMP, 1.0 - ERR_CLAMP);
    let rw = (1.0 - err) / err;

    let mut total = 0.0f64;
    for (sample, w) in pos.iter().zip(pw.iter_mut()) {
        if !feature.run(&sample.planes(), sample.strides()) {
            *w *= rw;
        }
        *w *= balance.positive;
        total += *w;
    }
    for (sample, w) in neg.iter().zip(nw.iter_mut()) {
        if feature.run(&sample.planes(), sample.strides()) {
            *w *= rw;
        }
        *w *= balance.negative;
        total += *w;
    }
    for w in pw.iter_mut() {
        *w /= total;
    }
    for w in nw.iter_mut() {
        *w /= total;
    }

    rw.ln()
}

/// Keep only the positives accepted by every finished stage, in one forward
/// pass. Order is preserved so the surviving examples stay aligned with the
/// leading entries of the weight vector.
pub fn prune_positives(cascade: &Cascade, pool: Vec<WindowSample>) -> Vec<WindowSample> {
    pool.into_iter()
        .filter(|s| cascade.accepts(&s.planes(), s.strides()).is_some())
        .collect()
}
