//! Stage-by-stage cascade training with checkpoint/resume.
//!
//! A training run owns one model directory. Besides the growing model files
//! (`cascade.txt`, `stage-{i}.txt`) it keeps two pieces of durable state:
//!
//! - `state.txt` – the checkpoint record: current stage index, in-stage
//!   feature index, a negatives-ready flag, and both weight vectors as
//!   `f64::to_bits` words. Written before every stage and after every
//!   appended feature, flushed before training proceeds.
//! - `negatives.bin` – the harvested negative pool: a native-endian count
//!   followed by the packed three-level sample buffers, so a resumed run
//!   does not repeat hours of mining.
//!
//! On startup an existing checkpoint is reloaded bit-exactly and the run
//! continues at the recorded (stage, feature) position; a crash loses at
//! most the work since the last persisted step. Corrupt checkpoint pieces
//! degrade (state restarts the run, an unreadable cache re-mines, unreadable
//! finished stages truncate) instead of aborting.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use bbf_core::boost::{self, BalanceFactors};
use bbf_core::sample::WindowSample;
use bbf_core::search::search_feature;
use bbf_core::{Cascade, FeaturePoint, StageClassifier, WindowSize};
use image::GrayImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
#[cfg(feature = "tracing")]
use tracing::{info, instrument, warn};

use crate::mine::mine_negatives;
use crate::model::{read_stage_file, save_cascade, save_cascade_index, stage_path, write_stage_file};
use crate::samples::sample_from_image;
use crate::tokens::{invalid, Tokens};

const STATE_FILE: &str = "state.txt";
const NEGATIVES_FILE: &str = "negatives.bin";
const MINING_SEED: u64 = 0x9e37_79b9_7f4a_7c15;

/// Training criteria for one cascade build.
#[derive(Clone, Copy, Debug)]
pub struct TrainParams {
    /// Number of stages to train.
    pub stages: usize,
    /// Minimum fraction of positives each stage must retain.
    pub pos_rate: f64,
    /// Maximum fraction of negatives each stage may pass.
    pub neg_rate: f64,
    /// Class-balance ratio; > 1 favors positives during reweighting.
    pub balance: f64,
}

impl Default for TrainParams {
    fn default() -> Self {
        Self {
            stages: 24,
            pos_rate: 0.9975,
            neg_rate: 0.50,
            balance: 1.0,
        }
    }
}

impl TrainParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stages(mut self, stages: usize) -> Self {
        self.stages = stages;
        self
    }

    pub fn with_pos_rate(mut self, pos_rate: f64) -> Self {
        self.pos_rate = pos_rate;
        self
    }

    pub fn with_neg_rate(mut self, neg_rate: f64) -> Self {
        self.neg_rate = neg_rate;
        self
    }

    pub fn with_balance(mut self, balance: f64) -> Self {
        self.balance = balance;
        self
    }
}

/// Checkpoint record of an in-progress build.
struct TrainingState {
    stage: usize,
    feature: usize,
    negatives_ready: bool,
    pos_weights: Vec<f64>,
    neg_weights: Vec<f64>,
}

/// Builds one cascade, stage by stage, persisting its progress into the
/// model directory as it goes.
pub struct CascadeBuilder {
    size: WindowSize,
    dir: PathBuf,
    params: TrainParams,
}

impl CascadeBuilder {
    pub fn new(size: WindowSize, dir: impl Into<PathBuf>, params: TrainParams) -> Self {
        Self {
            size,
            dir: dir.into(),
            params,
        }
    }

    /// Train (or resume training) the cascade.
    ///
    /// `positives` are object crops, resampled to the window size when
    /// needed; `backgrounds` are paths to object-free images mined for up to
    /// `negative_count` hard negatives per stage.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(positives = positives.len(), negative_count))
    )]
    pub fn train(
        &self,
        positives: &[GrayImage],
        backgrounds: &[PathBuf],
        negative_count: usize,
    ) -> io::Result<Cascade> {
        if positives.is_empty() {
            return Err(invalid("training requires at least one positive example"));
        }
        fs::create_dir_all(&self.dir)?;

        let balance = BalanceFactors::from_ratio(self.params.balance);
        let npos = positives.len();
        let mut pw = vec![balance.positive; npos];
        let mut nw = vec![balance.negative; negative_count];
        let mut stage_start = 0usize;
        let mut feat_idx = 0usize;
        let mut negatives_ready = false;
        let mut cascade = Cascade::new(self.size);

        let state_file = self.dir.join(STATE_FILE);
        if state_file.exists() {
            match load_state(&state_file, npos, negative_count) {
                Ok(state) => {
                    stage_start = state.stage;
                    feat_idx = state.feature;
                    negatives_ready = state.negatives_ready;
                    pw = state.pos_weights;
                    nw = state.neg_weights;
                    for i in 0..stage_start {
                        match read_stage_file(&stage_path(&self.dir, i)) {
                            Ok(stage) => cascade.stages.push(stage),
                            Err(_e) => {
                                // restart from the last stage that still loads
                                #[cfg(feature = "tracing")]
                                warn!(stage = i, error = %_e, "finished stage unreadable, restarting from it");
                                stage_start = i;
                                feat_idx = 0;
                                negatives_ready = false;
                                break;
                            }
                        }
                    }
                    #[cfg(feature = "tracing")]
                    info!(stage = stage_start, feature = feat_idx, "resuming from checkpoint");
                }
                Err(_e) => {
                    #[cfg(feature = "tracing")]
                    warn!(error = %_e, "checkpoint unreadable, starting over");
                }
            }
        }

        let mut negatives: Vec<WindowSample> = Vec::new();
        if negatives_ready {
            match read_negative_cache(&self.dir.join(NEGATIVES_FILE), self.size) {
                Ok(cached) => negatives = cached,
                Err(_e) => {
                    #[cfg(feature = "tracing")]
                    warn!(error = %_e, "negative cache unreadable, re-mining");
                    negatives_ready = false;
                }
            }
        }

        for stage_index in stage_start..self.params.stages {
            if !negatives_ready {
                negatives = mine_negatives(
                    &cascade,
                    backgrounds,
                    negative_count,
                    MINING_SEED ^ stage_index as u64,
                );
                write_negative_cache(&self.dir.join(NEGATIVES_FILE), &negatives)?;
                negatives_ready = true;
            }
            save_state(&state_file, stage_index, feat_idx, true, &pw, &nw)?;

            let mut stage = if feat_idx > 0 {
                match read_stage_file(&stage_path(&self.dir, stage_index)) {
                    Ok(stage) => stage,
                    Err(_e) => {
                        // the partial stage is gone; boost it from scratch
                        #[cfg(feature = "tracing")]
                        warn!(stage = stage_index, error = %_e, "partial stage unreadable, restarting stage");
                        feat_idx = 0;
                        boost::init_weights(&mut pw, &mut nw, balance);
                        StageClassifier::new()
                    }
                }
            } else {
                boost::init_weights(&mut pw, &mut nw, balance);
                StageClassifier::new()
            };

            let pos_pool = boost::prune_positives(
                &cascade,
                positives
                    .iter()
                    .map(|img| sample_from_image(img, self.size))
                    .collect(),
            );
            let rpos = pos_pool.len();
            let rneg = negatives.len();
            if rpos == 0 {
                #[cfg(feature = "tracing")]
                warn!(stage = stage_index, "no positives survive the cascade, stopping early");
                break;
            }
            #[cfg(feature = "tracing")]
            info!(stage = stage_index, positives = rpos, negatives = rneg, "training stage");
            boost::normalize_joint(&mut pw[..rpos], &mut nw[..rneg]);

            let mut k = feat_idx;
            loop {
                let pos_scores = boost::score_pool(&stage, &pos_pool);
                let neg_scores = boost::score_pool(&stage, &negatives);
                stage.threshold = boost::select_threshold(&pos_scores, self.params.pos_rate);
                let rates = boost::stage_rates(&pos_scores, &neg_scores, stage.threshold);
                #[cfg(feature = "tracing")]
                info!(
                    stage = stage_index,
                    features = k,
                    tp = rates.true_pos_at_threshold,
                    fp = rates.false_pos_at_threshold,
                    threshold = stage.threshold,
                    "stage rates"
                );

                if k > 0 {
                    write_stage_file(&stage_path(&self.dir, stage_index), &stage)?;
                    save_state(&state_file, stage_index, k, true, &pw, &nw)?;
                }
                if rates.true_pos_at_threshold > self.params.pos_rate
                    && rates.false_pos_at_threshold < self.params.neg_rate
                {
                    break;
                }

                let start = random_start(&pw, &nw, self.size);
                let (best, err) =
                    search_feature(&pos_pool, &negatives, &pw[..rpos], &nw[..rneg], self.size, start);
                let alpha = boost::reweight(
                    &best,
                    &pos_pool,
                    &negatives,
                    &mut pw[..rpos],
                    &mut nw[..rneg],
                    err,
                    balance,
                );
                stage.push(best, alpha as f32);
                k += 1;
                #[cfg(feature = "tracing")]
                info!(stage = stage_index, feature = k, error = err, alpha, "feature appended");
            }

            write_stage_file(&stage_path(&self.dir, stage_index), &stage)?;
            cascade.stages.push(stage);
            save_cascade_index(&self.dir, &cascade)?;
            feat_idx = 0;
            negatives_ready = false;
            save_state(&state_file, stage_index + 1, 0, false, &pw, &nw)?;
        }

        save_cascade(&self.dir, &cascade)?;
        Ok(cascade)
    }
}

/// Deterministic search seed: the bit pattern of the leading weights, so a
/// resumed run reproduces the interrupted search.
fn random_start(pw: &[f64], nw: &[f64], size: WindowSize) -> FeaturePoint {
    let seed = (pw.first().copied().unwrap_or(0.5) + nw.first().copied().unwrap_or(0.5)).to_bits();
    let mut rng = StdRng::seed_from_u64(seed);
    let level = rng.gen_range(0..3u8);
    let x = rng.gen_range(0..size.cols(level as usize).max(1)) as u8;
    let y = rng.gen_range(0..size.rows(level as usize).max(1)) as u8;
    FeaturePoint::new(x, y, level)
}

fn save_state(
    path: &Path,
    stage: usize,
    feature: usize,
    negatives_ready: bool,
    pw: &[f64],
    nw: &[f64],
) -> io::Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    writeln!(w, "{} {} {}", stage, feature, negatives_ready as u8)?;
    for v in pw {
        write!(w, "{} ", v.to_bits())?;
    }
    writeln!(w)?;
    for v in nw {
        write!(w, "{} ", v.to_bits())?;
    }
    writeln!(w)?;
    w.flush()
}

fn load_state(path: &Path, npos: usize, nneg: usize) -> io::Result<TrainingState> {
    let text = fs::read_to_string(path)?;
    let mut t = Tokens::new(&text);
    let stage = t.next_usize()?;
    let feature = t.next_usize()?;
    let negatives_ready = t.next_u32()? != 0;
    let mut pos_weights = Vec::with_capacity(npos);
    for _ in 0..npos {
        pos_weights.push(f64::from_bits(t.next_u64()?));
    }
    let mut neg_weights = Vec::with_capacity(nneg);
    for _ in 0..nneg {
        neg_weights.push(f64::from_bits(t.next_u64()?));
    }
    Ok(TrainingState {
        stage,
        feature,
        negatives_ready,
        pos_weights,
        neg_weights,
    })
}

fn write_negative_cache(path: &Path, negatives: &[WindowSample]) -> io::Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    w.write_all(&(negatives.len() as i32).to_ne_bytes())?;
    for sample in negatives {
        w.write_all(sample.as_bytes())?;
    }
    w.flush()
}

fn read_negative_cache(path: &Path, size: WindowSize) -> io::Result<Vec<WindowSample>> {
    let bytes = fs::read(path)?;
    if bytes.len() < 4 {
        return Err(invalid("negative cache too short"));
    }
    let count = i32::from_ne_bytes(bytes[..4].try_into().expect("4-byte slice"));
    if count < 0 {
        return Err(invalid("negative cache count corrupt"));
    }
    let count = count as usize;
    let chunk = WindowSample::packed_len(size);
    if bytes.len() != 4 + count * chunk {
        return Err(invalid("negative cache length mismatch"));
    }

    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let start = 4 + i * chunk;
        let sample = WindowSample::from_packed(bytes[start..start + chunk].to_vec(), size)
            .ok_or_else(|| invalid("negative cache sample corrupt"))?;
        out.push(sample);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("bbf-train-{}-{tag}", std::process::id()))
    }

    #[test]
    fn state_round_trip_is_bit_exact() {
        let path = temp_path("state");
        let pw = vec![0.123_456_789_f64, 1.0 / 3.0, f64::MIN_POSITIVE];
        let nw = vec![0.987_654_321_f64, 2.0 / 7.0];
        save_state(&path, 1, 3, true, &pw, &nw).unwrap();

        let state = load_state(&path, pw.len(), nw.len()).unwrap();
        assert_eq!(state.stage, 1);
        assert_eq!(state.feature, 3);
        assert!(state.negatives_ready);
        for (a, b) in pw.iter().zip(&state.pos_weights) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
        for (a, b) in nw.iter().zip(&state.neg_weights) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn truncated_state_is_rejected() {
        let path = temp_path("state-short");
        fs::write(&path, "1 3 1\n42 ").unwrap();
        assert!(load_state(&path, 2, 2).is_err());
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn negative_cache_round_trips() {
        let path = temp_path("negs");
        let size = WindowSize::new(8, 8);
        let samples: Vec<WindowSample> = (0..3)
            .map(|i| {
                let full: Vec<u8> = (0..64).map(|p| (p as u8).wrapping_mul(i + 1)).collect();
                WindowSample::from_full_res(&full, 8, size)
            })
            .collect();
        write_negative_cache(&path, &samples).unwrap();

        let loaded = read_negative_cache(&path, size).unwrap();
        assert_eq!(loaded.len(), 3);
        for (a, b) in samples.iter().zip(&loaded) {
            assert_eq!(a.as_bytes(), b.as_bytes());
        }

        // a short file is a hard error so the caller can fall back to mining
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 1]).unwrap();
        assert!(read_negative_cache(&path, size).is_err());
        fs::remove_file(&path).unwrap();
    }
}
