//! The textual model directory format.
//!
//! A cascade is stored as one directory: `cascade.txt` holds the stage count
//! and window size, and each stage lives in its own `stage-{i}.txt`. Records
//! are whitespace-separated integer tokens; thresholds and alphas cross the
//! text boundary as `f32::to_bits` words so a reloaded model scores windows
//! bit-identically.
//!
//! Per stage: the feature count and threshold bits, then for every feature
//! its parallel-iteration size followed by `size` interleaved positive /
//! negative point triples `x y level` (slots past a polarity's count are
//! written as the sentinel `0 0 -1` and skipped on read), then the two alpha
//! bit words.
//!
//! Loading is deliberately forgiving: a missing or unreadable stage file
//! truncates the cascade to the stages read so far, so a partially written
//! or partially trained model remains usable.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use bbf_core::{Cascade, Feature, FeaturePoint, StageClassifier, WindowSize, POINT_MAX};

use crate::tokens::{invalid, Tokens};

const INDEX_FILE: &str = "cascade.txt";

pub(crate) fn stage_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("stage-{index}.txt"))
}

/// Write `cascade.txt` plus one file per stage, creating `dir` if needed.
pub fn save_cascade(dir: &Path, cascade: &Cascade) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    save_cascade_index(dir, cascade)?;
    for (i, stage) in cascade.stages.iter().enumerate() {
        write_stage_file(&stage_path(dir, i), stage)?;
    }
    Ok(())
}

/// Write only the index record; used by the trainer after each finished
/// stage so a partial model is always loadable.
pub(crate) fn save_cascade_index(dir: &Path, cascade: &Cascade) -> io::Result<()> {
    let mut w = BufWriter::new(File::create(dir.join(INDEX_FILE))?);
    writeln!(
        w,
        "{} {} {}",
        cascade.stages.len(),
        cascade.size.width,
        cascade.size.height
    )?;
    w.flush()
}

/// Load a cascade from its model directory.
///
/// A stage file that is missing or fails to parse truncates the result to
/// the stages already read; only an unreadable index is an error.
pub fn load_cascade(dir: &Path) -> io::Result<Cascade> {
    let text = fs::read_to_string(dir.join(INDEX_FILE))?;
    let mut t = Tokens::new(&text);
    let count = t.next_usize()?;
    let width = t.next_u32()?;
    let height = t.next_u32()?;

    let mut cascade = Cascade::new(WindowSize::new(width, height));
    for i in 0..count {
        match read_stage_file(&stage_path(dir, i)) {
            Ok(stage) => cascade.stages.push(stage),
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(stage = i, error = %_e, "stage unreadable, truncating cascade");
                break;
            }
        }
    }
    Ok(cascade)
}

pub(crate) fn write_stage_file(path: &Path, stage: &StageClassifier) -> io::Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    writeln!(w, "{}", stage.features.len())?;
    writeln!(w, "{}", stage.threshold.to_bits())?;
    for (feature, alpha) in stage.features.iter().zip(&stage.alphas) {
        writeln!(w, "{}", feature.size())?;
        for i in 0..feature.size() {
            write_point(&mut w, feature.positives().get(i))?;
            write_point(&mut w, feature.negatives().get(i))?;
        }
        writeln!(w, "{} {}", alpha[0].to_bits(), alpha[1].to_bits())?;
    }
    w.flush()
}

fn write_point(w: &mut impl Write, point: Option<&FeaturePoint>) -> io::Result<()> {
    match point {
        Some(p) => writeln!(w, "{} {} {}", p.x, p.y, p.level),
        None => writeln!(w, "0 0 -1"),
    }
}

pub(crate) fn read_stage_file(path: &Path) -> io::Result<StageClassifier> {
    let text = fs::read_to_string(path)?;
    let mut t = Tokens::new(&text);

    let count = t.next_usize()?;
    let mut stage = StageClassifier::new();
    stage.threshold = f32::from_bits(t.next_u32()?);

    for _ in 0..count {
        let size = t.next_usize()?;
        if size == 0 || size > POINT_MAX {
            return Err(invalid(format!("feature size {size} out of range")));
        }
        let mut pos = Vec::new();
        let mut neg = Vec::new();
        for _ in 0..size {
            if let Some(p) = read_point(&mut t)? {
                pos.push(p);
            }
            if let Some(p) = read_point(&mut t)? {
                neg.push(p);
            }
        }
        let feature = Feature::from_points(&pos, &neg)
            .ok_or_else(|| invalid("malformed feature point sets"))?;
        let alpha = [f32::from_bits(t.next_u32()?), f32::from_bits(t.next_u32()?)];
        stage.features.push(feature);
        stage.alphas.push(alpha);
    }
    Ok(stage)
}

/// Read one `x y level` triple; a negative level marks an unused slot.
fn read_point(t: &mut Tokens) -> io::Result<Option<FeaturePoint>> {
    let x = t.next_i32()?;
    let y = t.next_i32()?;
    let level = t.next_i32()?;
    if level < 0 {
        return Ok(None);
    }
    if !(0..3).contains(&level) || !(0..256).contains(&x) || !(0..256).contains(&y) {
        return Err(invalid(format!("point ({x} {y} {level}) out of range")));
    }
    Ok(Some(FeaturePoint::new(x as u8, y as u8, level as u8)))
}
