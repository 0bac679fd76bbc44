//! Training entry point: reads a JSON config, loads positive crops and
//! background paths, and drives the checkpointed cascade builder. Re-running
//! with the same config resumes an interrupted build from its model
//! directory.

use anyhow::{Context, Result};
use bbf::{CascadeBuilder, TrainParams, WindowSize};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct TrainConfig {
    /// Directory of object crops; each image is resampled to the window size.
    positives_dir: PathBuf,
    /// Directory of object-free images mined for hard negatives.
    backgrounds_dir: PathBuf,
    /// Model directory; also holds the checkpoint and negative cache.
    model_dir: PathBuf,
    width: u32,
    height: u32,
    /// Hard negatives to harvest per stage.
    negatives: usize,
    stages: Option<usize>,
    pos_rate: Option<f64>,
    neg_rate: Option<f64>,
    balance: Option<f64>,
    log_level: Option<String>,
}

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .context("usage: bbf-train <config.json>")?;
    let cfg = load_config(Path::new(&config_path))?;
    init_logging(cfg.log_level.as_deref());

    let positives = load_positives(&cfg.positives_dir)?;
    anyhow::ensure!(
        !positives.is_empty(),
        "no positive crops found in {}",
        cfg.positives_dir.display()
    );
    let backgrounds = image_paths(&cfg.backgrounds_dir)?;
    anyhow::ensure!(
        !backgrounds.is_empty(),
        "no background images found in {}",
        cfg.backgrounds_dir.display()
    );

    let mut params = TrainParams::default();
    if let Some(v) = cfg.stages {
        anyhow::ensure!(v >= 1, "stages must be >= 1");
        params = params.with_stages(v);
    }
    if let Some(v) = cfg.pos_rate {
        params = params.with_pos_rate(v);
    }
    if let Some(v) = cfg.neg_rate {
        params = params.with_neg_rate(v);
    }
    if let Some(v) = cfg.balance {
        anyhow::ensure!(v > 0.0, "balance must be > 0");
        params = params.with_balance(v);
    }

    println!(
        "training {}x{} cascade: {} positives, {} backgrounds, {} negatives per stage",
        cfg.width,
        cfg.height,
        positives.len(),
        backgrounds.len(),
        cfg.negatives
    );

    let builder = CascadeBuilder::new(
        WindowSize::new(cfg.width, cfg.height),
        &cfg.model_dir,
        params,
    );
    let cascade = builder
        .train(&positives, &backgrounds, cfg.negatives)
        .with_context(|| format!("training into {}", cfg.model_dir.display()))?;

    println!(
        "trained {} stages into {}",
        cascade.stages.len(),
        cfg.model_dir.display()
    );
    Ok(())
}

fn load_config(path: &Path) -> Result<TrainConfig> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("opening config {}", path.display()))?;
    serde_json::from_reader(file).with_context(|| format!("parsing config {}", path.display()))
}

fn init_logging(level: Option<&str>) {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_new(level.unwrap_or("info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn image_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))? {
        let path = entry?.path();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        if ext.as_deref().is_some_and(|e| IMAGE_EXTENSIONS.contains(&e)) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

fn load_positives(dir: &Path) -> Result<Vec<image::GrayImage>> {
    let mut crops = Vec::new();
    for path in image_paths(dir)? {
        let img = image::ImageReader::open(&path)
            .with_context(|| format!("opening {}", path.display()))?
            .decode()
            .with_context(|| format!("decoding {}", path.display()))?
            .to_luma8();
        crops.push(img);
    }
    Ok(crops)
}
