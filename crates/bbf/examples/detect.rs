//! Run a trained cascade over an image, dump the boxes as JSON, and save a
//! PNG with the detections drawn in.
//!
//! Usage: `detect <model-dir> <image> [--min-neighbors N] [--min-size WxH]`

use anyhow::Context;
use bbf::{detect_objects, load_cascade, DetectParams, WindowSize};
use image::{GrayImage, Luma};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Serialize)]
struct BoxOut {
    x: i32,
    y: i32,
    width: i32,
    height: i32,
    neighbors: u32,
    confidence: f32,
}

#[derive(Serialize)]
struct DetectionDump {
    image: String,
    width: u32,
    height: u32,
    model: String,
    min_neighbors: u32,
    boxes: Vec<BoxOut>,
}

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let model_dir: PathBuf = args
        .next()
        .context("usage: detect <model-dir> <image> [--min-neighbors N] [--min-size WxH]")?
        .into();
    let input: PathBuf = args.next().context("missing image path")?.into();

    let mut params = DetectParams::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--min-neighbors" => {
                let v = args.next().context("expected a count after --min-neighbors")?;
                params = params.with_min_neighbors(v.parse().context("bad --min-neighbors")?);
            }
            "--min-size" => {
                let v = args.next().context("expected WxH after --min-size")?;
                let (w, h) = v
                    .split_once('x')
                    .context("expected WxH, e.g. 48x48")?;
                params = params.with_min_size(WindowSize::new(
                    w.parse().context("bad width")?,
                    h.parse().context("bad height")?,
                ));
            }
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }

    let cascade = load_cascade(&model_dir)
        .with_context(|| format!("loading model from {}", model_dir.display()))?;
    anyhow::ensure!(!cascade.stages.is_empty(), "model directory holds no stages");
    let img = image::ImageReader::open(&input)?.decode()?.to_luma8();

    let started = Instant::now();
    let detections = detect_objects(&img, &[&cascade], &params);
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

    println!(
        "{} stages over {}x{} pixels: {} boxes in {elapsed_ms:5.2} ms",
        cascade.stages.len(),
        img.width(),
        img.height(),
        detections.len()
    );

    let dump = DetectionDump {
        image: input.to_string_lossy().into_owned(),
        width: img.width(),
        height: img.height(),
        model: model_dir.to_string_lossy().into_owned(),
        min_neighbors: params.min_neighbors,
        boxes: detections
            .iter()
            .map(|d| BoxOut {
                x: d.rect.x,
                y: d.rect.y,
                width: d.rect.width,
                height: d.rect.height,
                neighbors: d.neighbors,
                confidence: d.confidence,
            })
            .collect(),
    };
    let json_out = input.with_extension("boxes.json");
    let mut json_file = std::fs::File::create(&json_out)?;
    serde_json::to_writer_pretty(&mut json_file, &dump)?;
    json_file.write_all(b"\n")?;
    println!("saved JSON dump to {}", json_out.display());

    let mut vis: GrayImage = img.clone();
    for d in &detections {
        draw_box(&mut vis, d.rect.x, d.rect.y, d.rect.width, d.rect.height);
    }
    let png_out = input.with_extension("boxes.png");
    vis.save(&png_out)?;
    println!("saved visualization to {}", png_out.display());

    Ok(())
}

fn draw_box(vis: &mut GrayImage, x: i32, y: i32, w: i32, h: i32) {
    let mut put = |xx: i32, yy: i32| {
        if xx >= 0 && yy >= 0 && xx < vis.width() as i32 && yy < vis.height() as i32 {
            vis.put_pixel(xx as u32, yy as u32, Luma([255u8]));
        }
    };
    for dx in 0..=w {
        put(x + dx, y);
        put(x + dx, y + h);
    }
    for dy in 0..=h {
        put(x, y + dy);
        put(x + w, y + dy);
    }
}
