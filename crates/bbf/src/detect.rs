//! Multi-scale sliding-window detection.
//!
//! For every √2 scale step the cascade window slides over the image with a
//! stride of 4/2/1 pixels at the full/half/quarter plane respectively (the
//! three planes of one step live four octave indices apart in the pyramid).
//! Every stage of every cascade is evaluated with early rejection; this loop
//! runs for each pixel position at each scale and is the hottest path of the
//! system.

use crate::pyramid::{build_scale_pyramid, ScalePyramid};
use bbf_core::group::{dedup_across_models, group_detections};
use bbf_core::{Cascade, Detection, Rect, WindowSize};
use image::GrayImage;
#[cfg(feature = "rayon")]
use rayon::prelude::*;
#[cfg(feature = "tracing")]
use tracing::instrument;

/// Parameters shared by every cascade of one detection call.
#[derive(Clone, Copy, Debug)]
pub struct DetectParams {
    /// Minimum raw candidates per group; 0 disables grouping entirely.
    pub min_neighbors: u32,
    /// Re-group the final boxes ignoring model id, keeping only each group's
    /// highest-confidence member.
    pub suppress_overlaps: bool,
    /// Smallest object size to look for; defaults to the cascade window.
    pub min_size: Option<WindowSize>,
}

impl Default for DetectParams {
    fn default() -> Self {
        Self {
            min_neighbors: 2,
            suppress_overlaps: false,
            min_size: None,
        }
    }
}

impl DetectParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_neighbors(mut self, min_neighbors: u32) -> Self {
        self.min_neighbors = min_neighbors;
        self
    }

    pub fn with_suppress_overlaps(mut self, on: bool) -> Self {
        self.suppress_overlaps = on;
        self
    }

    pub fn with_min_size(mut self, min_size: WindowSize) -> Self {
        self.min_size = Some(min_size);
        self
    }
}

/// Scan `img` with one or more cascades and report grouped bounding boxes.
///
/// All cascades must share a window size; detections carry the index of the
/// cascade that produced them as their model id. The output order is: per
/// cascade, grouped boxes in class order (or raw scan order when
/// `min_neighbors == 0`).
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(img, cascades, params), fields(models = cascades.len()))
)]
pub fn detect_objects(
    img: &GrayImage,
    cascades: &[&Cascade],
    params: &DetectParams,
) -> Vec<Detection> {
    let Some(first) = cascades.first() else {
        return Vec::new();
    };
    debug_assert!(cascades.iter().all(|c| c.size == first.size));

    let min_size = params.min_size.unwrap_or(first.size);
    let Some(pyramid) = build_scale_pyramid(img, first.size, min_size) else {
        return Vec::new();
    };

    let mut results = Vec::new();
    for (id, cascade) in cascades.iter().enumerate() {
        let raw = scan_all_scales(&pyramid, cascade, id, min_size);
        results.extend(group_detections(&raw, params.min_neighbors));
    }

    if params.suppress_overlaps {
        results = dedup_across_models(&results);
    }
    results
}

/// Run one cascade over every scale step of the pyramid.
///
/// Scales are independent, so with the `rayon` feature each worker scans its
/// own step into a private buffer; the buffers are concatenated in scale
/// order afterwards, keeping the output deterministic.
fn scan_all_scales(
    pyramid: &ScalePyramid,
    cascade: &Cascade,
    id: usize,
    min_size: WindowSize,
) -> Vec<Detection> {
    let sqrt2 = std::f32::consts::SQRT_2;
    let base_x = min_size.width as f32 / cascade.size.width as f32;
    let base_y = min_size.height as f32 / cascade.size.height as f32;

    let scan_one = |step: usize| {
        let scale_x = base_x * sqrt2.powi(step as i32);
        let scale_y = base_y * sqrt2.powi(step as i32);
        scan_scale(
            &pyramid.images[step],
            &pyramid.images[step + 2],
            &pyramid.images[step + 4],
            cascade,
            id,
            scale_x,
            scale_y,
        )
    };

    #[cfg(feature = "rayon")]
    let per_scale: Vec<Vec<Detection>> = (0..pyramid.scale_steps).into_par_iter().map(scan_one).collect();

    #[cfg(not(feature = "rayon"))]
    let per_scale: Vec<Vec<Detection>> = (0..pyramid.scale_steps).map(scan_one).collect();

    per_scale.into_iter().flatten().collect()
}

/// Slide the window over one scale step.
fn scan_scale(
    full: &GrayImage,
    half: &GrayImage,
    quarter: &GrayImage,
    cascade: &Cascade,
    id: usize,
    scale_x: f32,
    scale_y: f32,
) -> Vec<Detection> {
    let win_w = cascade.size.width as i64;
    let win_h = cascade.size.height as i64;
    let cols = quarter.width() as i64 - (win_w >> 1);
    let rows = quarter.height() as i64 - (win_h >> 1);
    if cols <= 0 || rows <= 0 {
        return Vec::new();
    }

    let steps = [
        full.width() as usize,
        half.width() as usize,
        quarter.width() as usize,
    ];
    let raw0 = full.as_raw().as_slice();
    let raw1 = half.as_raw().as_slice();
    let raw2 = quarter.as_raw().as_slice();

    let mut out = Vec::new();
    for y in 0..rows as usize {
        for x in 0..cols as usize {
            let planes = [
                &raw0[4 * y * steps[0] + 4 * x..],
                &raw1[2 * y * steps[1] + 2 * x..],
                &raw2[y * steps[2] + x..],
            ];
            if let Some(confidence) = cascade.accepts(&planes, &steps) {
                out.push(Detection {
                    rect: Rect::new(
                        (x as f32 * 4.0 * scale_x) as i32,
                        (y as f32 * 4.0 * scale_y) as i32,
                        (cascade.size.width as f32 * scale_x) as i32,
                        (cascade.size.height as f32 * scale_y) as i32,
                    ),
                    id,
                    neighbors: 1,
                    confidence,
                });
            }
        }
    }
    out
}
