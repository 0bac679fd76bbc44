//! Detection-side image pyramid with √2 scale steps.
//!
//! Fine scale stepping is paid for with cheap power-of-two down-sampling:
//! the base image and its √2 resample seed two interleaved octave chains
//! (even and odd indices), each continued by successive half-size reductions.
//! The scan then reads images `(i, i+2, i+4)` as the full/half/quarter planes
//! of one detection step, so consecutive steps differ in scale by √2.

use bbf_core::WindowSize;
use image::imageops::{resize, FilterType};
use image::GrayImage;

/// Pyramid prepared for one detection call.
pub struct ScalePyramid {
    /// `scale_steps + 4` images; `images[i + 2]` is half of `images[i]`.
    pub images: Vec<GrayImage>,
    /// Number of √2 steps the scan will visit.
    pub scale_steps: usize,
}

/// Number of √2 steps between the window-to-min-size baseline and the image
/// extent.
fn scale_step_count(img: &GrayImage, min_size: WindowSize) -> Option<usize> {
    let hr = img.height() / min_size.height;
    let wr = img.width() / min_size.width;
    let reach = hr.min(wr);
    if reach == 0 {
        return None;
    }
    Some((f64::from(reach).ln() / std::f64::consts::SQRT_2.ln()) as usize)
}

/// Build the pyramid for scanning `img` with a `window`-sized cascade down to
/// objects of `min_size`. Returns `None` when the image cannot hold even one
/// minimum-size window.
pub fn build_scale_pyramid(
    img: &GrayImage,
    window: WindowSize,
    min_size: WindowSize,
) -> Option<ScalePyramid> {
    let scale_steps = scale_step_count(img, min_size)?;
    let mut images = Vec::with_capacity(scale_steps + 4);

    // level 0: bring the input to the cascade's own scale so the first scan
    // step looks for objects of exactly min_size
    if min_size != window {
        let w = (u64::from(img.width()) * u64::from(window.width) / u64::from(min_size.width)) as u32;
        let h =
            (u64::from(img.height()) * u64::from(window.height) / u64::from(min_size.height)) as u32;
        images.push(resize(img, w.max(1), h.max(1), FilterType::Triangle));
    } else {
        images.push(img.clone());
    }

    // level 1 starts the odd octave chain one √2 step down
    let w1 = (f64::from(images[0].width()) / std::f64::consts::SQRT_2) as u32;
    let h1 = (f64::from(images[0].height()) / std::f64::consts::SQRT_2) as u32;
    let lvl1 = resize(&images[0], w1.max(1), h1.max(1), FilterType::Triangle);
    images.push(lvl1);

    for i in 2..scale_steps + 4 {
        let halved = downsample_2x(&images[i - 2]);
        images.push(halved);
    }

    Some(ScalePyramid {
        images,
        scale_steps,
    })
}

/// Half-size reduction with a 2x2 box filter. Sample coordinates are clamped
/// so degenerate 1-pixel-wide levels deep in the pyramid stay well-defined.
fn downsample_2x(src: &GrayImage) -> GrayImage {
    let w2 = (src.width() / 2).max(1);
    let h2 = (src.height() / 2).max(1);
    let mut dst = GrayImage::new(w2, h2);
    let sw = src.width() as usize;
    let sh = src.height() as usize;
    let s = src.as_raw();

    for y in 0..h2 as usize {
        for x in 0..w2 as usize {
            let sx = (2 * x).min(sw - 1);
            let sy = (2 * y).min(sh - 1);
            let sx1 = (sx + 1).min(sw - 1);
            let sy1 = (sy + 1).min(sh - 1);
            let sum = s[sy * sw + sx] as u16
                + s[sy * sw + sx1] as u16
                + s[sy1 * sw + sx] as u16
                + s[sy1 * sw + sx1] as u16;
            dst.put_pixel(x as u32, y as u32, image::Luma([(sum / 4) as u8]));
        }
    }

    dst
}
