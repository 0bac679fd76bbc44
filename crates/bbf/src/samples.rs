//! Conversion of grayscale images and crops into packed window samples.

use bbf_core::sample::WindowSample;
use bbf_core::{Rect, WindowSize};
use image::imageops::{crop_imm, resize, FilterType};
use image::GrayImage;

/// Build the three-level sample of a whole image, resampling it to the
/// window size first when the dimensions differ.
pub(crate) fn sample_from_image(img: &GrayImage, window: WindowSize) -> WindowSample {
    if img.width() == window.width && img.height() == window.height {
        WindowSample::from_full_res(img.as_raw(), img.width() as usize, window)
    } else {
        let scaled = resize(img, window.width, window.height, FilterType::Triangle);
        WindowSample::from_full_res(scaled.as_raw(), window.width as usize, window)
    }
}

/// Crop `rect` out of `img`, resample it to the window size, and build its
/// three-level sample. The rectangle must lie inside the image.
pub(crate) fn sample_from_crop(img: &GrayImage, rect: Rect, window: WindowSize) -> WindowSample {
    let crop = crop_imm(
        img,
        rect.x as u32,
        rect.y as u32,
        rect.width as u32,
        rect.height as u32,
    )
    .to_image();
    let scaled = resize(&crop, window.width, window.height, FilterType::Triangle);
    WindowSample::from_full_res(scaled.as_raw(), window.width as usize, window)
}
