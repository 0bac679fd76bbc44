//! Boosted pixel-ordering cascades over `image::GrayImage`.
//!
//! This crate wraps the [`bbf_core`] engine with everything that touches
//! images and the filesystem:
//!
//! - [`detect`] – the multi-scale sliding-window detector and its parameters.
//! - [`pyramid`] – the √2-stepped image pyramid the detector scans.
//! - [`train`] – the stage-by-stage cascade builder with checkpoint/resume.
//! - [`mine`] – hard-negative harvesting from background images.
//! - [`model`] / [`blob`] – the textual model directory and the flat binary
//!   cascade encoding.
//!
//! A typical round trip:
//!
//! ```no_run
//! use bbf::{detect_objects, load_cascade, DetectParams};
//! use image::GrayImage;
//!
//! let cascade = load_cascade("models/frontal".as_ref())?;
//! let frame = GrayImage::new(640, 480);
//! let hits = detect_objects(&frame, &[&cascade], &DetectParams::default());
//! for d in &hits {
//!     println!("{:?} neighbors={} conf={}", d.rect, d.neighbors, d.confidence);
//! }
//! # Ok::<(), std::io::Error>(())
//! ```

pub mod blob;
pub mod detect;
pub mod mine;
pub mod model;
pub mod pyramid;
pub mod train;

mod samples;
mod tokens;

pub use bbf_core::{
    Cascade, Detection, Feature, FeaturePoint, Rect, StageClassifier, WindowSample, WindowSize,
};
pub use blob::{read_cascade_blob, write_cascade_blob};
pub use detect::{detect_objects, DetectParams};
pub use model::{load_cascade, save_cascade};
pub use train::{CascadeBuilder, TrainParams};
