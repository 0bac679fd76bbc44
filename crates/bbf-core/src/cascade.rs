//! Ordered stage classifiers sharing a detection window.

use crate::stage::StageClassifier;
use crate::WindowSize;

/// A boosted cascade. Stages are evaluated in order and a window is rejected
/// by the first stage whose score falls below its threshold, so the cheap
/// early stages discard the vast majority of windows.
#[derive(Clone, Debug)]
pub struct Cascade {
    pub size: WindowSize,
    pub stages: Vec<StageClassifier>,
}

impl Cascade {
    pub fn new(size: WindowSize) -> Self {
        Self {
            size,
            stages: Vec::new(),
        }
    }

    /// Evaluate all stages with early rejection.
    ///
    /// Returns the last computed stage score when every stage accepts (the
    /// detection confidence), or `None` as soon as one rejects.
    #[inline]
    pub fn accepts(&self, planes: &[&[u8]; 3], steps: &[usize; 3]) -> Option<f32> {
        let mut sum = 0.0f32;
        for stage in &self.stages {
            sum = stage.score(planes, steps);
            if sum < stage.threshold {
                return None;
            }
        }
        Some(sum)
    }
}
