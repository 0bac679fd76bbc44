//! Pixel-ordering weak features and their evaluation.

/// Capacity of each polarity's point array.
pub const POINT_MAX: usize = 8;

/// One sample point of a feature, in detection-window coordinates at the
/// given pyramid level (0 = full resolution, 1 = half, 2 = quarter).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct FeaturePoint {
    pub x: u8,
    pub y: u8,
    pub level: u8,
}

impl FeaturePoint {
    pub fn new(x: u8, y: u8, level: u8) -> Self {
        Self { x, y, level }
    }
}

/// A weak classifier: up to [`POINT_MAX`] "positive" and "negative" sample
/// points. The feature passes on a window iff every positive sample is
/// strictly brighter than every negative sample.
///
/// Features are plain values; the search copies and edits them freely and
/// compares them by point-set identity, ignoring order.
#[derive(Clone, Copy, Debug)]
pub struct Feature {
    pos: [FeaturePoint; POINT_MAX],
    neg: [FeaturePoint; POINT_MAX],
    pk: u8,
    nk: u8,
}

const UNSET: FeaturePoint = FeaturePoint { x: 0, y: 0, level: 0 };

impl Feature {
    /// The smallest feature: one positive and one negative point.
    pub fn pair(pos: FeaturePoint, neg: FeaturePoint) -> Self {
        let mut f = Self {
            pos: [UNSET; POINT_MAX],
            neg: [UNSET; POINT_MAX],
            pk: 1,
            nk: 1,
        };
        f.pos[0] = pos;
        f.neg[0] = neg;
        f
    }

    /// Build a feature from explicit point sets. Returns `None` when either
    /// polarity is empty or over capacity, or a polarity contains duplicates.
    pub fn from_points(pos: &[FeaturePoint], neg: &[FeaturePoint]) -> Option<Self> {
        if pos.is_empty() || neg.is_empty() || pos.len() > POINT_MAX || neg.len() > POINT_MAX {
            return None;
        }
        for (i, p) in pos.iter().enumerate() {
            if pos[..i].contains(p) {
                return None;
            }
        }
        for (i, n) in neg.iter().enumerate() {
            if neg[..i].contains(n) {
                return None;
            }
        }
        let mut f = Self {
            pos: [UNSET; POINT_MAX],
            neg: [UNSET; POINT_MAX],
            pk: pos.len() as u8,
            nk: neg.len() as u8,
        };
        f.pos[..pos.len()].copy_from_slice(pos);
        f.neg[..neg.len()].copy_from_slice(neg);
        Some(f)
    }

    #[inline]
    pub fn positives(&self) -> &[FeaturePoint] {
        &self.pos[..self.pk as usize]
    }

    #[inline]
    pub fn negatives(&self) -> &[FeaturePoint] {
        &self.neg[..self.nk as usize]
    }

    /// Parallel iteration bound: the larger polarity count.
    #[inline]
    pub fn size(&self) -> usize {
        self.pk.max(self.nk) as usize
    }

    /// Whether `p` occurs in either polarity.
    pub fn contains(&self, p: FeaturePoint) -> bool {
        self.positives().contains(&p) || self.negatives().contains(&p)
    }

    /// Copy with `p` appended to the positive set; `None` at capacity.
    pub fn with_positive(&self, p: FeaturePoint) -> Option<Self> {
        if self.pk as usize == POINT_MAX {
            return None;
        }
        let mut f = *self;
        f.pos[f.pk as usize] = p;
        f.pk += 1;
        Some(f)
    }

    /// Copy with `p` appended to the negative set; `None` at capacity.
    pub fn with_negative(&self, p: FeaturePoint) -> Option<Self> {
        if self.nk as usize == POINT_MAX {
            return None;
        }
        let mut f = *self;
        f.neg[f.nk as usize] = p;
        f.nk += 1;
        Some(f)
    }

    /// Copy with positive point `idx` relocated to `p`.
    pub fn with_positive_moved(&self, idx: usize, p: FeaturePoint) -> Self {
        let mut f = *self;
        f.pos[idx] = p;
        f
    }

    /// Copy with negative point `idx` relocated to `p`.
    pub fn with_negative_moved(&self, idx: usize, p: FeaturePoint) -> Self {
        let mut f = *self;
        f.neg[idx] = p;
        f
    }

    /// Copy with positive point `idx` removed; `None` when it is the last one.
    pub fn without_positive(&self, idx: usize) -> Option<Self> {
        if self.pk <= 1 {
            return None;
        }
        let mut f = *self;
        f.pos.copy_within(idx + 1..self.pk as usize, idx);
        f.pk -= 1;
        Some(f)
    }

    /// Copy with negative point `idx` removed; `None` when it is the last one.
    pub fn without_negative(&self, idx: usize) -> Option<Self> {
        if self.nk <= 1 {
            return None;
        }
        let mut f = *self;
        f.neg.copy_within(idx + 1..self.nk as usize, idx);
        f.nk -= 1;
        Some(f)
    }

    /// Point-set identity, ignoring the order within each polarity.
    pub fn equivalent(&self, other: &Self) -> bool {
        if self.pk != other.pk || self.nk != other.nk {
            return false;
        }
        self.positives().iter().all(|p| other.positives().contains(p))
            && self.negatives().iter().all(|n| other.negatives().contains(n))
    }

    /// Evaluate the feature on one window.
    ///
    /// `planes[level]` starts at the window's top-left pixel at that pyramid
    /// level, `steps[level]` is the row stride of the underlying buffer. A
    /// running min-of-positives / max-of-negatives is maintained so the scan
    /// bails out the moment the ordering is violated; most windows are
    /// rejected after the first pair.
    #[inline]
    pub fn run(&self, planes: &[&[u8]; 3], steps: &[usize; 3]) -> bool {
        #[inline(always)]
        fn at(planes: &[&[u8]; 3], steps: &[usize; 3], p: FeaturePoint) -> u8 {
            let z = p.level as usize;
            planes[z][p.y as usize * steps[z] + p.x as usize]
        }

        let mut pmin = at(planes, steps, self.pos[0]);
        let mut nmax = at(planes, steps, self.neg[0]);
        if pmin <= nmax {
            return false;
        }
        for i in 1..self.size() {
            if i < self.pk as usize {
                let p = at(planes, steps, self.pos[i]);
                if p < pmin {
                    if p <= nmax {
                        return false;
                    }
                    pmin = p;
                }
            }
            if i < self.nk as usize {
                let n = at(planes, steps, self.neg[i]);
                if n > nmax {
                    if pmin <= n {
                        return false;
                    }
                    nmax = n;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::WindowSample;
    use crate::WindowSize;

    /// Reference rule: min over positives strictly exceeds max over negatives.
    fn run_naive(f: &Feature, planes: &[&[u8]; 3], steps: &[usize; 3]) -> bool {
        let at = |p: &FeaturePoint| {
            let z = p.level as usize;
            planes[z][p.y as usize * steps[z] + p.x as usize]
        };
        let pmin = f.positives().iter().map(at).min().unwrap();
        let nmax = f.negatives().iter().map(at).max().unwrap();
        pmin > nmax
    }

    fn gradient_sample(size: WindowSize) -> WindowSample {
        let w = size.width as usize;
        let h = size.height as usize;
        let full: Vec<u8> = (0..w * h).map(|i| (i * 7 % 251) as u8).collect();
        WindowSample::from_full_res(&full, w, size)
    }

    #[test]
    fn short_circuit_agrees_with_naive_scan() {
        let size = WindowSize::new(16, 16);
        let sample = gradient_sample(size);
        let planes = sample.planes();
        let steps = sample.strides();

        let mut state = 0x2545f4914f6cdd1du64;
        let mut next = |bound: u8| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state % bound as u64) as u8
        };

        for _ in 0..500 {
            let pk = 1 + next(4) as usize;
            let nk = 1 + next(4) as usize;
            let mut pos = Vec::new();
            let mut neg = Vec::new();
            while pos.len() < pk {
                let z = next(3);
                let p = FeaturePoint::new(next(16 >> z), next(16 >> z), z);
                if !pos.contains(&p) {
                    pos.push(p);
                }
            }
            while neg.len() < nk {
                let z = next(3);
                let p = FeaturePoint::new(next(16 >> z), next(16 >> z), z);
                if !neg.contains(&p) {
                    neg.push(p);
                }
            }
            let f = Feature::from_points(&pos, &neg).unwrap();
            assert_eq!(f.run(&planes, steps), run_naive(&f, &planes, steps));
        }
    }

    #[test]
    fn evaluation_is_order_independent() {
        let size = WindowSize::new(16, 16);
        let sample = gradient_sample(size);
        let planes = sample.planes();
        let steps = sample.strides();

        let pos = [
            FeaturePoint::new(3, 4, 0),
            FeaturePoint::new(1, 1, 1),
            FeaturePoint::new(2, 3, 2),
        ];
        let neg = [FeaturePoint::new(9, 9, 0), FeaturePoint::new(5, 2, 1)];
        let f = Feature::from_points(&pos, &neg).unwrap();
        let expected = f.run(&planes, steps);

        // every permutation of both polarities must agree
        let pos_perms = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];
        let neg_perms = [[0, 1], [1, 0]];
        for pp in &pos_perms {
            for np in &neg_perms {
                let p: Vec<_> = pp.iter().map(|&i| pos[i]).collect();
                let n: Vec<_> = np.iter().map(|&i| neg[i]).collect();
                let g = Feature::from_points(&p, &n).unwrap();
                assert!(g.equivalent(&f));
                assert_eq!(g.run(&planes, steps), expected);
            }
        }
    }

    #[test]
    fn unequal_polarity_counts_are_supported() {
        let size = WindowSize::new(8, 8);
        let mut full = vec![10u8; 64];
        full[0] = 200; // (0,0) bright
        let sample = WindowSample::from_full_res(&full, 8, size);

        let pos = [FeaturePoint::new(0, 0, 0)];
        let neg = [
            FeaturePoint::new(4, 4, 0),
            FeaturePoint::new(1, 1, 1),
            FeaturePoint::new(1, 1, 2),
        ];
        let f = Feature::from_points(&pos, &neg).unwrap();
        assert_eq!(f.size(), 3);
        assert!(f.run(&sample.planes(), sample.strides()));

        let flipped = Feature::from_points(&neg, &pos).unwrap();
        assert!(!flipped.run(&sample.planes(), sample.strides()));
    }

    #[test]
    fn edits_preserve_point_sets() {
        let a = FeaturePoint::new(1, 2, 0);
        let b = FeaturePoint::new(3, 4, 1);
        let c = FeaturePoint::new(5, 6, 0);
        let f = Feature::pair(a, b);

        let grown = f.with_positive(c).unwrap();
        assert_eq!(grown.positives(), &[a, c]);
        assert!(grown.contains(c));

        let moved = grown.with_positive_moved(0, FeaturePoint::new(7, 7, 2));
        assert!(!moved.contains(a));
        assert_eq!(moved.positives().len(), 2);

        let shrunk = grown.without_positive(0).unwrap();
        assert_eq!(shrunk.positives(), &[c]);
        assert!(shrunk.without_positive(0).is_none());
        assert!(f.without_negative(0).is_none());
    }

    #[test]
    fn from_points_rejects_duplicates_and_empty_polarities() {
        let a = FeaturePoint::new(1, 2, 0);
        let b = FeaturePoint::new(3, 4, 1);
        assert!(Feature::from_points(&[a, a], &[b]).is_none());
        assert!(Feature::from_points(&[a], &[]).is_none());
        assert!(Feature::from_points(&[], &[b]).is_none());
    }
}
