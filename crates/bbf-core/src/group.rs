//! Equivalence grouping and nested-box suppression of raw detections.
//!
//! The multi-scale scan reports one candidate per surviving window, so a real
//! object shows up as a cloud of similar rectangles. Grouping partitions the
//! cloud into equivalence classes (union-find over a pairwise similarity
//! predicate), averages each class into one box, and then drops boxes nested
//! inside stronger ones.

/// Axis-aligned rectangle in input-image pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }
}

/// One raw or grouped detection.
#[derive(Clone, Copy, Debug)]
pub struct Detection {
    pub rect: Rect,
    /// Index of the cascade that produced this detection.
    pub id: usize,
    /// Number of raw candidates merged into this box (1 for raw output).
    pub neighbors: u32,
    /// Score of the final cascade stage.
    pub confidence: f32,
}

/// `floor(1.5 * w + 0.5)` without leaving integer arithmetic.
#[inline]
fn width_cap(w: i32) -> i32 {
    (3 * w + 1) / 2
}

/// Two rectangles are similar when their centers lie within half the larger
/// width/height of each other and their widths are within a 1.5x ratio.
fn similar(a: &Rect, b: &Rect) -> bool {
    // compare doubled center coordinates to stay in integers
    let dx = (2 * a.x + a.width) - (2 * b.x + b.width);
    let dy = (2 * a.y + a.height) - (2 * b.y + b.height);
    dx.abs() <= a.width.max(b.width)
        && dy.abs() <= a.height.max(b.height)
        && a.width <= width_cap(b.width)
        && b.width <= width_cap(a.width)
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent[ra] = rb;
        }
    }
}

/// Partition detections into equivalence classes under [`similar`] (and equal
/// model id unless `ignore_id`). Returns per-detection class labels and the
/// class count; labels are dense and ordered by first occurrence.
fn partition(dets: &[Detection], ignore_id: bool) -> (Vec<usize>, usize) {
    let mut uf = UnionFind::new(dets.len());
    for i in 0..dets.len() {
        for j in i + 1..dets.len() {
            if (ignore_id || dets[i].id == dets[j].id) && similar(&dets[i].rect, &dets[j].rect) {
                uf.union(i, j);
            }
        }
    }
    let mut labels = vec![0usize; dets.len()];
    let mut roots: Vec<usize> = Vec::new();
    for i in 0..dets.len() {
        let r = uf.find(i);
        labels[i] = match roots.iter().position(|&x| x == r) {
            Some(l) => l,
            None => {
                roots.push(r);
                roots.len() - 1
            }
        };
    }
    (labels, roots.len())
}

#[derive(Clone, Copy, Default)]
struct ClassAcc {
    sx: i64,
    sy: i64,
    sw: i64,
    sh: i64,
    n: u32,
    id: usize,
    confidence: f32,
}

/// Average with round-half-up: `(2 * sum + n) / (2 * n)`.
#[inline]
fn avg_round(sum: i64, n: u32) -> i32 {
    ((2 * sum + n as i64) / (2 * n as i64)) as i32
}

/// Group one model's raw candidates.
///
/// With `min_neighbors == 0` the raw candidates pass through untouched.
/// Otherwise classes are averaged into single boxes (keeping the class's
/// best confidence), classes with fewer than `min_neighbors` members are
/// discarded, and boxes nested inside a stronger same-model box are dropped.
pub fn group_detections(raw: &[Detection], min_neighbors: u32) -> Vec<Detection> {
    if min_neighbors == 0 {
        return raw.to_vec();
    }

    let (labels, nclasses) = partition(raw, false);
    let mut acc = vec![ClassAcc::default(); nclasses];
    for (det, &label) in raw.iter().zip(&labels) {
        let a = &mut acc[label];
        if a.n == 0 {
            a.confidence = det.confidence;
        }
        a.n += 1;
        a.sx += det.rect.x as i64;
        a.sy += det.rect.y as i64;
        a.sw += det.rect.width as i64;
        a.sh += det.rect.height as i64;
        a.id = det.id;
        a.confidence = a.confidence.max(det.confidence);
    }

    let grouped: Vec<Detection> = acc
        .iter()
        .filter(|a| a.n >= min_neighbors)
        .map(|a| Detection {
            rect: Rect::new(
                avg_round(a.sx, a.n),
                avg_round(a.sy, a.n),
                avg_round(a.sw, a.n),
                avg_round(a.sh, a.n),
            ),
            id: a.id,
            neighbors: a.n,
            confidence: a.confidence,
        })
        .collect();

    // nested-box suppression: a weakly supported box fully contained (within
    // a half-width tolerance) in a better-supported same-model box goes away
    grouped
        .iter()
        .enumerate()
        .filter(|(i, r1)| {
            !grouped.iter().enumerate().any(|(j, r2)| {
                if *i == j || r1.id != r2.id {
                    return false;
                }
                let d = (r2.rect.width + 1) / 2;
                r1.rect.x >= r2.rect.x - d
                    && r1.rect.y >= r2.rect.y - d
                    && r1.rect.x + r1.rect.width <= r2.rect.x + r2.rect.width + d
                    && r1.rect.y + r1.rect.height <= r2.rect.y + r2.rect.height + d
                    && (r2.neighbors > 3.max(r1.neighbors) || r1.neighbors < 3)
            })
        })
        .map(|(_, d)| *d)
        .collect()
}

/// Cross-model dedup: regroup ignoring model id and keep only each class's
/// highest-confidence member.
pub fn dedup_across_models(dets: &[Detection]) -> Vec<Detection> {
    let (labels, nclasses) = partition(dets, true);
    let mut best: Vec<Option<Detection>> = vec![None; nclasses];
    for (det, &label) in dets.iter().zip(&labels) {
        let slot = &mut best[label];
        let replace = match slot {
            None => true,
            Some(cur) => cur.confidence < det.confidence,
        };
        if replace {
            *slot = Some(Detection {
                neighbors: 1,
                ..*det
            });
        }
    }
    best.into_iter().flatten().collect()
}
