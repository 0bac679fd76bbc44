//! Flat binary cascade encoding, for embedding a trained model in another
//! artifact.
//!
//! Layout, all little-endian 32-bit words: `stage_count, width, height`,
//! then per stage `feature_count, threshold_bits`, `feature_count` fixed
//! 196-byte feature records (`size`, then the eight-slot `x`, `y`, `level`
//! arrays of both polarities, unused slots carrying level −1), then
//! `2 * feature_count` alpha bit words.

use std::io;

use bbf_core::{Cascade, Feature, FeaturePoint, StageClassifier, WindowSize, POINT_MAX};

use crate::tokens::invalid;

/// `size` word plus six eight-slot point arrays.
const FEATURE_RECORD_LEN: usize = 4 * (1 + 6 * POINT_MAX);

/// Exact encoded length of `cascade` in bytes.
pub fn cascade_blob_len(cascade: &Cascade) -> usize {
    let mut len = 3 * 4;
    for stage in &cascade.stages {
        len += 2 * 4 + stage.features.len() * (FEATURE_RECORD_LEN + 2 * 4);
    }
    len
}

/// Encode `cascade` into `buf` and return the number of bytes required.
///
/// When `buf` is too small nothing is written; callers can pass an empty
/// buffer first to query the required capacity.
pub fn write_cascade_blob(cascade: &Cascade, buf: &mut [u8]) -> usize {
    let len = cascade_blob_len(cascade);
    if buf.len() < len {
        return len;
    }

    let mut off = 0usize;
    let mut put = |bytes: &[u8], off: &mut usize| {
        buf[*off..*off + bytes.len()].copy_from_slice(bytes);
        *off += bytes.len();
    };

    put(&(cascade.stages.len() as i32).to_le_bytes(), &mut off);
    put(&(cascade.size.width as i32).to_le_bytes(), &mut off);
    put(&(cascade.size.height as i32).to_le_bytes(), &mut off);
    for stage in &cascade.stages {
        put(&(stage.features.len() as i32).to_le_bytes(), &mut off);
        put(&stage.threshold.to_bits().to_le_bytes(), &mut off);
        for feature in &stage.features {
            put(&(feature.size() as i32).to_le_bytes(), &mut off);
            put_points(feature.positives(), &mut put, &mut off);
            put_points(feature.negatives(), &mut put, &mut off);
        }
        for alpha in &stage.alphas {
            put(&alpha[0].to_bits().to_le_bytes(), &mut off);
            put(&alpha[1].to_bits().to_le_bytes(), &mut off);
        }
    }
    debug_assert_eq!(off, len);
    len
}

fn put_points(
    points: &[FeaturePoint],
    put: &mut impl FnMut(&[u8], &mut usize),
    off: &mut usize,
) {
    for i in 0..POINT_MAX {
        let x = points.get(i).map_or(0, |p| p.x as i32);
        put(&x.to_le_bytes(), off);
    }
    for i in 0..POINT_MAX {
        let y = points.get(i).map_or(0, |p| p.y as i32);
        put(&y.to_le_bytes(), off);
    }
    for i in 0..POINT_MAX {
        let level = points.get(i).map_or(-1, |p| p.level as i32);
        put(&level.to_le_bytes(), off);
    }
}

/// Decode a cascade previously produced by [`write_cascade_blob`].
pub fn read_cascade_blob(bytes: &[u8]) -> io::Result<Cascade> {
    let mut off = 0usize;
    let mut take = |off: &mut usize| -> io::Result<i32> {
        let end = *off + 4;
        if end > bytes.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "truncated cascade blob",
            ));
        }
        let v = i32::from_le_bytes(bytes[*off..end].try_into().expect("4-byte slice"));
        *off = end;
        Ok(v)
    };

    let stage_count = take(&mut off)?;
    let width = take(&mut off)?;
    let height = take(&mut off)?;
    if stage_count < 0 || width <= 0 || height <= 0 {
        return Err(invalid("malformed cascade blob header"));
    }

    let mut cascade = Cascade::new(WindowSize::new(width as u32, height as u32));
    for _ in 0..stage_count {
        let feature_count = take(&mut off)?;
        if feature_count < 0 {
            return Err(invalid("negative feature count"));
        }
        let mut stage = StageClassifier::new();
        stage.threshold = f32::from_bits(take(&mut off)? as u32);
        for _ in 0..feature_count {
            let _size = take(&mut off)?;
            let pos = take_points(&mut take, &mut off)?;
            let neg = take_points(&mut take, &mut off)?;
            let feature = Feature::from_points(&pos, &neg)
                .ok_or_else(|| invalid("malformed feature in cascade blob"))?;
            stage.features.push(feature);
        }
        for _ in 0..feature_count {
            let a0 = f32::from_bits(take(&mut off)? as u32);
            let a1 = f32::from_bits(take(&mut off)? as u32);
            stage.alphas.push([a0, a1]);
        }
        cascade.stages.push(stage);
    }
    Ok(cascade)
}

fn take_points(
    take: &mut impl FnMut(&mut usize) -> io::Result<i32>,
    off: &mut usize,
) -> io::Result<Vec<FeaturePoint>> {
    let mut xs = [0i32; POINT_MAX];
    let mut ys = [0i32; POINT_MAX];
    let mut levels = [0i32; POINT_MAX];
    for x in &mut xs {
        *x = take(off)?;
    }
    for y in &mut ys {
        *y = take(off)?;
    }
    for level in &mut levels {
        *level = take(off)?;
    }

    let mut points = Vec::new();
    for i in 0..POINT_MAX {
        if levels[i] < 0 {
            continue;
        }
        if !(0..3).contains(&levels[i]) || !(0..256).contains(&xs[i]) || !(0..256).contains(&ys[i]) {
            return Err(invalid("feature point out of range in cascade blob"));
        }
        points.push(FeaturePoint::new(
            xs[i] as u8,
            ys[i] as u8,
            levels[i] as u8,
        ));
    }
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe_cascade() -> Cascade {
        let mut stage = StageClassifier::new();
        stage.threshold = -0.125;
        stage.features.push(
            Feature::from_points(
                &[FeaturePoint::new(5, 6, 0)],
                &[FeaturePoint::new(0, 0, 1), FeaturePoint::new(2, 1, 2)],
            )
            .unwrap(),
        );
        stage.alphas.push([-1.5, 1.5]);
        let mut cascade = Cascade::new(WindowSize::new(16, 16));
        cascade.stages.push(stage);
        cascade
    }

    #[test]
    fn too_small_buffers_only_report_the_length() {
        let cascade = probe_cascade();
        let needed = write_cascade_blob(&cascade, &mut []);
        assert_eq!(needed, cascade_blob_len(&cascade));

        let mut short = vec![0xAAu8; needed - 1];
        assert_eq!(write_cascade_blob(&cascade, &mut short), needed);
        assert!(short.iter().all(|&b| b == 0xAA), "short buffer untouched");
    }

    #[test]
    fn blob_round_trip_is_bit_exact() {
        let cascade = probe_cascade();
        let mut buf = vec![0u8; cascade_blob_len(&cascade)];
        write_cascade_blob(&cascade, &mut buf);

        let loaded = read_cascade_blob(&buf).unwrap();
        assert_eq!(loaded.size, cascade.size);
        assert_eq!(loaded.stages.len(), 1);
        assert_eq!(
            loaded.stages[0].threshold.to_bits(),
            cascade.stages[0].threshold.to_bits()
        );
        assert_eq!(
            loaded.stages[0].alphas[0][1].to_bits(),
            cascade.stages[0].alphas[0][1].to_bits()
        );
        assert!(loaded.stages[0].features[0].equivalent(&cascade.stages[0].features[0]));
    }

    #[test]
    fn truncated_blobs_fail_cleanly() {
        let cascade = probe_cascade();
        let mut buf = vec![0u8; cascade_blob_len(&cascade)];
        write_cascade_blob(&cascade, &mut buf);
        let err = read_cascade_blob(&buf[..buf.len() - 3]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
