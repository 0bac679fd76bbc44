//! Packed three-level pyramids of individual training windows.
//!
//! Training and mining hold thousands of fixed-size crops, each evaluated by
//! features at full, half, and quarter resolution. A [`WindowSample`] packs
//! the three planes into one contiguous allocation with row strides padded to
//! a multiple of four, so a pool of samples is cache-friendly and can be
//! dumped to and reloaded from the negative cache byte-for-byte.

use crate::WindowSize;

/// Row stride padded up to a multiple of four bytes.
#[inline]
pub fn pad4(w: usize) -> usize {
    (w + 3) & !3
}

/// One training crop: full, half, and quarter resolution planes packed into a
/// single buffer.
#[derive(Clone, Debug)]
pub struct WindowSample {
    data: Vec<u8>,
    strides: [usize; 3],
    offsets: [usize; 3],
}

impl WindowSample {
    /// Strides of the three planes for a window of `size`.
    pub fn strides_for(size: WindowSize) -> [usize; 3] {
        [
            pad4(size.cols(0) as usize),
            pad4(size.cols(1) as usize),
            pad4(size.cols(2) as usize),
        ]
    }

    /// Total packed byte length for a window of `size`.
    pub fn packed_len(size: WindowSize) -> usize {
        let s = Self::strides_for(size);
        s[0] * size.rows(0) as usize + s[1] * size.rows(1) as usize + s[2] * size.rows(2) as usize
    }

    fn layout(size: WindowSize) -> ([usize; 3], [usize; 3]) {
        let strides = Self::strides_for(size);
        let o1 = strides[0] * size.rows(0) as usize;
        let o2 = o1 + strides[1] * size.rows(1) as usize;
        (strides, [0, o1, o2])
    }

    /// Build the three-level pyramid from a full-resolution window.
    ///
    /// `full` is read with row stride `src_stride`; the half and quarter
    /// planes are produced by 2x2 box down-sampling.
    pub fn from_full_res(full: &[u8], src_stride: usize, size: WindowSize) -> Self {
        let (strides, offsets) = Self::layout(size);
        let mut data = vec![0u8; Self::packed_len(size)];

        for y in 0..size.rows(0) as usize {
            let src = &full[y * src_stride..y * src_stride + size.cols(0) as usize];
            data[offsets[0] + y * strides[0]..offsets[0] + y * strides[0] + src.len()]
                .copy_from_slice(src);
        }
        for level in 1..3 {
            downsample_2x_packed(
                &mut data,
                offsets[level - 1],
                strides[level - 1],
                offsets[level],
                strides[level],
                size.cols(level) as usize,
                size.rows(level) as usize,
            );
        }

        Self { data, strides, offsets }
    }

    /// Reconstruct a sample from `packed_len` raw bytes, as stored in the
    /// negative cache. Returns `None` on a length mismatch.
    pub fn from_packed(data: Vec<u8>, size: WindowSize) -> Option<Self> {
        if data.len() != Self::packed_len(size) {
            return None;
        }
        let (strides, offsets) = Self::layout(size);
        Some(Self { data, strides, offsets })
    }

    /// The packed representation, suitable for the negative cache.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// The three planes, each starting at its own top-left pixel.
    #[inline]
    pub fn planes(&self) -> [&[u8]; 3] {
        [
            &self.data[self.offsets[0]..self.offsets[1]],
            &self.data[self.offsets[1]..self.offsets[2]],
            &self.data[self.offsets[2]..],
        ]
    }

    /// Row strides matching [`planes`](Self::planes).
    #[inline]
    pub fn strides(&self) -> &[usize; 3] {
        &self.strides
    }
}

/// 2x2 box filter from one plane of `data` into the next, both living in the
/// same packed buffer.
fn downsample_2x_packed(
    data: &mut [u8],
    src_off: usize,
    src_stride: usize,
    dst_off: usize,
    dst_stride: usize,
    dst_w: usize,
    dst_h: usize,
) {
    for y in 0..dst_h {
        for x in 0..dst_w {
            let s = src_off + 2 * y * src_stride + 2 * x;
            let sum = data[s] as u16
                + data[s + 1] as u16
                + data[s + src_stride] as u16
                + data[s + src_stride + 1] as u16;
            data[dst_off + y * dst_stride + x] = (sum / 4) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_pads_strides_to_four() {
        let size = WindowSize::new(24, 24);
        assert_eq!(WindowSample::strides_for(size), [24, 12, 8]);
        assert_eq!(WindowSample::packed_len(size), 24 * 24 + 12 * 12 + 8 * 6);

        let odd = WindowSize::new(26, 20);
        // 26 -> 28, 13 -> 16, 6 -> 8
        assert_eq!(WindowSample::strides_for(odd), [28, 16, 8]);
    }

    #[test]
    fn box_filter_averages_quads() {
        let size = WindowSize::new(8, 8);
        let mut full = vec![0u8; 64];
        // one bright 2x2 block at (2,2) in full resolution
        for (x, y) in [(2, 2), (3, 2), (2, 3), (3, 3)] {
            full[y * 8 + x] = 100;
        }
        let s = WindowSample::from_full_res(&full, 8, size);
        let planes = s.planes();
        let strides = s.strides();

        // half res: single pixel of value 100 at (1,1)
        assert_eq!(planes[1][strides[1] + 1], 100);
        assert_eq!(planes[1][0], 0);
        // quarter res: (0,0) averages the half-res quad -> 100/4
        assert_eq!(planes[2][0], 25);
    }

    #[test]
    fn packed_round_trip_preserves_planes() {
        let size = WindowSize::new(16, 8);
        let full: Vec<u8> = (0..16 * 8).map(|i| (i % 256) as u8).collect();
        let s = WindowSample::from_full_res(&full, 16, size);

        let restored = WindowSample::from_packed(s.as_bytes().to_vec(), size).unwrap();
        assert_eq!(restored.planes()[0], s.planes()[0]);
        assert_eq!(restored.planes()[2], s.planes()[2]);

        assert!(WindowSample::from_packed(vec![0; 3], size).is_none());
    }

    #[test]
    fn source_stride_is_honored() {
        let size = WindowSize::new(4, 4);
        // 4x4 window embedded in an 8-wide buffer
        let mut src = vec![0u8; 8 * 4];
        for y in 0..4 {
            for x in 0..4 {
                src[y * 8 + x] = (y * 4 + x) as u8;
            }
        }
        let s = WindowSample::from_full_res(&src, 8, size);
        let planes = s.planes();
        assert_eq!(&planes[0][..4], &[0, 1, 2, 3]);
        assert_eq!(planes[0][s.strides()[0]], 4);
    }
}
