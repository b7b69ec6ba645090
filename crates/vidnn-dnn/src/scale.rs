//! Single-plane bicubic resampler.
//!
//! Carries chroma planes around the model when a super-resolution network
//! changes the luma geometry.  Catmull-Rom taps, separable two-pass
//! evaluation, per-axis weights precomputed at construction so the per-frame
//! path is multiply-accumulate only.

/// Four-tap contribution of one destination coordinate.
#[derive(Clone, Copy, Debug)]
struct Tap {
    index: [usize; 4],
    weight: [f32; 4],
}

fn catmull_rom(t: f32) -> [f32; 4] {
    let t2 = t * t;
    let t3 = t2 * t;
    [
        -0.5 * t3 + t2 - 0.5 * t,
        1.5 * t3 - 2.5 * t2 + 1.0,
        -1.5 * t3 + 2.0 * t2 + 0.5 * t,
        0.5 * t3 - 0.5 * t2,
    ]
}

fn build_taps(src_len: usize, dst_len: usize) -> Vec<Tap> {
    let ratio = src_len as f32 / dst_len as f32;
    (0..dst_len)
        .map(|d| {
            let center = (d as f32 + 0.5) * ratio - 0.5;
            let base = center.floor();
            let weight = catmull_rom(center - base);
            let mut index = [0usize; 4];
            for (k, slot) in index.iter_mut().enumerate() {
                let sample = base as i64 + k as i64 - 1;
                *slot = sample.clamp(0, src_len as i64 - 1) as usize;
            }
            Tap { index, weight }
        })
        .collect()
}

/// Bicubic u8 plane scaler with fixed source and destination geometry.
pub struct BicubicScaler {
    src_h: usize,
    dst_w: usize,
    dst_h: usize,
    x_taps: Vec<Tap>,
    y_taps: Vec<Tap>,
}

impl BicubicScaler {
    pub fn new(src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> Self {
        Self {
            src_h: src_h as usize,
            dst_w: dst_w as usize,
            dst_h: dst_h as usize,
            x_taps: build_taps(src_w as usize, dst_w as usize),
            y_taps: build_taps(src_h as usize, dst_h as usize),
        }
    }

    /// Resample one plane.  `src` and `dst` hold `stride × height` bytes.
    pub fn scale(&self, src: &[u8], src_stride: usize, dst: &mut [u8], dst_stride: usize) {
        // Horizontal pass into an f32 intermediate, then vertical pass.
        let mut rows = vec![0.0f32; self.dst_w * self.src_h];
        for y in 0..self.src_h {
            let src_row = &src[y * src_stride..];
            let out_row = &mut rows[y * self.dst_w..(y + 1) * self.dst_w];
            for (x, tap) in self.x_taps.iter().enumerate() {
                let mut acc = 0.0f32;
                for k in 0..4 {
                    acc += tap.weight[k] * src_row[tap.index[k]] as f32;
                }
                out_row[x] = acc;
            }
        }

        for (y, tap) in self.y_taps.iter().enumerate() {
            let dst_row = &mut dst[y * dst_stride..y * dst_stride + self.dst_w];
            for (x, out) in dst_row.iter_mut().enumerate() {
                let mut acc = 0.0f32;
                for k in 0..4 {
                    acc += tap.weight[k] * rows[tap.index[k] * self.dst_w + x];
                }
                *out = acc.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}
