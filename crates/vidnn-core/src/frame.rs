//! Host-side frame types and pixel format contracts.
//!
//! # Ownership model
//!
//! [`VideoFrame`] owns its plane buffers.  Ownership passes from upstream to
//! the stage on submit and from the stage to downstream on poll; nothing in
//! the core shares a frame buffer across threads without moving the frame.
//!
//! # Invariants
//!
//! 1. `data.len() == linesize.len() == format.plane_count()`.
//! 2. Every plane buffer holds at least `linesize[i] × plane_height(i)` bytes.
//! 3. `linesize[i] ≥` the dense bytewidth of plane `i`; rows may carry
//!    trailing stride padding which is never interpreted.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::InferError;

/// Ceiling right-shift, for chroma plane geometry.
#[inline]
pub const fn ceil_rshift(value: u32, shift: u32) -> u32 {
    (value + (1 << shift) - 1) >> shift
}

// ─── Pixel format ────────────────────────────────────────────────────────────

/// Pixel formats accepted at the stage edge.
///
/// Anything outside this set is rejected at negotiation time, before the
/// stage is constructed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Packed 8-bit R G B triplets, one plane.
    Rgb24,
    /// Packed 8-bit B G R triplets, one plane.
    Bgr24,
    /// 8-bit luminance, one plane.
    Gray8,
    /// 32-bit float luminance, one plane, native endianness.
    GrayF32,
    /// Planar YUV, chroma sub-sampled 2×2.
    Yuv420p,
    /// Planar YUV, chroma sub-sampled 2×1.
    Yuv422p,
    /// Planar YUV, full-resolution chroma.
    Yuv444p,
    /// Planar YUV, chroma sub-sampled 4×4.
    Yuv410p,
    /// Planar YUV, chroma sub-sampled 4×1.
    Yuv411p,
}

impl PixelFormat {
    /// Number of separately stored planes.
    pub const fn plane_count(self) -> usize {
        match self {
            Self::Rgb24 | Self::Bgr24 | Self::Gray8 | Self::GrayF32 => 1,
            _ => 3,
        }
    }

    /// `true` for the three-plane YUV family.
    pub const fn is_planar_yuv(self) -> bool {
        matches!(
            self,
            Self::Yuv420p | Self::Yuv422p | Self::Yuv444p | Self::Yuv410p | Self::Yuv411p
        )
    }

    /// Chroma sub-sampling shifts as `(log2_horizontal, log2_vertical)`.
    ///
    /// Zero for non-YUV formats.
    pub const fn chroma_shift(self) -> (u32, u32) {
        match self {
            Self::Yuv420p => (1, 1),
            Self::Yuv422p => (1, 0),
            Self::Yuv444p => (0, 0),
            Self::Yuv410p => (2, 2),
            Self::Yuv411p => (2, 0),
            _ => (0, 0),
        }
    }

    /// Bytes per stored component (4 for float formats, 1 otherwise).
    pub const fn bytes_per_component(self) -> usize {
        match self {
            Self::GrayF32 => 4,
            _ => 1,
        }
    }

    /// Pixel geometry of one plane for a `width × height` frame.
    pub fn plane_dimensions(self, width: u32, height: u32, plane: usize) -> (u32, u32) {
        if plane == 0 || !self.is_planar_yuv() {
            return (width, height);
        }
        let (sx, sy) = self.chroma_shift();
        (ceil_rshift(width, sx), ceil_rshift(height, sy))
    }

    /// Dense bytewidth of one row of the given plane.
    pub fn plane_linesize(self, width: u32, plane: usize) -> usize {
        let (pw, _) = self.plane_dimensions(width, 1, plane);
        match self {
            Self::Rgb24 | Self::Bgr24 => pw as usize * 3,
            Self::GrayF32 => pw as usize * 4,
            _ => pw as usize,
        }
    }

    /// Total byte size of a densely packed frame (no stride padding).
    pub fn frame_byte_size(self, width: u32, height: u32) -> usize {
        (0..self.plane_count())
            .map(|p| {
                let (_, ph) = self.plane_dimensions(width, height, p);
                self.plane_linesize(width, p) * ph as usize
            })
            .sum()
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Rgb24 => "rgb24",
            Self::Bgr24 => "bgr24",
            Self::Gray8 => "gray8",
            Self::GrayF32 => "grayf32",
            Self::Yuv420p => "yuv420p",
            Self::Yuv422p => "yuv422p",
            Self::Yuv444p => "yuv444p",
            Self::Yuv410p => "yuv410p",
            Self::Yuv411p => "yuv411p",
        };
        f.write_str(name)
    }
}

impl FromStr for PixelFormat {
    type Err = InferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rgb24" => Ok(Self::Rgb24),
            "bgr24" => Ok(Self::Bgr24),
            "gray8" => Ok(Self::Gray8),
            "grayf32" => Ok(Self::GrayF32),
            "yuv420p" => Ok(Self::Yuv420p),
            "yuv422p" => Ok(Self::Yuv422p),
            "yuv444p" => Ok(Self::Yuv444p),
            "yuv410p" => Ok(Self::Yuv410p),
            "yuv411p" => Ok(Self::Yuv411p),
            other => Err(InferError::Config(format!(
                "pixel format \"{other}\" is not supported at the stage edge"
            ))),
        }
    }
}

// ─── VideoFrame ──────────────────────────────────────────────────────────────

/// A single uncompressed video frame with owned plane buffers.
#[derive(Clone, Debug)]
pub struct VideoFrame {
    /// One byte buffer per plane.
    pub data: Vec<Vec<u8>>,
    /// Row stride in bytes for each plane.  May exceed the dense bytewidth.
    pub linesize: Vec<usize>,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel storage format.
    pub format: PixelFormat,
    /// Presentation timestamp in the stream time base.
    pub pts: i64,
    /// Side-band metadata, copied through the stage untouched.
    pub metadata: HashMap<String, String>,
}

impl VideoFrame {
    /// Allocate a zeroed frame with dense strides.
    pub fn alloc(format: PixelFormat, width: u32, height: u32) -> Self {
        let planes = format.plane_count();
        let mut data = Vec::with_capacity(planes);
        let mut linesize = Vec::with_capacity(planes);
        for p in 0..planes {
            let stride = format.plane_linesize(width, p);
            let (_, ph) = format.plane_dimensions(width, height, p);
            data.push(vec![0u8; stride * ph as usize]);
            linesize.push(stride);
        }
        Self {
            data,
            linesize,
            width,
            height,
            format,
            pts: 0,
            metadata: HashMap::new(),
        }
    }

    /// Borrow one plane.
    #[inline]
    pub fn plane(&self, index: usize) -> &[u8] {
        &self.data[index]
    }

    /// Mutably borrow one plane.
    #[inline]
    pub fn plane_mut(&mut self, index: usize) -> &mut [u8] {
        &mut self.data[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuv420p_chroma_geometry_rounds_up() {
        let fmt = PixelFormat::Yuv420p;
        assert_eq!(fmt.plane_dimensions(5, 5, 0), (5, 5));
        assert_eq!(fmt.plane_dimensions(5, 5, 1), (3, 3));
        assert_eq!(fmt.plane_linesize(5, 2), 3);
    }

    #[test]
    fn yuv411p_subsamples_horizontally_only() {
        let fmt = PixelFormat::Yuv411p;
        assert_eq!(fmt.plane_dimensions(16, 8, 1), (4, 8));
        assert_eq!(fmt.plane_dimensions(16, 8, 2), (4, 8));
    }

    #[test]
    fn frame_byte_sizes() {
        assert_eq!(PixelFormat::Rgb24.frame_byte_size(4, 2), 24);
        assert_eq!(PixelFormat::GrayF32.frame_byte_size(4, 2), 32);
        // 16 Y + 4 U + 4 V
        assert_eq!(PixelFormat::Yuv420p.frame_byte_size(4, 4), 24);
    }

    #[test]
    fn alloc_produces_dense_planes() {
        let frame = VideoFrame::alloc(PixelFormat::Yuv422p, 6, 4);
        assert_eq!(frame.data.len(), 3);
        assert_eq!(frame.plane(0).len(), 24);
        assert_eq!(frame.plane(1).len(), 12);
        assert_eq!(frame.linesize, vec![6, 3, 3]);
    }

    #[test]
    fn parse_round_trips_every_format_name() {
        for fmt in [
            PixelFormat::Rgb24,
            PixelFormat::Bgr24,
            PixelFormat::Gray8,
            PixelFormat::GrayF32,
            PixelFormat::Yuv420p,
            PixelFormat::Yuv422p,
            PixelFormat::Yuv444p,
            PixelFormat::Yuv410p,
            PixelFormat::Yuv411p,
        ] {
            assert_eq!(fmt.to_string().parse::<PixelFormat>().unwrap(), fmt);
        }
        assert!("nv12".parse::<PixelFormat>().is_err());
    }
}
