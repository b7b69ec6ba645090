//! Frame ↔ tensor transcoding.
//!
//! Feeds the model and drains it back into frames:
//!
//! | Pixel format  | Tensor | Conversion |
//! |---------------|--------|------------|
//! | rgb24 / bgr24 | f32    | widen u8 → f32 per component, no colour change |
//! | rgb24 / bgr24 | u8     | strided row copy |
//! | gray8         | u8     | strided row copy |
//! | grayf32       | f32    | strided row copy |
//! | planar YUV    | f32    | widen the Y plane; U/V bypass the model |
//!
//! Narrowing back to u8 rounds, then clamps into `[0, 255]`.  For planar
//! YUV, chroma planes are copied verbatim when the model preserves geometry
//! and bicubic-rescaled to the output geometry otherwise.  The output frame
//! takes its geometry from the output tensor, its format from the input
//! frame, and its pts and side-band metadata from the input frame.

use vidnn_core::frame::ceil_rshift;
use vidnn_core::{
    DataType, InferError, PixelFormat, Result, TensorData, TensorDataMut, TensorDesc, TensorView,
    TensorViewMut, VideoFrame,
};

use crate::scale::BicubicScaler;

// ─── Config-time validation ──────────────────────────────────────────────────

/// Check a negotiated frame geometry against the model input descriptor.
///
/// Spatial dimensions must match the model's fixed dimensions unless the
/// model declares them dynamic; the channel count and element type must fit
/// the conversion table above.
pub fn check_model_input(
    desc: &TensorDesc,
    format: PixelFormat,
    width: u32,
    height: u32,
) -> Result<()> {
    if desc.height() >= 0 && desc.height() != height as i64 {
        return Err(InferError::DimensionMismatch(format!(
            "the model requires frame height {} but got {height}",
            desc.height()
        )));
    }
    if desc.width() >= 0 && desc.width() != width as i64 {
        return Err(InferError::DimensionMismatch(format!(
            "the model requires frame width {} but got {width}",
            desc.width()
        )));
    }

    let channels = desc.channels();
    match format {
        PixelFormat::Rgb24 | PixelFormat::Bgr24 => {
            if channels != 3 {
                return Err(InferError::ChannelMismatch { format, channels });
            }
        }
        PixelFormat::Gray8 => {
            if channels != 1 {
                return Err(InferError::ChannelMismatch { format, channels });
            }
            if desc.dt != DataType::Uint8 {
                return Err(InferError::Config(
                    "gray8 input only supports models with input data type uint8".into(),
                ));
            }
        }
        PixelFormat::GrayF32 => {
            if channels != 1 {
                return Err(InferError::ChannelMismatch { format, channels });
            }
            if desc.dt != DataType::Float32 {
                return Err(InferError::Config(
                    "grayf32 input only supports models with input data type float32".into(),
                ));
            }
        }
        _ => {
            if channels != 1 {
                return Err(InferError::ChannelMismatch { format, channels });
            }
            if desc.dt != DataType::Float32 {
                return Err(InferError::Config(
                    "planar YUV input only supports models with input data type float32".into(),
                ));
            }
        }
    }
    Ok(())
}

// ─── Row helpers ─────────────────────────────────────────────────────────────

fn copy_rows(
    src: &[u8],
    src_stride: usize,
    dst: &mut [u8],
    dst_stride: usize,
    bytewidth: usize,
    rows: usize,
) {
    for y in 0..rows {
        dst[y * dst_stride..y * dst_stride + bytewidth]
            .copy_from_slice(&src[y * src_stride..y * src_stride + bytewidth]);
    }
}

fn widen_rows(src: &[u8], src_stride: usize, dst: &mut [f32], row_elems: usize, rows: usize) {
    for y in 0..rows {
        let src_row = &src[y * src_stride..y * src_stride + row_elems];
        let dst_row = &mut dst[y * row_elems..(y + 1) * row_elems];
        for (d, s) in dst_row.iter_mut().zip(src_row) {
            *d = *s as f32;
        }
    }
}

fn narrow_rows(src: &[f32], row_elems: usize, dst: &mut [u8], dst_stride: usize, rows: usize) {
    for y in 0..rows {
        let src_row = &src[y * row_elems..(y + 1) * row_elems];
        let dst_row = &mut dst[y * dst_stride..y * dst_stride + row_elems];
        for (d, s) in dst_row.iter_mut().zip(src_row) {
            *d = s.round().clamp(0.0, 255.0) as u8;
        }
    }
}

fn load_f32_rows(src: &[u8], src_stride: usize, dst: &mut [f32], row_elems: usize, rows: usize) {
    for y in 0..rows {
        let src_row = &src[y * src_stride..y * src_stride + row_elems * 4];
        let dst_row = &mut dst[y * row_elems..(y + 1) * row_elems];
        for (d, s) in dst_row.iter_mut().zip(src_row.chunks_exact(4)) {
            *d = f32::from_ne_bytes([s[0], s[1], s[2], s[3]]);
        }
    }
}

fn store_f32_rows(src: &[f32], row_elems: usize, dst: &mut [u8], dst_stride: usize, rows: usize) {
    for y in 0..rows {
        let src_row = &src[y * row_elems..(y + 1) * row_elems];
        let dst_row = &mut dst[y * dst_stride..y * dst_stride + row_elems * 4];
        for (s, d) in src_row.iter().zip(dst_row.chunks_exact_mut(4)) {
            d.copy_from_slice(&s.to_ne_bytes());
        }
    }
}

// ─── Transcoder ──────────────────────────────────────────────────────────────

enum UvCarry {
    /// Non-YUV format, nothing to carry.
    None,
    /// Model preserves geometry: chroma planes copied verbatim.
    Copy,
    /// Model changes geometry: chroma planes rescaled to the output size.
    Rescale(BicubicScaler),
}

/// Preproc/postproc paths for one negotiated stream.
pub struct Transcoder {
    format: PixelFormat,
    in_width: u32,
    in_height: u32,
    out_width: u32,
    out_height: u32,
    uv: UvCarry,
}

impl Transcoder {
    /// Build the conversion plan for a stream.  `check_model_input` must
    /// have accepted the descriptor already.
    pub fn configure(
        format: PixelFormat,
        in_width: u32,
        in_height: u32,
        out_width: u32,
        out_height: u32,
    ) -> Self {
        let uv = if !format.is_planar_yuv() {
            UvCarry::None
        } else if (in_width, in_height) == (out_width, out_height) {
            UvCarry::Copy
        } else {
            let (sx, sy) = format.chroma_shift();
            UvCarry::Rescale(BicubicScaler::new(
                ceil_rshift(in_width, sx),
                ceil_rshift(in_height, sy),
                ceil_rshift(out_width, sx),
                ceil_rshift(out_height, sy),
            ))
        };
        Self {
            format,
            in_width,
            in_height,
            out_width,
            out_height,
            uv,
        }
    }

    /// Output frame geometry.
    pub fn output_size(&self) -> (u32, u32) {
        (self.out_width, self.out_height)
    }

    /// Convert one frame into one batch member of a model input tensor.
    pub fn preproc(&self, frame: &VideoFrame, dst: TensorViewMut<'_>) -> Result<()> {
        let rows = self.in_height as usize;
        let width = self.in_width as usize;
        match (frame.format, dst.data) {
            (PixelFormat::Rgb24 | PixelFormat::Bgr24, TensorDataMut::F32(out)) => {
                widen_rows(frame.plane(0), frame.linesize[0], out, width * 3, rows);
            }
            (PixelFormat::Rgb24 | PixelFormat::Bgr24, TensorDataMut::U8(out)) => {
                copy_rows(
                    frame.plane(0),
                    frame.linesize[0],
                    out,
                    width * 3,
                    width * 3,
                    rows,
                );
            }
            (PixelFormat::Gray8, TensorDataMut::U8(out)) => {
                copy_rows(frame.plane(0), frame.linesize[0], out, width, width, rows);
            }
            (PixelFormat::GrayF32, TensorDataMut::F32(out)) => {
                load_f32_rows(frame.plane(0), frame.linesize[0], out, width, rows);
            }
            (fmt, TensorDataMut::F32(out)) if fmt.is_planar_yuv() => {
                widen_rows(frame.plane(0), frame.linesize[0], out, width, rows);
            }
            (fmt, _) => {
                return Err(InferError::Config(format!(
                    "no conversion from {fmt} to a {:?} tensor",
                    dst.desc.dt
                )));
            }
        }
        Ok(())
    }

    /// Convert one batch member of a model output tensor into a frame.
    pub fn postproc(&self, member: TensorView<'_>, input: &VideoFrame) -> Result<VideoFrame> {
        let out_w = member.desc.width();
        let out_h = member.desc.height();
        if (out_w, out_h) != (self.out_width as i64, self.out_height as i64) {
            return Err(InferError::DimensionMismatch(format!(
                "output tensor is {out_w}x{out_h}, stage negotiated {}x{}",
                self.out_width, self.out_height
            )));
        }

        let mut out = VideoFrame::alloc(self.format, self.out_width, self.out_height);
        out.pts = input.pts;
        out.metadata = input.metadata.clone();

        let rows = self.out_height as usize;
        let width = self.out_width as usize;
        let stride = out.linesize[0];
        match (self.format, member.data) {
            (PixelFormat::Rgb24 | PixelFormat::Bgr24, TensorData::F32(src)) => {
                narrow_rows(src, width * 3, out.plane_mut(0), stride, rows);
            }
            (PixelFormat::Rgb24 | PixelFormat::Bgr24, TensorData::U8(src)) => {
                copy_rows(src, width * 3, out.plane_mut(0), stride, width * 3, rows);
            }
            (PixelFormat::Gray8, TensorData::U8(src)) => {
                copy_rows(src, width, out.plane_mut(0), stride, width, rows);
            }
            (PixelFormat::GrayF32, TensorData::F32(src)) => {
                store_f32_rows(src, width, out.plane_mut(0), stride, rows);
            }
            (fmt, TensorData::F32(src)) if fmt.is_planar_yuv() => {
                narrow_rows(src, width, out.plane_mut(0), stride, rows);
                self.carry_uv(input, &mut out);
            }
            (fmt, _) => {
                return Err(InferError::Config(format!(
                    "no conversion from a {:?} tensor to {fmt}",
                    member.desc.dt
                )));
            }
        }
        Ok(out)
    }

    /// Attach the chroma planes the model never saw.
    fn carry_uv(&self, input: &VideoFrame, out: &mut VideoFrame) {
        for plane in 1..3 {
            let dst_stride = out.linesize[plane];
            match &self.uv {
                UvCarry::Copy => {
                    let (_, ph) =
                        self.format
                            .plane_dimensions(self.in_width, self.in_height, plane);
                    let bytewidth = self.format.plane_linesize(self.in_width, plane);
                    copy_rows(
                        input.plane(plane),
                        input.linesize[plane],
                        out.plane_mut(plane),
                        dst_stride,
                        bytewidth,
                        ph as usize,
                    );
                }
                UvCarry::Rescale(scaler) => {
                    scaler.scale(
                        input.plane(plane),
                        input.linesize[plane],
                        out.plane_mut(plane),
                        dst_stride,
                    );
                }
                UvCarry::None => {}
            }
        }
    }
}
