//! Shared test doubles: a scriptable stub backend with worker-thread
//! completion, plus deterministic frame builders.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use vidnn_core::{
    DataType, InferError, PixelFormat, Result, TensorBuffer, TensorDesc, TensorLayout, TensorView,
    TensorViewMut, VideoFrame,
};
use vidnn_dnn::{CompletionCallback, DispatchError, InferRequest, Model, PollStatus};

pub type DelayFn = dyn Fn(u64) -> Duration + Send + Sync;

/// Behaviour knobs for the stub backend, keyed by dispatch ordinal.
pub struct StubConfig {
    pub dt: DataType,
    pub channels: i64,
    /// Fixed input geometry as `(width, height)`; dynamic when `None`.
    pub fixed_size: Option<(u32, u32)>,
    /// Nearest-neighbour spatial factor applied by the "model".
    pub scale: u32,
    pub supports_async: bool,
    /// Completion delay per dispatch ordinal.
    pub delay: Option<Box<DelayFn>>,
    /// Fail dispatch N at submission time (0-based).
    pub fail_dispatch_at: Option<u64>,
    /// Fail dispatch N from the worker thread (0-based).
    pub fail_execution_at: Option<u64>,
}

impl Default for StubConfig {
    fn default() -> Self {
        Self {
            dt: DataType::Float32,
            channels: 1,
            fixed_size: None,
            scale: 1,
            supports_async: true,
            delay: None,
            fail_dispatch_at: None,
            fail_execution_at: None,
        }
    }
}

/// An identity (or fixed-factor upscaling) model with scriptable
/// asynchronous behaviour.
pub struct StubModel {
    cfg: Arc<StubConfig>,
    dispatches: Arc<AtomicU64>,
    input_desc: TensorDesc,
}

impl StubModel {
    pub fn new(cfg: StubConfig) -> Self {
        let (h, w) = match cfg.fixed_size {
            Some((w, h)) => (h as i64, w as i64),
            None => (-1, -1),
        };
        let input_desc = TensorDesc::new(cfg.dt, TensorLayout::Nhwc, [1, cfg.channels, h, w]);
        Self {
            cfg: Arc::new(cfg),
            dispatches: Arc::new(AtomicU64::new(0)),
            input_desc,
        }
    }

    /// Async identity model over the given element type and channel count.
    pub fn identity(dt: DataType, channels: i64) -> Self {
        Self::new(StubConfig {
            dt,
            channels,
            ..StubConfig::default()
        })
    }

    /// Synchronous-only identity model.
    pub fn identity_sync(dt: DataType, channels: i64) -> Self {
        Self::new(StubConfig {
            dt,
            channels,
            supports_async: false,
            ..StubConfig::default()
        })
    }

    fn output_desc_internal(&self) -> TensorDesc {
        let mut desc = self.input_desc;
        let scale = self.cfg.scale as i64;
        if desc.shape[2] > 0 {
            desc.shape[2] *= scale;
        }
        if desc.shape[3] > 0 {
            desc.shape[3] *= scale;
        }
        desc
    }
}

impl Model for StubModel {
    fn input_desc(&self, _name: &str) -> Result<TensorDesc> {
        Ok(self.input_desc)
    }

    fn output_desc(&self, _name: &str) -> Result<TensorDesc> {
        Ok(self.output_desc_internal())
    }

    fn set_input_geometry(&mut self, width: u32, height: u32) -> Result<()> {
        let (h, w) = (self.input_desc.height(), self.input_desc.width());
        if h >= 0 && h != height as i64 {
            return Err(InferError::DimensionMismatch(format!(
                "stub requires height {h}, got {height}"
            )));
        }
        if w >= 0 && w != width as i64 {
            return Err(InferError::DimensionMismatch(format!(
                "stub requires width {w}, got {width}"
            )));
        }
        self.input_desc = self.input_desc.with_spatial(height, width);
        Ok(())
    }

    fn reshape_batch(&mut self, batch_size: usize) -> Result<()> {
        self.input_desc = self.input_desc.with_batch(batch_size);
        Ok(())
    }

    fn supports_async(&self) -> bool {
        self.cfg.supports_async
    }

    fn new_request(&self) -> Result<Box<dyn InferRequest>> {
        let output_desc = self.output_desc_internal();
        Ok(Box::new(StubRequest {
            cfg: Arc::clone(&self.cfg),
            dispatches: Arc::clone(&self.dispatches),
            input: TensorBuffer::zeroed(&self.input_desc),
            output: TensorBuffer::zeroed(&output_desc),
            input_desc: self.input_desc,
            output_desc,
        }))
    }
}

pub struct StubRequest {
    cfg: Arc<StubConfig>,
    dispatches: Arc<AtomicU64>,
    input: TensorBuffer,
    output: TensorBuffer,
    input_desc: TensorDesc,
    output_desc: TensorDesc,
}

impl StubRequest {
    /// Nearest-neighbour copy of every batch member.
    fn compute(&mut self) -> Result<()> {
        let scale = self.cfg.scale as usize;
        let channels = self.input_desc.channels();
        let in_h = self.input_desc.height() as usize;
        let in_w = self.input_desc.width() as usize;
        let (out_h, out_w) = (in_h * scale, in_w * scale);
        let in_fe = self.input_desc.frame_elements();
        let out_fe = self.output_desc.frame_elements();

        for member in 0..self.input_desc.batch() {
            let upsample = |src: &[f32], dst: &mut [f32]| {
                for y in 0..out_h {
                    for x in 0..out_w {
                        let s = ((y / scale) * in_w + x / scale) * channels;
                        let d = (y * out_w + x) * channels;
                        dst[d..d + channels].copy_from_slice(&src[s..s + channels]);
                    }
                }
            };
            match (&self.input, &mut self.output) {
                (TensorBuffer::F32(src), TensorBuffer::F32(dst)) => {
                    let src = &src[member * in_fe..(member + 1) * in_fe];
                    let dst = &mut dst[member * out_fe..(member + 1) * out_fe];
                    upsample(src, dst);
                }
                (TensorBuffer::U8(src), TensorBuffer::U8(dst)) => {
                    let src = &src[member * in_fe..(member + 1) * in_fe];
                    let dst = &mut dst[member * out_fe..(member + 1) * out_fe];
                    for y in 0..out_h {
                        for x in 0..out_w {
                            let s = ((y / scale) * in_w + x / scale) * channels;
                            let d = (y * out_w + x) * channels;
                            dst[d..d + channels].copy_from_slice(&src[s..s + channels]);
                        }
                    }
                }
                _ => {
                    return Err(InferError::Execution(
                        "stub buffers disagree on element type".into(),
                    ))
                }
            }
        }
        Ok(())
    }
}

impl InferRequest for StubRequest {
    fn input(&mut self, _name: &str) -> Result<TensorViewMut<'_>> {
        Ok(self.input.view_mut(self.input_desc))
    }

    fn output(&mut self, _name: &str) -> Result<TensorView<'_>> {
        Ok(self.output.view(self.output_desc))
    }

    fn execute_sync(&mut self) -> Result<()> {
        self.compute()
    }

    fn execute_async(
        self: Box<Self>,
        done: CompletionCallback,
    ) -> std::result::Result<(), DispatchError> {
        let ordinal = self.dispatches.fetch_add(1, Ordering::SeqCst);
        if self.cfg.fail_dispatch_at == Some(ordinal) {
            return Err(DispatchError {
                error: InferError::Execution("injected dispatch failure".into()),
                request: self,
            });
        }
        let delay = self
            .cfg
            .delay
            .as_ref()
            .map(|f| f(ordinal))
            .unwrap_or(Duration::ZERO);
        thread::spawn(move || {
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            let mut request = self;
            let result = if request.cfg.fail_execution_at == Some(ordinal) {
                Err(InferError::Execution("injected execution failure".into()))
            } else {
                request.compute()
            };
            done(request, result);
        });
        Ok(())
    }
}

// ─── Frame builders ─────────────────────────────────────────────────────────

/// Deterministic frame whose bytes depend on position and pts.
pub fn make_frame(format: PixelFormat, width: u32, height: u32, pts: i64) -> VideoFrame {
    let mut frame = VideoFrame::alloc(format, width, height);
    frame.pts = pts;
    for plane in 0..format.plane_count() {
        let seed = (pts as usize) * 31 + plane * 7;
        for (i, byte) in frame.plane_mut(plane).iter_mut().enumerate() {
            *byte = ((i * 13 + seed) % 251) as u8;
        }
    }
    if format == PixelFormat::GrayF32 {
        // Overwrite with valid in-range float values.
        let (w, h) = (width as usize, height as usize);
        let plane = frame.plane_mut(0);
        for i in 0..w * h {
            let v = ((i * 13 + pts as usize) % 251) as f32;
            plane[i * 4..(i + 1) * 4].copy_from_slice(&v.to_ne_bytes());
        }
    }
    frame
}

/// Drain everything the engine currently has, keeping stream order.
pub fn drain(engine: &vidnn_dnn::InferenceEngine) -> Vec<std::result::Result<VideoFrame, i64>> {
    let mut out = Vec::new();
    loop {
        match engine.poll() {
            PollStatus::Ready(frame) => out.push(Ok(frame)),
            PollStatus::Dropped { pts, .. } => out.push(Err(pts)),
            PollStatus::NotReady | PollStatus::Empty => return out,
        }
    }
}
