//! The processing stage and its pipeline edges.

use tracing::{error, info};

use vidnn_core::{InferError, InferParams, PixelFormat, Result, VideoFrame};
use vidnn_dnn::{load_model, InferenceEngine, Model, PollStatus};

/// What the upstream edge produced on one pull.
pub enum SourceEvent {
    /// One decoded frame; ownership passes to the stage.
    Frame(VideoFrame),
    /// No frame available right now; activate again later.
    Pending,
    /// Upstream terminated the sequence at the given timestamp.
    EndOfStream { pts: i64 },
}

/// Upstream edge: where input frames come from.
pub trait FrameSource {
    fn pull(&mut self) -> Result<SourceEvent>;
}

/// Downstream edge: where transformed frames go.
pub trait FrameSink {
    /// Accept one transformed frame, in stream order.
    fn write(&mut self, frame: VideoFrame) -> Result<()>;
    /// Terminal signal with the timestamp of the last produced frame.
    fn end_of_stream(&mut self, pts: i64) -> Result<()>;
}

/// Outcome of one activation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageStatus {
    /// Upstream has more to deliver; activate again.
    Running,
    /// End-of-stream has been propagated downstream.
    Finished,
}

/// A configured per-stream filter stage.
pub struct ProcessingStage {
    name: String,
    engine: InferenceEngine,
    last_pts: Option<i64>,
    already_flushed: bool,
    finished: bool,
}

impl std::fmt::Debug for ProcessingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingStage")
            .field("name", &self.name)
            .field("engine", &self.engine)
            .field("last_pts", &self.last_pts)
            .field("already_flushed", &self.already_flushed)
            .field("finished", &self.finished)
            .finish()
    }
}

impl ProcessingStage {
    /// Load the model named by `params` and configure the stage for a
    /// negotiated stream geometry.
    ///
    /// Fails with `Config`/`ModelLoad` errors when the options are invalid,
    /// the model cannot be loaded, or the frame format does not fit the
    /// model contract.
    pub fn new(
        name: impl Into<String>,
        params: &InferParams,
        format: PixelFormat,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        params.validate()?;
        let model = load_model(params.backend, &params.model, &params.backend_options)?;
        Self::with_model(name, params, model, format, width, height)
    }

    /// Configure the stage around an already loaded model handle.
    pub fn with_model(
        name: impl Into<String>,
        params: &InferParams,
        model: Box<dyn Model>,
        format: PixelFormat,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let name = name.into();
        let engine = InferenceEngine::new(model, params, format, width, height)?;
        let (out_w, out_h) = engine.output_size();
        info!(stage = %name, format = %format, width, height, out_w, out_h, "stage configured");
        Ok(Self {
            name,
            engine,
            last_pts: None,
            already_flushed: false,
            finished: false,
        })
    }

    /// Output frame geometry, for downstream negotiation.
    pub fn output_size(&self) -> (u32, u32) {
        self.engine.output_size()
    }

    /// Accept one input frame from upstream.
    pub fn submit_frame(&mut self, frame: VideoFrame) -> Result<()> {
        if self.finished {
            return Err(InferError::Shutdown);
        }
        self.engine.submit(frame)
    }

    /// Fetch the next finished frame, if any.
    ///
    /// Frames that failed inference are reported as
    /// [`PollStatus::Dropped`] with one error line logged here; the stream
    /// continues.
    pub fn poll_frame(&mut self) -> PollStatus {
        let status = self.engine.poll();
        match &status {
            PollStatus::Ready(frame) => {
                self.last_pts = Some(frame.pts);
            }
            PollStatus::Dropped { pts, error } => {
                error!(stage = %self.name, pts, code = error.error_code(), error = %error,
                    "dropping frame after inference failure");
            }
            _ => {}
        }
        status
    }

    /// `true` once nothing is buffered or in flight.
    pub fn is_empty(&self) -> bool {
        self.engine.is_empty()
    }

    /// Drain + flush at end-of-stream and propagate the signal downstream.
    ///
    /// The flush happens at most once; repeated signals are no-ops.  The
    /// downstream timestamp is the last delivered pts, falling back to the
    /// upstream-provided one when nothing was delivered.
    pub fn signal_end_of_stream(
        &mut self,
        upstream_pts: i64,
        sink: &mut dyn FrameSink,
    ) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        if !self.already_flushed {
            self.engine.flush();
            loop {
                match self.poll_frame() {
                    PollStatus::Ready(frame) => sink.write(frame)?,
                    PollStatus::Dropped { .. } => continue,
                    PollStatus::NotReady | PollStatus::Empty => break,
                }
            }
            self.already_flushed = true;
        }
        self.finished = true;
        let pts = self.last_pts.unwrap_or(upstream_pts);
        info!(stage = %self.name, pts, "end of stream");
        debug_assert!(
            self.engine.metrics().validate(),
            "stage metric ordering violated"
        );
        self.engine.metrics().report(&self.name);
        sink.end_of_stream(pts)
    }

    /// One activation of the stage: consume everything upstream offers,
    /// forward everything that finished, handle end-of-stream.
    pub fn activate(
        &mut self,
        source: &mut dyn FrameSource,
        sink: &mut dyn FrameSink,
    ) -> Result<StageStatus> {
        loop {
            match source.pull()? {
                SourceEvent::Frame(frame) => {
                    if let Err(err) = self.submit_frame(frame) {
                        if matches!(err, InferError::Resource(_)) {
                            // Resource exhaustion ends the stream cleanly
                            // downstream before the failure propagates.
                            error!(stage = %self.name, code = err.error_code(), error = %err,
                                "terminating stream");
                            let pts = self.last_pts.unwrap_or(0);
                            self.signal_end_of_stream(pts, sink)?;
                        }
                        return Err(err);
                    }
                    self.forward_ready(sink)?;
                }
                SourceEvent::Pending => {
                    self.forward_ready(sink)?;
                    return Ok(StageStatus::Running);
                }
                SourceEvent::EndOfStream { pts } => {
                    self.signal_end_of_stream(pts, sink)?;
                    return Ok(StageStatus::Finished);
                }
            }
        }
    }

    fn forward_ready(&mut self, sink: &mut dyn FrameSink) -> Result<()> {
        loop {
            match self.poll_frame() {
                PollStatus::Ready(frame) => sink.write(frame)?,
                PollStatus::Dropped { .. } => continue,
                PollStatus::NotReady | PollStatus::Empty => return Ok(()),
            }
        }
    }
}
