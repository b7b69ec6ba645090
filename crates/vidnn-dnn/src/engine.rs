//! The inference engine — ties the FIFO, the ordered in-flight list, the
//! transcoder and the backend together behind `submit`/`poll`/`flush`.
//!
//! # Modes
//!
//! **Sync** (default, and the fallback when the backend cannot execute
//! asynchronously): one pinned backend request, inference on the calling
//! thread, results pushed straight onto the processed queue.  No pool.
//!
//! **Async**: `nireq` request slots, each packing up to `batch_size`
//! frames.  `submit` fills the head slot and dispatches it when full;
//! completion callbacks run postproc on backend worker threads, mark the
//! in-flight entries done, and return the slot to the pool.  `poll` drains
//! finished entries from the head of the in-flight list only, so output
//! order always equals submission order.
//!
//! `submit` never suspends: with every slot dispatched, frames join a
//! submission-ordered backlog instead of waiting on the pool, and the
//! filter thread packs the backlog into freed slots on its next `submit`,
//! `poll` or `flush` call.
//!
//! # Failure policy
//!
//! Per-request execution failures never kill the stream: every packed entry
//! is marked done with no output and surfaces from `poll` as
//! [`PollStatus::Dropped`] at its submission position.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use vidnn_core::{InferError, InferParams, PixelFormat, Result, VideoFrame};

use crate::backend::{CompletionCallback, DispatchError, InferRequest, Model};
use crate::fifo::SlotQueue;
use crate::inflight::{InflightEntry, InflightQueue};
use crate::ioproc::{check_model_input, Transcoder};
use crate::request::RequestSlot;

/// Backoff between drain checks while `flush` waits for callbacks.
const FLUSH_BACKOFF: Duration = Duration::from_millis(5);

/// Outcome of one `poll`.
pub enum PollStatus {
    /// The oldest submitted frame finished; ownership passes to the caller.
    Ready(VideoFrame),
    /// The oldest submitted frame failed inference and is dropped at its
    /// position in the stream.
    Dropped { pts: i64, error: InferError },
    /// The oldest submitted frame has not completed yet.
    NotReady,
    /// Nothing is in flight and nothing is waiting to be delivered.
    Empty,
}

// ─── Metrics ────────────────────────────────────────────────────────────────

/// Atomic per-stage frame counters.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Frames accepted by `submit`.
    pub frames_submitted: AtomicU64,
    /// Frames whose inference finished (successfully or not).
    pub frames_completed: AtomicU64,
    /// Frames handed to the caller by `poll`.
    pub frames_delivered: AtomicU64,
    /// Frames dropped after an execution failure.
    pub frames_dropped: AtomicU64,
}

impl EngineMetrics {
    fn counts(&self) -> (u64, u64, u64, u64) {
        (
            self.frames_submitted.load(Ordering::Acquire),
            self.frames_completed.load(Ordering::Acquire),
            self.frames_delivered.load(Ordering::Acquire),
            self.frames_dropped.load(Ordering::Acquire),
        )
    }

    /// Ordering invariant.  Should hold at any quiescent point.
    pub fn validate(&self) -> bool {
        let (submitted, completed, delivered, dropped) = self.counts();
        submitted >= completed && completed >= delivered + dropped
    }

    /// One structured summary line.
    pub fn report(&self, stage: &str) {
        let (submitted, completed, delivered, dropped) = self.counts();
        info!(stage, submitted, completed, delivered, dropped, "stage metrics");
    }
}

// ─── Shared engine state ────────────────────────────────────────────────────

struct ProcessedFrame {
    pts: i64,
    result: Result<VideoFrame>,
}

/// Pending backlog, ordered in-flight list and the processed queue,
/// guarded together.
struct EngineState {
    /// Frames accepted while every request slot was dispatched, oldest
    /// first.  Packed into the next freed slot by the filter thread.
    pending: VecDeque<VideoFrame>,
    inflight: InflightQueue,
    processed: VecDeque<ProcessedFrame>,
}

impl EngineState {
    /// Move every finished head entry onto the processed queue.
    fn promote_ready(&mut self) {
        for entry in self.inflight.drain_ready() {
            self.processed.push_back(ProcessedFrame {
                pts: entry.pts(),
                result: entry.take_outcome(),
            });
        }
    }
}

/// State reachable from both the filter thread and completion callbacks.
struct Shared {
    transcoder: Transcoder,
    output_name: String,
    state: Mutex<EngineState>,
    /// Serializes completion work when the backend worker pool is larger
    /// than one, so postproc on different slots never interleaves.
    callback_mutex: Mutex<()>,
    pool: SlotQueue<RequestSlot>,
    metrics: EngineMetrics,
}

impl Shared {
    /// Completion path: postproc every packed entry, mark it done, drain the
    /// head of the in-flight list, return the slot to the pool tail.
    fn complete(
        &self,
        mut request: Box<dyn InferRequest>,
        output_name: Option<String>,
        mut entries: Vec<Arc<InflightEntry>>,
        result: Result<()>,
    ) {
        let _serialized = self.callback_mutex.lock().unwrap();

        let name = output_name.as_deref().unwrap_or(&self.output_name);
        match result {
            Ok(()) => match request.output(name) {
                Ok(view) => {
                    for (index, entry) in entries.iter().enumerate() {
                        let outcome =
                            self.transcoder.postproc(view.batch_member(index), entry.input());
                        if let Err(err) = &outcome {
                            warn!(pts = entry.pts(), code = err.error_code(), error = %err,
                                "postproc failed");
                        }
                        entry.complete(outcome);
                    }
                }
                Err(err) => {
                    warn!(code = err.error_code(), error = %err, "output tensor unavailable");
                    for entry in &entries {
                        entry.complete(Err(err.clone()));
                    }
                }
            },
            Err(err) => {
                warn!(code = err.error_code(), error = %err, frames = entries.len(),
                    "inference request failed");
                for entry in &entries {
                    entry.complete(Err(err.clone()));
                }
            }
        }

        self.metrics
            .frames_completed
            .fetch_add(entries.len() as u64, Ordering::AcqRel);
        self.state.lock().unwrap().promote_ready();

        entries.clear();
        self.pool.push(RequestSlot {
            request,
            output_name,
            entries,
        });
    }

    /// Hand a full (or flushed) slot to the backend.
    fn dispatch(shared: &Arc<Self>, slot: RequestSlot) {
        let RequestSlot {
            request,
            output_name,
            entries,
        } = slot;

        debug!(frames = entries.len(), "dispatching inference request");
        let cb_shared = Arc::clone(shared);
        let cb_name = output_name.clone();
        let cb_entries = entries.clone();
        let done: CompletionCallback = Box::new(move |request, result| {
            cb_shared.complete(request, cb_name, cb_entries, result);
        });

        if let Err(DispatchError { request, error }) = request.execute_async(done) {
            warn!(code = error.error_code(), error = %error, frames = entries.len(),
                "async dispatch failed");
            for entry in &entries {
                entry.complete(Err(error.clone()));
            }
            shared
                .metrics
                .frames_completed
                .fetch_add(entries.len() as u64, Ordering::AcqRel);
            shared.state.lock().unwrap().promote_ready();

            let mut entries = entries;
            entries.clear();
            shared.pool.push(RequestSlot {
                request,
                output_name,
                entries,
            });
        }
    }
}

// ─── Engine ─────────────────────────────────────────────────────────────────

enum ExecMode {
    Sync {
        request: Mutex<Box<dyn InferRequest>>,
    },
    Async {
        batch_size: usize,
    },
}

/// Orchestrates preproc, batching, dispatch and in-order delivery for one
/// configured stream.
pub struct InferenceEngine {
    mode: ExecMode,
    shared: Arc<Shared>,
    input_name: String,
    out_width: u32,
    out_height: u32,
    // The model outlives every request it created.
    _model: Box<dyn Model>,
}

impl std::fmt::Debug for InferenceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceEngine")
            .field("input_name", &self.input_name)
            .field("out_width", &self.out_width)
            .field("out_height", &self.out_height)
            .finish_non_exhaustive()
    }
}

impl InferenceEngine {
    /// Configure an engine for a negotiated stream.
    ///
    /// Validates the frame/model contract, pins dynamic geometry, reshapes
    /// the batch dimension, resolves the output geometry (falling back to a
    /// one-shot dry run when the descriptor leaves it open), and sizes the
    /// request pool.
    ///
    /// # Errors
    ///
    /// `Config`/`ChannelMismatch`/`DimensionMismatch` on contract
    /// violations, plus whatever the backend surfaces while preparing
    /// requests.
    pub fn new(
        mut model: Box<dyn Model>,
        params: &InferParams,
        format: PixelFormat,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        params.validate()?;

        let in_desc = model.input_desc(&params.input_name)?;
        check_model_input(&in_desc, format, width, height)?;
        model.set_input_geometry(width, height)?;

        let async_mode = params.async_infer && model.supports_async();
        if params.async_infer && !model.supports_async() {
            warn!("backend does not support async inference, falling back to sync");
        }

        let batch_size = if async_mode { params.batch_size } else { 1 };
        if batch_size > 1 {
            model.reshape_batch(batch_size)?;
        }

        let out_desc = model.output_desc(&params.output_name)?;
        let (out_width, out_height) = if !out_desc.is_dynamic() {
            (out_desc.width() as u32, out_desc.height() as u32)
        } else {
            dry_run_output_size(model.as_ref(), &params.input_name, &params.output_name)?
        };

        let transcoder = Transcoder::configure(format, width, height, out_width, out_height);

        let pool = SlotQueue::with_capacity(params.nireq);
        let mode = if async_mode {
            for _ in 0..params.nireq {
                pool.push(RequestSlot::new(model.new_request()?, batch_size));
            }
            ExecMode::Async { batch_size }
        } else {
            ExecMode::Sync {
                request: Mutex::new(model.new_request()?),
            }
        };

        info!(
            backend = %params.backend,
            async_infer = async_mode,
            nireq = params.nireq,
            batch_size,
            out_width,
            out_height,
            "inference engine configured"
        );

        Ok(Self {
            mode,
            shared: Arc::new(Shared {
                transcoder,
                output_name: params.output_name.clone(),
                state: Mutex::new(EngineState {
                    pending: VecDeque::new(),
                    inflight: InflightQueue::new(),
                    processed: VecDeque::new(),
                }),
                callback_mutex: Mutex::new(()),
                pool,
                metrics: EngineMetrics::default(),
            }),
            input_name: params.input_name.clone(),
            out_width,
            out_height,
            _model: model,
        })
    }

    /// Output frame geometry negotiated for this stream.
    pub fn output_size(&self) -> (u32, u32) {
        (self.out_width, self.out_height)
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.shared.metrics
    }

    /// Free request slots (async mode); equals `nireq` when idle.
    pub fn idle_requests(&self) -> usize {
        self.shared.pool.len()
    }

    /// Accept one frame and return immediately.  In async mode the frame is
    /// packed into the head slot when one is free; with every slot
    /// dispatched it joins the submission-ordered backlog instead of
    /// blocking the caller.
    pub fn submit(&self, frame: VideoFrame) -> Result<()> {
        match &self.mode {
            ExecMode::Sync { request } => self.submit_sync(request, frame),
            ExecMode::Async { batch_size } => self.submit_async(*batch_size, frame),
        }
    }

    fn submit_sync(&self, request: &Mutex<Box<dyn InferRequest>>, frame: VideoFrame) -> Result<()> {
        let mut request = request.lock().unwrap();
        {
            let mut input = request.input(&self.input_name)?;
            self.shared.transcoder.preproc(&frame, input.batch_member_mut(0))?;
        }
        self.shared
            .metrics
            .frames_submitted
            .fetch_add(1, Ordering::AcqRel);

        let outcome = match request.execute_sync() {
            Ok(()) => {
                let view = request.output(&self.shared.output_name)?;
                self.shared.transcoder.postproc(view.batch_member(0), &frame)
            }
            Err(err) => Err(err),
        };
        if let Err(err) = &outcome {
            warn!(pts = frame.pts, code = err.error_code(), error = %err, "inference failed");
        }

        let mut state = self.shared.state.lock().unwrap();
        state.processed.push_back(ProcessedFrame {
            pts: frame.pts,
            result: outcome,
        });
        drop(state);
        self.shared
            .metrics
            .frames_completed
            .fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn submit_async(&self, batch_size: usize, frame: VideoFrame) -> Result<()> {
        self.shared.state.lock().unwrap().pending.push_back(frame);
        self.shared
            .metrics
            .frames_submitted
            .fetch_add(1, Ordering::AcqRel);
        self.pump_pending(batch_size);
        Ok(())
    }

    /// Pack backlog frames into free slots, dispatching every slot that
    /// fills up.  Runs only on the filter thread, so the backlog drains in
    /// submission order; never waits for a slot.
    fn pump_pending(&self, batch_size: usize) {
        loop {
            if self.shared.state.lock().unwrap().pending.is_empty() {
                return;
            }
            let Some(mut slot) = self.shared.pool.try_pop() else {
                return;
            };
            while slot.entries.len() < batch_size {
                let next = self.shared.state.lock().unwrap().pending.pop_front();
                match next {
                    Some(frame) => self.pack_frame(&mut slot, frame),
                    None => break,
                }
            }
            if slot.entries.len() == batch_size {
                Shared::dispatch(&self.shared, slot);
            } else {
                // Partial batch stays at the head for the next submit.
                self.shared.pool.push_front(slot);
                return;
            }
        }
    }

    /// Preprocess one frame into the slot's next packed-entry buffer and
    /// append its in-flight entry.  A preproc failure completes the entry
    /// on the spot so the frame surfaces as dropped at its position.
    fn pack_frame(&self, slot: &mut RequestSlot, frame: VideoFrame) {
        let index = slot.entries.len();
        let preprocessed = (|| {
            let mut input = slot.request.input(&self.input_name)?;
            self.shared.transcoder.preproc(&frame, input.batch_member_mut(index))
        })();

        let entry = InflightEntry::new(frame);
        let in_flight = {
            let mut state = self.shared.state.lock().unwrap();
            state.inflight.append(Arc::clone(&entry));
            state.inflight.len()
        };

        match preprocessed {
            Ok(()) => {
                debug!(pts = entry.pts(), in_flight, packed = index + 1, "frame packed");
                slot.entries.push(entry);
                slot.ensure_output_name(&self.shared.output_name);
            }
            Err(err) => {
                warn!(pts = entry.pts(), code = err.error_code(), error = %err,
                    "preproc failed");
                entry.complete(Err(err));
                self.shared
                    .metrics
                    .frames_completed
                    .fetch_add(1, Ordering::AcqRel);
            }
        }
    }

    /// Deliver the oldest finished frame, if any.  Never waits.
    pub fn poll(&self) -> PollStatus {
        if let ExecMode::Async { batch_size } = self.mode {
            self.pump_pending(batch_size);
        }
        let mut state = self.shared.state.lock().unwrap();
        state.promote_ready();
        if let Some(processed) = state.processed.pop_front() {
            drop(state);
            return match processed.result {
                Ok(frame) => {
                    self.shared
                        .metrics
                        .frames_delivered
                        .fetch_add(1, Ordering::AcqRel);
                    PollStatus::Ready(frame)
                }
                Err(error) => {
                    self.shared
                        .metrics
                        .frames_dropped
                        .fetch_add(1, Ordering::AcqRel);
                    PollStatus::Dropped {
                        pts: processed.pts,
                        error,
                    }
                }
            };
        }
        if state.inflight.is_empty() && state.pending.is_empty() {
            PollStatus::Empty
        } else {
            PollStatus::NotReady
        }
    }

    /// Drain the backlog, dispatch the partially filled head slot, then
    /// wait until every outstanding callback has fired.  Finished frames
    /// stay queued for `poll`.  Idempotent.
    pub fn flush(&self) {
        if let ExecMode::Async { batch_size } = self.mode {
            loop {
                self.pump_pending(batch_size);
                if let Some(slot) = self.shared.pool.try_pop() {
                    if slot.entries.is_empty() {
                        self.shared.pool.push_front(slot);
                    } else {
                        debug!(frames = slot.entries.len(), "flushing partial batch");
                        Shared::dispatch(&self.shared, slot);
                    }
                }
                {
                    let mut state = self.shared.state.lock().unwrap();
                    state.promote_ready();
                    if state.inflight.is_empty() && state.pending.is_empty() {
                        break;
                    }
                }
                thread::sleep(FLUSH_BACKOFF);
            }
        }
    }

    /// `true` when nothing is queued, in flight, or waiting to be polled.
    pub fn is_empty(&self) -> bool {
        let mut state = self.shared.state.lock().unwrap();
        state.promote_ready();
        state.pending.is_empty() && state.inflight.is_empty() && state.processed.is_empty()
    }
}

/// Resolve the output geometry of a model whose descriptor leaves it
/// dynamic: run one inference on a zeroed input and read the produced
/// descriptor back.
fn dry_run_output_size(model: &dyn Model, input_name: &str, output_name: &str) -> Result<(u32, u32)> {
    let mut request = model.new_request()?;
    // Touch the input so backends that bind lazily have a buffer.
    request.input(input_name)?;
    request.execute_sync()?;
    let view = request.output(output_name)?;
    let (h, w) = (view.desc.height(), view.desc.width());
    if h <= 0 || w <= 0 {
        return Err(InferError::ModelLoad(format!(
            "model reported output geometry {w}x{h} after a dry run"
        )));
    }
    Ok((w as u32, h as u32))
}
