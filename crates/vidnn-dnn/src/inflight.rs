//! Ordered in-flight bookkeeping.
//!
//! One [`InflightEntry`] exists per submitted frame until it is polled.
//! Entries are appended in submission order and only ever removed from the
//! head, once their `done` flag is set — completions arriving out of order
//! wait behind the oldest pending entry.
//!
//! The `done` flag has exactly one writer (the completion callback thread
//! that owns the entry's request slot) and is read under the engine's state
//! mutex by the filter thread.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use vidnn_core::{InferError, Result, VideoFrame};

/// Bookkeeping record linking a submitted input frame to its pending output.
pub(crate) struct InflightEntry {
    input: VideoFrame,
    done: AtomicBool,
    outcome: Mutex<Option<Result<VideoFrame>>>,
}

impl InflightEntry {
    pub fn new(input: VideoFrame) -> Arc<Self> {
        Arc::new(Self {
            input,
            done: AtomicBool::new(false),
            outcome: Mutex::new(None),
        })
    }

    /// The submitted frame.  Stays alive until the entry is drained so the
    /// postproc path can copy timestamps, metadata and chroma planes.
    pub fn input(&self) -> &VideoFrame {
        &self.input
    }

    pub fn pts(&self) -> i64 {
        self.input.pts
    }

    /// Record the inference outcome and publish the entry as finished.
    ///
    /// Called exactly once, from the thread completing the entry's request.
    pub fn complete(&self, outcome: Result<VideoFrame>) {
        *self.outcome.lock().unwrap() = Some(outcome);
        self.done.store(true, Ordering::Release);
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Take the recorded outcome after the entry was drained.
    pub fn take_outcome(&self) -> Result<VideoFrame> {
        self.outcome.lock().unwrap().take().unwrap_or_else(|| {
            Err(InferError::Resource(
                "in-flight entry drained without a recorded outcome".into(),
            ))
        })
    }
}

/// Submission-ordered list of in-flight entries.
///
/// Not internally locked: the engine guards it with the shared state mutex.
#[derive(Default)]
pub(crate) struct InflightQueue {
    entries: VecDeque<Arc<InflightEntry>>,
}

impl InflightQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, entry: Arc<InflightEntry>) {
        self.entries.push_back(entry);
    }

    /// Pop the head entry if it has finished.
    pub fn pop_ready(&mut self) -> Option<Arc<InflightEntry>> {
        if self.entries.front().is_some_and(|e| e.is_done()) {
            self.entries.pop_front()
        } else {
            None
        }
    }

    /// Pop every finished entry from the head, stopping at the first one
    /// still pending.
    pub fn drain_ready(&mut self) -> Vec<Arc<InflightEntry>> {
        let mut ready = Vec::new();
        while let Some(entry) = self.pop_ready() {
            ready.push(entry);
        }
        ready
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
