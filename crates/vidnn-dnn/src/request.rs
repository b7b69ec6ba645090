//! Request slots — the unit the pool hands out.
//!
//! A slot is in exactly one place at any time: the free FIFO, the filter
//! thread (filling), or a backend completion closure (dispatched).  The
//! state transitions are ownership moves, so a slot can never be touched
//! from two places at once.

use std::sync::Arc;

use crate::backend::InferRequest;
use crate::inflight::InflightEntry;

pub(crate) struct RequestSlot {
    /// The backend request this slot wraps.
    pub request: Box<dyn InferRequest>,
    /// Output tensor name, captured on the slot's first dispatch.
    pub output_name: Option<String>,
    /// Entries packed into the pending batch, in submission order.
    /// `entries.len()` is the packed counter; cleared before the slot
    /// returns to the pool.
    pub entries: Vec<Arc<InflightEntry>>,
}

impl RequestSlot {
    pub fn new(request: Box<dyn InferRequest>, batch_size: usize) -> Self {
        Self {
            request,
            output_name: None,
            entries: Vec::with_capacity(batch_size),
        }
    }

    pub fn ensure_output_name(&mut self, name: &str) {
        if self.output_name.is_none() {
            self.output_name = Some(name.to_owned());
        }
    }
}
