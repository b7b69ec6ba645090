//! Filter stage adapter.
//!
//! Implements the upstream/downstream edge protocol around the inference
//! engine: drain every available input frame into `submit`, forward every
//! finished frame downstream in submission order, and on end-of-stream
//! flush the engine exactly once and propagate the signal with the last
//! produced timestamp.

pub mod stage;

pub use stage::{FrameSink, FrameSource, ProcessingStage, SourceEvent, StageStatus};
