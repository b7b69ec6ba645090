//! Inference core of the vidnn filter stage.
//!
//! # Architecture
//!
//! ```text
//!                 submit(frame)                          poll() → frame
//!                      │                                       ▲
//!                      ▼                                       │
//! ┌──────────┐   ┌───────────┐  batch full   ┌─────────┐  ┌─────────────┐
//! │ Transcode │──▶│ head slot │──────────────▶│ backend │─▶│ ordered     │
//! │ (preproc) │   │ (filling) │ execute_async │ worker  │  │ in-flight   │
//! └──────────┘   └───────────┘               │ thread  │  │ drain       │
//!        ▲            ▲  │ partial            └─────────┘  └─────────────┘
//!        │            │  ▼                        │ postproc + done
//!        │       ┌──────────────┐                 ▼
//!        └───────│  slot FIFO   │◀────────── slot returned
//!                └──────────────┘
//! ```
//!
//! Two thread classes touch this state: the pipeline's filter thread
//! (submit / poll / flush) and the backend's completion worker threads.
//! Output order always equals submission order — the ordered in-flight
//! list releases entries from its head only, regardless of the order in
//! which the backend completes requests.

pub mod backend;
pub mod engine;
pub mod fifo;
mod inflight;
pub mod ioproc;
mod request;
pub mod scale;

pub use backend::{load_model, CompletionCallback, DispatchError, InferRequest, Model};
pub use engine::{EngineMetrics, InferenceEngine, PollStatus};
pub use ioproc::Transcoder;
pub use scale::BicubicScaler;
