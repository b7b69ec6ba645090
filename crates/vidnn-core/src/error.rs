//! Typed error hierarchy for the filter stage.
//!
//! One [`InferError`] enum covers every failure the stage can surface, and
//! every fallible API in the workspace returns the [`Result`] alias defined
//! here.  [`InferError::is_recoverable`] separates per-frame drops from
//! stream-fatal failures.
//!
//! # Error codes
//!
//! Each variant maps to a stable integer code via [`InferError::error_code`]
//! for structured telemetry without string parsing.

use crate::frame::PixelFormat;

/// All errors originating from the vidnn filter stage.
#[derive(Clone, Debug, thiserror::Error)]
pub enum InferError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Frame format {format:?} does not match the model input channel count {channels}")]
    ChannelMismatch { format: PixelFormat, channels: usize },

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    // ── Backend ──────────────────────────────────────────────────────
    #[error("Model load error: {0}")]
    ModelLoad(String),

    #[error("Inference execution error: {0}")]
    Execution(String),

    // ── Resources ────────────────────────────────────────────────────
    #[error("Resource error: {0}")]
    Resource(String),

    // ── Lifecycle ────────────────────────────────────────────────────
    #[error("Operation on a stage that has already shut down")]
    Shutdown,
}

impl InferError {
    /// Stable integer error code for structured telemetry.
    ///
    /// Codes are grouped by category:
    /// - 1xx: configuration / negotiation
    /// - 2xx: model loading
    /// - 3xx: inference execution
    /// - 4xx: resources
    /// - 5xx: lifecycle
    pub fn error_code(&self) -> u32 {
        match self {
            Self::Config(_) => 100,
            Self::ChannelMismatch { .. } => 101,
            Self::DimensionMismatch(_) => 102,
            Self::ModelLoad(_) => 200,
            Self::Execution(_) => 300,
            Self::Resource(_) => 400,
            Self::Shutdown => 500,
        }
    }

    /// Whether the stream can continue after this error.
    ///
    /// Execution errors drop the affected frames and keep the stream alive;
    /// everything else fails the stage.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Execution(_))
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, InferError>;
