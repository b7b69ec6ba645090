//! Shared leaf types for the vidnn filter stage.
//!
//! These types cross every crate boundary in the workspace: the error
//! taxonomy, the host-side frame representation, the tensor descriptor
//! contract between the engine and inference backends, and the stage
//! parameter set.

pub mod error;
pub mod frame;
pub mod params;
pub mod tensor;

pub use error::{InferError, Result};
pub use frame::{PixelFormat, VideoFrame};
pub use params::{BackendKind, InferParams};
pub use tensor::{
    DataType, TensorBuffer, TensorData, TensorDataMut, TensorDesc, TensorLayout, TensorView,
    TensorViewMut,
};
