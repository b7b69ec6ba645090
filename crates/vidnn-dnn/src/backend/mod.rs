//! Backend abstraction — the contract the engine requires from a model
//! runtime.
//!
//! The original function-pointer module table becomes two traits: a
//! [`Model`] handle (descriptor queries, one-time batch reshape, request
//! construction) and an [`InferRequest`] (tensor views plus execution).
//! Asynchronous dispatch moves the boxed request into the backend; the
//! completion callback hands it back exactly once, on some worker thread,
//! with the request's output tensors readable until the callback returns
//! the request to the pool.
//!
//! Backend variants mirror the build-time gating of their runtimes: the
//! native executor is always available, TensorFlow and OpenVINO report a
//! load error when their support is not compiled into this build.

pub mod native;

use std::path::Path;

use vidnn_core::{BackendKind, InferError, Result, TensorDesc, TensorView, TensorViewMut};

/// Invoked exactly once per asynchronous dispatch, on a backend worker
/// thread, with the request handed back and the execution outcome.
pub type CompletionCallback = Box<dyn FnOnce(Box<dyn InferRequest>, Result<()>) + Send + 'static>;

/// Failed asynchronous dispatch.  The request comes back to the caller so
/// its slot can return to the pool.
pub struct DispatchError {
    pub request: Box<dyn InferRequest>,
    pub error: InferError,
}

/// A loaded model.
pub trait Model: Send {
    /// Descriptor of the named input tensor.
    fn input_desc(&self, name: &str) -> Result<TensorDesc>;

    /// Descriptor of the named output tensor.
    fn output_desc(&self, name: &str) -> Result<TensorDesc>;

    /// Pin the spatial geometry of a model that declares dynamic input
    /// dimensions.  Called once at stage configuration, before any request
    /// exists.  Models with fixed geometry verify the dimensions match.
    fn set_input_geometry(&mut self, width: u32, height: u32) -> Result<()>;

    /// Reshape the batch dimension.  Happens at most once, at configuration.
    fn reshape_batch(&mut self, batch_size: usize) -> Result<()>;

    /// Whether [`InferRequest::execute_async`] is available.
    fn supports_async(&self) -> bool {
        false
    }

    /// Allocate one inference request with buffers matching the current
    /// descriptors.
    fn new_request(&self) -> Result<Box<dyn InferRequest>>;
}

/// One backend inference request and its tensor buffers.
pub trait InferRequest: Send {
    /// Mutable view of the named input tensor buffer.
    fn input(&mut self, name: &str) -> Result<TensorViewMut<'_>>;

    /// View of the named output tensor buffer.  Valid contents after a
    /// successful execution.
    fn output(&mut self, name: &str) -> Result<TensorView<'_>>;

    /// Run inference on the calling thread.
    fn execute_sync(&mut self) -> Result<()>;

    /// Run inference on a backend worker thread, invoking `done` exactly
    /// once when the request finishes.
    ///
    /// Backends that do not report [`Model::supports_async`] should reject
    /// the dispatch, handing the request back via [`DispatchError`].
    fn execute_async(
        self: Box<Self>,
        done: CompletionCallback,
    ) -> std::result::Result<(), DispatchError>;
}

/// Load a model through the selected backend.
pub fn load_model(kind: BackendKind, path: &Path, options: &str) -> Result<Box<dyn Model>> {
    match kind {
        BackendKind::Native => Ok(Box::new(native::NativeModel::load(path, options)?)),
        BackendKind::TensorFlow => Err(InferError::ModelLoad(
            "TensorFlow backend support is not compiled into this build".into(),
        )),
        BackendKind::OpenVino => Err(InferError::ModelLoad(
            "OpenVINO backend support is not compiled into this build".into(),
        )),
    }
}

/// Split a backend option string (`key=value` pairs joined by `&`).
pub fn parse_backend_options(options: &str) -> Result<Vec<(&str, &str)>> {
    options
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            pair.split_once('=').ok_or_else(|| {
                InferError::Config(format!("failed to parse backend option \"{pair}\""))
            })
        })
        .collect()
}
