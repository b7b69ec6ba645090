//! Stage parameters and backend selection.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::{InferError, Result};

/// Upper bound on the request pool size.
pub const MAX_NIREQ: usize = 128;
/// Upper bound on frames packed into one inference request.
pub const MAX_BATCH_SIZE: usize = 1000;

/// Which inference backend executes the model.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Built-in pure-Rust executor for the native model description.
    #[default]
    Native,
    /// TensorFlow runtime (not compiled into this build).
    TensorFlow,
    /// OpenVINO runtime (not compiled into this build).
    OpenVino,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Native => "native",
            Self::TensorFlow => "tensorflow",
            Self::OpenVino => "openvino",
        };
        f.write_str(name)
    }
}

impl FromStr for BackendKind {
    type Err = InferError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "native" => Ok(Self::Native),
            "tensorflow" => Ok(Self::TensorFlow),
            "openvino" => Ok(Self::OpenVino),
            other => Err(InferError::Config(format!(
                "unknown dnn backend \"{other}\" (expected native, tensorflow or openvino)"
            ))),
        }
    }
}

/// Per-stream stage configuration.
///
/// `nireq` and `batch_size` multiply: the stage keeps up to
/// `nireq × batch_size` frames in flight in asynchronous mode.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InferParams {
    /// Backend variant executing the model.
    #[serde(default)]
    pub backend: BackendKind,

    /// Filesystem path to the model file.
    pub model: PathBuf,

    /// Name of the model's input tensor.
    #[serde(rename = "input")]
    pub input_name: String,

    /// Name of the model's output tensor.
    #[serde(rename = "output")]
    pub output_name: String,

    /// Enable asynchronous batched inference through the request pool.
    ///
    /// Falls back to synchronous mode when the backend cannot execute
    /// asynchronously.
    #[serde(rename = "async", default)]
    pub async_infer: bool,

    /// Number of request slots in the pool, 1–128.
    #[serde(default = "default_one")]
    pub nireq: usize,

    /// Frames packed into one inference request, 1–1000.
    #[serde(default = "default_one")]
    pub batch_size: usize,

    /// Backend-specific option string, `key=value` pairs joined by `&`.
    #[serde(default)]
    pub backend_options: String,
}

fn default_one() -> usize {
    1
}

impl InferParams {
    /// Minimal parameter set with defaults for everything optional.
    pub fn new(
        model: impl Into<PathBuf>,
        input_name: impl Into<String>,
        output_name: impl Into<String>,
    ) -> Self {
        Self {
            backend: BackendKind::Native,
            model: model.into(),
            input_name: input_name.into(),
            output_name: output_name.into(),
            async_infer: false,
            nireq: 1,
            batch_size: 1,
            backend_options: String::new(),
        }
    }

    /// Reject missing required options and out-of-range pool sizes.
    pub fn validate(&self) -> Result<()> {
        if self.model.as_os_str().is_empty() {
            return Err(InferError::Config(
                "model file for the network is not specified".into(),
            ));
        }
        if self.input_name.is_empty() {
            return Err(InferError::Config(
                "input name of the model network is not specified".into(),
            ));
        }
        if self.output_name.is_empty() {
            return Err(InferError::Config(
                "output name of the model network is not specified".into(),
            ));
        }
        if self.nireq == 0 || self.nireq > MAX_NIREQ {
            return Err(InferError::Config(format!(
                "nireq {} out of range 1..={MAX_NIREQ}",
                self.nireq
            )));
        }
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(InferError::Config(format!(
                "batch_size {} out of range 1..={MAX_BATCH_SIZE}",
                self.batch_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_out_of_range_pool_sizes() {
        let mut params = InferParams::new("m.json", "x", "y");
        params.nireq = 0;
        assert!(params.validate().is_err());
        params.nireq = 129;
        assert!(params.validate().is_err());
        params.nireq = 128;
        params.batch_size = 1001;
        assert!(params.validate().is_err());
        params.batch_size = 1000;
        assert!(params.validate().is_ok());
    }

    #[test]
    fn validate_requires_model_and_tensor_names() {
        assert!(InferParams::new("", "x", "y").validate().is_err());
        assert!(InferParams::new("m.json", "", "y").validate().is_err());
        assert!(InferParams::new("m.json", "x", "").validate().is_err());
    }

    #[test]
    fn deserializes_from_stage_option_json() {
        let params: InferParams = serde_json::from_str(
            r#"{
                "backend": "native",
                "model": "espcn.json",
                "input": "x",
                "output": "y",
                "async": true,
                "nireq": 2,
                "batch_size": 4
            }"#,
        )
        .unwrap();
        assert_eq!(params.backend, BackendKind::Native);
        assert!(params.async_infer);
        assert_eq!(params.nireq, 2);
        assert_eq!(params.batch_size, 4);
        assert_eq!(params.input_name, "x");
    }

    #[test]
    fn backend_kind_parses_known_names_only() {
        assert_eq!("openvino".parse::<BackendKind>().unwrap(), BackendKind::OpenVino);
        assert!("onnx".parse::<BackendKind>().is_err());
    }
}
