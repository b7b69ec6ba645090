//! Built-in pure-Rust backend.
//!
//! Executes a small JSON-described model: one input, one output, and a
//! pipeline of element-wise / resampling ops.  Exists so the stage runs
//! end-to-end without an external inference runtime; synchronous execution
//! only.
//!
//! ```json
//! {
//!   "name": "double",
//!   "input": { "name": "x", "data_type": "float32", "channels": 1 },
//!   "output": { "name": "y" },
//!   "ops": [ { "op": "upsample", "factor": 2 } ]
//! }
//! ```
//!
//! Omitted `height`/`width` declare dynamic geometry, pinned at stage
//! configuration.

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use vidnn_core::{
    DataType, InferError, Result, TensorBuffer, TensorDesc, TensorLayout, TensorView,
    TensorViewMut,
};

use super::{CompletionCallback, DispatchError, InferRequest, Model};

#[derive(Debug, Deserialize)]
struct GraphFile {
    #[serde(default)]
    name: Option<String>,
    input: InputDecl,
    output: OutputDecl,
    #[serde(default)]
    ops: Vec<Op>,
}

#[derive(Debug, Deserialize)]
struct InputDecl {
    name: String,
    data_type: DataType,
    channels: i64,
    #[serde(default = "dynamic_dim")]
    height: i64,
    #[serde(default = "dynamic_dim")]
    width: i64,
}

fn dynamic_dim() -> i64 {
    -1
}

#[derive(Debug, Deserialize)]
struct OutputDecl {
    name: String,
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Op {
    /// Pass the tensor through unchanged.
    Identity,
    /// Multiply every element by a constant.
    Gain { factor: f32 },
    /// Nearest-neighbour spatial upsampling by an integer factor.
    Upsample { factor: u32 },
    /// Clamp every element into `[min, max]`.
    Clip { min: f32, max: f32 },
}

struct NativeGraph {
    input_name: String,
    output_name: String,
    ops: Vec<Op>,
}

impl NativeGraph {
    /// Combined spatial factor of all upsampling ops.
    fn spatial_factor(&self) -> i64 {
        self.ops
            .iter()
            .map(|op| match op {
                Op::Upsample { factor } => *factor as i64,
                _ => 1,
            })
            .product()
    }
}

/// Model handle for the native executor.
pub struct NativeModel {
    graph: Arc<NativeGraph>,
    input_desc: TensorDesc,
}

impl NativeModel {
    /// Read and validate a model description file.
    pub fn load(path: &Path, options: &str) -> Result<Self> {
        if let Some((key, _)) = super::parse_backend_options(options)?.first() {
            return Err(InferError::Config(format!(
                "backend option \"{key}\" is not recognized by the native backend"
            )));
        }

        let text = std::fs::read_to_string(path).map_err(|err| {
            InferError::ModelLoad(format!("failed to read {}: {err}", path.display()))
        })?;
        let file: GraphFile = serde_json::from_str(&text).map_err(|err| {
            InferError::ModelLoad(format!("failed to parse {}: {err}", path.display()))
        })?;

        if file.input.channels < 1 {
            return Err(InferError::ModelLoad(format!(
                "model input declares {} channels",
                file.input.channels
            )));
        }
        for op in &file.ops {
            if let Op::Upsample { factor: 0 } = op {
                return Err(InferError::ModelLoad("upsample factor must be ≥ 1".into()));
            }
        }

        let input_desc = TensorDesc::new(
            file.input.data_type,
            TensorLayout::Nhwc,
            [1, file.input.channels, file.input.height, file.input.width],
        );
        debug!(
            model = %file.name.as_deref().unwrap_or("unnamed"),
            ops = file.ops.len(),
            input = %file.input.name,
            output = %file.output.name,
            "loaded native model"
        );

        Ok(Self {
            graph: Arc::new(NativeGraph {
                input_name: file.input.name,
                output_name: file.output.name,
                ops: file.ops,
            }),
            input_desc,
        })
    }

    fn check_input_name(&self, name: &str) -> Result<()> {
        if name == self.graph.input_name {
            Ok(())
        } else {
            Err(InferError::Config(format!(
                "could not find \"{name}\" in model, the input is \"{}\"",
                self.graph.input_name
            )))
        }
    }

    fn check_output_name(&self, name: &str) -> Result<()> {
        if name == self.graph.output_name {
            Ok(())
        } else {
            Err(InferError::Config(format!(
                "could not find \"{name}\" in model, the output is \"{}\"",
                self.graph.output_name
            )))
        }
    }

    fn derived_output_desc(&self) -> TensorDesc {
        let factor = self.graph.spatial_factor();
        let mut desc = self.input_desc;
        if desc.shape[2] > 0 {
            desc.shape[2] *= factor;
        }
        if desc.shape[3] > 0 {
            desc.shape[3] *= factor;
        }
        desc
    }
}

impl Model for NativeModel {
    fn input_desc(&self, name: &str) -> Result<TensorDesc> {
        self.check_input_name(name)?;
        Ok(self.input_desc)
    }

    fn output_desc(&self, name: &str) -> Result<TensorDesc> {
        self.check_output_name(name)?;
        Ok(self.derived_output_desc())
    }

    fn set_input_geometry(&mut self, width: u32, height: u32) -> Result<()> {
        let (h, w) = (self.input_desc.height(), self.input_desc.width());
        if h >= 0 && h != height as i64 {
            return Err(InferError::DimensionMismatch(format!(
                "the model requires frame height {h} but got {height}"
            )));
        }
        if w >= 0 && w != width as i64 {
            return Err(InferError::DimensionMismatch(format!(
                "the model requires frame width {w} but got {width}"
            )));
        }
        self.input_desc = self.input_desc.with_spatial(height, width);
        Ok(())
    }

    fn reshape_batch(&mut self, batch_size: usize) -> Result<()> {
        self.input_desc = self.input_desc.with_batch(batch_size);
        Ok(())
    }

    fn new_request(&self) -> Result<Box<dyn InferRequest>> {
        if self.input_desc.is_dynamic() {
            return Err(InferError::Config(
                "model input geometry is not pinned".into(),
            ));
        }
        let output_desc = self.derived_output_desc();
        Ok(Box::new(NativeRequest {
            graph: Arc::clone(&self.graph),
            input: TensorBuffer::zeroed(&self.input_desc),
            output: TensorBuffer::zeroed(&output_desc),
            input_desc: self.input_desc,
            output_desc,
        }))
    }
}

struct NativeRequest {
    graph: Arc<NativeGraph>,
    input: TensorBuffer,
    output: TensorBuffer,
    input_desc: TensorDesc,
    output_desc: TensorDesc,
}

impl NativeRequest {
    /// Run the op pipeline over one batch member.
    fn run_member(&mut self, member: usize) -> Result<()> {
        let in_fe = self.input_desc.frame_elements();
        let out_fe = self.output_desc.frame_elements();

        // Work in f32, whatever the tensor element type.
        let mut data: Vec<f32> = match &self.input {
            TensorBuffer::F32(v) => v[member * in_fe..(member + 1) * in_fe].to_vec(),
            TensorBuffer::U8(v) => v[member * in_fe..(member + 1) * in_fe]
                .iter()
                .map(|&b| b as f32)
                .collect(),
        };

        let channels = self.input_desc.channels();
        let mut height = self.input_desc.height() as usize;
        let mut width = self.input_desc.width() as usize;

        for op in &self.graph.ops {
            match *op {
                Op::Identity => {}
                Op::Gain { factor } => {
                    for v in &mut data {
                        *v *= factor;
                    }
                }
                Op::Clip { min, max } => {
                    for v in &mut data {
                        *v = v.clamp(min, max);
                    }
                }
                Op::Upsample { factor } => {
                    let f = factor as usize;
                    let (dst_h, dst_w) = (height * f, width * f);
                    let mut scaled = vec![0.0f32; dst_h * dst_w * channels];
                    for y in 0..dst_h {
                        for x in 0..dst_w {
                            let src = ((y / f) * width + x / f) * channels;
                            let dst = (y * dst_w + x) * channels;
                            scaled[dst..dst + channels]
                                .copy_from_slice(&data[src..src + channels]);
                        }
                    }
                    data = scaled;
                    height = dst_h;
                    width = dst_w;
                }
            }
        }

        if data.len() != out_fe {
            return Err(InferError::Execution(format!(
                "op pipeline produced {} elements, output tensor holds {out_fe}",
                data.len()
            )));
        }

        match &mut self.output {
            TensorBuffer::F32(v) => {
                v[member * out_fe..(member + 1) * out_fe].copy_from_slice(&data);
            }
            TensorBuffer::U8(v) => {
                let dst = &mut v[member * out_fe..(member + 1) * out_fe];
                for (d, s) in dst.iter_mut().zip(&data) {
                    *d = s.round().clamp(0.0, 255.0) as u8;
                }
            }
        }
        Ok(())
    }
}

impl InferRequest for NativeRequest {
    fn input(&mut self, name: &str) -> Result<TensorViewMut<'_>> {
        if name != self.graph.input_name {
            return Err(InferError::Config(format!(
                "could not find \"{name}\" in model, the input is \"{}\"",
                self.graph.input_name
            )));
        }
        Ok(self.input.view_mut(self.input_desc))
    }

    fn output(&mut self, name: &str) -> Result<TensorView<'_>> {
        if name != self.graph.output_name {
            return Err(InferError::Config(format!(
                "could not find \"{name}\" in model, the output is \"{}\"",
                self.graph.output_name
            )));
        }
        Ok(self.output.view(self.output_desc))
    }

    fn execute_sync(&mut self) -> Result<()> {
        for member in 0..self.input_desc.batch() {
            self.run_member(member)?;
        }
        Ok(())
    }

    fn execute_async(
        self: Box<Self>,
        done: CompletionCallback,
    ) -> std::result::Result<(), DispatchError> {
        drop(done);
        Err(DispatchError {
            error: InferError::Execution(
                "asynchronous execution is not supported by this backend".into(),
            ),
            request: self,
        })
    }
}
