//! vidnn CLI entrypoint.
//!
//! ```bash
//! vidnn process --input in.raw --output out.raw --size 320x240 --format gray8 \
//!     --model model.json --model-input x --model-output y
//! vidnn probe --model model.json --json
//! ```
//!
//! `process` runs raw planar frames through the filter stage; `probe`
//! reports a model's tensor descriptors.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use vidnn_core::{BackendKind, DataType, InferError, InferParams, PixelFormat, Result, TensorLayout, VideoFrame};
use vidnn_dnn::load_model;
use vidnn_filter::{FrameSink, FrameSource, ProcessingStage, SourceEvent, StageStatus};

#[derive(Parser, Debug)]
#[command(
    name = "vidnn",
    version,
    about = "DNN video filter stage",
    arg_required_else_help = true,
    after_help = "Examples:\n  vidnn probe --model espcn.json --json\n  vidnn process -i in.raw -o out.raw --size 320x240 --format gray8 --model espcn.json"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run raw planar video through the filter stage.
    Process(ProcessArgs),
    /// Report a model's input/output tensor descriptors.
    Probe(ProbeArgs),
}

#[derive(Args, Debug)]
struct ModelArgs {
    /// Model description file.
    #[arg(short = 'm', long)]
    model: PathBuf,

    /// Backend variant: native, tensorflow or openvino.
    #[arg(long, default_value = "native")]
    backend: String,

    /// Name of the model's input tensor.
    #[arg(long = "model-input", default_value = "x")]
    model_input: String,

    /// Name of the model's output tensor.
    #[arg(long = "model-output", default_value = "y")]
    model_output: String,

    /// Backend option string, key=value pairs joined by '&'.
    #[arg(long = "backend-options", default_value = "")]
    backend_options: String,
}

#[derive(Args, Debug)]
struct ProcessArgs {
    /// Raw planar input file.
    #[arg(short = 'i', long)]
    input: PathBuf,

    /// Raw planar output file.
    #[arg(short = 'o', long)]
    output: PathBuf,

    /// Frame geometry, e.g. 320x240.
    #[arg(long)]
    size: String,

    /// Input pixel format.
    #[arg(long, default_value = "gray8")]
    format: String,

    #[command(flatten)]
    model: ModelArgs,

    /// Enable asynchronous batched inference.
    #[arg(long = "async")]
    async_infer: bool,

    /// Request pool size (async mode).
    #[arg(long, default_value_t = 1)]
    nireq: usize,

    /// Frames per inference request (async mode).
    #[arg(long, default_value_t = 1)]
    batch_size: usize,
}

#[derive(Args, Debug)]
struct ProbeArgs {
    #[command(flatten)]
    model: ModelArgs,

    /// Emit the report as JSON on stdout.
    #[arg(long)]
    json: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Process(args) => run_process(args),
        Commands::Probe(args) => run_probe(args),
    };
    if let Err(err) = result {
        eprintln!("vidnn: {err}");
        std::process::exit(1);
    }
}

fn parse_size(size: &str) -> Result<(u32, u32)> {
    size.split_once('x')
        .and_then(|(w, h)| Some((w.parse().ok()?, h.parse().ok()?)))
        .filter(|&(w, h)| w > 0 && h > 0)
        .ok_or_else(|| {
            InferError::Config(format!("invalid --size \"{size}\", expected WIDTHxHEIGHT"))
        })
}

// ─── process ────────────────────────────────────────────────────────────────

/// Reads densely packed frames from a raw planar file.
struct RawFileSource {
    reader: BufReader<File>,
    format: PixelFormat,
    width: u32,
    height: u32,
    frames_read: i64,
}

impl FrameSource for RawFileSource {
    fn pull(&mut self) -> Result<SourceEvent> {
        let mut frame = VideoFrame::alloc(self.format, self.width, self.height);
        for plane in 0..self.format.plane_count() {
            let buf = frame.plane_mut(plane);
            let mut filled = 0;
            while filled < buf.len() {
                let n = self
                    .reader
                    .read(&mut buf[filled..])
                    .map_err(|err| InferError::Resource(format!("read failed: {err}")))?;
                if n == 0 {
                    if plane == 0 && filled == 0 {
                        return Ok(SourceEvent::EndOfStream {
                            pts: self.frames_read,
                        });
                    }
                    return Err(InferError::Resource("truncated input frame".into()));
                }
                filled += n;
            }
        }
        frame.pts = self.frames_read;
        self.frames_read += 1;
        Ok(SourceEvent::Frame(frame))
    }
}

/// Writes frames back out as densely packed planes.
struct RawFileSink {
    writer: BufWriter<File>,
    frames_written: u64,
    last_pts: Option<i64>,
}

impl FrameSink for RawFileSink {
    fn write(&mut self, frame: VideoFrame) -> Result<()> {
        for plane in 0..frame.format.plane_count() {
            let bytewidth = frame.format.plane_linesize(frame.width, plane);
            let (_, rows) = frame
                .format
                .plane_dimensions(frame.width, frame.height, plane);
            let data = frame.plane(plane);
            for y in 0..rows as usize {
                self.writer
                    .write_all(&data[y * frame.linesize[plane]..][..bytewidth])
                    .map_err(|err| InferError::Resource(format!("write failed: {err}")))?;
            }
        }
        self.frames_written += 1;
        self.last_pts = Some(frame.pts);
        Ok(())
    }

    fn end_of_stream(&mut self, pts: i64) -> Result<()> {
        self.writer
            .flush()
            .map_err(|err| InferError::Resource(format!("flush failed: {err}")))?;
        info!(frames = self.frames_written, pts, "output finalized");
        Ok(())
    }
}

fn run_process(args: ProcessArgs) -> Result<()> {
    let (width, height) = parse_size(&args.size)?;
    let format: PixelFormat = args.format.parse()?;
    let backend: BackendKind = args.model.backend.parse()?;

    let mut params = InferParams::new(
        args.model.model.clone(),
        args.model.model_input.clone(),
        args.model.model_output.clone(),
    );
    params.backend = backend;
    params.async_infer = args.async_infer;
    params.nireq = args.nireq;
    params.batch_size = args.batch_size;
    params.backend_options = args.model.backend_options.clone();

    let mut stage = ProcessingStage::new("dnn_processing", &params, format, width, height)?;
    let (out_w, out_h) = stage.output_size();
    info!(width, height, out_w, out_h, format = %format, "processing");

    let input = File::open(&args.input)
        .map_err(|err| InferError::Config(format!("cannot open {}: {err}", args.input.display())))?;
    let output = File::create(&args.output).map_err(|err| {
        InferError::Config(format!("cannot create {}: {err}", args.output.display()))
    })?;

    let mut source = RawFileSource {
        reader: BufReader::new(input),
        format,
        width,
        height,
        frames_read: 0,
    };
    let mut sink = RawFileSink {
        writer: BufWriter::new(output),
        frames_written: 0,
        last_pts: None,
    };

    while stage.activate(&mut source, &mut sink)? != StageStatus::Finished {}

    println!(
        "{} frames -> {} ({out_w}x{out_h} {format})",
        sink.frames_written,
        args.output.display()
    );
    Ok(())
}

// ─── probe ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct TensorReport {
    name: String,
    data_type: DataType,
    layout: TensorLayout,
    shape: [i64; 4],
}

#[derive(Serialize)]
struct ProbeReport {
    backend: String,
    model: String,
    input: TensorReport,
    output: TensorReport,
}

fn run_probe(args: ProbeArgs) -> Result<()> {
    let backend: BackendKind = args.model.backend.parse()?;
    let model = load_model(backend, &args.model.model, &args.model.backend_options)?;

    let input = model.input_desc(&args.model.model_input)?;
    let output = model.output_desc(&args.model.model_output)?;
    let report = ProbeReport {
        backend: backend.to_string(),
        model: args.model.model.display().to_string(),
        input: TensorReport {
            name: args.model.model_input.clone(),
            data_type: input.dt,
            layout: input.layout,
            shape: input.shape,
        },
        output: TensorReport {
            name: args.model.model_output.clone(),
            data_type: output.dt,
            layout: output.layout,
            shape: output.shape,
        },
    };

    if args.json {
        let json = serde_json::to_string_pretty(&report)
            .map_err(|err| InferError::Resource(format!("report serialization: {err}")))?;
        println!("{json}");
    } else {
        println!("model:   {}", report.model);
        println!("backend: {}", report.backend);
        for (label, tensor) in [("input", &report.input), ("output", &report.output)] {
            println!(
                "{label}:  \"{}\" {:?} {:?} shape {:?}",
                tensor.name, tensor.data_type, tensor.layout, tensor.shape
            );
        }
    }
    Ok(())
}
