//! `conduit` — the command-line frontend: parses flags into a pipeline
//! configuration, opens a GPU context, runs the dispatcher until Ctrl-C,
//! and writes a trace file on shutdown.
//!
//! Grounded in `examples/dirkhillbrecht-mandel-rs`'s `clap`-derive
//! dependency (the closest fit in the retrieval pack for a CLI-driven Rust
//! media tool) and in the original's `ProgramOptions` singleton (spec.md §9:
//! "Global `ProgramOptions` singleton -> explicit configuration struct"),
//! translated here into an explicit `clap::Parser` struct instead.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use clap::{Parser, ValueEnum};

use conduit_core::dispatcher::TraceSink;
use conduit_core::{CompositionId, FlagSet};
use conduit_gpu::{GpuContext, GpuTextureHandle, LoadConstraints, PipelineConfig, QueueCapacities};
use conduit_trace::RonFileSink;
use conduit_video::{
    Chromaticity as VideoChromaticity, ImageFormat, ImageSequenceSource, Origin as VideoOrigin,
    PassThroughRenderer, PixelFormat as VideoPixelFormat, TransferFunction as VideoTransferFunction,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PixelFormatArg {
    Rgba8,
    Rgba16,
    RgbaF16,
    RgbaF32,
}

impl From<PixelFormatArg> for VideoPixelFormat {
    fn from(arg: PixelFormatArg) -> Self {
        match arg {
            PixelFormatArg::Rgba8 => VideoPixelFormat::Rgba8,
            PixelFormatArg::Rgba16 => VideoPixelFormat::Rgba16,
            PixelFormatArg::RgbaF16 => VideoPixelFormat::RgbaFloat16,
            PixelFormatArg::RgbaF32 => VideoPixelFormat::RgbaFloat32,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TransferArg {
    Bt709,
    Bt601,
    Srgb,
    Linear,
}

impl From<TransferArg> for VideoTransferFunction {
    fn from(arg: TransferArg) -> Self {
        match arg {
            TransferArg::Bt709 => VideoTransferFunction::Bt709,
            TransferArg::Bt601 => VideoTransferFunction::Bt601,
            TransferArg::Srgb => VideoTransferFunction::Srgb,
            TransferArg::Linear => VideoTransferFunction::Linear,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ChromaticityArg {
    Bt709,
    Bt601,
    Srgb,
}

impl From<ChromaticityArg> for VideoChromaticity {
    fn from(arg: ChromaticityArg) -> Self {
        match arg {
            ChromaticityArg::Bt709 => VideoChromaticity::Bt709,
            ChromaticityArg::Bt601 => VideoChromaticity::Bt601,
            ChromaticityArg::Srgb => VideoChromaticity::Srgb,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OriginArg {
    Upper,
    Lower,
}

impl From<OriginArg> for VideoOrigin {
    fn from(arg: OriginArg) -> Self {
        match arg {
            OriginArg::Upper => VideoOrigin::UpperLeft,
            OriginArg::Lower => VideoOrigin::LowerLeft,
        }
    }
}

/// Streams a directory of raw uncompressed frames through the conduit GPU
/// dispatch pipeline and reports throughput when stopped.
#[derive(Debug, Parser)]
#[command(name = "conduit", version, about)]
struct Args {
    /// Directory containing one raw frame per file.
    #[arg(long)]
    frames_dir: PathBuf,

    /// File extension (without the dot) identifying frame files.
    #[arg(long, default_value = "raw")]
    extension: String,

    /// Frame width in pixels.
    #[arg(long)]
    width: u32,

    /// Frame height in pixels.
    #[arg(long)]
    height: u32,

    /// Pixel layout of the input frames and of the device textures they're
    /// uploaded into -- no format-conversion shader is wired up yet, so
    /// both ends of the pipeline share this format.
    #[arg(long, value_enum, default_value_t = PixelFormatArgDefault::VALUE)]
    pixel_format: PixelFormatArg,

    #[arg(long, value_enum, default_value = "srgb")]
    transfer: TransferArg,

    #[arg(long, value_enum, default_value = "srgb")]
    chromaticity: ChromaticityArg,

    #[arg(long, value_enum, default_value = "upper")]
    origin: OriginArg,

    /// Frame duration numerator, paired with `--frame-duration-den`
    /// (default 1001/30000, i.e. 29.97 fps).
    #[arg(long, default_value_t = 1001)]
    frame_duration_num: i64,

    #[arg(long, default_value_t = 30_000)]
    frame_duration_den: i64,

    /// How many times to replay the frame sequence.
    #[arg(long, default_value_t = 1)]
    loop_count: usize,

    /// Identifies this run's single composition.
    #[arg(long, default_value = "take-1")]
    composition_id: String,

    /// Directory to write rendered output frames into, one raw file per
    /// frame. If omitted, output frames are counted but not persisted.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Path to write the session's per-stage trace (`ron`) on shutdown.
    #[arg(long)]
    trace_out: Option<PathBuf>,

    /// Give each GPU-touching worker group its own GPU context/thread.
    #[arg(long)]
    multiple_gpu_contexts: bool,

    /// Run host-to-staging upload on its own dedicated thread.
    #[arg(long)]
    async_input: bool,

    /// Run staging-to-host download on its own dedicated thread.
    #[arg(long)]
    async_output: bool,

    /// Keep staging buffers persistently mapped instead of per-frame
    /// map/unmap.
    #[arg(long)]
    persistent_mapping: bool,

    /// Record GPU-side timestamp samples for the render stage.
    #[arg(long)]
    sample_gpu_timing: bool,

    /// Skip the capture/upload sub-pipeline and feed the renderer directly
    /// from a bypass stand-in, for benchmarking the rest of the pipeline in
    /// isolation.
    #[arg(long)]
    disable_input: bool,

    /// Skip the decode/render/encode sub-pipeline.
    #[arg(long)]
    disable_render: bool,

    /// Skip the pack/download/output sub-pipeline; no frame ever reaches
    /// `--output-dir`.
    #[arg(long)]
    disable_output: bool,

    /// Ring depth of the source-feed stage's own host-frame pool.
    #[arg(long, default_value_t = 2)]
    frame_input_pipeline_size: usize,
    /// Ring depth of the host-to-staging upload pool (first upload PBO hop).
    #[arg(long, default_value_t = 2)]
    upload_pbo_count: usize,
    /// Ring depth of the unmap-staging stage's own output pool.
    #[arg(long, default_value_t = 2)]
    upload_copy_to_unmap_count: usize,
    /// Ring depth of the unpack-to-image stage's own output pool.
    #[arg(long, default_value_t = 2)]
    upload_unmap_to_unpack_count: usize,
    /// Ring depth of the decode convert-format stage's own output pool.
    #[arg(long, default_value_t = 2)]
    source_texture_count: usize,
    /// Ring depth of the render stage's own output pool.
    #[arg(long, default_value_t = 2)]
    destination_texture_count: usize,
    /// Ring depth of the encode convert-format stage's own output pool.
    #[arg(long, default_value_t = 2)]
    download_pbo_count: usize,
    /// Ring depth of the pack-image-to-staging stage's own output pool.
    #[arg(long, default_value_t = 2)]
    download_pack_to_map_count: usize,
    /// Ring depth of the map-staging stage's own output pool.
    #[arg(long, default_value_t = 2)]
    download_map_to_copy_count: usize,
    /// Ring depth of the copy-staging-to-host stage's own output pool.
    #[arg(long, default_value_t = 2)]
    frame_output_cache_count: usize,

    /// Tokens that must be buffered before unmap-staging runs (0 disables
    /// the gate).
    #[arg(long, default_value_t = 0)]
    load_constraint_upload_unmap_to_unpack: usize,
    /// Tokens that must be buffered before the decode convert-format stage
    /// runs.
    #[arg(long, default_value_t = 0)]
    load_constraint_upload_unpack_to_format_converter: usize,
    /// Tokens that must be buffered before pack-image-to-staging runs.
    #[arg(long, default_value_t = 0)]
    load_constraint_download_format_converter_to_pack: usize,
    /// Tokens that must be buffered before map-staging runs.
    #[arg(long, default_value_t = 0)]
    load_constraint_download_pack_to_map: usize,
}

// `clap`'s `default_value_t` needs a `Display` const.
struct PixelFormatArgDefault;
impl PixelFormatArgDefault {
    const VALUE: PixelFormatArg = PixelFormatArg::Rgba8;
}

impl std::fmt::Display for PixelFormatArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PixelFormatArg::Rgba8 => "rgba8",
            PixelFormatArg::Rgba16 => "rgba16",
            PixelFormatArg::RgbaF16 => "rgba-f16",
            PixelFormatArg::RgbaF32 => "rgba-f32",
        };
        f.write_str(s)
    }
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if let Err(err) = run(args) {
        log::error!("{err}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let format = ImageFormat::new(
        args.width,
        args.height,
        args.pixel_format.into(),
        args.transfer.into(),
        args.chromaticity.into(),
        args.origin.into(),
    )?;

    let frame_duration =
        conduit_video::FrameTime::new(args.frame_duration_num, args.frame_duration_den);

    let source = ImageSequenceSource::new(
        &args.frames_dir,
        &args.extension,
        format,
        frame_duration,
        args.loop_count,
    )?;

    let frame_count = Arc::new(AtomicUsize::new(0));
    let output_dir = args.output_dir.clone();
    let frame_count_for_callback = Arc::clone(&frame_count);
    let output_callback: conduit_video::OutputCallback = Box::new(move |frame| {
        let index = frame_count_for_callback.fetch_add(1, Ordering::Relaxed);
        if let Some(dir) = &output_dir {
            let path = dir.join(format!("frame_{index:06}.raw"));
            if let Err(e) = std::fs::write(&path, frame.image_data()) {
                log::error!("failed to write output frame to '{}': {e}", path.display());
            }
        }
    });

    let mut flags = FlagSet::empty();
    flags.set(FlagSet::MULTIPLE_GPU_CONTEXTS, args.multiple_gpu_contexts);
    flags.set(FlagSet::ASYNC_INPUT, args.async_input);
    flags.set(FlagSet::ASYNC_OUTPUT, args.async_output);
    flags.set(FlagSet::PERSISTENT_MAPPING, args.persistent_mapping);

    let ctx = Arc::new(GpuContext::new()?);
    let composition_id = CompositionId(args.composition_id.clone());

    let config = PipelineConfig {
        composition_id: composition_id.clone(),
        source: Box::new(source),
        renderer: Arc::new(PassThroughRenderer) as Arc<dyn conduit_video::Renderer<GpuTextureHandle>>,
        output_callback,
        host_format: format,
        device_format: format,
        flags,
        sample_gpu_timing: args.sample_gpu_timing,
        enable_input: !args.disable_input,
        enable_render: !args.disable_render,
        enable_output: !args.disable_output,
        queue_capacities: QueueCapacities {
            frame_input_pipeline_size: args.frame_input_pipeline_size,
            upload_pbo_count: args.upload_pbo_count,
            upload_copy_to_unmap_count: args.upload_copy_to_unmap_count,
            upload_unmap_to_unpack_count: args.upload_unmap_to_unpack_count,
            source_texture_count: args.source_texture_count,
            destination_texture_count: args.destination_texture_count,
            download_pbo_count: args.download_pbo_count,
            download_pack_to_map_count: args.download_pack_to_map_count,
            download_map_to_copy_count: args.download_map_to_copy_count,
            frame_output_cache_count: args.frame_output_cache_count,
        },
        load_constraints: LoadConstraints {
            upload_unmap_to_unpack: args.load_constraint_upload_unmap_to_unpack,
            upload_unpack_to_format_converter: args.load_constraint_upload_unpack_to_format_converter,
            download_format_converter_to_pack: args.load_constraint_download_format_converter_to_pack,
            download_pack_to_map: args.load_constraint_download_pack_to_map,
        },
    };

    let builder = conduit_gpu::pipeline::build(Arc::clone(&ctx), config)?;
    let dispatcher = builder.build()?;

    dispatcher.start()?;
    dispatcher.create_composition(composition_id)?;
    log::info!("conduit pipeline running against '{}'; press ctrl-c to stop", args.frames_dir.display());

    let (tx, rx) = std::sync::mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;
    rx.recv().ok();

    log::info!("stopping pipeline");
    dispatcher.stop();

    let mut sink = args.trace_out.map(RonFileSink::new);
    let sink_ref: Option<&mut dyn TraceSink> = sink.as_mut().map(|s| s as &mut dyn TraceSink);
    dispatcher.shutdown(sink_ref)?;

    log::info!("processed {} frames", frame_count.load(Ordering::Relaxed));
    Ok(())
}
