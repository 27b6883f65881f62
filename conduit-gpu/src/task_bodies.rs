//! The concrete task-body closures run by the pipeline's eleven stages.
//!
//! Each closure is grounded in its corresponding original source file
//! (`CopyHostToMappedPBOStage.cpp`, `UnmapPBOStage.cpp`,
//! `UnpackPBOToTextureStage.cpp`, `FormatConverterStage.cpp`,
//! `RenderStage.cpp`, `PackTextureToPBOStage.cpp`, `MapPBOStage.cpp`,
//! `CopyMappedPBOToHostStage.cpp`, `FrameCompositionInputStage.cpp`/
//! `FrameCompositionOutputStage.cpp`).
//!
//! Same-typed hops (`UnmapStaging`, `MapStaging`, the two `ConvertFormat`
//! passes) swap the whole token struct between the stage's input and its own
//! freshly seeded output slot, rather than copying field by field: the
//! buffer/texture that was just written keeps moving downstream, and the
//! token structure left behind recycles upstream for the next frame to fill.
//! This is the same trick `Stage<I, O>`'s split input/output free-pools are
//! built around (spec.md §4.2), just applied explicitly where the resource
//! identity itself is what needs to travel rather than be recomputed.

use std::sync::{mpsc, Arc};

use conduit_core::stage::Command;
use conduit_core::CompositionId;
use conduit_video::{Renderer, Source};

use crate::context::GpuContext;
use crate::texture::GpuTextureHandle;
use crate::tokens::{DeviceImageToken, GpuFence, HostFrameToken, StagingToken};

fn log_mismatch(stage: &str, have: &conduit_video::ImageFormat, want: &conduit_video::ImageFormat) {
    log::error!("{stage}: format mismatch, have '{have}' want '{want}'");
}

/// `SourceFeed`: pulls the next frame out of a [`Source`], grounded in
/// `FrameCompositionInputStage.cpp`'s pull from `StreamSource::pop_frame`.
///
/// A `None` from `pop_frame` is read as "fully drained" rather than
/// "temporarily empty", since the one concrete `Source` this pipeline wires
/// up (`ImageSequenceSource`) only ever returns `None` once its last loop
/// iteration has been consumed.
pub fn source_feed(
    mut source: Box<dyn Source>,
    composition_id: CompositionId,
) -> impl FnMut(&mut HostFrameToken) -> Command + Send {
    move |out: &mut HostFrameToken| match source.pop_frame() {
        Some(mut frame) => {
            frame.set_composition(Some(composition_id.clone()));
            *out = frame;
            Command::NoChange
        }
        None => Command::StopExecution,
    }
}

/// `OutputSink`: hands the finished frame to the composition's output
/// callback, grounded in `FrameCompositionOutputStage.cpp`.
pub fn output_sink(emit: Arc<dyn Fn(&HostFrameToken) + Send + Sync>) -> impl FnMut(&mut HostFrameToken) -> Command + Send {
    move |frame: &mut HostFrameToken| {
        emit(frame);
        Command::NoChange
    }
}

/// `CopyHostToStagingBuffer`: memcpys the host frame's bytes into a mapped
/// staging buffer, grounded in `CopyHostToMappedPBOStage.cpp::perform`,
/// including its format-mismatch abort path.
pub fn copy_host_to_staging_buffer(ctx: Arc<GpuContext>) -> impl FnMut(&mut HostFrameToken, &mut StagingToken) -> Command + Send {
    move |frame: &mut HostFrameToken, staging: &mut StagingToken| {
        if !frame.image_format().is_compatible_with(&staging.format) {
            log_mismatch("CopyHostToStagingBuffer", frame.image_format(), &staging.format);
            return Command::StopExecution;
        }
        if !staging.mapped {
            // A buffer recycled from `UnmapStaging` arrives unmapped; map it
            // again before writing, rather than requiring a dedicated
            // re-map stage for the upload path.
            let (tx, rx) = mpsc::channel();
            staging.buffer.slice(..).map_async(wgpu::MapMode::Write, move |result| {
                let _ = tx.send(result);
            });
            let _ = ctx.device().poll(wgpu::PollType::Wait);
            match rx.recv_timeout(std::time::Duration::from_secs(30)) {
                Ok(Ok(())) => staging.mapped = true,
                _ => {
                    log::error!("CopyHostToStagingBuffer: failed to re-map staging buffer");
                    return Command::StopExecution;
                }
            }
        }
        {
            let mut view = staging.buffer.slice(..).get_mapped_range_mut();
            view[..frame.image_data().len()].copy_from_slice(frame.image_data());
        }
        staging.composition = frame.composition().cloned();
        staging.time_stamp = frame.time();
        Command::NoChange
    }
}

/// `UnmapStaging`: unmaps the buffer that was just written so the GPU can
/// read it, grounded in `UnmapPBOStage.cpp`. Swaps the freshly unmapped
/// buffer into the downstream-facing token.
pub fn unmap_staging() -> impl FnMut(&mut StagingToken, &mut StagingToken) -> Command + Send {
    move |input: &mut StagingToken, output: &mut StagingToken| {
        input.buffer.unmap();
        input.mapped = false;
        std::mem::swap(input, output);
        Command::NoChange
    }
}

/// `UnpackToImage`: copies the unmapped staging buffer into a device
/// texture via a GPU-side buffer-to-texture copy, grounded in
/// `UnpackPBOToTextureStage.cpp::perform`.
pub fn unpack_to_image(ctx: Arc<GpuContext>) -> impl FnMut(&mut StagingToken, &mut DeviceImageToken) -> Command + Send {
    move |staging: &mut StagingToken, image: &mut DeviceImageToken| {
        if !staging.format.is_compatible_with(&image.format) {
            log_mismatch("UnpackToImage", &staging.format, &image.format);
            return Command::StopExecution;
        }
        let bytes_per_row = image.format.width() * bytes_per_texel(&image.format);
        let mut encoder = ctx
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("conduit unpack-to-image encoder"),
            });
        encoder.copy_buffer_to_texture(
            wgpu::TexelCopyBufferInfo {
                buffer: &staging.buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(image.format.height()),
                },
            },
            image.texture.as_image_copy(),
            wgpu::Extent3d {
                width: image.format.width(),
                height: image.format.height(),
                depth_or_array_layers: 1,
            },
        );
        let fence = ctx.queue().submit(Some(encoder.finish()));
        image.composition = staging.composition.clone();
        image.time_stamp = staging.time_stamp;
        image.fence = Some(GpuFence(fence));
        Command::NoChange
    }
}

/// `ConvertFormat`: the decode (device-native -> working format) and encode
/// (working format -> device-native) passes around `Render`, grounded in
/// `FormatConverterStage.cpp`. Swaps the token structure across, same as
/// `UnmapStaging`/`MapStaging`.
///
/// TODO: this currently forwards the texture unchanged; real pixel-format
/// conversion (e.g. YUV decode) needs a compute pass that isn't wired up.
pub fn convert_format() -> impl FnMut(&mut DeviceImageToken, &mut DeviceImageToken) -> Command + Send {
    move |input: &mut DeviceImageToken, output: &mut DeviceImageToken| {
        std::mem::swap(input, output);
        Command::NoChange
    }
}

/// `Render`: composes the (single, per `Composition::first_source`) input
/// image into the target texture, grounded in `RenderStage.cpp::perform`.
///
/// The actual GPU work for [`conduit_video::PassThroughRenderer`] is a
/// straight texture-to-texture copy, issued here rather than inside
/// `Renderer::render` (which takes no encoder/device and only records
/// composition intent, per `conduit_video::renderer`'s design note).
pub fn render(
    ctx: Arc<GpuContext>,
    renderer: Arc<dyn Renderer<GpuTextureHandle>>,
    time_sampler: Option<Arc<std::sync::Mutex<crate::time_sampler::GpuTimeSampler>>>,
) -> impl FnMut(&mut DeviceImageToken, &mut DeviceImageToken) -> Command + Send {
    move |input: &mut DeviceImageToken, output: &mut DeviceImageToken| {
        renderer.render(
            input.time_stamp,
            &[GpuTextureHandle {
                texture: input.texture.clone(),
                view: input.view.clone(),
            }],
            &GpuTextureHandle {
                texture: output.texture.clone(),
                view: output.view.clone(),
            },
        );

        let mut encoder = ctx
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("conduit render encoder"),
            });
        if renderer.name() != "pass-through" {
            log::warn!(
                "render: renderer '{}' has no shader pass wired up, passing input through unchanged",
                renderer.name()
            );
        }
        let mut locked = time_sampler.as_ref().map(|s| s.lock().unwrap_or_else(|e| e.into_inner()));
        if let Some(sampler) = locked.as_mut() {
            sampler.sample_begin(&mut encoder);
        }
        encoder.copy_texture_to_texture(
            input.texture.as_image_copy(),
            output.texture.as_image_copy(),
            wgpu::Extent3d {
                width: output.format.width(),
                height: output.format.height(),
                depth_or_array_layers: 1,
            },
        );
        if let Some(sampler) = locked.as_mut() {
            sampler.sample_end(&mut encoder);
        }
        let fence = ctx.queue().submit(Some(encoder.finish()));
        if let Some(sampler) = locked.as_mut() {
            sampler.flush(ctx.device());
        }
        drop(locked);
        output.composition = input.composition.clone();
        output.time_stamp = input.time_stamp;
        output.fence = Some(GpuFence(fence));
        Command::NoChange
    }
}

/// `PackImageToStaging`: copies the rendered texture into a staging buffer
/// via a GPU-side texture-to-buffer copy, grounded in
/// `PackTextureToPBOStage.cpp::perform`.
pub fn pack_image_to_staging(ctx: Arc<GpuContext>) -> impl FnMut(&mut DeviceImageToken, &mut StagingToken) -> Command + Send {
    move |image: &mut DeviceImageToken, staging: &mut StagingToken| {
        if !image.format.is_compatible_with(&staging.format) {
            log_mismatch("PackImageToStaging", &image.format, &staging.format);
            return Command::StopExecution;
        }
        let bytes_per_row = staging.format.width() * bytes_per_texel(&staging.format);
        let mut encoder = ctx
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("conduit pack-image-to-staging encoder"),
            });
        encoder.copy_texture_to_buffer(
            image.texture.as_image_copy(),
            wgpu::TexelCopyBufferInfo {
                buffer: &staging.buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(staging.format.height()),
                },
            },
            wgpu::Extent3d {
                width: staging.format.width(),
                height: staging.format.height(),
                depth_or_array_layers: 1,
            },
        );
        let fence = ctx.queue().submit(Some(encoder.finish()));
        staging.composition = image.composition.clone();
        staging.time_stamp = image.time_stamp;
        staging.fence = Some(GpuFence(fence));
        Command::NoChange
    }
}

/// `MapStaging`: blocks until the just-written buffer is host-mappable,
/// grounded in `MapPBOStage.cpp::perform`, including its "effectively
/// infinite timeout, log on expiry" wait policy (spec.md §9 Open
/// Questions).
pub fn map_staging(ctx: Arc<GpuContext>) -> impl FnMut(&mut StagingToken, &mut StagingToken) -> Command + Send {
    move |input: &mut StagingToken, output: &mut StagingToken| {
        let (tx, rx) = mpsc::channel();
        input.buffer.slice(..).map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = ctx.device().poll(wgpu::PollType::Wait);
        match rx.recv_timeout(std::time::Duration::from_secs(30)) {
            Ok(Ok(())) => {
                input.mapped = true;
                std::mem::swap(input, output);
                Command::NoChange
            }
            Ok(Err(e)) => {
                log::error!("MapStaging: buffer map failed: {e}");
                Command::StopExecution
            }
            Err(_) => {
                log::error!("MapStaging: buffer map timed out");
                Command::StopExecution
            }
        }
    }
}

/// `CopyStagingToHost`: memcpys the mapped buffer's bytes into the outgoing
/// host frame, grounded in `CopyMappedPBOToHostStage.cpp::perform`.
pub fn copy_staging_to_host() -> impl FnMut(&mut StagingToken, &mut HostFrameToken) -> Command + Send {
    move |staging: &mut StagingToken, frame: &mut HostFrameToken| {
        if !staging.format.is_compatible_with(frame.image_format()) {
            log_mismatch("CopyStagingToHost", &staging.format, frame.image_format());
            return Command::StopExecution;
        }
        if !staging.mapped {
            log::error!("CopyStagingToHost: staging buffer not mapped");
            return Command::StopExecution;
        }
        {
            let view = staging.buffer.slice(..).get_mapped_range();
            let len = frame.image_data().len();
            frame.image_data_mut().copy_from_slice(&view[..len]);
        }
        staging.buffer.unmap();
        staging.mapped = false;
        frame.set_composition(staging.composition.clone());
        frame.set_time(staging.time_stamp);
        Command::NoChange
    }
}

/// Stand-in producer for a disabled input sub-pipeline: hands out the
/// preseeded device image tokens unchanged, so whatever is downstream always
/// has a texture to read regardless of whether the real capture/upload chain
/// is wired in. Used for topology benchmarking -- see `pipeline::build`.
pub fn bypass_input() -> impl FnMut(&mut DeviceImageToken) -> Command + Send {
    move |_out: &mut DeviceImageToken| Command::NoChange
}

/// Stand-in transform for a disabled render sub-pipeline: forwards the
/// input texture through untouched rather than running decode/render/encode.
pub fn bypass_render() -> impl FnMut(&mut DeviceImageToken, &mut DeviceImageToken) -> Command + Send
{
    move |input: &mut DeviceImageToken, output: &mut DeviceImageToken| {
        std::mem::swap(input, output);
        Command::NoChange
    }
}

/// Stand-in consumer for a disabled output sub-pipeline: drops the finished
/// texture without packing, mapping, downloading, or invoking an output
/// callback.
pub fn bypass_output() -> impl FnMut(&mut DeviceImageToken) -> Command + Send {
    move |_token: &mut DeviceImageToken| Command::NoChange
}

fn bytes_per_texel(format: &conduit_video::ImageFormat) -> u32 {
    (format.bytes_per_frame() / (format.width() as usize * format.height() as usize)) as u32
}
