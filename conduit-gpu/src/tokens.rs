//! The concrete token payloads that ride conduit's pipeline edges, grounded
//! in `StageDataTypes.h`'s `TokenGL`/`TokenFrame`.
//!
//! The original's single `TokenGL` struct serves every GL-side stage
//! (upload/unpack/render/pack/download) by carrying both a PBO id and a
//! texture id in the same fields, switching on which stage is reading it.
//! Here that's split into two distinct, more precisely typed payloads --
//! [`StagingToken`] (buffer-shaped) and [`DeviceImageToken`] (texture-shaped)
//! -- so a stage's `Stage<I, O>` signature alone documents which kind of GPU
//! resource it expects, instead of every stage silently agreeing by
//! convention on which `TokenGL` fields are meaningful for it.

use conduit_core::CompositionId;
use conduit_video::{Frame, FrameTime, ImageFormat};

/// An owned host-memory frame plus the composition it belongs to, exactly
/// as produced by a [`conduit_video::Source`] -- the original's
/// `TokenFrame`. `conduit_video::Frame` already carries format, time, and
/// composition, so no separate wrapper struct is needed here.
pub type HostFrameToken = Frame;

/// Marks a submitted command buffer's position in the GPU queue, so a
/// downstream stage can confirm the work it depends on has completed before
/// touching the same resource from the host side.
#[derive(Debug, Clone)]
pub struct GpuFence(pub wgpu::SubmissionIndex);

/// A reusable host-visible / device-accessible buffer, grounds the pipeline
/// segment that originally ran through `PboMemory`/`TokenGL`'s PBO id:
/// `CopyHostToStagingBuffer -> UnmapStaging -> UnpackToImage` on the way in,
/// `PackImageToStaging -> MapStaging -> CopyStagingToHost` on the way out.
pub struct StagingToken {
    pub buffer: wgpu::Buffer,
    pub size: u64,
    pub format: ImageFormat,
    /// Whether `buffer` is currently host-mapped (safe to `memcpy` into/out
    /// of directly). Stages that need the GPU to read or write it must see
    /// this `false` first.
    pub mapped: bool,
    pub composition: Option<CompositionId>,
    pub time_stamp: FrameTime,
    pub fence: Option<GpuFence>,
}

impl StagingToken {
    pub fn new(buffer: wgpu::Buffer, size: u64, format: ImageFormat) -> Self {
        StagingToken {
            buffer,
            size,
            format,
            mapped: false,
            composition: None,
            time_stamp: FrameTime::zero(),
            fence: None,
        }
    }
}

/// A device-resident image, grounds `TokenGL`'s texture-id usage across
/// `UnpackToImage -> ConvertFormat(decode) -> Render -> ConvertFormat(encode)
/// -> PackImageToStaging`.
pub struct DeviceImageToken {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub format: ImageFormat,
    pub composition: Option<CompositionId>,
    pub time_stamp: FrameTime,
    pub fence: Option<GpuFence>,
}
