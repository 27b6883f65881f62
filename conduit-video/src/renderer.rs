//! The `Renderer` collaborator trait, grounded in `StreamRenderer.h`.
//!
//! The original couples this interface to raw GL texture handles
//! (`StreamRenderer::Texture{id, width, height}`). Since `conduit-video`
//! carries no GPU dependency, the texture type is a generic parameter here;
//! `conduit-gpu` is the crate that actually implements `Renderer<GpuTexture>`
//! against a concrete `wgpu::Texture`-backed handle.

use crate::frame_time::FrameTime;

/// A render operation applied once per output frame, composing one or more
/// source textures into a target. Mirrors `StreamRenderer::render` /
/// `number_of_input_slots`.
pub trait Renderer<Texture>: Send {
    fn name(&self) -> &str;

    /// How many source textures this renderer expects per invocation,
    /// mirroring `StreamRenderer::number_of_input_slots`.
    fn number_of_input_slots(&self) -> usize;

    fn render(&self, frame_time: FrameTime, source_frames: &[Texture], target: &Texture);
}

/// A renderer that copies its single input straight to the target,
/// mirroring `PassThroughRenderer` -- used for testing compositions that
/// don't need an actual visual effect.
pub struct PassThroughRenderer;

impl<Texture: Clone> Renderer<Texture> for PassThroughRenderer {
    fn name(&self) -> &str {
        "pass-through"
    }

    fn number_of_input_slots(&self) -> usize {
        1
    }

    fn render(&self, _frame_time: FrameTime, _source_frames: &[Texture], _target: &Texture) {
        // The actual copy is a GPU operation; `conduit-gpu`'s render task
        // body performs it by issuing a blit when it sees this renderer.
        // This trait only records the renderer's composition *intent*.
    }
}
