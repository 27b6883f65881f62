//! The `Source` collaborator trait, grounded in `StreamSource.h`/
//! `StreamSource.cpp`: something `conduit-gpu`'s upload stage polls for the
//! next host-memory frame to push into the pipeline.
//!
//! The original's `StreamSource` owns its own `CircularFifo<Frame>` and
//! background-fills it; here that fifo is `conduit-core::Ring` itself, owned
//! by the producer `Stage` the source's task body closes over, so the trait
//! only needs to describe what a source *does*, not how it buffers.

use crate::frame::Frame;

/// Lifecycle of a [`Source`], mirroring `StreamSource::State`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    /// Constructed but not yet primed with any frames.
    Initialized,
    /// At least one frame is available to read.
    ReadyToRead,
    /// Fully consumed; no more frames will ever become available.
    EndOfStream,
}

/// Something that can hand out frames in presentation order.
///
/// `pop_frame` mirrors `StreamSource::pop_frame`: it returns `None` (rather
/// than throwing, as the original does for an `INITIALIZED`/`END_OF_STREAM`
/// state) when no frame is currently available, so a producer task body can
/// report [`conduit_core::Command::NoChange`] and try again next sweep
/// instead of treating "temporarily empty" as fatal.
pub trait Source: Send {
    fn name(&self) -> &str;

    fn state(&self) -> SourceState;

    /// Takes the next frame in presentation order, if one is ready.
    fn pop_frame(&mut self) -> Option<Frame>;

    /// Gives a frame buffer back to the source for reuse or prefetch,
    /// mirroring `StreamSource::invalidate_frame`. The default does nothing,
    /// matching the base class's default (only a looping/prefetching source
    /// needs to recycle buffers).
    fn invalidate_frame(&mut self, _frame: Frame) {}
}
