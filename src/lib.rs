//! Pipelined, multi-threaded GPU dispatch engine for real-time video frame
//! processing.
//!
//! This crate is a thin re-export over the split-out `conduit-*` crates, the
//! way `blade` re-exports `blade-graphics`/`blade-asset`/etc. Most users only
//! need this crate; the sub-crates exist so the core pipeline runtime
//! (`conduit-core`) never has to link against a GPU backend.

pub use conduit_core as core;
#[cfg(feature = "gpu")]
pub use conduit_gpu as gpu;
pub use conduit_trace as trace;
pub use conduit_video as video;

pub use conduit_core::dispatcher::{CompositionId, Dispatcher, DispatcherBuilder, FlagSet};
pub use conduit_core::stage::{Command, Stage};
pub use conduit_video::composition::Composition;
