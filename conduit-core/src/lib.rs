//! Ring, Stage, Sampler, and Dispatcher: the core of a pipelined,
//! multi-threaded dispatch engine for streaming uncompressed video frames
//! through host<->GPU transfer, pixel-format conversion, and rendering
//! stages.
//!
//! This crate has no GPU or file I/O dependencies -- it knows about tokens
//! only as an opaque, `Send` type parameter. Concrete token payloads and
//! task bodies live in `conduit-gpu`/`conduit-video`, which depend on this
//! crate, not the other way around.

pub mod dispatcher;
pub mod error;
pub mod ring;
pub mod sampler;
pub mod stage;
pub mod waiting_ring;

pub use dispatcher::{CompositionId, Dispatcher, DispatcherBuilder, FlagSet, WorkerGroup};
pub use error::{Canceled, DispatchError, InvalidConfiguration, InvalidState};
pub use ring::Ring;
pub use sampler::{Sampler, StageEvent, Statistic};
pub use stage::{
    Command, Edge, ExecuteOutcome, NoInput, NoOutput, QueueItem, Stage, StageRuntime, StageState,
};
pub use waiting_ring::{WaitPolicy, WaitingRing};
