//! GPU context, GPU-side timestamp sampling, and the `wgpu` task bodies that
//! drive `conduit-core`'s pipeline stages end to end.
//!
//! `conduit-core` never depends on this crate -- it only knows about
//! `Stage<I, O>` and `Box<dyn StageRuntime>`. This crate is the one place
//! that turns those generic stages into an actual GPU dispatch pipeline,
//! mirroring how `blade-graphics` is the concrete backend underneath
//! `blade-render`'s renderer-agnostic scene graph.

pub mod context;
pub mod error;
pub mod pipeline;
pub mod task_bodies;
pub mod texture;
pub mod time_sampler;
pub mod tokens;

pub use context::GpuContext;
pub use error::GpuError;
pub use pipeline::{build, LoadConstraints, PipelineConfig, QueueCapacities};
pub use texture::{wgpu_texture_format, GpuTextureHandle};
pub use time_sampler::{GpuTimeSampler, SyncPoint};
pub use tokens::{DeviceImageToken, GpuFence, HostFrameToken, StagingToken};
