//! Image format description, host-memory frame buffers, and the
//! `Source`/`Renderer` collaborator traits a composition is built from.
//!
//! Grounded in `ImageFormat.h`, `Frame.h`, `StreamSource.h`, `StreamRenderer.h`,
//! and `StreamComposition.h`. No GPU dependency: `conduit-gpu` is the crate
//! that implements `Renderer<Texture>` against a real `wgpu::Texture` handle
//! and drives these types through the pipeline's task bodies.

pub mod composition;
pub mod frame;
pub mod frame_time;
pub mod image_format;
pub mod image_sequence;
pub mod renderer;
pub mod source;

pub use composition::{Composition, OutputCallback};
pub use frame::Frame;
pub use frame_time::FrameTime;
pub use image_format::{Chromaticity, ImageFormat, Origin, PixelFormat, TransferFunction, UnsupportedFormat};
pub use image_sequence::ImageSequenceSource;
pub use renderer::{PassThroughRenderer, Renderer};
pub use source::{Source, SourceState};
