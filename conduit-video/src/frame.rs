//! An owned host-memory frame buffer, grounded in `Frame.h`/`Frame.cpp`.
//!
//! The original wraps a `boost::alignment`-allocated `unique_ptr<uint8_t>`
//! with a custom deleter; here a plain `Vec<u8>` is enough since Rust's
//! global allocator already gives `Vec` a correctly aligned buffer for the
//! byte counts involved, and `conduit-gpu`'s upload stage is the one place
//! that cares about a specific alignment -- it copies into a `wgpu`-mapped
//! buffer rather than reinterpreting this one in place.

use conduit_core::CompositionId;

use crate::frame_time::FrameTime;
use crate::image_format::ImageFormat;

/// One uncompressed video frame: its pixel data, format, presentation time,
/// and the composition it belongs to, if any.
pub struct Frame {
    format: ImageFormat,
    time: FrameTime,
    marks_end_of_sequence: bool,
    composition: Option<CompositionId>,
    data: Vec<u8>,
}

impl Frame {
    /// Allocates a zeroed buffer sized for `format` and stamps it with
    /// `time`. Mirrors `Frame::Frame(ImageFormat, Time, bool)`.
    pub fn new(format: ImageFormat, time: FrameTime, marks_end_of_sequence: bool) -> Self {
        Frame {
            data: vec![0u8; format.bytes_per_frame()],
            format,
            time,
            marks_end_of_sequence,
            composition: None,
        }
    }

    pub fn time(&self) -> FrameTime {
        self.time
    }

    pub fn set_time(&mut self, time: FrameTime) {
        self.time = time;
    }

    pub fn marks_end_of_sequence(&self) -> bool {
        self.marks_end_of_sequence
    }

    pub fn set_marks_end_of_sequence(&mut self, b: bool) {
        self.marks_end_of_sequence = b;
    }

    pub fn image_format(&self) -> &ImageFormat {
        &self.format
    }

    pub fn composition(&self) -> Option<&CompositionId> {
        self.composition.as_ref()
    }

    pub fn set_composition(&mut self, composition: Option<CompositionId>) {
        self.composition = composition;
    }

    pub fn image_data(&self) -> &[u8] {
        &self.data
    }

    pub fn image_data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn image_data_size(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_format::{Chromaticity, Origin, PixelFormat, TransferFunction};

    fn rgba8_format(width: u32, height: u32) -> ImageFormat {
        ImageFormat::new(
            width,
            height,
            PixelFormat::Rgba8,
            TransferFunction::Srgb,
            Chromaticity::Srgb,
            Origin::UpperLeft,
        )
        .unwrap()
    }

    #[test]
    fn allocates_a_zeroed_buffer_sized_to_format() {
        let f = Frame::new(rgba8_format(4, 4), FrameTime::zero(), false);
        assert_eq!(f.image_data_size(), 4 * 4 * 4);
        assert!(f.image_data().iter().all(|&b| b == 0));
    }

    #[test]
    fn time_and_end_marker_are_mutable() {
        let mut f = Frame::new(rgba8_format(2, 2), FrameTime::zero(), false);
        f.set_time(FrameTime::new(1, 25));
        f.set_marks_end_of_sequence(true);
        assert_eq!(f.time(), FrameTime::new(1, 25));
        assert!(f.marks_end_of_sequence());
    }
}
