//! A `Source` reading raw planar/packed frame files from a directory,
//! grounded in `StreamSource.cpp`'s `PrefetchedImageSequence`.
//!
//! The original prefetches every frame into an in-memory `std::queue<Frame>`
//! up front and preheats a small bounded `CircularFifo` from it, refilling
//! one slot per frame consumed (`frame_has_been_used`) so a background
//! upload thread never blocks on disk I/O mid-pipeline. Here, the bounded
//! buffering that `CircularFifo` provided is already supplied one layer up
//! by the producer `Stage`'s own free-output ring, so this source just keeps
//! every frame's raw bytes in memory as an `Arc<[u8]>` template and builds a
//! fresh owned [`Frame`] from the right template on every `pop_frame` --
//! this is what lets `loop_count > 1` replay the sequence without having to
//! reconstruct a moved-out `Frame` by hand the way `invalidate_frame` does.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use crate::frame::Frame;
use crate::frame_time::FrameTime;
use crate::image_format::ImageFormat;
use crate::source::{Source, SourceState};

/// Reads every file in `frame_folder` matching `extension`, in filename sort
/// order, as one frame each in `image_format`, and replays them `loop_count`
/// times.
pub struct ImageSequenceSource {
    name: String,
    templates: Vec<Arc<Vec<u8>>>,
    image_format: ImageFormat,
    frame_duration: FrameTime,
    loop_count: usize,
    /// Index into the flattened `[0, templates.len() * loop_count)` sequence
    /// of the next frame `pop_frame` will hand out.
    next_index: usize,
    state: SourceState,
}

impl ImageSequenceSource {
    /// # Errors
    /// Returns an I/O error if `frame_folder` can't be listed, or if any
    /// matching file's size doesn't equal `image_format.bytes_per_frame()`.
    ///
    /// # Panics
    /// Panics if `loop_count` is zero, or if no file in `frame_folder` has
    /// the extension `extension` (mirroring the original's "input sequence
    /// is empty" hard error).
    pub fn new(
        frame_folder: &Path,
        extension: &str,
        image_format: ImageFormat,
        frame_duration: FrameTime,
        loop_count: usize,
    ) -> io::Result<Self> {
        assert!(loop_count > 0, "loop_count must be at least 1");

        let mut entries: Vec<_> = fs::read_dir(frame_folder)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .filter(|e| e.path().extension().map(|ext| ext == extension).unwrap_or(false))
            .collect();
        entries.sort_by_key(|e| e.file_name());

        if entries.is_empty() {
            panic!(
                "no '*.{extension}' files found in '{}': input sequence is empty",
                frame_folder.display()
            );
        }

        let expected_size = image_format.bytes_per_frame();
        let mut templates = Vec::with_capacity(entries.len());
        for entry in &entries {
            let bytes = fs::read(entry.path())?;
            if bytes.len() != expected_size {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "'{}' is {} bytes, format '{}' requires {}",
                        entry.path().display(),
                        bytes.len(),
                        image_format,
                        expected_size
                    ),
                ));
            }
            templates.push(Arc::new(bytes));
        }

        log::info!(
            "prefetched {} frames from '{}' (*.{extension})",
            templates.len(),
            frame_folder.display()
        );

        Ok(ImageSequenceSource {
            name: format!("sequence('{}'/*.{extension})", frame_folder.display()),
            templates,
            image_format,
            frame_duration,
            loop_count,
            next_index: 0,
            state: SourceState::ReadyToRead,
        })
    }

    pub fn num_frames(&self) -> usize {
        self.templates.len() * self.loop_count
    }
}

impl Source for ImageSequenceSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> SourceState {
        self.state
    }

    fn pop_frame(&mut self) -> Option<Frame> {
        if self.state == SourceState::EndOfStream {
            return None;
        }

        let total = self.num_frames();
        if self.next_index >= total {
            self.state = SourceState::EndOfStream;
            return None;
        }

        let template = Arc::clone(&self.templates[self.next_index % self.templates.len()]);
        let time = self.frame_duration * self.next_index as i64;
        let is_last = self.next_index + 1 == total;

        let mut frame = Frame::new(self.image_format, time, is_last);
        frame.image_data_mut().copy_from_slice(&template);

        self.next_index += 1;
        if is_last {
            self.state = SourceState::EndOfStream;
        }
        Some(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_format::{Chromaticity, Origin, PixelFormat, TransferFunction};

    fn rgba8(width: u32, height: u32) -> ImageFormat {
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

    fn write_frame(dir: &Path, name: &str, len: usize, fill: u8) {
        fs::write(dir.join(name), vec![fill; len]).unwrap();
    }

    #[test]
    fn reads_frames_in_filename_order() {
        let dir = tempfile::tempdir().unwrap();
        let format = rgba8(2, 2);
        let size = format.bytes_per_frame();
        write_frame(dir.path(), "002.raw", size, 2);
        write_frame(dir.path(), "000.raw", size, 0);
        write_frame(dir.path(), "001.raw", size, 1);

        let mut source = ImageSequenceSource::new(
            dir.path(),
            "raw",
            format,
            FrameTime::new(1, 25),
            1,
        )
        .unwrap();

        assert_eq!(source.num_frames(), 3);
        for expected_fill in [0u8, 1, 2] {
            let frame = source.pop_frame().unwrap();
            assert!(frame.image_data().iter().all(|&b| b == expected_fill));
        }
        assert_eq!(source.state(), SourceState::EndOfStream);
        assert!(source.pop_frame().is_none());
    }

    #[test]
    fn last_frame_marks_end_of_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let format = rgba8(1, 1);
        let size = format.bytes_per_frame();
        write_frame(dir.path(), "a.raw", size, 9);

        let mut source =
            ImageSequenceSource::new(dir.path(), "raw", format, FrameTime::new(1, 1), 1).unwrap();
        let frame = source.pop_frame().unwrap();
        assert!(frame.marks_end_of_sequence());
    }

    #[test]
    fn loop_count_replays_the_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let format = rgba8(1, 1);
        let size = format.bytes_per_frame();
        write_frame(dir.path(), "a.raw", size, 5);
        write_frame(dir.path(), "b.raw", size, 6);

        let mut source =
            ImageSequenceSource::new(dir.path(), "raw", format, FrameTime::new(1, 1), 2).unwrap();

        assert_eq!(source.num_frames(), 4);
        let fills: Vec<u8> = std::iter::from_fn(|| source.pop_frame())
            .map(|f| f.image_data()[0])
            .collect();
        assert_eq!(fills, vec![5, 6, 5, 6]);
    }

    #[test]
    fn rejects_a_size_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let format = rgba8(4, 4);
        write_frame(dir.path(), "a.raw", 1, 0);
        let err = ImageSequenceSource::new(dir.path(), "raw", format, FrameTime::new(1, 1), 1);
        assert!(err.is_err());
    }
}
