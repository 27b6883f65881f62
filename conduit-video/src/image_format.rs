//! Uncompressed image format descriptor, grounded in `ImageFormat.h`/
//! `ImageFormat.cpp`. The OpenGL-specific half of the original (`GLFormatInfo`,
//! `gl_native_format`) is dropped -- `conduit-gpu` derives whatever `wgpu`
//! texture format it needs from `PixelFormat` directly instead of carrying a
//! parallel GL-format cache on this struct.

use std::fmt;

/// Where row 0 of the buffer sits relative to the displayed image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    LowerLeft,
    UpperLeft,
}

/// Opto-electronic transfer function of the samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferFunction {
    Bt709,
    Bt601,
    Srgb,
    Linear,
}

/// Primaries/white point describing how chroma maps to displayable color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Chromaticity {
    Bt709,
    Bt601,
    Srgb,
}

/// Uncompressed pixel layout. Packed/planar variants named after the
/// original's `PixelFormat` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Rgb8,
    Rgba8,
    Rgba16,
    Yuv422Packed,
    Yuv420Planar,
    V210,
    RgbaFloat16,
    RgbaFloat32,
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::Rgb8 => "RGB_8BIT",
            PixelFormat::Rgba8 => "RGBA_8BIT",
            PixelFormat::Rgba16 => "RGBA_16BIT",
            PixelFormat::Yuv422Packed => "YUV_422_PACKED",
            PixelFormat::Yuv420Planar => "YUV_420_PLANAR",
            PixelFormat::V210 => "YUV_10BIT_V210",
            PixelFormat::RgbaFloat16 => "RGBA_FLOAT_16BIT",
            PixelFormat::RgbaFloat32 => "RGBA_FLOAT_32BIT",
        };
        f.write_str(name)
    }
}

/// Error produced when an `ImageFormat` cannot describe a buffer (an
/// unsupported row-alignment requirement for `V210`, or a zero extent).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsupportedFormat(pub String);

impl fmt::Display for UnsupportedFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unsupported image format: {}", self.0)
    }
}

impl std::error::Error for UnsupportedFormat {}

/// A complete uncompressed image format description: extents, pixel layout,
/// and the color description needed to convert into/out of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageFormat {
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    transfer: TransferFunction,
    chromaticity: Chromaticity,
    origin: Origin,
}

impl ImageFormat {
    /// # Errors
    /// Returns [`UnsupportedFormat`] if `pixel_format` is [`PixelFormat::V210`]
    /// and `width` is not a multiple of 48 -- the original does not support
    /// V210 row padding for narrower frames (`ImageFormat.cpp`'s
    /// `calculate_byte_size`).
    pub fn new(
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        transfer: TransferFunction,
        chromaticity: Chromaticity,
        origin: Origin,
    ) -> Result<Self, UnsupportedFormat> {
        if pixel_format == PixelFormat::V210 && width % 48 != 0 {
            return Err(UnsupportedFormat(format!(
                "V210 requires width to be a multiple of 48, got {width}"
            )));
        }
        Ok(ImageFormat {
            width,
            height,
            pixel_format,
            transfer,
            chromaticity,
            origin,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    pub fn transfer(&self) -> TransferFunction {
        self.transfer
    }

    pub fn chromaticity(&self) -> Chromaticity {
        self.chromaticity
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// The number of bytes one frame in this format occupies, ported
    /// verbatim from `ImageFormat::calculate_byte_size`.
    pub fn bytes_per_frame(&self) -> usize {
        let (w, h) = (self.width as usize, self.height as usize);
        match self.pixel_format {
            PixelFormat::Rgb8 => 3 * w * h,
            PixelFormat::Rgba8 => 4 * w * h,
            PixelFormat::Rgba16 => 8 * w * h,
            PixelFormat::RgbaFloat32 => 16 * w * h,
            PixelFormat::RgbaFloat16 => 8 * w * h,
            PixelFormat::V210 => w * h * 8 / 3,
            PixelFormat::Yuv422Packed => 2 * w * h,
            PixelFormat::Yuv420Planar => w * h + (w / 2) * (h / 2) * 2,
        }
    }

    /// Whether a buffer in `self`'s format can feed a stage expecting
    /// `other` without a conversion pass -- same extents and pixel layout;
    /// transfer/chromaticity/origin are conversion concerns, not buffer
    /// layout ones.
    pub fn is_compatible_with(&self, other: &ImageFormat) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.pixel_format == other.pixel_format
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} {} ({:?}/{:?}, {:?})",
            self.width, self.height, self.pixel_format, self.transfer, self.chromaticity, self.origin
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(pixel_format: PixelFormat, width: u32, height: u32) -> ImageFormat {
        ImageFormat::new(
            width,
            height,
            pixel_format,
            TransferFunction::Bt709,
            Chromaticity::Bt709,
            Origin::UpperLeft,
        )
        .unwrap()
    }

    #[test]
    fn rgba8_byte_size() {
        let f = fmt(PixelFormat::Rgba8, 1920, 1080);
        assert_eq!(f.bytes_per_frame(), 4 * 1920 * 1080);
    }

    #[test]
    fn v210_byte_size() {
        let f = fmt(PixelFormat::V210, 1920, 1080);
        assert_eq!(f.bytes_per_frame(), 1920 * 1080 * 8 / 3);
    }

    #[test]
    fn v210_rejects_unpadded_width() {
        let err = ImageFormat::new(
            1921,
            1080,
            PixelFormat::V210,
            TransferFunction::Bt709,
            Chromaticity::Bt709,
            Origin::UpperLeft,
        );
        assert!(err.is_err());
    }

    #[test]
    fn compatibility_ignores_color_description() {
        let a = ImageFormat::new(
            640,
            480,
            PixelFormat::Rgba8,
            TransferFunction::Srgb,
            Chromaticity::Srgb,
            Origin::UpperLeft,
        )
        .unwrap();
        let b = ImageFormat::new(
            640,
            480,
            PixelFormat::Rgba8,
            TransferFunction::Linear,
            Chromaticity::Bt709,
            Origin::LowerLeft,
        )
        .unwrap();
        assert!(a.is_compatible_with(&b));
    }

    #[test]
    fn compatibility_rejects_mismatched_extents() {
        let a = fmt(PixelFormat::Rgba8, 640, 480);
        let b = fmt(PixelFormat::Rgba8, 1280, 720);
        assert!(!a.is_compatible_with(&b));
    }
}
