//! A cheaply cloned device texture handle, used as the `Texture` parameter
//! to `conduit_video::Renderer<Texture>`.
//!
//! `conduit_video::Renderer` is deliberately generic over the texture type so
//! `conduit-video` itself stays GPU-agnostic; this is the concrete handle
//! `conduit-gpu` plugs in. `wgpu::Texture`/`wgpu::TextureView` are already
//! cheap, reference-counted handles internally, so cloning this struct never
//! duplicates the underlying GPU resource.

#[derive(Clone)]
pub struct GpuTextureHandle {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
}

/// Maps a [`conduit_video::PixelFormat`] to the `wgpu::TextureFormat` used
/// to back a [`crate::tokens::DeviceImageToken`].
///
/// # Errors
/// Packed/planar formats (`Yuv422Packed`, `Yuv420Planar`, `V210`, `Rgb8`)
/// have no matching single-plane `wgpu` texture format and need a decode
/// pass to unpack into one of the formats below before they can live on a
/// device texture -- that decode shader isn't wired up yet, so these
/// formats are rejected here rather than silently reinterpreted.
pub fn wgpu_texture_format(
    pixel_format: conduit_video::PixelFormat,
) -> Result<wgpu::TextureFormat, crate::error::GpuError> {
    use conduit_video::PixelFormat;
    match pixel_format {
        PixelFormat::Rgba8 => Ok(wgpu::TextureFormat::Rgba8Unorm),
        PixelFormat::Rgba16 => Ok(wgpu::TextureFormat::Rgba16Unorm),
        PixelFormat::RgbaFloat16 => Ok(wgpu::TextureFormat::Rgba16Float),
        PixelFormat::RgbaFloat32 => Ok(wgpu::TextureFormat::Rgba32Float),
        other => Err(crate::error::GpuError(format!(
            "pixel format {other} has no direct device texture representation; a decode pass is required first"
        ))),
    }
}
