//! Hand-rolled error type for GPU-facing operations, matching the teacher's
//! `PlatformError` (`blade-graphics/src/webgpu/platform.rs`) rather than
//! reaching for `thiserror`.

use std::fmt;

#[derive(Debug)]
pub struct GpuError(pub String);

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for GpuError {}

impl From<GpuError> for conduit_core::DispatchError {
    fn from(e: GpuError) -> Self {
        conduit_core::InvalidState(e.0).into()
    }
}
