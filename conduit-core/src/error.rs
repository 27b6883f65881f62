//! Error taxonomy for the dispatch runtime.
//!
//! Mirrors the teacher's hand-rolled style (`blade-graphics`'s `PlatformError`):
//! plain structs/enums implementing `Display`/`Error` directly, no `thiserror`.

use std::fmt;

/// A pipeline was configured in a way that can never execute correctly.
///
/// Raised only at construction time (`Dispatcher::new`, `build_pipeline`),
/// never once a composition is running.
#[derive(Debug)]
pub struct InvalidConfiguration(pub String);

impl fmt::Display for InvalidConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid pipeline configuration: {}", self.0)
    }
}

impl std::error::Error for InvalidConfiguration {}

/// A caller violated an API invariant (e.g. executing a stopped stage).
///
/// This is a programming error, not a runtime condition a caller can
/// meaningfully recover from; constructing one should be rare and is always
/// logged at the call site before the process decides how to react.
#[derive(Debug)]
pub struct InvalidState(pub String);

impl fmt::Display for InvalidState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid stage state: {}", self.0)
    }
}

impl std::error::Error for InvalidState {}

/// A blocked ring wait observed the ring's one-shot `cancel()` flag.
///
/// Not a failure: a canceled stage treats this the same as end-of-stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Canceled;

impl fmt::Display for Canceled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ring was canceled")
    }
}

impl std::error::Error for Canceled {}

/// Top-level error returned by fallible, non-worker-thread dispatcher calls
/// (`Dispatcher::new`, `create_composition`, ...). Errors that occur inside a
/// running worker are logged and converted into an in-band `StopExecution`
/// instead of propagating here -- see the crate's module docs.
#[derive(Debug)]
pub enum DispatchError {
    InvalidConfiguration(InvalidConfiguration),
    InvalidState(InvalidState),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::InvalidConfiguration(e) => e.fmt(f),
            DispatchError::InvalidState(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for DispatchError {}

impl From<InvalidConfiguration> for DispatchError {
    fn from(e: InvalidConfiguration) -> Self {
        DispatchError::InvalidConfiguration(e)
    }
}

impl From<InvalidState> for DispatchError {
    fn from(e: InvalidState) -> Self {
        DispatchError::InvalidState(e)
    }
}
