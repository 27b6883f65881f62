//! A [`conduit_core::dispatcher::TraceSink`] that serializes to `ron`,
//! grounded in spec.md §6's requirement that the serialization format live
//! outside the core behind a trait. `ron` is already a dependency of the
//! teacher's workspace for its own scene/asset files, so it's the natural
//! fit rather than introducing `serde_json`.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use conduit_core::dispatcher::{SessionTrace as CoreSessionTrace, TraceError, TraceSink};

use crate::record::SessionTrace;

/// Writes one session's trace to a `.ron` file at `path` on shutdown.
pub struct RonFileSink {
    path: PathBuf,
}

impl RonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        RonFileSink { path: path.into() }
    }
}

impl TraceSink for RonFileSink {
    fn write_session(&mut self, trace: &CoreSessionTrace) -> Result<(), TraceError> {
        let mirrored = SessionTrace::from(trace);
        let text = ron::ser::to_string_pretty(&mirrored, ron::ser::PrettyConfig::default())
            .map_err(|e| TraceError(format!("ron serialization failed: {e}")))?;
        let mut file = File::create(&self.path)
            .map_err(|e| TraceError(format!("could not create '{}': {e}", self.path.display())))?;
        file.write_all(text.as_bytes())
            .map_err(|e| TraceError(format!("could not write '{}': {e}", self.path.display())))?;
        log::info!("wrote session trace to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_a_readable_ron_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.ron");
        let mut sink = RonFileSink::new(&path);

        let trace = CoreSessionTrace { stages: vec![] };
        sink.write_session(&trace).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("stages"));
    }
}
